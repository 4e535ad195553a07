//! Recovery tests — WAL replay and catalog reconstruction on reopen.

#[cfg(test)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineError};
    use tempfile::TempDir;

    #[test]
    fn unflushed_write_survives_a_crash() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
            engine.put(b"x".to_vec(), b"1".to_vec()).unwrap();
            // Dropped without close: the WAL alone must carry the write.
        }

        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
        assert_eq!(engine.get(b"x".to_vec()).unwrap(), b"1".to_vec());
        engine.close().unwrap();
    }

    #[test]
    fn unflushed_delete_survives_a_crash() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
            engine.put(b"x".to_vec(), b"1".to_vec()).unwrap();
            engine.delete(b"x".to_vec()).unwrap();
        }

        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
        assert!(matches!(
            engine.get(b"x".to_vec()),
            Err(EngineError::NotFound)
        ));
        engine.close().unwrap();
    }

    #[test]
    fn close_then_reopen_preserves_everything() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), manual_config()).unwrap();
            for i in 0..30 {
                engine
                    .put(format!("key-{i:03}").into_bytes(), format!("val-{i}").into_bytes())
                    .unwrap();
            }
            engine.flush().unwrap();
            // More writes after the flush stay WAL-only.
            engine.put(b"late".to_vec(), b"wal-only".to_vec()).unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(tmp.path(), manual_config()).unwrap();
        for i in 0..30 {
            assert_eq!(
                engine.get(format!("key-{i:03}").into_bytes()).unwrap(),
                format!("val-{i}").into_bytes()
            );
        }
        assert_eq!(engine.get(b"late".to_vec()).unwrap(), b"wal-only".to_vec());
        engine.close().unwrap();
    }

    #[test]
    fn reopen_rediscovers_flushed_tables() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), manual_config()).unwrap();
            engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            engine.flush().unwrap();
            engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
            engine.flush().unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(tmp.path(), manual_config()).unwrap();
        let stats = engine.stats().unwrap();

        // The catalog scan found both tables without any re-flush.
        assert_eq!(stats.level_table_counts[0], 2);
        assert_eq!(stats.memtable_entries, 0);

        assert_eq!(engine.get(b"a".to_vec()).unwrap(), b"1".to_vec());
        assert_eq!(engine.get(b"b".to_vec()).unwrap(), b"2".to_vec());
        engine.close().unwrap();
    }

    #[test]
    fn newest_value_wins_across_a_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = Engine::open(tmp.path(), manual_config()).unwrap();
            engine.put(b"k".to_vec(), b"old".to_vec()).unwrap();
            engine.flush().unwrap();
            engine.put(b"k".to_vec(), b"new".to_vec()).unwrap();
            engine.flush().unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(tmp.path(), manual_config()).unwrap();
        assert_eq!(engine.get(b"k".to_vec()).unwrap(), b"new".to_vec());
        engine.close().unwrap();
    }

    #[test]
    fn repeated_crash_reopen_cycles_accumulate_state() {
        let tmp = TempDir::new().unwrap();

        for round in 0u32..5 {
            let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
            engine
                .put(format!("round-{round}").into_bytes(), b"done".to_vec())
                .unwrap();
            // Crash: no close, no flush.
            drop(engine);
        }

        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
        for round in 0u32..5 {
            assert_eq!(
                engine.get(format!("round-{round}").into_bytes()).unwrap(),
                b"done".to_vec()
            );
        }
        engine.close().unwrap();
    }

    #[test]
    fn double_close_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();
        engine.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        engine.close().unwrap();
        engine.close().unwrap();
    }
}
