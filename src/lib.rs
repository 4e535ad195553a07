//! # SedimentDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      Engine                           │
//! │  ┌────────────┐   ┌─────────────────────────────────┐ │
//! │  │  Memtable  │   │  SSTables (level-0 … level-N)   │ │
//! │  │  + WAL     │   │  .bin / .idx / .spr triples     │ │
//! │  └─────┬──────┘   └──────────────┬──────────────────┘ │
//! │        │  flush (switch + write) │                    │
//! │        └──────────►──────────────┤                    │
//! │                                  │                    │
//! │  ┌───────────────────────────────┴──────────────────┐ │
//! │  │  Compaction (k-way merge, level k → level k+1)   │ │
//! │  └──────────────────────────────────────────────────┘ │
//! │                                                       │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │  Level catalog (descriptors + bloom filters)     │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, flush, compact, close |
//! | [`memtable`] | In-memory write buffer with byte accounting and freeze-and-swap |
//! | [`skiplist`] | Probabilistic ordered map backing the memtable |
//! | [`wal`] | Append-only write-ahead log with a sequence-number side file |
//! | [`sstable`] | Immutable three-file sorted tables (data, dense index, sparse index) |
//! | [`catalog`] | In-memory view of the on-disk levels, rebuilt on open |
//! | [`compaction`] | Heap-based k-way merge across adjacent levels |
//! | [`encoding`] | Length-prefixed record frame and tombstone-tagging value codec |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is appended to the WAL before
//!   it becomes visible to readers, guaranteeing durability and crash
//!   recovery.
//! - **Tombstone deletes** — deletes flow through the same key/value path as
//!   writes and are dropped permanently only when compaction reaches the
//!   terminal level.
//! - **Bloom filter lookups** — each SSTable carries an in-memory bloom
//!   filter for fast negative point-lookup responses.
//! - **Sparse indexing** — point lookups touch one sparse-index bracket, a
//!   short dense-index scan, and a single data-file seek.
//! - **Background maintenance** — a flush worker absorbs memtable overflow
//!   and a compaction worker keeps per-level file counts bounded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sedimentdb::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::open("/tmp/my_db", EngineConfig::default()).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), b"world".to_vec());
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert!(engine.get(b"hello".to_vec()).is_err());
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

pub mod catalog;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod wal;
