//! Probabilistic ordered map over byte-string keys.
//!
//! The skip list is the mutable backing of the memtable. Keys are compared
//! lexicographically as raw bytes; each node carries a tower of forward
//! links whose height is drawn from a geometric distribution with
//! `p = 1/2`, capped at [`MAX_HEIGHT`].
//!
//! ## Height selection
//!
//! A fresh 32-bit sample from a fast PRNG is compared against a precomputed
//! per-level probability table: the height grows while the sample stays at
//! or below the threshold for the next level. This keeps insertion on the
//! hot path free of floating-point work.
//!
//! ## Representation
//!
//! Nodes live in an arena (`Vec<Node>`) and tower links are arena indices,
//! which keeps the structure in safe Rust while preserving the forward-only
//! singly-linked shape of the classic formulation. Index `0` is the head
//! sentinel; [`NIL`] terminates every level.
//!
//! Inserting an existing key replaces its value in place and hands the
//! previous value back, which is what lets the memtable keep its byte
//! accounting exact.

#[cfg(test)]
mod tests;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Maximum tower height.
pub const MAX_HEIGHT: usize = 16;

/// Probability that a node's tower grows one more level.
pub const P_VALUE: f64 = 0.5;

/// Sentinel arena index terminating a level.
const NIL: usize = usize::MAX;

/// Arena index of the head sentinel.
const HEAD: usize = 0;

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    tower: [usize; MAX_HEIGHT],
}

/// An ordered byte-key map with probabilistic balancing.
pub struct SkipList {
    nodes: Vec<Node>,
    height: usize,
    len: usize,
    probabilities: [u32; MAX_HEIGHT],
    rng: SmallRng,
}

impl SkipList {
    /// Creates an empty skip list.
    pub fn new() -> Self {
        let mut probabilities = [0u32; MAX_HEIGHT];
        let mut probability = 1.0f64;
        for slot in probabilities.iter_mut() {
            *slot = (probability * f64::from(u32::MAX)) as u32;
            probability *= P_VALUE;
        }

        let head = Node {
            key: Vec::new(),
            value: Vec::new(),
            tower: [NIL; MAX_HEIGHT],
        };

        Self {
            nodes: vec![head],
            height: 1,
            len: 0,
            probabilities,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Draws a tower height from the precomputed probability table.
    fn random_height(&mut self) -> usize {
        let seed: u32 = self.rng.random();

        let mut height = 1;
        while height < MAX_HEIGHT && seed <= self.probabilities[height] {
            height += 1;
        }
        height
    }

    /// Finds `key` and records the rightmost predecessor per level.
    ///
    /// The journey array is what `insert` splices new towers through; levels
    /// above the current height point at the head sentinel.
    fn search(&self, key: &[u8]) -> (Option<usize>, [usize; MAX_HEIGHT]) {
        let mut journey = [HEAD; MAX_HEIGHT];
        let mut prev = HEAD;
        let mut next = NIL;

        for level in (0..self.height).rev() {
            next = self.nodes[prev].tower[level];
            while next != NIL {
                if key <= self.nodes[next].key.as_slice() {
                    break;
                }
                prev = next;
                next = self.nodes[prev].tower[level];
            }
            journey[level] = prev;
        }

        if next != NIL && self.nodes[next].key == key {
            (Some(next), journey)
        } else {
            (None, journey)
        }
    }

    /// Inserts `key → value`, returning the previous value on replace.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let (found, journey) = self.search(&key);

        if let Some(idx) = found {
            return Some(std::mem::replace(&mut self.nodes[idx].value, value));
        }

        let height = self.random_height();
        let idx = self.nodes.len();
        let mut node = Node {
            key,
            value,
            tower: [NIL; MAX_HEIGHT],
        };

        for level in 0..height {
            node.tower[level] = self.nodes[journey[level]].tower[level];
        }
        self.nodes.push(node);
        for level in 0..height {
            self.nodes[journey[level]].tower[level] = idx;
        }

        if height > self.height {
            self.height = height;
        }
        self.len += 1;

        None
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let (found, _) = self.search(key);
        found.map(|idx| self.nodes[idx].value.as_slice())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates entries in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.nodes[HEAD].tower[0],
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending `(key, value)` iterator over a [`SkipList`].
pub struct Iter<'a> {
    list: &'a SkipList,
    cur: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let node = &self.list.nodes[self.cur];
        self.cur = node.tower[0];
        Some((node.key.as_slice(), node.value.as_slice()))
    }
}
