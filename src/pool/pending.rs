//! # Pending request table.
//!
//! Correlates worker replies with dispatched requests by sequence id, the way
//! an RPC client tracks calls in flight.
//!
//! ## Rules
//! - Ids come from a monotonic counter and are never reused.
//! - An entry is removed exactly once: on reply, on dispatch failure, when its
//!   worker is lost, or at shutdown.
//! - A reply without an entry is stale and ignored by the caller.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    inflight: HashMap<u64, usize>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `seq` as dispatched to `worker`.
    pub fn insert(&mut self, seq: u64, worker: usize) {
        let prev = self.inflight.insert(seq, worker);
        debug_assert!(prev.is_none(), "request id {seq} reused");
    }

    /// Removes `seq`, returning the worker it was sent to.
    pub fn complete(&mut self, seq: u64) -> Option<usize> {
        self.inflight.remove(&seq)
    }

    /// Removes every request owned by `worker` (ascending ids).
    pub fn drain_worker(&mut self, worker: usize) -> Vec<u64> {
        let mut lost: Vec<u64> = self
            .inflight
            .iter()
            .filter(|&(_, w)| *w == worker)
            .map(|(seq, _)| *seq)
            .collect();
        lost.sort_unstable();
        for seq in &lost {
            self.inflight.remove(seq);
        }
        lost
    }

    /// Removes everything (ascending ids).
    pub fn drain(&mut self) -> Vec<u64> {
        let mut all: Vec<u64> = self.inflight.drain().map(|(seq, _)| seq).collect();
        all.sort_unstable();
        all
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_removed_exactly_once() {
        let mut table = PendingTable::new();
        table.insert(0, 0);
        table.insert(1, 1);
        table.insert(2, 0);
        table.insert(3, 1);

        assert_eq!(table.complete(1), Some(1));
        assert_eq!(table.complete(1), None);

        assert_eq!(table.drain_worker(0), vec![0, 2]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.complete(2), None);

        assert_eq!(table.drain(), vec![3]);
        assert!(table.is_empty());
    }
}
