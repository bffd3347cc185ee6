//! Restores capture order on the display side when `--ordered` is set.
//!
//! Workers finish frames in any order. Items are held until every earlier
//! sequence number has been released; when more than `max_pending` items are
//! waiting, the missing numbers (frames that failed analysis or were
//! discarded) are skipped.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
    max_pending: usize,
    skipped: u64,
    late: u64,
}

impl<T> ReorderBuffer<T> {
    /// Expect `first` as the first sequence number.
    pub fn starting_at(first: u64, max_pending: usize) -> Self {
        Self {
            next: first,
            pending: BTreeMap::new(),
            max_pending,
            skipped: 0,
            late: 0,
        }
    }

    /// Accept one item; returns everything now releasable, in sequence order.
    ///
    /// An item older than what has already been released is dropped.
    pub fn push(&mut self, sequence: u64, item: T) -> Vec<T> {
        if sequence < self.next {
            self.late += 1;
            return Vec::new();
        }
        self.pending.insert(sequence, item);

        let mut ready = Vec::new();
        loop {
            if let Some(item) = self.pending.remove(&self.next) {
                ready.push(item);
                self.next += 1;
                continue;
            }
            if self.pending.len() <= self.max_pending {
                break;
            }
            let Some((&oldest, _)) = self.pending.first_key_value() else {
                break;
            };
            self.skipped += oldest - self.next;
            self.next = oldest;
        }
        ready
    }

    /// Release everything still held, in order.
    pub fn flush(&mut self) -> Vec<T> {
        let pending = std::mem::take(&mut self.pending);
        if let Some((&last, _)) = pending.last_key_value() {
            self.next = last + 1;
        }
        pending.into_values().collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Sequence numbers given up on.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Items that arrived after their slot had been skipped.
    pub fn late(&self) -> u64 {
        self.late
    }
}
