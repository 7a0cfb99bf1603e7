//! Epoch-stamped visited set for graph traversal.
//!
//! `clear()` bumps the epoch instead of zeroing the buffer; a slot counts as visited
//! only when it holds the current epoch.

#[derive(Debug)]
pub(crate) struct VisitedSet {
    marks: Vec<u32>,
    epoch: u32,
}

impl VisitedSet {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { marks: vec![0; capacity], epoch: 1 }
    }

    pub(crate) fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    pub(crate) fn clear(&mut self) {
        if self.epoch == u32::MAX {
            self.marks.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Returns `true` if `id` was not yet visited in this epoch.
    #[inline]
    pub(crate) fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == self.epoch {
            false
        } else {
            *slot = self.epoch;
            true
        }
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
