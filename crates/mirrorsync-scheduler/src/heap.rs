//! Binary min-heap with a key to slot index.
//!
//! The index is rewritten on every swap, push and pop, so a keyed entry can
//! be found, changed and re-heapified in place.

use std::collections::HashMap;

/// An entry with a unique key.
pub(crate) trait Keyed {
    fn key(&self) -> &str;
}

pub(crate) struct IndexedHeap<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
    less: fn(&T, &T) -> bool,
}

impl<T: Keyed> IndexedHeap<T> {
    pub(crate) fn new(less: fn(&T, &T) -> bool) -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            less,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub(crate) fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(crate) fn get(&self, key: &str) -> Option<&T> {
        self.position(key).map(|i| &self.items[i])
    }

    /// Insert an entry whose key is not present yet.
    pub(crate) fn push(&mut self, item: T) {
        debug_assert!(!self.index.contains_key(item.key()));
        let i = self.items.len();
        self.index.insert(item.key().to_owned(), i);
        self.items.push(item);
        self.up(i);
    }

    /// Change the entry at `key` and restore heap order.
    ///
    /// `f` must not change the key.
    pub(crate) fn modify(&mut self, key: &str, f: impl FnOnce(&mut T)) -> bool {
        let Some(i) = self.position(key) else {
            return false;
        };
        f(&mut self.items[i]);
        self.fix(i);
        true
    }

    /// Change the root and restore heap order.
    pub(crate) fn modify_root(&mut self, f: impl FnOnce(&mut T)) -> bool {
        if self.items.is_empty() {
            return false;
        }
        f(&mut self.items[0]);
        self.fix(0);
        true
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<T> {
        let i = self.position(key)?;
        self.remove_at(i)
    }

    #[cfg(test)]
    pub(crate) fn pop(&mut self) -> Option<T> {
        self.remove_at(0)
    }

    fn remove_at(&mut self, i: usize) -> Option<T> {
        let last = self.items.len().checked_sub(1)?;
        if i != last {
            self.swap(i, last);
        }
        let item = self.items.pop()?;
        self.index.remove(item.key());
        if i != last {
            self.fix(i);
        }
        Some(item)
    }

    fn fix(&mut self, i: usize) {
        if !self.down(i) {
            self.up(i);
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        for slot in [i, j] {
            if let Some(pos) = self.index.get_mut(self.items[slot].key()) {
                *pos = slot;
            }
        }
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !(self.less)(&self.items[j], &self.items[parent]) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift down from `i0`; returns whether the entry moved.
    fn down(&mut self, i0: usize) -> bool {
        let n = self.items.len();
        let mut i = i0;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && (self.less)(&self.items[right], &self.items[left]) {
                child = right;
            }
            if !(self.less)(&self.items[child], &self.items[i]) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > i0
    }

    /// Check that every slot is indexed and every parent orders before its
    /// children.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.items.len(), self.index.len());
        for (i, item) in self.items.iter().enumerate() {
            assert_eq!(self.index.get(item.key()), Some(&i));
            if i > 0 {
                assert!(!(self.less)(item, &self.items[(i - 1) / 2]));
            }
        }
    }
}
