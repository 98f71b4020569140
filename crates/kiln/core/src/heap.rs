//! A binary heap with a caller supplied ordering.

use std::fmt;

/// A binary heap ordered by a comparator.
///
/// `is_better(a, b)` returns `true` if `a` should be handed out before `b`. The best element is
/// always at the top and is what [`Heap::peek`] returns.
pub struct Heap<T, F> {
    items: Vec<T>,
    is_better: F,
}

impl<T, F> Heap<T, F>
where
    F: Fn(&T, &T) -> bool,
{
    /// Creates an empty heap with the given ordering
    pub const fn new(is_better: F) -> Self {
        Self { items: Vec::new(), is_better }
    }

    /// Builds a heap out of all `items`
    pub fn from_vec(items: Vec<T>, is_better: F) -> Self {
        let mut heap = Self { items, is_better };
        for idx in (0..heap.items.len() / 2).rev() {
            heap.sift_down(idx);
        }
        heap
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the best element without removing it
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Removes and returns the best element
    pub fn remove_best(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None
        }
        let best = self.items.swap_remove(0);
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Some(best)
    }

    /// Replaces the best element with `item` and restores the ordering.
    ///
    /// Returns the replaced element, on an empty heap this is a plain push.
    pub fn replace_best(&mut self, item: T) -> Option<T> {
        if self.items.is_empty() {
            self.items.push(item);
            return None
        }
        let old = std::mem::replace(&mut self.items[0], item);
        self.sift_down(0);
        Some(old)
    }

    /// Returns the index of the first element matching `predicate`, in storage order
    pub fn position(&self, predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(predicate)
    }

    /// Returns the element at `index`, in storage order
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Replaces the element at `index` and restores the ordering.
    pub fn replace_at(&mut self, index: usize, item: T) -> T {
        let old = std::mem::replace(&mut self.items[index], item);
        self.restore(index);
        old
    }

    /// Removes the element at `index` and restores the ordering.
    pub fn remove_at(&mut self, index: usize) -> T {
        let removed = self.items.swap_remove(index);
        if index < self.items.len() {
            self.restore(index);
        }
        removed
    }

    /// Iterates over all elements in storage order (not sorted)
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Removes all elements, returning them in storage order
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn restore(&mut self, index: usize) {
        if index > 0 && (self.is_better)(&self.items[index], &self.items[(index - 1) / 2]) {
            self.sift_up(index);
        } else {
            self.sift_down(index);
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !(self.is_better)(&self.items[idx], &self.items[parent]) {
                break
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut best = idx;
            if left < len && (self.is_better)(&self.items[left], &self.items[best]) {
                best = left;
            }
            if right < len && (self.is_better)(&self.items[right], &self.items[best]) {
                best = right;
            }
            if best == idx {
                break
            }
            self.items.swap(idx, best);
            idx = best;
        }
    }
}

impl<T: fmt::Debug, F> fmt::Debug for Heap<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap").field("items", &self.items).finish_non_exhaustive()
    }
}
