//! Doubly linked list of idle resources, backed by an index-addressed arena.

/// Single arena slot.
///
/// Links are only meaningful while `value` is `Some`.
#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Idle list.
///
/// Front holds the most recently returned entry, back holds the least recently used one.
/// All insertions and removals are O(1). Vacated slots are recycled through a free list, so
/// the arena never grows beyond the peak number of simultaneously idle entries.
#[derive(Debug)]
pub(crate) struct IdleList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    front: Option<usize>,
    back: Option<usize>,
    count: usize,
}

impl<T> Default for IdleList<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            front: None,
            back: None,
            count: 0,
        }
    }
}

impl<T> IdleList<T> {
    /// Number of entries in the list.
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Least recently used entry.
    pub(crate) fn back(&self) -> Option<&T> {
        self.back.and_then(|idx| self.slots[idx].value.as_ref())
    }

    /// Insert an entry at the head of the list.
    pub(crate) fn push_front(&mut self, value: T) {
        let slot = Slot {
            value: Some(value),
            prev: None,
            next: self.front,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                idx
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        match self.front {
            Some(old_front) => self.slots[old_front].prev = Some(idx),
            None => self.back = Some(idx),
        }
        self.front = Some(idx);
        self.count += 1;
    }

    /// Remove and return the head of the list.
    pub(crate) fn pop_front(&mut self) -> Option<T> {
        let idx = self.front?;
        let next = self.slots[idx].next;
        match next {
            Some(next) => self.slots[next].prev = None,
            None => self.back = None,
        }
        self.front = next;
        Some(self.vacate(idx))
    }

    /// Remove and return the tail of the list.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        let idx = self.back?;
        let prev = self.slots[idx].prev;
        match prev {
            Some(prev) => self.slots[prev].next = None,
            None => self.front = None,
        }
        self.back = prev;
        Some(self.vacate(idx))
    }

    /// Clear an unlinked slot and put it on the free list.
    fn vacate(&mut self, idx: usize) -> T {
        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
        let value = slot
            .value
            .take()
            .unwrap_or_else(|| unreachable!("idle list slot {idx} is linked but empty"));
        self.free.push(idx);
        self.count -= 1;
        if self.count == 0 {
            // Nothing is linked anymore, so the whole arena can be reused from scratch.
            self.slots.clear();
            self.free.clear();
        }
        value
    }
}

/// Draining iterator, yielding entries from front to back.
pub(crate) struct IntoIter<T>(IdleList<T>);

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.0.len(), Some(self.0.len()))
    }
}

impl<T> IntoIterator for IdleList<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter(self)
    }
}
