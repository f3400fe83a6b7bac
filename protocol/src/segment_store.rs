//! Arena of segments threaded through doubly linked queues.
//!
//! A connection keeps four queues (send queue, send buffer, receive buffer, receive queue) over a
//! single `SegmentStore`. Links live in the arena slots rather than in the queues, so moving a
//! segment between queues, removing it from the middle of one or appending at either end are all
//! O(1) and never copy the segment itself.

use crate::{segment::Segment, ProtocolResult};

/// Stable handle of a segment inside a `SegmentStore`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SegmentKey(usize);

#[derive(Debug)]
struct Slot {
    segment: Option<Segment>,
    prev: Option<SegmentKey>,
    next: Option<SegmentKey>,
}

/// Head, tail and length of one queue. The links themselves are owned by the store.
#[derive(Debug, Default)]
pub(crate) struct SegmentQueue {
    head: Option<SegmentKey>,
    tail: Option<SegmentKey>,
    len: usize,
}

impl SegmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn front(&self) -> Option<SegmentKey> {
        self.head
    }

    #[inline]
    pub fn back(&self) -> Option<SegmentKey> {
        self.tail
    }
}

#[derive(Debug, Default)]
pub(crate) struct SegmentStore {
    slots: Vec<Slot>,
    // Released slot indices. Its capacity always covers every slot so releasing never allocates.
    free: Vec<usize>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure the next `additional` allocations succeed without growing the arena.
    pub fn reserve(&mut self, additional: usize) -> ProtocolResult<()> {
        let missing = additional.saturating_sub(self.free.len());
        if missing == 0 {
            return Ok(());
        }
        self.slots.try_reserve(missing)?;
        let slot_capacity = self.slots.len() + missing;
        self.free
            .try_reserve(slot_capacity.saturating_sub(self.free.len()))?;
        Ok(())
    }

    /// Moves `segment` into the arena. The segment is not linked into any queue yet.
    pub fn allocate(&mut self, segment: Segment) -> ProtocolResult<SegmentKey> {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Slot {
                segment: Some(segment),
                prev: None,
                next: None,
            };
            return Ok(SegmentKey(index));
        }

        self.reserve(1)?;
        self.slots.push(Slot {
            segment: Some(segment),
            prev: None,
            next: None,
        });
        Ok(SegmentKey(self.slots.len() - 1))
    }

    /// Takes an unlinked segment back out of the arena.
    pub fn release(&mut self, key: SegmentKey) -> Segment {
        let slot = &mut self.slots[key.0];
        slot.prev = None;
        slot.next = None;
        let segment = slot
            .segment
            .take()
            .expect("released a segment slot twice");
        self.free.push(key.0);
        segment
    }

    /// Number of live segments across all queues.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline]
    pub fn get(&self, key: SegmentKey) -> &Segment {
        self.slots[key.0]
            .segment
            .as_ref()
            .expect("segment key refers to a released slot")
    }

    #[inline]
    pub fn get_mut(&mut self, key: SegmentKey) -> &mut Segment {
        self.slots[key.0]
            .segment
            .as_mut()
            .expect("segment key refers to a released slot")
    }

    #[inline]
    pub fn next(&self, key: SegmentKey) -> Option<SegmentKey> {
        self.slots[key.0].next
    }

    #[inline]
    pub fn prev(&self, key: SegmentKey) -> Option<SegmentKey> {
        self.slots[key.0].prev
    }

    pub fn push_back(&mut self, queue: &mut SegmentQueue, key: SegmentKey) {
        let tail = queue.tail;
        self.insert_after(queue, tail, key);
    }

    #[cfg(test)]
    pub fn push_front(&mut self, queue: &mut SegmentQueue, key: SegmentKey) {
        self.insert_after(queue, None, key);
    }

    /// Links `key` right after `after`, or at the front of the queue if `after` is `None`.
    pub fn insert_after(
        &mut self,
        queue: &mut SegmentQueue,
        after: Option<SegmentKey>,
        key: SegmentKey,
    ) {
        let next = match after {
            Some(prev) => self.slots[prev.0].next,
            None => queue.head,
        };

        {
            let slot = &mut self.slots[key.0];
            slot.prev = after;
            slot.next = next;
        }

        match after {
            Some(prev) => self.slots[prev.0].next = Some(key),
            None => queue.head = Some(key),
        }
        match next {
            Some(next) => self.slots[next.0].prev = Some(key),
            None => queue.tail = Some(key),
        }
        queue.len += 1;
    }

    /// Detaches `key` from `queue` without releasing it.
    pub fn unlink(&mut self, queue: &mut SegmentQueue, key: SegmentKey) {
        let (prev, next) = {
            let slot = &mut self.slots[key.0];
            (slot.prev.take(), slot.next.take())
        };

        match prev {
            Some(prev) => self.slots[prev.0].next = next,
            None => queue.head = next,
        }
        match next {
            Some(next) => self.slots[next.0].prev = prev,
            None => queue.tail = prev,
        }
        queue.len -= 1;
    }

    pub fn pop_front(&mut self, queue: &mut SegmentQueue) -> Option<SegmentKey> {
        let head = queue.head?;
        self.unlink(queue, head);
        Some(head)
    }

    /// Unlinks and releases `key`.
    pub fn remove(&mut self, queue: &mut SegmentQueue, key: SegmentKey) -> Segment {
        self.unlink(queue, key);
        self.release(key)
    }

    /// Releases every segment of `queue`.
    #[cfg(test)]
    pub fn clear(&mut self, queue: &mut SegmentQueue) {
        while let Some(key) = self.pop_front(queue) {
            self.release(key);
        }
    }

    pub fn iter<'a>(&'a self, queue: &SegmentQueue) -> Iter<'a> {
        Iter {
            store: self,
            cursor: queue.head,
        }
    }
}

/// Front to back iterator over the segments of one queue.
pub(crate) struct Iter<'a> {
    store: &'a SegmentStore,
    cursor: Option<SegmentKey>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        self.cursor = self.store.next(key);
        Some(self.store.get(key))
    }
}
