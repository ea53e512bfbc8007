/// Fixed-capacity buffer that overwrites its oldest element when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Next slot to write; once full this is also the oldest element
    next: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
        } else {
            self.slots[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.slots[self.next..].iter().chain(self.slots[..self.next].iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_insertion_order_before_full() {
        let mut ring = RingBuffer::new(4);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.iter().rev().next(), Some(&5));
    }

    #[test]
    fn test_clear_resets_write_position() {
        let mut ring = RingBuffer::new(2);
        ring.push('a');
        ring.push('b');
        ring.push('c');
        ring.clear();
        assert!(ring.is_empty());
        ring.push('d');
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec!['d']);
    }
}
