use std::collections::VecDeque;

/// Bounded FIFO. A full queue rejects new entries and never overwrites.
#[derive(Debug)]
pub struct MessageQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> MessageQueue<T> {
        MessageQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item. Returns the item back if the queue is full.
    pub fn put(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn get(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

#[cfg(test)]
mod test {
    use super::MessageQueue;

    #[test]
    fn full_queue_rejects_new() {
        let mut q = MessageQueue::new(2);
        assert_eq!(q.put(1), Ok(()));
        assert_eq!(q.put(2), Ok(()));
        assert!(q.is_full());
        assert_eq!(q.put(3), Err(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.get(), Some(1));
        assert_eq!(q.put(4), Ok(()));
        assert_eq!(q.get(), Some(2));
        assert_eq!(q.get(), Some(4));
        assert_eq!(q.get(), None);
    }
}
