//! Bounded message queues of fixed-size messages.
//!
//! A queue is a ring of `capacity` slots of `slot_size` bytes, guarded by
//! three semaphores: one counting the free slots, one counting the stored
//! messages and one serializing access to the ring. Senders block while the
//! queue is full and receivers while it is empty, both in FIFO order.
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::sync::semaphore::{Semaphore, SemaphoreId};
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// The handle of a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(usize);

impl From<usize> for QueueId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

impl From<QueueId> for usize {
    fn from(id: QueueId) -> usize {
        id.0
    }
}

/// A bounded ring of fixed-size messages.
#[derive(Debug)]
pub struct MessageQueue {
    /// The maximum number of messages stored at once.
    capacity: usize,

    /// The size of every message, in bytes.
    slot_size: usize,

    /// The slots of the ring, `capacity * slot_size` bytes.
    buffer: Vec<u8>,

    /// The slot of the next message to receive.
    read: usize,

    /// The slot of the next message to send.
    write: usize,

    /// Counts the free slots.
    empty_slots: SemaphoreId,

    /// Serializes access to the ring.
    mutex: SemaphoreId,

    /// Counts the stored messages.
    items: SemaphoreId,
}

impl MessageQueue {
    /// Allocate the zeroed ring of a queue of `capacity` slots of
    /// `slot_size` bytes.
    ///
    /// # Errors
    /// Returns [`Error::Exhausted`] if the size of the ring overflows or
    /// cannot be allocated.
    pub fn ring(capacity: usize, slot_size: usize) -> Result<Vec<u8>> {
        let size = capacity.checked_mul(slot_size).ok_or(Error::Exhausted)?;
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).map_err(|_| Error::Exhausted)?;
        buffer.resize(size, 0);
        Ok(buffer)
    }

    /// Build a queue over a ring allocated with [`MessageQueue::ring`].
    #[must_use]
    pub fn new(
        capacity: usize,
        slot_size: usize,
        buffer: Vec<u8>,
        [empty_slots, mutex, items]: [SemaphoreId; 3],
    ) -> Self {
        debug_assert_eq!(buffer.len(), capacity * slot_size);
        Self {
            capacity,
            slot_size,
            buffer,
            read: 0,
            write: 0,
            empty_slots,
            mutex,
            items,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// The semaphores guarding the queue: free slots, access and stored
    /// messages.
    #[must_use]
    pub const fn semaphores(&self) -> [SemaphoreId; 3] {
        [self.empty_slots, self.mutex, self.items]
    }

    fn slot(&self, index: usize) -> core::ops::Range<usize> {
        let start = index * self.slot_size;
        start..start + self.slot_size
    }

    /// Copy a message into the next free slot. The caller must own a free
    /// slot and the access semaphore, and `message` must be exactly one slot
    /// long.
    pub fn push(&mut self, message: &[u8]) {
        let slot = self.slot(self.write);
        self.buffer[slot].copy_from_slice(message);
        self.write = (self.write + 1) % self.capacity;
    }

    /// Copy the oldest message into `message`. The caller must own a stored
    /// message and the access semaphore, and `message` must be exactly one
    /// slot long.
    pub fn pop(&mut self, message: &mut [u8]) {
        let slot = self.slot(self.read);
        message.copy_from_slice(&self.buffer[slot]);
        self.read = (self.read + 1) % self.capacity;
    }
}

impl Kernel {
    /// Create a queue holding at most `capacity` messages of exactly
    /// `slot_size` bytes. A queue without capacity accepts no message: every
    /// send blocks until the queue is destroyed.
    ///
    /// # Errors
    /// Returns [`Error::Exhausted`] if the ring of the queue cannot be
    /// allocated. Nothing is created in that case.
    pub fn mqueue_create(&self, capacity: usize, slot_size: usize) -> Result<QueueId> {
        self.checkpoint();
        let buffer = MessageQueue::ring(capacity, slot_size).inspect_err(|_| {
            log::warn!("Cannot allocate a queue of {capacity} messages of {slot_size} bytes");
        })?;

        let mut scheduler = self.lock();
        let empty_slots = scheduler
            .semaphores
            .insert(Semaphore::new(i64::try_from(capacity).unwrap_or(i64::MAX)));
        let mutex = scheduler.semaphores.insert(Semaphore::new(1));
        let items = scheduler.semaphores.insert(Semaphore::new(0));

        let queue = MessageQueue::new(capacity, slot_size, buffer, [empty_slots, mutex, items]);
        let id = scheduler.queues.insert(queue);
        log::debug!(
            "Queue {} created: {capacity} messages of {slot_size} bytes",
            usize::from(id)
        );
        Ok(id)
    }

    /// The semaphores of a queue, once `len` was checked against its slot
    /// size.
    fn queue_semaphores(&self, queue: QueueId, len: usize) -> Result<[SemaphoreId; 3]> {
        let scheduler = self.lock();
        let queue = scheduler.queues.get(queue)?;
        if len != queue.slot_size() {
            return Err(Error::MessageSize);
        }
        Ok(queue.semaphores())
    }

    /// Send a message, blocking while the queue is full.
    ///
    /// # Errors
    /// Returns [`Error::MessageSize`] if `message` is not exactly one slot
    /// long, [`Error::InvalidHandle`] if the queue does not exist, and
    /// [`Error::Destroyed`] if it was destroyed, including while the caller
    /// was blocked on it.
    pub fn mqueue_send(&self, queue: QueueId, message: &[u8]) -> Result<()> {
        self.checkpoint();
        let [empty_slots, mutex, items] = self.queue_semaphores(queue, message.len())?;

        self.sem_down(empty_slots)?;
        self.sem_down(mutex)?;
        self.lock().queues.get_mut(queue)?.push(message);
        self.sem_up(mutex)?;
        self.sem_up(items)
    }

    /// Receive the oldest message into `message`, blocking while the queue
    /// is empty.
    ///
    /// # Errors
    /// Returns [`Error::MessageSize`] if `message` is not exactly one slot
    /// long, [`Error::InvalidHandle`] if the queue does not exist, and
    /// [`Error::Destroyed`] if it was destroyed, including while the caller
    /// was blocked on it.
    pub fn mqueue_recv(&self, queue: QueueId, message: &mut [u8]) -> Result<()> {
        self.checkpoint();
        let [empty_slots, mutex, items] = self.queue_semaphores(queue, message.len())?;

        self.sem_down(items)?;
        self.sem_down(mutex)?;
        self.lock().queues.get_mut(queue)?.pop(message);
        self.sem_up(mutex)?;
        self.sem_up(empty_slots)
    }

    /// Destroy a queue. Tasks blocked sending to or receiving from it are
    /// woken up and their pending call fails with [`Error::Destroyed`]. A
    /// semaphore of the queue that was already destroyed on its own is
    /// skipped.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the queue does not exist and
    /// [`Error::Destroyed`] if it was already destroyed.
    pub fn mqueue_destroy(&self, queue: QueueId) -> Result<()> {
        self.checkpoint();
        let _guard = self.disable_preemption();
        let mut scheduler = self.lock();
        let destroyed = scheduler.queues.destroy(queue)?;
        let mut woken = 0;
        for semaphore in destroyed.semaphores() {
            match scheduler.semaphore_destroy(semaphore) {
                Ok(count) => woken += count,
                Err(error) => log::debug!(
                    "Semaphore {} of queue {} skipped: {error}",
                    usize::from(semaphore),
                    usize::from(queue)
                ),
            }
        }

        log::debug!(
            "Queue {} destroyed, {woken} tasks woken up",
            usize::from(queue)
        );
        Ok(())
    }

    /// The number of messages stored in the queue.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the queue does not exist and
    /// [`Error::Destroyed`] if it was destroyed.
    pub fn mqueue_count(&self, queue: QueueId) -> Result<usize> {
        self.checkpoint();
        let scheduler = self.lock();
        let queue = scheduler.queues.get(queue)?;
        let [_, _, items] = queue.semaphores();
        let stored = scheduler.semaphores.get(items)?.counter();
        Ok(usize::try_from(stored).unwrap_or(0).min(queue.capacity()))
    }

    /// Send a plain value whose size is the slot size of the queue.
    ///
    /// # Errors
    /// Same as [`Kernel::mqueue_send`].
    pub fn send_value<T>(&self, queue: QueueId, value: &T) -> Result<()>
    where
        T: IntoBytes + Immutable,
    {
        self.mqueue_send(queue, value.as_bytes())
    }

    /// Receive a plain value whose size is the slot size of the queue.
    ///
    /// # Errors
    /// Same as [`Kernel::mqueue_recv`].
    pub fn recv_value<T>(&self, queue: QueueId) -> Result<T>
    where
        T: FromBytes + IntoBytes,
    {
        let mut value = T::new_zeroed();
        self.mqueue_recv(queue, value.as_mut_bytes())?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize, slot_size: usize) -> MessageQueue {
        let buffer = MessageQueue::ring(capacity, slot_size).unwrap();
        let semaphores = [0, 1, 2].map(SemaphoreId::from);
        MessageQueue::new(capacity, slot_size, buffer, semaphores)
    }

    #[test]
    fn test_messages_come_out_in_order() {
        let mut queue = queue(3, 4);
        queue.push(&1u32.to_ne_bytes());
        queue.push(&2u32.to_ne_bytes());

        let mut message = [0; 4];
        queue.pop(&mut message);
        assert_eq!(u32::from_ne_bytes(message), 1);
        queue.pop(&mut message);
        assert_eq!(u32::from_ne_bytes(message), 2);
    }

    #[test]
    fn test_ring_wraps_around() {
        let mut queue = queue(2, 1);
        let mut message = [0; 1];
        for value in 0..5u8 {
            queue.push(&[value]);
            queue.pop(&mut message);
            assert_eq!(message, [value]);
        }
        assert_eq!(queue.read, 1);
        assert_eq!(queue.write, 1);
    }

    #[test]
    fn test_unrepresentable_ring_is_refused() {
        assert_eq!(MessageQueue::ring(usize::MAX, 2), Err(Error::Exhausted));
        assert_eq!(MessageQueue::ring(usize::MAX / 2, 2), Err(Error::Exhausted));
        assert_eq!(MessageQueue::ring(0, 8), Ok(Vec::new()));
        assert_eq!(MessageQueue::ring(2, 3), Ok(vec![0; 6]));
    }

    #[test]
    fn test_geometry() {
        let queue = queue(3, 4);
        assert_eq!(queue.capacity(), 3);
        assert_eq!(queue.slot_size(), 4);
        assert_eq!(queue.buffer.len(), 12);
        assert_eq!(
            queue.semaphores(),
            [SemaphoreId::from(0), SemaphoreId::from(1), SemaphoreId::from(2)]
        );
    }
}
