//! Hand-off of decoded batches from the network thread to the processing loop.
//!
//! A bounded single-producer single-consumer ring. The network side never
//! blocks on it: a full queue drops the incoming batch. The processing side
//! polls, and learns the producer is done when the sending half is dropped.

use rtrb::{PopError, PushError, RingBuffer};
use tracing::warn;

use crate::QUEUE_CAPACITY;

/// One named, fully received file worth of raw ADC counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    pub name: String,
    pub interval_ms: u64,
    pub samples: Vec<i64>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Network half of the queue
pub struct BatchSender {
    producer: rtrb::Producer<SampleBatch>,
    capacity: usize,
}

/// Processing half of the queue
pub struct BatchReceiver {
    consumer: rtrb::Consumer<SampleBatch>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue {
    Batch(SampleBatch),
    /// Nothing queued right now, more may come
    Empty,
    /// Nothing queued and the sender is gone
    Finished,
}

/// Create a queue holding at most `capacity` batches
pub fn batch_queue(capacity: usize) -> (BatchSender, BatchReceiver) {
    let capacity = capacity.max(1);
    let (producer, consumer) = RingBuffer::new(capacity);
    (BatchSender { producer, capacity }, BatchReceiver { consumer })
}

/// Queue with the default capacity of 10
pub fn default_batch_queue() -> (BatchSender, BatchReceiver) {
    batch_queue(QUEUE_CAPACITY)
}

impl BatchSender {
    /// Returns false, dropping `batch`, when the queue is full
    pub fn try_enqueue(&mut self, batch: SampleBatch) -> bool {
        match self.producer.push(batch) {
            Ok(()) => true,
            Err(PushError::Full(batch)) => {
                warn!(
                    name = %batch.name,
                    samples = batch.len(),
                    "Batch queue full, dropping batch"
                );
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.capacity - self.producer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl BatchReceiver {
    /// Non-blocking, strictly FIFO
    pub fn dequeue(&mut self) -> Dequeue {
        match self.consumer.pop() {
            Ok(batch) => Dequeue::Batch(batch),
            Err(PopError::Empty) => {
                // The sender may have pushed right before going away
                if self.consumer.is_abandoned() {
                    match self.consumer.pop() {
                        Ok(batch) => Dequeue::Batch(batch),
                        Err(PopError::Empty) => Dequeue::Finished,
                    }
                } else {
                    Dequeue::Empty
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(i: usize) -> SampleBatch {
        SampleBatch {
            name: format!("f{i}.txt"),
            interval_ms: 20,
            samples: vec![i as i64],
        }
    }

    #[test]
    fn test_full_queue_drops() {
        let (mut tx, mut rx) = default_batch_queue();
        for i in 0..QUEUE_CAPACITY {
            assert!(tx.try_enqueue(batch(i)));
        }
        assert_eq!(tx.len(), 10);
        assert!(!tx.try_enqueue(batch(99)));
        assert_eq!(tx.len(), 10);
        assert_eq!(rx.len(), 10);
        for i in 0..QUEUE_CAPACITY {
            assert_eq!(rx.dequeue(), Dequeue::Batch(batch(i)));
        }
        assert_eq!(rx.dequeue(), Dequeue::Empty);
    }

    #[test]
    fn test_finished_after_sender_dropped() {
        let (mut tx, mut rx) = batch_queue(2);
        assert!(tx.try_enqueue(batch(1)));
        drop(tx);
        assert_eq!(rx.dequeue(), Dequeue::Batch(batch(1)));
        assert_eq!(rx.dequeue(), Dequeue::Finished);
        assert_eq!(rx.dequeue(), Dequeue::Finished);
    }

    #[test]
    fn test_across_threads() {
        let (mut tx, mut rx) = batch_queue(4);
        let producer = std::thread::spawn(move || {
            let mut sent = 0;
            while sent < 50 {
                if tx.try_enqueue(batch(sent)) {
                    sent += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
        let mut next = 0;
        loop {
            match rx.dequeue() {
                Dequeue::Batch(b) => {
                    assert_eq!(b, batch(next));
                    next += 1;
                }
                Dequeue::Empty => std::thread::yield_now(),
                Dequeue::Finished => break,
            }
        }
        producer.join().unwrap();
        assert_eq!(next, 50);
    }
}
