//! Connection sample queue
//!
//! Lock-free bounded FIFO between the connect tracepoint readers and the
//! consumer task. Pushing never blocks and never allocates; a full queue
//! drops the incoming sample.

use crossbeam::queue::ArrayQueue;

use crate::{error::CorrelationError, stats::Counter, types::ConnectionSample};

/// Bounded queue of connection-attempt samples
#[derive(Debug)]
pub struct ConnectionSampleQueue {
    samples: ArrayQueue<ConnectionSample>,
    dropped: Counter,
}

impl ConnectionSampleQueue {
    /// Create a queue holding at most `capacity` samples
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: ArrayQueue::new(capacity.max(1)),
            dropped: Counter::default(),
        }
    }

    /// Enqueue a sample, dropping it if the queue is full
    pub fn push(&self, sample: ConnectionSample) -> Result<(), CorrelationError> {
        self.samples.push(sample).map_err(|rejected| {
            self.dropped.incr();
            CorrelationError::QueueSaturated(rejected.port)
        })
    }

    /// Dequeue the oldest sample
    pub fn pop(&self) -> Option<ConnectionSample> {
        self.samples.pop()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Samples dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}
