//! Bounded completion channel
//!
//! Carries completed events from the correlator to the consumer task. This
//! is the one place in the pipeline where backpressure may surface, and
//! only as a drop or a bounded wait.

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{error::CorrelationError, stats::Counter, types::CompletedEvent};

/// What `publish` does when the channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Drop the event immediately
    #[default]
    Drop,
    /// Wait up to the given time for room, then drop
    Wait(Duration),
}

impl FromStr for Backpressure {
    type Err = String;

    /// Accepts `drop` or `wait:<millis>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower == "drop" {
            return Ok(Backpressure::Drop);
        }
        match lower.strip_prefix("wait:").map(str::parse::<u64>) {
            Some(Ok(ms)) if ms > 0 => Ok(Backpressure::Wait(Duration::from_millis(ms))),
            _ => Err(format!(
                "unknown backpressure policy: {}. Use drop or wait:<millis>",
                s
            )),
        }
    }
}

impl fmt::Display for Backpressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backpressure::Drop => f.write_str("drop"),
            Backpressure::Wait(timeout) => write!(f, "wait:{}", timeout.as_millis()),
        }
    }
}

/// Multi-producer, multi-consumer channel of completed events
#[derive(Debug)]
pub struct CompletionChannel {
    sender: Sender<CompletedEvent>,
    receiver: Receiver<CompletedEvent>,
    policy: Backpressure,
    published: Counter,
    dropped: Counter,
}

impl CompletionChannel {
    /// Create a channel holding at most `capacity` undrained events
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, policy: Backpressure) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            policy,
            published: Counter::default(),
            dropped: Counter::default(),
        }
    }

    /// Enqueue a completed event according to the backpressure policy
    pub fn publish(&self, event: CompletedEvent) -> Result<(), CorrelationError> {
        // The channel owns its receiver, so a send can only fail on a full buffer
        let accepted = match self.policy {
            Backpressure::Drop => match self.sender.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            },
            Backpressure::Wait(timeout) => match self.sender.send_timeout(event, timeout) {
                Ok(()) => true,
                Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                    false
                }
            },
        };

        if accepted {
            self.published.incr();
            Ok(())
        } else {
            self.dropped.incr();
            Err(CorrelationError::ChannelSaturated(event.context_key))
        }
    }

    /// Lazily take the events queued at the time of the call
    ///
    /// The iterator ends after at most that many events even if producers
    /// keep publishing, and yields nothing once the channel is empty.
    pub fn drain(&self) -> impl Iterator<Item = CompletedEvent> + '_ {
        let queued = self.receiver.len();
        self.receiver.try_iter().take(queued)
    }

    /// Number of undrained events
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum undrained events
    pub fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(0)
    }

    /// Backpressure policy fixed at construction
    pub fn policy(&self) -> Backpressure {
        self.policy
    }

    /// Events accepted since creation
    pub fn published(&self) -> u64 {
        self.published.get()
    }

    /// Events dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: u32, latency_ns: u64) -> CompletedEvent {
        CompletedEvent {
            timestamp_ns: 1_000 + latency_ns,
            latency_ns,
            context_key: key,
        }
    }

    #[test]
    fn test_drop_when_full() {
        let channel = CompletionChannel::new(1, Backpressure::Drop);
        let a = event(1, 10);
        let b = event(2, 20);

        assert_eq!(channel.publish(a), Ok(()));
        assert_eq!(channel.publish(b), Err(CorrelationError::ChannelSaturated(2)));
        assert_eq!(channel.dropped(), 1);

        let drained: Vec<_> = channel.drain().collect();
        assert_eq!(drained, vec![a]);
    }

    #[test]
    fn test_drain_twice_is_empty() {
        let channel = CompletionChannel::new(8, Backpressure::Drop);
        for i in 0..5 {
            channel.publish(event(i, u64::from(i))).unwrap();
        }

        assert_eq!(channel.drain().count(), 5);
        assert_eq!(channel.drain().count(), 0);
        assert_eq!(channel.published(), 5);
    }

    #[test]
    fn test_drain_is_lazy_and_restartable() {
        let channel = CompletionChannel::new(8, Backpressure::Drop);
        for i in 0..4 {
            channel.publish(event(i, 1)).unwrap();
        }

        let first: Vec<_> = channel.drain().take(1).collect();
        assert_eq!(first[0].context_key, 0);
        assert_eq!(channel.len(), 3);

        let rest: Vec<u32> = channel.drain().map(|e| e.context_key).collect();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[test]
    fn test_drain_is_bounded_by_snapshot() {
        let channel = CompletionChannel::new(8, Backpressure::Drop);
        channel.publish(event(1, 1)).unwrap();
        channel.publish(event(2, 1)).unwrap();

        let mut seen = 0;
        for _ in channel.drain() {
            // Publishing while draining must not extend this pass
            let _ = channel.publish(event(99, 1));
            seen += 1;
        }

        assert_eq!(seen, 2);
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn test_bounded_wait_then_drop() {
        let channel = CompletionChannel::new(1, Backpressure::Wait(Duration::from_millis(5)));
        channel.publish(event(1, 1)).unwrap();

        assert_eq!(
            channel.publish(event(2, 1)),
            Err(CorrelationError::ChannelSaturated(2))
        );
        assert_eq!(channel.dropped(), 1);
    }

    #[test]
    fn test_bounded_wait_succeeds_when_drained() {
        use std::sync::Arc;
        use std::thread;

        let channel = Arc::new(CompletionChannel::new(
            1,
            Backpressure::Wait(Duration::from_secs(5)),
        ));
        channel.publish(event(1, 1)).unwrap();

        let consumer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                channel.drain().count()
            })
        };

        assert_eq!(channel.publish(event(2, 1)), Ok(()));
        assert_eq!(consumer.join().unwrap(), 1);
        assert_eq!(channel.drain().map(|e| e.context_key).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_backpressure_parsing() {
        assert_eq!("drop".parse::<Backpressure>(), Ok(Backpressure::Drop));
        assert_eq!(
            "wait:250".parse::<Backpressure>(),
            Ok(Backpressure::Wait(Duration::from_millis(250)))
        );
        assert!("wait:0".parse::<Backpressure>().is_err());
        assert!("block".parse::<Backpressure>().is_err());
        assert_eq!(Backpressure::Wait(Duration::from_millis(40)).to_string(), "wait:40");
    }
}
