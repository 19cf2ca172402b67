use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::BackoffPolicy;
use crate::sensor::Sensor;

// upper bound for due times, about 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub sensor: Sensor,
    pub due: Instant,
    pub last_retry: Duration,
    seq: u64,
}

/// Pending update attempts, at most one per sensor address.
///
/// Entries come out ordered by due time, then by the order they were
/// scheduled in.
#[derive(Default)]
pub struct RetryQueue {
    entries: HashMap<String, QueueEntry>,
    next_seq: u64,
}

impl RetryQueue {
    pub fn new() -> RetryQueue {
        RetryQueue::default()
    }

    fn insert(&mut self, sensor: Sensor, due: Instant, last_retry: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            sensor.address.clone(),
            QueueEntry {
                sensor,
                due,
                last_retry,
                seq,
            },
        );
    }

    /// Queues `sensor` at `now` with its backoff reset. A sensor that is
    /// already waiting keeps its place in line and the earlier due time.
    pub fn schedule_now(&mut self, sensor: Sensor, now: Instant) {
        match self.entries.get_mut(&sensor.address) {
            Some(entry) => {
                entry.due = entry.due.min(now);
                entry.last_retry = Duration::ZERO;
                entry.sensor = sensor;
            }
            None => self.insert(sensor, now, Duration::ZERO),
        }
    }

    /// Re-arms a failed sensor and returns the delay it will wait.
    pub fn schedule_retry(
        &mut self,
        sensor: Sensor,
        previous: Duration,
        now: Instant,
        policy: &BackoffPolicy,
    ) -> Duration {
        let delay = policy.next(previous);
        let due = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.insert(sensor, due, delay);
        delay
    }

    /// Earliest entry, whether due or not.
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.values().min_by_key(|e| (e.due, e.seq))
    }

    /// Removes and returns the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<QueueEntry> {
        let address = match self.peek() {
            Some(next) if next.due <= now => next.sensor.address.clone(),
            _ => return None,
        };
        self.entries.remove(&address)
    }

    #[cfg(test)]
    pub fn get(&self, address: &str) -> Option<&QueueEntry> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
