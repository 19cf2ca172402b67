//! Update scheduling for sensors sharing one radio.
//!
//! The [`Scheduler`] runs as a single task that owns the [`SensorReader`], so
//! at most one read is ever in flight. Other tasks talk to it through a
//! [`SchedulerHandle`]. Each drain tick pops the earliest due entry from the
//! [`RetryQueue`] and reads that sensor; failures go back into the queue with
//! a backoff delay.
//!
//! A read that never returns stalls every other sensor until shutdown. The
//! radio can only serve one session, so there is nothing else to do with it.

mod queue;

pub use queue::{QueueEntry, RetryQueue};

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::backoff::BackoffPolicy;
use crate::ble::SensorReader;
use crate::sensor::Sensor;
use crate::shutdown::stopped;
use crate::store::SensorStore;

const COMMAND_BUFFER: usize = 32;

#[derive(Debug)]
pub enum Command {
    /// Queue every registered sensor for an immediate update.
    RefreshAll,
    ScheduleNow(Sensor),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    Stopped,
}

/// Cloneable sender side of the scheduler's command channel.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    pub async fn refresh_all(&self) -> Result<(), SchedulerError> {
        self.send(Command::RefreshAll).await
    }

    pub async fn schedule_now(&self, sensor: Sensor) -> Result<(), SchedulerError> {
        self.send(Command::ScheduleNow(sensor)).await
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }
}

/// Asks the scheduler to refresh every sensor once per `interval`, starting
/// right away. Stops on shutdown or when the scheduler is gone.
pub async fn refresh_loop(
    handle: SchedulerHandle,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // first tick is immediate so sensors are read right after startup
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                debug!("updating all sensors");
                if let Err(e) = handle.refresh_all().await {
                    warn!(error = %e, "stopping refresh loop");
                    break;
                }
            }
        }
    }
    debug!("refresh loop stopped");
}

/// Result of one update attempt.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Updated,
    Failed { retry_in: Duration },
    /// The sensor disappeared from the store while it was being read.
    Dropped,
}

pub struct Scheduler<R> {
    reader: R,
    store: SensorStore,
    policy: BackoffPolicy,
    queue: RetryQueue,
    drain_interval: Duration,
    span: Span,
}

impl<R: SensorReader> Scheduler<R> {
    pub fn new(
        reader: R,
        store: SensorStore,
        policy: BackoffPolicy,
        drain_interval: Duration,
        span: Span,
    ) -> Scheduler<R> {
        Scheduler {
            reader,
            store,
            policy,
            queue: RetryQueue::new(),
            drain_interval,
            span,
        }
    }

    #[cfg(test)]
    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Moves the scheduler onto its own task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (JoinHandle<()>, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let span = self.span.clone();

        let handle = tokio::spawn(self.run(rx, shutdown).instrument(span));

        (handle, SchedulerHandle { commands: tx })
    }

    /// Runs until `shutdown` turns true or every handle is dropped. Pending
    /// entries are discarded on exit and an in-flight read is aborted.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("scheduler ready");
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, Instant::now()).await,
                    None => {
                        warn!("all scheduler handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown) => {
                            info!("shutdown during sensor update, aborting it");
                            break;
                        }
                        _ = self.drain_once(Instant::now()) => {}
                    }
                }
            }
        }

        debug!(discarded = self.queue.len(), "shutting down scheduler");
        self.queue.clear();
    }

    async fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::RefreshAll => self.refresh_all(now).await,
            Command::ScheduleNow(sensor) => self.schedule_now(sensor, now).await,
        }
    }

    /// Queues `sensor` for an update at `now`, replacing any pending retry.
    /// Sensors missing from the store are ignored.
    pub async fn schedule_now(&mut self, sensor: Sensor, now: Instant) {
        if self.store.contains(&sensor.address).await {
            self.queue.schedule_now(sensor, now);
        } else {
            warn!(%sensor, "ignoring update request for unregistered sensor");
        }
    }

    pub async fn refresh_all(&mut self, now: Instant) {
        let sensors = self.store.sensors().await;
        debug!(count = sensors.len(), "scheduling update of all sensors");

        for sensor in sensors {
            self.queue.schedule_now(sensor, now);
        }
    }

    /// Performs at most one update attempt: the earliest entry, if it is due.
    pub async fn drain_once(&mut self, now: Instant) -> Option<(Sensor, Outcome)> {
        if self.queue.is_empty() {
            return None;
        }
        debug!(length = self.queue.len(), "checking queue");

        let entry = match self.queue.pop_due(now) {
            Some(entry) => entry,
            None => {
                if let Some(next) = self.queue.peek() {
                    debug!(sensor = %next.sensor, wait = ?next.due.saturating_duration_since(now), "sensor not due yet");
                }
                return None;
            }
        };

        let outcome = self.update(&entry, now).await;
        Some((entry.sensor, outcome))
    }

    async fn update(&mut self, entry: &QueueEntry, now: Instant) -> Outcome {
        let sensor = &entry.sensor;
        let started = Instant::now();

        debug!(%sensor, "reading sensor");
        let result = self.reader.read(&sensor.address).await;
        debug!(%sensor, took = ?started.elapsed(), "sensor read finished");

        match result {
            Ok(reading) => match self.store.set_latest(&sensor.address, reading).await {
                Ok(()) => Outcome::Updated,
                Err(e) => {
                    error!(%sensor, error = %e, "can not store reading");
                    Outcome::Dropped
                }
            },
            Err(e) => {
                let retry_in = self
                    .queue
                    .schedule_retry(sensor.clone(), entry.last_retry, now, &self.policy);
                error!(%sensor, error = %e, ?retry_in, "error updating sensor");
                Outcome::Failed { retry_in }
            }
        }
    }
}
