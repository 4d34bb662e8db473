//! Fire-and-forget publishing with per-command retry.
//!
//! Every enqueued command gets its own background task: encode, publish,
//! and on failure retry on a fixed delay, up to the attempt limit. Tasks
//! are independent, so one command stuck in retries never delays the
//! next one; the stream may reorder and consumers must cope. The local
//! tree has already committed by the time a command is enqueued, and no
//! outcome here ever rolls it back.
//!
//! Completion is observable: each task reports a `PublishOutcome` on a
//! broadcast channel, which is how both tests and operators see
//! exhausted retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::replicate::bus::MessageBus;
use crate::replicate::command::{Command, Verb};

pub const RETRY_ATTEMPTS: u32 = 20;
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Terminal state of one command's publish task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    Delivered,
    /// Every attempt failed; the message is lost unless an operator
    /// replays it. Carries the last transport error.
    GaveUp(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// Enqueue sequence number, unique per publisher.
    pub id: u64,
    pub verb: Verb,
    pub source: String,
    pub attempts: u32,
    pub status: PublishStatus,
}

pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    delay: Duration,
    max_attempts: u32,
    outcomes: broadcast::Sender<PublishOutcome>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    seq: AtomicU64,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        let (outcomes, _) = broadcast::channel(256);
        Self {
            bus,
            topic: topic.into(),
            delay: RETRY_DELAY,
            max_attempts: RETRY_ATTEMPTS,
            outcomes,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Override the retry schedule; tests shrink it, config may too.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.delay = delay;
        self
    }

    /// Watch the terminal outcome of every enqueued command.
    pub fn outcomes(&self) -> broadcast::Receiver<PublishOutcome> {
        self.outcomes.subscribe()
    }

    /// Number of publish tasks still running or retrying.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Hand a command to its own retrying background task and return
    /// immediately. The returned id matches the eventual outcome.
    pub fn enqueue(&self, cmd: Command) -> u64 {
        let id = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let bus = Arc::clone(&self.bus);
        let topic = self.topic.clone();
        let delay = self.delay;
        let max_attempts = self.max_attempts;
        let outcomes = self.outcomes.clone();
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let mut outcome = PublishOutcome {
                id,
                verb: cmd.verb,
                source: cmd.source.clone(),
                attempts: 0,
                status: PublishStatus::Delivered,
            };
            let payload = match cmd.encode() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("publish {id} ({} {}): encode failed: {err}", cmd.verb, cmd.source);
                    outcome.status = PublishStatus::GaveUp(err.to_string());
                    let _ = outcomes.send(outcome);
                    return;
                }
            };

            for attempt in 1..=max_attempts {
                outcome.attempts = attempt;
                match bus.publish(&topic, payload.clone()).await {
                    Ok(()) => {
                        debug!(
                            "publish {id} ({} {}): delivered after {attempt} attempt(s)",
                            cmd.verb, cmd.source
                        );
                        let _ = outcomes.send(outcome);
                        return;
                    }
                    Err(err) if attempt == max_attempts => {
                        warn!(
                            "publish {id} ({} {}): giving up after {attempt} attempts: {err}",
                            cmd.verb, cmd.source
                        );
                        outcome.status = PublishStatus::GaveUp(err.to_string());
                        let _ = outcomes.send(outcome);
                        return;
                    }
                    Err(err) => {
                        warn!(
                            "publish {id} ({} {}): attempt {attempt} failed, retrying in {:?}: {err}",
                            cmd.verb, cmd.source, delay
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                outcome.status = PublishStatus::Cancelled;
                                let _ = outcomes.send(outcome);
                                return;
                            }
                        }
                    }
                }
            }
        });
        id
    }

    /// Wait for every in-flight publish to reach a terminal state.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Abort retries in progress and wait for the tasks to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FsError, Result};
    use crate::identity::{Identity, Role};
    use crate::replicate::bus::InProcessBus;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    /// Fails the first `failures` publishes, then delegates.
    struct FlakyBus {
        inner: InProcessBus,
        failures: AtomicU32,
    }

    impl FlakyBus {
        fn new(failures: u32) -> Self {
            Self { inner: InProcessBus::new(), failures: AtomicU32::new(failures) }
        }
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(FsError::Remote("broker unavailable".into()));
            }
            self.inner.publish(topic, payload).await
        }

        fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
            self.inner.subscribe(topic)
        }
    }

    fn who() -> Identity {
        Identity::offline(1, 1, Role::Normal)
    }

    #[tokio::test]
    async fn delivers_after_transient_failures() {
        let bus = Arc::new(FlakyBus::new(3));
        let mut rx = bus.subscribe("cmd");
        let publisher = Publisher::new(bus, "cmd").with_retry(10, Duration::from_millis(5));
        let mut outcomes = publisher.outcomes();

        let id = publisher.enqueue(Command::mkdir("/d".into(), 0o700, &who()));
        let outcome = timeout(Duration::from_secs(5), outcomes.recv()).await.unwrap().unwrap();
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.status, PublishStatus::Delivered);
        assert_eq!(outcome.attempts, 4);

        let bytes = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(Command::decode(&bytes).unwrap().verb, Verb::Mkdir);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_limit() {
        let bus = Arc::new(FlakyBus::new(u32::MAX));
        let publisher = Publisher::new(bus, "cmd").with_retry(3, Duration::from_millis(1));
        let mut outcomes = publisher.outcomes();

        publisher.enqueue(Command::remove("/f".into(), &who()));
        let outcome = timeout(Duration::from_secs(5), outcomes.recv()).await.unwrap().unwrap();
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.status, PublishStatus::GaveUp(_)));
        publisher.drain().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_retries_immediately() {
        let bus = Arc::new(FlakyBus::new(u32::MAX));
        // A delay long enough that only cancellation can finish the test.
        let publisher = Publisher::new(bus, "cmd").with_retry(20, Duration::from_secs(60));
        let mut outcomes = publisher.outcomes();

        publisher.enqueue(Command::touch("/f".into(), 0o644, &who()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        timeout(Duration::from_secs(5), publisher.shutdown()).await.unwrap();

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.status, PublishStatus::Cancelled);
        assert_eq!(publisher.in_flight(), 0);
    }

    /// Fails publishes touching one path while the counter lasts;
    /// everything else goes straight through.
    struct StickyPathBus {
        inner: InProcessBus,
        path: String,
        failures: AtomicU32,
    }

    #[async_trait]
    impl MessageBus for StickyPathBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            let targeted =
                Command::decode(&payload).map(|c| c.source == self.path).unwrap_or(false);
            if targeted {
                let left = self.failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures.store(left - 1, Ordering::SeqCst);
                    return Err(FsError::Remote("broker unavailable".into()));
                }
            }
            self.inner.publish(topic, payload).await
        }

        fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
            self.inner.subscribe(topic)
        }
    }

    #[tokio::test]
    async fn a_stuck_command_does_not_block_the_next() {
        let bus = Arc::new(StickyPathBus {
            inner: InProcessBus::new(),
            path: "/slow".into(),
            failures: AtomicU32::new(2),
        });
        let mut rx = bus.subscribe("cmd");
        let publisher = Publisher::new(bus, "cmd").with_retry(20, Duration::from_millis(50));

        // The first command sits in retries while the second sails
        // through, so arrival order flips.
        publisher.enqueue(Command::mkdir("/slow".into(), 0o700, &who()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        publisher.enqueue(Command::mkdir("/fast".into(), 0o700, &who()));

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(Command::decode(&first).unwrap().source, "/fast");
        assert_eq!(Command::decode(&second).unwrap().source, "/slow");
    }
}
