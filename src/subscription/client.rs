//! Polling catch-up subscription over the global log.
//!
//! A [`PollingClient`] owns one subscriber and drives it from a spawned
//! task: page through `read_all` from the checkpoint, sleep when the log
//! is drained, repeat. The checkpoint only advances past a chunk the
//! subscriber accepted, so a refused chunk is redelivered on the next
//! tick and delivery is effectively at-least-once per process.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::store::{Chunk, ChunkStore, Position, StoreError, StoreResult, Subscriber};

use super::errors::{SubscriptionError, SubscriptionResult};

/// Tuning for a [`PollingClient`].
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Idle wait between polls once the log is drained.
    pub poll_interval: Duration,
    /// Chunks fetched per poll. A full page triggers an immediate next
    /// poll instead of an idle wait.
    pub page_size: usize,
    /// Deliver chunks with positions strictly greater than this.
    pub from_position: Position,
    /// Adds a random fraction of the interval to each idle wait so many
    /// clients over one store spread their polls out.
    pub jitter: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            page_size: 512,
            from_position: 0,
            jitter: false,
        }
    }
}

/// Wraps the subscriber for one page: advances the checkpoint after each
/// accepted chunk, suppresses the per-page lifecycle hooks.
struct Checkpoint<'a> {
    target: &'a mut dyn Subscriber,
    position_tx: &'a watch::Sender<Position>,
    position: &'a mut Position,
    delivered: usize,
    paused: bool,
    notified: bool,
}

#[async_trait]
impl Subscriber for Checkpoint<'_> {
    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool> {
        let at = chunk.position;
        let keep_going = self.target.on_next(chunk).await?;
        if keep_going {
            *self.position = at;
            self.position_tx.send_replace(at);
            self.delivered += 1;
        } else {
            self.paused = true;
        }
        Ok(keep_going)
    }

    async fn on_error(&mut self, position: i64, error: &StoreError) {
        self.notified = true;
        self.target.on_error(position, error).await
    }
}

/// The polling task's working state. Exactly one owner at a time: the
/// spawned loop while running, the client's slot while stopped.
struct Poller {
    store: Arc<dyn ChunkStore>,
    subscriber: Box<dyn Subscriber>,
    position: Position,
    position_tx: watch::Sender<Position>,
    page_size: usize,
}

struct PollOutcome {
    delivered: usize,
    paused: bool,
}

struct PollFailure {
    error: StoreError,
    /// The scan already routed this failure through the subscriber's
    /// `on_error`, so the loop must not notify it again.
    notified: bool,
}

impl Poller {
    async fn poll_once(&mut self, token: &CancellationToken) -> Result<PollOutcome, PollFailure> {
        let from = self.position + 1;
        let mut checkpoint = Checkpoint {
            target: self.subscriber.as_mut(),
            position_tx: &self.position_tx,
            position: &mut self.position,
            delivered: 0,
            paused: false,
            notified: false,
        };
        match self
            .store
            .read_all(from, Some(self.page_size), &mut checkpoint, token)
            .await
        {
            Ok(()) => Ok(PollOutcome {
                delivered: checkpoint.delivered,
                paused: checkpoint.paused,
            }),
            Err(error) => Err(PollFailure {
                error,
                notified: checkpoint.notified,
            }),
        }
    }
}

async fn idle_wait(config: &PollingConfig, token: &CancellationToken) {
    let mut wait = config.poll_interval;
    if config.jitter {
        wait += config.poll_interval.mul_f64(rand::random::<f64>() * 0.25);
    }
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(wait) => {}
    }
}

async fn run_loop(
    mut poller: Poller,
    config: PollingConfig,
    token: CancellationToken,
    last_error: Arc<Mutex<Option<String>>>,
) -> Poller {
    debug!(from = poller.position, "Subscription loop started");
    loop {
        if token.is_cancelled() {
            break;
        }
        match poller.poll_once(&token).await {
            Ok(outcome) => {
                if let Ok(mut slot) = last_error.lock() {
                    *slot = None;
                }
                // A full page means the log likely has more waiting.
                if outcome.delivered == poller.page_size && !outcome.paused {
                    continue;
                }
                idle_wait(&config, &token).await;
            }
            Err(PollFailure {
                error: StoreError::Cancelled,
                ..
            }) => break,
            Err(PollFailure { error, notified }) => {
                error!(error = %error, position = poller.position, "Poll failed");
                if !notified {
                    poller.subscriber.on_error(poller.position, &error).await;
                }
                if let Ok(mut slot) = last_error.lock() {
                    *slot = Some(error.to_string());
                }
                idle_wait(&config, &token).await;
            }
        }
    }
    debug!(at = poller.position, "Subscription loop stopped");
    poller
}

struct ClientState {
    poller: Option<Poller>,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<Poller>>,
}

/// Catch-up subscription client.
///
/// `start` and `stop` are idempotent; the checkpoint survives a
/// stop/start cycle, so a restarted client resumes where it left off.
pub struct PollingClient {
    store: Arc<dyn ChunkStore>,
    config: PollingConfig,
    position_rx: watch::Receiver<Position>,
    state: Mutex<ClientState>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl PollingClient {
    pub fn new<S>(store: Arc<dyn ChunkStore>, subscriber: S, config: PollingConfig) -> Self
    where
        S: Subscriber + 'static,
    {
        let (position_tx, position_rx) = watch::channel(config.from_position);
        let poller = Poller {
            store: Arc::clone(&store),
            subscriber: Box::new(subscriber),
            position: config.from_position,
            position_tx,
            page_size: config.page_size.max(1),
        };
        Self {
            store,
            config,
            position_rx,
            state: Mutex::new(ClientState {
                poller: Some(poller),
                token: None,
                handle: None,
            }),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    fn lock_state(&self) -> SubscriptionResult<MutexGuard<'_, ClientState>> {
        self.state
            .lock()
            .map_err(|_| SubscriptionError::Internal("Client state lock poisoned".to_string()))
    }

    /// Spawn the polling task. A no-op when already running. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> SubscriptionResult<()> {
        let mut state = self.lock_state()?;
        if state.handle.is_some() {
            return Ok(());
        }
        let Some(poller) = state.poller.take() else {
            return Err(SubscriptionError::Stopping);
        };
        let token = CancellationToken::new();
        state.handle = Some(tokio::spawn(run_loop(
            poller,
            self.config.clone(),
            token.clone(),
            Arc::clone(&self.last_error),
        )));
        state.token = Some(token);
        Ok(())
    }

    /// Cancel the polling task and wait for it to hand the poller back.
    /// A no-op when not running.
    pub async fn stop(&self) -> SubscriptionResult<()> {
        let (token, handle) = {
            let mut state = self.lock_state()?;
            match (state.token.take(), state.handle.take()) {
                (Some(token), Some(handle)) => (token, handle),
                _ => return Ok(()),
            }
        };
        token.cancel();
        let poller = handle.await.map_err(|_| SubscriptionError::LoopFailed)?;
        self.lock_state()?.poller = Some(poller);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.handle.is_some())
            .unwrap_or(false)
    }

    /// Position of the last chunk the subscriber accepted.
    pub fn position(&self) -> Position {
        *self.position_rx.borrow()
    }

    /// Message of the most recent poll failure; cleared by the next
    /// successful poll.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|slot| slot.clone())
    }

    /// Wait until the subscriber has accepted everything the store held
    /// when the call was made. Returns the checkpoint reached.
    pub async fn catch_up(&self, timeout: Duration) -> SubscriptionResult<Position> {
        if !self.is_running() {
            return Err(SubscriptionError::NotRunning);
        }
        let target = self.store.read_last_position().await?;
        let mut rx = self.position_rx.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let position = *rx.borrow_and_update();
            if position >= target {
                return Ok(position);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(SubscriptionError::LoopFailed),
                Err(_) => return Err(SubscriptionError::CatchUpTimeout { position, target }),
            }
        }
    }
}
