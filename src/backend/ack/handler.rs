/**
 * Acknowledgment Tracker
 *
 * Correlates outbound group commands with the acks that come back for them.
 *
 * # Lifecycle of a correlation id
 *
 * ```text
 * create_ack(id) ──> Pending ──trigger_ack(id)──> Acknowledged (waiter: Ok)
 *                       │
 *                       └──sweep, age > timeout──> TimedOut (waiter: AckCanceled)
 * ```
 *
 * Both terminal transitions remove the entry, so a duplicate or late ack is
 * a no-op. A background task sweeps the table on a fixed interval; it is
 * stopped and joined by `shutdown`, which also cancels everything still
 * pending.
 *
 * # Thread Safety
 *
 * Pending entries live in a `DashMap`. The only lock is the `disposed` flag,
 * which orders `create_ack` and the sweep against `shutdown`.
 */

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::error::BackplaneError;
use crate::shared::config::BackplaneConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Acknowledged,
    Canceled,
}

#[derive(Debug)]
struct PendingAck {
    created: Instant,
    completion: oneshot::Sender<AckOutcome>,
}

impl PendingAck {
    fn complete(self, outcome: AckOutcome) {
        // The waiter may already be gone; nobody left to tell.
        let _ = self.completion.send(outcome);
    }
}

#[derive(Debug)]
struct AckTable {
    pending: DashMap<i64, PendingAck>,
    timeout: Duration,
    disposed: Mutex<bool>,
}

impl AckTable {
    fn sweep(&self) -> usize {
        if *self.disposed.lock() {
            return 0;
        }

        let now = Instant::now();
        let expired: Vec<i64> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.created) > self.timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut canceled = 0;
        for id in expired {
            let removed = self
                .pending
                .remove_if(&id, |_, ack| now.duration_since(ack.created) > self.timeout);
            if let Some((_, ack)) = removed {
                tracing::warn!(
                    "[Acks] Group command {} not acknowledged within {:?}, canceling",
                    id,
                    self.timeout
                );
                ack.complete(AckOutcome::Canceled);
                canceled += 1;
            }
        }
        canceled
    }

    fn cancel_all(&self) -> usize {
        let ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut canceled = 0;
        for id in ids {
            if let Some((_, ack)) = self.pending.remove(&id) {
                ack.complete(AckOutcome::Canceled);
                canceled += 1;
            }
        }
        canceled
    }
}

/// Tracks group commands waiting for an ack
///
/// Must be created inside a tokio runtime: construction spawns the sweep task.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use xfbackplane::backend::ack::AckHandler;
///
/// # async fn example() -> Result<(), xfbackplane::backend::error::BackplaneError> {
/// let acks = AckHandler::new(Duration::from_secs(30), Duration::from_secs(5));
/// let waiter = acks.create_ack(42);
/// // ... publish the group command, the ack handler calls:
/// acks.trigger_ack(42);
/// waiter.await?;
/// acks.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AckHandler {
    table: Arc<AckTable>,
    stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AckHandler {
    pub fn new(timeout: Duration, sweep_interval: Duration) -> Self {
        let table = Arc::new(AckTable {
            pending: DashMap::new(),
            timeout,
            disposed: Mutex::new(false),
        });
        let stop = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(table.clone(), sweep_interval, stop.clone()));

        Self {
            table,
            stop,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn from_config(config: &BackplaneConfig) -> Self {
        Self::new(config.ack_timeout, config.ack_sweep_interval)
    }

    /// Start waiting for the ack of command `id`
    ///
    /// The entry is registered before this returns, so an ack arriving before
    /// the waiter is first polled still resolves it. After shutdown the
    /// returned waiter is already canceled.
    pub fn create_ack(&self, id: i64) -> AckWaiter {
        let (completion, receiver) = oneshot::channel();
        let waiter = AckWaiter { id, receiver };

        let disposed = self.table.disposed.lock();
        if *disposed {
            let _ = completion.send(AckOutcome::Canceled);
            return waiter;
        }

        let pending = PendingAck {
            created: Instant::now(),
            completion,
        };
        if let Some(previous) = self.table.pending.insert(id, pending) {
            tracing::warn!("[Acks] Correlation id {} reused while pending, canceling the older wait", id);
            previous.complete(AckOutcome::Canceled);
        }
        drop(disposed);

        waiter
    }

    /// Resolve the wait for `id`; returns false if nothing was waiting
    pub fn trigger_ack(&self, id: i64) -> bool {
        match self.table.pending.remove(&id) {
            Some((_, ack)) => {
                ack.complete(AckOutcome::Acknowledged);
                true
            }
            None => {
                tracing::debug!("[Acks] Ack {} has no pending command, ignoring", id);
                false
            }
        }
    }

    /// Cancel every wait older than the timeout; returns how many were canceled
    ///
    /// The background task calls this on every tick.
    pub fn check_acks(&self) -> usize {
        self.table.sweep()
    }

    pub fn is_pending(&self, id: i64) -> bool {
        self.table.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.table.pending.len()
    }

    pub fn timeout(&self) -> Duration {
        self.table.timeout
    }

    pub fn is_shut_down(&self) -> bool {
        *self.table.disposed.lock()
    }

    /// Stop and join the sweep task, then cancel all pending waits
    pub async fn shutdown(&self) {
        let canceled = {
            let mut disposed = self.table.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
            self.stop.cancel();
            self.table.cancel_all()
        };

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!("[Acks] Sweep task ended abnormally: {:?}", e);
            }
        }

        tracing::info!("[Acks] Shut down, canceled {} pending acks", canceled);
    }
}

impl Drop for AckHandler {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_sweeper(table: Arc<AckTable>, sweep_interval: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + sweep_interval, sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let canceled = table.sweep();
                if canceled > 0 {
                    tracing::debug!("[Acks] Sweep canceled {} expired acks", canceled);
                }
            }
        }
    }
}

/// Completes when the ack for one group command arrives
///
/// Resolves to `Ok(())` on ack and to `BackplaneError::AckCanceled` on
/// timeout or shutdown.
#[derive(Debug)]
pub struct AckWaiter {
    id: i64,
    receiver: oneshot::Receiver<AckOutcome>,
}

impl AckWaiter {
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Future for AckWaiter {
    type Output = Result<(), BackplaneError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| match outcome {
            Ok(AckOutcome::Acknowledged) => Ok(()),
            Ok(AckOutcome::Canceled) | Err(_) => Err(BackplaneError::AckCanceled { id }),
        })
    }
}
