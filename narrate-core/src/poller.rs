use std::cell::Cell;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::PollError;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    /// A tick whose operation runs longer than this counts as failed.
    pub request_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&PollingConfig> for PollConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            request_timeout: config.request_timeout(),
        }
    }
}

thread_local! {
    // gate whose callback is running on this thread, 0 when none
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Serializes result delivery against cancellation.
struct DeliveryGate {
    active: AtomicBool,
    delivery: Mutex<()>,
}

struct DeliveringGuard(usize);

impl Drop for DeliveringGuard {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.0));
    }
}

impl DeliveryGate {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            delivery: Mutex::new(()),
        }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Runs `deliver` unless the gate was closed. Returns whether it ran.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let _lock = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let _restore = DeliveringGuard(DELIVERING.with(|current| current.replace(self.key())));
        deliver();
        true
    }

    /// After this returns nothing is delivered any more. From inside the
    /// callback it only marks the gate closed; the running delivery is the
    /// caller itself.
    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        if DELIVERING.with(|current| current.get()) != self.key() {
            // waits out a delivery running on another thread
            drop(self.delivery.lock().unwrap_or_else(|e| e.into_inner()));
        }
    }
}

/// Cancellation handle of a running poller.
///
/// Dropping the handle cancels the poller too.
pub struct PollerHandle {
    cancel_tx: watch::Sender<bool>,
    gate: Arc<DeliveryGate>,
    join: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stops all future ticks. Idempotent.
    ///
    /// Once this returns, no result is delivered to the subscriber, including
    /// the result of an invocation that was in flight. May be called from
    /// inside the subscriber callback.
    pub fn cancel(&self) {
        self.gate.close();
        if !self.cancel_tx.send_replace(true) {
            debug!("poller cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        !*self.cancel_tx.borrow() && self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Cancels and waits for the polling task to wind down.
    pub async fn stop(mut self) -> Result<(), PollError> {
        self.cancel();
        match self.join.take() {
            Some(join) => join.await.map_err(PollError::from),
            None => Ok(()),
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Invokes `operation` immediately and then every `config.interval`,
/// handing each successful result to `on_result`.
///
/// Invocations never overlap: a tick that comes due while the previous call
/// is still running is skipped. Failed or timed out ticks are logged and the
/// next tick runs as usual.
pub fn spawn_poller<T, E, Op, Fut, Cb>(
    mut operation: Op,
    mut on_result: Cb,
    config: PollConfig,
) -> PollerHandle
where
    T: Send + 'static,
    E: Display + Send + 'static,
    Op: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    Cb: FnMut(T) + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let gate = Arc::new(DeliveryGate::new());
    let task_gate = Arc::clone(&gate);

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    info!("poller shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    debug!("poller cancelled with a tick in flight, result dropped");
                    break;
                }
                outcome = tokio::time::timeout(config.request_timeout, operation()) => outcome,
            };

            match outcome {
                Ok(Ok(value)) => {
                    if !task_gate.deliver(|| on_result(value)) {
                        debug!("poller cancelled before delivery, result dropped");
                        break;
                    }
                }
                Ok(Err(err)) => warn!(error = %err, "poll tick failed"),
                Err(_) => warn!(
                    timeout_ms = config.request_timeout.as_millis() as u64,
                    "poll tick timed out"
                ),
            }
        }
    });

    PollerHandle {
        cancel_tx,
        gate,
        join: Some(join),
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
