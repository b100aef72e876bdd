/// The watch loop: poll `lastactive()`, evaluate expiry, notify once, stop.
///
/// Time is injected through [`Clock`] and [`Sleeper`] so the loop can be driven
/// deterministically in tests. A `watch` channel carries the stop signal.
use crate::chain::ChainReader;
use crate::config::Settings;
use crate::expiry;
use crate::notify::{NotificationMessage, NotificationSink};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Wall-clock source in whole seconds since the epoch.
pub trait Clock {
    fn now(&self) -> Result<i64, FatalError>;
}

/// Waits between polls.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The real system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<i64, FatalError> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| FatalError::Clock {
                detail: e.to_string(),
            })?;
        i64::try_from(since_epoch.as_secs()).map_err(|e| FatalError::Clock {
            detail: e.to_string(),
        })
    }
}

/// Sleeps on the tokio timer.
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Unexpected failure inside the loop. The loop aborts without notifying.
#[derive(Debug)]
pub enum FatalError {
    /// The system clock could not be read as seconds since the epoch.
    Clock { detail: String },
    /// The watch task panicked.
    Panicked { detail: String },
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::Clock { detail } => write!(f, "system clock unusable: {}", detail),
            FatalError::Panicked { detail } => write!(f, "watch loop panicked: {}", detail),
        }
    }
}

impl std::error::Error for FatalError {}

/// How a watch that returned normally ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Expiry was observed and the single send attempt was made.
    Notified { delivered: bool },
    /// A stop signal arrived before expiry was observed.
    Stopped,
}

/// The loop's only mutable state. Never shared outside [`WatchLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchState {
    pub timeout_secs: i64,
    pub running: bool,
    pub notified: bool,
}

impl WatchState {
    fn new(timeout_secs: i64) -> Self {
        Self {
            timeout_secs,
            running: true,
            notified: false,
        }
    }
}

/// One `lastactive()` observation.
#[derive(Debug, Clone, Copy)]
struct PollResult {
    last_active: i64,
    observed_at: i64,
}

pub struct WatchLoop<'a, R, N, C, Z> {
    settings: &'a Settings,
    reader: R,
    sink: N,
    clock: C,
    sleeper: Z,
    state: WatchState,
}

impl<'a, R, N> WatchLoop<'a, R, N, SystemClock, TokioSleeper>
where
    R: ChainReader,
    N: NotificationSink,
{
    /// A loop on real time.
    pub fn new(settings: &'a Settings, reader: R, sink: N) -> Self {
        Self::with_time(settings, reader, sink, SystemClock, TokioSleeper)
    }
}

impl<'a, R, N, C, Z> WatchLoop<'a, R, N, C, Z>
where
    R: ChainReader,
    N: NotificationSink,
    C: Clock,
    Z: Sleeper,
{
    pub fn with_time(settings: &'a Settings, reader: R, sink: N, clock: C, sleeper: Z) -> Self {
        Self {
            settings,
            reader,
            sink,
            clock,
            sleeper,
            state: WatchState::new(settings.timeout_secs),
        }
    }

    #[cfg(test)]
    fn state(&self) -> &WatchState {
        &self.state
    }

    /// Run until expiry is observed and notified, or `stop` becomes `true`.
    ///
    /// Read errors never end the loop. A closed stop channel is treated as
    /// "never stop".
    pub async fn run(
        &mut self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<WatchOutcome, FatalError> {
        let mut poll: u64 = 0;
        while self.state.running {
            poll += 1;
            if let Some(outcome) = self.poll_once(poll).await? {
                return Ok(outcome);
            }

            let interval = self.settings.poll_interval;
            tokio::select! {
                biased;
                stopped = async { stop.wait_for(|stopped| *stopped).await.is_ok() } => {
                    if stopped {
                        tracing::info!(poll, "stop requested, watch loop exiting before expiry");
                        self.state.running = false;
                        return Ok(WatchOutcome::Stopped);
                    }
                    self.sleeper.sleep(interval).await;
                }
                _ = self.sleeper.sleep(interval) => {}
            }
        }
        Ok(WatchOutcome::Stopped)
    }

    /// One tick. Returns `Some` once the watch has terminated.
    async fn poll_once(&mut self, poll: u64) -> Result<Option<WatchOutcome>, FatalError> {
        let raw = match self.reader.fetch_last_active().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(poll, error = %e, "error reading contract, will retry next poll");
                return Ok(None);
            }
        };
        let Ok(last_active) = i64::try_from(raw) else {
            tracing::warn!(
                poll,
                last_active = raw,
                "last-active value out of range, skipping poll"
            );
            return Ok(None);
        };

        let result = PollResult {
            last_active,
            observed_at: self.clock.now()?,
        };
        let expiry =
            expiry::evaluate(result.last_active, self.state.timeout_secs, result.observed_at);
        tracing::info!(
            poll,
            last_active = result.last_active,
            remaining_secs = expiry.remaining,
            deadline = expiry.deadline(),
            "contract status"
        );

        if !expiry.expired {
            return Ok(None);
        }

        tracing::warn!(
            deadline = expiry.deadline(),
            observed_at = result.observed_at,
            "timer expired, sending notification"
        );
        let message = NotificationMessage::expired(
            &self.settings.contract_address,
            result.last_active,
            expiry.deadline(),
        );
        let delivered = match self.sink.send(&message).await {
            Ok(()) => {
                tracing::info!(to = %self.settings.beneficiary, "notification sent");
                true
            }
            Err(e) => {
                tracing::error!(
                    to = %self.settings.beneficiary,
                    error = %e,
                    "failed to send notification"
                );
                false
            }
        };

        self.state.notified = true;
        self.state.running = false;
        tracing::info!(delivered, notified = self.state.notified, "watch complete, exiting");
        Ok(Some(WatchOutcome::Notified { delivered }))
    }
}
