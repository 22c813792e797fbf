//! Bounded, cancellable polling
//!
//! [`wait_until`] evaluates a predicate on a fixed interval until it holds, a
//! deadline passes, or the caller's [`CancellationToken`] fires. Hitting the
//! deadline is an ordinary outcome rather than an error; callers decide what a
//! timeout means for them.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Default interval between readiness checks (5 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest interval `wait_until` will poll at
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Deadline offset used when `start + timeout` is not representable (about 30 years)
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How a wait ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate returned true
    Ready,
    /// The timeout elapsed first
    TimedOut,
    /// The cancellation token fired
    Cancelled,
}

impl WaitOutcome {
    /// True only for [`WaitOutcome::Ready`]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Poll `predicate` every `interval` until it returns true or `timeout` elapses.
///
/// The first evaluation happens one interval after the call, not immediately.
/// Intervals shorter than [`MIN_POLL_INTERVAL`] are raised to it. A timeout
/// too large to add to the current instant never expires.
/// When a tick and the deadline coincide the tick is evaluated first. A
/// predicate evaluation in flight is abandoned if `cancel` fires, but is
/// allowed to finish past the deadline.
pub async fn wait_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut predicate: F,
) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let interval = interval.max(MIN_POLL_INTERVAL);
    let start = Instant::now();
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let deadline = sleep_until(deadline);
    tokio::pin!(deadline);

    let mut ticker = interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = ticker.tick() => {
                let ready = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                    ready = predicate() => ready,
                };
                if ready {
                    return WaitOutcome::Ready;
                }
                trace!(elapsed = ?start.elapsed(), "condition not yet met");
            }
            _ = &mut deadline => {
                info!(timeout = ?timeout, "waiting time exceeded");
                return WaitOutcome::TimedOut;
            }
        }
    }
}
