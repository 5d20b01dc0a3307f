//! Bounded polling primitive used for artifact completion detection.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::MonitorResult;

/// Poll `check` until it returns true.
///
/// The check runs immediately and then once per `interval`. With a
/// `deadline` the loop gives up once that much time has passed (a final
/// check runs at the deadline); with `None` it polls until the check succeeds
/// or `cancel` fires.
pub async fn poll_until<F>(
    interval: Duration,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
    mut check: F,
) -> MonitorResult
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    let give_up_at = deadline.map(|d| started + d);

    loop {
        if cancel.is_cancelled() {
            return MonitorResult::Cancelled;
        }
        if check() {
            return MonitorResult::Found;
        }

        let sleep_for = match give_up_at {
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    return MonitorResult::TimedOut;
                }
                interval.min(at - now)
            }
            None => interval,
        };

        tokio::select! {
            _ = cancel.cancelled() => return MonitorResult::Cancelled,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}
