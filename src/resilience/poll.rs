//! Cancellable poll-until loop.
//!
//! # States
//! ```text
//! Waiting ──check() == true──▶ Done
//!    │  ▲
//!    │  └── interval elapsed
//!    └──── token canceled ───▶ Canceled
//! ```
//!
//! The predicate runs immediately on entry, then once per interval. A
//! cancellation observed while sleeping ends the loop without another check.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Internal poll state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Waiting,
    Done,
    Canceled,
}

/// Terminal result of [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate returned true.
    Done,
    /// The token fired before the predicate became true.
    Canceled,
}

impl PollOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, PollOutcome::Done)
    }
}

/// Re-run `check` every `interval` until it returns true or `cancel` fires.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut state = PollState::Waiting;
    loop {
        state = match state {
            PollState::Waiting => {
                if check().await {
                    PollState::Done
                } else {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => PollState::Canceled,
                        _ = tokio::time::sleep(interval) => PollState::Waiting,
                    }
                }
            }
            PollState::Done => return PollOutcome::Done,
            PollState::Canceled => return PollOutcome::Canceled,
        };
    }
}

/// Re-run `attempt` every `interval` until it yields a value or `cancel`
/// fires. Each failure is logged under `what`.
pub async fn retry_until<T, E, F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    what: &'static str,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        match attempt().await {
            Ok(value) => return Some(value),
            Err(e) => tracing::warn!(what, error = %e, retry_in = ?interval, "Attempt failed"),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
