// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy and readiness poll state machine.
//
// Errors are classified into Transient (auto-retry), UserAction (report to the
// operator), and Permanent (give up). Only transient errors are retried, and
// only within the consecutive-failure budget of the policy.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use waybill_core::config::SdkConfig;
use waybill_core::error::{Result, WaybillError};
use waybill_core::types::ErrorClass;

/// Backoff and budget settings shared by polling and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a "still generating" answer.
    pub not_ready_backoff: Duration,
    /// Wait after a transport failure.
    pub transport_backoff: Duration,
    /// Consecutive transport failures tolerated before giving up.
    pub max_transport_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            not_ready_backoff: Duration::from_secs(2),
            transport_backoff: Duration::from_secs(5),
            max_transport_retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SdkConfig) -> Self {
        Self {
            not_ready_backoff: config.not_ready_backoff(),
            transport_backoff: config.transport_backoff(),
            max_transport_retries: config.max_transport_retries,
        }
    }

    /// Pure transition function of the poll state machine.
    ///
    /// `elapsed` is the time since polling started, measured before the
    /// backoff that the returned step may request.
    pub fn next_state(
        &self,
        mode: PollMode,
        state: PollState,
        outcome: AttemptOutcome,
        elapsed: Duration,
    ) -> PollStep {
        let mut progress = match state {
            PollState::NotStarted => PollProgress::default(),
            PollState::Polling(progress) => progress,
            terminal @ (PollState::Ready | PollState::Failed(_)) => {
                return PollStep::finish(terminal);
            }
        };
        progress.attempts += 1;

        match outcome {
            AttemptOutcome::Ready => PollStep::finish(PollState::Ready),
            AttemptOutcome::HardFailure => PollStep::finish(PollState::Failed(PollFailure::Hard)),
            AttemptOutcome::TransportFailure => {
                progress.consecutive_transport_failures += 1;
                if progress.consecutive_transport_failures > self.max_transport_retries {
                    return PollStep::finish(PollState::Failed(PollFailure::TransportExhausted));
                }
                match mode.cap_wait(self.transport_backoff, elapsed) {
                    Some(wait) => PollStep::retry(progress, wait),
                    None => PollStep::finish(PollState::Failed(PollFailure::TransportExhausted)),
                }
            }
            AttemptOutcome::NotReady => {
                progress.consecutive_transport_failures = 0;
                progress.not_ready_answers += 1;
                match mode {
                    PollMode::SingleShot if progress.not_ready_answers > 1 => {
                        PollStep::finish(PollState::Failed(PollFailure::NotReady))
                    }
                    _ => match mode.cap_wait(self.not_ready_backoff, elapsed) {
                        Some(wait) => PollStep::retry(progress, wait),
                        None => PollStep::finish(PollState::Failed(PollFailure::NotReady)),
                    },
                }
            }
        }
    }
}

/// How long the caller is willing to wait for a label to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// One "not ready" answer is retried once, then reported.
    #[default]
    SingleShot,
    /// Keep polling while the label is generating; `None` waits indefinitely.
    WaitUntilReady { timeout: Option<Duration> },
}

impl PollMode {
    /// `wait` shortened to the time left before the deadline, or `None` once
    /// the deadline has passed. Only a bounded wait has a deadline.
    fn cap_wait(self, wait: Duration, elapsed: Duration) -> Option<Duration> {
        match self {
            Self::WaitUntilReady {
                timeout: Some(limit),
            } => limit
                .checked_sub(elapsed)
                .filter(|left| !left.is_zero())
                .map(|left| wait.min(left)),
            Self::SingleShot | Self::WaitUntilReady { timeout: None } => Some(wait),
        }
    }
}

/// Counters carried between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollProgress {
    pub attempts: u32,
    pub not_ready_answers: u32,
    /// Reset by any successful round trip.
    pub consecutive_transport_failures: u32,
}

/// Why polling stopped without a ready label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    NotReady,
    TransportExhausted,
    /// Label missing or response unusable.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    NotStarted,
    Polling(PollProgress),
    Ready,
    Failed(PollFailure),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

/// Classified result of one status round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Ready,
    NotReady,
    TransportFailure,
    HardFailure,
}

/// The next state, and how long to wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub next: PollState,
    pub wait: Option<Duration>,
}

impl PollStep {
    fn finish(next: PollState) -> Self {
        Self { next, wait: None }
    }

    fn retry(progress: PollProgress, wait: Duration) -> Self {
        Self {
            next: PollState::Polling(progress),
            wait: Some(wait),
        }
    }
}

/// Classify a `WaybillError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &WaybillError) -> ErrorClass {
    match err {
        WaybillError::Network(_) => ErrorClass::Transient,
        WaybillError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::Interrupted => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        },

        // Operator must pick a printer or fix the device.
        WaybillError::PrinterUnavailable(_) => ErrorClass::UserAction,

        WaybillError::BatchNotFound(_)
        | WaybillError::LabelNotExist(_)
        | WaybillError::LabelNotReady(_)
        | WaybillError::MalformedResponse(_)
        | WaybillError::ImageConversion(_)
        | WaybillError::UserCancelled { .. }
        | WaybillError::InvalidConfig(_)
        | WaybillError::QueueClosed
        | WaybillError::Serialization(_) => ErrorClass::Permanent,
    }
}

/// Run a read-only operation, retrying transient failures within the budget.
///
/// Must not wrap operations with server-side side effects.
pub async fn retry_transport<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Err(err) if classify_error(&err) == ErrorClass::Transient => {
                failures += 1;
                if failures > policy.max_transport_retries {
                    warn!(what, failures, error = %err, "retry budget exhausted");
                    return Err(err);
                }
                warn!(
                    what,
                    failures,
                    backoff_ms = policy.transport_backoff.as_millis() as u64,
                    error = %err,
                    "transport failure, retrying"
                );
                tokio::time::sleep(policy.transport_backoff).await;
            }
            result => {
                if failures > 0 {
                    debug!(what, failures, "recovered after transport failures");
                }
                return result;
            }
        }
    }
}
