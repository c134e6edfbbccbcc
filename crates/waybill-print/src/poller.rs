// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Readiness poller.
//
// Labels are rendered asynchronously by the service, so a freshly created
// label may answer "still generating" for a while. The poller drives the
// state machine in `retry` with real round trips and sleeps, and only returns
// once the image has actually been downloaded.

use std::sync::Arc;

use reqwest::Url;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use waybill_core::error::{Result, WaybillError};
use waybill_core::types::{ErrorClass, LabelRecord};

use crate::retry::{AttemptOutcome, PollFailure, PollMode, PollState, RetryPolicy, classify_error, retry_transport};
use crate::router::BackendRouter;
use crate::service::{LabelService, LabelStatus};

/// A label whose image has been rendered and fetched.
#[derive(Debug, Clone)]
pub struct ResolvedLabel {
    /// Always `ready`, with `source_location` set.
    pub record: LabelRecord,
    pub image: Vec<u8>,
}

/// What one round trip produced, before classification.
enum Attempt {
    Ready {
        location: String,
        page_count: u32,
        image: Vec<u8>,
    },
    NotReady,
    Transport(WaybillError),
    Hard(WaybillError),
}

impl Attempt {
    fn from_error(err: WaybillError) -> Self {
        match classify_error(&err) {
            ErrorClass::Transient => Self::Transport(err),
            _ => Self::Hard(err),
        }
    }

    fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Ready { .. } => AttemptOutcome::Ready,
            Self::NotReady => AttemptOutcome::NotReady,
            Self::Transport(_) => AttemptOutcome::TransportFailure,
            Self::Hard(_) => AttemptOutcome::HardFailure,
        }
    }
}

/// Resolves label identifiers into downloaded images.
pub struct ReadinessPoller {
    service: Arc<dyn LabelService>,
    router: Arc<BackendRouter>,
    policy: RetryPolicy,
}

impl ReadinessPoller {
    pub fn new(service: Arc<dyn LabelService>, router: Arc<BackendRouter>, policy: RetryPolicy) -> Self {
        Self {
            service,
            router,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wait for `identifier` to be rendered and download its image.
    ///
    /// Only read-only lookups are issued, so resolving the same label twice
    /// is harmless.
    pub async fn resolve(&self, identifier: &str, mode: PollMode) -> Result<ResolvedLabel> {
        self.resolve_with(identifier, mode, &self.policy).await
    }

    /// Like `resolve`, with backoffs and budget taken from `policy`.
    #[instrument(skip(self, policy), fields(label = identifier, not_ready_backoff_ms = policy.not_ready_backoff.as_millis() as u64))]
    pub async fn resolve_with(
        &self,
        identifier: &str,
        mode: PollMode,
        policy: &RetryPolicy,
    ) -> Result<ResolvedLabel> {
        let started = Instant::now();
        let mut record = self.find_record(identifier, policy).await?;
        let mut state = PollState::NotStarted;

        loop {
            let base = self.router.current_best();
            let attempt = self.attempt(&base, identifier).await;
            let step = policy.next_state(mode, state, attempt.outcome(), started.elapsed());

            match (step.next, attempt) {
                (PollState::Ready, Attempt::Ready { location, page_count, image }) => {
                    record.mark_ready(location, page_count);
                    info!(
                        pages = record.page_count,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "label ready"
                    );
                    return Ok(ResolvedLabel { record, image });
                }
                (PollState::Failed(PollFailure::NotReady), _) => {
                    return Err(WaybillError::LabelNotReady(identifier.to_string()));
                }
                (PollState::Failed(PollFailure::TransportExhausted), Attempt::Transport(err)) => {
                    warn!(error = %err, "giving up after repeated transport failures");
                    return Err(err);
                }
                (PollState::Failed(_), Attempt::Hard(err)) => {
                    debug!(error = %err, "label lookup failed");
                    return Err(WaybillError::LabelNotExist(identifier.to_string()));
                }
                (PollState::Polling(progress), attempt) => {
                    let wait = step.wait.unwrap_or(policy.not_ready_backoff);
                    match &attempt {
                        Attempt::Transport(err) => warn!(
                            %base,
                            failures = progress.consecutive_transport_failures,
                            backoff_ms = wait.as_millis() as u64,
                            error = %err,
                            "status request failed, retrying"
                        ),
                        _ => debug!(
                            %base,
                            attempt = progress.attempts,
                            backoff_ms = wait.as_millis() as u64,
                            "label still generating"
                        ),
                    }
                    tokio::time::sleep(wait).await;
                    state = step.next;
                }
                (next, _) => {
                    // next_state only pairs each terminal state with its own outcome.
                    return Err(WaybillError::MalformedResponse(format!(
                        "poll of {identifier} ended in unexpected state {next:?}"
                    )));
                }
            }
        }
    }

    async fn find_record(&self, identifier: &str, policy: &RetryPolicy) -> Result<LabelRecord> {
        let service = &self.service;
        let router = &self.router;
        let found = retry_transport(policy, "find label", move || async move {
            service.find_label(&router.current_best(), identifier).await
        })
        .await;

        match found {
            Ok(record) => Ok(record),
            Err(WaybillError::MalformedResponse(detail)) => {
                debug!(%detail, "label info unusable");
                Err(WaybillError::LabelNotExist(identifier.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn attempt(&self, base: &Url, identifier: &str) -> Attempt {
        let status = match self.service.get_status(base, identifier).await {
            Ok(status) => status,
            Err(err) => return Attempt::from_error(err),
        };
        match status {
            LabelStatus::NotReady => Attempt::NotReady,
            LabelStatus::NotFound => Attempt::Hard(WaybillError::LabelNotExist(identifier.to_string())),
            LabelStatus::Ready { location, page_count } => {
                match self.service.download(base, &location).await {
                    Ok(image) => Attempt::Ready {
                        location,
                        page_count,
                        image,
                    },
                    Err(err) => Attempt::from_error(err),
                }
            }
        }
    }
}
