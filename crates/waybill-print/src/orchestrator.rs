// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print orchestration.
//
// Expands a request into label identifiers, resolves each one, renders it for
// the selected printer, submits its pages, and reports exactly one outcome per
// identifier in request order. The two completion policies share the same
// resolve/render/submit steps and differ only in when pages are submitted.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use waybill_core::error::{Result, WaybillError};
use waybill_core::human_errors::humanize_error;
use waybill_core::types::{LabelRecord, LabelRequest, MediaSize, Outcome, PrintLog, PrintTask, Resolution};

use crate::device::PrintDevice;
use crate::poller::ReadinessPoller;
use crate::retry::{PollMode, RetryPolicy, retry_transport};
use crate::router::BackendRouter;
use crate::service::LabelService;

/// Receives print results.
pub trait ResultSink: Send + Sync {
    /// Called once per label identifier.
    fn on_outcome(&self, outcome: Outcome);

    /// Called when a request fails before yielding any identifiers.
    fn on_request_failed(&self, request: &LabelRequest, error: &WaybillError) {
        warn!(request = %request.describe(), %error, "print request failed");
    }
}

impl<F> ResultSink for F
where
    F: Fn(Outcome) + Send + Sync,
{
    fn on_outcome(&self, outcome: Outcome) {
        self(outcome)
    }
}

impl ResultSink for mpsc::UnboundedSender<Outcome> {
    fn on_outcome(&self, outcome: Outcome) {
        if self.send(outcome).is_err() {
            debug!("outcome receiver dropped");
        }
    }
}

/// When pages reach the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Print each label as soon as it is ready.
    PrintAsReady,
    /// Print nothing unless every label resolves and renders.
    AllOrNothing,
}

/// Per-call settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintOptions {
    pub need_all_success: bool,
    pub poll_mode: PollMode,
    /// Overrides the current printer for this call.
    pub printer: Option<String>,
    /// Overrides the configured wait between "still generating" answers.
    pub not_ready_backoff: Option<Duration>,
}

impl PrintOptions {
    pub fn completion(&self) -> CompletionPolicy {
        if self.need_all_success {
            CompletionPolicy::AllOrNothing
        } else {
            CompletionPolicy::PrintAsReady
        }
    }
}

/// How each label of one call is polled.
#[derive(Debug, Clone, Copy)]
struct PollPlan {
    mode: PollMode,
    policy: RetryPolicy,
}

/// The printer one call renders for.
#[derive(Debug, Clone)]
struct Target {
    printer: String,
    resolution: Resolution,
    media: MediaSize,
}

/// A label rendered and waiting to be submitted.
struct Prepared {
    record: LabelRecord,
    tasks: Vec<PrintTask>,
}

type Failure = (Option<LabelRecord>, WaybillError);

pub struct Orchestrator {
    service: Arc<dyn LabelService>,
    router: Arc<BackendRouter>,
    device: Arc<dyn PrintDevice>,
    poller: ReadinessPoller,
    current_printer: Mutex<Option<String>>,
}

impl Orchestrator {
    /// The current printer starts as the first device listed.
    pub fn new(
        service: Arc<dyn LabelService>,
        router: Arc<BackendRouter>,
        device: Arc<dyn PrintDevice>,
        policy: RetryPolicy,
    ) -> Self {
        let first = match device.list_devices() {
            Ok(names) => names.into_iter().next(),
            Err(err) => {
                warn!(error = %err, "could not list print devices");
                None
            }
        };
        let poller = ReadinessPoller::new(Arc::clone(&service), Arc::clone(&router), policy);
        Self {
            service,
            router,
            device,
            poller,
            current_printer: Mutex::new(first),
        }
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        &self.router
    }

    pub fn list_printers(&self) -> Result<Vec<String>> {
        self.device.list_devices()
    }

    pub fn current_printer(&self) -> Option<String> {
        self.printer_slot().clone()
    }

    /// Make `name` the printer used by calls that do not name one.
    pub fn select_printer(&self, name: &str) -> Result<()> {
        if !self.device.list_devices()?.iter().any(|n| n == name) {
            return Err(WaybillError::PrinterUnavailable(format!("no printer named '{name}'")));
        }
        info!(printer = name, "printer selected");
        *self.printer_slot() = Some(name.to_string());
        Ok(())
    }

    fn printer_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.current_printer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Print everything `request` names, reporting to `sink`.
    pub async fn run(&self, request: &LabelRequest, options: &PrintOptions, sink: &dyn ResultSink) {
        if let Err(err) = self.try_run(request, options, sink).await {
            sink.on_request_failed(request, &err);
        }
    }

    /// Like `run`, but a request that yields no labels returns its error
    /// instead of passing it to `sink`.
    #[instrument(skip(self, request, options, sink), fields(request = %request.describe(), policy = ?options.completion()))]
    pub async fn try_run(
        &self,
        request: &LabelRequest,
        options: &PrintOptions,
        sink: &dyn ResultSink,
    ) -> Result<()> {
        let started = Instant::now();
        let identifiers = match self.expand(request).await {
            Ok(ids) => ids,
            Err(err) => {
                let human = humanize_error(&err);
                error!(
                    error = %err,
                    message = %human.message,
                    suggestion = %human.suggestion,
                    severity = ?human.severity,
                    "request produced no labels"
                );
                return Err(err);
            }
        };
        if identifiers.is_empty() {
            debug!("nothing to print");
            return Ok(());
        }

        let target = match self.printer_target(options) {
            Ok(found) => found,
            Err(err) => {
                for id in &identifiers {
                    self.emit(sink, self.failure(id, None, &err), started).await;
                }
                return Ok(());
            }
        };
        info!(labels = identifiers.len(), printer = %target.printer, resolution = %target.resolution, "printing");
        let plan = self.poll_plan(options);

        match options.completion() {
            CompletionPolicy::PrintAsReady => {
                for id in &identifiers {
                    let label_started = Instant::now();
                    let outcome = match self.prepare_label(id, plan, &target).await {
                        Ok(prepared) => match self.submit(&target.printer, &prepared.tasks).await {
                            Ok(()) => Outcome::printed(prepared.record),
                            Err(err) => self.failure(id, Some(prepared.record), &err),
                        },
                        Err((record, err)) => self.failure(id, record, &err),
                    };
                    self.emit(sink, outcome, label_started).await;
                }
            }
            CompletionPolicy::AllOrNothing => {
                self.run_all_or_nothing(&identifiers, plan, &target, sink, started)
                    .await;
            }
        }
        Ok(())
    }

    async fn run_all_or_nothing(
        &self,
        identifiers: &[String],
        plan: PollPlan,
        target: &Target,
        sink: &dyn ResultSink,
        started: Instant,
    ) {
        let mut prepared = Vec::with_capacity(identifiers.len());
        for (index, id) in identifiers.iter().enumerate() {
            match self.prepare_label(id, plan, target).await {
                Ok(label) => prepared.push(label),
                Err((record, err)) => {
                    warn!(label = %id, error = %err, "batch member failed, cancelling batch");
                    let records: Vec<Option<LabelRecord>> =
                        prepared.into_iter().map(|p| Some(p.record)).collect();
                    self.cancel_batch(identifiers, index, records, record, &err, sink, started)
                        .await;
                    return;
                }
            }
        }

        let mut remaining = prepared.into_iter().enumerate();
        while let Some((index, label)) = remaining.next() {
            match self.submit(&target.printer, &label.tasks).await {
                Ok(()) => self.emit(sink, Outcome::printed(label.record), started).await,
                Err(err) => {
                    let rest: Vec<Option<LabelRecord>> =
                        remaining.map(|(_, p)| Some(p.record)).collect();
                    let failed = self.failure(&identifiers[index], Some(label.record), &err);
                    self.emit(sink, failed, started).await;
                    self.cancel_members(&identifiers[index + 1..], rest, &identifiers[index], sink, started)
                        .await;
                    return;
                }
            }
        }
    }

    /// Report member `failed_index` with its own error and every other member cancelled.
    #[allow(clippy::too_many_arguments)]
    async fn cancel_batch(
        &self,
        identifiers: &[String],
        failed_index: usize,
        before: Vec<Option<LabelRecord>>,
        failed_record: Option<LabelRecord>,
        err: &WaybillError,
        sink: &dyn ResultSink,
        started: Instant,
    ) {
        let failed_id = &identifiers[failed_index];
        self.cancel_members(&identifiers[..failed_index], before, failed_id, sink, started)
            .await;
        let outcome = self.failure(failed_id, failed_record, err);
        self.emit(sink, outcome, started).await;
        let after = vec![None; identifiers.len() - failed_index - 1];
        self.cancel_members(&identifiers[failed_index + 1..], after, failed_id, sink, started)
            .await;
    }

    async fn cancel_members(
        &self,
        identifiers: &[String],
        records: Vec<Option<LabelRecord>>,
        failed_id: &str,
        sink: &dyn ResultSink,
        started: Instant,
    ) {
        let cancelled = WaybillError::UserCancelled {
            failed: failed_id.to_string(),
        };
        for (id, record) in identifiers.iter().zip(records) {
            let outcome = Outcome::failed(id.clone(), record, &cancelled);
            self.emit(sink, outcome, started).await;
        }
    }

    async fn expand(&self, request: &LabelRequest) -> Result<Vec<String>> {
        let records = match request {
            LabelRequest::Codes(codes) => return Ok(codes.clone()),
            LabelRequest::Batch(batch_id) => {
                let service = &self.service;
                let router = &self.router;
                let batch_id = batch_id.as_str();
                retry_transport(self.poller.policy(), "batch lookup", move || async move {
                    service.lookup_by_batch(&router.current_best(), batch_id).await
                })
                .await?
            }
            LabelRequest::Split(split) => {
                // Splitting generates labels server-side; never retried.
                self.service
                    .split_package(&self.router.current_best(), split)
                    .await?
            }
        };
        debug!(labels = records.len(), "request expanded");
        Ok(records.into_iter().map(|r| r.identifier).collect())
    }

    fn poll_plan(&self, options: &PrintOptions) -> PollPlan {
        let mut policy = *self.poller.policy();
        if let Some(backoff) = options.not_ready_backoff {
            policy.not_ready_backoff = backoff;
        }
        PollPlan {
            mode: options.poll_mode,
            policy,
        }
    }

    fn printer_target(&self, options: &PrintOptions) -> Result<Target> {
        let printer = options
            .printer
            .clone()
            .or_else(|| self.current_printer())
            .ok_or_else(|| WaybillError::PrinterUnavailable("no printer selected".into()))?;
        let profile = self.device.profile(&printer)?;
        let resolution = profile.preferred_resolution().ok_or_else(|| {
            WaybillError::PrinterUnavailable(format!("{printer} reports no resolution"))
        })?;
        Ok(Target {
            printer,
            resolution,
            media: profile.media,
        })
    }

    async fn prepare_label(
        &self,
        identifier: &str,
        plan: PollPlan,
        target: &Target,
    ) -> std::result::Result<Prepared, Failure> {
        let resolved = self
            .poller
            .resolve_with(identifier, plan.mode, &plan.policy)
            .await
            .map_err(|err| (None, err))?;
        let record = resolved.record;
        let image = resolved.image;
        let page_count = record.page_count;
        let id = identifier.to_string();
        let resolution = target.resolution;

        let rendered = tokio::task::spawn_blocking(move || {
            waybill_render::prepare(&id, &image, resolution, page_count)
        })
        .await
        .map_err(|e| WaybillError::ImageConversion(format!("render task failed: {e}")));

        match rendered {
            Ok(Ok(tasks)) => {
                let oversized = oversized_pages(&tasks, target.media);
                if !oversized.is_empty() {
                    let (width_mm, height_mm) = target.media.dimensions_mm();
                    warn!(
                        label = identifier,
                        pages = ?oversized,
                        width_mm,
                        height_mm,
                        "pages exceed the printable area and may be clipped"
                    );
                }
                Ok(Prepared { record, tasks })
            }
            Ok(Err(err)) | Err(err) => Err((Some(record), err)),
        }
    }

    /// Submit pages in band order; the first failure stops the label.
    async fn submit(&self, printer: &str, tasks: &[PrintTask]) -> Result<()> {
        for task in tasks {
            debug!(label = %task.label_identifier, page = task.page_index, of = task.page_count, "submitting page");
            self.device.create_job(printer, task).await?;
        }
        Ok(())
    }

    fn failure(&self, identifier: &str, record: Option<LabelRecord>, err: &WaybillError) -> Outcome {
        let human = humanize_error(err);
        warn!(
            label = identifier,
            code = err.kind().code(),
            error = %err,
            message = %human.message,
            suggestion = %human.suggestion,
            severity = ?human.severity,
            retriable = human.retriable,
            "label not printed"
        );
        Outcome::failed(identifier, record, err)
    }

    /// Report to the label service, then to the caller.
    async fn emit(&self, sink: &dyn ResultSink, outcome: Outcome, started: Instant) {
        let log = PrintLog::from_outcome(&outcome, started.elapsed().as_millis() as u64);
        if let Err(err) = self
            .service
            .log_print_result(&self.router.current_best(), &log)
            .await
        {
            warn!(label = %outcome.label_identifier, error = %err, "print log not recorded");
        }
        if outcome.success {
            info!(label = %outcome.label_identifier, "label printed");
        }
        sink.on_outcome(outcome);
    }
}

/// Indices of pages larger than `media`.
fn oversized_pages(tasks: &[PrintTask], media: MediaSize) -> Vec<u32> {
    tasks
        .iter()
        .filter(|task| !media.fits(&task.geometry))
        .map(|task| task.page_index)
        .collect()
}
