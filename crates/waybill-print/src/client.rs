// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client facade wiring router, probe cycle, orchestrator, and queue together.

use std::sync::{Arc, Mutex};

use tracing::info;

use waybill_core::config::SdkConfig;
use waybill_core::error::Result;
use waybill_core::types::{LabelRequest, Outcome};

use crate::device::PrintDevice;
use crate::orchestrator::{Orchestrator, PrintOptions, ResultSink};
use crate::queue::PrintQueue;
use crate::retry::RetryPolicy;
use crate::router::{BackendRouter, HealthProbe, ProbeCycle};
use crate::service::{HttpHealthProbe, HttpLabelService, LabelService};

/// A running label printing client.
///
/// Must be started inside a Tokio runtime.
pub struct WaybillClient {
    orchestrator: Arc<Orchestrator>,
    queue: PrintQueue,
    probes: ProbeCycle,
}

impl WaybillClient {
    /// Start with the HTTP label service and liveness probe.
    pub fn start(config: &SdkConfig, device: Arc<dyn PrintDevice>) -> Result<Self> {
        let service: Arc<dyn LabelService> = Arc::new(HttpLabelService::from_config(config)?);
        let probe: Arc<dyn HealthProbe> = Arc::new(HttpHealthProbe::from_config(config)?);
        Self::with_parts(config, service, probe, device)
    }

    pub fn with_parts(
        config: &SdkConfig,
        service: Arc<dyn LabelService>,
        probe: Arc<dyn HealthProbe>,
        device: Arc<dyn PrintDevice>,
    ) -> Result<Self> {
        config.validate()?;
        let router = Arc::new(BackendRouter::from_config(config)?);
        let probes = router.spawn_probe_cycle(probe);

        let orchestrator = Arc::new(Orchestrator::new(
            service,
            router,
            device,
            RetryPolicy::from_config(config),
        ));
        if let Some(printer) = &config.default_printer {
            orchestrator.select_printer(printer)?;
        }

        let queue = PrintQueue::start(
            Arc::clone(&orchestrator),
            config.worker_count,
            config.queue_capacity,
        );
        info!(cloud = %config.cloud_address, locals = config.local_addresses.len(), "waybill client started");
        Ok(Self {
            orchestrator,
            queue,
            probes,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        self.orchestrator.router()
    }

    pub fn list_printers(&self) -> Result<Vec<String>> {
        self.orchestrator.list_printers()
    }

    pub fn select_printer(&self, name: &str) -> Result<()> {
        self.orchestrator.select_printer(name)
    }

    /// Queue a request; results arrive at `sink`.
    pub async fn print(
        &self,
        request: LabelRequest,
        options: PrintOptions,
        sink: Arc<dyn ResultSink>,
    ) -> Result<()> {
        self.queue.submit(request, options, sink).await
    }

    /// Run a request without queueing and collect its outcomes.
    ///
    /// A request that yields no labels at all returns its error.
    pub async fn print_now(&self, request: &LabelRequest, options: &PrintOptions) -> Result<Vec<Outcome>> {
        let sink = CollectingSink::default();
        self.orchestrator.try_run(request, options, &sink).await?;
        Ok(sink.into_outcomes())
    }

    /// Drain the queue and stop probing.
    pub async fn shutdown(self) {
        let Self { queue, probes, .. } = self;
        probes.stop();
        queue.shutdown().await;
    }
}

#[derive(Default)]
struct CollectingSink {
    outcomes: Mutex<Vec<Outcome>>,
}

impl CollectingSink {
    fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for CollectingSink {
    fn on_outcome(&self, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, FakeLabelService, FakeProbe, ProbeAnswer, StatusStep, label_png};
    use waybill_core::error::WaybillError;
    use waybill_core::types::{ErrorKind, SplitRequest};

    fn config() -> SdkConfig {
        SdkConfig {
            local_addresses: vec!["http://10.0.0.5/".into()],
            ..SdkConfig::with_cloud("https://cloud.example.com/")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prints_through_the_fastest_backend() {
        let service = FakeLabelService::new();
        service.batch("B1", &["u1", "u2"]);
        service.label("u1", label_png(20, 40, 72), 1, &[StatusStep::Ready]);
        service.label("u2", label_png(20, 40, 72), 1, &[StatusStep::Ready]);
        let probe = FakeProbe::new().answer("http://10.0.0.5/", ProbeAnswer::Healthy(4));
        let device = FakeDevice::new(&[("zebra", 203)]);

        let client = WaybillClient::with_parts(&config(), service.clone(), probe, device.clone()).unwrap();
        let mut ranking = client.router().subscribe();
        ranking.changed().await.unwrap();

        let outcomes = client
            .print_now(&LabelRequest::Batch("B1".into()), &PrintOptions::default())
            .await
            .unwrap();
        assert!(outcomes.iter().all(|o| o.success));
        assert!(service.status_bases().iter().all(|b| b.as_str() == "http://10.0.0.5/"));
        assert_eq!(device.submitted().len(), 2);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_batch_is_returned_as_error() {
        let service = FakeLabelService::new();
        let client = WaybillClient::with_parts(
            &config(),
            service,
            FakeProbe::new(),
            FakeDevice::new(&[("zebra", 203)]),
        )
        .unwrap();

        let err = client
            .print_now(&LabelRequest::Batch("B404".into()), &PrintOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchNotFound);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn request_error_is_returned_unchanged() {
        let service = FakeLabelService::new();
        service.garble_splits();
        let client = WaybillClient::with_parts(
            &config(),
            service,
            FakeProbe::new(),
            FakeDevice::new(&[("zebra", 203)]),
        )
        .unwrap();
        let split = LabelRequest::Split(SplitRequest {
            batch_id: "B7".into(),
            carrier_code: "SF".into(),
            package_count: 0,
            packages: Vec::new(),
        });

        let err = client.print_now(&split, &PrintOptions::default()).await.unwrap_err();
        assert!(matches!(err, WaybillError::Serialization(_)), "{err:?}");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_default_printer_is_rejected() {
        let config = SdkConfig {
            default_printer: Some("ghost".into()),
            ..config()
        };
        let result = WaybillClient::with_parts(
            &config,
            FakeLabelService::new(),
            FakeProbe::new(),
            FakeDevice::new(&[("zebra", 203)]),
        );
        assert!(matches!(result, Err(WaybillError::PrinterUnavailable(_))));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = WaybillClient::with_parts(
            &SdkConfig::default(),
            FakeLabelService::new(),
            FakeProbe::new(),
            FakeDevice::new(&[]),
        );
        assert!(matches!(result, Err(WaybillError::InvalidConfig(_))));
    }
}
