// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// waybill-print: backend failover, readiness polling, and print orchestration.
// This crate bridges between the core domain types defined in `waybill-core`,
// the remote label service, and the print devices on the local network.

pub mod client;
pub mod device;
pub mod orchestrator;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod router;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use client::WaybillClient;
pub use device::{PrintDevice, RawSocketDevice};
pub use orchestrator::{CompletionPolicy, Orchestrator, PrintOptions, ResultSink};
pub use poller::{ReadinessPoller, ResolvedLabel};
pub use queue::PrintQueue;
pub use retry::{PollMode, RetryPolicy};
pub use router::{BackendRouter, HealthProbe, ProbeCycle, RoutingSnapshot};
pub use service::{HttpHealthProbe, HttpLabelService, LabelService, LabelStatus};
