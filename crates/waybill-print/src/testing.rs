// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use reqwest::Url;

use waybill_core::error::{Result, WaybillError};
use waybill_core::types::{
    DeviceProfile, LabelRecord, MediaSize, PageGeometry, PrintLog, PrintTask, Resolution,
    SplitRequest,
};

use crate::device::PrintDevice;
use crate::router::HealthProbe;
use crate::service::{LabelService, LabelStatus};

/// A small striped label image carrying `dpi` in its metadata.
pub fn label_png(width: u32, height: u32, dpi: u32) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, _| {
        if x % 4 < 2 { Luma([0]) } else { Luma([255]) }
    }));
    waybill_render::density::encode_png(&image, Resolution::square(dpi))
        .expect("test image encodes")
}

// -- Health probe ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAnswer {
    /// Answers `ok` after this many milliseconds.
    Healthy(u64),
    Down,
    /// Never answers.
    Hang,
}

#[derive(Debug, Default)]
pub struct FakeProbe {
    answers: Mutex<HashMap<String, ProbeAnswer>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(self: Arc<Self>, base: &str, answer: ProbeAnswer) -> Arc<Self> {
        self.set(base, answer);
        self
    }

    pub fn set(&self, base: &str, answer: ProbeAnswer) {
        self.answers.lock().unwrap().insert(base.to_string(), answer);
    }

    pub fn calls(&self, base: &str) -> u32 {
        self.calls.lock().unwrap().get(base).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, base: &Url) -> Result<()> {
        let answer = {
            *self.calls.lock().unwrap().entry(base.to_string()).or_default() += 1;
            self.answers
                .lock()
                .unwrap()
                .get(base.as_str())
                .copied()
                .unwrap_or(ProbeAnswer::Down)
        };
        match answer {
            ProbeAnswer::Healthy(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            ProbeAnswer::Down => Err(WaybillError::Network(format!("{base} refused"))),
            ProbeAnswer::Hang => std::future::pending().await,
        }
    }
}

// -- Label service ----------------------------------------------------------------

/// Scripted answer of one status round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStep {
    Ready,
    NotReady,
    NotFound,
    Transport,
    Malformed,
}

#[derive(Debug)]
struct FakeLabel {
    script: VecDeque<StatusStep>,
    /// Repeated once the script runs out.
    last: StatusStep,
    page_count: u32,
    image: Vec<u8>,
}

#[derive(Debug, Default)]
struct ServiceState {
    batches: HashMap<String, Vec<String>>,
    splits: HashMap<String, Vec<String>>,
    labels: HashMap<String, FakeLabel>,
    batch_transport_failures: u32,
    garbled_splits: bool,
    status_calls: HashMap<String, u32>,
    find_calls: HashMap<String, u32>,
    download_calls: HashMap<String, u32>,
    split_calls: u32,
    status_bases: Vec<Url>,
    logs: Vec<PrintLog>,
}

#[derive(Debug, Default)]
pub struct FakeLabelService {
    state: Mutex<ServiceState>,
}

impl FakeLabelService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a label whose status answers follow `script`.
    pub fn label(&self, identifier: &str, image: Vec<u8>, page_count: u32, script: &[StatusStep]) {
        let last = script.last().copied().unwrap_or(StatusStep::Ready);
        self.state.lock().unwrap().labels.insert(
            identifier.to_string(),
            FakeLabel {
                script: script.iter().copied().collect(),
                last,
                page_count,
                image,
            },
        );
    }

    pub fn batch(&self, batch_id: &str, identifiers: &[&str]) {
        self.state.lock().unwrap().batches.insert(
            batch_id.to_string(),
            identifiers.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Labels the service generates when `batch_id` is split.
    pub fn split_result(&self, batch_id: &str, identifiers: &[&str]) {
        self.state.lock().unwrap().splits.insert(
            batch_id.to_string(),
            identifiers.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn fail_batch_lookups(&self, times: u32) {
        self.state.lock().unwrap().batch_transport_failures = times;
    }

    /// Split answers become undecodable JSON.
    pub fn garble_splits(&self) {
        self.state.lock().unwrap().garbled_splits = true;
    }

    pub fn status_calls(&self, identifier: &str) -> u32 {
        self.state.lock().unwrap().status_calls.get(identifier).copied().unwrap_or(0)
    }

    pub fn find_calls(&self, identifier: &str) -> u32 {
        self.state.lock().unwrap().find_calls.get(identifier).copied().unwrap_or(0)
    }

    pub fn download_calls(&self, identifier: &str) -> u32 {
        self.state.lock().unwrap().download_calls.get(identifier).copied().unwrap_or(0)
    }

    pub fn split_calls(&self) -> u32 {
        self.state.lock().unwrap().split_calls
    }

    pub fn status_bases(&self) -> Vec<Url> {
        self.state.lock().unwrap().status_bases.clone()
    }

    pub fn logs(&self) -> Vec<PrintLog> {
        self.state.lock().unwrap().logs.clone()
    }

    fn records(batch_id: &str, identifiers: &[String]) -> Vec<LabelRecord> {
        identifiers
            .iter()
            .enumerate()
            .map(|(i, id)| LabelRecord {
                sequence_index: i as u32,
                total_in_batch: identifiers.len() as u32,
                batch_id: Some(batch_id.to_string()),
                ..LabelRecord::new(id.clone())
            })
            .collect()
    }
}

fn image_location(identifier: &str) -> String {
    format!("images/{identifier}.png")
}

#[async_trait]
impl LabelService for FakeLabelService {
    async fn lookup_by_batch(&self, _base: &Url, batch_id: &str) -> Result<Vec<LabelRecord>> {
        let mut state = self.state.lock().unwrap();
        if state.batch_transport_failures > 0 {
            state.batch_transport_failures -= 1;
            return Err(WaybillError::Network("connection reset".into()));
        }
        state
            .batches
            .get(batch_id)
            .filter(|ids| !ids.is_empty())
            .map(|ids| Self::records(batch_id, ids))
            .ok_or_else(|| WaybillError::BatchNotFound(batch_id.to_string()))
    }

    async fn find_label(&self, _base: &Url, identifier: &str) -> Result<LabelRecord> {
        let mut state = self.state.lock().unwrap();
        *state.find_calls.entry(identifier.to_string()).or_default() += 1;
        if state.labels.contains_key(identifier) {
            Ok(LabelRecord::new(identifier))
        } else {
            Err(WaybillError::LabelNotExist(identifier.to_string()))
        }
    }

    async fn get_status(&self, base: &Url, identifier: &str) -> Result<LabelStatus> {
        let mut state = self.state.lock().unwrap();
        *state.status_calls.entry(identifier.to_string()).or_default() += 1;
        state.status_bases.push(base.clone());
        let Some(label) = state.labels.get_mut(identifier) else {
            return Ok(LabelStatus::NotFound);
        };
        let step = label.script.pop_front().unwrap_or(label.last);
        match step {
            StatusStep::Ready => Ok(LabelStatus::Ready {
                location: image_location(identifier),
                page_count: label.page_count,
            }),
            StatusStep::NotReady => Ok(LabelStatus::NotReady),
            StatusStep::NotFound => Ok(LabelStatus::NotFound),
            StatusStep::Transport => Err(WaybillError::Network("connection refused".into())),
            StatusStep::Malformed => Err(WaybillError::MalformedResponse("<html>".into())),
        }
    }

    async fn split_package(&self, _base: &Url, request: &SplitRequest) -> Result<Vec<LabelRecord>> {
        let mut state = self.state.lock().unwrap();
        state.split_calls += 1;
        if state.garbled_splits {
            return Err(serde_json::from_str::<serde_json::Value>("{\"labels\":").unwrap_err().into());
        }
        let ids = state
            .splits
            .get(&request.batch_id)
            .cloned()
            .ok_or_else(|| WaybillError::BatchNotFound(request.batch_id.clone()))?;
        for id in &ids {
            let image = label_png(40, 60, 72);
            state.labels.entry(id.clone()).or_insert(FakeLabel {
                script: VecDeque::new(),
                last: StatusStep::Ready,
                page_count: 1,
                image,
            });
        }
        Ok(Self::records(&request.batch_id, &ids))
    }

    async fn download(&self, _base: &Url, location: &str) -> Result<Vec<u8>> {
        let identifier = location
            .strip_prefix("images/")
            .and_then(|rest| rest.strip_suffix(".png"))
            .ok_or_else(|| WaybillError::Network(format!("no image at {location}")))?;
        let mut state = self.state.lock().unwrap();
        *state.download_calls.entry(identifier.to_string()).or_default() += 1;
        state
            .labels
            .get(identifier)
            .map(|l| l.image.clone())
            .ok_or_else(|| WaybillError::Network(format!("no image at {location}")))
    }

    async fn log_print_result(&self, _base: &Url, log: &PrintLog) -> Result<()> {
        self.state.lock().unwrap().logs.push(log.clone());
        Ok(())
    }
}

// -- Print device ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedPage {
    pub printer: String,
    pub label_identifier: String,
    pub page_index: u32,
    pub geometry: PageGeometry,
}

#[derive(Debug, Default)]
pub struct FakeDevice {
    profiles: Vec<DeviceProfile>,
    failing_labels: Mutex<HashSet<String>>,
    submitted: Mutex<Vec<SubmittedPage>>,
}

impl FakeDevice {
    /// One device per `(name, dpi)` pair.
    pub fn new(printers: &[(&str, u32)]) -> Arc<Self> {
        Arc::new(Self {
            profiles: printers
                .iter()
                .map(|(name, dpi)| DeviceProfile {
                    name: name.to_string(),
                    resolutions: vec![Resolution::square(*dpi)],
                    media: MediaSize::Label100x150,
                })
                .collect(),
            ..Self::default()
        })
    }

    pub fn fail_label(&self, identifier: &str) {
        self.failing_labels.lock().unwrap().insert(identifier.to_string());
    }

    pub fn submitted(&self) -> Vec<SubmittedPage> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintDevice for FakeDevice {
    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.profiles.iter().map(|p| p.name.clone()).collect())
    }

    fn profile(&self, name: &str) -> Result<DeviceProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| WaybillError::PrinterUnavailable(name.to_string()))
    }

    async fn create_job(&self, name: &str, task: &PrintTask) -> Result<()> {
        if self.failing_labels.lock().unwrap().contains(&task.label_identifier) {
            return Err(WaybillError::PrinterUnavailable(format!("{name} jammed")));
        }
        self.submitted.lock().unwrap().push(SubmittedPage {
            printer: name.to_string(),
            label_identifier: task.label_identifier.clone(),
            page_index: task.page_index,
            geometry: task.geometry,
        });
        Ok(())
    }
}
