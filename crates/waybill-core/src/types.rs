// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the waybill label printing client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp format used by the label service (`yyyy-MM-dd HH:mm:ss`, UTC).
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Unique identifier for one physical print job (one page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the caller wants printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelRequest {
    /// A sale order / outbound batch; expands to every label in it.
    Batch(String),
    /// Label identifiers ("unique codes") printed in the given order.
    Codes(Vec<String>),
    /// Re-split a batch into packages first, then print the new labels.
    Split(SplitRequest),
}

impl LabelRequest {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Batch(id) => format!("batch {id}"),
            Self::Codes(codes) => format!("{} label code(s)", codes.len()),
            Self::Split(split) => format!("split of batch {}", split.batch_id),
        }
    }
}

/// Input of the "split package" pre-step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub batch_id: String,
    /// Carrier code (Kuaidi100 naming).
    pub carrier_code: String,
    pub package_count: u32,
    pub packages: Vec<Package>,
}

/// A physical package of a split shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// 1-based package number.
    pub seq_no: u32,
    pub weight_kg: f64,
    pub length_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
    pub volume_cm3: f64,
}

/// Backend view of one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub identifier: String,
    /// Position within the batch, starting at 0.
    pub sequence_index: u32,
    pub total_in_batch: u32,
    pub batch_id: Option<String>,
    pub ready: bool,
    /// Number of logical labels stacked in the rendered image (>= 1).
    pub page_count: u32,
    pub source_location: Option<String>,
}

impl LabelRecord {
    /// A record known only by its identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            sequence_index: 0,
            total_in_batch: 1,
            batch_id: None,
            ready: false,
            page_count: 1,
            source_location: None,
        }
    }

    /// Mark the record ready once its image has been fetched.
    ///
    /// `ready` only ever moves from false to true.
    pub fn mark_ready(&mut self, location: String, page_count: u32) {
        self.ready = true;
        self.source_location = Some(location);
        self.page_count = page_count.max(1);
    }
}

/// Dot resolution in dots per inch, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Cross-feed (horizontal) resolution.
    pub dpi_x: u32,
    /// Feed (vertical) resolution.
    pub dpi_y: u32,
}

impl Resolution {
    pub const fn new(dpi_x: u32, dpi_y: u32) -> Self {
        Self { dpi_x, dpi_y }
    }

    pub const fn square(dpi: u32) -> Self {
        Self { dpi_x: dpi, dpi_y: dpi }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}dpi", self.dpi_x, self.dpi_y)
    }
}

/// Label stock sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaSize {
    /// ISO A6, the stock used for waybills.
    A6,
    /// 100 x 150 mm thermal label.
    Label100x150,
    Custom { width_mm: u32, height_mm: u32 },
}

impl MediaSize {
    /// Dimensions in millimetres (width, height).
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::A6 => (105, 148),
            Self::Label100x150 => (100, 150),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    /// Whether `page` fits on this stock, within half a millimetre.
    pub fn fits(&self, page: &PageGeometry) -> bool {
        const SLACK_MM: f64 = 0.5;
        let (width_mm, height_mm) = self.dimensions_mm();
        let (page_w, page_h) = page.size_mm();
        page_w <= width_mm as f64 + SLACK_MM && page_h <= height_mm as f64 + SLACK_MM
    }
}

/// What a print device reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub resolutions: Vec<Resolution>,
    pub media: MediaSize,
}

impl DeviceProfile {
    /// The resolution labels are rendered at: highest feed resolution wins.
    pub fn preferred_resolution(&self) -> Option<Resolution> {
        self.resolutions.iter().copied().max_by_key(|r| (r.dpi_y, r.dpi_x))
    }
}

/// Physical geometry of one rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub resolution: Resolution,
}

impl PageGeometry {
    /// Physical size in millimetres (width, height).
    pub fn size_mm(&self) -> (f64, f64) {
        let to_mm = |px: u32, dpi: u32| px as f64 * 25.4 / dpi.max(1) as f64;
        (
            to_mm(self.width_px, self.resolution.dpi_x),
            to_mm(self.height_px, self.resolution.dpi_y),
        )
    }
}

/// One device-ready page, consumed exactly once by the print device.
#[derive(Debug, Clone)]
pub struct PrintTask {
    pub id: JobId,
    pub label_identifier: String,
    /// PNG bytes with the target density embedded.
    pub raster_bytes: Vec<u8>,
    pub geometry: PageGeometry,
    /// 0-based page index; pages are submitted in ascending order.
    pub page_index: u32,
    pub page_count: u32,
}

/// Caller-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BatchNotFound,
    LabelNotExist,
    LabelNotReady,
    ImageConversionFailed,
    PrinterUnavailable,
    NetworkUnavailable,
    /// Batch sibling of a failed member.
    UserCancelled,
    Unknown,
}

impl ErrorKind {
    /// Numeric code reported to callers and the print log.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::UserCancelled => -2,
            Self::LabelNotExist => 0x0000_0001,
            Self::LabelNotReady => 0x0000_0002,
            Self::BatchNotFound => 0x0000_0004,
            Self::PrinterUnavailable => 0x0000_0100,
            Self::ImageConversionFailed => 0x0000_0400,
            Self::NetworkUnavailable => 0x0001_0000,
        }
    }
}

/// Code reported for a successful print.
pub const SUCCESS_CODE: i32 = 0;

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip or timeout; safe to retry automatically.
    Transient,
    /// Operator must act (pick another printer, load stock).
    UserAction,
    /// Retrying cannot help.
    Permanent,
}

/// The one event emitted per label identifier per orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub label_identifier: String,
    pub success: bool,
    pub label_record: Option<LabelRecord>,
    /// `None` on success.
    pub error_kind: Option<ErrorKind>,
    /// Always non-empty.
    pub error_message: String,
}

impl Outcome {
    pub fn printed(record: LabelRecord) -> Self {
        Self {
            label_identifier: record.identifier.clone(),
            success: true,
            label_record: Some(record),
            error_kind: None,
            error_message: "print success".into(),
        }
    }

    pub fn failed(
        label_identifier: impl Into<String>,
        label_record: Option<LabelRecord>,
        error: &crate::error::WaybillError,
    ) -> Self {
        Self {
            label_identifier: label_identifier.into(),
            success: false,
            label_record,
            error_kind: Some(error.kind()),
            error_message: error.to_string(),
        }
    }

    /// Numeric code: 0 on success, otherwise the error kind's code.
    pub fn code(&self) -> i32 {
        self.error_kind.map(|k| k.code()).unwrap_or(SUCCESS_CODE)
    }
}

/// Print result report sent back to the label service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintLog {
    pub label_identifier: String,
    pub logged_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub code: i32,
    pub success: bool,
}

impl PrintLog {
    pub fn from_outcome(outcome: &Outcome, duration_ms: u64) -> Self {
        Self {
            label_identifier: outcome.label_identifier.clone(),
            logged_at: Utc::now(),
            duration_ms,
            code: outcome.code(),
            success: outcome.success,
        }
    }

    /// `logged_at` rendered in the service's timestamp format.
    pub fn wire_time(&self) -> String {
        self.logged_at.format(WIRE_TIME_FORMAT).to_string()
    }
}
