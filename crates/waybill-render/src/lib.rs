// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// waybill-render: turns downloaded label images into device-ready pages.
//
// Reads the source image's embedded density, rescales it to the printer's dot
// resolution with a multi-pass filter, splits merged multi-label strips into
// pages, and re-encodes each page as PNG carrying the target density.

pub mod density;
pub mod pipeline;
pub mod resample;

pub use pipeline::{LabelImage, band_rows, prepare};
