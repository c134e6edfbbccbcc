// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-pass resampling.
//
// A single bilinear transform at a large ratio drops or smears whole barcode
// modules. Each axis is first brought within a factor of two of its target
// by box-filtered halving or doubling passes, then one bilinear pass applies
// the remaining fractional scale.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::{debug, instrument};

/// What one pass does to one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisPass {
    /// Average pairs of samples (output length rounds up).
    Halve,
    Keep,
    /// Repeat every sample.
    Double,
}

impl AxisPass {
    fn choose(current: u32, target: u32) -> Self {
        let scale = target as f64 / current as f64;
        if scale < 0.5 {
            Self::Halve
        } else if scale > 2.0 {
            Self::Double
        } else {
            Self::Keep
        }
    }

    fn output_len(self, len: u32) -> u32 {
        match self {
            Self::Halve => len.div_ceil(2),
            Self::Keep => len,
            Self::Double => len * 2,
        }
    }

    /// Source indices contributing to output index `i`.
    fn sources(self, i: u32, len: u32) -> (u32, u32) {
        match self {
            Self::Halve => (2 * i, (2 * i + 1).min(len - 1)),
            Self::Keep => (i, i),
            Self::Double => (i / 2, i / 2),
        }
    }
}

/// The sequence of box passes needed before the final bilinear pass.
pub fn plan_passes(width: u32, height: u32, target_w: u32, target_h: u32) -> Vec<(AxisPass, AxisPass)> {
    let mut passes = Vec::new();
    let (mut w, mut h) = (width, height);
    loop {
        let pass = (AxisPass::choose(w, target_w), AxisPass::choose(h, target_h));
        if pass == (AxisPass::Keep, AxisPass::Keep) {
            return passes;
        }
        w = pass.0.output_len(w);
        h = pass.1.output_len(h);
        passes.push(pass);
    }
}

/// Resample `image` to exactly `target_w` x `target_h`.
///
/// Both targets must be non-zero.
#[instrument(skip(image), fields(from_w = image.width(), from_h = image.height()))]
pub fn resample(image: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let mut working = image.to_rgba8();

    let passes = plan_passes(working.width(), working.height(), target_w, target_h);
    for (x_pass, y_pass) in &passes {
        working = box_pass(&working, *x_pass, *y_pass);
    }
    debug!(
        box_passes = passes.len(),
        intermediate_w = working.width(),
        intermediate_h = working.height(),
        "box passes complete"
    );

    if working.width() != target_w || working.height() != target_h {
        working = imageops::resize(&working, target_w, target_h, FilterType::Triangle);
    }

    let resampled = DynamicImage::ImageRgba8(working);
    if image.color().has_color() {
        resampled
    } else {
        DynamicImage::ImageLumaA8(resampled.to_luma_alpha8())
    }
}

/// One box-filter pass; every output pixel is the mean of its source block.
fn box_pass(src: &RgbaImage, x_pass: AxisPass, y_pass: AxisPass) -> RgbaImage {
    let (w, h) = src.dimensions();
    let out_w = x_pass.output_len(w);
    let out_h = y_pass.output_len(h);

    RgbaImage::from_fn(out_w, out_h, |x, y| {
        let (x0, x1) = x_pass.sources(x, w);
        let (y0, y1) = y_pass.sources(y, h);
        let block = [
            src.get_pixel(x0, y0),
            src.get_pixel(x1, y0),
            src.get_pixel(x0, y1),
            src.get_pixel(x1, y1),
        ];
        let mut sum = [0u32; 4];
        for pixel in block {
            for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                *acc += channel as u32;
            }
        }
        Rgba(sum.map(|s| ((s + 2) / 4) as u8))
    })
}
