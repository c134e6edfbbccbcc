// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Label image pipeline: decode, discover density, rescale to the device's
// dot resolution, split merged strips into pages, and encode each page.

use std::ops::Range;

use image::DynamicImage;
use tracing::{debug, info, instrument};
use waybill_core::error::{Result, WaybillError};
use waybill_core::types::{JobId, PageGeometry, PrintTask, Resolution};

use crate::density;
use crate::resample;

/// A decoded label image together with the density it should be printed at.
///
/// Transformations consume `self` and return a new `LabelImage`.
///
/// ```ignore
/// let pages = LabelImage::from_bytes(&downloaded)?
///     .resample_to(Resolution::square(203))?
///     .split_pages(2)?;
/// ```
#[derive(Debug, Clone)]
pub struct LabelImage {
    image: DynamicImage,
    density: Resolution,
}

impl LabelImage {
    // -- Construction ---------------------------------------------------------

    /// Decode encoded bytes (PNG or JPEG) and read their embedded density.
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(WaybillError::ImageConversion("image is empty".into()));
        }
        let image = image::load_from_memory(data).map_err(|err| {
            WaybillError::ImageConversion(format!("failed to decode image: {err}"))
        })?;
        let density = density::read_density(data)?;
        debug!(
            width = image.width(),
            height = image.height(),
            %density,
            "label image decoded"
        );
        Ok(Self { image, density })
    }

    /// Wrap an already-decoded image with a known density.
    pub fn from_dynamic(image: DynamicImage, density: Resolution) -> Self {
        Self { image, density }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn density(&self) -> Resolution {
        self.density
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Pixel size this image has when printed at `target`.
    pub fn target_dimensions(&self, target: Resolution) -> Result<(u32, u32)> {
        if target.dpi_x == 0 || target.dpi_y == 0 {
            return Err(WaybillError::ImageConversion(format!(
                "target resolution {target} is not positive"
            )));
        }
        let scale = |px: u32, to: u32, from: u32| (px as f64 * to as f64 / from as f64).round();
        let w = scale(self.width(), target.dpi_x, self.density.dpi_x);
        let h = scale(self.height(), target.dpi_y, self.density.dpi_y);
        if w < 1.0 || h < 1.0 || w > u32::MAX as f64 || h > u32::MAX as f64 {
            return Err(WaybillError::ImageConversion(format!(
                "computed size {w}x{h} is out of range"
            )));
        }
        Ok((w as u32, h as u32))
    }

    // -- Transformations ------------------------------------------------------

    /// Rescale so the physical size is unchanged at `target` dots per inch.
    #[instrument(skip(self), fields(from = %self.density, to = %target))]
    pub fn resample_to(self, target: Resolution) -> Result<Self> {
        let (w, h) = self.target_dimensions(target)?;
        info!(
            from_w = self.width(),
            from_h = self.height(),
            to_w = w,
            to_h = h,
            "resampling label"
        );
        let image = resample::resample(&self.image, w, h);
        Ok(Self {
            image,
            density: target,
        })
    }

    /// Cut into `page_count` horizontal bands, top to bottom.
    pub fn split_pages(&self, page_count: u32) -> Result<Vec<LabelImage>> {
        let bands = band_rows(self.height(), page_count)?;
        Ok(bands
            .into_iter()
            .map(|rows| LabelImage {
                image: self
                    .image
                    .crop_imm(0, rows.start, self.width(), rows.end - rows.start),
                density: self.density,
            })
            .collect())
    }

    // -- Output ---------------------------------------------------------------

    /// Encode as PNG with this image's density embedded.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        density::encode_png(&self.image, self.density)
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry {
            width_px: self.width(),
            height_px: self.height(),
            resolution: self.density,
        }
    }
}

/// Row ranges of `page_count` equal bands covering `height` rows exactly.
///
/// Band `i` spans `[floor(i*h/n), floor((i+1)*h/n))`.
pub fn band_rows(height: u32, page_count: u32) -> Result<Vec<Range<u32>>> {
    if page_count == 0 {
        return Err(WaybillError::ImageConversion("page count is zero".into()));
    }
    if page_count > height {
        return Err(WaybillError::ImageConversion(format!(
            "cannot split {height} rows into {page_count} pages"
        )));
    }
    let edge = |i: u32| (i as u64 * height as u64 / page_count as u64) as u32;
    Ok((0..page_count).map(|i| edge(i)..edge(i + 1)).collect())
}

/// Turn a downloaded label image into device-ready pages, in print order.
#[instrument(skip(source), fields(label = label_identifier, source_len = source.len(), %target))]
pub fn prepare(
    label_identifier: &str,
    source: &[u8],
    target: Resolution,
    page_count: u32,
) -> Result<Vec<PrintTask>> {
    let pages = LabelImage::from_bytes(source)?
        .resample_to(target)?
        .split_pages(page_count)?;

    let tasks = pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            Ok(PrintTask {
                id: JobId::new(),
                label_identifier: label_identifier.to_string(),
                raster_bytes: page.to_png_bytes()?,
                geometry: page.geometry(),
                page_index: index as u32,
                page_count,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(pages = tasks.len(), "label prepared for printing");
    Ok(tasks)
}
