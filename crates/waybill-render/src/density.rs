// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pixel density metadata: discovery in source containers and embedding in
// the PNG pages sent to the printer.
//
// PNG carries density in the `pHYs` chunk (pixels per metre). JPEG carries it
// in the JFIF `APP0` segment (dots per inch or per centimetre). Aspect-only
// density (unit "unspecified") is treated as absent.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use tracing::debug;
use waybill_core::error::{Result, WaybillError};
use waybill_core::types::Resolution;

const METRES_PER_INCH: f64 = 0.0254;
const CM_PER_INCH: f64 = 2.54;

/// Read the embedded horizontal/vertical density of an encoded image.
pub fn read_density(data: &[u8]) -> Result<Resolution> {
    let format = image::guess_format(data).map_err(|err| {
        WaybillError::ImageConversion(format!("unrecognised image container: {err}"))
    })?;

    let density = match format {
        ImageFormat::Png => png_density(data)?,
        ImageFormat::Jpeg => jfif_density(data),
        other => {
            return Err(WaybillError::ImageConversion(format!(
                "cannot read density from {other:?} images"
            )));
        }
    };

    let density = density.ok_or_else(|| {
        WaybillError::ImageConversion("image carries no pixel density metadata".into())
    })?;
    if density.dpi_x == 0 || density.dpi_y == 0 {
        return Err(WaybillError::ImageConversion(format!(
            "image declares zero density ({density})"
        )));
    }

    debug!(%density, ?format, "source density discovered");
    Ok(density)
}

fn png_density(data: &[u8]) -> Result<Option<Resolution>> {
    let decoder = png::Decoder::new(Cursor::new(data));
    let reader = decoder.read_info().map_err(|err| {
        WaybillError::ImageConversion(format!("failed to read PNG header: {err}"))
    })?;

    Ok(reader.info().pixel_dims.and_then(|dims| match dims.unit {
        png::Unit::Meter => Some(Resolution::new(
            ppm_to_dpi(dims.xppu),
            ppm_to_dpi(dims.yppu),
        )),
        png::Unit::Unspecified => None,
    }))
}

/// Walk the JPEG marker segments up to the first scan looking for JFIF APP0.
fn jfif_density(data: &[u8]) -> Option<Resolution> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > data.len() {
            return None;
        }

        let body = &data[pos + 4..end];
        if marker == 0xE0 && body.len() >= 12 && &body[..5] == b"JFIF\0" {
            let x = u16::from_be_bytes([body[8], body[9]]) as u32;
            let y = u16::from_be_bytes([body[10], body[11]]) as u32;
            return match body[7] {
                1 => Some(Resolution::new(x, y)),
                2 => Some(Resolution::new(dpcm_to_dpi(x), dpcm_to_dpi(y))),
                _ => None,
            };
        }
        pos = end;
    }
    None
}

/// Encode `image` as PNG with `density` written to `pHYs`.
///
/// Alpha is flattened onto white; grayscale images stay single-channel.
pub fn encode_png(image: &DynamicImage, density: Resolution) -> Result<Vec<u8>> {
    let (color, raw) = if image.color().has_color() {
        (png::ColorType::Rgb, flatten_rgb(image))
    } else {
        (png::ColorType::Grayscale, flatten_luma(image))
    };

    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, image.width(), image.height());
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: dpi_to_ppm(density.dpi_x),
            yppu: dpi_to_ppm(density.dpi_y),
            unit: png::Unit::Meter,
        }));

        let mut writer = encoder.write_header().map_err(|err| {
            WaybillError::ImageConversion(format!("PNG header encoding failed: {err}"))
        })?;
        writer.write_image_data(&raw).map_err(|err| {
            WaybillError::ImageConversion(format!("PNG encoding failed: {err}"))
        })?;
        writer.finish().map_err(|err| {
            WaybillError::ImageConversion(format!("PNG encoding failed: {err}"))
        })?;
    }
    Ok(buffer)
}

fn flatten_rgb(image: &DynamicImage) -> Vec<u8> {
    let rgba = image.to_rgba8();
    let mut raw = Vec::with_capacity(rgba.width() as usize * rgba.height() as usize * 3);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        raw.extend_from_slice(&[over_white(r, a), over_white(g, a), over_white(b, a)]);
    }
    raw
}

fn flatten_luma(image: &DynamicImage) -> Vec<u8> {
    let luma = image.to_luma_alpha8();
    luma.pixels()
        .map(|pixel| {
            let [l, a] = pixel.0;
            over_white(l, a)
        })
        .collect()
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let c = channel as u32;
    let a = alpha as u32;
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}

fn ppm_to_dpi(ppm: u32) -> u32 {
    (ppm as f64 * METRES_PER_INCH).round() as u32
}

fn dpi_to_ppm(dpi: u32) -> u32 {
    (dpi as f64 / METRES_PER_INCH).round() as u32
}

fn dpcm_to_dpi(dpcm: u32) -> u32 {
    (dpcm as f64 * CM_PER_INCH).round() as u32
}
