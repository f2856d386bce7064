use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};

/// Resizes an image to exactly `width`x`height` and re-encodes it as PNG.
///
/// The original bytes come back unchanged when the target is degenerate, the
/// image already has the target size, or anything fails along the way. The
/// frame is never cropped, so a large ratio mismatch stretches the content.
pub fn correct_aspect_ratio(bytes: &[u8], width: u32, height: u32) -> Vec<u8> {
    match try_correct(bytes, width, height) {
        Ok(Some(corrected)) => corrected,
        Ok(None) => bytes.to_vec(),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to correct aspect ratio");
            bytes.to_vec()
        }
    }
}

fn try_correct(bytes: &[u8], width: u32, height: u32) -> Result<Option<Vec<u8>>> {
    let decoded = image::load_from_memory(bytes).context("image decode failed")?;
    let (current_w, current_h) = decoded.dimensions();
    if width == 0 || height == 0 || current_h == 0 {
        tracing::warn!(
            target_w = width,
            target_h = height,
            image_h = current_h,
            "invalid dimensions; skipping aspect correction"
        );
        return Ok(None);
    }
    if (current_w, current_h) == (width, height) {
        tracing::debug!(width, height, "image already at target size");
        return Ok(None);
    }

    let target_ratio = f64::from(width) / f64::from(height);
    let current_ratio = f64::from(current_w) / f64::from(current_h);
    let ratio_diff = (current_ratio - target_ratio).abs() / target_ratio;
    if ratio_diff < 0.01 {
        tracing::info!(
            from = %format!("{current_w}x{current_h}"),
            to = %format!("{width}x{height}"),
            "resizing to exact dimensions"
        );
    } else {
        tracing::warn!(
            difference = %format!("{:.1}%", ratio_diff * 100.0),
            from = %format!("{current_w}x{current_h}"),
            to = %format!("{width}x{height}"),
            "aspect ratio mismatch; resizing without crop"
        );
    }

    let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(Some(out.into_inner()))
}
