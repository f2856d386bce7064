use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;

use super::{ImageProvider, ProviderRequest, ProviderResponse};
use crate::util::{color_from_prompt, decode_data_url, map_object, ImageBytes};

const FALLBACK_EDGE: u32 = 1024;

/// Offline provider: a solid-colour PNG at the requested frame, coloured by
/// the instruction text so repeated runs are reproducible. Without a frame
/// the last inline image (the refinement base) sets the size.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let (width, height) = request
            .frame
            .as_ref()
            .map(|frame| (frame.width.max(1), frame.height.max(1)))
            .or_else(|| last_image_dims(request))
            .unwrap_or((FALLBACK_EDGE, FALLBACK_EDGE));
        let bytes = render_solid_png(width, height, request.instruction(), request.seed)?;

        Ok(ProviderResponse {
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "payload": {
                    "model": request.model,
                    "content": request.content,
                    "image_config": request.frame,
                }
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "model": request.model,
                "width": width,
                "height": height,
                "size_bytes": bytes.len(),
            })),
            image: ImageBytes {
                bytes,
                mime_type: Some("image/png".to_string()),
            },
            warnings: Vec::new(),
            attempts: 1,
        })
    }
}

fn last_image_dims(request: &ProviderRequest) -> Option<(u32, u32)> {
    let url = request
        .content
        .iter()
        .rev()
        .find_map(|part| part.pointer("/image_url/url").and_then(|url| url.as_str()))?;
    if !url.starts_with("data:") {
        return None;
    }
    let decoded = decode_data_url(url).ok()?;
    image::ImageReader::new(Cursor::new(decoded.bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn render_solid_png(width: u32, height: u32, text: &str, seed: u64) -> Result<Vec<u8>> {
    let (r, g, b) = color_from_prompt(text, seed);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun image")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use edugen_contracts::categories::Frame;
    use serde_json::json;

    use super::*;

    fn request(seed: u64) -> ProviderRequest {
        ProviderRequest {
            model: "dryrun-image-1".to_string(),
            content: vec![json!({"type": "text", "text": "a clock face"})],
            frame: Some(Frame {
                width: 64,
                height: 36,
                aspect_ratio: "16:9".to_string(),
            }),
            api_key: None,
            seed,
        }
    }

    #[test]
    fn dryrun_renders_requested_frame() -> anyhow::Result<()> {
        let response = DryrunProvider.generate(&request(0))?;
        let decoded = image::load_from_memory(&response.image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 36));
        assert_eq!(response.provider_request["endpoint"], json!("dryrun-native"));
        assert_eq!(response.attempts, 1);
        Ok(())
    }

    #[test]
    fn dryrun_output_is_reproducible_per_seed() -> anyhow::Result<()> {
        let first = DryrunProvider.generate(&request(1))?;
        let again = DryrunProvider.generate(&request(1))?;
        assert_eq!(first.image.bytes, again.image.bytes);
        Ok(())
    }

    #[test]
    fn dryrun_without_frame_keeps_base_image_size() -> anyhow::Result<()> {
        use base64::Engine as _;

        let base = render_solid_png(30, 40, "base", 0)?;
        let url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&base)
        );
        let mut req = request(0);
        req.frame = None;
        req.content.insert(
            0,
            json!({"type": "image_url", "image_url": {"url": url}}),
        );
        let response = DryrunProvider.generate(&req)?;
        let decoded = image::load_from_memory(&response.image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (30, 40));
        Ok(())
    }

    #[test]
    fn dryrun_without_frame_uses_square_fallback() -> anyhow::Result<()> {
        let mut req = request(0);
        req.frame = None;
        let response = DryrunProvider.generate(&req)?;
        let decoded = image::load_from_memory(&response.image.bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (FALLBACK_EDGE, FALLBACK_EDGE));
        Ok(())
    }
}
