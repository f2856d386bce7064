use edugen_contracts::categories::Frame;
use edugen_contracts::config::ValidationConfig;
use edugen_contracts::runs::session::{ValidationDetails, ValidationResult, ValidationSummary};
use image::{ColorType, GenericImageView, ImageFormat, ImageReader};

/// Checks generated images against the requested frame and size limits.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    settings: ValidationConfig,
}

impl ImageValidator {
    pub fn new(settings: ValidationConfig) -> Self {
        Self { settings }
    }

    pub fn validate_image(
        &self,
        bytes: &[u8],
        expected: &Frame,
        filename: &str,
    ) -> (bool, ValidationDetails) {
        let reader = match ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format() {
            Ok(reader) => reader,
            Err(err) => return failed(filename, err.to_string()),
        };
        let format = reader.format();
        let decoded = match reader.decode() {
            Ok(decoded) => decoded,
            Err(err) => return failed(filename, err.to_string()),
        };

        let (width, height) = decoded.dimensions();
        let mut passed = true;
        let mut details = ValidationDetails {
            width: Some(width),
            height: Some(height),
            expected_width: Some(expected.width),
            expected_height: Some(expected.height),
            aspect_ratio: Some(format!("{width}:{height}")),
            expected_aspect_ratio: Some(expected.aspect_ratio.clone()),
            ..ValidationDetails::default()
        };

        if self.settings.check_aspect_ratio {
            let expected_ratio = expected.ratio();
            let actual_ratio = if height == 0 {
                0.0
            } else {
                f64::from(width) / f64::from(height)
            };
            let ratio_diff = (actual_ratio - expected_ratio).abs() / expected_ratio;
            let matches = ratio_diff <= self.settings.aspect_ratio_tolerance;
            details.aspect_ratio_match = Some(matches);
            details.aspect_ratio_difference = Some(format!("{:.2}%", ratio_diff * 100.0));
            if !matches {
                passed = false;
                details.aspect_ratio_error = Some(format!(
                    "Aspect ratio mismatch: expected {expected_ratio:.2}, got {actual_ratio:.2}"
                ));
            }
        }

        let file_size = bytes.len() as u64;
        let size_ok =
            (self.settings.min_file_size..=self.settings.max_file_size).contains(&file_size);
        details.file_size = Some(file_size);
        details.file_size_kb = Some(format!("{:.2} KB", file_size as f64 / 1024.0));
        details.file_size_valid = Some(size_ok);
        if !size_ok {
            passed = false;
            details.file_size_error = Some(format!("File size out of range: {file_size} bytes"));
        }

        details.format = format.map(format_name);
        details.mode = Some(mode_name(decoded.color()).to_string());
        details.validation_passed = passed;

        tracing::info!(filename, passed, width, height, file_size, "validated image");
        (passed, details)
    }

    /// Validates images in order, naming them `{base}_{n}` from 1.
    pub fn validate_batch(
        &self,
        images: &[&[u8]],
        expected: &Frame,
        base_filename: &str,
    ) -> ValidationSummary {
        let results: Vec<ValidationResult> = images
            .iter()
            .enumerate()
            .map(|(idx, bytes)| {
                let filename = format!("{base_filename}_{}", idx + 1);
                let (passed, details) = self.validate_image(bytes, expected, &filename);
                ValidationResult {
                    filename,
                    passed,
                    details,
                }
            })
            .collect();
        let passed = results.iter().filter(|row| row.passed).count();
        let total = results.len();
        let rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64 * 100.0
        };
        ValidationSummary {
            total,
            passed,
            failed: total - passed,
            success_rate: format!("{rate:.1}%"),
            results,
        }
    }
}

fn failed(filename: &str, error: String) -> (bool, ValidationDetails) {
    tracing::warn!(filename, error = %error, "image failed validation");
    (
        false,
        ValidationDetails {
            validation_passed: false,
            error: Some(error),
            ..ValidationDetails::default()
        },
    )
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_ascii_uppercase())
        .unwrap_or_else(|| format!("{format:?}").to_ascii_uppercase())
}

fn mode_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;

    fn noisy_png(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) as u8;
            Rgb([v, v.wrapping_mul(7), v.wrapping_add(x as u8)])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    fn frame(width: u32, height: u32, aspect: &str) -> Frame {
        Frame {
            width,
            height,
            aspect_ratio: aspect.to_string(),
        }
    }

    fn lenient() -> ValidationConfig {
        ValidationConfig {
            min_file_size: 0,
            ..ValidationConfig::default()
        }
    }

    #[test]
    fn matching_frame_passes_with_full_details() -> anyhow::Result<()> {
        let bytes = noisy_png(160, 90)?;
        let validator = ImageValidator::new(lenient());
        let (passed, details) = validator.validate_image(&bytes, &frame(1920, 1080, "16:9"), "x_1");
        assert!(passed);
        assert!(details.validation_passed);
        assert_eq!(details.aspect_ratio.as_deref(), Some("160:90"));
        assert_eq!(details.expected_aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(details.aspect_ratio_match, Some(true));
        assert_eq!(details.aspect_ratio_difference.as_deref(), Some("0.00%"));
        assert_eq!(details.format.as_deref(), Some("PNG"));
        assert_eq!(details.mode.as_deref(), Some("RGB"));
        Ok(())
    }

    #[test]
    fn ratio_outside_tolerance_fails() -> anyhow::Result<()> {
        let bytes = noisy_png(100, 100)?;
        let validator = ImageValidator::new(lenient());
        let (passed, details) = validator.validate_image(&bytes, &frame(1920, 1080, "16:9"), "x_1");
        assert!(!passed);
        assert_eq!(details.aspect_ratio_match, Some(false));
        assert_eq!(
            details.aspect_ratio_error.as_deref(),
            Some("Aspect ratio mismatch: expected 1.78, got 1.00")
        );
        Ok(())
    }

    #[test]
    fn ratio_check_can_be_disabled() -> anyhow::Result<()> {
        let bytes = noisy_png(100, 100)?;
        let validator = ImageValidator::new(ValidationConfig {
            check_aspect_ratio: false,
            ..lenient()
        });
        let (passed, details) = validator.validate_image(&bytes, &frame(1920, 1080, "16:9"), "x_1");
        assert!(passed);
        assert_eq!(details.aspect_ratio_match, None);
        Ok(())
    }

    #[test]
    fn small_files_fail_the_size_check() -> anyhow::Result<()> {
        let bytes = noisy_png(16, 9)?;
        let validator = ImageValidator::new(ValidationConfig::default());
        let (passed, details) = validator.validate_image(&bytes, &frame(16, 9, "16:9"), "x_1");
        assert!(!passed);
        assert_eq!(details.file_size_valid, Some(false));
        assert_eq!(
            details.file_size_error,
            Some(format!("File size out of range: {} bytes", bytes.len()))
        );
        Ok(())
    }

    #[test]
    fn undecodable_bytes_fail_with_error() {
        let validator = ImageValidator::new(ValidationConfig::default());
        let (passed, details) =
            validator.validate_image(b"garbage", &frame(16, 9, "16:9"), "x_1");
        assert!(!passed);
        assert!(details.error.is_some());
        assert!(details.width.is_none());
    }

    #[test]
    fn batch_summary_counts_and_names_results() -> anyhow::Result<()> {
        let good = noisy_png(160, 90)?;
        let square = noisy_png(90, 90)?;
        let validator = ImageValidator::new(lenient());
        let summary = validator.validate_batch(
            &[good.as_slice(), square.as_slice(), good.as_slice()],
            &frame(1920, 1080, "16:9"),
            "cover_Time_20260101_000000",
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success_rate, "66.7%");
        assert_eq!(summary.results[1].filename, "cover_Time_20260101_000000_2");

        let empty = validator.validate_batch(&[], &frame(1, 1, "1:1"), "none");
        assert_eq!(empty.success_rate, "0.0%");
        Ok(())
    }
}
