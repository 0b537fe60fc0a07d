use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use super::to_gray;
use crate::config::ValidatorConfig;
use crate::error::Result;

/// Cheap necessary condition for "this crop holds plate text": enough
/// contrast, one or two text bands, and several character-like columns.
pub fn looks_like_plate(crop: &Mat, config: &ValidatorConfig) -> Result<bool> {
    if crop.empty() || crop.rows() == 0 || crop.cols() == 0 {
        return Ok(false);
    }
    let gray = to_gray(crop)?;
    // ROI views are not continuous; copy so rows can be read as one slice.
    let gray = if gray.is_continuous() {
        gray
    } else {
        gray.try_clone()?
    };
    let pixels = gray.data_bytes()?;
    Ok(validate_gray(
        pixels,
        gray.cols() as usize,
        gray.rows() as usize,
        config,
    ))
}

/// Validation over a row-major 8-bit grayscale buffer.
pub fn validate_gray(pixels: &[u8], width: usize, height: usize, config: &ValidatorConfig) -> bool {
    if width == 0 || height == 0 || pixels.len() < width * height {
        return false;
    }
    let pixels = &pixels[..width * height];

    let (min, max) = pixels
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let contrast = (max - min) as f64 / 255.0;
    if contrast < config.min_contrast_ratio {
        return false;
    }

    let row_profile: Vec<f64> = pixels
        .chunks_exact(width)
        .map(|row| row.iter().map(|&p| p as f64).sum::<f64>() / width as f64)
        .collect();
    let row_transitions = count_transitions(&row_profile);
    if row_transitions < config.min_row_transitions || row_transitions > config.max_row_transitions
    {
        return false;
    }

    let mut column_sums = vec![0.0f64; width];
    for row in pixels.chunks_exact(width) {
        for (sum, &p) in column_sums.iter_mut().zip(row) {
            *sum += p as f64;
        }
    }
    let column_profile: Vec<f64> = column_sums.iter().map(|s| s / height as f64).collect();
    count_transitions(&column_profile) >= config.min_column_transitions
}

/// Number of times the profile crosses from above its mean to at-or-below
/// it, or back.
pub fn count_transitions(profile: &[f64]) -> usize {
    if profile.len() < 2 {
        return 0;
    }
    let mean = profile.iter().sum::<f64>() / profile.len() as f64;
    let above: Vec<bool> = profile.iter().map(|&v| v > mean).collect();
    above.windows(2).filter(|pair| pair[0] != pair[1]).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, CV_8UC1};
    use opencv::imgproc::{rectangle, FILLED, LINE_8};

    /// 100x30 white crop with a band of dark strokes across rows 10..20.
    fn striped(width: usize, height: usize) -> Vec<u8> {
        let mut pixels = vec![255u8; width * height];
        for y in 10..20 {
            for x in 0..width {
                if (x / 5) % 2 == 1 {
                    pixels[y * width + x] = 0;
                }
            }
        }
        pixels
    }

    #[test]
    fn transitions_count_mean_crossings() {
        assert_eq!(count_transitions(&[]), 0);
        assert_eq!(count_transitions(&[1.0]), 0);
        assert_eq!(count_transitions(&[5.0, 5.0, 5.0]), 0);
        assert_eq!(count_transitions(&[0.0, 10.0, 0.0, 10.0]), 3);
        assert_eq!(count_transitions(&[10.0, 10.0, 0.0, 0.0, 10.0]), 2);
    }

    #[test]
    fn striped_text_band_passes() {
        let pixels = striped(100, 30);
        assert!(validate_gray(&pixels, 100, 30, &ValidatorConfig::default()));
    }

    #[test]
    fn low_contrast_is_rejected() {
        let mut pixels = vec![120u8; 100 * 30];
        for (i, p) in pixels.iter_mut().enumerate() {
            if (i % 100 / 5) % 2 == 1 {
                *p = 160;
            }
        }
        assert!(!validate_gray(&pixels, 100, 30, &ValidatorConfig::default()));
    }

    #[test]
    fn too_many_bands_are_rejected() {
        // Alternating dark and light rows every two rows: far more than two text lines.
        let width = 60;
        let height = 40;
        let mut pixels = vec![255u8; width * height];
        for y in 0..height {
            if (y / 2) % 2 == 1 {
                for x in 0..width {
                    pixels[y * width + x] = 0;
                }
            }
        }
        assert!(!validate_gray(&pixels, width, height, &ValidatorConfig::default()));
    }

    #[test]
    fn single_block_has_too_few_columns() {
        let width = 80;
        let height = 30;
        let mut pixels = vec![255u8; width * height];
        for y in 10..20 {
            for x in 30..50 {
                pixels[y * width + x] = 0;
            }
        }
        assert!(!validate_gray(&pixels, width, height, &ValidatorConfig::default()));
    }

    #[test]
    fn empty_mat_is_rejected() {
        assert!(!looks_like_plate(&Mat::default(), &ValidatorConfig::default()).unwrap());
    }

    #[test]
    fn roi_crop_is_validated() {
        let mut image =
            Mat::new_rows_cols_with_default(60, 200, CV_8UC1, Scalar::all(255.0)).unwrap();
        for i in 0..10 {
            let stroke = Rect::new(60 + i * 10, 20, 5, 10);
            rectangle(&mut image, stroke, Scalar::all(0.0), FILLED, LINE_8, 0).unwrap();
        }
        let roi = Mat::roi(&image, Rect::new(50, 10, 110, 30)).unwrap();
        assert!(looks_like_plate(&roi, &ValidatorConfig::default()).unwrap());
    }
}
