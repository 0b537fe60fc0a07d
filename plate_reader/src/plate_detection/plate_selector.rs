use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use tracing::{debug, info};

use super::region_validator::looks_like_plate;
use super::{BoundingBox, PlateCandidate};
use crate::config::{SelectorConfig, ValidatorConfig};
use crate::error::Result;

/// The chosen candidate together with its padded crop.
pub struct SelectedPlate {
    pub candidate: PlateCandidate,
    pub padded: BoundingBox,
    pub crop: Mat,
}

/// Returns the first candidate, in score order, whose padded crop passes
/// the validator. `None` when every candidate is rejected.
pub fn select_plate(
    image: &Mat,
    candidates: &[PlateCandidate],
    selector: &SelectorConfig,
    validator: &ValidatorConfig,
) -> Result<Option<SelectedPlate>> {
    let (width, height) = (image.cols(), image.rows());

    for candidate in candidates {
        let padded = match pad_box(&candidate.bbox, width, height, selector) {
            Some(padded) => padded,
            None => continue,
        };
        let crop = Mat::roi(image, padded.to_rect())?.try_clone()?;

        if looks_like_plate(&crop, validator)? {
            info!(
                "selected plate candidate with score {:.3}, aspect ratio {:.2}",
                candidate.score, candidate.aspect_ratio
            );
            return Ok(Some(SelectedPlate {
                candidate: candidate.clone(),
                padded,
                crop,
            }));
        }
        debug!("candidate {:?} failed validation", candidate.bbox);
    }

    Ok(None)
}

/// Grows a candidate box so the crop does not clip character strokes.
/// The padded width and height are computed first and then cut to what is
/// left of the image from the shifted origin.
pub fn pad_box(
    bbox: &BoundingBox,
    image_width: i32,
    image_height: i32,
    config: &SelectorConfig,
) -> Option<BoundingBox> {
    let (w, h) = (bbox.width(), bbox.height());
    let pad_x = config.min_pad_x.max((w as f64 * config.pad_x_fraction) as i32);
    let pad_y = config.min_pad_y.max((h as f64 * config.pad_y_fraction) as i32);

    let x = (bbox.x1 - pad_x).max(0);
    let y = (bbox.y1 - pad_y).max(0);
    let padded_w = (w + 2 * pad_x).min(image_width - x);
    let padded_h = (h + 2 * pad_y).min(image_height - y);

    BoundingBox::new(x, y, x + padded_w, y + padded_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, CV_8UC3};
    use opencv::imgproc::{rectangle, FILLED, LINE_8};

    fn candidate(x: i32, y: i32, w: i32, h: i32, score: f64) -> PlateCandidate {
        PlateCandidate {
            bbox: BoundingBox::new(x, y, x + w, y + h).unwrap(),
            area: (w * h) as f64,
            aspect_ratio: w as f64 / h as f64,
            solidity: 1.0,
            extent: 1.0,
            score,
        }
    }

    #[test]
    fn padding_uses_minimums_for_small_boxes() {
        let bbox = BoundingBox::new(100, 100, 140, 120).unwrap();
        let padded = pad_box(&bbox, 640, 480, &SelectorConfig::default()).unwrap();
        assert_eq!(padded, BoundingBox::new(90, 92, 150, 128).unwrap());
    }

    #[test]
    fn padding_scales_with_large_boxes() {
        let bbox = BoundingBox::new(100, 100, 300, 160).unwrap();
        let padded = pad_box(&bbox, 640, 480, &SelectorConfig::default()).unwrap();
        // 20% of 200 is 40, 25% of 60 is 15.
        assert_eq!(padded, BoundingBox::new(60, 85, 340, 175).unwrap());
    }

    #[test]
    fn padding_is_clamped_to_image() {
        let bbox = BoundingBox::new(5, 4, 95, 44).unwrap();
        let padded = pad_box(&bbox, 100, 50, &SelectorConfig::default()).unwrap();
        assert_eq!(padded.x1, 0);
        assert_eq!(padded.y1, 0);
        assert_eq!(padded.x2, 100);
        assert_eq!(padded.y2, 50);
    }

    #[test]
    fn first_validated_candidate_wins() {
        let mut image =
            Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(255.0)).unwrap();
        for i in 0..10 {
            let stroke = Rect::new(110 + i * 10, 170, 5, 20);
            rectangle(&mut image, stroke, Scalar::all(0.0), FILLED, LINE_8, 0).unwrap();
        }

        // The blank top-left box scores higher but has nothing on it.
        let candidates = vec![
            candidate(20, 20, 100, 30, 0.9),
            candidate(105, 165, 100, 30, 0.5),
        ];
        let selected = select_plate(
            &image,
            &candidates,
            &SelectorConfig::default(),
            &ValidatorConfig::default(),
        )
        .unwrap()
        .expect("second candidate validates");

        assert_eq!(selected.candidate.bbox.x1, 105);
        assert_eq!(selected.crop.cols(), selected.padded.width());
        assert_eq!(selected.crop.rows(), selected.padded.height());
    }

    #[test]
    fn nothing_selected_when_all_fail() {
        let image =
            Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(90.0)).unwrap();
        let candidates = vec![candidate(20, 20, 100, 30, 0.9)];
        let selected = select_plate(
            &image,
            &candidates,
            &SelectorConfig::default(),
            &ValidatorConfig::default(),
        )
        .unwrap();
        assert!(selected.is_none());
    }
}
