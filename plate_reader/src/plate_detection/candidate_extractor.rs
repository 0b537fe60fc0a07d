//! Edge and contour search for plate-shaped rectangles.
//!
//! There is no plate detector model, so candidates come from classical image
//! processing: denoise, edges at three contrast levels, a horizontal close to
//! fuse characters into one blob, then shape filters on the external contours.

use opencv::core::bitwise_or;
use opencv::core::Point;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::BORDER_CONSTANT;
use opencv::core::BORDER_DEFAULT;
use opencv::imgproc::approx_poly_dp;
use opencv::imgproc::arc_length;
use opencv::imgproc::bilateral_filter;
use opencv::imgproc::bounding_rect;
use opencv::imgproc::canny;
use opencv::imgproc::contour_area;
use opencv::imgproc::convex_hull;
use opencv::imgproc::find_contours;
use opencv::imgproc::get_structuring_element;
use opencv::imgproc::morphology_default_border_value;
use opencv::imgproc::morphology_ex;
use opencv::imgproc::CHAIN_APPROX_SIMPLE;
use opencv::imgproc::MORPH_CLOSE;
use opencv::imgproc::MORPH_OPEN;
use opencv::imgproc::MORPH_RECT;
use opencv::imgproc::RETR_EXTERNAL;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use tracing::debug;

use super::{to_gray, BoundingBox, PlateCandidate, SearchRegion};
use crate::config::CandidateConfig;
use crate::error::Result;

/// Measurements of one contour, everything the filters need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourShape {
    pub bbox: BoundingBox,
    pub area: f64,
    pub hull_area: f64,
    pub vertices: usize,
}

/// Ranked plate candidates inside `regions` (whole image when empty),
/// best first.
pub fn extract_candidates(
    image: &Mat,
    regions: &[SearchRegion],
    config: &CandidateConfig,
) -> Result<Vec<PlateCandidate>> {
    let gray = to_gray(image)?;
    let (width, height) = (gray.cols(), gray.rows());

    let whole;
    let regions = if regions.is_empty() {
        whole = SearchRegion::whole_image(width, height).into_iter().collect::<Vec<_>>();
        &whole[..]
    } else {
        regions
    };

    let edges = edge_map(&gray, config)?;

    let mut contours = Vector::<Vector<Point>>::new();
    find_contours(
        &edges,
        &mut contours,
        RETR_EXTERNAL,
        CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;

    let mut by_area = Vec::with_capacity(contours.len());
    for contour in contours {
        let area = contour_area(&contour, false)?;
        by_area.push((area, contour));
    }
    by_area.sort_by(|a, b| b.0.total_cmp(&a.0));
    by_area.truncate(config.max_contours);

    let mut candidates = Vec::new();
    for (area, contour) in by_area {
        if area < config.min_area {
            continue;
        }
        let shape = measure_contour(&contour, area, config)?;
        if let Some(candidate) = evaluate_shape(&shape, width, height, regions, config) {
            candidates.push(candidate);
        }
    }

    rank_candidates(&mut candidates, config.max_candidates);
    debug!(
        "found {} plate candidates in {}x{} image",
        candidates.len(),
        width,
        height
    );
    Ok(candidates)
}

/// Combined edge map after the horizontal close and the cleanup open.
pub fn edge_map(gray: &Mat, config: &CandidateConfig) -> Result<Mat> {
    let mut smoothed = Mat::default();
    bilateral_filter(
        gray,
        &mut smoothed,
        config.bilateral_diameter,
        config.bilateral_sigma_color,
        config.bilateral_sigma_space,
        BORDER_DEFAULT,
    )?;

    let mut combined: Option<Mat> = None;
    for [low, high] in &config.canny_thresholds {
        let mut edges = Mat::default();
        canny(&smoothed, &mut edges, *low, *high, 3, false)?;
        combined = Some(match combined {
            None => edges,
            Some(previous) => {
                let mut merged = Mat::default();
                bitwise_or(&previous, &edges, &mut merged, &Mat::default())?;
                merged
            }
        });
    }
    let combined = combined.unwrap_or(smoothed);

    let [kw, kh] = config.morph_kernel_size;
    let kernel = get_structuring_element(MORPH_RECT, Size::new(kw, kh), Point::new(-1, -1))?;

    let mut closed = Mat::default();
    morphology_ex(
        &combined,
        &mut closed,
        MORPH_CLOSE,
        &kernel,
        Point::new(-1, -1),
        config.close_iterations,
        BORDER_CONSTANT,
        morphology_default_border_value()?,
    )?;

    let mut opened = Mat::default();
    morphology_ex(
        &closed,
        &mut opened,
        MORPH_OPEN,
        &kernel,
        Point::new(-1, -1),
        config.open_iterations,
        BORDER_CONSTANT,
        morphology_default_border_value()?,
    )?;
    Ok(opened)
}

fn measure_contour(
    contour: &Vector<Point>,
    area: f64,
    config: &CandidateConfig,
) -> Result<ContourShape> {
    let rect = bounding_rect(contour)?;
    // A degenerate rect has zero extent and fails the size filter anyway.
    let bbox = BoundingBox::from_rect(rect).unwrap_or(BoundingBox {
        x1: rect.x,
        y1: rect.y,
        x2: rect.x + rect.width.max(1),
        y2: rect.y + rect.height.max(1),
    });

    let mut hull = Vector::<Point>::new();
    convex_hull(contour, &mut hull, false, true)?;
    let hull_area = contour_area(&hull, false)?;

    let perimeter = arc_length(contour, true)?;
    let mut approx = Vector::<Point>::new();
    approx_poly_dp(
        contour,
        &mut approx,
        config.approx_epsilon_fraction * perimeter,
        true,
    )?;

    Ok(ContourShape {
        bbox,
        area,
        hull_area,
        vertices: approx.len(),
    })
}

/// Applies the shape filters in order and scores the survivor.
pub fn evaluate_shape(
    shape: &ContourShape,
    image_width: i32,
    image_height: i32,
    regions: &[SearchRegion],
    config: &CandidateConfig,
) -> Option<PlateCandidate> {
    if shape.area < config.min_area {
        return None;
    }

    let bbox = shape.bbox;
    if !regions.iter().any(|region| region.contains(&bbox)) {
        return None;
    }

    let (w, h) = (bbox.width() as f64, bbox.height() as f64);
    let aspect_ratio = w / h;
    if !(config.min_aspect_ratio..=config.max_aspect_ratio).contains(&aspect_ratio) {
        return None;
    }

    let max_width = image_width as f64 * config.max_width_fraction;
    let max_height = image_height as f64 * config.max_height_fraction;
    if w < config.min_width as f64 || w > max_width || h < config.min_height as f64 || h > max_height
    {
        return None;
    }

    let solidity = if shape.hull_area > 0.0 {
        shape.area / shape.hull_area
    } else {
        0.0
    };
    if solidity < config.min_solidity {
        return None;
    }

    if !(config.min_vertices..=config.max_vertices).contains(&shape.vertices) {
        return None;
    }

    let rect_area = w * h;
    let extent = if rect_area > 0.0 { shape.area / rect_area } else { 0.0 };
    if extent < config.min_extent {
        return None;
    }

    let score = score_candidate(
        &bbox,
        aspect_ratio,
        solidity,
        extent,
        image_width,
        image_height,
        config,
    );

    Some(PlateCandidate {
        bbox,
        area: shape.area,
        aspect_ratio,
        solidity,
        extent,
        score,
    })
}

/// Product of the five sub-scores; one weak dimension sinks the candidate.
pub fn score_candidate(
    bbox: &BoundingBox,
    aspect_ratio: f64,
    solidity: f64,
    extent: f64,
    image_width: i32,
    image_height: i32,
    config: &CandidateConfig,
) -> f64 {
    let [ideal_min, ideal_max] = config.ideal_aspect_range;
    let aspect_score = if (ideal_min..=ideal_max).contains(&aspect_ratio) {
        1.0
    } else {
        config.off_ideal_aspect_score
    };

    let image_area = image_width as f64 * image_height as f64;
    let reference = image_area * config.size_reference_fraction;
    let size_score = if reference > 0.0 {
        (bbox.area() as f64 / reference).min(1.0)
    } else {
        0.0
    };

    let position_score = if bbox.y1 as f64 > image_height as f64 * config.position_min_fraction {
        1.0
    } else {
        config.high_position_score
    };

    let solidity_score = (solidity * config.solidity_weight).min(1.0);
    let extent_score = (extent * config.extent_weight).min(1.0);

    aspect_score * size_score * position_score * solidity_score * extent_score
}

/// Stable sort by descending score, then truncate. Equal scores keep
/// contour order.
pub fn rank_candidates(candidates: &mut Vec<PlateCandidate>, keep: usize) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(keep);
}
