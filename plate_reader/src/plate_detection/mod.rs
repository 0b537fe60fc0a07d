pub mod bounding_box_render;
pub mod candidate_extractor;
pub mod object_detector;
pub mod ocr;
pub mod plate_reader;
pub mod plate_selector;
pub mod region_validator;

use opencv::core::Rect;
use opencv::imgproc::cvt_color;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::COLOR_BGRA2GRAY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use serde::Serialize;

use crate::error::{PlateError, Result};

/// Axis-aligned box in pixel coordinates, `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn from_rect(rect: Rect) -> Option<Self> {
        Self::new(rect.x, rect.y, rect.x + rect.width, rect.y + rect.height)
    }

    /// Clips the box to a `width` x `height` image; `None` if nothing is left.
    pub fn clamped(self, width: i32, height: i32) -> Option<Self> {
        Self::new(
            self.x1.clamp(0, width),
            self.y1.clamp(0, height),
            self.x2.clamp(0, width),
            self.y2.clamp(0, height),
        )
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x1, self.y1, self.width(), self.height())
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }
}

/// Area of the photograph where a plate may be looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchRegion {
    pub bounds: BoundingBox,
}

impl SearchRegion {
    pub fn new(bounds: BoundingBox) -> Self {
        Self { bounds }
    }

    pub fn whole_image(width: i32, height: i32) -> Option<Self> {
        BoundingBox::new(0, 0, width, height).map(Self::new)
    }

    pub fn contains(&self, bbox: &BoundingBox) -> bool {
        self.bounds.contains(bbox)
    }
}

/// A scored rectangle that passed every shape filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateCandidate {
    pub bbox: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f64,
    pub solidity: f64,
    pub extent: f64,
    pub score: f64,
}

/// Result of a plate read: the normalized text, or `Unknown` when nothing
/// readable was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlateText {
    Plate(String),
    Unknown,
}

impl PlateText {
    pub fn as_plate(&self) -> Option<&str> {
        match self {
            PlateText::Plate(text) => Some(text),
            PlateText::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PlateText::Unknown)
    }
}

/// Why a read ended in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailure {
    NoCandidate,
    NoValidatedRegion,
    OcrEmpty,
}

impl ExtractionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionFailure::NoCandidate => "no_candidate",
            ExtractionFailure::NoValidatedRegion => "no_validated_region",
            ExtractionFailure::OcrEmpty => "ocr_empty",
        }
    }
}

/// Everything one pass of the reader found out about an image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateReading {
    pub text: PlateText,
    /// Padded plate crop that was read, if a region was selected.
    pub plate_box: Option<BoundingBox>,
    pub failure: Option<ExtractionFailure>,
    pub vehicles: usize,
    pub candidates: usize,
}

pub(crate) fn to_gray(image: &Mat) -> Result<Mat> {
    if image.empty() {
        return Err(PlateError::EmptyImage);
    }
    let mut gray = Mat::default();
    match image.channels() {
        1 => gray = image.try_clone()?,
        4 => cvt_color(image, &mut gray, COLOR_BGRA2GRAY, 0)?,
        _ => cvt_color(image, &mut gray, COLOR_BGR2GRAY, 0)?,
    }
    Ok(gray)
}
