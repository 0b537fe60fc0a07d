#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use opencv::core::{Rect, Scalar, CV_8UC3};
use opencv::imgproc::{rectangle, FILLED, LINE_8};
use opencv::prelude::Mat;
use plate_reader::plate_detection::ocr::{
    FallbackOcr, OcrToken, PageSegMode, PrimaryOcr, TextDetection,
};
use plate_reader::Result;

/// Where the white plate sits in `plate_scene`.
pub const PLATE: (i32, i32, i32, i32) = (200, 300, 240, 60);

/// Dark 640x480 scene with a white plate carrying fifteen character strokes.
pub fn plate_scene() -> Mat {
    let mut image = Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(40.0)).unwrap();
    let (x, y, w, h) = PLATE;
    rectangle(
        &mut image,
        Rect::new(x, y, w, h),
        Scalar::all(255.0),
        FILLED,
        LINE_8,
        0,
    )
    .unwrap();
    for i in 0..15 {
        let stroke = Rect::new(245 + i * 10, 315, 6, 30);
        rectangle(&mut image, stroke, Scalar::all(0.0), FILLED, LINE_8, 0).unwrap();
    }
    image
}

pub fn uniform_scene() -> Mat {
    Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(127.0)).unwrap()
}

/// Primary engine answering every trial with the same words.
pub struct FixedPrimary {
    pub words: Vec<(String, f32)>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedPrimary {
    pub fn new(words: &[(&str, f32)]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = Self {
            words: words.iter().map(|(t, c)| (t.to_string(), *c)).collect(),
            calls: calls.clone(),
        };
        (engine, calls)
    }
}

impl PrimaryOcr for FixedPrimary {
    fn name(&self) -> &'static str {
        "fixed_primary"
    }

    fn recognize(&mut self, _image: &Mat, _mode: PageSegMode) -> Result<Vec<OcrToken>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .words
            .iter()
            .map(|(text, confidence)| OcrToken {
                text: text.clone(),
                confidence: *confidence,
            })
            .collect())
    }
}

/// Primary engine whose answer depends on the trial number.
pub struct CountingPrimary {
    pub next: usize,
    pub answer: fn(usize) -> Vec<OcrToken>,
}

impl PrimaryOcr for CountingPrimary {
    fn name(&self) -> &'static str {
        "counting_primary"
    }

    fn recognize(&mut self, _image: &Mat, _mode: PageSegMode) -> Result<Vec<OcrToken>> {
        let trial = self.next;
        self.next += 1;
        Ok((self.answer)(trial))
    }
}

pub struct FixedFallback {
    pub detections: Vec<TextDetection>,
}

impl FallbackOcr for FixedFallback {
    fn name(&self) -> &'static str {
        "fixed_fallback"
    }

    fn recognize(&mut self, _image: &Mat, _allowlist: &str) -> Result<Vec<TextDetection>> {
        Ok(self.detections.clone())
    }
}
