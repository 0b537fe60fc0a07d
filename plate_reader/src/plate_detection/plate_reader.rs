//! End-to-end plate reading: vehicle hinting, candidate search, validation,
//! selection and OCR.

use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use tracing::{debug, info, warn};

use super::candidate_extractor::extract_candidates;
use super::object_detector::{search_regions, VehicleDetector, YoloVehicleDetector};
use super::ocr::{extract_text, OcrCapability, OcrEngines};
use super::plate_selector::select_plate;
use super::{ExtractionFailure, PlateReading, PlateText, SearchRegion};
use crate::config::ReaderConfig;
use crate::metrics::{EXTRACTION_DURATION, PLATE_EXTRACTIONS, PLATE_FAILURES};

/// Loaded models plus configuration. Shared read-only between threads.
pub struct PlateReader {
    config: ReaderConfig,
    detector: Option<Box<dyn VehicleDetector>>,
    engines: OcrEngines,
}

impl PlateReader {
    pub fn new(
        config: ReaderConfig,
        detector: Option<Box<dyn VehicleDetector>>,
        engines: OcrEngines,
    ) -> Self {
        Self {
            config,
            detector,
            engines,
        }
    }

    /// Loads every model the configuration names. A model that fails to
    /// load is logged and left out; the reader then runs degraded.
    pub fn from_config(config: ReaderConfig) -> Self {
        let detector: Option<Box<dyn VehicleDetector>> = if config.detector.enabled {
            match YoloVehicleDetector::new(&config.detector) {
                Ok(detector) => Some(Box::new(detector)),
                Err(e) => {
                    warn!("vehicle detector unavailable, searching whole images: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let engines = OcrEngines::load(&config.ocr, &config.fallback);
        Self::new(config, detector, engines)
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn capability(&self) -> OcrCapability {
        self.engines.capability()
    }

    /// The plate text of `image`, or `Unknown`.
    pub fn extract_plate_text(&self, image: &Mat) -> PlateText {
        self.read(image).text
    }

    /// Runs the whole pipeline. Never fails; every error along the way is
    /// logged and turns into a degraded search or an `Unknown` result.
    pub fn read(&self, image: &Mat) -> PlateReading {
        let _timer = EXTRACTION_DURATION.start_timer();
        let reading = self.read_inner(image);

        match &reading.text {
            PlateText::Plate(text) => {
                PLATE_EXTRACTIONS.with_label_values(&["plate"]).inc();
                info!("read plate {}", text);
            }
            PlateText::Unknown => {
                PLATE_EXTRACTIONS.with_label_values(&["unknown"]).inc();
            }
        }
        if let Some(failure) = reading.failure {
            PLATE_FAILURES.with_label_values(&[failure.as_str()]).inc();
            info!("no plate read: {}", failure.as_str());
        }
        reading
    }

    fn read_inner(&self, image: &Mat) -> PlateReading {
        let mut reading = PlateReading {
            text: PlateText::Unknown,
            plate_box: None,
            failure: Some(ExtractionFailure::NoCandidate),
            vehicles: 0,
            candidates: 0,
        };
        if image.empty() {
            warn!("empty image");
            return reading;
        }

        let regions = self.vehicle_regions(image, &mut reading);

        let candidates = match extract_candidates(image, &regions, &self.config.candidates) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("candidate extraction failed: {}", e);
                Vec::new()
            }
        };
        reading.candidates = candidates.len();
        if candidates.is_empty() {
            return self.read_full_image(image, reading);
        }

        let selected = match select_plate(
            image,
            &candidates,
            &self.config.selector,
            &self.config.validator,
        ) {
            Ok(selected) => selected,
            Err(e) => {
                warn!("plate selection failed: {}", e);
                None
            }
        };
        let selected = match selected {
            Some(selected) => selected,
            None => {
                reading.failure = Some(ExtractionFailure::NoValidatedRegion);
                return self.read_full_image(image, reading);
            }
        };

        reading.plate_box = Some(selected.padded);
        reading.text = extract_text(
            &self.engines,
            &selected.crop,
            &self.config.ocr,
            &self.config.fallback,
        );
        reading.failure = if reading.text.is_unknown() {
            Some(ExtractionFailure::OcrEmpty)
        } else {
            None
        };
        reading
    }

    fn vehicle_regions(&self, image: &Mat, reading: &mut PlateReading) -> Vec<SearchRegion> {
        let detector = match &self.detector {
            Some(detector) => detector,
            None => return Vec::new(),
        };
        match detector.detect(image) {
            Ok(vehicles) => {
                reading.vehicles = vehicles.len();
                let regions = search_regions(
                    &vehicles,
                    image.cols(),
                    image.rows(),
                    &self.config.detector,
                );
                debug!("{} vehicles give {} search regions", vehicles.len(), regions.len());
                regions
            }
            Err(e) => {
                warn!("vehicle detection failed, searching whole image: {}", e);
                Vec::new()
            }
        }
    }

    /// OCR over the whole photograph when no plate region was found, if
    /// enabled. Otherwise the reading is returned as it is.
    fn read_full_image(&self, image: &Mat, mut reading: PlateReading) -> PlateReading {
        if !self.config.ocr_full_image_when_no_plate {
            return reading;
        }
        debug!("no plate region, trying OCR on the full image");
        reading.text = extract_text(&self.engines, image, &self.config.ocr, &self.config.fallback);
        reading.failure = if reading.text.is_unknown() {
            Some(ExtractionFailure::OcrEmpty)
        } else {
            None
        };
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlateError, Result};
    use crate::plate_detection::object_detector::VehicleDetection;
    use crate::plate_detection::BoundingBox;
    use opencv::core::{Scalar, CV_8UC3};

    struct FailingDetector;

    impl VehicleDetector for FailingDetector {
        fn detect(&self, _image: &Mat) -> Result<Vec<VehicleDetection>> {
            Err(PlateError::EmptyImage)
        }
    }

    struct OneCar;

    impl VehicleDetector for OneCar {
        fn detect(&self, _image: &Mat) -> Result<Vec<VehicleDetection>> {
            Ok(vec![VehicleDetection {
                bbox: BoundingBox::new(10, 10, 200, 150).unwrap(),
                class_label: "car",
                confidence: 0.8,
            }])
        }
    }

    fn uniform() -> Mat {
        Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(127.0)).unwrap()
    }

    #[test]
    fn uniform_image_has_no_candidate() {
        let reader = PlateReader::new(ReaderConfig::default(), None, OcrEngines::unavailable());
        let reading = reader.read(&uniform());
        assert_eq!(reading.text, PlateText::Unknown);
        assert_eq!(reading.failure, Some(ExtractionFailure::NoCandidate));
        assert_eq!(reading.plate_box, None);
    }

    #[test]
    fn empty_image_is_unknown() {
        let reader = PlateReader::new(ReaderConfig::default(), None, OcrEngines::unavailable());
        assert_eq!(reader.extract_plate_text(&Mat::default()), PlateText::Unknown);
    }

    #[test]
    fn detector_failure_degrades_to_whole_image() {
        let reader = PlateReader::new(
            ReaderConfig::default(),
            Some(Box::new(FailingDetector)),
            OcrEngines::unavailable(),
        );
        let reading = reader.read(&uniform());
        assert_eq!(reading.vehicles, 0);
        assert_eq!(reading.failure, Some(ExtractionFailure::NoCandidate));
    }

    #[test]
    fn detections_are_counted() {
        let reader = PlateReader::new(
            ReaderConfig::default(),
            Some(Box::new(OneCar)),
            OcrEngines::unavailable(),
        );
        assert_eq!(reader.read(&uniform()).vehicles, 1);
    }

    #[test]
    fn full_image_mode_reports_empty_ocr() {
        let config = ReaderConfig {
            ocr_full_image_when_no_plate: true,
            ..ReaderConfig::default()
        };
        let reader = PlateReader::new(config, None, OcrEngines::unavailable());
        assert!(reader.config().ocr_full_image_when_no_plate);
        let reading = reader.read(&uniform());
        assert_eq!(reading.text, PlateText::Unknown);
        assert_eq!(reading.failure, Some(ExtractionFailure::OcrEmpty));
    }
}
