use std::sync::Mutex;

use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::CV_32F;
use opencv::dnn::blob_from_image;
use opencv::dnn::nms_boxes;
use opencv::dnn::read_net_from_darknet;
use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;
use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;
use serde::Serialize;
use tracing::{debug, info};

use super::{BoundingBox, SearchRegion};
use crate::config::DetectorConfig;
use crate::error::{PlateError, Result};

/// COCO class ids kept as vehicles.
pub const VEHICLE_CLASSES: [(usize, &str); 5] = [
    (1, "bicycle"),
    (2, "car"),
    (3, "motorbike"),
    (5, "bus"),
    (7, "truck"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDetection {
    pub bbox: BoundingBox,
    pub class_label: &'static str,
    pub confidence: f32,
}

/// Upstream detector whose boxes narrow the plate search.
pub trait VehicleDetector: Send + Sync {
    fn detect(&self, image: &Mat) -> Result<Vec<VehicleDetection>>;
}

/// YOLOv3 darknet model run through OpenCV's DNN module.
pub struct YoloVehicleDetector {
    classifier: Mutex<Net>,
    input_size: i32,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl YoloVehicleDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let cfg = config.model_cfg.to_string_lossy();
        let weights = config.model_weights.to_string_lossy();
        let mut classifier = read_net_from_darknet(&cfg, &weights)?;

        if config.use_gpu {
            classifier.set_preferable_backend(DNN_BACKEND_CUDA)?;
            classifier.set_preferable_target(DNN_TARGET_CUDA)?;
        } else {
            classifier.set_preferable_backend(DNN_BACKEND_OPENCV)?;
            classifier.set_preferable_target(DNN_TARGET_CPU)?;
        }
        info!("loaded vehicle detector {}", cfg);

        Ok(Self {
            classifier: Mutex::new(classifier),
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
        })
    }

    fn post_process(
        &self,
        img_rows: i32,
        img_cols: i32,
        outputs: &Vector<Mat>,
    ) -> Result<Vec<VehicleDetection>> {
        let mut confidences = Vector::<f32>::new();
        let mut boxes = Vector::<Rect>::new();
        let mut labels = Vec::new();

        for data in outputs.iter() {
            for j in 0..data.rows() {
                let row = data.at_row::<f32>(j)?;
                if row.len() <= 5 {
                    continue;
                }
                let (class_id, confidence) = match best_class(&row[5..]) {
                    Some(best) => best,
                    None => continue,
                };
                let label = match vehicle_label(class_id) {
                    Some(label) => label,
                    None => continue,
                };
                if confidence <= self.confidence_threshold {
                    continue;
                }

                let center_x = row[0] * img_cols as f32;
                let center_y = row[1] * img_rows as f32;
                let width = row[2] * img_cols as f32;
                let height = row[3] * img_rows as f32;
                let left = (center_x - width / 2.0) as i32;
                let top = (center_y - height / 2.0) as i32;

                confidences.push(confidence);
                boxes.push(Rect::new(left, top, width as i32, height as i32));
                labels.push(label);
            }
        }

        let mut indices = Vector::<i32>::new();
        nms_boxes(
            &boxes,
            &confidences,
            self.confidence_threshold,
            self.nms_threshold,
            &mut indices,
            1.0,
            0,
        )?;

        let mut detections = Vec::new();
        for i in indices {
            let i = i as usize;
            let rect = boxes.get(i)?;
            let bbox = match BoundingBox::from_rect(rect).and_then(|b| b.clamped(img_cols, img_rows))
            {
                Some(bbox) => bbox,
                None => continue,
            };
            detections.push(VehicleDetection {
                bbox,
                class_label: labels[i],
                confidence: confidences.get(i)?,
            });
        }
        Ok(detections)
    }
}

// Net is only touched behind its lock.
unsafe impl Send for YoloVehicleDetector {}
unsafe impl Sync for YoloVehicleDetector {}

impl VehicleDetector for YoloVehicleDetector {
    fn detect(&self, image: &Mat) -> Result<Vec<VehicleDetection>> {
        let mut blob = blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        let mut classifier = self
            .classifier
            .lock()
            .map_err(|_| PlateError::EnginePoisoned)?;
        classifier.set_input(&mut blob, "", 1.0, Scalar::default())?;
        let output_names = classifier.get_unconnected_out_layers_names()?;
        let mut output_values = Vector::<Mat>::new();
        classifier.forward(&mut output_values, &output_names)?;
        drop(classifier);

        let detections = self.post_process(image.rows(), image.cols(), &output_values)?;
        debug!("{} vehicles detected", detections.len());
        Ok(detections)
    }
}

/// Index and score of the highest class score; first wins ties.
pub fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((i, score)),
        })
}

pub fn vehicle_label(class_id: usize) -> Option<&'static str> {
    VEHICLE_CLASSES
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, label)| *label)
}

/// Lower band of each vehicle, widened sideways, where its plate sits.
pub fn search_regions(
    vehicles: &[VehicleDetection],
    width: i32,
    height: i32,
    config: &DetectorConfig,
) -> Vec<SearchRegion> {
    vehicles
        .iter()
        .filter_map(|vehicle| {
            let b = vehicle.bbox;
            let (vw, vh) = (b.width(), b.height());
            let margin = (vw as f64 * config.region_side_margin) as i32;
            let top = b.y1.max((b.y2 as f64 - config.region_lower_fraction * vh as f64) as i32);
            BoundingBox::new(
                (b.x1 - margin).max(0),
                top,
                (b.x2 + margin).min(width),
                (b.y2 + config.region_bottom_extension).min(height),
            )
            .map(SearchRegion::new)
        })
        .collect()
}
