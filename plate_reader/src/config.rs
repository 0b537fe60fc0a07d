//! Reader configuration.
//!
//! Every threshold the pipeline uses lives here as a named constant and as a
//! field of one of the section structs, so a TOML file can retune any of them
//! without touching the stages themselves.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{PlateError, Result};
use crate::plate_detection::ocr::PageSegMode;

// Vehicle hinting
pub const VEHICLE_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const VEHICLE_NMS_THRESHOLD: f32 = 0.4;
pub const VEHICLE_INPUT_SIZE: i32 = 416;
pub const REGION_SIDE_MARGIN: f64 = 0.1;
pub const REGION_LOWER_FRACTION: f64 = 0.4;
pub const REGION_BOTTOM_EXTENSION: i32 = 10;

// Edge/contour candidate search
pub const BILATERAL_DIAMETER: i32 = 11;
pub const BILATERAL_SIGMA: f64 = 17.0;
pub const CANNY_THRESHOLDS: [[f64; 2]; 3] = [[30.0, 200.0], [50.0, 150.0], [70.0, 180.0]];
pub const MORPH_KERNEL_SIZE: [i32; 2] = [4, 2];
pub const CLOSE_ITERATIONS: i32 = 3;
pub const OPEN_ITERATIONS: i32 = 1;
pub const MAX_CONTOURS: usize = 100;
pub const MAX_CANDIDATES: usize = 15;
pub const MIN_CONTOUR_AREA: f64 = 300.0;
pub const MIN_ASPECT_RATIO: f64 = 1.5;
pub const MAX_ASPECT_RATIO: f64 = 7.0;
pub const MIN_PLATE_WIDTH: i32 = 50;
pub const MAX_PLATE_WIDTH_FRACTION: f64 = 0.95;
pub const MIN_PLATE_HEIGHT: i32 = 12;
pub const MAX_PLATE_HEIGHT_FRACTION: f64 = 0.8;
pub const MIN_SOLIDITY: f64 = 0.5;
pub const APPROX_EPSILON_FRACTION: f64 = 0.06;
pub const MIN_VERTICES: usize = 4;
pub const MAX_VERTICES: usize = 12;
pub const MIN_EXTENT: f64 = 0.4;
pub const IDEAL_ASPECT_RANGE: [f64; 2] = [2.5, 5.5];
pub const OFF_IDEAL_ASPECT_SCORE: f64 = 0.7;
pub const SIZE_REFERENCE_FRACTION: f64 = 0.1;
pub const POSITION_MIN_FRACTION: f64 = 0.15;
pub const HIGH_POSITION_SCORE: f64 = 0.6;
pub const SOLIDITY_WEIGHT: f64 = 2.0;
pub const EXTENT_WEIGHT: f64 = 2.5;

// Region validation
pub const MIN_CONTRAST_RATIO: f64 = 0.3;
pub const MIN_ROW_TRANSITIONS: usize = 2;
pub const MAX_ROW_TRANSITIONS: usize = 8;
pub const MIN_COLUMN_TRANSITIONS: usize = 6;

// Plate selection padding
pub const MIN_PAD_X: i32 = 10;
pub const PAD_X_FRACTION: f64 = 0.2;
pub const MIN_PAD_Y: i32 = 8;
pub const PAD_Y_FRACTION: f64 = 0.25;

// OCR fusion
pub const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CONTRAST_FACTOR: f64 = 2.0;
pub const OCR_MIN_WIDTH: i32 = 200;
pub const BLUR_KERNEL: i32 = 3;
pub const ADAPTIVE_BLOCK_SIZE: i32 = 11;
pub const ADAPTIVE_C: f64 = 2.0;
pub const CLAHE_CLIP_LIMIT: f64 = 3.0;
pub const CLAHE_TILE_GRID: i32 = 8;
pub const MIN_TOKEN_CHARS: usize = 3;
pub const MIN_TOKEN_CONFIDENCE: f32 = 30.0;
pub const MIN_PLATE_CHARS: usize = 6;
pub const FULL_PATTERN_BONUS: f64 = 100.0;
pub const PARTIAL_PATTERN_BONUS: f64 = 50.0;
pub const PREFIX_PATTERN_BONUS: f64 = 25.0;
pub const BALANCE_BONUS: f64 = 20.0;
pub const BALANCE_MIN_RATIO: f64 = 0.3;
pub const TRIAL_DEADLINE_MS: u64 = 30_000;
pub const OCR_ENGINE_INSTANCES: usize = 1;

// Fallback recognizer
pub const FALLBACK_MIN_CONFIDENCE: f32 = 0.3;
pub const FALLBACK_INPUT_WIDTH: i32 = 200;
pub const FALLBACK_INPUT_HEIGHT: i32 = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub detector: DetectorConfig,
    pub candidates: CandidateConfig,
    pub validator: ValidatorConfig,
    pub selector: SelectorConfig,
    pub ocr: OcrConfig,
    pub fallback: FallbackConfig,
    /// Run OCR over the whole photograph when no plate region is selected.
    pub ocr_full_image_when_no_plate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub enabled: bool,
    pub model_cfg: PathBuf,
    pub model_weights: PathBuf,
    pub use_gpu: bool,
    pub input_size: i32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Horizontal growth of a vehicle box on each side, as a fraction of its width.
    pub region_side_margin: f64,
    /// Lower share of the vehicle box searched for a plate.
    pub region_lower_fraction: f64,
    /// Pixels added below the vehicle box.
    pub region_bottom_extension: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_cfg: PathBuf::from("models/yolov3.cfg"),
            model_weights: PathBuf::from("models/yolov3.weights"),
            use_gpu: false,
            input_size: VEHICLE_INPUT_SIZE,
            confidence_threshold: VEHICLE_CONFIDENCE_THRESHOLD,
            nms_threshold: VEHICLE_NMS_THRESHOLD,
            region_side_margin: REGION_SIDE_MARGIN,
            region_lower_fraction: REGION_LOWER_FRACTION,
            region_bottom_extension: REGION_BOTTOM_EXTENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    pub bilateral_diameter: i32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
    pub canny_thresholds: Vec<[f64; 2]>,
    pub morph_kernel_size: [i32; 2],
    pub close_iterations: i32,
    pub open_iterations: i32,
    pub max_contours: usize,
    pub max_candidates: usize,
    pub min_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub min_width: i32,
    pub max_width_fraction: f64,
    pub min_height: i32,
    pub max_height_fraction: f64,
    pub min_solidity: f64,
    pub approx_epsilon_fraction: f64,
    pub min_vertices: usize,
    pub max_vertices: usize,
    pub min_extent: f64,
    pub ideal_aspect_range: [f64; 2],
    pub off_ideal_aspect_score: f64,
    pub size_reference_fraction: f64,
    pub position_min_fraction: f64,
    pub high_position_score: f64,
    pub solidity_weight: f64,
    pub extent_weight: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            bilateral_diameter: BILATERAL_DIAMETER,
            bilateral_sigma_color: BILATERAL_SIGMA,
            bilateral_sigma_space: BILATERAL_SIGMA,
            canny_thresholds: CANNY_THRESHOLDS.to_vec(),
            morph_kernel_size: MORPH_KERNEL_SIZE,
            close_iterations: CLOSE_ITERATIONS,
            open_iterations: OPEN_ITERATIONS,
            max_contours: MAX_CONTOURS,
            max_candidates: MAX_CANDIDATES,
            min_area: MIN_CONTOUR_AREA,
            min_aspect_ratio: MIN_ASPECT_RATIO,
            max_aspect_ratio: MAX_ASPECT_RATIO,
            min_width: MIN_PLATE_WIDTH,
            max_width_fraction: MAX_PLATE_WIDTH_FRACTION,
            min_height: MIN_PLATE_HEIGHT,
            max_height_fraction: MAX_PLATE_HEIGHT_FRACTION,
            min_solidity: MIN_SOLIDITY,
            approx_epsilon_fraction: APPROX_EPSILON_FRACTION,
            min_vertices: MIN_VERTICES,
            max_vertices: MAX_VERTICES,
            min_extent: MIN_EXTENT,
            ideal_aspect_range: IDEAL_ASPECT_RANGE,
            off_ideal_aspect_score: OFF_IDEAL_ASPECT_SCORE,
            size_reference_fraction: SIZE_REFERENCE_FRACTION,
            position_min_fraction: POSITION_MIN_FRACTION,
            high_position_score: HIGH_POSITION_SCORE,
            solidity_weight: SOLIDITY_WEIGHT,
            extent_weight: EXTENT_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub min_contrast_ratio: f64,
    pub min_row_transitions: usize,
    pub max_row_transitions: usize,
    pub min_column_transitions: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_contrast_ratio: MIN_CONTRAST_RATIO,
            min_row_transitions: MIN_ROW_TRANSITIONS,
            max_row_transitions: MAX_ROW_TRANSITIONS,
            min_column_transitions: MIN_COLUMN_TRANSITIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub min_pad_x: i32,
    pub pad_x_fraction: f64,
    pub min_pad_y: i32,
    pub pad_y_fraction: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_pad_x: MIN_PAD_X,
            pad_x_fraction: PAD_X_FRACTION,
            min_pad_y: MIN_PAD_Y,
            pad_y_fraction: PAD_Y_FRACTION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Directory holding `<language>.traineddata`; `None` uses the Tesseract default.
    pub tessdata_path: Option<String>,
    pub language: String,
    pub whitelist: String,
    pub contrast_factor: f64,
    pub min_width: i32,
    pub blur_kernel: i32,
    pub adaptive_block_size: i32,
    pub adaptive_c: f64,
    pub clahe_clip_limit: f64,
    pub clahe_tile_grid: i32,
    pub page_seg_modes: Vec<PageSegMode>,
    pub min_token_chars: usize,
    pub min_token_confidence: f32,
    pub min_plate_chars: usize,
    pub full_pattern_bonus: f64,
    pub partial_pattern_bonus: f64,
    pub prefix_pattern_bonus: f64,
    pub balance_bonus: f64,
    pub balance_min_ratio: f64,
    /// Upper bound on the variant x page-mode loop for one request.
    /// `None` or `0` means unbounded.
    pub trial_deadline_ms: Option<u64>,
    /// Tesseract handles loaded side by side; concurrent reads each take a
    /// free one.
    pub engine_instances: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tessdata_path: None,
            language: "eng".to_string(),
            whitelist: PLATE_ALPHABET.to_string(),
            contrast_factor: CONTRAST_FACTOR,
            min_width: OCR_MIN_WIDTH,
            blur_kernel: BLUR_KERNEL,
            adaptive_block_size: ADAPTIVE_BLOCK_SIZE,
            adaptive_c: ADAPTIVE_C,
            clahe_clip_limit: CLAHE_CLIP_LIMIT,
            clahe_tile_grid: CLAHE_TILE_GRID,
            page_seg_modes: PageSegMode::PLATE_ORDER.to_vec(),
            min_token_chars: MIN_TOKEN_CHARS,
            min_token_confidence: MIN_TOKEN_CONFIDENCE,
            min_plate_chars: MIN_PLATE_CHARS,
            full_pattern_bonus: FULL_PATTERN_BONUS,
            partial_pattern_bonus: PARTIAL_PATTERN_BONUS,
            prefix_pattern_bonus: PREFIX_PATTERN_BONUS,
            balance_bonus: BALANCE_BONUS,
            balance_min_ratio: BALANCE_MIN_RATIO,
            trial_deadline_ms: Some(TRIAL_DEADLINE_MS),
            engine_instances: OCR_ENGINE_INSTANCES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// ONNX CRNN recognizer. No path means no fallback engine.
    pub model_path: Option<PathBuf>,
    /// Load the fallback even when Tesseract is available.
    pub load_with_primary: bool,
    pub input_width: i32,
    pub input_height: i32,
    /// Output classes after the CTC blank, in model order.
    pub char_vocab: String,
    pub min_confidence: f32,
    pub intra_threads: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            load_with_primary: false,
            input_width: FALLBACK_INPUT_WIDTH,
            input_height: FALLBACK_INPUT_HEIGHT,
            char_vocab: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string(),
            min_confidence: FALLBACK_MIN_CONFIDENCE,
            intra_threads: 1,
        }
    }
}

impl ReaderConfig {
    /// Reads a TOML file. Missing sections and keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: ReaderConfig = toml::from_str(&text)
            .map_err(|e| PlateError::Config(format!("{}: {}", path.display(), e)))?;
        if config.ocr.trial_deadline_ms == Some(0) {
            config.ocr.trial_deadline_ms = None;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overlays `PLATE_READER_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(path) = env::var("PLATE_READER_TESSDATA") {
            self.ocr.tessdata_path = Some(path);
        }
        if let Ok(language) = env::var("PLATE_READER_LANG") {
            self.ocr.language = language;
        }
        if let Ok(path) = env::var("PLATE_READER_YOLO_CFG") {
            self.detector.model_cfg = PathBuf::from(path);
        }
        if let Ok(path) = env::var("PLATE_READER_YOLO_WEIGHTS") {
            self.detector.model_weights = PathBuf::from(path);
        }
        if let Ok(path) = env::var("PLATE_READER_FALLBACK_MODEL") {
            self.fallback.model_path = Some(PathBuf::from(path));
        }
        if let Ok(ms) = env::var("PLATE_READER_DEADLINE_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|e| PlateError::Config(format!("PLATE_READER_DEADLINE_MS: {}", e)))?;
            self.ocr.trial_deadline_ms = if ms == 0 { None } else { Some(ms) };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.candidates;
        if c.canny_thresholds.is_empty() {
            return Err(PlateError::Config("candidates.canny_thresholds is empty".into()));
        }
        if c.min_aspect_ratio > c.max_aspect_ratio {
            return Err(PlateError::Config(format!(
                "candidates.min_aspect_ratio {} exceeds max_aspect_ratio {}",
                c.min_aspect_ratio, c.max_aspect_ratio
            )));
        }
        if c.min_vertices > c.max_vertices {
            return Err(PlateError::Config(
                "candidates.min_vertices exceeds max_vertices".into(),
            ));
        }
        if c.morph_kernel_size.iter().any(|&s| s < 1) {
            return Err(PlateError::Config("candidates.morph_kernel_size must be positive".into()));
        }

        let o = &self.ocr;
        if o.page_seg_modes.is_empty() {
            return Err(PlateError::Config("ocr.page_seg_modes is empty".into()));
        }
        if o.blur_kernel < 1 || o.blur_kernel % 2 == 0 {
            return Err(PlateError::Config("ocr.blur_kernel must be odd".into()));
        }
        if o.adaptive_block_size < 3 || o.adaptive_block_size % 2 == 0 {
            return Err(PlateError::Config(
                "ocr.adaptive_block_size must be odd and at least 3".into(),
            ));
        }
        if o.engine_instances < 1 {
            return Err(PlateError::Config("ocr.engine_instances must be at least 1".into()));
        }
        if o.clahe_tile_grid < 1 {
            return Err(PlateError::Config("ocr.clahe_tile_grid must be positive".into()));
        }

        let f = &self.fallback;
        if f.input_width < 1 || f.input_height < 1 {
            return Err(PlateError::Config("fallback input size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_carry_the_tuned_constants() {
        let config = ReaderConfig::default();
        assert_eq!(config.candidates.min_aspect_ratio, 1.5);
        assert_eq!(config.candidates.max_aspect_ratio, 7.0);
        assert_eq!(config.candidates.min_area, 300.0);
        assert_eq!(config.candidates.max_candidates, 15);
        assert_eq!(config.candidates.canny_thresholds.len(), 3);
        assert_eq!(config.validator.max_row_transitions, 8);
        assert_eq!(config.selector.min_pad_y, 8);
        assert_eq!(config.ocr.page_seg_modes.len(), 5);
        assert_eq!(config.ocr.whitelist.len(), 36);
        assert!(!config.ocr_full_image_when_no_plate);
        assert!(config.fallback.model_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
ocr_full_image_when_no_plate = true

[candidates]
min_area = 500.0

[ocr]
page_seg_modes = ["single_line", "fully_automatic"]
trial_deadline_ms = 1000
"#
        )
        .expect("write config");

        let config = ReaderConfig::load(file.path()).expect("config loads");
        assert!(config.ocr_full_image_when_no_plate);
        assert_eq!(config.candidates.min_area, 500.0);
        assert_eq!(config.candidates.min_solidity, MIN_SOLIDITY);
        assert_eq!(
            config.ocr.page_seg_modes,
            vec![PageSegMode::SingleLine, PageSegMode::FullyAutomatic]
        );
        assert_eq!(config.ocr.trial_deadline_ms, Some(1000));
        assert_eq!(config.ocr.language, "eng");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = ReaderConfig::default();
        config.candidates.min_aspect_ratio = 8.0;
        assert!(matches!(config.validate(), Err(PlateError::Config(_))));

        let mut config = ReaderConfig::default();
        config.ocr.adaptive_block_size = 10;
        assert!(config.validate().is_err());

        let mut config = ReaderConfig::default();
        config.ocr.page_seg_modes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_deadline_means_unbounded_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[ocr]\ntrial_deadline_ms = 0").expect("write config");

        let config = ReaderConfig::load(file.path()).expect("config loads");
        assert_eq!(config.ocr.trial_deadline_ms, None);
    }

    #[test]
    fn engine_pool_needs_one_instance() {
        let mut config = ReaderConfig::default();
        assert_eq!(config.ocr.engine_instances, 1);
        config.ocr.engine_instances = 0;
        assert!(matches!(config.validate(), Err(PlateError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[candidates\nmin_area = ").expect("write config");
        assert!(matches!(
            ReaderConfig::load(file.path()),
            Err(PlateError::Config(_))
        ));
    }
}
