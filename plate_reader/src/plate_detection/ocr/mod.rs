//! Multi-engine OCR over a plate crop.
//!
//! The primary engine is run over every enhancement variant and page
//! segmentation mode; each trial is scored and the best one kept. When the
//! primary engine is missing or reads nothing usable, the fallback engine
//! gets one pass over the crop.

pub mod crnn_ocr;
pub mod scoring;
pub mod tess_ocr;
pub mod variants;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use opencv::prelude::Mat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::crnn_ocr::CrnnOcr;
use self::scoring::{observe, pick_fallback, BestObservation, OcrObservation};
use self::tess_ocr::TessOcr;
use self::variants::build_variants;
use super::PlateText;
use crate::config::{FallbackConfig, OcrConfig};
use crate::error::{PlateError, Result};
use crate::metrics::OCR_TRIALS;

/// Tesseract page segmentation modes tried on a plate crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    SingleWord,
    SingleLine,
    RawLine,
    UniformBlock,
    FullyAutomatic,
}

impl PageSegMode {
    pub const PLATE_ORDER: [PageSegMode; 5] = [
        PageSegMode::SingleWord,
        PageSegMode::SingleLine,
        PageSegMode::RawLine,
        PageSegMode::UniformBlock,
        PageSegMode::FullyAutomatic,
    ];

    pub fn code(self) -> i32 {
        match self {
            PageSegMode::SingleWord => 8,
            PageSegMode::SingleLine => 7,
            PageSegMode::RawLine => 13,
            PageSegMode::UniformBlock => 6,
            PageSegMode::FullyAutomatic => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VariantKind {
    Otsu,
    AdaptiveGaussian,
    ClaheOtsu,
    Enhanced,
}

/// One word reported by the primary engine, confidence in `0..=100`.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub text: String,
    pub confidence: f32,
}

/// One reading reported by the fallback engine, confidence in `0..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDetection {
    pub text: String,
    pub confidence: f32,
}

/// Token-level recognizer configured per call with a page segmentation mode.
pub trait PrimaryOcr: Send {
    fn name(&self) -> &'static str;

    fn recognize(&mut self, image: &Mat, mode: PageSegMode) -> Result<Vec<OcrToken>>;
}

/// Whole-string recognizer restricted to an allowlist.
pub trait FallbackOcr: Send {
    fn name(&self) -> &'static str;

    fn recognize(&mut self, image: &Mat, allowlist: &str) -> Result<Vec<TextDetection>>;
}

/// What the process can do for OCR, decided once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OcrCapability {
    Unavailable,
    Primary,
    Fallback,
}

/// Engine handles shared by every extraction. Each handle sits behind its
/// own lock because native engines keep per-call scratch state. The primary
/// side is a pool: concurrent reads run in parallel up to its size.
pub struct OcrEngines {
    primary: Vec<Mutex<Box<dyn PrimaryOcr>>>,
    fallback: Option<Mutex<Box<dyn FallbackOcr>>>,
    next_primary: AtomicUsize,
}

type PrimaryGuard<'a> = MutexGuard<'a, Box<dyn PrimaryOcr>>;

impl OcrEngines {
    pub fn with_engines(
        primary: Option<Box<dyn PrimaryOcr>>,
        fallback: Option<Box<dyn FallbackOcr>>,
    ) -> Self {
        Self::with_primary_pool(primary.into_iter().collect(), fallback)
    }

    pub fn with_primary_pool(
        primary: Vec<Box<dyn PrimaryOcr>>,
        fallback: Option<Box<dyn FallbackOcr>>,
    ) -> Self {
        Self {
            primary: primary.into_iter().map(Mutex::new).collect(),
            fallback: fallback.map(Mutex::new),
            next_primary: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self::with_engines(None, None)
    }

    /// Starts `engine_instances` Tesseract handles, and the ONNX recognizer
    /// when Tesseract is missing or `load_with_primary` asks for both.
    /// Engines that fail to start are logged and left out.
    pub fn load(ocr: &OcrConfig, fallback: &FallbackConfig) -> Self {
        let mut primary: Vec<Box<dyn PrimaryOcr>> = Vec::new();
        if ocr.enabled {
            for _ in 0..ocr.engine_instances.max(1) {
                match TessOcr::new(ocr) {
                    Ok(engine) => primary.push(Box::new(engine)),
                    Err(e) => {
                        warn!("tesseract unavailable: {}", e);
                        break;
                    }
                }
            }
        }

        let wants_fallback = primary.is_empty() || fallback.load_with_primary;
        let secondary: Option<Box<dyn FallbackOcr>> = match &fallback.model_path {
            Some(path) if wants_fallback => match CrnnOcr::load(path, fallback) {
                Ok(engine) => Some(Box::new(engine)),
                Err(e) => {
                    warn!("fallback recognizer {} unavailable: {}", path.display(), e);
                    None
                }
            },
            _ => None,
        };

        let engines = Self::with_primary_pool(primary, secondary);
        info!(
            capability = ?engines.capability(),
            primary_instances = engines.primary_instances(),
            "OCR engines ready"
        );
        engines
    }

    pub fn capability(&self) -> OcrCapability {
        match (self.primary.is_empty(), &self.fallback) {
            (false, _) => OcrCapability::Primary,
            (true, Some(_)) => OcrCapability::Fallback,
            (true, None) => OcrCapability::Unavailable,
        }
    }

    pub fn primary_instances(&self) -> usize {
        self.primary.len()
    }

    /// A free primary handle, or a wait on the next one in turn when every
    /// handle is busy. `None` when no primary engine is loaded.
    fn checkout_primary(&self) -> Option<Result<PrimaryGuard<'_>>> {
        if self.primary.is_empty() {
            return None;
        }
        for engine in &self.primary {
            match engine.try_lock() {
                Ok(guard) => return Some(Ok(guard)),
                Err(TryLockError::Poisoned(_)) => return Some(Err(PlateError::EnginePoisoned)),
                Err(TryLockError::WouldBlock) => continue,
            }
        }
        let turn = self.next_primary.fetch_add(1, Ordering::Relaxed) % self.primary.len();
        Some(lock(&self.primary[turn]))
    }
}

/// Reads a plate string from `image`. Never fails: engine errors are
/// logged and end up as `Unknown`.
pub fn extract_text(
    engines: &OcrEngines,
    image: &Mat,
    ocr: &OcrConfig,
    fallback: &FallbackConfig,
) -> PlateText {
    if engines.capability() == OcrCapability::Unavailable {
        warn!("no OCR engine available");
        return PlateText::Unknown;
    }

    if let Some(primary) = engines.checkout_primary() {
        let result = primary.and_then(|mut engine| run_primary(&mut **engine, image, ocr));
        match result {
            Ok(Some(best)) => {
                info!(
                    "plate text {} from {:?}/{:?} scored {:.1}",
                    best.cleaned_text, best.variant, best.mode, best.total_score
                );
                return PlateText::Plate(best.cleaned_text);
            }
            Ok(None) => debug!("primary OCR produced no usable text"),
            Err(e) => warn!("primary OCR failed: {}", e),
        }
    }

    if let Some(secondary) = &engines.fallback {
        let result = lock(secondary)
            .and_then(|mut engine| run_fallback(&mut **engine, image, ocr, fallback));
        match result {
            Ok(Some(text)) => {
                info!("plate text {} from fallback recognizer", text);
                return PlateText::Plate(text);
            }
            Ok(None) => debug!("fallback OCR produced no plate-shaped text"),
            Err(e) => warn!("fallback OCR failed: {}", e),
        }
    }

    PlateText::Unknown
}

fn lock<T: ?Sized>(engine: &Mutex<Box<T>>) -> Result<MutexGuard<'_, Box<T>>> {
    engine
        .lock()
        .map_err(|_| PlateError::EnginePoisoned)
}

/// Every variant against every configured mode, in that order. Trials that
/// error are skipped. Stops early once the deadline has passed and keeps the
/// best observation so far; a zero deadline is no deadline.
pub fn run_primary(
    engine: &mut dyn PrimaryOcr,
    image: &Mat,
    config: &OcrConfig,
) -> Result<Option<OcrObservation>> {
    let started = Instant::now();
    let deadline = config
        .trial_deadline_ms
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis);
    let variants = build_variants(image, config)?;
    let trials = OCR_TRIALS.with_label_values(&[engine.name()]);

    let mut best = BestObservation::default();
    let mut attempted = 0usize;
    'variants: for variant in &variants {
        for &mode in &config.page_seg_modes {
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    warn!(
                        "OCR deadline of {:?} reached after {} trials",
                        limit, attempted
                    );
                    break 'variants;
                }
            }

            attempted += 1;
            trials.inc();
            let tokens = match engine.recognize(&variant.image, mode) {
                Ok(tokens) => tokens,
                Err(e) => {
                    debug!("trial {:?}/{:?} failed: {}", variant.kind, mode, e);
                    continue;
                }
            };
            if let Some(observation) = observe(&tokens, variant.kind, mode, config) {
                debug!(
                    "trial {:?}/{:?} read {} scoring {:.1}",
                    variant.kind, mode, observation.cleaned_text, observation.total_score
                );
                best.offer(observation);
            }
        }
    }

    Ok(best.into_inner())
}

pub fn run_fallback(
    engine: &mut dyn FallbackOcr,
    image: &Mat,
    ocr: &OcrConfig,
    fallback: &FallbackConfig,
) -> Result<Option<String>> {
    OCR_TRIALS.with_label_values(&[engine.name()]).inc();
    let detections = engine.recognize(image, &ocr.whitelist)?;
    Ok(pick_fallback(&detections, ocr, fallback))
}
