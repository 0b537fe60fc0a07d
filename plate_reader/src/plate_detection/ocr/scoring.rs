//! Turning raw OCR output into scored plate observations.

use lazy_static::lazy_static;
use regex::Regex;

use super::{OcrToken, PageSegMode, TextDetection, VariantKind};
use crate::config::{FallbackConfig, OcrConfig};

lazy_static! {
    /// State code, district digits, one or two series letters, four digits.
    static ref FULL_PLATE: Regex =
        Regex::new(r"^[A-Z]{2}\d{2}[A-Z]{1,2}\d{4}$").expect("full plate pattern");
    static ref PARTIAL_PLATE: Regex =
        Regex::new(r"^[A-Z]{2}\d{2}[A-Z]+\d+$").expect("partial plate pattern");
    static ref STATE_PREFIX: Regex = Regex::new(r"^[A-Z]{2}\d+").expect("state prefix pattern");
}

/// One scored (variant, page mode) trial.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrObservation {
    pub variant: VariantKind,
    pub mode: PageSegMode,
    pub raw_text: String,
    pub cleaned_text: String,
    pub mean_confidence: f64,
    pub pattern_bonus: f64,
    pub balance_bonus: f64,
    pub total_score: f64,
}

/// Uppercase and keep ASCII letters and digits only.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn pattern_bonus(text: &str, config: &OcrConfig) -> f64 {
    if FULL_PLATE.is_match(text) {
        config.full_pattern_bonus
    } else if PARTIAL_PLATE.is_match(text) {
        config.partial_pattern_bonus
    } else if STATE_PREFIX.is_match(text) {
        config.prefix_pattern_bonus
    } else {
        0.0
    }
}

/// Bonus for strings that mix letters and digits in a plausible ratio.
pub fn balance_bonus(text: &str, config: &OcrConfig) -> f64 {
    let letters = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    if letters == 0 || digits == 0 {
        return 0.0;
    }
    let ratio = letters.min(digits) as f64 / letters.max(digits) as f64;
    if (config.balance_min_ratio..=1.0).contains(&ratio) {
        config.balance_bonus
    } else {
        0.0
    }
}

pub fn is_partial_plate(text: &str) -> bool {
    PARTIAL_PLATE.is_match(text)
}

/// Scores one trial. `None` when no token survives or the cleaned text is
/// too short to be a plate.
pub fn observe(
    tokens: &[OcrToken],
    variant: VariantKind,
    mode: PageSegMode,
    config: &OcrConfig,
) -> Option<OcrObservation> {
    let mut kept = Vec::new();
    let mut confidences = Vec::new();
    for token in tokens {
        let text = token.text.trim();
        if text.chars().count() < config.min_token_chars {
            continue;
        }
        // Engines report fractional confidences; the threshold and mean use whole points.
        let confidence = token.confidence.trunc();
        if confidence > config.min_token_confidence {
            kept.push(text.to_uppercase());
            confidences.push(confidence as f64);
        }
    }
    if kept.is_empty() {
        return None;
    }

    let raw_text = kept.concat();
    let cleaned_text = clean_text(&raw_text);
    if cleaned_text.len() < config.min_plate_chars {
        return None;
    }

    let mean_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let pattern_bonus = pattern_bonus(&cleaned_text, config);
    let balance_bonus = balance_bonus(&cleaned_text, config);

    Some(OcrObservation {
        variant,
        mode,
        raw_text,
        cleaned_text,
        mean_confidence,
        pattern_bonus,
        balance_bonus,
        total_score: mean_confidence + pattern_bonus + balance_bonus,
    })
}

/// Keeps the highest-scoring observation; a later one must score strictly
/// higher to replace it, so the first seen wins ties.
#[derive(Debug, Default)]
pub struct BestObservation {
    best: Option<OcrObservation>,
}

impl BestObservation {
    pub fn offer(&mut self, observation: OcrObservation) -> bool {
        let better = match &self.best {
            None => true,
            Some(current) => observation.total_score > current.total_score,
        };
        if better {
            self.best = Some(observation);
        }
        better
    }

    pub fn into_inner(self) -> Option<OcrObservation> {
        self.best
    }
}

/// Picks the fallback engine's answer: the most confident detection that is
/// long enough, accepted only when it looks like a plate.
pub fn pick_fallback(
    detections: &[TextDetection],
    ocr: &OcrConfig,
    fallback: &FallbackConfig,
) -> Option<String> {
    let mut best: Option<(String, f32)> = None;
    for detection in detections {
        let text = detection.text.trim().to_uppercase();
        if detection.confidence <= fallback.min_confidence
            || text.chars().count() < ocr.min_plate_chars
        {
            continue;
        }
        let cleaned = clean_text(&text);
        if cleaned.len() < ocr.min_plate_chars {
            continue;
        }
        let replace = match &best {
            None => true,
            Some((_, confidence)) => detection.confidence > *confidence,
        };
        if replace {
            best = Some((cleaned, detection.confidence));
        }
    }

    best.map(|(text, _)| text).filter(|text| is_partial_plate(text))
}
