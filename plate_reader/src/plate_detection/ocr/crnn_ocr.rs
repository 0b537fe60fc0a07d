use std::path::Path;

use ndarray::{Array, Array4, IxDyn};
use opencv::core::Size;
use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tracing::info;

use super::{FallbackOcr, TextDetection};
use crate::config::FallbackConfig;
use crate::error::{PlateError, Result};
use crate::plate_detection::to_gray;

/// CRNN text recognizer exported to ONNX. Output is `[1, T, 1 + vocab]`
/// softmax scores with the CTC blank at index 0.
pub struct CrnnOcr {
    session: Session,
    input_width: i32,
    input_height: i32,
    vocab: Vec<char>,
}

impl CrnnOcr {
    pub fn load(model_path: &Path, config: &FallbackConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;
        info!("loaded fallback recognizer {}", model_path.display());

        Ok(Self {
            session,
            input_width: config.input_width,
            input_height: config.input_height,
            vocab: config.char_vocab.chars().collect(),
        })
    }

    /// Gray, resized to the model input, scaled to `[0, 1]`, NCHW.
    fn preprocess(&self, image: &Mat) -> Result<Array4<f32>> {
        let gray = to_gray(image)?;
        let mut resized = Mat::default();
        resize(
            &gray,
            &mut resized,
            Size::new(self.input_width, self.input_height),
            0.0,
            0.0,
            INTER_LINEAR,
        )?;

        let (h, w) = (self.input_height as usize, self.input_width as usize);
        let mut input = Array4::<f32>::zeros((1, 1, h, w));
        for y in 0..h {
            for x in 0..w {
                let pixel = *resized.at_2d::<u8>(y as i32, x as i32)?;
                input[[0, 0, y, x]] = pixel as f32 / 255.0;
            }
        }
        Ok(input)
    }
}

impl FallbackOcr for CrnnOcr {
    fn name(&self) -> &'static str {
        "crnn"
    }

    fn recognize(&mut self, image: &Mat, allowlist: &str) -> Result<Vec<TextDetection>> {
        let input = Value::from_array(self.preprocess(image)?)?;
        let outputs = self.session.run(ort::inputs![input])?;
        let output = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("logits"))
            .ok_or_else(|| PlateError::Onnx("no output tensor (output, output0, logits)".into()))?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
        let scores = Array::from_shape_vec(IxDyn(&dims), data.to_vec())?;

        Ok(ctc_greedy_decode(&scores, &self.vocab, allowlist)
            .into_iter()
            .collect())
    }
}

/// Greedy CTC over `[1, T, C]` scores. Repeats collapse unless separated by
/// a blank; characters outside `allowlist` are dropped. Confidence is the
/// mean best score of the emitted characters.
pub fn ctc_greedy_decode(
    scores: &Array<f32, IxDyn>,
    vocab: &[char],
    allowlist: &str,
) -> Option<TextDetection> {
    let shape = scores.shape();
    if shape.len() != 3 || shape[0] == 0 {
        return None;
    }
    let (steps, classes) = (shape[1], shape[2]);

    let mut text = String::new();
    let mut kept = Vec::new();
    let mut previous = 0usize;
    for t in 0..steps {
        let mut best = 0usize;
        let mut best_score = scores[[0, t, 0]];
        for c in 1..classes {
            let score = scores[[0, t, c]];
            if score > best_score {
                best = c;
                best_score = score;
            }
        }

        if best != 0 && best != previous {
            if let Some(&ch) = vocab.get(best - 1) {
                if allowlist.contains(ch) {
                    text.push(ch);
                    kept.push(best_score);
                }
            }
        }
        previous = best;
    }

    if text.is_empty() {
        return None;
    }
    let confidence = kept.iter().sum::<f32>() / kept.len() as f32;
    Some(TextDetection { text, confidence })
}
