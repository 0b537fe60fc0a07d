use leptess::tesseract::TessApi;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use std::ffi::{CStr, CString};

use super::{OcrToken, PageSegMode, PrimaryOcr};
use crate::config::OcrConfig;
use crate::error::{PlateError, Result};
use crate::plate_detection::to_gray;

const WORD_LEVEL: &str = "5";
const CONF_COLUMN: usize = 10;
const TEXT_COLUMN: usize = 11;

pub struct TessOcr {
    ocr: TessApi,
}

impl TessOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let mut api = TessApi::new(config.tessdata_path.as_deref(), &config.language)
            .map_err(|e| PlateError::Tesseract(format!("init {}: {:?}", config.language, e)))?;

        set_variable(&mut api, "tessedit_char_whitelist", &config.whitelist)?;
        // Crops carry no resolution metadata.
        set_variable(&mut api, "user_defined_dpi", "300")?;

        Ok(Self { ocr: api })
    }
}

// The handle is only ever used behind the engine lock.
unsafe impl Send for TessOcr {}

fn set_variable(api: &mut TessApi, name: &str, value: &str) -> Result<()> {
    let key = CString::new(name).map_err(|e| PlateError::Tesseract(e.to_string()))?;
    let value = CString::new(value).map_err(|e| PlateError::Tesseract(e.to_string()))?;
    api.raw
        .set_variable(&key, &value)
        .map_err(|e| PlateError::Tesseract(format!("{}: {:?}", name, e)))
}

impl PrimaryOcr for TessOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&mut self, image: &Mat, mode: PageSegMode) -> Result<Vec<OcrToken>> {
        set_variable(&mut self.ocr, "tessedit_pageseg_mode", &mode.code().to_string())?;

        let gray = to_gray(image)?;
        let gray = if gray.is_continuous() {
            gray
        } else {
            gray.try_clone()?
        };
        let cols = gray.cols();
        let rows = gray.rows();
        self.ocr
            .raw
            .set_image(gray.data_bytes()?, cols, rows, 1, cols)
            .map_err(|e| PlateError::Tesseract(format!("set image: {:?}", e)))?;
        self.ocr
            .raw
            .recognize()
            .map_err(|e| PlateError::Tesseract(format!("recognize: {:?}", e)))?;
        let tsv = self
            .ocr
            .raw
            .get_tsv_text(0)
            .map_err(|e| PlateError::Tesseract(format!("tsv: {:?}", e)))?;
        let tsv: &CStr = tsv.as_ref();

        Ok(parse_tsv(&tsv.to_string_lossy()))
    }
}

/// Word rows of Tesseract's TSV output. Rows without text or with a
/// negative confidence are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    tsv.lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split('\t').collect();
            if columns.first() != Some(&WORD_LEVEL) || columns.len() <= TEXT_COLUMN {
                return None;
            }
            let confidence: f32 = columns[CONF_COLUMN].trim().parse().ok()?;
            let text = columns[TEXT_COLUMN].trim();
            if confidence < 0.0 || text.is_empty() {
                return None;
            }
            Some(OcrToken {
                text: text.to_string(),
                confidence,
            })
        })
        .collect()
}
