use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlateError {
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("tesseract: {0}")]
    Tesseract(String),

    #[error("onnx runtime: {0}")]
    Onnx(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("OCR engine lock poisoned by an earlier panic")]
    EnginePoisoned,

    #[error("image is empty")]
    EmptyImage,
}

impl From<ort::Error> for PlateError {
    fn from(e: ort::Error) -> Self {
        PlateError::Onnx(e.to_string())
    }
}

impl From<ndarray::ShapeError> for PlateError {
    fn from(e: ndarray::ShapeError) -> Self {
        PlateError::Onnx(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlateError>;
