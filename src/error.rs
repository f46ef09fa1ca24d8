use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,
    #[error("unrecognized image format: {0}")]
    UnrecognizedFormat(String),
    #[error("malformed image data: {0}")]
    Malformed(String),
    #[error("image has zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("Empty image ({width}x{height})")]
    EmptyGrid { width: u32, height: u32 },
    #[error("failed to assemble input tensor: {0}")]
    Layout(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("input tensor shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("model run failed: {0}")]
    Runtime(String),
    #[error("invalid model output: {0}")]
    InvalidScores(String),
    #[error("recognition worker failed: {0}")]
    WorkerFailed(String),
    #[error("session mutex poisoned")]
    SessionPoisoned,
}

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("failed to create model session: {0}")]
    Session(String),
    #[error("unsupported model input: {0}")]
    UnsupportedInput(String),
    #[error("unsupported model output: {0}")]
    UnsupportedOutput(String),
    #[error("session pool size must be at least 1")]
    InvalidPoolSize,
}

impl From<ort::Error> for InitializationError {
    fn from(err: ort::Error) -> Self {
        InitializationError::Session(err.to_string())
    }
}

/// Coarse failure category used by callers to pick a response treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The upload itself is unusable; retrying with the same bytes will fail again.
    ClientInput,
    /// The model or the host failed; the request may succeed later.
    Internal,
}

impl ErrorClass {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::ClientInput => 400,
            ErrorClass::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::ClientInput => "client_input",
            ErrorClass::Internal => "internal",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("File must be an image, got content type `{0}`")]
    UnsupportedMediaType(String),
    #[error("Could not decode image: {0}")]
    Decode(#[from] DecodeError),
    #[error("Error preprocessing image: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Model inference error: {0}")]
    Inference(#[from] InferenceError),
}

impl RecognitionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RecognitionError::UnsupportedMediaType(_)
            | RecognitionError::Decode(_)
            | RecognitionError::Preprocess(_) => ErrorClass::ClientInput,
            RecognitionError::Inference(_) => ErrorClass::Internal,
        }
    }
}
