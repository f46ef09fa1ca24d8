mod app;
mod decoder;
mod error;
mod inference;
mod model_service;
mod ort_service;
mod preprocess;
mod recognition_service;

pub mod config;

pub use app::start_app;
pub use decoder::{decode, PixelGrid};
pub use error::{
    DecodeError, ErrorClass, InferenceError, InitializationError, PreprocessError,
    RecognitionError,
};
pub use inference::{softmax, Decision, InferenceEngine, ScoreVector};
pub use model_service::ModelService;
pub use ort_service::{ModelSignature, OrtModelService};
pub use preprocess::{preprocess, InputDims};
pub use recognition_service::{ensure_image_content_type, RecognitionResult, Recognizer, Status};
