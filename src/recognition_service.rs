use crate::{
    decoder::decode,
    error::{ErrorClass, InferenceError, RecognitionError},
    inference::InferenceEngine,
    model_service::ModelService,
    preprocess::preprocess,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub status: Status,
    pub recognized_digit: usize,
    pub model_confidence: f64,
    pub filename: String,
}

/// Rejects uploads whose declared content type is not `image/*`.
pub fn ensure_image_content_type(content_type: &str) -> Result<(), RecognitionError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.strip_prefix("image/") {
        Some(subtype) if !subtype.is_empty() => Ok(()),
        _ => Err(RecognitionError::UnsupportedMediaType(
            content_type.to_string(),
        )),
    }
}

/// Runs decode, preprocess, score and classify for one upload.
pub struct Recognizer<M: ModelService> {
    engine: InferenceEngine<M>,
}

impl<M: ModelService> Clone for Recognizer<M> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<M: ModelService> Recognizer<M> {
    pub fn new(model_service: M) -> Self {
        Self::from_shared(Arc::new(model_service))
    }

    pub fn from_shared(model_service: Arc<M>) -> Self {
        Self {
            engine: InferenceEngine::from_shared(model_service),
        }
    }

    pub fn engine(&self) -> &InferenceEngine<M> {
        &self.engine
    }

    #[instrument(skip(self, image_data), fields(bytes = image_data.len()))]
    pub fn process_and_recognize(
        &self,
        image_data: &[u8],
        filename: &str,
    ) -> Result<RecognitionResult, RecognitionError> {
        let result = self.run_pipeline(image_data, filename);

        match &result {
            Ok(recognition) => tracing::info!(
                digit = recognition.recognized_digit,
                confidence = recognition.model_confidence,
                "recognized digit"
            ),
            Err(err) => match err.class() {
                ErrorClass::ClientInput => tracing::warn!("rejected upload: {}", err),
                ErrorClass::Internal => tracing::error!("recognition failed: {}", err),
            },
        }

        result
    }

    fn run_pipeline(
        &self,
        image_data: &[u8],
        filename: &str,
    ) -> Result<RecognitionResult, RecognitionError> {
        let grid = decode(image_data)?;
        let input = preprocess(&grid, self.engine.input_dims())?;
        let decision = self.engine.try_classify(&input)?;

        Ok(RecognitionResult {
            status: Status::Success,
            recognized_digit: decision.predicted_class,
            model_confidence: decision.rounded_confidence(),
            filename: filename.to_string(),
        })
    }

    /// Runs the pipeline on the blocking thread pool so the async caller's
    /// worker thread stays free.
    pub async fn recognize(
        &self,
        image_data: Vec<u8>,
        filename: String,
    ) -> Result<RecognitionResult, RecognitionError> {
        let recognizer = self.clone();
        tokio::task::spawn_blocking(move || recognizer.process_and_recognize(&image_data, &filename))
            .await
            .map_err(|e| RecognitionError::Inference(InferenceError::WorkerFailed(e.to_string())))?
    }
}
