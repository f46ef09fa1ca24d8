use crate::{error::InferenceError, model_service::ModelService, preprocess::InputDims};
use ndarray::Array4;
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

/// Raw model scores for one image, one entry per class.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>, num_classes: usize) -> Result<Self, InferenceError> {
        if scores.is_empty() {
            return Err(InferenceError::InvalidScores("no scores returned".into()));
        }
        if scores.len() != num_classes {
            return Err(InferenceError::InvalidScores(format!(
                "expected {} scores, got {}",
                num_classes,
                scores.len()
            )));
        }
        if let Some(pos) = scores.iter().position(|s| !s.is_finite()) {
            return Err(InferenceError::InvalidScores(format!(
                "non-finite score {} at index {}",
                scores[pos], pos
            )));
        }
        Ok(Self(scores))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Softmax with the maximum subtracted first so large logits do not overflow.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub predicted_class: usize,
    pub confidence: f32,
}

impl Decision {
    pub fn from_scores(scores: &ScoreVector) -> Self {
        let probabilities = softmax(scores.as_slice());
        // Ties resolve to the lowest index.
        let (predicted_class, confidence) = probabilities.iter().copied().enumerate().fold(
            (0, f32::NEG_INFINITY),
            |best, (index, p)| if p > best.1 { (index, p) } else { best },
        );

        Self {
            predicted_class,
            confidence,
        }
    }

    pub fn rounded_confidence(&self) -> f64 {
        round_to_millis(self.confidence as f64)
    }
}

fn round_to_millis(value: f64) -> f64 {
    (value * 1000.).round() / 1000.
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[derive(Debug)]
pub struct InferenceEngine<M: ModelService> {
    model_service: Arc<M>,
}

impl<M: ModelService> Clone for InferenceEngine<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
        }
    }
}

impl<M: ModelService> InferenceEngine<M> {
    pub fn new(model_service: M) -> Self {
        Self::from_shared(Arc::new(model_service))
    }

    pub fn from_shared(model_service: Arc<M>) -> Self {
        Self { model_service }
    }

    pub fn input_dims(&self) -> InputDims {
        self.model_service.input_dims()
    }

    /// A panic inside the scorer comes back as [`InferenceError::Runtime`].
    pub fn score(&self, input: &Array4<f32>) -> Result<ScoreVector, InferenceError> {
        let expected = self.input_dims().tensor_shape();
        if input.shape() != &expected[..] {
            return Err(InferenceError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        let raw = catch_unwind(AssertUnwindSafe(|| self.model_service.score(input)))
            .map_err(|payload| {
                InferenceError::Runtime(format!("model panicked: {}", panic_message(&*payload)))
            })??;
        ScoreVector::new(raw, self.model_service.num_classes())
    }

    pub fn try_classify(&self, input: &Array4<f32>) -> Result<Decision, InferenceError> {
        let scores = self.score(input)?;
        let decision = Decision::from_scores(&scores);
        tracing::debug!(
            predicted_class = decision.predicted_class,
            confidence = decision.confidence,
            "classified image"
        );
        Ok(decision)
    }

    /// `None` only when scoring failed; any valid score vector yields a decision.
    pub fn classify(&self, input: &Array4<f32>) -> Option<Decision> {
        match self.try_classify(input) {
            Ok(decision) => Some(decision),
            Err(e) => {
                tracing::warn!("no decision: {}", e);
                None
            }
        }
    }
}
