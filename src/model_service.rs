use crate::{error::InferenceError, preprocess::InputDims};
use ndarray::Array4;

/// A loaded, read-only scorer shared by every request in the process.
///
/// Implementations must tolerate concurrent `score` calls and must not keep
/// anything from one call to the next.
pub trait ModelService: Send + Sync + 'static {
    /// Spatial size fixed by the model's input binding.
    fn input_dims(&self) -> InputDims;

    /// Length of the score vector produced for one image.
    fn num_classes(&self) -> usize;

    /// Raw per-class scores (logits) for the single image in `input`, which
    /// callers have already shaped to `input_dims`.
    fn score(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}
