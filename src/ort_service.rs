use crate::{
    config::ModelConfig,
    error::{InferenceError, InitializationError},
    model_service::ModelService,
    preprocess::InputDims,
};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{TensorRef, ValueType},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const DEFAULT_NUM_CLASSES: usize = 10;

/// Input/output bindings read from the model at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSignature {
    pub input_name: String,
    pub output_name: String,
    pub input_dims: InputDims,
    pub num_classes: usize,
}

impl ModelSignature {
    /// Validates a `[N, C, H, W]` input shape; `N` may be dynamic, `C` must be 1.
    pub fn from_shapes(
        input_name: &str,
        input_shape: &[i64],
        output_name: &str,
        output_shape: &[i64],
    ) -> Result<Self, InitializationError> {
        let [_, channels, height, width] = input_shape else {
            return Err(InitializationError::UnsupportedInput(format!(
                "`{}` must be 4-dimensional, got {:?}",
                input_name, input_shape
            )));
        };
        if *channels != 1 {
            return Err(InitializationError::UnsupportedInput(format!(
                "`{}` must have a single channel, got {}",
                input_name, channels
            )));
        }
        if *height <= 0 || *width <= 0 {
            return Err(InitializationError::UnsupportedInput(format!(
                "`{}` must have fixed spatial dimensions, got {}x{}",
                input_name, height, width
            )));
        }

        let num_classes = match output_shape.last() {
            Some(&n) if n > 0 => n as usize,
            Some(_) => DEFAULT_NUM_CLASSES,
            None => {
                return Err(InitializationError::UnsupportedOutput(format!(
                    "`{}` is a scalar",
                    output_name
                )))
            }
        };

        Ok(Self {
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            input_dims: InputDims::new(*height as u32, *width as u32),
            num_classes,
        })
    }

    fn from_session(session: &Session) -> Result<Self, InitializationError> {
        if session.inputs.len() != 1 {
            return Err(InitializationError::UnsupportedInput(format!(
                "expected one input binding, found {}",
                session.inputs.len()
            )));
        }
        if session.outputs.len() != 1 {
            return Err(InitializationError::UnsupportedOutput(format!(
                "expected one output binding, found {}",
                session.outputs.len()
            )));
        }

        let input = &session.inputs[0];
        let output = &session.outputs[0];

        let input_shape = match &input.input_type {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect::<Vec<i64>>(),
            other => {
                return Err(InitializationError::UnsupportedInput(format!(
                    "`{}` is not a tensor: {:?}",
                    input.name, other
                )))
            }
        };
        let output_shape = match &output.output_type {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect::<Vec<i64>>(),
            other => {
                return Err(InitializationError::UnsupportedOutput(format!(
                    "`{}` is not a tensor: {:?}",
                    output.name, other
                )))
            }
        };

        Self::from_shapes(&input.name, &input_shape, &output.name, &output_shape)
    }
}

/// ONNX Runtime backed scorer.
///
/// Holds a fixed pool of sessions, each behind its own mutex, and hands them
/// out round-robin so concurrent requests never share a session mid-run.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    signature: ModelSignature,
}

impl std::fmt::Debug for OrtModelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtModelService")
            .field("sessions", &self.sessions.len())
            .field("signature", &self.signature)
            .finish()
    }
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, InitializationError> {
        let model_path = model_config.get_path();
        if !model_path.exists() {
            return Err(InitializationError::ModelNotFound(model_path));
        }
        if model_config.num_instances == 0 {
            return Err(InitializationError::InvalidPoolSize);
        }

        let sessions = (0..model_config.num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .with_intra_threads(1)?
                    .commit_from_file(&model_path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let signature = {
            let session = sessions[0]
                .lock()
                .map_err(|e| InitializationError::Session(e.to_string()))?;
            ModelSignature::from_session(&session)?
        };

        tracing::info!(
            model = ?model_path,
            input = %signature.input_name,
            output = %signature.output_name,
            height = signature.input_dims.height,
            width = signature.input_dims.width,
            num_classes = signature.num_classes,
            "Created {} ONNX sessions",
            sessions.len()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            signature,
        })
    }

    pub fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    fn run_inference(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|_| InferenceError::SessionPoisoned)?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Runtime(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.signature.input_name.as_str() => tensor_ref])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let (shape, data) = outputs[self.signature.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::InvalidScores(format!("failed to extract tensor: {}", e)))?;

        let row_len = shape.last().copied().unwrap_or(0).max(0) as usize;
        if row_len == 0 || data.len() < row_len {
            return Err(InferenceError::InvalidScores(format!(
                "unexpected output shape {:?}",
                shape
            )));
        }

        Ok(data[..row_len].to_vec())
    }
}

impl ModelService for OrtModelService {
    fn input_dims(&self) -> InputDims {
        self.signature.input_dims
    }

    fn num_classes(&self) -> usize {
        self.signature.num_classes
    }

    fn score(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        self.run_inference(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_signature_from_mnist_shapes() {
        let signature =
            ModelSignature::from_shapes("Input3", &[1, 1, 28, 28], "Plus214_Output_0", &[1, 10])
                .unwrap();

        assert_eq!(signature.input_dims, InputDims::new(28, 28));
        assert_eq!(signature.num_classes, 10);
        assert_eq!(signature.input_name, "Input3");
        assert_eq!(signature.output_name, "Plus214_Output_0");
    }

    #[test]
    fn test_signature_accepts_dynamic_batch() {
        let signature =
            ModelSignature::from_shapes("input", &[-1, 1, 32, 24], "output", &[-1, -1]).unwrap();

        assert_eq!(signature.input_dims, InputDims::new(32, 24));
        assert_eq!(signature.num_classes, DEFAULT_NUM_CLASSES);
    }

    #[test]
    fn test_signature_rejects_unsupported_inputs() {
        for shape in [
            vec![1, 28, 28],
            vec![1, 3, 28, 28],
            vec![1, 1, -1, -1],
            vec![1, 1, 0, 28],
        ] {
            let err = ModelSignature::from_shapes("input", &shape, "output", &[1, 10]).unwrap_err();
            assert!(
                matches!(err, InitializationError::UnsupportedInput(_)),
                "{:?}",
                shape
            );
        }
    }

    #[test]
    fn test_signature_rejects_scalar_output() {
        let err = ModelSignature::from_shapes("input", &[1, 1, 28, 28], "output", &[]).unwrap_err();
        assert!(matches!(err, InitializationError::UnsupportedOutput(_)));
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let config = ModelConfig {
            onnx_file: "absent.onnx".to_string(),
            model_dir: PathBuf::from("./no_such_model_dir"),
            num_instances: 1,
        };

        let err = OrtModelService::new(&config).unwrap_err();
        assert!(matches!(err, InitializationError::ModelNotFound(_)));
    }
}
