use crate::{
    config::Config,
    error::{ErrorClass, RecognitionError},
    model_service::ModelService,
    ort_service::OrtModelService,
    recognition_service::{ensure_image_content_type, RecognitionResult, Recognizer},
};
use serde::Serialize;
use std::{error::Error, path::Path, path::PathBuf};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
struct ErrorReport {
    status: &'static str,
    class: &'static str,
    status_code: u16,
    detail: String,
    filename: String,
}

impl ErrorReport {
    fn new(class: ErrorClass, detail: String, filename: String) -> Self {
        Self {
            status: "error",
            class: class.as_str(),
            status_code: class.status_code(),
            detail,
            filename,
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn recognize_file<M: ModelService>(
    recognizer: Recognizer<M>,
    path: PathBuf,
) -> Result<RecognitionResult, ErrorReport> {
    let filename = display_name(&path);

    let content_type = content_type_for(&path);
    ensure_image_content_type(content_type)
        .map_err(|e| report(&e, filename.clone()))?;

    let image_data = tokio::fs::read(&path).await.map_err(|e| {
        tracing::warn!("failed to read {:?}: {}", path, e);
        ErrorReport::new(
            ErrorClass::ClientInput,
            format!("Could not read file: {}", e),
            filename.clone(),
        )
    })?;

    recognizer
        .recognize(image_data, filename.clone())
        .await
        .map_err(|e| report(&e, filename))
}

fn report(err: &RecognitionError, filename: String) -> ErrorReport {
    ErrorReport::new(err.class(), err.to_string(), filename)
}

/// Loads the scorer, then recognizes every file in `paths` and prints one
/// JSON line per file in argument order.
pub async fn start_app(config: Config, paths: Vec<PathBuf>) -> Result<(), Box<dyn Error>> {
    let model_config = config.model.clone();
    let model_service = tokio::task::spawn_blocking(move || OrtModelService::new(&model_config))
        .await?
        .map_err(|e| {
            tracing::error!("Failed to initialize model service: {}", e);
            e
        })?;

    let recognizer = Recognizer::new(model_service);
    let dims = recognizer.engine().input_dims();
    tracing::info!(
        "Recognizing {} image(s) at {}x{}",
        paths.len(),
        dims.width,
        dims.height
    );

    let tasks = paths
        .into_iter()
        .map(|path| recognize_file(recognizer.clone(), path));

    for outcome in futures::future::join_all(tasks).await {
        let line = match outcome {
            Ok(result) => serde_json::to_string(&result)?,
            Err(report) => serde_json::to_string(&report)?,
        };
        println!("{}", line);
    }

    Ok(())
}
