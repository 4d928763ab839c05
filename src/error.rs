//! Error types for model loading, inference and the HTTP boundary.

use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::types::ErrorBody;

/// Errors that abort startup while resolving or assembling the classifier.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Model hub request failed for '{model_id}': {source}")]
    Hub {
        model_id: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("Model directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// None of the candidate files could be found.
    #[error("No {kind} found (tried {tried})")]
    MissingFile { kind: &'static str, tried: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse model config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build tokenizer: {0}")]
    Tokenizer(String),

    #[error("Invalid safetensors checkpoint: {0}")]
    Checkpoint(#[from] safetensors::SafeTensorError),

    #[error("Checkpoint has no tensor named '{0}'")]
    MissingTensor(String),

    #[error("Classification head shape mismatch: expected {expected:?}, found {actual:?}")]
    HeadShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Model declares {actual} labels, expected {expected}")]
    LabelCount { expected: usize, actual: usize },

    #[error("Invalid max length {requested}: must be between 2 and {limit}")]
    MaxLength { requested: usize, limit: usize },

    #[error("Failed to build model: {0}")]
    Model(#[from] candle_core::Error),
}

/// Errors raised while classifying one batch. Every variant carries enough
/// text to be reported back to the caller verbatim.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Model forward pass failed: {0}")]
    Runtime(String),

    #[error("Unexpected model output shape: expected {expected:?}, got {actual:?}")]
    OutputShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Model produced non-finite scores for text {index}")]
    NonFinite { index: usize },

    #[error("Inference worker failed: {0}")]
    Worker(String),
}

impl From<candle_core::Error> for InferenceError {
    fn from(err: candle_core::Error) -> Self {
        InferenceError::Runtime(err.to_string())
    }
}

/// Error returned from HTTP handlers.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request body did not match the expected schema.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            detail: self.to_string(),
        })
    }
}
