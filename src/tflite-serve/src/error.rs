use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClassifyError>;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Model file does not exist: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Could not parse signature: {0}")]
    Signature(#[from] serde_json::Error),

    /// The signature has no `Image` input to feed the picture into
    #[error("Model doesn't have an 'Image' input, check the signature file")]
    MissingImageInput,

    /// A signature entry names a tensor the interpreter does not have
    #[error("Tensor '{0}' not found in model")]
    TensorNotFound(String),

    #[error("Invalid input shape {0:?}")]
    InvalidShape(Vec<usize>),

    #[error("Could not create image from raw data: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Could not read image from URL: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Inference failure: {0}")]
    Inference(String),

    #[error("Output '{0}' does not hold confidences")]
    NotConfidences(String),

    #[error("Predicted class {index} has no label ({labels} labels known)")]
    UnknownLabel { index: usize, labels: usize },
}
