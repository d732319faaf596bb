use std::io;

use aws_sdk_s3::primitives::ByteStreamError;
use thiserror::Error;
use tflite_serve::ClassifyError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Bucket name is missing in record {0}")]
    MissingBucket(usize),

    #[error("Object key is missing in record {0}")]
    MissingKey(usize),

    #[error("Object key '{0}' does not decode to UTF-8")]
    InvalidKey(String),

    #[error("Could not get s3://{bucket}/{key}: {source}")]
    Download {
        bucket: String,
        key: String,
        #[source]
        source: aws_sdk_s3::Error,
    },

    #[error("Could not read body of s3://{bucket}/{key}: {source}")]
    Read {
        bucket: String,
        key: String,
        #[source]
        source: ByteStreamError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not render result: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Classification failure: {0}")]
    Classify(#[from] ClassifyError),
}
