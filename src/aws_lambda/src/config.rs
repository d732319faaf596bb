//! Runtime configuration read from the Lambda environment.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL_BUCKET: &str = "ra-model-storage";
pub const DEFAULT_MODEL_FILENAME: &str = "classify_model.tflite";
pub const DEFAULT_SIGNATURES_FILENAME: &str = "signature.json";
pub const DEFAULT_MODEL_DIR: &str = "/tmp";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Bucket holding the model and its signature
    pub model_bucket: String,
    pub model_filename: String,
    pub signatures_filename: String,
    /// Local directory both files are downloaded to
    pub model_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset or empty keys
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        Config {
            model_bucket: get("MODEL_BUCKET", DEFAULT_MODEL_BUCKET),
            model_filename: get("MODEL_FILENAME", DEFAULT_MODEL_FILENAME),
            signatures_filename: get("SIGNATURES_FILENAME", DEFAULT_SIGNATURES_FILENAME),
            model_dir: PathBuf::from(get("MODEL_DIR", DEFAULT_MODEL_DIR)),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_filename)
    }

    pub fn signature_path(&self) -> PathBuf {
        self.model_dir.join(&self.signatures_filename)
    }
}
