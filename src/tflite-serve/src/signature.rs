//! `signature.json` metadata shipped next to an exported model, and the
//! binding of its entries to the interpreter's tensors.

use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ClassifyError, Result};

/// Signature key of the input the image is fed into
pub const IMAGE_INPUT: &str = "Image";

#[derive(Debug, Clone, Deserialize)]
pub struct Signature {
    /// Model file name, relative to the signature's directory
    pub filename: String,

    pub inputs: TensorSpecs,

    pub outputs: TensorSpecs,

    pub classes: Classes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Classes {
    #[serde(rename = "Label")]
    pub label: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TensorSpec {
    /// Name of the tensor inside the model
    pub name: String,

    /// Declared shape, `null` for dynamic dimensions
    #[serde(default)]
    pub shape: Option<Vec<Option<i64>>>,

    #[serde(default)]
    pub dtype: Option<String>,
}

/// Signature entries in file order, keyed by their signature name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct TensorSpecs(Vec<(String, TensorSpec)>);

impl TensorSpecs {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorSpec)> {
        self.0.iter().map(|(key, spec)| (key.as_str(), spec))
    }

    pub fn get(&self, key: &str) -> Option<&TensorSpec> {
        self.iter().find(|(k, _)| *k == key).map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Map<String, Value>> for TensorSpecs {
    type Error = serde_json::Error;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        map.into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(TensorSpecs)
    }
}

/// A tensor as reported by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDetail {
    pub name: String,
    pub index: usize,
    pub shape: Vec<usize>,
}

/// A signature entry resolved against the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTensor {
    pub key: String,
    pub name: String,
    pub index: usize,
    pub shape: Vec<usize>,
}

impl Signature {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Signature::from_reader(BufReader::new(file))
    }

    /// Picks the bound `Image` input.
    pub fn image_input(bound: &[BoundTensor]) -> Result<&BoundTensor> {
        bound
            .iter()
            .find(|t| t.key == IMAGE_INPUT)
            .ok_or(ClassifyError::MissingImageInput)
    }
}

/// Reads the signature from `model_dir` and resolves the model file it names.
pub fn load_model_and_signature(
    model_dir: &Path,
    signature_filename: &str,
) -> Result<(PathBuf, Signature)> {
    let signature = Signature::from_path(&model_dir.join(signature_filename))?;

    let model_path = model_dir.join(&signature.filename);
    if !model_path.is_file() {
        return Err(ClassifyError::ModelNotFound(model_path));
    }

    debug!("Using model {}", model_path.display());

    Ok((model_path, signature))
}

/// Matches signature entries to interpreter tensors by name.
///
/// Interpreter details win over the signature: the bound index and shape are
/// the ones the runtime reports.
pub fn bind(specs: &TensorSpecs, details: &[TensorDetail]) -> Result<Vec<BoundTensor>> {
    specs
        .iter()
        .map(|(key, spec)| {
            let detail = details
                .iter()
                .find(|d| d.name == spec.name)
                .ok_or_else(|| ClassifyError::TensorNotFound(spec.name.clone()))?;

            Ok(BoundTensor {
                key: key.to_owned(),
                name: detail.name.clone(),
                index: detail.index,
                shape: detail.shape.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SIGNATURE: &str = r#"{
        "doc_id": "1e8c1c0a",
        "filename": "model.tflite",
        "inputs": {
            "Image": { "dtype": "float32", "name": "Image", "shape": [null, 224, 224, 3] }
        },
        "outputs": {
            "Confidences": { "dtype": "float32", "name": "Identity", "shape": [null, 3] },
            "Prediction": { "dtype": "string", "name": "Identity_1", "shape": [null] }
        },
        "classes": { "Label": ["cat", "dog", "fish"] }
    }"#;

    fn details() -> Vec<TensorDetail> {
        vec![
            TensorDetail {
                name: "Identity_1".into(),
                index: 0,
                shape: vec![1],
            },
            TensorDetail {
                name: "Identity".into(),
                index: 1,
                shape: vec![1, 3],
            },
        ]
    }

    #[test]
    fn parses_signature_in_file_order() {
        let sig = Signature::from_reader(SIGNATURE.as_bytes()).unwrap();

        assert_eq!(sig.filename, "model.tflite");
        assert_eq!(sig.classes.label, vec!["cat", "dog", "fish"]);

        let keys: Vec<_> = sig.outputs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Confidences", "Prediction"]);

        let image = sig.inputs.get("Image").unwrap();
        assert_eq!(image.shape, Some(vec![None, Some(224), Some(224), Some(3)]));
        assert_eq!(image.dtype.as_deref(), Some("float32"));
    }

    #[test]
    fn bind_takes_index_and_shape_from_interpreter() {
        let sig = Signature::from_reader(SIGNATURE.as_bytes()).unwrap();
        let bound = bind(&sig.outputs, &details()).unwrap();

        assert_eq!(
            bound[0],
            BoundTensor {
                key: "Confidences".into(),
                name: "Identity".into(),
                index: 1,
                shape: vec![1, 3],
            }
        );
        assert_eq!(bound[1].key, "Prediction");
        assert_eq!(bound[1].index, 0);
    }

    #[test]
    fn bind_reports_unknown_tensor() {
        let sig = Signature::from_reader(SIGNATURE.as_bytes()).unwrap();

        match bind(&sig.inputs, &details()) {
            Err(ClassifyError::TensorNotFound(name)) => assert_eq!(name, "Image"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn image_input_is_required() {
        let bound = vec![BoundTensor {
            key: "Pixels".into(),
            name: "input_1".into(),
            index: 0,
            shape: vec![1, 8, 8, 3],
        }];

        assert!(matches!(
            Signature::image_input(&bound),
            Err(ClassifyError::MissingImageInput)
        ));
    }

    #[test]
    fn missing_model_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("signature.json"), SIGNATURE).unwrap();

        match load_model_and_signature(dir.path(), "signature.json") {
            Err(ClassifyError::ModelNotFound(path)) => {
                assert_eq!(path, dir.path().join("model.tflite"))
            }
            other => panic!("unexpected result: {:?}", other),
        }

        fs::write(dir.path().join("model.tflite"), b"tflite").unwrap();
        let (path, sig) = load_model_and_signature(dir.path(), "signature.json").unwrap();
        assert_eq!(path, dir.path().join("model.tflite"));
        assert_eq!(sig.inputs.len(), 1);
    }
}
