use std::convert::TryFrom;
use std::fmt::Display;
use std::path::Path;

use log::debug;
use serde::Serialize;
use tract_core::prelude::*;

use crate::error::{ClassifyError, Result};
use crate::process::ImageTensor;
use crate::signature::TensorDetail;

/// Inference runtime as seen by the classifier.
pub trait Interpreter: Send + Sync {
    fn input_details(&self) -> &[TensorDetail];

    fn output_details(&self) -> &[TensorDetail];

    /// Runs the model with `(input index, tensor)` feeds and returns every
    /// output, ordered by output index.
    fn invoke(&self, inputs: Vec<(usize, ImageTensor)>) -> Result<Vec<OutputTensor>>;
}

/// A raw output tensor, numeric types already cast to `f32`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTensor {
    Float { shape: Vec<usize>, data: Vec<f32> },
    Text { shape: Vec<usize>, data: Vec<String> },
}

/// An output with the batch axis removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Number(f32),
    Numbers(Vec<f32>),
    Text(String),
    Texts(Vec<String>),
}

/// First entry of the leading axis, flattened.
fn first_row<T: Clone>(shape: &[usize], data: &[T]) -> Vec<T> {
    match shape.first() {
        Some(&batch) if batch > 0 => data[..data.len() / batch].to_vec(),
        _ => Vec::new(),
    }
}

impl OutputTensor {
    /// Drops the batch axis of a batch-of-one result.
    ///
    /// Rank 0 and 1 tensors collapse to their first element.
    pub fn unbatch(self) -> OutputValue {
        match self {
            OutputTensor::Float { shape, data } if shape.len() <= 1 => {
                if data.is_empty() {
                    OutputValue::Numbers(data)
                } else {
                    OutputValue::Number(data[0])
                }
            }
            OutputTensor::Text { shape, mut data } if shape.len() <= 1 => {
                if data.is_empty() {
                    OutputValue::Texts(data)
                } else {
                    OutputValue::Text(data.swap_remove(0))
                }
            }
            OutputTensor::Float { shape, data } => OutputValue::Numbers(first_row(&shape, &data)),
            OutputTensor::Text { shape, data } => OutputValue::Texts(first_row(&shape, &data)),
        }
    }
}

fn runtime<E: Display>(err: E) -> ClassifyError {
    ClassifyError::Inference(format!("{:#}", err))
}

/// TensorFlow Lite models executed with tract.
pub struct TractInterpreter {
    plan: TypedRunnableModel<TypedModel>,
    inputs: Vec<TensorDetail>,
    outputs: Vec<TensorDetail>,
}

/// Pairs each outlet with the tensor name the flatbuffer gives it.
///
/// Falls back to the outlet label, then the node name, when the subgraph has
/// no name for that position.
fn tensor_details(
    model: &TypedModel,
    outlets: &[OutletId],
    names: &[String],
) -> Result<Vec<TensorDetail>> {
    outlets
        .iter()
        .enumerate()
        .map(|(index, outlet)| {
            let name = names
                .get(index)
                .cloned()
                .or_else(|| model.outlet_label(*outlet).map(|label| label.to_owned()))
                .unwrap_or_else(|| model.node(outlet.node).name.clone());

            let fact = model.outlet_fact(*outlet).map_err(runtime)?;
            let shape = fact
                .shape
                .as_concrete()
                .map(|dims| dims.to_vec())
                .ok_or_else(|| {
                    ClassifyError::Inference(format!("Tensor '{}' has a dynamic shape", name))
                })?;

            Ok(TensorDetail { name, index, shape })
        })
        .collect()
}

fn output_tensor(value: &TValue) -> Result<OutputTensor> {
    let shape = value.shape().to_vec();

    if value.datum_type() == DatumType::String {
        let data = value.as_slice::<String>().map_err(runtime)?.to_vec();
        return Ok(OutputTensor::Text { shape, data });
    }

    let cast = value.cast_to::<f32>().map_err(runtime)?;
    let data = cast.as_slice::<f32>().map_err(runtime)?.to_vec();

    Ok(OutputTensor::Float { shape, data })
}

impl TractInterpreter {
    pub fn load(model_path: &Path) -> Result<Self> {
        let tflite = tract_tflite::tflite();
        let proto = tflite.proto_model_for_path(model_path).map_err(runtime)?;

        // tract names nodes after the ops it creates, so the subgraph's own
        // tensor names are read before the model is translated.
        let (input_names, output_names) = {
            let root = proto.root();
            let subgraph = root
                .subgraphs()
                .filter(|subgraphs| !subgraphs.is_empty())
                .map(|subgraphs| subgraphs.get(0))
                .ok_or_else(|| ClassifyError::Inference("Model has no subgraph".to_owned()))?;
            let tensors = subgraph
                .tensors()
                .ok_or_else(|| ClassifyError::Inference("Model has no tensors".to_owned()))?;

            let name_of = |id: i32| {
                usize::try_from(id)
                    .ok()
                    .filter(|&id| id < tensors.len())
                    .and_then(|id| tensors.get(id).name())
                    .map(|name| name.to_owned())
                    .ok_or_else(|| ClassifyError::Inference(format!("No tensor {} in model", id)))
            };

            let inputs = subgraph
                .inputs()
                .into_iter()
                .flat_map(|ids| ids.iter())
                .map(|id| name_of(id))
                .collect::<Result<Vec<_>>>()?;
            let outputs = subgraph
                .outputs()
                .into_iter()
                .flat_map(|ids| ids.iter())
                .map(|id| name_of(id))
                .collect::<Result<Vec<_>>>()?;

            (inputs, outputs)
        };

        let model = tflite
            .model_for_proto_model(&proto)
            .and_then(|model| model.into_optimized())
            .map_err(runtime)?;

        let inputs = tensor_details(&model, model.input_outlets().map_err(runtime)?, &input_names)?;
        let outputs =
            tensor_details(&model, model.output_outlets().map_err(runtime)?, &output_names)?;

        debug!("Model inputs: {:?}", inputs);
        debug!("Model outputs: {:?}", outputs);

        let plan = model.into_runnable().map_err(runtime)?;

        Ok(TractInterpreter {
            plan,
            inputs,
            outputs,
        })
    }
}

impl Interpreter for TractInterpreter {
    fn input_details(&self) -> &[TensorDetail] {
        &self.inputs
    }

    fn output_details(&self) -> &[TensorDetail] {
        &self.outputs
    }

    fn invoke(&self, inputs: Vec<(usize, ImageTensor)>) -> Result<Vec<OutputTensor>> {
        let mut feeds: Vec<Option<TValue>> = self.inputs.iter().map(|_| None).collect();

        for (index, tensor) in inputs {
            let value = Tensor::from_shape(&tensor.shape, &tensor.data).map_err(runtime)?;
            let slot = feeds.get_mut(index).ok_or_else(|| {
                ClassifyError::Inference(format!("Model has no input {}", index))
            })?;
            *slot = Some(value.into_tvalue());
        }

        let feeds = feeds
            .into_iter()
            .zip(&self.inputs)
            .map(|(feed, detail)| {
                feed.ok_or_else(|| {
                    ClassifyError::Inference(format!("No value for input '{}'", detail.name))
                })
            })
            .collect::<Result<TVec<TValue>>>()?;

        let outputs = self.plan.run(feeds).map_err(runtime)?;

        outputs.iter().map(output_tensor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbatch_takes_first_row() {
        let tensor = OutputTensor::Float {
            shape: vec![2, 3],
            data: vec![0.1, 0.7, 0.2, 0.3, 0.3, 0.4],
        };

        assert_eq!(tensor.unbatch(), OutputValue::Numbers(vec![0.1, 0.7, 0.2]));
    }

    #[test]
    fn unbatch_collapses_vectors() {
        let label = OutputTensor::Text {
            shape: vec![1],
            data: vec!["dog".into()],
        };
        assert_eq!(label.unbatch(), OutputValue::Text("dog".into()));

        let scalar = OutputTensor::Float {
            shape: vec![],
            data: vec![0.5],
        };
        assert_eq!(scalar.unbatch(), OutputValue::Number(0.5));
    }

    #[test]
    fn unbatch_of_empty_batch_is_empty() {
        let tensor = OutputTensor::Float {
            shape: vec![0, 3],
            data: vec![],
        };

        assert_eq!(tensor.unbatch(), OutputValue::Numbers(vec![]));
    }

    #[test]
    fn output_values_serialize_untagged() {
        let values = vec![
            OutputValue::Numbers(vec![0.5, 0.25]),
            OutputValue::Text("cat".into()),
        ];

        assert_eq!(
            serde_json::to_string(&values).unwrap(),
            r#"[[0.5,0.25],"cat"]"#
        );
    }

    /// One input `Image` [1, 2, 2, 3]; output `Identity` sums every channel
    /// over the pixels, shaped [1, 1, 1, 3].
    fn write_channel_sum_model(path: &Path) {
        use tract_core::ops::nn::{Reduce, Reducer};

        let mut model = TypedModel::default();
        let image = model
            .add_source("Image", TypedFact::dt_shape(f32::datum_type(), [1usize, 2, 2, 3]))
            .unwrap();
        let sum = model
            .wire_node("Identity", Reduce::new(vec![1, 2].into(), Reducer::Sum), &[image])
            .unwrap();
        model.set_output_outlets(&sum).unwrap();

        let file = std::fs::File::create(path).unwrap();
        tract_tflite::tflite().write(&model, file).unwrap();
    }

    #[test]
    fn reports_flatbuffer_tensor_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tflite");
        write_channel_sum_model(&path);

        let interpreter = TractInterpreter::load(&path).unwrap();

        assert_eq!(
            interpreter.input_details(),
            &[TensorDetail {
                name: "Image".into(),
                index: 0,
                shape: vec![1, 2, 2, 3],
            }]
        );
        assert_eq!(
            interpreter.output_details(),
            &[TensorDetail {
                name: "Identity".into(),
                index: 0,
                shape: vec![1, 1, 1, 3],
            }]
        );
    }

    #[test]
    fn invokes_model_on_image_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tflite");
        write_channel_sum_model(&path);

        let interpreter = TractInterpreter::load(&path).unwrap();
        let tensor = ImageTensor {
            shape: vec![1, 2, 2, 3],
            data: vec![0.5, 0.0, 0.25, 0.5, 0.0, 0.25, 0.5, 0.0, 0.25, 0.5, 0.0, 0.25],
        };

        let outputs = interpreter.invoke(vec![(0, tensor)]).unwrap();

        assert_eq!(
            outputs,
            vec![OutputTensor::Float {
                shape: vec![1, 1, 1, 3],
                data: vec![2.0, 0.0, 1.0],
            }]
        );
    }

    #[test]
    fn classifier_loads_model_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_channel_sum_model(&dir.path().join("model.tflite"));
        std::fs::write(
            dir.path().join("signature.json"),
            r#"{
                "filename": "model.tflite",
                "inputs": { "Image": { "name": "Image", "shape": [null, 2, 2, 3] } },
                "outputs": { "Confidences": { "name": "Identity", "shape": [null, 1, 1, 3] } },
                "classes": { "Label": ["red", "green", "blue"] }
            }"#,
        )
        .unwrap();

        let classifier = crate::ImageClassifier::load(dir.path(), "signature.json").unwrap();
        assert_eq!(classifier.input_shape().unwrap(), &[1, 2, 2, 3]);

        let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2,
            2,
            image::Rgb([255, 0, 51]),
        ));
        let classification = classifier.classify(&image).unwrap();

        assert_eq!(classification.label(), "red");
        assert_eq!(classification.confidence(), 4.0);
        match classification.get("Confidences") {
            Some(OutputValue::Numbers(values)) => {
                assert_eq!(values.len(), 3);
                assert_eq!(values[0], 4.0);
                assert_eq!(values[1], 0.0);
                assert!((values[2] - 0.8).abs() < 1e-5);
            }
            other => panic!("unexpected confidences: {:?}", other),
        }
    }
}
