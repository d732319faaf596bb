use std::path::Path;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{debug, info};
use serde::ser::{Serialize, SerializeMap, Serializer};

pub mod error;
pub mod interpreter;
pub mod process;
pub mod signature;

pub use error::{ClassifyError, Result};
pub use interpreter::{Interpreter, OutputTensor, OutputValue, TractInterpreter};
pub use process::{process_image, ImageTensor};
pub use signature::{BoundTensor, Signature, TensorDetail};

/// Key the predicted label is reported under
pub const PREDICTION_KEY: &str = "Prediction";

pub struct Timer {
    name: String,
    tstamp: Option<DateTime<Utc>>,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: &str) -> Self {
        Timer {
            name: name.to_owned(),
            tstamp: None,
        }
    }

    pub fn new_start(name: &str) -> Self {
        let mut t = Timer::new(name);
        t.start();
        t
    }

    /// Start the timer
    pub fn start(&mut self) {
        info!("{}: starting", self.name);

        self.tstamp = Some(Utc::now());
    }

    /// Stop the timer, returning the elapsed milliseconds
    pub fn stop(&mut self) -> i64 {
        match self.tstamp.take() {
            None => {
                debug!("{}: not running!", self.name);
                0
            }
            Some(tstamp) => {
                let ms = (Utc::now() - tstamp).num_milliseconds();
                info!("{} duration: {} msec", self.name, ms);
                ms
            }
        }
    }
}

pub struct ImageClassifier {
    /// Inference runtime holding the model
    interpreter: Box<dyn Interpreter>,

    /// Metadata exported along with the model
    signature: Signature,

    /// Signature inputs resolved to interpreter tensors
    inputs: Vec<BoundTensor>,

    /// Signature outputs resolved to interpreter tensors
    outputs: Vec<BoundTensor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Model outputs in signature order
    outputs: Vec<(String, OutputValue)>,

    /// Label of the most confident class
    label: String,

    /// Confidence of the predicted label
    confidence: f32,
}

impl Classification {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn outputs(&self) -> &[(String, OutputValue)] {
        &self.outputs
    }

    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.outputs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Serialize for Classification {
    /// Outputs in signature order, the label written under `Prediction`.
    /// An existing `Prediction` output keeps its position.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let has_prediction = self.outputs.iter().any(|(key, _)| key == PREDICTION_KEY);
        let len = self.outputs.len() + if has_prediction { 0 } else { 1 };

        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in &self.outputs {
            if key == PREDICTION_KEY {
                map.serialize_entry(key, &self.label)?;
            } else {
                map.serialize_entry(key, value)?;
            }
        }
        if !has_prediction {
            map.serialize_entry(PREDICTION_KEY, &self.label)?;
        }
        map.end()
    }
}

/// Index and value of the first maximum, NaNs skipped.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;

    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }

    best
}

fn is_web_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.has_host(),
        Err(_) => false,
    }
}

impl ImageClassifier {
    /// Loads the model named by `model_dir/signature_filename`.
    pub fn load(model_dir: &Path, signature_filename: &str) -> Result<Self> {
        let mut t = Timer::new_start("Loading model");

        let (model_path, signature) =
            signature::load_model_and_signature(model_dir, signature_filename)?;
        let interpreter = TractInterpreter::load(&model_path)?;

        t.stop();

        ImageClassifier::with_interpreter(Box::new(interpreter), signature)
    }

    pub fn with_interpreter(interpreter: Box<dyn Interpreter>, signature: Signature) -> Result<Self> {
        let inputs = signature::bind(&signature.inputs, interpreter.input_details())?;
        let outputs = signature::bind(&signature.outputs, interpreter.output_details())?;

        Signature::image_input(&inputs)?;

        Ok(ImageClassifier {
            interpreter,
            signature,
            inputs,
            outputs,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Shape the `Image` input expects
    pub fn input_shape(&self) -> Result<&[usize]> {
        Ok(Signature::image_input(&self.inputs)?.shape.as_slice())
    }

    /// Runs the interpreter on an already processed image.
    pub fn predict(&self, tensor: ImageTensor) -> Result<Vec<(String, OutputValue)>> {
        let mut t = Timer::new_start("Running interpreter");

        let image = Signature::image_input(&self.inputs)?;
        let raw = self.interpreter.invoke(vec![(image.index, tensor)])?;

        t.stop();

        self.outputs
            .iter()
            .map(|bound| {
                let tensor = raw
                    .get(bound.index)
                    .cloned()
                    .ok_or_else(|| ClassifyError::TensorNotFound(bound.name.clone()))?;
                Ok((bound.key.clone(), tensor.unbatch()))
            })
            .collect()
    }

    fn get_label(&self, outputs: &[(String, OutputValue)]) -> Result<(String, f32)> {
        let (key, value) = outputs
            .first()
            .ok_or_else(|| ClassifyError::NotConfidences(String::new()))?;

        let confidences = match value {
            OutputValue::Numbers(values) => values,
            _ => return Err(ClassifyError::NotConfidences(key.clone())),
        };

        let (index, confidence) =
            argmax(confidences).ok_or_else(|| ClassifyError::NotConfidences(key.clone()))?;

        let labels = &self.signature.classes.label;
        let label = labels.get(index).ok_or(ClassifyError::UnknownLabel {
            index,
            labels: labels.len(),
        })?;

        Ok((label.clone(), confidence))
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let mut t = Timer::new_start("Resizing image");

        let tensor = process_image(image, self.input_shape()?)?;

        t.stop();

        let outputs = self.predict(tensor)?;
        let (label, confidence) = self.get_label(&outputs)?;

        debug!("Predicted '{}' with confidence {}", label, confidence);

        Ok(Classification {
            outputs,
            label,
            confidence,
        })
    }

    pub fn classify_from_raw(&self, data: &[u8]) -> Result<Classification> {
        let mut t = Timer::new_start("Load image from memory");

        let image = image::load_from_memory(data)?;

        t.stop();

        self.classify(&image)
    }

    pub fn classify_from_path(&self, path: &Path) -> Result<Classification> {
        let mut t = Timer::new_start(&format!("Loading image from {}", path.display()));

        let image = image::open(path)?;

        t.stop();

        self.classify(&image)
    }

    pub fn classify_from_url(&self, url: &str) -> Result<Classification> {
        if !is_web_url(url) {
            return Err(ClassifyError::InvalidUrl(url.to_owned()));
        }

        let mut t = Timer::new_start(&format!("Fetching image from {}", url));

        let buf = reqwest::blocking::get(url)?.error_for_status()?.bytes()?;

        t.stop();

        self.classify_from_raw(&buf)
    }
}
