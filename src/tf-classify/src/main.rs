use std::error::Error;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tflite_serve::{Classification, ImageClassifier};

use log::info;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tf-classify",
    about = "CLI app to perform image classification with TensorFlow Lite"
)]
struct CmdArgs {
    #[structopt(
        parse(from_os_str),
        help = "Directory holding the model and its signature file"
    )]
    model_dir: PathBuf,

    #[structopt(help = "Image file or http(s) URL to classify")]
    image: String,

    #[structopt(
        long,
        default_value = "signature.json",
        help = "Signature file name inside the model directory"
    )]
    signature: String,

    #[structopt(long, help = "Pretty-print the result")]
    pretty: bool,
}

fn is_url(image: &str) -> bool {
    image.starts_with("http://") || image.starts_with("https://")
}

fn classify(classifier: &ImageClassifier, image: &str) -> tflite_serve::Result<Classification> {
    if is_url(image) {
        classifier.classify_from_url(image)
    } else {
        classifier.classify_from_path(Path::new(image))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let classifier = ImageClassifier::load(&args.model_dir, &args.signature)?;

    let classification = classify(&classifier, &args.image)?;

    info!(
        "{}: {} ({:.4})",
        args.image,
        classification.label(),
        classification.confidence()
    );

    let out = if args.pretty {
        serde_json::to_string_pretty(&classification)?
    } else {
        serde_json::to_string(&classification)?
    };
    println!("{}", out);

    Ok(())
}
