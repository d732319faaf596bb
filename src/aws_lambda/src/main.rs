use aws_config::BehaviorVersion;
use aws_lambda_events::event::s3::S3Event;
use aws_sdk_s3::Client;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use log::debug;
use tflite_serve::ImageClassifier;

mod config;
mod error;
mod handler;
mod s3;

use config::Config;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let config = Config::from_env();
    debug!("Configuration: {:?}", config);

    let shared_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let client = Client::new(&shared_config);

    s3::download_file(
        &client,
        &config.model_bucket,
        &config.model_filename,
        &config.model_path(),
    )
    .await?;
    s3::download_file(
        &client,
        &config.model_bucket,
        &config.signatures_filename,
        &config.signature_path(),
    )
    .await?;

    let classifier = ImageClassifier::load(&config.model_dir, &config.signatures_filename)?;

    debug!("Loaded model in memory");

    let client_ref = &client;
    let classifier_ref = &classifier;

    let handler_closure = move |event: LambdaEvent<S3Event>| async move {
        handler::handle_event(event, client_ref, classifier_ref).await
    };

    debug!("Dispatching handler");
    lambda_runtime::run(service_fn(handler_closure)).await?;

    Ok(())
}
