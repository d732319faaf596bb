use std::future::Future;

use aws_lambda_events::event::s3::S3Event;
use aws_sdk_s3::Client;
use lambda_runtime::{Error, LambdaEvent};
use log::{debug, info};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use tflite_serve::{ImageClassifier, Timer};

use crate::error::HandlerError;
use crate::s3;

/// An object named by an S3 event record.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

/// Event keys arrive form-encoded: `+` for a space, `%XX` for other bytes.
fn decode_key(key: &str) -> Result<String, HandlerError> {
    let plus_decoded = key.replace('+', " ");

    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| HandlerError::InvalidKey(key.to_owned()))
}

/// Extracts the objects an event refers to, in record order.
pub fn objects(event: &S3Event) -> Result<Vec<ObjectRef>, HandlerError> {
    event
        .records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let bucket = record
                .s3
                .bucket
                .name
                .clone()
                .ok_or(HandlerError::MissingBucket(i))?;
            let key = record
                .s3
                .object
                .key
                .clone()
                .ok_or(HandlerError::MissingKey(i))?;

            Ok(ObjectRef {
                bucket,
                key: decode_key(&key)?,
            })
        })
        .collect()
}

/// Classifies every object in turn and returns the last classification,
/// or an empty object when there is nothing to classify.
pub async fn classify_objects<F, Fut>(
    objects: Vec<ObjectRef>,
    classifier: &ImageClassifier,
    mut fetch: F,
) -> Result<Value, HandlerError>
where
    F: FnMut(ObjectRef) -> Fut,
    Fut: Future<Output = Result<Vec<u8>, HandlerError>>,
{
    let mut results = json!({});

    for object in objects {
        info!(
            "Image to be processed, from: bucket [{}], object key: [{}]",
            object.bucket, object.key
        );

        let mut t = Timer::new_start("Handling record");

        let key = object.key.clone();
        let data = fetch(object).await?;
        let classification = classifier.classify_from_raw(&data)?;

        t.stop();

        info!(
            "{}: {} ({:.4})",
            key,
            classification.label(),
            classification.confidence()
        );

        results = serde_json::to_value(&classification)?;
    }

    Ok(results)
}

pub async fn handle_event(
    event: LambdaEvent<S3Event>,
    client: &Client,
    classifier: &ImageClassifier,
) -> Result<Value, Error> {
    let (event, context) = event.into_parts();
    debug!("Received {} record(s), request {}", event.records.len(), context.request_id);

    let results = classify_objects(objects(&event)?, classifier, move |object| async move {
        s3::get_object(client, &object.bucket, &object.key).await
    })
    .await?;

    debug!("Returning {}", results);

    Ok(results)
}
