use std::path::Path;

use aws_sdk_s3::Client;
use log::debug;
use tflite_serve::Timer;

use crate::error::HandlerError;

/// Downloads a whole object into memory.
pub async fn get_object(client: &Client, bucket: &str, key: &str) -> Result<Vec<u8>, HandlerError> {
    let mut t = Timer::new_start(&format!("Fetching s3://{}/{}", bucket, key));

    let resp = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|err| HandlerError::Download {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            source: err.into(),
        })?;

    let body = resp
        .body
        .collect()
        .await
        .map_err(|err| HandlerError::Read {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            source: err,
        })?
        .into_bytes();

    t.stop();
    debug!("Read {} bytes from s3://{}/{}", body.len(), bucket, key);

    Ok(body.to_vec())
}

/// Downloads an object to `dest`, replacing any previous copy.
pub async fn download_file(
    client: &Client,
    bucket: &str,
    key: &str,
    dest: &Path,
) -> Result<(), HandlerError> {
    let data = get_object(client, bucket, key).await?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, data).await?;

    debug!("Saved s3://{}/{} to {}", bucket, key, dest.display());

    Ok(())
}
