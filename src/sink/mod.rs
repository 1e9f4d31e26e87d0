//! The Output Sink (§4.3): an append-only line-delimited JSON writer per
//! task, with size-triggered rotation, zstd compression, and upload.
//!
//! Grounded on `TaskProcessor._write_output` /
//! `_compress_upload_and_delete_data_written_to_current_output_file` in
//! `app/tasks/processing.py`, reimplemented with `tokio::fs` and
//! `tokio::task::spawn_blocking` for the compression step (§5 "Suspension
//! points"), and `object_store` in place of the original's ad hoc `boto3`
//! upload helper.

mod error;

pub use error::{Error, ErrorKind, Result};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::objectstore::ObjectStoreClient;

/// One completed upload, handed back to the caller (the Task Processor)
/// so it can append the corresponding record to the Task Metadata Store.
/// The sink itself never touches the metadata store (§4.6 keeps queue
/// store/sink/metadata store as independently-owned resources).
#[derive(Debug, Clone)]
pub struct UploadEvent {
    pub s3_key: String,
    pub s3_bucket: String,
    pub s3_endpoint_url: String,
    pub size_bytes: u64,
}

pub struct OutputSink {
    segment_path: PathBuf,
    compressed_path: PathBuf,
    file: tokio::fs::File,
    segment_threshold_bytes: u64,
    s3_prefix: String,
    object_store: Arc<ObjectStoreClient>,
    server_ip: String,
}

impl OutputSink {
    /// Opens (or creates) the task's segment file. If a compressed sibling
    /// already exists from a crash mid-rotation, it is uploaded first
    /// (§4.3 "any pre-existing compressed-but-not-yet-uploaded segment is
    /// uploaded before completion is declared").
    pub async fn open(
        output_dir: &Path,
        task_id: i64,
        s3_prefix: String,
        segment_threshold_bytes: u64,
        object_store: Arc<ObjectStoreClient>,
        server_ip: String,
    ) -> Result<(Self, Option<UploadEvent>)> {
        tokio::fs::create_dir_all(output_dir).await?;
        let segment_path = output_dir.join(format!("{task_id}.jsonl"));
        let compressed_path = output_dir.join(format!("{task_id}.jsonl.zst"));

        let mut leftover_upload = None;
        if tokio::fs::try_exists(&compressed_path).await.unwrap_or(false) {
            leftover_upload = Some(
                upload_and_delete(&compressed_path, &s3_prefix, &server_ip, &object_store).await?,
            );
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)
            .await?;

        Ok((
            OutputSink {
                segment_path,
                compressed_path,
                file,
                segment_threshold_bytes,
                s3_prefix,
                object_store,
                server_ip,
            },
            leftover_upload,
        ))
    }

    /// Appends one output record, injecting `observed_at`, then rotates
    /// the segment if it has grown past the threshold (§4.3).
    pub async fn append(&mut self, output: &Value) -> Result<Option<UploadEvent>> {
        let record = wrap_with_observed_at(output);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;

        let size = tokio::fs::metadata(&self.segment_path).await?.len();
        if size >= self.segment_threshold_bytes {
            let event = self.rotate().await?;
            Ok(Some(event))
        } else {
            Ok(None)
        }
    }

    /// Closes, compresses, and uploads the current segment, then opens a
    /// fresh one (§4.3 steps 1-5).
    async fn rotate(&mut self) -> Result<UploadEvent> {
        self.file.flush().await?;
        self.file.shutdown().await?;

        compress_file(&self.segment_path, &self.compressed_path).await?;

        let event =
            upload_and_delete(&self.compressed_path, &self.s3_prefix, &self.server_ip, &self.object_store)
                .await?;

        self.file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.segment_path)
            .await?;

        Ok(event)
    }

    /// Called at the end of a task's run (§4.3 "At task end"): flushes
    /// whatever is left in the current segment. An empty segment is
    /// deleted without producing an upload; a nonempty one is
    /// compressed+uploaded.
    pub async fn tail_flush(mut self) -> Result<Option<UploadEvent>> {
        self.file.flush().await?;
        self.file.shutdown().await?;

        let size = tokio::fs::metadata(&self.segment_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = tokio::fs::remove_file(&self.segment_path).await;
            return Ok(None);
        }

        compress_file(&self.segment_path, &self.compressed_path).await?;
        let event =
            upload_and_delete(&self.compressed_path, &self.s3_prefix, &self.server_ip, &self.object_store)
                .await?;
        Ok(Some(event))
    }

    pub fn current_segment_size_bytes(&self) -> u64 {
        std::fs::metadata(&self.segment_path).map(|m| m.len()).unwrap_or(0)
    }
}

/// An output whose JSON form is not an object is wrapped `{data,
/// observed_at}`; an object gets `observed_at` injected, overwriting any
/// existing key of that name (§8 "Boundary behaviors").
fn wrap_with_observed_at(output: &Value) -> Value {
    let observed_at = Utc::now().to_rfc3339();
    match output {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("observed_at".to_string(), Value::String(observed_at));
            Value::Object(map)
        }
        other => serde_json::json!({ "data": other, "observed_at": observed_at }),
    }
}

async fn compress_file(input: &Path, output: &Path) -> Result<()> {
    let input = input.to_path_buf();
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::result::Result<(), std::io::Error> {
        let input_file = std::fs::File::open(&input)?;
        let output_file = std::fs::File::create(&output)?;
        let mut encoder = zstd::stream::Encoder::new(output_file, 0)?;
        let mut reader = std::io::BufReader::new(input_file);
        std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.flush()?;
        std::fs::remove_file(&input)?;
        Ok(())
    })
    .await
    .expect("compression task panicked")
    .map_err(ErrorKind::Compression)?;
    Ok(())
}

async fn upload_and_delete(
    compressed_path: &Path,
    s3_prefix: &str,
    server_ip: &str,
    object_store: &ObjectStoreClient,
) -> Result<UploadEvent> {
    let mtime = tokio::fs::metadata(compressed_path)
        .await?
        .modified()
        .map(chrono::DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let key = format!(
        "{s3_prefix}/{}_{server_ip}.jsonl.zst",
        mtime.format("%Y-%m-%d_%H-%M-%S")
    );

    let outcome = object_store.upload_file(compressed_path, &key).await?;
    tokio::fs::remove_file(compressed_path).await?;

    Ok(UploadEvent {
        s3_key: outcome.s3_key,
        s3_bucket: outcome.s3_bucket,
        s3_endpoint_url: outcome.s3_endpoint_url,
        size_bytes: outcome.size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Settings;
    use serde_json::json;

    fn test_object_store() -> Arc<ObjectStoreClient> {
        Arc::new(
            ObjectStoreClient::new(&S3Settings {
                endpoint_url: "http://localhost:9000".to_string(),
                bucket: "test-bucket".to_string(),
                key_id: "test".to_string(),
                secret: "test".to_string(),
            })
            .unwrap(),
        )
    }

    #[test]
    fn wraps_non_object_output() {
        let wrapped = wrap_with_observed_at(&json!(42));
        assert_eq!(wrapped["data"], json!(42));
        assert!(wrapped.get("observed_at").is_some());
    }

    #[test]
    fn injects_observed_at_into_object_output_overwriting_existing() {
        let wrapped = wrap_with_observed_at(&json!({ "x": 1, "observed_at": "stale" }));
        assert_eq!(wrapped["x"], json!(1));
        assert_ne!(wrapped["observed_at"], json!("stale"));
    }

    #[tokio::test]
    async fn append_without_reaching_threshold_does_not_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, leftover) = OutputSink::open(
            dir.path(),
            1,
            "prefix".to_string(),
            1024 * 1024,
            test_object_store(),
            "127.0.0.1".to_string(),
        )
        .await
        .unwrap();
        assert!(leftover.is_none());

        let event = sink.append(&json!({ "x": 1 })).await.unwrap();
        assert!(event.is_none());
        assert!(sink.current_segment_size_bytes() > 0);
    }

    #[tokio::test]
    async fn tail_flush_on_empty_segment_deletes_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _) = OutputSink::open(
            dir.path(),
            2,
            "prefix".to_string(),
            1024 * 1024,
            test_object_store(),
            "127.0.0.1".to_string(),
        )
        .await
        .unwrap();

        let event = sink.tail_flush().await.unwrap();
        assert!(event.is_none());
        assert!(!dir.path().join("2.jsonl").exists());
    }
}
