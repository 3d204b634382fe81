//! Content-addressed blob I/O against the S3-compatible object store.
//!
//! Bucket selection is a pure function of volatility; downloads verify size
//! and checksum while streaming. A mismatch is logged as a warning but does
//! not abort: the backend checksum may lag for just-uploaded files.

use std::path::{Path, PathBuf};

use base64::Engine;
use cloudnet_common::{CloudnetError, CloudnetResult, Config, ProductFileMetadata, RawFileMetadata};
use futures::StreamExt;
use reqwest::{Body, Client};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::retry::{check_status, send_with_retry};

const RAW_BUCKET: &str = "cloudnet-upload";
const IMG_BUCKET: &str = "cloudnet-img";

/// Bucket for processed products, selected by volatility.
pub fn product_bucket(volatile: bool) -> &'static str {
    if volatile {
        "cloudnet-product-volatile"
    } else {
        "cloudnet-product"
    }
}

/// Result of a product upload.
#[derive(Debug, Clone)]
pub struct StorageUpload {
    /// Version id assigned by the store, if any.
    pub version: Option<String>,
    /// Size in bytes as seen by the store.
    pub size: u64,
}

/// Checksum algorithm used to verify a download.
#[derive(Debug, Clone, Copy)]
enum ChecksumKind {
    Md5,
    Sha256,
}

/// Client for the Cloudnet object store.
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    base_url: String,
    auth: (String, String),
}

impl StorageClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.storage_service_url.clone(),
            auth: config.storage_service_auth.clone(),
        }
    }

    /// Upload a processed product file.
    pub async fn upload_product(
        &self,
        full_path: &Path,
        s3key: &str,
        volatile: bool,
    ) -> CloudnetResult<StorageUpload> {
        let url = format!("{}/{}/{}", self.base_url, product_bucket(volatile), s3key);
        let response = self.put_file(&url, full_path).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CloudnetError::Storage(format!("Invalid upload response: {e}")))?;
        parse_upload_response(&body)
    }

    /// Upload a rendered quicklook image.
    pub async fn upload_image(&self, full_path: &Path, s3key: &str) -> CloudnetResult<()> {
        let url = format!("{}/{IMG_BUCKET}/{}", self.base_url, s3key);
        self.put_file(&url, full_path).await?;
        Ok(())
    }

    /// Download a product file, verifying SHA-256 and size.
    pub async fn download_product(
        &self,
        metadata: &ProductFileMetadata,
        directory: &Path,
    ) -> CloudnetResult<PathBuf> {
        let bucket = product_bucket(metadata.volatile);
        let url = format!("{}/{bucket}/{}", self.base_url, metadata.s3key());
        let full_path = directory.join(&metadata.filename);
        self.fetch_verified(
            &url,
            &full_path,
            metadata.size,
            &metadata.checksum,
            ChecksumKind::Sha256,
        )
        .await?;
        Ok(full_path)
    }

    /// Download several products concurrently, preserving input order.
    pub async fn download_products(
        &self,
        metadata: &[ProductFileMetadata],
        directory: &Path,
    ) -> CloudnetResult<Vec<PathBuf>> {
        let results: Vec<CloudnetResult<PathBuf>> = futures::stream::iter(metadata)
            .map(|meta| self.download_product(meta, directory))
            .buffered(4)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Download raw instrument or model files, verifying MD5.
    ///
    /// All records must belong to the same instrument PID (or none).
    pub async fn download_raw_data(
        &self,
        metadata: &[RawFileMetadata],
        directory: &Path,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        let mut pids: Vec<&str> = metadata
            .iter()
            .filter_map(|row| row.instrument_pid.as_deref())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        if pids.len() > 1 {
            return Err(CloudnetError::Storage(format!(
                "Raw files from multiple instruments: {pids:?}"
            )));
        }

        let mut full_paths = Vec::with_capacity(metadata.len());
        for row in metadata {
            let url = format!("{}/{RAW_BUCKET}/{}", self.base_url, row.s3key);
            let full_path = directory.join(&row.filename);
            self.fetch_verified(&url, &full_path, row.size, &row.checksum, ChecksumKind::Md5)
                .await?;
            full_paths.push(full_path);
        }
        let uuids = metadata.iter().map(|row| row.uuid).collect();
        Ok((full_paths, uuids))
    }

    /// Remove a volatile product object. Used only when finalizing a freeze.
    pub async fn delete_volatile_product(&self, s3key: &str) -> CloudnetResult<()> {
        let url = format!("{}/{}/{}", self.base_url, product_bucket(true), s3key);
        let request = self
            .client
            .delete(&url)
            .basic_auth(&self.auth.0, Some(&self.auth.1));
        send_with_retry(request).await?;
        Ok(())
    }

    async fn put_file(&self, url: &str, full_path: &Path) -> CloudnetResult<reqwest::Response> {
        let checksum = md5_base64(full_path).await?;
        let file = File::open(full_path).await?;
        let body = Body::wrap_stream(ReaderStream::new(file));
        debug!(%url, "Uploading");
        let request = self
            .client
            .put(url)
            .basic_auth(&self.auth.0, Some(&self.auth.1))
            .header("content-md5", checksum)
            .body(body);
        // Streaming bodies cannot be replayed, so this is a single attempt.
        check_status(request.send().await.map_err(|e| {
            CloudnetError::Storage(format!("Upload failed: {e}"))
        })?)
        .await
    }

    /// Stream a download to disk, checking byte count and checksum.
    async fn fetch_verified(
        &self,
        url: &str,
        full_path: &Path,
        expected_size: u64,
        expected_checksum: &str,
        kind: ChecksumKind,
    ) -> CloudnetResult<()> {
        debug!(%url, "Downloading");
        let request = self
            .client
            .get(url)
            .basic_auth(&self.auth.0, Some(&self.auth.1));
        let response = send_with_retry(request).await?;

        let mut output = File::create(full_path).await?;
        let mut stream = response.bytes_stream();
        let mut size: u64 = 0;
        let mut md5_context = md5::Context::new();
        let mut sha256 = Sha256::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CloudnetError::Storage(format!("Read failed: {e}")))?;
            output.write_all(&chunk).await?;
            size += chunk.len() as u64;
            match kind {
                ChecksumKind::Md5 => md5_context.consume(&chunk),
                ChecksumKind::Sha256 => sha256.update(&chunk),
            }
        }
        output.flush().await?;

        if size != expected_size {
            warn!(expected = expected_size, got = size, "Invalid size");
        }
        let checksum = match kind {
            ChecksumKind::Md5 => format!("{:x}", md5_context.compute()),
            ChecksumKind::Sha256 => format!("{:x}", sha256.finalize()),
        };
        if checksum != expected_checksum {
            warn!(expected = expected_checksum, got = %checksum, "Invalid checksum");
        }
        Ok(())
    }
}

/// Base64-encoded MD5 digest for the `Content-MD5` header.
async fn md5_base64(full_path: &Path) -> CloudnetResult<String> {
    let data = tokio::fs::read(full_path).await?;
    let digest = md5::compute(&data);
    Ok(base64::engine::general_purpose::STANDARD.encode(digest.0))
}

fn parse_upload_response(value: &serde_json::Value) -> CloudnetResult<StorageUpload> {
    let size = match value.get("size") {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CloudnetError::Storage("Upload response missing size".to_string()))?;
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(StorageUpload { version, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(url: &str) -> Config {
        let env: HashMap<String, String> = [
            ("DATAPORTAL_URL", "http://dataportal"),
            ("DATAPORTAL_PUBLIC_URL", "https://cloudnet.fmi.fi"),
            ("STORAGE_SERVICE_URL", url),
            ("STORAGE_SERVICE_USER", "test"),
            ("STORAGE_SERVICE_PASSWORD", "test"),
            ("PID_SERVICE_URL", "http://pid"),
            ("FREEZE_AFTER_DAYS", "3"),
            ("FREEZE_MODEL_AFTER_DAYS", "4"),
            ("DVAS_PORTAL_URL", "http://dvas"),
            ("DVAS_ACCESS_TOKEN", "token"),
            ("DVAS_USERNAME", "dvas"),
            ("DVAS_PASSWORD", "dvas"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_map(&env).unwrap()
    }

    #[test]
    fn bucket_selection() {
        assert_eq!(product_bucket(true), "cloudnet-product-volatile");
        assert_eq!(product_bucket(false), "cloudnet-product");
    }

    #[test]
    fn upload_response_parsing() {
        let parsed =
            parse_upload_response(&serde_json::json!({"size": 1234, "version": "abc"})).unwrap();
        assert_eq!(parsed.size, 1234);
        assert_eq!(parsed.version.as_deref(), Some("abc"));

        let parsed = parse_upload_response(&serde_json::json!({"size": "99"})).unwrap();
        assert_eq!(parsed.size, 99);
        assert!(parsed.version.is_none());

        assert!(parse_upload_response(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn md5_header_is_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();
        // Base64 MD5 of the empty string.
        assert_eq!(md5_base64(&path).await.unwrap(), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[tokio::test]
    async fn upload_product_sends_content_md5() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/cloudnet-product-volatile/test.nc")
            .match_header("content-md5", "1B2M2Y8AsgTpgAmY7PhCfg==")
            .with_status(200)
            .with_body(r#"{"size": 0, "version": "v1"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.nc");
        tokio::fs::write(&path, b"").await.unwrap();

        let storage = StorageClient::new(&test_config(&server.url()), Client::new());
        let result = storage.upload_product(&path, "test.nc", true).await.unwrap();
        assert_eq!(result.version.as_deref(), Some("v1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_verifies_but_does_not_abort_on_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/cloudnet-upload/site/raw.dat")
            .with_status(200)
            .with_body(b"hello")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let raw = RawFileMetadata {
            uuid: Uuid::nil(),
            filename: "raw.dat".to_string(),
            // Deliberately wrong checksum and size: download still succeeds.
            checksum: "00000000000000000000000000000000".to_string(),
            size: 999,
            s3key: "site/raw.dat".to_string(),
            measurement_date: chrono::NaiveDate::from_ymd_opt(2020, 10, 22).unwrap(),
            status: cloudnet_common::RawFileStatus::Uploaded,
            site: None,
            instrument: None,
            instrument_pid: None,
            tags: vec![],
            created_at: None,
            updated_at: None,
        };

        let storage = StorageClient::new(&test_config(&server.url()), Client::new());
        let (paths, uuids) = storage
            .download_raw_data(std::slice::from_ref(&raw), dir.path())
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(uuids, vec![Uuid::nil()]);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"hello");
    }
}
