//! S3-compatible object store backend (AWS, R2, MinIO, RustFS).
//!
//! Directories are common prefixes of a `/`-delimited listing. Files are
//! fetched through a presigned GET and streamed to disk.

use super::{DirectoryPage, FileEntry, StorageBackend};
use crate::error::{EngineError, EngineResult};
use crate::paths::{file_name, normalize_path};
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use futures_util::StreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Write buffer size for downloads (2 MB) - reduces I/O operations
const WRITE_BUFFER_SIZE: usize = 2 * 1024 * 1024;

fn default_presign_expiry() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3BackendConfig {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_scheme: Option<String>,
    pub endpoint_host: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
}

impl S3BackendConfig {
    fn endpoint_url(&self) -> Option<String> {
        let host = self.endpoint_host.as_ref()?.trim();
        if host.is_empty() {
            return None;
        }
        let scheme = self.endpoint_scheme.as_deref().unwrap_or("https");
        Some(format!("{}://{}", scheme, host))
    }

    /// Object key for a source path, accepting an optional `s3://bucket/` prefix.
    fn object_key(&self, path: &str) -> String {
        let path = normalize_path(path);
        let bucket_prefix = format!("s3://{}", self.bucket);
        match path.strip_prefix(&bucket_prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                rest.trim_start_matches('/').to_string()
            }
            _ => path.trim_start_matches('/').to_string(),
        }
    }

    /// Listing prefix for a directory path: "" for the bucket root, else "dir/".
    fn list_prefix(&self, path: &str) -> String {
        let key = self.object_key(path);
        if key.is_empty() {
            key
        } else {
            format!("{}/", key)
        }
    }
}

pub struct S3Backend {
    config: S3BackendConfig,
    client: Client,
    http: reqwest::Client,
    cancel: Mutex<CancellationToken>,
}

impl S3Backend {
    pub fn new(config: S3BackendConfig) -> EngineResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "s3-provider",
        );

        let mut builder = S3ConfigBuilder::new()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()));

        if let Some(endpoint_url) = config.endpoint_url() {
            builder = builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            http,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    async fn presigned_get_url(&self, key: &str) -> EngineResult<String> {
        let presigning_config =
            PresigningConfig::builder()
                .expires_in(Duration::from_secs(self.config.presign_expiry_secs))
                .build()
                .map_err(|e| EngineError::transfer(key, format!("Failed to presign: {}", e)))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| {
                EngineError::transfer(key, format!("Failed to presign: {}", DisplayErrorContext(e)))
            })?;

        Ok(presigned_request.uri().to_string())
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Backend {
    async fn list_directory_page(
        &self,
        path: &str,
        marker: Option<&str>,
        page_size: u32,
    ) -> EngineResult<DirectoryPage> {
        let prefix = self.config.list_prefix(path);
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .delimiter("/")
            .max_keys(i32::try_from(page_size).unwrap_or(i32::MAX));

        if !prefix.is_empty() {
            request = request.prefix(&prefix);
        }
        if let Some(token) = marker {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::listing(path, DisplayErrorContext(e)))?;

        let mut entries: Vec<FileEntry> = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .map(|p| {
                let dir = p.trim_end_matches('/');
                FileEntry::directory(dir, file_name(dir))
            })
            .collect();

        entries.extend(response.contents().iter().filter_map(|obj| {
            let key = obj.key()?;
            if key.ends_with('/') || key == prefix {
                return None;
            }
            let size = obj.size().unwrap_or(0).max(0) as u64;
            Some(FileEntry::file(key, file_name(key), size))
        }));

        let has_more = response.is_truncated().unwrap_or(false);
        let next_marker = response.next_continuation_token().map(|s| s.to_string());
        debug!(
            "s3_list_page: {}/{} returned={} has_more={}",
            self.config.bucket,
            prefix,
            entries.len(),
            has_more
        );

        Ok(DirectoryPage {
            path: path.to_string(),
            entries,
            has_more,
            next_marker,
        })
    }

    async fn transfer_file(&self, source_path: &str, dest_local_path: &Path) -> EngineResult<u64> {
        let key = self.config.object_key(source_path);
        let url = self.presigned_get_url(&key).await?;
        let token = self.cancel.lock().unwrap().clone();
        download_url_to_file(&self.http, &url, source_path, dest_local_path, &token).await
    }

    fn cancel_all_transfers(&self) {
        let mut token = self.cancel.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
        info!("s3_cancel_all: {}", self.config.bucket);
    }
}

/// Stream `url` into `destination` through a write buffer.
///
/// A cancelled `token` aborts between chunks; the partial file is removed.
pub async fn download_url_to_file(
    client: &reqwest::Client,
    url: &str,
    source_path: &str,
    destination: &Path,
    token: &CancellationToken,
) -> EngineResult<u64> {
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("download_cancelled: {} before response", source_path);
            return Err(EngineError::Cancelled);
        }
        response = client.get(url).send() => response.map_err(|e| {
            EngineError::transfer(source_path, format!("Download request failed: {}", e))
        })?,
    };

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(EngineError::transfer(
            source_path,
            format!("Download failed: {} - {}", status, text),
        ));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            EngineError::transfer(source_path, format!("Failed to create directory: {}", e))
        })?;
    }

    let mut file = File::create(destination)
        .await
        .map_err(|e| EngineError::transfer(source_path, format!("Failed to create file: {}", e)))?;

    let mut stream = response.bytes_stream();
    let mut write_buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);
    let mut written: u64 = 0;

    loop {
        let chunk_result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                drop(file);
                let _ = tokio::fs::remove_file(destination).await;
                debug!("download_cancelled: {}", source_path);
                return Err(EngineError::Cancelled);
            }
            next = stream.next() => next,
        };

        let Some(chunk_result) = chunk_result else {
            break;
        };
        let chunk = chunk_result
            .map_err(|e| EngineError::transfer(source_path, format!("Failed to read chunk: {}", e)))?;

        write_buffer.extend_from_slice(&chunk);
        written += chunk.len() as u64;

        if write_buffer.len() >= WRITE_BUFFER_SIZE {
            file.write_all(&write_buffer)
                .await
                .map_err(|e| EngineError::transfer(source_path, format!("Failed to write buffer: {}", e)))?;
            write_buffer.clear();
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer).await.map_err(|e| {
            EngineError::transfer(source_path, format!("Failed to write remaining buffer: {}", e))
        })?;
    }

    file.flush()
        .await
        .map_err(|e| EngineError::transfer(source_path, format!("Failed to flush file: {}", e)))?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3BackendConfig {
        S3BackendConfig {
            bucket: "media".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            region: "auto".to_string(),
            endpoint_scheme: None,
            endpoint_host: Some("  ".to_string()),
            force_path_style: true,
            presign_expiry_secs: 60,
        }
    }

    #[test]
    fn object_key_strips_bucket_url() {
        let config = config();
        assert_eq!(config.object_key("s3://media/docs/a.txt"), "docs/a.txt");
        assert_eq!(config.object_key("/docs//a.txt"), "docs/a.txt");
        assert_eq!(config.list_prefix("s3://media"), "");
        assert_eq!(config.list_prefix("docs/img/"), "docs/img/");
    }

    #[test]
    fn blank_endpoint_host_uses_default_endpoint() {
        let mut config = config();
        assert_eq!(config.endpoint_url(), None);
        config.endpoint_host = Some("minio.local:9000".to_string());
        config.endpoint_scheme = Some("http".to_string());
        assert_eq!(config.endpoint_url().as_deref(), Some("http://minio.local:9000"));
    }

    #[test]
    fn config_defaults_presign_expiry() {
        let config: S3BackendConfig = serde_json::from_str(
            r#"{"bucket":"b","access_key_id":"k","secret_access_key":"s","region":"auto"}"#,
        )
        .unwrap();
        assert_eq!(config.presign_expiry_secs, 3600);
        assert!(!config.force_path_style);
    }
}
