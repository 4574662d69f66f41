//! Remote storage over HTTP
//!
//! Bundles are exchanged as gzip-compressed tarballs at
//! `<base_url>/<package>/<target>/<fingerprint>.tar.gz`:
//! `HEAD` answers `exists`, `GET` fetches and `PUT` stores. Any server that
//! maps those verbs onto blobs (an object store bucket, a small web server)
//! works.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;

use super::{CacheKey, CacheStorage};
use crate::error::StorageError;

/// Storage backed by an HTTP blob server
#[derive(Debug, Clone)]
pub struct HttpStorage {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpStorage {
    /// Create a storage for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            name: format!("http:{base_url}"),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
        }
    }

    /// URL of the archive for `key`
    ///
    /// Package and target names are percent-encoded as path segments.
    pub fn url(&self, key: &CacheKey) -> Result<String, StorageError> {
        let invalid = |error: String| StorageError::NetworkError {
            url: self.base_url.clone(),
            error,
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        let [package, target, fingerprint] = key.segments();
        let archive = format!("{fingerprint}.tar.gz");
        url.path_segments_mut()
            .map_err(|()| invalid("not a hierarchical URL".to_string()))?
            .pop_if_empty()
            .extend([package, target, archive.as_str()]);
        Ok(url.into())
    }

    fn network_error(url: &str, e: &reqwest::Error) -> StorageError {
        StorageError::NetworkError {
            url: url.to_string(),
            error: e.to_string(),
        }
    }
}

impl CacheStorage for HttpStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let url = self.url(key)?;
            let response = self
                .client
                .head(&url)
                .send()
                .await
                .map_err(|e| Self::network_error(&url, &e))?;

            match response.status() {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                s => Err(StorageError::HttpStatus {
                    url,
                    status: s.as_u16(),
                }),
            }
        })
    }

    fn fetch<'a>(
        &'a self,
        key: &'a CacheKey,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let url = self.url(key)?;
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| Self::network_error(&url, &e))?;

            match response.status() {
                s if s.is_success() => {}
                StatusCode::NOT_FOUND => return Ok(false),
                s => {
                    return Err(StorageError::HttpStatus {
                        url,
                        status: s.as_u16(),
                    })
                }
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| Self::network_error(&url, &e))?;

            let dest = destination.to_path_buf();
            let key_name = key.to_string();
            tokio::task::spawn_blocking(move || unpack(&body, &dest, &key_name))
                .await
                .map_err(|e| StorageError::ArchiveError {
                    key: key.to_string(),
                    error: e.to_string(),
                })??;

            Ok(true)
        })
    }

    fn store<'a>(
        &'a self,
        key: &'a CacheKey,
        bundle: &'a Path,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let url = self.url(key)?;
            let source = bundle.to_path_buf();
            let key_name = key.to_string();
            let archive = tokio::task::spawn_blocking(move || pack(&source, &key_name))
                .await
                .map_err(|e| StorageError::ArchiveError {
                    key: key.to_string(),
                    error: e.to_string(),
                })??;

            let response = self
                .client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/gzip")
                .body(archive)
                .send()
                .await
                .map_err(|e| Self::network_error(&url, &e))?;

            if !response.status().is_success() {
                return Err(StorageError::HttpStatus {
                    url,
                    status: response.status().as_u16(),
                });
            }

            tracing::debug!("Uploaded {key} to {url}");
            Ok(())
        })
    }
}

/// Create a gzip-compressed tarball of a bundle directory
fn pack(bundle: &Path, key: &str) -> Result<Vec<u8>, StorageError> {
    let archive_err = |e: std::io::Error| StorageError::ArchiveError {
        key: key.to_string(),
        error: e.to_string(),
    };

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", bundle).map_err(archive_err)?;
    let encoder = builder.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)
}

/// Unpack a gzip-compressed tarball into `destination`
fn unpack(archive: &[u8], destination: &Path, key: &str) -> Result<(), StorageError> {
    let archive_err = |e: std::io::Error| StorageError::ArchiveError {
        key: key.to_string(),
        error: e.to_string(),
    };

    std::fs::create_dir_all(destination).map_err(archive_err)?;
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    archive.unpack(destination).map_err(archive_err)
}
