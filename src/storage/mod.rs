//! Object storage for page rasters and original PDF bytes.
//!
//! Keys are always relative and scoped by document id:
//!
//! | Object | Key |
//! |--------|-----|
//! | rendered page | `{document_id}/page-{n}.jpg` |
//! | uploaded PDF | `{document_id}/original.pdf` |
//!
//! Two backends implement [`ObjectStore`]: [`FsObjectStore`] (a directory
//! served by `GET /objects/{*key}`) and [`S3ObjectStore`] (S3 REST API with
//! SigV4 signing).

mod fs;
mod s3;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StorageConfig;

pub use fs::FsObjectStore;
pub use s3::S3ObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `"filesystem"` or `"s3"`.
    fn backend(&self) -> &str;

    /// Write `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read an object. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove an object. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// URL recorded in `pages.image_url` for `key`.
    fn public_url(&self, key: &str) -> String;
}

pub fn page_image_key(document_id: &str, page_number: i64) -> String {
    format!("{}/page-{}.jpg", document_id, page_number)
}

pub fn original_pdf_key(document_id: &str) -> String {
    format!("{}/original.pdf", document_id)
}

/// Listing prefix covering every object of one document.
pub fn document_prefix(document_id: &str) -> String {
    format!("{}/", document_id)
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        bail!("invalid object key: {:?}", key);
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        bail!("invalid object key: {:?}", key);
    }
    Ok(())
}

pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Build the configured backend.
pub fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "filesystem" => Ok(Arc::new(FsObjectStore::new(
            config.root.clone(),
            config.public_base_url.clone(),
        ))),
        "s3" => {
            let s3 = config
                .s3
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.s3 section is required for the s3 backend"))?;
            Ok(Arc::new(S3ObjectStore::new(s3)?))
        }
        other => bail!("Unknown storage backend: {}", other),
    }
}
