use axum::body::Bytes;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

pub const MAX_PAGES: usize = 5;
pub const MAX_PAGE_BYTES: usize = 10 * 1024 * 1024;
pub const PUBLIC_PREFIX: &str = "/uploads";

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// One photographed page received with an upload.
#[derive(Debug, Clone)]
pub struct PageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl PageUpload {
    pub fn check(&self) -> Result<(), String> {
        let is_image = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(format!("Page '{}' is not an image", self.file_name));
        }
        if self.bytes.len() > MAX_PAGE_BYTES {
            return Err(format!(
                "Page '{}' exceeds the {} MB limit",
                self.file_name,
                MAX_PAGE_BYTES / (1024 * 1024)
            ));
        }
        Ok(())
    }
}

/// Keeps only characters that are safe in a file name on any platform.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "page".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Local directory holding page images, published under [`PUBLIC_PREFIX`].
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes every page and returns their public URIs in order.
    /// Nothing is left behind if any write fails.
    pub async fn save_all(&self, pages: &[PageUpload]) -> io::Result<Vec<String>> {
        tokio::fs::create_dir_all(&self.root).await?;

        let stamp = Utc::now().timestamp_micros();
        let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut uris = Vec::with_capacity(pages.len());
        for (index, page) in pages.iter().enumerate() {
            let stored = format!("{}-{}-{}-{}", stamp, seq, index, sanitize_file_name(&page.file_name));
            if let Err(e) = write_new(&self.root.join(&stored), &page.bytes).await {
                self.discard(&uris).await;
                return Err(e);
            }
            uris.push(format!("{}/{}", PUBLIC_PREFIX, stored));
        }
        Ok(uris)
    }

    /// Best-effort removal of previously stored pages.
    pub async fn discard(&self, uris: &[String]) {
        for uri in uris {
            let Some(stored) = uri.strip_prefix(PUBLIC_PREFIX).map(|s| s.trim_start_matches('/')) else {
                continue;
            };
            if let Err(e) = tokio::fs::remove_file(self.root.join(sanitize_file_name(stored))).await {
                tracing::warn!("Could not remove page {}: {}", uri, e);
            }
        }
    }
}

/// Fails with `AlreadyExists` rather than replacing another card's page.
async fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if written.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    written
}
