//! Screenshots and HTML dumps written to disk.
//!
//! ```text
//! {dir}/
//! ├── 20261019-142501-123_takeScreenshot.png
//! ├── 20261019-142503-870_getFullHtml.html
//! └── ...
//! ```

use std::path::{Path, PathBuf};

use chrono::Local;
use tabpilot_protocols::AgentResponse;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::format::decode_data_uri;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot decode artifact: {0}")]
    Decode(String),
}

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!("artifact store at {:?}", dir);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sanitize(label: &str) -> String {
        label
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    fn file_path(&self, label: &str, extension: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S-%3f");
        self.dir
            .join(format!("{}_{}.{}", stamp, Self::sanitize(label), extension))
    }

    fn extension_for(mime_type: &str) -> &'static str {
        match mime_type {
            "image/jpeg" | "image/jpg" => "jpeg",
            "image/webp" => "webp",
            _ => "png",
        }
    }

    /// Write a `data:` URI screenshot; the extension follows its MIME type.
    pub async fn save_screenshot(&self, data_uri: &str, label: &str) -> Result<PathBuf, ArtifactError> {
        let (mime_type, data) =
            decode_data_uri(data_uri).map_err(|e| ArtifactError::Decode(e.to_string()))?;
        let path = self.file_path(label, Self::extension_for(&mime_type));
        fs::write(&path, data).await?;
        debug!("saved screenshot to {:?}", path);
        Ok(path)
    }

    pub async fn save_html(&self, html: &str, label: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.file_path(label, "html");
        fs::write(&path, html).await?;
        debug!("saved html to {:?}", path);
        Ok(path)
    }

    /// Save whatever artifacts a response carries, labelled by its command.
    pub async fn save_response(&self, response: &AgentResponse) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut saved = Vec::new();
        if let Some(screenshot) = response.screenshot.as_deref() {
            saved.push(self.save_screenshot(screenshot, &response.command).await?);
        }
        if let Some(html) = response.html_content.as_deref() {
            saved.push(self.save_html(html, &response.command).await?);
        }
        Ok(saved)
    }
}
