use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use uuid::Uuid;

const RESUME_DIR: &str = "resumes";
const FALLBACK_FILE_NAME: &str = "resume";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores uploaded resumes below the media root.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    root: Arc<PathBuf>,
}

impl ResumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` and returns its path relative to the media root.
    pub async fn save(&self, file_name: &str, content: &[u8]) -> Result<String, UploadError> {
        let relative = format!(
            "{RESUME_DIR}/{}_{}",
            Uuid::new_v4().simple(),
            sanitize_file_name(file_name)
        );
        tokio::fs::create_dir_all(self.root.join(RESUME_DIR)).await?;
        tokio::fs::write(self.root.join(&relative), content).await?;
        Ok(relative)
    }

    /// Removes a stored file. A file that is already gone is not an error.
    pub async fn discard(&self, relative: &str) -> Result<(), UploadError> {
        match tokio::fs::remove_file(self.root.join(relative)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps the final path component and replaces anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
