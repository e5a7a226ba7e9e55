//! Delivery: saves verified files into the download directory.
//!
//! Only the final component of the declared name is used, and an existing
//! file is never overwritten: collisions get a ` (n)` suffix.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::decoder::ReceivedFile;

const FALLBACK_NAME: &str = "download";
const MAX_COLLISIONS: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to create download directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("no free file name for {0} in the download directory")]
    NoFreeName(String),
}

/// Directory received files are written into.
#[derive(Debug, Clone)]
pub struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `file` under its declared name. Returns the path written.
    pub async fn save(&self, file: &ReceivedFile) -> Result<PathBuf, DeliveryError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DeliveryError::CreateDir(self.root.clone(), e))?;

        let name = sanitize_file_name(&file.name);
        for attempt in 0..MAX_COLLISIONS {
            let path = self.root.join(numbered_name(&name, attempt));
            let mut out = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(DeliveryError::Write(path, e)),
            };

            let written = async {
                out.write_all(&file.data).await?;
                out.flush().await
            }
            .await;
            if let Err(e) = written {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(DeliveryError::Write(path, e));
            }

            tracing::info!(
                transfer_id = %file.transfer_id,
                content_type = %file.content_type,
                bytes = file.data.len(),
                path = %path.display(),
                "file saved"
            );
            return Ok(path);
        }
        Err(DeliveryError::NoFreeName(name))
    }
}

/// Reduce a declared name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\0', "");
    match last.as_str() {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        _ => last,
    }
}

/// `report.pdf` → `report (2).pdf`; attempt 0 keeps the name.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({attempt}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({attempt})"),
    }
}
