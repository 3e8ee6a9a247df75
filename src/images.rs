//! Detection snapshot images.
//!
//! The client uploads one JPEG per detection. Images are stored as
//! `<detection id>.jpg` under a fixed directory; a re-upload replaces the
//! previous file.

use anyhow::{anyhow, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_DIR: &str = "potholes";

pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `bytes` and returns the file name it was written under.
    pub fn save(&self, detection_id: &str, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(anyhow!("Empty image data received"));
        }
        let filename = format!("{}.jpg", sanitize_detection_id(detection_id)?);
        write_atomic(&self.root.join(&filename), bytes)?;
        Ok(filename)
    }
}

/// Ids become file names, so only `[A-Za-z0-9_#-]` is accepted.
fn sanitize_detection_id(detection_id: &str) -> Result<&str> {
    let trimmed = detection_id.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("detection id cannot be empty"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '#')
    {
        return Err(anyhow!("detection id must be [A-Za-z0-9_#-] only"));
    }
    Ok(trimmed)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
