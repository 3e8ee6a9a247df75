//! Device-side telemetry plumbing.
//!
//! - `DetectionCounter`: per-install monotonic detection id, persisted to a file
//! - `Uploader`: one fire-and-forget POST per event, no retry
//! - `fetch_snapshot` / `fetch_markers`: read side of the collection server

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::api::MarkerReport;
use crate::payload::TelemetrySnapshot;
use crate::{DetectionId, GpsFix, InertialSample};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of detection ids for one install.
///
/// The value survives restarts. It is not coordinated with any other
/// device, so ids from different installs may collide on a shared server.
#[derive(Debug)]
pub struct DetectionCounter {
    path: PathBuf,
    current: u64,
}

impl DetectionCounter {
    /// Opens the counter file, starting at zero when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                anyhow!("corrupt detection counter file {}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(anyhow!(
                    "failed to read detection counter {}: {}",
                    path.display(),
                    e
                ))
            }
        };
        Ok(Self { path, current })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last id handed out; `0` before the first detection.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Advances, persists, and returns the new id.
    pub fn next_id(&mut self) -> Result<DetectionId> {
        let next = self
            .current
            .checked_add(1)
            .ok_or_else(|| anyhow!("detection counter overflow"))?;
        self.persist(next)?;
        self.current = next;
        Ok(DetectionId::from(next))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.persist(0)?;
        self.current = 0;
        Ok(())
    }

    fn persist(&self, value: u64) -> Result<()> {
        std::fs::write(&self.path, format!("{value}\n"))
            .with_context(|| format!("write detection counter {}", self.path.display()))
    }
}

/// Posts detection telemetry to a collection server.
///
/// Every send runs on its own thread and is forgotten: failures are logged
/// and dropped. The returned handle only lets callers wait for the attempt.
#[derive(Clone)]
pub struct Uploader {
    endpoint: String,
    agent: ureq::Agent,
}

impl Uploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT).build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn send_gps(&self, fix: &GpsFix) -> JoinHandle<()> {
        self.send_json(fix.detection_id.clone(), serde_json::to_vec(fix))
    }

    pub fn send_inertial(&self, sample: &InertialSample) -> JoinHandle<()> {
        self.send_json(sample.detection_id.clone(), serde_json::to_vec(sample))
    }

    pub fn send_image(&self, detection_id: &DetectionId, jpeg: Vec<u8>) -> JoinHandle<()> {
        let this = self.clone();
        let detection_id = detection_id.clone();
        std::thread::spawn(move || {
            if let Err(e) = this.post(&detection_id, "image/jpeg", &jpeg) {
                log::warn!("image upload for detection {} failed: {:#}", detection_id, e);
            }
        })
    }

    fn send_json(
        &self,
        detection_id: DetectionId,
        body: serde_json::Result<Vec<u8>>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        std::thread::spawn(move || {
            let result = body
                .context("encode upload payload")
                .and_then(|body| this.post(&detection_id, "application/json", &body));
            if let Err(e) = result {
                log::warn!("upload for detection {} failed: {:#}", detection_id, e);
            }
        })
    }

    fn post(&self, detection_id: &DetectionId, content_type: &str, body: &[u8]) -> Result<()> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", content_type)
            .set("Detection-ID", detection_id.as_str())
            .send_bytes(body)
            .with_context(|| format!("post to {}", self.endpoint))?;
        log::debug!(
            "upload for detection {} answered {}",
            detection_id,
            response.status()
        );
        Ok(())
    }
}

/// Reads the three logs from a collection server.
///
/// Any transport or document error fails the whole fetch; a partial
/// document is never returned.
pub fn fetch_snapshot(url: &str) -> Result<TelemetrySnapshot> {
    let body = get_body(url)?;
    TelemetrySnapshot::from_slice(&body)
}

/// Reads the server-side classification from `<base>/markers`.
pub fn fetch_markers(base_url: &str) -> Result<MarkerReport> {
    let url = format!("{}/markers", base_url.trim_end_matches('/'));
    let body = get_body(&url)?;
    serde_json::from_slice(&body).context("invalid marker report")
}

fn get_body(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .timeout(UPLOAD_TIMEOUT)
        .call()
        .with_context(|| format!("fetch {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .with_context(|| format!("read response from {}", url))?;
    Ok(bytes)
}
