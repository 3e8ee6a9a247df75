use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classify::SeverityPolicy;
use crate::images::DEFAULT_IMAGE_DIR;
use crate::payload::ParseMode;
use crate::proximity::ProximityMonitor;

const DEFAULT_DB_PATH: &str = "pothole.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Deserialize, Default)]
struct PotholedConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    images: Option<ImagesConfigFile>,
    severity: Option<SeverityConfigFile>,
    proximity: Option<ProximityConfigFile>,
    strict_parsing: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ImagesConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SeverityConfigFile {
    moderate_above: Option<f64>,
    severe_above: Option<f64>,
    accel_y_offset: Option<f64>,
    accel_z_offset: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProximityConfigFile {
    threshold_m: Option<f64>,
    max_accuracy_m: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PotholedConfig {
    pub db_path: String,
    pub api_addr: String,
    pub image_dir: PathBuf,
    pub severity: SeverityPolicy,
    pub proximity: ProximityMonitor,
    pub parse_mode: ParseMode,
}

impl PotholedConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PotholedConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let image_dir = file
            .images
            .and_then(|images| images.dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR));

        let defaults = SeverityPolicy::default();
        let severity = file.severity.unwrap_or_default();
        let severity = SeverityPolicy {
            moderate_above: severity.moderate_above.unwrap_or(defaults.moderate_above),
            severe_above: severity.severe_above.unwrap_or(defaults.severe_above),
            accel_y_offset: severity.accel_y_offset.unwrap_or(defaults.accel_y_offset),
            accel_z_offset: severity.accel_z_offset.unwrap_or(defaults.accel_z_offset),
        };

        let defaults = ProximityMonitor::default();
        let proximity = file.proximity.unwrap_or_default();
        let proximity = ProximityMonitor {
            threshold_m: proximity.threshold_m.unwrap_or(defaults.threshold_m),
            max_accuracy_m: proximity.max_accuracy_m.unwrap_or(defaults.max_accuracy_m),
        };

        let parse_mode = if file.strict_parsing.unwrap_or(false) {
            ParseMode::Strict
        } else {
            ParseMode::Permissive
        };

        Self {
            db_path,
            api_addr,
            image_dir,
            severity,
            proximity,
            parse_mode,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("POTHOLE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("POTHOLE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("POTHOLE_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.image_dir = PathBuf::from(dir);
            }
        }
        if let Ok(meters) = std::env::var("POTHOLE_PROXIMITY_METERS") {
            self.proximity.threshold_m = meters
                .trim()
                .parse()
                .map_err(|_| anyhow!("POTHOLE_PROXIMITY_METERS must be a number of meters"))?;
        }
        if let Ok(strict) = std::env::var("POTHOLE_STRICT_PARSING") {
            self.parse_mode = if parse_bool(&strict)? {
                ParseMode::Strict
            } else {
                ParseMode::Permissive
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.api_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;
        self.severity.validate()?;
        self.proximity.validate()?;
        Ok(())
    }
}

/// `.toml` files are read as TOML, everything else as JSON.
fn read_config_file(path: &Path) -> Result<PotholedConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("POTHOLE_STRICT_PARSING: '{}' is not a boolean", other)),
    }
}
