use anyhow::{Context, Result};
use facecap_vision::capture::CaptureFormat;
use facecap_vision::{DeviceClass, FacingMode, Viewport};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::Timing;
use crate::upload::DEFAULT_ENDPOINT;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECAP_CONFIG_PATH").unwrap_or("/usr/local/etc/facecap/config.toml"))
});

/// Guide box size as a fraction of the displayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetFractions {
    pub desktop_width: f32,
    pub mobile_width: f32,
    pub height: f32,
}

impl Default for TargetFractions {
    fn default() -> Self {
        Self {
            desktop_width: 0.5,
            mobile_width: 0.9,
            height: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub facing: FacingMode,
    pub poll_interval_ms: u64,
    pub countdown_secs: u8,
    pub overlay_interval_ms: Option<u64>,
    /// Give up on a live session after this many seconds.
    pub scan_duration: u64,
    pub endpoint: String,
    pub spool_dir: PathBuf,
    pub target: TargetFractions,
    pub capture: CaptureFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            facing: FacingMode::User,
            poll_interval_ms: 1500,
            countdown_secs: 3,
            overlay_interval_ms: None,
            scan_duration: 60,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            spool_dir: PathBuf::from("/var/spool/facecap"),
            target: TargetFractions::default(),
            capture: CaptureFormat::default(),
        }
    }
}

impl Config {
    pub fn timing(&self) -> Timing {
        Timing {
            poll: Duration::from_millis(self.poll_interval_ms.max(1)),
            overlay: self.overlay_interval_ms.map(|ms| Duration::from_millis(ms.max(1))),
            ..Timing::default()
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration)
    }

    /// Viewport for a frame shown at its native size.
    pub fn viewport(&self, display: (u32, u32)) -> Viewport {
        let device = DeviceClass::from_viewport_width(display.0);
        let width = match device {
            DeviceClass::Desktop => self.target.desktop_width,
            DeviceClass::Mobile => self.target.mobile_width,
        };
        Viewport::centered(display, width, self.target.height)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
