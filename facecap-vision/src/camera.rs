use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Why a camera could not be acquired (or was lost while streaming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    DeviceNotFound,
    #[error("camera cannot satisfy the requested constraints")]
    OverconstrainedDevice,
}

/// Camera seam. The stream handle is owned by whoever acquired it and is
/// handed back on `stop`.
pub trait Camera {
    type Stream;

    fn acquire(&mut self, facing: FacingMode) -> Result<Self::Stream, AcquisitionError>;

    fn grab_frame(&mut self, stream: &mut Self::Stream) -> Result<RgbImage>;

    fn stop(&mut self, stream: Self::Stream);
}
