pub mod camera;
pub mod capture;
pub mod detector;
pub mod landmarks;
pub mod pipeline;
pub mod validator;
pub mod video;

// Re-export commonly used types
pub use camera::{AcquisitionError, Camera, FacingMode};
pub use detector::{Detector, ReplayDetector};
pub use landmarks::{BoundingBox, DeviceClass, LandmarkSet, Point, TargetArea};
pub use pipeline::Viewport;
pub use validator::{validate, FaceRatios, Verdict};
pub use video::V4lCamera;
