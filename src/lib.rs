pub mod config;
pub mod driver;
pub mod flow;
pub mod session;
pub mod spool;
pub mod upload;

// Re-export vision types for convenience
pub use facecap_vision::{capture, detector, pipeline, validator, video, LandmarkSet, Verdict, Viewport};

pub use driver::{Clock, SessionDriver, SystemClock, Timing};
pub use flow::{FlowCommand, FlowController, FlowEvent, Screen};
pub use session::{CaptureSession, SessionSnapshot, SessionStatus};
pub use spool::SpoolBackend;
pub use upload::{Backend, BackendReply, SubmitError, UploadCoordinator, UploadRequest};
