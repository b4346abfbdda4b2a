//! Top-level screen flow.
//!
//! The controller never touches the camera or the backend itself: it turns
//! user and collaborator events into [`FlowCommand`]s for the host and keeps
//! enough state to tell which [`Screen`] is showing.

use facecap_vision::{AcquisitionError, DeviceClass, Verdict};

use crate::session::{SessionSnapshot, SessionStatus};
use crate::upload::{SourceKind, SubmitError};

pub const HELP_PAGES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Preparing,
    Start,
    Help(u8),
    NoResource,
    NotSupported,
    Landing,
    NotPortrait,
    Camera,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Preparing,
    Start,
    Help(u8),
    NoResource,
    NotSupported,
    Landing,
    NotPortrait,
    CameraLoading,
    CameraLive { verdict: Option<Verdict>, countdown: Option<u8> },
    /// Captured, waiting for an email before submitting.
    CameraCaptured,
    CameraPermissionDenied,
    CameraNotFound,
    CameraOverconstrained,
    UploadPicker,
    UploadPreview { verdict: Option<Verdict>, can_submit: bool },
    Uploading,
    Success,
    CardNotFound,
    SubmitFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    DetectorLoaded,
    DetectorUnavailable,
    Unsupported,
    Next,
    SkipOnboarding,
    ChooseCamera,
    ChooseUpload,
    OrientationChanged { landscape: bool },
    Session(SessionSnapshot),
    UploadSelected,
    UploadAssessed(Verdict),
    /// `None` clears the address.
    EmailChanged(Option<String>),
    SubmitUpload,
    UploadFinished(Result<(), SubmitError>),
    TryAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCommand {
    StartCamera,
    StopCamera,
    ResetCamera,
    OpenUploader,
    Submit(SourceKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Submission {
    None,
    InFlight,
    Done(Result<(), SubmitError>),
}

#[derive(Debug)]
pub struct FlowController {
    step: Step,
    device: DeviceClass,
    session: Option<SessionSnapshot>,
    upload_selected: bool,
    upload_verdict: Option<Verdict>,
    email: Option<String>,
    submission: Submission,
}

impl FlowController {
    pub fn new(device: DeviceClass) -> Self {
        Self {
            step: Step::Preparing,
            device,
            session: None,
            upload_selected: false,
            upload_verdict: None,
            email: None,
            submission: Submission::None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn on(&mut self, event: FlowEvent) -> Vec<FlowCommand> {
        let before = self.step;
        let commands = self.reduce(event);
        if self.step != before {
            log::info!("flow: {:?} → {:?}", before, self.step);
        }
        commands
    }

    fn reduce(&mut self, event: FlowEvent) -> Vec<FlowCommand> {
        match event {
            FlowEvent::DetectorLoaded => {
                if self.step == Step::Preparing {
                    self.step = Step::Start;
                }
                Vec::new()
            }
            FlowEvent::DetectorUnavailable => self.leave(Step::NoResource),
            FlowEvent::Unsupported => self.leave(Step::NotSupported),
            FlowEvent::Next => {
                self.step = match self.step {
                    Step::Start => Step::Help(1),
                    Step::Help(page) if page < HELP_PAGES => Step::Help(page + 1),
                    Step::Help(_) => Step::Landing,
                    other => other,
                };
                Vec::new()
            }
            FlowEvent::SkipOnboarding => {
                if matches!(self.step, Step::Start | Step::Help(_)) {
                    self.step = Step::Landing;
                }
                Vec::new()
            }
            FlowEvent::ChooseCamera => self.choose_camera(),
            FlowEvent::ChooseUpload => self.choose_upload(),
            FlowEvent::OrientationChanged { landscape } => {
                if self.device != DeviceClass::Mobile {
                    return Vec::new();
                }
                if landscape && self.step != Step::NotPortrait {
                    return self.leave(Step::NotPortrait);
                }
                if !landscape && self.step == Step::NotPortrait {
                    self.step = Step::Landing;
                }
                Vec::new()
            }
            FlowEvent::Session(snapshot) => {
                if self.step != Step::Camera {
                    log::debug!("flow: session update outside camera mode ignored");
                    return Vec::new();
                }
                self.session = Some(snapshot);
                self.auto_submit()
            }
            FlowEvent::UploadSelected => {
                if self.step == Step::Upload && self.submission == Submission::None {
                    self.upload_selected = true;
                    self.upload_verdict = None;
                }
                Vec::new()
            }
            FlowEvent::UploadAssessed(verdict) => {
                if self.step == Step::Upload && self.upload_selected {
                    self.upload_verdict = Some(verdict);
                }
                Vec::new()
            }
            FlowEvent::EmailChanged(email) => {
                self.email = email.filter(|e| !e.trim().is_empty());
                self.auto_submit()
            }
            FlowEvent::SubmitUpload => {
                if self.step != Step::Upload || self.submission != Submission::None {
                    return Vec::new();
                }
                if self.upload_verdict != Some(Verdict::Valid) || self.email.is_none() {
                    log::warn!(
                        "flow: upload not submitted (verdict {:?}, email set: {})",
                        self.upload_verdict,
                        self.email.is_some()
                    );
                    return Vec::new();
                }
                self.submission = Submission::InFlight;
                vec![FlowCommand::Submit(SourceKind::Upload)]
            }
            FlowEvent::UploadFinished(outcome) => {
                if self.submission == Submission::InFlight {
                    self.submission = Submission::Done(outcome);
                } else {
                    log::warn!("flow: submission result without a submission");
                }
                Vec::new()
            }
            FlowEvent::TryAgain => self.try_again(),
        }
    }

    /// Move to a side screen, stopping the camera if it was in use.
    fn leave(&mut self, next: Step) -> Vec<FlowCommand> {
        let was_camera = self.step == Step::Camera;
        self.step = next;
        self.clear_mode();
        if was_camera {
            vec![FlowCommand::StopCamera]
        } else {
            Vec::new()
        }
    }

    fn clear_mode(&mut self) {
        self.session = None;
        self.upload_selected = false;
        self.upload_verdict = None;
        self.submission = Submission::None;
    }

    fn choose_camera(&mut self) -> Vec<FlowCommand> {
        match self.step {
            Step::Landing | Step::Upload => {
                self.step = Step::Camera;
                self.clear_mode();
                vec![FlowCommand::StartCamera]
            }
            Step::Camera => self.try_again(),
            _ => Vec::new(),
        }
    }

    fn choose_upload(&mut self) -> Vec<FlowCommand> {
        let mut commands = match self.step {
            Step::Camera => vec![FlowCommand::StopCamera],
            Step::Landing | Step::Upload => Vec::new(),
            _ => return Vec::new(),
        };
        self.step = Step::Upload;
        self.clear_mode();
        commands.push(FlowCommand::OpenUploader);
        commands
    }

    fn auto_submit(&mut self) -> Vec<FlowCommand> {
        let captured = self.session.map(|s| s.status) == Some(SessionStatus::Captured);
        if self.step == Step::Camera && captured && self.email.is_some() && self.submission == Submission::None {
            self.submission = Submission::InFlight;
            return vec![FlowCommand::Submit(SourceKind::Camera)];
        }
        Vec::new()
    }

    fn try_again(&mut self) -> Vec<FlowCommand> {
        if self.submission == Submission::InFlight {
            return Vec::new();
        }
        match self.step {
            Step::Camera => {
                self.clear_mode();
                vec![FlowCommand::ResetCamera]
            }
            Step::Upload => {
                self.clear_mode();
                vec![FlowCommand::OpenUploader]
            }
            _ => Vec::new(),
        }
    }

    pub fn screen(&self) -> Screen {
        match self.step {
            Step::Preparing => Screen::Preparing,
            Step::Start => Screen::Start,
            Step::Help(page) => Screen::Help(page),
            Step::NoResource => Screen::NoResource,
            Step::NotSupported => Screen::NotSupported,
            Step::Landing => Screen::Landing,
            Step::NotPortrait => Screen::NotPortrait,
            Step::Camera => self.submission_screen().unwrap_or_else(|| self.camera_screen()),
            Step::Upload => self.submission_screen().unwrap_or_else(|| self.upload_screen()),
        }
    }

    fn submission_screen(&self) -> Option<Screen> {
        match &self.submission {
            Submission::None => None,
            Submission::InFlight => Some(Screen::Uploading),
            Submission::Done(Ok(())) => Some(Screen::Success),
            Submission::Done(Err(SubmitError::CardNotFound)) => Some(Screen::CardNotFound),
            Submission::Done(Err(SubmitError::Generic(_))) => Some(Screen::SubmitFailed),
        }
    }

    fn camera_screen(&self) -> Screen {
        let Some(snapshot) = self.session else {
            return Screen::CameraLoading;
        };
        match snapshot.status {
            SessionStatus::Idle | SessionStatus::Loading => Screen::CameraLoading,
            SessionStatus::Streaming | SessionStatus::Countdown { .. } => Screen::CameraLive {
                verdict: snapshot.verdict,
                countdown: snapshot.countdown(),
            },
            SessionStatus::Captured => Screen::CameraCaptured,
            SessionStatus::Failed(AcquisitionError::PermissionDenied) => Screen::CameraPermissionDenied,
            SessionStatus::Failed(AcquisitionError::DeviceNotFound) => Screen::CameraNotFound,
            SessionStatus::Failed(AcquisitionError::OverconstrainedDevice) => Screen::CameraOverconstrained,
        }
    }

    fn upload_screen(&self) -> Screen {
        if !self.upload_selected {
            return Screen::UploadPicker;
        }
        Screen::UploadPreview {
            verdict: self.upload_verdict,
            can_submit: self.upload_verdict == Some(Verdict::Valid) && self.email.is_some(),
        }
    }
}
