//! Submission of a captured or uploaded image.
//!
//! At most one submission is in flight. Replies are normalised into
//! [`SubmitError`] so the flow never has to look at raw backend bodies.

use std::path::Path;

use anyhow::{Context, Result};
use facecap_vision::capture::{self, CaptureFormat};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "measurement/store";
pub const CARD_NOT_FOUND: &str = "Card Not Found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Upload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// Encoded camera capture, `data:<mime>;base64,...`.
    DataUri(String),
    File {
        bytes: Vec<u8>,
        file_name: String,
        content_type: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub image: ImageData,
    pub email: String,
    pub source: SourceKind,
}

impl UploadRequest {
    pub fn from_capture(frame: &RgbImage, format: &CaptureFormat, email: impl Into<String>) -> Result<Self> {
        let uri = capture::encode_data_uri(frame, format).context("encoding capture")?;
        Ok(Self {
            image: ImageData::DataUri(uri),
            email: email.into(),
            source: SourceKind::Camera,
        })
    }

    pub fn from_file(path: &Path, email: impl Into<String>) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let content_type = ImageFormat::from_path(path)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream")
            .to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self {
            image: ImageData::File {
                bytes,
                file_name,
                content_type,
            },
            email: email.into(),
            source: SourceKind::Upload,
        })
    }

    /// Camera captures go url-encoded, file uploads as multipart.
    pub fn body(self) -> SubmitBody {
        match self.image {
            ImageData::DataUri(capture) => SubmitBody::UrlEncoded {
                capture,
                email: self.email,
            },
            ImageData::File {
                bytes,
                file_name,
                content_type,
            } => SubmitBody::Multipart {
                image: bytes,
                file_name,
                content_type,
                email: self.email,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitBody {
    UrlEncoded {
        capture: String,
        email: String,
    },
    Multipart {
        image: Vec<u8>,
        file_name: String,
        content_type: String,
        email: String,
    },
}

impl SubmitBody {
    pub fn email(&self) -> &str {
        match self {
            SubmitBody::UrlEncoded { email, .. } | SubmitBody::Multipart { email, .. } => email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub status: u16,
    pub body: String,
}

impl BackendReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Backend {
    fn post(&mut self, endpoint: &str, body: &SubmitBody) -> Result<BackendReply>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn post(&mut self, endpoint: &str, body: &SubmitBody) -> Result<BackendReply> {
        (**self).post(endpoint, body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("no card found in the image")]
    CardNotFound,
    #[error("submission failed: {0}")]
    Generic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadState {
    Idle,
    Pending,
    Done(Result<(), SubmitError>),
}

#[derive(Debug)]
pub struct UploadCoordinator {
    endpoint: String,
    state: UploadState,
}

impl Default for UploadCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl UploadCoordinator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: UploadState::Idle,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_pending(&self) -> bool {
        self.state == UploadState::Pending
    }

    pub fn outcome(&self) -> Option<&Result<(), SubmitError>> {
        match &self.state {
            UploadState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Claim the in-flight slot. `None` if a submission is pending or the
    /// last one has not been cleared with [`reset`](Self::reset).
    pub fn begin(&mut self, request: UploadRequest) -> Option<SubmitBody> {
        match self.state {
            UploadState::Idle => {}
            UploadState::Pending => {
                log::warn!("submission for {} ignored: another one is in flight", request.email);
                return None;
            }
            UploadState::Done(_) => {
                log::warn!("submission for {} ignored: previous result not cleared", request.email);
                return None;
            }
        }
        log::info!("submitting {:?} image for {}", request.source, request.email);
        self.state = UploadState::Pending;
        Some(request.body())
    }

    /// Record the reply of the pending submission. A reply with nothing
    /// pending is normalised but leaves the recorded outcome alone.
    pub fn finish(&mut self, reply: Result<BackendReply>) -> Result<(), SubmitError> {
        let outcome = normalize(reply);
        if self.state != UploadState::Pending {
            log::warn!("backend reply without a pending submission ignored: {:?}", outcome);
            return outcome;
        }
        match &outcome {
            Ok(()) => log::info!("submission accepted"),
            Err(e) => log::warn!("{}", e),
        }
        self.state = UploadState::Done(outcome.clone());
        outcome
    }

    /// `begin`, post, `finish`. `None` when the submission was not started.
    pub fn submit<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        request: UploadRequest,
    ) -> Option<Result<(), SubmitError>> {
        let body = self.begin(request)?;
        let reply = backend.post(&self.endpoint, &body);
        Some(self.finish(reply))
    }

    /// Forget the last outcome after an explicit user retry.
    pub fn reset(&mut self) {
        if self.state == UploadState::Pending {
            log::warn!("resetting while a submission is in flight");
        }
        self.state = UploadState::Idle;
    }
}

fn normalize(reply: Result<BackendReply>) -> Result<(), SubmitError> {
    let reply = reply.map_err(|e| SubmitError::Generic(format!("{:#}", e)))?;
    if reply.is_success() {
        return Ok(());
    }
    match error_type(&reply.body) {
        Some(kind) if kind == CARD_NOT_FOUND => Err(SubmitError::CardNotFound),
        Some(kind) => Err(SubmitError::Generic(kind)),
        None => Err(SubmitError::Generic(format!("backend replied {}", reply.status))),
    }
}

/// `type` at the top level, or nested under `res`.
fn error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("type")
        .or_else(|| value.get("res").and_then(|res| res.get("type")))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(u16, &'static str);

    impl Backend for Canned {
        fn post(&mut self, _endpoint: &str, _body: &SubmitBody) -> Result<BackendReply> {
            Ok(BackendReply {
                status: self.0,
                body: self.1.to_string(),
            })
        }
    }

    fn request() -> UploadRequest {
        UploadRequest {
            image: ImageData::DataUri("data:image/jpeg;base64,AAAA".into()),
            email: "someone@example.com".into(),
            source: SourceKind::Camera,
        }
    }

    #[test]
    fn test_normalize_replies() {
        let ok = BackendReply {
            status: 201,
            body: String::new(),
        };
        assert_eq!(normalize(Ok(ok)), Ok(()));

        let nested = BackendReply {
            status: 400,
            body: r#"{"res":{"type":"Card Not Found"}}"#.into(),
        };
        assert_eq!(normalize(Ok(nested)), Err(SubmitError::CardNotFound));

        let flat = BackendReply {
            status: 422,
            body: r#"{"type":"Card Not Found"}"#.into(),
        };
        assert_eq!(normalize(Ok(flat)), Err(SubmitError::CardNotFound));

        let other = BackendReply {
            status: 500,
            body: r#"{"res":{"type":"Internal"}}"#.into(),
        };
        assert_eq!(normalize(Ok(other)), Err(SubmitError::Generic("Internal".into())));

        let html = BackendReply {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert!(matches!(normalize(Ok(html)), Err(SubmitError::Generic(_))));

        let transport = normalize(Err(anyhow::anyhow!("connection refused")));
        assert_eq!(transport, Err(SubmitError::Generic("connection refused".into())));
    }

    #[test]
    fn test_one_submission_in_flight() {
        let mut coordinator = UploadCoordinator::default();
        assert!(coordinator.begin(request()).is_some());
        assert!(coordinator.is_pending());
        assert!(coordinator.begin(request()).is_none());

        let outcome = coordinator.finish(Ok(BackendReply {
            status: 200,
            body: "{}".into(),
        }));
        assert_eq!(outcome, Ok(()));
        // The outcome is consumed once; a new attempt needs an explicit reset.
        assert!(coordinator.begin(request()).is_none());
        coordinator.reset();
        assert!(coordinator.begin(request()).is_some());
    }

    #[test]
    fn test_stray_reply_keeps_recorded_outcome() {
        let mut coordinator = UploadCoordinator::default();
        let stray = coordinator.finish(Ok(BackendReply {
            status: 201,
            body: "{}".into(),
        }));
        assert_eq!(stray, Ok(()));
        assert_eq!(coordinator.outcome(), None);
        assert!(coordinator.begin(request()).is_some());

        coordinator.finish(Ok(BackendReply {
            status: 400,
            body: r#"{"type":"Card Not Found"}"#.into(),
        }));
        let late = coordinator.finish(Ok(BackendReply {
            status: 200,
            body: "{}".into(),
        }));
        assert_eq!(late, Ok(()));
        assert_eq!(coordinator.outcome(), Some(&Err(SubmitError::CardNotFound)));
    }

    #[test]
    fn test_submit_through_backend() {
        let mut coordinator = UploadCoordinator::default();
        let mut backend = Canned(404, r#"{"res":{"type":"Card Not Found"}}"#);
        assert_eq!(
            coordinator.submit(&mut backend, request()),
            Some(Err(SubmitError::CardNotFound))
        );
        assert_eq!(coordinator.outcome(), Some(&Err(SubmitError::CardNotFound)));
        assert_eq!(coordinator.submit(&mut backend, request()), None);
    }

    #[test]
    fn test_body_encoding_follows_source() {
        let body = request().body();
        assert_eq!(
            body,
            SubmitBody::UrlEncoded {
                capture: "data:image/jpeg;base64,AAAA".into(),
                email: "someone@example.com".into(),
            }
        );

        let upload = UploadRequest {
            image: ImageData::File {
                bytes: vec![1, 2, 3],
                file_name: "card.png".into(),
                content_type: "image/png".into(),
            },
            email: "someone@example.com".into(),
            source: SourceKind::Upload,
        };
        match upload.body() {
            SubmitBody::Multipart { image, file_name, .. } => {
                assert_eq!(image, vec![1, 2, 3]);
                assert_eq!(file_name, "card.png");
            }
            other => panic!("expected multipart, got {:?}", other),
        }
    }
}
