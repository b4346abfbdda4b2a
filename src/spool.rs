use crate::upload::{Backend, BackendReply, SubmitBody};
use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One submission as written to the spool directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub id: String,
    pub endpoint: String,
    pub encoding: String,
    pub email: String,
    /// Data URI for camera captures, base64 file bytes for uploads.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Backend that writes each submission into a directory instead of posting it.
#[derive(Debug, Clone)]
pub struct SpoolBackend {
    dir: PathBuf,
}

impl SpoolBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Backend for SpoolBackend {
    fn post(&mut self, endpoint: &str, body: &SubmitBody) -> Result<BackendReply> {
        let id = uuid::Uuid::new_v4().to_string();
        let record = match body {
            SubmitBody::UrlEncoded { capture, email } => SpoolRecord {
                id: id.clone(),
                endpoint: endpoint.to_string(),
                encoding: "urlencoded".to_string(),
                email: email.clone(),
                image: capture.clone(),
                file_name: None,
                content_type: None,
            },
            SubmitBody::Multipart {
                image,
                file_name,
                content_type,
                email,
            } => SpoolRecord {
                id: id.clone(),
                endpoint: endpoint.to_string(),
                encoding: "multipart".to_string(),
                email: email.clone(),
                image: base64::engine::general_purpose::STANDARD.encode(image),
                file_name: Some(file_name.clone()),
                content_type: Some(content_type.clone()),
            },
        };

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating spool dir {}", self.dir.display()))?;
        let file = self.dir.join(format!("{}.json", id));
        let data = serde_json::to_vec_pretty(&record)?;
        std::fs::write(&file, data).with_context(|| format!("writing {}", file.display()))?;
        log::info!("spooled submission {} to {}", id, file.display());

        Ok(BackendReply {
            status: 201,
            body: serde_json::json!({ "id": id }).to_string(),
        })
    }
}
