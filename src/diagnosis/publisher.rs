//! # Artifact Publisher
//!
//! Pushes the rendered report to durable storage and hands back the URL the
//! client can download it from. The orchestrator only cares about `secure_url`;
//! a response without one counts as a failed publish.

use crate::config::PublisherConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishReceipt {
    pub secure_url: Option<String>,
}

#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Result<PublishReceipt, PublisherError>;

    /// Short description for the health endpoint.
    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("publisher is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("could not read artifact: {0}")]
    Read(#[from] std::io::Error),
    #[error("upload request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Upload to Cloudinary's REST API.
///
/// ## Endpoint:
/// `POST {api_base}/{cloud_name}/{resource_type}/upload` with a multipart body
/// holding `file` plus the authentication fields. Reports go up as `raw`
/// resources so Cloudinary serves the PDF bytes untouched.
///
/// ## Authentication:
/// - **Signed**: with `api_key` and `api_secret` set, the form carries
///   `api_key`, `timestamp`, `signature` and `signature_algorithm=sha256`
/// - **Unsigned**: otherwise an `upload_preset` that allows unsigned uploads
pub struct CloudinaryPublisher {
    client: reqwest::Client,
    api_base: String,
    cloud_name: String,
    upload_preset: String,
    api_key: String,
    api_secret: String,
    resource_type: String,
}

/// Form fields that authenticate one upload, in the order they are sent.
type AuthFields = Vec<(&'static str, String)>;

impl CloudinaryPublisher {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name.clone(),
            upload_preset: config.upload_preset.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            resource_type: config.resource_type.clone(),
        }
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/{}/upload", self.api_base, self.cloud_name, self.resource_type)
    }

    fn is_signed(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Authentication fields for an upload made at `timestamp` (Unix seconds).
    fn auth_fields(&self, timestamp: i64) -> Result<AuthFields, PublisherError> {
        if self.is_signed() {
            let mut signed = vec![("timestamp", timestamp.to_string())];
            if !self.upload_preset.is_empty() {
                signed.push(("upload_preset", self.upload_preset.clone()));
            }
            let signature = sign_params(&signed, &self.api_secret);
            signed.push(("api_key", self.api_key.clone()));
            signed.push(("signature", signature));
            signed.push(("signature_algorithm", "sha256".to_string()));
            Ok(signed)
        } else if !self.upload_preset.is_empty() {
            Ok(vec![("upload_preset", self.upload_preset.clone())])
        } else {
            Err(PublisherError::NotConfigured("api_key and api_secret, or upload_preset"))
        }
    }
}

/// Cloudinary request signature: the non-empty params sorted by name and
/// joined as `k=v&k=v`, the secret appended, then hex-encoded SHA-256.
pub(crate) fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ArtifactPublisher for CloudinaryPublisher {
    async fn upload(&self, local_path: &Path) -> Result<PublishReceipt, PublisherError> {
        if self.cloud_name.is_empty() {
            return Err(PublisherError::NotConfigured("cloud_name"));
        }
        let auth = self.auth_fields(Utc::now().timestamp())?;

        let bytes = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.pdf".to_string());

        let file_part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| PublisherError::RequestFailed(format!("mime: {}", e)))?;

        let form = auth
            .into_iter()
            .fold(multipart::Form::new(), |form, (name, value)| form.text(name, value))
            .part("file", file_part);

        debug!(url = %self.upload_url(), signed = self.is_signed(), "Uploading report artifact");

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublisherError::RequestFailed(format!("request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(PublisherError::RequestFailed(format!("status {}: {}", status, body)));
        }

        let receipt: PublishReceipt = response
            .json()
            .await
            .map_err(|e| PublisherError::InvalidResponse(e.to_string()))?;

        info!(has_url = receipt.secure_url.is_some(), "Report artifact uploaded");
        Ok(receipt)
    }

    fn describe(&self) -> String {
        let mode = if self.is_signed() { "signed" } else { "unsigned" };
        format!("cloudinary ({}): {}", mode, self.upload_url())
    }
}
