//! # Diagnosis Orchestrator
//!
//! Drives one `/process_audio` request end to end:
//!
//! 1. **Validate** the upload (field present, filename non-empty, extension allowed)
//! 2. **Stage** the audio under a timestamped, sanitized name
//! 3. **Run** the diagnostic engine against it
//! 4. **Check** that the engine rendered the PDF report
//! 5. **Publish** the report and require a durable URL
//! 6. **Reshape** the engine output into the public report
//! 7. **Clean up** every staged file, whatever happened above
//!
//! Step 7 is not a step in the code: the `StagedUpload` handle created in step 2
//! removes its files when it goes out of scope, so every `?` below already
//! cleans up after itself.

use crate::config::UploadConfig;
use crate::diagnosis::engine::{DiagnosticEngine, EngineJob};
use crate::diagnosis::formatter::{format_report, FormattedReport};
use crate::diagnosis::publisher::ArtifactPublisher;
use crate::diagnosis::staging::{extension_of, sanitize_filename, StagedUpload};
use crate::error::{AppError, AppResult};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// One uploaded recording as it came off the multipart body.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub struct DiagnosisOrchestrator {
    engine: Arc<dyn DiagnosticEngine>,
    publisher: Arc<dyn ArtifactPublisher>,
    upload_dir: PathBuf,
    allowed_extensions: Vec<String>,
    max_file_size_bytes: usize,
}

impl DiagnosisOrchestrator {
    /// Create the orchestrator and make sure the upload directory exists.
    pub fn new(
        engine: Arc<dyn DiagnosticEngine>,
        publisher: Arc<dyn ArtifactPublisher>,
        upload: &UploadConfig,
    ) -> std::io::Result<Self> {
        let upload_dir = PathBuf::from(&upload.dir);
        std::fs::create_dir_all(&upload_dir)?;

        Ok(Self {
            engine,
            publisher,
            upload_dir,
            allowed_extensions: upload
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_file_size_bytes: upload.max_file_size_bytes,
        })
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_bytes
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn engine_description(&self) -> String {
        self.engine.describe()
    }

    pub fn publisher_description(&self) -> String {
        self.publisher.describe()
    }

    /// Check an upload and work out the name it will be stored under.
    ///
    /// ## Returns:
    /// The sanitized filename. If sanitizing strips the name down to nothing (or
    /// loses the extension), a generic `recording.<ext>` is used instead so the
    /// engine still sees the right file type.
    pub fn validate(&self, upload: Option<&AudioUpload>) -> AppResult<String> {
        let upload = upload.ok_or_else(|| AppError::InvalidRequest("No audio file provided".to_string()))?;

        if upload.filename.is_empty() {
            return Err(AppError::InvalidRequest("No selected file".to_string()));
        }

        let extension = extension_of(&upload.filename)
            .filter(|ext| self.allowed_extensions.contains(ext))
            .ok_or_else(|| AppError::InvalidRequest("File type not allowed".to_string()))?;

        if upload.bytes.len() > self.max_file_size_bytes {
            return Err(AppError::PayloadTooLarge {
                limit_bytes: self.max_file_size_bytes,
            });
        }

        let sanitized = sanitize_filename(&upload.filename);
        let keeps_extension = extension_of(&sanitized).is_some_and(|ext| ext == extension)
            && sanitized.len() > extension.len() + 1;

        Ok(if keeps_extension {
            sanitized
        } else {
            format!("recording.{}", extension)
        })
    }

    /// Run the whole pipeline for one upload.
    pub async fn diagnose(&self, upload: Option<AudioUpload>) -> AppResult<FormattedReport> {
        let stored_name = self.validate(upload.as_ref())?;
        let Some(upload) = upload else {
            // validate() already rejected the None case
            return Err(AppError::InvalidRequest("No audio file provided".to_string()));
        };

        let start = Instant::now();
        let staged = StagedUpload::new(&self.upload_dir, &stored_name, Local::now());
        staged.write_audio(&upload.bytes).await.map_err(|e| {
            error!(error = %e, path = %staged.audio_path().display(), "Failed to stage upload");
            AppError::Internal(format!("could not store upload: {}", e))
        })?;

        info!(
            original = %upload.filename,
            stored = %staged.audio_path().display(),
            bytes = upload.bytes.len(),
            "Audio staged for diagnosis"
        );

        let job = EngineJob {
            audio_path: staged.audio_path().to_path_buf(),
            report_path: staged.report_path().to_path_buf(),
            data_path: staged.data_path().to_path_buf(),
        };

        let raw = self.engine.process(&job).await.map_err(|e| {
            warn!(error = %e, "Diagnostic engine failed");
            AppError::ProcessingError(e.to_string())
        })?;

        if !tokio::fs::try_exists(staged.report_path()).await.unwrap_or(false) {
            error!(path = %staged.report_path().display(), "Engine finished without rendering a report");
            return Err(AppError::ArtifactMissing);
        }

        let receipt = self.publisher.upload(staged.report_path()).await.map_err(|e| {
            warn!(error = %e, "Report upload failed");
            AppError::PublishError(e.to_string())
        })?;

        let pdf_url = receipt
            .secure_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::PublishError("no secure_url in upload response".to_string()))?;

        let report = format_report(&raw, &pdf_url, Local::now().date_naive()).map_err(|e| {
            error!(error = %e, "Engine output does not match the report schema");
            e
        })?;

        info!(
            prediction = %report.prediction,
            duration_ms = %start.elapsed().as_millis(),
            "Diagnosis completed"
        );

        Ok(report)
    }
}
