//! # Audio Diagnosis Handler
//!
//! `POST /process_audio`: reads the `audio` field out of a multipart body and
//! hands it to the diagnosis pipeline.
//!
//! ## Why the size check happens here too:
//! The orchestrator rejects oversized uploads, but by then the whole body would
//! already be in memory. Counting bytes while the field streams in lets us stop
//! reading as soon as the limit is crossed.

use crate::diagnosis::{AudioUpload, FormattedReport};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

/// Multipart field the recording must be sent in.
const AUDIO_FIELD: &str = "audio";

pub async fn process_audio(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let result = diagnose_upload(&state, payload).await;
    state.record_diagnosis(result.is_ok());

    let report = result?;
    Ok(HttpResponse::Ok().json(report))
}

async fn diagnose_upload(state: &AppState, payload: Multipart) -> AppResult<FormattedReport> {
    let limit = state.orchestrator.max_file_size_bytes();
    let upload = read_audio_field(payload, limit).await?;
    state.orchestrator.diagnose(upload).await
}

/// Pull the first `audio` file part out of the body; every other part is skipped.
///
/// A part counts as a file only when its content disposition carries a
/// `filename` parameter, so a plain text field named `audio` is ignored.
///
/// ## Returns:
/// - **Ok(None)**: the body had no `audio` file part
/// - **Ok(Some(upload))**: filename may still be empty (`filename=""`)
/// - **Err(PayloadTooLarge)**: the field grew past `limit` bytes
async fn read_audio_field(mut payload: Multipart, limit: usize) -> AppResult<Option<AudioUpload>> {
    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;

        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        if disposition.get_name() != Some(AUDIO_FIELD) {
            continue;
        }
        let Some(filename) = disposition.get_filename().map(str::to_string) else {
            continue;
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::InvalidRequest(format!("Multipart error: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                warn!(filename = %filename, limit, "Upload exceeded size limit");
                return Err(AppError::PayloadTooLarge { limit_bytes: limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(filename = %filename, bytes = bytes.len(), "Received audio field");
        return Ok(Some(AudioUpload { filename, bytes }));
    }

    Ok(None)
}
