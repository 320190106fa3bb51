//! # Chat Handler
//!
//! `POST /chat`: one user message in, one assistant reply out.
//!
//! The session is picked from the body's `session_id`, then the `X-Session-Id`
//! header, and otherwise falls back to the shared default session.

use crate::chat::DEFAULT_SESSION_ID;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SESSION_HEADER: &str = "X-Session-Id";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Missing and blank are both rejected by the session manager
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

pub async fn chat(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChatRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let session_id = body
        .session_id
        .or_else(|| {
            req.headers()
                .get(SESSION_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

    debug!(session_id = %session_id, "Chat message received");

    let message = body.message.unwrap_or_default();
    let response = state.sessions.respond(&session_id, &message).await?;

    Ok(HttpResponse::Ok().json(ChatResponse { response, session_id }))
}

/// JSON extractor settings for `/chat`: a body that isn't valid JSON becomes the
/// same 400 error shape as every other client mistake.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let message = match &err {
            JsonPayloadError::ContentType => "Request body must be JSON".to_string(),
            other => format!("Invalid JSON body: {}", other),
        };
        AppError::InvalidRequest(message).into()
    })
}
