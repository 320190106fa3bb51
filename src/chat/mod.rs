//! # Vocal-Health Assistant Module
//!
//! Stateful chat behind `POST /chat`. The assistant is pinned to a persona that
//! only discusses voice and vocal health; each session keeps a bounded history
//! so replies stay in context without the prompt growing forever.
//!
//! ## Key Components:
//! - **History**: persona turn plus a sliding window of user/assistant turns
//! - **Client**: port to the chat-completion API and the OpenAI-compatible adapter
//! - **Session**: per-session histories and the locking around each turn

pub mod client;   // Chat-completion port and HTTP adapter
pub mod history;  // Bounded turn window
pub mod session;  // Session store and turn sequencing

pub use client::OpenAiCompatibleClient;
pub use session::{ConversationSessionManager, DEFAULT_SESSION_ID};
