//! # Audio Diagnosis Module
//!
//! Everything behind `POST /process_audio`: staging the uploaded recording,
//! calling the external diagnostic engine, publishing the rendered report and
//! reshaping the engine output into the public report schema.
//!
//! ## Key Components:
//! - **Orchestrator**: runs one request through the whole pipeline
//! - **Staging**: scoped handle that owns (and finally deletes) the request's files
//! - **Engine**: port to the report-generation program, plus the command-line adapter
//! - **Publisher**: port to durable storage, plus the Cloudinary adapter
//! - **Formatter**: pure mapping from engine output to the response body

pub mod engine;       // Diagnostic engine port and command adapter
pub mod formatter;    // Engine output -> public report
pub mod orchestrator; // Request pipeline
pub mod publisher;    // Artifact store port and Cloudinary adapter
pub mod staging;      // Per-request files, removed on drop

pub use engine::CommandEngine;
pub use formatter::FormattedReport;
pub use orchestrator::{AudioUpload, DiagnosisOrchestrator};
pub use publisher::CloudinaryPublisher;
