//! # Staged Upload Files
//!
//! Every diagnosis request owns up to three files in the upload directory:
//! the recording itself, the rendered PDF report and the engine's JSON data dump.
//! `StagedUpload` names all three up front and deletes whatever exists when it is
//! dropped, so cleanup runs on every exit path of the orchestrator, including
//! early returns through `?` and panics that unwind.
//!
//! ## Naming:
//! `<timestamp>_<sanitized name>` for the audio, with `.report.pdf` and
//! `.report.json` siblings derived from the same stem. The timestamp has
//! millisecond resolution; two requests carrying the same filename in the same
//! millisecond share paths and the later write wins.

use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Filename with path components and unsafe characters removed.
///
/// ## Rules:
/// - Compatibility decomposition (NFKD) first, so accented letters keep their
///   base letter (`ü` → `u`); whatever is still non-ASCII is then dropped
/// - Path separators and runs of whitespace become a single `_`
/// - Only `A-Z a-z 0-9 . _ -` survive
/// - Leading and trailing `.` / `_` are trimmed, so `..` can't survive
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Lower-cased text after the last `.`, if there is one.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Owner of one request's files. Deletes them on drop.
#[derive(Debug)]
pub struct StagedUpload {
    audio_path: PathBuf,
    report_path: PathBuf,
    data_path: PathBuf,
}

impl StagedUpload {
    /// Reserve paths for a request. Nothing touches the disk until `write_audio`.
    pub fn new(upload_dir: &Path, sanitized_name: &str, received_at: DateTime<Local>) -> Self {
        let unique = format!("{}_{}", received_at.format("%Y%m%d_%H%M%S%3f"), sanitized_name);
        let stem = match unique.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => unique.clone(),
        };

        Self {
            audio_path: upload_dir.join(&unique),
            report_path: upload_dir.join(format!("{}.report.pdf", stem)),
            data_path: upload_dir.join(format!("{}.report.json", stem)),
        }
    }

    pub async fn write_audio(&self, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(&self.audio_path, bytes).await?;
        debug!(path = %self.audio_path.display(), bytes = bytes.len(), "Staged uploaded audio");
        Ok(())
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn remove_quietly(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed staged file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        Self::remove_quietly(&self.audio_path);
        Self::remove_quietly(&self.report_path);
        Self::remove_quietly(&self.data_path);
    }
}
