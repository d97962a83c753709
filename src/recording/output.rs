use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::errors::CameraError;

/// `<prefix><yyyyMMdd_HHmmss>_<8 hex>.mp4`
pub fn recording_file_name(prefix: &str, at: DateTime<Local>, id: &Uuid) -> String {
    let short = id.simple().to_string();
    format!(
        "{}{}_{}.mp4",
        prefix,
        at.format("%Y%m%d_%H%M%S"),
        &short[..8]
    )
}

/// Ensure `directory` exists and return a fresh file path inside it.
pub fn prepare_output(directory: &Path, prefix: &str, id: &Uuid) -> Result<PathBuf, CameraError> {
    std::fs::create_dir_all(directory).map_err(|e| {
        CameraError::WriterInitFailed(format!(
            "cannot create output directory {}: {}",
            directory.display(),
            e
        ))
    })?;
    Ok(directory.join(recording_file_name(prefix, Local::now(), id)))
}
