//! Model locations accepted from the host.

use std::path::PathBuf;

use crate::error::{Result, SessionError};

const FILE_SCHEME: &str = "file://";

/// Resolve a model location to a filesystem path.
///
/// Accepts a plain path, handed to the runtime as-is, or a `file://` URI,
/// which must name an existing file. Other URI schemes are rejected.
pub fn resolve_model_path(location: &str) -> Result<PathBuf> {
    if location.is_empty() {
        return Err(SessionError::InvalidArgument("empty model path".to_string()));
    }

    if let Some(path) = location.strip_prefix(FILE_SCHEME) {
        if path.is_empty() {
            return Err(SessionError::InvalidArgument(format!(
                "malformed file URI: {location}"
            )));
        }
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(SessionError::ModelLoad {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }
        return Ok(path);
    }

    if let Some((scheme, _)) = location.split_once("://") {
        return Err(SessionError::InvalidArgument(format!(
            "unsupported model URI scheme: {scheme}"
        )));
    }

    Ok(PathBuf::from(location))
}
