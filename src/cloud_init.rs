//! Cloud-init user-data applied to every new machine.
//!
//! A payload may be configured inline or read from a file. Without either,
//! machines boot with [`DEFAULT_CLOUD_CONFIG`], which only prepares the
//! package index so the install stage starts from a known state.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::channel::expand_tilde;

/// Payload used when no user-data is configured.
pub const DEFAULT_CLOUD_CONFIG: &str = "#cloud-config\npackage_update: true\npackages:\n  - curl\n  - ufw\n";

/// Errors raised while resolving cloud-init user-data.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CloudInitError {
    /// Both an inline payload and a file were configured.
    #[error("cloud-init user-data cannot be provided both inline and via file")]
    BothProvided,
    /// The inline payload is blank.
    #[error("cloud-init user-data must not be empty")]
    InlineEmpty,
    /// The configured file path is blank.
    #[error("cloud-init user-data file path must not be empty")]
    FilePathEmpty,
    /// The file exists but is blank.
    #[error("cloud-init user-data file must not be empty")]
    FileEmpty,
    /// The file could not be read.
    #[error("failed to read cloud-init user-data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Checks the configured sources without touching the filesystem.
///
/// # Errors
///
/// Returns [`CloudInitError`] when both sources are set or one is blank.
pub fn validate_sources(inline: Option<&str>, file: Option<&str>) -> Result<(), CloudInitError> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(CloudInitError::BothProvided),
        (Some(payload), None) if payload.trim().is_empty() => Err(CloudInitError::InlineEmpty),
        (None, Some(path)) if path.trim().is_empty() => Err(CloudInitError::FilePathEmpty),
        _ => Ok(()),
    }
}

/// Resolves the payload to send, falling back to [`DEFAULT_CLOUD_CONFIG`].
///
/// # Errors
///
/// Returns [`CloudInitError`] when the sources are invalid or the file cannot
/// be read.
pub fn resolve_user_data(inline: Option<&str>, file: Option<&str>) -> Result<String, CloudInitError> {
    validate_sources(inline, file)?;
    if let Some(payload) = inline {
        return Ok(payload.to_owned());
    }
    let Some(path) = file else {
        return Ok(String::from(DEFAULT_CLOUD_CONFIG));
    };

    let expanded = expand_tilde(path);
    let content = read_ambient(Utf8Path::new(&expanded)).map_err(|message| {
        CloudInitError::FileRead {
            path: expanded.clone(),
            message,
        }
    })?;
    if content.trim().is_empty() {
        return Err(CloudInitError::FileEmpty);
    }
    Ok(content)
}

/// Reads `path` through a capability handle on its parent directory.
pub(crate) fn read_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(format!("path has no file name: {path}")),
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
