use std::io;
use std::path::Path;

use thiserror::Error;

/// Backend error. Commands hand the display text straight to the UI.
#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Invalid(String),

  #[error("Input file does not exist")]
  InputMissing,

  #[error("Input path is not a file")]
  InputNotFile,

  #[error("Failed to run {program}: program not found (set FFmpeg bin folder or add {program} to PATH)")]
  ToolNotFound { program: String },

  #[error("Failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  /// Non-zero exit; the message already carries the stderr text.
  #[error("{0}")]
  ToolFailed(String),

  #[error("Failed to parse {what}: {detail}")]
  Parse { what: String, detail: String },

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: io::Error,
  },

  #[error("Invalid settings file: {0}")]
  Json(#[from] serde_json::Error),

  #[error("A split is already in progress")]
  Busy,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::Invalid(message.into())
  }

  pub fn io(context: impl Into<String>, source: io::Error) -> Self {
    Self::Io {
      context: context.into(),
      source,
    }
  }

  pub fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
    Self::io(format!("Failed to {action} {}", path.display()), source)
  }

  pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
    Self::Parse {
      what: what.into(),
      detail: detail.into(),
    }
  }

  pub fn spawn(program: &str, source: io::Error) -> Self {
    if source.kind() == io::ErrorKind::NotFound {
      Self::ToolNotFound {
        program: program.to_string(),
      }
    } else {
      Self::Spawn {
        program: program.to_string(),
        source,
      }
    }
  }

  /// `"{program} failed: {stderr}"`, or just `"{program} failed"` when stderr is empty.
  pub fn tool_failed(program: &str, stderr: &[u8]) -> Self {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    Self::ToolFailed(if stderr.is_empty() {
      format!("{program} failed")
    } else {
      format!("{program} failed: {stderr}")
    })
  }
}

impl From<Error> for String {
  fn from(err: Error) -> Self {
    err.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tool_failed_includes_trimmed_stderr() {
    let err = Error::tool_failed("ffmpeg", b"  Invalid data found when processing input\n");
    assert_eq!(err.to_string(), "ffmpeg failed: Invalid data found when processing input");

    let err = Error::tool_failed("ffprobe", b"\n");
    assert_eq!(err.to_string(), "ffprobe failed");
  }

  #[test]
  fn spawn_not_found_mentions_path_hint() {
    let err = Error::spawn("ffprobe", io::Error::new(io::ErrorKind::NotFound, "nope"));
    assert!(matches!(err, Error::ToolNotFound { .. }));
    assert!(err.to_string().contains("add ffprobe to PATH"));

    let err = Error::spawn("ffmpeg", io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
    assert_eq!(err.to_string(), "Failed to run ffmpeg: denied");
  }

  #[test]
  fn converts_into_ui_string() {
    let text: String = Error::Busy.into();
    assert_eq!(text, "A split is already in progress");
  }
}
