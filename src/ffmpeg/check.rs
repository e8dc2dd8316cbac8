use std::path::Path;
use std::process::Command;

use serde::Serialize;

use super::{run_captured, Binaries};
use crate::error::Error;

#[derive(Debug, Serialize)]
pub struct FfmpegStatus {
  pub available: bool,
  pub ffmpeg_version: Option<String>,
  pub ffprobe_version: Option<String>,
  pub ffmpeg_bin_dir_used: String,
  pub message: String,
}

/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...` -> `6.1.1-3ubuntu5`
fn version_from_banner(stdout: &[u8]) -> Option<String> {
  let text = String::from_utf8_lossy(stdout);
  let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
  let mut words = first.split_whitespace();
  words
    .by_ref()
    .find(|w| *w == "version")
    .and_then(|_| words.next())
    .map(str::to_string)
}

fn run_version(mut cmd: Command, name: &str) -> Result<String, String> {
  cmd.arg("-version");
  let output = run_captured(&mut cmd, name).map_err(|e| match e {
    Error::ToolNotFound { .. } => format!("{name} not found"),
    other => other.to_string(),
  })?;

  if !output.status.success() {
    return Err(Error::tool_failed(name, &output.stderr).to_string());
  }

  Ok(version_from_banner(&output.stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// Diagnostic only: failures end up in `message`, never as an error.
pub fn check_ffmpeg(ffmpeg_bin_dir: &str) -> FfmpegStatus {
  let bins = match Binaries::resolve(ffmpeg_bin_dir) {
    Ok(bins) => bins,
    Err(e) => {
      return FfmpegStatus {
        available: false,
        ffmpeg_version: None,
        ffprobe_version: None,
        ffmpeg_bin_dir_used: ffmpeg_bin_dir.trim().to_string(),
        message: e.to_string(),
      };
    }
  };

  let ffmpeg = run_version(bins.ffmpeg_command(), "ffmpeg");
  let ffprobe = run_version(bins.ffprobe_command(), "ffprobe");

  let mut details = Vec::new();
  if let Err(e) = &ffmpeg {
    details.push(e.clone());
  }
  if let Err(e) = &ffprobe {
    details.push(e.clone());
  }

  let available = details.is_empty();
  let message = if available {
    let source = if bins.bin_dir_used.is_empty() {
      "PATH".to_string()
    } else {
      Path::new(&bins.bin_dir_used).display().to_string()
    };
    format!("FFmpeg detected ({source}).")
  } else {
    details.join(" | ")
  };

  if available {
    log::info!("{message}");
  } else {
    log::warn!("ffmpeg check failed: {message}");
  }

  FfmpegStatus {
    available,
    ffmpeg_version: ffmpeg.ok(),
    ffprobe_version: ffprobe.ok(),
    ffmpeg_bin_dir_used: bins.bin_dir_used,
    message,
  }
}
