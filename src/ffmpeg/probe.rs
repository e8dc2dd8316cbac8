use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde::Serialize;

use super::{run_captured, Binaries};
use crate::error::{Error, Result};
use crate::timecode::format_duration;

#[derive(Clone, Debug, Serialize)]
pub struct VideoInfo {
  pub path: String,
  pub duration: f64,
  pub duration_formatted: String,
  pub filename: String,
  pub file_size: u64,
}

fn duration_cache() -> &'static Mutex<HashMap<String, f64>> {
  static CACHE: OnceLock<Mutex<HashMap<String, f64>>> = OnceLock::new();
  CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

// Path + size + mtime, so a re-encoded file at the same path is probed again.
fn cache_key(input_path: &str) -> String {
  match Path::new(input_path).metadata() {
    Ok(m) => {
      let modified = m
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
      format!("{}|{}|{:.3}", input_path, m.len(), modified)
    }
    Err(_) => input_path.to_string(),
  }
}

pub fn ensure_input_file_exists(input_path: &str) -> Result<()> {
  let p = Path::new(input_path);
  if !p.exists() {
    return Err(Error::InputMissing);
  }
  if !p.is_file() {
    return Err(Error::InputNotFile);
  }
  Ok(())
}

/// ffprobe prints `N/A` for streams without a container duration.
fn parse_duration_output(stdout: &[u8]) -> Option<f64> {
  let text = String::from_utf8_lossy(stdout);
  let value = text.lines().map(str::trim).find(|l| !l.is_empty())?;
  value
    .parse::<f64>()
    .ok()
    .filter(|d| d.is_finite() && *d >= 0.0)
}

pub fn probe_duration(bins: &Binaries, input_path: &str) -> Result<f64> {
  ensure_input_file_exists(input_path)?;

  let key = cache_key(input_path);
  if let Ok(guard) = duration_cache().lock() {
    if let Some(duration) = guard.get(&key) {
      return Ok(*duration);
    }
  }

  let mut cmd = bins.ffprobe_command();
  cmd
    .args([
      "-v",
      "error",
      "-show_entries",
      "format=duration",
      "-of",
      "default=nw=1:nk=1",
    ])
    .arg(input_path);
  let output = run_captured(&mut cmd, "ffprobe")?;

  if !output.status.success() {
    return Err(Error::tool_failed("ffprobe", &output.stderr));
  }

  let duration = parse_duration_output(&output.stdout).ok_or_else(|| {
    Error::parse(
      "duration",
      format!("unexpected ffprobe output {:?}", String::from_utf8_lossy(&output.stdout).trim()),
    )
  })?;

  if let Ok(mut guard) = duration_cache().lock() {
    guard.insert(key, duration);
  }
  log::debug!("probed {input_path}: {duration:.3}s");

  Ok(duration)
}

pub fn get_video_info(bins: &Binaries, path: &str) -> Result<VideoInfo> {
  let duration = probe_duration(bins, path)?;

  let file_path = Path::new(path);
  let filename = file_path
    .file_name()
    .map(|s| s.to_string_lossy().to_string())
    .unwrap_or_else(|| "unknown".to_string());
  let file_size = file_path
    .metadata()
    .map_err(|e| Error::io_at("read metadata of", file_path, e))?
    .len();

  Ok(VideoInfo {
    path: path.to_string(),
    duration,
    duration_formatted: format_duration(duration),
    filename,
    file_size,
  })
}
