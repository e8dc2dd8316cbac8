//! Preview sources for the player.
//!
//! Small files play straight from disk. Large files get a browser-friendly HLS rendition of a
//! time window around the playhead, generated on demand and cached under the app cache
//! directory. Seeks outside the loaded window ask the front end to request a new one.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::ffmpeg::{probe_duration, run_captured, Binaries};

const PLAYLIST_NAME: &str = "index.m3u8";
const PLAYLIST_END_TAG: &str = "#EXT-X-ENDLIST";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
  File,
  Hls,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreviewSource {
  pub kind: PreviewKind,
  /// The original file, or the playlist for `hls`.
  pub path: String,
  pub window_start: f64,
  pub window_end: f64,
  pub duration: f64,
  pub segment_seconds: u64,
  pub cached: bool,
}

#[derive(Clone, Debug)]
pub struct PreviewRequest {
  pub min_size_bytes: u64,
  pub segment_seconds: u64,
  pub start_seconds: Option<f64>,
  /// `None` covers the whole file.
  pub window_seconds: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SeekPlan {
  /// Seek the loaded source to `offset` (source-relative seconds).
  InWindow { offset: f64 },
  /// Request a new window starting at `window_start`, then seek to `target`.
  Reload { window_start: f64, target: f64 },
}

/// Generated playlists live under `root`; generation is serialized so two requests for the
/// same window never write into the same folder.
#[derive(Clone)]
pub struct PreviewCache {
  root: PathBuf,
  generate_lock: Arc<Mutex<()>>,
}

impl PreviewCache {
  pub fn new(root: PathBuf) -> Self {
    Self {
      root,
      generate_lock: Arc::new(Mutex::new(())),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn clear(&self) -> Result<()> {
    let _guard = self.generate_lock.lock().unwrap_or_else(|e| e.into_inner());
    if self.root.exists() {
      fs::remove_dir_all(&self.root).map_err(|e| Error::io_at("remove", &self.root, e))?;
    }
    log::info!("preview cache cleared");
    Ok(())
  }

  pub fn prepare(&self, bins: &Binaries, input_path: &str, request: &PreviewRequest) -> Result<PreviewSource> {
    if request.segment_seconds == 0 {
      return Err(Error::invalid("Preview segment length must be greater than zero"));
    }

    let duration = probe_duration(bins, input_path)?;
    let file_size = fs::metadata(input_path)
      .map_err(|e| Error::io_at("read metadata of", Path::new(input_path), e))?
      .len();

    if let Some(source) = direct_source(input_path, file_size, duration, request) {
      return Ok(source);
    }

    let (window_start, window_end) = window_bounds(
      duration,
      request.segment_seconds,
      request.start_seconds,
      request.window_seconds,
    );
    let file_dir = self.root.join(path_key(input_path));
    let version = version_key(input_path);
    let dir = file_dir.join(&version).join(window_dir_name(window_start, window_end));
    let playlist = dir.join(PLAYLIST_NAME);

    let _guard = self.generate_lock.lock().unwrap_or_else(|e| e.into_inner());
    let cached = playlist_is_complete(&playlist);
    if cached {
      log::debug!("reusing preview {}", playlist.display());
    } else {
      prune_other_versions(&file_dir, &version);
      generate_window(bins, input_path, &dir, window_start, window_end, request.segment_seconds)?;
    }

    Ok(PreviewSource {
      kind: PreviewKind::Hls,
      path: playlist.to_string_lossy().to_string(),
      window_start,
      window_end,
      duration,
      segment_seconds: request.segment_seconds,
      cached,
    })
  }
}

fn align_down(seconds: f64, segment_seconds: u64) -> f64 {
  let seg = segment_seconds.max(1) as f64;
  (seconds / seg).floor() * seg
}

/// Window start snaps down to a segment boundary so repeated requests near the same spot
/// hit the same cached playlist.
pub fn window_bounds(
  duration: f64,
  segment_seconds: u64,
  start_seconds: Option<f64>,
  window_seconds: Option<u64>,
) -> (f64, f64) {
  let requested = start_seconds
    .filter(|s| s.is_finite())
    .unwrap_or(0.0)
    .clamp(0.0, duration.max(0.0));
  let mut start = align_down(requested, segment_seconds);
  // A start right on the end would make an empty window; back up one segment.
  if start >= duration && duration > 0.0 {
    start = align_down((duration - 0.001).max(0.0), segment_seconds);
  }
  let end = match window_seconds {
    Some(w) if w > 0 => (start + w as f64).min(duration),
    _ => duration,
  };
  (start, end)
}

fn window_dir_name(start: f64, end: f64) -> String {
  format!("w{}-{}", (start * 1000.0).round() as u64, (end * 1000.0).round() as u64)
}

/// Plays the file as is when it is small, or when its length is unknown and no window can be cut.
fn direct_source(input_path: &str, file_size: u64, duration: f64, request: &PreviewRequest) -> Option<PreviewSource> {
  let unknown_length = !(duration.is_finite() && duration > 0.0);
  if unknown_length {
    log::warn!("no usable duration for {input_path}, playing it directly");
  } else if file_size >= request.min_size_bytes {
    return None;
  }
  let duration = if unknown_length { 0.0 } else { duration };
  Some(PreviewSource {
    kind: PreviewKind::File,
    path: input_path.to_string(),
    window_start: 0.0,
    window_end: duration,
    duration,
    segment_seconds: request.segment_seconds,
    cached: false,
  })
}

fn short_sha256(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  let hash = format!("{:x}", hasher.finalize());
  hash[..16].to_string()
}

/// Folder for one input path. The same path maps to the same name across runs and builds.
pub fn path_key(input_path: &str) -> String {
  short_sha256(input_path)
}

/// Folder for one version of a file; changes when the file is replaced or modified.
pub fn version_key(input_path: &str) -> String {
  let (len, modified_ms) = fs::metadata(input_path)
    .map(|m| {
      let modified_ms = m
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
      (m.len(), modified_ms)
    })
    .unwrap_or((0, 0));
  short_sha256(&format!("{input_path}|{len}|{modified_ms}"))
}

/// Drops renditions of earlier versions of the same file. Failures only cost disk space.
fn prune_other_versions(file_dir: &Path, keep: &str) {
  let Ok(entries) = fs::read_dir(file_dir) else {
    return;
  };
  for entry in entries.flatten() {
    if entry.file_name().to_str() == Some(keep) || !entry.path().is_dir() {
      continue;
    }
    match fs::remove_dir_all(entry.path()) {
      Ok(()) => log::debug!("removed stale preview {}", entry.path().display()),
      Err(e) => log::warn!("could not remove stale preview {}: {e}", entry.path().display()),
    }
  }
}

/// A VOD playlist only gets its end tag once ffmpeg has written every segment.
pub fn playlist_is_complete(playlist: &Path) -> bool {
  fs::read_to_string(playlist)
    .map(|text| text.lines().any(|l| l.trim() == PLAYLIST_END_TAG))
    .unwrap_or(false)
}

fn hls_args(input_path: &str, dir: &Path, start: f64, length: f64, segment_seconds: u64) -> Vec<String> {
  let segment_pattern = dir.join("seg_%05d.ts");
  let playlist = dir.join(PLAYLIST_NAME);
  vec![
    "-v".into(),
    "error".into(),
    "-y".into(),
    "-ss".into(),
    format!("{start:.3}"),
    "-i".into(),
    input_path.to_string(),
    "-t".into(),
    format!("{length:.3}"),
    "-map".into(),
    "0:v:0".into(),
    "-map".into(),
    "0:a:0?".into(),
    "-c:v".into(),
    "libx264".into(),
    "-preset".into(),
    "veryfast".into(),
    "-crf".into(),
    "23".into(),
    "-pix_fmt".into(),
    "yuv420p".into(),
    // Keyframe on every segment boundary so each .ts starts cleanly.
    "-force_key_frames".into(),
    format!("expr:gte(t,n_forced*{segment_seconds})"),
    "-c:a".into(),
    "aac".into(),
    "-b:a".into(),
    "128k".into(),
    "-f".into(),
    "hls".into(),
    "-hls_time".into(),
    segment_seconds.to_string(),
    "-hls_playlist_type".into(),
    "vod".into(),
    "-hls_segment_filename".into(),
    segment_pattern.to_string_lossy().to_string(),
    playlist.to_string_lossy().to_string(),
  ]
}

fn generate_window(
  bins: &Binaries,
  input_path: &str,
  dir: &Path,
  start: f64,
  end: f64,
  segment_seconds: u64,
) -> Result<()> {
  // Leftovers from an interrupted run would be mixed into the new playlist.
  if dir.exists() {
    fs::remove_dir_all(dir).map_err(|e| Error::io_at("clear", dir, e))?;
  }
  fs::create_dir_all(dir).map_err(|e| Error::io_at("create", dir, e))?;

  log::info!(
    "generating preview for {input_path} [{start:.1}s, {end:.1}s) in {}",
    dir.display()
  );
  let mut cmd = bins.ffmpeg_command();
  cmd.args(hls_args(input_path, dir, start, end - start, segment_seconds));
  let output = run_captured(&mut cmd, "ffmpeg")?;

  if !output.status.success() || !playlist_is_complete(&dir.join(PLAYLIST_NAME)) {
    let _ = fs::remove_dir_all(dir);
    let err = Error::tool_failed("ffmpeg", &output.stderr);
    return Err(Error::ToolFailed(format!("Preview preparation failed: {err}")));
  }
  Ok(())
}

/// Where a seek to `target` should land given the currently loaded source.
pub fn plan_seek(source: &PreviewSource, target: f64) -> SeekPlan {
  let target = if target.is_finite() {
    target.clamp(0.0, source.duration.max(0.0))
  } else {
    0.0
  };

  if source.kind == PreviewKind::File {
    return SeekPlan::InWindow { offset: target };
  }

  let reaches_end = source.window_end >= source.duration;
  let inside = target >= source.window_start && (target < source.window_end || reaches_end);
  if inside {
    SeekPlan::InWindow {
      offset: target - source.window_start,
    }
  } else {
    SeekPlan::Reload {
      window_start: window_bounds(source.duration, source.segment_seconds, Some(target), None).0,
      target,
    }
  }
}

/// User text for an HTML `MediaError.code`.
pub fn describe_playback_error(code: u16) -> &'static str {
  match code {
    1 => "Playback was aborted.",
    2 => "A network error interrupted loading the video.",
    3 => "The video could not be decoded. Its codec may not be supported for preview.",
    4 => "This video format is not supported for preview.",
    _ => "An unknown playback error occurred.",
  }
}
