//! Locating and running the external `ffmpeg` / `ffprobe` binaries.

mod check;
mod probe;

pub use check::{check_ffmpeg, FfmpegStatus};
pub use probe::{ensure_input_file_exists, get_video_info, probe_duration, VideoInfo};

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{Error, Result};

const BIN_DIR_ENV_KEYS: [&str; 2] = ["VIDEO_SPLITTER_FFMPEG_BIN_DIR", "FFMPEG_BIN_DIR"];

#[cfg(windows)]
fn apply_no_window(cmd: &mut Command) {
  use std::os::windows::process::CommandExt;
  // CREATE_NO_WINDOW
  cmd.creation_flags(0x08000000);
}

#[cfg(not(windows))]
fn apply_no_window(_cmd: &mut Command) {}

fn exe_name(tool: &str) -> String {
  if cfg!(windows) {
    format!("{tool}.exe")
  } else {
    tool.to_string()
  }
}

/// Resolved paths of the two tools plus the directory they came from (empty for `PATH`).
#[derive(Clone, Debug)]
pub struct Binaries {
  pub ffmpeg: PathBuf,
  pub ffprobe: PathBuf,
  pub bin_dir_used: String,
}

impl Binaries {
  /// Explicit folder first, then the environment, then a `bin/` beside the app, then `PATH`.
  pub fn resolve(ffmpeg_bin_dir: &str) -> Result<Self> {
    validate_bin_dir(ffmpeg_bin_dir)?;

    let dir_str = ffmpeg_bin_dir.trim();
    if !dir_str.is_empty() {
      return Ok(Self::in_dir(Path::new(dir_str)));
    }

    if let Some(dir) = auto_detect_bin_dir() {
      return Ok(Self::in_dir(&dir));
    }

    Ok(Self {
      ffmpeg: PathBuf::from("ffmpeg"),
      ffprobe: PathBuf::from("ffprobe"),
      bin_dir_used: String::new(),
    })
  }

  fn in_dir(dir: &Path) -> Self {
    Self {
      ffmpeg: dir.join(exe_name("ffmpeg")),
      ffprobe: dir.join(exe_name("ffprobe")),
      bin_dir_used: dir.to_string_lossy().to_string(),
    }
  }

  pub fn ffmpeg_command(&self) -> Command {
    new_command(&self.ffmpeg)
  }

  pub fn ffprobe_command(&self) -> Command {
    new_command(&self.ffprobe)
  }
}

fn new_command(program: &Path) -> Command {
  let mut cmd = Command::new(program);
  apply_no_window(&mut cmd);
  cmd.stdin(Stdio::null());
  cmd
}

pub fn looks_like_bin_dir(dir: &Path) -> bool {
  dir.join(exe_name("ffmpeg")).is_file() && dir.join(exe_name("ffprobe")).is_file()
}

fn auto_detect_bin_dir() -> Option<PathBuf> {
  for key in BIN_DIR_ENV_KEYS {
    if let Some(v) = env::var_os(key) {
      let p = PathBuf::from(v);
      if looks_like_bin_dir(&p) {
        return Some(p);
      }
    }
  }

  let exe = env::current_exe().ok()?;
  let exe_dir = exe.parent()?;
  let mut candidates = vec![exe_dir.join("bin")];
  if let Some(parent) = exe_dir.parent() {
    candidates.push(parent.join("bin"));
  }
  candidates.into_iter().find(|dir| looks_like_bin_dir(dir))
}

/// An empty folder means "auto-detect"; anything else must hold both tools.
pub fn validate_bin_dir(ffmpeg_bin_dir: &str) -> Result<()> {
  let dir_str = ffmpeg_bin_dir.trim();
  if dir_str.is_empty() {
    return Ok(());
  }

  let dir = Path::new(dir_str);
  if !dir.exists() {
    return Err(Error::invalid("FFmpeg bin folder does not exist"));
  }
  if !dir.is_dir() {
    return Err(Error::invalid("FFmpeg bin folder is not a directory"));
  }

  for tool in ["ffmpeg", "ffprobe"] {
    let name = exe_name(tool);
    if !dir.join(&name).is_file() {
      return Err(Error::invalid(format!("FFmpeg bin folder must contain {name}")));
    }
  }

  Ok(())
}

/// Run to completion with stdout/stderr captured.
pub(crate) fn run_captured(cmd: &mut Command, program: &str) -> Result<Output> {
  log::debug!("running {:?}", cmd);
  cmd
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .output()
    .map_err(|e| Error::spawn(program, e))
}

/// Some front ends hand over `file://` URLs; turn them into plain local paths.
pub fn normalize_input_path(input_path: &str) -> String {
  let s = input_path.trim();
  if !s.to_ascii_lowercase().starts_with("file://") {
    return s.to_string();
  }

  let mut rest = &s[7..];
  if rest.to_ascii_lowercase().starts_with("localhost/") {
    rest = &rest[9..];
  }

  let decoded = percent_decode(rest);
  if cfg!(windows) {
    // `/C:/Videos/a.mp4` -> `C:\Videos\a.mp4`
    let trimmed = match decoded.as_bytes() {
      [b'/', drive, b':', ..] if drive.is_ascii_alphabetic() => &decoded[1..],
      _ => decoded.as_str(),
    };
    trimmed.replace('/', "\\")
  } else {
    decoded
  }
}

fn percent_decode(text: &str) -> String {
  let hex = |b: u8| -> Option<u8> {
    match b {
      b'0'..=b'9' => Some(b - b'0'),
      b'a'..=b'f' => Some(b - b'a' + 10),
      b'A'..=b'F' => Some(b - b'A' + 10),
      _ => None,
    }
  };

  let bytes = text.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' && i + 2 < bytes.len() {
      if let (Some(a), Some(b)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
        out.push((a << 4) | b);
        i += 3;
        continue;
      }
    }
    out.push(bytes[i]);
    i += 1;
  }

  String::from_utf8_lossy(&out).to_string()
}
