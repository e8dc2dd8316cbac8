use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ffmpeg::validate_bin_dir;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Empty means auto-detect.
  pub ffmpeg_bin_dir: String,
  /// Files at least this large are previewed through generated HLS windows.
  pub preview_min_size_bytes: u64,
  pub preview_segment_seconds: u64,
  /// 0 renders the whole file in one playlist.
  pub preview_window_seconds: u64,
  pub overwrite_outputs: bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      ffmpeg_bin_dir: String::new(),
      preview_min_size_bytes: 200 * 1024 * 1024,
      preview_segment_seconds: 6,
      preview_window_seconds: 300,
      overwrite_outputs: true,
    }
  }
}

impl Settings {
  pub fn validate(&self) -> Result<()> {
    validate_bin_dir(&self.ffmpeg_bin_dir)?;
    if self.preview_segment_seconds == 0 {
      return Err(Error::invalid("Preview segment length must be greater than zero"));
    }
    if self.preview_window_seconds != 0 && self.preview_window_seconds < self.preview_segment_seconds {
      return Err(Error::invalid("Preview window must be at least one segment long"));
    }
    Ok(())
  }

  /// Defaults when the file is missing or unreadable; a broken file is logged, not fatal.
  pub fn load(path: &Path) -> Self {
    let text = match fs::read_to_string(path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
      Err(e) => {
        log::warn!("could not read {}: {e}", path.display());
        return Self::default();
      }
    };
    match serde_json::from_str(&text) {
      Ok(settings) => settings,
      Err(e) => {
        log::warn!("ignoring invalid settings in {}: {e}", path.display());
        Self::default()
      }
    }
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      fs::create_dir_all(dir).map_err(|e| Error::io_at("create", dir, e))?;
    }
    let text = serde_json::to_string_pretty(self)?;
    fs::write(path, text).map_err(|e| Error::io_at("write", path, e))
  }
}

/// Managed state: the persisted settings plus the file they live in.
pub struct SettingsStore {
  path: PathBuf,
  current: Mutex<Settings>,
}

impl SettingsStore {
  pub fn load(path: PathBuf) -> Self {
    let settings = Settings::load(&path);
    log::debug!("settings loaded from {}", path.display());
    Self {
      path,
      current: Mutex::new(settings),
    }
  }

  pub fn get(&self) -> Settings {
    self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Validates and persists before swapping the in-memory copy.
  pub fn update(&self, settings: Settings) -> Result<Settings> {
    settings.validate()?;
    settings.save(&self.path)?;
    *self.current.lock().unwrap_or_else(|e| e.into_inner()) = settings.clone();
    log::info!("settings saved to {}", self.path.display());
    Ok(settings)
  }
}
