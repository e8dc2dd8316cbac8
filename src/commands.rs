use std::path::Path;

use tauri::{AppHandle, Emitter, Manager, State};

use crate::error;
use crate::ffmpeg::{self, normalize_input_path, Binaries, FfmpegStatus, VideoInfo};
use crate::preview::{self, PreviewCache, PreviewKind, PreviewRequest, PreviewSource, SeekPlan};
use crate::settings::{Settings, SettingsStore};
use crate::split::{self, SplitLock, SplitProgress, SplitResult, PROGRESS_EVENT};
use crate::timecode::TimeRange;

/// Run blocking subprocess work off the IPC thread.
async fn run_blocking<T, F>(name: &str, f: F) -> Result<T, String>
where
  T: Send + 'static,
  F: FnOnce() -> error::Result<T> + Send + 'static,
{
  tauri::async_runtime::spawn_blocking(f)
    .await
    .map_err(|e| format!("{name} failed: {e}"))?
    .map_err(|e| {
      log::error!("{name}: {e}");
      String::from(e)
    })
}

fn emit_progress(app_handle: &AppHandle, progress: &SplitProgress) {
  if let Err(e) = app_handle.emit(PROGRESS_EVENT, progress) {
    log::warn!("failed to emit {PROGRESS_EVENT}: {e}");
  }
}

#[tauri::command]
pub async fn check_ffmpeg_command(store: State<'_, SettingsStore>) -> Result<FfmpegStatus, String> {
  let bin_dir = store.get().ffmpeg_bin_dir;
  run_blocking("check_ffmpeg", move || Ok(ffmpeg::check_ffmpeg(&bin_dir))).await
}

#[tauri::command]
pub async fn get_video_info(store: State<'_, SettingsStore>, path: String) -> Result<VideoInfo, String> {
  let bin_dir = store.get().ffmpeg_bin_dir;
  let path = normalize_input_path(&path);
  run_blocking("get_video_info", move || {
    let bins = Binaries::resolve(&bin_dir)?;
    ffmpeg::get_video_info(&bins, &path)
  })
  .await
}

#[tauri::command]
pub async fn split_video_command(
  app_handle: AppHandle,
  store: State<'_, SettingsStore>,
  lock: State<'_, SplitLock>,
  input_path: String,
  output_dir: String,
  segment_duration: u32,
) -> Result<SplitResult, String> {
  let _guard = lock.try_acquire()?;
  let settings = store.get();
  let input_path = normalize_input_path(&input_path);

  run_blocking("split_video", move || {
    let bins = Binaries::resolve(&settings.ffmpeg_bin_dir)?;
    let duration = ffmpeg::probe_duration(&bins, &input_path)?;
    let jobs = split::plan_fixed(Path::new(&input_path), Path::new(&output_dir), duration, segment_duration)?;
    split::run_segments(&bins, &input_path, jobs, settings.overwrite_outputs, |p| {
      emit_progress(&app_handle, p)
    })
  })
  .await
}

#[tauri::command]
pub async fn split_video_by_ranges_command(
  app_handle: AppHandle,
  store: State<'_, SettingsStore>,
  lock: State<'_, SplitLock>,
  input_path: String,
  output_dir: String,
  ranges: Vec<TimeRange>,
) -> Result<SplitResult, String> {
  let _guard = lock.try_acquire()?;
  let settings = store.get();
  let input_path = normalize_input_path(&input_path);

  run_blocking("split_video_by_ranges", move || {
    let bins = Binaries::resolve(&settings.ffmpeg_bin_dir)?;
    let duration = ffmpeg::probe_duration(&bins, &input_path)?;
    let jobs = split::plan_ranges(Path::new(&input_path), Path::new(&output_dir), duration, &ranges)?;
    split::run_segments(&bins, &input_path, jobs, settings.overwrite_outputs, |p| {
      emit_progress(&app_handle, p)
    })
  })
  .await
}

/// Omitted parameters come from settings. `window_seconds = 0` asks for the whole file.
#[tauri::command]
pub async fn prepare_hls_source_command(
  app_handle: AppHandle,
  store: State<'_, SettingsStore>,
  cache: State<'_, PreviewCache>,
  input_path: String,
  min_size_bytes: Option<u64>,
  segment_seconds: Option<u64>,
  start_seconds: Option<f64>,
  window_seconds: Option<u64>,
) -> Result<PreviewSource, String> {
  let settings = store.get();
  let request = PreviewRequest {
    min_size_bytes: min_size_bytes.unwrap_or(settings.preview_min_size_bytes),
    segment_seconds: segment_seconds.unwrap_or(settings.preview_segment_seconds),
    start_seconds,
    window_seconds: Some(window_seconds.unwrap_or(settings.preview_window_seconds)).filter(|w| *w > 0),
  };
  let input_path = normalize_input_path(&input_path);
  let cache = cache.inner().clone();

  let source = run_blocking("prepare_hls_source", move || {
    let bins = Binaries::resolve(&settings.ffmpeg_bin_dir)?;
    cache.prepare(&bins, &input_path, &request)
  })
  .await?;

  let scope = app_handle.asset_protocol_scope();
  let allowed = match source.kind {
    PreviewKind::File => scope.allow_file(&source.path),
    PreviewKind::Hls => match Path::new(&source.path).parent() {
      Some(dir) => scope.allow_directory(dir, true),
      None => Ok(()),
    },
  };
  allowed.map_err(|e| e.to_string())?;

  Ok(source)
}

#[tauri::command]
pub fn plan_preview_seek(source: PreviewSource, target_seconds: f64) -> SeekPlan {
  preview::plan_seek(&source, target_seconds)
}

#[tauri::command]
pub fn describe_playback_error(code: u16) -> String {
  preview::describe_playback_error(code).to_string()
}

#[tauri::command]
pub async fn clear_preview_cache(cache: State<'_, PreviewCache>) -> Result<(), String> {
  let cache = cache.inner().clone();
  run_blocking("clear_preview_cache", move || cache.clear()).await
}

/// Allow a user-selected file or directory for the asset protocol.
#[tauri::command]
pub fn allow_asset_path(app_handle: AppHandle, path: String, is_dir: bool) -> Result<(), String> {
  let path = normalize_input_path(&path);
  let scope = app_handle.asset_protocol_scope();
  if is_dir {
    scope.allow_directory(path, true).map_err(|e| e.to_string())
  } else {
    scope.allow_file(path).map_err(|e| e.to_string())
  }
}

#[tauri::command]
pub fn get_settings(store: State<'_, SettingsStore>) -> Settings {
  store.get()
}

#[tauri::command]
pub fn update_settings(store: State<'_, SettingsStore>, settings: Settings) -> Result<Settings, String> {
  store.update(settings).map_err(String::from)
}
