mod commands;
mod error;
pub mod ffmpeg;
pub mod preview;
pub mod settings;
pub mod split;
pub mod timecode;

pub use error::{Error, Result};

use commands::{
  allow_asset_path, check_ffmpeg_command, clear_preview_cache, describe_playback_error, get_settings,
  get_video_info, plan_preview_seek, prepare_hls_source_command, split_video_by_ranges_command,
  split_video_command, update_settings,
};
use preview::PreviewCache;
use settings::{SettingsStore, SETTINGS_FILE};
use split::SplitLock;
use tauri::Manager;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
  let log_level = if cfg!(debug_assertions) {
    log::LevelFilter::Debug
  } else {
    log::LevelFilter::Info
  };

  tauri::Builder::default()
    .plugin(tauri_plugin_log::Builder::default().level(log_level).build())
    .plugin(tauri_plugin_dialog::init())
    .plugin(tauri_plugin_opener::init())
    .setup(|app| {
      let config_dir = app.path().app_config_dir()?;
      app.manage(SettingsStore::load(config_dir.join(SETTINGS_FILE)));

      let cache_dir = app.path().app_cache_dir()?.join("preview");
      app.manage(PreviewCache::new(cache_dir));
      app.manage(SplitLock::default());

      log::info!("video splitter {} started", app.package_info().version);
      Ok(())
    })
    .invoke_handler(tauri::generate_handler![
      allow_asset_path,
      check_ffmpeg_command,
      clear_preview_cache,
      describe_playback_error,
      get_settings,
      get_video_info,
      plan_preview_seek,
      prepare_hls_source_command,
      split_video_command,
      split_video_by_ranges_command,
      update_settings
    ])
    .run(tauri::generate_context!())
    .expect("error while running tauri application");
}
