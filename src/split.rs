//! Cutting a source file into segments, either every N seconds or by explicit ranges.
//!
//! Planning is pure; [`run_segments`] does the filesystem work and drives ffmpeg once per
//! segment with stream copy, reporting progress before each cut.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::ffmpeg::{run_captured, Binaries};
use crate::timecode::{time_for_filename, TimeRange};

pub const PROGRESS_EVENT: &str = "split-progress";

// A fixed-interval remainder shorter than this is folded into the previous segment.
const MIN_TAIL_SECONDS: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct SegmentJob {
  /// 1-based.
  pub index: u32,
  pub start: f64,
  pub duration: f64,
  pub output: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct SplitProgress {
  pub current_segment: u32,
  pub total_segments: u32,
  pub percentage: f64,
  pub current_file: String,
  pub done: bool,
}

#[derive(Debug, Serialize)]
pub struct SplitResult {
  pub success: bool,
  pub output_files: Vec<String>,
  pub error: Option<String>,
}

/// Allows a single split at a time.
#[derive(Default)]
pub struct SplitLock {
  busy: AtomicBool,
}

pub struct SplitGuard<'a> {
  lock: &'a SplitLock,
}

impl SplitLock {
  pub fn try_acquire(&self) -> Result<SplitGuard<'_>> {
    self
      .busy
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .map_err(|_| Error::Busy)?;
    Ok(SplitGuard { lock: self })
  }
}

impl Drop for SplitGuard<'_> {
  fn drop(&mut self) {
    self.lock.busy.store(false, Ordering::SeqCst);
  }
}

fn stem_and_extension(input: &Path) -> Result<(String, String)> {
  let stem = input
    .file_stem()
    .ok_or_else(|| Error::invalid("Could not determine input filename"))?
    .to_string_lossy()
    .to_string();
  let extension = input
    .extension()
    .map(|e| e.to_string_lossy().to_string())
    .unwrap_or_else(|| "mp4".to_string());
  Ok((stem, extension))
}

pub fn plan_fixed(input: &Path, output_dir: &Path, duration: f64, segment_duration: u32) -> Result<Vec<SegmentJob>> {
  if segment_duration == 0 {
    return Err(Error::invalid("Segment duration must be greater than zero"));
  }
  if !duration.is_finite() || duration <= 0.0 {
    return Err(Error::invalid("Video has no duration to split"));
  }

  let (stem, extension) = stem_and_extension(input)?;
  let seg = segment_duration as f64;
  let count = (((duration - MIN_TAIL_SECONDS).max(0.0) / seg).ceil() as u32).max(1);

  let jobs = (0..count)
    .map(|i| {
      let start = i as f64 * seg;
      let length = if i + 1 == count { duration - start } else { seg };
      SegmentJob {
        index: i + 1,
        start,
        duration: length,
        output: output_dir.join(format!("{}_{:03}.{}", stem, i + 1, extension)),
      }
    })
    .collect();

  Ok(jobs)
}

pub fn plan_ranges(input: &Path, output_dir: &Path, duration: f64, ranges: &[TimeRange]) -> Result<Vec<SegmentJob>> {
  if ranges.is_empty() {
    return Err(Error::invalid("Add at least one time range"));
  }

  let (stem, extension) = stem_and_extension(input)?;
  let mut jobs = Vec::with_capacity(ranges.len());
  for (i, range) in ranges.iter().enumerate() {
    range
      .validate(duration)
      .map_err(|e| Error::invalid(format!("Range {}: {e}", i + 1)))?;
    let range = range.clamped_to(duration);
    let index = i as u32 + 1;
    jobs.push(SegmentJob {
      index,
      start: range.start,
      duration: range.duration(),
      output: output_dir.join(format!(
        "{}_{:03}_{}-{}.{}",
        stem,
        index,
        time_for_filename(range.start),
        time_for_filename(range.end),
        extension
      )),
    });
  }

  Ok(jobs)
}

/// `clip.mp4` -> `clip (1).mp4`, `clip (2).mp4`, ... until a free name turns up.
pub fn unique_output_path(base: PathBuf) -> PathBuf {
  if !base.exists() {
    return base;
  }

  let stem = base.file_stem().unwrap_or_default().to_string_lossy().to_string();
  let ext = base.extension().map(|e| e.to_string_lossy().to_string());
  let parent = base.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
  let mut numbered = base;
  for i in 1..=999 {
    let name = match &ext {
      Some(ext) => format!("{stem} ({i}).{ext}"),
      None => format!("{stem} ({i})"),
    };
    numbered = parent.join(name);
    if !numbered.exists() {
      break;
    }
  }
  numbered
}

fn segment_args(input_path: &str, job: &SegmentJob, overwrite: bool) -> Vec<String> {
  let mut args: Vec<String> = vec!["-v".into(), "error".into()];
  if overwrite {
    args.push("-y".into());
  } else {
    args.push("-n".into());
  }
  // Input-level seek: stream copy starts on the keyframe at or before `start`.
  args.extend([
    "-ss".into(),
    format!("{:.6}", job.start),
    "-i".into(),
    input_path.to_string(),
    "-t".into(),
    format!("{:.6}", job.duration),
    "-map".into(),
    "0".into(),
    "-c".into(),
    "copy".into(),
    "-avoid_negative_ts".into(),
    "make_zero".into(),
  ]);
  args.push(job.output.to_string_lossy().to_string());
  args
}

fn run_segment(bins: &Binaries, input_path: &str, job: &SegmentJob, overwrite: bool) -> Result<()> {
  let mut cmd = bins.ffmpeg_command();
  cmd.args(segment_args(input_path, job, overwrite));
  let output = run_captured(&mut cmd, "ffmpeg")?;

  let written = fs::metadata(&job.output).map(|m| m.len() > 0).unwrap_or(false);
  if !output.status.success() {
    // ffmpeg exits non-zero on some recoverable stream warnings; keep the file if one was written.
    if written {
      log::warn!(
        "ffmpeg reported an error for segment {} but wrote {}: {}",
        job.index,
        job.output.display(),
        String::from_utf8_lossy(&output.stderr).trim()
      );
      return Ok(());
    }
    let err = Error::tool_failed("ffmpeg", &output.stderr);
    return Err(Error::ToolFailed(format!("Segment {} failed: {err}", job.index)));
  }
  if !written {
    return Err(Error::ToolFailed(format!(
      "Segment {} produced no output ({})",
      job.index,
      job.output.display()
    )));
  }
  Ok(())
}

fn remove_stale_output(path: &Path) -> Result<()> {
  match fs::remove_file(path) {
    Ok(()) => {
      log::debug!("removed previous output {}", path.display());
      Ok(())
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(Error::io_at("remove previous output", path, e)),
  }
}

fn progress_for(job: &SegmentJob, total: u32) -> SplitProgress {
  SplitProgress {
    current_segment: job.index,
    total_segments: total,
    percentage: (job.index - 1) as f64 / total as f64 * 100.0,
    current_file: job.output.to_string_lossy().to_string(),
    done: false,
  }
}

/// Cut every planned segment in order. Stops at the first failure.
pub fn run_segments(
  bins: &Binaries,
  input_path: &str,
  jobs: Vec<SegmentJob>,
  overwrite: bool,
  mut on_progress: impl FnMut(&SplitProgress),
) -> Result<SplitResult> {
  let total = jobs.len() as u32;
  if let Some(dir) = jobs.first().and_then(|j| j.output.parent()) {
    fs::create_dir_all(dir).map_err(|e| Error::io_at("create output folder", dir, e))?;
  }

  log::info!("splitting {input_path} into {total} segment(s)");
  let mut output_files = Vec::with_capacity(jobs.len());
  for mut job in jobs {
    // Either way the target is free before ffmpeg runs, so a file there afterwards is ours.
    if overwrite {
      remove_stale_output(&job.output)?;
    } else {
      job.output = unique_output_path(job.output);
    }
    on_progress(&progress_for(&job, total));
    run_segment(bins, input_path, &job, overwrite)?;
    output_files.push(job.output.to_string_lossy().to_string());
  }

  on_progress(&SplitProgress {
    current_segment: total,
    total_segments: total,
    percentage: 100.0,
    current_file: output_files.last().cloned().unwrap_or_default(),
    done: true,
  });
  log::info!("split finished: {} file(s)", output_files.len());

  Ok(SplitResult {
    success: true,
    output_files,
    error: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn starts_and_lengths(jobs: &[SegmentJob]) -> Vec<(f64, f64)> {
    jobs.iter().map(|j| (j.start, j.duration)).collect()
  }

  #[test]
  fn fixed_plan_covers_remainder() {
    let jobs = plan_fixed(Path::new("/in/movie.mkv"), Path::new("/out"), 75.0, 30).unwrap();
    assert_eq!(starts_and_lengths(&jobs), vec![(0.0, 30.0), (30.0, 30.0), (60.0, 15.0)]);
    assert_eq!(jobs[2].index, 3);
    assert_eq!(jobs[0].output, Path::new("/out").join("movie_001.mkv"));
    assert_eq!(jobs[2].output, Path::new("/out").join("movie_003.mkv"));
  }

  #[test]
  fn fixed_plan_exact_multiple_has_no_empty_tail() {
    let jobs = plan_fixed(Path::new("clip.mp4"), Path::new("out"), 60.0, 30).unwrap();
    assert_eq!(jobs.len(), 2);

    // Container rounding noise is folded into the last segment.
    let jobs = plan_fixed(Path::new("clip.mp4"), Path::new("out"), 60.04, 30).unwrap();
    assert_eq!(jobs.len(), 2);
    assert!((jobs[1].duration - 30.04).abs() < 1e-9);
  }

  #[test]
  fn fixed_plan_shorter_than_segment_is_one_job() {
    let jobs = plan_fixed(Path::new("clip"), Path::new("out"), 12.0, 30).unwrap();
    assert_eq!(starts_and_lengths(&jobs), vec![(0.0, 12.0)]);
    assert_eq!(jobs[0].output, Path::new("out").join("clip_001.mp4"));
  }

  #[test]
  fn fixed_plan_rejects_bad_input() {
    assert!(plan_fixed(Path::new("a.mp4"), Path::new("out"), 60.0, 0).is_err());
    assert!(plan_fixed(Path::new("a.mp4"), Path::new("out"), 0.0, 10).is_err());
    assert!(plan_fixed(Path::new("a.mp4"), Path::new("out"), f64::NAN, 10).is_err());
  }

  #[test]
  fn range_plan_names_and_clamps() {
    let ranges = [TimeRange::new(5.0, 20.0), TimeRange::new(3600.0, 4000.0)];
    let jobs = plan_ranges(Path::new("/v/talk.mov"), Path::new("/o"), 3700.0, &ranges).unwrap();
    assert_eq!(starts_and_lengths(&jobs), vec![(5.0, 15.0), (3600.0, 100.0)]);
    assert_eq!(jobs[0].output, Path::new("/o").join("talk_001_00h00h05-00h00h20.mov"));
    assert_eq!(jobs[1].output, Path::new("/o").join("talk_002_01h00h00-01h01h40.mov"));
  }

  #[test]
  fn range_plan_reports_which_range_is_bad() {
    let ranges = [TimeRange::new(0.0, 10.0), TimeRange::new(30.0, 20.0)];
    let err = plan_ranges(Path::new("a.mp4"), Path::new("o"), 60.0, &ranges).unwrap_err();
    assert!(err.to_string().starts_with("Range 2: End time must be greater than start time"));

    assert!(plan_ranges(Path::new("a.mp4"), Path::new("o"), 60.0, &[]).is_err());
  }

  #[test]
  fn segment_args_use_stream_copy() {
    let job = SegmentJob {
      index: 1,
      start: 30.0,
      duration: 15.5,
      output: PathBuf::from("out.mp4"),
    };
    let args = segment_args("in.mp4", &job, true);
    let joined = args.join(" ");
    assert_eq!(
      joined,
      "-v error -y -ss 30.000000 -i in.mp4 -t 15.500000 -map 0 -c copy -avoid_negative_ts make_zero out.mp4"
    );
    assert_eq!(segment_args("in.mp4", &job, false)[2], "-n");
  }

  #[test]
  fn unique_output_path_appends_counter() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("clip_001.mp4");
    assert_eq!(unique_output_path(base.clone()), base);

    fs::write(&base, b"x").unwrap();
    fs::write(dir.path().join("clip_001 (1).mp4"), b"x").unwrap();
    assert_eq!(unique_output_path(base), dir.path().join("clip_001 (2).mp4"));
  }

  #[test]
  fn progress_reports_completed_fraction() {
    let job = SegmentJob {
      index: 3,
      start: 60.0,
      duration: 30.0,
      output: PathBuf::from("x_003.mp4"),
    };
    let p = progress_for(&job, 4);
    assert_eq!(p.current_segment, 3);
    assert_eq!(p.total_segments, 4);
    assert_eq!(p.percentage, 50.0);
    assert!(!p.done);
  }

  #[test]
  fn split_lock_allows_one_holder() {
    let lock = SplitLock::default();
    let guard = lock.try_acquire().unwrap();
    assert!(matches!(lock.try_acquire(), Err(Error::Busy)));
    drop(guard);
    assert!(lock.try_acquire().is_ok());
  }

  #[test]
  fn failed_spawn_stops_before_reporting_done() {
    let dir = tempfile::tempdir().unwrap();
    let bins = Binaries {
      ffmpeg: dir.path().join("no-ffmpeg"),
      ffprobe: dir.path().join("no-ffprobe"),
      bin_dir_used: String::new(),
    };
    let out_dir = dir.path().join("segments");
    let jobs = plan_fixed(Path::new("in.mp4"), &out_dir, 20.0, 10).unwrap();

    let mut events = Vec::new();
    let err = run_segments(&bins, "in.mp4", jobs, true, |p| events.push(p.clone())).unwrap_err();
    assert!(matches!(err, Error::ToolNotFound { .. }));
    assert!(out_dir.is_dir());
    assert_eq!(events.len(), 1);
    assert!(!events[0].done);
  }

  #[cfg(unix)]
  fn fake_ffmpeg(dir: &Path, body: &str) -> Binaries {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    // `last` ends up as the final argument, the output path.
    fs::write(&path, format!("#!/bin/sh\nfor last; do :; done\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    Binaries {
      ffmpeg: path,
      ffprobe: dir.join("ffprobe"),
      bin_dir_used: String::new(),
    }
  }

  #[cfg(unix)]
  fn names(files: &[String]) -> Vec<String> {
    files
      .iter()
      .map(|f| Path::new(f).file_name().unwrap().to_string_lossy().to_string())
      .collect()
  }

  #[cfg(unix)]
  #[test]
  fn completed_split_ends_with_done_event() {
    let dir = tempfile::tempdir().unwrap();
    let bins = fake_ffmpeg(dir.path(), "printf segment > \"$last\"\nexit 0");
    let out_dir = dir.path().join("out");
    let jobs = plan_fixed(Path::new("in.mp4"), &out_dir, 25.0, 10).unwrap();

    let mut events = Vec::new();
    let result = run_segments(&bins, "in.mp4", jobs, true, |p| events.push(p.clone())).unwrap();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(names(&result.output_files), vec!["in_001.mp4", "in_002.mp4", "in_003.mp4"]);

    let segments: Vec<u32> = events.iter().map(|p| p.current_segment).collect();
    assert_eq!(segments, vec![1, 2, 3, 3]);
    assert!(events[..3].iter().all(|p| !p.done && p.total_segments == 3));
    assert_eq!(events[0].percentage, 0.0);
    let last = events.last().unwrap();
    assert!(last.done);
    assert_eq!(last.percentage, 100.0);
    assert_eq!(last.current_file, result.output_files[2]);
  }

  #[cfg(unix)]
  #[test]
  fn nonzero_exit_with_fresh_output_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let bins = fake_ffmpeg(
      dir.path(),
      "printf segment > \"$last\"\necho 'Non-monotonous DTS in output stream' >&2\nexit 1",
    );
    let out_dir = dir.path().join("out");
    let jobs = plan_fixed(Path::new("in.mp4"), &out_dir, 20.0, 10).unwrap();

    let result = run_segments(&bins, "in.mp4", jobs, true, |_| {}).unwrap();
    assert_eq!(names(&result.output_files), vec!["in_001.mp4", "in_002.mp4"]);
  }

  #[cfg(unix)]
  #[test]
  fn failed_resplit_does_not_report_previous_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let bins = fake_ffmpeg(
      dir.path(),
      "echo 'Invalid data found when processing input' >&2\nexit 1",
    );
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    fs::write(out_dir.join("in_001.mp4"), b"previous run").unwrap();
    fs::write(out_dir.join("in_002.mp4"), b"previous run").unwrap();
    let jobs = plan_fixed(Path::new("in.mp4"), &out_dir, 20.0, 10).unwrap();

    let mut events = Vec::new();
    let err = run_segments(&bins, "in.mp4", jobs, true, |p| events.push(p.clone())).unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("Segment 1 failed"), "{text}");
    assert!(text.contains("Invalid data found when processing input"), "{text}");
    assert!(!out_dir.join("in_001.mp4").exists());
    assert!(events.iter().all(|p| !p.done));
  }

  #[cfg(unix)]
  #[test]
  fn keeps_existing_files_when_not_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let bins = fake_ffmpeg(dir.path(), "printf segment > \"$last\"\nexit 0");
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    fs::write(out_dir.join("in_001.mp4"), b"keep me").unwrap();
    let jobs = plan_fixed(Path::new("in.mp4"), &out_dir, 20.0, 10).unwrap();

    let mut events = Vec::new();
    let result = run_segments(&bins, "in.mp4", jobs, false, |p| events.push(p.clone())).unwrap();

    assert_eq!(names(&result.output_files), vec!["in_001 (1).mp4", "in_002.mp4"]);
    assert_eq!(fs::read(out_dir.join("in_001.mp4")).unwrap(), b"keep me");
    assert_eq!(events[0].current_file, result.output_files[0]);
  }
}
