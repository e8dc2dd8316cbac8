use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Explicit start/end pair (seconds) for one output segment.
///
/// The UI may send either plain seconds or a typed timecode such as `"01:02:03.5"`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
  #[serde(deserialize_with = "seconds_or_timecode")]
  pub start: f64,
  #[serde(deserialize_with = "seconds_or_timecode")]
  pub end: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SecondsOrTimecode {
  Seconds(f64),
  Timecode(String),
}

fn seconds_or_timecode<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  match SecondsOrTimecode::deserialize(deserializer)? {
    SecondsOrTimecode::Seconds(seconds) => Ok(seconds),
    SecondsOrTimecode::Timecode(text) => parse_timecode(&text).map_err(serde::de::Error::custom),
  }
}

impl TimeRange {
  pub fn new(start: f64, end: f64) -> Self {
    Self { start, end }
  }

  pub fn duration(&self) -> f64 {
    self.end - self.start
  }

  /// Checks the range against the media duration. An end past the duration is accepted
  /// here; use [`TimeRange::clamped_to`] before cutting.
  pub fn validate(&self, media_duration: f64) -> Result<()> {
    if !self.start.is_finite() || !self.end.is_finite() {
      return Err(Error::invalid("Range times must be numbers"));
    }
    if self.start < 0.0 {
      return Err(Error::invalid("Range start cannot be negative"));
    }
    if self.end <= self.start {
      return Err(Error::invalid(format!(
        "End time must be greater than start time ({} <= {})",
        format_duration(self.end),
        format_duration(self.start)
      )));
    }
    if self.start >= media_duration {
      return Err(Error::invalid(format!(
        "Range start {} is past the end of the video ({})",
        format_duration(self.start),
        format_duration(media_duration)
      )));
    }
    Ok(())
  }

  pub fn clamped_to(&self, media_duration: f64) -> Self {
    Self {
      start: self.start,
      end: self.end.min(media_duration),
    }
  }
}

/// Format seconds as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_duration(seconds: f64) -> String {
  let total = if seconds.is_finite() && seconds > 0.0 {
    seconds.floor() as u64
  } else {
    0
  };
  let hours = total / 3600;
  let minutes = (total % 3600) / 60;
  let secs = total % 60;
  format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// `HHhMMhSS`, safe inside file names on every platform.
pub fn time_for_filename(seconds: f64) -> String {
  format_duration(seconds).replace(':', "h")
}

// Digits with an optional fraction; no sign, exponent or bare dot.
fn is_plain_decimal(text: &str) -> bool {
  let digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
  match text.split_once('.') {
    Some((whole, fraction)) => digits(whole) && digits(fraction),
    None => digits(text),
  }
}

// Accepts SS, MM:SS or HH:MM:SS, each with optional fractional seconds.
pub fn parse_timecode(input: &str) -> Result<f64> {
  let input = input.trim();
  if input.is_empty() {
    return Err(Error::invalid("Time is empty"));
  }

  let parts: Vec<&str> = input.split(':').collect();
  if parts.len() > 3 {
    return Err(Error::invalid("Time must be in format hh:mm:ss, mm:ss or seconds"));
  }

  let (last, units) = parts.split_last().ok_or_else(|| Error::invalid("Time is empty"))?;
  if !is_plain_decimal(last) {
    return Err(Error::invalid(format!("Invalid seconds: {last}")));
  }
  let seconds: f64 = last
    .parse()
    .map_err(|_| Error::invalid(format!("Invalid seconds: {last}")))?;
  if !seconds.is_finite() {
    return Err(Error::invalid(format!("Invalid seconds: {last}")));
  }
  if !units.is_empty() && seconds >= 60.0 {
    return Err(Error::invalid("Seconds must be < 60"));
  }

  let mut total = seconds;
  for (i, unit) in units.iter().rev().enumerate() {
    if unit.is_empty() || !unit.chars().all(|c| c.is_ascii_digit()) {
      return Err(Error::invalid(format!("Invalid time component: {unit}")));
    }
    let value: u64 = unit
      .parse()
      .map_err(|_| Error::invalid(format!("Invalid time component: {unit}")))?;
    let is_minutes = i == 0;
    if is_minutes {
      if units.len() == 2 && value >= 60 {
        return Err(Error::invalid("Minutes must be < 60"));
      }
      total += value as f64 * 60.0;
    } else {
      total += value as f64 * 3600.0;
    }
  }

  Ok(total)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formats_durations() {
    assert_eq!(format_duration(0.0), "00:00:00");
    assert_eq!(format_duration(59.99), "00:00:59");
    assert_eq!(format_duration(3725.4), "01:02:05");
    assert_eq!(format_duration(90000.0), "25:00:00");
  }

  #[test]
  fn bogus_durations_render_as_zero() {
    assert_eq!(format_duration(-5.0), "00:00:00");
    assert_eq!(format_duration(f64::NAN), "00:00:00");
    assert_eq!(format_duration(f64::INFINITY), "00:00:00");
  }

  #[test]
  fn filename_time_has_no_colons() {
    assert_eq!(time_for_filename(3725.0), "01h02h05");
  }

  #[test]
  fn parses_timecodes() {
    assert_eq!(parse_timecode("42").unwrap(), 42.0);
    assert_eq!(parse_timecode("90.5").unwrap(), 90.5);
    assert_eq!(parse_timecode("01:30").unwrap(), 90.0);
    assert_eq!(parse_timecode("1:02:03.250").unwrap(), 3723.25);
    assert_eq!(parse_timecode(" 120:00 ").unwrap(), 7200.0);
  }

  #[test]
  fn rejects_malformed_timecodes() {
    assert!(parse_timecode("").is_err());
    assert!(parse_timecode("abc").is_err());
    assert!(parse_timecode("00:61").is_err());
    assert!(parse_timecode("01:60:00").is_err());
    assert!(parse_timecode("1:2:3:4").is_err());
    assert!(parse_timecode("-3").is_err());
    assert!(parse_timecode(":30").is_err());
  }

  #[test]
  fn seconds_must_be_plain_decimals() {
    for text in ["1e2", "+5", "00:00:1e1", "5.", ".5", "inf", "NaN", "1.2.3", "00:0x10"] {
      assert!(parse_timecode(text).is_err(), "{text} should be rejected");
    }
    assert_eq!(parse_timecode("00:00:07.125").unwrap(), 7.125);
  }

  #[test]
  fn ranges_accept_seconds_or_timecodes() {
    let ranges: Vec<TimeRange> =
      serde_json::from_str(r#"[{"start": 0, "end": 12.5}, {"start": "00:01:00", "end": "1:30"}]"#).unwrap();
    assert_eq!(ranges, vec![TimeRange::new(0.0, 12.5), TimeRange::new(60.0, 90.0)]);

    let bad = serde_json::from_str::<TimeRange>(r#"{"start": "1:75", "end": 5}"#);
    assert!(bad.is_err());
  }

  #[test]
  fn range_end_must_exceed_start() {
    let err = TimeRange::new(10.0, 10.0).validate(60.0).unwrap_err();
    assert!(err.to_string().contains("End time must be greater than start time"));
    assert!(TimeRange::new(20.0, 5.0).validate(60.0).is_err());
    assert!(TimeRange::new(5.0, 20.0).validate(60.0).is_ok());
  }

  #[test]
  fn range_start_must_be_inside_video() {
    assert!(TimeRange::new(-1.0, 5.0).validate(60.0).is_err());
    assert!(TimeRange::new(60.0, 70.0).validate(60.0).is_err());
    assert!(TimeRange::new(f64::NAN, 5.0).validate(60.0).is_err());
  }

  #[test]
  fn range_end_past_duration_is_clamped() {
    let range = TimeRange::new(50.0, 75.0);
    assert!(range.validate(60.0).is_ok());
    let clamped = range.clamped_to(60.0);
    assert_eq!(clamped, TimeRange::new(50.0, 60.0));
    assert_eq!(clamped.duration(), 10.0);
  }
}
