// 该文件是 Jishu （计数） 项目的一部分。
// src/schedule.rs - 检测时间表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
  #[error("无效的时间 {0:?}，应为 HH:MM")]
  InvalidTime(String),
}

#[derive(Debug, Clone, Deserialize)]
struct ScheduleFile {
  #[serde(default = "default_enabled")]
  enabled: bool,
  start_time: String,
  end_time: String,
  #[serde(default)]
  days_of_week: Vec<Weekday>,
}

fn default_enabled() -> bool {
  true
}

fn parse_time(text: &str) -> Result<NaiveTime, ScheduleError> {
  NaiveTime::parse_from_str(text, "%H:%M")
    .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
    .map_err(|_| ScheduleError::InvalidTime(text.to_string()))
}

/// 每周允许检测的时间段
///
/// `start > end` 表示跨越午夜，例如 22:00 到 02:00。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ScheduleFile")]
pub struct ScheduleWindow {
  pub enabled: bool,
  pub start: NaiveTime,
  pub end: NaiveTime,
  pub days: Vec<Weekday>,
}

impl TryFrom<ScheduleFile> for ScheduleWindow {
  type Error = ScheduleError;

  fn try_from(raw: ScheduleFile) -> Result<Self, Self::Error> {
    Ok(Self {
      enabled: raw.enabled,
      start: parse_time(&raw.start_time)?,
      end: parse_time(&raw.end_time)?,
      days: raw.days_of_week,
    })
  }
}

impl ScheduleWindow {
  pub fn new(start: NaiveTime, end: NaiveTime, days: impl IntoIterator<Item = Weekday>) -> Self {
    Self {
      enabled: true,
      start,
      end,
      days: days.into_iter().collect(),
    }
  }

  pub fn is_active_at(&self, at: NaiveDateTime) -> bool {
    if !self.enabled || !self.days.contains(&at.weekday()) {
      return false;
    }
    let t = at.time();
    if self.start <= self.end {
      self.start <= t && t <= self.end
    } else {
      t >= self.start || t <= self.end
    }
  }
}

/// 没有时间表或时间表被禁用时全天允许
pub fn detection_allowed(schedule: Option<&ScheduleWindow>, at: NaiveDateTime) -> bool {
  match schedule {
    Some(window) if window.enabled => window.is_active_at(at),
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;

  fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    // 2026-10-12 是周一
    NaiveDate::from_ymd_opt(2026, 10, day)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
  }

  #[test]
  fn daytime_window_is_inclusive() {
    let window = ScheduleWindow::new(hm(9, 0), hm(17, 0), [Weekday::Mon]);
    assert!(window.is_active_at(at(12, 9, 0)));
    assert!(window.is_active_at(at(12, 17, 0)));
    assert!(!window.is_active_at(at(12, 17, 1)));
    assert!(!window.is_active_at(at(13, 12, 0)));
  }

  #[test]
  fn overnight_window_wraps() {
    let window = ScheduleWindow::new(hm(22, 0), hm(2, 0), [Weekday::Mon, Weekday::Tue]);
    assert!(window.is_active_at(at(12, 23, 30)));
    assert!(window.is_active_at(at(13, 1, 0)));
    assert!(!window.is_active_at(at(13, 12, 0)));
  }

  #[test]
  fn disabled_schedule_allows_everything() {
    let mut window = ScheduleWindow::new(hm(9, 0), hm(10, 0), [Weekday::Mon]);
    window.enabled = false;
    assert!(!window.is_active_at(at(12, 9, 30)));
    assert!(detection_allowed(Some(&window), at(14, 3, 0)));
    assert!(detection_allowed(None, at(14, 3, 0)));
  }

  #[test]
  fn parses_config_shape() {
    let window: ScheduleWindow = serde_json::from_str(
      r#"{"start_time":"08:30","end_time":"20:00","days_of_week":["Mon","Fri"]}"#,
    )
    .unwrap();
    assert!(window.enabled);
    assert_eq!(window.start, hm(8, 30));
    assert_eq!(window.days, vec![Weekday::Mon, Weekday::Fri]);

    assert!(
      serde_json::from_str::<ScheduleWindow>(r#"{"start_time":"8h","end_time":"20:00"}"#).is_err()
    );
  }
}
