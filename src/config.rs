// 该文件是 Jishu （计数） 项目的一部分。
// src/config.rs - 运行参数
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

//! # 运行参数
//!
//! 所有字段均有默认值，配置文件只需写出需要覆盖的部分：
//!
//! ```json
//! {
//!   "matcher": { "min_sim_by_label": { "Tea": 0.28 } },
//!   "tracking": { "object_ttl_frames": 90 },
//!   "schedule": { "start_time": "08:00", "end_time": "22:00", "days_of_week": ["Mon", "Tue"] }
//! }
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{matcher::MatcherConfig, schedule::ScheduleWindow};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析配置文件失败: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("无效的配置项 {field}: {reason}")]
  InvalidValue { field: &'static str, reason: String },
}

/// 节流时允许的最低帧率
const MIN_TARGET_FPS: f32 = 0.01;

/// 轨迹锁定与身份关联
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
  /// 锁定所需的连续相同标签数
  pub lock_consecutive_frames: usize,
  pub history_len: usize,
  /// 重新关联已有身份的最小 IoU
  pub iou_assoc_threshold: f32,
  /// 身份在多少帧未出现后被移除
  pub object_ttl_frames: u64,
}

impl Default for TrackingConfig {
  fn default() -> Self {
    Self {
      lock_consecutive_frames: 2,
      history_len: 3,
      iou_assoc_threshold: 0.45,
      object_ttl_frames: 60,
    }
  }
}

/// 处理循环节奏
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
  pub target_fps: f32,
  pub display_width: u32,
  pub confidence_floor: f32,
  /// 每轮最多丢弃的积压帧数
  pub drain_frames: usize,
  pub schedule_check_secs: u64,
  pub error_backoff_ms: u64,
  /// 每次重连后的等待
  pub reconnect_backoff_ms: u64,
  pub idle_sleep_ms: u64,
}

impl Default for CycleConfig {
  fn default() -> Self {
    Self {
      target_fps: 10.0,
      display_width: 1280,
      confidence_floor: 0.25,
      drain_frames: 3,
      schedule_check_secs: 60,
      error_backoff_ms: 100,
      reconnect_backoff_ms: 200,
      idle_sleep_ms: 100,
    }
  }
}

impl CycleConfig {
  pub fn frame_interval(&self) -> Duration {
    if self.target_fps > 0.0 {
      Duration::try_from_secs_f64(1.0 / self.target_fps as f64).unwrap_or(Duration::MAX)
    } else {
      Duration::ZERO
    }
  }

  pub fn schedule_interval(&self) -> Duration {
    Duration::from_secs(self.schedule_check_secs)
  }

  pub fn error_backoff(&self) -> Duration {
    Duration::from_millis(self.error_backoff_ms)
  }

  pub fn reconnect_backoff(&self) -> Duration {
    Duration::from_millis(self.reconnect_backoff_ms)
  }

  pub fn idle_sleep(&self) -> Duration {
    Duration::from_millis(self.idle_sleep_ms)
  }
}

/// 采集端参数，每次（重新）连接后重新应用
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
  pub buffer_size: u32,
  pub fps: u32,
  pub width: u32,
  pub height: u32,
  pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      buffer_size: 1,
      fps: 15,
      width: 1280,
      height: 720,
      read_timeout_ms: 5000,
    }
  }
}

impl CaptureConfig {
  pub fn read_timeout(&self) -> Duration {
    Duration::from_millis(self.read_timeout_ms)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub matcher: MatcherConfig,
  pub tracking: TrackingConfig,
  pub cycle: CycleConfig,
  pub capture: CaptureConfig,
  pub schedule: Option<ScheduleWindow>,
}

impl EngineConfig {
  /// 从 JSON 文件读取；没有给出路径时使用默认值
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let Some(path) = path else {
      return Ok(Self::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.tracking.lock_consecutive_frames == 0 {
      return Err(ConfigError::InvalidValue {
        field: "tracking.lock_consecutive_frames",
        reason: "至少为 1".into(),
      });
    }
    if self.tracking.history_len < self.tracking.lock_consecutive_frames {
      return Err(ConfigError::InvalidValue {
        field: "tracking.history_len",
        reason: format!(
          "不能小于 lock_consecutive_frames ({})",
          self.tracking.lock_consecutive_frames
        ),
      });
    }
    if !(0.0..=1.0).contains(&self.tracking.iou_assoc_threshold) {
      return Err(ConfigError::InvalidValue {
        field: "tracking.iou_assoc_threshold",
        reason: format!("{} 不在 [0, 1] 内", self.tracking.iou_assoc_threshold),
      });
    }
    let fps = self.cycle.target_fps;
    if !fps.is_finite() || fps < 0.0 || (fps > 0.0 && fps < MIN_TARGET_FPS) {
      return Err(ConfigError::InvalidValue {
        field: "cycle.target_fps",
        reason: format!("{} 应为 0（不节流）或不小于 {}", fps, MIN_TARGET_FPS),
      });
    }
    if self.cycle.display_width == 0 {
      return Err(ConfigError::InvalidValue {
        field: "cycle.display_width",
        reason: "不能为 0".into(),
      });
    }
    Ok(())
  }
}
