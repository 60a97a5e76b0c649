// 该文件是 Jishu （计数） 项目的一部分。
// src/detect.rs - 上游检测器与跟踪器接口
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

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{geometry::BBox, track::TrackId};

mod iou_tracker;
mod replay;

pub use self::iou_tracker::IouTracker;
pub use self::replay::{ReplayDetector, ReplayError};

/// 单帧检测结果，坐标为显示帧坐标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BBox,
  pub confidence: f32,
  #[serde(default)]
  pub class_id: Option<i64>,
  #[serde(default)]
  pub class_name: Option<String>,
}

impl Detection {
  pub fn new(bbox: BBox, confidence: f32) -> Self {
    Self {
      bbox,
      confidence,
      class_id: None,
      class_name: None,
    }
  }

  pub fn with_class(mut self, class_id: i64, class_name: impl Into<String>) -> Self {
    self.class_id = Some(class_id);
    self.class_name = Some(class_name.into());
    self
  }
}

/// 经过跟踪器关联后的检测
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDetection {
  pub track_id: TrackId,
  pub detection: Detection,
}

impl TrackedDetection {
  pub fn new(track_id: TrackId, detection: Detection) -> Self {
    Self {
      track_id,
      detection,
    }
  }

  pub fn bbox(&self) -> BBox {
    self.detection.bbox
  }
}

/// 逐帧目标检测
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&mut self, frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>, Self::Error>;
}

/// 为检测分配短时轨迹编号
pub trait Tracker {
  fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection>;

  /// 丢弃所有轨迹（重连后调用）
  fn reset(&mut self);
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  type Error = D::Error;

  fn detect(&mut self, frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>, Self::Error> {
    (**self).detect(frame, frame_index)
  }
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
  fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection> {
    (**self).update(detections)
  }

  fn reset(&mut self) {
    (**self).reset()
  }
}

/// 丢弃置信度低于下限的检测，须在交给跟踪器前调用
pub fn filter_confidence(detections: Vec<Detection>, floor: f32) -> Vec<Detection> {
  detections
    .into_iter()
    .filter(|d| d.confidence >= floor)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn low_confidence_is_dropped() {
    let detections = vec![
      Detection::new(BBox::new(0.0, 0.0, 1.0, 1.0), 0.9),
      Detection::new(BBox::new(0.0, 0.0, 1.0, 1.0), 0.1),
      Detection::new(BBox::new(0.0, 0.0, 1.0, 1.0), 0.25),
    ];
    let kept = filter_confidence(detections, 0.25);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|d| d.confidence >= 0.25));
  }

  #[test]
  fn detection_json_shape() {
    let d: Detection = serde_json::from_str(
      r#"{"bbox":[1,2,3,4],"confidence":0.5,"class_id":41,"class_name":"cup"}"#,
    )
    .unwrap();
    assert_eq!(d.bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
    assert_eq!(d.class_name.as_deref(), Some("cup"));

    let bare: Detection = serde_json::from_str(r#"{"bbox":[0,0,1,1],"confidence":1.0}"#).unwrap();
    assert_eq!(bare.class_id, None);
  }
}
