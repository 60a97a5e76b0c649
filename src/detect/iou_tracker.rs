// 该文件是 Jishu （计数） 项目的一部分。
// src/detect/iou_tracker.rs - 贪心 IoU 跟踪器
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

use tracing::debug;

use super::{Detection, TrackedDetection, Tracker};
use crate::{geometry::BBox, track::TrackId};

#[derive(Debug, Clone)]
struct ActiveTrack {
  id: TrackId,
  bbox: BBox,
  lost: u32,
}

/// 按 IoU 从大到小贪心匹配上一帧的轨迹
///
/// 未匹配的轨迹最多保留 `max_lost` 帧，编号单调递增。
#[derive(Debug, Clone)]
pub struct IouTracker {
  tracks: Vec<ActiveTrack>,
  next_id: TrackId,
  min_iou: f32,
  max_lost: u32,
}

impl Default for IouTracker {
  fn default() -> Self {
    Self::new(0.3, 30)
  }
}

impl IouTracker {
  pub fn new(min_iou: f32, max_lost: u32) -> Self {
    Self {
      tracks: Vec::new(),
      next_id: 1,
      min_iou,
      max_lost,
    }
  }

  pub fn active_tracks(&self) -> usize {
    self.tracks.len()
  }
}

impl Tracker for IouTracker {
  fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection> {
    let mut pairs = Vec::new();
    for (ti, track) in self.tracks.iter().enumerate() {
      for (di, det) in detections.iter().enumerate() {
        let iou = track.bbox.iou(&det.bbox);
        if iou >= self.min_iou {
          pairs.push((iou, ti, di));
        }
      }
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut track_used = vec![false; self.tracks.len()];
    let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
    for (_, ti, di) in pairs {
      if track_used[ti] || assigned[di].is_some() {
        continue;
      }
      track_used[ti] = true;
      assigned[di] = Some(self.tracks[ti].id);
      self.tracks[ti].bbox = detections[di].bbox;
      self.tracks[ti].lost = 0;
    }

    for (track, used) in self.tracks.iter_mut().zip(&track_used) {
      if !used {
        track.lost += 1;
      }
    }
    let max_lost = self.max_lost;
    self.tracks.retain(|t| t.lost <= max_lost);

    let mut output = Vec::with_capacity(detections.len());
    for (det, id) in detections.into_iter().zip(assigned) {
      let id = match id {
        Some(id) => id,
        None => {
          let id = self.next_id;
          self.next_id += 1;
          self.tracks.push(ActiveTrack {
            id,
            bbox: det.bbox,
            lost: 0,
          });
          debug!("新轨迹 {}", id);
          id
        }
      };
      output.push(TrackedDetection::new(id, det));
    }
    output
  }

  fn reset(&mut self) {
    self.tracks.clear();
  }
}
