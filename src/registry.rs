// 该文件是 Jishu （计数） 项目的一部分。
// src/registry.rs - 物体身份登记
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

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::{geometry::BBox, ledger::CountLedger, track::TrackId};

/// 物体身份编号，单调分配，永不复用
pub type IdentityId = u64;

/// 长期存在的物体身份；标签在创建后不再改变
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectIdentity {
  pub id: IdentityId,
  pub label: String,
  pub last_bbox: BBox,
  pub last_seen: u64,
  pub similarity_at_lock: f32,
  pub box_scale: Option<f32>,
}

/// 新身份事件，交给外部保存截图等产物
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIdentityEvent {
  pub identity_id: IdentityId,
  pub label: String,
  pub similarity: f32,
  pub bbox: BBox,
  pub frame_index: u64,
  /// 是否计入了计数表（标签不在计数表中时为 false）
  pub counted: bool,
}

/// 锁定时的关联结果
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
  Reused(IdentityId),
  Created(NewIdentityEvent),
}

impl Association {
  pub fn identity_id(&self) -> IdentityId {
    match self {
      Association::Reused(id) => *id,
      Association::Created(event) => event.identity_id,
    }
  }
}

/// 锁定时需要的观测数据
#[derive(Debug, Clone, Copy)]
pub struct LockObservation<'a> {
  pub track_id: TrackId,
  pub label: &'a str,
  pub bbox: BBox,
  pub box_scale: Option<f32>,
  pub similarity: f32,
  pub frame_index: u64,
}

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
  identities: BTreeMap<IdentityId, ObjectIdentity>,
  track_to_identity: HashMap<TrackId, IdentityId>,
  next_id: IdentityId,
  iou_threshold: f32,
  ttl_frames: u64,
}

impl IdentityRegistry {
  pub fn new(iou_threshold: f32, ttl_frames: u64) -> Self {
    Self {
      identities: BTreeMap::new(),
      track_to_identity: HashMap::new(),
      next_id: 1,
      iou_threshold,
      ttl_frames,
    }
  }

  /// 轨迹锁定时，关联到同标签中重叠最大的已有身份，或新建身份并计数
  pub fn on_lock(&mut self, ledger: &mut CountLedger, obs: LockObservation<'_>) -> Association {
    let best = self
      .identities
      .values()
      .filter(|identity| identity.label == obs.label)
      .map(|identity| (identity.id, obs.bbox.iou(&identity.last_bbox)))
      .fold(None::<(IdentityId, f32)>, |acc, (id, iou)| match acc {
        Some((_, best_iou)) if iou <= best_iou => acc,
        _ => Some((id, iou)),
      });

    if let Some((id, iou)) = best.filter(|(_, iou)| *iou >= self.iou_threshold)
      && let Some(identity) = self.identities.get_mut(&id)
    {
      identity.last_bbox = obs.bbox;
      identity.last_seen = obs.frame_index;
      identity.similarity_at_lock = obs.similarity;
      if obs.box_scale.is_some() {
        identity.box_scale = obs.box_scale;
      }
      self.track_to_identity.insert(obs.track_id, id);
      debug!(
        "轨迹 {} 关联到已有身份 #{} ({}, IoU {:.2})",
        obs.track_id, id, obs.label, iou
      );
      return Association::Reused(id);
    }

    let id = self.next_id;
    self.next_id += 1;
    self.identities.insert(
      id,
      ObjectIdentity {
        id,
        label: obs.label.to_string(),
        last_bbox: obs.bbox,
        last_seen: obs.frame_index,
        similarity_at_lock: obs.similarity,
        box_scale: obs.box_scale,
      },
    );
    self.track_to_identity.insert(obs.track_id, id);

    let counted = match ledger.increment(obs.label) {
      Some(count) => {
        info!(
          "计数增加: {} -> {} (身份 #{}, 相似度 {:.2}, 面积占比 {:.4})",
          obs.label,
          count,
          id,
          obs.similarity,
          obs.box_scale.unwrap_or(0.0)
        );
        true
      }
      None => false,
    };

    Association::Created(NewIdentityEvent {
      identity_id: id,
      label: obs.label.to_string(),
      similarity: obs.similarity,
      bbox: obs.bbox,
      frame_index: obs.frame_index,
      counted,
    })
  }

  /// 轨迹当前有效关联的身份
  pub fn identity_for_track(&self, track_id: TrackId) -> Option<&ObjectIdentity> {
    self
      .track_to_identity
      .get(&track_id)
      .and_then(|id| self.identities.get(id))
  }

  /// 更新已锁定轨迹关联身份的几何信息；关联已失效时返回 false
  pub fn refresh(
    &mut self,
    track_id: TrackId,
    bbox: BBox,
    box_scale: Option<f32>,
    frame_index: u64,
  ) -> bool {
    let Some(identity) = self
      .track_to_identity
      .get(&track_id)
      .and_then(|id| self.identities.get_mut(id))
    else {
      self.track_to_identity.remove(&track_id);
      return false;
    };
    identity.last_bbox = bbox;
    identity.last_seen = frame_index;
    if box_scale.is_some() {
      identity.box_scale = box_scale;
    }
    true
  }

  /// 只记录面积占比，不视为一次“看见”
  pub fn note_box_scale(&mut self, track_id: TrackId, box_scale: Option<f32>) {
    if let Some(identity) = self
      .track_to_identity
      .get(&track_id)
      .and_then(|id| self.identities.get_mut(id))
    {
      identity.box_scale = box_scale;
    }
  }

  /// 移除超过存活窗口未出现的身份，并清除指向它们的轨迹关联
  pub fn evict_stale(&mut self, frame_index: u64) -> Vec<IdentityId> {
    let ttl = self.ttl_frames;
    let stale: HashSet<IdentityId> = self
      .identities
      .values()
      .filter(|identity| frame_index.saturating_sub(identity.last_seen) > ttl)
      .map(|identity| identity.id)
      .collect();
    if stale.is_empty() {
      return Vec::new();
    }

    self.identities.retain(|id, _| !stale.contains(id));
    self
      .track_to_identity
      .retain(|_, id| !stale.contains(id));

    let mut evicted: Vec<_> = stale.into_iter().collect();
    evicted.sort_unstable();
    debug!("移除过期身份: {:?}", evicted);
    evicted
  }

  /// 丢弃不再出现的轨迹的关联
  pub fn retain_tracks(&mut self, mut keep: impl FnMut(TrackId) -> bool) {
    self.track_to_identity.retain(|track_id, _| keep(*track_id));
  }

  /// 清空所有身份与关联；编号计数器不回退
  pub fn clear(&mut self) {
    self.identities.clear();
    self.track_to_identity.clear();
  }

  pub fn get(&self, id: IdentityId) -> Option<&ObjectIdentity> {
    self.identities.get(&id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ObjectIdentity> {
    self.identities.values()
  }

  pub fn len(&self) -> usize {
    self.identities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.identities.is_empty()
  }

  pub fn mapped_tracks(&self) -> usize {
    self.track_to_identity.len()
  }
}
