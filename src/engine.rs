// 该文件是 Jishu （计数） 项目的一部分。
// src/engine.rs - 身份与计数引擎
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

//! # 身份与计数引擎
//!
//! 每个处理周期调用一次 [`Engine::observe`]：
//!
//! 1. 移除超过存活窗口未出现的身份；
//! 2. 对每条跟踪到的检测，已关联身份的轨迹直接沿用身份标签，
//!    否则提取特征并与原型库匹配；
//! 3. 最近若干帧标签一致且已知时锁定，锁定时关联到已有身份或新建身份并计数；
//! 4. 已锁定的轨迹更新其身份的位置，身份失效时解除锁定。
//!
//! 特征提取在锁外完成，之后的锁定与计数持有计数表的写锁，
//! 读取方只会看到完整处理后的计数。

use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  catalog::Catalog,
  config::TrackingConfig,
  detect::TrackedDetection,
  embedding::Embedder,
  geometry::BBox,
  ledger::{CountSnapshot, SharedLedger},
  matcher::{Label, MatcherConfig, SimilarityMatcher},
  prototype::PrototypeStore,
  registry::{Association, IdentityId, IdentityRegistry, LockObservation, NewIdentityEvent},
  track::{TrackId, TrackState},
};

/// 标注样式：已计数的身份为绿色，其余为品红色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationStyle {
  Counted,
  Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub track_id: TrackId,
  pub identity_id: Option<IdentityId>,
  pub bbox: BBox,
  pub style: AnnotationStyle,
  pub text: String,
}

/// 一个处理周期的结果
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
  pub frame_index: u64,
  pub annotations: Vec<Annotation>,
  pub new_identities: Vec<NewIdentityEvent>,
  pub counts: CountSnapshot,
}

/// 锁外阶段对单条检测的结果；已关联身份的轨迹不做匹配
struct Sighting {
  box_scale: Option<f32>,
  matched: Option<(Label, f32)>,
}

pub struct Engine<E> {
  embedder: E,
  store: PrototypeStore,
  matcher: SimilarityMatcher,
  tracks: HashMap<TrackId, TrackState>,
  registry: IdentityRegistry,
  ledger: SharedLedger,
  tracking: TrackingConfig,
  frame_index: u64,
}

impl<E: Embedder> Engine<E> {
  pub fn new(
    embedder: E,
    matcher: MatcherConfig,
    tracking: TrackingConfig,
    ledger: SharedLedger,
  ) -> Self {
    let registry = IdentityRegistry::new(tracking.iou_assoc_threshold, tracking.object_ttl_frames);
    Self {
      embedder,
      store: PrototypeStore::new(),
      matcher: SimilarityMatcher::new(matcher),
      tracks: HashMap::new(),
      registry,
      ledger,
      tracking,
      frame_index: 0,
    }
  }

  /// 按目录重建原型库，计数表品类随之重置并全部归零
  pub fn rebuild_catalog(&mut self, catalog: &Catalog) {
    let store = PrototypeStore::rebuild(catalog, &self.embedder);
    if store.len() < catalog.len() {
      info!(
        "原型库已重建: {} / {} 个品类可用",
        store.len(),
        catalog.len()
      );
    } else {
      info!("原型库已重建: {} 个品类", store.len());
    }
    self.install_prototypes(store, catalog.names());
  }

  /// 直接替换原型库；计数表以 `categories` 重置
  pub fn install_prototypes<I, S>(&mut self, store: PrototypeStore, categories: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.store = store;
    self.ledger.write().reset(categories);
  }

  /// 处理一帧已跟踪的检测
  pub fn observe(&mut self, frame: &RgbImage, detections: &[TrackedDetection]) -> FrameOutcome {
    let frame_index = self.frame_index;
    self.registry.evict_stale(frame_index);

    // 特征提取与匹配不持有计数表的锁
    let sightings: Vec<Option<Sighting>> = detections
      .iter()
      .map(|tracked| {
        let bbox = tracked.bbox();
        let crop = bbox.crop(frame)?;
        let box_scale = bbox.scale_in(frame.width(), frame.height());
        let matched = match self.registry.identity_for_track(tracked.track_id) {
          Some(_) => None,
          None => {
            let embedding = self.embedder.embed(&crop);
            let matched = self
              .matcher
              .match_embedding(&embedding, &self.store, box_scale);
            Some((matched.label, matched.similarity))
          }
        };
        Some(Sighting { box_scale, matched })
      })
      .collect();

    let shared = Arc::clone(&self.ledger);
    let mut ledger = shared.write();

    let lock_frames = self.tracking.lock_consecutive_frames;
    let history_len = self.tracking.history_len;
    let mut outcome = FrameOutcome {
      frame_index,
      ..Default::default()
    };
    let mut seen = HashSet::with_capacity(detections.len());

    for (tracked, sighting) in detections.iter().zip(sightings) {
      let track_id = tracked.track_id;
      let bbox = tracked.bbox();
      seen.insert(track_id);

      let Some(Sighting { box_scale, matched }) = sighting else {
        continue;
      };
      let state = self
        .tracks
        .entry(track_id)
        .or_insert_with(|| TrackState::new(history_len));

      let associated = self
        .registry
        .identity_for_track(track_id)
        .map(|identity| Label::known(identity.label.as_str()));
      let (label, similarity) = match (associated, matched) {
        (Some(label), _) => {
          self.registry.note_box_scale(track_id, box_scale);
          (label, state.similarity)
        }
        (None, Some(matched)) => matched,
        // 两个阶段之间关联不会变化
        (None, None) => continue,
      };

      if let Some(stable) = state.observe(label.clone(), box_scale, lock_frames) {
        let association = self.registry.on_lock(
          &mut ledger,
          LockObservation {
            track_id,
            label: &stable,
            bbox,
            box_scale,
            similarity,
            frame_index,
          },
        );
        if let Association::Created(event) = association {
          outcome.new_identities.push(event);
        }
        state.lock(&stable, similarity);
      } else if !state.is_locked() {
        state.label = label;
        state.similarity = similarity;
      } else if !self.registry.refresh(track_id, bbox, box_scale, frame_index) {
        debug!("轨迹 {} 关联的身份已失效，等待重新锁定", track_id);
        state.unlock();
      }

      let counted = state
        .is_locked()
        .then(|| self.registry.identity_for_track(track_id))
        .flatten()
        .filter(|identity| ledger.contains(&identity.label));
      let annotation = match counted {
        Some(identity) => Annotation {
          track_id,
          identity_id: Some(identity.id),
          bbox: identity.last_bbox,
          style: AnnotationStyle::Counted,
          text: format!(
            "{} #{} {:.2}",
            identity.label, identity.id, identity.similarity_at_lock
          ),
        },
        None => Annotation {
          track_id,
          identity_id: None,
          bbox,
          style: AnnotationStyle::Pending,
          text: format!(
            "{} {:.2}",
            tracked.detection.class_name.as_deref().unwrap_or("UNKNOWN"),
            similarity
          ),
        },
      };
      outcome.annotations.push(annotation);
    }

    // 不再出现的轨迹
    self.tracks.retain(|id, _| seen.contains(id));
    self.registry.retain_tracks(|id| seen.contains(&id));

    outcome.counts = ledger.snapshot();
    drop(ledger);
    self.frame_index += 1;
    outcome
  }

  /// 清空轨迹、身份与关联，计数保留
  pub fn reset_transient(&mut self) {
    self.tracks.clear();
    self.registry.clear();
  }

  /// 清空短时状态并将计数归零，品类保留
  pub fn reset_counts(&mut self) {
    self.reset_transient();
    self.ledger.write().zero();
  }

  pub fn frame_index(&self) -> u64 {
    self.frame_index
  }

  pub fn track_state(&self, track_id: TrackId) -> Option<&TrackState> {
    self.tracks.get(&track_id)
  }

  pub fn registry(&self) -> &IdentityRegistry {
    &self.registry
  }

  pub fn prototypes(&self) -> &PrototypeStore {
    &self.store
  }

  pub fn ledger(&self) -> &SharedLedger {
    &self.ledger
  }

  pub fn counts(&self) -> CountSnapshot {
    self.ledger.read().snapshot()
  }
}
