// 该文件是 Jishu （计数） 项目的一部分。
// src/track.rs - 短时轨迹的标签锁定状态
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

use std::collections::VecDeque;

use crate::matcher::Label;

/// 上游跟踪器分配的短时轨迹编号
pub type TrackId = i64;

/// 轨迹的锁定阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPhase {
  #[default]
  Unlocked,
  Locked,
}

/// 定长的最近标签队列
#[derive(Debug, Clone)]
pub struct LabelHistory {
  labels: VecDeque<Label>,
  capacity: usize,
}

impl LabelHistory {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      labels: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, label: Label) {
    if self.labels.len() == self.capacity {
      self.labels.pop_front();
    }
    self.labels.push_back(label);
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn latest(&self) -> Option<&Label> {
    self.labels.back()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Label> {
    self.labels.iter()
  }

  /// 最近 `n` 条是否是同一个已知标签；是则返回该标签
  pub fn stable_label(&self, n: usize) -> Option<&str> {
    let n = n.max(1);
    if self.labels.len() < n {
      return None;
    }
    let latest = self.labels.back()?.as_known()?;
    self
      .labels
      .iter()
      .rev()
      .take(n)
      .all(|l| l.as_known() == Some(latest))
      .then_some(latest)
  }
}

/// 单条短时轨迹的状态，首次出现时惰性创建
#[derive(Debug, Clone)]
pub struct TrackState {
  pub phase: LockPhase,
  pub label: Label,
  pub similarity: f32,
  pub history: LabelHistory,
  pub box_scale: Option<f32>,
}

impl TrackState {
  pub fn new(history_len: usize) -> Self {
    Self {
      phase: LockPhase::Unlocked,
      label: Label::Unknown,
      similarity: 0.0,
      history: LabelHistory::new(history_len),
      box_scale: None,
    }
  }

  pub fn is_locked(&self) -> bool {
    self.phase == LockPhase::Locked
  }

  /// 记录一次观测，返回是否满足锁定条件（已锁定的轨迹总是返回 None）
  pub fn observe(
    &mut self,
    label: Label,
    box_scale: Option<f32>,
    lock_frames: usize,
  ) -> Option<String> {
    self.history.push(label);
    self.box_scale = box_scale;
    if self.is_locked() {
      return None;
    }
    self.history.stable_label(lock_frames).map(str::to_string)
  }

  pub fn lock(&mut self, label: &str, similarity: f32) {
    self.phase = LockPhase::Locked;
    self.label = Label::known(label);
    self.similarity = similarity;
  }

  /// 关联的身份已失效，需要重新锁定
  pub fn unlock(&mut self) {
    self.phase = LockPhase::Unlocked;
  }
}
