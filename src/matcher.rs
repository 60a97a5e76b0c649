// 该文件是 Jishu （计数） 项目的一部分。
// src/matcher.rs - 相似度匹配
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

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{embedding::Embedding, prototype::PrototypeStore};

/// 匹配结果标签
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Label {
  #[default]
  Unknown,
  Known(String),
}

impl Label {
  pub fn known(name: impl Into<String>) -> Self {
    Label::Known(name.into())
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Label::Unknown)
  }

  pub fn as_known(&self) -> Option<&str> {
    match self {
      Label::Known(name) => Some(name),
      Label::Unknown => None,
    }
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Label::Unknown => write!(f, "UNKNOWN"),
      Label::Known(name) => write!(f, "{}", name),
    }
  }
}

/// 小目标阈值下调参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeScaling {
  /// 低于该面积占比时开始下调阈值
  pub min_box_scale: f32,
  /// 最大下调幅度
  pub reduction_cap: f32,
  /// 下调后的下限
  pub floor: f32,
}

impl Default for SizeScaling {
  fn default() -> Self {
    Self {
      min_box_scale: 0.05,
      reduction_cap: 0.1,
      floor: 0.25,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
  /// 全局默认相似度阈值
  pub sim_threshold: f32,
  /// 最佳与次佳之间的最小差值
  pub sim_margin: f32,
  /// 按品类覆盖的阈值
  pub min_sim_by_label: HashMap<String, f32>,
  pub size_scaling: HashMap<String, SizeScaling>,
}

impl Default for MatcherConfig {
  fn default() -> Self {
    Self {
      sim_threshold: 0.28,
      sim_margin: 0.04,
      min_sim_by_label: HashMap::new(),
      size_scaling: HashMap::new(),
    }
  }
}

impl MatcherConfig {
  pub fn base_threshold(&self, label: &str) -> f32 {
    self
      .min_sim_by_label
      .get(label)
      .copied()
      .unwrap_or(self.sim_threshold)
  }

  /// 按检测框面积占比调整阈值
  ///
  /// 占比低于品类的 `min_box_scale` 时线性下调，最多下调 `reduction_cap`，
  /// 且不低于 `min(base, floor)`。没有该品类的配置或没有占比时返回 `base`。
  pub fn scale_similarity_threshold(&self, label: &str, base: f32, box_scale: Option<f32>) -> f32 {
    let (Some(box_scale), Some(scaling)) = (box_scale, self.size_scaling.get(label)) else {
      return base;
    };
    if box_scale >= scaling.min_box_scale {
      return base;
    }
    let denom = scaling.min_box_scale.max(1e-6);
    let factor = ((scaling.min_box_scale - box_scale) / denom).min(1.0);
    let adjusted = base - scaling.reduction_cap * factor;
    adjusted.max(base.min(scaling.floor))
  }
}

/// 一次匹配的结果；判为未知时相似度和差值仍然保留用于诊断
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
  pub label: Label,
  pub similarity: f32,
  pub margin: f32,
}

impl MatchOutcome {
  pub fn unknown() -> Self {
    Self {
      label: Label::Unknown,
      similarity: 0.0,
      margin: 0.0,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityMatcher {
  config: MatcherConfig,
}

impl SimilarityMatcher {
  pub fn new(config: MatcherConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &MatcherConfig {
    &self.config
  }

  /// 与原型库中每条原型比较，取最佳品类并做阈值和差值检验
  pub fn match_embedding(
    &self,
    embedding: &Embedding,
    store: &PrototypeStore,
    box_scale: Option<f32>,
  ) -> MatchOutcome {
    let mut best: Option<(&str, f32)> = None;
    let mut second = f32::NEG_INFINITY;

    for (name, prototype) in store.iter() {
      let sim = embedding.cosine(prototype);
      match best {
        Some((_, best_sim)) if sim <= best_sim => second = second.max(sim),
        _ => {
          if let Some((_, best_sim)) = best {
            second = best_sim;
          }
          best = Some((name, sim));
        }
      }
    }

    let Some((name, similarity)) = best else {
      return MatchOutcome::unknown();
    };

    let margin = similarity - second.max(0.0);
    let base = self.config.base_threshold(name);
    let threshold = self.config.scale_similarity_threshold(name, base, box_scale);

    let label = if similarity >= threshold && margin >= self.config.sim_margin {
      Label::known(name)
    } else {
      Label::Unknown
    };

    MatchOutcome {
      label,
      similarity,
      margin,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tea_scaling() -> MatcherConfig {
    let mut config = MatcherConfig::default();
    config.min_sim_by_label.insert("Tea".into(), 0.28);
    config.size_scaling.insert(
      "Tea".into(),
      SizeScaling {
        min_box_scale: 0.02,
        reduction_cap: 0.25,
        floor: 0.14,
      },
    );
    config
  }

  #[test]
  fn threshold_unchanged_for_large_boxes() {
    let config = tea_scaling();
    assert_eq!(config.scale_similarity_threshold("Tea", 0.28, Some(0.05)), 0.28);
    assert_eq!(config.scale_similarity_threshold("Tea", 0.28, None), 0.28);
    assert_eq!(config.scale_similarity_threshold("Coffee", 0.28, Some(0.001)), 0.28);
  }

  #[test]
  fn threshold_non_increasing_and_floored() {
    let config = tea_scaling();
    let mut previous = f32::INFINITY;
    for step in 0..=40 {
      let scale = 0.03 - step as f32 * 0.001;
      let t = config.scale_similarity_threshold("Tea", 0.28, Some(scale.max(0.0)));
      assert!(t <= previous + 1e-7, "scale {} gave {} after {}", scale, t, previous);
      assert!(t >= 0.14 - 1e-7);
      previous = t;
    }
    assert!((config.scale_similarity_threshold("Tea", 0.28, Some(0.0)) - 0.14).abs() < 1e-6);
  }

  #[test]
  fn floor_above_base_never_raises_threshold() {
    let mut config = MatcherConfig::default();
    config.size_scaling.insert(
      "Bottle".into(),
      SizeScaling {
        min_box_scale: 0.03,
        reduction_cap: 0.08,
        floor: 0.40,
      },
    );
    assert!((config.scale_similarity_threshold("Bottle", 0.34, Some(0.0)) - 0.34).abs() < 1e-6);
  }

  #[test]
  fn empty_store_is_unknown() {
    let matcher = SimilarityMatcher::default();
    let outcome = matcher.match_embedding(
      &Embedding::from(vec![1.0, 0.0]),
      &PrototypeStore::new(),
      Some(0.1),
    );
    assert_eq!(outcome, MatchOutcome::unknown());
  }

  #[test]
  fn best_label_passes_threshold_and_margin() {
    let store = PrototypeStore::from_embeddings([
      ("Tea", Embedding::from(vec![1.0, 0.0, 0.0])),
      ("Water", Embedding::from(vec![0.0, 1.0, 0.0])),
    ]);
    let matcher = SimilarityMatcher::default();
    let outcome = matcher.match_embedding(&Embedding::from(vec![0.9, 0.1, 0.0]), &store, None);
    assert_eq!(outcome.label, Label::known("Tea"));
    assert!(outcome.similarity > 0.99);
    assert!(outcome.margin > 0.8);
  }

  #[test]
  fn small_margin_is_unknown_but_keeps_scores() {
    let store = PrototypeStore::from_embeddings([
      ("Tea", Embedding::from(vec![1.0, 0.0])),
      ("Coffee", Embedding::from(vec![0.0, 1.0])),
    ]);
    let matcher = SimilarityMatcher::default();
    let outcome = matcher.match_embedding(&Embedding::from(vec![1.0, 0.98]), &store, None);
    assert!(outcome.label.is_unknown());
    assert!(outcome.similarity > 0.7);
    assert!(outcome.margin < 0.04);
  }

  #[test]
  fn negative_second_best_counts_as_zero() {
    let store = PrototypeStore::from_embeddings([
      ("Tea", Embedding::from(vec![1.0, 0.0])),
      ("Anti", Embedding::from(vec![-1.0, 0.0])),
    ]);
    let matcher = SimilarityMatcher::default();
    let outcome = matcher.match_embedding(&Embedding::from(vec![0.5, 0.0]), &store, None);
    assert_eq!(outcome.label, Label::known("Tea"));
    assert!((outcome.margin - 1.0).abs() < 1e-6);
  }

  #[test]
  fn small_box_accepts_lower_similarity() {
    let mut config = tea_scaling();
    config.sim_margin = 0.0;
    let store = PrototypeStore::from_embeddings([("Tea", Embedding::from(vec![1.0, 0.0]))]);
    let matcher = SimilarityMatcher::new(config);
    // 余弦约 0.196
    let query = Embedding::from(vec![0.2, 1.0]);
    assert!(matcher.match_embedding(&query, &store, Some(0.5)).label.is_unknown());
    assert_eq!(
      matcher.match_embedding(&query, &store, Some(0.001)).label,
      Label::known("Tea")
    );
  }
}
