// 该文件是 Jishu （计数） 项目的一部分。
// src/ledger.rs - 品类计数表
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

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::{Serialize, Serializer, ser::SerializeMap};

/// 处理循环独占写入，状态查询并发读取
pub type SharedLedger = Arc<RwLock<CountLedger>>;

/// 每个品类一个计数器，品类顺序由 `reset` 时的目录顺序决定
#[derive(Debug, Clone, Default)]
pub struct CountLedger {
  order: Vec<String>,
  counts: HashMap<String, u64>,
}

impl CountLedger {
  pub fn new<I, S>(categories: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut ledger = Self::default();
    ledger.reset(categories);
    ledger
  }

  /// 以新的品类集合重置，所有计数归零
  pub fn reset<I, S>(&mut self, categories: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.order.clear();
    self.counts.clear();
    for name in categories {
      let name = name.into();
      if self.counts.insert(name.clone(), 0).is_none() {
        self.order.push(name);
      }
    }
  }

  /// 保留品类，计数归零
  pub fn zero(&mut self) {
    self.counts.values_mut().for_each(|c| *c = 0);
  }

  /// 品类存在时加一并返回新值，否则不做任何事
  pub fn increment(&mut self, category: &str) -> Option<u64> {
    let count = self.counts.get_mut(category)?;
    *count += 1;
    Some(*count)
  }

  pub fn contains(&self, category: &str) -> bool {
    self.counts.contains_key(category)
  }

  pub fn get(&self, category: &str) -> Option<u64> {
    self.counts.get(category).copied()
  }

  pub fn into_shared(self) -> SharedLedger {
    Arc::new(RwLock::new(self))
  }

  pub fn categories(&self) -> impl Iterator<Item = &str> {
    self.order.iter().map(String::as_str)
  }

  pub fn snapshot(&self) -> CountSnapshot {
    CountSnapshot {
      entries: self
        .order
        .iter()
        .map(|name| (name.clone(), self.counts.get(name).copied().unwrap_or(0)))
        .collect(),
    }
  }
}

/// 计数表某一时刻的完整拷贝
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSnapshot {
  entries: Vec<(String, u64)>,
}

impl CountSnapshot {
  pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
    self.entries.iter().map(|(n, c)| (n.as_str(), *c))
  }

  pub fn get(&self, category: &str) -> Option<u64> {
    self
      .entries
      .iter()
      .find(|(n, _)| n == category)
      .map(|(_, c)| *c)
  }

  pub fn total(&self) -> u64 {
    self.entries.iter().map(|(_, c)| c).sum()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl Serialize for CountSnapshot {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (name, count) in &self.entries {
      map.serialize_entry(name, count)?;
    }
    map.end()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn increment_known_category_only() {
    let mut ledger = CountLedger::new(["Tea", "Water Bottle"]);
    assert_eq!(ledger.increment("Tea"), Some(1));
    assert_eq!(ledger.increment("Tea"), Some(2));
    assert_eq!(ledger.increment("Coffee"), None);
    assert!(!ledger.contains("Coffee"));
    assert_eq!(ledger.get("Water Bottle"), Some(0));
  }

  #[test]
  fn reset_zeroes_every_category() {
    // 重建目录时即使品类未变，计数也会清零
    let mut ledger = CountLedger::new(["Tea", "Water Bottle"]);
    ledger.increment("Tea");
    ledger.increment("Water Bottle");
    ledger.reset(["Tea", "Water Bottle", "Coffee"]);
    let snapshot = ledger.snapshot();
    assert_eq!(snapshot.total(), 0);
    assert_eq!(snapshot.len(), 3);
  }

  #[test]
  fn snapshot_keeps_catalog_order_and_is_detached() {
    let mut ledger = CountLedger::new(["b", "a", "c", "a"]);
    ledger.increment("c");
    let snapshot = ledger.snapshot();
    ledger.increment("c");
    assert_eq!(
      snapshot.iter().collect::<Vec<_>>(),
      vec![("b", 0), ("a", 0), ("c", 1)]
    );
    assert_eq!(
      serde_json::to_string(&snapshot).unwrap(),
      r#"{"b":0,"a":0,"c":1}"#
    );
  }

  #[test]
  fn zero_keeps_categories() {
    let mut ledger = CountLedger::new(["Tea"]);
    ledger.increment("Tea");
    ledger.zero();
    assert_eq!(ledger.get("Tea"), Some(0));
  }
}
