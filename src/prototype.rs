// 该文件是 Jishu （计数） 项目的一部分。
// src/prototype.rs - 品类原型库
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

use image::ImageReader;
use tracing::{info, warn};

use crate::{
  catalog::Catalog,
  embedding::{Embedder, Embedding},
};

/// 每个品类一条参考特征向量
///
/// 原型库只能整体重建，不支持增量修改。
#[derive(Debug, Clone, Default)]
pub struct PrototypeStore {
  prototypes: Vec<(String, Embedding)>,
}

impl PrototypeStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// 为目录中的每个品类提取一条原型
  ///
  /// 读不出参考图的条目记录警告后跳过，不影响其余条目。
  pub fn rebuild<E: Embedder + ?Sized>(catalog: &Catalog, embedder: &E) -> Self {
    let mut prototypes = Vec::with_capacity(catalog.len());
    for entry in catalog.entries() {
      let image = match ImageReader::open(&entry.reference)
        .map_err(image::ImageError::IoError)
        .and_then(|r| r.with_guessed_format().map_err(image::ImageError::IoError))
        .and_then(|r| r.decode())
      {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
          warn!(
            "无法读取品类 {} 的参考图 {}: {}",
            entry.name,
            entry.reference.display(),
            e
          );
          continue;
        }
      };
      prototypes.push((entry.name.clone(), embedder.embed(&image)));
      info!("原型已建立: {}", entry.name);
    }
    Self { prototypes }
  }

  /// 直接由特征向量构造
  pub fn from_embeddings<I, S>(items: I) -> Self
  where
    I: IntoIterator<Item = (S, Embedding)>,
    S: Into<String>,
  {
    Self {
      prototypes: items.into_iter().map(|(n, e)| (n.into(), e)).collect(),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
    self.prototypes.iter().map(|(n, e)| (n.as_str(), e))
  }

  pub fn get(&self, name: &str) -> Option<&Embedding> {
    self.prototypes.iter().find(|(n, _)| n == name).map(|(_, e)| e)
  }

  pub fn len(&self) -> usize {
    self.prototypes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.prototypes.is_empty()
  }
}
