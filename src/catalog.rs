// 该文件是 Jishu （计数） 项目的一部分。
// src/catalog.rs - 品类目录
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// 一个品类及其参考图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
  pub name: String,
  pub reference: PathBuf,
}

/// 有序的品类目录，顺序即计数表的展示顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
  entries: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct MenuFile {
  #[serde(default)]
  items: Vec<MenuItem>,
}

#[derive(Deserialize)]
struct MenuItem {
  name: Option<String>,
  #[serde(default)]
  reference_images: Vec<String>,
}

impl Catalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// 追加一项；同名品类会替换原有参考图，保持原位置
  pub fn with_entry(mut self, name: impl Into<String>, reference: impl Into<PathBuf>) -> Self {
    let name = name.into();
    let reference = reference.into();
    match self.entries.iter_mut().find(|e| e.name == name) {
      Some(entry) => entry.reference = reference,
      None => self.entries.push(CatalogEntry { name, reference }),
    }
    self
  }

  pub fn entries(&self) -> &[CatalogEntry] {
    &self.entries
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.name.as_str())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 读取菜单 JSON：`{"items":[{"name":..,"reference_images":[..]}]}`
  ///
  /// 参考图相对 `upload_dir` 解析（缺省为文件所在目录），只取第一张；
  /// 没有图片或图片不存在的条目会被跳过。
  pub fn from_json(path: &Path, upload_dir: Option<&Path>) -> Result<Self, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    let menu: MenuFile = serde_json::from_str(&content)?;
    let base = upload_dir
      .map(Path::to_path_buf)
      .or_else(|| path.parent().map(Path::to_path_buf))
      .unwrap_or_default();

    let mut catalog = Catalog::new();
    for item in menu.items {
      let Some(name) = item.name.filter(|n| !n.trim().is_empty()) else {
        warn!("菜单条目缺少名称，已跳过");
        continue;
      };
      let Some(relative) = item.reference_images.first() else {
        warn!("菜单条目 {} 没有参考图，已跳过", name);
        continue;
      };
      let full = base.join(relative);
      if !full.exists() {
        warn!("菜单条目 {} 的参考图不存在: {}", name, full.display());
        continue;
      }
      info!("载入菜单条目: {} -> {}", name, full.display());
      catalog = catalog.with_entry(name, full);
    }
    Ok(catalog)
  }

  /// 以目录中每个图像文件的文件名（不含扩展名）作为品类名，按名称排序
  pub fn from_directory(dir: &Path) -> Result<Self, CatalogError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      if !path.is_file() {
        continue;
      }
      let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false);
      if let (true, Some(stem)) = (is_image, path.file_stem().and_then(|s| s.to_str())) {
        found.push((stem.to_string(), path.clone()));
      }
    }
    found.sort();
    Ok(
      found
        .into_iter()
        .fold(Catalog::new(), |c, (name, path)| c.with_entry(name, path)),
    )
  }

  /// 根据路径类型选择载入方式
  pub fn load(path: &Path) -> Result<Self, CatalogError> {
    if path.is_dir() {
      Self::from_directory(path)
    } else {
      Self::from_json(path, None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_menu_skips_missing_images() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("uploads/1")).unwrap();
    std::fs::write(dir.path().join("uploads/1/tea.jpg"), b"x").unwrap();
    let menu = dir.path().join("menu.json");
    std::fs::write(
      &menu,
      r#"{"items":[
        {"name":"Tea","reference_images":["1/tea.jpg"]},
        {"name":"Coffee","reference_images":["2/missing.jpg"]},
        {"name":"Water","reference_images":[]}
      ]}"#,
    )
    .unwrap();

    let catalog = Catalog::from_json(&menu, Some(&dir.path().join("uploads"))).unwrap();
    assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Tea"]);
    assert_eq!(catalog.entries()[0].reference, dir.path().join("uploads/1/tea.jpg"));
  }

  #[test]
  fn directory_catalog_is_sorted_by_name() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["Water Bottle.png", "Tea.jpg", "notes.txt"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    let catalog = Catalog::load(dir.path()).unwrap();
    assert_eq!(
      catalog.names().collect::<Vec<_>>(),
      vec!["Tea", "Water Bottle"]
    );
  }

  #[test]
  fn duplicate_name_keeps_position() {
    let catalog = Catalog::new()
      .with_entry("A", "a.png")
      .with_entry("B", "b.png")
      .with_entry("A", "a2.png");
    assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["A", "B"]);
    assert_eq!(catalog.entries()[0].reference, PathBuf::from("a2.png"));
  }
}
