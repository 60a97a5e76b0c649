// 该文件是 Jishu （计数） 项目的一部分。
// src/output/artifact.rs - 新物体的截图与元数据留存
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

use chrono::{DateTime, Datelike, Local};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::registry::NewIdentityEvent;

#[derive(Error, Debug)]
pub enum ArtifactError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("物体 #{0} 的截图为空")]
  EmptyCrop(u64),
}

/// 新物体留存
///
/// `frame` 为未标注的显示帧，`annotated` 为标注后的画面。
pub trait ArtifactSink {
  fn save(
    &self,
    frame: &RgbImage,
    annotated: &RgbImage,
    event: &NewIdentityEvent,
  ) -> Result<(), ArtifactError>;
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for Box<S> {
  fn save(
    &self,
    frame: &RgbImage,
    annotated: &RgbImage,
    event: &NewIdentityEvent,
  ) -> Result<(), ArtifactError> {
    (**self).save(frame, annotated, event)
  }
}

/// 不保存任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NullArtifactSink;

impl ArtifactSink for NullArtifactSink {
  fn save(&self, _: &RgbImage, _: &RgbImage, _: &NewIdentityEvent) -> Result<(), ArtifactError> {
    Ok(())
  }
}

#[derive(Serialize)]
struct ArtifactRecord<'a> {
  #[serde(flatten)]
  event: &'a NewIdentityEvent,
  timestamp: DateTime<Local>,
  crop: String,
  annotated: String,
}

/// 按日期分目录保存截图、标注图与元数据
///
/// 路径形如 `<root>/YYYY/MM/DD/<时间戳>_<标签>_id<编号>_sim<相似度>_crop.jpg`。
#[derive(Debug, Clone)]
pub struct DirectoryArtifactSink {
  root: PathBuf,
}

impl DirectoryArtifactSink {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn day_directory(&self, at: &DateTime<Local>) -> PathBuf {
    self
      .root
      .join(at.year().to_string())
      .join(format!("{:02}", at.month()))
      .join(format!("{:02}", at.day()))
  }

  fn stem(event: &NewIdentityEvent, at: &DateTime<Local>) -> String {
    let label = event.label.replace(' ', "_");
    format!(
      "{}_{}_id{}_sim{:.2}",
      at.format("%Y%m%d_%H%M%S_%6f"),
      urlencoding::encode(&label),
      event.identity_id,
      event.similarity
    )
  }

  /// 以指定时间保存，返回写入的截图路径
  pub fn save_at(
    &self,
    frame: &RgbImage,
    annotated: &RgbImage,
    event: &NewIdentityEvent,
    at: DateTime<Local>,
  ) -> Result<PathBuf, ArtifactError> {
    let crop = event
      .bbox
      .crop(frame)
      .ok_or(ArtifactError::EmptyCrop(event.identity_id))?;

    let directory = self.day_directory(&at);
    std::fs::create_dir_all(&directory)?;
    let stem = Self::stem(event, &at);
    let crop_path = directory.join(format!("{}_crop.jpg", stem));
    let annotated_path = directory.join(format!("{}_annotated.jpg", stem));
    let meta_path = directory.join(format!("{}.json", stem));

    crop.save(&crop_path)?;
    annotated.save(&annotated_path)?;

    let file_name = |p: &Path| {
      p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
    };
    let record = ArtifactRecord {
      event,
      timestamp: at,
      crop: file_name(&crop_path),
      annotated: file_name(&annotated_path),
    };
    std::fs::write(&meta_path, serde_json::to_vec_pretty(&record)?)?;

    debug!("已保存物体 #{} 的截图: {}", event.identity_id, crop_path.display());
    Ok(crop_path)
  }
}

impl ArtifactSink for DirectoryArtifactSink {
  fn save(
    &self,
    frame: &RgbImage,
    annotated: &RgbImage,
    event: &NewIdentityEvent,
  ) -> Result<(), ArtifactError> {
    self.save_at(frame, annotated, event, Local::now()).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BBox;
  use chrono::TimeZone;

  fn event(bbox: BBox) -> NewIdentityEvent {
    NewIdentityEvent {
      identity_id: 7,
      label: "Water Bottle".into(),
      similarity: 0.876,
      bbox,
      frame_index: 42,
      counted: true,
    }
  }

  #[test]
  fn writes_dated_files() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectoryArtifactSink::new(dir.path());
    let at = Local.with_ymd_and_hms(2026, 10, 12, 9, 30, 5).unwrap();
    let frame = RgbImage::from_pixel(64, 48, image::Rgb([200, 10, 10]));
    let crop = sink
      .save_at(&frame, &frame, &event(BBox::new(8.0, 8.0, 40.0, 32.0)), at)
      .unwrap();

    let day = dir.path().join("2026").join("10").join("12");
    assert_eq!(crop.parent().unwrap(), day);
    let name = crop.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("20261012_093005_000000_Water_Bottle_id7_sim0.88"));
    assert!(name.ends_with("_crop.jpg"));

    let saved = image::open(&crop).unwrap();
    assert_eq!((saved.width(), saved.height()), (32, 24));

    let stem = name.trim_end_matches("_crop.jpg");
    assert!(day.join(format!("{}_annotated.jpg", stem)).exists());
    let meta: serde_json::Value =
      serde_json::from_slice(&std::fs::read(day.join(format!("{}.json", stem))).unwrap()).unwrap();
    assert_eq!(meta["identity_id"], 7);
    assert_eq!(meta["label"], "Water Bottle");
    assert_eq!(meta["crop"], name);
  }

  #[test]
  fn empty_crop_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectoryArtifactSink::new(dir.path());
    let frame = RgbImage::new(16, 16);
    let result = sink.save(&frame, &frame, &event(BBox::new(30.0, 30.0, 40.0, 40.0)));
    assert!(matches!(result, Err(ArtifactError::EmptyCrop(7))));
  }

  #[test]
  fn label_is_made_path_safe() {
    let at = Local.with_ymd_and_hms(2026, 10, 12, 9, 30, 5).unwrap();
    let mut e = event(BBox::default());
    e.label = "A/B".into();
    let stem = DirectoryArtifactSink::stem(&e, &at);
    assert!(!stem.contains('/'));
    assert!(stem.contains("A%2FB"));
  }
}
