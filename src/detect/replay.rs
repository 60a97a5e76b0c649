// 该文件是 Jishu （计数） 项目的一部分。
// src/detect/replay.rs - 回放录制的检测结果
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

use std::{
  collections::HashMap,
  fs::File,
  io::{BufRead, BufReader},
  path::Path,
};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{Detection, Detector};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("读取检测记录失败: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Deserialize)]
struct ReplayLine {
  frame: u64,
  #[serde(default)]
  detections: Vec<Detection>,
}

/// 按已处理帧序号回放 JSON Lines 格式的检测记录
///
/// 每行形如 `{"frame":N,"detections":[...]}`；没有记录的帧视为无检测。
#[derive(Debug, Default)]
pub struct ReplayDetector {
  frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
  pub fn open(path: &Path) -> Result<Self, ReplayError> {
    let reader = BufReader::new(File::open(path)?);
    let detector = Self::from_reader(reader)?;
    info!(
      "已载入检测记录 {}，共 {} 帧",
      path.display(),
      detector.frames.len()
    );
    Ok(detector)
  }

  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
    let mut frames: HashMap<u64, Vec<Detection>> = HashMap::new();
    for (lineno, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<ReplayLine>(&line) {
        Ok(record) => frames
          .entry(record.frame)
          .or_default()
          .extend(record.detections),
        Err(e) => warn!("跳过第 {} 行无效检测记录: {}", lineno + 1, e),
      }
    }
    Ok(Self { frames })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn detect(&mut self, _frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>, Self::Error> {
    Ok(self.frames.get(&frame_index).cloned().unwrap_or_default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RECORD: &str = r#"{"frame":0,"detections":[{"bbox":[0,0,10,10],"confidence":0.9,"class_id":41,"class_name":"cup"}]}
not json at all

{"frame":2,"detections":[{"bbox":[5,5,15,15],"confidence":0.3}]}
{"frame":2,"detections":[{"bbox":[50,5,60,15],"confidence":0.8}]}
"#;

  #[test]
  fn replays_by_frame_index() {
    let mut detector = ReplayDetector::from_reader(RECORD.as_bytes()).unwrap();
    let frame = RgbImage::new(4, 4);
    assert_eq!(detector.len(), 2);
    assert_eq!(detector.detect(&frame, 0).unwrap().len(), 1);
    assert!(detector.detect(&frame, 1).unwrap().is_empty());
    assert_eq!(detector.detect(&frame, 2).unwrap().len(), 2);
  }

  #[test]
  fn open_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ReplayDetector::open(&dir.path().join("none.jsonl")),
      Err(ReplayError::IoError(_))
    ));
  }
}
