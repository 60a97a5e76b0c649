// 该文件是 Jishu （计数） 项目的一部分。
// src/input/image_sequence.rs - 图像目录回放
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

use image::{ImageReader, RgbImage};
use tracing::{debug, info};

use super::{Backend, FrameSource, ReadError, SourceError};
use crate::config::CaptureConfig;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 按文件名顺序逐张读取目录中的图像
///
/// 每次 `grab` 前进一张，读完后返回 [`ReadError::EndOfStream`]。
#[derive(Debug)]
pub struct ImageSequenceSource {
  files: Vec<PathBuf>,
  next: usize,
  held: Option<PathBuf>,
}

impl ImageSequenceSource {
  pub fn open(dir: &Path) -> Result<Self, SourceError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(SourceError::OpenFailed(format!(
        "目录 {} 中没有图像",
        dir.display()
      )));
    }
    files.sort();
    info!("图像目录 {} 共 {} 帧", dir.display(), files.len());
    Ok(Self {
      files,
      next: 0,
      held: None,
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl FrameSource for ImageSequenceSource {
  fn grab(&mut self) -> Result<(), ReadError> {
    let path = self.files.get(self.next).ok_or(ReadError::EndOfStream)?;
    self.held = Some(path.clone());
    self.next += 1;
    Ok(())
  }

  fn try_grab(&mut self) -> bool {
    false
  }

  fn retrieve(&mut self) -> Result<RgbImage, ReadError> {
    let path = self
      .held
      .take()
      .ok_or_else(|| ReadError::Decode("没有已抓取的帧".into()))?;
    let image = ImageReader::open(&path)
      .map_err(|e| ReadError::Decode(format!("{}: {}", path.display(), e)))?
      .with_guessed_format()
      .map_err(|e| ReadError::Decode(format!("{}: {}", path.display(), e)))?
      .decode()
      .map_err(|e| ReadError::Decode(format!("{}: {}", path.display(), e)))?;
    Ok(image.to_rgb8())
  }

  fn apply_tuning(&mut self, capture: &CaptureConfig) -> Result<(), SourceError> {
    debug!(
      "图像目录忽略采集参数 {}x{}@{}",
      capture.width, capture.height, capture.fps
    );
    Ok(())
  }

  fn backend(&self) -> Backend {
    Backend::ImageSequence
  }
}
