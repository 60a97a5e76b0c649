// 该文件是 Jishu （计数） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的脚本化输入与检测
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

#![allow(dead_code)]

use std::{collections::VecDeque, convert::Infallible, path::Path, sync::mpsc::Sender};

use image::{Rgb, RgbImage};
use jishu::{
  catalog::Catalog,
  config::CaptureConfig,
  detect::{Detection, Detector},
  geometry::BBox,
  input::{Backend, FrameSource, ReadError, SourceError, SourceLocator, SourceOpener},
  task::Command,
};

pub const RED: Rgb<u8> = Rgb([220, 20, 20]);
pub const BLUE: Rgb<u8> = Rgb([20, 20, 220]);

/// 黑底上画若干纯色方块
pub fn scene(width: u32, height: u32, items: &[(BBox, Rgb<u8>)]) -> RgbImage {
  let mut image = RgbImage::new(width, height);
  for (bbox, color) in items {
    for y in bbox.y1 as u32..bbox.y2 as u32 {
      for x in bbox.x1 as u32..bbox.x2 as u32 {
        image.put_pixel(x, y, *color);
      }
    }
  }
  image
}

/// 在目录中写入纯色参考图，并按目录载入
pub fn color_catalog(dir: &Path, entries: &[(&str, Rgb<u8>)]) -> Catalog {
  for (name, color) in entries {
    RgbImage::from_pixel(48, 48, *color)
      .save(dir.join(format!("{}.png", name)))
      .unwrap();
  }
  Catalog::from_directory(dir).unwrap()
}

/// 依次给出预置帧，读完后返回脚本中的错误
pub struct ScriptedSource {
  frames: VecDeque<RgbImage>,
  end: ReadError,
  held: Option<RgbImage>,
  backend: Backend,
}

impl FrameSource for ScriptedSource {
  fn grab(&mut self) -> Result<(), ReadError> {
    let frame = self.frames.pop_front().ok_or_else(|| self.end.clone())?;
    self.held = Some(frame);
    Ok(())
  }

  fn try_grab(&mut self) -> bool {
    false
  }

  fn retrieve(&mut self) -> Result<RgbImage, ReadError> {
    self
      .held
      .take()
      .ok_or_else(|| ReadError::Decode("no frame".into()))
  }

  fn apply_tuning(&mut self, _capture: &CaptureConfig) -> Result<(), SourceError> {
    Ok(())
  }

  fn backend(&self) -> Backend {
    self.backend
  }
}

/// 每次打开取下一段脚本；脚本用完后打开失败
pub struct ScriptedOpener {
  pub sessions: VecDeque<(Vec<RgbImage>, ReadError)>,
  pub opened: usize,
}

impl ScriptedOpener {
  pub fn new(sessions: Vec<(Vec<RgbImage>, ReadError)>) -> Self {
    Self {
      sessions: sessions.into(),
      opened: 0,
    }
  }
}

impl SourceOpener for ScriptedOpener {
  type Source = ScriptedSource;

  fn open(
    &mut self,
    _locator: &SourceLocator,
    backend: Backend,
    _capture: &CaptureConfig,
  ) -> Result<ScriptedSource, SourceError> {
    let (frames, end) = self
      .sessions
      .pop_front()
      .ok_or_else(|| SourceError::OpenFailed("no more sessions".into()))?;
    self.opened += 1;
    Ok(ScriptedSource {
      frames: frames.into(),
      end,
      held: None,
      backend,
    })
  }
}

/// 每帧返回同一组检测，可在指定帧发送命令
pub struct ScriptedDetector {
  pub detections: Vec<Detection>,
  pub command_at: Option<(u64, Command, Sender<Command>)>,
  pub seen: Vec<u64>,
}

impl ScriptedDetector {
  pub fn constant(detections: Vec<Detection>) -> Self {
    Self {
      detections,
      command_at: None,
      seen: Vec::new(),
    }
  }
}

impl Detector for ScriptedDetector {
  type Error = Infallible;

  fn detect(&mut self, _frame: &RgbImage, frame_index: u64) -> Result<Vec<Detection>, Infallible> {
    self.seen.push(frame_index);
    if let Some((at, command, tx)) = self.command_at.as_ref() {
      if *at == frame_index {
        tx.send(command.clone()).unwrap();
      }
    }
    Ok(self.detections.clone())
  }
}
