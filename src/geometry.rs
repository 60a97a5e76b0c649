// 该文件是 Jishu （计数） 项目的一部分。
// src/geometry.rs - 边界框几何
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

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};

/// 显示帧坐标系下的边界框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl From<[f32; 4]> for BBox {
  fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
    Self { x1, y1, x2, y2 }
  }
}

impl From<BBox> for [f32; 4] {
  fn from(b: BBox) -> Self {
    [b.x1, b.y1, b.x2, b.y2]
  }
}

impl BBox {
  #[inline]
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  #[inline]
  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  #[inline]
  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  /// 面积，退化框为 0
  #[inline]
  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 交并比，结果总在 [0, 1] 内
  pub fn iou(&self, other: &BBox) -> f32 {
    let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
    let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (self.area() + other.area() - inter).max(1e-6);
    (inter / union).clamp(0.0, 1.0)
  }

  /// 边界框面积与整帧面积之比；帧面积为 0 时返回 None
  pub fn scale_in(&self, frame_width: u32, frame_height: u32) -> Option<f32> {
    let frame_area = frame_width as f32 * frame_height as f32;
    if frame_area <= 0.0 {
      return None;
    }
    Some(self.area() / frame_area)
  }

  /// 裁剪到图像范围内的整数像素矩形 (x, y, w, h)；为空时返回 None
  pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
      return None;
    }
    let x1 = (self.x1 as i64).clamp(0, width as i64 - 1);
    let y1 = (self.y1 as i64).clamp(0, height as i64 - 1);
    let x2 = (self.x2 as i64).clamp(0, width as i64 - 1);
    let y2 = (self.y2 as i64).clamp(0, height as i64 - 1);
    if x2 <= x1 || y2 <= y1 {
      return None;
    }
    Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
  }

  /// 从图像中裁出该区域
  pub fn crop(&self, image: &RgbImage) -> Option<RgbImage> {
    let (x, y, w, h) = self.pixel_rect(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
  }
}

/// 等比例缩放到目标宽度
pub fn letterbox_resize(image: &RgbImage, target_width: u32) -> RgbImage {
  let (w, h) = image.dimensions();
  if w == 0 || target_width == 0 || w == target_width {
    return image.clone();
  }
  let scale = target_width as f32 / w as f32;
  let new_h = ((h as f32 * scale) as u32).max(1);
  imageops::resize(image, target_width, new_h, imageops::FilterType::Triangle)
}
