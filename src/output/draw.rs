// 该文件是 Jishu （计数） 项目的一部分。
// src/output/draw.rs - 在显示帧上绘制标注与计数
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};

use super::OutputError;
use crate::{
  engine::{Annotation, AnnotationStyle},
  ledger::CountSnapshot,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const HUD_FONT_SIZE: f32 = 24.0;
const HUD_LINE_HEIGHT: i32 = 26;
const BOX_THICKNESS: i32 = 2;

pub const COUNTED_COLOR: [u8; 3] = [0, 255, 0];
pub const PENDING_COLOR: [u8; 3] = [255, 0, 255];
const HUD_COLOR: [u8; 3] = [50, 220, 50];
const FPS_COLOR: [u8; 3] = [0, 255, 255];

/// 标注绘制
///
/// 文字需要字体；没有字体时只画边框。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, OutputError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)
      .map_err(|e| OutputError::InvalidFont(format!("{}: {}", path.display(), e)))?;
    Ok(Self {
      font: Some(font),
      ..Default::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn style_color(style: AnnotationStyle) -> Rgb<u8> {
    match style {
      AnnotationStyle::Counted => Rgb(COUNTED_COLOR),
      AnnotationStyle::Pending => Rgb(PENDING_COLOR),
    }
  }

  /// 绘制单个标注：加粗边框，上方为带底色的文字
  fn draw_annotation(&self, image: &mut RgbImage, annotation: &Annotation) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let bbox = annotation.bbox;
    let x_min = (bbox.x1 as i32).clamp(0, w - 1);
    let y_min = (bbox.y1 as i32).clamp(0, h - 1);
    let x_max = (bbox.x2 as i32).clamp(0, w - 1);
    let y_max = (bbox.y2 as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Self::style_color(annotation.style);
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };
    if annotation.text.is_empty() {
      return;
    }

    let text_width = (annotation.text.chars().count() as f32 * self.label_char_width) as i32;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - x_min).max(0) as u32;
    if label_width == 0 {
      return;
    }
    let rect = Rect::at(x_min, label_y).of_size(label_width, self.label_text_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([0u8, 0u8, 0u8]),
      x_min,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      &annotation.text,
    );
  }

  pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
      self.draw_annotation(image, annotation);
    }
  }

  /// 左上角逐行列出计数，右上角显示帧率
  pub fn draw_hud(&self, image: &mut RgbImage, counts: &CountSnapshot, fps: f32) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    let scale = PxScale::from(HUD_FONT_SIZE);
    let mut y = 6;
    for (name, count) in counts.iter() {
      draw_text_mut(
        image,
        Rgb(HUD_COLOR),
        10,
        y,
        scale,
        font,
        &format!("{}: {}", name, count),
      );
      y += HUD_LINE_HEIGHT;
    }
    let x = (image.width() as i32 - 140).max(0);
    draw_text_mut(
      image,
      Rgb(FPS_COLOR),
      x,
      6,
      scale,
      font,
      &format!("FPS: {:.1}", fps),
    );
  }

  /// 生成一帧完整的标注图像
  pub fn render(
    &self,
    frame: &RgbImage,
    annotations: &[Annotation],
    counts: &CountSnapshot,
    fps: f32,
  ) -> RgbImage {
    let mut image = frame.clone();
    self.draw_annotations(&mut image, annotations);
    self.draw_hud(&mut image, counts, fps);
    image
  }
}
