// 该文件是 Jishu （计数） 项目的一部分。
// src/embedding.rs - 外观特征向量
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

/// 定长外观特征向量
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
  data: Box<[f32]>,
}

impl From<Vec<f32>> for Embedding {
  fn from(data: Vec<f32>) -> Self {
    Self {
      data: data.into_boxed_slice(),
    }
  }
}

impl AsRef<[f32]> for Embedding {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl Embedding {
  pub fn zeros(dimension: usize) -> Self {
    Self::from(vec![0.0; dimension])
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn norm(&self) -> f32 {
    self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
  }

  /// L2 归一化后的副本，零向量保持为零
  pub fn normalized(&self) -> Self {
    let norm = self.norm().max(1e-12);
    Self::from(self.data.iter().map(|v| v / norm).collect::<Vec<_>>())
  }

  /// 余弦相似度，范围 [-1, 1]；任一方为零向量或维度不一致时为 0
  pub fn cosine(&self, other: &Embedding) -> f32 {
    if self.data.len() != other.data.len() {
      return 0.0;
    }
    let na = self.norm();
    let nb = other.norm();
    if na <= 1e-12 || nb <= 1e-12 {
      return 0.0;
    }
    let dot: f32 = self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).sum();
    (dot / (na * nb)).clamp(-1.0, 1.0)
  }
}

/// 外观特征提取能力
///
/// 实现必须对空图像或无效输入返回 `dimension()` 维的零向量，而不是报错。
pub trait Embedder {
  fn dimension(&self) -> usize;
  fn embed(&self, image: &RgbImage) -> Embedding;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
  fn dimension(&self) -> usize {
    (**self).dimension()
  }

  fn embed(&self, image: &RgbImage) -> Embedding {
    (**self).embed(image)
  }
}

const HISTOGRAM_BINS: usize = 4;
const HISTOGRAM_GRID: usize = 2;
const INSET_RATIO: f32 = 0.1;

/// 基于分块颜色直方图的内置特征提取器
///
/// 先按短边的 10% 内缩以减弱边缘干扰，再将区域分为 2x2 网格，
/// 每格统计 4x4x4 的联合 RGB 直方图，共 256 维。
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorHistogramEmbedder;

impl ColorHistogramEmbedder {
  fn inset(image: &RgbImage) -> RgbImage {
    let (w, h) = image.dimensions();
    let inset = (INSET_RATIO * w.min(h) as f32) as u32;
    if w > 2 * inset && h > 2 * inset && inset > 0 {
      imageops::crop_imm(image, inset, inset, w - 2 * inset, h - 2 * inset).to_image()
    } else {
      image.clone()
    }
  }

  #[inline]
  fn bin(value: u8) -> usize {
    value as usize * HISTOGRAM_BINS / 256
  }
}

impl Embedder for ColorHistogramEmbedder {
  fn dimension(&self) -> usize {
    HISTOGRAM_GRID * HISTOGRAM_GRID * HISTOGRAM_BINS.pow(3)
  }

  fn embed(&self, image: &RgbImage) -> Embedding {
    if image.width() == 0 || image.height() == 0 {
      return Embedding::zeros(self.dimension());
    }
    let region = Self::inset(image);
    let (w, h) = region.dimensions();
    let cell_size = HISTOGRAM_BINS.pow(3);
    let mut hist = vec![0.0f32; self.dimension()];

    for (x, y, pixel) in region.enumerate_pixels() {
      let gx = (x as usize * HISTOGRAM_GRID / w as usize).min(HISTOGRAM_GRID - 1);
      let gy = (y as usize * HISTOGRAM_GRID / h as usize).min(HISTOGRAM_GRID - 1);
      let cell = gy * HISTOGRAM_GRID + gx;
      let [r, g, b] = pixel.0;
      let idx = (Self::bin(r) * HISTOGRAM_BINS + Self::bin(g)) * HISTOGRAM_BINS + Self::bin(b);
      hist[cell * cell_size + idx] += 1.0;
    }

    Embedding::from(hist).normalized()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn cosine_is_scale_invariant() {
    let a = Embedding::from(vec![0.3, -1.2, 2.5, 0.0]);
    let b = Embedding::from(vec![1.0, 0.5, -0.25, 4.0]);
    let scaled = Embedding::from(a.as_ref().iter().map(|v| v * 7.5).collect::<Vec<_>>());
    assert!((a.cosine(&b) - scaled.cosine(&b)).abs() < 1e-5);
    assert!((a.cosine(&a) - 1.0).abs() < 1e-5);
  }

  #[test]
  fn cosine_with_zero_vector_is_zero() {
    let a = Embedding::from(vec![1.0, 2.0]);
    assert_eq!(a.cosine(&Embedding::zeros(2)), 0.0);
    assert_eq!(a.cosine(&Embedding::zeros(3)), 0.0);
  }

  #[test]
  fn empty_image_embeds_to_zero_vector() {
    let embedder = ColorHistogramEmbedder;
    let e = embedder.embed(&RgbImage::new(0, 0));
    assert_eq!(e.len(), embedder.dimension());
    assert_eq!(e.norm(), 0.0);
  }

  #[test]
  fn histogram_separates_colors() {
    let embedder = ColorHistogramEmbedder;
    let red = RgbImage::from_pixel(32, 32, Rgb([220, 20, 20]));
    let red2 = RgbImage::from_pixel(16, 24, Rgb([230, 30, 10]));
    let blue = RgbImage::from_pixel(32, 32, Rgb([20, 20, 220]));
    let er = embedder.embed(&red);
    assert!((er.norm() - 1.0).abs() < 1e-5);
    assert!(er.cosine(&embedder.embed(&red2)) > 0.99);
    assert!(er.cosine(&embedder.embed(&blue)) < 0.01);
  }
}
