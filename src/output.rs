// 该文件是 Jishu （计数） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(feature = "gstreamer_output")]
use crate::FromUrlWithScheme;

/// 接收标注完成的画面
pub trait Render {
  type Error;
  fn render_frame(&self, frame: &RgbImage) -> Result<(), Self::Error>;
}

impl<R: Render + ?Sized> Render for Box<R> {
  type Error = R::Error;

  fn render_frame(&self, frame: &RgbImage) -> Result<(), Self::Error> {
    (**self).render_frame(frame)
  }
}

pub mod draw;

mod artifact;
pub use self::artifact::{ArtifactError, ArtifactSink, DirectoryArtifactSink, NullArtifactSink};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_stream;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_stream::{GStreamerStreamOutput, GStreamerStreamOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 推流输出错误: {0}")]
  GStreamerStreamOutputError(#[from] GStreamerStreamOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 按 URI 方案选择的画面输出
pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamerStreamOutput(GStreamerStreamOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "gstreamer_output")]
      GStreamerStreamOutput::SCHEME => {
        let output = GStreamerStreamOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerStreamOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  #[allow(unused_variables)]
  fn render_frame(&self, frame: &RgbImage) -> Result<(), Self::Error> {
    match *self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerStreamOutput(ref output) => {
        output.render_frame(frame).map_err(OutputError::from)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
