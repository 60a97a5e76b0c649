// 该文件是 Jishu （计数） 项目的一部分。
// src/input.rs - 视频帧来源
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

use std::{fmt, path::PathBuf, str::FromStr};

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, config::CaptureConfig};

mod image_sequence;
pub use self::image_sequence::ImageSequenceSource;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_source;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_source::GStreamerSource;

/// 单次读帧失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
  #[error("读取超时")]
  Timeout,
  #[error("帧解码失败: {0}")]
  Decode(String),
  #[error("连接断开: {0}")]
  Disconnected(String),
  #[error("视频流结束")]
  EndOfStream,
}

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("后端 {backend} 不支持输入 {locator}")]
  Unsupported {
    backend: Backend,
    locator: SourceLocator,
  },
  #[error("未编译后端 {0} 的支持")]
  BackendDisabled(Backend),
  #[error("无法识别的输入: {0}")]
  InvalidLocator(String),
  #[error("无法识别的后端: {0}")]
  InvalidBackend(String),
  #[error("打开输入失败: {0}")]
  OpenFailed(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gstreamer::glib::Error),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gstreamer::glib::BoolError),
  #[cfg(feature = "gstreamer_input")]
  #[error("State change error: {0}")]
  StateChangeError(#[from] gstreamer::StateChangeError),
}

/// 打开输入的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
  /// uridecodebin，适用于各类 URI 与本地视频文件
  GstUri,
  /// rtspsrc，强制 TCP 传输且不缓冲
  GstRtspTcp,
  /// v4l2src 摄像头
  GstV4l2,
  /// 图像目录逐张回放
  ImageSequence,
}

impl Backend {
  pub const ALL: [Backend; 4] = [
    Backend::GstRtspTcp,
    Backend::GstV4l2,
    Backend::GstUri,
    Backend::ImageSequence,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Backend::GstUri => "gst-uri",
      Backend::GstRtspTcp => "gst-rtsp-tcp",
      Backend::GstV4l2 => "gst-v4l2",
      Backend::ImageSequence => "image-sequence",
    }
  }

  pub fn supports(&self, locator: &SourceLocator) -> bool {
    match (self, locator) {
      (Backend::GstUri, SourceLocator::Uri(_)) => true,
      (Backend::GstUri, SourceLocator::Path(path)) => !path.is_dir(),
      (Backend::GstRtspTcp, SourceLocator::Uri(url)) => url.scheme() == "rtsp",
      (Backend::GstV4l2, SourceLocator::Camera(_)) => true,
      (Backend::GstV4l2, SourceLocator::Path(path)) => path.starts_with("/dev"),
      (Backend::ImageSequence, SourceLocator::Path(path)) => path.is_dir(),
      _ => false,
    }
  }

  /// 未指定后端时按输入类型给出的尝试顺序
  pub fn defaults_for(locator: &SourceLocator) -> Vec<Backend> {
    Self::ALL
      .into_iter()
      .filter(|b| b.supports(locator))
      .collect()
  }
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Backend {
  type Err = SourceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|b| b.name() == s)
      .ok_or_else(|| SourceError::InvalidBackend(s.to_string()))
  }
}

/// 输入地址：摄像头序号、URI 或本地路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
  Camera(u32),
  Uri(Url),
  Path(PathBuf),
}

impl SourceLocator {
  /// 摄像头序号对应的设备路径
  pub fn device_path(&self) -> Option<PathBuf> {
    match self {
      SourceLocator::Camera(index) => Some(PathBuf::from(format!("/dev/video{}", index))),
      SourceLocator::Path(path) if path.starts_with("/dev") => Some(path.clone()),
      _ => None,
    }
  }

  /// 本地文件与图像目录读完即止，不应重连
  pub fn is_finite(&self) -> bool {
    matches!(self, SourceLocator::Path(path) if !path.starts_with("/dev"))
  }

  /// 转为 uridecodebin 可用的 URI
  pub fn to_uri(&self) -> Option<String> {
    match self {
      SourceLocator::Uri(url) => Some(url.to_string()),
      SourceLocator::Path(path) => {
        let absolute = std::path::absolute(path).ok()?;
        Url::from_file_path(absolute).ok().map(String::from)
      }
      SourceLocator::Camera(_) => None,
    }
  }
}

impl FromUrl for SourceLocator {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "rtsp" | "rtsps" | "http" | "https" => Ok(SourceLocator::Uri(url.clone())),
      "file" => url
        .to_file_path()
        .map(SourceLocator::Path)
        .map_err(|_| SourceError::InvalidLocator(url.to_string())),
      _ => Err(SourceError::InvalidLocator(url.to_string())),
    }
  }
}

impl FromStr for SourceLocator {
  type Err = SourceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(SourceError::InvalidLocator(s.to_string()));
    }
    if let Ok(index) = s.parse::<u32>() {
      return Ok(SourceLocator::Camera(index));
    }
    match Url::parse(s) {
      Ok(url) if url.scheme().len() > 1 => Self::from_url(&url),
      _ => Ok(SourceLocator::Path(PathBuf::from(s))),
    }
  }
}

impl fmt::Display for SourceLocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceLocator::Camera(index) => write!(f, "camera:{}", index),
      SourceLocator::Uri(url) => write!(f, "{}", url),
      SourceLocator::Path(path) => write!(f, "{}", path.display()),
    }
  }
}

/// 一个已打开的帧来源
///
/// `grab` 只推进到下一帧，`retrieve` 才解码出图像，
/// 以便在消费跟不上时低成本地丢弃积压帧。
pub trait FrameSource {
  /// 等待并抓取下一帧，最长等待读超时
  fn grab(&mut self) -> Result<(), ReadError>;

  /// 不等待，若有更新的帧则替换当前抓取的帧
  fn try_grab(&mut self) -> bool;

  /// 解码最近抓取的帧
  fn retrieve(&mut self) -> Result<RgbImage, ReadError>;

  /// 应用缓冲深度、分辨率与帧率
  fn apply_tuning(&mut self, capture: &CaptureConfig) -> Result<(), SourceError>;

  fn backend(&self) -> Backend;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn grab(&mut self) -> Result<(), ReadError> {
    (**self).grab()
  }

  fn try_grab(&mut self) -> bool {
    (**self).try_grab()
  }

  fn retrieve(&mut self) -> Result<RgbImage, ReadError> {
    (**self).retrieve()
  }

  fn apply_tuning(&mut self, capture: &CaptureConfig) -> Result<(), SourceError> {
    (**self).apply_tuning(capture)
  }

  fn backend(&self) -> Backend {
    (**self).backend()
  }
}

/// 以指定后端打开输入
pub trait SourceOpener {
  type Source: FrameSource;

  fn open(
    &mut self,
    locator: &SourceLocator,
    backend: Backend,
    capture: &CaptureConfig,
  ) -> Result<Self::Source, SourceError>;
}

/// 按后端分派到内置实现
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
  type Source = Box<dyn FrameSource + Send>;

  fn open(
    &mut self,
    locator: &SourceLocator,
    backend: Backend,
    capture: &CaptureConfig,
  ) -> Result<Self::Source, SourceError> {
    if !backend.supports(locator) {
      return Err(SourceError::Unsupported {
        backend,
        locator: locator.clone(),
      });
    }
    match backend {
      Backend::ImageSequence => {
        let SourceLocator::Path(dir) = locator else {
          return Err(SourceError::Unsupported {
            backend,
            locator: locator.clone(),
          });
        };
        Ok(Box::new(ImageSequenceSource::open(dir)?))
      }
      #[cfg(feature = "gstreamer_input")]
      Backend::GstUri | Backend::GstRtspTcp | Backend::GstV4l2 => {
        Ok(Box::new(GStreamerSource::open(locator, backend, capture)?))
      }
      #[cfg(not(feature = "gstreamer_input"))]
      Backend::GstUri | Backend::GstRtspTcp | Backend::GstV4l2 => {
        let _ = capture;
        Err(SourceError::BackendDisabled(backend))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_locators() {
    assert_eq!("0".parse::<SourceLocator>().unwrap(), SourceLocator::Camera(0));
    assert!(matches!(
      "rtsp://10.0.0.2:8554/live".parse::<SourceLocator>().unwrap(),
      SourceLocator::Uri(url) if url.scheme() == "rtsp"
    ));
    assert_eq!(
      "/data/clip.mp4".parse::<SourceLocator>().unwrap(),
      SourceLocator::Path(PathBuf::from("/data/clip.mp4"))
    );
    assert_eq!(
      "file:///data/clip.mp4".parse::<SourceLocator>().unwrap(),
      SourceLocator::Path(PathBuf::from("/data/clip.mp4"))
    );
    assert!("  ".parse::<SourceLocator>().is_err());
  }

  #[test]
  fn default_backend_order() {
    let rtsp: SourceLocator = "rtsp://cam/stream".parse().unwrap();
    assert_eq!(
      Backend::defaults_for(&rtsp),
      vec![Backend::GstRtspTcp, Backend::GstUri]
    );
    assert_eq!(
      Backend::defaults_for(&SourceLocator::Camera(2)),
      vec![Backend::GstV4l2]
    );
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
      Backend::defaults_for(&SourceLocator::Path(dir.path().to_path_buf())),
      vec![Backend::ImageSequence]
    );
  }

  #[test]
  fn backend_names_round_trip() {
    for backend in Backend::ALL {
      assert_eq!(backend.name().parse::<Backend>().unwrap(), backend);
    }
    assert!("ffmpeg".parse::<Backend>().is_err());
  }

  #[test]
  fn finite_locators() {
    assert!(SourceLocator::Path(PathBuf::from("/data/frames")).is_finite());
    assert!(!SourceLocator::Path(PathBuf::from("/dev/video0")).is_finite());
    assert!(!SourceLocator::Camera(0).is_finite());
    assert!(!"rtsp://cam/live".parse::<SourceLocator>().unwrap().is_finite());
  }

  #[test]
  fn camera_device_path() {
    assert_eq!(
      SourceLocator::Camera(1).device_path(),
      Some(PathBuf::from("/dev/video1"))
    );
  }
}
