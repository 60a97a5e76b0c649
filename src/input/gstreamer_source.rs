// 该文件是 Jishu （计数） 项目的一部分。
// src/input/gstreamer_source.rs - GStreamer 帧来源
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

//! # GStreamer 帧来源
//!
//! 三种后端共用同一条管道尾部：
//!
//! ```text
//! <源> ! videoconvert ! videoscale ! videorate
//!      ! capsfilter name=tune caps=video/x-raw,format=RGB,width=W,height=H,framerate=F/1
//!      ! appsink name=sink max-buffers=N drop=true sync=false
//! ```
//!
//! 采集参数通过替换 `tune` 的 caps 重新协商，无需重建管道。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};

use super::{Backend, FrameSource, ReadError, SourceError, SourceLocator};
use crate::config::CaptureConfig;

fn source_description(locator: &SourceLocator, backend: Backend) -> Result<String, SourceError> {
  let unsupported = || SourceError::Unsupported {
    backend,
    locator: locator.clone(),
  };
  let description = match backend {
    Backend::GstUri => {
      let uri = locator.to_uri().ok_or_else(unsupported)?;
      format!("uridecodebin uri=\"{}\"", uri)
    }
    Backend::GstRtspTcp => {
      let SourceLocator::Uri(url) = locator else {
        return Err(unsupported());
      };
      format!(
        "rtspsrc location=\"{}\" protocols=tcp latency=0 ! decodebin",
        url
      )
    }
    Backend::GstV4l2 => {
      let device = locator.device_path().ok_or_else(unsupported)?;
      format!("v4l2src device={}", device.display())
    }
    Backend::ImageSequence => return Err(unsupported()),
  };
  Ok(description)
}

fn tuning_caps(capture: &CaptureConfig) -> gst::Caps {
  gst::Caps::builder("video/x-raw")
    .field("format", "RGB")
    .field("width", capture.width as i32)
    .field("height", capture.height as i32)
    .field("framerate", gst::Fraction::new(capture.fps.max(1) as i32, 1))
    .build()
}

/// 基于 GStreamer 管道与 appsink 的帧来源
pub struct GStreamerSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  tune: gst::Element,
  backend: Backend,
  read_timeout: gst::ClockTime,
  held: Option<gst::Sample>,
}

impl GStreamerSource {
  pub fn open(
    locator: &SourceLocator,
    backend: Backend,
    capture: &CaptureConfig,
  ) -> Result<Self, SourceError> {
    gst::init()?;

    let description = format!(
      "{} ! videoconvert ! videoscale ! videorate ! capsfilter name=tune ! appsink name=sink max-buffers={} drop=true sync=false",
      source_description(locator, backend)?,
      capture.buffer_size.max(1)
    );
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| SourceError::OpenFailed("无法创建管道".into()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| SourceError::OpenFailed("找不到 appsink".into()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| SourceError::OpenFailed("sink 不是 appsink".into()))?;
    let tune = pipeline
      .by_name("tune")
      .ok_or_else(|| SourceError::OpenFailed("找不到 capsfilter".into()))?;
    tune.set_property("caps", tuning_caps(capture));

    let source = Self {
      pipeline,
      appsink,
      tune,
      backend,
      read_timeout: gst::ClockTime::from_mseconds(capture.read_timeout_ms),
      held: None,
    };

    source.pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = source.pipeline.state(source.read_timeout);
    result?;
    if let Some(error) = source.pending_error() {
      return Err(SourceError::OpenFailed(error));
    }
    Ok(source)
  }

  /// 取出总线上的错误或结束消息
  fn pending_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }

  fn pull(&self, timeout: gst::ClockTime) -> Result<gst::Sample, ReadError> {
    if let Some(sample) = self.appsink.try_pull_sample(timeout) {
      return Ok(sample);
    }
    if let Some(error) = self.pending_error() {
      return Err(ReadError::Disconnected(error));
    }
    if self.appsink.is_eos() {
      return Err(ReadError::EndOfStream);
    }
    Err(ReadError::Timeout)
  }
}

impl Drop for GStreamerSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl FrameSource for GStreamerSource {
  fn grab(&mut self) -> Result<(), ReadError> {
    let sample = self.pull(self.read_timeout)?;
    self.held = Some(sample);
    Ok(())
  }

  fn try_grab(&mut self) -> bool {
    match self.pull(gst::ClockTime::ZERO) {
      Ok(sample) => {
        self.held = Some(sample);
        true
      }
      Err(_) => false,
    }
  }

  fn retrieve(&mut self) -> Result<RgbImage, ReadError> {
    let sample = self
      .held
      .take()
      .ok_or_else(|| ReadError::Decode("没有已抓取的帧".into()))?;
    sample_to_rgb(&sample)
  }

  fn apply_tuning(&mut self, capture: &CaptureConfig) -> Result<(), SourceError> {
    self
      .appsink
      .set_property("max-buffers", capture.buffer_size.max(1));
    self.appsink.set_property("drop", true);
    self.tune.set_property("caps", tuning_caps(capture));
    self.read_timeout = gst::ClockTime::from_mseconds(capture.read_timeout_ms);
    debug!(
      "采集参数已应用: 缓冲 {}，{}x{}@{}",
      capture.buffer_size, capture.width, capture.height, capture.fps
    );
    Ok(())
  }

  fn backend(&self) -> Backend {
    self.backend
  }
}

fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, ReadError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| ReadError::Decode("样本中没有缓冲区".into()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| ReadError::Decode("样本中没有 caps".into()))?;
  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|e| ReadError::Decode(format!("无法解析视频信息: {}", e)))?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| ReadError::Decode(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * height.saturating_sub(1) + width * 3;
  if width == 0 || height == 0 || data.len() < expected {
    return Err(ReadError::Decode(format!(
      "缓冲区大小不符: 需要 {} 字节，实际 {} 字节",
      expected,
      data.len()
    )));
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(ReadError::Decode(format!("不支持的像素格式 {:?}", other))),
  };

  let mut pixels = Vec::with_capacity(width * height * 3);
  for row in data.chunks(stride).take(height) {
    for px in row[..width * 3].chunks_exact(3) {
      if swap {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      } else {
        pixels.extend_from_slice(px);
      }
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| ReadError::Decode("像素数据长度错误".into()))
}
