// 该文件是 Jishu （计数） 项目的一部分。
// src/output/gstreamer_stream.rs - 标注画面的 RTP/H.264 推流
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

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::{RgbImage, imageops};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render};

#[derive(Error, Debug)]
pub enum GStreamerStreamOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少目标主机")]
  MissingHost,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsrc")]
  AppSrcNotFound,
  #[error("元素不是 appsrc")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 将标注画面编码为 H.264 并经 RTP/UDP 发出
///
/// 地址形如 `rtp://host:port?fps=10&width=1280&height=720`。
/// 尺寸不符的帧会先缩放到推流尺寸。
pub struct GStreamerStreamOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: u32,
  frame_count: Mutex<u64>,
}

impl FromUrlWithScheme for GStreamerStreamOutput {
  const SCHEME: &'static str = "rtp";
}

impl FromUrl for GStreamerStreamOutput {
  type Error = GStreamerStreamOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}'，实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerStreamOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query: HashMap<_, _> = url.query_pairs().collect();
    let width: u32 = query
      .get("width")
      .and_then(|v| v.parse().ok())
      .unwrap_or(1280);
    let height: u32 = query
      .get("height")
      .and_then(|v| v.parse().ok())
      .unwrap_or(720);
    let fps: u32 = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .filter(|f| *f > 0)
      .unwrap_or(10);
    let bitrate: u32 = query
      .get("bitrate")
      .and_then(|v| v.parse().ok())
      .unwrap_or(2000);
    let host = url
      .host_str()
      .ok_or(GStreamerStreamOutputError::MissingHost)?;
    let port = url.port().unwrap_or(5000);

    let description = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
       x264enc speed-preset=ultrafast tune=zerolatency bitrate={} ! \
       h264parse ! rtph264pay config-interval=1 pt=96 ! \
       udpsink host={} port={}",
      bitrate, host, port
    );
    info!("推流管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerStreamOutputError::PipelineError("无法创建管道".into()))?;
    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerStreamOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerStreamOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_property("is-live", true);

    pipeline.set_state(gst::State::Playing)?;
    info!("推流已启动: {}x{}@{} -> {}:{}", width, height, fps, host, port);

    Ok(Self {
      pipeline,
      appsrc,
      width,
      height,
      fps,
      frame_count: Mutex::new(0),
    })
  }
}

impl GStreamerStreamOutput {
  fn push_frame(&self, data: Vec<u8>) -> Result<(), GStreamerStreamOutputError> {
    let mut buffer = gst::Buffer::from_mut_slice(data);

    let mut frame_count = self.frame_count.lock();
    let frame_ns = 1_000_000_000 / self.fps as u64;
    if let Some(buffer_ref) = buffer.get_mut() {
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(*frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }
    *frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerStreamOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl Drop for GStreamerStreamOutput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止推流管道失败: {}", e);
    }
    info!("推流结束，共发送 {} 帧", *self.frame_count.lock());
  }
}

impl Render for GStreamerStreamOutput {
  type Error = GStreamerStreamOutputError;

  fn render_frame(&self, frame: &RgbImage) -> Result<(), Self::Error> {
    let data = if frame.dimensions() == (self.width, self.height) {
      frame.as_raw().clone()
    } else {
      imageops::resize(frame, self.width, self.height, imageops::FilterType::Triangle).into_raw()
    };
    self.push_frame(data)
  }
}
