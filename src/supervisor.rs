// 该文件是 Jishu （计数） 项目的一部分。
// src/supervisor.rs - 帧来源看护
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

use std::fmt;

use image::RgbImage;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  config::CaptureConfig,
  input::{Backend, FrameSource, ReadError, SourceLocator, SourceOpener},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
  Disconnected,
  Connected,
  Reconnecting,
}

impl fmt::Display for SourceState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SourceState::Disconnected => "disconnected",
      SourceState::Connected => "connected",
      SourceState::Reconnecting => "reconnecting",
    })
  }
}

/// 一次读取的结果
#[derive(Debug)]
pub enum ReadOutcome {
  Frame(RgbImage),
  /// 读取失败后已重新连接；调用方应丢弃短时跟踪状态
  Reconnected(Backend),
  /// 所有后端都失败，需等待外部重启
  Exhausted,
  /// 有限输入已读完
  Finished,
}

/// 管理帧来源的打开、读取与断线重连
pub struct FrameSourceSupervisor<O: SourceOpener> {
  opener: O,
  locator: SourceLocator,
  backends: Vec<Backend>,
  last_good: Option<Backend>,
  capture: CaptureConfig,
  source: Option<O::Source>,
  state: SourceState,
}

impl<O: SourceOpener> FrameSourceSupervisor<O> {
  /// `backends` 为空时按输入类型选择默认顺序
  pub fn new(
    opener: O,
    locator: SourceLocator,
    backends: Vec<Backend>,
    capture: CaptureConfig,
  ) -> Self {
    let backends = if backends.is_empty() {
      Backend::defaults_for(&locator)
    } else {
      backends
    };
    Self {
      opener,
      locator,
      backends,
      last_good: None,
      capture,
      source: None,
      state: SourceState::Disconnected,
    }
  }

  pub fn state(&self) -> SourceState {
    self.state
  }

  pub fn is_connected(&self) -> bool {
    self.state == SourceState::Connected
  }

  /// 当前连接使用的后端
  pub fn backend(&self) -> Option<Backend> {
    self.source.as_ref().map(FrameSource::backend)
  }

  pub fn locator(&self) -> &SourceLocator {
    &self.locator
  }

  /// 上次成功的后端优先，其余按配置顺序
  fn attempt_order(&self) -> Vec<Backend> {
    let mut order = Vec::with_capacity(self.backends.len() + 1);
    if let Some(last) = self.last_good {
      order.push(last);
    }
    for backend in &self.backends {
      if !order.contains(backend) {
        order.push(*backend);
      }
    }
    order
  }

  /// 依次尝试各后端，成功后应用采集参数
  pub fn connect(&mut self) -> Option<Backend> {
    self.source = None;
    for backend in self.attempt_order() {
      info!("尝试以 {} 打开 {}", backend, self.locator);
      match self.opener.open(&self.locator, backend, &self.capture) {
        Ok(mut source) => {
          if let Err(e) = source.apply_tuning(&self.capture) {
            warn!("应用采集参数失败 ({}): {}", backend, e);
          }
          info!("已连接 {} (后端 {})", self.locator, backend);
          self.source = Some(source);
          self.last_good = Some(backend);
          self.state = SourceState::Connected;
          return Some(backend);
        }
        Err(e) => warn!("以 {} 打开失败: {}", backend, e),
      }
    }
    error!("所有后端均无法打开 {}，检测已停用", self.locator);
    self.state = SourceState::Disconnected;
    None
  }

  /// 读取一帧
  ///
  /// 先阻塞抓取一帧，再最多丢弃 `drain - 1` 帧积压，只解码最新的一帧。
  /// 任何失败都会触发重连。
  pub fn read(&mut self, drain: usize) -> ReadOutcome {
    let Some(source) = self.source.as_mut() else {
      return match self.state {
        SourceState::Disconnected => ReadOutcome::Exhausted,
        _ => self.reconnect(&ReadError::Disconnected("输入未打开".into())),
      };
    };

    let result = source.grab().and_then(|()| {
      for _ in 1..drain.max(1) {
        if !source.try_grab() {
          break;
        }
      }
      source.retrieve()
    });

    match result {
      Ok(frame) if frame.width() > 0 && frame.height() > 0 => ReadOutcome::Frame(frame),
      Ok(_) => self.reconnect(&ReadError::Decode("空帧".into())),
      Err(ReadError::EndOfStream) if self.locator.is_finite() => {
        info!("{} 已读完", self.locator);
        self.release();
        ReadOutcome::Finished
      }
      Err(e) => self.reconnect(&e),
    }
  }

  fn reconnect(&mut self, reason: &ReadError) -> ReadOutcome {
    warn!("读取 {} 失败: {}，开始重连", self.locator, reason);
    self.state = SourceState::Reconnecting;
    match self.connect() {
      Some(backend) => ReadOutcome::Reconnected(backend),
      None => ReadOutcome::Exhausted,
    }
  }

  /// 释放当前输入
  pub fn release(&mut self) {
    if self.source.take().is_some() {
      info!("已释放输入 {}", self.locator);
    }
    self.state = SourceState::Disconnected;
  }
}
