// 该文件是 Jishu （计数） 项目的一部分。
// src/state.rs - 供并发读取的运行状态
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

use std::sync::{
  Arc,
  mpsc::{self, Receiver, SyncSender, TrySendError},
};

use chrono::{DateTime, Local};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
  ledger::{CountLedger, CountSnapshot, SharedLedger},
  supervisor::SourceState,
};

/// 每个订阅者最多积压的计数推送
pub const SUBSCRIBER_BACKLOG: usize = 8;

/// 运行状态，用于区分“没有摄像头”“按时间表暂停”与“正在计数”
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
  pub connected: bool,
  pub detection_enabled: bool,
  pub paused_by_schedule: bool,
  pub source_state: SourceState,
  pub backend: Option<&'static str>,
  pub frames_processed: u64,
}

impl Default for Status {
  fn default() -> Self {
    Self {
      connected: false,
      detection_enabled: false,
      paused_by_schedule: false,
      source_state: SourceState::Disconnected,
      backend: None,
      frames_processed: 0,
    }
  }
}

/// 每处理一帧推送一次的计数
#[derive(Debug, Clone, Serialize)]
pub struct CountUpdate {
  pub counts: CountSnapshot,
  pub timestamp: DateTime<Local>,
}

/// 最近一帧标注图像，整帧替换发布
#[derive(Debug, Default)]
pub struct FrameSlot {
  latest: RwLock<Option<Arc<RgbImage>>>,
}

impl FrameSlot {
  pub fn publish(&self, frame: RgbImage) {
    *self.latest.write() = Some(Arc::new(frame));
  }

  pub fn latest(&self) -> Option<Arc<RgbImage>> {
    self.latest.read().clone()
  }
}

struct Inner {
  status: RwLock<Status>,
  ledger: SharedLedger,
  frame: FrameSlot,
  subscribers: Mutex<Vec<SyncSender<CountUpdate>>>,
}

/// 处理循环持有的写入端
#[derive(Clone)]
pub struct SharedState {
  inner: Arc<Inner>,
}

impl SharedState {
  pub fn new(ledger: SharedLedger) -> Self {
    Self {
      inner: Arc::new(Inner {
        status: RwLock::new(Status::default()),
        ledger,
        frame: FrameSlot::default(),
        subscribers: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn with_categories<I, S>(categories: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(CountLedger::new(categories).into_shared())
  }

  pub fn ledger(&self) -> SharedLedger {
    Arc::clone(&self.inner.ledger)
  }

  pub fn handle(&self) -> StatusHandle {
    StatusHandle {
      inner: Arc::clone(&self.inner),
    }
  }

  pub fn update_status(&self, f: impl FnOnce(&mut Status)) {
    f(&mut self.inner.status.write());
  }

  pub fn publish_frame(&self, frame: RgbImage) {
    self.inner.frame.publish(frame);
  }

  /// 推送计数快照，顺带清理已关闭的订阅
  ///
  /// 订阅者积压已满时丢弃本次推送，不阻塞处理循环。
  pub fn publish_counts(&self, counts: CountSnapshot) {
    let update = CountUpdate {
      counts,
      timestamp: Local::now(),
    };
    self
      .inner
      .subscribers
      .lock()
      .retain(|tx| match tx.try_send(update.clone()) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Disconnected(_)) => false,
      });
  }
}

/// 只读句柄，可在其他线程中查询状态、计数与最新画面
#[derive(Clone)]
pub struct StatusHandle {
  inner: Arc<Inner>,
}

impl StatusHandle {
  pub fn status(&self) -> Status {
    self.inner.status.read().clone()
  }

  pub fn counts(&self) -> CountSnapshot {
    self.inner.ledger.read().snapshot()
  }

  pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
    self.inner.frame.latest()
  }

  /// 订阅计数推送，最多积压 [`SUBSCRIBER_BACKLOG`] 条
  pub fn subscribe(&self) -> Receiver<CountUpdate> {
    let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_BACKLOG);
    self.inner.subscribers.lock().push(tx);
    rx
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_are_pushed_to_live_subscribers() {
    let state = SharedState::with_categories(["Tea"]);
    let handle = state.handle();
    let rx = handle.subscribe();
    let dropped = handle.subscribe();
    drop(dropped);

    state.ledger().write().increment("Tea");
    state.publish_counts(handle.counts());
    let update = rx.recv().unwrap();
    assert_eq!(update.counts.get("Tea"), Some(1));
    assert_eq!(state.inner.subscribers.lock().len(), 1);
  }

  #[test]
  fn idle_subscriber_backlog_is_bounded() {
    let state = SharedState::with_categories(["Tea"]);
    let handle = state.handle();
    let idle = handle.subscribe();

    // 10 帧每秒运行一小时
    for _ in 0..36_000 {
      state.publish_counts(handle.counts());
    }
    assert_eq!(idle.try_iter().count(), SUBSCRIBER_BACKLOG);
    assert_eq!(state.inner.subscribers.lock().len(), 1);

    // 读空后继续收到新的推送
    state.ledger().write().increment("Tea");
    state.publish_counts(handle.counts());
    assert_eq!(idle.try_recv().unwrap().counts.get("Tea"), Some(1));
  }

  #[test]
  fn frame_slot_hands_out_whole_frames() {
    let state = SharedState::with_categories(["Tea"]);
    let handle = state.handle();
    assert!(handle.latest_frame().is_none());
    state.publish_frame(RgbImage::new(4, 2));
    let first = handle.latest_frame().unwrap();
    state.publish_frame(RgbImage::new(8, 8));
    assert_eq!(first.dimensions(), (4, 2));
    assert_eq!(handle.latest_frame().unwrap().dimensions(), (8, 8));
  }

  #[test]
  fn status_reflects_updates() {
    let state = SharedState::with_categories(Vec::<String>::new());
    state.update_status(|s| {
      s.connected = true;
      s.source_state = SourceState::Connected;
      s.backend = Some("gst-uri");
    });
    let status = state.handle().status();
    assert!(status.connected);
    assert!(!status.detection_enabled);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["source_state"], "connected");
  }
}
