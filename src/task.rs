// 该文件是 Jishu （计数） 项目的一部分。
// src/task.rs - 处理循环
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

//! # 处理循环
//!
//! 单线程逐帧执行：取帧、节流、缩放到显示宽度、检测、跟踪、身份与计数、
//! 绘制、发布。每轮开始时处理外部命令，并按间隔检查时间表。
//! 单帧内的错误只记录并短暂退避，不会结束循环。

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::mpsc::{Receiver, TryRecvError},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, error, info, warn};

use crate::{
  catalog::Catalog,
  config::{CycleConfig, EngineConfig},
  detect::{Detector, Tracker, filter_confidence},
  embedding::Embedder,
  engine::{Engine, FrameOutcome},
  geometry::letterbox_resize,
  input::{Backend, SourceOpener},
  ledger::CountSnapshot,
  output::{ArtifactSink, NullArtifactSink, OutputError, Render, draw::Draw},
  schedule::{ScheduleWindow, detection_allowed},
  state::SharedState,
  supervisor::{FrameSourceSupervisor, ReadOutcome},
};

/// 节流时单次等待的上限
const THROTTLE_SLEEP: Duration = Duration::from_millis(10);

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message
  } else {
    "未知错误"
  }
}

/// 发给处理循环的外部命令
#[derive(Debug, Clone)]
pub enum Command {
  /// 处理完当前帧后退出
  Stop,
  /// 重新连接输入并恢复检测
  Restart,
  /// 清空短时状态并将计数归零
  ResetCounts,
  /// 按新目录重建原型库，计数归零
  ReloadCatalog(Catalog),
}

/// 单轮的结果
#[derive(Debug)]
pub enum CycleStep {
  Processed(FrameOutcome),
  /// 距上一帧太近，帧被丢弃
  Throttled,
  Reconnected(Backend),
  Exhausted,
  Finished,
}

/// 循环结束时的汇总
#[derive(Debug, Clone)]
pub struct CycleSummary {
  pub frames_processed: u64,
  pub counts: CountSnapshot,
}

enum Flow {
  Continue,
  Stop,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

pub struct ProcessingCycle<O: SourceOpener, D, T, E> {
  supervisor: FrameSourceSupervisor<O>,
  detector: D,
  tracker: T,
  engine: Engine<E>,
  state: SharedState,
  commands: Receiver<Command>,
  cycle: CycleConfig,
  schedule: Option<ScheduleWindow>,
  draw: Draw,
  artifacts: Box<dyn ArtifactSink + Send>,
  output: Option<Box<dyn Render<Error = OutputError> + Send>>,
  clock: Clock,
  max_frames: Option<u64>,
  detection_enabled: bool,
  paused_by_schedule: bool,
  last_schedule_check: Option<Instant>,
  last_admitted: Option<Instant>,
  fps: f32,
  frames_processed: u64,
}

impl<O, D, T, E> ProcessingCycle<O, D, T, E>
where
  O: SourceOpener,
  D: Detector,
  T: Tracker,
  E: Embedder,
{
  pub fn new(
    supervisor: FrameSourceSupervisor<O>,
    detector: D,
    tracker: T,
    engine: Engine<E>,
    state: SharedState,
    config: &EngineConfig,
    commands: Receiver<Command>,
  ) -> Self {
    Self {
      supervisor,
      detector,
      tracker,
      engine,
      state,
      commands,
      cycle: config.cycle.clone(),
      schedule: config.schedule.clone(),
      draw: Draw::default(),
      artifacts: Box::new(NullArtifactSink),
      output: None,
      clock: Box::new(|| Local::now().naive_local()),
      max_frames: None,
      detection_enabled: false,
      paused_by_schedule: false,
      last_schedule_check: None,
      last_admitted: None,
      fps: 0.0,
      frames_processed: 0,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_artifacts(mut self, sink: impl ArtifactSink + Send + 'static) -> Self {
    self.artifacts = Box::new(sink);
    self
  }

  pub fn with_output(mut self, output: impl Render<Error = OutputError> + Send + 'static) -> Self {
    self.output = Some(Box::new(output));
    self
  }

  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 替换时间表使用的时钟
  pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) -> Self {
    self.clock = Box::new(clock);
    self
  }

  pub fn engine(&self) -> &Engine<E> {
    &self.engine
  }

  pub fn detection_enabled(&self) -> bool {
    self.detection_enabled
  }

  pub fn paused_by_schedule(&self) -> bool {
    self.paused_by_schedule
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames_processed
  }

  /// 运行到收到停止命令、有限输入读完或达到帧数上限
  pub fn run(&mut self) -> anyhow::Result<CycleSummary> {
    info!("处理循环启动，输入 {}", self.supervisor.locator());
    self.start();

    loop {
      if let Flow::Stop = self.poll_commands() {
        info!("收到停止命令，退出处理循环");
        break;
      }
      if self.max_frames.is_some_and(|n| self.frames_processed >= n) {
        info!("达到指定帧数 {}，退出处理循环", self.frames_processed);
        break;
      }

      self.poll_schedule(Instant::now());
      if !self.detection_enabled || self.paused_by_schedule {
        thread::sleep(self.cycle.idle_sleep());
        continue;
      }

      match panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
        Ok(Ok(CycleStep::Finished)) => break,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
          error!("处理第 {} 帧出错: {:#}", self.engine.frame_index(), e);
          thread::sleep(self.cycle.error_backoff());
        }
        Err(payload) => {
          error!(
            "处理第 {} 帧时崩溃: {}，丢弃短时状态后继续",
            self.engine.frame_index(),
            panic_message(payload.as_ref())
          );
          self.engine.reset_transient();
          self.tracker.reset();
          thread::sleep(self.cycle.error_backoff());
        }
      }
    }

    self.shutdown();
    Ok(CycleSummary {
      frames_processed: self.frames_processed,
      counts: self.engine.counts(),
    })
  }

  /// 首次连接输入
  pub fn start(&mut self) {
    self.detection_enabled = self.supervisor.connect().is_some();
    if !self.detection_enabled {
      warn!("无法打开输入，等待重启命令");
    }
    self.sync_status();
  }

  /// 释放输入并清空短时状态，计数保留
  pub fn shutdown(&mut self) {
    self.supervisor.release();
    self.engine.reset_transient();
    self.tracker.reset();
    self.detection_enabled = false;
    self.sync_status();
    info!("处理循环结束，共处理 {} 帧", self.frames_processed);
  }

  /// 执行一轮：取帧并完整处理一帧
  pub fn step(&mut self) -> anyhow::Result<CycleStep> {
    let frame = match self.supervisor.read(self.cycle.drain_frames) {
      ReadOutcome::Frame(frame) => frame,
      ReadOutcome::Reconnected(backend) => {
        self.engine.reset_transient();
        self.tracker.reset();
        self.last_admitted = None;
        self.sync_status();
        thread::sleep(self.cycle.reconnect_backoff());
        return Ok(CycleStep::Reconnected(backend));
      }
      ReadOutcome::Exhausted => {
        error!("输入不可用，检测已停用，等待重启命令");
        self.detection_enabled = false;
        self.sync_status();
        thread::sleep(self.cycle.reconnect_backoff());
        return Ok(CycleStep::Exhausted);
      }
      ReadOutcome::Finished => {
        self.detection_enabled = false;
        self.sync_status();
        return Ok(CycleStep::Finished);
      }
    };

    let now = Instant::now();
    let interval = self.cycle.frame_interval();
    if let Some(last) = self.last_admitted {
      let elapsed = now.duration_since(last);
      if elapsed < interval {
        thread::sleep((interval - elapsed).min(THROTTLE_SLEEP));
        return Ok(CycleStep::Throttled);
      }
      let instant_fps = 1.0 / elapsed.as_secs_f32().max(1e-3);
      self.fps = if self.fps > 0.0 {
        0.9 * self.fps + 0.1 * instant_fps
      } else {
        instant_fps
      };
    }
    self.last_admitted = Some(now);

    let display = letterbox_resize(&frame, self.cycle.display_width);
    let detections = self
      .detector
      .detect(&display, self.engine.frame_index())
      .context("目标检测失败")?;
    let detections = filter_confidence(detections, self.cycle.confidence_floor);
    let tracked = self.tracker.update(detections);
    let outcome = self.engine.observe(&display, &tracked);

    let annotated = self
      .draw
      .render(&display, &outcome.annotations, &outcome.counts, self.fps);
    for event in &outcome.new_identities {
      if let Err(e) = self.artifacts.save(&display, &annotated, event) {
        warn!("保存物体 #{} 的截图失败: {}", event.identity_id, e);
      }
    }
    if let Some(output) = self.output.as_ref() {
      if let Err(e) = output.render_frame(&annotated) {
        warn!("输出画面失败: {}", e);
      }
    }

    self.state.publish_frame(annotated);
    self.state.publish_counts(outcome.counts.clone());
    self.frames_processed += 1;
    let frames_processed = self.frames_processed;
    self
      .state
      .update_status(|s| s.frames_processed = frames_processed);
    debug!(
      "第 {} 帧: {} 个跟踪目标，{} 个新物体",
      outcome.frame_index,
      tracked.len(),
      outcome.new_identities.len()
    );
    Ok(CycleStep::Processed(outcome))
  }

  /// 处理所有待执行的命令
  fn poll_commands(&mut self) -> Flow {
    loop {
      match self.commands.try_recv() {
        Ok(Command::Stop) => return Flow::Stop,
        Ok(Command::Restart) => self.restart(),
        Ok(Command::ResetCounts) => {
          info!("计数归零");
          self.engine.reset_counts();
          self.tracker.reset();
          self.state.publish_counts(self.engine.counts());
        }
        Ok(Command::ReloadCatalog(catalog)) => {
          info!("重新加载目录，共 {} 个品类", catalog.len());
          self.engine.rebuild_catalog(&catalog);
          self.state.publish_counts(self.engine.counts());
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Flow::Continue,
      }
    }
  }

  fn restart(&mut self) {
    info!("重启输入 {}", self.supervisor.locator());
    self.supervisor.release();
    self.engine.reset_transient();
    self.tracker.reset();
    self.last_admitted = None;
    self.detection_enabled = self.supervisor.connect().is_some();
    self.sync_status();
  }

  /// 按间隔检查时间表；暂停时保持输入连接
  fn poll_schedule(&mut self, now: Instant) {
    let due = self
      .last_schedule_check
      .is_none_or(|last| now.duration_since(last) >= self.cycle.schedule_interval());
    if !due {
      return;
    }
    self.last_schedule_check = Some(now);

    let allowed = detection_allowed(self.schedule.as_ref(), (self.clock)());
    if allowed == self.paused_by_schedule {
      if allowed {
        info!("进入时间表允许的时段，恢复检测");
      } else {
        info!("不在时间表允许的时段内，暂停检测");
      }
      self.paused_by_schedule = !allowed;
      self.sync_status();
    }
  }

  fn sync_status(&self) {
    let connected = self.supervisor.is_connected();
    let source_state = self.supervisor.state();
    let backend = self.supervisor.backend().map(|b| b.name());
    let detection_enabled = self.detection_enabled && !self.paused_by_schedule;
    let paused_by_schedule = self.paused_by_schedule;
    self.state.update_status(|s| {
      s.connected = connected;
      s.source_state = source_state;
      s.backend = backend;
      s.detection_enabled = detection_enabled;
      s.paused_by_schedule = paused_by_schedule;
    });
  }
}
