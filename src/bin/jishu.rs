// 该文件是 Jishu （计数） 项目的一部分。
// src/bin/jishu.rs - 计数主程序
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

use std::{path::PathBuf, sync::mpsc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use jishu::{
  FromUrl,
  catalog::Catalog,
  config::EngineConfig,
  detect::{IouTracker, ReplayDetector},
  embedding::ColorHistogramEmbedder,
  engine::Engine,
  input::{Backend, DefaultOpener, SourceLocator},
  ledger::CountLedger,
  output::{DirectoryArtifactSink, OutputWrapper, draw::Draw},
  state::SharedState,
  supervisor::FrameSourceSupervisor,
  task::{Command, ProcessingCycle},
};

/// Jishu 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入：摄像头序号、RTSP/HTTP 地址、视频文件或图像目录
  #[arg(long, value_name = "SOURCE")]
  pub source: SourceLocator,
  /// 按顺序尝试的后端，可重复；缺省按输入类型选择
  #[arg(long = "backend", value_name = "BACKEND")]
  pub backends: Vec<Backend>,
  /// 品类目录：菜单 JSON 文件或参考图目录
  #[arg(long, value_name = "CATALOG")]
  pub catalog: PathBuf,
  /// 菜单 JSON 中参考图的根目录
  #[arg(long, value_name = "DIR")]
  pub upload_dir: Option<PathBuf>,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 录制的检测结果（JSON Lines）
  #[arg(long, value_name = "JSONL")]
  pub detections: PathBuf,
  /// 新物体截图保存目录
  #[arg(long, value_name = "DIR")]
  pub artifacts: Option<PathBuf>,
  /// 标注文字使用的 TTF 字体
  #[arg(long, value_name = "TTF")]
  pub font: Option<PathBuf>,
  /// 标注画面推流地址，如 rtp://127.0.0.1:5000?fps=10
  #[arg(long, value_name = "URL")]
  pub stream: Option<Url>,
  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("输入来源: {}", args.source);
  info!("品类目录: {}", args.catalog.display());

  let config = EngineConfig::load(args.config.as_deref()).context("读取配置失败")?;
  let catalog = match args.upload_dir.as_deref() {
    Some(upload_dir) if args.catalog.is_file() => {
      Catalog::from_json(&args.catalog, Some(upload_dir))
    }
    _ => Catalog::load(&args.catalog),
  }
  .context("读取品类目录失败")?;
  info!("共 {} 个品类", catalog.len());

  let ledger = CountLedger::new(catalog.names()).into_shared();
  let state = SharedState::new(ledger.clone());
  let mut engine = Engine::new(
    ColorHistogramEmbedder,
    config.matcher.clone(),
    config.tracking.clone(),
    ledger,
  );
  engine.rebuild_catalog(&catalog);

  let supervisor = FrameSourceSupervisor::new(
    DefaultOpener,
    args.source,
    args.backends,
    config.capture.clone(),
  );
  let detector = ReplayDetector::open(&args.detections).context("读取检测记录失败")?;

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(Command::Stop);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理")?;

  let mut cycle = ProcessingCycle::new(
    supervisor,
    detector,
    IouTracker::default(),
    engine,
    state,
    &config,
    rx,
  )
  .with_max_frames(args.max_frames);

  if let Some(font) = args.font.as_deref() {
    cycle = cycle.with_draw(Draw::with_font_file(font).context("读取字体失败")?);
  }
  if let Some(dir) = args.artifacts {
    info!("截图保存到 {}", dir.display());
    cycle = cycle.with_artifacts(DirectoryArtifactSink::new(dir));
  }
  if let Some(url) = args.stream.as_ref() {
    cycle = cycle.with_output(OutputWrapper::from_url(url).context("创建推流输出失败")?);
  }

  let summary = cycle.run()?;
  info!("共处理 {} 帧，计数合计 {}", summary.frames_processed, summary.counts.total());
  println!("{}", serde_json::to_string_pretty(&summary.counts)?);

  Ok(())
}
