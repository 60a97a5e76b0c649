// 该文件是 Jishu （计数） 项目的一部分。
// src/bin/build_prototypes.rs - 构建原型库并检查品类间的相似度
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use jishu::{
  catalog::Catalog, config::EngineConfig, embedding::ColorHistogramEmbedder,
  prototype::PrototypeStore,
};

/// 原型库检查参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 品类目录：菜单 JSON 文件或参考图目录
  #[arg(long, value_name = "CATALOG")]
  pub catalog: PathBuf,
  /// 菜单 JSON 中参考图的根目录
  #[arg(long, value_name = "DIR")]
  pub upload_dir: Option<PathBuf>,
  /// JSON 配置文件，用于读取相似度阈值
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
  categories: Vec<String>,
  missing: Vec<String>,
  similarity: Vec<Vec<f32>>,
  /// 相似度高于全局阈值的品类对，容易互相误认
  confusable: Vec<(String, String, f32)>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = EngineConfig::load(args.config.as_deref()).context("读取配置失败")?;
  let catalog = match args.upload_dir.as_deref() {
    Some(upload_dir) if args.catalog.is_file() => {
      Catalog::from_json(&args.catalog, Some(upload_dir))
    }
    _ => Catalog::load(&args.catalog),
  }
  .context("读取品类目录失败")?;

  let store = PrototypeStore::rebuild(&catalog, &ColorHistogramEmbedder);
  info!("原型库: {} / {} 个品类", store.len(), catalog.len());

  let missing: Vec<String> = catalog
    .names()
    .filter(|name| store.get(name).is_none())
    .map(str::to_string)
    .collect();
  for name in &missing {
    warn!("品类 {} 没有可用的原型", name);
  }

  let prototypes: Vec<_> = store.iter().collect();
  let similarity: Vec<Vec<f32>> = prototypes
    .iter()
    .map(|(_, a)| prototypes.iter().map(|(_, b)| a.cosine(b)).collect())
    .collect();

  let threshold = config.matcher.sim_threshold;
  let mut confusable = Vec::new();
  for (i, (name_a, _)) in prototypes.iter().enumerate() {
    for (j, (name_b, _)) in prototypes.iter().enumerate().skip(i + 1) {
      let sim = similarity[i][j];
      if sim >= threshold {
        warn!("{} 与 {} 相似度 {:.3}，不低于阈值 {:.2}", name_a, name_b, sim, threshold);
        confusable.push((name_a.to_string(), name_b.to_string(), sim));
      }
    }
  }

  let report = Report {
    categories: prototypes.iter().map(|(name, _)| name.to_string()).collect(),
    missing,
    similarity,
    confusable,
  };
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}
