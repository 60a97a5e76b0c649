// 该文件是 Jishu （计数） 项目的一部分。
// tests/engine_test.rs - 以内置特征提取器端到端测试身份与计数
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

mod common;

use common::{BLUE, RED, color_catalog, scene};
use image::RgbImage;
use jishu::{
  catalog::Catalog,
  config::TrackingConfig,
  detect::{Detection, TrackedDetection},
  embedding::ColorHistogramEmbedder,
  engine::{AnnotationStyle, Engine, FrameOutcome},
  geometry::BBox,
  ledger::CountLedger,
  matcher::MatcherConfig,
};

const W: u32 = 320;
const H: u32 = 240;

fn engine(catalog: &Catalog) -> Engine<ColorHistogramEmbedder> {
  let mut engine = Engine::new(
    ColorHistogramEmbedder,
    MatcherConfig::default(),
    TrackingConfig::default(),
    CountLedger::default().into_shared(),
  );
  engine.rebuild_catalog(catalog);
  engine
}

fn tracked(track_id: i64, bbox: BBox) -> TrackedDetection {
  TrackedDetection::new(track_id, Detection::new(bbox, 0.9))
}

/// 画出方块并以同样的框作为检测送入引擎
fn observe(
  engine: &mut Engine<ColorHistogramEmbedder>,
  items: &[(i64, BBox, image::Rgb<u8>)],
) -> FrameOutcome {
  let frame: RgbImage = scene(
    W,
    H,
    &items.iter().map(|(_, b, c)| (*b, *c)).collect::<Vec<_>>(),
  );
  let detections: Vec<_> = items.iter().map(|(id, b, _)| tracked(*id, *b)).collect();
  engine.observe(&frame, &detections)
}

#[test]
fn each_physical_item_is_counted_once() {
  let dir = tempfile::tempdir().unwrap();
  let catalog = color_catalog(dir.path(), &[("Tea", RED), ("Water Bottle", BLUE)]);
  let mut engine = engine(&catalog);
  let cup = BBox::new(100.0, 80.0, 160.0, 140.0);

  let first = observe(&mut engine, &[(1, cup, RED)]);
  assert_eq!(first.annotations[0].style, AnnotationStyle::Pending);
  assert_eq!(first.counts.get("Tea"), Some(0));

  let second = observe(&mut engine, &[(1, cup, RED)]);
  assert_eq!(second.new_identities.len(), 1);
  assert_eq!(second.new_identities[0].label, "Tea");
  assert!(second.new_identities[0].similarity > 0.99);
  assert_eq!(second.counts.get("Tea"), Some(1));

  observe(&mut engine, &[(1, cup, RED)]);
  // 遮挡一帧后以新的轨迹编号重新出现
  observe(&mut engine, &[]);
  let moved = BBox::new(102.0, 82.0, 162.0, 142.0);
  observe(&mut engine, &[(7, moved, RED)]);
  let relocked = observe(&mut engine, &[(7, moved, RED)]);
  assert!(relocked.new_identities.is_empty());
  assert_eq!(relocked.annotations[0].identity_id, Some(1));
  assert_eq!(relocked.counts.get("Tea"), Some(1));

  let bottle = BBox::new(200.0, 60.0, 260.0, 120.0);
  observe(&mut engine, &[(7, moved, RED), (8, bottle, BLUE)]);
  let last = observe(&mut engine, &[(7, moved, RED), (8, bottle, BLUE)]);
  assert_eq!(last.new_identities.len(), 1);
  assert_eq!(last.new_identities[0].identity_id, 2);

  let counts: Vec<_> = last.counts.iter().collect();
  assert_eq!(counts, vec![("Tea", 1), ("Water Bottle", 1)]);
}

#[test]
fn catalog_rebuild_zeroes_counts_of_untouched_categories() {
  let dir = tempfile::tempdir().unwrap();
  let catalog = color_catalog(dir.path(), &[("Tea", RED), ("Water Bottle", BLUE)]);
  let mut engine = engine(&catalog);
  let cup = BBox::new(100.0, 80.0, 160.0, 140.0);
  observe(&mut engine, &[(1, cup, RED)]);
  observe(&mut engine, &[(1, cup, RED)]);
  assert_eq!(engine.counts().get("Tea"), Some(1));

  // 目录内容不变，计数仍全部归零
  engine.rebuild_catalog(&catalog);
  assert_eq!(engine.counts().get("Tea"), Some(0));
  assert_eq!(engine.counts().get("Water Bottle"), Some(0));
}

#[test]
fn unreadable_reference_keeps_category_without_prototype() {
  let dir = tempfile::tempdir().unwrap();
  let good = color_catalog(dir.path(), &[("Tea", RED)]);
  let broken = dir.path().join("ghost.png");
  std::fs::write(&broken, b"not an image").unwrap();
  let catalog = good.with_entry("Ghost", broken);

  let engine = engine(&catalog);
  assert_eq!(engine.prototypes().len(), 1);
  assert!(engine.prototypes().get("Ghost").is_none());
  let snapshot = engine.counts();
  let counts: Vec<_> = snapshot.iter().collect();
  assert_eq!(counts, vec![("Tea", 0), ("Ghost", 0)]);
}

#[test]
fn transient_reset_keeps_counts_and_ids_keep_growing() {
  let dir = tempfile::tempdir().unwrap();
  let catalog = color_catalog(dir.path(), &[("Tea", RED)]);
  let mut engine = engine(&catalog);
  let cup = BBox::new(100.0, 80.0, 160.0, 140.0);
  observe(&mut engine, &[(1, cup, RED)]);
  observe(&mut engine, &[(1, cup, RED)]);

  engine.reset_transient();
  assert!(engine.registry().is_empty());
  assert_eq!(engine.counts().get("Tea"), Some(1));

  observe(&mut engine, &[(1, cup, RED)]);
  let outcome = observe(&mut engine, &[(1, cup, RED)]);
  assert_eq!(outcome.new_identities[0].identity_id, 2);
  assert_eq!(outcome.counts.get("Tea"), Some(2));
}

#[test]
fn empty_catalog_never_counts() {
  let mut engine = engine(&Catalog::new());
  let cup = BBox::new(100.0, 80.0, 160.0, 140.0);
  for _ in 0..4 {
    let outcome = observe(&mut engine, &[(1, cup, RED)]);
    assert_eq!(outcome.annotations[0].style, AnnotationStyle::Pending);
    assert!(outcome.new_identities.is_empty());
  }
  assert!(engine.counts().is_empty());
}
