// 该文件是 Kansun （勘损） 项目的一部分。
// src/bin/benchmark_fixture.rs - 基准评估命令
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
use tracing::info;

use kansun::{
  analysis::ImageAnalysis,
  benchmark::{BenchmarkEvaluator, embedded_ground_truth, load_ground_truth},
  geometry::IouMode,
};

/// 将已保存的分析结果与标注集对比
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// `analyses.json` 文件 (ImageAnalysis 数组)
  #[arg(long, value_name = "FILE")]
  pub analyses: PathBuf,
  /// 自定义标注集，缺省使用内置标注集
  #[arg(long, value_name = "FILE")]
  pub ground_truth: Option<PathBuf>,
  #[arg(long, default_value = "unknown")]
  pub model_version: String,
  #[arg(long)]
  pub exact_iou: bool,
  /// 报告写入位置，缺省打印到标准输出
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let text = std::fs::read_to_string(&args.analyses)
    .with_context(|| format!("无法读取 {}", args.analyses.display()))?;
  let analyses: Vec<ImageAnalysis> = serde_json::from_str(&text)?;
  info!("读取 {} 条图像分析", analyses.len());

  let custom;
  let truths = match &args.ground_truth {
    Some(path) => {
      custom = load_ground_truth(&std::fs::read_to_string(path)?)?;
      custom.as_slice()
    }
    None => embedded_ground_truth()?,
  };

  let mode = if args.exact_iou {
    IouMode::ExactPolygon
  } else {
    IouMode::BoundingBox
  };
  let report = BenchmarkEvaluator::new()
    .with_mode(mode)
    .evaluate(&analyses, truths, &args.model_version);

  let overall = &report.overall;
  info!(
    "P {:.3}, R {:.3}, F1 {:.3}, IoU {:.3}, 尺寸误差 {:.1}%",
    overall.precision, overall.recall, overall.f1, overall.mean_iou, overall.dimension_error_percent
  );

  let json = serde_json::to_string_pretty(&report)?;
  match &args.report {
    Some(path) => {
      std::fs::write(path, json)?;
      info!("报告已写入 {}", path.display());
    }
    None => println!("{json}"),
  }
  Ok(())
}
