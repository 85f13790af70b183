// 该文件是 Kansun （勘损） 项目的一部分。
// src/bin/audit_case.rs - 案件审核命令
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

use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use kansun::{
  FromUrl,
  benchmark::{BenchmarkEvaluator, embedded_ground_truth},
  config::{PostProcessArgs, SchedulerArgs},
  gateway::CancelFlag,
  geometry::IouMode,
  input::InputWrapper,
  model::HttpVisionBuilder,
  output::{OutputWrapper, Render},
  task::AuditTask,
};

/// Kansun 案件审核
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务地址 (http/https)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 推理服务密钥
  #[arg(long, env = "KANSUN_API_KEY", hide_env_values = true)]
  pub api_key: Option<String>,
  /// 输入来源 (image:// 或 folder://)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出位置 (json://, folder:// 或 log:)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 写入基准报告的模型版本标识
  #[arg(long, default_value = "unknown")]
  pub model_version: String,
  /// 与内置标注集对比
  #[arg(long)]
  pub benchmark: bool,
  /// 基准评估使用精确多边形 IoU
  #[arg(long)]
  pub exact_iou: bool,

  #[command(flatten)]
  pub scheduler: SchedulerArgs,
  #[command(flatten)]
  pub postprocess: PostProcessArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("推理服务: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出位置: {}", args.output);

  let images = InputWrapper::from_url(&args.input)?.into_payloads();
  let model = HttpVisionBuilder::from_url(&args.model)?
    .api_key(args.api_key.clone())
    .build()?;
  let output = OutputWrapper::from_url(&args.output)?;

  let cancel = CancelFlag::new();
  let handle = cancel.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，完成当前批次后停止...");
    handle.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法注册中断处理")?;

  let mut task = AuditTask::new((&args.scheduler).into(), (&args.postprocess).into())
    .with_cancel(cancel);
  if args.benchmark {
    let mode = if args.exact_iou {
      IouMode::ExactPolygon
    } else {
      IouMode::BoundingBox
    };
    task = task.with_benchmark(
      embedded_ground_truth()?,
      &args.model_version,
      BenchmarkEvaluator::new().with_mode(mode),
    );
  }

  let observer = |seconds: u64| {
    if seconds > 0 {
      warn!("推理服务配额受限，等待 {} 秒后重试", seconds);
    }
  };

  info!("开始审核 {} 张图像...", images.len());
  let now = std::time::Instant::now();
  let report = task.run(&model, &images, observer).await?;
  info!("审核结束 ({:?})，耗时: {:.2?}", report.status, now.elapsed());

  output.render_result(&report)?;
  Ok(())
}
