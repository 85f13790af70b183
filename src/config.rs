// 该文件是 Kansun （勘损） 项目的一部分。
// src/config.rs - 命令行参数配置
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

use std::time::Duration;

use clap::Args;

use crate::{
  gateway::GatewayConfig,
  postprocess::{PostProcessConfig, RateTable},
};

/// 推理调度参数
#[derive(Args, Debug, Clone)]
pub struct SchedulerArgs {
  /// 初始批量
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub batch_size: usize,

  /// 批量下限
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub min_batch_size: usize,

  /// 配额错误后的冷却时间（秒）
  #[arg(long, default_value = "15", value_name = "SECONDS")]
  pub cooldown_secs: u64,

  /// 退避随机抖动上限（毫秒）
  #[arg(long, default_value = "1000", value_name = "MILLIS")]
  pub max_jitter_ms: u64,

  /// 每个批次最多调用次数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub max_attempts: u32,
}

impl From<&SchedulerArgs> for GatewayConfig {
  fn from(args: &SchedulerArgs) -> Self {
    GatewayConfig {
      initial_batch_size: args.batch_size,
      min_batch_size: args.min_batch_size,
      cooldown: Duration::from_secs(args.cooldown_secs),
      max_jitter: Duration::from_millis(args.max_jitter_ms),
      max_attempts: args.max_attempts,
    }
  }
}

/// 后处理参数
#[derive(Args, Debug, Clone)]
pub struct PostProcessArgs {
  /// 已核实置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.9", value_name = "THRESHOLD")]
  pub verified_threshold: f64,

  /// 无参照物时每归一化单位的毫米数
  #[arg(long, default_value = "4.5", value_name = "MM")]
  pub heuristic_mm_per_unit: f64,

  /// 保留主体范围外的损伤并标记为 rejected
  #[arg(long)]
  pub retain_rejected: bool,

  /// 钣金工时费率
  #[arg(long, default_value = "95.0", value_name = "RATE")]
  pub labor_rate: f64,

  /// 喷漆工时费率
  #[arg(long, default_value = "85.0", value_name = "RATE")]
  pub refinish_rate: f64,
}

impl From<&PostProcessArgs> for PostProcessConfig {
  fn from(args: &PostProcessArgs) -> Self {
    PostProcessConfig {
      verified_threshold: args.verified_threshold.clamp(0.0, 1.0),
      heuristic_mm_per_unit: args.heuristic_mm_per_unit,
      retain_rejected: args.retain_rejected,
      rates: RateTable {
        labor_rate: args.labor_rate,
        refinish_rate: args.refinish_rate,
        ..RateTable::default()
      },
    }
  }
}
