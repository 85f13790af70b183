// 该文件是 Kansun （勘损） 项目的一部分。
// src/gateway/batch_state.rs - 自适应批量与退避状态
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

use rand::Rng;

const DEFAULT_INITIAL_BATCH_SIZE: usize = 4;
const DEFAULT_MIN_BATCH_SIZE: usize = 1;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15);
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
  pub initial_batch_size: usize,
  pub min_batch_size: usize,
  pub cooldown: Duration,
  pub max_jitter: Duration,
  /// 每个逻辑批次最多调用次数
  pub max_attempts: u32,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    GatewayConfig {
      initial_batch_size: DEFAULT_INITIAL_BATCH_SIZE,
      min_batch_size: DEFAULT_MIN_BATCH_SIZE,
      cooldown: DEFAULT_COOLDOWN,
      max_jitter: DEFAULT_MAX_JITTER,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
    }
  }
}

/// 单次运行内的批量状态
///
/// 批量只会缩小，不会在运行中自动恢复。
#[derive(Debug, Clone)]
pub struct BatchState {
  current_size: usize,
  min_size: usize,
  cooldown: Duration,
  max_jitter: Duration,
  max_attempts: u32,
  attempts: u32,
}

impl BatchState {
  pub fn new(config: &GatewayConfig) -> Self {
    let min_size = config.min_batch_size.max(1);
    BatchState {
      current_size: config.initial_batch_size.max(min_size),
      min_size,
      cooldown: config.cooldown,
      max_jitter: config.max_jitter,
      max_attempts: config.max_attempts.max(1),
      attempts: 0,
    }
  }

  pub fn current_size(&self) -> usize {
    self.current_size
  }

  pub fn min_size(&self) -> usize {
    self.min_size
  }

  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// 开始一个新的逻辑批次，批量保持不变
  pub fn begin_batch(&mut self) {
    self.attempts = 0;
  }

  /// 记录一次失败调用，返回是否还可以重试
  pub fn record_failure(&mut self) -> bool {
    self.attempts += 1;
    self.attempts < self.max_attempts
  }

  /// 批量减半，不低于下限
  pub fn shrink(&mut self) -> usize {
    self.current_size = (self.current_size / 2).max(self.min_size);
    self.current_size
  }

  /// 冷却时间加随机抖动
  pub fn backoff(&self) -> Duration {
    let max_jitter_ms = self.max_jitter.as_millis() as u64;
    let jitter_ms = if max_jitter_ms == 0 {
      0
    } else {
      rand::thread_rng().gen_range(0..=max_jitter_ms)
    };
    self.cooldown + Duration::from_millis(jitter_ms)
  }
}
