// 该文件是 Kansun （勘损） 项目的一部分。
// src/gateway/observer.rs - 等待通知与取消信号
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
  atomic::{AtomicBool, AtomicU64, Ordering},
};

/// 接收网关的等待通知
///
/// 每次退避前报告计划等待的秒数，调用成功后报告 0。
pub trait WaitObserver {
  fn notify_wait(&self, seconds: u64);
}

impl WaitObserver for () {
  fn notify_wait(&self, _seconds: u64) {}
}

impl<F: Fn(u64)> WaitObserver for F {
  fn notify_wait(&self, seconds: u64) {
    self(seconds)
  }
}

/// 可轮询的等待状态
#[derive(Debug, Clone, Default)]
pub struct WaitStatus {
  seconds: Arc<AtomicU64>,
}

impl WaitStatus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seconds(&self) -> u64 {
    self.seconds.load(Ordering::Relaxed)
  }
}

impl WaitObserver for WaitStatus {
  fn notify_wait(&self, seconds: u64) {
    self.seconds.store(seconds, Ordering::Relaxed);
  }
}

/// 取消信号，在每次提交与每次退避前检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
  cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}
