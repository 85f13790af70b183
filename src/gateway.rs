// 该文件是 Kansun （勘损） 项目的一部分。
// src/gateway.rs - 推理服务网关
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

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  analysis::ImageAnalysis,
  model::{ImagePayload, InferenceResponse, Model, SchemaError},
  postprocess::PostProcessor,
};

mod batch_state;
mod observer;

pub use self::batch_state::{BatchState, GatewayConfig};
pub use self::observer::{CancelFlag, WaitObserver, WaitStatus};

/// 配额类错误的标记
const QUOTA_MARKERS: [&str; 3] = ["429", "resource_exhausted", "quota"];

/// 根据错误文本判断是否为配额类错误
pub fn is_quota_error(message: &str) -> bool {
  let message = message.to_ascii_lowercase();
  QUOTA_MARKERS.iter().any(|marker| message.contains(marker))
}

#[derive(Error, Debug)]
pub enum GatewayError {
  #[error("推理服务错误: {0}")]
  Provider(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("配额重试 {attempts} 次后仍失败，放弃 {batch_len} 张图像")]
  QuotaExhausted { attempts: u32, batch_len: usize },
  #[error("任务已取消")]
  Cancelled,
}

/// 因结构校验失败而跳过的图像
#[derive(Debug)]
pub struct SkippedImage {
  pub image_index: usize,
  pub reason: SchemaError,
}

/// 一个逻辑批次的结果
#[derive(Debug, Default)]
pub struct BatchOutcome {
  /// 本批实际提交的图像数
  pub consumed: usize,
  pub analyses: Vec<ImageAnalysis>,
  pub skipped: Vec<SkippedImage>,
}

/// 推理服务网关，每次运行创建一个实例
///
/// 调用严格串行，批量与退避状态只属于本实例。
pub struct InferenceGateway<'a, M, O> {
  model: &'a M,
  processor: PostProcessor,
  state: BatchState,
  observer: O,
  cancel: CancelFlag,
}

impl<'a, M: Model, O: WaitObserver> InferenceGateway<'a, M, O> {
  pub fn new(
    model: &'a M,
    config: &GatewayConfig,
    processor: PostProcessor,
    observer: O,
    cancel: CancelFlag,
  ) -> Self {
    InferenceGateway {
      model,
      processor,
      state: BatchState::new(config),
      observer,
      cancel,
    }
  }

  pub fn state(&self) -> &BatchState {
    &self.state
  }

  /// 提交从 `offset` 开始的剩余图像中的一批
  ///
  /// 配额错误时缩小批量、等待后从同一位置重试；其他错误立即返回。
  pub async fn submit_batch(
    &mut self,
    offset: usize,
    remaining: &[ImagePayload],
  ) -> Result<BatchOutcome, GatewayError> {
    if remaining.is_empty() {
      return Ok(BatchOutcome::default());
    }

    self.state.begin_batch();
    loop {
      if self.cancel.is_cancelled() {
        warn!("提交前检测到取消信号，停止批次 {}", offset);
        return Err(GatewayError::Cancelled);
      }

      let size = self.state.current_size().min(remaining.len());
      let batch = &remaining[..size];
      info!(
        "提交图像 {}..{}（批量 {}，第 {} 次尝试）",
        offset,
        offset + size,
        size,
        self.state.attempts() + 1
      );

      let error = match self.model.infer(batch).await {
        Ok(items) => {
          self.observer.notify_wait(0);
          return Ok(self.process_items(offset, batch, items));
        }
        Err(error) => error,
      };

      let message = error.to_string();
      if self.model.is_malformed(&error) {
        self.observer.notify_wait(0);
        error!("图像 {}..{} 的响应体无法解析，跳过本批: {}", offset, offset + size, message);
        return Ok(self.skip_batch(offset, size, &message));
      }
      if !is_quota_error(&message) {
        error!("推理服务返回不可重试错误: {}", message);
        return Err(GatewayError::Provider(Box::new(error)));
      }

      if !self.state.record_failure() {
        error!(
          "批次 {} 已尝试 {} 次，放弃",
          offset,
          self.state.attempts()
        );
        return Err(GatewayError::QuotaExhausted {
          attempts: self.state.attempts(),
          batch_len: size,
        });
      }

      let new_size = self.state.shrink();
      let wait = self.state.backoff();
      let seconds = wait.as_millis().div_ceil(1000) as u64;
      warn!(
        "触发配额限制: {}，批量缩小为 {}，等待 {:.2?}",
        message, new_size, wait
      );

      if self.cancel.is_cancelled() {
        warn!("退避前检测到取消信号，停止批次 {}", offset);
        return Err(GatewayError::Cancelled);
      }
      self.observer.notify_wait(seconds);
      tokio::time::sleep(wait).await;
    }
  }

  fn skip_batch(&self, offset: usize, size: usize, message: &str) -> BatchOutcome {
    BatchOutcome {
      consumed: size,
      analyses: Vec::new(),
      skipped: (offset..offset + size)
        .map(|image_index| SkippedImage {
          image_index,
          reason: SchemaError::Envelope(message.to_string()),
        })
        .collect(),
    }
  }

  fn process_items(
    &self,
    offset: usize,
    batch: &[ImagePayload],
    items: Vec<serde_json::Value>,
  ) -> BatchOutcome {
    if items.len() != batch.len() {
      warn!(
        "推理服务返回 {} 项结果，提交了 {} 张图像",
        items.len(),
        batch.len()
      );
    }

    let mut outcome = BatchOutcome {
      consumed: batch.len(),
      ..Default::default()
    };
    let mut items = items.into_iter();

    for (position, image) in batch.iter().enumerate() {
      let image_index = offset + position;
      let parsed = items
        .next()
        .ok_or(SchemaError::Missing)
        .and_then(InferenceResponse::parse);

      match parsed {
        Ok(response) => {
          let analysis = self.processor.process(image_index, &image.name, response);
          debug!(
            "图像 {}（{}）得到 {} 个损伤",
            image_index,
            image.name,
            analysis.detected_issues.len()
          );
          outcome.analyses.push(analysis);
        }
        Err(reason) => {
          error!("图像 {}（{}）结果无效，跳过: {}", image_index, image.name, reason);
          outcome.skipped.push(SkippedImage {
            image_index,
            reason,
          });
        }
      }
    }

    outcome
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{cell::RefCell, collections::VecDeque, time::Duration};

  use serde_json::json;

  #[derive(Error, Debug)]
  #[error("{0}")]
  struct FakeError(String);

  /// 按脚本返回结果，并记录每次提交的批量
  struct ScriptedModel {
    script: RefCell<VecDeque<Result<(), String>>>,
    calls: RefCell<Vec<usize>>,
  }

  impl ScriptedModel {
    fn new(script: Vec<Result<(), &str>>) -> Self {
      ScriptedModel {
        script: RefCell::new(
          script
            .into_iter()
            .map(|step| step.map_err(str::to_string))
            .collect(),
        ),
        calls: RefCell::new(Vec::new()),
      }
    }
  }

  impl Model for ScriptedModel {
    type Error = FakeError;

    async fn infer(&self, batch: &[ImagePayload]) -> Result<Vec<serde_json::Value>, FakeError> {
      self.calls.borrow_mut().push(batch.len());
      let step = self.script.borrow_mut().pop_front().unwrap_or(Ok(()));
      step.map_err(FakeError)?;
      Ok(
        batch
          .iter()
          .map(|_| json!({ "vehicleHull": [], "issues": [] }))
          .collect(),
      )
    }

    fn is_malformed(&self, error: &FakeError) -> bool {
      error.0.starts_with("malformed")
    }
  }

  fn images(n: usize) -> Vec<ImagePayload> {
    (0..n)
      .map(|i| ImagePayload {
        name: format!("{i}.jpg"),
        mime_type: "image/jpeg".to_string(),
        data: vec![0xff, 0xd8],
      })
      .collect()
  }

  fn config(initial: usize, min: usize, attempts: u32) -> GatewayConfig {
    GatewayConfig {
      initial_batch_size: initial,
      min_batch_size: min,
      cooldown: Duration::from_secs(10),
      max_jitter: Duration::ZERO,
      max_attempts: attempts,
    }
  }

  #[test]
  fn quota_markers_are_recognized() {
    assert!(is_quota_error("HTTP 429 Too Many Requests"));
    assert!(is_quota_error("status: RESOURCE_EXHAUSTED"));
    assert!(is_quota_error("Quota exceeded for project"));
    assert!(!is_quota_error("HTTP 500 internal error"));
    assert!(!is_quota_error("invalid api key"));
  }

  #[tokio::test(start_paused = true)]
  async fn success_reports_zero_wait() {
    let model = ScriptedModel::new(vec![Ok(())]);
    let waits = RefCell::new(Vec::new());
    let mut gateway = InferenceGateway::new(
      &model,
      &config(4, 1, 3),
      PostProcessor::default(),
      |seconds: u64| waits.borrow_mut().push(seconds),
      CancelFlag::new(),
    );

    let outcome = gateway.submit_batch(0, &images(6)).await.unwrap();
    assert_eq!(outcome.consumed, 4);
    assert_eq!(outcome.analyses.len(), 4);
    assert_eq!(outcome.analyses[3].image_index, 3);
    drop(gateway);
    assert_eq!(*waits.borrow(), vec![0]);
  }

  #[tokio::test(start_paused = true)]
  async fn quota_errors_shrink_and_retry_same_offset() {
    let model = ScriptedModel::new(vec![
      Err("429 Too Many Requests"),
      Err("RESOURCE_EXHAUSTED"),
      Ok(()),
    ]);
    let waits = RefCell::new(Vec::new());
    let mut gateway = InferenceGateway::new(
      &model,
      &config(8, 1, 5),
      PostProcessor::default(),
      |seconds: u64| waits.borrow_mut().push(seconds),
      CancelFlag::new(),
    );

    let outcome = gateway.submit_batch(10, &images(8)).await.unwrap();
    assert_eq!(*model.calls.borrow(), vec![8, 4, 2]);
    assert_eq!(outcome.consumed, 2);
    assert_eq!(outcome.analyses[0].image_index, 10);
    assert_eq!(gateway.state().current_size(), 2);
    drop(gateway);
    assert_eq!(*waits.borrow(), vec![10, 10, 0]);
  }

  #[tokio::test(start_paused = true)]
  async fn floor_holds_under_repeated_quota_errors() {
    let model = ScriptedModel::new(vec![Err("quota"); 5]);
    let mut gateway = InferenceGateway::new(
      &model,
      &config(4, 2, 6),
      PostProcessor::default(),
      (),
      CancelFlag::new(),
    );

    let outcome = gateway.submit_batch(0, &images(4)).await.unwrap();
    assert_eq!(*model.calls.borrow(), vec![4, 2, 2, 2, 2, 2]);
    assert_eq!(outcome.consumed, 2);
    assert_eq!(gateway.state().current_size(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn exhausting_attempts_is_terminal_for_the_batch() {
    let model = ScriptedModel::new(vec![Err("429"); 3]);
    let mut gateway = InferenceGateway::new(
      &model,
      &config(8, 1, 3),
      PostProcessor::default(),
      (),
      CancelFlag::new(),
    );

    let result = gateway.submit_batch(0, &images(8)).await;
    assert!(matches!(
      result,
      Err(GatewayError::QuotaExhausted {
        attempts: 3,
        batch_len: 2
      })
    ));
    assert_eq!(*model.calls.borrow(), vec![8, 4, 2]);
  }

  #[tokio::test(start_paused = true)]
  async fn other_errors_propagate_without_retry() {
    let model = ScriptedModel::new(vec![Err("401 unauthorized")]);
    let mut gateway = InferenceGateway::new(
      &model,
      &config(4, 1, 5),
      PostProcessor::default(),
      (),
      CancelFlag::new(),
    );

    let result = gateway.submit_batch(0, &images(3)).await;
    assert!(matches!(result, Err(GatewayError::Provider(_))));
    assert_eq!(*model.calls.borrow(), vec![3]);
    assert_eq!(gateway.state().current_size(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_is_checked_before_submission() {
    let model = ScriptedModel::new(vec![]);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut gateway = InferenceGateway::new(
      &model,
      &config(4, 1, 5),
      PostProcessor::default(),
      (),
      cancel,
    );

    let result = gateway.submit_batch(0, &images(3)).await;
    assert!(matches!(result, Err(GatewayError::Cancelled)));
    assert!(model.calls.borrow().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn malformed_items_are_skipped_individually() {
    struct HalfBroken;

    impl Model for HalfBroken {
      type Error = FakeError;

      async fn infer(&self, _batch: &[ImagePayload]) -> Result<Vec<serde_json::Value>, FakeError> {
        Ok(vec![
          json!({ "vehicleHull": [], "issues": [] }),
          json!({ "issues": "not a list" }),
        ])
      }
    }

    let model = HalfBroken;
    let mut gateway = InferenceGateway::new(
      &model,
      &config(3, 1, 2),
      PostProcessor::default(),
      (),
      CancelFlag::new(),
    );

    let outcome = gateway.submit_batch(5, &images(3)).await.unwrap();
    assert_eq!(outcome.consumed, 3);
    assert_eq!(outcome.analyses.len(), 1);
    assert_eq!(outcome.analyses[0].image_index, 5);
    let skipped: Vec<_> = outcome.skipped.iter().map(|s| s.image_index).collect();
    assert_eq!(skipped, vec![6, 7]);
    assert!(matches!(outcome.skipped[1].reason, SchemaError::Missing));
  }

  #[tokio::test(start_paused = true)]
  async fn malformed_envelope_skips_the_batch_without_retry() {
    let model = ScriptedModel::new(vec![Err("malformed: missing results array"), Ok(())]);
    let waits = RefCell::new(Vec::new());
    let mut gateway = InferenceGateway::new(
      &model,
      &config(2, 1, 3),
      PostProcessor::default(),
      |seconds: u64| waits.borrow_mut().push(seconds),
      CancelFlag::new(),
    );
    let all = images(3);

    let first = gateway.submit_batch(0, &all).await.unwrap();
    assert_eq!(first.consumed, 2);
    assert!(first.analyses.is_empty());
    let skipped: Vec<_> = first.skipped.iter().map(|s| s.image_index).collect();
    assert_eq!(skipped, vec![0, 1]);
    assert!(matches!(first.skipped[0].reason, SchemaError::Envelope(_)));

    let second = gateway.submit_batch(2, &all[2..]).await.unwrap();
    assert_eq!(second.analyses.len(), 1);
    assert_eq!(second.analyses[0].image_index, 2);
    assert_eq!(*model.calls.borrow(), vec![2, 1]);
    assert_eq!(gateway.state().current_size(), 2);
    drop(gateway);
    assert_eq!(*waits.borrow(), vec![0, 0]);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_is_checked_before_backoff() {
    let model = ScriptedModel::new(vec![Err("429 Too Many Requests"), Ok(())]);
    let cancel = CancelFlag::new();
    let status = WaitStatus::new();

    struct CancelOnInfer<'m> {
      inner: &'m ScriptedModel,
      cancel: CancelFlag,
    }

    impl Model for CancelOnInfer<'_> {
      type Error = FakeError;

      async fn infer(&self, batch: &[ImagePayload]) -> Result<Vec<serde_json::Value>, FakeError> {
        self.cancel.cancel();
        self.inner.infer(batch).await
      }
    }

    let wrapped = CancelOnInfer {
      inner: &model,
      cancel: cancel.clone(),
    };
    let mut gateway = InferenceGateway::new(
      &wrapped,
      &config(4, 1, 5),
      PostProcessor::default(),
      status.clone(),
      cancel,
    );

    let result = gateway.submit_batch(0, &images(4)).await;
    assert!(matches!(result, Err(GatewayError::Cancelled)));
    assert_eq!(*model.calls.borrow(), vec![4]);
    assert_eq!(status.seconds(), 0);
  }
}
