// 该文件是 Kansun （勘损） 项目的一部分。
// src/task.rs - 案件审核任务
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  analysis::ImageAnalysis,
  benchmark::{BenchmarkEvaluator, BenchmarkReport, GroundTruthSet},
  consolidate::{CaseSummary, Consolidator, ExactKeyMatcher, KeyMatcher},
  gateway::{CancelFlag, GatewayConfig, GatewayError, InferenceGateway, WaitObserver},
  model::{ImagePayload, Model},
  postprocess::{PostProcessConfig, PostProcessor},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("没有输入图像")]
  NoInput,
  #[error("没有任何图像处理成功")]
  NothingProcessed,
  #[error("推理服务错误，未处理任何图像: {0}")]
  Provider(#[source] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
  /// 全部图像均已处理
  Completed,
  /// 部分批次失败或部分结果无效
  Partial,
  /// 推理服务返回不可重试错误，后续图像未提交
  Aborted,
  Cancelled,
}

/// 一次审核运行的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
  pub status: RunStatus,
  pub total_images: usize,
  pub analyses: Vec<ImageAnalysis>,
  /// 配额重试耗尽而放弃的图像
  pub failed_images: Vec<usize>,
  /// 结果结构无效而跳过的图像
  pub skipped_images: Vec<usize>,
  pub summary: CaseSummary,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub benchmark: Option<BenchmarkReport>,
}

/// 审核任务：逐批推理、合并，并可选地与标注集对比
pub struct AuditTask<'t, K = ExactKeyMatcher> {
  gateway: GatewayConfig,
  postprocess: PostProcessConfig,
  consolidator: Consolidator<K>,
  benchmark: Option<(&'t [GroundTruthSet], String)>,
  evaluator: BenchmarkEvaluator,
  cancel: CancelFlag,
}

impl<'t> AuditTask<'t, ExactKeyMatcher> {
  pub fn new(gateway: GatewayConfig, postprocess: PostProcessConfig) -> Self {
    AuditTask {
      gateway,
      postprocess,
      consolidator: Consolidator::new(),
      benchmark: None,
      evaluator: BenchmarkEvaluator::new(),
      cancel: CancelFlag::new(),
    }
  }
}

impl<'t, K: KeyMatcher> AuditTask<'t, K> {
  pub fn with_matcher<N: KeyMatcher>(self, matcher: N) -> AuditTask<'t, N> {
    AuditTask {
      gateway: self.gateway,
      postprocess: self.postprocess,
      consolidator: Consolidator::with_matcher(matcher),
      benchmark: self.benchmark,
      evaluator: self.evaluator,
      cancel: self.cancel,
    }
  }

  pub fn with_benchmark(
    mut self,
    truths: &'t [GroundTruthSet],
    model_version: &str,
    evaluator: BenchmarkEvaluator,
  ) -> Self {
    self.benchmark = Some((truths, model_version.to_string()));
    self.evaluator = evaluator;
    self
  }

  pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub async fn run<M: Model, O: WaitObserver>(
    &self,
    model: &M,
    images: &[ImagePayload],
    observer: O,
  ) -> Result<CaseReport, TaskError> {
    if images.is_empty() {
      return Err(TaskError::NoInput);
    }

    info!("开始审核任务，共 {} 张图像", images.len());
    let mut gateway = InferenceGateway::new(
      model,
      &self.gateway,
      PostProcessor::new(self.postprocess.clone()),
      observer,
      self.cancel.clone(),
    );

    let mut analyses = Vec::new();
    let mut failed_images = Vec::new();
    let mut skipped_images = Vec::new();
    let mut status = RunStatus::Completed;
    let mut offset = 0;

    while offset < images.len() {
      match gateway.submit_batch(offset, &images[offset..]).await {
        Ok(outcome) => {
          skipped_images.extend(outcome.skipped.iter().map(|skipped| skipped.image_index));
          analyses.extend(outcome.analyses);
          offset += outcome.consumed;
        }
        Err(GatewayError::QuotaExhausted {
          attempts,
          batch_len,
        }) => {
          warn!(
            "图像 {}..{} 在 {} 次尝试后仍受配额限制，跳过",
            offset,
            offset + batch_len,
            attempts
          );
          failed_images.extend(offset..offset + batch_len);
          offset += batch_len;
        }
        Err(GatewayError::Cancelled) => {
          warn!("任务取消，已处理 {} 张图像", analyses.len());
          status = RunStatus::Cancelled;
          break;
        }
        Err(provider @ GatewayError::Provider(_)) => {
          if analyses.is_empty() {
            error!("首个批次即失败: {}", provider);
            return Err(TaskError::Provider(provider));
          }
          error!("推理服务错误，停止提交剩余图像: {}", provider);
          status = RunStatus::Aborted;
          break;
        }
      }
    }

    if analyses.is_empty() && status != RunStatus::Cancelled {
      return Err(TaskError::NothingProcessed);
    }
    if status == RunStatus::Completed && (!failed_images.is_empty() || !skipped_images.is_empty())
    {
      status = RunStatus::Partial;
    }

    let summary = self.consolidator.consolidate(&analyses);
    let benchmark = self
      .benchmark
      .as_ref()
      .map(|(truths, version)| self.evaluator.evaluate(&analyses, truths, version));

    info!(
      "审核任务结束: {:?}，成功 {} 张，失败 {} 张，跳过 {} 张，合并损伤 {} 项",
      status,
      analyses.len(),
      failed_images.len(),
      skipped_images.len(),
      summary.issues.len()
    );

    Ok(CaseReport {
      status,
      total_images: images.len(),
      analyses,
      failed_images,
      skipped_images,
      summary,
      benchmark,
    })
  }
}
