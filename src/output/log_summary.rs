// 该文件是 Kansun （勘损） 项目的一部分。
// src/output/log_summary.rs - 日志摘要输出
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
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::CaseReport};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 将案件摘要写入日志：`log:` 或 `log:?verbose`
pub struct LogOutput {
  verbose: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let verbose = url.query_pairs().any(|(k, _)| k == "verbose");
    Ok(LogOutput { verbose })
  }
}

impl Render<CaseReport> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, result: &CaseReport) -> Result<(), Self::Error> {
    info!(
      "案件状态 {:?}: {}/{} 张图像完成分析, 失败 {:?}, 跳过 {:?}",
      result.status,
      result.analyses.len(),
      result.total_images,
      result.failed_images,
      result.skipped_images
    );

    for analysis in result.analyses.iter().filter(|a| a.flagged()) {
      warn!("图像 {} ({}) 存在审核警告", analysis.image_index, analysis.image_name);
      if self.verbose {
        for entry in &analysis.audit_trail {
          warn!("  [{}] {:?}: {}", entry.gate, entry.outcome, entry.detail);
        }
      }
    }

    let summary = &result.summary;
    for issue in &summary.issues {
      info!(
        "{} / {}: {:?}, {} 处, 一致性 {:.2}, 费用 {:.2}",
        issue.part,
        issue.issue_type,
        issue.severity,
        issue.total_instances,
        issue.consensus_score,
        issue.total_cost
      );
    }
    info!(
      "合计: 工时 {:.1} h, 喷漆 {:.1} h, 人工 {:.2}, 配件 {:.2}, 总计 {:.2}",
      summary.labor_hours,
      summary.refinish_hours,
      summary.labor_cost,
      summary.parts_cost,
      summary.total_cost
    );

    if let Some(benchmark) = &result.benchmark {
      let overall = &benchmark.overall;
      info!(
        "基准 {}: P {:.3}, R {:.3}, F1 {:.3}, IoU {:.3}, 尺寸误差 {:.1}%",
        benchmark.model_version,
        overall.precision,
        overall.recall,
        overall.f1,
        overall.mean_iou,
        overall.dimension_error_percent
      );
    }

    Ok(())
  }
}
