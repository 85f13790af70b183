// 该文件是 Kansun （勘损） 项目的一部分。
// src/consolidate.rs - 跨图像损伤合并
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

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{ImageAnalysis, Severity, ValidatedIssue};

/// 合并键：(部件, 损伤类型)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssueKey<'a> {
  pub part: &'a str,
  pub issue_type: &'a str,
}

/// 判断两个合并键是否指向同一损伤
pub trait KeyMatcher {
  fn matches(&self, existing: &IssueKey<'_>, candidate: &IssueKey<'_>) -> bool;
}

/// 区分大小写的精确匹配
///
/// 上游模型给出的近似部件名（如 "Left Quarter Panel" 与 "Rear Left Fender"）不会合并。
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactKeyMatcher;

impl KeyMatcher for ExactKeyMatcher {
  fn matches(&self, existing: &IssueKey<'_>, candidate: &IssueKey<'_>) -> bool {
    existing == candidate
  }
}

/// 忽略大小写与首尾空白的匹配
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveKeyMatcher;

impl KeyMatcher for CaseInsensitiveKeyMatcher {
  fn matches(&self, existing: &IssueKey<'_>, candidate: &IssueKey<'_>) -> bool {
    existing
      .part
      .trim()
      .eq_ignore_ascii_case(candidate.part.trim())
      && existing
        .issue_type
        .trim()
        .eq_ignore_ascii_case(candidate.issue_type.trim())
  }
}

impl<F> KeyMatcher for F
where
  F: Fn(&IssueKey<'_>, &IssueKey<'_>) -> bool,
{
  fn matches(&self, existing: &IssueKey<'_>, candidate: &IssueKey<'_>) -> bool {
    self(existing, candidate)
  }
}

/// 案件级损伤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIssue {
  pub part: String,
  pub issue_type: String,
  pub severity: Severity,
  pub total_instances: usize,
  /// 每个实例所在的图像索引，按出现顺序
  pub evidence_indices: Vec<usize>,
  pub max_confidence: f64,
  pub labor_hours: f64,
  pub refinish_hours: f64,
  pub labor_cost: f64,
  pub parts_cost: f64,
  pub total_cost: f64,
  /// 出现该损伤的图像占案件全部图像的比例
  pub consensus_score: f64,
}

impl ConsolidatedIssue {
  fn seed(image_index: usize, issue: &ValidatedIssue) -> Self {
    ConsolidatedIssue {
      part: issue.part.clone(),
      issue_type: issue.issue_type.clone(),
      severity: issue.severity,
      total_instances: 1,
      evidence_indices: vec![image_index],
      max_confidence: issue.confidence,
      labor_hours: issue.estimate.labor_hours,
      refinish_hours: issue.estimate.refinish_hours,
      labor_cost: issue.estimate.labor_cost,
      parts_cost: issue.estimate.parts_cost,
      total_cost: issue.estimate.total_cost(),
      consensus_score: 0.0,
    }
  }

  fn absorb(&mut self, image_index: usize, issue: &ValidatedIssue) {
    self.total_instances += 1;
    self.evidence_indices.push(image_index);
    self.max_confidence = self.max_confidence.max(issue.confidence);
    self.severity = self.severity.max(issue.severity);
    self.labor_hours += issue.estimate.labor_hours;
    self.refinish_hours += issue.estimate.refinish_hours;
    self.labor_cost += issue.estimate.labor_cost;
    self.parts_cost += issue.estimate.parts_cost;
    self.total_cost += issue.estimate.total_cost();
  }

  pub fn key(&self) -> IssueKey<'_> {
    IssueKey {
      part: &self.part,
      issue_type: &self.issue_type,
    }
  }
}

/// 案件汇总
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummary {
  pub issues: Vec<ConsolidatedIssue>,
  pub total_cost: f64,
  pub labor_cost: f64,
  pub parts_cost: f64,
  pub labor_hours: f64,
  pub refinish_hours: f64,
}

/// 流式精确去重，不做聚类
#[derive(Debug, Clone, Default)]
pub struct Consolidator<K = ExactKeyMatcher> {
  matcher: K,
}

impl Consolidator<ExactKeyMatcher> {
  pub fn new() -> Self {
    Consolidator {
      matcher: ExactKeyMatcher,
    }
  }
}

impl<K: KeyMatcher> Consolidator<K> {
  pub fn with_matcher(matcher: K) -> Self {
    Consolidator { matcher }
  }

  /// 按图像顺序合并，结果保持首次出现的顺序
  pub fn consolidate(&self, analyses: &[ImageAnalysis]) -> CaseSummary {
    let mut issues: Vec<ConsolidatedIssue> = Vec::new();

    for analysis in analyses {
      for issue in analysis.accepted_issues() {
        let candidate = IssueKey {
          part: &issue.part,
          issue_type: &issue.issue_type,
        };
        match issues
          .iter_mut()
          .find(|existing| self.matcher.matches(&existing.key(), &candidate))
        {
          Some(existing) => existing.absorb(analysis.image_index, issue),
          None => issues.push(ConsolidatedIssue::seed(analysis.image_index, issue)),
        }
      }
    }

    let image_count = analyses.len();
    for issue in issues.iter_mut() {
      let distinct: BTreeSet<usize> = issue.evidence_indices.iter().copied().collect();
      issue.consensus_score = if image_count == 0 {
        0.0
      } else {
        distinct.len() as f64 / image_count as f64
      };
    }

    debug!(
      "{} 张图像合并为 {} 个案件级损伤",
      image_count,
      issues.len()
    );

    CaseSummary {
      total_cost: issues.iter().map(|issue| issue.total_cost).sum(),
      labor_cost: issues.iter().map(|issue| issue.labor_cost).sum(),
      parts_cost: issues.iter().map(|issue| issue.parts_cost).sum(),
      labor_hours: issues.iter().map(|issue| issue.labor_hours).sum(),
      refinish_hours: issues.iter().map(|issue| issue.refinish_hours).sum(),
      issues,
    }
  }
}
