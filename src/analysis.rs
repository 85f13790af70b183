// 该文件是 Kansun （勘损） 项目的一部分。
// src/analysis.rs - 单图分析结果定义
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

use crate::geometry::Point;

/// 损伤严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  #[serde(alias = "Minor", alias = "MINOR")]
  Minor,
  #[serde(alias = "Moderate", alias = "MODERATE")]
  Moderate,
  #[serde(alias = "Severe", alias = "SEVERE")]
  Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueStatus {
  Verified,
  Provisional,
  Rejected,
}

/// 单项维修估算
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairEstimate {
  pub labor_hours: f64,
  pub refinish_hours: f64,
  pub labor_cost: f64,
  pub parts_cost: f64,
}

impl RepairEstimate {
  pub fn total_cost(&self) -> f64 {
    self.labor_cost + self.parts_cost
  }
}

/// 经过校验的损伤，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedIssue {
  /// 在所属 `ImageAnalysis` 内唯一
  pub id: String,
  pub part: String,
  pub issue_type: String,
  pub severity: Severity,
  pub polygon: Vec<Point>,
  pub confidence: f64,
  pub inside_hull: bool,
  pub length_mm: f64,
  pub estimate: RepairEstimate,
  pub status: IssueStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationMethod {
  /// 根据已知尺寸的参照物标定
  ReferenceObject,
  /// 未检测到参照物，使用经验倍率，可信度较低
  Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
  pub method: CalibrationMethod,
  pub mm_per_unit: f64,
  pub reference_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GateOutcome {
  Pass,
  Warning,
  Flagged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub gate: String,
  pub outcome: GateOutcome,
  pub detail: String,
}

/// 单张图像的分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
  pub image_index: usize,
  pub image_name: String,
  pub vehicle_hull: Vec<Point>,
  pub detected_issues: Vec<ValidatedIssue>,
  pub calibration: Calibration,
  /// 按门控执行顺序追加
  pub audit_trail: Vec<AuditEntry>,
}

impl ImageAnalysis {
  pub fn flagged(&self) -> bool {
    self
      .audit_trail
      .iter()
      .any(|entry| entry.outcome == GateOutcome::Flagged)
  }

  /// 未被门控拒绝的损伤
  pub fn accepted_issues(&self) -> impl Iterator<Item = &ValidatedIssue> {
    self
      .detected_issues
      .iter()
      .filter(|issue| issue.status != IssueStatus::Rejected)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn severity_accepts_capitalized_names() {
    let severity: Severity = serde_json::from_str("\"Severe\"").unwrap();
    assert_eq!(severity, Severity::Severe);
    assert_eq!(serde_json::to_string(&Severity::Minor).unwrap(), "\"minor\"");
    assert!(Severity::Severe > Severity::Moderate);
  }

  #[test]
  fn analysis_serializes_with_camel_case_fields() {
    let analysis = ImageAnalysis {
      image_index: 2,
      image_name: "rear.jpg".to_string(),
      vehicle_hull: vec![],
      detected_issues: vec![],
      calibration: Calibration {
        method: CalibrationMethod::Heuristic,
        mm_per_unit: 4.5,
        reference_label: None,
      },
      audit_trail: vec![],
    };

    let value = serde_json::to_value(&analysis).unwrap();
    assert_eq!(value["imageIndex"], 2);
    assert!(value.get("detectedIssues").is_some());
    assert_eq!(value["calibration"]["method"], "heuristic");
  }
}
