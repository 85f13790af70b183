// 该文件是 Kansun （勘损） 项目的一部分。
// src/benchmark.rs - 基准评测
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

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  analysis::ImageAnalysis,
  geometry::{IouMode, Point, iou_with},
  model::InferenceResponse,
};

/// 检测与标注匹配所需的最小 IoU（严格大于）
pub const MATCH_IOU_THRESHOLD: f64 = 0.3;

const GROUND_TRUTH_JSON: &str = include_str!("../fixtures/ground_truth.json");

static GROUND_TRUTH: OnceCell<Vec<GroundTruthSet>> = OnceCell::new();

#[derive(Error, Debug)]
pub enum BenchmarkError {
  #[error("标注数据解析失败: {0}")]
  Fixture(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthIssue {
  pub part: String,
  pub issue_type: String,
  pub polygon: Vec<Point>,
  #[serde(default)]
  pub length_mm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthSet {
  pub id: String,
  pub image_ref: String,
  pub issues: Vec<GroundTruthIssue>,
}

/// 内置标注集，首次调用时解析
pub fn embedded_ground_truth() -> Result<&'static [GroundTruthSet], BenchmarkError> {
  GROUND_TRUTH
    .get_or_try_init(|| load_ground_truth(GROUND_TRUTH_JSON))
    .map(Vec::as_slice)
}

pub fn load_ground_truth(json: &str) -> Result<Vec<GroundTruthSet>, BenchmarkError> {
  let sets: Vec<GroundTruthSet> = serde_json::from_str(json)?;
  debug!("加载 {} 组标注", sets.len());
  Ok(sets)
}

/// 参与评测的一个检测
#[derive(Debug, Clone, Copy)]
pub struct Detection<'a> {
  pub issue_type: &'a str,
  pub polygon: &'a [Point],
  pub length_mm: Option<f64>,
}

/// 可被评测的单图结果
pub trait Scorable {
  fn image_index(&self) -> usize;
  fn detections(&self) -> Vec<Detection<'_>>;
}

impl Scorable for ImageAnalysis {
  fn image_index(&self) -> usize {
    self.image_index
  }

  fn detections(&self) -> Vec<Detection<'_>> {
    self
      .accepted_issues()
      .map(|issue| Detection {
        issue_type: &issue.issue_type,
        polygon: &issue.polygon,
        length_mm: Some(issue.length_mm),
      })
      .collect()
  }
}

/// 未经门控的原始推理结果
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
  pub image_index: usize,
  pub response: &'a InferenceResponse,
}

impl Scorable for RawImage<'_> {
  fn image_index(&self) -> usize {
    self.image_index
  }

  fn detections(&self) -> Vec<Detection<'_>> {
    self
      .response
      .issues
      .iter()
      .map(|issue| Detection {
        issue_type: &issue.issue_type,
        polygon: &issue.polygon,
        length_mm: None,
      })
      .collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
  pub precision: f64,
  pub recall: f64,
  pub f1: f64,
  #[serde(rename = "meanIoU")]
  pub mean_iou: f64,
  pub dimension_error_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetrics {
  pub image_index: usize,
  pub ground_truth_id: Option<String>,
  pub detections: usize,
  pub ground_truth: usize,
  pub true_positives: usize,
  pub false_positives: usize,
  pub false_negatives: usize,
  #[serde(flatten)]
  pub metrics: EvaluationMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
  pub timestamp: DateTime<Utc>,
  pub model_version: String,
  pub iou_mode: IouMode,
  pub per_image: Vec<ImageMetrics>,
  pub overall: EvaluationMetrics,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkEvaluator {
  mode: IouMode,
}

impl BenchmarkEvaluator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_mode(mut self, mode: IouMode) -> Self {
    self.mode = mode;
    self
  }

  /// 逐图评测并对各图指标取算术平均
  ///
  /// 第 `i` 张图像与 `truths[i]` 配对；索引越界时回退到 `truths[0]`。
  pub fn evaluate<S: Scorable>(
    &self,
    images: &[S],
    truths: &[GroundTruthSet],
    model_version: &str,
  ) -> BenchmarkReport {
    let per_image: Vec<ImageMetrics> = images
      .iter()
      .map(|image| {
        let index = image.image_index();
        let truth = truths.get(index).or_else(|| {
          if !truths.is_empty() {
            warn!("图像 {} 没有对应的标注，回退到第 0 组", index);
          }
          truths.first()
        });
        self.evaluate_image(index, &image.detections(), truth)
      })
      .collect();

    let overall = macro_average(&per_image);
    info!(
      "评测完成: {} 张图像, P={:.3} R={:.3} F1={:.3} IoU={:.3}",
      per_image.len(),
      overall.precision,
      overall.recall,
      overall.f1,
      overall.mean_iou
    );

    BenchmarkReport {
      timestamp: Utc::now(),
      model_version: model_version.to_string(),
      iou_mode: self.mode,
      per_image,
      overall,
    }
  }

  fn evaluate_image(
    &self,
    image_index: usize,
    detections: &[Detection<'_>],
    truth: Option<&GroundTruthSet>,
  ) -> ImageMetrics {
    let truth_issues = truth.map(|set| set.issues.as_slice()).unwrap_or_default();

    let mut true_positives = 0usize;
    let mut accumulated_iou = 0.0;
    let mut dimension_errors = Vec::new();

    for detection in detections {
      let matched = truth_issues.iter().find_map(|truth_issue| {
        if truth_issue.issue_type != detection.issue_type {
          return None;
        }
        let value = iou_with(self.mode, detection.polygon, &truth_issue.polygon);
        (value > MATCH_IOU_THRESHOLD).then_some((truth_issue, value))
      });

      if let Some((truth_issue, value)) = matched {
        true_positives += 1;
        accumulated_iou += value;
        if let (Some(measured), Some(expected)) = (detection.length_mm, truth_issue.length_mm) {
          if expected > 0.0 {
            dimension_errors.push((measured - expected).abs() / expected * 100.0);
          }
        }
      }
    }

    let total_detections = detections.len();
    let total_truth = truth_issues.len();

    let precision = if total_detections == 0 {
      1.0
    } else {
      true_positives as f64 / total_detections as f64
    };
    let recall = if total_truth == 0 {
      1.0
    } else {
      true_positives as f64 / total_truth as f64
    };
    let f1 = if precision + recall == 0.0 {
      0.0
    } else {
      2.0 * precision * recall / (precision + recall)
    };
    let mean_iou = if true_positives == 0 {
      0.0
    } else {
      accumulated_iou / true_positives as f64
    };
    let dimension_error_percent = mean(&dimension_errors);

    ImageMetrics {
      image_index,
      ground_truth_id: truth.map(|set| set.id.clone()),
      detections: total_detections,
      ground_truth: total_truth,
      true_positives,
      false_positives: total_detections.saturating_sub(true_positives),
      false_negatives: total_truth.saturating_sub(true_positives),
      metrics: EvaluationMetrics {
        precision,
        recall,
        f1,
        mean_iou,
        dimension_error_percent,
      },
    }
  }
}

fn mean(values: &[f64]) -> f64 {
  if values.is_empty() {
    0.0
  } else {
    values.iter().sum::<f64>() / values.len() as f64
  }
}

fn macro_average(per_image: &[ImageMetrics]) -> EvaluationMetrics {
  let column = |select: fn(&EvaluationMetrics) -> f64| {
    mean(
      &per_image
        .iter()
        .map(|image| select(&image.metrics))
        .collect::<Vec<_>>(),
    )
  };

  EvaluationMetrics {
    precision: column(|m| m.precision),
    recall: column(|m| m.recall),
    f1: column(|m| m.f1),
    mean_iou: column(|m| m.mean_iou),
    dimension_error_percent: column(|m| m.dimension_error_percent),
  }
}
