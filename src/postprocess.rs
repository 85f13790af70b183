// 该文件是 Kansun （勘损） 项目的一部分。
// src/postprocess.rs - 单图后处理与门控
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

use tracing::{debug, warn};

use crate::{
  analysis::{
    AuditEntry, Calibration, CalibrationMethod, GateOutcome, ImageAnalysis, IssueStatus,
    RepairEstimate, Severity, ValidatedIssue,
  },
  geometry::{bounding_box, point_in_polygon},
  model::{InferenceResponse, RawDetection, ReferenceObject},
};

pub const GATE_SCREEN_CAPTURE: &str = "adversarial screen-capture check";
pub const GATE_HULL_DECLARATION: &str = "hull declaration";
pub const GATE_CALIBRATION: &str = "calibration";
pub const GATE_HULL_CONTAINMENT: &str = "hull containment";

const DEFAULT_VERIFIED_THRESHOLD: f64 = 0.9;
const DEFAULT_HEURISTIC_MM_PER_UNIT: f64 = 4.5;

/// 工时费率与按严重程度的默认估算
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
  pub labor_rate: f64,
  pub refinish_rate: f64,
  /// (钣金工时, 喷漆工时, 配件费用)，依次对应 minor / moderate / severe
  pub defaults: [(f64, f64, f64); 3],
}

impl Default for RateTable {
  fn default() -> Self {
    RateTable {
      labor_rate: 95.0,
      refinish_rate: 85.0,
      defaults: [(0.5, 1.0, 0.0), (1.5, 2.0, 150.0), (3.0, 2.5, 600.0)],
    }
  }
}

impl RateTable {
  fn estimate(&self, detection: &RawDetection) -> RepairEstimate {
    let (labor, refinish, parts) = match detection.severity {
      Severity::Minor => self.defaults[0],
      Severity::Moderate => self.defaults[1],
      Severity::Severe => self.defaults[2],
    };
    let hint = detection.measurement.clone().unwrap_or_default();
    let labor_hours = hint.labor_hours.unwrap_or(labor).max(0.0);
    let refinish_hours = hint.refinish_hours.unwrap_or(refinish).max(0.0);

    RepairEstimate {
      labor_hours,
      refinish_hours,
      labor_cost: labor_hours * self.labor_rate + refinish_hours * self.refinish_rate,
      parts_cost: hint.parts_cost.unwrap_or(parts).max(0.0),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessConfig {
  /// 置信度不低于该值时标记为已核实
  pub verified_threshold: f64,
  /// 未检测到参照物时每个归一化单位对应的毫米数
  pub heuristic_mm_per_unit: f64,
  /// 保留未通过主体隔离门控的损伤（状态为 rejected）
  pub retain_rejected: bool,
  pub rates: RateTable,
}

impl Default for PostProcessConfig {
  fn default() -> Self {
    PostProcessConfig {
      verified_threshold: DEFAULT_VERIFIED_THRESHOLD,
      heuristic_mm_per_unit: DEFAULT_HEURISTIC_MM_PER_UNIT,
      retain_rejected: false,
      rates: RateTable::default(),
    }
  }
}

/// 将一张图像的推理结果转换为 `ImageAnalysis`
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
  config: PostProcessConfig,
}

impl PostProcessor {
  pub fn new(config: PostProcessConfig) -> Self {
    PostProcessor { config }
  }

  pub fn config(&self) -> &PostProcessConfig {
    &self.config
  }

  pub fn process(
    &self,
    image_index: usize,
    image_name: &str,
    response: InferenceResponse,
  ) -> ImageAnalysis {
    let InferenceResponse {
      vehicle_hull,
      issues,
      reference_object,
      screen_capture_suspected,
    } = response;

    let mut audit_trail = Vec::new();
    audit_trail.push(screen_capture_entry(screen_capture_suspected));

    let hull_gated = vehicle_hull.len() > 2;
    audit_trail.push(if hull_gated {
      AuditEntry {
        gate: GATE_HULL_DECLARATION.to_string(),
        outcome: GateOutcome::Pass,
        detail: format!("vehicle hull declared with {} points", vehicle_hull.len()),
      }
    } else {
      AuditEntry {
        gate: GATE_HULL_DECLARATION.to_string(),
        outcome: GateOutcome::Warning,
        detail: "vehicle hull missing or degenerate, containment gate is permissive".to_string(),
      }
    });

    let calibration = self.calibrate(reference_object.as_ref());
    audit_trail.push(match calibration.method {
      CalibrationMethod::ReferenceObject => AuditEntry {
        gate: GATE_CALIBRATION.to_string(),
        outcome: GateOutcome::Pass,
        detail: format!(
          "calibrated against {} at {:.3} mm per unit",
          calibration.reference_label.as_deref().unwrap_or("reference"),
          calibration.mm_per_unit
        ),
      },
      CalibrationMethod::Heuristic => AuditEntry {
        gate: GATE_CALIBRATION.to_string(),
        outcome: GateOutcome::Warning,
        detail: format!(
          "no reference object, uncalibrated estimate at {:.3} mm per unit",
          calibration.mm_per_unit
        ),
      },
    });

    let mut detected_issues = Vec::with_capacity(issues.len());
    for (raw_index, detection) in issues.into_iter().enumerate() {
      if detection.polygon.len() < 3 {
        debug!(
          "图像 {} 的检测 {} 多边形顶点不足，丢弃",
          image_index, raw_index
        );
        continue;
      }

      let bbox = bounding_box(&detection.polygon);
      let center = bbox.center();
      let inside_hull = !hull_gated || point_in_polygon(center, &vehicle_hull);

      if hull_gated {
        audit_trail.push(AuditEntry {
          gate: GATE_HULL_CONTAINMENT.to_string(),
          outcome: if inside_hull {
            GateOutcome::Pass
          } else {
            GateOutcome::Flagged
          },
          detail: format!(
            "{} / {} centered at ({:.1}, {:.1}) {}",
            detection.part,
            detection.issue_type,
            center.x,
            center.y,
            if inside_hull {
              "inside vehicle hull"
            } else {
              "outside vehicle hull"
            }
          ),
        });
      }

      if !inside_hull && !self.config.retain_rejected {
        debug!(
          "图像 {} 的检测 {}（{}）位于车身轮廓之外，丢弃",
          image_index, raw_index, detection.part
        );
        continue;
      }

      let status = if !inside_hull {
        IssueStatus::Rejected
      } else if detection.confidence >= self.config.verified_threshold {
        IssueStatus::Verified
      } else {
        IssueStatus::Provisional
      };

      let estimate = self.config.rates.estimate(&detection);
      detected_issues.push(ValidatedIssue {
        id: format!("{}-{}", image_index, detected_issues.len()),
        length_mm: bbox.longest_side() * calibration.mm_per_unit,
        part: detection.part,
        issue_type: detection.issue_type,
        severity: detection.severity,
        polygon: detection.polygon,
        confidence: detection.confidence,
        inside_hull,
        estimate,
        status,
      });
    }

    debug!(
      "图像 {} 后处理完成，保留 {} 个损伤",
      image_index,
      detected_issues.len()
    );

    ImageAnalysis {
      image_index,
      image_name: image_name.to_string(),
      vehicle_hull,
      detected_issues,
      calibration,
      audit_trail,
    }
  }

  fn calibrate(&self, reference: Option<&ReferenceObject>) -> Calibration {
    if let Some(reference) = reference {
      let side = bounding_box(&reference.polygon).longest_side();
      if reference.polygon.len() >= 2
        && side > 0.0
        && reference.real_length_mm.is_finite()
        && reference.real_length_mm > 0.0
      {
        return Calibration {
          method: CalibrationMethod::ReferenceObject,
          mm_per_unit: reference.real_length_mm / side,
          reference_label: Some(reference.label.clone()),
        };
      }
      warn!("参照物 {} 尺寸无效，回退到经验倍率", reference.label);
    }

    Calibration {
      method: CalibrationMethod::Heuristic,
      mm_per_unit: self.config.heuristic_mm_per_unit,
      reference_label: None,
    }
  }
}

fn screen_capture_entry(suspected: Option<bool>) -> AuditEntry {
  let (outcome, detail) = match suspected {
    Some(true) => (
      GateOutcome::Flagged,
      "image looks like a photo of a screen or print",
    ),
    Some(false) => (GateOutcome::Pass, "no screen-capture artifacts reported"),
    None => (GateOutcome::Warning, "screen-capture check not reported"),
  };

  AuditEntry {
    gate: GATE_SCREEN_CAPTURE.to_string(),
    outcome,
    detail: detail.to_string(),
  }
}
