// 该文件是 Kansun （勘损） 项目的一部分。
// src/model.rs - 推理服务接口与响应结构
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

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{analysis::Severity, geometry::Point};

/// 提交给推理服务的一张图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
  pub name: String,
  pub mime_type: String,
  pub data: Vec<u8>,
}

/// 外部推理服务
///
/// 一次调用提交一批图像，按提交顺序返回每张图像的原始 JSON 结果。
/// 结果的结构校验由调用方完成，单项失败不影响同批其他图像。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(
    &self,
    batch: &[ImagePayload],
  ) -> impl Future<Output = Result<Vec<serde_json::Value>, Self::Error>>;

  /// 错误是否来自无法解析的响应体
  ///
  /// 这类错误不重试也不中止运行，本批图像按结构错误跳过。
  fn is_malformed(&self, _error: &Self::Error) -> bool {
    false
  }
}

/// 可选的工时与配件费用提示
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementHint {
  #[serde(default)]
  pub labor_hours: Option<f64>,
  #[serde(default)]
  pub refinish_hours: Option<f64>,
  #[serde(default)]
  pub parts_cost: Option<f64>,
}

/// 推理服务返回的单个损伤检测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
  pub part: String,
  pub issue_type: String,
  pub severity: Severity,
  #[serde(default)]
  pub polygon: Vec<Point>,
  pub confidence: f64,
  #[serde(default)]
  pub measurement: Option<MeasurementHint>,
}

/// 已知真实尺寸的参照物，用于长度标定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceObject {
  pub label: String,
  pub polygon: Vec<Point>,
  pub real_length_mm: f64,
}

/// 单张图像的推理结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
  #[serde(default)]
  pub vehicle_hull: Vec<Point>,
  #[serde(default)]
  pub issues: Vec<RawDetection>,
  #[serde(default)]
  pub reference_object: Option<ReferenceObject>,
  #[serde(default)]
  pub screen_capture_suspected: Option<bool>,
}

#[derive(Error, Debug)]
pub enum SchemaError {
  #[error("响应结构解析失败: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("检测 {index} 的置信度无效: {confidence}")]
  InvalidConfidence { index: usize, confidence: f64 },
  #[error("坐标不是有限数值: {0}")]
  NonFiniteCoordinate(&'static str),
  #[error("推理服务未返回该图像的结果")]
  Missing,
  #[error("响应体无法解析: {0}")]
  Envelope(String),
}

impl InferenceResponse {
  /// 解析并校验一项原始结果
  pub fn parse(value: serde_json::Value) -> Result<Self, SchemaError> {
    let response: InferenceResponse = serde_json::from_value(value)?;
    response.validate()?;
    Ok(response)
  }

  fn validate(&self) -> Result<(), SchemaError> {
    if !all_finite(&self.vehicle_hull) {
      return Err(SchemaError::NonFiniteCoordinate("vehicleHull"));
    }
    for (index, issue) in self.issues.iter().enumerate() {
      if !issue.confidence.is_finite() || !(0.0..=1.0).contains(&issue.confidence) {
        return Err(SchemaError::InvalidConfidence {
          index,
          confidence: issue.confidence,
        });
      }
      if !all_finite(&issue.polygon) {
        return Err(SchemaError::NonFiniteCoordinate("issues.polygon"));
      }
    }
    if let Some(reference) = &self.reference_object {
      if !all_finite(&reference.polygon) {
        return Err(SchemaError::NonFiniteCoordinate("referenceObject.polygon"));
      }
    }
    Ok(())
  }
}

fn all_finite(points: &[Point]) -> bool {
  points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
}

/// 随请求发送的结构化输出约束
pub fn response_schema() -> serde_json::Value {
  let point = serde_json::json!({
    "type": "object",
    "properties": { "x": { "type": "number" }, "y": { "type": "number" } },
    "required": ["x", "y"]
  });

  serde_json::json!({
    "type": "object",
    "properties": {
      "vehicleHull": { "type": "array", "items": point.clone() },
      "issues": {
        "type": "array",
        "items": {
          "type": "object",
          "properties": {
            "part": { "type": "string" },
            "issueType": { "type": "string" },
            "severity": { "type": "string", "enum": ["minor", "moderate", "severe"] },
            "polygon": { "type": "array", "items": point.clone() },
            "confidence": { "type": "number" },
            "measurement": {
              "type": "object",
              "properties": {
                "laborHours": { "type": "number" },
                "refinishHours": { "type": "number" },
                "partsCost": { "type": "number" }
              }
            }
          },
          "required": ["part", "issueType", "severity", "polygon", "confidence"]
        }
      },
      "referenceObject": {
        "type": "object",
        "properties": {
          "label": { "type": "string" },
          "polygon": { "type": "array", "items": point.clone() },
          "realLengthMm": { "type": "number" }
        },
        "required": ["label", "polygon", "realLengthMm"]
      },
      "screenCaptureSuspected": { "type": "boolean" }
    },
    "required": ["vehicleHull", "issues"]
  })
}

#[cfg(feature = "http_model")]
mod http_vision;
#[cfg(feature = "http_model")]
pub use self::http_vision::{HttpVision, HttpVisionBuilder, HttpVisionError};

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_camel_case_response() {
    let value = json!({
      "vehicleHull": [{"x": 0, "y": 0}, {"x": 1000, "y": 0}, {"x": 1000, "y": 1000}],
      "issues": [{
        "part": "Front Bumper",
        "issueType": "dent",
        "severity": "moderate",
        "polygon": [{"x": 10, "y": 10}, {"x": 20, "y": 10}, {"x": 20, "y": 20}],
        "confidence": 0.8,
        "measurement": {"laborHours": 1.5}
      }],
      "screenCaptureSuspected": false
    });

    let response = InferenceResponse::parse(value).unwrap();
    assert_eq!(response.vehicle_hull.len(), 3);
    assert_eq!(response.issues[0].issue_type, "dent");
    assert_eq!(response.issues[0].severity, Severity::Moderate);
    assert_eq!(
      response.issues[0].measurement.as_ref().and_then(|m| m.labor_hours),
      Some(1.5)
    );
    assert_eq!(response.screen_capture_suspected, Some(false));
  }

  #[test]
  fn rejects_missing_required_fields() {
    let value = json!({ "issues": [{ "part": "Hood", "polygon": [] }] });
    assert!(matches!(
      InferenceResponse::parse(value),
      Err(SchemaError::Parse(_))
    ));
  }

  #[test]
  fn rejects_out_of_range_confidence() {
    let value = json!({
      "vehicleHull": [],
      "issues": [{
        "part": "Hood",
        "issueType": "scratch",
        "severity": "minor",
        "polygon": [],
        "confidence": 1.7
      }]
    });
    assert!(matches!(
      InferenceResponse::parse(value),
      Err(SchemaError::InvalidConfidence { index: 0, .. })
    ));
  }

  #[test]
  fn schema_lists_required_issue_fields() {
    let schema = response_schema();
    let required = &schema["properties"]["issues"]["items"]["required"];
    assert!(required.as_array().unwrap().iter().any(|v| v == "issueType"));
  }
}
