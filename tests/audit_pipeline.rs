// 该文件是 Kansun （勘损） 项目的一部分。
// tests/audit_pipeline.rs - 端到端审核流程测试
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

use std::{cell::RefCell, collections::HashMap, time::Duration};

use serde_json::{Value, json};
use thiserror::Error;

use kansun::{
  analysis::GateOutcome,
  benchmark::{BenchmarkEvaluator, embedded_ground_truth},
  consolidate::CaseInsensitiveKeyMatcher,
  gateway::GatewayConfig,
  model::{ImagePayload, Model},
  postprocess::{GATE_HULL_CONTAINMENT, PostProcessConfig},
  task::{AuditTask, RunStatus},
};

#[derive(Error, Debug)]
#[error("{0}")]
struct ProviderError(String);

/// 按图像名称返回预设结果，可预先排入若干次失败
struct FixtureModel {
  responses: HashMap<String, Value>,
  failures: RefCell<Vec<String>>,
}

impl FixtureModel {
  fn new(responses: Vec<(&str, Value)>) -> Self {
    FixtureModel {
      responses: responses
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect(),
      failures: RefCell::new(Vec::new()),
    }
  }

  fn failing_first(self, message: &str) -> Self {
    self.failures.borrow_mut().push(message.to_string());
    self
  }
}

impl Model for FixtureModel {
  type Error = ProviderError;

  async fn infer(&self, batch: &[ImagePayload]) -> Result<Vec<Value>, ProviderError> {
    if let Some(message) = self.failures.borrow_mut().pop() {
      return Err(ProviderError(message));
    }
    Ok(
      batch
        .iter()
        .map(|image| self.responses.get(&image.name).cloned().unwrap_or(Value::Null))
        .collect(),
    )
  }
}

fn payload(name: &str) -> ImagePayload {
  ImagePayload {
    name: name.to_string(),
    mime_type: "image/jpeg".to_string(),
    data: vec![0xff, 0xd8, 0xff],
  }
}

fn hull() -> Value {
  json!([{"x": 50, "y": 50}, {"x": 950, "y": 50}, {"x": 950, "y": 950}, {"x": 50, "y": 950}])
}

fn front_left() -> Value {
  json!({
    "vehicleHull": hull(),
    "issues": [
      {
        "part": "Front Bumper",
        "issueType": "dent",
        "severity": "moderate",
        "polygon": [{"x": 210, "y": 610}, {"x": 390, "y": 600}, {"x": 400, "y": 720}, {"x": 220, "y": 730}],
        "confidence": 0.93
      },
      {
        "part": "Hood",
        "issueType": "scratch",
        "severity": "minor",
        "polygon": [{"x": 300, "y": 300}, {"x": 320, "y": 310}],
        "confidence": 0.8
      },
      {
        "part": "Side Mirror",
        "issueType": "crack",
        "severity": "minor",
        "polygon": [{"x": 960, "y": 960}, {"x": 990, "y": 960}, {"x": 990, "y": 990}],
        "confidence": 0.7
      }
    ]
  })
}

fn rear_right() -> Value {
  json!({
    "vehicleHull": hull(),
    "issues": [{
      "part": "Rear Right Door",
      "issueType": "scratch",
      "severity": "minor",
      "polygon": [{"x": 100, "y": 100}, {"x": 200, "y": 100}, {"x": 200, "y": 150}],
      "confidence": 0.6
    }]
  })
}

fn quick_gateway() -> GatewayConfig {
  GatewayConfig {
    cooldown: Duration::from_secs(5),
    max_jitter: Duration::ZERO,
    ..GatewayConfig::default()
  }
}

#[tokio::test]
async fn two_image_case_is_gated_consolidated_and_benchmarked() {
  let model = FixtureModel::new(vec![("front.jpg", front_left()), ("rear.jpg", rear_right())]);
  let truths = embedded_ground_truth().unwrap();
  let task = AuditTask::new(quick_gateway(), PostProcessConfig::default()).with_benchmark(
    truths,
    "fixture-v1",
    BenchmarkEvaluator::new(),
  );

  let report = task
    .run(&model, &[payload("front.jpg"), payload("rear.jpg")], ())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.analyses.len(), 2);

  // 两点多边形被丢弃，车身外的损伤被门控
  let front = &report.analyses[0];
  assert_eq!(front.detected_issues.len(), 1);
  assert_eq!(front.detected_issues[0].part, "Front Bumper");
  assert!(front.flagged());
  assert!(front.audit_trail.iter().any(|entry| {
    entry.gate == GATE_HULL_CONTAINMENT && entry.outcome == GateOutcome::Flagged
  }));

  let parts: Vec<_> = report
    .summary
    .issues
    .iter()
    .map(|issue| issue.part.as_str())
    .collect();
  assert_eq!(parts, vec!["Front Bumper", "Rear Right Door"]);
  assert!(report.summary.issues.iter().all(|issue| issue.consensus_score == 0.5));

  let benchmark = report.benchmark.expect("benchmark requested");
  assert_eq!(benchmark.model_version, "fixture-v1");
  assert_eq!(benchmark.per_image[0].metrics.mean_iou, 1.0);
  assert_eq!(benchmark.per_image[1].metrics.mean_iou, 0.0);
  assert_eq!(benchmark.per_image[1].false_positives, 1);
  assert!((benchmark.overall.mean_iou - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn retained_rejections_stay_out_of_consolidation() {
  let model = FixtureModel::new(vec![("front.jpg", front_left())]);
  let postprocess = PostProcessConfig {
    retain_rejected: true,
    ..PostProcessConfig::default()
  };
  let report = AuditTask::new(quick_gateway(), postprocess)
    .run(&model, &[payload("front.jpg")], ())
    .await
    .unwrap();

  assert_eq!(report.analyses[0].detected_issues.len(), 2);
  assert_eq!(report.summary.issues.len(), 1);
  assert_eq!(report.summary.issues[0].part, "Front Bumper");
}

#[tokio::test]
async fn case_insensitive_matcher_merges_across_images() {
  let mut shouting = front_left();
  shouting["issues"][0]["part"] = json!("FRONT BUMPER");
  shouting["issues"][0]["severity"] = json!("severe");
  let model = FixtureModel::new(vec![("a.jpg", front_left()), ("b.jpg", shouting)]);

  let report = AuditTask::new(quick_gateway(), PostProcessConfig::default())
    .with_matcher(CaseInsensitiveKeyMatcher)
    .run(&model, &[payload("a.jpg"), payload("b.jpg")], ())
    .await
    .unwrap();

  assert_eq!(report.summary.issues.len(), 1);
  let merged = &report.summary.issues[0];
  assert_eq!(merged.total_instances, 2);
  assert_eq!(merged.evidence_indices, vec![0, 1]);
  assert_eq!(merged.consensus_score, 1.0);
  assert_eq!(merged.part, "Front Bumper");
}

#[tokio::test(start_paused = true)]
async fn quota_error_backs_off_then_recovers() {
  let model = FixtureModel::new(vec![("front.jpg", front_left()), ("rear.jpg", rear_right())])
    .failing_first("HTTP 429: Resource has been exhausted (e.g. check quota).");
  let waits = RefCell::new(Vec::new());
  let observer = |seconds: u64| waits.borrow_mut().push(seconds);

  let report = AuditTask::new(quick_gateway(), PostProcessConfig::default())
    .run(&model, &[payload("front.jpg"), payload("rear.jpg")], observer)
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Completed);
  assert_eq!(report.analyses.len(), 2);
  assert_eq!(*waits.borrow(), vec![5, 0]);
}

#[tokio::test]
async fn unparseable_result_is_skipped_not_fatal() {
  let model = FixtureModel::new(vec![("front.jpg", front_left())]);
  let report = AuditTask::new(quick_gateway(), PostProcessConfig::default())
    .run(&model, &[payload("front.jpg"), payload("missing.jpg")], ())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Partial);
  assert_eq!(report.skipped_images, vec![1]);
  assert_eq!(report.analyses.len(), 1);
}
