// 该文件是 Kansun （勘损） 项目的一部分。
// src/model/http_vision.rs - HTTP 视觉推理服务
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

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl,
  model::{ImagePayload, Model, response_schema},
};

const HTTP_SCHEMES: [&str; 2] = ["http", "https"];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const INSTRUCTIONS: &str = "Inspect each vehicle photo. Outline the vehicle body as a polygon, \
list every visible damage with its panel, type, severity, polygon and confidence, \
report a reference object of known length if one is visible, and indicate whether \
the photo appears to be taken of a screen. Coordinates use a normalized 0 to 1000 space.";

#[derive(Error, Debug)]
pub enum HttpVisionError {
  #[error("模型地址必须使用 http 或 https 方案，实际为 '{0}'")]
  SchemeMismatch(String),
  #[error("HTTP 请求错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("推理服务返回 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应缺少 results 数组")]
  MalformedEnvelope,
}

/// 通过 URL 构建：`https://vision.example.com/v1/inspect?timeout=60`
pub struct HttpVisionBuilder {
  endpoint: Url,
  timeout: Duration,
  api_key: Option<String>,
}

impl FromUrl for HttpVisionBuilder {
  type Error = HttpVisionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !HTTP_SCHEMES.contains(&url.scheme()) {
      return Err(HttpVisionError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut timeout = DEFAULT_TIMEOUT;
    let mut endpoint = url.clone();
    let mut kept = Vec::new();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "timeout" => match v.parse::<u64>() {
          Ok(secs) => timeout = Duration::from_secs(secs),
          Err(_) => error!("忽略无效的 timeout 参数: {}", v),
        },
        _ => kept.push((k.into_owned(), v.into_owned())),
      }
    }
    if kept.is_empty() {
      endpoint.set_query(None);
    } else {
      endpoint.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(HttpVisionBuilder {
      endpoint,
      timeout,
      api_key: None,
    })
  }
}

impl HttpVisionBuilder {
  pub fn api_key(mut self, api_key: Option<String>) -> Self {
    self.api_key = api_key.filter(|key| !key.is_empty());
    self
  }

  pub fn build(self) -> Result<HttpVision, HttpVisionError> {
    let client = reqwest::Client::builder().timeout(self.timeout).build()?;
    Ok(HttpVision {
      client,
      endpoint: self.endpoint,
      api_key: self.api_key,
    })
  }
}

pub struct HttpVision {
  client: reqwest::Client,
  endpoint: Url,
  api_key: Option<String>,
}

fn request_body(batch: &[ImagePayload]) -> Value {
  let images: Vec<Value> = batch
    .iter()
    .map(|image| {
      json!({
        "mimeType": image.mime_type,
        "data": STANDARD.encode(&image.data),
      })
    })
    .collect();

  json!({
    "instructions": INSTRUCTIONS,
    "responseSchema": response_schema(),
    "images": images,
  })
}

fn unwrap_envelope(mut envelope: Value) -> Result<Vec<Value>, HttpVisionError> {
  match envelope.get_mut("results").map(Value::take) {
    Some(Value::Array(results)) => Ok(results),
    _ => Err(HttpVisionError::MalformedEnvelope),
  }
}

impl Model for HttpVision {
  type Error = HttpVisionError;

  async fn infer(&self, batch: &[ImagePayload]) -> Result<Vec<Value>, Self::Error> {
    debug!("提交 {} 张图像到 {}", batch.len(), self.endpoint);

    let mut request = self
      .client
      .post(self.endpoint.clone())
      .json(&request_body(batch));
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      // 配额判定依赖状态码与响应正文
      let body = response.text().await.unwrap_or_default();
      return Err(HttpVisionError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let envelope: Value = response.json().await?;
    let results = unwrap_envelope(envelope)?;
    debug!("收到 {} 条结果", results.len());
    Ok(results)
  }

  fn is_malformed(&self, error: &HttpVisionError) -> bool {
    match error {
      HttpVisionError::MalformedEnvelope => true,
      HttpVisionError::Http(e) => e.is_decode(),
      _ => false,
    }
  }
}
