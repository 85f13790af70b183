// 该文件是 Kansun （勘损） 项目的一部分。
// src/output/json_file.rs - JSON 报告文件输出
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::CaseReport, url_file_path};

#[derive(Error, Debug)]
pub enum JsonFileOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("路径编码无效: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
}

/// 整个案件报告写入一个 JSON 文件：`json:///path/to/report.json?compact`
pub struct JsonFileOutput {
  path: PathBuf,
  pretty: bool,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!("URI scheme mismatch: expected 'json', found '{}'", url.scheme());
      return Err(JsonFileOutputError::SchemeMismatch);
    }
    let pretty = !url.query_pairs().any(|(k, _)| k == "compact");
    Ok(JsonFileOutput {
      path: url_file_path(url)?,
      pretty,
    })
  }
}

impl Render<CaseReport> for JsonFileOutput {
  type Error = JsonFileOutputError;

  fn render_result(&self, result: &CaseReport) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&self.path)?;
    let writer = std::io::BufWriter::new(file);
    if self.pretty {
      serde_json::to_writer_pretty(writer, result)?;
    } else {
      serde_json::to_writer(writer, result)?;
    }
    info!("案件报告已写入 {}", self.path.display());
    Ok(())
  }
}
