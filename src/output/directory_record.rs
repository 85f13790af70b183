// 该文件是 Kansun （勘损） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::CaseReport, url_file_path};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("路径编码无效: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
}

/// 按日期分目录记录每次运行：`folder:///var/kansun/records`
///
/// 每次运行生成 `YYYY/MM/DD/HH-MM-SS-NNNN/`，其中包含 `analyses.json`、
/// `consolidated.json`，以及存在基准结果时的 `benchmark.json`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  run_counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(DirectoryRecordOutput {
      directory: url_file_path(uri)?,
      run_counter: AtomicU16::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  fn run_id(&self) -> u16 {
    self.run_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn run_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(format!("{}-{:04X}", now.format("%H-%M-%S"), self.run_id()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory)
  }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DirectoryRecordOutputError> {
  let file = std::fs::File::create(path)?;
  serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
  debug!("写入 {}", path.display());
  Ok(())
}

impl Render<CaseReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, result: &CaseReport) -> Result<(), Self::Error> {
    let directory = self.run_path()?;
    write_json(&directory.join("analyses.json"), &result.analyses)?;
    write_json(&directory.join("consolidated.json"), &result.summary)?;
    if let Some(benchmark) = &result.benchmark {
      write_json(&directory.join("benchmark.json"), benchmark)?;
    }
    info!("运行记录已写入 {}", directory.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{consolidate::CaseSummary, task::RunStatus};

  #[test]
  fn each_run_gets_its_own_dated_folder() {
    let root = std::env::temp_dir().join(format!("kansun-record-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    let url = url::Url::parse(&format!("folder://{}", root.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let report = CaseReport {
      status: RunStatus::Partial,
      total_images: 2,
      analyses: vec![],
      failed_images: vec![1],
      skipped_images: vec![],
      summary: CaseSummary::default(),
      benchmark: None,
    };
    let first = output.run_path().unwrap();
    let second = output.run_path().unwrap();
    assert_ne!(first, second);
    assert!(first.starts_with(&root));

    output.render_result(&report).unwrap();
    let analyses: Vec<_> = walk(&root)
      .into_iter()
      .filter(|p| p.ends_with("analyses.json"))
      .collect();
    assert_eq!(analyses.len(), 1);
    assert!(analyses[0].with_file_name("consolidated.json").exists());
    assert!(!analyses[0].with_file_name("benchmark.json").exists());
    let _ = std::fs::remove_dir_all(&root);
  }

  #[test]
  fn run_counter_wraps_instead_of_overflowing() {
    let output = DirectoryRecordOutput {
      directory: std::env::temp_dir(),
      run_counter: AtomicU16::new(u16::MAX),
    };
    assert_eq!(output.run_id(), 0);
    assert_eq!(output.run_id(), 1);
  }

  fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        files.extend(walk(&path));
      } else {
        files.push(path);
      }
    }
    files
  }
}
