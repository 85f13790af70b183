// 该文件是 Kansun （勘损） 项目的一部分。
// src/input/read_image_file.rs - 图像文件与目录输入
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::ImagePayload, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch: expected '{expected}', found '{found}'")]
  SchemaMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unrecognized image format: {0}")]
  ImageFormatError(#[from] image::ImageError),
  #[error("No images found in {0}")]
  EmptyFolder(String),
  #[error("Invalid path encoding: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
}

/// 读取一个图像文件，根据文件内容判断 MIME 类型
pub fn load_payload(path: &Path) -> Result<ImagePayload, ImageFileInputError> {
  let data = std::fs::read(path)?;
  let format = image::guess_format(&data)?;
  let name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string());
  debug!("读取图像 {}: {} 字节, {}", name, data.len(), format.to_mime_type());

  Ok(ImagePayload {
    name,
    mime_type: format.to_mime_type().to_string(),
    data,
  })
}

fn check_scheme(url: &Url, expected: &'static str) -> Result<(), ImageFileInputError> {
  if url.scheme() != expected {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      expected,
      url.scheme()
    );
    return Err(ImageFileInputError::SchemaMismatch {
      expected,
      found: url.scheme().to_string(),
    });
  }
  Ok(())
}

/// 单个图像文件：`image:///path/to/photo.jpg`
pub struct ImageFileInput {
  image: Option<ImagePayload>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let image = load_payload(&url_file_path(url)?)?;
    Ok(ImageFileInput { image: Some(image) })
  }
}

impl Iterator for ImageFileInput {
  type Item = ImagePayload;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录下的全部图像，按文件名排序：`folder:///path/to/case`
pub struct ImageFolderInput {
  paths: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    let directory = url_file_path(url)?;
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&directory)? {
      let path = entry?.path();
      if path.is_file() && ImageFormat::from_path(&path).is_ok() {
        paths.push(path);
      }
    }
    if paths.is_empty() {
      return Err(ImageFileInputError::EmptyFolder(directory.display().to_string()));
    }
    paths.sort();
    info!("目录 {} 中找到 {} 张图像", directory.display(), paths.len());

    Ok(ImageFolderInput {
      paths: paths.into_iter(),
    })
  }
}

impl Iterator for ImageFolderInput {
  type Item = ImagePayload;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.paths.by_ref() {
      match load_payload(&path) {
        Ok(payload) => return Some(payload),
        Err(e) => error!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
