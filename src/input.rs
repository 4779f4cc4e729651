// 该文件是 Xunmian （寻面） 项目的一部分。
// src/input.rs - 帧输入
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
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, OwnedFrame},
};

mod raw_bgra_file;
mod read_image_file;

pub use self::raw_bgra_file::RawBgraFileInput;
pub use self::read_image_file::ImageFileInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("帧数据无效: {0}")]
  FrameError(#[from] FrameError),
  #[error("输入参数错误: {0}")]
  InvalidParameter(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub(crate) fn input_path(url: &Url) -> Result<PathBuf, InputError> {
  let path = urlencoding::decode(url.path())
    .map_err(|e| InputError::InvalidParameter(format!("路径编码错误: {}", e)))?;
  if path.is_empty() {
    return Err(InputError::InvalidParameter("输入路径为空".to_string()));
  }
  Ok(PathBuf::from(path.into_owned()))
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  RawBgraFile(RawBgraFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      RawBgraFileInput::SCHEME => Ok(InputWrapper::RawBgraFile(RawBgraFileInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(format!(
        "不支持的输入方案: {}",
        other
      ))),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = OwnedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::RawBgraFile(input) => input.next(),
    }
  }
}
