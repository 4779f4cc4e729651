// 该文件是 Xunmian （寻面） 项目的一部分。
// src/model.rs - 检测模型
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
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::DecodeError,
  frame::{InputTensor, TensorKind, TensorLayout, TensorSpec},
};

/// 检测器：持有已加载的模型，负责拷贝输入、执行推理并取回第一个输出张量
pub trait Model {
  /// 模型声明的输入张量
  fn input_spec(&self) -> TensorSpec;

  /// 同步执行一次前向推理，返回扁平化的第一个输出
  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error(
    "输入张量不匹配: 期望 {expected} 个 {expected_kind:?} 元素, 实际 {actual} 个 {actual_kind:?} 元素"
  )]
  InputMismatch {
    expected: usize,
    expected_kind: TensorKind,
    actual: usize,
    actual_kind: TensorKind,
  },
  #[error("推理失败: {0}")]
  InferError(String),
  #[error("输出解析错误: {0}")]
  OutputDecodeError(#[from] DecodeError),
  #[cfg(feature = "backend_tract")]
  #[error("Tract 错误: {0}")]
  TractError(tract_onnx::prelude::TractError),
  #[cfg(feature = "backend_rknn")]
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 拷贝前检查输入，大小或类型不符时拒绝
pub fn check_input(spec: &TensorSpec, input: &InputTensor) -> Result<(), ModelError> {
  if input.kind() != spec.kind || input.len() != spec.element_count() {
    return Err(ModelError::InputMismatch {
      expected: spec.element_count(),
      expected_kind: spec.kind,
      actual: input.len(),
      actual_kind: input.kind(),
    });
  }
  Ok(())
}

/// 从 URL 查询参数读取输入形状：`width`, `height`, `kind`, `layout`
pub fn spec_from_url(url: &Url, default_kind: TensorKind) -> Result<TensorSpec, ModelError> {
  let mut spec = TensorSpec::default().with_kind(default_kind);
  for (key, value) in url.query_pairs() {
    match key.as_ref() {
      "width" => {
        spec.width = value
          .parse()
          .map_err(|_| ModelError::ModelPathError(format!("无效的输入宽度: {}", value)))?;
      }
      "height" => {
        spec.height = value
          .parse()
          .map_err(|_| ModelError::ModelPathError(format!("无效的输入高度: {}", value)))?;
      }
      "kind" => {
        spec.kind = TensorKind::parse(&value)
          .ok_or_else(|| ModelError::ModelPathError(format!("无效的输入类型: {}", value)))?;
      }
      "layout" => {
        spec.layout = TensorLayout::parse(&value)
          .ok_or_else(|| ModelError::ModelPathError(format!("无效的输入布局: {}", value)))?;
      }
      other => debug!("忽略未知的模型参数: {}", other),
    }
  }

  if spec.width == 0 || spec.height == 0 {
    return Err(ModelError::ModelPathError(format!(
      "输入尺寸无效: {}x{}",
      spec.width, spec.height
    )));
  }

  Ok(spec)
}

/// URL 路径（可能含百分号编码）转为文件路径
pub fn url_file_path(url: &Url) -> Result<PathBuf, ModelError> {
  let path = urlencoding::decode(url.path())
    .map_err(|e| ModelError::ModelPathError(format!("路径编码错误: {}", e)))?;
  if path.is_empty() {
    return Err(ModelError::ModelPathError("模型路径为空".to_string()));
  }
  Ok(PathBuf::from(path.into_owned()))
}

pub(crate) fn read_model_file(url: &Url, scheme: &str) -> Result<Vec<u8>, ModelError> {
  if url.scheme() != scheme {
    return Err(ModelError::SchemeMismatch(format!(
      "模型路径必须使用 {} 方案, 实际为 {}",
      scheme,
      url.scheme()
    )));
  }

  let path = url_file_path(url)?;
  info!("加载模型文件: {}", path.display());
  let data = std::fs::read(&path)?;
  debug!(
    "模型文件大小: {:.2} MB",
    data.len() as f64 / (1024.0 * 1024.0)
  );
  Ok(data)
}

#[cfg(feature = "backend_tract")]
mod tract;
#[cfg(feature = "backend_tract")]
pub use self::tract::TractModel;

#[cfg(feature = "backend_rknn")]
mod rknn;
#[cfg(feature = "backend_rknn")]
pub use self::rknn::RknnModel;

mod replay;
pub use self::replay::ReplayModel;

pub enum ModelWrapper {
  #[cfg(feature = "backend_tract")]
  Tract(Box<TractModel>),
  #[cfg(feature = "backend_rknn")]
  Rknn(RknnModel),
  Replay(ReplayModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "backend_tract")]
    {
      if url.scheme() == TractModel::SCHEME {
        return Ok(ModelWrapper::Tract(Box::new(TractModel::from_url(url)?)));
      }
    }
    #[cfg(feature = "backend_rknn")]
    {
      if url.scheme() == RknnModel::SCHEME {
        return Ok(ModelWrapper::Rknn(RknnModel::from_url(url)?));
      }
    }
    if url.scheme() == ReplayModel::SCHEME {
      return Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?));
    }
    Err(ModelError::SchemeMismatch(format!(
      "不支持的模型方案: {}",
      url.scheme()
    )))
  }
}

impl Model for ModelWrapper {
  fn input_spec(&self) -> TensorSpec {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.input_spec(),
      #[cfg(feature = "backend_rknn")]
      ModelWrapper::Rknn(model) => model.input_spec(),
      ModelWrapper::Replay(model) => model.input_spec(),
    }
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
    match self {
      #[cfg(feature = "backend_tract")]
      ModelWrapper::Tract(model) => model.infer(input),
      #[cfg(feature = "backend_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input),
      ModelWrapper::Replay(model) => model.infer(input),
    }
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn input_spec(&self) -> TensorSpec {
    (**self).input_spec()
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
    (**self).infer(input)
  }
}
