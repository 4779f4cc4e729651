// 该文件是 Xunmian （寻面） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理后端
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

use std::io::Cursor;

use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, TensorKind, TensorSpec},
  model::{Model, ModelError, check_input, read_model_file, spec_from_url},
};

type TractPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

impl From<TractError> for ModelError {
  fn from(err: TractError) -> Self {
    ModelError::TractError(err)
  }
}

/// 纯 Rust 的 ONNX 推理，无需本地运行时
pub struct TractModel {
  plan: TractPlan,
  spec: TensorSpec,
}

impl FromUrlWithScheme for TractModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let spec = spec_from_url(url, TensorKind::Float32)?;
    let data = read_model_file(url, Self::SCHEME)?;
    Self::from_bytes(&data, spec)
  }
}

impl TractModel {
  /// 解析模型字节流，固定输入形状并优化计算图
  pub fn from_bytes(data: &[u8], spec: TensorSpec) -> Result<Self, ModelError> {
    info!("创建 tract 推理计划");
    let datum = match spec.kind {
      TensorKind::UInt8 => u8::datum_type(),
      TensorKind::Float32 => f32::datum_type(),
    };
    let [n, d1, d2, d3] = spec.shape();
    debug!("模型输入形状: {:?} {:?}", spec.shape(), datum);

    let plan = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(data))?
      .with_input_fact(0, InferenceFact::dt_shape(datum, tvec!(n, d1, d2, d3)))?
      .into_optimized()?
      .into_runnable()?;

    let num_outputs = plan.model().outputs.len();
    if num_outputs == 0 {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(Self { plan, spec })
  }
}

impl Model for TractModel {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
    check_input(&self.spec, input)?;

    let shape = self.spec.shape();
    let tensor = match input {
      InputTensor::UInt8(data) => Tensor::from_shape(&shape, &data[..])?,
      InputTensor::Float32(data) => Tensor::from_shape(&shape, &data[..])?,
    };

    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(tensor.into()))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InferError("模型未返回输出".to_string()))?;

    // 量化输出统一转为 f32
    let values = output.cast_to::<f32>()?;
    Ok(values.as_slice::<f32>()?.to_vec())
  }
}
