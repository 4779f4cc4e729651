// 该文件是 Xunmian （寻面） 项目的一部分。
// src/model/rknn.rs - RKNN NPU 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{InputTensor, TensorKind, TensorLayout, TensorSpec},
  model::{Model, ModelError, check_input, read_model_file, spec_from_url},
};

const RKNN_NUM_INPUTS: u32 = 1;

impl From<rknpu::Error> for ModelError {
  fn from(err: rknpu::Error) -> Self {
    ModelError::RknnError(err)
  }
}

/// RKNN 模型，输入固定为 NHWC 排列的 u8，归一化由模型内部完成
pub struct RknnModel {
  context: Context,
  spec: TensorSpec,
}

impl FromUrlWithScheme for RknnModel {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let spec = spec_from_url(url, TensorKind::UInt8)?;
    let data = read_model_file(url, Self::SCHEME)?;
    Self::from_bytes(&data, spec, InitFlags::default())
  }
}

impl RknnModel {
  pub fn from_bytes(data: &[u8], spec: TensorSpec, flags: InitFlags) -> Result<Self, ModelError> {
    if spec.kind != TensorKind::UInt8 || spec.layout != TensorLayout::Nhwc {
      return Err(ModelError::ModelInvalid(format!(
        "RKNN 模型仅支持 NHWC u8 输入, 实际为 {:?} {:?}",
        spec.layout, spec.kind
      )));
    }

    info!("创建 RKNN 推理上下文");
    let context = Context::new(data, flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ModelError::ModelInvalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs == 0 {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(Self { context, spec })
  }
}

impl Model for RknnModel {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
    check_input(&self.spec, input)?;
    let data = input
      .as_u8()
      .ok_or_else(|| ModelError::InferError("RKNN 输入必须为 u8".to_string()))?;

    debug!("设置模型输入");
    self
      .context
      .set_input(0, data, TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let values = output
      .get_f32(0)
      .map_err(|e| ModelError::InferError(format!("获取第 0 个输出失败: {}", e)))?;
    Ok(values.to_vec())
  }
}
