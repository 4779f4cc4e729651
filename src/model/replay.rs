// 该文件是 Xunmian （寻面） 项目的一部分。
// src/model/replay.rs - 回放已记录的模型输出
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::{RECORD_STRIDE, floats_from_le_bytes},
  frame::{InputTensor, TensorKind, TensorSpec},
  model::{Model, ModelError, check_input, read_model_file, spec_from_url},
};

/// 以小端 f32 字节流保存的原始输出（`--dump-raw` 生成），每次推理原样返回。
///
/// 用于离线调试解码逻辑，输入仍按声明的形状检查。
#[derive(Debug, Clone)]
pub struct ReplayModel {
  output: Vec<f32>,
  spec: TensorSpec,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let spec = spec_from_url(url, TensorKind::Float32)?;
    let data = read_model_file(url, Self::SCHEME)?;
    Self::from_bytes(&data, spec)
  }
}

impl ReplayModel {
  pub fn from_bytes(data: &[u8], spec: TensorSpec) -> Result<Self, ModelError> {
    let output = floats_from_le_bytes(data)?;
    info!("回放输出: {} 个浮点数", output.len());
    if output.len() % RECORD_STRIDE != 0 {
      debug!("输出长度不是 {} 的整数倍，末尾数据将被忽略", RECORD_STRIDE);
    }
    Ok(Self { output, spec })
  }

  pub fn new(output: Vec<f32>, spec: TensorSpec) -> Self {
    Self { output, spec }
  }
}

impl Model for ReplayModel {
  fn input_spec(&self) -> TensorSpec {
    self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
    check_input(&self.spec, input)?;
    Ok(self.output.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decode::{DecodeError, floats_to_le_bytes};

  #[test]
  fn replays_recorded_output() {
    let recorded = [0.5f32, 0.5, 0.2, 0.2, 0.9, 0.0];
    let spec = TensorSpec::default().with_size(1, 1);
    let model = ReplayModel::from_bytes(&floats_to_le_bytes(&recorded), spec).unwrap();
    let input = InputTensor::Float32(vec![0.0; 3].into_boxed_slice());
    assert_eq!(model.infer(&input).unwrap(), recorded);
  }

  #[test]
  fn rejects_unaligned_dump() {
    assert!(matches!(
      ReplayModel::from_bytes(&[0u8; 7], TensorSpec::default()),
      Err(ModelError::OutputDecodeError(DecodeError::UnalignedBuffer(7)))
    ));
  }

  #[test]
  fn rejects_wrong_input_size() {
    let model = ReplayModel::new(Vec::new(), TensorSpec::default());
    let input = InputTensor::Float32(vec![0.0; 3].into_boxed_slice());
    assert!(matches!(
      model.infer(&input),
      Err(ModelError::InputMismatch { .. })
    ));
  }

  #[test]
  fn loads_from_url() {
    let path = std::env::temp_dir().join(format!("xunmian-replay-{}.bin", std::process::id()));
    std::fs::write(&path, floats_to_le_bytes(&[1.0, 2.0])).unwrap();
    let url = Url::parse(&format!("replay://{}?width=4&height=2&kind=u8", path.display())).unwrap();
    let model = ReplayModel::from_url(&url).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(model.input_spec().element_count(), 24);
    assert_eq!(model.input_spec().kind, TensorKind::UInt8);
  }
}
