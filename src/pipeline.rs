// 该文件是 Xunmian （寻面） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::{
  path::Path,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  decode::{DecoderConfig, DetectResult, DetectionDecoder},
  frame::RawFrame,
  labels::{LabelError, LabelTable},
  model::{Model, ModelError, ModelWrapper},
  transcode::{TranscodeError, transcode_for},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[source] ModelError),
  #[error("标签加载失败: {0}")]
  Labels(#[from] LabelError),
  #[error("帧格式错误: {0}")]
  Format(#[from] TranscodeError),
  #[error("推理失败: {0}")]
  Inference(#[source] ModelError),
  #[error("工作线程在流水线就绪前退出")]
  WorkerExited,
}

impl PipelineError {
  /// 只有启动期的配置错误是致命的，单帧错误可以跳过
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      PipelineError::ModelLoad(_) | PipelineError::Labels(_) | PipelineError::WorkerExited
    )
  }
}

/// 可选的最小推理间隔，默认不启用
#[derive(Debug, Clone)]
pub struct FrameThrottle {
  min_interval: Duration,
  last_admitted: Option<Instant>,
}

impl FrameThrottle {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_admitted: None,
    }
  }

  pub fn min_interval(&self) -> Duration {
    self.min_interval
  }

  /// 距离上一次放行不少于 `min_interval` 时放行，并记录本次时间
  pub fn admit(&mut self, now: Instant) -> bool {
    match self.last_admitted {
      Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
      _ => {
        self.last_admitted = Some(now);
        true
      }
    }
  }
}

/// 转码 -> 推理 -> 解码，每帧同步执行一次。
///
/// 模型与标签表在构造后只读，帧缓冲区仅在一次调用内借用。
pub struct Pipeline<M> {
  model: M,
  decoder: DetectionDecoder,
  throttle: Option<FrameThrottle>,
}

impl Pipeline<ModelWrapper> {
  /// 加载模型与标签，任何失败都是致命的
  pub fn load(
    model_url: &Url,
    labels_path: impl AsRef<Path>,
    config: DecoderConfig,
  ) -> Result<Self, PipelineError> {
    let model = ModelWrapper::from_url(model_url).map_err(PipelineError::ModelLoad)?;
    let labels = LabelTable::load(labels_path)?;
    Ok(Self::new(model, DetectionDecoder::new(config, labels)))
  }
}

impl<M: Model> Pipeline<M> {
  pub fn new(model: M, decoder: DetectionDecoder) -> Self {
    Self {
      model,
      decoder,
      throttle: None,
    }
  }

  pub fn with_throttle(mut self, throttle: Option<FrameThrottle>) -> Self {
    self.throttle = throttle;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn decoder(&self) -> &DetectionDecoder {
    &self.decoder
  }

  /// 转码并推理，返回模型的原始输出
  pub fn infer_raw(&self, frame: &RawFrame<'_>) -> Result<Vec<f32>, PipelineError> {
    let spec = self.model.input_spec();
    let input = transcode_for(frame, &spec)?;
    debug!("输入张量: {} 个 {:?} 元素", input.len(), input.kind());

    let now = Instant::now();
    let raw = self.model.infer(&input).map_err(PipelineError::Inference)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(raw)
  }

  /// 处理一帧，错误原样返回
  pub fn detect(&self, frame: &RawFrame<'_>) -> Result<DetectResult, PipelineError> {
    let raw = self.infer_raw(frame)?;
    Ok(self.decoder.decode_result(&raw, frame.width(), frame.height()))
  }

  /// 处理一帧，单帧错误记录日志后视为无检测结果
  pub fn process(&mut self, frame: &RawFrame<'_>) -> DetectResult {
    self.process_at(frame, Instant::now())
  }

  pub fn process_at(&mut self, frame: &RawFrame<'_>, now: Instant) -> DetectResult {
    if let Some(throttle) = self.throttle.as_mut()
      && !throttle.admit(now)
    {
      debug!("距上次推理不足 {:?}，跳过该帧", throttle.min_interval());
      return DetectResult::empty();
    }

    match self.detect(frame) {
      Ok(result) => result,
      Err(e) => {
        warn!("跳过该帧: {}", e);
        DetectResult::empty()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::BoxPadding,
    frame::{InputTensor, PixelFormat, TensorKind, TensorSpec},
    model::ReplayModel,
  };

  struct FailingModel;

  impl Model for FailingModel {
    fn input_spec(&self) -> TensorSpec {
      TensorSpec::default().with_size(2, 2)
    }

    fn infer(&self, _input: &InputTensor) -> Result<Vec<f32>, ModelError> {
      Err(ModelError::InferError("boom".to_string()))
    }
  }

  fn face_decoder() -> DetectionDecoder {
    DetectionDecoder::new(DecoderConfig::default(), LabelTable::single("face"))
  }

  fn replay(output: Vec<f32>) -> Pipeline<ReplayModel> {
    let spec = TensorSpec::default().with_size(2, 2).with_kind(TensorKind::UInt8);
    Pipeline::new(ReplayModel::new(output, spec), face_decoder())
  }

  #[test]
  fn throttle_admits_after_interval() {
    let mut throttle = FrameThrottle::new(Duration::from_millis(50));
    let t0 = Instant::now();
    assert!(throttle.admit(t0));
    assert!(!throttle.admit(t0 + Duration::from_millis(49)));
    assert!(throttle.admit(t0 + Duration::from_millis(50)));
    assert!(!throttle.admit(t0 + Duration::from_millis(60)));
  }

  #[test]
  fn decodes_against_camera_size() {
    let pipeline = replay(vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0]);
    let data = vec![0u8; 640 * 480 * 4];
    let frame = RawFrame::new(&data, 640, 480, PixelFormat::Bgra8).unwrap();
    let result = pipeline.detect(&frame).unwrap();
    let bbox = result.best().unwrap().bbox;
    assert!((bbox.x - 196.0).abs() < 1e-3);
    assert!((bbox.y - 142.0).abs() < 1e-3);
  }

  #[test]
  fn bad_frames_are_absorbed() {
    let mut pipeline = replay(vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0]);
    let data = vec![0u8; 16];
    let frame = RawFrame::new(&data, 2, 2, PixelFormat::Rgba8).unwrap();
    assert!(matches!(
      pipeline.detect(&frame),
      Err(PipelineError::Format(TranscodeError::UnsupportedFormat(_)))
    ));
    assert!(pipeline.process(&frame).is_empty());
  }

  #[test]
  fn inference_failures_are_absorbed() {
    let mut pipeline = Pipeline::new(FailingModel, face_decoder());
    let data = vec![0u8; 16];
    let frame = RawFrame::new(&data, 2, 2, PixelFormat::Bgra8).unwrap();
    let err = pipeline.detect(&frame).unwrap_err();
    assert!(matches!(err, PipelineError::Inference(_)));
    assert!(!err.is_fatal());
    assert!(pipeline.process(&frame).is_empty());
  }

  #[test]
  fn throttled_frames_yield_no_detection() {
    let mut pipeline = replay(vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0])
      .with_throttle(Some(FrameThrottle::new(Duration::from_millis(50))));
    let data = vec![0u8; 16];
    let frame = RawFrame::new(&data, 2, 2, PixelFormat::Bgra8).unwrap();
    let t0 = Instant::now();
    assert_eq!(pipeline.process_at(&frame, t0).len(), 1);
    assert!(pipeline.process_at(&frame, t0 + Duration::from_millis(10)).is_empty());
    assert_eq!(
      pipeline
        .process_at(&frame, t0 + Duration::from_millis(80))
        .len(),
      1
    );
  }

  #[test]
  fn padding_is_configurable_through_pipeline() {
    let decoder = DetectionDecoder::new(
      DecoderConfig::default()
        .with_threshold(0.5)
        .with_padding(BoxPadding::NONE),
      LabelTable::single("face"),
    );
    let spec = TensorSpec::default().with_size(2, 2);
    let pipeline = Pipeline::new(
      ReplayModel::new(vec![0.5, 0.5, 0.5, 0.5, 0.55, 0.0], spec),
      decoder,
    );
    let data = vec![0u8; 16];
    let frame = RawFrame::new(&data, 2, 2, PixelFormat::Bgra8).unwrap();
    let result = pipeline.detect(&frame).unwrap();
    let bbox = result.best().unwrap().bbox;
    assert_eq!((bbox.x, bbox.y, bbox.width, bbox.height), (0.5, 0.5, 1.0, 1.0));
  }

  #[test]
  fn load_errors_are_fatal() {
    let url = Url::parse("replay:///nonexistent/xunmian/raw.bin").unwrap();
    let err = Pipeline::load(&url, "/nonexistent/labels.txt", DecoderConfig::default())
      .err()
      .unwrap();
    assert!(err.is_fatal());
  }
}
