// 该文件是 Xunmian （寻面） 项目的一部分。
// src/transcode.rs - BGRA 像素转码为模型输入
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

use image::{ImageBuffer, Rgba, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{
  FrameError, InputTensor, OwnedFrame, PixelFormat, RGB_CHANNELS, RawFrame, TensorLayout,
  TensorSpec,
};

const BGRA_CHANNELS: usize = 4;
const LAST_BGR_COMPONENT: usize = 2;

#[derive(Error, Debug, PartialEq)]
pub enum TranscodeError {
  #[error("不支持的像素格式: {0}, 仅支持 BGRA8")]
  UnsupportedFormat(PixelFormat),
  #[error("张量大小不匹配: 期望 {expected} 个元素, 帧可提供 {actual} 个")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("缩放后的帧无效: {0}")]
  Frame(#[from] FrameError),
  #[error("无法构造缩放缓冲区: {width}x{height}")]
  ScaleBuffer { width: u32, height: u32 },
}

/// 将 BGRA 帧转为紧密排列的 RGB 数据。
///
/// `byte_count` 必须恰好等于 `W × H × 3`，否则返回 [`TranscodeError::SizeMismatch`]，
/// 不会截断或补齐。`quantized` 为 `false` 时每个分量除以 255.0 存为 `f32`，
/// 此时返回 `byte_count` 个浮点数而非字节。
pub fn transcode(
  frame: &RawFrame<'_>,
  byte_count: usize,
  quantized: bool,
) -> Result<InputTensor, TranscodeError> {
  if frame.format() != PixelFormat::Bgra8 {
    return Err(TranscodeError::UnsupportedFormat(frame.format()));
  }

  let row_len = frame.width() as usize * RGB_CHANNELS;
  let available = row_len * frame.height() as usize;
  if byte_count != available {
    return Err(TranscodeError::SizeMismatch {
      expected: byte_count,
      actual: available,
    });
  }

  let mut rgb = vec![0u8; byte_count].into_boxed_slice();
  for (dst_row, src_row) in rgb.chunks_exact_mut(row_len).zip(frame.rows()) {
    for (dst, src) in dst_row
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(src_row.chunks_exact(BGRA_CHANNELS))
    {
      // B, G, R 逆序写入，丢弃 A
      for (component, &value) in src[..RGB_CHANNELS].iter().enumerate() {
        dst[LAST_BGR_COMPONENT - component] = value;
      }
    }
  }

  if quantized {
    return Ok(InputTensor::UInt8(rgb));
  }

  let normalized = rgb.iter().map(|&v| f32::from(v) / 255.0).collect();
  Ok(InputTensor::Float32(normalized))
}

/// 按模型声明的输入转码，必要时先缩放，再按布局重排
pub fn transcode_for(frame: &RawFrame<'_>, spec: &TensorSpec) -> Result<InputTensor, TranscodeError> {
  let tensor = if frame.width() == spec.width && frame.height() == spec.height {
    transcode(frame, spec.element_count(), spec.kind.is_quantized())?
  } else {
    debug!(
      "缩放帧 {}x{} -> {}x{}",
      frame.width(),
      frame.height(),
      spec.width,
      spec.height
    );
    let scaled = scale_to(frame, spec.width, spec.height)?;
    transcode(&scaled.as_raw(), spec.element_count(), spec.kind.is_quantized())?
  };

  Ok(match spec.layout {
    TensorLayout::Nhwc => tensor,
    TensorLayout::Nchw => to_nchw(&tensor, spec.width as usize, spec.height as usize),
  })
}

/// 整帧双线性缩放（不裁剪），通道顺序保持不变
pub fn scale_to(frame: &RawFrame<'_>, width: u32, height: u32) -> Result<OwnedFrame, TranscodeError> {
  let packed: Vec<u8> = frame.rows().flatten().copied().collect();
  let image: ImageBuffer<Rgba<u8>, Vec<u8>> =
    ImageBuffer::from_raw(frame.width(), frame.height(), packed).ok_or(
      TranscodeError::ScaleBuffer {
        width: frame.width(),
        height: frame.height(),
      },
    )?;

  let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
  Ok(OwnedFrame::new(
    resized.into_raw(),
    width,
    height,
    frame.format(),
  )?)
}

fn planar<T: Copy + Default>(data: &[T], width: usize, height: usize) -> Box<[T]> {
  let plane = width * height;
  let mut out = vec![T::default(); data.len()].into_boxed_slice();
  for (idx, pixel) in data.chunks_exact(RGB_CHANNELS).enumerate() {
    for (c, &value) in pixel.iter().enumerate() {
      out[c * plane + idx] = value;
    }
  }
  out
}

/// NHWC -> NCHW
pub fn to_nchw(tensor: &InputTensor, width: usize, height: usize) -> InputTensor {
  match tensor {
    InputTensor::UInt8(data) => InputTensor::UInt8(planar(data, width, height)),
    InputTensor::Float32(data) => InputTensor::Float32(planar(data, width, height)),
  }
}
