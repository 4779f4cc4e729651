// 该文件是 Xunmian （寻面） 项目的一部分。
// src/frame.rs - 像素帧与输入张量定义
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

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 32 位像素的字节排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Bgra8,
  Rgba8,
  Argb8,
}

impl PixelFormat {
  pub fn bytes_per_pixel(&self) -> usize {
    4
  }
}

impl std::fmt::Display for PixelFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PixelFormat::Bgra8 => write!(f, "BGRA8"),
      PixelFormat::Rgba8 => write!(f, "RGBA8"),
      PixelFormat::Argb8 => write!(f, "ARGB8"),
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("行跨度 {bytes_per_row} 小于一行像素所需的 {required} 字节")]
  RowStrideTooSmall { bytes_per_row: usize, required: usize },
  #[error("像素缓冲区不可读: 需要 {required} 字节, 实际 {actual} 字节")]
  BufferTooShort { required: usize, actual: usize },
  #[error("帧布局溢出: 行跨度 {bytes_per_row}, 高度 {height}")]
  LayoutOverflow { bytes_per_row: usize, height: u32 },
}

fn validate_layout(
  len: usize,
  width: u32,
  height: u32,
  bytes_per_row: usize,
  format: PixelFormat,
) -> Result<(), FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::EmptyFrame { width, height });
  }

  let row_bytes = (width as usize)
    .checked_mul(format.bytes_per_pixel())
    .ok_or(FrameError::LayoutOverflow {
      bytes_per_row,
      height,
    })?;
  if bytes_per_row < row_bytes {
    return Err(FrameError::RowStrideTooSmall {
      bytes_per_row,
      required: row_bytes,
    });
  }

  // 最后一行无需包含行尾填充
  let required = frame_span(bytes_per_row, height, row_bytes).ok_or(FrameError::LayoutOverflow {
    bytes_per_row,
    height,
  })?;
  if len < required {
    return Err(FrameError::BufferTooShort {
      required,
      actual: len,
    });
  }

  Ok(())
}

/// 一帧占用的字节数，最后一行只计 `last_row` 字节，溢出时返回 `None`
fn frame_span(bytes_per_row: usize, height: u32, last_row: usize) -> Option<usize> {
  bytes_per_row
    .checked_mul((height as usize).checked_sub(1)?)?
    .checked_add(last_row)
}

/// 相机帧的只读视图，生命周期内借用底层像素缓冲区
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
  data: &'a [u8],
  width: u32,
  height: u32,
  bytes_per_row: usize,
  format: PixelFormat,
}

impl<'a> RawFrame<'a> {
  /// 紧密排列（无行尾填充）的帧
  pub fn new(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
    let bytes_per_row = width as usize * format.bytes_per_pixel();
    Self::with_row_stride(data, width, height, bytes_per_row, format)
  }

  pub fn with_row_stride(
    data: &'a [u8],
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    validate_layout(data.len(), width, height, bytes_per_row, format)?;
    Ok(Self {
      data,
      width,
      height,
      bytes_per_row,
      format,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn bytes_per_row(&self) -> usize {
    self.bytes_per_row
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn byte_len(&self) -> usize {
    self.data.len()
  }

  /// 第 `y` 行的像素字节，不含行尾填充；`y` 须小于高度
  pub(crate) fn row(&self, y: u32) -> &'a [u8] {
    let start = y as usize * self.bytes_per_row;
    let len = self.width as usize * self.format.bytes_per_pixel();
    &self.data[start..start + len]
  }

  pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + use<'a> {
    let frame = *self;
    (0..frame.height).map(move |y| frame.row(y))
  }

  pub fn to_owned_frame(&self) -> OwnedFrame {
    let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
    for row in self.rows() {
      data.extend_from_slice(row);
    }
    OwnedFrame {
      data: data.into_boxed_slice(),
      width: self.width,
      height: self.height,
      bytes_per_row: self.width as usize * self.format.bytes_per_pixel(),
      format: self.format,
    }
  }
}

/// 拥有像素数据的帧，可在线程之间传递
#[derive(Debug, Clone)]
pub struct OwnedFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  bytes_per_row: usize,
  format: PixelFormat,
}

impl OwnedFrame {
  pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
    let bytes_per_row = width as usize * format.bytes_per_pixel();
    Self::with_row_stride(data, width, height, bytes_per_row, format)
  }

  pub fn with_row_stride(
    data: Vec<u8>,
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    validate_layout(data.len(), width, height, bytes_per_row, format)?;
    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      bytes_per_row,
      format,
    })
  }

  pub fn as_raw(&self) -> RawFrame<'_> {
    RawFrame {
      data: &self.data,
      width: self.width,
      height: self.height,
      bytes_per_row: self.bytes_per_row,
      format: self.format,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }
}

/// 模型输入张量的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
  /// 量化模型，输入为 0..=255 的 u8
  UInt8,
  /// 浮点模型，输入归一化到 [0, 1]
  Float32,
}

impl TensorKind {
  pub fn is_quantized(&self) -> bool {
    matches!(self, TensorKind::UInt8)
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "u8" | "uint8" => Some(TensorKind::UInt8),
      "f32" | "float32" => Some(TensorKind::Float32),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

impl TensorLayout {
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "nhwc" => Some(TensorLayout::Nhwc),
      "nchw" => Some(TensorLayout::Nchw),
      _ => None,
    }
  }
}

/// 模型声明的输入张量形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpec {
  pub batch: usize,
  pub width: u32,
  pub height: u32,
  pub channels: usize,
  pub kind: TensorKind,
  pub layout: TensorLayout,
}

pub const DEFAULT_INPUT_WIDTH: u32 = 640;
pub const DEFAULT_INPUT_HEIGHT: u32 = 640;

impl Default for TensorSpec {
  fn default() -> Self {
    Self {
      batch: 1,
      width: DEFAULT_INPUT_WIDTH,
      height: DEFAULT_INPUT_HEIGHT,
      channels: RGB_CHANNELS,
      kind: TensorKind::Float32,
      layout: TensorLayout::Nhwc,
    }
  }
}

impl TensorSpec {
  pub fn with_size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  pub fn with_kind(mut self, kind: TensorKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  /// batch × W × H × C
  pub fn element_count(&self) -> usize {
    self.batch * self.width as usize * self.height as usize * self.channels
  }

  pub fn shape(&self) -> [usize; 4] {
    match self.layout {
      TensorLayout::Nhwc => [
        self.batch,
        self.height as usize,
        self.width as usize,
        self.channels,
      ],
      TensorLayout::Nchw => [
        self.batch,
        self.channels,
        self.height as usize,
        self.width as usize,
      ],
    }
  }
}

/// 已转码、可直接拷贝进模型的输入数据
#[derive(Debug, Clone, PartialEq)]
pub enum InputTensor {
  UInt8(Box<[u8]>),
  Float32(Box<[f32]>),
}

impl InputTensor {
  pub fn kind(&self) -> TensorKind {
    match self {
      InputTensor::UInt8(_) => TensorKind::UInt8,
      InputTensor::Float32(_) => TensorKind::Float32,
    }
  }

  /// 元素个数（不是字节数）
  pub fn len(&self) -> usize {
    match self {
      InputTensor::UInt8(data) => data.len(),
      InputTensor::Float32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn byte_len(&self) -> usize {
    match self {
      InputTensor::UInt8(data) => data.len(),
      InputTensor::Float32(data) => data.len() * std::mem::size_of::<f32>(),
    }
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match self {
      InputTensor::UInt8(data) => Some(data),
      InputTensor::Float32(_) => None,
    }
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match self {
      InputTensor::Float32(data) => Some(data),
      InputTensor::UInt8(_) => None,
    }
  }
}
