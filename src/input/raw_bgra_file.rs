// 该文件是 Xunmian （寻面） 项目的一部分。
// src/input/raw_bgra_file.rs - 原始 BGRA 帧文件输入
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
  frame::{OwnedFrame, PixelFormat, RawFrame},
  input::{InputError, input_path},
};

/// 相机缓冲区的原始转储，例如 `bgra:///tmp/frame.raw?width=1280&height=720&stride=5184`。
///
/// `stride` 为每行字节数，缺省时按无填充处理。文件可以包含多帧，按顺序逐帧产生。
pub struct RawBgraFileInput {
  data: Vec<u8>,
  width: u32,
  height: u32,
  bytes_per_row: usize,
  offset: usize,
}

impl FromUrlWithScheme for RawBgraFileInput {
  const SCHEME: &'static str = "bgra";
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, InputError> {
  value
    .parse()
    .map_err(|_| InputError::InvalidParameter(format!("无效的 {}: {}", key, value)))
}

impl FromUrl for RawBgraFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut width = None;
    let mut height = None;
    let mut stride = None;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => width = Some(parse_param::<u32>("width", &value)?),
        "height" => height = Some(parse_param::<u32>("height", &value)?),
        "stride" => stride = Some(parse_param::<usize>("stride", &value)?),
        other => debug!("忽略未知的输入参数: {}", other),
      }
    }

    let width = width.ok_or_else(|| InputError::InvalidParameter("缺少 width".to_string()))?;
    let height = height.ok_or_else(|| InputError::InvalidParameter("缺少 height".to_string()))?;

    let path = input_path(url)?;
    info!("读取原始 BGRA 文件: {}", path.display());
    let data = std::fs::read(&path)?;
    Self::from_bytes(data, width, height, stride)
  }
}

impl RawBgraFileInput {
  pub fn from_bytes(
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: Option<usize>,
  ) -> Result<Self, InputError> {
    let bytes_per_row = stride.unwrap_or(width as usize * PixelFormat::Bgra8.bytes_per_pixel());
    // 校验至少能构成一帧
    RawFrame::with_row_stride(&data, width, height, bytes_per_row, PixelFormat::Bgra8)?;

    Ok(Self {
      data,
      width,
      height,
      bytes_per_row,
      offset: 0,
    })
  }

  /// 相邻两帧起点的间距，含最后一行的填充
  fn frame_len(&self) -> usize {
    self.bytes_per_row.saturating_mul(self.height as usize)
  }
}

impl Iterator for RawBgraFileInput {
  type Item = OwnedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let remaining = self.data.get(self.offset..)?;
    if remaining.is_empty() {
      return None;
    }

    let len = self.frame_len().min(remaining.len());
    let frame = OwnedFrame::with_row_stride(
      remaining[..len].to_vec(),
      self.width,
      self.height,
      self.bytes_per_row,
      PixelFormat::Bgra8,
    )
    .ok()?;
    self.offset = self.offset.saturating_add(self.frame_len());
    Some(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::FrameError;

  #[test]
  fn splits_file_into_frames() {
    let data: Vec<u8> = (0..32).collect();
    let input = RawBgraFileInput::from_bytes(data, 2, 2, None).unwrap();
    let frames: Vec<OwnedFrame> = input.collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].as_raw().row(0), &[16, 17, 18, 19, 20, 21, 22, 23]);
  }

  #[test]
  fn honours_row_stride() {
    // 1x2，每行 8 字节，最后一行不带填充
    let data = vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8];
    let mut input = RawBgraFileInput::from_bytes(data, 1, 2, Some(8)).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.as_raw().row(1), &[5, 6, 7, 8]);
    assert!(input.next().is_none());
  }

  #[test]
  fn too_short_for_one_frame() {
    assert!(matches!(
      RawBgraFileInput::from_bytes(vec![0; 15], 2, 2, None),
      Err(InputError::FrameError(_))
    ));
  }

  #[test]
  fn overflowing_stride_is_rejected() {
    let path = std::env::temp_dir().join(format!("xunmian-stride-{}.raw", std::process::id()));
    std::fs::write(&path, [0u8; 64]).unwrap();
    let url = Url::parse(&format!(
      "bgra://{}?width=1&height=2&stride={}",
      path.display(),
      usize::MAX
    ))
    .unwrap();
    let result = RawBgraFileInput::from_url(&url);
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(
      result,
      Err(InputError::FrameError(FrameError::LayoutOverflow { .. }))
    ));
  }

  #[test]
  fn single_row_with_huge_stride_yields_one_frame() {
    let mut input = RawBgraFileInput::from_bytes(vec![1, 2, 3, 4], 1, 1, Some(usize::MAX)).unwrap();
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn requires_dimensions() {
    let url = Url::parse("bgra:///tmp/frame.raw?width=2").unwrap();
    assert!(matches!(
      RawBgraFileInput::from_url(&url),
      Err(InputError::InvalidParameter(_))
    ));
  }
}
