// 该文件是 Xunmian （寻面） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbaImage};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{OwnedFrame, PixelFormat},
  input::{InputError, input_path},
};

/// 读取一张图片，转为与相机输出相同的 BGRA 帧，只产生一帧
pub struct ImageFileInput {
  frame: Option<OwnedFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = input_path(url)?;
    info!("读取图像文件: {}", path.display());
    let image = ImageReader::open(&path)?
      .with_guessed_format()?
      .decode()?
      .to_rgba8();

    Ok(ImageFileInput {
      frame: Some(bgra_frame_from_rgba(image)?),
    })
  }
}

/// RGBA -> BGRA，仅交换 R 与 B
pub fn bgra_frame_from_rgba(image: RgbaImage) -> Result<OwnedFrame, InputError> {
  let (width, height) = image.dimensions();
  let mut data = image.into_raw();
  for pixel in data.chunks_exact_mut(4) {
    pixel.swap(0, 2);
  }
  Ok(OwnedFrame::new(data, width, height, PixelFormat::Bgra8)?)
}

impl Iterator for ImageFileInput {
  type Item = OwnedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  #[test]
  fn rgba_image_becomes_bgra_frame() {
    let image = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
    let frame = bgra_frame_from_rgba(image).unwrap();
    assert_eq!(frame.format(), PixelFormat::Bgra8);
    assert_eq!(frame.as_raw().row(0), &[30, 20, 10, 255, 30, 20, 10, 255]);
  }

  #[test]
  fn yields_a_single_frame() {
    let path = std::env::temp_dir().join(format!("xunmian-input-{}.png", std::process::id()));
    RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]))
      .save(&path)
      .unwrap();
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    std::fs::remove_file(&path).unwrap();

    let frame = input.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (3, 2));
    assert!(input.next().is_none());
  }
}
