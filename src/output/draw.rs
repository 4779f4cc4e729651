// 该文件是 Xunmian （寻面） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect as PixelRect,
};
use tracing::info;

use crate::{
  decode::DetectResult,
  frame::{OwnedFrame, RawFrame},
  output::overlay::{Overlay, ViewTransform},
};

const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_TEXT_PADDING: i32 = 2;
const BORDER_THICKNESS: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for RawFrame<'_> {
  fn to_rgb_image(&self) -> RgbImage {
    let frame = *self;
    ImageBuffer::from_fn(frame.width(), frame.height(), |x, y| {
      let row = frame.row(y);
      let idx = x as usize * 4;
      // BGRA
      Rgb([row[idx + 2], row[idx + 1], row[idx]])
    })
  }
}

impl ToRgbImage for OwnedFrame {
  fn to_rgb_image(&self) -> RgbImage {
    self.as_raw().to_rgb_image()
  }
}

/// 在图像上绘制检测框，给定字体时同时绘制标签
#[derive(Default)]
pub struct Draw {
  font: Option<FontArc>,
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Self { font: Some(font) })
  }

  fn draw_overlay(&self, image: &mut RgbImage, overlay: &Overlay) {
    let Overlay { name, rect, color } = overlay;
    let color = Rgb(*color);
    let (x, y) = (rect.x.floor() as i32, rect.y.floor() as i32);
    let (w, h) = (rect.width.round() as i32, rect.height.round() as i32);

    // 加粗边框
    for t in 0..BORDER_THICKNESS {
      let (bw, bh) = (w - 2 * t, h - 2 * t);
      if bw <= 0 || bh <= 0 {
        break;
      }
      draw_hollow_rect_mut(
        image,
        PixelRect::at(x + t, y + t).of_size(bw as u32, bh as u32),
        color,
      );
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let scale = PxScale::from(LABEL_FONT_SIZE);
    let (text_w, text_h) = text_size(scale, font, name);
    if text_w == 0 || text_h == 0 {
      return;
    }
    let label_h = text_h as i32 + 2 * LABEL_TEXT_PADDING;
    let label_y = if y - label_h >= 0 { y - label_h } else { y };
    draw_filled_rect_mut(
      image,
      PixelRect::at(x, label_y).of_size(text_w + 2 * LABEL_TEXT_PADDING as u32, label_h as u32),
      color,
    );
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x + LABEL_TEXT_PADDING,
      label_y + LABEL_TEXT_PADDING,
      scale,
      font,
      name,
    );
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    let transform = ViewTransform::identity(image.dimensions());
    for overlay in transform.overlays(result) {
      self.draw_overlay(image, &overlay);
    }
  }

  pub fn draw_detection<F: ToRgbImage>(&self, frame: &F, result: &DetectResult) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::{Detection, Rect},
    frame::PixelFormat,
  };

  #[test]
  fn bgra_frame_to_rgb_image() {
    let frame = OwnedFrame::new(vec![1, 2, 3, 255, 4, 5, 6, 255], 2, 1, PixelFormat::Bgra8).unwrap();
    let image = frame.to_rgb_image();
    assert_eq!(image.get_pixel(0, 0), &Rgb([3, 2, 1]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([6, 5, 4]));
  }

  #[test]
  fn draws_clamped_border() {
    let frame = OwnedFrame::new(vec![0; 20 * 20 * 4], 20, 20, PixelFormat::Bgra8).unwrap();
    let result = DetectResult::from(Some(Detection {
      confidence: 0.9,
      class_id: 0,
      class_name: "face".to_string(),
      bbox: Rect::new(-5.0, 4.0, 10.0, 40.0),
      color: [0, 255, 0],
    }));
    let image = Draw::default().draw_detection(&frame, &result);
    // x 被裁剪到边距 2
    assert_eq!(image.get_pixel(2, 10), &Rgb([0, 255, 0]));
    assert_eq!(image.get_pixel(0, 10), &Rgb([0, 0, 0]));
  }
}
