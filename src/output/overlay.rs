// 该文件是 Xunmian （寻面） 项目的一部分。
// src/output/overlay.rs - 检测框到显示区域的换算
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

use crate::decode::{DetectResult, Detection, Rect};

pub const EDGE_OFFSET: f32 = 2.0;

/// 渲染端使用的显示记录
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub name: String,
  pub rect: Rect,
  pub color: [u8; 3],
}

/// 形如 `face  (90%)`，百分比向零截断
pub fn label_text(detection: &Detection) -> String {
  let percent = (detection.confidence * 100.0) as i32;
  format!("{}  ({}%)", detection.class_name, percent)
}

/// 图像坐标到显示区域坐标的缩放与裁剪
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
  scale_x: f32,
  scale_y: f32,
  view_width: f32,
  view_height: f32,
  edge_offset: f32,
}

impl ViewTransform {
  pub fn new(image_size: (u32, u32), view_size: (f32, f32)) -> Self {
    let (image_width, image_height) = image_size;
    let (view_width, view_height) = view_size;
    Self {
      scale_x: view_width / image_width.max(1) as f32,
      scale_y: view_height / image_height.max(1) as f32,
      view_width,
      view_height,
      edge_offset: EDGE_OFFSET,
    }
  }

  /// 显示区域与图像尺寸相同
  pub fn identity(image_size: (u32, u32)) -> Self {
    Self::new(image_size, (image_size.0 as f32, image_size.1 as f32))
  }

  pub fn with_edge_offset(mut self, edge_offset: f32) -> Self {
    self.edge_offset = edge_offset;
    self
  }

  pub fn apply(&self, rect: &Rect) -> Rect {
    let mut out = Rect {
      x: rect.x * self.scale_x,
      y: rect.y * self.scale_y,
      width: rect.width * self.scale_x,
      height: rect.height * self.scale_y,
    };

    if out.x < 0.0 {
      out.x = self.edge_offset;
    }
    if out.y < 0.0 {
      out.y = self.edge_offset;
    }
    if out.max_y() > self.view_height {
      out.height = self.view_height - out.y - self.edge_offset;
    }
    if out.max_x() > self.view_width {
      out.width = self.view_width - out.x - self.edge_offset;
    }

    out
  }

  pub fn overlay(&self, detection: &Detection) -> Overlay {
    Overlay {
      name: label_text(detection),
      rect: self.apply(&detection.bbox),
      color: detection.color,
    }
  }

  pub fn overlays(&self, result: &DetectResult) -> Vec<Overlay> {
    result.items.iter().map(|d| self.overlay(d)).collect()
  }
}
