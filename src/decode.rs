// 该文件是 Xunmian （寻面） 项目的一部分。
// src/decode.rs - 检测输出解码
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

//! # 检测输出解码
//!
//! 模型输出是一个扁平的 `f32` 数组，每 6 个值描述一个候选框：
//!
//! ```text
//! [x_center, y_center, width, height, score, class]
//! ```
//!
//! 坐标均为 [0, 1] 的归一化值。解码过程：
//!
//! 1. 按 6 个一组切分，末尾不足 6 个的值被丢弃；
//! 2. 将归一化中心点与宽高换算为原始图像上的像素矩形，并加上固定的边距修正；
//! 3. 仅保留 `score > threshold` 的候选（严格大于）；
//! 4. 按置信度降序，只返回置信度最高的一个；大于 1 的分数在排序后截断为 1.0。
//!
//! 返回的矩形可能超出图像边界，裁剪由渲染端负责。

use thiserror::Error;
use tracing::debug;

use crate::labels::LabelTable;

/// 每个候选框占用的浮点数个数
pub const RECORD_STRIDE: usize = 6;
pub const DEFAULT_THRESHOLD: f32 = 0.6;

const COLOR_STRIDE: f32 = 10.0;

/// 像素坐标下的矩形，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Rect {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn max_x(&self) -> f32 {
    self.x + self.width
  }

  pub fn max_y(&self) -> f32 {
    self.y + self.height
  }
}

/// 一个原始候选框记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetectionRecord {
  pub x_center: f32,
  pub y_center: f32,
  pub width: f32,
  pub height: f32,
  pub score: f32,
  pub class: f32,
}

impl RawDetectionRecord {
  fn from_chunk(chunk: &[f32]) -> Self {
    Self {
      x_center: chunk[0],
      y_center: chunk[1],
      width: chunk[2],
      height: chunk[3],
      score: chunk[4],
      class: chunk[5],
    }
  }
}

/// 将扁平输出切分为记录，末尾不完整的一组被忽略
pub fn chunk_records(raw: &[f32]) -> impl Iterator<Item = RawDetectionRecord> + '_ {
  raw
    .chunks_exact(RECORD_STRIDE)
    .map(RawDetectionRecord::from_chunk)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出缓冲区长度 {0} 不是 f32 大小的整数倍")]
  UnalignedBuffer(usize),
}

/// 将小端字节序的输出缓冲区解释为 `f32` 数组。
///
/// 长度必须是 4 的整数倍，否则拒绝解析。
pub fn floats_from_le_bytes(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
  const F32_SIZE: usize = std::mem::size_of::<f32>();
  if bytes.len() % F32_SIZE != 0 {
    return Err(DecodeError::UnalignedBuffer(bytes.len()));
  }

  Ok(
    bytes
      .chunks_exact(F32_SIZE)
      .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
      .collect(),
  )
}

pub fn floats_to_le_bytes(values: &[f32]) -> Vec<u8> {
  values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// 对换算后矩形的固定像素修正
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPadding {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl Default for BoxPadding {
  fn default() -> Self {
    Self {
      x: -60.0,
      y: -50.0,
      width: 100.0,
      height: 0.0,
    }
  }
}

impl BoxPadding {
  pub const NONE: BoxPadding = BoxPadding {
    x: 0.0,
    y: 0.0,
    width: 0.0,
    height: 0.0,
  };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
  pub threshold: f32,
  pub padding: BoxPadding,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      padding: BoxPadding::default(),
    }
  }
}

impl DecoderConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_padding(mut self, padding: BoxPadding) -> Self {
    self.padding = padding;
    self
  }
}

/// 单个检测结果，每次推理新建，不做修改
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub confidence: f32,
  pub class_id: usize,
  pub class_name: String,
  pub bbox: Rect,
  pub color: [u8; 3],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn best(&self) -> Option<&Detection> {
    self.items.first()
  }
}

impl From<Option<Detection>> for DetectResult {
  fn from(detection: Option<Detection>) -> Self {
    Self {
      items: detection.into_iter().collect(),
    }
  }
}

/// 归一化中心点与宽高换算为图像像素矩形
pub fn record_to_rect(
  record: &RawDetectionRecord,
  image_width: f32,
  image_height: f32,
  padding: &BoxPadding,
) -> Rect {
  let RawDetectionRecord {
    x_center: x,
    y_center: y,
    width: w,
    height: h,
    ..
  } = *record;

  Rect {
    x: (x - w / 2.0) * image_width + padding.x,
    y: (y - h / 2.0) * image_height + padding.y,
    width: w * image_width + padding.width,
    height: h * image_height + padding.height,
  }
}

/// 按类别序号生成显示颜色，类别 0 为绿色
pub fn class_color(class_id: usize) -> [u8; 3] {
  let hue = (120.0 + class_id as f32 * COLOR_STRIDE * 3.6) % 360.0;
  hsv_to_rgb(hue, 1.0, 1.0)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h as u32 {
    0..=59 => (c, x, 0.0),
    60..=119 => (x, c, 0.0),
    120..=179 => (0.0, c, x),
    180..=239 => (0.0, x, c),
    240..=299 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  [
    ((r + m) * 255.0).round() as u8,
    ((g + m) * 255.0).round() as u8,
    ((b + m) * 255.0).round() as u8,
  ]
}

pub struct DetectionDecoder {
  config: DecoderConfig,
  labels: LabelTable,
}

impl DetectionDecoder {
  pub fn new(config: DecoderConfig, labels: LabelTable) -> Self {
    Self { config, labels }
  }

  pub fn config(&self) -> &DecoderConfig {
    &self.config
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 单类别标签表时类别字段被忽略
  fn class_id(&self, class: f32) -> usize {
    if self.labels.len() == 1 {
      return 0;
    }
    // NaN 与负数饱和为 0
    class.round() as usize
  }

  /// 解码一次推理输出，最多返回一个检测结果
  pub fn decode(&self, raw: &[f32], image_width: u32, image_height: u32) -> Option<Detection> {
    let (image_width, image_height) = (image_width as f32, image_height as f32);
    let mut candidates: Vec<Detection> = chunk_records(raw)
      .filter(|record| record.score > self.config.threshold)
      .map(|record| {
        let class_id = self.class_id(record.class);
        Detection {
          confidence: record.score,
          class_id,
          class_name: self.labels.name_or_unknown(class_id).to_string(),
          bbox: record_to_rect(&record, image_width, image_height, &self.config.padding),
          color: class_color(class_id),
        }
      })
      .collect();

    debug!(
      "候选框 {} 个, 超过阈值 {} 的 {} 个",
      raw.len() / RECORD_STRIDE,
      self.config.threshold,
      candidates.len()
    );

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut best = candidates.into_iter().next()?;
    if best.confidence > 1.0 {
      debug!("置信度 {} 超出 [0, 1]，按 1.0 处理", best.confidence);
      best.confidence = 1.0;
    }
    Some(best)
  }

  pub fn decode_result(&self, raw: &[f32], image_width: u32, image_height: u32) -> DetectResult {
    self.decode(raw, image_width, image_height).into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn face_decoder() -> DetectionDecoder {
    DetectionDecoder::new(DecoderConfig::default(), LabelTable::single("face"))
  }

  fn assert_close(a: f32, b: f32) {
    assert!((a - b).abs() < 1e-3, "{} != {}", a, b);
  }

  #[test]
  fn chunking_drops_partial_tail() {
    let raw = vec![0.0f32; 6 * 3];
    assert_eq!(chunk_records(&raw).count(), 3);
    for r in 1..6 {
      let raw = vec![0.0f32; 6 * 3 + r];
      assert_eq!(chunk_records(&raw).count(), 3);
    }
    assert_eq!(chunk_records(&[0.9; 5]).count(), 0);
  }

  #[test]
  fn reference_rectangle() {
    let detection = face_decoder()
      .decode(&[0.5, 0.5, 0.2, 0.2, 0.9, 0.0], 640, 480)
      .unwrap();
    assert_close(detection.bbox.x, 196.0);
    assert_close(detection.bbox.y, 142.0);
    assert_close(detection.bbox.width, 228.0);
    assert_close(detection.bbox.height, 96.0);
    assert_eq!(detection.class_name, "face");
    assert_eq!(detection.color, [0, 255, 0]);
    assert_close(detection.confidence, 0.9);
  }

  #[test]
  fn padding_can_be_disabled() {
    let decoder = DetectionDecoder::new(
      DecoderConfig::default().with_padding(BoxPadding::NONE),
      LabelTable::single("face"),
    );
    let detection = decoder
      .decode(&[0.5, 0.5, 0.2, 0.2, 0.9, 0.0], 640, 480)
      .unwrap();
    assert_close(detection.bbox.x, 256.0);
    assert_close(detection.bbox.y, 192.0);
    assert_close(detection.bbox.width, 128.0);
  }

  #[test]
  fn boxes_may_extend_outside_image() {
    let detection = face_decoder()
      .decode(&[0.05, 0.05, 0.1, 0.1, 0.8, 0.0], 100, 100)
      .unwrap();
    assert!(detection.bbox.x < 0.0);
    assert!(detection.bbox.y < 0.0);
  }

  #[test]
  fn keeps_only_the_most_confident() {
    let raw = [
      0.2, 0.2, 0.1, 0.1, 0.7, 0.0, //
      0.6, 0.6, 0.1, 0.1, 0.9, 0.0, //
      0.4, 0.4, 0.1, 0.1, 0.3, 0.0,
    ];
    let result = face_decoder().decode_result(&raw, 640, 480);
    assert_eq!(result.len(), 1);
    assert_close(result.best().unwrap().confidence, 0.9);
  }

  #[test]
  fn out_of_range_score_is_capped_after_ranking() {
    let raw = [
      0.5, 0.5, 0.2, 0.2, 3.5, 0.0, //
      0.2, 0.2, 0.1, 0.1, 1.2, 0.0,
    ];
    let detection = face_decoder().decode(&raw, 640, 480).unwrap();
    assert_eq!(detection.confidence, 1.0);
    assert_close(detection.bbox.x, 196.0);
  }

  #[test]
  fn threshold_is_strict() {
    let decoder = face_decoder();
    assert!(decoder.decode(&[0.5, 0.5, 0.2, 0.2, 0.6, 0.0], 640, 480).is_none());
    assert!(decoder.decode(&[0.5, 0.5, 0.2, 0.2, 0.600001, 0.0], 640, 480).is_some());
  }

  #[test]
  fn nothing_above_threshold_yields_empty() {
    let raw = [0.5, 0.5, 0.2, 0.2, 0.1, 0.0, 0.5, 0.5, 0.2, 0.2, f32::NAN, 0.0];
    assert!(face_decoder().decode_result(&raw, 640, 480).is_empty());
    assert!(face_decoder().decode_result(&[], 640, 480).is_empty());
  }

  #[test]
  fn class_field_indexes_label_table() {
    let labels: LabelTable = "face\nhand\nperson".parse().unwrap();
    let decoder = DetectionDecoder::new(DecoderConfig::default(), labels);

    let hand = decoder.decode(&[0.5, 0.5, 0.2, 0.2, 0.9, 1.0], 640, 480).unwrap();
    assert_eq!(hand.class_id, 1);
    assert_eq!(hand.class_name, "hand");
    assert_ne!(hand.color, class_color(0));

    let other = decoder.decode(&[0.5, 0.5, 0.2, 0.2, 0.9, 7.0], 640, 480).unwrap();
    assert_eq!(other.class_name, crate::labels::UNKNOWN_LABEL);
  }

  #[test]
  fn single_label_ignores_class_field() {
    let detection = face_decoder()
      .decode(&[0.5, 0.5, 0.2, 0.2, 0.9, 0.83], 640, 480)
      .unwrap();
    assert_eq!(detection.class_id, 0);
    assert_eq!(detection.class_name, "face");
  }

  #[test]
  fn le_bytes_round_trip_and_alignment() {
    let values = [0.5f32, -1.25, 3.0];
    let bytes = floats_to_le_bytes(&values);
    assert_eq!(floats_from_le_bytes(&bytes).unwrap(), values);
    assert_eq!(
      floats_from_le_bytes(&bytes[..11]),
      Err(DecodeError::UnalignedBuffer(11))
    );
  }
}
