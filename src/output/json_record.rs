// 该文件是 Xunmian （寻面） 项目的一部分。
// src/output/json_record.rs - JSON Lines 记录输出
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
  fs::OpenOptions,
  io::Write,
  path::PathBuf,
  sync::atomic::{AtomicU64, Ordering},
};

use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::DetectResult,
  frame::OwnedFrame,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("路径无效: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// `json:///path/out.jsonl`，每帧追加一行
pub struct JsonRecordOutput {
  path: PathBuf,
  frame_index: AtomicU64,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    let path = urlencoding::decode(url.path())
      .map_err(|e| JsonRecordOutputError::InvalidPath(e.to_string()))?;
    if path.is_empty() {
      return Err(JsonRecordOutputError::InvalidPath("路径为空".to_string()));
    }
    Ok(Self {
      path: PathBuf::from(path.into_owned()),
      frame_index: AtomicU64::new(0),
    })
  }
}

pub fn result_to_json(frame_index: u64, frame: &OwnedFrame, result: &DetectResult) -> Value {
  let detections: Vec<Value> = result
    .items
    .iter()
    .map(|item| {
      json!({
        "class": item.class_name,
        "class_id": item.class_id,
        "confidence": item.confidence,
        "bbox": [item.bbox.x, item.bbox.y, item.bbox.width, item.bbox.height],
      })
    })
    .collect();

  json!({
    "frame": frame_index,
    "width": frame.width(),
    "height": frame.height(),
    "detections": detections,
  })
}

impl Render<OwnedFrame, DetectResult> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(&self, frame: &OwnedFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let index = self.frame_index.fetch_add(1, Ordering::Relaxed);
    let line = serde_json::to_string(&result_to_json(index, frame, result))?;

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    writeln!(file, "{}", line)?;
    Ok(())
  }
}
