// 该文件是 Xunmian （寻面） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::DetectResult,
  frame::OwnedFrame,
  output::{
    Render,
    draw::{Draw, ToRgbImage},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每个检测结果一行: `name, score, x, y, w, h`
pub struct Record;

impl Record {
  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), std::io::Error> {
    let records: Vec<String> = result
      .items
      .iter()
      .map(|item| {
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          item.class_name, item.confidence, item.bbox.x, item.bbox.y, item.bbox.width, item.bbox.height
        )
      })
      .collect();
    std::fs::write(path.with_extension("txt"), records.join("\n"))
  }
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &OwnedFrame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_detection(frame, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.to_rgb_image().save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }
}

/// `folder:///dir[?record][&always]`，按日期分目录保存帧。
///
/// 默认只保存有检测结果的帧；`record` 保存原图与文本记录而不是绘制后的图像。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let draw = if uri.query_pairs().any(|(k, _)| k == "record") {
      DrawWrapper::Record(Record)
    } else {
      DrawWrapper::Draw(Box::default())
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let directory = urlencoding::decode(uri.path())
      .map(|p| PathBuf::from(p.into_owned()))
      .map_err(|_| DirectoryRecordOutputError::SchemeMismatch)?;

    Ok(DirectoryRecordOutput {
      directory,
      draw,
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<OwnedFrame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &OwnedFrame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path()?;
    debug!("记录帧: {}", path.display());
    self.draw.save_result(&path, frame, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::{Detection, Rect},
    frame::PixelFormat,
  };

  fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
      for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
          out.extend(files_under(&path));
        } else {
          out.push(path);
        }
      }
    }
    out
  }

  #[test]
  fn records_only_frames_with_detections() {
    let dir = std::env::temp_dir().join(format!("xunmian-folder-{}", std::process::id()));
    let url = url::Url::parse(&format!("folder://{}?record", dir.display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = OwnedFrame::new(vec![0; 4 * 4 * 4], 4, 4, PixelFormat::Bgra8).unwrap();

    output.render_result(&frame, &DetectResult::empty()).unwrap();
    assert!(files_under(&dir).is_empty());

    let result = DetectResult::from(Some(Detection {
      confidence: 0.8,
      class_id: 0,
      class_name: "face".to_string(),
      bbox: Rect::new(1.0, 1.0, 2.0, 2.0),
      color: [0, 255, 0],
    }));
    output.render_result(&frame, &result).unwrap();
    let files = files_under(&dir);
    std::fs::remove_dir_all(&dir).unwrap();

    assert_eq!(files.len(), 2);
    let txt = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .unwrap();
    assert!(txt.file_name().is_some());
  }
}
