// 该文件是 Xunmian （寻面） 项目的一部分。
// src/labels.rs - 类别标签表
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

use std::{path::Path, str::FromStr, sync::Arc};

use thiserror::Error;
use tracing::{debug, info};

pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

/// 按类别序号排列的标签，启动时加载一次，之后只读。
///
/// 内部使用 `Arc`，克隆开销很小，可在推理线程与渲染线程间共享。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  names: Arc<[String]>,
}

impl LabelTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let table: LabelTable = std::fs::read_to_string(path)?.parse()?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// 单类别标签表
  pub fn single(name: &str) -> Self {
    Self {
      names: Arc::from(vec![name.to_string()]),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn name_or_unknown(&self, class_id: usize) -> &str {
    self.get(class_id).unwrap_or(UNKNOWN_LABEL)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl FromStr for LabelTable {
  type Err = LabelError;

  /// 每个非空行是一个类别名称，原样保留（仅去掉行尾 `\r`）。
  ///
  /// 只含空白的行视为空行。
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let names: Vec<String> = s
      .lines()
      .filter(|line| !line.trim().is_empty())
      .map(str::to_string)
      .collect();

    if names.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self {
      names: Arc::from(names),
    })
  }
}
