// 该文件是 Xunmian （寻面） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use xunmian::{
  FromUrl,
  decode::{DEFAULT_THRESHOLD, DecoderConfig},
  input::InputWrapper,
  output::OutputWrapper,
  pipeline::Pipeline,
  task::{RepeatShotTask, Task},
};

/// Xunmian 推理基准参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 输入来源，只使用第一帧
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，建议使用 log://
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 重复次数
  #[arg(long, default_value_t = 1000, value_name = "COUNT")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let config = DecoderConfig::default().with_threshold(args.threshold);
  let pipeline = Pipeline::load(&args.model, &args.labels, config)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat_times(args.repeat)
    .run_task(input, pipeline, output)?;

  Ok(())
}
