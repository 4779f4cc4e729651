// 该文件是 Xunmian （寻面） 项目的一部分。
// src/bin/simple_workershot.rs - 后台线程检测
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use xunmian::{
  FromUrl,
  decode::{DEFAULT_THRESHOLD, DecoderConfig},
  input::InputWrapper,
  output::OutputWrapper,
  model::ModelWrapper,
  pipeline::{FrameThrottle, Pipeline, PipelineError},
  task::{Task, WorkerTask},
};

/// Xunmian 后台线程检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 两次推理的最小间隔（毫秒）
  #[arg(long, value_name = "MILLIS")]
  pub min_interval_ms: Option<u64>,
  /// 读取输入的间隔（毫秒），模拟相机帧率
  #[arg(long, value_name = "MILLIS")]
  pub frame_interval_ms: Option<u64>,
  /// 处理的帧数上限
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let config = DecoderConfig::default().with_threshold(args.threshold);
  let throttle = args
    .min_interval_ms
    .map(|ms| FrameThrottle::new(Duration::from_millis(ms)));
  let (model, labels) = (args.model.clone(), args.labels.clone());
  let factory = move || -> Result<Pipeline<ModelWrapper>, PipelineError> {
    Ok(Pipeline::load(&model, &labels, config)?.with_throttle(throttle))
  };

  WorkerTask::default()
    .with_frame_number(args.frame_number)
    .with_submit_interval(args.frame_interval_ms.map(Duration::from_millis))
    .run_task(input, factory, output)?;

  Ok(())
}
