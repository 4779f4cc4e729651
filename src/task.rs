// 该文件是 Xunmian （寻面） 项目的一部分。
// src/task.rs - 任务驱动
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
  path::PathBuf,
  sync::mpsc::{self, Receiver, SyncSender, TrySendError},
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  decode::{DetectResult, floats_to_le_bytes},
  frame::OwnedFrame,
  model::Model,
  output::Render,
  pipeline::{Pipeline, PipelineError},
};

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<(), Self::Error>;
}

/// 注册 Ctrl-C 处理，返回中断信号接收端。
///
/// 进程内只能注册一次，重复注册时只记录警告，返回的接收端不会收到信号。
fn interrupt_signal() -> Receiver<()> {
  let (tx, rx) = mpsc::channel();
  let registered = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  });
  if let Err(e) = registered {
    warn!("无法注册 Ctrl-C 处理: {}", e);
  }
  rx
}

/// 处理第一帧后退出，错误直接返回
#[derive(Default, Debug)]
pub struct OneShotTask {
  dump_raw: Option<PathBuf>,
}

impl OneShotTask {
  /// 将模型原始输出以小端 f32 写入文件，可作为 `replay://` 模型的输入
  pub fn with_dump_raw(mut self, dump_raw: Option<PathBuf>) -> Self {
    self.dump_raw = dump_raw;
    self
  }
}

impl<M, RE, I, O> Task<I, Pipeline<M>, O> for OneShotTask
where
  M: Model,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = OwnedFrame>,
  O: Render<OwnedFrame, DetectResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, pipeline: Pipeline<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功: {}x{}，开始推理...", frame.width(), frame.height());

    let now = Instant::now();
    let raw_frame = frame.as_raw();
    let raw = pipeline.infer_raw(&raw_frame)?;
    if let Some(path) = self.dump_raw.as_ref() {
      std::fs::write(path, floats_to_le_bytes(&raw))?;
      info!("原始输出已写入: {} ({} 个值)", path.display(), raw.len());
    }
    let result = pipeline
      .decoder()
      .decode_result(&raw, frame.width(), frame.height());
    let elapsed = now.elapsed();
    info!("检测完成，耗时: {:.2?}，结果数: {}", elapsed, result.len());

    output.render_result(&frame, &result)?;
    info!("渲染完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat_times: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat_times: 1000,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }

  /// 去掉预热轮次后的平均耗时
  pub fn mean_latency(&self, times: &[Duration]) -> Option<Duration> {
    let measured = times.get(self.warmup..)?;
    if measured.is_empty() {
      return None;
    }
    Some(measured.iter().sum::<Duration>() / measured.len() as u32)
  }
}

impl<M, RE, I, O> Task<I, Pipeline<M>, O> for RepeatShotTask
where
  M: Model,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = OwnedFrame>,
  O: Render<OwnedFrame, DetectResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, pipeline: Pipeline<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let raw_frame = frame.as_raw();
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result = pipeline.detect(&raw_frame)?;
      let elapsed = now.elapsed();
      debug!("({})检测完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    match self.mean_latency(&times) {
      Some(mean) => warn!("平均检测时间: {:.2?} ({} 次)", mean, times.len()),
      None => warn!("重复次数不足，无法统计平均耗时"),
    }

    Ok(())
  }
}

/// 逐帧处理输入，单帧错误被吸收为无检测结果
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  fn reached(&self, frame_index: usize) -> bool {
    self.frame_number.is_some_and(|n| frame_index >= n)
  }
}

impl<M, RE, I, O> Task<I, Pipeline<M>, O> for ContinuousTask
where
  M: Model,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = OwnedFrame>,
  O: Render<OwnedFrame, DetectResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut pipeline: Pipeline<M>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let rx = interrupt_signal();

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      debug!("处理第 {} 帧图像", frame_index);
      let result = pipeline.process(&frame.as_raw());
      let elapsed_a = now.elapsed();
      if let Err(e) = output.render_result(&frame, &result) {
        warn!("第 {} 帧渲染失败: {}", frame_index, e);
      }
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("第 {} 帧完成，耗时: {:.2?} / {:.2?}", frame_index, elapsed_a, elapsed_b);
      if self.reached(frame_index) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

/// 在独立线程上运行流水线。
///
/// 帧队列容量为 1，上一帧尚未被取走时新帧直接丢弃，采集端不会被推理阻塞。
/// 流水线在工作线程内构造，模型不需要跨线程传递。
pub struct FrameWorker {
  frames: Option<SyncSender<OwnedFrame>>,
  results: Receiver<(OwnedFrame, DetectResult)>,
  handle: Option<JoinHandle<()>>,
}

impl FrameWorker {
  /// 启动工作线程，等待流水线加载完成；加载失败时返回错误
  pub fn spawn<M, F>(factory: F) -> Result<Self, PipelineError>
  where
    M: Model,
    F: FnOnce() -> Result<Pipeline<M>, PipelineError> + Send + 'static,
  {
    let (frame_tx, frame_rx) = mpsc::sync_channel::<OwnedFrame>(1);
    let (result_tx, result_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PipelineError>>();

    let handle = thread::spawn(move || {
      let mut pipeline = match factory() {
        Ok(pipeline) => {
          let _ = ready_tx.send(Ok(()));
          pipeline
        }
        Err(e) => {
          let _ = ready_tx.send(Err(e));
          return;
        }
      };
      info!("工作线程就绪");

      for frame in frame_rx {
        let result = pipeline.process(&frame.as_raw());
        if result_tx.send((frame, result)).is_err() {
          break;
        }
      }
      info!("工作线程退出");
    });

    let mut worker = Self {
      frames: Some(frame_tx),
      results: result_rx,
      handle: Some(handle),
    };
    match ready_rx.recv() {
      Ok(Ok(())) => Ok(worker),
      Ok(Err(e)) => {
        worker.join();
        Err(e)
      }
      Err(_) => {
        worker.join();
        Err(PipelineError::WorkerExited)
      }
    }
  }

  /// 提交一帧；队列已满或工作线程已退出时丢弃该帧并返回 `false`
  pub fn submit(&self, frame: OwnedFrame) -> bool {
    let Some(frames) = self.frames.as_ref() else {
      return false;
    };
    match frames.try_send(frame) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) => {
        debug!("工作线程忙，丢弃该帧");
        false
      }
      Err(TrySendError::Disconnected(_)) => {
        warn!("工作线程已退出，丢弃该帧");
        false
      }
    }
  }

  /// 取出一个已完成的结果，不阻塞
  pub fn try_result(&self) -> Option<(OwnedFrame, DetectResult)> {
    self.results.try_recv().ok()
  }

  /// 等待下一个结果，工作线程退出后返回 `None`
  pub fn recv_result(&self) -> Option<(OwnedFrame, DetectResult)> {
    self.results.recv().ok()
  }

  /// 关闭帧队列，等待已提交的帧处理完毕，返回剩余结果
  pub fn shutdown(mut self) -> Vec<(OwnedFrame, DetectResult)> {
    self.join();
    self.results.try_iter().collect()
  }

  fn join(&mut self) {
    self.frames.take();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("工作线程异常退出");
    }
  }
}

impl Drop for FrameWorker {
  fn drop(&mut self) {
    self.join();
  }
}

/// 采集与推理分离：输入在当前线程读取，推理在 [`FrameWorker`] 上执行
#[derive(Default, Debug)]
pub struct WorkerTask {
  frame_number: Option<usize>,
  submit_interval: Option<Duration>,
}

impl WorkerTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 两次读取输入之间的间隔，模拟实时采集源
  pub fn with_submit_interval(mut self, submit_interval: Option<Duration>) -> Self {
    self.submit_interval = submit_interval;
    self
  }
}

impl<M, F, RE, I, O> Task<I, F, O> for WorkerTask
where
  M: Model,
  F: FnOnce() -> Result<Pipeline<M>, PipelineError> + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = OwnedFrame>,
  O: Render<OwnedFrame, DetectResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, factory: F, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let worker = FrameWorker::spawn(factory)?;
    let rx = interrupt_signal();

    let render = |frame: &OwnedFrame, result: &DetectResult| {
      if let Err(e) = output.render_result(frame, result) {
        warn!("渲染失败: {}", e);
      }
    };

    let (mut submitted, mut dropped) = (0usize, 0usize);
    for (index, frame) in input.enumerate() {
      if worker.submit(frame) {
        submitted += 1;
      } else {
        dropped += 1;
      }
      while let Some((frame, result)) = worker.try_result() {
        render(&frame, &result);
      }
      if self.frame_number.is_some_and(|n| index + 1 >= n) {
        info!("达到指定帧数 {}, 退出任务循环", index + 1);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(interval) = self.submit_interval {
        thread::sleep(interval);
      }
    }

    for (frame, result) in worker.shutdown() {
      render(&frame, &result);
    }
    info!("任务完成: 提交 {} 帧，丢弃 {} 帧", submitted, dropped);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::{
    decode::{DecoderConfig, DetectionDecoder},
    frame::{InputTensor, PixelFormat, TensorSpec},
    labels::LabelTable,
    model::{ModelError, ReplayModel},
  };

  #[derive(Default, Clone)]
  struct CollectOutput {
    results: Arc<Mutex<Vec<DetectResult>>>,
  }

  impl Render<OwnedFrame, DetectResult> for CollectOutput {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &OwnedFrame, result: &DetectResult) -> Result<(), Self::Error> {
      self.results.lock().unwrap().push(result.clone());
      Ok(())
    }
  }

  fn pipeline() -> Pipeline<ReplayModel> {
    let spec = TensorSpec::default().with_size(2, 2);
    Pipeline::new(
      ReplayModel::new(vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0], spec),
      DetectionDecoder::new(DecoderConfig::default(), LabelTable::single("face")),
    )
  }

  fn frames(count: usize) -> impl Iterator<Item = OwnedFrame> {
    (0..count).map(|_| OwnedFrame::new(vec![0; 4 * 4 * 4], 4, 4, PixelFormat::Bgra8).unwrap())
  }

  #[test]
  fn one_shot_renders_first_frame_and_dumps_raw() {
    let output = CollectOutput::default();
    let dump = std::env::temp_dir().join(format!("xunmian-dump-{}.bin", std::process::id()));
    OneShotTask::default()
      .with_dump_raw(Some(dump.clone()))
      .run_task(frames(3), pipeline(), output.clone())
      .unwrap();

    let bytes = std::fs::read(&dump).unwrap();
    std::fs::remove_file(&dump).unwrap();
    assert_eq!(bytes.len(), 6 * 4);
    assert_eq!(output.results.lock().unwrap().len(), 1);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let result = OneShotTask::default().run_task(frames(0), pipeline(), CollectOutput::default());
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_runs_requested_times() {
    let output = CollectOutput::default();
    RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(frames(1), pipeline(), output.clone())
      .unwrap();
    assert_eq!(output.results.lock().unwrap().len(), 5);
  }

  #[test]
  fn mean_latency_skips_warmup() {
    let task = RepeatShotTask::default().with_warmup(1);
    let times = [
      Duration::from_millis(100),
      Duration::from_millis(10),
      Duration::from_millis(20),
    ];
    assert_eq!(task.mean_latency(&times), Some(Duration::from_millis(15)));
    assert_eq!(task.mean_latency(&times[..1]), None);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let output = CollectOutput::default();
    ContinuousTask::default()
      .with_frame_number(Some(3))
      .run_task(frames(10), pipeline(), output.clone())
      .unwrap();
    let results = output.results.lock().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.len() == 1));
  }

  #[test]
  fn worker_processes_submitted_frames() {
    let worker = FrameWorker::spawn(|| Ok(pipeline())).unwrap();
    let mut frames = frames(1);
    assert!(worker.submit(frames.next().unwrap()));
    let (frame, result) = worker.recv_result().unwrap();
    assert_eq!(frame.width(), 4);
    assert_eq!(result.best().unwrap().class_name, "face");
    assert!(worker.shutdown().is_empty());
  }

  /// 进入推理时通知测试线程，然后等待放行
  struct GatedModel {
    entered: mpsc::Sender<()>,
    gate: Receiver<()>,
  }

  impl Model for GatedModel {
    fn input_spec(&self) -> TensorSpec {
      TensorSpec::default().with_size(2, 2)
    }

    fn infer(&self, _input: &InputTensor) -> Result<Vec<f32>, ModelError> {
      let _ = self.entered.send(());
      self
        .gate
        .recv()
        .map_err(|_| ModelError::InferError("gate closed".to_string()))?;
      Ok(vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0])
    }
  }

  fn tagged_frame(tag: u8) -> OwnedFrame {
    OwnedFrame::new(vec![tag; 2 * 2 * 4], 2, 2, PixelFormat::Bgra8).unwrap()
  }

  #[test]
  fn busy_worker_drops_frames_without_blocking() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let worker = FrameWorker::spawn(move || {
      let model = GatedModel {
        entered: entered_tx,
        gate: gate_rx,
      };
      Ok(Pipeline::new(
        model,
        DetectionDecoder::new(DecoderConfig::default(), LabelTable::single("face")),
      ))
    })
    .unwrap();

    assert!(worker.submit(tagged_frame(1)));
    // 第一帧已被取出，工作线程阻塞在推理中
    entered_rx.recv().unwrap();
    assert!(worker.submit(tagged_frame(2)));
    assert!(!worker.submit(tagged_frame(3)));

    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    let results = worker.shutdown();
    let tags: Vec<u8> = results
      .iter()
      .map(|(frame, _)| frame.as_raw().row(0)[0])
      .collect();
    assert_eq!(tags, vec![1, 2]);
    assert!(results.iter().all(|(_, result)| result.len() == 1));
  }

  #[test]
  fn worker_reports_load_failure() {
    let err = FrameWorker::spawn::<ReplayModel, _>(|| {
      Err(PipelineError::Labels(crate::labels::LabelError::Empty))
    })
    .err()
    .unwrap();
    assert!(err.is_fatal());
  }

  #[test]
  fn worker_task_renders_every_processed_frame() {
    let output = CollectOutput::default();
    WorkerTask::default()
      .with_submit_interval(Some(Duration::from_millis(5)))
      .run_task(
        frames(4),
        || -> Result<_, PipelineError> { Ok(pipeline()) },
        output.clone(),
      )
      .unwrap();
    let results = output.results.lock().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 4);
  }
}
