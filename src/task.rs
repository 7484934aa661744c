// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 逐帧分拣任务
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
  io::BufRead,
  sync::{
    Arc,
    mpsc::{self, Receiver, Sender, TryRecvError},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  archive::{ArchivedCrop, Archiver, Clock, LocalClock},
  config::PipelineConfig,
  frame::Frame,
  input::FrameSource,
  label::{ClassNames, LabelError},
  model::{Detection, Model, ModelError, OriginalSpace},
  output::{OutputSink, draw::Annotator},
  preprocess::{PreprocessError, Preprocessor},
  rescale::rescale,
  triage::TriagePolicy,
};

/// 结束程序的按键（回车确认）
pub const QUIT_KEY: char = 'q';

pub trait Task<I, P, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("检测输出无效: {0}")]
  Detection(#[from] ModelError),
  #[error("类别解析失败: {0}")]
  Label(#[from] LabelError),
}

impl FrameError {
  /// 类别解析失败说明类别表与模型不匹配，继续运行没有意义
  pub fn is_fatal(&self) -> bool {
    matches!(self, FrameError::Label(_))
  }
}

/// 单帧处理结果
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
  pub index: u64,
  pub latency: Duration,
  pub detections: usize,
  pub annotated: usize,
  pub archived: Vec<ArchivedCrop>,
  pub archive_failures: usize,
}

/// 整次运行的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub frames: u64,
  pub frames_failed: u64,
  pub detections: u64,
  pub archived: u64,
  pub archive_failures: u64,
}

impl RunSummary {
  fn record(&mut self, report: &FrameReport) {
    self.detections += report.detections as u64;
    self.archived += report.archived.len() as u64;
    self.archive_failures += report.archive_failures as u64;
  }
}

/// 单帧处理流水线：预处理、推理、坐标还原、分拣、归档、标注
pub struct TriagePipeline<M, C = LocalClock> {
  preprocessor: Preprocessor,
  model: M,
  policy: TriagePolicy,
  archiver: Archiver,
  annotator: Annotator,
  clock: C,
}

impl<M, C> TriagePipeline<M, C>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  C: Clock,
{
  pub fn new(
    preprocessor: Preprocessor,
    model: M,
    policy: TriagePolicy,
    archiver: Archiver,
    annotator: Annotator,
    clock: C,
  ) -> Self {
    Self {
      preprocessor,
      model,
      policy,
      archiver,
      annotator,
      clock,
    }
  }

  pub fn from_config(
    config: &PipelineConfig,
    model: M,
    class_names: Arc<ClassNames>,
    clock: C,
  ) -> anyhow::Result<Self> {
    config.validate()?;

    let preprocessor = Preprocessor::new(config.input_width, config.input_height, config.resize_mode);
    let policy = TriagePolicy::new(config.policy.clone(), class_names.clone())?;
    let archiver = Archiver::new(&config.archive_root, &config.archive_format)?;
    if config.create_archive_dirs {
      archiver.prepare_partitions()?;
    }
    let annotator = Annotator::new(class_names)?;

    Ok(Self::new(
      preprocessor,
      model,
      policy,
      archiver,
      annotator,
      clock,
    ))
  }

  pub fn archiver(&self) -> &Archiver {
    &self.archiver
  }

  /// 处理一帧并原地标注
  ///
  /// 归档在标注之前完成，截图来自未标注的帧。归档失败只记录，不中断本帧。
  pub fn process_frame(&self, frame: &mut Frame) -> Result<FrameReport, FrameError> {
    let (tensor, transform) = self.preprocessor.process(frame)?;

    let now = Instant::now();
    let raw = self
      .model
      .infer(&tensor)
      .map_err(|e| FrameError::Model(Box::new(e)))?;
    let latency = now.elapsed();

    let detections = rescale(&raw.into_detections()?, &transform);
    let decisions = detections
      .iter()
      .map(|det| self.policy.decide(det))
      .collect::<Result<Vec<_>, _>>()?;

    let mut report = FrameReport {
      index: frame.index(),
      latency,
      detections: detections.len(),
      ..FrameReport::default()
    };

    let mut to_annotate: Vec<Detection<OriginalSpace>> = Vec::new();
    for (det, decision) in detections.iter().zip(&decisions) {
      debug!(
        "帧 {}: 类别 {} 置信度 {:.3} 框 {:?} -> {:?}",
        report.index, det.label, det.score, det.bbox, decision
      );
      if decision.archive {
        // 时段按每次归档时的时间计算
        let at = self.clock.now();
        match self.archiver.archive(frame.image(), det, &at) {
          Ok(crop) => report.archived.push(crop),
          Err(e) => {
            warn!("帧 {} 归档失败: {}", report.index, e);
            report.archive_failures += 1;
          }
        }
      }
      if decision.annotate {
        to_annotate.push(*det);
      }
    }

    self.annotator.annotate(frame.image_mut(), &to_annotate)?;
    self.annotator.draw_latency(frame.image_mut(), latency);
    report.annotated = to_annotate.len();

    Ok(report)
  }
}

/// 中断请求：Ctrl-C 或在标准输入键入 `q` 后回车
pub struct Interrupt {
  rx: Receiver<()>,
}

impl Interrupt {
  /// 手动触发的中断通道
  pub fn channel() -> (Sender<()>, Self) {
    let (tx, rx) = mpsc::channel();
    (tx, Self { rx })
  }

  /// 安装 Ctrl-C 处理器并监听标准输入，每个进程只能调用一次
  pub fn install() -> anyhow::Result<Self> {
    let (tx, interrupt) = Self::channel();

    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = ctrlc_tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    thread::spawn(move || {
      let stdin = std::io::stdin();
      for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().eq_ignore_ascii_case(&QUIT_KEY.to_string()) {
          info!("收到退出按键，准备退出...");
          let _ = tx.send(());
          break;
        }
      }
    });

    Ok(interrupt)
  }

  pub fn requested(&self) -> bool {
    match self.rx.try_recv() {
      Ok(()) => true,
      Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
    }
  }
}

#[derive(Default)]
pub struct ContinuousTask {
  max_frames: Option<u64>,
  interrupt: Option<Interrupt>,
}

impl ContinuousTask {
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn run_loop<I, O, M, C>(
    &self,
    input: &mut I,
    pipeline: &TriagePipeline<M, C>,
    output: &mut O,
    summary: &mut RunSummary,
  ) -> anyhow::Result<()>
  where
    I: FrameSource,
    I::Error: std::error::Error + Send + Sync + 'static,
    O: OutputSink,
    O::Error: std::error::Error + Send + Sync + 'static,
    M: Model,
    M::Error: std::error::Error + Send + Sync + 'static,
    C: Clock,
  {
    loop {
      if self.max_frames.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        return Ok(());
      }

      let Some(mut frame) = input.read()? else {
        info!("输入流结束，退出任务循环");
        return Ok(());
      };
      summary.frames += 1;

      match pipeline.process_frame(&mut frame) {
        Ok(report) => {
          info!(
            "第 {} 帧: {} 个检测, 归档 {} 个, 推理耗时 {:.2?}",
            report.index,
            report.detections,
            report.archived.len(),
            report.latency
          );
          summary.record(&report);
          output.write_frame(frame.image())?;
        }
        Err(e) if e.is_fatal() => {
          error!("第 {} 帧处理失败，终止运行: {}", frame.index(), e);
          return Err(e.into());
        }
        Err(e) => {
          error!("第 {} 帧处理失败: {}", frame.index(), e);
          summary.frames_failed += 1;
        }
      }

      if self.interrupt.as_ref().is_some_and(Interrupt::requested) {
        warn!("中断信号接收，退出任务循环");
        return Ok(());
      }
    }
  }
}

impl<'a, I, O, M, C> Task<I, &'a TriagePipeline<M, C>, O> for ContinuousTask
where
  I: FrameSource,
  I::Error: std::error::Error + Send + Sync + 'static,
  O: OutputSink,
  O::Error: std::error::Error + Send + Sync + 'static,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  C: Clock,
{
  type Output = RunSummary;
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &'a TriagePipeline<M, C>,
    mut output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut summary = RunSummary::default();
    let result = self.run_loop(&mut input, pipeline, &mut output, &mut summary);

    // 无论循环如何结束都释放输入与输出
    input.release();
    let released = output.release();

    info!(
      "任务结束: 共 {} 帧, 失败 {} 帧, 检测 {} 个, 归档 {} 个, 归档失败 {} 个",
      summary.frames,
      summary.frames_failed,
      summary.detections,
      summary.archived,
      summary.archive_failures
    );

    result?;
    released?;
    Ok(summary)
  }
}
