// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 摄像头检测分拣主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanan_triage::{
  FromUrl,
  archive::LocalClock,
  config::{PipelineConfig, load_anchors},
  input::{FrameSource, InputWrapper},
  label::ClassNames,
  model::Yolo26Builder,
  output::{OutputWrapper, Outputs},
  task::{ContinuousTask, Interrupt, Task, TriagePipeline},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let config = PipelineConfig::from(args::Args::parse());
  config.validate()?;

  info!("模型文件路径: {}", config.detector.restore_path.display());
  info!(
    "模型输入尺寸: {}x{} ({:?})",
    config.input_width, config.input_height, config.resize_mode
  );

  let class_names = Arc::new(match &config.class_name_path {
    Some(path) => ClassNames::load(path)?,
    None => ClassNames::coco(),
  });
  info!("类别数量: {}", class_names.len());

  let anchors = config
    .detector
    .anchor_path
    .as_ref()
    .map(load_anchors)
    .transpose()?;

  let model = Yolo26Builder::new(&config.detector.restore_path)
    .num_classes(class_names.len())
    .score_threshold(config.detector.score_threshold)
    .nms_threshold(config.detector.nms_threshold)
    .max_boxes(config.detector.max_boxes)
    .anchors(anchors)
    .build()?;

  let pipeline = TriagePipeline::from_config(&config, model, class_names, LocalClock)?;
  info!("归档目录: {}", pipeline.archiver().root().display());

  let input = match &config.input {
    Some(url) => {
      info!("输入来源: {}", url);
      InputWrapper::from_url(url)?
    }
    None => InputWrapper::open_camera(config.camera)?,
  };
  let properties = input.properties();
  info!(
    "输入流: {}x{} @ {:?} fps",
    properties.width, properties.height, properties.fps
  );

  let mut outputs = Outputs::default();
  if config.save_video {
    outputs.push(OutputWrapper::video_file(&config.video_path, properties)?);
    info!("视频保存到: {}", config.video_path.display());
  }
  if config.display {
    let display = OutputWrapper::display(properties)
      .context("无法打开显示窗口，可使用 --display false 关闭实时显示")?;
    outputs.push(display);
  }
  for url in &config.outputs {
    outputs.push(OutputWrapper::open(url, properties)?);
    info!("输出到: {}", url);
  }

  let summary = ContinuousTask::default()
    .with_max_frames(config.max_frames)
    .with_interrupt(Interrupt::install()?)
    .run_task(input, &pipeline, outputs)?;

  info!(
    "处理完成: {} 帧, 检测 {} 个, 归档 {} 个, 归档失败 {} 个",
    summary.frames, summary.detections, summary.archived, summary.archive_failures
  );

  Ok(())
}
