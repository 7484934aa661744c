// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的帧编码为视频文件，容器由文件扩展名决定。
//!
//! ## 支持的格式
//!
//! - **MP4** (H.264)
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! ## URL Scheme
//!
//! `gstvideo:///path/to/output.mp4?fps=30`
//!
//! 分辨率取自输入流；`fps` 仅在输入流未提供帧率时使用，默认 30。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  input::StreamProperties,
  output::{OutputError, OutputSink, check_frame_size},
};

/// GStreamer 输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

const DEFAULT_FPS: i32 = 30;

/// 以 appsrc 开头的推流管道，视频文件与显示窗口共用
pub(crate) struct AppSrcPipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  properties: StreamProperties,
  fps: i32,
  frame_count: u64,
  released: bool,
}

impl AppSrcPipeline {
  pub(crate) fn launch(
    pipeline_desc: &str,
    properties: StreamProperties,
    fps: i32,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    info!("Creating output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", properties.width as i32)
      .field("height", properties.height as i32)
      .field("framerate", gst::Fraction::new(fps, 1))
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(AppSrcPipeline {
      pipeline,
      appsrc,
      properties,
      fps,
      frame_count: 0,
      released: false,
    })
  }

  pub(crate) fn push_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    check_frame_size(image, &self.properties)?;
    if self.released {
      return Err(GStreamerVideoOutputError::PipelineError("output released".to_string()).into());
    }

    let data = image.as_raw();
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    let frame_duration = 1_000_000_000 / self.fps as u64;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * frame_duration,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));

      let mut buffer_map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      buffer_map.copy_from_slice(data);
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }

  pub(crate) fn release(&mut self) -> Result<(), OutputError> {
    if self.released {
      return Ok(());
    }
    self.released = true;

    // EOS 之后等待管道收尾，文件才完整
    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS: {:?}", e);
    }
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }

    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(GStreamerVideoOutputError::from)?;

    info!("Output closed. Total frames written: {}", self.frame_count);
    Ok(())
  }
}

impl Drop for AppSrcPipeline {
  fn drop(&mut self) {
    if let Err(e) = self.release() {
      warn!("Failed to stop GStreamer output pipeline: {}", e);
    }
  }
}

/// 请求的帧率：优先使用输入流帧率，其次 URL 参数
pub(crate) fn resolve_fps(url: &Url, properties: &StreamProperties) -> i32 {
  let query_fps = url
    .query_pairs()
    .find(|(k, _)| k == "fps")
    .and_then(|(_, v)| v.parse::<f64>().ok());
  properties
    .fps
    .or(query_fps)
    .map(|fps| fps.round() as i32)
    .filter(|fps| *fps > 0)
    .unwrap_or(DEFAULT_FPS)
}

fn encoder_pipeline(file_path: &str) -> String {
  let (encoder, muxer) = if file_path.ends_with(".mkv") {
    (
      "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse",
      "matroskamux",
    )
  } else if file_path.ends_with(".avi") {
    ("video/x-raw,format=I420 ! x264enc", "avimux")
  } else if file_path.ends_with(".webm") {
    ("vp8enc", "webmmux")
  } else {
    (
      "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse",
      "mp4mux",
    )
  };

  format!(
    "appsrc name=src ! videoconvert ! {} ! {} ! filesink location={}",
    encoder, muxer, file_path
  )
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoOutput {
  inner: AppSrcPipeline,
}

impl GStreamerVideoOutput {
  pub const SCHEME: &'static str = "gstvideo";

  pub fn open(url: &Url, properties: StreamProperties) -> Result<Self, OutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let fps = resolve_fps(url, &properties);
    let file_path = url.path();
    let inner = AppSrcPipeline::launch(&encoder_pipeline(file_path), properties, fps)?;

    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      properties.width, properties.height, fps, file_path
    );

    Ok(GStreamerVideoOutput { inner })
  }
}

impl OutputSink for GStreamerVideoOutput {
  type Error = OutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    self.inner.push_frame(image)
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    self.inner.release()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encoder_pipeline_by_extension() {
    assert!(encoder_pipeline("/tmp/a.mp4").contains("mp4mux"));
    assert!(encoder_pipeline("/tmp/a.mkv").contains("matroskamux"));
    assert!(encoder_pipeline("/tmp/a.webm").contains("vp8enc"));
    assert!(encoder_pipeline("/tmp/a").contains("mp4mux"));
  }

  #[test]
  fn test_resolve_fps_prefers_stream() {
    let url = Url::parse("gstvideo:///tmp/a.mp4?fps=10").unwrap();
    let mut props = StreamProperties {
      width: 4,
      height: 4,
      fps: Some(24.6),
    };
    assert_eq!(resolve_fps(&url, &props), 25);
    props.fps = None;
    assert_eq!(resolve_fps(&url, &props), 10);
    let url = Url::parse("gstvideo:///tmp/a.mp4").unwrap();
    assert_eq!(resolve_fps(&url, &props), DEFAULT_FPS);
  }
}
