// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! ## URL 格式
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=15&format=YUY2&rotate=90`
//! - `gst://file/path/to/video.mp4?rotate=180`
//!
//! 管道末端统一转换为 RGB，帧尺寸取自第一帧的 caps。
//!
//! ## 系统依赖
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameFormatError, RGB_CHANNELS},
  input::{FrameSource, StreamProperties},
};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 帧尺寸在运行中改变
  #[error("Frame size changed: expected {expected:?}, got {actual:?}")]
  SizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameFormatError),
  /// 管道没有产生任何帧
  #[error("No frame from pipeline")]
  NoFrame,
}

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  fps: Option<f64>,
}

impl GStreamerInputPipelineBuilder {
  /// 按索引打开的摄像头：`/dev/video{index}`，RGB 输出
  pub fn camera(index: u32) -> Self {
    GStreamerInputPipelineBuilder {
      items: vec![
        GStreamerInputBuilderItem::CameraSource {
          camera: format!("/dev/video{}", index),
          io_mode: None,
          format: "YUY2".to_string(),
          width: DEFAULT_WIDTH,
          height: DEFAULT_HEIGHT,
          fps: DEFAULT_FPS,
        },
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
      fps: Some(DEFAULT_FPS as f64),
    }
  }

  fn build_video_pipline(path: &str, query: &HashMap<String, String>) -> Self {
    let camera = path.to_string();
    let io_mode = query.get("io-mode").and_then(|v| v.parse::<u32>().ok());
    let format = query
      .get("format")
      .cloned()
      .unwrap_or_else(|| String::from("YUY2"));
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_WIDTH);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_HEIGHT);
    let fps = query
      .get("fps")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_FPS);

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera,
      io_mode,
      format,
      width,
      height,
      fps,
    }];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder {
      items,
      fps: Some(fps as f64),
    }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder {
      items,
      fps: query.get("fps").and_then(|v| v.parse::<f64>().ok()),
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => (0, 0),
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    // 第一帧决定流的尺寸与帧率
    let sample = appsink
      .pull_sample()
      .map_err(|_| GStreamerInputError::NoFrame)?;
    let (first, caps_fps) = convert_sample_to_frame(&sample, 0)?;
    let properties = StreamProperties {
      width: first.width(),
      height: first.height(),
      fps: caps_fps.or(self.fps),
    };
    info!(
      "GStreamer input ready: {}x{} @ {:?} fps",
      properties.width, properties.height, properties.fps
    );

    Ok(GStreamerInput {
      pipeline,
      appsink,
      properties,
      pending: Some(first),
      frame_index: 1,
      released: false,
    })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_video_pipline(url.path(), &query),
      Some("file") => Self::build_file_pipeline(url.path(), &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  properties: StreamProperties,
  pending: Option<Frame>,
  frame_index: u64,
  released: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.release();
  }
}

impl FrameSource for GStreamerInput {
  type Error = GStreamerInputError;

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    if self.released {
      return Ok(None);
    }
    if let Some(frame) = self.pending.take() {
      return Ok(Some(frame));
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => return Ok(None),
      Err(e) => {
        error!("Failed to pull sample: {}", e);
        return Err(e.into());
      }
    };

    let (frame, _) = convert_sample_to_frame(&sample, self.frame_index)?;
    let expected = (self.properties.width, self.properties.height);
    let actual = (frame.width(), frame.height());
    if actual != expected {
      return Err(GStreamerInputError::SizeChanged { expected, actual });
    }

    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn properties(&self) -> StreamProperties {
    self.properties
  }

  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.pending = None;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      tracing::warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

/// 转换为 RGB 帧，同时返回 caps 中的帧率
fn convert_sample_to_frame(
  sample: &gst::Sample,
  index: u64,
) -> Result<(Frame, Option<f64>), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width as usize * RGB_CHANNELS;

  let fps = video_info.fps();
  let fps = (fps.numer() > 0 && fps.denom() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * (height as usize).saturating_sub(1) + row_bytes;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 去掉行尾对齐填充
  let packed: Vec<u8> = data
    .chunks(stride)
    .take(height as usize)
    .flat_map(|row| &row[..row_bytes])
    .copied()
    .collect();

  let frame = match video_info.format() {
    gst_video::VideoFormat::Rgb => Frame::from_rgb(index, width, height, packed)?,
    gst_video::VideoFormat::Bgr => Frame::from_bgr(index, width, height, &packed)?,
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  };

  Ok((frame, fps))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_camera_url_pipeline() {
    let url = Url::parse("gst://camera/dev/video2?width=320&height=240&fps=10&rotate=90").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    let desc = builder.pipeline_description();
    assert!(desc.starts_with("v4l2src device=/dev/video2 ! video/x-raw,format=YUY2,width=320,height=240,framerate=10/1"));
    assert!(desc.contains("videoflip method=1"));
    assert!(desc.contains("videoconvert ! video/x-raw,format=RGB ! appsink"));
    assert_eq!(builder.fps, Some(10.0));
  }

  #[test]
  fn test_unknown_host_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }

  #[test]
  fn test_camera_by_index() {
    let desc = GStreamerInputPipelineBuilder::camera(1).pipeline_description();
    assert!(desc.contains("device=/dev/video1"));
  }
}
