// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入源
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

use thiserror::Error;
use tracing::{info, warn};
use v4l::{
  FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  prelude::*,
  video::Capture,
};

use crate::{
  frame::{Frame, FrameFormatError},
  input::{FrameSource, StreamProperties},
};

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;
const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum V4l2CameraError {
  #[error("无法打开设备 {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("V4L2 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("设备不支持 YUYV 格式，实际格式: {0}")]
  UnsupportedFormat(String),
  #[error("帧格式错误: {0}")]
  Frame(#[from] FrameFormatError),
}

/// V4L2 摄像头输入源，固定请求 YUYV 格式
pub struct V4l2Camera {
  // stream 必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Device,
  properties: StreamProperties,
  frame_index: u64,
}

impl V4l2Camera {
  pub fn open(index: u32) -> Result<Self, V4l2CameraError> {
    let path = format!("/dev/video{}", index);
    let device = Device::with_path(&path).map_err(|source| V4l2CameraError::Open {
      path: path.clone(),
      source,
    })?;

    let mut format = device.format()?;
    format.width = REQUESTED_WIDTH;
    format.height = REQUESTED_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4l2CameraError::UnsupportedFormat(format.fourcc.to_string()));
    }

    let fps = match device.params() {
      Ok(params) if params.interval.numerator > 0 => {
        params.interval.denominator as f64 / params.interval.numerator as f64
      }
      _ => {
        warn!("无法获取 {} 的帧率，使用默认值 {}", path, DEFAULT_FPS);
        DEFAULT_FPS
      }
    };

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    let properties = StreamProperties {
      width: format.width,
      height: format.height,
      fps: Some(fps),
    };
    info!(
      "摄像头 {} 已打开: {}x{} @ {} fps",
      path, properties.width, properties.height, fps
    );

    Ok(Self {
      stream: Some(stream),
      device,
      properties,
      frame_index: 0,
    })
  }

  pub fn device(&self) -> &Device {
    &self.device
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let pixels = (width * height) as usize;
  let mut rgb = Vec::with_capacity(pixels * 3);

  for chunk in yuyv.chunks_exact(4).take(pixels / 2) {
    let u = chunk[1] as f32 - 128.0;
    let v = chunk[3] as f32 - 128.0;

    for y in [chunk[0] as f32, chunk[2] as f32] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl FrameSource for V4l2Camera {
  type Error = V4l2CameraError;

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let (buffer, _meta) = stream.next()?;
    let rgb = yuyv_to_rgb(buffer, self.properties.width, self.properties.height);
    let frame = Frame::from_rgb(
      self.frame_index,
      self.properties.width,
      self.properties.height,
      rgb,
    )?;
    self.frame_index += 1;
    Ok(Some(frame))
  }

  fn properties(&self) -> StreamProperties {
    self.properties
  }

  fn release(&mut self) {
    if self.stream.take().is_some() {
      info!("摄像头已释放");
    }
  }
}
