// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::input::StreamProperties;

/// 输出端：分辨率与帧率在创建时确定，整个运行期间不变
pub trait OutputSink {
  type Error;

  /// 按采集顺序追加一帧
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error>;

  /// 释放输出资源，可重复调用
  fn release(&mut self) -> Result<(), Self::Error>;
}

impl<O: OutputSink + ?Sized> OutputSink for &mut O {
  type Error = O::Error;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    (**self).write_frame(image)
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    (**self).release()
  }
}

pub mod draw;

#[cfg(feature = "save_video_file")]
mod save_video_file;
#[cfg(feature = "save_video_file")]
pub use self::save_video_file::{SaveVideoFileError, SaveVideoFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display_output::GStreamerDisplayOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_video_file")]
  #[error("保存视频文件错误: {0}")]
  SaveVideoFileError(#[from] SaveVideoFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("帧尺寸 {actual:?} 与输出尺寸 {expected:?} 不一致")]
  SizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未启用 {0} 特性")]
  FeatureDisabled(&'static str),
}

/// 检查帧尺寸是否与输出尺寸一致
pub(crate) fn check_frame_size(
  image: &RgbImage,
  properties: &StreamProperties,
) -> Result<(), OutputError> {
  let actual = image.dimensions();
  let expected = (properties.width, properties.height);
  if actual != expected {
    return Err(OutputError::SizeMismatch { expected, actual });
  }
  Ok(())
}

pub enum OutputWrapper {
  #[cfg(feature = "save_video_file")]
  SaveVideoFileOutput(SaveVideoFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
}

impl OutputWrapper {
  /// 按 URL 方案创建输出，尺寸与帧率取自输入流
  pub fn open(url: &Url, properties: StreamProperties) -> Result<Self, OutputError> {
    match url.scheme() {
      #[cfg(feature = "save_video_file")]
      SaveVideoFileOutput::SCHEME => Ok(OutputWrapper::SaveVideoFileOutput(
        SaveVideoFileOutput::open(url, properties)?,
      )),
      #[cfg(feature = "gstreamer_output")]
      GStreamerVideoOutput::SCHEME => Ok(OutputWrapper::GStreamerVideoOutput(
        GStreamerVideoOutput::open(url, properties)?,
      )),
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => Ok(OutputWrapper::GStreamerDisplayOutput(
        GStreamerDisplayOutput::open(url, properties)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }

  /// 按路径创建视频文件输出
  pub fn video_file(path: &Path, properties: StreamProperties) -> Result<Self, OutputError> {
    #[cfg(feature = "save_video_file")]
    {
      Ok(OutputWrapper::SaveVideoFileOutput(
        SaveVideoFileOutput::create(path, properties)?,
      ))
    }
    #[cfg(not(feature = "save_video_file"))]
    {
      let _ = (path, properties);
      Err(OutputError::FeatureDisabled("save_video_file"))
    }
  }

  /// 实时显示窗口
  pub fn display(properties: StreamProperties) -> Result<Self, OutputError> {
    #[cfg(feature = "gstreamer_output")]
    {
      let url = Url::parse("display://").map_err(|e| OutputError::SchemeMismatch(e.to_string()))?;
      Ok(OutputWrapper::GStreamerDisplayOutput(
        GStreamerDisplayOutput::open(&url, properties)?,
      ))
    }
    #[cfg(not(feature = "gstreamer_output"))]
    {
      let _ = properties;
      Err(OutputError::FeatureDisabled("gstreamer_output"))
    }
  }
}

impl OutputSink for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_video_file")]
      OutputWrapper::SaveVideoFileOutput(output) => output.write_frame(image),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.write_frame(image),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output.write_frame(image),
      #[allow(unreachable_patterns)]
      _ => Ok(()),
    }
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_video_file")]
      OutputWrapper::SaveVideoFileOutput(output) => output.release(),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output.release(),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output.release(),
      #[allow(unreachable_patterns)]
      _ => Ok(()),
    }
  }
}

/// 多个输出端：显示窗口与视频文件可以同时存在
pub struct Outputs<O> {
  sinks: Vec<O>,
}

impl<O> Default for Outputs<O> {
  fn default() -> Self {
    Self { sinks: Vec::new() }
  }
}

impl<O> Outputs<O> {
  pub fn new(sinks: Vec<O>) -> Self {
    Self { sinks }
  }

  pub fn push(&mut self, sink: O) {
    self.sinks.push(sink);
  }

  pub fn len(&self) -> usize {
    self.sinks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sinks.is_empty()
  }
}

impl<O: OutputSink> OutputSink for Outputs<O> {
  type Error = O::Error;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    for sink in self.sinks.iter_mut() {
      sink.write_frame(image)?;
    }
    Ok(())
  }

  /// 逐个释放，返回第一个错误
  fn release(&mut self) -> Result<(), Self::Error> {
    let mut first_error = None;
    for sink in self.sinks.iter_mut() {
      if let Err(e) = sink.release() {
        warn!("释放输出失败");
        first_error.get_or_insert(e);
      }
    }
    info!("已释放 {} 个输出", self.sinks.len());
    first_error.map_or(Ok(()), Err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn props() -> StreamProperties {
    StreamProperties {
      width: 8,
      height: 6,
      fps: Some(10.0),
    }
  }

  #[test]
  fn test_open_rejects_unknown_scheme() {
    let url = Url::parse("rtsp://127.0.0.1/live").unwrap();
    assert!(matches!(
      OutputWrapper::open(&url, props()),
      Err(OutputError::SchemeMismatch(s)) if s == "rtsp"
    ));
  }

  #[cfg(feature = "save_video_file")]
  #[test]
  fn test_open_routes_video_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("video://{}/out.mp4", dir.path().display())).unwrap();
    let mut output = OutputWrapper::open(&url, props()).unwrap();
    assert!(matches!(output, OutputWrapper::SaveVideoFileOutput(_)));
    assert!(dir.path().join("out.mp4.frames").is_dir());

    output.release().unwrap();
    assert!(!dir.path().join("out.mp4.frames").exists());
  }

  #[cfg(not(feature = "gstreamer_output"))]
  #[test]
  fn test_display_needs_gstreamer_output() {
    assert!(matches!(
      OutputWrapper::display(props()),
      Err(OutputError::FeatureDisabled("gstreamer_output"))
    ));
  }

  #[derive(Default)]
  struct Counting {
    frames: usize,
    releases: usize,
    fail_release: bool,
  }

  impl OutputSink for Counting {
    type Error = OutputError;

    fn write_frame(&mut self, _image: &RgbImage) -> Result<(), Self::Error> {
      self.frames += 1;
      Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
      self.releases += 1;
      if self.fail_release {
        return Err(OutputError::FeatureDisabled("release"));
      }
      Ok(())
    }
  }

  #[test]
  fn test_outputs_fan_out_and_release_all() {
    let mut a = Counting {
      fail_release: true,
      ..Counting::default()
    };
    let mut b = Counting::default();
    {
      let mut outputs = Outputs::new(vec![&mut a, &mut b]);
      outputs.write_frame(&RgbImage::new(8, 6)).unwrap();
      outputs.write_frame(&RgbImage::new(8, 6)).unwrap();
      assert!(outputs.release().is_err());
    }
    assert_eq!((a.frames, b.frames), (2, 2));
    assert_eq!((a.releases, b.releases), (1, 1));
  }
}
