// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入
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
use tracing::info;
use url::Url;

use crate::{FromUrl, frame::Frame};

/// 输入流属性，输出端据此确定分辨率与帧率
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamProperties {
  pub width: u32,
  pub height: u32,
  pub fps: Option<f64>,
}

/// 帧来源
pub trait FrameSource {
  type Error;

  /// 读取下一帧；流结束时返回 `Ok(None)`
  fn read(&mut self) -> Result<Option<Frame>, Self::Error>;

  fn properties(&self) -> StreamProperties;

  /// 释放底层设备，可重复调用
  fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
  type Error = S::Error;

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    (**self).read()
  }

  fn properties(&self) -> StreamProperties {
    (**self).properties()
  }

  fn release(&mut self) {
    (**self).release()
  }
}

#[cfg(feature = "image_sequence_input")]
mod image_sequence;
#[cfg(feature = "image_sequence_input")]
pub use self::image_sequence::{ImageSequenceError, ImageSequenceInput};

#[cfg(feature = "v4l_input")]
mod v4l2_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_camera::{V4l2Camera, V4l2CameraError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 按 URL 路径定位本地文件或目录，`scheme://relative/dir` 形式的主机部分视为路径的一段
pub(crate) fn url_path(url: &Url) -> String {
  match url.host_str() {
    Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
    _ => url.path().to_string(),
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "image_sequence_input")]
  #[error("Image sequence input error: {0}")]
  ImageSequenceError(#[from] ImageSequenceError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L2 camera error: {0}")]
  V4l2CameraError(#[from] V4l2CameraError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("没有可用的摄像头后端，请启用 v4l_input 或 gstreamer_input 特性")]
  NoCameraBackend,
}

pub enum InputWrapper {
  #[cfg(feature = "image_sequence_input")]
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "v4l_input")]
  V4l2Camera(V4l2Camera),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "image_sequence_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceInput::SCHEME {
        let input = ImageSequenceInput::from_url(url)?;
        return Ok(InputWrapper::ImageSequence(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  /// 按索引打开摄像头，优先使用 V4L2
  pub fn open_camera(index: u32) -> Result<Self, InputError> {
    info!("打开摄像头 {}", index);

    #[cfg(feature = "v4l_input")]
    {
      Ok(InputWrapper::V4l2Camera(V4l2Camera::open(index)?))
    }
    #[cfg(all(not(feature = "v4l_input"), feature = "gstreamer_input"))]
    {
      let input = GStreamerInputPipelineBuilder::camera(index).build()?;
      Ok(InputWrapper::GStreamerInput(input))
    }
    #[cfg(not(any(feature = "v4l_input", feature = "gstreamer_input")))]
    {
      Err(InputError::NoCameraBackend)
    }
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    match self {
      #[cfg(feature = "image_sequence_input")]
      InputWrapper::ImageSequence(input) => Ok(input.read()?),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => Ok(input.read()?),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => Ok(input.read()?),
      #[allow(unreachable_patterns)]
      _ => Ok(None),
    }
  }

  fn properties(&self) -> StreamProperties {
    match self {
      #[cfg(feature = "image_sequence_input")]
      InputWrapper::ImageSequence(input) => input.properties(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.properties(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.properties(),
      #[allow(unreachable_patterns)]
      _ => StreamProperties::default(),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "image_sequence_input")]
      InputWrapper::ImageSequence(input) => input.release(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.release(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.release(),
      #[allow(unreachable_patterns)]
      _ => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_path_joins_host() {
    let url = Url::parse("images://frames/day1?fps=5").unwrap();
    assert_eq!(url_path(&url), "frames/day1");
    let url = Url::parse("images:///data/frames").unwrap();
    assert_eq!(url_path(&url), "/data/frames");
  }

  #[test]
  fn test_unknown_scheme_rejected() {
    let url = Url::parse("ftp://example.com/x").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
