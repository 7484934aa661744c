// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameFormatError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 采集到的一帧图像
///
/// 像素按 NHWC 排列，通道顺序固定为 R, G, B。帧由每次循环独占，
/// 标注器会原地修改它。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  index: u64,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { image, index }
  }

  pub fn from_rgb(
    index: u64,
    width: u32,
    height: u32,
    data: Vec<u8>,
  ) -> Result<Self, FrameFormatError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameFormatError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let image = RgbImage::from_raw(width, height, data).ok_or(FrameFormatError::LengthMismatch {
      expected,
      actual: 0,
    })?;
    Ok(Self { image, index })
  }

  /// BGR 数据转换为 RGB 帧
  pub fn from_bgr(
    index: u64,
    width: u32,
    height: u32,
    data: &[u8],
  ) -> Result<Self, FrameFormatError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() < expected {
      return Err(FrameFormatError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let rgb = data[..expected]
      .chunks_exact(RGB_CHANNELS)
      .flat_map(|px| [px[2], px[1], px[0]])
      .collect();
    Self::from_rgb(index, width, height, rgb)
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_bgr_swaps_channels() {
    let frame = Frame::from_bgr(3, 2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(frame.index(), 3);
    assert_eq!(frame.as_nhwc(), &[3, 2, 1, 6, 5, 4]);
  }

  #[test]
  fn test_from_rgb_checks_length() {
    assert_eq!(
      Frame::from_rgb(0, 2, 2, vec![0; 11]).unwrap_err(),
      FrameFormatError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }
}
