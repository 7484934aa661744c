// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 模型输入预处理
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use ndarray::{Array4, ArrayView4};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{Frame, RGB_CHANNELS},
  geometry::{GeometryError, GeometryTransform, ResizeMode},
};

/// letterbox 填充颜色（灰色）
pub const LETTERBOX_FILL: u8 = 128;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("几何变换错误: {0}")]
  Geometry(#[from] GeometryError),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

/// 模型输入张量，形状为 `[1, H, W, 3]`，取值范围 `[0, 1]`，通道顺序 RGB
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  data: Array4<f32>,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    let s = self.data.shape();
    [s[0], s[1], s[2], s[3]]
  }

  pub fn width(&self) -> usize {
    self.data.shape()[2]
  }

  pub fn height(&self) -> usize {
    self.data.shape()[1]
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  /// 按 NHWC 顺序遍历所有元素
  pub fn iter(&self) -> impl Iterator<Item = &f32> {
    self.data.iter()
  }
}

/// 预处理器：缩放原始帧并生成模型输入张量及对应的几何变换
#[derive(Debug, Clone)]
pub struct Preprocessor {
  target_width: u32,
  target_height: u32,
  mode: ResizeMode,
}

impl Preprocessor {
  pub fn new(target_width: u32, target_height: u32, mode: ResizeMode) -> Self {
    Self {
      target_width,
      target_height,
      mode,
    }
  }

  pub fn target_size(&self) -> (u32, u32) {
    (self.target_width, self.target_height)
  }

  pub fn mode(&self) -> ResizeMode {
    self.mode
  }

  /// 不修改源帧；相同输入总是得到逐位相同的输出
  pub fn process(&self, frame: &Frame) -> Result<(InputTensor, GeometryTransform), PreprocessError> {
    let transform = GeometryTransform::with_mode(
      self.mode,
      frame.width(),
      frame.height(),
      self.target_width,
      self.target_height,
    )?;

    let canvas = match self.mode {
      ResizeMode::Letterbox => letterbox(frame.image(), &transform),
      ResizeMode::Stretch => imageops::resize(
        frame.image(),
        self.target_width,
        self.target_height,
        FilterType::Triangle,
      ),
    };

    debug!(
      "预处理: {}x{} -> {}x{}, scale=({:.4}, {:.4}), pad=({:.1}, {:.1})",
      frame.width(),
      frame.height(),
      self.target_width,
      self.target_height,
      transform.scale_x,
      transform.scale_y,
      transform.pad_x,
      transform.pad_y
    );

    let tensor = to_tensor(&canvas)?;
    Ok((tensor, transform))
  }
}

fn letterbox(image: &RgbImage, transform: &GeometryTransform) -> RgbImage {
  let (content_w, content_h) = transform.content_size();
  let (offset_x, offset_y) = transform.content_offset();

  let resized = imageops::resize(image, content_w, content_h, FilterType::Triangle);
  let mut canvas = RgbImage::from_pixel(
    transform.target_width,
    transform.target_height,
    Rgb([LETTERBOX_FILL; 3]),
  );
  imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);
  canvas
}

fn to_tensor(canvas: &RgbImage) -> Result<InputTensor, PreprocessError> {
  let (w, h) = canvas.dimensions();
  let values = canvas
    .as_raw()
    .iter()
    .map(|&v| v as f32 / 255.0)
    .collect::<Vec<f32>>();
  let data = Array4::from_shape_vec((1, h as usize, w as usize, RGB_CHANNELS), values)?;
  Ok(InputTensor { data })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> Frame {
    let image = RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    Frame::new(0, image)
  }

  #[test]
  fn test_letterbox_shape_and_padding() {
    let frame = gradient(640, 480);
    let pre = Preprocessor::new(416, 416, ResizeMode::Letterbox);
    let (tensor, transform) = pre.process(&frame).unwrap();

    assert_eq!(tensor.shape(), [1, 416, 416, 3]);
    assert_eq!(transform.content_offset(), (0, 52));

    let fill = LETTERBOX_FILL as f32 / 255.0;
    let view = tensor.view();
    assert_eq!(view[[0, 0, 200, 0]], fill);
    assert_eq!(view[[0, 415, 10, 2]], fill);
    assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn test_odd_padding_content_starts_at_pad() {
    let frame = Frame::new(0, RgbImage::from_pixel(1920, 1080, Rgb([255, 255, 255])));
    let pre = Preprocessor::new(640, 641, ResizeMode::Letterbox);
    let (tensor, transform) = pre.process(&frame).unwrap();

    let first_row = transform.pad_y as usize;
    assert_eq!(first_row, 140);
    let view = tensor.view();
    assert_eq!(view[[0, first_row - 1, 320, 0]], LETTERBOX_FILL as f32 / 255.0);
    assert_eq!(view[[0, first_row, 320, 0]], 1.0);
    assert_eq!(view[[0, first_row + 359, 320, 0]], 1.0);
    assert_eq!(view[[0, first_row + 360, 320, 0]], LETTERBOX_FILL as f32 / 255.0);
  }

  #[test]
  fn test_stretch_fills_whole_canvas() {
    let frame = Frame::new(0, RgbImage::from_pixel(320, 100, Rgb([255, 0, 0])));
    let pre = Preprocessor::new(64, 64, ResizeMode::Stretch);
    let (tensor, transform) = pre.process(&frame).unwrap();

    assert_eq!(transform.pad_y, 0.0);
    let view = tensor.view();
    assert_eq!(view[[0, 0, 0, 0]], 1.0);
    assert_eq!(view[[0, 63, 63, 1]], 0.0);
  }

  #[test]
  fn test_deterministic_and_source_untouched() {
    let frame = gradient(123, 77);
    let before = frame.as_nhwc().to_vec();
    let pre = Preprocessor::new(96, 64, ResizeMode::Letterbox);

    let (a, ta) = pre.process(&frame).unwrap();
    let (b, tb) = pre.process(&frame).unwrap();

    assert_eq!(a, b);
    assert_eq!(ta, tb);
    assert_eq!(frame.as_nhwc(), before.as_slice());
  }
}
