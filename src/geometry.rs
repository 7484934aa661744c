// 该文件是 Shanan （山南西风） 项目的一部分。
// src/geometry.rs - 原始帧与模型输入之间的几何变换
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

/// 缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 等比缩放并在两侧填充（letterbox）
  #[default]
  Letterbox,
  /// 直接拉伸到目标尺寸，水平和垂直方向各自缩放，无填充
  Stretch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
  #[error("尺寸必须为正数: 源 {source_width}x{source_height}, 目标 {target_width}x{target_height}")]
  NonPositiveDimension {
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 原始帧坐标与模型输入坐标之间的映射
///
/// 正向：`p' = p * scale + pad`；逆向：`p = (p' - pad) / scale`。
/// letterbox 模式下 `scale_x == scale_y`，拉伸模式下 `pad_x == pad_y == 0`。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryTransform {
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub target_width: u32,
  pub target_height: u32,
  pub source_width: u32,
  pub source_height: u32,
}

impl GeometryTransform {
  /// letterbox 变换：`scale = min(tw / sw, th / sh)`，填充使缩放后的图像居中
  pub fn compute(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, GeometryError> {
    check_dimensions(source_width, source_height, target_width, target_height)?;

    let scale = (target_width as f32 / source_width as f32)
      .min(target_height as f32 / source_height as f32);
    // 填充取整数像素，与图像内容的实际放置位置一致
    let content_w = scaled_extent(source_width, scale, target_width);
    let content_h = scaled_extent(source_height, scale, target_height);
    let pad_x = ((target_width - content_w) / 2) as f32;
    let pad_y = ((target_height - content_h) / 2) as f32;

    Ok(Self {
      scale_x: scale,
      scale_y: scale,
      pad_x,
      pad_y,
      target_width,
      target_height,
      source_width,
      source_height,
    })
  }

  /// 无 letterbox 的拉伸变换
  pub fn stretch(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, GeometryError> {
    check_dimensions(source_width, source_height, target_width, target_height)?;

    Ok(Self {
      scale_x: target_width as f32 / source_width as f32,
      scale_y: target_height as f32 / source_height as f32,
      pad_x: 0.0,
      pad_y: 0.0,
      target_width,
      target_height,
      source_width,
      source_height,
    })
  }

  pub fn with_mode(
    mode: ResizeMode,
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, GeometryError> {
    match mode {
      ResizeMode::Letterbox => {
        Self::compute(source_width, source_height, target_width, target_height)
      }
      ResizeMode::Stretch => Self::stretch(source_width, source_height, target_width, target_height),
    }
  }

  /// 等比缩放系数（letterbox 模式下两个方向相同）
  pub fn scale(&self) -> f32 {
    self.scale_x
  }

  pub fn is_letterbox(&self) -> bool {
    self.scale_x == self.scale_y
  }

  /// 原始帧坐标 -> 模型输入坐标
  pub fn forward(&self, point: Point) -> Point {
    Point {
      x: point.x * self.scale_x + self.pad_x,
      y: point.y * self.scale_y + self.pad_y,
    }
  }

  /// 模型输入坐标 -> 原始帧坐标
  pub fn inverse(&self, point: Point) -> Point {
    Point {
      x: (point.x - self.pad_x) / self.scale_x,
      y: (point.y - self.pad_y) / self.scale_y,
    }
  }

  /// 缩放后图像内容在画布中的像素尺寸
  pub fn content_size(&self) -> (u32, u32) {
    (
      scaled_extent(self.source_width, self.scale_x, self.target_width),
      scaled_extent(self.source_height, self.scale_y, self.target_height),
    )
  }

  /// 缩放后图像内容左上角在画布中的像素位置，即 `(pad_x, pad_y)`
  pub fn content_offset(&self) -> (u32, u32) {
    (self.pad_x as u32, self.pad_y as u32)
  }
}

fn scaled_extent(source: u32, scale: f32, target: u32) -> u32 {
  ((source as f32 * scale).round() as u32).clamp(1, target)
}

fn check_dimensions(
  source_width: u32,
  source_height: u32,
  target_width: u32,
  target_height: u32,
) -> Result<(), GeometryError> {
  if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
    return Err(GeometryError::NonPositiveDimension {
      source_width,
      source_height,
      target_width,
      target_height,
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * a.abs().max(b.abs()).max(1.0)
  }

  #[test]
  fn test_letterbox_640x480_into_416() {
    let t = GeometryTransform::compute(640, 480, 416, 416).unwrap();
    assert!(close(t.scale(), 0.65));
    assert!(close(t.pad_x, 0.0));
    assert!(close(t.pad_y, 52.0));
    assert_eq!(t.content_size(), (416, 312));
    assert_eq!(t.content_offset(), (0, 52));
  }

  #[test]
  fn test_round_trip_letterbox_and_stretch() {
    let sizes = [
      (640, 480, 416, 416),
      (1920, 1080, 640, 640),
      (480, 640, 416, 416),
      (33, 17, 320, 256),
      (1, 1, 416, 416),
    ];
    for (sw, sh, tw, th) in sizes {
      for mode in [ResizeMode::Letterbox, ResizeMode::Stretch] {
        let t = GeometryTransform::with_mode(mode, sw, sh, tw, th).unwrap();
        for (fx, fy) in [(0.0, 0.0), (0.25, 0.75), (0.5, 0.5), (1.0, 1.0), (0.9, 0.1)] {
          let p = Point::new(sw as f32 * fx, sh as f32 * fy);
          let back = t.inverse(t.forward(p));
          assert!(close(back.x, p.x), "{:?} {:?} -> {:?}", mode, p, back);
          assert!(close(back.y, p.y), "{:?} {:?} -> {:?}", mode, p, back);
        }
      }
    }
  }

  #[test]
  fn test_odd_padding_matches_content_placement() {
    let t = GeometryTransform::compute(1920, 1080, 640, 641).unwrap();
    assert_eq!(t.content_size(), (640, 360));
    assert_eq!(t.content_offset(), (0, 140));
    assert_eq!(t.pad_y, 140.0);

    let top = t.inverse(Point::new(320.0, 140.0));
    assert!(close(top.y, 0.0), "{:?}", top);
    assert!(close(top.x, 960.0), "{:?}", top);
  }

  #[test]
  fn test_scale_doubles_with_target() {
    let a = GeometryTransform::compute(640, 480, 208, 208).unwrap();
    let b = GeometryTransform::compute(640, 480, 416, 416).unwrap();
    assert!(close(b.scale(), a.scale() * 2.0));
  }

  #[test]
  fn test_stretch_has_independent_scales() {
    let t = GeometryTransform::stretch(640, 480, 416, 416).unwrap();
    assert!(close(t.scale_x, 0.65));
    assert!(close(t.scale_y, 416.0 / 480.0));
    assert_eq!(t.pad_x, 0.0);
    assert_eq!(t.pad_y, 0.0);
    assert!(!t.is_letterbox());
  }

  #[test]
  fn test_zero_dimension_is_rejected() {
    assert!(matches!(
      GeometryTransform::compute(0, 480, 416, 416),
      Err(GeometryError::NonPositiveDimension { .. })
    ));
    assert!(GeometryTransform::stretch(640, 480, 416, 0).is_err());
  }
}
