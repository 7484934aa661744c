// 该文件是 Shanan （山南西风） 项目的一部分。
// src/rescale.rs - 检测框还原到原始帧坐标
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

use crate::{
  geometry::{GeometryTransform, Point},
  model::{Detection, ModelSpace, OriginalSpace},
};

/// 将模型坐标系下的检测结果映射回原始帧坐标系
///
/// 两个角点分别做逆变换。结果保证为有限值，但不裁剪到帧边界，
/// 框可能部分落在帧外。
pub fn rescale(
  detections: &[Detection<ModelSpace>],
  transform: &GeometryTransform,
) -> Vec<Detection<OriginalSpace>> {
  detections
    .iter()
    .map(|det| rescale_one(det, transform))
    .collect()
}

pub fn rescale_one(
  det: &Detection<ModelSpace>,
  transform: &GeometryTransform,
) -> Detection<OriginalSpace> {
  let [x0, y0, x1, y1] = det.bbox;
  let top_left = transform.inverse(Point::new(x0, y0));
  let bottom_right = transform.inverse(Point::new(x1, y1));

  Detection::new(
    [
      finite(top_left.x),
      finite(top_left.y),
      finite(bottom_right.x),
      finite(bottom_right.y),
    ],
    det.score,
    det.label,
  )
}

fn finite(v: f32) -> f32 {
  if v.is_nan() {
    0.0
  } else {
    v.clamp(f32::MIN, f32::MAX)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 0.1
  }

  #[test]
  fn test_letterbox_scenario() {
    let t = GeometryTransform::compute(640, 480, 416, 416).unwrap();
    let det = Detection::<ModelSpace>::new([100.0, 100.0, 200.0, 200.0], 0.9, 0);
    let out = rescale(&[det], &t);

    let [x0, y0, x1, y1] = out[0].bbox;
    assert!(close(x0, 153.8), "{}", x0);
    assert!(close(y0, 73.8), "{}", y0);
    assert!(close(x1, 307.7), "{}", x1);
    assert!(close(y1, 227.7), "{}", y1);
    assert_eq!(out[0].score, 0.9);
    assert_eq!(out[0].label, 0);
  }

  #[test]
  fn test_stretch_mode_scales_axes_independently() {
    let t = GeometryTransform::stretch(800, 400, 400, 400).unwrap();
    let det = Detection::<ModelSpace>::new([100.0, 100.0, 200.0, 300.0], 0.5, 3);
    let [x0, y0, x1, y1] = rescale_one(&det, &t).bbox;
    assert!(close(x0, 200.0));
    assert!(close(y0, 100.0));
    assert!(close(x1, 400.0));
    assert!(close(y1, 300.0));
  }

  #[test]
  fn test_box_in_padding_goes_outside_frame() {
    let t = GeometryTransform::compute(640, 480, 416, 416).unwrap();
    let det = Detection::<ModelSpace>::new([0.0, 0.0, 10.0, 10.0], 0.5, 0);
    let out = rescale_one(&det, &t);
    assert!(out.bbox[1] < 0.0);
  }

  #[test]
  fn test_non_finite_coordinates_are_clamped() {
    let t = GeometryTransform::compute(640, 480, 416, 416).unwrap();
    let det = Detection::<ModelSpace>::new([f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1.0], 0.5, 0);
    let out = rescale_one(&det, &t);
    assert!(out.bbox.iter().all(|v| v.is_finite()));
    assert!(rescale(&[], &t).is_empty());
  }
}
