// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 检测模型接口与检测结果
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

use std::marker::PhantomData;

use thiserror::Error;

use crate::preprocess::InputTensor;

/// 检测器接口
///
/// 输入为 `[1, H, W, 3]` 的归一化张量，输出模型坐标系下的检测框。
/// 置信度计算与 NMS 都在检测器内部完成。
pub trait Model {
  type Error;

  fn infer(&self, input: &InputTensor) -> Result<RawDetections, Self::Error>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn infer(&self, input: &InputTensor) -> Result<RawDetections, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
  #[error("检测输出长度不一致: boxes={boxes}, scores={scores}, labels={labels}")]
  LengthMismatch {
    boxes: usize,
    scores: usize,
    labels: usize,
  },
}

/// 坐标系标记
pub trait CoordinateSpace: std::fmt::Debug + Clone + Copy {}

/// 模型输入坐标系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpace;

/// 原始帧坐标系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalSpace;

impl CoordinateSpace for ModelSpace {}
impl CoordinateSpace for OriginalSpace {}

/// 单个检测结果，`S` 标记其坐标所在的坐标系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection<S: CoordinateSpace> {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub score: f32,
  pub label: u32,
  _space: PhantomData<S>,
}

impl<S: CoordinateSpace> Detection<S> {
  pub fn new(bbox: [f32; 4], score: f32, label: u32) -> Self {
    Self {
      bbox,
      score,
      label,
      _space: PhantomData,
    }
  }

  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }
}

/// 检测器原始输出：三个等长的并列序列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub labels: Vec<u32>,
}

impl RawDetections {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  /// 校验并转换为模型坐标系下的检测结果
  pub fn into_detections(self) -> Result<Vec<Detection<ModelSpace>>, ModelError> {
    let (boxes, scores, labels) = (self.boxes.len(), self.scores.len(), self.labels.len());
    if boxes != scores || boxes != labels {
      return Err(ModelError::LengthMismatch {
        boxes,
        scores,
        labels,
      });
    }

    Ok(
      self
        .boxes
        .into_iter()
        .zip(self.scores)
        .zip(self.labels)
        .map(|((bbox, score), label)| Detection::new(bbox, score, label))
        .collect(),
    )
  }
}

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_into_detections_keeps_order() {
    let raw = RawDetections {
      boxes: vec![[0.0, 0.0, 10.0, 20.0], [5.0, 5.0, 6.0, 6.0]],
      scores: vec![0.9, 0.4],
      labels: vec![0, 2],
    };
    let dets = raw.into_detections().unwrap();
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].width(), 10.0);
    assert_eq!(dets[0].height(), 20.0);
    assert_eq!(dets[1].label, 2);
  }

  #[test]
  fn test_empty_output_is_fine() {
    assert!(RawDetections::default().into_detections().unwrap().is_empty());
  }

  #[test]
  fn test_unequal_lengths_rejected() {
    let raw = RawDetections {
      boxes: vec![[0.0; 4]],
      scores: vec![],
      labels: vec![1],
    };
    assert_eq!(
      raw.into_detections().unwrap_err(),
      ModelError::LengthMismatch {
        boxes: 1,
        scores: 0,
        labels: 1
      }
    );
  }
}
