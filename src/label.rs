// 该文件是 Shanan （山南西风） 项目的一部分。
// src/label.rs - 类别名称表
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

use thiserror::Error;
use tracing::info;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("类别索引 {label} 超出范围 (共 {count} 个类别)")]
  OutOfRange { label: u32, count: usize },
  #[error("读取类别名称文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("类别名称文件为空")]
  Empty,
}

/// 类别索引到名称的映射，启动时加载一次，之后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
  names: Vec<String>,
}

impl ClassNames {
  pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self { names })
  }

  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// 每行一个类别名称，忽略空行
  pub fn parse(text: &str) -> Result<Self, LabelError> {
    let names = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect();
    Self::new(names)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let names = Self::parse(&std::fs::read_to_string(path)?)?;
    info!("从 {} 加载了 {} 个类别名称", path.display(), names.len());
    Ok(names)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn resolve(&self, label: u32) -> Result<&str, LabelError> {
    self
      .names
      .get(label as usize)
      .map(String::as_str)
      .ok_or(LabelError::OutOfRange {
        label,
        count: self.names.len(),
      })
  }

  /// 所有名称等于 `name` 的类别索引
  pub fn indices_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = u32> + 'a {
    self
      .names
      .iter()
      .enumerate()
      .filter(move |(_, n)| n.as_str() == name)
      .map(|(i, _)| i as u32)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_skips_blank_lines() {
    let names = ClassNames::parse("person\n\nbicycle\r\ncar\n\n").unwrap();
    assert_eq!(names.len(), 3);
    assert_eq!(names.resolve(2).unwrap(), "car");
  }

  #[test]
  fn test_resolve_out_of_range() {
    let names = ClassNames::coco();
    assert_eq!(names.resolve(0).unwrap(), "person");
    assert!(matches!(
      names.resolve(80),
      Err(LabelError::OutOfRange { label: 80, count: 80 })
    ));
  }

  #[test]
  fn test_empty_file_rejected() {
    assert!(matches!(ClassNames::parse("\n\n"), Err(LabelError::Empty)));
  }
}
