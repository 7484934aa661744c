// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 运行配置
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::geometry::ResizeMode;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("模型输入尺寸必须为正数: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("归档策略无效: {0}")]
  InvalidPolicy(String),
  #[error("目标类别 '{0}' 不在类别名称表中")]
  UnknownTargetClass(String),
  #[error("锚框文件读取失败: {0}")]
  AnchorIo(#[from] std::io::Error),
  #[error("锚框格式错误: {0}")]
  AnchorFormat(String),
}

/// 归档策略，供分拣过滤器使用
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivePolicy {
  pub target_class: String,
  pub max_width: f32,
  pub max_height: f32,
  pub min_confidence_pct: f32,
}

impl Default for ArchivePolicy {
  fn default() -> Self {
    Self {
      target_class: "person".to_string(),
      max_width: 400.0,
      max_height: 400.0,
      min_confidence_pct: 80.0,
    }
  }
}

impl ArchivePolicy {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.target_class.trim().is_empty() {
      return Err(ConfigError::InvalidPolicy("目标类别为空".to_string()));
    }
    if !(self.max_width > 0.0 && self.max_height > 0.0) {
      return Err(ConfigError::InvalidPolicy(format!(
        "最大尺寸必须为正数: {}x{}",
        self.max_width, self.max_height
      )));
    }
    if !(0.0..=100.0).contains(&self.min_confidence_pct) {
      return Err(ConfigError::InvalidPolicy(format!(
        "置信度百分比超出 [0, 100]: {}",
        self.min_confidence_pct
      )));
    }
    Ok(())
  }
}

/// 检测器参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub restore_path: PathBuf,
  pub anchor_path: Option<PathBuf>,
  pub score_threshold: f32,
  pub nms_threshold: f32,
  pub max_boxes: usize,
}

/// 启动前一次性确定、运行期间不变的全部配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub input_width: u32,
  pub input_height: u32,
  pub resize_mode: ResizeMode,
  pub detector: DetectorConfig,
  pub class_name_path: Option<PathBuf>,
  pub camera: u32,
  pub input: Option<Url>,
  pub save_video: bool,
  pub video_path: PathBuf,
  pub display: bool,
  /// 额外的输出端 URL，例如 `gstvideo:///path/out.mkv`
  pub outputs: Vec<Url>,
  pub archive_root: PathBuf,
  pub archive_format: String,
  pub create_archive_dirs: bool,
  pub policy: ArchivePolicy,
  pub max_frames: Option<u64>,
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InvalidInputSize(
        self.input_width,
        self.input_height,
      ));
    }
    self.policy.validate()
  }
}

/// 解析 `x,y, x,y, ...` 格式的锚框
pub fn parse_anchors(text: &str) -> Result<Vec<[f32; 2]>, ConfigError> {
  let values = text
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|s| {
      s.parse::<f32>()
        .map_err(|e| ConfigError::AnchorFormat(format!("'{}': {}", s, e)))
    })
    .collect::<Result<Vec<f32>, _>>()?;

  if values.is_empty() || values.len() % 2 != 0 {
    return Err(ConfigError::AnchorFormat(format!(
      "锚框数值个数必须为非零偶数, 实际为 {}",
      values.len()
    )));
  }

  Ok(values.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
}

pub fn load_anchors(path: impl AsRef<Path>) -> Result<Vec<[f32; 2]>, ConfigError> {
  parse_anchors(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_anchors() {
    let anchors = parse_anchors("10,13, 16,30, 33,23\n").unwrap();
    assert_eq!(anchors, vec![[10.0, 13.0], [16.0, 30.0], [33.0, 23.0]]);
  }

  #[test]
  fn test_parse_anchors_rejects_odd_count() {
    assert!(matches!(
      parse_anchors("10,13,16"),
      Err(ConfigError::AnchorFormat(_))
    ));
    assert!(parse_anchors("10,abc").is_err());
  }

  #[test]
  fn test_policy_validation() {
    assert!(ArchivePolicy::default().validate().is_ok());
    let bad = ArchivePolicy {
      min_confidence_pct: 120.0,
      ..ArchivePolicy::default()
    };
    assert!(bad.validate().is_err());
    let bad = ArchivePolicy {
      max_width: 0.0,
      ..ArchivePolicy::default()
    };
    assert!(bad.validate().is_err());
  }
}
