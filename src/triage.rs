// 该文件是 Shanan （山南西风） 项目的一部分。
// src/triage.rs - 检测结果分拣
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

use std::sync::Arc;

use crate::{
  config::{ArchivePolicy, ConfigError},
  label::{ClassNames, LabelError},
  model::{Detection, OriginalSpace},
};

/// 分拣结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
  pub archive: bool,
  pub annotate: bool,
}

/// 预先计算好的分拣谓词
///
/// 归档条件依次为：类别命中、尺寸不超限、置信度达标。
/// 标注只要求类别命中。
#[derive(Debug, Clone)]
pub struct TriagePolicy {
  policy: ArchivePolicy,
  class_names: Arc<ClassNames>,
  target_mask: Vec<bool>,
}

impl TriagePolicy {
  pub fn new(policy: ArchivePolicy, class_names: Arc<ClassNames>) -> Result<Self, ConfigError> {
    policy.validate()?;

    let mut target_mask = vec![false; class_names.len()];
    for idx in class_names.indices_of(&policy.target_class) {
      target_mask[idx as usize] = true;
    }
    if !target_mask.iter().any(|&hit| hit) {
      return Err(ConfigError::UnknownTargetClass(policy.target_class));
    }

    Ok(Self {
      policy,
      class_names,
      target_mask,
    })
  }

  pub fn policy(&self) -> &ArchivePolicy {
    &self.policy
  }

  pub fn class_names(&self) -> &ClassNames {
    &self.class_names
  }

  /// 类别索引越界时返回错误，不做静默丢弃
  pub fn decide(&self, det: &Detection<OriginalSpace>) -> Result<Decision, LabelError> {
    let is_target = *self
      .target_mask
      .get(det.label as usize)
      .ok_or(LabelError::OutOfRange {
        label: det.label,
        count: self.target_mask.len(),
      })?;

    if !is_target {
      return Ok(Decision::default());
    }

    let archive = det.width() <= self.policy.max_width
      && det.height() <= self.policy.max_height
      && det.score * 100.0 >= self.policy.min_confidence_pct;

    Ok(Decision {
      archive,
      annotate: true,
    })
  }
}
