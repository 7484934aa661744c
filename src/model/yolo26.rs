// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 检测器适配
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

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{Model, RawDetections},
  preprocess::InputTensor,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const DEFAULT_CLASS_NUM: usize = 80;
const DEFAULT_SCORE_THRESH: f32 = 0.3;
const DEFAULT_NMS_THRESH: f32 = 0.45;
const DEFAULT_MAX_BOXES: usize = 200;

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("输入尺寸 {width}x{height} 不能被最大步长 32 整除")]
  InputSizeError { width: usize, height: usize },
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Builder {
  model_path: PathBuf,
  flags: InitFlags,
  num_classes: usize,
  score_threshold: f32,
  nms_threshold: f32,
  max_boxes: usize,
  anchors: Option<Vec<[f32; 2]>>,
}

impl Yolo26Builder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      flags: InitFlags::default(),
      num_classes: DEFAULT_CLASS_NUM,
      score_threshold: DEFAULT_SCORE_THRESH,
      nms_threshold: DEFAULT_NMS_THRESH,
      max_boxes: DEFAULT_MAX_BOXES,
      anchors: None,
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  pub fn anchors(mut self, anchors: Option<Vec<[f32; 2]>>) -> Self {
    self.anchors = anchors;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    if let Some(anchors) = &self.anchors {
      // YOLO26 为无锚框检测头
      warn!("YOLO26 不使用锚框，忽略 {} 组锚框配置", anchors.len());
    }

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(Yolo26 {
      context,
      num_classes: self.num_classes,
      score_threshold: self.score_threshold,
      nms_threshold: self.nms_threshold,
      max_boxes: self.max_boxes,
    })
  }
}

pub struct Yolo26 {
  context: Context,
  num_classes: usize,
  score_threshold: f32,
  nms_threshold: f32,
  max_boxes: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
  bbox: [f32; 4],
  score: f32,
  label: u32,
}

impl Model for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, input: &InputTensor) -> Result<RawDetections, Self::Error> {
    let (width, height) = (input.width(), input.height());
    if width % 32 != 0 || height % 32 != 0 {
      return Err(Yolo26Error::InputSizeError { width, height });
    }

    // NPU 以 uint8 NHWC 接收输入，归一化在模型内部完成
    let quantized = input
      .iter()
      .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
      .collect::<Vec<u8>>();

    debug!("设置模型输入");
    self
      .context
      .set_input(0, &quantized, rknpu::TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let candidates = self.decode(&output, width, height);
    let kept = nms(candidates, self.nms_threshold, self.max_boxes);
    debug!("检测到 {} 个物体", kept.len());

    let mut raw = RawDetections::default();
    for Candidate { bbox, score, label } in kept {
      raw.boxes.push(bbox);
      raw.scores.push(score);
      raw.labels.push(label);
    }
    Ok(raw)
  }
}

impl Yolo26 {
  /// 解码三个检测头，坐标为模型输入像素坐标
  fn decode(&self, output: &rknpu::Output, width: usize, height: usize) -> Vec<Candidate> {
    let (input_w, input_h) = (width as f32, height as f32);
    let mut items = Vec::new();

    for (head_idx, stride) in YOLO26_STRIDES.into_iter().enumerate() {
      let map_h = height / stride as usize;
      let map_w = width / stride as usize;
      let spatial = map_h * map_w;
      let reg_expected = 4 * spatial;
      let cls_expected = self.num_classes * spatial;

      let tensor1 = match output.get_f32(head_idx * 2) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", head_idx * 2, e);
          continue;
        }
      };
      let tensor2 = match output.get_f32(head_idx * 2 + 1) {
        Ok(data) => data,
        Err(e) => {
          error!("获取第 {} 个输出失败: {}", head_idx * 2 + 1, e);
          continue;
        }
      };

      // RKNN 的输出顺序不固定，按张量大小区分回归与分类
      let (reg, cls) = if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
        (tensor1, tensor2)
      } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
        (tensor2, tensor1)
      } else {
        error!(
          "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
          head_idx,
          tensor1.len(),
          tensor2.len(),
          reg_expected,
          cls_expected
        );
        continue;
      };

      for h in 0..map_h {
        for w in 0..map_w {
          let idx = h * map_w + w;

          let (logit, class_id) = (0..self.num_classes)
            .map(|c| (cls[c * spatial + idx], c))
            .fold((f32::MIN, 0usize), |best, cur| if cur.0 > best.0 { cur } else { best });
          let score = sigmoid(logit);
          if score <= self.score_threshold {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;
          let x_min = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
          let y_min = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
          let x_max = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
          let y_max = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);

          items.push(Candidate {
            bbox: [x_min, y_min, x_max, y_max],
            score,
            label: class_id as u32,
          });
        }
      }
    }

    items
  }
}

/// 按类别的贪心非极大值抑制
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_boxes: usize) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for cand in candidates {
    if kept.len() >= max_boxes {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.label == cand.label && iou(&k.bbox, &cand.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(cand);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cand(bbox: [f32; 4], score: f32, label: u32) -> Candidate {
    Candidate { bbox, score, label }
  }

  #[test]
  fn test_nms_suppresses_same_class_overlap_only() {
    let kept = nms(
      vec![
        cand([0.0, 0.0, 10.0, 10.0], 0.8, 0),
        cand([1.0, 1.0, 10.0, 10.0], 0.9, 0),
        cand([1.0, 1.0, 10.0, 10.0], 0.7, 1),
        cand([50.0, 50.0, 60.0, 60.0], 0.6, 0),
      ],
      0.45,
      200,
    );
    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].label, 1);
  }

  #[test]
  fn test_nms_caps_output() {
    let many = (0..10)
      .map(|i| cand([i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0], 0.5, 0))
      .collect();
    assert_eq!(nms(many, 0.45, 4).len(), 4);
  }
}
