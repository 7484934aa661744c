// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测结果与性能信息标注
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

use std::{sync::Arc, time::Duration};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  label::{ClassNames, LabelError},
  model::{Detection, OriginalSpace},
};

const LABEL_FONT_SIZE: f32 = 18.0;
const LATENCY_FONT_SIZE: f32 = 28.0;
const LATENCY_POSITION: (i32, i32) = (40, 40);
const LATENCY_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载嵌入的字体文件")]
  FontLoadError,
}

/// 每个类别一个固定颜色，按类别索引取色
#[derive(Debug, Clone)]
pub struct ColorTable {
  colors: Vec<Rgb<u8>>,
}

impl ColorTable {
  /// 在色相环上等距取 `num_classes` 种颜色
  pub fn new(num_classes: usize) -> Self {
    let n = num_classes.max(1);
    let colors = (0..n)
      .map(|i| hsv_to_rgb((i as f32 / n as f32) * 360.0, 0.8, 0.9))
      .collect();
    Self { colors }
  }

  pub fn color(&self, label: u32) -> Rgb<u8> {
    self.colors[label as usize % self.colors.len()]
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 标签文本：类别名称与百分比置信度
pub fn label_text(name: &str, score: f32) -> String {
  format!("{}, {:.2}%", name, score * 100.0)
}

pub fn latency_text(latency: Duration) -> String {
  format!("{:.2}ms", latency.as_secs_f64() * 1000.0)
}

/// 标注器：在原始帧上原地绘制检测框、标签与推理耗时
pub struct Annotator {
  font: FontArc,
  class_names: Arc<ClassNames>,
  colors: ColorTable,
}

impl Annotator {
  pub fn new(class_names: Arc<ClassNames>) -> Result<Self, DrawError> {
    let font_data = include_bytes!("../../assets/font.ttf");
    let font = FontArc::try_from_slice(font_data).map_err(|_| DrawError::FontLoadError)?;
    let colors = ColorTable::new(class_names.len());

    Ok(Self {
      font,
      class_names,
      colors,
    })
  }

  pub fn colors(&self) -> &ColorTable {
    &self.colors
  }

  pub fn annotate(
    &self,
    image: &mut RgbImage,
    detections: &[Detection<OriginalSpace>],
  ) -> Result<(), LabelError> {
    for det in detections {
      let name = self.class_names.resolve(det.label)?;
      self.draw_bbox_with_label(
        image,
        &det.bbox,
        &label_text(name, det.score),
        self.colors.color(det.label),
      );
    }
    Ok(())
  }

  /// 固定位置绘制推理耗时
  pub fn draw_latency(&self, image: &mut RgbImage, latency: Duration) {
    draw_text_mut(
      image,
      Rgb(LATENCY_COLOR),
      LATENCY_POSITION.0,
      LATENCY_POSITION.1,
      PxScale::from(LATENCY_FONT_SIZE),
      &self.font,
      &latency_text(latency),
    );
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    // 框可能部分在帧外，绘制前裁剪
    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let thickness = (0.002 * w.max(h) as f32).round() as i32 + 1;
    for t in 0..thickness {
      let (rw, rh) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if rw <= 0 || rh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(rw as u32 + 1, rh as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let scale = PxScale::from(LABEL_FONT_SIZE);
    let (text_w, text_h) = text_size(scale, &self.font, label);
    let text_h = text_h as i32 + 4;

    // 标签放在框上方，空间不够时放在框内
    let label_x = x_min;
    let label_y = if y_min - text_h >= 0 { y_min - text_h } else { y_min };
    let label_w = (text_w as i32 + 4).min(w - label_x);
    if label_w > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_w as u32, text_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x + 2,
        label_y + 2,
        scale,
        &self.font,
        label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn annotator() -> Annotator {
    Annotator::new(Arc::new(ClassNames::coco())).unwrap()
  }

  #[test]
  fn test_label_and_latency_text() {
    assert_eq!(label_text("person", 0.95), "person, 95.00%");
    assert_eq!(latency_text(Duration::from_micros(12_345)), "12.35ms");
  }

  #[test]
  fn test_color_table_is_deterministic() {
    let a = ColorTable::new(80);
    let b = ColorTable::new(80);
    assert_eq!(a.color(5), b.color(5));
    assert_ne!(a.color(0), a.color(40));
    assert_eq!(a.color(81), a.color(1));
  }

  #[test]
  fn test_annotate_draws_box_edges() {
    let mut image = RgbImage::new(200, 200);
    let det = Detection::new([50.0, 60.0, 150.0, 160.0], 0.9, 0);
    let ann = annotator();
    ann.annotate(&mut image, &[det]).unwrap();

    let color = ann.colors().color(0);
    assert_eq!(image.get_pixel(100, 160), &color);
    assert_eq!(image.get_pixel(50, 100), &color);
    assert_eq!(image.get_pixel(100, 110), &Rgb([0, 0, 0]));
  }

  #[test]
  fn test_box_outside_frame_is_skipped() {
    let mut image = RgbImage::new(64, 64);
    let det = Detection::new([100.0, 100.0, 200.0, 200.0], 0.9, 0);
    annotator().annotate(&mut image, &[det]).unwrap();
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn test_unknown_label_is_error() {
    let mut image = RgbImage::new(64, 64);
    let det = Detection::new([1.0, 1.0, 20.0, 20.0], 0.9, 99);
    assert!(annotator().annotate(&mut image, &[det]).is_err());
  }

  #[test]
  fn test_latency_overlay_changes_pixels() {
    let mut image = RgbImage::new(200, 100);
    annotator().draw_latency(&mut image, Duration::from_millis(42));
    assert!(image.pixels().any(|p| *p != Rgb([0, 0, 0])));
  }
}
