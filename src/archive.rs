// 该文件是 Shanan （山南西风） 项目的一部分。
// src/archive.rs - 按时段归档检测截图
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

//! 检测截图归档
//!
//! 目录布局：
//!
//! ```text
//! <root>/0-6/<时>-<分>-<秒>.jpg
//! <root>/6-12/...
//! <root>/12-18/...
//! <root>/18-24/...
//! ```
//!
//! 文件名只精确到秒，同一秒内同一时段的多次归档会互相覆盖，以最后一次为准。
//! 分区目录由外部准备，归档过程不会创建目录。

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Timelike};
use image::{ImageFormat, RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Detection, OriginalSpace};

#[derive(Error, Debug)]
pub enum ArchiveError {
  #[error("不支持的归档图像格式: {0}")]
  UnsupportedFormat(String),
  #[error("检测框 {bbox:?} 与帧没有交集")]
  EmptyRegion { bbox: [f32; 4] },
  #[error("写入 {path} 失败: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("创建分区目录失败: {0}")]
  Io(#[from] std::io::Error),
}

/// 一天中的四个固定时段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
  Night,
  Morning,
  Afternoon,
  Evening,
}

impl TimeBucket {
  pub const ALL: [TimeBucket; 4] = [
    TimeBucket::Night,
    TimeBucket::Morning,
    TimeBucket::Afternoon,
    TimeBucket::Evening,
  ];

  pub fn from_hour(hour: u32) -> Self {
    match hour {
      0..6 => TimeBucket::Night,
      6..12 => TimeBucket::Morning,
      12..18 => TimeBucket::Afternoon,
      _ => TimeBucket::Evening,
    }
  }

  pub fn dir_name(&self) -> &'static str {
    match self {
      TimeBucket::Night => "0-6",
      TimeBucket::Morning => "6-12",
      TimeBucket::Afternoon => "12-18",
      TimeBucket::Evening => "18-24",
    }
  }
}

/// 墙上时钟
pub trait Clock {
  fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
  fn now(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
  fn now(&self) -> NaiveDateTime {
    self.0
  }
}

impl<C: Clock + ?Sized> Clock for &C {
  fn now(&self) -> NaiveDateTime {
    (**self).now()
  }
}

/// 已写入磁盘的截图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedCrop {
  pub path: PathBuf,
  pub bucket: TimeBucket,
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Archiver {
  root: PathBuf,
  extension: String,
  format: ImageFormat,
}

impl Archiver {
  pub fn new(root: impl AsRef<Path>, extension: &str) -> Result<Self, ArchiveError> {
    let extension = extension.trim_start_matches('.').to_lowercase();
    let format = ImageFormat::from_extension(&extension)
      .filter(|f| matches!(f, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp))
      .ok_or_else(|| ArchiveError::UnsupportedFormat(extension.clone()))?;

    Ok(Self {
      root: root.as_ref().to_path_buf(),
      extension,
      format,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 创建四个分区目录（可选的启动准备步骤）
  pub fn prepare_partitions(&self) -> Result<(), ArchiveError> {
    for bucket in TimeBucket::ALL {
      std::fs::create_dir_all(self.partition_path(bucket))?;
    }
    info!("归档分区目录已就绪: {}", self.root.display());
    Ok(())
  }

  pub fn partition_path(&self, bucket: TimeBucket) -> PathBuf {
    self.root.join(bucket.dir_name())
  }

  pub fn crop_path<T: Timelike>(&self, at: &T) -> PathBuf {
    self
      .partition_path(TimeBucket::from_hour(at.hour()))
      .join(format!(
        "{}-{}-{}.{}",
        at.hour(),
        at.minute(),
        at.second(),
        self.extension
      ))
  }

  /// 从未标注的帧中截取检测区域并写入对应时段分区
  pub fn archive<T: Timelike>(
    &self,
    image: &RgbImage,
    det: &Detection<OriginalSpace>,
    at: &T,
  ) -> Result<ArchivedCrop, ArchiveError> {
    let (x, y, width, height) = crop_region(image.width(), image.height(), &det.bbox)
      .ok_or(ArchiveError::EmptyRegion { bbox: det.bbox })?;

    let crop = imageops::crop_imm(image, x, y, width, height).to_image();
    let path = self.crop_path(at);
    crop
      .save_with_format(&path, self.format)
      .map_err(|source| ArchiveError::Write {
        path: path.clone(),
        source,
      })?;

    debug!("已归档 {}x{} 截图到 {}", width, height, path.display());
    Ok(ArchivedCrop {
      path,
      bucket: TimeBucket::from_hour(at.hour()),
      width,
      height,
    })
  }
}

/// 检测框截断为整数并裁剪到帧内，返回 `(x, y, w, h)`；无交集时返回 `None`
pub fn crop_region(frame_width: u32, frame_height: u32, bbox: &[f32; 4]) -> Option<(u32, u32, u32, u32)> {
  let clamp = |v: f32, max: u32| v.trunc().clamp(0.0, max as f32) as u32;

  let x0 = clamp(bbox[0], frame_width);
  let y0 = clamp(bbox[1], frame_height);
  let x1 = clamp(bbox[2], frame_width);
  let y1 = clamp(bbox[3], frame_height);

  if x1 <= x0 || y1 <= y0 {
    return None;
  }
  Some((x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveTime;
  use image::Rgb;

  fn at(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
  }

  #[test]
  fn test_bucket_partitioning() {
    let expected = [
      (0, "0-6"),
      (5, "0-6"),
      (6, "6-12"),
      (11, "6-12"),
      (12, "12-18"),
      (17, "12-18"),
      (18, "18-24"),
      (23, "18-24"),
    ];
    for (hour, dir) in expected {
      assert_eq!(TimeBucket::from_hour(hour).dir_name(), dir, "hour {}", hour);
    }
  }

  #[test]
  fn test_crop_path_is_unpadded_time() {
    let archiver = Archiver::new("YOLO", "jpg").unwrap();
    assert_eq!(
      archiver.crop_path(&at(7, 5, 9)),
      PathBuf::from("YOLO/6-12/7-5-9.jpg")
    );
  }

  #[test]
  fn test_unsupported_format() {
    assert!(matches!(
      Archiver::new("YOLO", "xyz"),
      Err(ArchiveError::UnsupportedFormat(_))
    ));
  }

  #[test]
  fn test_crop_region_clamps_to_frame() {
    assert_eq!(
      crop_region(100, 80, &[-10.5, 5.9, 150.0, 60.2]),
      Some((0, 5, 100, 55))
    );
    assert_eq!(crop_region(100, 80, &[120.0, 0.0, 150.0, 10.0]), None);
    assert_eq!(crop_region(100, 80, &[10.0, 10.0, 10.4, 50.0]), None);
  }

  #[test]
  fn test_missing_partition_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let archiver = Archiver::new(dir.path(), "png").unwrap();
    let image = RgbImage::from_pixel(32, 32, Rgb([1, 2, 3]));
    let det = Detection::new([0.0, 0.0, 16.0, 16.0], 0.9, 0);

    assert!(matches!(
      archiver.archive(&image, &det, &at(13, 0, 0)),
      Err(ArchiveError::Write { .. })
    ));
  }

  #[test]
  fn test_same_second_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let archiver = Archiver::new(dir.path(), "png").unwrap();
    archiver.prepare_partitions().unwrap();

    let first = RgbImage::from_pixel(32, 32, Rgb([255, 0, 0]));
    let second = RgbImage::from_pixel(32, 32, Rgb([0, 0, 255]));
    let det = Detection::new([4.0, 4.0, 20.0, 12.0], 0.9, 0);

    let a = archiver.archive(&first, &det, &at(19, 30, 15)).unwrap();
    let b = archiver.archive(&second, &det, &at(19, 30, 15)).unwrap();
    assert_eq!(a.path, b.path);
    assert_eq!(b.bucket, TimeBucket::Evening);
    assert_eq!((b.width, b.height), (16, 8));

    let files = std::fs::read_dir(archiver.partition_path(TimeBucket::Evening))
      .unwrap()
      .count();
    assert_eq!(files, 1);

    let saved = image::open(&b.path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (16, 8));
    assert_eq!(saved.get_pixel(0, 0), &Rgb([0, 0, 255]));
  }
}
