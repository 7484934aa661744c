// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

//! 把目录中的图像文件按文件名顺序当作视频帧读取。
//!
//! URL 格式：`images:///path/to/dir?fps=10`，第一张图像决定整个流的分辨率。

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, StreamProperties, url_path},
};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum ImageSequenceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录 {0} 中没有图像文件")]
  Empty(PathBuf),
  #[error("{path} 尺寸 {actual:?} 与序列尺寸 {expected:?} 不一致")]
  SizeMismatch {
    path: PathBuf,
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("无效的帧率: {0}")]
  InvalidFps(String),
}

pub struct ImageSequenceInput {
  pending: VecDeque<PathBuf>,
  first: Option<RgbImage>,
  properties: StreamProperties,
  next_index: u64,
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

fn load_rgb(path: &Path) -> Result<RgbImage, ImageSequenceError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

impl ImageSequenceInput {
  pub fn open(dir: impl AsRef<Path>, fps: Option<f64>) -> Result<Self, ImageSequenceError> {
    let dir = dir.as_ref();
    let mut paths = std::fs::read_dir(dir)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|p| is_image_file(p));
    paths.sort();

    let mut pending = VecDeque::from(paths);
    let first_path = pending
      .pop_front()
      .ok_or_else(|| ImageSequenceError::Empty(dir.to_path_buf()))?;
    let first = load_rgb(&first_path)?;

    let properties = StreamProperties {
      width: first.width(),
      height: first.height(),
      fps,
    };
    info!(
      "图像序列 {}: {} 帧, {}x{}",
      dir.display(),
      pending.len() + 1,
      properties.width,
      properties.height
    );

    Ok(Self {
      pending,
      first: Some(first),
      properties,
      next_index: 0,
    })
  }

  fn next_image(&mut self) -> Result<Option<RgbImage>, ImageSequenceError> {
    if let Some(first) = self.first.take() {
      return Ok(Some(first));
    }
    let Some(path) = self.pending.pop_front() else {
      return Ok(None);
    };

    debug!("读取图像 {}", path.display());
    let image = load_rgb(&path)?;
    let expected = (self.properties.width, self.properties.height);
    if image.dimensions() != expected {
      return Err(ImageSequenceError::SizeMismatch {
        path,
        expected,
        actual: image.dimensions(),
      });
    }
    Ok(Some(image))
  }
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceError::SchemaMismatch);
    }

    let fps = match url.query_pairs().find(|(k, _)| k == "fps") {
      Some((_, v)) => Some(
        v.parse::<f64>()
          .ok()
          .filter(|fps| *fps > 0.0)
          .ok_or_else(|| ImageSequenceError::InvalidFps(v.to_string()))?,
      ),
      None => None,
    };

    Self::open(url_path(url), fps)
  }
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "images";
}

impl FrameSource for ImageSequenceInput {
  type Error = ImageSequenceError;

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    let Some(image) = self.next_image()? else {
      return Ok(None);
    };
    let frame = Frame::new(self.next_index, image);
    self.next_index += 1;
    Ok(Some(frame))
  }

  fn properties(&self) -> StreamProperties {
    self.properties
  }

  fn release(&mut self) {
    self.first = None;
    self.pending.clear();
  }
}
