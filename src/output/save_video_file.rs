// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 逐帧缓存为 PNG，释放时调用 ffmpeg 编码为视频文件。
//!
//! # URL 格式
//!
//! - `video:///path/to/video_result.mp4` - 帧率取自输入流
//! - `video:///path/to/video_result.mp4?fps=30` - 输入流未提供帧率时使用
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::{
  path::{Path, PathBuf},
  process::Command,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  input::StreamProperties,
  output::{OutputError, OutputSink, check_frame_size},
};

#[derive(Error, Debug)]
pub enum SaveVideoFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

const DEFAULT_FPS: f64 = 25.0;
const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 120.0;

/// 视频帧缓存
struct FrameBuffer {
  temp_dir: PathBuf,
  frames: usize,
}

impl FrameBuffer {
  fn new(output_path: &Path) -> Result<Self, SaveVideoFileError> {
    // 在输出文件旁边创建临时目录
    let mut temp_dir = output_path.as_os_str().to_owned();
    temp_dir.push(".frames");
    let temp_dir = PathBuf::from(temp_dir);
    // 上次运行异常退出时可能留下旧帧，ffmpeg 会把它们一并编码
    if temp_dir.exists() {
      warn!("清理残留的帧缓存目录: {}", temp_dir.display());
      std::fs::remove_dir_all(&temp_dir)?;
    }
    std::fs::create_dir_all(&temp_dir)?;

    Ok(FrameBuffer {
      temp_dir,
      frames: 0,
    })
  }

  fn add_frame(&mut self, image: &RgbImage) -> Result<(), SaveVideoFileError> {
    let frame_path = self.temp_dir.join(format!("frame_{:06}.png", self.frames));
    image.save(&frame_path)?;
    self.frames += 1;
    Ok(())
  }

  fn encode_to_video(&self, output_path: &Path, fps: f64) -> Result<(), SaveVideoFileError> {
    if self.frames == 0 {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    }

    info!(
      "开始编码视频: {} 帧 @ {} fps -> {}",
      self.frames,
      fps,
      output_path.display()
    );

    let output = Command::new("ffmpeg")
      .arg("-y")
      .arg("-loglevel")
      .arg("error")
      .arg("-framerate")
      .arg(fps.to_string())
      .arg("-i")
      .arg(self.temp_dir.join("frame_%06d.png"))
      .arg("-c:v")
      .arg("libx264")
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-preset")
      .arg("fast")
      .arg("-crf")
      .arg("23")
      .arg(output_path)
      .output()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        SaveVideoFileError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffmpeg 错误: {}", stderr);
      return Err(SaveVideoFileError::EncodingError(format!(
        "ffmpeg 失败: {}",
        stderr
      )));
    }

    info!("视频编码成功: {}", output_path.display());
    Ok(())
  }

  fn cleanup(&self) {
    if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
      warn!("清理临时目录失败: {}", e);
    }
  }
}

pub struct SaveVideoFileOutput {
  path: PathBuf,
  properties: StreamProperties,
  buffer: Option<FrameBuffer>,
}

impl SaveVideoFileOutput {
  pub const SCHEME: &'static str = "video";

  pub fn open(url: &Url, properties: StreamProperties) -> Result<Self, OutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let query_fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok());
    let fps = properties.fps.or(query_fps).unwrap_or(DEFAULT_FPS);
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
      return Err(
        SaveVideoFileError::ValidationError(format!(
          "FPS {} 超出有效范围 [{}, {}]",
          fps, MIN_FPS, MAX_FPS
        ))
        .into(),
      );
    }

    Self::create(url.path(), StreamProperties {
      fps: Some(fps),
      ..properties
    })
  }

  pub fn create(path: impl AsRef<Path>, properties: StreamProperties) -> Result<Self, OutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(SaveVideoFileError::from)?;
    }

    let buffer = FrameBuffer::new(&path)?;
    info!(
      "视频输出已创建: {}x{} @ {:?} fps -> {}",
      properties.width,
      properties.height,
      properties.fps,
      path.display()
    );

    Ok(SaveVideoFileOutput {
      path,
      properties,
      buffer: Some(buffer),
    })
  }

  pub fn frames_written(&self) -> usize {
    self.buffer.as_ref().map_or(0, |b| b.frames)
  }
}

impl OutputSink for SaveVideoFileOutput {
  type Error = OutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    check_frame_size(image, &self.properties)?;
    let buffer = self.buffer.as_mut().ok_or_else(|| {
      SaveVideoFileError::ValidationError("视频输出已释放".to_string())
    })?;
    buffer.add_frame(image)?;
    Ok(())
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    let Some(buffer) = self.buffer.take() else {
      return Ok(());
    };
    let _cleanup = CleanupGuard(&buffer);
    let fps = self.properties.fps.unwrap_or(DEFAULT_FPS);
    buffer.encode_to_video(&self.path, fps)?;
    info!("视频已保存到文件: {}", self.path.display());
    Ok(())
  }
}

impl Drop for SaveVideoFileOutput {
  fn drop(&mut self) {
    if let Err(e) = self.release() {
      error!("编码视频时出错: {}", e);
    }
  }
}

/// RAII 守卫确保清理总是执行
struct CleanupGuard<'a>(&'a FrameBuffer);

impl Drop for CleanupGuard<'_> {
  fn drop(&mut self) {
    self.0.cleanup();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn props() -> StreamProperties {
    StreamProperties {
      width: 8,
      height: 6,
      fps: Some(15.0),
    }
  }

  #[test]
  fn test_rejects_wrong_frame_size() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = SaveVideoFileOutput::create(dir.path().join("out.mp4"), props()).unwrap();

    out.write_frame(&RgbImage::new(8, 6)).unwrap();
    assert!(matches!(
      out.write_frame(&RgbImage::new(6, 8)),
      Err(OutputError::SizeMismatch { .. })
    ));
    assert_eq!(out.frames_written(), 1);
  }

  #[test]
  fn test_release_without_frames_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let mut out = SaveVideoFileOutput::create(&path, props()).unwrap();

    out.release().unwrap();
    out.release().unwrap();
    assert!(!dir.path().join("out.mp4.frames").exists());
    assert!(out.write_frame(&RgbImage::new(8, 6)).is_err());
  }

  #[test]
  fn test_stale_frames_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let frames_dir = dir.path().join("out.mp4.frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    for i in 0..5 {
      RgbImage::new(8, 6)
        .save(frames_dir.join(format!("frame_{:06}.png", i)))
        .unwrap();
    }

    let mut out = SaveVideoFileOutput::create(&path, props()).unwrap();
    out.write_frame(&RgbImage::new(8, 6)).unwrap();

    let buffered = std::fs::read_dir(&frames_dir).unwrap().count();
    assert_eq!(buffered, 1);
    assert_eq!(out.frames_written(), 1);
  }

  #[test]
  fn test_scheme_and_fps_validation() {
    let url = Url::parse("file:///tmp/out.mp4").unwrap();
    assert!(matches!(
      SaveVideoFileOutput::open(&url, props()),
      Err(OutputError::SchemeMismatch(_))
    ));

    let url = Url::parse("video:///tmp/out.mp4").unwrap();
    let bad = StreamProperties {
      fps: Some(500.0),
      ..props()
    };
    assert!(SaveVideoFileOutput::open(&url, bad).is_err());
  }
}
