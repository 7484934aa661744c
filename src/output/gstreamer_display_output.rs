// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示
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

//! 实时显示标注后的帧，URL 为 `display://`

use image::RgbImage;
use tracing::info;
use url::Url;

use crate::{
  input::StreamProperties,
  output::{
    OutputError, OutputSink,
    gstreamer_video_output::{AppSrcPipeline, resolve_fps},
  },
};

const DISPLAY_PIPELINE: &str = "appsrc name=src ! videoconvert ! autovideosink sync=false";

pub struct GStreamerDisplayOutput {
  inner: AppSrcPipeline,
}

impl GStreamerDisplayOutput {
  pub const SCHEME: &'static str = "display";

  pub fn open(url: &Url, properties: StreamProperties) -> Result<Self, OutputError> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let fps = resolve_fps(url, &properties);
    let inner = AppSrcPipeline::launch(DISPLAY_PIPELINE, properties, fps)?;
    info!(
      "显示窗口已打开: {}x{} @ {} fps",
      properties.width, properties.height, fps
    );

    Ok(GStreamerDisplayOutput { inner })
  }
}

impl OutputSink for GStreamerDisplayOutput {
  type Error = OutputError;

  fn write_frame(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    self.inner.push_frame(image)
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    self.inner.release()
  }
}
