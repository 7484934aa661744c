// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use shanan_triage::{
  config::{ArchivePolicy, DetectorConfig, PipelineConfig},
  geometry::ResizeMode,
};

/// 摄像头检测分拣参数配置
#[derive(Parser, Debug)]
#[command(
  author,
  version,
  about,
  long_about = None,
  after_help = "运行中在终端输入 q 并回车即可结束（等同 Ctrl-C）"
)]
pub struct Args {
  /// 模型输入尺寸：宽 高
  #[arg(long, num_args = 2, value_names = ["W", "H"], default_values_t = [416u32, 416])]
  pub new_size: Vec<u32>,

  /// 是否使用等比缩放加灰边
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
  pub letterbox_resize: bool,

  /// RKNN 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub restore_path: PathBuf,

  /// 类别名称文件，每行一个；缺省使用内置 COCO 类别
  #[arg(long, value_name = "FILE")]
  pub class_name_path: Option<PathBuf>,

  /// 锚框文件，格式为 `x,y, x,y, ...`
  #[arg(long, value_name = "FILE")]
  pub anchor_path: Option<PathBuf>,

  /// 摄像头索引
  #[arg(long, default_value_t = 0, value_name = "INDEX")]
  pub camera: u32,

  /// 输入来源 URL，指定后不再打开摄像头
  /// - 图像序列: images:///path/to/dir?fps=10
  /// - GStreamer: gst://camera/dev/video0 或 gst://file/path/to/video.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,

  /// 是否保存标注后的视频
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
  pub save_video: bool,

  /// 视频保存路径
  #[arg(long, default_value = "video_result.mp4", value_name = "FILE")]
  pub video_path: PathBuf,

  /// 打开窗口实时显示（需要 gstreamer_output 特性）
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
  pub display: bool,

  /// 额外的输出端，可重复指定
  /// - 视频文件 (ffmpeg): video:///path/to/out.mp4?fps=25
  /// - 视频文件 (GStreamer): gstvideo:///path/to/out.mkv
  /// - 显示窗口: display://
  #[arg(long = "output", value_name = "SINK")]
  pub outputs: Vec<Url>,

  /// 截图归档根目录
  #[arg(long, default_value = "YOLO", value_name = "DIR")]
  pub archive_root: PathBuf,

  /// 截图格式（jpg / png / bmp）
  #[arg(long, default_value = "jpg", value_name = "EXT")]
  pub archive_format: String,

  /// 启动时创建四个时段分区目录
  #[arg(long)]
  pub create_archive_dirs: bool,

  /// 需要归档的目标类别
  #[arg(long, default_value = "person", value_name = "NAME")]
  pub target_class: String,

  /// 归档截图的最大宽度（像素）
  #[arg(long, default_value_t = 400.0, value_name = "PIXELS")]
  pub max_width: f32,

  /// 归档截图的最大高度（像素）
  #[arg(long, default_value_t = 400.0, value_name = "PIXELS")]
  pub max_height: f32,

  /// 归档所需的最低置信度（百分比）
  #[arg(long, default_value_t = 80.0, value_name = "PERCENT")]
  pub min_confidence_pct: f32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.3, value_name = "THRESHOLD")]
  pub score_threshold: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 每帧最多保留的检测框数量
  #[arg(long, default_value_t = 200, value_name = "COUNT")]
  pub max_boxes: usize,

  /// 最大处理帧数，缺省不限制
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

impl From<Args> for PipelineConfig {
  fn from(args: Args) -> Self {
    let (input_width, input_height) = match args.new_size.as_slice() {
      [w, h] => (*w, *h),
      _ => (0, 0),
    };
    let resize_mode = if args.letterbox_resize {
      ResizeMode::Letterbox
    } else {
      ResizeMode::Stretch
    };

    PipelineConfig {
      input_width,
      input_height,
      resize_mode,
      detector: DetectorConfig {
        restore_path: args.restore_path,
        anchor_path: args.anchor_path,
        score_threshold: args.score_threshold,
        nms_threshold: args.nms_threshold,
        max_boxes: args.max_boxes,
      },
      class_name_path: args.class_name_path,
      camera: args.camera,
      input: args.input,
      save_video: args.save_video,
      video_path: args.video_path,
      display: args.display,
      outputs: args.outputs,
      archive_root: args.archive_root,
      archive_format: args.archive_format,
      create_archive_dirs: args.create_archive_dirs,
      policy: ArchivePolicy {
        target_class: args.target_class,
        max_width: args.max_width,
        max_height: args.max_height,
        min_confidence_pct: args.min_confidence_pct,
      },
      max_frames: args.max_frames,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let args = Args::try_parse_from(["triage-camera", "--restore-path", "model.rknn"]).unwrap();
    let config = PipelineConfig::from(args);
    assert_eq!((config.input_width, config.input_height), (416, 416));
    assert_eq!(config.resize_mode, ResizeMode::Letterbox);
    assert!(config.save_video);
    assert!(config.display);
    assert!(config.outputs.is_empty());
    assert_eq!(config.archive_root, PathBuf::from("YOLO"));
    assert_eq!(config.policy, ArchivePolicy::default());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_overrides() {
    let args = Args::try_parse_from([
      "triage-camera",
      "--restore-path",
      "model.rknn",
      "--new-size",
      "640",
      "480",
      "--letterbox-resize",
      "false",
      "--save-video",
      "false",
      "--max-frames",
      "10",
      "--display",
      "false",
      "--output",
      "gstvideo:///tmp/a.mkv",
      "--output",
      "video:///tmp/b.mp4?fps=10",
    ])
    .unwrap();
    let config = PipelineConfig::from(args);
    assert_eq!((config.input_width, config.input_height), (640, 480));
    assert_eq!(config.resize_mode, ResizeMode::Stretch);
    assert!(!config.save_video);
    assert_eq!(config.max_frames, Some(10));
    assert!(!config.display);
    let schemes: Vec<_> = config.outputs.iter().map(|u| u.scheme()).collect();
    assert_eq!(schemes, ["gstvideo", "video"]);
  }
}
