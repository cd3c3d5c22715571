//! 播放内核：解封装、解码、音视频同步与播放状态机
//!
//! 宿主通过 [`PlaybackManager`] 下达命令，通过 [`PlayerDelegate`] 接收
//! 加载结果、状态变化、进度和待绘制的视频帧。

pub mod core;
pub mod player;

pub use crate::core::{
    MediaLocation, MediaSource, PlaybackState, PlaybackStats, PlayerConfig, PlayerError, Result,
    VideoFrame,
};
pub use crate::player::{PlaybackManager, PlayerDelegate, PlayerEvent};
