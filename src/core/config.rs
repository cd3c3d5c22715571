use super::error::{PlayerError, Result};
use super::types::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 音频输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutputMode {
    /// 优先系统设备，失败时退回虚拟输出
    Auto,
    /// 必须使用系统设备
    Device,
    /// 按墙钟消耗样本的虚拟输出（无声卡环境、测试）
    Virtual,
}

/// 播放内核配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 解码后视频帧队列容量
    pub video_queue_frames: usize,
    /// 解码后音频帧队列容量
    pub audio_queue_frames: usize,
    /// 视频包队列容量
    pub video_packet_queue: usize,
    /// 音频包队列容量
    pub audio_packet_queue: usize,

    /// 视频帧提前出队的容差
    pub video_tolerance_ms: u64,
    /// 音频提前写入输出的时长
    pub audio_lead_ms: u64,
    /// 视频帧落后时钟超过此值即丢弃
    pub late_frame_threshold_ms: u64,
    /// tick 回调最小间隔
    pub tick_interval_ms: u64,

    /// 连续错误上限，超过视为持续损坏
    pub max_consecutive_errors: u32,

    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub audio_output: AudioOutputMode,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            video_queue_frames: 12,
            audio_queue_frames: 24,
            video_packet_queue: 200,
            audio_packet_queue: 150,
            video_tolerance_ms: 5,
            audio_lead_ms: 60,
            late_frame_threshold_ms: 100,
            tick_interval_ms: 250,
            max_consecutive_errors: 16,
            output_sample_rate: 48000,
            output_channels: 2,
            audio_output: AudioOutputMode::Auto,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_queue_frames == 0 || self.audio_queue_frames == 0 {
            return Err(PlayerError::Config("帧队列容量必须大于 0".into()));
        }
        if self.video_packet_queue == 0 || self.audio_packet_queue == 0 {
            return Err(PlayerError::Config("包队列容量必须大于 0".into()));
        }
        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(PlayerError::Config(format!(
                "无效的音频输出格式: {} Hz / {} 声道",
                self.output_sample_rate, self.output_channels
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(PlayerError::Config("tick_interval_ms 必须大于 0".into()));
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.output_sample_rate,
            channels: self.output_channels,
        }
    }

    pub fn video_tolerance(&self) -> f64 {
        self.video_tolerance_ms as f64 / 1000.0
    }

    pub fn audio_lead(&self) -> f64 {
        self.audio_lead_ms as f64 / 1000.0
    }

    pub fn late_threshold(&self) -> f64 {
        self.late_frame_threshold_ms as f64 / 1000.0
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
