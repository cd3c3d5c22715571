use crate::core::{AudioFrame, AudioOutputMode, OutputFormat, PlayerConfig, Result, Timed};
use log::{info, warn};
use std::collections::VecDeque;
use std::time::Instant;

/// 音频输出抽象
///
/// 只在展示线程中创建和使用（cpal 的 Stream 不能跨线程），因此不要求 Send。
pub trait AudioSink {
    /// 写入一帧音频（静音时照常消耗，保证节奏不变）
    fn write(&mut self, frame: &AudioFrame);

    fn set_muted(&mut self, muted: bool);

    fn pause(&mut self);

    fn resume(&mut self);

    /// 清空缓冲（seek）
    fn clear(&mut self);

    /// 已实际播放到的位置（秒），还没播放过任何样本时为 None
    fn played_position(&mut self) -> Option<f64>;

    /// 已写入但尚未播放的时长（秒）
    fn buffered(&mut self) -> f64;

    fn format(&self) -> OutputFormat;

    fn description(&self) -> String;
}

/// 加载阶段决定的输出方案（解码器按这个格式重采样）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkPlan {
    pub format: OutputFormat,
    pub use_device: bool,
    /// 设备打开失败时是否允许退回虚拟输出
    pub fallback: bool,
}

/// 协商输出格式：优先设备支持的配置
pub fn negotiate(config: &PlayerConfig) -> Result<SinkPlan> {
    let requested = config.output_format();
    match config.audio_output {
        AudioOutputMode::Virtual => Ok(SinkPlan {
            format: requested,
            use_device: false,
            fallback: false,
        }),
        AudioOutputMode::Device => Ok(SinkPlan {
            format: device_format(requested)?,
            use_device: true,
            fallback: false,
        }),
        AudioOutputMode::Auto => match device_format(requested) {
            Ok(format) => Ok(SinkPlan {
                format,
                use_device: true,
                fallback: true,
            }),
            Err(e) => {
                warn!("⚠️ 音频设备不可用，使用虚拟输出: {}", e);
                Ok(SinkPlan {
                    format: requested,
                    use_device: false,
                    fallback: false,
                })
            }
        },
    }
}

/// 按方案打开输出（必须在使用它的线程中调用）
pub fn open_sink(plan: &SinkPlan) -> Result<Box<dyn AudioSink>> {
    if plan.use_device {
        match open_device(plan.format) {
            Ok(sink) => return Ok(sink),
            Err(e) if plan.fallback => {
                warn!("⚠️ 打开音频设备失败，退回虚拟输出: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Box::new(VirtualAudioSink::new(plan.format)))
}

#[cfg(feature = "audio-output")]
fn device_format(requested: OutputFormat) -> Result<OutputFormat> {
    cpal_sink::CpalAudioSink::negotiate(requested)
}

#[cfg(not(feature = "audio-output"))]
fn device_format(_requested: OutputFormat) -> Result<OutputFormat> {
    Err(crate::core::PlayerError::Audio("未启用 audio-output 特性".to_string()))
}

#[cfg(feature = "audio-output")]
fn open_device(format: OutputFormat) -> Result<Box<dyn AudioSink>> {
    Ok(Box::new(cpal_sink::CpalAudioSink::open(format)?))
}

#[cfg(not(feature = "audio-output"))]
fn open_device(_format: OutputFormat) -> Result<Box<dyn AudioSink>> {
    Err(crate::core::PlayerError::Audio("未启用 audio-output 特性".to_string()))
}

struct Segment {
    pts: f64,
    duration: f64,
    consumed: f64,
}

/// 虚拟音频输出 - 按墙钟速度消耗已写入的样本，不发声
///
/// 无声卡环境和测试中代替设备，时间行为与真实设备一致。
pub struct VirtualAudioSink {
    format: OutputFormat,
    segments: VecDeque<Segment>,
    running: bool,
    muted: bool,
    last_update: Instant,
    position: Option<f64>,
}

impl VirtualAudioSink {
    pub fn new(format: OutputFormat) -> Self {
        info!(
            "🔈 使用虚拟音频输出: {} Hz, {} 声道",
            format.sample_rate, format.channels
        );
        Self {
            format,
            segments: VecDeque::new(),
            running: true,
            muted: false,
            last_update: Instant::now(),
            position: None,
        }
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let mut elapsed = if self.running {
            now.saturating_duration_since(self.last_update).as_secs_f64()
        } else {
            0.0
        };
        self.last_update = now;

        while elapsed > 0.0 {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let take = (front.duration - front.consumed).min(elapsed);
            front.consumed += take;
            elapsed -= take;
            self.position = Some(front.pts + front.consumed);
            if front.consumed >= front.duration - 1e-9 {
                self.segments.pop_front();
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl AudioSink for VirtualAudioSink {
    fn write(&mut self, frame: &AudioFrame) {
        self.advance();
        let duration = frame.duration();
        if duration <= 0.0 {
            return;
        }
        if self.segments.is_empty() && self.position.is_none() {
            self.position = Some(frame.pts);
        }
        self.segments.push_back(Segment {
            pts: frame.pts,
            duration,
            consumed: 0.0,
        });
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn pause(&mut self) {
        self.advance();
        self.running = false;
    }

    fn resume(&mut self) {
        self.advance();
        self.running = true;
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.position = None;
        self.last_update = Instant::now();
    }

    fn played_position(&mut self) -> Option<f64> {
        self.advance();
        self.position
    }

    fn buffered(&mut self) -> f64 {
        self.advance();
        self.segments
            .iter()
            .map(|s| s.duration - s.consumed)
            .sum()
    }

    fn format(&self) -> OutputFormat {
        self.format
    }

    fn description(&self) -> String {
        format!(
            "virtual {} Hz / {} ch",
            self.format.sample_rate, self.format.channels
        )
    }
}

#[cfg(feature = "audio-output")]
mod cpal_sink {
    use super::AudioSink;
    use crate::core::{AudioFrame, OutputFormat, PlayerError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use crossbeam::queue::SegQueue;
    use log::{debug, error, info, warn};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    /// 系统音频输出 - 使用 cpal 播放音频
    pub struct CpalAudioSink {
        format: OutputFormat,
        stream: Stream,
        buffer: Arc<SegQueue<f32>>,
        muted: Arc<AtomicBool>,
        /// 设备回调实际取走的样本数（交错样本）
        played_samples: Arc<AtomicU64>,
        written_samples: u64,
        /// (起始样本, pts)，用于把已播放样本数换算成时间
        timeline: VecDeque<(u64, f64)>,
    }

    impl CpalAudioSink {
        fn default_device() -> Result<Device> {
            cpal::default_host()
                .default_output_device()
                .ok_or_else(|| PlayerError::Audio("无法找到音频输出设备".to_string()))
        }

        /// 检查配置是否兼容
        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;
            rate_in_range && config.channels == supported.channels()
        }

        fn supports(device: &Device, rate: u32, channels: u16) -> Result<bool> {
            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let mut supported = device
                .supported_output_configs()
                .map_err(|e| PlayerError::Audio(format!("无法获取支持的音频配置: {}", e)))?;
            Ok(supported.any(|range| Self::is_config_compatible(&config, &range)))
        }

        /// 选择设备支持的输出格式（不支持请求的格式时回退到标准配置）
        pub fn negotiate(requested: OutputFormat) -> Result<OutputFormat> {
            let device = Self::default_device()?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            if Self::supports(&device, requested.sample_rate, requested.channels)? {
                return Ok(requested);
            }
            warn!(
                "⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
                requested.sample_rate, requested.channels
            );
            for (rate, channels) in [(48000, 2), (44100, 2), (48000, 1), (44100, 1)] {
                if Self::supports(&device, rate, channels)? {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", rate, channels);
                    return Ok(OutputFormat {
                        sample_rate: rate,
                        channels,
                    });
                }
            }
            Err(PlayerError::Audio(format!(
                "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                requested.sample_rate, requested.channels
            )))
        }

        pub fn open(format: OutputFormat) -> Result<Self> {
            info!("初始化音频输出: {} Hz, {} 声道", format.sample_rate, format.channels);
            let device = Self::default_device()?;
            let config = StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let buffer = Arc::new(SegQueue::new());
            let muted = Arc::new(AtomicBool::new(false));
            let played_samples = Arc::new(AtomicU64::new(0));

            let stream = {
                let buffer = buffer.clone();
                let muted = muted.clone();
                let played_samples = played_samples.clone();
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let silent = muted.load(Ordering::Relaxed);
                            let mut taken = 0;
                            for sample in data.iter_mut() {
                                match buffer.pop() {
                                    Some(value) => {
                                        *sample = if silent { 0.0 } else { value };
                                        taken += 1;
                                    }
                                    None => *sample = 0.0,
                                }
                            }
                            played_samples.fetch_add(taken, Ordering::Relaxed);
                        },
                        move |err| {
                            error!("音频流错误: {}", err);
                        },
                        None,
                    )
                    .map_err(|e| PlayerError::Audio(format!("创建音频流失败: {}", e)))?
            };
            stream
                .play()
                .map_err(|e| PlayerError::Audio(format!("启动音频流失败: {}", e)))?;
            info!("音频输出已启动");

            Ok(Self {
                format,
                stream,
                buffer,
                muted,
                played_samples,
                written_samples: 0,
                timeline: VecDeque::new(),
            })
        }

        fn samples_per_second(&self) -> f64 {
            self.format.sample_rate as f64 * self.format.channels as f64
        }
    }

    impl AudioSink for CpalAudioSink {
        fn write(&mut self, frame: &AudioFrame) {
            self.timeline.push_back((self.written_samples, frame.pts));
            for sample in &frame.data {
                self.buffer.push(*sample);
            }
            self.written_samples += frame.data.len() as u64;
        }

        fn set_muted(&mut self, muted: bool) {
            self.muted.store(muted, Ordering::Relaxed);
        }

        fn pause(&mut self) {
            if let Err(e) = self.stream.pause() {
                warn!("⚠️ 暂停音频流失败: {}", e);
            }
        }

        fn resume(&mut self) {
            if let Err(e) = self.stream.play() {
                warn!("⚠️ 恢复音频流失败: {}", e);
            }
        }

        fn clear(&mut self) {
            while self.buffer.pop().is_some() {}
            self.timeline.clear();
            self.written_samples = self.played_samples.load(Ordering::Relaxed);
        }

        fn played_position(&mut self) -> Option<f64> {
            let played = self.played_samples.load(Ordering::Relaxed);
            while self.timeline.len() > 1 && self.timeline[1].0 <= played {
                self.timeline.pop_front();
            }
            let &(start, pts) = self.timeline.front()?;
            let offset = played.saturating_sub(start) as f64 / self.samples_per_second();
            Some(pts + offset)
        }

        fn buffered(&mut self) -> f64 {
            self.buffer.len() as f64 / self.samples_per_second()
        }

        fn format(&self) -> OutputFormat {
            self.format
        }

        fn description(&self) -> String {
            format!(
                "cpal {} Hz / {} ch",
                self.format.sample_rate, self.format.channels
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SampleFormat;
    use std::thread;
    use std::time::Duration;

    fn format() -> OutputFormat {
        OutputFormat {
            sample_rate: 1000,
            channels: 1,
        }
    }

    fn frame(pts: f64, samples: usize) -> AudioFrame {
        AudioFrame {
            pts,
            sample_rate: 1000,
            channels: 1,
            format: SampleFormat::F32,
            data: vec![0.1; samples],
        }
    }

    #[test]
    fn virtual_sink_consumes_at_wall_clock_rate() {
        let mut sink = VirtualAudioSink::new(format());
        assert_eq!(sink.played_position(), None);
        sink.write(&frame(2.0, 500));
        thread::sleep(Duration::from_millis(100));
        let played = sink.played_position().unwrap();
        assert!(played >= 2.09 && played < 2.4, "played {played}");
        assert!(sink.buffered() < 0.42);
    }

    #[test]
    fn paused_virtual_sink_holds_position() {
        let mut sink = VirtualAudioSink::new(format());
        sink.write(&frame(0.0, 1000));
        sink.pause();
        let held = sink.played_position().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.played_position().unwrap(), held);
        sink.resume();
        thread::sleep(Duration::from_millis(30));
        assert!(sink.played_position().unwrap() > held);
    }

    #[test]
    fn clear_forgets_position_and_buffer() {
        let mut sink = VirtualAudioSink::new(format());
        sink.write(&frame(1.0, 200));
        sink.clear();
        assert_eq!(sink.played_position(), None);
        assert_eq!(sink.buffered(), 0.0);
    }

    #[test]
    fn mute_does_not_change_consumption() {
        let mut sink = VirtualAudioSink::new(format());
        sink.set_muted(true);
        assert!(sink.is_muted());
        sink.write(&frame(0.0, 100));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(sink.buffered(), 0.0);
        assert!((sink.played_position().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn virtual_mode_never_touches_device() {
        let config = PlayerConfig {
            audio_output: AudioOutputMode::Virtual,
            ..Default::default()
        };
        let plan = negotiate(&config).unwrap();
        assert!(!plan.use_device);
        let sink = open_sink(&plan).unwrap();
        assert_eq!(sink.format(), config.output_format());
    }
}
