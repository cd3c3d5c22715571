use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// 媒体位置（打开前的描述）
#[derive(Debug, Clone, PartialEq)]
pub enum MediaLocation {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },

    /// 内置测试图样源（`testsrc://?duration=10&fps=30`）
    TestPattern(String),
}

impl MediaLocation {
    /// 从 URL 字符串解析媒体位置
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("testsrc:") {
            MediaLocation::TestPattern(url.to_string())
        } else if url.starts_with("rtsp://") {
            MediaLocation::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTSP,
            }
        } else if url.starts_with("rtmp://") {
            MediaLocation::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTMP,
            }
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            MediaLocation::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HLS,
            }
        } else if url.starts_with("http://") || url.starts_with("https://") {
            MediaLocation::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HTTP,
            }
        } else {
            // 默认当作本地文件
            MediaLocation::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaLocation::NetworkStream { .. })
    }
}

impl fmt::Display for MediaLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaLocation::LocalFile(path) => write!(f, "{}", path.display()),
            MediaLocation::NetworkStream { url, protocol } => {
                write!(f, "{} ({})", url, protocol.as_str())
            }
            MediaLocation::TestPattern(params) => write!(f, "{}", params),
        }
    }
}

impl From<&str> for MediaLocation {
    fn from(url: &str) -> Self {
        MediaLocation::from_url(url)
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 有理数（时间基、帧率）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// 把以本时间基表示的时间戳换算成秒
    pub fn seconds(self, ts: i64) -> f64 {
        ts as f64 * self.to_f64()
    }

    /// 把秒换算成以本时间基表示的时间戳（向下取整）
    pub fn timestamp(self, seconds: f64) -> i64 {
        let unit = self.to_f64();
        if unit <= 0.0 {
            0
        } else {
            (seconds / unit).floor() as i64
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// 基本流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

/// 编解码参数（由底层解封装器给出）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 基本流描述（每个音频/视频流一个）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub time_base: Rational,
    pub codec: CodecParameters,
    /// 流时长（秒），容器未给出时为 None
    pub duration: Option<f64>,
}

/// 已打开的媒体源
///
/// 在 `load` 时创建，之后不再修改；`stop` 或重新加载时随管线一起释放。
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub location: MediaLocation,
    pub streams: Vec<StreamDescriptor>,
    /// 总时长（秒）
    pub duration: f64,
    pub video_stream: Option<usize>,
    pub audio_stream: Option<usize>,
    pub seekable: bool,
}

impl MediaSource {
    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.index == index)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_stream.is_some()
    }

    /// 参与播放的流索引（视频在前）
    pub fn active_streams(&self) -> Vec<usize> {
        self.video_stream.into_iter().chain(self.audio_stream).collect()
    }

    /// 汇总媒体信息（给 UI / 日志使用）
    pub fn summary(&self) -> MediaInfo {
        let video = self.video_stream.and_then(|i| self.stream(i));
        let audio = self.audio_stream.and_then(|i| self.stream(i));
        MediaInfo {
            duration: self.duration,
            width: video.map(|s| s.codec.width).unwrap_or(0),
            height: video.map(|s| s.codec.height).unwrap_or(0),
            fps: video.map(|s| s.codec.frame_rate).unwrap_or(0.0),
            video_codec: video
                .map(|s| s.codec.codec_name.clone())
                .unwrap_or_else(|| "none".to_string()),
            audio_codec: audio
                .map(|s| s.codec.codec_name.clone())
                .unwrap_or_else(|| "none".to_string()),
            sample_rate: audio.map(|s| s.codec.sample_rate).unwrap_or(0),
            channels: audio.map(|s| s.codec.channels).unwrap_or(0),
        }
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64,          // 总时长（秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}s, 视频 {} {}x{} @ {:.2}fps, 音频 {} {}Hz/{}ch",
            self.duration,
            self.video_codec,
            self.width,
            self.height,
            self.fps,
            self.audio_codec,
            self.sample_rate,
            self.channels
        )
    }
}

/// 解码器输出格式（音频解码器据此重采样）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 带时间戳的解码数据，帧队列据此判断到期
pub trait Timed {
    /// 显示时间戳（秒）
    fn pts(&self) -> f64;

    /// 持续时间（秒）
    fn duration(&self) -> f64;

    fn end(&self) -> f64 {
        self.pts() + self.duration()
    }
}

/// 视频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub pts: f64,           // 显示时间戳（秒）
    pub duration: f64,      // 帧持续时间（秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据
}

impl VideoFrame {
    /// 转换为 RGBA 图像（仅支持 RGBA 格式）
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        if self.format != PixelFormat::RGBA {
            return None;
        }
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

impl Timed for VideoFrame {
    fn pts(&self) -> f64 {
        self.pts
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// 音频帧数据（交错 PCM）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub pts: f64,           // 显示时间戳（秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,     // 统一使用 f32 格式
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }
}

impl Timed for AudioFrame {
    fn pts(&self) -> f64 {
        self.pts
    }

    fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples() as f64 / self.sample_rate as f64
        }
    }
}

/// 解码单元的输出
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl DecodedFrame {
    pub fn kind(&self) -> MediaKind {
        match self {
            DecodedFrame::Video(_) => MediaKind::Video,
            DecodedFrame::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn pts(&self) -> f64 {
        match self {
            DecodedFrame::Video(f) => f.pts,
            DecodedFrame::Audio(f) => f.pts,
        }
    }

    pub fn end(&self) -> f64 {
        match self {
            DecodedFrame::Video(f) => f.end(),
            DecodedFrame::Audio(f) => f.end(),
        }
    }
}

/// 播放统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// 已交给渲染回调的视频帧
    pub presented_frames: u64,
    /// 因落后时钟过多而丢弃的视频帧
    pub late_frames: u64,
    /// 可恢复的解码错误（每个对应一个丢失的帧）
    pub decode_errors: u64,
    /// 解封装时跳过的损坏数据包
    pub skipped_packets: u64,
}

/// 播放统计计数器（跨线程累加，每次加载一份）
#[derive(Debug, Default)]
pub struct StatsCounters {
    presented_frames: AtomicU64,
    late_frames: AtomicU64,
    decode_errors: AtomicU64,
    skipped_packets: AtomicU64,
}

impl StatsCounters {
    pub fn frame_presented(&self) {
        self.presented_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_late(&self) {
        self.late_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_skipped(&self) {
        self.skipped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            presented_frames: self.presented_frames.load(Ordering::Relaxed),
            late_frames: self.late_frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            skipped_packets: self.skipped_packets.load(Ordering::Relaxed),
        }
    }
}
