use crate::core::{MediaKind, OutputFormat, Result, SourceError, StreamDescriptor};
use crate::player::decoder_unit::FrameDecoder;

#[cfg(feature = "ffmpeg")]
use ffmpeg_next as ffmpeg;

/// 压缩数据（由具体后端解释）
pub enum PacketPayload {
    /// 内存中的原始字节
    Bytes(Vec<u8>),

    /// FFmpeg 数据包
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(ffmpeg::Packet),
}

impl PacketPayload {
    pub fn len(&self) -> usize {
        match self {
            PacketPayload::Bytes(bytes) => bytes.len(),
            #[cfg(feature = "ffmpeg")]
            PacketPayload::Ffmpeg(packet) => packet.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 媒体包（可跨线程传递）
pub struct MediaPacket {
    pub stream_index: usize,
    pub kind: MediaKind,
    /// 显示时间戳（秒）
    pub pts: Option<f64>,
    /// 解码时间戳（秒）
    pub dts: Option<f64>,
    pub duration: f64,
    pub keyframe: bool,
    /// seek 之后该流的第一个包
    pub discontinuity: bool,
    pub payload: PacketPayload,
}

impl std::fmt::Debug for MediaPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPacket")
            .field("stream_index", &self.stream_index)
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("keyframe", &self.keyframe)
            .field("discontinuity", &self.discontinuity)
            .field("size", &self.payload.len())
            .finish()
    }
}

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（FFmpeg 打开的文件/网络流、内置测试源）实现这个接口。
/// 解码器也由数据源创建，保证编解码上下文与本次打开的媒体绑定。
pub trait DemuxerSource: Send {
    /// 所有可用的音视频流
    fn streams(&self) -> &[StreamDescriptor];

    /// 总时长（秒），未知时为 0
    fn duration(&self) -> f64;

    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(Malformed): 单个坏包，可以继续读
    /// - Err(Fatal): 源已不可读
    fn read_packet(&mut self) -> std::result::Result<Option<MediaPacket>, SourceError>;

    /// Seek 到目标位置之前最近的关键帧，返回实际到达的位置（秒）
    fn seek(&mut self, target: f64) -> Result<f64>;

    /// 为指定流创建解码器
    fn create_decoder(
        &self,
        stream_index: usize,
        output: &OutputFormat,
    ) -> Result<Box<dyn FrameDecoder>>;

    /// 获取视频流索引
    fn video_stream_index(&self) -> Option<usize> {
        self.streams()
            .iter()
            .find(|s| s.kind == MediaKind::Video)
            .map(|s| s.index)
    }

    /// 获取音频流索引
    fn audio_stream_index(&self) -> Option<usize> {
        self.streams()
            .iter()
            .find(|s| s.kind == MediaKind::Audio)
            .map(|s| s.index)
    }

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
