use crate::core::{
    CodecParameters, MediaKind, OutputFormat, PlayerError, Rational, Result, SourceError,
    StreamDescriptor,
};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::decoder_unit::FrameDecoder;
use crate::player::demuxer_source::{DemuxerSource, MediaPacket, PacketPayload};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media};
use log::{debug, info, warn};
use std::collections::VecDeque;

/// seek 之后为确定实际落点最多预读的包数
const SEEK_PROBE_PACKETS: usize = 64;

/// 解封装器 - 基于 FFmpeg 读取文件或网络流
pub struct Demuxer {
    input_ctx: format::context::Input,
    streams: Vec<StreamDescriptor>,
    duration: f64,
    source_path: String,
    seekable: bool,
    /// 容器的起始时间（秒），所有时间戳都减去它，从 0 开始
    start_offset: f64,
    /// seek 后预读的包，先于新包返回
    pending: VecDeque<MediaPacket>,
}

impl Demuxer {
    /// 打开媒体文件或网络流
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开: {}", path);
        ffmpeg::init().map_err(|e| PlayerError::Open(format!("FFmpeg 初始化失败: {}", e)))?;

        let is_network = is_network_path(path);
        let input_ctx = if is_network {
            info!("🌐 检测到网络流，应用网络选项");
            format::input_with_dictionary(&path, network_options(path))
                .map_err(|e| PlayerError::Open(format!("无法打开网络流: {}", e)))?
        } else {
            format::input(&path).map_err(|e| PlayerError::Open(format!("无法打开文件: {}", e)))?
        };

        let video_index = input_ctx.streams().best(media::Type::Video).map(|s| s.index());
        let audio_index = input_ctx.streams().best(media::Type::Audio).map(|s| s.index());

        let mut streams = Vec::new();
        let mut starts = Vec::new();
        for index in [video_index, audio_index].into_iter().flatten() {
            if let Some(stream) = input_ctx.stream(index) {
                let desc = describe_stream(&stream)?;
                starts.extend(stream_start(stream.start_time(), desc.time_base));
                streams.push(desc);
            }
        }
        debug!("视频流索引: {:?}, 音频流索引: {:?}", video_index, audio_index);

        let duration = if input_ctx.duration() > 0 {
            input_ctx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            streams.iter().filter_map(|s| s.duration).fold(0.0, f64::max)
        };

        // 直播流没有时长，不支持 seek
        let seekable = duration > 0.0;

        // MPEG-TS / HLS 的首个时间戳通常不是 0
        let start_offset = earliest_start(&starts);
        if start_offset != 0.0 {
            debug!("容器起始时间: {:.3}s", start_offset);
        }

        Ok(Self {
            input_ctx,
            streams,
            duration,
            source_path: path.to_string(),
            seekable,
            start_offset,
            pending: VecDeque::new(),
        })
    }

    fn descriptor(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// 读出下一个音视频包（跳过其它流）
    fn read_from_input(&mut self) -> std::result::Result<Option<MediaPacket>, SourceError> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::InvalidData) => {
                    return Err(SourceError::Malformed("InvalidData".to_string()))
                }
                Err(e) => return Err(SourceError::Fatal(PlayerError::Demux(e.to_string()))),
            }

            let Some(desc) = self.descriptor(packet.stream()) else {
                continue;
            };
            let time_base = desc.time_base;
            let offset = self.start_offset;
            return Ok(Some(MediaPacket {
                stream_index: desc.index,
                kind: desc.kind,
                pts: packet.pts().map(|ts| time_base.seconds(ts) - offset),
                dts: packet.dts().map(|ts| time_base.seconds(ts) - offset),
                duration: time_base.seconds(packet.duration()),
                keyframe: packet.is_key(),
                discontinuity: false,
                payload: PacketPayload::Ffmpeg(packet),
            }));
        }
    }
}

impl DemuxerSource for Demuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn read_packet(&mut self) -> std::result::Result<Option<MediaPacket>, SourceError> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        self.read_from_input()
    }

    fn seek(&mut self, target: f64) -> Result<f64> {
        let absolute = target + self.start_offset;
        let timestamp = (absolute * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.pending.clear();
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .map_err(|e| PlayerError::Seek(e.to_string()))?;

        // 预读到第一个带时间戳的包，作为实际落点
        let mut landed = None;
        while self.pending.len() < SEEK_PROBE_PACKETS {
            match self.read_from_input() {
                Ok(Some(packet)) => {
                    let pts = packet.pts;
                    self.pending.push_back(packet);
                    if let Some(pts) = pts {
                        landed = Some(pts);
                        break;
                    }
                }
                Ok(None) => break,
                Err(SourceError::Malformed(m)) => warn!("⚠️ seek 预读跳过损坏的包: {}", m),
                Err(SourceError::Fatal(e)) => return Err(e),
            }
        }
        Ok(landed.unwrap_or(target))
    }

    fn create_decoder(
        &self,
        stream_index: usize,
        output: &OutputFormat,
    ) -> Result<Box<dyn FrameDecoder>> {
        let desc = self
            .descriptor(stream_index)
            .ok_or_else(|| PlayerError::Open(format!("没有流 #{}", stream_index)))?;
        let stream = self
            .input_ctx
            .stream(stream_index)
            .ok_or_else(|| PlayerError::Open(format!("没有流 #{}", stream_index)))?;

        let decoder: Box<dyn FrameDecoder> = match desc.kind {
            MediaKind::Video => Box::new(VideoDecoder::from_stream(
                stream,
                desc.codec.frame_rate,
                self.start_offset,
            )?),
            MediaKind::Audio => Box::new(AudioDecoder::from_stream_with_config(
                stream,
                output.sample_rate,
                output.channels,
                self.start_offset,
            )?),
        };
        Ok(decoder)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}

/// 流的起始时间（秒），AV_NOPTS_VALUE 等负值视为未知
fn stream_start(start_time: i64, time_base: Rational) -> Option<f64> {
    (start_time >= 0).then(|| time_base.seconds(start_time))
}

/// 各流中最早的起始时间作为时间零点
fn earliest_start(starts: &[f64]) -> f64 {
    starts.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

fn is_network_path(path: &str) -> bool {
    path.starts_with("http://")
        || path.starts_with("https://")
        || path.starts_with("rtsp://")
        || path.starts_with("rtmp://")
        || path.contains(".m3u8")
}

/// 网络流的打开选项
fn network_options(path: &str) -> ffmpeg::Dictionary<'static> {
    let mut options = ffmpeg::Dictionary::new();
    // 丢弃损坏的帧、生成缺失的 PTS
    options.set("fflags", "+discardcorrupt+genpts");
    options.set("analyzeduration", "5000000");
    options.set("probesize", "10000000");
    options.set("timeout", "15000000");
    options.set("buffer_size", "8388608");
    options.set("rw_timeout", "8000000");
    options.set("reconnect", "1");
    options.set("reconnect_streamed", "1");
    options.set("reconnect_delay_max", "4");

    if path.contains(".m3u8") {
        info!("🎬 HLS 流检测，应用 HLS 选项");
        options.set("live_start_index", "-1");
        options.set("max_reload", "10");
        options.set("http_persistent", "1");
    }
    options
}

fn describe_stream(stream: &format::stream::Stream) -> Result<StreamDescriptor> {
    let parameters = stream.parameters();
    let codec_name = parameters.id().name().to_string();
    let kind = match parameters.medium() {
        media::Type::Video => MediaKind::Video,
        media::Type::Audio => MediaKind::Audio,
        other => {
            return Err(PlayerError::Open(format!("不支持的流类型: {:?}", other)));
        }
    };

    let tb = stream.time_base();
    let time_base = Rational::new(tb.numerator(), tb.denominator());
    let duration = (stream.duration() > 0).then(|| time_base.seconds(stream.duration()));

    let context = codec::context::Context::from_parameters(parameters)?;
    let codec = match kind {
        MediaKind::Video => {
            let video = context.decoder().video()?;
            let rate = stream.avg_frame_rate();
            let rate = if rate.numerator() > 0 { rate } else { stream.rate() };
            CodecParameters {
                codec_name,
                width: video.width(),
                height: video.height(),
                frame_rate: Rational::new(rate.numerator(), rate.denominator()).to_f64(),
                ..CodecParameters::default()
            }
        }
        MediaKind::Audio => {
            let audio = context.decoder().audio()?;
            CodecParameters {
                codec_name,
                sample_rate: audio.rate(),
                channels: audio.channels(),
                ..CodecParameters::default()
            }
        }
    };

    Ok(StreamDescriptor {
        index: stream.index(),
        kind,
        time_base,
        codec,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_network_paths() {
        assert!(is_network_path("rtsp://camera/1"));
        assert!(is_network_path("https://cdn/live/index.m3u8"));
        assert!(!is_network_path("/data/movie.mp4"));
    }

    #[test]
    fn earliest_stream_start_becomes_the_zero_point() {
        let ts = Rational::new(1, 90_000);
        let starts: Vec<f64> = [126_000, i64::MIN, 135_000]
            .into_iter()
            .filter_map(|st| stream_start(st, ts))
            .collect();
        assert_eq!(starts.len(), 2);
        assert!((earliest_start(&starts) - 1.4).abs() < 1e-9);
        assert_eq!(earliest_start(&[]), 0.0);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = Demuxer::open("/nonexistent/file.mp4").err();
        assert!(matches!(err, Some(PlayerError::Open(_))));
    }
}
