use crate::core::{
    AudioFrame, DecodeError, DecodedFrame, PixelFormat, Result, SampleFormat, VideoFrame,
};
use crate::player::decoder_unit::FrameDecoder;
use crate::player::demuxer_source::{MediaPacket, PacketPayload};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::debug;

/// 把 FFmpeg 的错误分成可恢复（单个坏包）与致命（整个流无法继续）
fn classify(err: ffmpeg::Error) -> DecodeError {
    match err {
        ffmpeg::Error::DecoderNotFound
        | ffmpeg::Error::PatchWelcome
        | ffmpeg::Error::Bug
        | ffmpeg::Error::Bug2
        | ffmpeg::Error::Unknown => DecodeError::Fatal(err.to_string()),
        _ => DecodeError::Recoverable(err.to_string()),
    }
}

/// receive_frame 暂时没有输出（需要更多输入）或已经取完
fn no_more_output(err: &ffmpeg::Error) -> bool {
    match err {
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::error::EAGAIN,
        ffmpeg::Error::Eof => true,
        _ => false,
    }
}

fn ffmpeg_packet(packet: &MediaPacket) -> std::result::Result<&ffmpeg::Packet, DecodeError> {
    match &packet.payload {
        PacketPayload::Ffmpeg(p) => Ok(p),
        PacketPayload::Bytes(_) => Err(DecodeError::Fatal("FFmpeg 解码器收到了非 FFmpeg 数据包".into())),
    }
}

/// 软件视频解码器（输出 RGBA）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<(ScalerKey, software::scaling::Context)>,
    time_base: f64,
    /// 容器起始时间，帧时间戳减去它
    start_offset: f64,
    frame_duration: f64,
    next_pts: f64,
}

#[derive(Clone, Copy, PartialEq)]
struct ScalerKey {
    format: util::format::Pixel,
    width: u32,
    height: u32,
}

// SwsContext 本身不是 Send，但每个解码器实例只在自己的解码线程中使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    pub fn from_stream(
        stream: format::stream::Stream,
        frame_rate: f64,
        start_offset: f64,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;
        let frame_duration = if frame_rate > 0.0 { 1.0 / frame_rate } else { 1.0 / 25.0 };

        debug!(
            "软件解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            scaler: None,
            time_base,
            start_offset,
            frame_duration,
            next_pts: 0.0,
        })
    }

    fn receive_all(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => frames.push(DecodedFrame::Video(self.convert_frame(&decoded)?)),
                Err(e) if no_more_output(&e) => break,
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(frames)
    }

    /// 转换帧格式为 RGBA
    fn convert_frame(
        &mut self,
        frame: &util::frame::Video,
    ) -> std::result::Result<VideoFrame, DecodeError> {
        let width = frame.width();
        let height = frame.height();
        let key = ScalerKey {
            format: frame.format(),
            width,
            height,
        };

        // 分辨率或像素格式变化时重建 scaler
        if self.scaler.as_ref().map_or(true, |(k, _)| *k != key) {
            let context = software::scaling::Context::get(
                key.format,
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| DecodeError::Fatal(format!("无法创建像素格式转换: {}", e)))?;
            self.scaler = Some((key, context));
        }
        let Some((_, scaler)) = self.scaler.as_mut() else {
            return Err(DecodeError::Fatal("像素格式转换不可用".into()));
        };

        let mut rgba_frame = util::frame::Video::empty();
        scaler
            .run(frame, &mut rgba_frame)
            .map_err(|e| DecodeError::Recoverable(e.to_string()))?;

        let pts = match frame.timestamp() {
            Some(ts) => ts as f64 * self.time_base - self.start_offset,
            None => self.next_pts,
        };
        self.next_pts = pts + self.frame_duration;

        // 去掉行尾填充，复制到连续内存
        let row_size = width as usize * 4;
        let stride = rgba_frame.stride(0);
        let src = rgba_frame.data(0);
        let mut data = vec![0u8; row_size * height as usize];
        for (y, row) in data.chunks_exact_mut(row_size).enumerate() {
            let offset = y * stride;
            row.copy_from_slice(&src[offset..offset + row_size]);
        }

        Ok(VideoFrame {
            pts,
            duration: self.frame_duration,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl FrameDecoder for VideoDecoder {
    fn submit(&mut self, packet: &MediaPacket) -> std::result::Result<(), DecodeError> {
        let packet = ffmpeg_packet(packet)?;
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    fn drain(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        self.receive_all()
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn finish(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        self.decoder.send_eof().map_err(classify)?;
        let frames = self.receive_all();
        self.decoder.flush();
        frames
    }

    fn description(&self) -> String {
        format!(
            "FFmpeg 软件视频解码 {}x{} {:?}",
            self.decoder.width(),
            self.decoder.height(),
            self.decoder.format()
        )
    }
}

/// 音频解码器（重采样为交错 f32）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    start_offset: f64,
    target_channels: u16,
    target_sample_rate: u32,
    next_pts: f64,
}

// SwrContext 同样只在所属的解码线程中使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    /// 从音频流创建解码器（指定目标配置）
    pub fn from_stream_with_config(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
        start_offset: f64,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target_sample_rate,
            target_channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base,
            start_offset,
            target_channels,
            target_sample_rate,
            next_pts: 0.0,
        })
    }

    fn receive_all(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    if let Some(frame) = self.convert_frame(&decoded)? {
                        frames.push(DecodedFrame::Audio(frame));
                    }
                }
                Err(e) if no_more_output(&e) => break,
                Err(e) => return Err(classify(e)),
            }
        }
        Ok(frames)
    }

    fn convert_frame(
        &mut self,
        frame: &util::frame::Audio,
    ) -> std::result::Result<Option<AudioFrame>, DecodeError> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };
            // 部分编码没有声道布局，按声道数推断
            let source_layout = if frame.channel_layout().is_empty() {
                util::channel_layout::ChannelLayout::default(i32::from(frame.channels()))
            } else {
                frame.channel_layout()
            };
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );
            let context = software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )
            .map_err(|e| DecodeError::Fatal(format!("无法创建重采样器: {}", e)))?;
            self.resampler = Some(context);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(DecodeError::Fatal("重采样器不可用".into()));
        };

        let mut resampled = util::frame::Audio::empty();
        resampler
            .run(frame, &mut resampled)
            .map_err(|e| DecodeError::Recoverable(e.to_string()))?;

        let samples = resampled.samples();
        if samples == 0 {
            return Ok(None);
        }

        let pts = match frame.timestamp() {
            Some(ts) => ts as f64 * self.time_base - self.start_offset,
            None => self.next_pts,
        };
        self.next_pts = pts + samples as f64 / f64::from(self.target_sample_rate);

        let value_count = samples * self.target_channels as usize;
        let bytes = &resampled.data(0)[..value_count * 4];
        let data = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        Ok(Some(AudioFrame {
            pts,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            format: SampleFormat::F32,
            data,
        }))
    }
}

impl FrameDecoder for AudioDecoder {
    fn submit(&mut self, packet: &MediaPacket) -> std::result::Result<(), DecodeError> {
        let packet = ffmpeg_packet(packet)?;
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    fn drain(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        self.receive_all()
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn finish(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        self.decoder.send_eof().map_err(classify)?;
        let frames = self.receive_all();
        self.decoder.flush();
        frames
    }

    fn description(&self) -> String {
        format!(
            "FFmpeg 音频解码 {}Hz/{}ch → {}Hz/{}ch",
            self.decoder.rate(),
            self.decoder.channels(),
            self.target_sample_rate,
            self.target_channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ffmpeg_errors() {
        assert!(!classify(ffmpeg::Error::InvalidData).is_fatal());
        assert!(classify(ffmpeg::Error::DecoderNotFound).is_fatal());
    }

    #[test]
    fn would_block_ends_the_receive_loop() {
        assert!(no_more_output(&ffmpeg::Error::Other {
            errno: ffmpeg::error::EAGAIN
        }));
        assert!(no_more_output(&ffmpeg::Error::Eof));
        assert!(!no_more_output(&ffmpeg::Error::InvalidData));
    }
}
