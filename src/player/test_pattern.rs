use crate::core::{
    AudioFrame, CodecParameters, DecodeError, DecodedFrame, MediaKind, OutputFormat, PixelFormat,
    PlayerError, Rational, Result, SampleFormat, SourceError, StreamDescriptor, VideoFrame,
};
use crate::player::decoder_unit::FrameDecoder;
use crate::player::demuxer_source::{DemuxerSource, MediaPacket, PacketPayload};
use log::debug;
use std::f32::consts::PI;
use std::thread;
use std::time::Duration;

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;
const AUDIO_CHUNK: usize = 1024;

/// 视频包负载标记
const MARK_OK: u8 = 0;
const MARK_CORRUPT: u8 = 1;
const MARK_FATAL: u8 = 2;

/// 测试图样参数，来自 `testsrc://?key=value&...`
#[derive(Debug, Clone, PartialEq)]
pub struct TestPatternParams {
    pub duration: f64,
    pub fps: u32,
    pub video: bool,
    pub audio: bool,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// 关键帧间隔（帧）
    pub gop: u32,
    /// 模拟 B 帧：GOP 内相邻两帧按解码顺序交换
    pub reorder: bool,
    /// 负载损坏的视频帧（解码时可恢复错误）
    pub corrupt: Vec<u64>,
    /// 解封装时报告为损坏包的视频帧
    pub bad_packet: Vec<u64>,
    /// 解码时报告致命错误的视频帧
    pub fatal_decode: Option<u64>,
    /// 读出这么多个包后，源变为不可读
    pub fail_read: Option<u64>,
    pub video_codec: String,
    pub open_delay: Duration,
    pub seekable: bool,
}

impl Default for TestPatternParams {
    fn default() -> Self {
        Self {
            duration: 10.0,
            fps: 30,
            video: true,
            audio: true,
            width: 64,
            height: 36,
            sample_rate: 48000,
            channels: 2,
            gop: 30,
            reorder: false,
            corrupt: Vec::new(),
            bad_packet: Vec::new(),
            fatal_decode: None,
            fail_read: None,
            video_codec: "testsrc".to_string(),
            open_delay: Duration::ZERO,
            seekable: true,
        }
    }
}

impl TestPatternParams {
    pub fn parse(url: &str) -> Result<Self> {
        let query = url
            .strip_prefix("testsrc://")
            .or_else(|| url.strip_prefix("testsrc:"))
            .ok_or_else(|| PlayerError::Open(format!("不是测试图样地址: {}", url)))?;
        let query = query.trim_start_matches('/').trim_start_matches('?');

        let mut params = TestPatternParams::default();
        let mut gop_set = false;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "duration" => params.duration = parse_value(key, value)?,
                "fps" => params.fps = parse_value(key, value)?,
                "video" => params.video = parse_flag(key, value)?,
                "audio" => params.audio = parse_flag(key, value)?,
                "width" => params.width = parse_value(key, value)?,
                "height" => params.height = parse_value(key, value)?,
                "sample_rate" => params.sample_rate = parse_value(key, value)?,
                "channels" => params.channels = parse_value(key, value)?,
                "gop" => {
                    params.gop = parse_value(key, value)?;
                    gop_set = true;
                }
                "reorder" => params.reorder = parse_flag(key, value)?,
                "corrupt" => params.corrupt.push(parse_value(key, value)?),
                "bad_packet" => params.bad_packet.push(parse_value(key, value)?),
                "fatal_decode" => params.fatal_decode = Some(parse_value(key, value)?),
                "fail_read" => params.fail_read = Some(parse_value(key, value)?),
                "codec" => params.video_codec = value.to_string(),
                "open_delay_ms" => {
                    params.open_delay = Duration::from_millis(parse_value(key, value)?)
                }
                "seekable" => params.seekable = parse_flag(key, value)?,
                _ => {
                    return Err(PlayerError::Open(format!("未知的测试图样参数: {}", key)));
                }
            }
        }

        if !gop_set {
            params.gop = params.fps;
        }
        if params.duration <= 0.0 || params.fps == 0 || params.gop == 0 {
            return Err(PlayerError::Open(format!("无效的测试图样参数: {}", url)));
        }
        if params.width == 0 || params.height == 0 || params.sample_rate == 0 || params.channels == 0 {
            return Err(PlayerError::Open(format!("无效的测试图样格式: {}", url)));
        }
        Ok(params)
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration * self.fps as f64).round() as u64
    }

    pub fn frame_duration(&self) -> f64 {
        1.0 / self.fps as f64
    }

    fn audio_samples(&self) -> u64 {
        (self.duration * self.sample_rate as f64).round() as u64
    }

    fn audio_chunk_count(&self) -> u64 {
        self.audio_samples().div_ceil(AUDIO_CHUNK as u64)
    }

    /// 解码顺序第 `position` 个包对应的帧序号
    fn frame_at_decode_position(&self, position: u64) -> u64 {
        if !self.reorder {
            return position;
        }
        let gop = self.gop as u64;
        let gop_start = position - position % gop;
        let offset = position - gop_start;
        let gop_len = gop.min(self.frame_count() - gop_start);
        // 关键帧之后每两帧交换：k, k+2, k+1, k+4, k+3 ...
        if offset == 0 {
            return position;
        }
        let pair_first = if offset % 2 == 1 { offset + 1 } else { offset - 1 };
        if pair_first >= gop_len {
            position
        } else {
            gop_start + pair_first
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PlayerError::Open(format!("测试图样参数 {} 的值无效: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(PlayerError::Open(format!("测试图样参数 {} 的值无效: {}", key, value))),
    }
}

/// 内置测试图样源 - 合成的音视频容器，不依赖任何外部库
pub struct TestPatternSource {
    params: TestPatternParams,
    url: String,
    streams: Vec<StreamDescriptor>,
    /// 下一个视频包的解码顺序位置
    next_video: u64,
    /// 下一个音频块序号
    next_audio: u64,
    packets_read: u64,
}

impl TestPatternSource {
    pub fn open(url: &str) -> Result<Self> {
        let params = TestPatternParams::parse(url)?;
        if !params.open_delay.is_zero() {
            // 模拟慢速探测（网络流）
            thread::sleep(params.open_delay);
        }

        let mut streams = Vec::new();
        if params.video {
            streams.push(StreamDescriptor {
                index: VIDEO_STREAM,
                kind: MediaKind::Video,
                time_base: Rational::new(1, params.fps as i32),
                codec: CodecParameters {
                    codec_name: params.video_codec.clone(),
                    width: params.width,
                    height: params.height,
                    frame_rate: params.fps as f64,
                    ..Default::default()
                },
                duration: Some(params.duration),
            });
        }
        if params.audio {
            streams.push(StreamDescriptor {
                index: AUDIO_STREAM,
                kind: MediaKind::Audio,
                time_base: Rational::new(1, params.sample_rate as i32),
                codec: CodecParameters {
                    codec_name: "pcm_f32le".to_string(),
                    sample_rate: params.sample_rate,
                    channels: params.channels,
                    ..Default::default()
                },
                duration: Some(params.duration),
            });
        }

        Ok(Self {
            params,
            url: url.to_string(),
            streams,
            next_video: 0,
            next_audio: 0,
            packets_read: 0,
        })
    }

    fn video_remaining(&self) -> bool {
        self.params.video && self.next_video < self.params.frame_count()
    }

    fn audio_remaining(&self) -> bool {
        self.params.audio && self.next_audio < self.params.audio_chunk_count()
    }

    fn video_dts(&self) -> f64 {
        self.next_video as f64 * self.params.frame_duration()
    }

    fn audio_pts(&self) -> f64 {
        (self.next_audio * AUDIO_CHUNK as u64) as f64 / self.params.sample_rate as f64
    }

    fn read_video(&mut self) -> std::result::Result<MediaPacket, SourceError> {
        let dts = self.video_dts();
        let frame = self.params.frame_at_decode_position(self.next_video);
        self.next_video += 1;

        if self.params.bad_packet.contains(&frame) {
            return Err(SourceError::Malformed(format!("视频帧 {} 的包头损坏", frame)));
        }

        let marker = if self.params.fatal_decode == Some(frame) {
            MARK_FATAL
        } else if self.params.corrupt.contains(&frame) {
            MARK_CORRUPT
        } else {
            MARK_OK
        };
        let mut payload = frame.to_le_bytes().to_vec();
        payload.push(marker);

        Ok(MediaPacket {
            stream_index: VIDEO_STREAM,
            kind: MediaKind::Video,
            pts: Some(frame as f64 * self.params.frame_duration()),
            dts: Some(dts),
            duration: self.params.frame_duration(),
            keyframe: frame % self.params.gop as u64 == 0,
            discontinuity: false,
            payload: PacketPayload::Bytes(payload),
        })
    }

    fn read_audio(&mut self) -> MediaPacket {
        let pts = self.audio_pts();
        let first = self.next_audio * AUDIO_CHUNK as u64;
        let count = (self.params.audio_samples() - first).min(AUDIO_CHUNK as u64) as usize;
        self.next_audio += 1;

        let channels = self.params.channels as usize;
        let rate = self.params.sample_rate as f32;
        let mut samples = Vec::with_capacity(count * channels);
        for i in 0..count {
            let t = (first as usize + i) as f32 / rate;
            let value = (2.0 * PI * 440.0 * t).sin() * 0.2;
            samples.extend(std::iter::repeat(value).take(channels));
        }

        MediaPacket {
            stream_index: AUDIO_STREAM,
            kind: MediaKind::Audio,
            pts: Some(pts),
            dts: Some(pts),
            duration: count as f64 / self.params.sample_rate as f64,
            keyframe: true,
            discontinuity: false,
            payload: PacketPayload::Bytes(bytemuck::cast_slice(&samples).to_vec()),
        }
    }
}

impl DemuxerSource for TestPatternSource {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn duration(&self) -> f64 {
        self.params.duration
    }

    fn read_packet(&mut self) -> std::result::Result<Option<MediaPacket>, SourceError> {
        if let Some(limit) = self.params.fail_read {
            if self.packets_read >= limit {
                return Err(SourceError::Fatal(PlayerError::Demux(format!(
                    "读取第 {} 个包时 IO 失败",
                    limit + 1
                ))));
            }
        }

        // 按时间交织：谁的时间戳更早先出谁
        let packet = match (self.video_remaining(), self.audio_remaining()) {
            (false, false) => return Ok(None),
            (true, false) => self.read_video(),
            (false, true) => Ok(self.read_audio()),
            (true, true) => {
                if self.video_dts() <= self.audio_pts() {
                    self.read_video()
                } else {
                    Ok(self.read_audio())
                }
            }
        };
        self.packets_read += 1;
        packet.map(Some)
    }

    fn seek(&mut self, target: f64) -> Result<f64> {
        let mut landed = if self.params.video {
            let total = self.params.frame_count();
            let frame = ((target * self.params.fps as f64).floor() as u64).min(total.saturating_sub(1));
            let keyframe = frame - frame % self.params.gop as u64;
            self.next_video = keyframe;
            keyframe as f64 * self.params.frame_duration()
        } else {
            target
        };
        if self.params.audio {
            let chunk = (landed * self.params.sample_rate as f64 / AUDIO_CHUNK as f64).floor() as u64;
            self.next_audio = chunk.min(self.params.audio_chunk_count());
            if !self.params.video {
                landed = self.audio_pts();
            }
        }
        debug!("🧪 测试图样 seek: {:.3}s → {:.3}s", target, landed);
        Ok(landed)
    }

    fn create_decoder(
        &self,
        stream_index: usize,
        output: &OutputFormat,
    ) -> Result<Box<dyn FrameDecoder>> {
        match stream_index {
            VIDEO_STREAM if self.params.video => {
                if self.params.video_codec != "testsrc" {
                    return Err(PlayerError::Open(format!(
                        "不支持的视频编码: {}",
                        self.params.video_codec
                    )));
                }
                Ok(Box::new(TestVideoDecoder::new(&self.params)))
            }
            AUDIO_STREAM if self.params.audio => Ok(Box::new(TestAudioDecoder::new(
                self.params.sample_rate,
                self.params.channels,
                *output,
            ))),
            _ => Err(PlayerError::Open(format!("没有流 #{}", stream_index))),
        }
    }

    fn is_seekable(&self) -> bool {
        self.params.seekable
    }

    fn description(&self) -> String {
        format!("Test pattern: {}", self.url)
    }
}

/// 测试视频解码器：负载里是帧序号，输出一幅随帧移动的色条
struct TestVideoDecoder {
    width: u32,
    height: u32,
    frame_duration: f64,
    /// 重排缓冲（按 PTS 输出）
    pending: Vec<VideoFrame>,
    reorder_depth: usize,
    /// 有没有见过关键帧（flush 之后必须从关键帧开始）
    synced: bool,
    gop: u64,
}

impl TestVideoDecoder {
    fn new(params: &TestPatternParams) -> Self {
        Self {
            width: params.width,
            height: params.height,
            frame_duration: params.frame_duration(),
            pending: Vec::new(),
            reorder_depth: if params.reorder { 1 } else { 0 },
            synced: false,
            gop: params.gop as u64,
        }
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar = (index as usize * 2) % w;
        let mut data = vec![0u8; w * h * 4];
        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 4;
                let on_bar = x == bar;
                data[offset] = if on_bar { 255 } else { (x * 255 / w) as u8 };
                data[offset + 1] = if on_bar { 255 } else { (y * 255 / h) as u8 };
                data[offset + 2] = (index % 256) as u8;
                data[offset + 3] = 255;
            }
        }
        data
    }

    fn take_ready(&mut self, keep: usize) -> Vec<DecodedFrame> {
        self.pending
            .sort_by(|a, b| a.pts.partial_cmp(&b.pts).unwrap_or(std::cmp::Ordering::Equal));
        let ready = self.pending.len().saturating_sub(keep);
        self.pending
            .drain(..ready)
            .map(DecodedFrame::Video)
            .collect()
    }
}

impl FrameDecoder for TestVideoDecoder {
    fn submit(&mut self, packet: &MediaPacket) -> std::result::Result<(), DecodeError> {
        let bytes = match &packet.payload {
            PacketPayload::Bytes(bytes) if bytes.len() == 9 => bytes,
            _ => return Err(DecodeError::Recoverable("负载长度不对".into())),
        };
        let mut index = [0u8; 8];
        index.copy_from_slice(&bytes[..8]);
        let index = u64::from_le_bytes(index);

        match bytes[8] {
            MARK_FATAL => {
                return Err(DecodeError::Fatal(format!("帧 {} 使用了不支持的 profile", index)))
            }
            MARK_CORRUPT => return Err(DecodeError::Recoverable(format!("帧 {} 数据损坏", index))),
            _ => {}
        }

        if !self.synced {
            if index % self.gop != 0 {
                return Err(DecodeError::Recoverable(format!("帧 {} 缺少参考帧", index)));
            }
            self.synced = true;
        }

        self.pending.push(VideoFrame {
            pts: packet.pts.unwrap_or(index as f64 * self.frame_duration),
            duration: self.frame_duration,
            width: self.width,
            height: self.height,
            format: PixelFormat::RGBA,
            data: self.render(index),
        });
        Ok(())
    }

    fn drain(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        let keep = self.reorder_depth;
        Ok(self.take_ready(keep))
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.synced = false;
    }

    fn finish(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        Ok(self.take_ready(0))
    }

    fn description(&self) -> String {
        format!("testsrc video {}x{}", self.width, self.height)
    }
}

/// 测试音频解码器：负载是交错 f32，按输出格式做声道映射和最近邻重采样
struct TestAudioDecoder {
    source_rate: u32,
    source_channels: u16,
    output: OutputFormat,
    pending: Vec<AudioFrame>,
}

impl TestAudioDecoder {
    fn new(source_rate: u32, source_channels: u16, output: OutputFormat) -> Self {
        Self {
            source_rate,
            source_channels,
            output,
            pending: Vec::new(),
        }
    }

    fn convert(&self, samples: &[f32]) -> Vec<f32> {
        let in_ch = self.source_channels as usize;
        let out_ch = self.output.channels as usize;
        let in_frames = samples.len() / in_ch;
        let out_frames = if self.source_rate == self.output.sample_rate {
            in_frames
        } else {
            (in_frames as u64 * self.output.sample_rate as u64 / self.source_rate as u64) as usize
        };

        let mut out = Vec::with_capacity(out_frames * out_ch);
        for i in 0..out_frames {
            let src = (i as u64 * self.source_rate as u64 / self.output.sample_rate as u64) as usize;
            let frame = &samples[src.min(in_frames - 1) * in_ch..][..in_ch];
            for c in 0..out_ch {
                out.push(frame[c.min(in_ch - 1)]);
            }
        }
        out
    }
}

impl FrameDecoder for TestAudioDecoder {
    fn submit(&mut self, packet: &MediaPacket) -> std::result::Result<(), DecodeError> {
        let bytes = match &packet.payload {
            PacketPayload::Bytes(bytes) => bytes,
            #[allow(unreachable_patterns)]
            _ => return Err(DecodeError::Recoverable("未知的音频负载".into())),
        };
        if bytes.len() % 4 != 0 || bytes.is_empty() {
            return Err(DecodeError::Recoverable("音频负载长度不对".into()));
        }
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        self.pending.push(AudioFrame {
            pts: packet.pts.unwrap_or(0.0),
            sample_rate: self.output.sample_rate,
            channels: self.output.channels,
            format: SampleFormat::F32,
            data: self.convert(&samples),
        });
        Ok(())
    }

    fn drain(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        Ok(self.pending.drain(..).map(DecodedFrame::Audio).collect())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }

    fn finish(&mut self) -> std::result::Result<Vec<DecodedFrame>, DecodeError> {
        self.drain()
    }

    fn description(&self) -> String {
        format!(
            "testsrc audio {}Hz/{}ch → {}Hz/{}ch",
            self.source_rate, self.source_channels, self.output.sample_rate, self.output.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(source: &mut TestPatternSource) -> Vec<MediaPacket> {
        let mut packets = Vec::new();
        while let Some(p) = source.read_packet().unwrap() {
            packets.push(p);
        }
        packets
    }

    fn output() -> OutputFormat {
        OutputFormat {
            sample_rate: 48000,
            channels: 2,
        }
    }

    #[test]
    fn parses_query() {
        let params = TestPatternParams::parse("testsrc://?duration=2.5&fps=25&audio=0&corrupt=7").unwrap();
        assert_eq!(params.duration, 2.5);
        assert_eq!(params.fps, 25);
        assert_eq!(params.gop, 25);
        assert!(!params.audio);
        assert_eq!(params.corrupt, vec![7]);
        assert_eq!(params.frame_count(), 63);

        assert!(TestPatternParams::parse("testsrc://?bogus=1").is_err());
        assert!(TestPatternParams::parse("testsrc://?fps=abc").is_err());
        assert!(TestPatternParams::parse("testsrc://?duration=0").is_err());
    }

    #[test]
    fn packets_are_interleaved_by_time() {
        let mut source = TestPatternSource::open("testsrc://?duration=1&fps=10").unwrap();
        let packets = read_all(&mut source);
        let video = packets.iter().filter(|p| p.kind == MediaKind::Video).count();
        let audio = packets.iter().filter(|p| p.kind == MediaKind::Audio).count();
        assert_eq!(video, 10);
        assert_eq!(audio, 47);

        let mut last = -1.0;
        for p in &packets {
            let dts = p.dts.unwrap();
            assert!(dts + 0.1 >= last, "packet order regressed: {} < {}", dts, last);
            last = last.max(dts);
        }
    }

    #[test]
    fn reorder_emits_decode_order_and_decoder_restores_pts_order() {
        let mut source =
            TestPatternSource::open("testsrc://?duration=1&fps=10&audio=0&gop=5&reorder=1").unwrap();
        let packets = read_all(&mut source);
        let order: Vec<u64> = packets
            .iter()
            .map(|p| (p.pts.unwrap() * 10.0).round() as u64)
            .collect();
        assert_eq!(order, vec![0, 2, 1, 4, 3, 5, 7, 6, 9, 8]);

        let mut decoder = source.create_decoder(VIDEO_STREAM, &output()).unwrap();
        let mut pts = Vec::new();
        for p in &packets {
            decoder.submit(p).unwrap();
            pts.extend(decoder.drain().unwrap().iter().map(|f| f.pts()));
        }
        pts.extend(decoder.finish().unwrap().iter().map(|f| f.pts()));
        assert_eq!(pts.len(), 10);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn seek_lands_on_preceding_keyframe() {
        let mut source = TestPatternSource::open("testsrc://?duration=10&fps=30").unwrap();
        let landed = source.seek(7.5).unwrap();
        assert!((landed - 7.0).abs() < 1e-9);
        let first = source.read_packet().unwrap().unwrap();
        assert!(first.keyframe || first.kind == MediaKind::Audio);
    }

    #[test]
    fn decoder_needs_keyframe_after_flush() {
        let mut source = TestPatternSource::open("testsrc://?duration=1&fps=10&audio=0&gop=5").unwrap();
        let packets = read_all(&mut source);
        let mut decoder = source.create_decoder(VIDEO_STREAM, &output()).unwrap();
        assert!(decoder.submit(&packets[2]).is_err());
        decoder.flush();
        decoder.submit(&packets[5]).unwrap();
        assert_eq!(decoder.drain().unwrap().len(), 1);
    }

    #[test]
    fn injected_faults() {
        let mut source =
            TestPatternSource::open("testsrc://?duration=1&fps=10&audio=0&corrupt=3&fatal_decode=6")
                .unwrap();
        let packets = read_all(&mut source);
        let mut decoder = source.create_decoder(VIDEO_STREAM, &output()).unwrap();
        assert!(decoder.submit(&packets[0]).is_ok());
        assert!(!decoder.submit(&packets[3]).unwrap_err().is_fatal());
        assert!(decoder.submit(&packets[6]).unwrap_err().is_fatal());
    }

    #[test]
    fn unsupported_codec_fails_decoder_creation() {
        let source = TestPatternSource::open("testsrc://?codec=h266").unwrap();
        let err = source.create_decoder(VIDEO_STREAM, &output()).err().unwrap();
        assert_eq!(err.kind(), "open");
    }

    #[test]
    fn audio_is_converted_to_output_format() {
        let mut source =
            TestPatternSource::open("testsrc://?duration=0.1&video=0&sample_rate=24000&channels=1")
                .unwrap();
        let packet = source.read_packet().unwrap().unwrap();
        let mut decoder = source.create_decoder(AUDIO_STREAM, &output()).unwrap();
        decoder.submit(&packet).unwrap();
        let frames = decoder.drain().unwrap();
        match &frames[0] {
            DecodedFrame::Audio(frame) => {
                assert_eq!(frame.sample_rate, 48000);
                assert_eq!(frame.channels, 2);
                assert_eq!(frame.samples(), 2048);
            }
            other => panic!("unexpected frame {:?}", other.kind()),
        }
    }
}
