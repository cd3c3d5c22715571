use crate::core::{
    MediaLocation, MediaSource, OutputFormat, PlayerConfig, PlayerError, Result, SourceError,
    StatsCounters,
};
use crate::player::decoder_unit::FrameDecoder;
use crate::player::demuxer_factory::DemuxerFactory;
use crate::player::demuxer_source::{DemuxerSource, MediaPacket};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// `next_packet` 的结果
#[derive(Debug)]
pub enum PacketEvent {
    Packet(MediaPacket),
    EndOfStream,
}

enum SourceState {
    Readable,
    Finished,
    /// 致命错误之后的终态，之后的调用都返回同一个错误
    Unreadable(PlayerError),
}

/// 包源 - 包装底层 demuxer，只输出参与播放的流，吸收单个坏包
pub struct PacketSource {
    backend: Box<dyn DemuxerSource>,
    media: Arc<MediaSource>,
    state: SourceState,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    stats: Arc<StatsCounters>,
}

impl PacketSource {
    /// 打开媒体（可能很慢：网络流探测、文件头解析）
    pub fn open(
        location: &MediaLocation,
        config: &PlayerConfig,
        stats: Arc<StatsCounters>,
    ) -> Result<Self> {
        let backend = DemuxerFactory::open(location)?;
        Self::from_backend(backend, location.clone(), config, stats)
    }

    pub fn from_backend(
        backend: Box<dyn DemuxerSource>,
        location: MediaLocation,
        config: &PlayerConfig,
        stats: Arc<StatsCounters>,
    ) -> Result<Self> {
        let video_stream = backend.video_stream_index();
        let audio_stream = backend.audio_stream_index();
        if video_stream.is_none() && audio_stream.is_none() {
            return Err(PlayerError::Open(format!(
                "{} 中没有可播放的音视频流",
                location
            )));
        }

        let media = MediaSource {
            location,
            streams: backend.streams().to_vec(),
            duration: backend.duration().max(0.0),
            video_stream,
            audio_stream,
            seekable: backend.is_seekable(),
        };
        info!(
            "📂 打开媒体: {} (时长 {:.2}s, 视频流 {:?}, 音频流 {:?})",
            backend.description(),
            media.duration,
            video_stream,
            audio_stream
        );

        Ok(Self {
            backend,
            media: Arc::new(media),
            state: SourceState::Readable,
            consecutive_errors: 0,
            max_consecutive_errors: config.max_consecutive_errors,
            stats,
        })
    }

    pub fn media(&self) -> &Arc<MediaSource> {
        &self.media
    }

    pub fn description(&self) -> String {
        self.backend.description()
    }

    pub fn create_decoder(
        &self,
        stream_index: usize,
        output: &OutputFormat,
    ) -> Result<Box<dyn FrameDecoder>> {
        self.backend.create_decoder(stream_index, output)
    }

    /// 读取下一个参与播放的包
    pub fn next_packet(&mut self) -> Result<PacketEvent> {
        match &self.state {
            SourceState::Unreadable(e) => return Err(e.clone()),
            SourceState::Finished => return Ok(PacketEvent::EndOfStream),
            SourceState::Readable => {}
        }

        loop {
            match self.backend.read_packet() {
                Ok(Some(packet)) => {
                    self.consecutive_errors = 0;
                    if Some(packet.stream_index) == self.media.video_stream
                        || Some(packet.stream_index) == self.media.audio_stream
                    {
                        return Ok(PacketEvent::Packet(packet));
                    }
                    // 其他流（字幕、数据）直接跳过
                }
                Ok(None) => {
                    debug!("📄 {} 到达文件末尾", self.backend.description());
                    self.state = SourceState::Finished;
                    return Ok(PacketEvent::EndOfStream);
                }
                Err(SourceError::Malformed(reason)) => {
                    self.stats.packet_skipped();
                    self.consecutive_errors += 1;
                    warn!("⚠️ 跳过损坏的数据包: {}", reason);
                    if self.consecutive_errors > self.max_consecutive_errors {
                        let err = PlayerError::Demux(format!(
                            "连续 {} 个损坏的数据包: {}",
                            self.consecutive_errors, reason
                        ));
                        return Err(self.fail(err));
                    }
                }
                Err(SourceError::Fatal(e)) => return Err(self.fail(e)),
            }
        }
    }

    /// Seek，目标先夹到 [0, duration]，返回实际位置
    pub fn seek(&mut self, target: f64) -> Result<f64> {
        if let SourceState::Unreadable(e) = &self.state {
            return Err(e.clone());
        }
        if !self.media.seekable {
            return Err(PlayerError::Seek(format!(
                "{} 不支持 seek",
                self.backend.description()
            )));
        }

        let clamped = if self.media.duration > 0.0 {
            target.clamp(0.0, self.media.duration)
        } else {
            target.max(0.0)
        };
        let actual = self.backend.seek(clamped)?;
        self.state = SourceState::Readable;
        self.consecutive_errors = 0;
        debug!("⏩ 包源 seek: 请求 {:.3}s, 实际 {:.3}s", clamped, actual);
        Ok(actual)
    }

    fn fail(&mut self, err: PlayerError) -> PlayerError {
        error!("❌ 包源不可读: {}", err);
        self.state = SourceState::Unreadable(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaKind;

    fn open(url: &str) -> (PacketSource, Arc<StatsCounters>) {
        let stats = Arc::new(StatsCounters::default());
        let source = PacketSource::open(
            &MediaLocation::from_url(url),
            &PlayerConfig::default(),
            stats.clone(),
        )
        .unwrap();
        (source, stats)
    }

    fn drain(source: &mut PacketSource) -> Vec<MediaPacket> {
        let mut packets = Vec::new();
        while let PacketEvent::Packet(p) = source.next_packet().unwrap() {
            packets.push(p);
        }
        packets
    }

    #[test]
    fn reads_until_end_of_stream() {
        let (mut source, _) = open("testsrc://?duration=1&fps=10&audio=0");
        assert!((source.media().duration - 1.0).abs() < 1e-9);
        let packets = drain(&mut source);
        assert_eq!(packets.len(), 10);
        assert!(packets.iter().all(|p| p.kind == MediaKind::Video));
        // 到达末尾后保持 EndOfStream
        assert!(matches!(source.next_packet().unwrap(), PacketEvent::EndOfStream));
    }

    #[test]
    fn malformed_packet_is_skipped_once() {
        let (mut source, stats) = open("testsrc://?duration=1&fps=10&audio=0&bad_packet=4");
        let packets = drain(&mut source);
        assert_eq!(packets.len(), 9);
        assert_eq!(stats.snapshot().skipped_packets, 1);
    }

    #[test]
    fn fatal_read_makes_source_unreadable() {
        let (mut source, _) = open("testsrc://?duration=1&fps=10&audio=0&fail_read=3");
        for _ in 0..3 {
            assert!(matches!(source.next_packet(), Ok(PacketEvent::Packet(_))));
        }
        let err = source.next_packet().unwrap_err();
        assert_eq!(err.kind(), "demux");
        assert_eq!(source.next_packet().unwrap_err(), err);
        assert_eq!(source.seek(0.0).unwrap_err(), err);
    }

    #[test]
    fn seek_clamps_to_duration() {
        let (mut source, _) = open("testsrc://?duration=2&fps=10&audio=0&gop=5");
        let actual = source.seek(99.0).unwrap();
        assert!(actual <= 2.0);
        let actual = source.seek(-3.0).unwrap();
        assert_eq!(actual, 0.0);
    }

    #[test]
    fn no_streams_is_open_error() {
        let err = PacketSource::open(
            &MediaLocation::from_url("testsrc://?audio=0&video=0"),
            &PlayerConfig::default(),
            Arc::new(StatsCounters::default()),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "open");
    }
}
