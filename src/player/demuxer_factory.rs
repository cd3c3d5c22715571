use crate::core::{MediaLocation, Result};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::test_pattern::TestPatternSource;
use log::info;

#[cfg(not(feature = "ffmpeg"))]
use crate::core::PlayerError;

/// Demuxer 工厂 - 根据媒体位置选择后端
///
/// 打开过程可能很慢（网络探测），调用方负责放在子线程中执行。
pub struct DemuxerFactory;

impl DemuxerFactory {
    pub fn open(location: &MediaLocation) -> Result<Box<dyn DemuxerSource>> {
        match location {
            MediaLocation::TestPattern(params) => {
                info!("🧪 创建测试图样源: {}", params);
                Ok(Box::new(TestPatternSource::open(params)?))
            }
            MediaLocation::LocalFile(path) => {
                let path_str = path.to_string_lossy().to_string();
                info!("📁 创建本地文件 Demuxer: {}", path_str);
                Self::open_ffmpeg(&path_str)
            }
            MediaLocation::NetworkStream { url, protocol } => {
                info!("🌐 创建网络流 Demuxer: {} ({})", url, protocol.as_str());
                Self::open_ffmpeg(url)
            }
        }
    }

    #[cfg(feature = "ffmpeg")]
    fn open_ffmpeg(url: &str) -> Result<Box<dyn DemuxerSource>> {
        Ok(Box::new(crate::player::demuxer::Demuxer::open(url)?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn open_ffmpeg(url: &str) -> Result<Box<dyn DemuxerSource>> {
        Err(PlayerError::Open(format!(
            "未启用 ffmpeg 特性，无法打开: {}",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_test_pattern() {
        let source = DemuxerFactory::open(&MediaLocation::from_url("testsrc://?duration=1")).unwrap();
        assert!(source.video_stream_index().is_some());
        assert!(source.audio_stream_index().is_some());
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn file_without_ffmpeg_is_open_error() {
        let err = DemuxerFactory::open(&MediaLocation::from_url("/tmp/movie.mp4"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "open");
    }
}
