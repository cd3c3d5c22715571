// 播放器核心模块

pub mod audio_output;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod decoder_unit;
pub mod delegate;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;
pub mod demuxer_factory;
pub mod demuxer_source;
pub mod demuxer_thread;
pub mod frame_queue;
pub mod manager;
pub mod packet_source;
mod pipeline;
mod presenter;
pub mod test_pattern;

pub use audio_output::{AudioSink, VirtualAudioSink};
#[cfg(feature = "ffmpeg")]
pub use demuxer::Demuxer;
pub use decoder_unit::FrameDecoder;
pub use delegate::{PlayerDelegate, PlayerEvent};
pub use demuxer_factory::DemuxerFactory;
pub use demuxer_source::{DemuxerSource, MediaPacket, PacketPayload};
pub use frame_queue::FrameQueue;
pub use manager::PlaybackManager;
pub use packet_source::PacketSource;
pub use test_pattern::TestPatternSource;
