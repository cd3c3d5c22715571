use crate::core::{
    AudioFrame, ClockSource, MediaKind, MediaLocation, MediaSource, PlaybackClock, PlayerConfig,
    PlayerError, Result, StatsCounters, VideoFrame,
};
use crate::player::audio_output::{self, SinkPlan};
use crate::player::decoder_unit::{DecoderThreads, DecoderUnit, FrameDecoder, FrameSink};
use crate::player::demuxer_thread::{
    join_quietly, log_ctx, DemuxerThread, FaultReporter, PacketRoute, PipelineShared,
};
use crate::player::frame_queue::{FrameQueue, Wakeup};
use crate::player::manager::PlayerCore;
use crate::player::packet_source::PacketSource;
use crate::player::presenter::PresentationDriver;
use crossbeam_channel::bounded;
use log::info;
use std::sync::Arc;
use std::thread::JoinHandle;

/// 已打开但尚未启动的管线（加载线程中构建，不持有任何锁）
pub(crate) struct PreparedPipeline {
    source: PacketSource,
    decoders: Vec<(usize, MediaKind, Box<dyn FrameDecoder>)>,
    plan: SinkPlan,
}

impl PreparedPipeline {
    /// 打开媒体、协商音频格式、为每个活动流创建解码器
    pub fn prepare(
        config: &PlayerConfig,
        location: &MediaLocation,
        stats: Arc<StatsCounters>,
    ) -> Result<Self> {
        let source = PacketSource::open(location, config, stats)?;
        let media = source.media().clone();

        let plan = if media.has_audio() {
            audio_output::negotiate(config)?
        } else {
            SinkPlan {
                format: config.output_format(),
                use_device: false,
                fallback: false,
            }
        };

        let mut decoders = Vec::new();
        for index in media.active_streams() {
            let kind = media
                .stream(index)
                .map(|s| s.kind)
                .ok_or_else(|| PlayerError::Open(format!("没有流 #{}", index)))?;
            let decoder = source.create_decoder(index, &plan.format)?;
            info!("🔧 流 #{} 解码器: {}", index, decoder.description());
            decoders.push((index, kind, decoder));
        }

        Ok(Self {
            source,
            decoders,
            plan,
        })
    }

    pub fn media(&self) -> &Arc<MediaSource> {
        self.source.media()
    }

    /// 启动 Demuxer、解码和展示线程
    pub fn start(
        self,
        core: Arc<PlayerCore>,
        generation: u64,
        stats: Arc<StatsCounters>,
    ) -> Result<Pipeline> {
        let config = core.config.clone();
        let media = self.source.media().clone();
        let wakeup = Arc::new(Wakeup::new());
        let shared = Arc::new(PipelineShared::new());
        let (faults, fault_rx) = FaultReporter::new(wakeup.clone());

        let clock = PlaybackClock::new();
        if media.has_audio() {
            clock.set_source(ClockSource::Audio);
        }

        let mut video_queue: Option<Arc<FrameQueue<VideoFrame>>> = None;
        let mut audio_queue: Option<Arc<FrameQueue<AudioFrame>>> = None;
        let mut routes = Vec::new();
        let mut decoders = DecoderThreads::default();

        for (stream_index, kind, decoder) in self.decoders {
            let (capacity, sink) = match kind {
                MediaKind::Video => {
                    let q = Arc::new(FrameQueue::new("video", config.video_queue_frames, wakeup.clone()));
                    video_queue = Some(q.clone());
                    (config.video_packet_queue, FrameSink::Video(q))
                }
                MediaKind::Audio => {
                    let q = Arc::new(FrameQueue::new("audio", config.audio_queue_frames, wakeup.clone()));
                    audio_queue = Some(q.clone());
                    (config.audio_packet_queue, FrameSink::Audio(q))
                }
            };
            let (tx, rx) = bounded(capacity);
            routes.push(PacketRoute { stream_index, tx });

            let unit = DecoderUnit::new(
                stream_index,
                decoder,
                rx,
                sink,
                shared.clone(),
                faults.clone(),
                stats.clone(),
                config.max_consecutive_errors,
            );
            let handle = unit
                .spawn()
                .map_err(|e| PlayerError::Other(format!("无法创建解码线程: {}", e)))?;
            decoders.push(handle);
        }

        let demuxer = DemuxerThread::start(self.source, routes, faults);
        let mut pipeline = Pipeline {
            shared: shared.clone(),
            demuxer,
            decoders,
            driver: None,
            video_queue: video_queue.clone(),
            audio_queue: audio_queue.clone(),
            clock: clock.clone(),
            wakeup: wakeup.clone(),
            seekable: media.seekable,
        };
        if !pipeline.demuxer.is_running() {
            pipeline.shutdown();
            return Err(PlayerError::Other("无法创建 Demuxer 线程".into()));
        }

        let driver = PresentationDriver {
            core,
            generation,
            shared,
            video: video_queue,
            audio: audio_queue,
            clock,
            wakeup,
            faults: fault_rx,
            plan: self.plan,
            duration: media.duration,
            stats,
            tolerance: config.video_tolerance(),
            audio_lead: config.audio_lead(),
            late_threshold: config.late_threshold(),
            tick_interval: config.tick_interval(),
        };
        match driver.spawn() {
            Ok(handle) => {
                pipeline.driver = Some(handle);
                info!("{} ▶ 管线已启动 (generation {})", log_ctx(), generation);
                Ok(pipeline)
            }
            Err(e) => {
                pipeline.shutdown();
                Err(PlayerError::Other(format!("无法创建展示线程: {}", e)))
            }
        }
    }
}

/// 一次加载对应的运行中管线
pub(crate) struct Pipeline {
    shared: Arc<PipelineShared>,
    demuxer: DemuxerThread,
    decoders: DecoderThreads,
    driver: Option<JoinHandle<()>>,
    video_queue: Option<Arc<FrameQueue<VideoFrame>>>,
    audio_queue: Option<Arc<FrameQueue<AudioFrame>>>,
    pub clock: PlaybackClock,
    wakeup: Arc<Wakeup>,
    pub seekable: bool,
}

impl Pipeline {
    /// flush-then-refill：推进代数、清空队列、时钟停在目标上，再通知 Demuxer
    ///
    /// 由控制器持锁调用，与展示线程的帧分发互斥。
    pub fn seek(&self, target: f64) -> Result<()> {
        let serial = self.shared.begin_seek(target);
        if let Some(q) = &self.video_queue {
            q.flush(serial);
        }
        if let Some(q) = &self.audio_queue {
            q.flush(serial);
        }
        self.clock.pause();
        self.clock.anchor(target);
        self.demuxer.seek(target, serial)?;
        self.wakeup.notify();
        Ok(())
    }

    pub fn notify(&self) {
        self.wakeup.notify();
    }

    /// 释放所有组件（在控制器锁之外调用）
    pub fn shutdown(mut self) {
        info!("{} 🧹 释放管线", log_ctx());
        self.shared.stop();
        if let Some(q) = &self.video_queue {
            q.close();
        }
        if let Some(q) = &self.audio_queue {
            q.close();
        }
        self.demuxer.stop();
        self.wakeup.notify();
        if let Some(handle) = self.driver.take() {
            join_quietly(handle, "展示");
        }
        self.decoders.join();
    }
}
