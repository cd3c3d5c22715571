use crate::core::{AudioFrame, DecodeError, DecodedFrame, MediaKind, StatsCounters, VideoFrame};
use crate::player::demuxer_source::MediaPacket;
use crate::player::demuxer_thread::{
    join_quietly, log_ctx, FaultReporter, PacketItem, PacketMessage, PipelineShared,
};
use crate::player::frame_queue::{FrameQueue, PushOutcome};
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 解码器抽象接口（具体编解码由后端实现）
pub trait FrameDecoder: Send {
    /// 送入一个压缩包
    fn submit(&mut self, packet: &MediaPacket) -> Result<(), DecodeError>;

    /// 取出当前可输出的帧（0 个或多个，顺序即显示顺序）
    fn drain(&mut self) -> Result<Vec<DecodedFrame>, DecodeError>;

    /// 丢弃内部参考状态（seek），解码器仍可继续使用
    fn flush(&mut self);

    /// 流结束：输出所有延迟帧
    fn finish(&mut self) -> Result<Vec<DecodedFrame>, DecodeError>;

    fn description(&self) -> String;
}

/// 解码输出的目标队列
#[derive(Clone)]
pub enum FrameSink {
    Video(Arc<FrameQueue<VideoFrame>>),
    Audio(Arc<FrameQueue<AudioFrame>>),
}

impl FrameSink {
    fn kind(&self) -> MediaKind {
        match self {
            FrameSink::Video(_) => MediaKind::Video,
            FrameSink::Audio(_) => MediaKind::Audio,
        }
    }

    fn push(&self, frame: DecodedFrame, serial: u64) -> PushOutcome {
        match (self, frame) {
            (FrameSink::Video(q), DecodedFrame::Video(f)) => q.push(f, serial),
            (FrameSink::Audio(q), DecodedFrame::Audio(f)) => q.push(f, serial),
            (_, frame) => {
                warn!("{} ⚠️ 解码器输出了错误类型的帧: {}", log_ctx(), frame.kind().as_str());
                PushOutcome::Queued
            }
        }
    }

    fn finish(&self, serial: u64) {
        match self {
            FrameSink::Video(q) => q.finish(serial),
            FrameSink::Audio(q) => q.finish(serial),
        }
    }
}

enum Step {
    Continue,
    Exit,
}

/// 解码单元 - 每个活动流一个线程：收包、解码、写入帧队列
pub struct DecoderUnit {
    stream_index: usize,
    decoder: Box<dyn FrameDecoder>,
    packets: Receiver<PacketMessage>,
    sink: FrameSink,
    shared: Arc<PipelineShared>,
    faults: FaultReporter,
    stats: Arc<StatsCounters>,
    max_consecutive_errors: u32,

    serial: u64,
    /// 精确 seek：结束时间不晚于此值的帧直接丢弃
    skip_before: Option<f64>,
    consecutive_errors: u32,
    frames_out: u64,
}

impl DecoderUnit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_index: usize,
        decoder: Box<dyn FrameDecoder>,
        packets: Receiver<PacketMessage>,
        sink: FrameSink,
        shared: Arc<PipelineShared>,
        faults: FaultReporter,
        stats: Arc<StatsCounters>,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            stream_index,
            decoder,
            packets,
            sink,
            shared,
            faults,
            stats,
            max_consecutive_errors,
            serial: 0,
            skip_before: None,
            consecutive_errors: 0,
            frames_out: 0,
        }
    }

    /// 在独立线程中运行
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        let name = format!("myy-decode-{}", self.sink.kind().as_str());
        thread::Builder::new().name(name).spawn(move || {
            let mut unit = self;
            unit.run();
        })
    }

    fn run(&mut self) {
        info!(
            "{} 🎞 {} 解码线程启动: 流 #{} ({})",
            log_ctx(),
            self.sink.kind().as_str(),
            self.stream_index,
            self.decoder.description()
        );

        // 发送端关闭（Demuxer 退出）时 recv 返回 Err
        while let Ok(message) = self.packets.recv() {
            if self.shared.is_stopped() {
                break;
            }
            if let Step::Exit = self.handle(message) {
                break;
            }
        }

        info!(
            "{} 🛑 {} 解码线程退出（输出 {} 帧）",
            log_ctx(),
            self.sink.kind().as_str(),
            self.frames_out
        );
    }

    fn handle(&mut self, message: PacketMessage) -> Step {
        let epoch = self.shared.epoch();
        if message.serial < epoch.serial {
            // 旧一代的包，直接丢弃
            return Step::Continue;
        }
        let mut flushed = false;
        if message.serial != self.serial {
            debug!(
                "{} 🔄 流 #{} 进入新的 seek 代 {} → flush 解码器",
                log_ctx(),
                self.stream_index,
                message.serial
            );
            self.decoder.flush();
            self.serial = message.serial;
            self.skip_before = if epoch.serial == message.serial {
                epoch.target
            } else {
                None
            };
            self.consecutive_errors = 0;
            flushed = true;
        }

        match message.item {
            PacketItem::Packet(packet) => {
                if packet.discontinuity && !flushed {
                    self.decoder.flush();
                }
                match self.decoder.submit(&packet) {
                    Ok(()) => {
                        self.consecutive_errors = 0;
                        let drained = self.decoder.drain();
                        self.deliver(drained)
                    }
                    Err(e) => self.on_error(e),
                }
            }
            PacketItem::EndOfStream => {
                let drained = self.decoder.finish();
                let step = self.deliver(drained);
                if let Step::Continue = step {
                    debug!("{} 流 #{} 解码完毕 (serial {})", log_ctx(), self.stream_index, self.serial);
                    self.sink.finish(self.serial);
                }
                step
            }
        }
    }

    fn deliver(&mut self, drained: Result<Vec<DecodedFrame>, DecodeError>) -> Step {
        let frames = match drained {
            Ok(frames) => frames,
            Err(e) => return self.on_error(e),
        };

        for frame in frames {
            if let Some(target) = self.skip_before {
                if frame.end() <= target + 1e-6 {
                    continue;
                }
                self.skip_before = None;
            }
            match self.sink.push(frame, self.serial) {
                PushOutcome::Queued => self.frames_out += 1,
                // seek 已经开始新的一代，本批剩余帧作废
                PushOutcome::Stale => break,
                PushOutcome::Closed => return Step::Exit,
            }
        }
        Step::Continue
    }

    fn on_error(&mut self, e: DecodeError) -> Step {
        if e.is_fatal() {
            self.faults.report(e.into_player_error(self.stream_index));
            return Step::Exit;
        }

        self.stats.decode_error();
        self.consecutive_errors += 1;
        warn!(
            "{} ⚠️ 流 #{} 解码错误（已跳过）: {}",
            log_ctx(),
            self.stream_index,
            e
        );
        if self.consecutive_errors > self.max_consecutive_errors {
            error!("{} ❌ 流 #{} 持续损坏", log_ctx(), self.stream_index);
            let fatal = DecodeError::Fatal(format!(
                "连续 {} 个包解码失败: {}",
                self.consecutive_errors, e
            ));
            self.faults.report(fatal.into_player_error(self.stream_index));
            return Step::Exit;
        }
        Step::Continue
    }
}

/// 解码线程集合
#[derive(Default)]
pub struct DecoderThreads {
    handles: Vec<JoinHandle<()>>,
}

impl DecoderThreads {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            join_quietly(handle, "解码");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PixelFormat, PlayerError};
    use crate::player::demuxer_source::PacketPayload;
    use crate::player::frame_queue::Wakeup;
    use crossbeam_channel::{bounded, Sender};
    use std::time::Duration;

    /// 按 payload 首字节决定结果：0 正常，1 可恢复错误，2 致命错误
    struct ScriptedDecoder {
        pending: Vec<DecodedFrame>,
        flushes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl FrameDecoder for ScriptedDecoder {
        fn submit(&mut self, packet: &MediaPacket) -> Result<(), DecodeError> {
            let marker = match &packet.payload {
                PacketPayload::Bytes(b) => b.first().copied().unwrap_or(0),
                #[allow(unreachable_patterns)]
                _ => 0,
            };
            match marker {
                1 => Err(DecodeError::Recoverable("bad frame".into())),
                2 => Err(DecodeError::Fatal("unsupported profile".into())),
                _ => {
                    self.pending.push(DecodedFrame::Video(VideoFrame {
                        pts: packet.pts.unwrap_or(0.0),
                        duration: packet.duration,
                        width: 1,
                        height: 1,
                        format: PixelFormat::RGBA,
                        data: vec![0; 4],
                    }));
                    Ok(())
                }
            }
        }

        fn drain(&mut self) -> Result<Vec<DecodedFrame>, DecodeError> {
            Ok(std::mem::take(&mut self.pending))
        }

        fn flush(&mut self) {
            self.flushes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.pending.clear();
        }

        fn finish(&mut self) -> Result<Vec<DecodedFrame>, DecodeError> {
            self.drain()
        }

        fn description(&self) -> String {
            "scripted".into()
        }
    }

    struct Harness {
        tx: Sender<PacketMessage>,
        queue: Arc<FrameQueue<VideoFrame>>,
        shared: Arc<PipelineShared>,
        faults: Receiver<PlayerError>,
        stats: Arc<StatsCounters>,
        flushes: Arc<std::sync::atomic::AtomicUsize>,
        handle: JoinHandle<()>,
    }

    fn harness(max_errors: u32) -> Harness {
        let wakeup = Arc::new(Wakeup::new());
        let queue = Arc::new(FrameQueue::new("video", 64, wakeup.clone()));
        let shared = Arc::new(PipelineShared::new());
        let (reporter, faults) = FaultReporter::new(wakeup);
        let stats = Arc::new(StatsCounters::default());
        let flushes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (tx, rx) = bounded(16);
        let unit = DecoderUnit::new(
            0,
            Box::new(ScriptedDecoder {
                pending: Vec::new(),
                flushes: flushes.clone(),
            }),
            rx,
            FrameSink::Video(queue.clone()),
            shared.clone(),
            reporter,
            stats.clone(),
            max_errors,
        );
        let handle = unit.spawn().unwrap();
        Harness {
            tx,
            queue,
            shared,
            faults,
            stats,
            flushes,
            handle,
        }
    }

    fn packet(serial: u64, pts: f64, marker: u8) -> PacketMessage {
        PacketMessage {
            serial,
            item: PacketItem::Packet(MediaPacket {
                stream_index: 0,
                kind: MediaKind::Video,
                pts: Some(pts),
                dts: Some(pts),
                duration: 0.1,
                keyframe: true,
                discontinuity: false,
                payload: PacketPayload::Bytes(vec![marker]),
            }),
        }
    }

    fn end(serial: u64) -> PacketMessage {
        PacketMessage {
            serial,
            item: PacketItem::EndOfStream,
        }
    }

    fn finish(h: Harness) -> (Arc<FrameQueue<VideoFrame>>, Receiver<PlayerError>, Arc<StatsCounters>) {
        drop(h.tx);
        h.handle.join().unwrap();
        (h.queue, h.faults, h.stats)
    }

    #[test]
    fn recoverable_error_drops_one_frame() {
        let h = harness(4);
        for i in 0..5 {
            let marker = if i == 2 { 1 } else { 0 };
            h.tx.send(packet(0, i as f64 * 0.1, marker)).unwrap();
        }
        h.tx.send(end(0)).unwrap();
        let (queue, faults, stats) = finish(h);
        assert_eq!(queue.len(), 4);
        assert!(queue.is_finished());
        assert!(faults.try_recv().is_err());
        assert_eq!(stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn fatal_error_is_reported_with_stream() {
        let h = harness(4);
        h.tx.send(packet(0, 0.0, 2)).unwrap();
        let (_, faults, _) = finish(h);
        let err = faults.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(err, PlayerError::Decode { stream: 0, .. }));
    }

    #[test]
    fn persistent_corruption_escalates() {
        let h = harness(2);
        for i in 0..3 {
            h.tx.send(packet(0, i as f64 * 0.1, 1)).unwrap();
        }
        let (_, faults, stats) = finish(h);
        assert!(faults.try_recv().is_ok());
        assert_eq!(stats.snapshot().decode_errors, 3);
    }

    #[test]
    fn new_serial_flushes_and_skips_before_target() {
        let h = harness(4);
        h.tx.send(packet(0, 0.0, 0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // 控制器开始 seek：推进代数并清空队列
        let serial = h.shared.begin_seek(0.95);
        h.queue.flush(serial);
        h.tx.send(packet(0, 0.1, 0)).unwrap();
        for i in 5..12 {
            h.tx.send(packet(serial, i as f64 * 0.1, 0)).unwrap();
        }
        h.tx.send(end(serial)).unwrap();

        let flushes = h.flushes.clone();
        let (queue, _, _) = finish(h);
        assert!(flushes.load(std::sync::atomic::Ordering::SeqCst) >= 1);
        // 0.9 结束于 1.0 覆盖目标 0.95，是第一帧
        let first = queue.pop_due(f64::MAX, 0.0).unwrap();
        assert!((first.pts - 0.9).abs() < 1e-9);
        assert_eq!(queue.len(), 2);
    }
}
