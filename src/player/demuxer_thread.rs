use crate::core::{PlayerError, Result};
use crate::player::demuxer_source::MediaPacket;
use crate::player::frame_queue::Wakeup;
use crate::player::packet_source::{PacketEvent, PacketSource};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 等待线程结束；不能 join 自己（例如在展示线程里触发的停止）
pub(crate) fn join_quietly(handle: JoinHandle<()>, name: &str) {
    if handle.thread().id() == thread::current().id() {
        debug!("{} {} 线程由自身触发停止，跳过 join", log_ctx(), name);
        return;
    }
    if handle.join().is_err() {
        error!("{} ❌ {} 线程异常退出", log_ctx(), name);
    }
}

/// 一次 seek 对应的一代数据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekEpoch {
    pub serial: u64,
    /// 精确 seek 的目标，解码端据此丢弃目标之前的帧
    pub target: Option<f64>,
}

/// 管线各线程共享的控制状态
pub struct PipelineShared {
    epoch: AtomicCell<SeekEpoch>,
    stopped: AtomicBool,
}

impl PipelineShared {
    pub fn new() -> Self {
        Self {
            epoch: AtomicCell::new(SeekEpoch {
                serial: 0,
                target: None,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn epoch(&self) -> SeekEpoch {
        self.epoch.load()
    }

    pub fn serial(&self) -> u64 {
        self.epoch.load().serial
    }

    /// 开始新的一代，只由控制器在持锁时调用
    pub fn begin_seek(&self, target: f64) -> u64 {
        let serial = self.serial() + 1;
        self.epoch.store(SeekEpoch {
            serial,
            target: Some(target),
        });
        serial
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for PipelineShared {
    fn default() -> Self {
        Self::new()
    }
}

/// 致命错误上报通道（由展示线程在持锁时统一处理）
#[derive(Clone)]
pub struct FaultReporter {
    tx: Sender<PlayerError>,
    wakeup: Arc<Wakeup>,
}

impl FaultReporter {
    pub fn new(wakeup: Arc<Wakeup>) -> (Self, Receiver<PlayerError>) {
        let (tx, rx) = unbounded();
        (Self { tx, wakeup }, rx)
    }

    pub fn report(&self, error: PlayerError) {
        error!("{} ❌ 管线故障: {}", log_ctx(), error);
        // 接收端已释放说明管线已经在停止，忽略即可
        let _ = self.tx.send(error);
        self.wakeup.notify();
    }
}

/// 发往解码线程的包
#[derive(Debug)]
pub enum PacketItem {
    Packet(MediaPacket),
    EndOfStream,
}

#[derive(Debug)]
pub struct PacketMessage {
    /// 读出该包时的 seek 代
    pub serial: u64,
    pub item: PacketItem,
}

/// 一个活动流的去向
pub struct PacketRoute {
    pub stream_index: usize,
    pub tx: Sender<PacketMessage>,
}

/// Demuxer 线程命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemuxerCommand {
    Seek { target: f64, serial: u64 },
    Stop,
}

enum Delivery {
    Sent,
    Disconnected,
    Interrupted(DemuxerCommand),
}

enum Flow {
    Continue,
    Exit,
}

/// Demuxer 线程管理器
/// - 单线程独占包源，按流分发到有界 channel（背压）
/// - 阻塞的发送可以被命令打断，不做定时轮询
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
    command_tx: Sender<DemuxerCommand>,
}

struct DemuxLoop {
    source: PacketSource,
    routes: Vec<PacketRoute>,
    command_rx: Receiver<DemuxerCommand>,
    faults: FaultReporter,
    serial: u64,
    /// seek 之后还没发出第一个包的流
    pending_discontinuity: Vec<usize>,
    eof: bool,
    packet_count: usize,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start(source: PacketSource, routes: Vec<PacketRoute>, faults: FaultReporter) -> Self {
        let (command_tx, command_rx) = unbounded::<DemuxerCommand>();

        let thread_handle = thread::Builder::new()
            .name("myy-demux".into())
            .spawn(move || {
                let mut demux = DemuxLoop {
                    source,
                    routes,
                    command_rx,
                    faults,
                    serial: 0,
                    pending_discontinuity: Vec::new(),
                    eof: false,
                    packet_count: 0,
                };
                demux.run();
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("{} ❌ 无法创建 Demuxer 线程: {}", log_ctx(), e);
                None
            }
        };

        Self {
            thread_handle,
            command_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// 发送 Seek 命令
    pub fn seek(&self, target: f64, serial: u64) -> Result<()> {
        self.command_tx
            .send(DemuxerCommand::Seek { target, serial })
            .map_err(|e| PlayerError::Other(format!("发送 Seek 命令失败: {}", e)))
    }

    /// 停止线程并等待退出
    pub fn stop(&mut self) {
        let _ = self.command_tx.send(DemuxerCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            join_quietly(handle, "Demuxer");
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但未调用 stop()，正在停止", log_ctx());
            self.stop();
        }
    }
}

impl DemuxLoop {
    fn run(&mut self) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), self.source.description());

        loop {
            // 到达末尾后阻塞等命令，不空转
            let command = if self.eof {
                match self.command_rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                }
            } else {
                self.command_rx.try_recv().ok()
            };

            if let Some(cmd) = command {
                match self.handle_command(cmd) {
                    Flow::Continue => continue,
                    Flow::Exit => break,
                }
            }

            let flow = match self.source.next_packet() {
                Ok(PacketEvent::Packet(packet)) => self.forward(packet),
                Ok(PacketEvent::EndOfStream) => self.end_of_stream(),
                Err(e) => {
                    self.faults.report(e);
                    Flow::Exit
                }
            };
            if let Flow::Exit = flow {
                break;
            }
        }

        info!(
            "{} 🛑 Demuxer 线程退出（共分发 {} 个包）",
            log_ctx(),
            self.packet_count
        );
        // 线程结束时发送端被 drop，解码线程的 recv() 随之返回
    }

    /// 合并积压的命令：Stop 优先，多个 Seek 只执行最后一个
    fn coalesce(&self, first: DemuxerCommand) -> DemuxerCommand {
        let mut latest = first;
        while let Ok(next) = self.command_rx.try_recv() {
            if latest == DemuxerCommand::Stop {
                continue;
            }
            if let DemuxerCommand::Seek { target, .. } = latest {
                debug!("{} 跳过旧的 seek 命令: {:.3}s", log_ctx(), target);
            }
            latest = next;
        }
        latest
    }

    fn handle_command(&mut self, cmd: DemuxerCommand) -> Flow {
        match self.coalesce(cmd) {
            DemuxerCommand::Stop => {
                info!("{} ⏹ Demuxer 线程收到停止命令", log_ctx());
                Flow::Exit
            }
            DemuxerCommand::Seek { target, serial } => {
                info!("{} ⏩ Demuxer 线程收到 Seek 命令: {:.3}s (serial {})", log_ctx(), target, serial);
                match self.source.seek(target) {
                    Ok(actual) => {
                        self.serial = serial;
                        self.eof = false;
                        self.pending_discontinuity =
                            self.routes.iter().map(|r| r.stream_index).collect();
                        info!("{} ✅ Seek 成功: 目标 {:.3}s, 实际 {:.3}s", log_ctx(), target, actual);
                        Flow::Continue
                    }
                    Err(e) => {
                        self.faults.report(e);
                        Flow::Exit
                    }
                }
            }
        }
    }

    fn forward(&mut self, mut packet: MediaPacket) -> Flow {
        let Some(route) = self
            .routes
            .iter()
            .position(|r| r.stream_index == packet.stream_index)
        else {
            return Flow::Continue;
        };

        if let Some(pos) = self
            .pending_discontinuity
            .iter()
            .position(|&s| s == packet.stream_index)
        {
            self.pending_discontinuity.swap_remove(pos);
            packet.discontinuity = true;
        }

        self.packet_count += 1;
        if self.packet_count <= 5 || self.packet_count % 500 == 0 {
            debug!(
                "{} 📦 分发 {} 包 #{} pts={:?}",
                log_ctx(),
                packet.kind.as_str(),
                self.packet_count,
                packet.pts
            );
        }

        let message = PacketMessage {
            serial: self.serial,
            item: PacketItem::Packet(packet),
        };
        self.deliver(route, message)
    }

    fn end_of_stream(&mut self) -> Flow {
        info!("{} 📄 Demuxer 到达文件末尾，等待命令（Seek/Stop）...", log_ctx());
        self.eof = true;
        for route in 0..self.routes.len() {
            let message = PacketMessage {
                serial: self.serial,
                item: PacketItem::EndOfStream,
            };
            match self.deliver(route, message) {
                Flow::Continue if self.eof => {}
                // 投递途中被 seek 打断，新的一代重新开始读
                Flow::Continue => return Flow::Continue,
                Flow::Exit => return Flow::Exit,
            }
        }
        Flow::Continue
    }

    fn deliver(&mut self, route: usize, message: PacketMessage) -> Flow {
        match self.send_or_command(route, message) {
            Delivery::Sent => Flow::Continue,
            Delivery::Disconnected => {
                debug!("{} 解码端已关闭，Demuxer 退出", log_ctx());
                Flow::Exit
            }
            Delivery::Interrupted(cmd) => self.handle_command(cmd),
        }
    }

    /// 通道满时阻塞发送，同时响应命令
    fn send_or_command(&self, route: usize, message: PacketMessage) -> Delivery {
        let tx = &self.routes[route].tx;
        select! {
            send(tx, message) -> res => match res {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Disconnected,
            },
            recv(self.command_rx) -> cmd => match cmd {
                Ok(cmd) => Delivery::Interrupted(cmd),
                Err(_) => Delivery::Interrupted(DemuxerCommand::Stop),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MediaLocation, PlayerConfig, StatsCounters};
    use crossbeam_channel::bounded;
    use std::time::Duration;

    fn start(url: &str, capacity: usize) -> (DemuxerThread, Receiver<PacketMessage>, Receiver<PlayerError>) {
        let source = PacketSource::open(
            &MediaLocation::from_url(url),
            &PlayerConfig::default(),
            Arc::new(StatsCounters::default()),
        )
        .unwrap();
        let stream_index = source.media().video_stream.unwrap();
        let (tx, rx) = bounded(capacity);
        let (faults, fault_rx) = FaultReporter::new(Arc::new(Wakeup::new()));
        let thread = DemuxerThread::start(source, vec![PacketRoute { stream_index, tx }], faults);
        (thread, rx, fault_rx)
    }

    fn recv(rx: &Receiver<PacketMessage>) -> PacketMessage {
        rx.recv_timeout(Duration::from_secs(2)).expect("packet")
    }

    #[test]
    fn delivers_packets_then_end_of_stream() {
        let (mut thread, rx, _) = start("testsrc://?duration=0.5&fps=10&audio=0", 4);
        let mut packets = 0;
        loop {
            match recv(&rx).item {
                PacketItem::Packet(_) => packets += 1,
                PacketItem::EndOfStream => break,
            }
        }
        assert_eq!(packets, 5);
        thread.stop();
        assert!(!thread.is_running());
    }

    #[test]
    fn seek_interrupts_blocked_send_and_marks_discontinuity() {
        let (mut thread, rx, _) = start("testsrc://?duration=10&fps=10&audio=0&gop=10", 2);
        // 通道已满，Demuxer 阻塞在发送上
        std::thread::sleep(Duration::from_millis(50));
        thread.seek(5.0, 1).unwrap();

        let message = loop {
            let message = recv(&rx);
            if message.serial == 1 {
                break message;
            }
        };
        match message.item {
            PacketItem::Packet(p) => {
                assert!(p.discontinuity);
                assert!(p.keyframe);
                assert!((p.pts.unwrap() - 5.0).abs() < 1e-9);
            }
            PacketItem::EndOfStream => panic!("expected packet"),
        }
        match recv(&rx).item {
            PacketItem::Packet(p) => assert!(!p.discontinuity),
            PacketItem::EndOfStream => panic!("expected packet"),
        }
        thread.stop();
    }

    #[test]
    fn stop_while_parked_at_end_of_stream() {
        let (mut thread, rx, _) = start("testsrc://?duration=0.2&fps=10&audio=0", 8);
        std::thread::sleep(Duration::from_millis(50));
        thread.stop();
        let items: Vec<_> = rx.try_iter().collect();
        assert!(matches!(items.last().map(|m| &m.item), Some(PacketItem::EndOfStream)));
    }

    #[test]
    fn read_failure_is_reported() {
        let (mut thread, _rx, faults) = start("testsrc://?duration=1&fps=10&audio=0&fail_read=1", 8);
        let err = faults.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(err.kind(), "demux");
        thread.stop();
    }

    #[test]
    fn begin_seek_advances_serial() {
        let shared = PipelineShared::new();
        assert_eq!(shared.serial(), 0);
        assert_eq!(shared.begin_seek(3.0), 1);
        assert_eq!(
            shared.epoch(),
            SeekEpoch {
                serial: 1,
                target: Some(3.0)
            }
        );
    }
}
