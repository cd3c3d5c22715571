use crate::core::{
    MediaLocation, MediaSource, PlaybackState, PlaybackStats, PlayerConfig, PlayerError,
    StatsCounters,
};
use crate::player::delegate::{EventDispatcher, PlayerDelegate, PlayerEvent};
use crate::player::demuxer_thread::log_ctx;
use crate::player::pipeline::{Pipeline, PreparedPipeline};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

/// 控制器与展示线程共享的核心
pub(crate) struct PlayerCore {
    pub config: PlayerConfig,
    pub state: Mutex<CoreState>,
}

/// 受控制器锁保护的全部可变状态
///
/// `playback` 只在这把锁内修改；展示线程的每一轮分发也在这把锁内完成。
pub(crate) struct CoreState {
    pub playback: PlaybackState,
    /// 每次 load 加一，旧加载的线程据此自行退出
    pub generation: u64,
    pub muted: bool,
    pub source: Option<Arc<MediaSource>>,
    pub pipeline: Option<Pipeline>,
    pub events: Option<EventDispatcher>,
    pub stats: Arc<StatsCounters>,
    /// 管线释放后 `position()` 报告的位置
    pub last_position: f64,
}

impl CoreState {
    fn new() -> Self {
        Self {
            playback: PlaybackState::Idle,
            generation: 0,
            muted: false,
            source: None,
            pipeline: None,
            events: None,
            stats: Arc::new(StatsCounters::default()),
            last_position: 0.0,
        }
    }

    pub fn emit(&self, event: PlayerEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// 切换状态并发出对应回调；进入终态时交出需要在锁外释放的资源
    pub fn transition(&mut self, next: PlaybackState) -> Option<Teardown> {
        let prev = std::mem::replace(&mut self.playback, next);
        info!(
            "{} 🔀 状态: {} → {}",
            log_ctx(),
            prev.name(),
            self.playback.name()
        );

        let event = match (&prev, &self.playback) {
            (PlaybackState::Loading { .. }, PlaybackState::Loading { .. }) => None,
            (_, PlaybackState::Loading { .. }) => Some(PlayerEvent::Loading),
            (PlaybackState::Loading { .. }, PlaybackState::Ready) => {
                self.source.clone().map(PlayerEvent::Ready)
            }
            (_, PlaybackState::Playing) => Some(PlayerEvent::Playing),
            (_, PlaybackState::Paused) => Some(PlayerEvent::Paused),
            (_, PlaybackState::Stopped) => Some(PlayerEvent::Stopped),
            (_, PlaybackState::Failed(e)) => Some(PlayerEvent::Failed(e.clone())),
            _ => None,
        };
        if let Some(event) = event {
            self.emit(event);
        }

        if !self.playback.is_terminal() {
            return None;
        }
        if let Some(pipeline) = &self.pipeline {
            self.last_position = pipeline.clock.now();
        }
        Some(Teardown {
            pipeline: self.pipeline.take(),
            events: self.events.take(),
        })
    }
}

/// 终态时从核心里取出的资源，必须在锁外执行 [`Teardown::run`]
pub(crate) struct Teardown {
    pipeline: Option<Pipeline>,
    events: Option<EventDispatcher>,
}

impl Teardown {
    pub fn run(self) {
        if let Some(pipeline) = self.pipeline {
            pipeline.shutdown();
        }
        // 最后一个事件（stopped / failed）分发完才返回
        if let Some(events) = self.events {
            events.close();
        }
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 所有方法都可以在任意线程调用（包括回调内部），立即返回；
/// 加载、seek 的结果通过 [`PlayerDelegate`] 异步通知。
pub struct PlaybackManager {
    core: Arc<PlayerCore>,
}

impl PlaybackManager {
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        info!("{} 🎮 创建播放管理器", log_ctx());
        Self {
            core: Arc::new(PlayerCore {
                config,
                state: Mutex::new(CoreState::new()),
            }),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.core.config
    }

    /// 加载媒体（立即返回，结果经回调通知）
    ///
    /// 正在进行中的上一次加载会先进入 `Stopped`。
    pub fn load(&self, url: &str, delegate: impl PlayerDelegate + 'static) {
        self.load_location(MediaLocation::from_url(url), delegate)
    }

    pub fn load_location(&self, location: MediaLocation, delegate: impl PlayerDelegate + 'static) {
        info!("{} 📂 加载: {}", log_ctx(), location);
        let previous = {
            let mut core = self.core.state.lock();
            let previous = core
                .playback
                .on_stop()
                .and_then(|next| core.transition(next));

            core.generation += 1;
            let generation = core.generation;
            let stats = Arc::new(StatsCounters::default());
            core.stats = stats.clone();
            core.source = None;
            core.last_position = 0.0;
            core.events = Some(EventDispatcher::spawn(Box::new(delegate), generation));
            core.transition(PlaybackState::Loading { autoplay: false });

            // 加载线程不 join，被取代后按代数丢弃结果自行退出
            let loader_core = self.core.clone();
            let spawned = thread::Builder::new()
                .name(format!("myy-load-{}", generation))
                .spawn(move || run_loader(loader_core, location, generation, stats));
            match spawned {
                Ok(_detached) => previous,
                Err(e) => {
                    error!("{} ❌ 无法创建加载线程: {}", log_ctx(), e);
                    let failed = core.transition(PlaybackState::Failed(PlayerError::Other(
                        format!("无法创建加载线程: {}", e),
                    )));
                    drop(core);
                    if let Some(t) = failed {
                        t.run();
                    }
                    previous
                }
            }
        };

        if let Some(t) = previous {
            t.run();
        }
    }

    /// 开始或继续播放（重新锚定时钟，不重新 seek）
    pub fn play(&self) {
        let mut core = self.core.state.lock();
        let Some(next) = core.playback.on_play() else {
            debug!("{} play 在 {} 状态下忽略", log_ctx(), core.playback.name());
            return;
        };
        if next == PlaybackState::Playing {
            if let Some(pipeline) = &core.pipeline {
                pipeline.clock.resume();
            }
        }
        core.transition(next);
        Self::notify(&core);
    }

    /// 暂停（不清空队列）
    pub fn pause(&self) {
        let mut core = self.core.state.lock();
        let Some(next) = core.playback.on_pause() else {
            debug!("{} pause 在 {} 状态下忽略", log_ctx(), core.playback.name());
            return;
        };
        if next == PlaybackState::Paused {
            if let Some(pipeline) = &core.pipeline {
                pipeline.clock.pause();
            }
        }
        core.transition(next);
        Self::notify(&core);
    }

    /// 停止并释放所有组件（等管线线程退出，不等仍在打开的加载；在回调里调用也安全）
    pub fn stop(&self) {
        let teardown = {
            let mut core = self.core.state.lock();
            core.playback
                .on_stop()
                .and_then(|next| core.transition(next))
        };
        if let Some(t) = teardown {
            t.run();
        }
    }

    /// 静音开关，不改变状态、不打断节奏
    pub fn mute(&self, muted: bool) {
        let mut core = self.core.state.lock();
        if !core.playback.accepts_mute() {
            debug!("{} mute 在 {} 状态下忽略", log_ctx(), core.playback.name());
            return;
        }
        if core.muted != muted {
            info!("{} 🔇 静音: {}", log_ctx(), muted);
            core.muted = muted;
            Self::notify(&core);
        }
    }

    /// 跳转（flush-then-refill），目标夹到 `[0, duration]`
    pub fn seek(&self, position: f64) {
        let teardown = {
            let mut core = self.core.state.lock();
            let Some(pipeline) = core.pipeline.as_ref() else {
                debug!("{} seek 在 {} 状态下忽略", log_ctx(), core.playback.name());
                return;
            };
            if !pipeline.seekable {
                warn!("{} ⚠️ 当前媒体不支持 seek", log_ctx());
                return;
            }
            let duration = core.source.as_ref().map_or(0.0, |s| s.duration);
            let target = if duration > 0.0 {
                position.clamp(0.0, duration)
            } else {
                position.max(0.0)
            };
            let Some(next) = core.playback.on_seek(target) else {
                debug!("{} seek 在 {} 状态下忽略", log_ctx(), core.playback.name());
                return;
            };

            info!("{} ⏩ Seek 到 {:.3}s", log_ctx(), target);
            match pipeline.seek(target) {
                Ok(()) => {
                    core.transition(next);
                    None
                }
                Err(e) => {
                    error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                    core.transition(PlaybackState::Failed(e))
                }
            }
        };
        if let Some(t) = teardown {
            t.run();
        }
    }

    /// `paused` 属性
    pub fn is_paused(&self) -> bool {
        self.core.state.lock().playback.is_paused()
    }

    /// 写 `paused` 等价于调用 pause() / play()
    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.core.state.lock().muted
    }

    pub fn state(&self) -> PlaybackState {
        self.core.state.lock().playback.clone()
    }

    /// 当前播放位置（秒）
    pub fn position(&self) -> f64 {
        let core = self.core.state.lock();
        let position = match &core.pipeline {
            Some(pipeline) => pipeline.clock.now(),
            None => core.last_position,
        };
        match core.source.as_ref().map(|s| s.duration) {
            Some(duration) if duration > 0.0 => position.clamp(0.0, duration),
            _ => position.max(0.0),
        }
    }

    pub fn duration(&self) -> f64 {
        self.core
            .state
            .lock()
            .source
            .as_ref()
            .map_or(0.0, |s| s.duration)
    }

    pub fn media_source(&self) -> Option<Arc<MediaSource>> {
        self.core.state.lock().source.clone()
    }

    /// 本次加载的统计
    pub fn stats(&self) -> PlaybackStats {
        self.core.state.lock().stats.snapshot()
    }

    fn notify(core: &CoreState) {
        if let Some(pipeline) = &core.pipeline {
            pipeline.notify();
        }
    }
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 加载线程：打开媒体（可能很慢）后在锁内确认这次加载仍然有效再启动管线
fn run_loader(
    core: Arc<PlayerCore>,
    location: MediaLocation,
    generation: u64,
    stats: Arc<StatsCounters>,
) {
    let prepared = PreparedPipeline::prepare(&core.config, &location, stats.clone());

    let mut state = core.state.lock();
    let current = state.generation == generation
        && matches!(state.playback, PlaybackState::Loading { .. });
    if !current {
        drop(state);
        info!("{} 🗑 加载已被取消，丢弃: {}", log_ctx(), location);
        drop(prepared);
        return;
    }

    let started = prepared.and_then(|prepared| {
        let media = prepared.media().clone();
        info!("{} 📋 {}", log_ctx(), media.summary());
        state.source = Some(media);
        prepared.start(core.clone(), generation, stats)
    });

    match started {
        Ok(pipeline) => {
            state.pipeline = Some(pipeline);
        }
        Err(e) => {
            error!("{} ❌ 加载失败: {}", log_ctx(), e);
            let teardown = state.transition(PlaybackState::Failed(e));
            drop(state);
            if let Some(t) = teardown {
                t.run();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioOutputMode, MediaKind};
    use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
    use std::time::{Duration, Instant};

    fn test_config() -> PlayerConfig {
        PlayerConfig {
            audio_output: AudioOutputMode::Virtual,
            tick_interval_ms: 100,
            ..PlayerConfig::default()
        }
    }

    fn load(url: &str) -> (PlaybackManager, Receiver<PlayerEvent>) {
        let manager = PlaybackManager::with_config(test_config());
        let (tx, rx) = unbounded();
        manager.load(url, tx);
        (manager, rx)
    }

    /// 收集事件直到 `until` 返回 true（包含该事件）
    fn collect_until(
        rx: &Receiver<PlayerEvent>,
        timeout: Duration,
        mut until: impl FnMut(&PlayerEvent) -> bool,
    ) -> Vec<PlayerEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(event) => {
                    let done = until(&event);
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                Err(RecvTimeoutError::Timeout) => panic!(
                    "等待事件超时，已收到: {:?}",
                    events.iter().map(|e| e.name()).collect::<Vec<_>>()
                ),
                Err(RecvTimeoutError::Disconnected) => return events,
            }
        }
    }

    fn wait_for(rx: &Receiver<PlayerEvent>, name: &str) -> Vec<PlayerEvent> {
        collect_until(rx, Duration::from_secs(10), |e| e.name() == name)
    }

    fn names(events: &[PlayerEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| e.name())
            .filter(|n| *n != "tick" && *n != "present_frame")
            .collect()
    }

    fn frame_pts(events: &[PlayerEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::PresentFrame(f) => Some(f.pts),
                _ => None,
            })
            .collect()
    }

    fn tick_positions(events: &[PlayerEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::Tick { position, .. } => Some(*position),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plays_to_end_with_final_tick_then_stops() {
        let (manager, rx) = load("testsrc://?duration=1&fps=30");
        let head = wait_for(&rx, "ready");
        assert_eq!(names(&head), vec!["loading", "ready"]);
        if let Some(PlayerEvent::Ready(source)) = head.last() {
            assert!(source.has_video());
            assert!(source.has_audio());
            assert!((source.duration - 1.0).abs() < 1e-9);
        }

        manager.play();
        let events = wait_for(&rx, "stopped");
        assert_eq!(names(&events), vec!["playing", "stopped"]);

        let ticks = tick_positions(&events);
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|w| w[0] < w[1]), "进度必须严格递增: {:?}", ticks);
        // 结束前最后一个事件是 tick(duration, duration)
        let last_tick = events
            .iter()
            .rev()
            .find(|e| matches!(e, PlayerEvent::Tick { .. }));
        match last_tick {
            Some(PlayerEvent::Tick { position, duration }) => {
                assert_eq!(*position, 1.0);
                assert_eq!(*duration, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        let pts = frame_pts(&events);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        let stats = manager.stats();
        assert_eq!(stats.presented_frames + stats.late_frames, 30);
        assert_eq!(manager.state(), PlaybackState::Stopped);
        assert!((manager.position() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn video_only_clip_uses_free_running_clock() {
        let (manager, rx) = load("testsrc://?duration=0.5&fps=20&audio=0");
        wait_for(&rx, "ready");
        let source = manager.media_source().map(|s| s.active_streams());
        assert_eq!(source, Some(vec![0]));
        manager.play();
        let events = wait_for(&rx, "stopped");
        assert_eq!(frame_pts(&events).len() as u64 + manager.stats().late_frames, 10);
    }

    #[test]
    fn pause_and_resume_keep_presentation_order() {
        let (manager, rx) = load("testsrc://?duration=2&fps=30");
        wait_for(&rx, "ready");
        manager.play();
        let mut events = collect_until(&rx, Duration::from_secs(10), |e| {
            matches!(e, PlayerEvent::PresentFrame(f) if f.pts >= 0.5)
        });

        manager.pause();
        assert!(manager.is_paused());
        let paused_at = manager.position();
        events.extend(wait_for(&rx, "paused"));
        thread::sleep(Duration::from_millis(300));
        // 暂停期间没有新的帧，位置不动
        let during: Vec<_> = rx.try_iter().collect();
        assert!(frame_pts(&during).is_empty());
        assert!((manager.position() - paused_at).abs() < 1e-9);

        manager.set_paused(false);
        assert!(!manager.is_paused());
        events.extend(wait_for(&rx, "stopped"));

        assert_eq!(names(&events), vec!["playing", "paused", "playing", "stopped"]);
        let pts = frame_pts(&events);
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(manager.stats().presented_frames + manager.stats().late_frames, 60);
    }

    #[test]
    fn repeated_play_and_pause_emit_once() {
        let (manager, rx) = load("testsrc://?duration=2");
        wait_for(&rx, "ready");
        manager.play();
        manager.play();
        manager.pause();
        manager.pause();
        manager.stop();
        manager.stop();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(names(&events), vec!["playing", "paused", "stopped"]);
        assert_eq!(manager.state(), PlaybackState::Stopped);

        // 终态之后的命令都是空操作
        manager.play();
        manager.seek(1.0);
        manager.mute(true);
        assert!(!manager.is_muted());
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn seek_presents_frame_at_target() {
        let (manager, rx) = load("testsrc://?duration=10&fps=30&gop=30");
        wait_for(&rx, "ready");
        manager.play();
        collect_until(&rx, Duration::from_secs(10), |e| {
            matches!(e, PlayerEvent::PresentFrame(_))
        });

        manager.seek(7.5);
        // seek 完成时重新发出 playing，之前收到的帧都是 seek 之前分发的
        wait_for(&rx, "playing");
        let events = collect_until(&rx, Duration::from_secs(10), |e| {
            matches!(e, PlayerEvent::PresentFrame(_))
        });
        let first = frame_pts(&events).last().copied().unwrap_or_default();
        assert!((7.4..=7.6).contains(&first), "first={}", first);
        assert!((first - 7.5).abs() <= 1.0 / 30.0 + 1e-6, "first={}", first);

        // seek 之后不会再出现 seek 之前的帧
        let after = collect_until(&rx, Duration::from_secs(10), |e| {
            matches!(e, PlayerEvent::Tick { .. })
        });
        assert!(frame_pts(&after).iter().all(|pts| *pts >= 7.4));
        assert!(tick_positions(&after).iter().all(|p| *p >= 7.4));
        manager.stop();
    }

    #[test]
    fn seek_while_paused_stays_paused() {
        let (manager, rx) = load("testsrc://?duration=4");
        wait_for(&rx, "ready");
        manager.play();
        manager.pause();
        wait_for(&rx, "paused");

        manager.seek(2.0);
        assert!(manager.is_paused());
        wait_for(&rx, "paused");
        assert_eq!(manager.state(), PlaybackState::Paused);
        assert!((manager.position() - 2.0).abs() < 1e-9);
        manager.stop();
    }

    #[test]
    fn seek_is_clamped_to_duration() {
        let (manager, rx) = load("testsrc://?duration=1");
        wait_for(&rx, "ready");
        manager.seek(50.0);
        assert_eq!(manager.position(), 1.0);
        manager.seek(-3.0);
        assert_eq!(manager.position(), 0.0);
        manager.stop();
    }

    #[test]
    fn seek_on_unseekable_source_is_ignored() {
        let (manager, rx) = load("testsrc://?duration=2&seekable=0");
        wait_for(&rx, "ready");
        manager.seek(1.0);
        assert_eq!(manager.state(), PlaybackState::Ready);
        manager.stop();
    }

    #[test]
    fn mute_keeps_cadence() {
        let (manager, rx) = load("testsrc://?duration=1&fps=30");
        wait_for(&rx, "ready");
        manager.mute(true);
        assert!(manager.is_muted());
        manager.play();
        let events = wait_for(&rx, "stopped");
        assert_eq!(names(&events), vec!["playing", "stopped"]);
        let stats = manager.stats();
        assert_eq!(stats.presented_frames + stats.late_frames, 30);
    }

    #[test]
    fn corrupt_packet_is_absorbed() {
        let (manager, rx) = load("testsrc://?duration=1&fps=30&corrupt=12");
        wait_for(&rx, "ready");
        manager.play();
        let events = wait_for(&rx, "stopped");
        assert!(!names(&events).contains(&"failed"));
        let stats = manager.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.presented_frames + stats.late_frames, 29);
    }

    #[test]
    fn unsupported_codec_fails_on_load() {
        let (manager, rx) = load("testsrc://?codec=h999");
        let events = wait_for(&rx, "failed");
        assert_eq!(names(&events), vec!["loading", "failed"]);
        match events.last() {
            Some(PlayerEvent::Failed(PlayerError::Open(_))) => {}
            other => panic!("expected open error, got {:?}", other),
        }
        assert!(matches!(manager.state(), PlaybackState::Failed(PlayerError::Open(_))));

        // Failed 之后 play 不会产生 playing
        manager.play();
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn fatal_decode_error_fails_playback() {
        let (manager, rx) = load("testsrc://?duration=2&fatal_decode=20");
        wait_for(&rx, "ready");
        manager.play();
        let events = wait_for(&rx, "failed");
        assert!(matches!(events.last(), Some(PlayerEvent::Failed(PlayerError::Decode { .. }))));
        assert!(!names(&events).contains(&"stopped"));
        let pts = frame_pts(&events);
        assert!(pts.iter().all(|pts| *pts < 20.0 / 30.0));
        assert!(manager.state().is_terminal());
    }

    fn expect_demux_failure(rx: &Receiver<PlayerEvent>) {
        let events = wait_for(rx, "failed");
        let names = names(&events);
        assert_eq!(names.first(), Some(&"loading"));
        assert!(!names.contains(&"stopped"));
        match events.last() {
            Some(PlayerEvent::Failed(PlayerError::Demux(_))) => {}
            other => panic!("expected demux error, got {:?}", other),
        }
    }

    #[test]
    fn unreadable_source_fails_playback() {
        let (manager, rx) = load("testsrc://?duration=2&fail_read=60");
        manager.play();
        expect_demux_failure(&rx);
        assert!(matches!(manager.state(), PlaybackState::Failed(PlayerError::Demux(_))));
    }

    #[test]
    fn persistent_corruption_fails_playback() {
        // 连续损坏的包超过错误预算
        let budget = test_config().max_consecutive_errors as u64;
        let bad: String = (40..=40 + budget)
            .map(|frame| format!("&bad_packet={}", frame))
            .collect();
        let (manager, rx) = load(&format!("testsrc://?duration=3&fps=30&audio=0{}", bad));
        manager.play();
        expect_demux_failure(&rx);
        let stats = manager.stats();
        assert_eq!(stats.skipped_packets, budget + 1);
    }

    #[test]
    fn stop_does_not_wait_for_a_slow_open() {
        let (manager, rx) = load("testsrc://?duration=1&open_delay_ms=2000");
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        manager.stop();
        assert!(start.elapsed() < Duration::from_millis(100), "stop took {:?}", start.elapsed());
        assert_eq!(manager.state(), PlaybackState::Stopped);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(names(&events), vec!["loading", "stopped"]);

        // 新的加载同样不被旧的打开拖住
        let (tx, second) = unbounded();
        let start = Instant::now();
        manager.load("testsrc://?duration=1", tx);
        assert!(start.elapsed() < Duration::from_millis(100));
        wait_for(&second, "ready");
        assert!(manager.media_source().is_some());
    }

    #[test]
    fn stop_during_loading_discards_the_load() {
        let (manager, rx) = load("testsrc://?duration=1&open_delay_ms=200");
        manager.stop();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(names(&events), vec!["loading", "stopped"]);
        thread::sleep(Duration::from_millis(300));
        assert!(rx.try_iter().next().is_none());
        assert!(manager.media_source().is_none());
    }

    #[test]
    fn play_during_loading_starts_when_ready() {
        let (manager, rx) = load("testsrc://?duration=1&open_delay_ms=50");
        manager.play();
        assert!(matches!(manager.state(), PlaybackState::Loading { autoplay: true }));
        let events = wait_for(&rx, "stopped");
        assert_eq!(names(&events), vec!["loading", "ready", "playing", "stopped"]);
    }

    #[test]
    fn reload_stops_previous_load() {
        let manager = PlaybackManager::with_config(test_config());
        let (first_tx, first_rx) = unbounded();
        manager.load("testsrc://?duration=5", first_tx);
        wait_for(&first_rx, "ready");

        let (second_tx, second_rx) = unbounded();
        manager.load("testsrc://?duration=1&audio=0", second_tx);
        let first = wait_for(&first_rx, "stopped");
        assert_eq!(names(&first).last(), Some(&"stopped"));

        wait_for(&second_rx, "ready");
        let streams = manager.media_source().map(|s| {
            s.streams.iter().map(|d| d.kind).collect::<Vec<_>>()
        });
        assert_eq!(streams, Some(vec![MediaKind::Video]));
        assert_eq!(manager.duration(), 1.0);
    }

    #[test]
    fn stop_from_delegate_callback() {
        struct StopOnPlaying {
            manager: Arc<Mutex<Option<Arc<PlaybackManager>>>>,
            tx: crossbeam_channel::Sender<&'static str>,
        }
        impl PlayerDelegate for StopOnPlaying {
            fn playing(&self) {
                if let Some(manager) = self.manager.lock().as_ref() {
                    manager.stop();
                }
            }
            fn stopped(&self) {
                let _ = self.tx.send("stopped");
            }
        }

        let manager = Arc::new(PlaybackManager::with_config(test_config()));
        let slot = Arc::new(Mutex::new(Some(manager.clone())));
        let (tx, rx) = unbounded();
        manager.load(
            "testsrc://?duration=2&open_delay_ms=20",
            StopOnPlaying {
                manager: slot.clone(),
                tx,
            },
        );
        manager.play();
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok("stopped"));
        assert_eq!(manager.state(), PlaybackState::Stopped);
        slot.lock().take();
    }
}
