use crate::core::{
    AudioFrame, ClockSource, PlaybackClock, PlaybackState, PlayerError, StatsCounters, VideoFrame,
};
use crate::player::audio_output::{self, AudioSink, SinkPlan};
use crate::player::delegate::PlayerEvent;
use crate::player::demuxer_thread::{log_ctx, PipelineShared};
use crate::player::frame_queue::{FrameQueue, Wakeup};
use crate::player::manager::{CoreState, PlayerCore};
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MIN_WAIT: Duration = Duration::from_millis(1);

/// 一轮播放之后的去向
enum Cycle {
    Wait(Duration),
    Ended,
}

/// 展示线程：按时钟取出到期的帧交给宿主，并节流地上报进度
///
/// 每一轮都在控制器锁内完成"读状态 + 分发"，因此不会有帧跨过
/// 暂停、seek 或停止的状态切换被分发出去。没有到期的帧时在 [`Wakeup`] 上
/// 等待下一帧的时间或控制命令，不轮询。
pub(crate) struct PresentationDriver {
    pub core: Arc<PlayerCore>,
    pub generation: u64,
    pub shared: Arc<PipelineShared>,
    pub video: Option<Arc<FrameQueue<VideoFrame>>>,
    pub audio: Option<Arc<FrameQueue<AudioFrame>>>,
    pub clock: PlaybackClock,
    pub wakeup: Arc<Wakeup>,
    pub faults: Receiver<PlayerError>,
    pub plan: SinkPlan,
    pub duration: f64,
    pub stats: Arc<StatsCounters>,
    pub tolerance: f64,
    pub audio_lead: f64,
    pub late_threshold: f64,
    pub tick_interval: Duration,
}

impl PresentationDriver {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("myy-present-{}", self.generation))
            .spawn(move || DriverLoop::new(self).run())
    }
}

/// 只属于展示线程的运行时状态（音频输出不能跨线程）
struct DriverLoop {
    d: PresentationDriver,
    sink: Option<Box<dyn AudioSink>>,
    sink_running: bool,
    sink_muted: bool,
    serial: u64,
    last_tick: Option<Instant>,
    last_tick_position: Option<f64>,
}

impl DriverLoop {
    fn new(d: PresentationDriver) -> Self {
        let serial = d.shared.serial();
        Self {
            d,
            sink: None,
            sink_running: false,
            sink_muted: false,
            serial,
            last_tick: None,
            last_tick_position: None,
        }
    }

    fn run(mut self) {
        info!("{} 🎬 展示线程启动", log_ctx());

        if self.d.audio.is_some() {
            match audio_output::open_sink(&self.d.plan) {
                Ok(mut sink) => {
                    sink.pause();
                    info!("{} 🔊 音频输出: {}", log_ctx(), sink.description());
                    self.sink = Some(sink);
                }
                Err(e) => {
                    error!("{} ❌ 打开音频输出失败: {}", log_ctx(), e);
                    self.fail(e);
                    return;
                }
            }
        }

        let core_handle = self.d.core.clone();
        loop {
            let mut core = core_handle.state.lock();
            if core.generation != self.d.generation || !core.playback.is_active() {
                break;
            }

            if let Ok(err) = self.d.faults.try_recv() {
                error!("{} ❌ 管线错误: {}", log_ctx(), err);
                let teardown = core.transition(PlaybackState::Failed(err));
                drop(core);
                if let Some(t) = teardown {
                    t.run();
                }
                break;
            }

            let seen = self.d.wakeup.generation();
            self.reconcile(&core);

            let wait = match core.playback.clone() {
                PlaybackState::Loading { autoplay } => {
                    if self.buffered_enough() {
                        info!("{} ✅ 首帧已缓冲", log_ctx());
                        core.transition(PlaybackState::Ready);
                        if autoplay {
                            self.d.clock.resume();
                            core.transition(PlaybackState::Playing);
                        }
                        Some(Duration::ZERO)
                    } else {
                        Some(self.d.tick_interval)
                    }
                }
                PlaybackState::Seeking { target, .. } => {
                    if self.buffered_enough() {
                        if let Some(next) = core.playback.on_seek_complete() {
                            debug!("{} 🎯 seek 完成: {:.3}s", log_ctx(), target);
                            self.d.clock.anchor(target);
                            if next == PlaybackState::Playing {
                                self.d.clock.resume();
                            }
                            core.transition(next);
                        }
                        Some(Duration::ZERO)
                    } else {
                        Some(self.d.tick_interval)
                    }
                }
                PlaybackState::Playing => match self.play_cycle(&core) {
                    Cycle::Wait(wait) => Some(wait),
                    Cycle::Ended => {
                        info!("{} 🏁 播放结束", log_ctx());
                        core.emit(PlayerEvent::Tick {
                            position: self.d.duration,
                            duration: self.d.duration,
                        });
                        let teardown = core.transition(PlaybackState::Stopped);
                        drop(core);
                        if let Some(t) = teardown {
                            t.run();
                        }
                        break;
                    }
                },
                // Ready / Paused：只有命令能改变什么，等通知即可
                _ => None,
            };

            // 状态可能刚刚改变，让音频输出跟上
            self.reconcile(&core);
            drop(core);

            match wait {
                Some(wait) if wait.is_zero() => {}
                Some(wait) => {
                    self.d.wakeup.wait_since(seen, wait);
                }
                None => self.d.wakeup.wait_for_notify(seen),
            }
        }

        self.sink.take();
        info!("{} 🎬 展示线程退出", log_ctx());
    }

    fn fail(&self, err: PlayerError) {
        let teardown = {
            let mut core = self.d.core.state.lock();
            if core.generation != self.d.generation {
                return;
            }
            core.playback
                .on_error(err)
                .and_then(|next| core.transition(next))
        };
        if let Some(t) = teardown {
            t.run();
        }
    }

    /// 让音频输出与状态、静音和 seek 代数保持一致
    fn reconcile(&mut self, core: &CoreState) {
        let serial = self.d.shared.serial();
        if serial != self.serial {
            self.serial = serial;
            if let Some(sink) = self.sink.as_mut() {
                sink.clear();
            }
            if self.d.audio.is_some() {
                self.d.clock.set_source(ClockSource::Audio);
            }
            // seek 之后进度允许回退
            self.last_tick = None;
            self.last_tick_position = None;
        }

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let want_running = core.playback == PlaybackState::Playing;
        if want_running != self.sink_running {
            if want_running {
                sink.resume();
            } else {
                sink.pause();
            }
            self.sink_running = want_running;
        }
        if core.muted != self.sink_muted {
            sink.set_muted(core.muted);
            self.sink_muted = core.muted;
        }
    }

    /// 每条活动流都已有帧（或已结束），或者任一队列已满
    fn buffered_enough(&self) -> bool {
        let mut all_ready = true;
        let mut any_full = false;
        if let Some(q) = &self.d.video {
            all_ready &= q.has_buffered() || q.is_finished();
            any_full |= q.is_full();
        }
        if let Some(q) = &self.d.audio {
            all_ready &= q.has_buffered() || q.is_finished();
            any_full |= q.is_full();
        }
        all_ready || any_full
    }

    fn play_cycle(&mut self, core: &CoreState) -> Cycle {
        self.feed_audio();

        if let Some(q) = &self.d.video {
            loop {
                let now = self.d.clock.now();
                let Some(frame) = q.pop_due(now, self.d.tolerance) else {
                    break;
                };
                if now - frame.pts > self.d.late_threshold {
                    self.d.stats.frame_late();
                    debug!(
                        "{} ⏭ 丢弃迟到帧 pts={:.3}s (now={:.3}s)",
                        log_ctx(),
                        frame.pts,
                        now
                    );
                    continue;
                }
                self.d.stats.frame_presented();
                core.emit(PlayerEvent::PresentFrame(frame));
            }
        }

        let now = self.d.clock.now();
        self.maybe_tick(core, now);

        let audio_idle = self.d.audio.as_ref().map_or(true, |q| q.is_drained())
            && self.sink.as_mut().map_or(true, |s| s.buffered() <= 0.0);
        let video_idle = self.d.video.as_ref().map_or(true, |q| q.is_drained());
        if audio_idle && video_idle {
            let last_end = [
                self.d.video.as_ref().map(|q| q.last_end()),
                self.d.audio.as_ref().map(|q| q.last_end()),
            ]
            .into_iter()
            .flatten()
            .fold(0.0_f64, f64::max);
            if now >= last_end - 1e-6 {
                return Cycle::Ended;
            }
            return Cycle::Wait(self.bounded_wait(last_end - now));
        }

        let mut wait = self.until_next_tick().as_secs_f64();
        if let Some(pts) = self.d.video.as_ref().and_then(|q| q.peek_pts()) {
            wait = wait.min(pts - self.d.tolerance - now);
        }
        if let Some(pts) = self.d.audio.as_ref().and_then(|q| q.peek_pts()) {
            wait = wait.min(pts - self.d.audio_lead - now);
        }
        Cycle::Wait(self.bounded_wait(wait))
    }

    /// 写入到期（含提前量）的音频，并用实际播放位置校正主时钟
    fn feed_audio(&mut self) {
        let (Some(q), Some(sink)) = (&self.d.audio, self.sink.as_mut()) else {
            return;
        };
        let now = self.d.clock.now();
        while let Some(frame) = q.pop_due(now, self.d.audio_lead) {
            sink.write(&frame);
        }

        if sink.buffered() > 0.0 {
            self.d.clock.set_source(ClockSource::Audio);
            if let Some(played) = sink.played_position() {
                self.d.clock.sync_to_audio(played);
            }
        } else {
            // 欠载或音频已结束，时钟自由运行，视频不被卡住
            self.d.clock.set_source(ClockSource::Free);
        }
    }

    fn maybe_tick(&mut self, core: &CoreState, now: f64) {
        if self.until_next_tick() > Duration::ZERO {
            return;
        }
        self.last_tick = Some(Instant::now());
        let position = now.max(0.0);
        // 结尾的那一次由播放结束统一发出
        if self.d.duration > 0.0 && position >= self.d.duration {
            return;
        }
        if self.last_tick_position.map_or(false, |last| position <= last) {
            return;
        }
        self.last_tick_position = Some(position);
        core.emit(PlayerEvent::Tick {
            position,
            duration: self.d.duration,
        });
    }

    fn until_next_tick(&self) -> Duration {
        match self.last_tick {
            Some(at) => self.d.tick_interval.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn bounded_wait(&self, seconds: f64) -> Duration {
        let max = self.d.tick_interval.max(MIN_WAIT);
        if !seconds.is_finite() || seconds <= 0.0 {
            return MIN_WAIT;
        }
        Duration::from_secs_f64(seconds).clamp(MIN_WAIT, max)
    }
}
