use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 主时钟来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// 按实际音频消耗推进（有音频流时）
    Audio,
    /// 自由运行的计时器（纯视频，或音频已播完）
    Free,
}

/// 时钟参考点：已播放位置 + 最后一次锚定的墙钟时刻
///
/// 展示决策只能通过它读取时间，不能直接使用墙钟。
#[derive(Debug, Clone, Copy)]
pub struct ClockReference {
    pub position: f64,
    pub anchored_at: Instant,
}

impl ClockReference {
    fn at(&self, instant: Instant, running: bool) -> f64 {
        if running {
            let elapsed = instant.saturating_duration_since(self.anchored_at);
            self.position + elapsed.as_secs_f64()
        } else {
            self.position
        }
    }
}

struct ClockInner {
    reference: ClockReference,
    running: bool,
    source: ClockSource,
}

impl ClockInner {
    fn now(&self) -> f64 {
        self.reference.at(Instant::now(), self.running)
    }

    fn reanchor(&mut self, position: f64) {
        self.reference = ClockReference {
            position,
            anchored_at: Instant::now(),
        };
    }
}

/// 播放时钟 - 用于音视频同步（单位：秒）
///
/// 所有修改在一把锁内完成，锚定与读取互斥，读取方不会看到中间状态。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                reference: ClockReference {
                    position: 0.0,
                    anchored_at: Instant::now(),
                },
                running: false,
                source: ClockSource::Free,
            })),
        }
    }

    /// 当前播放时间（秒）
    pub fn now(&self) -> f64 {
        self.inner.lock().now()
    }

    /// 重新锚定到指定位置（seek、暂停恢复时使用），不改变运行状态
    pub fn anchor(&self, position: f64) {
        self.inner.lock().reanchor(position.max(0.0));
    }

    /// 开始/继续走时
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            let position = inner.reference.position;
            inner.reanchor(position);
            inner.running = true;
        }
    }

    /// 暂停：冻结在当前位置
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            let position = inner.now();
            inner.reanchor(position);
            inner.running = false;
        }
    }

    /// 用音频实际播放位置校正时钟（仅音频主时钟且运行中生效）
    pub fn sync_to_audio(&self, played: f64) {
        let mut inner = self.inner.lock();
        if inner.source == ClockSource::Audio && inner.running {
            inner.reanchor(played.max(0.0));
        }
    }

    /// 切换主时钟来源，切换点保持时间连续
    pub fn set_source(&self, source: ClockSource) {
        let mut inner = self.inner.lock();
        if inner.source != source {
            let position = inner.now();
            inner.reanchor(position);
            inner.source = source;
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn paused_clock_does_not_advance() {
        let clock = PlaybackClock::new();
        clock.anchor(3.0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), 3.0);
    }

    #[test]
    fn running_clock_advances_and_pause_freezes() {
        let clock = PlaybackClock::new();
        clock.anchor(1.0);
        clock.resume();
        thread::sleep(Duration::from_millis(30));
        clock.pause();
        let frozen = clock.now();
        assert!(frozen >= 1.03 && frozen < 1.5, "frozen at {frozen}");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), frozen);

        // 恢复后从冻结位置继续，不跳变
        clock.resume();
        assert!(clock.now() >= frozen);
        assert!(clock.now() < frozen + 0.1);
    }

    #[test]
    fn audio_sync_only_applies_to_audio_source() {
        let clock = PlaybackClock::new();
        clock.resume();
        clock.sync_to_audio(5.0);
        assert!(clock.now() < 1.0);

        clock.set_source(ClockSource::Audio);
        clock.sync_to_audio(5.0);
        assert!(clock.now() >= 5.0 && clock.now() < 5.1);

        clock.pause();
        clock.sync_to_audio(9.0);
        assert!(clock.now() < 5.1);
    }

    #[test]
    fn switching_source_keeps_time_continuous() {
        let clock = PlaybackClock::new();
        clock.set_source(ClockSource::Audio);
        clock.anchor(2.0);
        clock.resume();
        thread::sleep(Duration::from_millis(20));
        let before = clock.now();
        clock.set_source(ClockSource::Free);
        let after = clock.now();
        assert!(after >= before && after < before + 0.05, "{before} -> {after}");

        // 自由运行时音频位置不再影响时钟
        clock.sync_to_audio(0.5);
        assert!(clock.now() >= before);
    }

    #[test]
    fn anchor_clamps_negative() {
        let clock = PlaybackClock::new();
        clock.anchor(-2.0);
        assert_eq!(clock.now(), 0.0);
    }
}
