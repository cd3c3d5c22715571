use crate::core::Timed;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// 唤醒信号：帧入队、状态变化、故障上报都会唤醒展示线程
///
/// 用一个递增的代数代替布尔标志，等待方先记下代数再放锁，
/// 之后的任何通知都不会丢失。
#[derive(Default)]
pub struct Wakeup {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// 等待代数变化或超时，返回是否被唤醒
    pub fn wait_since(&self, seen: u64, timeout: Duration) -> bool {
        let mut generation = self.generation.lock();
        if *generation != seen {
            return true;
        }
        let result = self.cond.wait_for(&mut generation, timeout);
        !result.timed_out() || *generation != seen
    }

    /// 无超时地等待代数变化
    pub fn wait_for_notify(&self, seen: u64) {
        let mut generation = self.generation.lock();
        while *generation == seen {
            self.cond.wait(&mut generation);
        }
    }
}

/// `push` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// 帧属于旧的 seek 代，已丢弃
    Stale,
    /// 队列已关闭（停止播放）
    Closed,
}

struct QueueInner<T> {
    frames: VecDeque<T>,
    serial: u64,
    finished: bool,
    closed: bool,
    last_pts: Option<f64>,
    last_end: f64,
}

/// 解码帧队列 - 有界、按 PTS 顺序，提供背压和 seek 时的整体清空
pub struct FrameQueue<T> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    space_available: Condvar,
    wakeup: Arc<Wakeup>,
}

impl<T: Timed> FrameQueue<T> {
    pub fn new(name: &'static str, capacity: usize, wakeup: Arc<Wakeup>) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                serial: 0,
                finished: false,
                closed: false,
                last_pts: None,
                last_end: 0.0,
            }),
            space_available: Condvar::new(),
            wakeup,
        }
    }

    /// 入队，队列满时阻塞直到有空位、seek 或关闭
    pub fn push(&self, frame: T, serial: u64) -> PushOutcome {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return PushOutcome::Closed;
            }
            if inner.serial != serial {
                return PushOutcome::Stale;
            }
            if inner.frames.len() < self.capacity {
                break;
            }
            self.space_available.wait(&mut inner);
        }

        let pts = frame.pts();
        if let Some(last) = inner.last_pts {
            if pts < last {
                warn!(
                    "⚠️ {} 队列收到乱序帧: {:.3}s < {:.3}s",
                    self.name, pts, last
                );
            }
        }
        inner.last_pts = Some(pts);
        inner.last_end = inner.last_end.max(frame.end());
        inner.frames.push_back(frame);
        drop(inner);

        self.wakeup.notify();
        PushOutcome::Queued
    }

    /// 取出队首帧，仅当它的 PTS <= now + tolerance
    pub fn pop_due(&self, now: f64, tolerance: f64) -> Option<T> {
        let mut inner = self.inner.lock();
        let due = inner
            .frames
            .front()
            .map_or(false, |f| f.pts() <= now + tolerance);
        if !due {
            return None;
        }
        let frame = inner.frames.pop_front();
        self.space_available.notify_all();
        frame
    }

    pub fn peek_pts(&self) -> Option<f64> {
        self.inner.lock().frames.front().map(|f| f.pts())
    }

    /// 清空并切换到新的 seek 代
    pub fn flush(&self, serial: u64) {
        let mut inner = self.inner.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        inner.serial = serial;
        inner.finished = false;
        inner.last_pts = None;
        inner.last_end = 0.0;
        drop(inner);

        if dropped > 0 {
            debug!("🧹 {} 队列清空 {} 帧 (serial {})", self.name, dropped, serial);
        }
        self.space_available.notify_all();
        self.wakeup.notify();
    }

    /// 标记本代数据已全部入队
    pub fn finish(&self, serial: u64) {
        let mut inner = self.inner.lock();
        if inner.serial == serial && !inner.closed {
            inner.finished = true;
        }
        drop(inner);
        self.wakeup.notify();
    }

    /// 关闭队列，唤醒所有阻塞的生产者
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.frames.clear();
        drop(inner);
        self.space_available.notify_all();
        self.wakeup.notify();
    }

    pub fn has_buffered(&self) -> bool {
        !self.inner.lock().frames.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// 本代已结束且队列为空
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.finished && inner.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().frames.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 本代已入队帧的最大结束时间
    pub fn last_end(&self) -> f64 {
        self.inner.lock().last_end
    }

    pub fn serial(&self) -> u64 {
        self.inner.lock().serial
    }
}
