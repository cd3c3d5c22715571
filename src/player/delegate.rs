use crate::core::{MediaSource, PlayerError, VideoFrame};
use crate::player::demuxer_thread::{join_quietly, log_ctx};
use crossbeam_channel::{unbounded, Sender};
use log::{debug, error};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 播放回调（宿主实现，全部有默认空实现）
///
/// 回调在每次加载专属的分发线程上按顺序执行，回调里可以再调用播放器的方法。
pub trait PlayerDelegate: Send {
    /// 进入 Loading（每次加载一次）
    fn loading(&self) {}

    /// 媒体已打开、首帧已缓冲
    fn ready(&self, _source: &MediaSource) {}

    /// 终止性错误，至多一次
    fn failed(&self, _error: &PlayerError) {}

    /// 每次进入 Playing
    fn playing(&self) {}

    /// 每次进入 Paused
    fn paused(&self) {}

    /// 播放进度（已节流）
    fn tick(&self, _position: f64, _duration: f64) {}

    /// 展示一帧视频，帧只在回调期间有效
    fn present_frame(&self, _frame: &VideoFrame) {}

    /// 进入 Stopped（主动停止或自然播放结束）
    fn stopped(&self) {}
}

/// 与回调一一对应的事件
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Loading,
    Ready(Arc<MediaSource>),
    Failed(PlayerError),
    Playing,
    Paused,
    Tick { position: f64, duration: f64 },
    PresentFrame(VideoFrame),
    Stopped,
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Loading => "loading",
            PlayerEvent::Ready(_) => "ready",
            PlayerEvent::Failed(_) => "failed",
            PlayerEvent::Playing => "playing",
            PlayerEvent::Paused => "paused",
            PlayerEvent::Tick { .. } => "tick",
            PlayerEvent::PresentFrame(_) => "present_frame",
            PlayerEvent::Stopped => "stopped",
        }
    }

    /// 把事件交给回调
    pub fn dispatch(self, delegate: &dyn PlayerDelegate) {
        match self {
            PlayerEvent::Loading => delegate.loading(),
            PlayerEvent::Ready(source) => delegate.ready(&source),
            PlayerEvent::Failed(error) => delegate.failed(&error),
            PlayerEvent::Playing => delegate.playing(),
            PlayerEvent::Paused => delegate.paused(),
            PlayerEvent::Tick { position, duration } => delegate.tick(position, duration),
            PlayerEvent::PresentFrame(frame) => delegate.present_frame(&frame),
            PlayerEvent::Stopped => delegate.stopped(),
        }
    }
}

/// 通道即回调：宿主在自己的线程里接收事件
impl PlayerDelegate for Sender<PlayerEvent> {
    fn loading(&self) {
        let _ = self.send(PlayerEvent::Loading);
    }

    fn ready(&self, source: &MediaSource) {
        let _ = self.send(PlayerEvent::Ready(Arc::new(source.clone())));
    }

    fn failed(&self, error: &PlayerError) {
        let _ = self.send(PlayerEvent::Failed(error.clone()));
    }

    fn playing(&self) {
        let _ = self.send(PlayerEvent::Playing);
    }

    fn paused(&self) {
        let _ = self.send(PlayerEvent::Paused);
    }

    fn tick(&self, position: f64, duration: f64) {
        let _ = self.send(PlayerEvent::Tick { position, duration });
    }

    fn present_frame(&self, frame: &VideoFrame) {
        let _ = self.send(PlayerEvent::PresentFrame(frame.clone()));
    }

    fn stopped(&self) {
        let _ = self.send(PlayerEvent::Stopped);
    }
}

impl<T: PlayerDelegate + Sync + ?Sized> PlayerDelegate for Arc<T> {
    fn loading(&self) {
        (**self).loading()
    }

    fn ready(&self, source: &MediaSource) {
        (**self).ready(source)
    }

    fn failed(&self, error: &PlayerError) {
        (**self).failed(error)
    }

    fn playing(&self) {
        (**self).playing()
    }

    fn paused(&self) {
        (**self).paused()
    }

    fn tick(&self, position: f64, duration: f64) {
        (**self).tick(position, duration)
    }

    fn present_frame(&self, frame: &VideoFrame) {
        (**self).present_frame(frame)
    }

    fn stopped(&self) {
        (**self).stopped()
    }
}

/// 事件分发线程（每次加载一个），保证同一次加载的事件严格有序
pub(crate) struct EventDispatcher {
    tx: Option<Sender<PlayerEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn spawn(delegate: Box<dyn PlayerDelegate>, generation: u64) -> Self {
        let (tx, rx) = unbounded::<PlayerEvent>();
        let handle = thread::Builder::new()
            .name(format!("myy-events-{}", generation))
            .spawn(move || {
                debug!("{} 📨 事件分发线程启动 (generation {})", log_ctx(), generation);
                for event in rx {
                    event.dispatch(delegate.as_ref());
                }
                debug!("{} 📨 事件分发线程退出 (generation {})", log_ctx(), generation);
            });

        match handle {
            Ok(handle) => Self {
                tx: Some(tx),
                handle: Some(handle),
            },
            Err(e) => {
                error!("{} ❌ 无法创建事件分发线程: {}", log_ctx(), e);
                Self {
                    tx: None,
                    handle: None,
                }
            }
        }
    }

    pub fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// 关闭通道，等待已排队的事件分发完
    pub fn close(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            join_quietly(handle, "事件分发");
        }
    }
}
