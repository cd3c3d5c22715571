use super::error::PlayerError;

/// Seek 完成后回到的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAs {
    Ready,
    Playing,
    Paused,
}

/// 播放状态
///
/// 只有控制器在自己的锁内修改它；每个 `on_*` 返回 `None` 表示该命令在
/// 当前状态下是空操作（不触发任何回调）。
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Idle,
    /// `autoplay`：加载期间调用过 `play()`，就绪后立即开始播放
    Loading { autoplay: bool },
    Ready,
    Playing,
    Paused,
    Seeking { target: f64, resume: ResumeAs },
    Stopped,
    Failed(PlayerError),
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading { .. } => "loading",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Seeking { .. } => "seeking",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Failed(_) => "failed",
        }
    }

    /// `Stopped` / `Failed`：本次加载已结束
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Failed(_))
    }

    /// 是否持有一条活动管线
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle) && !self.is_terminal()
    }

    /// `paused` 属性的派生视图
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            PlaybackState::Paused
                | PlaybackState::Seeking {
                    resume: ResumeAs::Paused,
                    ..
                }
        )
    }

    pub fn accepts_mute(&self) -> bool {
        !self.is_terminal()
    }

    pub fn on_loaded(&self) -> Option<PlaybackState> {
        match self {
            PlaybackState::Loading { .. } => Some(PlaybackState::Ready),
            _ => None,
        }
    }

    pub fn on_play(&self) -> Option<PlaybackState> {
        match self {
            PlaybackState::Loading { autoplay: false } => {
                Some(PlaybackState::Loading { autoplay: true })
            }
            PlaybackState::Ready | PlaybackState::Paused => Some(PlaybackState::Playing),
            PlaybackState::Seeking { target, resume } if *resume != ResumeAs::Playing => {
                Some(PlaybackState::Seeking {
                    target: *target,
                    resume: ResumeAs::Playing,
                })
            }
            _ => None,
        }
    }

    pub fn on_pause(&self) -> Option<PlaybackState> {
        match self {
            PlaybackState::Loading { autoplay: true } => {
                Some(PlaybackState::Loading { autoplay: false })
            }
            PlaybackState::Playing => Some(PlaybackState::Paused),
            PlaybackState::Seeking {
                target,
                resume: ResumeAs::Playing,
            } => Some(PlaybackState::Seeking {
                target: *target,
                resume: ResumeAs::Paused,
            }),
            _ => None,
        }
    }

    pub fn on_seek(&self, target: f64) -> Option<PlaybackState> {
        let resume = match self {
            PlaybackState::Ready => ResumeAs::Ready,
            PlaybackState::Playing => ResumeAs::Playing,
            PlaybackState::Paused => ResumeAs::Paused,
            PlaybackState::Seeking { resume, .. } => *resume,
            _ => return None,
        };
        Some(PlaybackState::Seeking { target, resume })
    }

    pub fn on_seek_complete(&self) -> Option<PlaybackState> {
        match self {
            PlaybackState::Seeking { resume, .. } => Some(match resume {
                ResumeAs::Ready => PlaybackState::Ready,
                ResumeAs::Playing => PlaybackState::Playing,
                ResumeAs::Paused => PlaybackState::Paused,
            }),
            _ => None,
        }
    }

    /// `Idle` 没有可释放的资源，终态之后也不再响应
    pub fn on_stop(&self) -> Option<PlaybackState> {
        if self.is_active() {
            Some(PlaybackState::Stopped)
        } else {
            None
        }
    }

    pub fn on_error(&self, error: PlayerError) -> Option<PlaybackState> {
        if self.is_active() {
            Some(PlaybackState::Failed(error))
        } else {
            None
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Idle
    }
}
