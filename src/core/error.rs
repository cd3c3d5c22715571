use thiserror::Error;

/// 播放内核错误
///
/// 需要跨线程传递并在 `Failed` 状态中保存，因此实现了 `Clone`，
/// 底层错误统一转换为字符串描述。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    #[error("无法打开媒体: {0}")]
    Open(String),

    #[error("解封装错误: {0}")]
    Demux(String),

    #[error("解码错误（流 #{stream}）: {message}")]
    Decode { stream: usize, message: String },

    #[error("Seek 失败: {0}")]
    Seek(String),

    #[error("音频输出错误: {0}")]
    Audio(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(String),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpeg(#[from] ffmpeg_next::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 错误类别名称（日志与统计使用）
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::Open(_) => "open",
            PlayerError::Demux(_) => "demux",
            PlayerError::Decode { .. } => "decode",
            PlayerError::Seek(_) => "seek",
            PlayerError::Audio(_) => "audio",
            PlayerError::Config(_) => "config",
            PlayerError::Io(_) => "io",
            #[cfg(feature = "ffmpeg")]
            PlayerError::FFmpeg(_) => "ffmpeg",
            PlayerError::Other(_) => "other",
        }
    }
}

impl From<std::io::Error> for PlayerError {
    fn from(e: std::io::Error) -> Self {
        PlayerError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        PlayerError::Config(e.to_string())
    }
}

/// 单个解码单元的错误
///
/// - `Recoverable`：单个坏包/坏帧，记录后继续解码下一个包
/// - `Fatal`：不支持的 profile、持续损坏等，整个流无法继续
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("可恢复的解码错误: {0}")]
    Recoverable(String),

    #[error("致命解码错误: {0}")]
    Fatal(String),
}

impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Fatal(_))
    }

    /// 转换为带流索引的播放错误
    pub fn into_player_error(self, stream: usize) -> PlayerError {
        let message = match self {
            DecodeError::Recoverable(m) | DecodeError::Fatal(m) => m,
        };
        PlayerError::Decode { stream, message }
    }
}

/// 解封装后端读包时的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// 单个损坏的包，跳过即可
    #[error("损坏的数据包: {0}")]
    Malformed(String),

    /// 头部损坏、IO 失败等，源进入不可读状态
    #[error(transparent)]
    Fatal(PlayerError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
