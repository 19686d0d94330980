use crate::core::types::TrackKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// 直接播放/直接串流失败，尚未重试（触发一次转码回退）
    #[error("可恢复的播放错误: {0}")]
    RecoverablePlayback(String),

    /// 已经回退过一次，或回退本身失败
    #[error("致命播放错误: {0}")]
    FatalPlayback(String),

    #[error("字幕获取失败: {0}")]
    TrackFetch(String),

    #[error("Seek 失败: {0}")]
    Seek(String),

    #[error("播放引擎错误: {0}")]
    Engine(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("HTTP 状态 {status}: {message}")]
    Http { status: u16, message: String },

    #[error("没有活动的播放会话")]
    NoSession,

    #[error("播放会话尚未就绪")]
    NotReady,

    #[error("找不到 {kind:?} 轨道 #{index}")]
    TrackNotFound { kind: TrackKind, index: i32 },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
