use crate::core::{ClockState, Result, Ticks, TrackKind};
use std::time::Instant;

/// 引擎事件（统一的 tick 单位）
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    TimeUpdate(Ticks),
    Playing,
    Paused,
    BufferingStarted,
    BufferingEnded,
    Ended,
    Error(String),
}

/// 播放引擎统一接口
///
/// 会话管理器只通过这个 trait 操作引擎，不关心背后是事件驱动的媒体元素
/// 还是需要轮询的硬件解码器。
///
/// 引擎的异步通知全部通过 `poll_events` 这一条通道交给会话，由会话在
/// 自己的控制线程上分发。
pub trait PositionClock {
    /// 加载 URL（不开始播放）
    fn open(&mut self, url: &str) -> Result<()>;

    fn prepare(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn seek(&mut self, ticks: Ticks) -> Result<()>;

    fn current_ticks(&self) -> Ticks;

    /// 未知时返回 None
    fn duration_ticks(&self) -> Option<Ticks>;

    fn state(&self) -> ClockState;

    fn set_speed(&mut self, rate: f64) -> Result<()>;

    /// 引擎报告的某类轨道数量
    fn track_count(&self, kind: TrackKind) -> usize;

    /// 按物理位置选择轨道；字幕传 None 表示关闭原生渲染
    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()>;

    /// 幂等，未打开时调用也安全
    fn close(&mut self);

    /// 当前打开的 URL
    fn url(&self) -> Option<&str>;

    /// 取出自上次调用以来的引擎事件
    fn poll_events(&mut self, now: Instant) -> Vec<ClockEvent>;
}
