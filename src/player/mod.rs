// 播放引擎：位置时钟、会话管理、轨道、字幕、健康监测、片头片尾、下一集

pub mod position_clock;
pub mod element_clock;
pub mod polled_clock;
pub mod simulated;
pub mod subtitle_sync;
pub mod subtitle_parser;
pub mod track_selector;
pub mod health;
pub mod markers;
pub mod next_episode;
pub mod manager;

#[cfg(test)]
pub mod test_support;

pub use position_clock::{ClockEvent, PositionClock};
pub use element_clock::{ElementEvent, EventDrivenClock, MediaElement};
pub use polled_clock::{DecoderState, HardwareDecoder, PolledClock};
pub use simulated::SimulatedDecoder;
pub use subtitle_sync::SubtitleSynchronizer;
pub use subtitle_parser::{SubtitleFormat, SubtitleParser};
pub use track_selector::{AudioSwitch, SubtitlePlan, TrackSelector};
pub use health::{HealthMonitor, UnhealthyReason};
pub use markers::{MarkerEngine, MarkerUpdate};
pub use next_episode::{CountdownPhase, CountdownStep, NextEpisodeScheduler, NextEpisodeState};
pub use manager::{PlaybackSessionManager, PlayerEvent};
