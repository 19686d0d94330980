use crate::core::{ticks_from_millis, ticks_to_millis, PlayerError, Result, StreamProtocol, Ticks, TrackKind, WallClock};
use crate::player::polled_clock::{DecoderState, HardwareDecoder};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

struct SimulatedInner {
    state: DecoderState,
    url: Option<String>,
    duration: Ticks,
    audio_tracks: usize,
    subtitle_tracks: usize,
    selected_audio: usize,
    selected_subtitle: Option<usize>,
    fault: Option<String>,
}

/// 模拟硬件解码器
///
/// 没有真实解码，只用墙钟推进播放位置；用于无界面运行和集成测试。
/// 可以 clone 出句柄，在外部设置时长、注入故障。
#[derive(Clone)]
pub struct SimulatedDecoder {
    clock: WallClock,
    inner: Arc<Mutex<SimulatedInner>>,
}

impl SimulatedDecoder {
    pub fn new() -> Self {
        Self {
            clock: WallClock::new(),
            inner: Arc::new(Mutex::new(SimulatedInner {
                state: DecoderState::None,
                url: None,
                duration: 0,
                audio_tracks: 1,
                subtitle_tracks: 0,
                selected_audio: 0,
                selected_subtitle: None,
                fault: None,
            })),
        }
    }

    /// 设置媒体时长（0 = 未知，永不结束）
    pub fn set_duration(&self, ticks: Ticks) {
        self.inner.lock().duration = ticks.max(0);
    }

    pub fn set_track_counts(&self, audio: usize, subtitle: usize) {
        let mut inner = self.inner.lock();
        inner.audio_tracks = audio;
        inner.subtitle_tracks = subtitle;
    }

    /// 注入故障，下次轮询时报告 Faulted
    pub fn inject_fault(&self, message: &str) {
        let mut inner = self.inner.lock();
        inner.fault = Some(message.to_string());
        inner.state = DecoderState::Faulted;
        self.clock.pause();
    }

    pub fn selected_audio(&self) -> usize {
        self.inner.lock().selected_audio
    }

    pub fn selected_subtitle(&self) -> Option<usize> {
        self.inner.lock().selected_subtitle
    }

    fn require_url(inner: &SimulatedInner) -> Result<()> {
        if inner.url.is_none() {
            return Err(PlayerError::Engine("模拟解码器未打开".to_string()));
        }
        Ok(())
    }
}

impl Default for SimulatedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareDecoder for SimulatedDecoder {
    fn open(&mut self, url: &str) -> Result<()> {
        let protocol = StreamProtocol::from_url(url)
            .ok_or_else(|| PlayerError::Engine(format!("不支持的 URL: {}", url)))?;
        let mut inner = self.inner.lock();
        inner.url = Some(url.to_string());
        inner.state = DecoderState::Idle;
        inner.fault = None;
        inner.selected_audio = 0;
        inner.selected_subtitle = None;
        self.clock.pause();
        self.clock.set_time(0);
        info!("🧪 模拟解码器打开 ({}): {}", protocol.as_str(), url);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_url(&inner)?;
        inner.state = DecoderState::Ready;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_url(&inner)?;
        if inner.state == DecoderState::Faulted {
            return Err(PlayerError::Engine("解码器处于故障状态".to_string()));
        }
        inner.state = DecoderState::Playing;
        self.clock.play();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_url(&inner)?;
        if inner.state == DecoderState::Playing {
            inner.state = DecoderState::Paused;
        }
        self.clock.pause();
        Ok(())
    }

    fn seek_to(&mut self, millis: i64) -> Result<()> {
        let inner = self.inner.lock();
        Self::require_url(&inner)?;
        let mut target = ticks_from_millis(millis.max(0));
        if inner.duration > 0 {
            target = target.min(inner.duration);
        }
        self.clock.set_time(target);
        debug!("🎯 模拟解码器 seek: {} ms", millis);
        Ok(())
    }

    fn current_time_ms(&self) -> i64 {
        let mut inner = self.inner.lock();
        let mut now = self.clock.now();
        if inner.duration > 0 && now >= inner.duration {
            now = inner.duration;
            if inner.state == DecoderState::Playing {
                inner.state = DecoderState::Completed;
                self.clock.pause();
            }
        }
        ticks_to_millis(now)
    }

    fn duration_ms(&self) -> i64 {
        ticks_to_millis(self.inner.lock().duration)
    }

    fn state(&self) -> DecoderState {
        // 读取时间会顺带检查是否播放结束
        self.current_time_ms();
        self.inner.lock().state
    }

    fn last_fault(&self) -> Option<String> {
        self.inner.lock().fault.clone()
    }

    fn set_speed(&mut self, rate: f64) -> Result<()> {
        if !(0.25..=4.0).contains(&rate) {
            return Err(PlayerError::Engine(format!("不支持的播放速率: {}", rate)));
        }
        self.clock.set_rate(rate);
        Ok(())
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        let inner = self.inner.lock();
        match kind {
            TrackKind::Audio => inner.audio_tracks,
            TrackKind::Subtitle => inner.subtitle_tracks,
        }
    }

    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::require_url(&inner)?;
        match (kind, position) {
            (TrackKind::Audio, Some(p)) if p < inner.audio_tracks => inner.selected_audio = p,
            (TrackKind::Subtitle, Some(p)) if p < inner.subtitle_tracks => inner.selected_subtitle = Some(p),
            (TrackKind::Subtitle, None) => inner.selected_subtitle = None,
            _ => {
                return Err(PlayerError::Engine(format!("轨道不存在: {:?} {:?}", kind, position)));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock();
        inner.url = None;
        inner.state = DecoderState::None;
        self.clock.pause();
        self.clock.set_time(0);
    }
}
