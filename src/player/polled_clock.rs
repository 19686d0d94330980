use crate::core::{ticks_from_millis, ticks_to_millis, ClockState, PlayerError, Result, Ticks, TimerSet, TrackKind};
use crate::player::position_clock::{ClockEvent, PositionClock};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// 硬件解码器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    None,
    Idle,
    Ready,
    Playing,
    Paused,
    Buffering,
    Completed,
    Faulted,
}

/// 硬件解码器接口（毫秒单位，没有时间更新事件，只能主动读取）
pub trait HardwareDecoder {
    fn open(&mut self, url: &str) -> Result<()>;

    fn prepare(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn seek_to(&mut self, millis: i64) -> Result<()>;

    fn current_time_ms(&self) -> i64;

    /// 未知时为 0
    fn duration_ms(&self) -> i64;

    fn state(&self) -> DecoderState;

    /// Faulted 状态下的错误描述
    fn last_fault(&self) -> Option<String>;

    fn set_speed(&mut self, rate: f64) -> Result<()>;

    fn track_count(&self, kind: TrackKind) -> usize;

    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()>;

    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollTimer {
    Poll,
}

/// 轮询型时钟：按固定间隔读取解码器的时间与状态，由状态变化合成事件
pub struct PolledClock<D: HardwareDecoder> {
    decoder: D,
    interval: Duration,
    timers: TimerSet<PollTimer>,
    url: Option<String>,
    last_state: DecoderState,
    last_time_ms: Option<i64>,
}

impl<D: HardwareDecoder> PolledClock<D> {
    pub fn new(decoder: D, interval: Duration) -> Self {
        Self {
            decoder,
            interval,
            timers: TimerSet::new(),
            url: None,
            last_state: DecoderState::None,
            last_time_ms: None,
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }

    /// 轮询定时器是否在运行
    pub fn is_polling(&self) -> bool {
        self.timers.is_active(PollTimer::Poll)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.url.is_none() {
            return Err(PlayerError::Engine("解码器未打开".to_string()));
        }
        Ok(())
    }

    /// 读取一次解码器，合成状态变化事件
    fn sample(&mut self, out: &mut Vec<ClockEvent>) {
        let state = self.decoder.state();
        if state != self.last_state {
            debug!("🔄 解码器状态: {:?} -> {:?}", self.last_state, state);
            match (self.last_state, state) {
                (_, DecoderState::Buffering) => out.push(ClockEvent::BufferingStarted),
                (DecoderState::Buffering, DecoderState::Playing) => {
                    out.push(ClockEvent::BufferingEnded);
                    out.push(ClockEvent::Playing);
                }
                (_, DecoderState::Playing) => out.push(ClockEvent::Playing),
                (_, DecoderState::Paused) => out.push(ClockEvent::Paused),
                (_, DecoderState::Completed) => out.push(ClockEvent::Ended),
                (_, DecoderState::Faulted) => {
                    let message = self
                        .decoder
                        .last_fault()
                        .unwrap_or_else(|| "解码器故障".to_string());
                    warn!("❌ 解码器故障: {}", message);
                    out.push(ClockEvent::Error(message));
                }
                _ => {}
            }
            self.last_state = state;
        }

        let time_ms = self.decoder.current_time_ms();
        if matches!(state, DecoderState::Playing | DecoderState::Paused | DecoderState::Buffering)
            && self.last_time_ms != Some(time_ms)
        {
            self.last_time_ms = Some(time_ms);
            out.push(ClockEvent::TimeUpdate(ticks_from_millis(time_ms)));
        }
    }
}

impl<D: HardwareDecoder> PositionClock for PolledClock<D> {
    fn open(&mut self, url: &str) -> Result<()> {
        self.close();
        self.decoder.open(url)?;
        self.url = Some(url.to_string());
        self.last_state = self.decoder.state();
        self.last_time_ms = None;
        info!("🎬 硬件解码器打开: {}", url);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.decoder.prepare()?;
        self.last_state = self.decoder.state();
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.decoder.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.decoder.pause()
    }

    fn seek(&mut self, ticks: Ticks) -> Result<()> {
        self.ensure_open()?;
        self.decoder
            .seek_to(ticks_to_millis(ticks))
            .map_err(|e| PlayerError::Seek(e.to_string()))
    }

    fn current_ticks(&self) -> Ticks {
        if self.url.is_none() {
            return 0;
        }
        ticks_from_millis(self.decoder.current_time_ms())
    }

    fn duration_ticks(&self) -> Option<Ticks> {
        let duration = self.decoder.duration_ms();
        if self.url.is_none() || duration <= 0 {
            return None;
        }
        Some(ticks_from_millis(duration))
    }

    fn state(&self) -> ClockState {
        if self.url.is_none() {
            return ClockState::Idle;
        }
        match self.decoder.state() {
            DecoderState::None | DecoderState::Idle => ClockState::Opened,
            DecoderState::Ready => ClockState::Ready,
            DecoderState::Playing => ClockState::Playing,
            DecoderState::Paused => ClockState::Paused,
            DecoderState::Buffering => ClockState::Buffering,
            DecoderState::Completed => ClockState::Ended,
            DecoderState::Faulted => ClockState::Failed,
        }
    }

    fn set_speed(&mut self, rate: f64) -> Result<()> {
        self.ensure_open()?;
        self.decoder.set_speed(rate)
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        if self.url.is_none() {
            return 0;
        }
        self.decoder.track_count(kind)
    }

    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()> {
        self.ensure_open()?;
        self.decoder.select_track(kind, position)
    }

    fn close(&mut self) {
        self.timers.clear();
        if self.url.take().is_some() {
            self.decoder.close();
            info!("⏹️  硬件解码器已关闭");
        }
        self.last_state = DecoderState::None;
        self.last_time_ms = None;
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn poll_events(&mut self, now: Instant) -> Vec<ClockEvent> {
        let mut out = Vec::new();
        if self.url.is_none() {
            return out;
        }
        // 第一次调用时启动轮询定时器
        if self.timers.start_interval(PollTimer::Poll, self.interval, now) {
            self.sample(&mut out);
            return out;
        }
        // 错过多个周期也只读取一次
        if !self.timers.fire_due(now).is_empty() {
            self.sample(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDecoder {
        state: DecoderState,
        time_ms: i64,
        opened: Option<String>,
        closes: usize,
        fault: Option<String>,
        seeks: Vec<i64>,
    }

    impl FakeDecoder {
        fn new() -> Self {
            Self {
                state: DecoderState::None,
                time_ms: 0,
                opened: None,
                closes: 0,
                fault: None,
                seeks: Vec::new(),
            }
        }
    }

    impl HardwareDecoder for FakeDecoder {
        fn open(&mut self, url: &str) -> Result<()> {
            self.opened = Some(url.to_string());
            self.state = DecoderState::Idle;
            Ok(())
        }
        fn prepare(&mut self) -> Result<()> {
            self.state = DecoderState::Ready;
            Ok(())
        }
        fn play(&mut self) -> Result<()> {
            self.state = DecoderState::Playing;
            Ok(())
        }
        fn pause(&mut self) -> Result<()> {
            self.state = DecoderState::Paused;
            Ok(())
        }
        fn seek_to(&mut self, millis: i64) -> Result<()> {
            self.seeks.push(millis);
            self.time_ms = millis;
            Ok(())
        }
        fn current_time_ms(&self) -> i64 {
            self.time_ms
        }
        fn duration_ms(&self) -> i64 {
            60_000
        }
        fn state(&self) -> DecoderState {
            self.state
        }
        fn last_fault(&self) -> Option<String> {
            self.fault.clone()
        }
        fn set_speed(&mut self, _rate: f64) -> Result<()> {
            Ok(())
        }
        fn track_count(&self, _kind: TrackKind) -> usize {
            1
        }
        fn select_track(&mut self, _kind: TrackKind, _position: Option<usize>) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {
            self.closes += 1;
            self.state = DecoderState::None;
        }
    }

    fn opened_clock() -> PolledClock<FakeDecoder> {
        let mut clock = PolledClock::new(FakeDecoder::new(), Duration::from_millis(500));
        clock.open("http://srv/v.mkv").unwrap();
        clock.prepare().unwrap();
        clock
    }

    #[test]
    fn test_polls_on_fixed_interval() {
        let t0 = Instant::now();
        let mut clock = opened_clock();
        clock.play().unwrap();

        // 首次调用立即读取并启动定时器
        assert_eq!(clock.poll_events(t0), vec![ClockEvent::Playing, ClockEvent::TimeUpdate(0)]);
        assert!(clock.is_polling());

        clock.decoder_mut().time_ms = 400;
        assert!(clock.poll_events(t0 + Duration::from_millis(400)).is_empty());
        assert_eq!(
            clock.poll_events(t0 + Duration::from_millis(500)),
            vec![ClockEvent::TimeUpdate(4_000_000)]
        );
        // 时间没有变化时不重复上报
        assert!(clock.poll_events(t0 + Duration::from_millis(1000)).is_empty());
    }

    #[test]
    fn test_state_transitions_synthesize_events() {
        let t0 = Instant::now();
        let mut clock = opened_clock();
        clock.play().unwrap();
        clock.poll_events(t0);

        clock.decoder_mut().state = DecoderState::Buffering;
        assert_eq!(clock.poll_events(t0 + Duration::from_millis(500)), vec![ClockEvent::BufferingStarted]);

        clock.decoder_mut().state = DecoderState::Playing;
        clock.decoder_mut().time_ms = 900;
        assert_eq!(
            clock.poll_events(t0 + Duration::from_millis(1000)),
            vec![ClockEvent::BufferingEnded, ClockEvent::Playing, ClockEvent::TimeUpdate(9_000_000)]
        );

        clock.decoder_mut().state = DecoderState::Faulted;
        clock.decoder_mut().fault = Some("PLAYER_ERROR_CONNECTION_FAILED".into());
        assert_eq!(
            clock.poll_events(t0 + Duration::from_millis(1500)),
            vec![ClockEvent::Error("PLAYER_ERROR_CONNECTION_FAILED".into())]
        );
    }

    #[test]
    fn test_completed_emits_ended() {
        let t0 = Instant::now();
        let mut clock = opened_clock();
        clock.play().unwrap();
        clock.poll_events(t0);
        clock.decoder_mut().state = DecoderState::Completed;
        assert_eq!(clock.poll_events(t0 + Duration::from_millis(500)), vec![ClockEvent::Ended]);
    }

    #[test]
    fn test_close_stops_polling_and_is_idempotent() {
        let t0 = Instant::now();
        let mut clock = PolledClock::new(FakeDecoder::new(), Duration::from_millis(500));
        clock.close();
        assert_eq!(clock.decoder().closes, 0);

        clock.open("http://srv/v.mkv").unwrap();
        clock.poll_events(t0);
        assert!(clock.is_polling());
        clock.close();
        clock.close();
        assert!(!clock.is_polling());
        assert_eq!(clock.decoder().closes, 1);
        assert!(clock.poll_events(t0 + Duration::from_secs(5)).is_empty());
        assert_eq!(clock.state(), ClockState::Idle);
    }

    #[test]
    fn test_seek_converts_ticks_to_millis() {
        let mut clock = opened_clock();
        clock.seek(123_450_000).unwrap();
        assert_eq!(clock.decoder().seeks, vec![12_345]);
        assert_eq!(clock.current_ticks(), 123_450_000);
        assert_eq!(clock.duration_ticks(), Some(600_000_000));
    }
}
