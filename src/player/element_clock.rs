use crate::core::{ticks_from_secs, ticks_to_secs, ClockState, PlayerError, Result, Ticks, TrackKind};
use crate::player::position_clock::{ClockEvent, PositionClock};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use std::time::Instant;

/// 媒体元素事件（对应 Web 标准 media element 的 timeupdate/playing/waiting/...）
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    LoadedMetadata,
    TimeUpdate,
    Playing,
    Pause,
    Waiting,
    Ended,
    Error(String),
}

/// Web 标准媒体元素（时间单位：秒）
pub trait MediaElement {
    fn set_source(&mut self, url: &str) -> Result<()>;

    fn load(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn set_current_time(&mut self, seconds: f64) -> Result<()>;

    fn current_time(&self) -> f64;

    /// 未知时为 NaN
    fn duration(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn audio_track_count(&self) -> usize;

    fn enable_audio_track(&mut self, position: usize) -> Result<()>;

    fn text_track_count(&self) -> usize;

    /// 只显示指定位置的文本轨道，None 表示全部隐藏
    fn show_text_track(&mut self, position: Option<usize>) -> Result<()>;

    /// 移除 src 并释放解码资源
    fn remove_source(&mut self);

    /// 订阅事件通道（整个元素生命周期只订阅一次）
    fn subscribe(&self) -> Receiver<ElementEvent>;
}

/// 事件驱动型时钟：包装媒体元素，把元素事件归一化为 `ClockEvent`
pub struct EventDrivenClock<E: MediaElement> {
    element: E,
    events: Receiver<ElementEvent>,
    url: Option<String>,
    state: ClockState,
}

impl<E: MediaElement> EventDrivenClock<E> {
    pub fn new(element: E) -> Self {
        let events = element.subscribe();
        Self {
            element,
            events,
            url: None,
            state: ClockState::Idle,
        }
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut E {
        &mut self.element
    }

    /// 丢弃上一个 src 遗留的事件
    fn drain_stale_events(&self) {
        let mut dropped = 0;
        while self.events.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("🗑️  丢弃 {} 个遗留的元素事件", dropped);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.url.is_none() {
            return Err(PlayerError::Engine("媒体元素未打开".to_string()));
        }
        Ok(())
    }
}

impl<E: MediaElement> PositionClock for EventDrivenClock<E> {
    fn open(&mut self, url: &str) -> Result<()> {
        self.close();
        self.element.set_source(url)?;
        self.url = Some(url.to_string());
        self.state = ClockState::Opened;
        info!("🎬 媒体元素加载: {}", url);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.element.load()?;
        self.state = ClockState::Ready;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.element.play()
    }

    fn pause(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.element.pause();
        Ok(())
    }

    fn seek(&mut self, ticks: Ticks) -> Result<()> {
        self.ensure_open()?;
        self.element
            .set_current_time(ticks_to_secs(ticks))
            .map_err(|e| PlayerError::Seek(e.to_string()))
    }

    fn current_ticks(&self) -> Ticks {
        if self.url.is_none() {
            return 0;
        }
        ticks_from_secs(self.element.current_time())
    }

    fn duration_ticks(&self) -> Option<Ticks> {
        let duration = self.element.duration();
        if self.url.is_none() || !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        Some(ticks_from_secs(duration))
    }

    fn state(&self) -> ClockState {
        self.state
    }

    fn set_speed(&mut self, rate: f64) -> Result<()> {
        self.ensure_open()?;
        self.element.set_playback_rate(rate);
        Ok(())
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Audio => self.element.audio_track_count(),
            TrackKind::Subtitle => self.element.text_track_count(),
        }
    }

    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()> {
        self.ensure_open()?;
        match (kind, position) {
            (TrackKind::Audio, Some(position)) => self.element.enable_audio_track(position),
            (TrackKind::Audio, None) => Err(PlayerError::Engine("不能关闭音频轨道".to_string())),
            (TrackKind::Subtitle, position) => self.element.show_text_track(position),
        }
    }

    fn close(&mut self) {
        if self.url.take().is_some() {
            self.element.pause();
            self.element.remove_source();
            info!("⏹️  媒体元素已关闭");
        }
        self.drain_stale_events();
        self.state = ClockState::Idle;
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn poll_events(&mut self, _now: Instant) -> Vec<ClockEvent> {
        let mut out = Vec::new();
        if self.url.is_none() {
            self.drain_stale_events();
            return out;
        }

        while let Ok(event) = self.events.try_recv() {
            match event {
                ElementEvent::LoadedMetadata => {
                    if self.state == ClockState::Opened {
                        self.state = ClockState::Ready;
                    }
                }
                ElementEvent::TimeUpdate => {
                    out.push(ClockEvent::TimeUpdate(ticks_from_secs(self.element.current_time())));
                }
                ElementEvent::Playing => {
                    if self.state == ClockState::Buffering {
                        out.push(ClockEvent::BufferingEnded);
                    }
                    self.state = ClockState::Playing;
                    out.push(ClockEvent::Playing);
                }
                ElementEvent::Pause => {
                    self.state = ClockState::Paused;
                    out.push(ClockEvent::Paused);
                }
                ElementEvent::Waiting => {
                    if self.state != ClockState::Buffering {
                        self.state = ClockState::Buffering;
                        out.push(ClockEvent::BufferingStarted);
                    }
                }
                ElementEvent::Ended => {
                    self.state = ClockState::Ended;
                    out.push(ClockEvent::Ended);
                }
                ElementEvent::Error(message) => {
                    warn!("❌ 媒体元素错误: {}", message);
                    self.state = ClockState::Failed;
                    out.push(ClockEvent::Error(message));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Sender};

    struct FakeElement {
        tx: Sender<ElementEvent>,
        rx: Receiver<ElementEvent>,
        src: Option<String>,
        time: f64,
        duration: f64,
        audio_tracks: usize,
        enabled_audio: Option<usize>,
        shown_text: Option<usize>,
        fail_load: bool,
    }

    impl FakeElement {
        fn new() -> Self {
            let (tx, rx) = unbounded();
            Self {
                tx,
                rx,
                src: None,
                time: 0.0,
                duration: f64::NAN,
                audio_tracks: 2,
                enabled_audio: None,
                shown_text: None,
                fail_load: false,
            }
        }
    }

    impl MediaElement for FakeElement {
        fn set_source(&mut self, url: &str) -> Result<()> {
            self.src = Some(url.to_string());
            Ok(())
        }
        fn load(&mut self) -> Result<()> {
            if self.fail_load {
                return Err(PlayerError::Engine("MEDIA_ERR_SRC_NOT_SUPPORTED".into()));
            }
            Ok(())
        }
        fn play(&mut self) -> Result<()> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn set_current_time(&mut self, seconds: f64) -> Result<()> {
            self.time = seconds;
            Ok(())
        }
        fn current_time(&self) -> f64 {
            self.time
        }
        fn duration(&self) -> f64 {
            self.duration
        }
        fn set_playback_rate(&mut self, _rate: f64) {}
        fn audio_track_count(&self) -> usize {
            self.audio_tracks
        }
        fn enable_audio_track(&mut self, position: usize) -> Result<()> {
            self.enabled_audio = Some(position);
            Ok(())
        }
        fn text_track_count(&self) -> usize {
            1
        }
        fn show_text_track(&mut self, position: Option<usize>) -> Result<()> {
            self.shown_text = position;
            Ok(())
        }
        fn remove_source(&mut self) {
            self.src = None;
        }
        fn subscribe(&self) -> Receiver<ElementEvent> {
            self.rx.clone()
        }
    }

    #[test]
    fn test_events_normalized_to_ticks() {
        let element = FakeElement::new();
        let tx = element.tx.clone();
        let mut clock = EventDrivenClock::new(element);
        clock.open("http://srv/a.mp4").unwrap();
        clock.prepare().unwrap();

        clock.element_mut().time = 1.5;
        tx.send(ElementEvent::Playing).unwrap();
        tx.send(ElementEvent::TimeUpdate).unwrap();
        tx.send(ElementEvent::Waiting).unwrap();
        tx.send(ElementEvent::Waiting).unwrap();
        tx.send(ElementEvent::Playing).unwrap();

        let events = clock.poll_events(Instant::now());
        assert_eq!(
            events,
            vec![
                ClockEvent::Playing,
                ClockEvent::TimeUpdate(15_000_000),
                ClockEvent::BufferingStarted,
                ClockEvent::BufferingEnded,
                ClockEvent::Playing,
            ]
        );
        assert_eq!(clock.current_ticks(), 15_000_000);
    }

    #[test]
    fn test_stale_events_dropped_on_reopen() {
        let element = FakeElement::new();
        let tx = element.tx.clone();
        let mut clock = EventDrivenClock::new(element);
        clock.open("http://srv/a.mp4").unwrap();
        tx.send(ElementEvent::Error("old source".into())).unwrap();
        clock.open("http://srv/b.mp4").unwrap();
        assert!(clock.poll_events(Instant::now()).is_empty());
        assert_eq!(clock.url(), Some("http://srv/b.mp4"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut clock = EventDrivenClock::new(FakeElement::new());
        clock.close();
        clock.close();
        assert_eq!(clock.state(), ClockState::Idle);
        assert_eq!(clock.current_ticks(), 0);
        assert!(clock.duration_ticks().is_none());
        assert!(clock.play().is_err());
    }

    #[test]
    fn test_seek_and_tracks() {
        let mut clock = EventDrivenClock::new(FakeElement::new());
        clock.open("http://srv/a.mp4").unwrap();
        clock.seek(25_000_000).unwrap();
        assert!((clock.element().time - 2.5).abs() < 1e-9);

        assert_eq!(clock.track_count(TrackKind::Audio), 2);
        clock.select_track(TrackKind::Audio, Some(1)).unwrap();
        assert_eq!(clock.element().enabled_audio, Some(1));
        clock.select_track(TrackKind::Subtitle, None).unwrap();
        assert_eq!(clock.element().shown_text, None);
        assert!(clock.select_track(TrackKind::Audio, None).is_err());
    }

    #[test]
    fn test_prepare_failure_propagates() {
        let mut element = FakeElement::new();
        element.fail_load = true;
        let mut clock = EventDrivenClock::new(element);
        clock.open("http://srv/a.mkv").unwrap();
        assert!(matches!(clock.prepare(), Err(PlayerError::Engine(_))));
    }
}
