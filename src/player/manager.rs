use crate::core::{
    ticks_to_secs, MediaItem, MediaSegments, PlayMethod, PlaybackSession, PlayerConfig, PlayerError, Result,
    SessionStatus, StartOptions, SubtitleEvent, Ticks, TimerSet, TrackKind,
};
use crate::player::health::{HealthMonitor, UnhealthyReason};
use crate::player::markers::MarkerEngine;
use crate::player::next_episode::{CountdownStep, NextEpisodeScheduler, NextEpisodeState};
use crate::player::position_clock::{ClockEvent, PositionClock};
use crate::player::subtitle_sync::SubtitleSynchronizer;
use crate::player::track_selector::{AudioSwitch, SubtitlePlan, TrackSelector};
use crate::server::jellyfin::redact_url;
use crate::server::{MediaServerApi, PlaybackInfo, PlaybackInfoRequest, ProgressReport, SubtitleRequest, TaskSpawner};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

fn log_ctx(generation: u64) -> String {
    format!("[pid:{} gen:{}]", process::id(), generation)
}

/// 发给界面层的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StatusChanged(SessionStatus),
    SubtitleText(Option<String>),
    SkipIntroVisible(bool),
    CountdownStarted { candidate: MediaItem, seconds: u32 },
    CountdownTick(u32),
    CountdownCancelled,
    /// 切换到下一集，由调用方用这个条目重新 start
    Advance(MediaItem),
    Unhealthy(UnhealthyReason),
    Fatal(String),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTimer {
    Progress,
    HealthCheck,
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoPurpose {
    Initial,
    Fallback { resume: Ticks },
    AudioReload { resume: Ticks, audio_index: i32 },
}

#[derive(Debug, Clone, Copy)]
enum ReportKind {
    Start,
    Progress,
    Stopped,
}

/// 后台任务回传的结果
enum InboxMessage {
    PlaybackInfo {
        serial: u64,
        purpose: InfoPurpose,
        result: Result<PlaybackInfo>,
    },
    SubtitleCues {
        serial: u64,
        index: i32,
        result: Result<Vec<SubtitleEvent>>,
    },
    Segments(Result<MediaSegments>),
    NextEpisode(Result<Option<MediaItem>>),
}

struct Envelope {
    generation: u64,
    message: InboxMessage,
}

/// 当前会话及其拥有的全部资源（定时器、字幕、健康监测、标记、倒计时）
struct ActiveSession {
    state: PlaybackSession,
    item: MediaItem,
    options: StartOptions,
    /// 最近一次播放信息请求的序号，旧请求的响应直接丢弃
    info_serial: u64,
    subtitle_serial: u64,
    timers: TimerSet<SessionTimer>,
    subtitles: SubtitleSynchronizer,
    overlay_text: Option<String>,
    health: HealthMonitor,
    markers: MarkerEngine,
    next_episode: NextEpisodeScheduler,
    /// 倒计时已被触发但下一集还没查到
    countdown_wanted: bool,
    skip_intro_visible: bool,
    audio_explicit: bool,
    reload_seq: u64,
    seek_pending: bool,
    start_reported: bool,
}

impl ActiveSession {
    fn new(generation: u64, item: MediaItem, options: StartOptions, config: &PlayerConfig) -> Self {
        let mut state = PlaybackSession::new(generation, &item.id);
        state.current_position_ticks = options.start_position_ticks.max(0);
        state.run_time_ticks = item.run_time_ticks.unwrap_or(0);
        state.selected_audio_index = options.audio_stream_index;
        state.selected_subtitle_index = options.subtitle_stream_index.unwrap_or(-1);
        let audio_explicit = options.audio_stream_index.is_some();

        Self {
            state,
            item,
            options,
            info_serial: 0,
            subtitle_serial: 0,
            timers: TimerSet::new(),
            subtitles: SubtitleSynchronizer::new(),
            overlay_text: None,
            health: HealthMonitor::new(&config.health),
            markers: MarkerEngine::new(),
            next_episode: NextEpisodeScheduler::new(config.playback.countdown_secs),
            countdown_wanted: false,
            skip_intro_visible: false,
            audio_explicit,
            reload_seq: 0,
            seek_pending: true,
            start_reported: false,
        }
    }

    fn is_live(&self) -> bool {
        !self.state.status.is_terminal()
    }

    fn set_status(&mut self, status: SessionStatus, events: &Sender<PlayerEvent>) {
        if self.state.status != status {
            debug!("{} 状态 {:?} -> {:?}", log_ctx(self.state.generation), self.state.status, status);
            self.state.status = status;
            let _ = events.send(PlayerEvent::StatusChanged(status));
        }
    }

    fn set_overlay(&mut self, text: Option<String>, events: &Sender<PlayerEvent>) {
        if self.overlay_text != text {
            self.overlay_text = text.clone();
            let _ = events.send(PlayerEvent::SubtitleText(text));
        }
    }

    fn set_skip_intro(&mut self, visible: bool, events: &Sender<PlayerEvent>) {
        if self.skip_intro_visible != visible {
            self.skip_intro_visible = visible;
            let _ = events.send(PlayerEvent::SkipIntroVisible(visible));
        }
    }

    /// 关闭字幕时叠加层永远为空
    fn refresh_overlay(&mut self, events: &Sender<PlayerEvent>) {
        let text = if self.state.selected_subtitle_index < 0 {
            None
        } else {
            self.subtitles
                .lookup(self.state.current_position_ticks, self.state.subtitle_offset_ticks)
                .map(str::to_string)
        };
        self.set_overlay(text, events);
    }

    fn progress_report(&self) -> ProgressReport {
        ProgressReport {
            item_id: self.state.item_id.clone(),
            media_source_id: self.state.media_source_id.clone(),
            play_session_id: self.state.play_session_id.clone(),
            position_ticks: self.state.current_position_ticks,
            is_paused: self.state.status == SessionStatus::Paused,
            play_method: self.state.play_method,
            audio_stream_index: self.state.selected_audio_index,
            subtitle_stream_index: Some(self.state.selected_subtitle_index),
            playback_rate: self.state.playback_rate,
            can_seek: true,
        }
    }
}

fn live(session: &mut Option<ActiveSession>) -> Option<&mut ActiveSession> {
    session.as_mut().filter(|s| s.is_live())
}

/// 已经打开引擎、可以接受控制的会话
fn ready(session: &mut Option<ActiveSession>) -> Result<&mut ActiveSession> {
    match live(session) {
        None => Err(PlayerError::NoSession),
        Some(s) if s.state.status == SessionStatus::Loading => Err(PlayerError::NotReady),
        Some(s) => Ok(s),
    }
}

/// 播放会话管理器
///
/// 同一时刻只有一个当前会话。所有会话状态只在控制线程上修改：公开的控制
/// 方法和 `pump(now)`。网络请求交给 `TaskSpawner` 在后台执行，结果带着
/// generation 和请求序号回到收件箱，过期的结果直接丢弃。
pub struct PlaybackSessionManager<C: PositionClock> {
    clock: C,
    api: Arc<dyn MediaServerApi>,
    spawner: Arc<dyn TaskSpawner>,
    config: PlayerConfig,
    generation: u64,
    session: Option<ActiveSession>,
    inbox_tx: Sender<Envelope>,
    inbox_rx: Receiver<Envelope>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl<C: PositionClock> PlaybackSessionManager<C> {
    pub fn new(clock: C, api: Arc<dyn MediaServerApi>, spawner: Arc<dyn TaskSpawner>, config: PlayerConfig) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        info!("{} 🎮 创建播放会话管理器", log_ctx(0));
        Self {
            clock,
            api,
            spawner,
            config,
            generation: 0,
            session: None,
            inbox_tx,
            inbox_rx,
            events_tx,
            events_rx,
        }
    }

    // ---------- 只读状态 ----------

    /// 当前会话快照；会话结束后保留终止状态直到下一次 start
    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref().map(|s| &s.state)
    }

    pub fn next_episode_state(&self) -> Option<&NextEpisodeState> {
        self.session.as_ref().map(|s| s.next_episode.state())
    }

    pub fn overlay_text(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.overlay_text.as_deref())
    }

    pub fn skip_intro_visible(&self) -> bool {
        self.session.as_ref().map(|s| s.skip_intro_visible).unwrap_or(false)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    fn is_live(&self) -> bool {
        self.session.as_ref().map(|s| s.is_live()).unwrap_or(false)
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events_tx.send(event);
    }

    // ---------- 生命周期 ----------

    /// 开始播放新条目，返回新会话的 generation
    pub fn start(&mut self, item: MediaItem, mut options: StartOptions) -> u64 {
        self.teardown(SessionStatus::Ended);

        self.generation += 1;
        let generation = self.generation;
        if options.max_bitrate.is_none() {
            options.max_bitrate = self.config.playback.max_bitrate;
        }
        options.prefer_transcode |= self.config.playback.prefer_transcode;

        info!(
            "{} ▶️  开始播放: {} (起始 {:.1}s)",
            log_ctx(generation),
            item.display_name(),
            ticks_to_secs(options.start_position_ticks)
        );

        let request = PlaybackInfoRequest::initial(&item.id, &options);
        self.session = Some(ActiveSession::new(generation, item.clone(), options, &self.config));
        self.emit(PlayerEvent::StatusChanged(SessionStatus::Loading));
        self.request_playback_info(InfoPurpose::Initial, request);

        let item_id = item.id.clone();
        self.spawn_request(generation, move |api| InboxMessage::Segments(api.media_segments(&item_id)));
        self.spawn_request(generation, move |api| InboxMessage::NextEpisode(api.next_episode(&item)));
        generation
    }

    /// 用户退出播放
    pub fn stop(&mut self) {
        self.teardown(SessionStatus::Ended);
    }

    /// 控制线程的心跳：收件箱 → 引擎事件 → 定时器
    pub fn pump(&mut self, now: Instant) {
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            self.handle_envelope(envelope, now);
        }

        // 回退或重载会关闭引擎，同一批里剩下的事件来自已经关掉的流
        let source = self.clock.url().map(str::to_string);
        let events = self.clock.poll_events(now);
        for event in events {
            if !self.is_live() || self.clock.url() != source.as_deref() {
                break;
            }
            self.handle_clock_event(event, now);
        }

        self.fire_timers(now);
    }

    /// 销毁当前会话：上报停止、关闭引擎、清空定时器
    fn teardown(&mut self, status: SessionStatus) {
        let generation = self.generation;
        let clock_open = self.clock.url().is_some();
        let clock_ticks = self.clock.current_ticks();
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };

        if clock_open && clock_ticks > 0 {
            session.state.current_position_ticks = clock_ticks;
        }
        let report = if session.start_reported {
            Some(session.progress_report())
        } else {
            None
        };

        session.timers.clear();
        session.health.stop();
        session.subtitles.clear();
        session.set_overlay(None, &self.events_tx);
        session.set_skip_intro(false, &self.events_tx);
        session.set_status(status, &self.events_tx);
        info!(
            "{} ⏹️  会话结束 ({:?}) 位置 {:.1}s",
            log_ctx(generation),
            status,
            ticks_to_secs(session.state.current_position_ticks)
        );

        self.clock.close();
        if let Some(report) = report {
            self.spawn_report(ReportKind::Stopped, report);
        }
    }

    fn fail(&mut self, error: PlayerError) {
        error!("{} ❌ {}", log_ctx(self.generation), error);
        self.teardown(SessionStatus::Error);
        self.emit(PlayerEvent::Fatal(error.to_string()));
    }

    fn advance(&mut self, item: MediaItem) {
        info!("{} ⏭️  切换到下一集: {}", log_ctx(self.generation), item.display_name());
        self.teardown(SessionStatus::Ended);
        self.emit(PlayerEvent::Advance(item));
    }

    // ---------- 后台请求 ----------

    fn spawn_request<F>(&self, generation: u64, job: F)
    where
        F: FnOnce(&dyn MediaServerApi) -> InboxMessage + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        let inbox = self.inbox_tx.clone();
        self.spawner.spawn(Box::new(move || {
            let message = job(api.as_ref());
            let _ = inbox.send(Envelope { generation, message });
        }));
    }

    fn spawn_report(&self, kind: ReportKind, report: ProgressReport) {
        let api = Arc::clone(&self.api);
        let generation = self.generation;
        self.spawner.spawn(Box::new(move || {
            let result = match kind {
                ReportKind::Start => api.report_start(&report),
                ReportKind::Progress => api.report_progress(&report),
                ReportKind::Stopped => api.report_stopped(&report),
            };
            if let Err(e) = result {
                warn!("{} ⚠️  {:?} 上报失败: {}", log_ctx(generation), kind, e);
            }
        }));
    }

    fn request_playback_info(&mut self, purpose: InfoPurpose, request: PlaybackInfoRequest) {
        let serial = match self.session.as_mut() {
            Some(s) => {
                s.info_serial += 1;
                s.info_serial
            }
            None => return,
        };
        debug!(
            "{} 📡 请求播放信息 #{} {:?} (direct_play={} transcode={})",
            log_ctx(self.generation),
            serial,
            purpose,
            request.enable_direct_play,
            request.enable_transcoding
        );
        self.spawn_request(self.generation, move |api| InboxMessage::PlaybackInfo {
            serial,
            purpose,
            result: api.playback_info(&request),
        });
    }

    fn report_progress(&self) {
        let report = match self.session.as_ref() {
            Some(s)
                if matches!(
                    s.state.status,
                    SessionStatus::Ready | SessionStatus::Playing | SessionStatus::Paused | SessionStatus::Buffering
                ) =>
            {
                s.progress_report()
            }
            _ => return,
        };
        self.spawn_report(ReportKind::Progress, report);
    }

    // ---------- 收件箱 ----------

    fn handle_envelope(&mut self, envelope: Envelope, now: Instant) {
        if envelope.generation != self.generation || !self.is_live() {
            debug!(
                "{} 🗑️  丢弃过期响应 (来自 gen {})",
                log_ctx(self.generation),
                envelope.generation
            );
            return;
        }
        match envelope.message {
            InboxMessage::PlaybackInfo { serial, purpose, result } => self.on_playback_info(serial, purpose, result, now),
            InboxMessage::SubtitleCues { serial, index, result } => self.on_subtitle_cues(serial, index, result),
            InboxMessage::Segments(result) => self.on_segments(result),
            InboxMessage::NextEpisode(result) => self.on_next_episode(result, now),
        }
    }

    fn on_playback_info(&mut self, serial: u64, purpose: InfoPurpose, result: Result<PlaybackInfo>, now: Instant) {
        let current = self.session.as_ref().map(|s| s.info_serial);
        if current != Some(serial) {
            debug!("{} 🗑️  丢弃被取代的播放信息 #{}", log_ctx(self.generation), serial);
            return;
        }
        match (result, purpose) {
            (Ok(info), _) => self.open_stream(info, purpose, now),
            (Err(e), InfoPurpose::AudioReload { audio_index, .. }) => {
                warn!(
                    "{} ⚠️  音轨 #{} 重新加载失败，继续播放当前流: {}",
                    log_ctx(self.generation),
                    audio_index,
                    e
                );
            }
            (Err(e), InfoPurpose::Initial) => {
                self.fail(PlayerError::FatalPlayback(format!("获取播放信息失败: {}", e)))
            }
            (Err(e), InfoPurpose::Fallback { .. }) => {
                self.fail(PlayerError::FatalPlayback(format!("转码回退失败: {}", e)))
            }
        }
    }

    /// 用播放信息打开引擎：open → prepare → seek → play
    fn open_stream(&mut self, info: PlaybackInfo, purpose: InfoPurpose, now: Instant) {
        let generation = self.generation;
        let previous_url = self.clock.url().map(str::to_string);

        let (url, resume) = {
            let session = match live(&mut self.session) {
                Some(s) => s,
                None => return,
            };
            let resume = match purpose {
                InfoPurpose::Initial => session.options.start_position_ticks.max(0),
                InfoPurpose::Fallback { resume } | InfoPurpose::AudioReload { resume, .. } => resume,
            };
            let url = match purpose {
                InfoPurpose::AudioReload { .. } => {
                    session.reload_seq += 1;
                    TrackSelector::disambiguate_url(
                        previous_url.as_deref(),
                        &info.url,
                        info.play_method,
                        session.reload_seq,
                    )
                }
                _ => info.url.clone(),
            };

            let state = &mut session.state;
            match purpose {
                InfoPurpose::Initial => {
                    state.selected_audio_index = state.selected_audio_index.or(info.default_audio_index);
                    if session.options.subtitle_stream_index.is_none() {
                        state.selected_subtitle_index = info.default_subtitle_index.unwrap_or(-1);
                    }
                }
                InfoPurpose::AudioReload { audio_index, .. } => {
                    state.selected_audio_index = Some(audio_index);
                }
                InfoPurpose::Fallback { .. } => {}
            }
            state.media_source_id = Some(info.media_source_id);
            state.play_session_id = info.play_session_id;
            state.play_method = info.play_method;
            state.stream_url = Some(url.clone());
            if info.run_time_ticks > 0 {
                state.run_time_ticks = info.run_time_ticks;
            }
            state.audio_streams = info.audio_streams;
            state.subtitle_streams = info.subtitle_streams;
            state.chapters = info.chapters;
            state.current_position_ticks = resume;
            session.seek_pending = true;
            (url, resume)
        };

        info!(
            "{} 🎬 打开 {} 起始 {:.1}s",
            log_ctx(generation),
            redact_url(&url),
            ticks_to_secs(resume)
        );
        self.clock.close();
        if let Err(e) = self.clock.open(&url).and_then(|_| self.clock.prepare()) {
            self.on_engine_error(e.to_string());
            return;
        }
        if resume > 0 {
            if let Err(e) = self.clock.seek(resume) {
                warn!("{} ⚠️  起始位置 seek 失败: {}", log_ctx(generation), e);
            }
        }
        if let Err(e) = self.clock.play() {
            self.on_engine_error(e.to_string());
            return;
        }

        let audio_tracks = self.clock.track_count(TrackKind::Audio);
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };

        // 直接播放时由引擎切换到用户选择的音轨，转码流已经按请求合成
        if session.audio_explicit && session.state.play_method != PlayMethod::Transcode && audio_tracks > 1 {
            let position = session
                .state
                .selected_audio_index
                .and_then(|index| TrackSelector::audio_position(&session.state, index));
            if let Some(position) = position {
                if let Err(e) = self.clock.select_track(TrackKind::Audio, Some(position)) {
                    warn!("{} ⚠️  恢复音轨选择失败: {}", log_ctx(generation), e);
                }
            }
        }

        session.set_status(SessionStatus::Ready, &self.events_tx);
        session.timers.start_interval(SessionTimer::Progress, self.config.playback.progress_interval(), now);
        session.timers.start_interval(SessionTimer::HealthCheck, HEALTH_CHECK_INTERVAL, now);
        session.start_reported = true;
        let report = session.progress_report();
        let subtitle_index = session.state.selected_subtitle_index;
        self.spawn_report(ReportKind::Start, report);

        if let Err(e) = self.apply_subtitle(subtitle_index) {
            warn!("{} ⚠️  字幕 #{} 无法应用: {}", log_ctx(generation), subtitle_index, e);
            if let Some(session) = live(&mut self.session) {
                session.state.selected_subtitle_index = -1;
            }
        }
    }

    fn on_subtitle_cues(&mut self, serial: u64, index: i32, result: Result<Vec<SubtitleEvent>>) {
        let generation = self.generation;
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };
        if serial != session.subtitle_serial {
            debug!("{} 🗑️  丢弃过期字幕 #{}", log_ctx(generation), index);
            return;
        }
        match result {
            Ok(events) => {
                TrackSelector::install_cues(&mut session.subtitles, events);
                session.refresh_overlay(&self.events_tx);
            }
            Err(e) => warn!("{} ⚠️  字幕 #{} 不可用: {}", log_ctx(generation), index, e),
        }
    }

    fn on_segments(&mut self, result: Result<MediaSegments>) {
        let generation = self.generation;
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };
        match result {
            Ok(segments) => session.markers.set_segments(segments),
            Err(e) => warn!("{} ⚠️  获取片头/片尾标记失败: {}", log_ctx(generation), e),
        }
    }

    fn on_next_episode(&mut self, result: Result<Option<MediaItem>>, now: Instant) {
        let generation = self.generation;
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };
        match result {
            Ok(candidate) => session.next_episode.set_candidate(candidate),
            Err(e) => {
                warn!("{} ⚠️  查询下一集失败: {}", log_ctx(generation), e);
                return;
            }
        }
        if session.countdown_wanted {
            self.start_countdown(now);
        }
    }

    // ---------- 引擎事件 ----------

    fn handle_clock_event(&mut self, event: ClockEvent, now: Instant) {
        match event {
            ClockEvent::TimeUpdate(ticks) => self.on_time_update(ticks, now),
            ClockEvent::Playing => {
                if let Some(session) = live(&mut self.session) {
                    session.health.buffering_ended(now);
                    session.set_status(SessionStatus::Playing, &self.events_tx);
                }
            }
            ClockEvent::Paused => {
                if let Some(session) = live(&mut self.session) {
                    session.set_status(SessionStatus::Paused, &self.events_tx);
                }
            }
            ClockEvent::BufferingStarted => {
                let verdict = match live(&mut self.session) {
                    Some(session) => {
                        session.set_status(SessionStatus::Buffering, &self.events_tx);
                        session.health.buffering_started(now)
                    }
                    None => None,
                };
                if let Some(reason) = verdict {
                    self.on_unhealthy(reason);
                }
            }
            ClockEvent::BufferingEnded => {
                if let Some(session) = live(&mut self.session) {
                    session.health.buffering_ended(now);
                    if session.state.status == SessionStatus::Buffering {
                        session.set_status(SessionStatus::Playing, &self.events_tx);
                    }
                }
            }
            ClockEvent::Ended => self.on_natural_end(),
            ClockEvent::Error(message) => self.on_engine_error(message),
        }
    }

    fn on_time_update(&mut self, ticks: Ticks, now: Instant) {
        let near_end = self.config.playback.near_end_ticks();
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };

        // 位置单调前进，只有显式 seek 之后才接受回退
        if session.seek_pending {
            session.seek_pending = false;
        } else if ticks < session.state.current_position_ticks {
            debug!(
                "{} 忽略回退的时间更新 {} < {}",
                log_ctx(session.state.generation),
                ticks,
                session.state.current_position_ticks
            );
            return;
        }

        session.state.current_position_ticks = ticks;
        session.health.progress(now, ticks);
        session.refresh_overlay(&self.events_tx);

        let markers = session.markers.update(ticks);
        let visible = markers.in_intro && session.markers.intro_end().is_some();
        session.set_skip_intro(visible, &self.events_tx);

        let run_time = session.state.run_time_ticks;
        let near = run_time > 0 && ticks > 0 && run_time - ticks < near_end;
        if markers.credits_edge || near {
            self.start_countdown(now);
        }
    }

    fn start_countdown(&mut self, now: Instant) {
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };
        session.countdown_wanted = true;
        if !session.next_episode.start() {
            return;
        }
        session.timers.start_interval(SessionTimer::Countdown, COUNTDOWN_INTERVAL, now);
        let state = session.next_episode.state();
        if let Some(candidate) = state.candidate.clone() {
            let seconds = state.seconds_remaining.unwrap_or(0);
            self.emit(PlayerEvent::CountdownStarted { candidate, seconds });
        }
    }

    fn on_natural_end(&mut self) {
        let committed = match live(&mut self.session) {
            Some(session) => {
                session.timers.cancel(SessionTimer::Countdown);
                session.next_episode.commit_on_end()
            }
            None => return,
        };
        match committed {
            Some(item) => self.advance(item),
            None => {
                info!("{} 🏁 播放结束", log_ctx(self.generation));
                self.teardown(SessionStatus::Ended);
                self.emit(PlayerEvent::Ended);
            }
        }
    }

    /// 直接播放的第一次失败可恢复，其余一律致命
    fn on_engine_error(&mut self, message: String) {
        if self.try_fallback(&message) {
            warn!("{} ⚠️  {}", log_ctx(self.generation), PlayerError::RecoverablePlayback(message));
        } else {
            self.fail(PlayerError::FatalPlayback(message));
        }
    }

    fn on_unhealthy(&mut self, reason: UnhealthyReason) {
        self.emit(PlayerEvent::Unhealthy(reason.clone()));
        if self.config.health.fallback_on_unhealthy && !self.try_fallback(&format!("{:?}", reason)) {
            info!("{} 🚑 播放不健康，但已无法回退", log_ctx(self.generation));
        }
    }

    /// 每个会话最多一次：关闭直接播放，强制转码，在当前位置重新打开
    fn try_fallback(&mut self, reason: &str) -> bool {
        let generation = self.generation;
        let clock_ticks = self.clock.current_ticks();
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return false,
        };
        if session.state.retried || session.state.play_method == PlayMethod::Transcode {
            return false;
        }

        session.state.retried = true;
        let resume = if clock_ticks > 0 {
            clock_ticks
        } else {
            session.state.current_position_ticks
        };
        warn!(
            "{} 🔁 {}，改用转码（位置 {:.1}s）",
            log_ctx(generation),
            reason,
            ticks_to_secs(resume)
        );

        session.timers.cancel(SessionTimer::Progress);
        session.timers.cancel(SessionTimer::HealthCheck);
        session.state.current_position_ticks = resume;
        session.set_status(SessionStatus::Loading, &self.events_tx);

        let mut request = PlaybackInfoRequest::initial(&session.item.id, &session.options).force_transcode();
        request.start_position_ticks = resume;
        request.media_source_id = session.state.media_source_id.clone();
        request.audio_stream_index = session.state.selected_audio_index;
        request.subtitle_stream_index = Some(session.state.selected_subtitle_index);

        self.clock.close();
        self.request_playback_info(InfoPurpose::Fallback { resume }, request);
        true
    }

    fn fire_timers(&mut self, now: Instant) {
        let due = match live(&mut self.session) {
            Some(s) => s.timers.fire_due(now),
            None => return,
        };
        for key in due {
            if !self.is_live() {
                break;
            }
            match key {
                SessionTimer::Progress => self.report_progress(),
                SessionTimer::HealthCheck => {
                    let verdict = live(&mut self.session).and_then(|s| s.health.check(now));
                    if let Some(reason) = verdict {
                        self.on_unhealthy(reason);
                    }
                }
                SessionTimer::Countdown => self.tick_countdown(),
            }
        }
    }

    fn tick_countdown(&mut self) {
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return,
        };
        match session.next_episode.tick() {
            Some(CountdownStep::Remaining(seconds)) => self.emit(PlayerEvent::CountdownTick(seconds)),
            Some(CountdownStep::Commit(item)) => self.advance(item),
            None => {
                session.timers.cancel(SessionTimer::Countdown);
            }
        }
    }

    // ---------- 轨道 ----------

    /// 切换音轨：能原生切换就原生切换，否则在当前位置重新请求播放信息
    pub fn select_audio(&mut self, index: i32) -> Result<()> {
        let session = ready(&mut self.session)?;
        if session.state.audio_stream(index).is_none() {
            return Err(PlayerError::TrackNotFound {
                kind: TrackKind::Audio,
                index,
            });
        }
        session.audio_explicit = true;

        match TrackSelector::switch_audio(&mut self.clock, &session.state, index) {
            AudioSwitch::Native => {
                session.state.selected_audio_index = Some(index);
                Ok(())
            }
            AudioSwitch::Reload { resume_ticks } => {
                let mut request = PlaybackInfoRequest::initial(&session.item.id, &session.options);
                if session.state.play_method == PlayMethod::Transcode {
                    request = request.force_transcode();
                }
                request.start_position_ticks = resume_ticks;
                request.media_source_id = session.state.media_source_id.clone();
                request.audio_stream_index = Some(index);
                request.subtitle_stream_index = Some(session.state.selected_subtitle_index);
                self.request_playback_info(
                    InfoPurpose::AudioReload {
                        resume: resume_ticks,
                        audio_index: index,
                    },
                    request,
                );
                Ok(())
            }
        }
    }

    /// 选择字幕，-1 = 关闭
    pub fn select_subtitle(&mut self, index: i32) -> Result<()> {
        let session = ready(&mut self.session)?;
        if index >= 0 && session.state.subtitle_stream(index).is_none() {
            return Err(PlayerError::TrackNotFound {
                kind: TrackKind::Subtitle,
                index,
            });
        }
        self.apply_subtitle(index)
    }

    fn apply_subtitle(&mut self, index: i32) -> Result<()> {
        let generation = self.generation;
        let native_tracks = self.clock.track_count(TrackKind::Subtitle);
        let session = live(&mut self.session).ok_or(PlayerError::NoSession)?;
        let plan = TrackSelector::plan_subtitle(&session.state, index, native_tracks).ok_or(
            PlayerError::TrackNotFound {
                kind: TrackKind::Subtitle,
                index,
            },
        )?;

        // 新的选择让还在路上的字幕请求失效
        session.subtitle_serial += 1;
        session.subtitles.clear();
        session.set_overlay(None, &self.events_tx);

        let disable_native = |clock: &mut C| {
            if native_tracks > 0 {
                if let Err(e) = clock.select_track(TrackKind::Subtitle, None) {
                    debug!("{} 关闭原生字幕失败: {}", log_ctx(generation), e);
                }
            }
        };

        let fetch = match plan {
            SubtitlePlan::Off => {
                disable_native(&mut self.clock);
                session.state.selected_subtitle_index = -1;
                None
            }
            SubtitlePlan::Native { position } => match self.clock.select_track(TrackKind::Subtitle, Some(position)) {
                Ok(()) => {
                    info!("{} 💬 原生字幕 #{} (位置 {})", log_ctx(generation), index, position);
                    session.state.selected_subtitle_index = index;
                    None
                }
                Err(e) => {
                    warn!("{} ⚠️  引擎拒绝字幕 #{}: {}", log_ctx(generation), index, e);
                    let stream = session.state.subtitle_stream(index).filter(|s| s.is_text_based).cloned();
                    session.state.selected_subtitle_index = if stream.is_some() { index } else { -1 };
                    stream
                }
            },
            SubtitlePlan::Extract(stream) => {
                disable_native(&mut self.clock);
                session.state.selected_subtitle_index = index;
                Some(stream)
            }
            SubtitlePlan::Unsupported(_) => {
                disable_native(&mut self.clock);
                session.state.selected_subtitle_index = -1;
                None
            }
        };

        if let Some(stream) = fetch {
            let serial = session.subtitle_serial;
            let request = SubtitleRequest {
                item_id: session.state.item_id.clone(),
                media_source_id: session.state.media_source_id.clone().unwrap_or_default(),
                stream,
            };
            debug!("{} 📥 拉取字幕 #{}", log_ctx(generation), index);
            self.spawn_request(generation, move |api| InboxMessage::SubtitleCues {
                serial,
                index,
                result: api.subtitle_events(&request),
            });
        }
        Ok(())
    }

    // ---------- 播放控制 ----------

    /// 跳转；引擎拒绝时位置不变并返回 false
    pub fn seek(&mut self, ticks: Ticks) -> bool {
        let generation = self.generation;
        let session = match ready(&mut self.session) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let mut target = ticks.max(0);
        if session.state.run_time_ticks > 0 {
            target = target.min(session.state.run_time_ticks);
        }
        if let Err(e) = self.clock.seek(target) {
            warn!("{} ⚠️  seek 到 {:.1}s 失败: {}", log_ctx(generation), ticks_to_secs(target), e);
            return false;
        }
        info!("{} ⏩ seek 到 {:.1}s", log_ctx(generation), ticks_to_secs(target));
        session.state.current_position_ticks = target;
        session.seek_pending = true;
        session.refresh_overlay(&self.events_tx);
        self.report_progress();
        true
    }

    /// 片头区间内跳到片头结束
    pub fn skip_intro(&mut self) -> bool {
        let target = match self.session.as_ref() {
            Some(s) if s.is_live() && s.skip_intro_visible => s.markers.intro_end(),
            _ => None,
        };
        match target {
            Some(ticks) => self.seek(ticks),
            None => false,
        }
    }

    pub fn set_speed(&mut self, rate: f64) -> Result<()> {
        let session = ready(&mut self.session)?;
        self.clock.set_speed(rate)?;
        session.state.playback_rate = rate;
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        let session = ready(&mut self.session)?;
        self.clock.play()?;
        session.set_status(SessionStatus::Playing, &self.events_tx);
        self.report_progress();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let session = ready(&mut self.session)?;
        self.clock.pause()?;
        session.set_status(SessionStatus::Paused, &self.events_tx);
        self.report_progress();
        Ok(())
    }

    pub fn set_subtitle_offset(&mut self, offset_ticks: Ticks) {
        if let Some(session) = live(&mut self.session) {
            session.state.subtitle_offset_ticks = offset_ticks;
            session.refresh_overlay(&self.events_tx);
        }
    }

    /// "立即播放"下一集
    pub fn play_next_now(&mut self) -> bool {
        let committed = live(&mut self.session).and_then(|s| s.next_episode.commit_now());
        match committed {
            Some(item) => {
                self.advance(item);
                true
            }
            None => false,
        }
    }

    /// 隐藏下一集卡片，本会话内不再自动切换
    pub fn cancel_next(&mut self) -> bool {
        let session = match live(&mut self.session) {
            Some(s) => s,
            None => return false,
        };
        if !session.next_episode.cancel() {
            return false;
        }
        session.timers.cancel(SessionTimer::Countdown);
        self.emit(PlayerEvent::CountdownCancelled);
        true
    }
}

impl<C: PositionClock> Drop for PlaybackSessionManager<C> {
    fn drop(&mut self) {
        self.teardown(SessionStatus::Ended);
    }
}
