// 测试替身：脚本化引擎、假服务器、手动/同步执行器

use crate::core::{
    AudioStream, ClockState, MediaItem, MediaSegments, PlayMethod, PlayerError, Result, SubtitleEvent,
    SubtitleStream, Ticks, TrackKind, TICKS_PER_SECOND,
};
use crate::player::position_clock::{ClockEvent, PositionClock};
use crate::server::{
    MediaServerApi, PlaybackInfo, PlaybackInfoRequest, ProgressReport, SubtitleRequest, TaskSpawner,
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Instant;

/// 脚本化引擎的共享状态
#[derive(Debug)]
pub struct ClockScript {
    pub opened: Vec<String>,
    pub seeks: Vec<Ticks>,
    pub selected: Vec<(TrackKind, Option<usize>)>,
    pub closes: usize,
    pub position: Ticks,
    pub duration: Option<Ticks>,
    pub state: ClockState,
    pub speed: f64,
    pub audio_tracks: usize,
    pub subtitle_tracks: usize,
    /// 接下来 N 次 open 失败
    pub fail_opens: usize,
    pub fail_seek: bool,
    pub reject_select: bool,
    pub pending: Vec<ClockEvent>,
}

impl Default for ClockScript {
    fn default() -> Self {
        Self {
            opened: Vec::new(),
            seeks: Vec::new(),
            selected: Vec::new(),
            closes: 0,
            position: 0,
            duration: None,
            state: ClockState::Idle,
            speed: 1.0,
            audio_tracks: 1,
            subtitle_tracks: 0,
            fail_opens: 0,
            fail_seek: false,
            reject_select: false,
            pending: Vec::new(),
        }
    }
}

/// 记录所有调用的引擎，事件由测试手动注入
#[derive(Debug, Clone, Default)]
pub struct ScriptedClock {
    script: Arc<Mutex<ClockScript>>,
    url: Option<String>,
}

impl ScriptedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, ClockScript> {
        self.script.lock()
    }

    pub fn push(&self, event: ClockEvent) {
        self.script.lock().pending.push(event);
    }

    /// 模拟播放前进：同时改引擎位置并注入 TimeUpdate
    pub fn advance_to(&self, ticks: Ticks) {
        let mut script = self.script.lock();
        script.position = ticks;
        script.pending.push(ClockEvent::TimeUpdate(ticks));
    }
}

impl PositionClock for ScriptedClock {
    fn open(&mut self, url: &str) -> Result<()> {
        let mut script = self.script.lock();
        if script.fail_opens > 0 {
            script.fail_opens -= 1;
            return Err(PlayerError::Engine(format!("无法打开 {}", url)));
        }
        script.opened.push(url.to_string());
        script.state = ClockState::Opened;
        script.position = 0;
        self.url = Some(url.to_string());
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.script.lock().state = ClockState::Ready;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.state = ClockState::Playing;
        script.pending.push(ClockEvent::Playing);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.state = ClockState::Paused;
        script.pending.push(ClockEvent::Paused);
        Ok(())
    }

    fn seek(&mut self, ticks: Ticks) -> Result<()> {
        let mut script = self.script.lock();
        if script.fail_seek {
            return Err(PlayerError::Seek(format!("seek {} 被拒绝", ticks)));
        }
        script.seeks.push(ticks);
        script.position = ticks;
        Ok(())
    }

    fn current_ticks(&self) -> Ticks {
        self.script.lock().position
    }

    fn duration_ticks(&self) -> Option<Ticks> {
        self.script.lock().duration
    }

    fn state(&self) -> ClockState {
        self.script.lock().state
    }

    fn set_speed(&mut self, rate: f64) -> Result<()> {
        self.script.lock().speed = rate;
        Ok(())
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        let script = self.script.lock();
        match kind {
            TrackKind::Audio => script.audio_tracks,
            TrackKind::Subtitle => script.subtitle_tracks,
        }
    }

    fn select_track(&mut self, kind: TrackKind, position: Option<usize>) -> Result<()> {
        let mut script = self.script.lock();
        if script.reject_select {
            return Err(PlayerError::Engine("轨道切换被拒绝".to_string()));
        }
        script.selected.push((kind, position));
        Ok(())
    }

    fn close(&mut self) {
        let mut script = self.script.lock();
        script.closes += 1;
        script.state = ClockState::Idle;
        script.pending.clear();
        self.url = None;
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn poll_events(&mut self, _now: Instant) -> Vec<ClockEvent> {
        std::mem::take(&mut self.script.lock().pending)
    }
}

/// 假服务器的脚本和调用记录
#[derive(Debug, Default)]
pub struct ApiScript {
    pub info_requests: Vec<PlaybackInfoRequest>,
    /// 接下来 N 次 playback_info 失败
    pub fail_info: usize,
    /// 所有强制转码的请求都失败
    pub fail_transcode: bool,
    pub subtitle_requests: Vec<i32>,
    pub cues: Vec<SubtitleEvent>,
    pub fail_subtitles: bool,
    pub segments: MediaSegments,
    pub next: Option<MediaItem>,
    pub reports: Vec<(&'static str, ProgressReport)>,
}

impl ApiScript {
    pub fn reports_of(&self, kind: &str) -> Vec<&ProgressReport> {
        self.reports.iter().filter(|(k, _)| *k == kind).map(|(_, r)| r).collect()
    }
}

pub const RUN_TIME: Ticks = 1000 * TICKS_PER_SECOND;

pub fn audio_stream(index: i32) -> AudioStream {
    AudioStream {
        index,
        codec: "aac".into(),
        language: Some(if index == 1 { "jpn".into() } else { "eng".into() }),
        display_title: format!("Audio {}", index),
        is_default: index == 1,
        is_forced: false,
        is_embedded_native: true,
        is_text_based: false,
        channels: Some(2),
    }
}

pub fn subtitle_stream(index: i32, embedded: bool, text: bool) -> SubtitleStream {
    SubtitleStream {
        index,
        codec: if text { "subrip".into() } else { "pgssub".into() },
        language: None,
        display_title: format!("Subtitle {}", index),
        is_default: false,
        is_forced: false,
        is_embedded_native: embedded,
        is_text_based: text,
        delivery_url: None,
    }
}

pub fn direct_url(item_id: &str) -> String {
    format!("http://srv/Videos/{}/stream?Static=true", item_id)
}

pub fn transcode_url(item_id: &str) -> String {
    format!("http://srv/videos/{}/master.m3u8?api_key=k", item_id)
}

/// 由请求决定响应：允许直接播放就返回直接播放地址，否则返回转码地址
///
/// 字幕：3 = 内嵌文本，4 = 图形，5 = 外挂文本
pub fn playback_info_for(request: &PlaybackInfoRequest) -> PlaybackInfo {
    let (url, play_method) = if request.enable_direct_play {
        (direct_url(&request.item_id), PlayMethod::DirectPlay)
    } else {
        (transcode_url(&request.item_id), PlayMethod::Transcode)
    };
    PlaybackInfo {
        url,
        play_method,
        media_source_id: format!("ms-{}", request.item_id),
        play_session_id: Some("ps-1".into()),
        run_time_ticks: RUN_TIME,
        audio_streams: vec![audio_stream(1), audio_stream(2)],
        subtitle_streams: vec![
            subtitle_stream(3, true, true),
            subtitle_stream(4, false, false),
            subtitle_stream(5, false, true),
        ],
        chapters: Vec::new(),
        default_audio_index: Some(1),
        default_subtitle_index: None,
    }
}

#[derive(Debug, Default)]
pub struct FakeApi {
    script: Mutex<ApiScript>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, ApiScript> {
        self.script.lock()
    }
}

impl MediaServerApi for FakeApi {
    fn playback_info(&self, request: &PlaybackInfoRequest) -> Result<PlaybackInfo> {
        let mut script = self.script.lock();
        script.info_requests.push(request.clone());
        if script.fail_info > 0 {
            script.fail_info -= 1;
            return Err(PlayerError::Http {
                status: 500,
                message: "playback info unavailable".into(),
            });
        }
        if script.fail_transcode && !request.enable_direct_play {
            return Err(PlayerError::Http {
                status: 500,
                message: "transcoder unavailable".into(),
            });
        }
        Ok(playback_info_for(request))
    }

    fn subtitle_events(&self, request: &SubtitleRequest) -> Result<Vec<SubtitleEvent>> {
        let mut script = self.script.lock();
        script.subtitle_requests.push(request.stream.index);
        if script.fail_subtitles {
            return Err(PlayerError::TrackFetch("404".into()));
        }
        Ok(script.cues.clone())
    }

    fn report_start(&self, report: &ProgressReport) -> Result<()> {
        self.script.lock().reports.push(("start", report.clone()));
        Ok(())
    }

    fn report_progress(&self, report: &ProgressReport) -> Result<()> {
        self.script.lock().reports.push(("progress", report.clone()));
        Ok(())
    }

    fn report_stopped(&self, report: &ProgressReport) -> Result<()> {
        self.script.lock().reports.push(("stopped", report.clone()));
        Ok(())
    }

    fn media_segments(&self, _item_id: &str) -> Result<MediaSegments> {
        Ok(self.script.lock().segments)
    }

    fn next_episode(&self, _item: &MediaItem) -> Result<Option<MediaItem>> {
        Ok(self.script.lock().next.clone())
    }
}

/// 在调用线程上立即执行
pub struct InlineSpawner;

impl TaskSpawner for InlineSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// 先攒着，测试决定什么时候执行
#[derive(Default)]
pub struct ManualSpawner {
    tasks: Mutex<Vec<Box<dyn FnOnce() + Send + 'static>>>,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// 只执行最早提交的一个任务
    pub fn run_first(&self) -> bool {
        let task = {
            let mut tasks = self.tasks.lock();
            if tasks.is_empty() {
                return false;
            }
            tasks.remove(0)
        };
        task();
        true
    }

    pub fn run_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task();
        }
    }
}

impl TaskSpawner for ManualSpawner {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.tasks.lock().push(task);
    }
}
