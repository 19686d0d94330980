use serde::{Deserialize, Serialize};

/// 播放位置单位：100 纳秒（与媒体服务器一致，所有引擎统一换算到 tick）
pub type Ticks = i64;

pub const TICKS_PER_MILLISECOND: Ticks = 10_000;
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

pub fn ticks_from_secs(secs: f64) -> Ticks {
    if !secs.is_finite() {
        return 0;
    }
    (secs * TICKS_PER_SECOND as f64).round() as Ticks
}

pub fn ticks_to_secs(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

pub fn ticks_from_millis(ms: i64) -> Ticks {
    ms.saturating_mul(TICKS_PER_MILLISECOND)
}

pub fn ticks_to_millis(ticks: Ticks) -> i64 {
    ticks / TICKS_PER_MILLISECOND
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// HLS - HTTP Live Streaming（转码输出）
    Hls,
    /// HTTP - 普通 HTTP 流（直接播放/直接串流）
    Http,
    /// 本地文件
    File,
}

impl StreamProtocol {
    /// 从 URL 识别协议，不支持的协议返回 None
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("file://") {
            Some(StreamProtocol::File)
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            if lower.contains(".m3u8") {
                Some(StreamProtocol::Hls)
            } else {
                Some(StreamProtocol::Http)
            }
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::Hls => "HLS",
            StreamProtocol::Http => "HTTP",
            StreamProtocol::File => "FILE",
        }
    }
}

/// 播放方式（服务器处理程度依次增加）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMethod {
    DirectPlay,
    DirectStream,
    Transcode,
}

impl PlayMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayMethod::DirectPlay => "DirectPlay",
            PlayMethod::DirectStream => "DirectStream",
            PlayMethod::Transcode => "Transcode",
        }
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loading,
    Ready,
    Playing,
    Paused,
    Buffering,
    Error,
    Ended,
}

impl SessionStatus {
    /// Error / Ended 为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Ended)
    }
}

/// 引擎自身的状态（由 PositionClock 归一化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Idle,
    Opened,
    Ready,
    Playing,
    Paused,
    Buffering,
    Ended,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Subtitle,
}

/// 音频流描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub index: i32,
    pub codec: String,
    pub language: Option<String>,
    pub display_title: String,
    pub is_default: bool,
    pub is_forced: bool,
    pub is_embedded_native: bool,
    pub is_text_based: bool,
    pub channels: Option<u32>,
}

/// 字幕流描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStream {
    pub index: i32,
    pub codec: String,
    pub language: Option<String>,
    pub display_title: String,
    pub is_default: bool,
    pub is_forced: bool,
    /// 引擎可以原生切换，不需要拉取字幕文本
    pub is_embedded_native: bool,
    /// 字幕文本需要拉取并由叠加层渲染
    pub is_text_based: bool,
    /// 服务器上的外挂字幕地址（相对路径）
    pub delivery_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    pub start_position_ticks: Ticks,
}

/// 一条字幕
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleEvent {
    pub start_ticks: Ticks,
    pub end_ticks: Ticks,
    pub text: String,
}

/// 片头 / 片尾标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSegments {
    pub intro_start: Option<Ticks>,
    pub intro_end: Option<Ticks>,
    pub credits_start: Option<Ticks>,
}

/// 可播放条目（来自媒体库，只保留播放引擎关心的字段）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub run_time_ticks: Option<Ticks>,
    pub resume_position_ticks: Ticks,
}

impl MediaItem {
    /// 日志 / 标题显示用
    pub fn display_name(&self) -> String {
        match (&self.series_name, self.season_number, self.episode_number) {
            (Some(series), Some(season), Some(episode)) => {
                format!("{} S{:02}E{:02} - {}", series, season, episode, self.name)
            }
            _ => self.name.clone(),
        }
    }
}

/// 启动参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    pub start_position_ticks: Ticks,
    pub max_bitrate: Option<u64>,
    pub prefer_transcode: bool,
    pub audio_stream_index: Option<i32>,
    pub subtitle_stream_index: Option<i32>,
}

/// 当前播放会话（只读快照供 UI 渲染）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSession {
    pub generation: u64,
    pub item_id: String,
    pub media_source_id: Option<String>,
    pub play_session_id: Option<String>,
    pub play_method: PlayMethod,
    pub stream_url: Option<String>,
    pub run_time_ticks: Ticks,
    pub current_position_ticks: Ticks,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
    pub chapters: Vec<Chapter>,
    pub selected_audio_index: Option<i32>,
    /// -1 = 关闭
    pub selected_subtitle_index: i32,
    pub subtitle_offset_ticks: Ticks,
    pub playback_rate: f64,
    pub status: SessionStatus,
    /// 本会话是否已经使用过转码回退
    pub retried: bool,
}

impl PlaybackSession {
    pub fn new(generation: u64, item_id: &str) -> Self {
        Self {
            generation,
            item_id: item_id.to_string(),
            media_source_id: None,
            play_session_id: None,
            play_method: PlayMethod::DirectPlay,
            stream_url: None,
            run_time_ticks: 0,
            current_position_ticks: 0,
            audio_streams: Vec::new(),
            subtitle_streams: Vec::new(),
            chapters: Vec::new(),
            selected_audio_index: None,
            selected_subtitle_index: -1,
            subtitle_offset_ticks: 0,
            playback_rate: 1.0,
            status: SessionStatus::Loading,
            retried: false,
        }
    }

    pub fn audio_stream(&self, index: i32) -> Option<&AudioStream> {
        self.audio_streams.iter().find(|s| s.index == index)
    }

    pub fn subtitle_stream(&self, index: i32) -> Option<&SubtitleStream> {
        self.subtitle_streams.iter().find(|s| s.index == index)
    }

    /// 当前位置所在章节
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters
            .iter()
            .filter(|c| c.start_position_ticks <= self.current_position_ticks)
            .max_by_key(|c| c.start_position_ticks)
    }
}
