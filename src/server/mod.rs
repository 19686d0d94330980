// 媒体服务器接口：播放引擎只依赖这里的 trait 和数据结构

pub mod jellyfin;
pub mod spawner;

pub use jellyfin::JellyfinClient;
pub use spawner::{RuntimeSpawner, TaskSpawner};

use crate::core::{
    AudioStream, Chapter, MediaItem, MediaSegments, PlayMethod, Result, StartOptions, SubtitleEvent,
    SubtitleStream, Ticks,
};
use serde::Serialize;

/// 播放信息请求
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInfoRequest {
    pub item_id: String,
    pub media_source_id: Option<String>,
    pub start_position_ticks: Ticks,
    pub max_bitrate: Option<u64>,
    pub prefer_transcode: bool,
    pub enable_direct_play: bool,
    pub enable_direct_stream: bool,
    pub enable_transcoding: bool,
    pub audio_stream_index: Option<i32>,
    pub subtitle_stream_index: Option<i32>,
}

impl PlaybackInfoRequest {
    /// 首次请求：按用户选项决定是否允许直接播放
    pub fn initial(item_id: &str, options: &StartOptions) -> Self {
        Self {
            item_id: item_id.to_string(),
            media_source_id: None,
            start_position_ticks: options.start_position_ticks.max(0),
            max_bitrate: options.max_bitrate,
            prefer_transcode: options.prefer_transcode,
            enable_direct_play: !options.prefer_transcode,
            enable_direct_stream: !options.prefer_transcode,
            enable_transcoding: true,
            audio_stream_index: options.audio_stream_index,
            subtitle_stream_index: options.subtitle_stream_index,
        }
    }

    /// 强制转码（关闭直接播放 / 直接串流）
    pub fn force_transcode(mut self) -> Self {
        self.prefer_transcode = true;
        self.enable_direct_play = false;
        self.enable_direct_stream = false;
        self.enable_transcoding = true;
        self
    }
}

/// 播放信息响应
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInfo {
    pub url: String,
    pub play_method: PlayMethod,
    pub media_source_id: String,
    pub play_session_id: Option<String>,
    pub run_time_ticks: Ticks,
    pub audio_streams: Vec<AudioStream>,
    pub subtitle_streams: Vec<SubtitleStream>,
    pub chapters: Vec<Chapter>,
    pub default_audio_index: Option<i32>,
    pub default_subtitle_index: Option<i32>,
}

/// 字幕拉取请求
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleRequest {
    pub item_id: String,
    pub media_source_id: String,
    pub stream: SubtitleStream,
}

/// 开始 / 进度 / 停止上报
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgressReport {
    pub item_id: String,
    pub media_source_id: Option<String>,
    pub play_session_id: Option<String>,
    pub position_ticks: Ticks,
    pub is_paused: bool,
    pub play_method: PlayMethod,
    pub audio_stream_index: Option<i32>,
    pub subtitle_stream_index: Option<i32>,
    pub playback_rate: f64,
    pub can_seek: bool,
}

/// 媒体服务器 API（阻塞调用，由 TaskSpawner 在工作线程上执行）
pub trait MediaServerApi: Send + Sync {
    fn playback_info(&self, request: &PlaybackInfoRequest) -> Result<PlaybackInfo>;

    fn subtitle_events(&self, request: &SubtitleRequest) -> Result<Vec<SubtitleEvent>>;

    fn report_start(&self, report: &ProgressReport) -> Result<()>;

    fn report_progress(&self, report: &ProgressReport) -> Result<()>;

    fn report_stopped(&self, report: &ProgressReport) -> Result<()>;

    fn media_segments(&self, item_id: &str) -> Result<MediaSegments>;

    fn next_episode(&self, item: &MediaItem) -> Result<Option<MediaItem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_request_respects_prefer_transcode() {
        let options = StartOptions {
            start_position_ticks: -5,
            prefer_transcode: true,
            ..Default::default()
        };
        let request = PlaybackInfoRequest::initial("item", &options);
        assert_eq!(request.start_position_ticks, 0);
        assert!(!request.enable_direct_play);
        assert!(!request.enable_direct_stream);
        assert!(request.enable_transcoding);
    }

    #[test]
    fn test_force_transcode() {
        let request = PlaybackInfoRequest::initial("item", &StartOptions::default());
        assert!(request.enable_direct_play);
        let forced = request.force_transcode();
        assert!(forced.prefer_transcode);
        assert!(!forced.enable_direct_play && !forced.enable_direct_stream);
        assert!(forced.enable_transcoding);
    }

    #[test]
    fn test_progress_report_json_shape() {
        let report = ProgressReport {
            item_id: "i".into(),
            media_source_id: Some("m".into()),
            play_session_id: None,
            position_ticks: 42,
            is_paused: false,
            play_method: PlayMethod::Transcode,
            audio_stream_index: Some(1),
            subtitle_stream_index: Some(-1),
            playback_rate: 1.0,
            can_seek: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["ItemId"], "i");
        assert_eq!(json["PositionTicks"], 42);
        assert_eq!(json["PlayMethod"], "Transcode");
        assert_eq!(json["SubtitleStreamIndex"], -1);
    }
}
