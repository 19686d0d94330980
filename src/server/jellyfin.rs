use crate::core::{
    AudioStream, Chapter, MediaItem, MediaSegments, PlayMethod, PlayerError, Result, ServerConfig,
    SubtitleEvent, SubtitleStream, Ticks,
};
use crate::player::subtitle_parser::{SubtitleFormat, SubtitleParser};
use crate::server::{MediaServerApi, PlaybackInfo, PlaybackInfoRequest, ProgressReport, SubtitleRequest};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

/// 日志里隐藏 api_key
pub fn redact_url(url: &str) -> String {
    match url.find("api_key=") {
        Some(idx) => {
            let start = idx + "api_key=".len();
            let end = url[start..].find('&').map(|i| start + i).unwrap_or(url.len());
            format!("{}[REDACTED]{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

// ---------- 服务器 DTO（PascalCase） ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PlaybackInfoBody<'a> {
    user_id: &'a str,
    start_time_ticks: Ticks,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_streaming_bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_source_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_stream_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle_stream_index: Option<i32>,
    enable_direct_play: bool,
    enable_direct_stream: bool,
    enable_transcoding: bool,
    auto_open_live_stream: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PlaybackInfoResponse {
    media_sources: Vec<MediaSourceDto>,
    play_session_id: Option<String>,
    error_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MediaSourceDto {
    id: String,
    container: Option<String>,
    supports_direct_play: bool,
    supports_direct_stream: bool,
    supports_transcoding: bool,
    direct_stream_url: Option<String>,
    transcoding_url: Option<String>,
    run_time_ticks: Option<Ticks>,
    media_streams: Vec<MediaStreamDto>,
    default_audio_stream_index: Option<i32>,
    default_subtitle_stream_index: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MediaStreamDto {
    index: i32,
    #[serde(rename = "Type")]
    kind: String,
    codec: Option<String>,
    language: Option<String>,
    display_title: Option<String>,
    is_default: bool,
    is_forced: bool,
    is_external: bool,
    is_text_subtitle_stream: bool,
    delivery_method: Option<String>,
    delivery_url: Option<String>,
    channels: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemDto {
    id: String,
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    series_id: Option<String>,
    series_name: Option<String>,
    parent_index_number: Option<i32>,
    index_number: Option<i32>,
    run_time_ticks: Option<Ticks>,
    user_data: Option<UserDataDto>,
    chapters: Vec<ChapterDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct UserDataDto {
    playback_position_ticks: Ticks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ChapterDto {
    name: Option<String>,
    start_position_ticks: Ticks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ItemsResponse {
    items: Vec<ItemDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MediaSegmentDto {
    #[serde(rename = "Type")]
    kind: String,
    start_ticks: Ticks,
    end_ticks: Ticks,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MediaSegmentsResponse {
    items: Vec<MediaSegmentDto>,
}

impl ItemDto {
    fn into_media_item(self) -> MediaItem {
        MediaItem {
            id: self.id,
            name: self.name,
            kind: self.kind,
            series_id: self.series_id,
            series_name: self.series_name,
            season_number: self.parent_index_number,
            episode_number: self.index_number,
            run_time_ticks: self.run_time_ticks,
            resume_position_ticks: self.user_data.map(|u| u.playback_position_ticks).unwrap_or(0),
        }
    }
}

impl MediaStreamDto {
    fn title(&self) -> String {
        self.display_title
            .clone()
            .or_else(|| self.language.clone())
            .unwrap_or_else(|| format!("#{}", self.index))
    }

    fn to_audio(&self) -> AudioStream {
        AudioStream {
            index: self.index,
            codec: self.codec.clone().unwrap_or_default(),
            language: self.language.clone(),
            display_title: self.title(),
            is_default: self.is_default,
            is_forced: self.is_forced,
            is_embedded_native: !self.is_external,
            is_text_based: false,
            channels: self.channels,
        }
    }

    fn to_subtitle(&self) -> SubtitleStream {
        // 内嵌且服务器按 Embed 交付的字幕，引擎可以直接渲染
        let embedded = !self.is_external
            && matches!(self.delivery_method.as_deref(), None | Some("Embed"));
        SubtitleStream {
            index: self.index,
            codec: self.codec.clone().unwrap_or_default(),
            language: self.language.clone(),
            display_title: self.title(),
            is_default: self.is_default,
            is_forced: self.is_forced,
            is_embedded_native: embedded,
            is_text_based: self.is_text_subtitle_stream,
            delivery_url: self.delivery_url.clone(),
        }
    }
}

fn segments_from_dto(items: Vec<MediaSegmentDto>) -> MediaSegments {
    let mut segments = MediaSegments::default();
    for item in items {
        match item.kind.as_str() {
            "Intro" => {
                segments.intro_start = Some(item.start_ticks);
                segments.intro_end = Some(item.end_ticks);
            }
            "Outro" | "Credits" => {
                if segments.credits_start.map(|s| item.start_ticks < s).unwrap_or(true) {
                    segments.credits_start = Some(item.start_ticks);
                }
            }
            _ => {}
        }
    }
    segments
}

/// AdjacentTo 返回 [上一集, 当前, 下一集]，取当前之后的那一集
fn pick_next_episode(current_id: &str, items: Vec<ItemDto>) -> Option<MediaItem> {
    let position = items.iter().position(|i| i.id == current_id)?;
    items.into_iter().nth(position + 1).map(ItemDto::into_media_item)
}

/// 媒体服务器客户端（阻塞 HTTP）
pub struct JellyfinClient {
    config: ServerConfig,
    agent: ureq::Agent,
    retry_delay: Duration,
}

impl JellyfinClient {
    pub fn new(config: &ServerConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        info!("🌐 媒体服务器: {}", config.base_url);
        Self {
            config: config.clone(),
            agent,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url(), path)
        }
    }

    fn auth_header(&self) -> String {
        format!(
            "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\", Token=\"{}\"",
            self.config.client_name,
            self.config.device_name,
            self.config.device_id,
            CLIENT_VERSION,
            self.config.access_token
        )
    }

    /// 发送请求，瞬时错误按配置次数重试
    fn send(&self, method: &str, path: &str, query: &[(&str, String)], body: Option<&str>) -> Result<String> {
        let url = self.absolute(path);
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            let mut request = self
                .agent
                .request(method, &url)
                .set("Authorization", &self.auth_header())
                .set("Accept", "application/json");
            for (key, value) in query {
                request = request.query(key, value);
            }
            debug!("➡️  {} {} (第 {} 次)", method, redact_url(&url), attempt);

            let result = match body {
                Some(body) => request.set("Content-Type", "application/json").send_string(body),
                None => request.call(),
            };

            match result {
                Ok(response) => {
                    return response
                        .into_string()
                        .map_err(|e| PlayerError::Network(format!("读取响应失败: {}", e)));
                }
                Err(ureq::Error::Status(status, response)) => {
                    let text = response.into_string().unwrap_or_default();
                    let message: String = text.trim().chars().take(240).collect();
                    if should_retry_http_status(status) && attempt < attempts {
                        warn!("⚠️  {} {} 返回 {}，重试", method, redact_url(&url), status);
                        thread::sleep(self.retry_delay);
                        continue;
                    }
                    return Err(PlayerError::Http { status, message });
                }
                Err(ureq::Error::Transport(err)) => {
                    if attempt < attempts {
                        warn!("⚠️  {} {} 传输错误: {}，重试", method, redact_url(&url), err);
                        thread::sleep(self.retry_delay);
                        continue;
                    }
                    return Err(PlayerError::Network(format!(
                        "{} 次尝试后仍失败: {}",
                        attempts, err
                    )));
                }
            }
        }

        Err(PlayerError::Network("请求未执行".to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let body = self.send("GET", path, query, None)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let payload = serde_json::to_string(body)?;
        let text = self.send("POST", path, &[], Some(&payload))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn post_report(&self, path: &str, report: &ProgressReport) -> Result<()> {
        let payload = serde_json::to_string(report)?;
        self.send("POST", path, &[], Some(&payload))?;
        Ok(())
    }

    /// 读取单个条目（演示程序用）
    pub fn get_item(&self, item_id: &str) -> Result<MediaItem> {
        let dto: ItemDto = self.get_json(&format!("/Users/{}/Items/{}", self.config.user_id, item_id), &[])?;
        Ok(dto.into_media_item())
    }

    fn chapters(&self, item_id: &str) -> Vec<Chapter> {
        match self.get_json::<ItemDto>(&format!("/Users/{}/Items/{}", self.config.user_id, item_id), &[]) {
            Ok(dto) => dto
                .chapters
                .into_iter()
                .enumerate()
                .map(|(i, c)| Chapter {
                    name: c.name.unwrap_or_else(|| format!("第 {} 章", i + 1)),
                    start_position_ticks: c.start_position_ticks,
                })
                .collect(),
            Err(e) => {
                warn!("⚠️  获取章节失败: {}", e);
                Vec::new()
            }
        }
    }

    /// 按 DirectPlay → DirectStream → Transcode 的顺序挑选地址
    fn select_stream(
        &self,
        request: &PlaybackInfoRequest,
        source: &MediaSourceDto,
        play_session_id: Option<&str>,
    ) -> Option<(String, PlayMethod)> {
        if request.enable_direct_play && source.supports_direct_play {
            let container = source
                .container
                .as_deref()
                .and_then(|c| c.split(',').next())
                .map(|c| format!(".{}", c))
                .unwrap_or_default();
            let mut url = format!(
                "{}/Videos/{}/stream{}?Static=true&MediaSourceId={}&api_key={}",
                self.base_url(),
                request.item_id,
                container,
                source.id,
                self.config.access_token
            );
            if let Some(id) = play_session_id {
                url.push_str(&format!("&PlaySessionId={}", id));
            }
            return Some((url, PlayMethod::DirectPlay));
        }
        if request.enable_direct_stream && source.supports_direct_stream {
            if let Some(ref path) = source.direct_stream_url {
                return Some((self.absolute(path), PlayMethod::DirectStream));
            }
        }
        if request.enable_transcoding && source.supports_transcoding {
            if let Some(ref path) = source.transcoding_url {
                return Some((self.absolute(path), PlayMethod::Transcode));
            }
        }
        None
    }

    fn build_playback_info(&self, request: &PlaybackInfoRequest, response: PlaybackInfoResponse) -> Result<PlaybackInfo> {
        if let Some(code) = response.error_code {
            return Err(PlayerError::FatalPlayback(format!("服务器拒绝播放: {}", code)));
        }
        let source = response
            .media_sources
            .into_iter()
            .next()
            .ok_or_else(|| PlayerError::FatalPlayback("没有可用的媒体源".to_string()))?;

        let (url, play_method) = self
            .select_stream(request, &source, response.play_session_id.as_deref())
            .ok_or_else(|| PlayerError::FatalPlayback("媒体源没有可用的播放方式".to_string()))?;

        let audio_streams = source
            .media_streams
            .iter()
            .filter(|s| s.kind == "Audio")
            .map(MediaStreamDto::to_audio)
            .collect();
        let subtitle_streams = source
            .media_streams
            .iter()
            .filter(|s| s.kind == "Subtitle")
            .map(MediaStreamDto::to_subtitle)
            .collect();

        Ok(PlaybackInfo {
            url,
            play_method,
            media_source_id: source.id,
            play_session_id: response.play_session_id,
            run_time_ticks: source.run_time_ticks.unwrap_or(0),
            audio_streams,
            subtitle_streams,
            chapters: Vec::new(),
            default_audio_index: source.default_audio_stream_index,
            default_subtitle_index: source.default_subtitle_stream_index,
        })
    }
}

impl MediaServerApi for JellyfinClient {
    fn playback_info(&self, request: &PlaybackInfoRequest) -> Result<PlaybackInfo> {
        let body = PlaybackInfoBody {
            user_id: &self.config.user_id,
            start_time_ticks: request.start_position_ticks,
            max_streaming_bitrate: request.max_bitrate,
            media_source_id: request.media_source_id.as_deref(),
            audio_stream_index: request.audio_stream_index,
            subtitle_stream_index: request.subtitle_stream_index,
            enable_direct_play: request.enable_direct_play,
            enable_direct_stream: request.enable_direct_stream,
            enable_transcoding: request.enable_transcoding,
            auto_open_live_stream: true,
        };
        let response: PlaybackInfoResponse =
            self.post_json(&format!("/Items/{}/PlaybackInfo", request.item_id), &body)?;
        let mut info = self.build_playback_info(request, response)?;
        info.chapters = self.chapters(&request.item_id);
        info!(
            "🎬 播放信息: {} via {} ({})",
            request.item_id,
            info.play_method.as_str(),
            redact_url(&info.url)
        );
        Ok(info)
    }

    fn subtitle_events(&self, request: &SubtitleRequest) -> Result<Vec<SubtitleEvent>> {
        let stream = &request.stream;
        let external = stream
            .delivery_url
            .as_deref()
            .and_then(|url| SubtitleFormat::from_path(url).map(|format| (url, format)));

        let result = match external {
            Some((url, format)) => self
                .send("GET", url, &[], None)
                .and_then(|content| SubtitleParser::parse(format, &content)),
            None => {
                let path = format!(
                    "/Videos/{}/{}/Subtitles/{}/0/Stream.js",
                    request.item_id, request.media_source_id, stream.index
                );
                self.send("GET", &path, &[], None)
                    .and_then(|content| SubtitleParser::parse(SubtitleFormat::TrackEventsJson, &content))
            }
        };
        result.map_err(|e| PlayerError::TrackFetch(format!("字幕 #{}: {}", stream.index, e)))
    }

    fn report_start(&self, report: &ProgressReport) -> Result<()> {
        self.post_report("/Sessions/Playing", report)
    }

    fn report_progress(&self, report: &ProgressReport) -> Result<()> {
        self.post_report("/Sessions/Playing/Progress", report)
    }

    fn report_stopped(&self, report: &ProgressReport) -> Result<()> {
        self.post_report("/Sessions/Playing/Stopped", report)
    }

    fn media_segments(&self, item_id: &str) -> Result<MediaSegments> {
        let response: MediaSegmentsResponse = self.get_json(&format!("/MediaSegments/{}", item_id), &[])?;
        Ok(segments_from_dto(response.items))
    }

    fn next_episode(&self, item: &MediaItem) -> Result<Option<MediaItem>> {
        let series_id = match item.series_id {
            Some(ref id) => id,
            None => return Ok(None),
        };
        let response: ItemsResponse = self.get_json(
            &format!("/Shows/{}/Episodes", series_id),
            &[
                ("UserId", self.config.user_id.clone()),
                ("AdjacentTo", item.id.clone()),
                ("Fields", "Chapters".to_string()),
            ],
        )?;
        Ok(pick_next_episode(&item.id, response.items))
    }
}
