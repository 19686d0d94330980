use crate::core::{ticks_from_millis, Result, SubtitleEvent, Ticks};
use log::{info, warn};
use serde::Deserialize;

/// 字幕文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    /// 服务器的 Stream.js：{"TrackEvents": [...]}
    TrackEventsJson,
    Srt,
    Vtt,
    Ass,
}

impl SubtitleFormat {
    /// 根据地址/文件扩展名判断格式（忽略查询参数）
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let extension = path.rsplit('.').next()?.to_lowercase();
        match extension.as_str() {
            "js" | "json" => Some(SubtitleFormat::TrackEventsJson),
            "srt" => Some(SubtitleFormat::Srt),
            "vtt" => Some(SubtitleFormat::Vtt),
            "ass" | "ssa" => Some(SubtitleFormat::Ass),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrackEventsDocument {
    #[serde(default)]
    track_events: Vec<TrackEventDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrackEventDto {
    start_position_ticks: Ticks,
    end_position_ticks: Ticks,
    #[serde(default)]
    text: String,
}

/// 字幕文档解析器，输出按开始时间升序的字幕
pub struct SubtitleParser;

impl SubtitleParser {
    pub fn parse(format: SubtitleFormat, content: &str) -> Result<Vec<SubtitleEvent>> {
        let mut events = match format {
            SubtitleFormat::TrackEventsJson => Self::parse_track_events(content)?,
            SubtitleFormat::Srt => Self::parse_srt(content),
            SubtitleFormat::Vtt => Self::parse_vtt(content),
            SubtitleFormat::Ass => Self::parse_ass(content),
        };
        events.sort_by_key(|e| e.start_ticks);
        Ok(events)
    }

    /// 解析服务器提取的字幕 JSON
    pub fn parse_track_events(content: &str) -> Result<Vec<SubtitleEvent>> {
        let document: TrackEventsDocument = serde_json::from_str(content)?;
        let events: Vec<SubtitleEvent> = document
            .track_events
            .into_iter()
            .filter(|e| e.end_position_ticks >= e.start_position_ticks)
            .map(|e| SubtitleEvent {
                start_ticks: e.start_position_ticks,
                end_ticks: e.end_position_ticks,
                text: Self::normalize_text(&e.text),
            })
            .filter(|e| !e.text.is_empty())
            .collect();
        info!("解析 TrackEvents 字幕完成，共 {} 条字幕", events.len());
        Ok(events)
    }

    /// 服务器文本里的换行标记统一为 '\n'
    fn normalize_text(text: &str) -> String {
        text.replace("\\N", "\n")
            .replace("<br>", "\n")
            .replace("<br/>", "\n")
            .replace("<br />", "\n")
            .trim()
            .to_string()
    }

    fn push_event(events: &mut Vec<SubtitleEvent>, start_ms: i64, end_ms: i64, text: &str) {
        let text = text.trim();
        if !text.is_empty() && end_ms >= start_ms {
            events.push(SubtitleEvent {
                start_ticks: ticks_from_millis(start_ms),
                end_ticks: ticks_from_millis(end_ms),
                text: text.to_string(),
            });
        }
    }

    /// 解析 SRT 格式字幕
    fn parse_srt(content: &str) -> Vec<SubtitleEvent> {
        let mut events = Vec::new();
        let mut current: Option<(i64, i64, String)> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim().trim_start_matches('\u{feff}');

            if line.is_empty() {
                // 空行，完成当前字幕条目
                if let Some((start, end, text)) = current.take() {
                    Self::push_event(&mut events, start, end, &text);
                }
                continue;
            }

            if line.contains("-->") {
                match Self::parse_time_line(line, Self::parse_srt_timestamp) {
                    Some((start, end)) => current = Some((start, end, String::new())),
                    None => warn!("无法解析 SRT 时间行 (第{}行): {}", line_num + 1, line),
                }
                continue;
            }

            match current {
                Some((_, _, ref mut text)) => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(line);
                }
                // 序号行
                None => continue,
            }
        }

        if let Some((start, end, text)) = current {
            Self::push_event(&mut events, start, end, &text);
        }

        info!("解析 SRT 字幕完成，共 {} 条字幕", events.len());
        events
    }

    /// 解析时间行：00:01:30,500 --> 00:01:33,400（VTT 行尾可能带样式设置）
    fn parse_time_line(line: &str, parse: fn(&str) -> Option<i64>) -> Option<(i64, i64)> {
        let (start, rest) = line.split_once("-->")?;
        let end = rest.split_whitespace().next()?;
        Some((parse(start.trim())?, parse(end.trim())?))
    }

    /// 解析 SRT 时间戳：00:01:30,500 -> 90500ms
    fn parse_srt_timestamp(timestamp: &str) -> Option<i64> {
        let (time_part, ms_part) = timestamp.split_once(',')?;
        let ms: i64 = ms_part.parse().ok()?;
        let components: Vec<&str> = time_part.split(':').collect();
        if components.len() != 3 {
            return None;
        }
        let hours: i64 = components[0].parse().ok()?;
        let minutes: i64 = components[1].parse().ok()?;
        let seconds: i64 = components[2].parse().ok()?;
        Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + ms)
    }

    /// 解析 WebVTT 格式字幕
    fn parse_vtt(content: &str) -> Vec<SubtitleEvent> {
        let mut events = Vec::new();
        let mut lines = content.lines().enumerate();

        // 跳过 WEBVTT 头部
        if let Some((_, first)) = lines.next() {
            if !first.trim().trim_start_matches('\u{feff}').starts_with("WEBVTT") {
                warn!("VTT 文件缺少 WEBVTT 头部");
            }
        }

        let mut current: Option<(i64, i64, String)> = None;
        let mut in_block_comment = false;

        for (line_num, line) in lines {
            let line = line.trim();

            if line.is_empty() {
                in_block_comment = false;
                if let Some((start, end, text)) = current.take() {
                    Self::push_event(&mut events, start, end, &text);
                }
                continue;
            }

            if in_block_comment {
                continue;
            }

            if line.contains("-->") {
                match Self::parse_time_line(line, Self::parse_vtt_timestamp) {
                    Some((start, end)) => current = Some((start, end, String::new())),
                    None => warn!("无法解析 VTT 时间行 (第{}行): {}", line_num + 1, line),
                }
                continue;
            }

            // NOTE / STYLE / REGION 块一直持续到空行
            if current.is_none() && (line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION")) {
                in_block_comment = true;
                continue;
            }

            if let Some((_, _, ref mut text)) = current {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&Self::strip_tags(line));
            }
        }

        if let Some((start, end, text)) = current {
            Self::push_event(&mut events, start, end, &text);
        }

        info!("解析 VTT 字幕完成，共 {} 条字幕", events.len());
        events
    }

    /// 解析 VTT 时间戳：00:01:30.500 或 01:30.500
    fn parse_vtt_timestamp(timestamp: &str) -> Option<i64> {
        let (time_part, ms_part) = timestamp.split_once('.')?;
        let ms: i64 = ms_part.parse().ok()?;
        let components: Vec<&str> = time_part.split(':').collect();
        match components.len() {
            2 => {
                let minutes: i64 = components[0].parse().ok()?;
                let seconds: i64 = components[1].parse().ok()?;
                Some(minutes * 60_000 + seconds * 1000 + ms)
            }
            3 => {
                let hours: i64 = components[0].parse().ok()?;
                let minutes: i64 = components[1].parse().ok()?;
                let seconds: i64 = components[2].parse().ok()?;
                Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + ms)
            }
            _ => None,
        }
    }

    /// 去掉 <i>、<c.yellow> 之类的标签
    fn strip_tags(line: &str) -> String {
        let mut result = String::with_capacity(line.len());
        let mut in_tag = false;
        for ch in line.chars() {
            match ch {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                _ if !in_tag => result.push(ch),
                _ => {}
            }
        }
        result
    }

    /// 解析 ASS/SSA 格式字幕（只取 Events 段的 Dialogue）
    fn parse_ass(content: &str) -> Vec<SubtitleEvent> {
        let mut events = Vec::new();
        let mut in_events_section = false;

        for line in content.lines() {
            let line = line.trim();

            if line.starts_with('[') && line.ends_with(']') {
                in_events_section = line.eq_ignore_ascii_case("[Events]");
                continue;
            }

            if in_events_section && line.starts_with("Dialogue:") {
                if let Some((start, end, text)) = Self::parse_ass_dialogue_line(line) {
                    Self::push_event(&mut events, start, end, &text);
                }
            }
        }

        info!("解析 ASS 字幕完成，共 {} 条字幕", events.len());
        events
    }

    /// Dialogue: Layer,Start,End,Style,Name,MarginL,MarginR,MarginV,Effect,Text
    fn parse_ass_dialogue_line(line: &str) -> Option<(i64, i64, String)> {
        let parts: Vec<&str> = line.splitn(10, ',').collect();
        if parts.len() < 10 {
            return None;
        }
        let start = Self::parse_ass_timestamp(parts[1].trim())?;
        let end = Self::parse_ass_timestamp(parts[2].trim())?;
        Some((start, end, Self::clean_ass_text(parts[9].trim())))
    }

    /// 解析 ASS 时间戳：0:01:30.50 -> 90500ms
    fn parse_ass_timestamp(timestamp: &str) -> Option<i64> {
        let (time_part, cs_part) = timestamp.split_once('.')?;
        let centiseconds: i64 = cs_part.parse().ok()?;
        let components: Vec<&str> = time_part.split(':').collect();
        if components.len() != 3 {
            return None;
        }
        let hours: i64 = components[0].parse().ok()?;
        let minutes: i64 = components[1].parse().ok()?;
        let seconds: i64 = components[2].parse().ok()?;
        Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + centiseconds * 10)
    }

    /// 清理 ASS 覆盖标签，\N \n 转为换行
    fn clean_ass_text(text: &str) -> String {
        let mut result = String::new();
        let mut in_tag = false;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => in_tag = true,
                '}' => in_tag = false,
                '\\' if !in_tag => match chars.peek() {
                    Some('N') | Some('n') => {
                        chars.next();
                        result.push('\n');
                    }
                    Some('h') => {
                        chars.next();
                        result.push(' ');
                    }
                    _ => result.push(ch),
                },
                _ if !in_tag => result.push(ch),
                _ => {}
            }
        }

        result.trim().to_string()
    }
}
