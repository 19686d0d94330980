use crate::core::{PlayMethod, PlaybackSession, SubtitleEvent, SubtitleStream, Ticks, TrackKind};
use crate::player::position_clock::PositionClock;
use crate::player::subtitle_sync::SubtitleSynchronizer;
use log::{info, warn};

/// 切换音轨的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSwitch {
    /// 引擎内原地切换成功
    Native,
    /// 需要重新请求播放信息，并在原位置重新打开
    Reload { resume_ticks: Ticks },
}

/// 字幕选择方案
#[derive(Debug, Clone, PartialEq)]
pub enum SubtitlePlan {
    /// 关闭：原生渲染关掉，叠加层清空
    Off,
    /// 引擎原生渲染第 `position` 条字幕轨
    Native { position: usize },
    /// 拉取字幕文本，由叠加层渲染
    Extract(SubtitleStream),
    /// 图形字幕等无法处理的格式，按"无字幕"处理
    Unsupported(SubtitleStream),
}

/// 音轨 / 字幕选择
pub struct TrackSelector;

impl TrackSelector {
    /// 逻辑流序号 → 引擎内的物理位置（同类流按序号排序后的位置）
    pub fn audio_position(session: &PlaybackSession, index: i32) -> Option<usize> {
        let mut indices: Vec<i32> = session.audio_streams.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        indices.iter().position(|&i| i == index)
    }

    /// 内嵌字幕在引擎字幕轨里的位置
    pub fn subtitle_position(session: &PlaybackSession, index: i32) -> Option<usize> {
        let mut indices: Vec<i32> = session
            .subtitle_streams
            .iter()
            .filter(|s| s.is_embedded_native)
            .map(|s| s.index)
            .collect();
        indices.sort_unstable();
        indices.iter().position(|&i| i == index)
    }

    /// 切换音轨：优先原生切换，不行就返回带恢复位置的重载
    ///
    /// 恢复位置在调用时采样，之后引擎继续播放不会影响它。
    pub fn switch_audio<C: PositionClock>(clock: &mut C, session: &PlaybackSession, index: i32) -> AudioSwitch {
        let resume_ticks = clock.current_ticks();

        let native_available =
            session.play_method != PlayMethod::Transcode && clock.track_count(TrackKind::Audio) > 1;
        if native_available {
            if let Some(position) = Self::audio_position(session, index) {
                match clock.select_track(TrackKind::Audio, Some(position)) {
                    Ok(()) => {
                        info!("🔊 原生切换音轨: #{} (位置 {})", index, position);
                        return AudioSwitch::Native;
                    }
                    Err(e) => warn!("⚠️  引擎拒绝切换音轨 #{}: {}，改为重新加载", index, e),
                }
            }
        }

        info!("🔄 音轨 #{} 需要重新加载，恢复位置 {}", index, resume_ticks);
        AudioSwitch::Reload { resume_ticks }
    }

    /// 决定字幕如何呈现（-1 = 关闭）
    pub fn plan_subtitle(session: &PlaybackSession, index: i32, native_tracks: usize) -> Option<SubtitlePlan> {
        if index < 0 {
            return Some(SubtitlePlan::Off);
        }
        let stream = session.subtitle_stream(index)?;

        if stream.is_embedded_native && session.play_method != PlayMethod::Transcode && native_tracks > 0 {
            if let Some(position) = Self::subtitle_position(session, index) {
                if position < native_tracks {
                    return Some(SubtitlePlan::Native { position });
                }
            }
        }
        if stream.is_text_based {
            return Some(SubtitlePlan::Extract(stream.clone()));
        }
        warn!("⚠️  不支持的字幕格式: #{} ({})，按无字幕处理", stream.index, stream.codec);
        Some(SubtitlePlan::Unsupported(stream.clone()))
    }

    /// 装载字幕，排序由同步器负责
    pub fn install_cues(sync: &mut SubtitleSynchronizer, events: Vec<SubtitleEvent>) {
        info!("📝 装载字幕 {} 条", events.len());
        sync.load(events);
    }

    /// 重载得到完全相同的直接播放地址时，加上去缓存参数让引擎真正重新打开
    pub fn disambiguate_url(current: Option<&str>, next: &str, method: PlayMethod, seq: u64) -> String {
        if method == PlayMethod::DirectPlay && current == Some(next) {
            let separator = if next.contains('?') { '&' } else { '?' };
            format!("{}{}_reload={}", next, separator, seq)
        } else {
            next.to_string()
        }
    }
}
