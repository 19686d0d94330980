use crate::core::{MediaSegments, Ticks};
use log::info;

/// 一次位置更新的标记结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerUpdate {
    /// 电平触发：是否处于片头区间
    pub in_intro: bool,
    /// 是否已经到达片尾
    pub credits_reached: bool,
    /// 边沿触发：本会话第一次到达片尾
    pub credits_edge: bool,
}

/// 片头/片尾标记引擎
#[derive(Debug, Default)]
pub struct MarkerEngine {
    segments: MediaSegments,
    credits_reached: bool,
    credits_fired: bool,
}

impl MarkerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_segments(&mut self, segments: MediaSegments) {
        info!("🏷️  片头/片尾标记: {:?}", segments);
        self.segments = segments;
    }

    pub fn segments(&self) -> &MediaSegments {
        &self.segments
    }

    /// 跳过片头的目标位置
    pub fn intro_end(&self) -> Option<Ticks> {
        self.segments.intro_end
    }

    pub fn update(&mut self, ticks: Ticks) -> MarkerUpdate {
        let in_intro = match (self.segments.intro_start, self.segments.intro_end) {
            (Some(start), Some(end)) => start <= ticks && ticks < end,
            (None, Some(end)) => ticks < end,
            _ => false,
        };

        let credits_reached = self
            .segments
            .credits_start
            .map(|start| ticks >= start)
            .unwrap_or(false);

        // 每个会话只触发一次，往回 seek 再越过也不重复
        let credits_edge = credits_reached && !self.credits_reached && !self.credits_fired;
        if credits_edge {
            self.credits_fired = true;
            info!("🎞️  到达片尾标记: {}", ticks);
        }
        self.credits_reached = credits_reached;

        MarkerUpdate {
            in_intro,
            credits_reached,
            credits_edge,
        }
    }
}
