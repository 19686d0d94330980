use crate::core::{SubtitleEvent, Ticks};

/// 字幕同步器：根据播放位置和用户偏移找到当前字幕
///
/// 每次引擎时间更新都会查询一次，是播放过程中最频繁的调用。字幕按开始时间
/// 排序后，再维护一份结束时间的前缀最大值，这样即使字幕互相重叠，
/// 也能用两次二分查找找到"第一条包含该时刻的字幕"。
#[derive(Debug, Default)]
pub struct SubtitleSynchronizer {
    events: Vec<SubtitleEvent>,
    /// max_end[i] = max(events[0..=i].end_ticks)，单调不减
    max_end: Vec<Ticks>,
}

impl SubtitleSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 载入字幕（按开始时间稳定排序）
    pub fn load(&mut self, mut events: Vec<SubtitleEvent>) {
        events.sort_by_key(|e| e.start_ticks);
        let mut running = Ticks::MIN;
        self.max_end = events
            .iter()
            .map(|e| {
                running = running.max(e.end_ticks);
                running
            })
            .collect();
        self.events = events;
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.max_end.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 正偏移会延后显示：查找的是更早的时刻
    pub fn lookup(&self, current_ticks: Ticks, offset_ticks: Ticks) -> Option<&str> {
        let t = current_ticks.saturating_sub(offset_ticks);

        // 开始时间 <= t 的字幕是 events[..upper]
        let upper = self.events.partition_point(|e| e.start_ticks <= t);
        // 其中第一条结束时间 >= t 的字幕
        let first = self.max_end[..upper].partition_point(|&end| end < t);
        if first < upper {
            Some(self.events[first].text.as_str())
        } else {
            None
        }
    }
}
