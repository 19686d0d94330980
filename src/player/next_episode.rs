use crate::core::MediaItem;
use log::{debug, info};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CountdownPhase {
    Idle,
    CountingDown,
    Committed,
    Cancelled,
}

/// 下一集状态（UI 渲染"即将播放"卡片用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextEpisodeState {
    pub candidate: Option<MediaItem>,
    pub seconds_remaining: Option<u32>,
    pub phase: CountdownPhase,
}

/// 倒计时每秒推进的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownStep {
    Remaining(u32),
    Commit(MediaItem),
}

/// 自动播放下一集的倒计时状态机
///
/// Idle → CountingDown → Committed，或 CountingDown → Cancelled。
/// 每个会话只能启动一次倒计时；每秒的定时器由会话持有。
#[derive(Debug)]
pub struct NextEpisodeScheduler {
    countdown_secs: u32,
    state: NextEpisodeState,
    started: bool,
}

impl NextEpisodeScheduler {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            countdown_secs: countdown_secs.max(1),
            state: NextEpisodeState {
                candidate: None,
                seconds_remaining: None,
                phase: CountdownPhase::Idle,
            },
            started: false,
        }
    }

    pub fn set_candidate(&mut self, candidate: Option<MediaItem>) {
        if let Some(ref item) = candidate {
            debug!("⏭️  下一集候选: {}", item.display_name());
        }
        self.state.candidate = candidate;
    }

    pub fn state(&self) -> &NextEpisodeState {
        &self.state
    }

    pub fn phase(&self) -> CountdownPhase {
        self.state.phase
    }

    /// 开始倒计时；已经启动过或没有候选时返回 false
    pub fn start(&mut self) -> bool {
        if self.started || self.state.candidate.is_none() {
            return false;
        }
        self.started = true;
        self.state.phase = CountdownPhase::CountingDown;
        self.state.seconds_remaining = Some(self.countdown_secs);
        info!("⏳ 下一集倒计时开始: {} 秒", self.countdown_secs);
        true
    }

    /// 每秒调用一次
    pub fn tick(&mut self) -> Option<CountdownStep> {
        if self.state.phase != CountdownPhase::CountingDown {
            return None;
        }
        let remaining = self.state.seconds_remaining.unwrap_or(0).saturating_sub(1);
        self.state.seconds_remaining = Some(remaining);
        if remaining == 0 {
            return self.commit_now().map(CountdownStep::Commit);
        }
        Some(CountdownStep::Remaining(remaining))
    }

    /// 立即播放下一集（倒计时中或尚未开始都可以）
    pub fn commit_now(&mut self) -> Option<MediaItem> {
        if self.state.phase == CountdownPhase::Committed {
            return None;
        }
        let candidate = self.state.candidate.clone()?;
        self.started = true;
        self.state.phase = CountdownPhase::Committed;
        self.state.seconds_remaining = None;
        info!("▶️  提交下一集: {}", candidate.display_name());
        Some(candidate)
    }

    /// 正片自然播放结束时的提交；用户取消过就不自动切换
    pub fn commit_on_end(&mut self) -> Option<MediaItem> {
        if self.state.phase == CountdownPhase::Cancelled {
            return None;
        }
        self.commit_now()
    }

    /// 取消倒计时（隐藏卡片），本会话内不会再次启动
    pub fn cancel(&mut self) -> bool {
        if self.state.phase != CountdownPhase::CountingDown {
            return false;
        }
        self.state.phase = CountdownPhase::Cancelled;
        self.state.seconds_remaining = None;
        info!("🚫 下一集倒计时已取消");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_item() -> MediaItem {
        MediaItem {
            id: "ep2".into(),
            name: "Episode 2".into(),
            ..Default::default()
        }
    }

    fn scheduler() -> NextEpisodeScheduler {
        let mut scheduler = NextEpisodeScheduler::new(15);
        scheduler.set_candidate(Some(next_item()));
        scheduler
    }

    #[test]
    fn test_countdown_commits_exactly_once() {
        let mut scheduler = scheduler();
        assert!(scheduler.start());
        assert_eq!(scheduler.state().seconds_remaining, Some(15));

        let mut commits = 0;
        for _ in 0..30 {
            match scheduler.tick() {
                Some(CountdownStep::Commit(item)) => {
                    assert_eq!(item.id, "ep2");
                    commits += 1;
                }
                Some(CountdownStep::Remaining(n)) => assert!(n > 0),
                None => {}
            }
        }
        assert_eq!(commits, 1);
        assert_eq!(scheduler.phase(), CountdownPhase::Committed);
    }

    #[test]
    fn test_cancel_prevents_commit() {
        let mut scheduler = scheduler();
        scheduler.start();
        for _ in 0..5 {
            scheduler.tick();
        }
        assert!(scheduler.cancel());
        for _ in 0..20 {
            assert_eq!(scheduler.tick(), None);
        }
        assert_eq!(scheduler.phase(), CountdownPhase::Cancelled);
        // 取消后本会话不再启动
        assert!(!scheduler.start());
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut scheduler = scheduler();
        assert!(scheduler.start());
        scheduler.tick();
        assert!(!scheduler.start());
        assert_eq!(scheduler.state().seconds_remaining, Some(14));
    }

    #[test]
    fn test_start_without_candidate_is_noop() {
        let mut scheduler = NextEpisodeScheduler::new(15);
        assert!(!scheduler.start());
        assert_eq!(scheduler.phase(), CountdownPhase::Idle);
        assert_eq!(scheduler.commit_now(), None);
    }

    #[test]
    fn test_commit_on_end_respects_cancel() {
        let mut scheduler = scheduler();
        scheduler.start();
        assert!(scheduler.cancel());
        assert_eq!(scheduler.commit_on_end(), None);
        assert_eq!(scheduler.phase(), CountdownPhase::Cancelled);
        // 用户主动"立即播放"仍然可以
        assert_eq!(scheduler.commit_now().map(|i| i.id), Some("ep2".to_string()));

        let mut untouched = NextEpisodeScheduler::new(15);
        untouched.set_candidate(Some(next_item()));
        assert_eq!(untouched.commit_on_end().map(|i| i.id), Some("ep2".to_string()));
    }

    #[test]
    fn test_commit_now_during_countdown() {
        let mut scheduler = scheduler();
        scheduler.start();
        scheduler.tick();
        assert_eq!(scheduler.commit_now().map(|i| i.id), Some("ep2".to_string()));
        assert_eq!(scheduler.commit_now(), None);
        assert_eq!(scheduler.tick(), None);
    }
}
