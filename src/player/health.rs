use crate::core::{HealthConfig, Ticks};
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 不健康的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// 滑动窗口内缓冲次数过多
    RepeatedBuffering { count: usize, window: Duration },
    /// 单次缓冲持续过久
    Stalled { duration: Duration },
}

/// 播放健康监测
///
/// 记录缓冲开始时刻和最后一次播放进度的时刻；每个会话最多报告一次不健康。
#[derive(Debug)]
pub struct HealthMonitor {
    threshold: usize,
    window: Duration,
    stall_timeout: Duration,
    buffer_starts: VecDeque<Instant>,
    buffering_since: Option<Instant>,
    last_progress: Option<(Instant, Ticks)>,
    reported: bool,
    active: bool,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            threshold: config.buffering_threshold,
            window: config.window(),
            stall_timeout: config.stall_timeout(),
            buffer_starts: VecDeque::new(),
            buffering_since: None,
            last_progress: None,
            reported: false,
            active: true,
        }
    }

    pub fn buffering_started(&mut self, now: Instant) -> Option<UnhealthyReason> {
        if !self.active {
            return None;
        }
        if self.buffering_since.is_none() {
            self.buffering_since = Some(now);
        }
        self.buffer_starts.push_back(now);
        self.prune(now);
        debug!("⏳ 缓冲开始（窗口内第 {} 次）", self.buffer_starts.len());

        if self.buffer_starts.len() > self.threshold {
            return self.report(UnhealthyReason::RepeatedBuffering {
                count: self.buffer_starts.len(),
                window: self.window,
            });
        }
        None
    }

    pub fn buffering_ended(&mut self, _now: Instant) {
        self.buffering_since = None;
    }

    /// 记录播放进度（位置前进才算）
    pub fn progress(&mut self, now: Instant, ticks: Ticks) {
        if !self.active {
            return;
        }
        match self.last_progress {
            Some((_, last)) if ticks == last => {}
            _ => self.last_progress = Some((now, ticks)),
        }
    }

    /// 由健康检查定时器周期调用，检测长时间卡顿
    pub fn check(&mut self, now: Instant) -> Option<UnhealthyReason> {
        if !self.active {
            return None;
        }
        self.prune(now);
        let since = self.buffering_since?;
        // 缓冲期间位置仍在前进，从最后一次前进开始算
        let stalled_from = match self.last_progress {
            Some((at, _)) if at > since => at,
            _ => since,
        };
        let stalled = now.saturating_duration_since(stalled_from);
        if stalled > self.stall_timeout {
            return self.report(UnhealthyReason::Stalled { duration: stalled });
        }
        None
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering_since.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// 会话销毁时停止观察
    pub fn stop(&mut self) {
        self.active = false;
        self.buffer_starts.clear();
        self.buffering_since = None;
        self.last_progress = None;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.buffer_starts.front() {
            if now.saturating_duration_since(front) > self.window {
                self.buffer_starts.pop_front();
            } else {
                break;
            }
        }
    }

    fn report(&mut self, reason: UnhealthyReason) -> Option<UnhealthyReason> {
        if self.reported {
            return None;
        }
        self.reported = true;
        warn!("🚑 播放不健康: {:?}", reason);
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig::default())
    }

    #[test]
    fn test_repeated_buffering_within_window() {
        let t0 = Instant::now();
        let mut health = monitor();
        for i in 0..3 {
            let at = t0 + Duration::from_secs(i * 10);
            assert_eq!(health.buffering_started(at), None);
            health.buffering_ended(at + Duration::from_secs(1));
        }
        let verdict = health.buffering_started(t0 + Duration::from_secs(35));
        assert!(matches!(verdict, Some(UnhealthyReason::RepeatedBuffering { count: 4, .. })));
        // 只报告一次
        assert_eq!(health.buffering_started(t0 + Duration::from_secs(36)), None);
    }

    #[test]
    fn test_old_buffering_events_slide_out() {
        let t0 = Instant::now();
        let mut health = monitor();
        for i in 0..10 {
            // 每 30 秒一次，窗口 60 秒内最多 3 次
            let at = t0 + Duration::from_secs(i * 30);
            assert_eq!(health.buffering_started(at), None, "第 {} 次", i);
            health.buffering_ended(at);
        }
    }

    #[test]
    fn test_long_stall_detected_by_check() {
        let t0 = Instant::now();
        let mut health = monitor();
        health.buffering_started(t0);
        assert_eq!(health.check(t0 + Duration::from_secs(10)), None);
        assert!(matches!(
            health.check(t0 + Duration::from_secs(21)),
            Some(UnhealthyReason::Stalled { .. })
        ));
    }

    #[test]
    fn test_buffering_end_resets_stall() {
        let t0 = Instant::now();
        let mut health = monitor();
        health.buffering_started(t0);
        health.buffering_ended(t0 + Duration::from_secs(5));
        assert!(!health.is_buffering());
        assert_eq!(health.check(t0 + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_progress_during_buffering_delays_stall() {
        let t0 = Instant::now();
        let mut health = monitor();
        health.progress(t0, 100);
        health.buffering_started(t0 + Duration::from_secs(1));
        // 位置不变不算前进
        health.progress(t0 + Duration::from_secs(5), 100);
        health.progress(t0 + Duration::from_secs(15), 200);
        assert_eq!(health.check(t0 + Duration::from_secs(30)), None);
        assert!(matches!(
            health.check(t0 + Duration::from_secs(36)),
            Some(UnhealthyReason::Stalled { duration }) if duration == Duration::from_secs(21)
        ));
    }

    #[test]
    fn test_stale_progress_does_not_delay_stall() {
        let t0 = Instant::now();
        let mut health = monitor();
        health.progress(t0, 100);
        health.buffering_started(t0 + Duration::from_secs(10));
        health.progress(t0 + Duration::from_secs(12), 100);
        assert!(matches!(
            health.check(t0 + Duration::from_secs(31)),
            Some(UnhealthyReason::Stalled { duration }) if duration == Duration::from_secs(21)
        ));
    }

    #[test]
    fn test_stopped_monitor_ignores_signals() {
        let t0 = Instant::now();
        let mut health = monitor();
        health.stop();
        for i in 0..10 {
            assert_eq!(health.buffering_started(t0 + Duration::from_secs(i)), None);
        }
        assert_eq!(health.check(t0 + Duration::from_secs(100)), None);
        assert!(!health.is_active());
    }
}
