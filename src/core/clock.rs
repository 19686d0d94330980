use crate::core::types::Ticks;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 墙钟 - 模拟解码器的时间基准（单位：tick）
#[derive(Clone)]
pub struct WallClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_ticks: Ticks,          // 基准位置
    base_instant: Instant,      // 基准时刻
    playback_rate: f64,         // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: Ticks,           // 暂停时的位置
}

impl ClockInner {
    fn now(&self) -> Ticks {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_nanos() as f64 / 100.0;
            self.base_ticks + (elapsed * self.playback_rate) as Ticks
        }
    }
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_ticks: 0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: 0,
            })),
        }
    }

    /// 获取当前播放位置
    pub fn now(&self) -> Ticks {
        self.inner.lock().now()
    }

    /// 设置播放位置
    pub fn set_time(&self, ticks: Ticks) {
        let mut inner = self.inner.lock();
        inner.base_ticks = ticks;
        inner.base_instant = Instant::now();
        inner.paused_at = ticks;
    }

    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_ticks = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 设置播放速率（先把已流逝的时间按旧速率结算）
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current = inner.now();
            inner.base_ticks = current;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().playback_rate
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}
