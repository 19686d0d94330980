use crate::core::error::{PlayerError, Result};
use crate::core::types::{Ticks, TICKS_PER_SECOND};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 媒体服务器连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub access_token: String,
    pub user_id: String,
    pub device_id: String,
    pub device_name: String,
    pub client_name: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 瞬时错误（408/429/5xx/传输错误）的最大尝试次数
    pub max_attempts: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8096".to_string(),
            access_token: String::new(),
            user_id: String::new(),
            device_id: "myy-tv-0001".to_string(),
            device_name: "MYY TV".to_string(),
            client_name: "myy_tv".to_string(),
            timeout_secs: 15,
            max_attempts: 3,
        }
    }
}

/// 播放策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub max_bitrate: Option<u64>,
    pub prefer_transcode: bool,
    /// 进度上报间隔（秒）
    pub progress_interval_secs: u64,
    /// 轮询型引擎的读取间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 下一集倒计时（秒）
    pub countdown_secs: u32,
    /// 剩余时长低于该值时开始下一集倒计时（秒）
    pub near_end_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_bitrate: Some(120_000_000),
            prefer_transcode: false,
            progress_interval_secs: 10,
            poll_interval_ms: 500,
            countdown_secs: 15,
            near_end_secs: 30,
        }
    }
}

impl PlaybackConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn near_end_ticks(&self) -> Ticks {
        self.near_end_secs as Ticks * TICKS_PER_SECOND
    }
}

/// 健康监测配置
///
/// 窗口内缓冲开始次数超过 `buffering_threshold`，或单次缓冲持续超过
/// `stall_timeout_secs`，判定为不健康。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub buffering_threshold: usize,
    pub window_secs: u64,
    pub stall_timeout_secs: u64,
    /// 不健康时是否触发转码回退
    pub fallback_on_unhealthy: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            buffering_threshold: 3,
            window_secs: 60,
            stall_timeout_secs: 20,
            fallback_on_unhealthy: true,
        }
    }
}

impl HealthConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

/// 播放器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub server: ServerConfig,
    pub playback: PlaybackConfig,
    pub health: HealthConfig,
}

impl PlayerConfig {
    /// 从 JSON 文件加载，缺省字段使用默认值，然后应用环境变量覆盖
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?.with_env_overrides();
        config.validate()?;
        info!("📄 已加载配置: {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// 环境变量覆盖：MYY_SERVER_URL / MYY_ACCESS_TOKEN / MYY_USER_ID
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("MYY_SERVER_URL") {
            self.server.base_url = url;
        }
        if let Some(token) = lookup("MYY_ACCESS_TOKEN") {
            self.server.access_token = token;
        }
        if let Some(user) = lookup("MYY_USER_ID") {
            self.server.user_id = user;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.server.base_url.starts_with("http://") && !self.server.base_url.starts_with("https://") {
            return Err(PlayerError::Config(format!(
                "server.base_url 必须是 http(s) 地址: {}",
                self.server.base_url
            )));
        }
        if self.playback.poll_interval_ms == 0 {
            return Err(PlayerError::Config("playback.poll_interval_ms 不能为 0".to_string()));
        }
        if self.playback.progress_interval_secs == 0 {
            return Err(PlayerError::Config("playback.progress_interval_secs 不能为 0".to_string()));
        }
        if self.playback.countdown_secs == 0 {
            return Err(PlayerError::Config("playback.countdown_secs 不能为 0".to_string()));
        }
        if self.health.buffering_threshold == 0 || self.health.window_secs == 0 {
            return Err(PlayerError::Config("health 阈值和窗口必须大于 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json(
            r#"{ "server": { "base_url": "https://media.example", "user_id": "u1" },
                 "playback": { "countdown_secs": 10 } }"#,
        )
        .unwrap();
        assert_eq!(config.server.base_url, "https://media.example");
        assert_eq!(config.server.timeout_secs, 15);
        assert_eq!(config.playback.countdown_secs, 10);
        assert_eq!(config.playback.poll_interval_ms, 500);
        assert_eq!(config.health, HealthConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = PlayerConfig::default().with_overrides(|key| match key {
            "MYY_SERVER_URL" => Some("http://10.0.0.2:8096".to_string()),
            "MYY_ACCESS_TOKEN" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.server.base_url, "http://10.0.0.2:8096");
        assert_eq!(config.server.access_token, "secret");
        assert_eq!(config.server.user_id, "");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PlayerConfig::default();
        config.server.base_url = "ftp://nope".to_string();
        assert!(matches!(config.validate(), Err(PlayerError::Config(_))));

        let mut config = PlayerConfig::default();
        config.playback.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(PlayerConfig::from_json("{ not json"), Err(PlayerError::Json(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("myy_tv_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "health": { "stall_timeout_secs": 5 } }"#).unwrap();
        let config = PlayerConfig::load(&path);
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();
        assert_eq!(config.health.stall_timeout_secs, 5);
        assert_eq!(config.health.buffering_threshold, 3);
    }
}
