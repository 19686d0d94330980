use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use myy_tv::core::{ticks_from_secs, ticks_to_secs, PlayerConfig, StartOptions};
use myy_tv::player::{PlaybackSessionManager, PlayerEvent, PolledClock, SimulatedDecoder};
use myy_tv::server::{JellyfinClient, MediaServerApi, RuntimeSpawner};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 无界面播放：模拟解码器 + 真实媒体服务器
#[derive(Parser, Debug)]
#[command(name = "myy_tv")]
#[command(about = "电视媒体客户端播放引擎（无界面演示）")]
#[command(version)]
struct Args {
    /// JSON 配置文件，缺省使用默认配置 + 环境变量
    #[arg(short, long, env = "MYY_CONFIG")]
    config: Option<PathBuf>,

    /// 要播放的条目 ID
    #[arg(short, long)]
    item: String,

    /// 起始位置（秒），缺省使用服务器记录的续播位置
    #[arg(long)]
    start_secs: Option<f64>,

    /// 音轨序号
    #[arg(long)]
    audio: Option<i32>,

    /// 字幕序号，-1 = 关闭
    #[arg(long, allow_hyphen_values = true)]
    subtitle: Option<i32>,

    /// 强制转码
    #[arg(long)]
    transcode: bool,

    /// 网络工作线程数
    #[arg(long, default_value = "2")]
    workers: usize,
}

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

fn load_config(args: &Args) -> Result<PlayerConfig> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => {
            let config = PlayerConfig::default().with_env_overrides();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("🎬 MYY TV 播放引擎启动，服务器 {}", config.server.base_url);

    let client = Arc::new(JellyfinClient::new(&config.server));
    let item = client.get_item(&args.item)?;
    let start_ticks = args
        .start_secs
        .map(ticks_from_secs)
        .unwrap_or(item.resume_position_ticks);

    let spawner = Arc::new(RuntimeSpawner::new(args.workers)?);
    let decoder = SimulatedDecoder::new();
    let handle = decoder.clone();
    let clock = PolledClock::new(decoder, config.playback.poll_interval());
    let api: Arc<dyn MediaServerApi> = client;
    let mut manager = PlaybackSessionManager::new(clock, api, spawner, config);
    let events = manager.events();

    manager.start(
        item,
        StartOptions {
            start_position_ticks: start_ticks,
            max_bitrate: None,
            prefer_transcode: args.transcode,
            audio_stream_index: args.audio,
            subtitle_stream_index: args.subtitle,
        },
    );

    // 模拟解码器不知道时长，按会话的时长设置一次
    let mut duration_applied = None;
    loop {
        manager.pump(Instant::now());

        if let Some(session) = manager.session() {
            let key = (session.generation, session.run_time_ticks);
            if session.run_time_ticks > 0 && duration_applied != Some(key) {
                handle.set_duration(session.run_time_ticks);
                duration_applied = Some(key);
            }
        }

        for event in events.try_iter() {
            match event {
                PlayerEvent::StatusChanged(status) => info!("📺 状态: {:?}", status),
                PlayerEvent::SubtitleText(Some(text)) => println!("💬 {}", text),
                PlayerEvent::SubtitleText(None) => {}
                PlayerEvent::SkipIntroVisible(true) => println!("⏭️  [跳过片头]"),
                PlayerEvent::SkipIntroVisible(false) => {}
                PlayerEvent::CountdownStarted { candidate, seconds } => {
                    println!("⏳ {} 秒后播放: {}", seconds, candidate.display_name())
                }
                PlayerEvent::CountdownTick(seconds) => println!("⏳ {}", seconds),
                PlayerEvent::CountdownCancelled => println!("🚫 已取消自动播放"),
                PlayerEvent::Unhealthy(reason) => warn!("🚑 播放不健康: {:?}", reason),
                PlayerEvent::Advance(next) => {
                    let position = manager.session().map(|s| s.current_position_ticks).unwrap_or(0);
                    info!("⏭️  上一集停在 {:.1}s，开始下一集", ticks_to_secs(position));
                    manager.start(next, StartOptions::default());
                }
                PlayerEvent::Fatal(message) => {
                    return Err(anyhow::anyhow!("播放失败: {}", message));
                }
                PlayerEvent::Ended => {
                    info!("🏁 播放结束");
                    return Ok(());
                }
            }
        }

        thread::sleep(PUMP_INTERVAL);
    }
}
