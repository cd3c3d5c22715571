use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use log::{info, warn};
use myy_engine::core::AudioOutputMode;
use myy_engine::{PlaybackManager, PlayerConfig, PlayerEvent};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "myy-engine")]
#[command(about = "无界面播放：解码、同步并按时间输出视频帧")]
struct Args {
    /// 媒体路径、网络地址或 testsrc://?duration=5&fps=30
    #[arg(default_value = "testsrc://?duration=5")]
    input: String,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 就绪后先跳转到该位置（秒）
    #[arg(long)]
    seek: Option<f64>,

    /// 静音播放
    #[arg(long)]
    mute: bool,

    /// 音频输出: auto / device / virtual
    #[arg(long)]
    audio: Option<String>,

    /// 保存视频帧快照的目录
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// 每隔多少帧保存一张快照
    #[arg(long, default_value = "30")]
    snapshot_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("🎬 myy-engine 启动");

    let mut config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(mode) = &args.audio {
        config.audio_output = match mode.as_str() {
            "auto" => AudioOutputMode::Auto,
            "device" => AudioOutputMode::Device,
            "virtual" => AudioOutputMode::Virtual,
            other => anyhow::bail!("未知的音频输出: {}", other),
        };
    }
    config.validate()?;

    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建快照目录: {}", dir.display()))?;
    }

    let manager = PlaybackManager::with_config(config);
    let (tx, rx) = unbounded();
    manager.load(&args.input, tx);

    let mut frames = 0u64;
    let mut failure = None;
    for event in rx {
        match event {
            PlayerEvent::Loading => info!("⏳ 加载中..."),
            PlayerEvent::Ready(source) => {
                info!("✅ 就绪: {}", source.summary());
                if args.mute {
                    manager.mute(true);
                }
                if let Some(position) = args.seek {
                    manager.seek(position);
                }
                manager.play();
            }
            PlayerEvent::Playing => info!("▶ 播放"),
            PlayerEvent::Paused => info!("⏸ 暂停"),
            PlayerEvent::Tick { position, duration } => {
                info!("⏱ {:.2}s / {:.2}s", position, duration);
            }
            PlayerEvent::PresentFrame(frame) => {
                frames += 1;
                let Some(dir) = &args.snapshot_dir else {
                    continue;
                };
                if args.snapshot_every == 0 || frames % args.snapshot_every != 0 {
                    continue;
                }
                let path = dir.join(format!("frame_{:06}_{:.3}.png", frames, frame.pts));
                match frame.to_rgba_image() {
                    Some(image) => {
                        if let Err(e) = image.save(&path) {
                            warn!("⚠️ 保存快照失败 {}: {}", path.display(), e);
                        }
                    }
                    None => warn!("⚠️ 帧格式不是 RGBA，跳过快照"),
                }
            }
            PlayerEvent::Stopped => {
                info!("⏹ 已停止");
                break;
            }
            PlayerEvent::Failed(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let stats = manager.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    match failure {
        Some(e) => Err(e).context("播放失败"),
        None => Ok(()),
    }
}
