use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use now_playing_sender::{Config, NowPlayingSender, SenderError};

#[derive(Parser)]
#[command(name = "now-playing-sender")]
#[command(about = "把系统正在播放的曲目同步到串口显示设备与 JSON 文件")]
struct Args {
    /// TOML 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 串口名称，覆盖配置文件
    #[arg(long)]
    port: Option<String>,

    /// 波特率，覆盖配置文件
    #[arg(long)]
    baud: Option<u32>,

    /// JSON 状态文件路径，覆盖配置文件
    #[arg(long)]
    json_path: Option<PathBuf>,

    /// 轮询间隔（秒），覆盖配置文件
    #[arg(long)]
    poll_interval: Option<f64>,

    /// 关闭串口输出
    #[arg(long)]
    no_serial: bool,

    /// 关闭 JSON 文件输出
    #[arg(long)]
    no_json: bool,
}

impl Args {
    fn into_config(self) -> now_playing_sender::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let config = Config::load(path)?;
                log::info!("已加载配置文件 {}", path.display());
                config
            }
            None => Config::default(),
        };

        if let Some(port) = self.port {
            config.serial.port = port;
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(path) = self.json_path {
            config.json.path = path;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if self.no_serial {
            config.serial.enabled = false;
        }
        if self.no_json {
            config.json.enabled = false;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("加载配置失败: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("--- Now Playing Sender (串口 + JSON + 托盘) ---");
    match NowPlayingSender::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(SenderError::AlreadyRunning) => {
            log::info!("另一个 Now Playing Sender 实例已在运行，退出。");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("运行失败: {e}");
            ExitCode::FAILURE
        }
    }
}
