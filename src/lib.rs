#![warn(missing_docs)]

//! 把系统“正在播放”的媒体信息同步到串口显示设备与 JSON 状态文件。
//!
//! `now-playing-sender` 定期轮询系统媒体会话（Windows 上为 SMTC），
//! 检测曲目或播放状态的变化，并把变化投递到两个互相独立的输出端：
//!
//! * **串口**：向显示设备发送 `TITLE|ARTIST|STATUS\n` 或 `CLEAR\n`，
//!   链路断开时按固定间隔自动重连。
//! * **JSON 文件**：整体覆盖写入完整的快照，无会话时写入 `{}`。
//!
//! 当前状态通过一个单槽信箱发布给显示面（Windows 上是托盘图标，提供“Quit”菜单）。
//!
//! ## 使用方法
//!
//! 与本库交互的入口是 [`NowPlayingSender::run()`]，它会一直阻塞到收到关闭信号
//! （托盘菜单退出或 Ctrl+C）为止。
//!
//! ```no_run
//! use now_playing_sender::{Config, NowPlayingSender};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.serial.port = "COM5".to_string();
//!     config.json.path = "now_playing.json".into();
//!
//!     NowPlayingSender::run(&config)?;
//!     Ok(())
//! }
//! ```
//!
//! 各个组件也可以单独使用，例如用 [`Orchestrator::poll_once`] 驱动自定义的
//! [`MediaSource`] 与 [`PortOpener`]。

mod api;
mod config;
mod detector;
mod display;
mod error;
mod file_sink;
mod instance;
mod orchestrator;
mod reader;
mod serial_sink;
mod status;
#[cfg(windows)]
mod tray;
mod utils;

pub use api::{MediaSnapshot, NowPlaying, PlaybackStatus};
pub use config::{Config, JsonConfig, SerialConfig};
pub use detector::{LastDeliveredState, TrackIdentity, has_changed};
pub use display::DisplaySurface;
pub use error::{Result, SenderError};
pub use file_sink::{EMPTY_OBJECT, FileSink};
pub use instance::{DEFAULT_INSTANCE_NAME, InstanceGuard};
pub use orchestrator::{CycleReport, Orchestrator};
pub use reader::{MediaSource, PlatformSource, read_snapshot};
pub use serial_sink::{
    CLEAR_COMMAND, DeliveryOutcome, Frame, PortOpener, SerialLinkState, SerialPortOpener,
    SerialSink,
};
pub use status::{STATUS_PREFIX, StatusReporter, status_text};
pub use utils::display_name_from_app_id;

use tokio_util::sync::CancellationToken;

/// `NowPlayingSender` 是本程序的静态入口点。
pub struct NowPlayingSender;

impl NowPlayingSender {
    /// 按配置启动全部组件并运行到收到关闭信号为止。
    ///
    /// 启动顺序：校验配置、获取单实例锁、启动显示面、进入轮询循环。
    /// 退出时发送最后一帧清屏、清空状态文件、停止显示面并释放实例锁。
    ///
    /// # 返回
    /// - `Ok(())`: 正常退出。
    /// - `Err(SenderError::AlreadyRunning)`: 已有另一个实例在运行，本实例未做任何事。
    /// - `Err(SenderError)`: 配置无效或运行时无法创建。
    pub fn run(config: &Config) -> Result<()> {
        config.validate()?;

        let _instance_guard = match InstanceGuard::acquire(DEFAULT_INSTANCE_NAME) {
            Ok(guard) => Some(guard),
            Err(SenderError::AlreadyRunning) => return Err(SenderError::AlreadyRunning),
            Err(e) => {
                log::warn!("[启动] 创建实例锁失败: {e}。无法保证单实例运行。");
                None
            }
        };

        let reporter = StatusReporter::new(status_text("Initializing..."));
        let shutdown = CancellationToken::new();

        let display = match DisplaySurface::start(reporter.clone(), shutdown.clone()) {
            Ok(display) => Some(display),
            Err(e) => {
                log::warn!("[启动] 无法启动显示面，将在没有托盘的情况下运行: {e}");
                None
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let interrupt_token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("[启动] 收到中断信号。");
                        interrupt_token.cancel();
                    }
                    Err(e) => log::warn!("[启动] 无法监听中断信号: {e}"),
                }
            });

            let mut orchestrator =
                Orchestrator::from_config(config, PlatformSource::new(), reporter.clone());
            orchestrator.run(shutdown).await;
        });

        if let Some(display) = display {
            display.stop();
        }
        log::info!("[启动] 程序已退出。");
        Ok(())
    }
}
