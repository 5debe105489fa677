//! 状态显示面。
//!
//! 运行在独立线程上，只从 [`StatusReporter`] 的单槽信箱读取最新状态文本。
//! Windows 上是一个托盘图标（提示文本即状态，右键菜单只有“Quit”）；
//! 其他平台上是一个只把状态变化写入日志的无界面实现。

use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, SenderError},
    status::StatusReporter,
};

/// 显示线程检查状态信箱的周期。
pub(crate) const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// 托盘图标边长（像素）。
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) const ICON_SIZE: usize = 32;

/// 生成托盘图标的像素（ARGB，行优先）：白色方块，中央一个黑色圆点。
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn icon_pixels(size: usize) -> Vec<u32> {
    const WHITE: u32 = 0xFFFF_FFFF;
    const BLACK: u32 = 0xFF00_0000;

    let center = size as f64 / 2.0;
    let radius = size as f64 * 0.2;
    (0..size * size)
        .map(|i| {
            let x = (i % size) as f64 + 0.5 - center;
            let y = (i / size) as f64 + 0.5 - center;
            if x * x + y * y <= radius * radius {
                BLACK
            } else {
                WHITE
            }
        })
        .collect()
}

/// 正在运行的显示面句柄。
pub struct DisplaySurface {
    handle: Option<thread::JoinHandle<()>>,
    stopper: Stopper,
}

impl DisplaySurface {
    /// 在新线程上启动显示面。
    ///
    /// 用户在显示面上选择退出时会触发 `shutdown`。
    pub fn start(reporter: StatusReporter, shutdown: CancellationToken) -> Result<Self> {
        let (stopper, handle) = spawn_surface(reporter, shutdown)?;
        Ok(Self {
            handle: Some(handle),
            stopper,
        })
    }

    /// 停止显示面并等待线程退出。
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stopper.request_stop();
        log::debug!("[显示] 正在等待显示线程退出...");
        match handle.join() {
            Ok(()) => log::debug!("[显示] 显示线程已退出。"),
            Err(e) => log::warn!("[显示] 等待显示线程退出失败: {e:?}"),
        }
    }
}

impl Drop for DisplaySurface {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(windows)]
use crate::tray::TrayStopper as Stopper;

#[cfg(windows)]
fn spawn_surface(
    reporter: StatusReporter,
    shutdown: CancellationToken,
) -> Result<(Stopper, thread::JoinHandle<()>)> {
    crate::tray::spawn_tray(reporter, shutdown)
}

#[cfg(not(windows))]
use headless::HeadlessStopper as Stopper;

#[cfg(not(windows))]
fn spawn_surface(
    reporter: StatusReporter,
    shutdown: CancellationToken,
) -> Result<(Stopper, thread::JoinHandle<()>)> {
    headless::spawn_headless(reporter, shutdown)
}

/// 在独立线程上运行显示逻辑的通用启动方式。
pub(crate) fn spawn_named<F>(name: &str, body: F) -> Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| SenderError::WorkerThread(e.to_string()))
}

#[cfg(not(windows))]
mod headless {
    use std::thread;

    use crossbeam_channel::{RecvTimeoutError, Sender};
    use tokio_util::sync::CancellationToken;

    use super::{REFRESH_INTERVAL, spawn_named};
    use crate::{error::Result, status::StatusReporter};

    pub(crate) struct HeadlessStopper(Sender<()>);

    impl HeadlessStopper {
        pub(crate) fn request_stop(&self) {
            if self.0.send(()).is_err() {
                log::trace!("[显示] 显示线程已自行退出。");
            }
        }
    }

    /// 没有托盘可用时，把状态变化写入日志。
    ///
    /// 退出只能来自进程中断，`shutdown` 在这里不会被触发。
    pub(crate) fn spawn_headless(
        reporter: StatusReporter,
        _shutdown: CancellationToken,
    ) -> Result<(HeadlessStopper, thread::JoinHandle<()>)> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = spawn_named("status_display_thread", move || {
            log::debug!("[显示] 无界面显示线程已启动。");
            let mut seen = u64::MAX;
            loop {
                if let Some((generation, message)) = reporter.changed_since(seen) {
                    seen = generation;
                    log::info!("[显示] {message}");
                }
                match stop_rx.recv_timeout(REFRESH_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("[显示] 无界面显示线程已结束。");
        })?;
        Ok((HeadlessStopper(stop_tx), handle))
    }
}
