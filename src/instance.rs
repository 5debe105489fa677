//! 单实例保护。
//!
//! Windows 上使用命名互斥体；其他平台使用临时目录中的 pid 锁文件，
//! 持有者进程已不存在时（Linux 上通过 `/proc` 判断）会回收遗留的锁文件。

use crate::error::{Result, SenderError};

/// 默认的实例锁名称。
pub const DEFAULT_INSTANCE_NAME: &str = "NowPlayingSenderMutex";

/// 持有期间阻止同名的第二个实例启动，drop 时释放。
#[derive(Debug)]
pub struct InstanceGuard {
    inner: platform::Lock,
}

impl InstanceGuard {
    /// 获取实例锁。已被其他进程持有时返回 [`SenderError::AlreadyRunning`]。
    pub fn acquire(name: &str) -> Result<Self> {
        let inner = platform::Lock::acquire(name)?;
        log::debug!("[单实例] 已获取实例锁 '{name}'");
        Ok(Self { inner })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

#[cfg(windows)]
mod platform {
    use windows::{
        Win32::{
            Foundation::{CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE},
            System::Threading::CreateMutexW,
        },
        core::HSTRING,
    };

    use super::{Result, SenderError};

    #[derive(Debug)]
    pub(super) struct Lock {
        handle: Option<HANDLE>,
    }

    impl Lock {
        pub(super) fn acquire(name: &str) -> Result<Self> {
            let name = HSTRING::from(name);
            unsafe {
                let handle = CreateMutexW(None, false, &name)?;
                if GetLastError() == ERROR_ALREADY_EXISTS {
                    let _ = CloseHandle(handle);
                    return Err(SenderError::AlreadyRunning);
                }
                Ok(Self {
                    handle: Some(handle),
                })
            }
        }

        pub(super) fn release(&mut self) {
            if let Some(handle) = self.handle.take()
                && let Err(e) = unsafe { CloseHandle(handle) }
            {
                log::warn!("[单实例] 释放互斥体失败: {e}");
            }
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};

    use super::{Result, SenderError};

    #[derive(Debug)]
    pub(super) struct Lock {
        path: Option<PathBuf>,
    }

    impl Lock {
        pub(super) fn acquire(name: &str) -> Result<Self> {
            let path = std::env::temp_dir().join(format!("{name}.lock"));
            match create_lock_file(&path) {
                Err(SenderError::AlreadyRunning) if is_stale(&path) => {
                    log::info!("[单实例] 回收遗留的锁文件 {}", path.display());
                    fs::remove_file(&path)?;
                    create_lock_file(&path)?;
                }
                other => other?,
            }
            Ok(Self { path: Some(path) })
        }

        pub(super) fn release(&mut self) {
            if let Some(path) = self.path.take()
                && let Err(e) = fs::remove_file(&path)
            {
                log::warn!("[单实例] 删除锁文件 {} 失败: {e}", path.display());
            }
        }
    }

    fn create_lock_file(path: &Path) -> Result<()> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SenderError::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        };
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(())
    }

    /// 锁文件中记录的进程已不存在。无法判断时视为仍在运行。
    fn is_stale(path: &Path) -> bool {
        let proc_root = Path::new("/proc");
        if !proc_root.is_dir() {
            return false;
        }
        fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse::<u32>().ok())
            .is_some_and(|pid| !proc_root.join(pid.to_string()).exists())
    }
}
