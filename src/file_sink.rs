use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{
    api::{MediaSnapshot, NowPlaying},
    error::Result,
};

/// 无会话时写入的空对象。
pub const EMPTY_OBJECT: &[u8] = b"{}";

/// JSON 状态文件输出端。
///
/// 每次都整体覆盖目标文件（不追加、不做原子重命名），并在返回前刷新到磁盘。
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// 创建一个写入 `path` 的输出端。
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 目标文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 以紧凑 JSON 写入完整快照。
    pub fn write_snapshot(&self, snapshot: &MediaSnapshot) -> Result<()> {
        let body = serde_json::to_vec(snapshot)?;
        self.overwrite(&body)?;
        log::info!("[文件输出] 已写入完整 JSON 信息");
        Ok(())
    }

    /// 把文件重置为 `{}`。
    pub fn clear(&self) -> Result<()> {
        self.overwrite(EMPTY_OBJECT)?;
        log::info!("[文件输出] 已清空 JSON 文件");
        Ok(())
    }

    /// 根据轮询结果写入快照或清空文件。
    pub fn deliver(&self, reading: &NowPlaying) -> Result<()> {
        match reading {
            NowPlaying::Session(snapshot) => self.write_snapshot(snapshot),
            NowPlaying::NoSession => self.clear(),
        }
    }

    fn overwrite(&self, bytes: &[u8]) -> Result<()> {
        let mut file = File::create(&self.path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
