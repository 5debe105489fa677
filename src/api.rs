use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 播放状态
///
/// 与系统媒体会话报告的取值一一对应，原样透传，不做归并。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// 会话已关闭
    Closed,
    /// 会话已打开，但尚未开始播放
    Opened,
    /// 正在切换曲目
    Changing,
    /// 已停止
    Stopped,
    /// 播放中
    Playing,
    /// 已暂停
    Paused,
    #[default]
    /// 系统报告了无法识别的状态
    Unknown,
}

impl PlaybackStatus {
    /// 线路协议与 JSON 文件中使用的小写名称。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Changing => "changing",
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "opened" => Ok(Self::Opened),
            "changing" => Ok(Self::Changing),
            "stopped" => Ok(Self::Stopped),
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("未知的播放状态: '{other}'")),
        }
    }
}

/// 某一时刻从媒体会话读取到的完整快照。
///
/// 字段顺序即 JSON 状态文件中的键顺序。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaSnapshot {
    /// 当前的播放状态。
    pub status: PlaybackStatus,
    /// 曲目标题。
    pub title: String,
    /// 艺术家名称。
    pub artist: String,
    /// 专辑标题。
    pub album: String,
    /// 流派列表，保持系统报告的顺序。
    pub genres: Vec<String>,
    /// 副标题。
    pub subtitle: String,
    /// 评分。系统不提供时为空字符串。
    pub rating: String,
    /// 当前播放位置（秒）。
    pub position: f64,
    /// 曲目总时长（秒）。
    pub duration: f64,
    /// 产生该会话的应用标识（AUMID 或可执行文件名）。
    #[serde(rename = "app_id")]
    pub source_app_id: String,
}

/// 一次轮询的结果：要么有活动会话，要么没有。
///
/// “没有会话”是一个独立的取值而不是空快照，它会触发 CLEAR 路径。
#[derive(Debug, Clone, PartialEq)]
pub enum NowPlaying {
    /// 系统当前没有活动的媒体会话（或查询失败）。
    NoSession,
    /// 当前活动会话的快照。
    Session(MediaSnapshot),
}

impl NowPlaying {
    /// 如果存在活动会话，返回其快照。
    pub fn snapshot(&self) -> Option<&MediaSnapshot> {
        match self {
            Self::NoSession => None,
            Self::Session(snapshot) => Some(snapshot),
        }
    }

    /// 当前会话的播放状态。
    pub fn status(&self) -> Option<PlaybackStatus> {
        self.snapshot().map(|s| s.status)
    }

    /// 是否存在活动会话。
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

impl From<Option<MediaSnapshot>> for NowPlaying {
    fn from(value: Option<MediaSnapshot>) -> Self {
        value.map_or(Self::NoSession, Self::Session)
    }
}
