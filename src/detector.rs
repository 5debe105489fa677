//! 曲目变化检测。
//!
//! 判定规则只看两样东西：由标题与艺术家拼接而成的 [`TrackIdentity`]，以及播放状态。
//! 两者任一不同即视为变化；同一首歌从播放变为暂停同样是一次需要派发的变化。

use crate::api::{MediaSnapshot, NowPlaying, PlaybackStatus};

/// 曲目身份，即 `title + artist` 的直接拼接。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    /// 从快照中派生曲目身份。
    pub fn of(snapshot: &MediaSnapshot) -> Self {
        let mut key = String::with_capacity(snapshot.title.len() + snapshot.artist.len());
        key.push_str(&snapshot.title);
        key.push_str(&snapshot.artist);
        Self(key)
    }

    /// 拼接后的原始字符串。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 上一次完成派发时的状态。
///
/// 只由轮询循环在一次派发之后更新，进程重启后回到 [`LastDeliveredState::Unseen`]。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LastDeliveredState {
    /// 启动以来还没有派发过任何内容。
    #[default]
    Unseen,
    /// 最近一次派发对应的身份与状态；两者均为 `None` 表示派发的是“无会话”。
    Delivered {
        /// 最近一次派发的曲目身份。
        identity: Option<TrackIdentity>,
        /// 最近一次派发的播放状态。
        status: Option<PlaybackStatus>,
    },
}

impl LastDeliveredState {
    /// 记录一次派发尝试，无论各输出端是否成功都会推进状态。
    pub fn record(&mut self, current: &NowPlaying) {
        let (identity, status) = key_of(current);
        *self = Self::Delivered { identity, status };
    }
}

fn key_of(current: &NowPlaying) -> (Option<TrackIdentity>, Option<PlaybackStatus>) {
    match current {
        NowPlaying::NoSession => (None, None),
        NowPlaying::Session(snapshot) => (Some(TrackIdentity::of(snapshot)), Some(snapshot.status)),
    }
}

/// 判断当前读数相对上一次派发是否需要新的派发周期。
///
/// 纯函数，无副作用。
pub fn has_changed(current: &NowPlaying, last: &LastDeliveredState) -> bool {
    match last {
        LastDeliveredState::Unseen => true,
        LastDeliveredState::Delivered { identity, status } => {
            let (current_identity, current_status) = key_of(current);
            current_identity != *identity || current_status != *status
        }
    }
}
