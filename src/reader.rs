//! 媒体快照读取。
//!
//! 每次轮询调用一次 [`read_snapshot`]，它只做一次尝试，不在内部重试。
//! 平台查询出错时记录日志、写入状态文本，并按“无会话”处理。

use std::future::Future;

use crate::{
    api::NowPlaying,
    error::Result,
    status::{StatusReporter, status_text},
};

/// 提供“正在播放”会话快照的来源。
pub trait MediaSource {
    /// 查询一次当前会话。没有会话时返回 `Ok(NowPlaying::NoSession)`。
    fn query(&mut self) -> impl Future<Output = Result<NowPlaying>>;
}

/// 读取一次快照。错误不会向上传播，而是转换为 [`NowPlaying::NoSession`]。
pub async fn read_snapshot<S: MediaSource>(
    source: &mut S,
    reporter: &StatusReporter,
) -> NowPlaying {
    match source.query().await {
        Ok(reading) => reading,
        Err(e) => {
            log::warn!("[媒体读取] 查询媒体会话失败: {e}");
            reporter.publish(status_text(format!("Media session error: {e}")));
            NowPlaying::NoSession
        }
    }
}

#[cfg(windows)]
pub use smtc::SmtcSource as PlatformSource;

#[cfg(not(windows))]
pub use unsupported::UnsupportedSource as PlatformSource;

#[cfg(windows)]
mod smtc {
    use std::future::IntoFuture;

    use tokio::time::{Duration as TokioDuration, timeout as tokio_timeout};
    use windows::{
        Media::Control::{
            GlobalSystemMediaTransportControlsSession as MediaSession,
            GlobalSystemMediaTransportControlsSessionManager as MediaSessionManager,
            GlobalSystemMediaTransportControlsSessionPlaybackStatus as SessionPlaybackStatus,
        },
        core::{HSTRING, Interface, Result as WinResult},
    };
    use windows_future::IAsyncInfo;

    use super::MediaSource;
    use crate::{
        api::{MediaSnapshot, NowPlaying, PlaybackStatus},
        error::{Result, SenderError},
        utils::ticks_to_secs,
    };

    /// SMTC 异步操作的通用超时时长。
    /// 用于防止 `WinRT` 的异步调用无限期阻塞轮询循环。
    const SMTC_ASYNC_OPERATION_TIMEOUT: TokioDuration = TokioDuration::from_secs(5);

    /// 使用超时来执行一个 `WinRT` 异步操作。
    /// 如果超时，会尝试取消该操作。
    async fn run_winrt_op_with_timeout<F, T>(operation: F) -> Result<T>
    where
        T: windows::core::RuntimeType + 'static,
        T::Default: 'static,
        F: IntoFuture<Output = WinResult<T>> + Interface + Clone,
    {
        match tokio_timeout(SMTC_ASYNC_OPERATION_TIMEOUT, operation.clone().into_future()).await
        {
            Ok(result) => Ok(result?),
            Err(_) => {
                log::warn!("[媒体读取] WinRT 异步操作超时 (>{SMTC_ASYNC_OPERATION_TIMEOUT:?}).");

                if let Ok(async_info) = operation.cast::<IAsyncInfo>() {
                    if let Err(e) = async_info.Cancel() {
                        log::warn!("[媒体读取] 取消 WinRT 异步操作失败: {e:?}");
                    }
                } else {
                    log::warn!("[媒体读取] 无法将异步操作转换为 IAsyncInfo 来执行取消操作。");
                }

                Err(SenderError::Timeout(SMTC_ASYNC_OPERATION_TIMEOUT))
            }
        }
    }

    /// 将 Windows HSTRING 转换为 Rust String，失败或为空时返回空 String。
    fn text_or_empty(value: WinResult<HSTRING>) -> String {
        match value {
            Ok(hstr) if !hstr.is_empty() => hstr.to_string_lossy(),
            _ => String::new(),
        }
    }

    fn map_status(status: SessionPlaybackStatus) -> PlaybackStatus {
        match status {
            SessionPlaybackStatus::Closed => PlaybackStatus::Closed,
            SessionPlaybackStatus::Opened => PlaybackStatus::Opened,
            SessionPlaybackStatus::Changing => PlaybackStatus::Changing,
            SessionPlaybackStatus::Stopped => PlaybackStatus::Stopped,
            SessionPlaybackStatus::Playing => PlaybackStatus::Playing,
            SessionPlaybackStatus::Paused => PlaybackStatus::Paused,
            _ => PlaybackStatus::Unknown,
        }
    }

    /// 通过 Windows 系统媒体传输控件 (SMTC) 读取当前会话。
    ///
    /// 会话管理器只请求一次并缓存；任何查询失败都会丢弃缓存，下一次轮询重新请求。
    #[derive(Default)]
    pub struct SmtcSource {
        manager: Option<MediaSessionManager>,
    }

    impl SmtcSource {
        /// 创建一个尚未连接会话管理器的来源。
        pub fn new() -> Self {
            Self::default()
        }

        async fn manager(&mut self) -> Result<MediaSessionManager> {
            if let Some(manager) = &self.manager {
                return Ok(manager.clone());
            }
            log::debug!("[媒体读取] 正在请求 SMTC 管理器...");
            let manager = run_winrt_op_with_timeout(MediaSessionManager::RequestAsync()?).await?;
            self.manager = Some(manager.clone());
            Ok(manager)
        }

        async fn read_session(session: &MediaSession) -> Result<MediaSnapshot> {
            let status = map_status(session.GetPlaybackInfo()?.PlaybackStatus()?);
            let props = run_winrt_op_with_timeout(session.TryGetMediaPropertiesAsync()?).await?;
            let timeline = session.GetTimelineProperties()?;

            let genres = props
                .Genres()
                .map(|list| list.into_iter().map(|g| g.to_string_lossy()).collect())
                .unwrap_or_default();

            Ok(MediaSnapshot {
                status,
                title: text_or_empty(props.Title()),
                artist: text_or_empty(props.Artist()),
                album: text_or_empty(props.AlbumTitle()),
                genres,
                subtitle: text_or_empty(props.Subtitle()),
                // SMTC 的媒体属性不提供评分
                rating: String::new(),
                position: ticks_to_secs(timeline.Position()?.Duration),
                duration: ticks_to_secs(timeline.EndTime()?.Duration),
                source_app_id: text_or_empty(session.SourceAppUserModelId()),
            })
        }

        async fn try_query(&mut self) -> Result<NowPlaying> {
            let manager = self.manager().await?;
            let session = match manager.GetCurrentSession() {
                Ok(session) => session,
                Err(e) if e.code().is_ok() => return Ok(NowPlaying::NoSession),
                Err(e) => return Err(e.into()),
            };
            Ok(NowPlaying::Session(Self::read_session(&session).await?))
        }
    }

    impl MediaSource for SmtcSource {
        async fn query(&mut self) -> Result<NowPlaying> {
            let result = self.try_query().await;
            if result.is_err() && self.manager.take().is_some() {
                log::debug!("[媒体读取] 查询失败，已丢弃缓存的 SMTC 管理器。");
            }
            result
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use super::MediaSource;
    use crate::{api::NowPlaying, error::Result};

    /// 当前平台没有可用的系统媒体会话接口，始终报告“无会话”。
    #[derive(Debug, Default)]
    pub struct UnsupportedSource {
        warned: bool,
    }

    impl UnsupportedSource {
        /// 创建来源。
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl MediaSource for UnsupportedSource {
        async fn query(&mut self) -> Result<NowPlaying> {
            if !self.warned {
                self.warned = true;
                log::warn!("[媒体读取] 当前平台不支持读取系统媒体会话，将始终视为无会话。");
            }
            Ok(NowPlaying::NoSession)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::MediaSnapshot, error::SenderError};

    struct Failing;

    impl MediaSource for Failing {
        async fn query(&mut self) -> Result<NowPlaying> {
            Err(SenderError::Timeout(std::time::Duration::from_secs(5)))
        }
    }

    struct Fixed(NowPlaying);

    impl MediaSource for Fixed {
        async fn query(&mut self) -> Result<NowPlaying> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_query_error_becomes_no_session() {
        let reporter = StatusReporter::new("initial");
        let reading = read_snapshot(&mut Failing, &reporter).await;
        assert_eq!(reading, NowPlaying::NoSession);
        assert!(reporter.current().starts_with("Now Playing: Media session error:"));
    }

    #[tokio::test]
    async fn test_successful_query_is_passed_through() {
        let reporter = StatusReporter::new("initial");
        let expected = NowPlaying::Session(MediaSnapshot {
            title: "Song A".into(),
            ..Default::default()
        });
        let reading = read_snapshot(&mut Fixed(expected.clone()), &reporter).await;
        assert_eq!(reading, expected);
        assert_eq!(reporter.current(), "initial");
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_unsupported_platform_reports_no_session() {
        let mut source = PlatformSource::new();
        let reporter = StatusReporter::default();
        assert_eq!(read_snapshot(&mut source, &reporter).await, NowPlaying::NoSession);
        assert_eq!(read_snapshot(&mut source, &reporter).await, NowPlaying::NoSession);
    }
}
