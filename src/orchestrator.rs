use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::{
    api::NowPlaying,
    config::Config,
    detector::{LastDeliveredState, has_changed},
    file_sink::FileSink,
    reader::{MediaSource, read_snapshot},
    serial_sink::{DeliveryOutcome, Frame, PortOpener, SerialPortOpener, SerialSink},
    status::{StatusReporter, status_text},
    utils::display_name_from_app_id,
};

/// 一次轮询周期的结果，主要供测试与调试日志使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// 本周期是否检测到变化并进行了派发。
    pub dispatched: bool,
    /// 串口输出端的投递结果；未派发或串口未启用时为 `None`。
    pub serial: Option<DeliveryOutcome>,
    /// 文件是否写入成功；未派发或 JSON 输出未启用时为 `None`。
    pub file_written: Option<bool>,
}

impl CycleReport {
    /// 是否有输出端在本周期写入失败。跳过不算失败。
    pub fn any_failed(&self) -> bool {
        self.serial == Some(DeliveryOutcome::Failed) || self.file_written == Some(false)
    }
}

/// 轮询循环。
///
/// 持有上一次派发的状态以及两个输出端。每个周期：维护串口链路、读取快照、
/// 比较变化、按需派发到两个互相独立的输出端，最后休眠一个轮询间隔。
pub struct Orchestrator<S, O: PortOpener> {
    source: S,
    serial: Option<SerialSink<O>>,
    file: Option<FileSink>,
    last: LastDeliveredState,
    reporter: StatusReporter,
    poll_interval: Duration,
}

impl<S: MediaSource> Orchestrator<S, SerialPortOpener> {
    /// 按配置组装轮询循环，使用真实串口。
    pub fn from_config(config: &Config, source: S, reporter: StatusReporter) -> Self {
        let serial = config.serial.enabled.then(|| {
            let opener = SerialPortOpener::new(
                config.serial.port.clone(),
                config.serial.baud_rate,
                config.write_timeout(),
            );
            SerialSink::new(opener, config.retry_interval())
        });
        let file = config
            .json
            .enabled
            .then(|| FileSink::new(config.json.path.clone()));
        Self::new(source, serial, file, reporter, config.poll_interval())
    }
}

impl<S: MediaSource, O: PortOpener> Orchestrator<S, O> {
    /// 用给定的组件创建轮询循环。
    pub fn new(
        source: S,
        serial: Option<SerialSink<O>>,
        file: Option<FileSink>,
        reporter: StatusReporter,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            serial,
            file,
            last: LastDeliveredState::default(),
            reporter,
            poll_interval,
        }
    }

    /// 上一次派发的状态。
    pub fn last_delivered(&self) -> &LastDeliveredState {
        &self.last
    }

    /// 串口输出端（如果启用）。
    pub fn serial(&self) -> Option<&SerialSink<O>> {
        self.serial.as_ref()
    }

    /// 一直运行，直到 `shutdown` 被触发；随后执行收尾。
    ///
    /// 取消只在周期之间生效，正在进行的周期会完整执行。
    pub async fn run(&mut self, shutdown: CancellationToken) {
        log::info!("[轮询] 轮询循环已启动，间隔 {:?}", self.poll_interval);
        self.reporter.publish(status_text("Waiting for media..."));

        loop {
            let report = self.poll_once(Instant::now()).await;
            if report.dispatched {
                log::debug!("[轮询] 本周期派发结果: {report:?}");
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    log::info!("[轮询] 收到关闭信号，准备退出...");
                    break;
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.shutdown();
    }

    /// 执行一个完整的轮询周期（不含休眠）。
    pub async fn poll_once(&mut self, now: Instant) -> CycleReport {
        self.refresh_link(now);

        let reading = read_snapshot(&mut self.source, &self.reporter).await;
        if !has_changed(&reading, &self.last) {
            return CycleReport::default();
        }

        match &reading {
            NowPlaying::Session(snapshot) => log::info!(
                "[轮询] 曲目变化: '{}' - '{}' [{}] (来自 {})",
                snapshot.artist,
                snapshot.title,
                snapshot.status,
                display_name_from_app_id(&snapshot.source_app_id)
            ),
            NowPlaying::NoSession => log::info!("[轮询] 当前没有活动的媒体会话。"),
        }

        let report = self.dispatch(&reading);

        // 本周期某个输出端报告的错误优先于“无媒体”提示
        if !reading.is_session() && !report.any_failed() {
            let detail = match &self.serial {
                Some(sink) if sink.is_connected() => {
                    format!("Connected to {}, no media.", sink.port_name())
                }
                _ => "Waiting for media...".to_string(),
            };
            self.reporter.publish(status_text(detail));
        }

        // 推进状态的是“尝试派发”，而不是“确认送达”
        self.last.record(&reading);
        report
    }

    /// 收尾：发送最后一帧清屏、清空文件并释放串口。
    pub fn shutdown(&mut self) {
        log::info!("[轮询] 正在关闭，清空所有输出...");
        if let Some(sink) = self.serial.as_mut() {
            sink.close(&self.reporter);
        }
        if let Some(file) = &self.file
            && let Err(e) = file.clear()
        {
            log::warn!("[文件输出] 清空 JSON 文件失败: {e}");
        }
        self.reporter.publish(status_text("Shutting down."));
    }

    fn refresh_link(&mut self, now: Instant) {
        match self.serial.as_mut() {
            Some(sink) if sink.is_connected() => {
                let detail = format!("Connected to {}", sink.port_name());
                self.reporter.publish(status_text(detail));
            }
            Some(sink) => {
                sink.maintain(now, &self.reporter);
            }
            None => self.reporter.publish(status_text("Serial output disabled.")),
        }
    }

    fn dispatch(&mut self, reading: &NowPlaying) -> CycleReport {
        let serial = self
            .serial
            .as_mut()
            .map(|sink| sink.send(&Frame::for_reading(reading), &self.reporter));

        let file_written = self.file.as_ref().map(|file| match file.deliver(reading) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[文件输出] 写入 {} 失败: {e}", file.path().display());
                self.reporter
                    .publish(status_text(format!("JSON file error: {e}")));
                false
            }
        });

        CycleReport {
            dispatched: true,
            serial,
            file_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{
        api::{MediaSnapshot, PlaybackStatus},
        error::{Result, SenderError},
        serial_sink::{SerialLinkState, testing::MemoryLink},
    };

    const POLL: Duration = Duration::from_secs(2);
    const RETRY: Duration = Duration::from_secs(60);

    /// 按顺序返回预设读数的媒体来源；读完后重复最后一个。
    struct Scripted {
        readings: VecDeque<Result<NowPlaying>>,
        last: NowPlaying,
    }

    impl Scripted {
        fn new(readings: impl IntoIterator<Item = NowPlaying>) -> Self {
            Self {
                readings: readings.into_iter().map(Ok).collect(),
                last: NowPlaying::NoSession,
            }
        }
    }

    impl MediaSource for Scripted {
        async fn query(&mut self) -> Result<NowPlaying> {
            match self.readings.pop_front() {
                Some(Ok(reading)) => {
                    self.last = reading.clone();
                    Ok(reading)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.clone()),
            }
        }
    }

    fn track(title: &str, artist: &str, status: PlaybackStatus) -> NowPlaying {
        NowPlaying::Session(MediaSnapshot {
            status,
            title: title.into(),
            artist: artist.into(),
            album: "Album".into(),
            duration: 180.0,
            ..Default::default()
        })
    }

    struct Harness {
        orchestrator: Orchestrator<Scripted, MemoryLink>,
        link: MemoryLink,
        reporter: StatusReporter,
        dir: tempfile::TempDir,
        start: Instant,
    }

    impl Harness {
        fn new(readings: impl IntoIterator<Item = NowPlaying>) -> Self {
            let link = MemoryLink::default();
            let reporter = StatusReporter::new(status_text("Initializing..."));
            let dir = tempfile::tempdir().unwrap();
            let orchestrator = Orchestrator::new(
                Scripted::new(readings),
                Some(SerialSink::new(link.clone(), RETRY)),
                Some(FileSink::new(dir.path().join("now_playing.json"))),
                reporter.clone(),
                POLL,
            );
            Self {
                orchestrator,
                link,
                reporter,
                dir,
                start: Instant::now(),
            }
        }

        async fn tick(&mut self, n: u32) -> CycleReport {
            self.orchestrator.poll_once(self.start + POLL * n).await
        }

        fn file(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("now_playing.json")).unwrap()
        }
    }

    #[tokio::test]
    async fn test_no_session_at_startup_clears_outputs() {
        let mut h = Harness::new([NowPlaying::NoSession]);
        let report = h.tick(0).await;
        assert!(report.dispatched);
        assert_eq!(h.file(), "{}");
        assert_eq!(h.link.lines(), ["CLEAR"]);
        assert_eq!(h.reporter.current(), "Now Playing: Connected to TEST0, no media.");
    }

    #[tokio::test]
    async fn test_no_session_without_serial_shows_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = StatusReporter::default();
        let mut orchestrator: Orchestrator<_, MemoryLink> = Orchestrator::new(
            Scripted::new([NowPlaying::NoSession]),
            None,
            Some(FileSink::new(dir.path().join("out.json"))),
            reporter.clone(),
            POLL,
        );
        orchestrator.poll_once(Instant::now()).await;
        assert_eq!(reporter.current(), "Now Playing: Waiting for media...");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.json")).unwrap(),
            "{}"
        );
    }

    #[tokio::test]
    async fn test_new_track_is_sent_to_both_sinks() {
        let mut h = Harness::new([track("Song A", "Artist A", PlaybackStatus::Playing)]);
        let report = h.tick(0).await;
        assert_eq!(
            report,
            CycleReport {
                dispatched: true,
                serial: Some(DeliveryOutcome::Delivered),
                file_written: Some(true),
            }
        );
        assert_eq!(h.link.lines(), ["Song A|Artist A|playing"]);

        let written: MediaSnapshot = serde_json::from_str(&h.file()).unwrap();
        assert_eq!(written.title, "Song A");
        assert_eq!(written.album, "Album");
        assert_eq!(written.duration, 180.0);
        assert!(matches!(
            h.orchestrator.last_delivered(),
            LastDeliveredState::Delivered { status: Some(PlaybackStatus::Playing), .. }
        ));
    }

    #[tokio::test]
    async fn test_unchanged_track_dispatches_once() {
        let song = track("Song A", "Artist A", PlaybackStatus::Playing);
        let mut h = Harness::new([song.clone(), song.clone(), song.clone(), song]);
        let mut dispatched = 0;
        for n in 0..4 {
            if h.tick(n).await.dispatched {
                dispatched += 1;
            }
        }
        assert_eq!(dispatched, 1);
        assert_eq!(h.link.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_triggers_new_cycle() {
        let mut h = Harness::new([
            track("Song A", "Artist A", PlaybackStatus::Playing),
            track("Song A", "Artist A", PlaybackStatus::Paused),
        ]);
        h.tick(0).await;
        assert!(h.tick(1).await.dispatched);
        assert_eq!(
            h.link.lines(),
            ["Song A|Artist A|playing", "Song A|Artist A|paused"]
        );
    }

    #[tokio::test]
    async fn test_session_disappearing_sends_clear() {
        let mut h = Harness::new([
            track("Song A", "Artist A", PlaybackStatus::Playing),
            NowPlaying::NoSession,
        ]);
        h.tick(0).await;
        h.tick(1).await;
        assert_eq!(h.link.lines(), ["Song A|Artist A|playing", "CLEAR"]);
        assert_eq!(h.file(), "{}");
    }

    #[tokio::test]
    async fn test_clear_failure_keeps_error_status() {
        let mut h = Harness::new([
            track("Song A", "Artist A", PlaybackStatus::Playing),
            NowPlaying::NoSession,
        ]);
        h.tick(0).await;

        h.link.fail_writes.set(true);
        let report = h.tick(1).await;
        assert_eq!(report.serial, Some(DeliveryOutcome::Failed));
        assert!(report.any_failed());
        assert_eq!(h.file(), "{}");
        assert!(
            h.reporter
                .current()
                .starts_with("Now Playing: Display communication error:")
        );
    }

    #[tokio::test]
    async fn test_file_clear_failure_keeps_error_status() {
        let link = MemoryLink::default();
        let reporter = StatusReporter::default();
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(
            Scripted::new([NowPlaying::NoSession]),
            Some(SerialSink::new(link.clone(), RETRY)),
            Some(FileSink::new(dir.path().join("missing").join("out.json"))),
            reporter.clone(),
            POLL,
        );

        let report = orchestrator.poll_once(Instant::now()).await;
        assert_eq!(report.serial, Some(DeliveryOutcome::Delivered));
        assert_eq!(report.file_written, Some(false));
        assert!(reporter.current().starts_with("Now Playing: JSON file error:"));
    }

    #[tokio::test]
    async fn test_unplugged_device_recovers_after_retry_interval() {
        let mut h = Harness::new([
            track("Song A", "Artist A", PlaybackStatus::Playing),
            track("Song B", "Artist B", PlaybackStatus::Playing),
            track("Song C", "Artist C", PlaybackStatus::Playing),
        ]);
        h.tick(0).await;

        h.link.fail_writes.set(true);
        let report = h.tick(1).await;
        assert_eq!(report.serial, Some(DeliveryOutcome::Failed));
        assert_eq!(report.file_written, Some(true));
        assert!(
            h.reporter
                .current()
                .starts_with("Now Playing: Display communication error:")
        );
        let link_state = h.orchestrator.serial().map(SerialSink::link_state);
        assert_eq!(link_state, Some(SerialLinkState::Disconnected));

        // 重试间隔内，新曲目只写文件，串口被跳过
        h.link.fail_writes.set(false);
        let report = h.tick(2).await;
        assert_eq!(report.serial, Some(DeliveryOutcome::Skipped));
        assert_eq!(h.link.opens.get(), 1);

        // 重试间隔到期后重新连接
        let n = (RETRY.as_secs() / POLL.as_secs()) as u32;
        h.tick(n).await;
        assert_eq!(h.link.opens.get(), 2);
        assert!(h.orchestrator.serial().is_some_and(SerialSink::is_connected));
        assert_eq!(h.reporter.current(), "Now Playing: Connected to TEST0");
    }

    #[tokio::test]
    async fn test_file_failure_does_not_block_serial_and_still_advances_state() {
        let link = MemoryLink::default();
        let reporter = StatusReporter::default();
        let dir = tempfile::tempdir().unwrap();
        let song = track("Song A", "Artist A", PlaybackStatus::Playing);
        let mut orchestrator = Orchestrator::new(
            Scripted::new([song.clone(), song]),
            Some(SerialSink::new(link.clone(), RETRY)),
            Some(FileSink::new(dir.path().join("missing").join("out.json"))),
            reporter.clone(),
            POLL,
        );

        let start = Instant::now();
        let report = orchestrator.poll_once(start).await;
        assert_eq!(report.serial, Some(DeliveryOutcome::Delivered));
        assert_eq!(report.file_written, Some(false));
        assert!(reporter.current().starts_with("Now Playing: JSON file error:"));

        // 失败的输出端不会在下一次未变化的轮询中重试
        assert!(!orchestrator.poll_once(start + POLL).await.dispatched);
    }

    #[tokio::test]
    async fn test_media_error_is_treated_as_no_session() {
        let mut h = Harness::new([track("Song A", "Artist A", PlaybackStatus::Playing)]);
        h.tick(0).await;
        h.orchestrator.source.readings.push_back(Err(SenderError::Timeout(POLL)));
        let report = h.tick(1).await;
        assert!(report.dispatched);
        assert_eq!(h.link.lines(), ["Song A|Artist A|playing", "CLEAR"]);
    }

    #[tokio::test]
    async fn test_shutdown_clears_outputs_and_releases_port() {
        let mut h = Harness::new([track("Song A", "Artist A", PlaybackStatus::Playing)]);
        h.tick(0).await;
        h.orchestrator.shutdown();
        assert_eq!(h.link.lines(), ["Song A|Artist A|playing", "CLEAR"]);
        assert_eq!(h.file(), "{}");
        assert!(!h.orchestrator.serial().is_some_and(SerialSink::is_connected));
        assert_eq!(h.reporter.current(), "Now Playing: Shutting down.");
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let mut h = Harness::new([track("Song A", "Artist A", PlaybackStatus::Playing)]);
        let token = CancellationToken::new();
        token.cancel();
        h.orchestrator.run(token).await;
        // 一个周期后立即收尾
        assert_eq!(h.link.lines(), ["Song A|Artist A|playing", "CLEAR"]);
        assert_eq!(h.file(), "{}");
    }
}
