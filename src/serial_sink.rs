//! 串口输出端。
//!
//! 维护一条尽力而为的串口链路，并向显示设备发送以换行结尾的帧：
//!
//! * 数据帧：`TITLE|ARTIST|STATUS\n`
//! * 清屏帧：`CLEAR\n`
//!
//! 标题与艺术家中的 `|` 不做转义，接收端必须只按前两个 `|` 切分。
//!
//! 链路断开后按固定的重试间隔重新打开端口；写入失败会立即把链路置为断开，
//! 由下一次轮询开始重连，同一帧不会被立即重发。所有 I/O 错误都在这里被转换为
//! 状态切换与状态文本，绝不会向上传播。

use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::{
    api::{NowPlaying, PlaybackStatus},
    error::Result,
    status::{StatusReporter, status_text},
};

/// 清屏帧的内容（不含换行）。
pub const CLEAR_COMMAND: &str = "CLEAR";

/// 串口线路上的一帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 正在播放的曲目。
    Track {
        /// 曲目标题。
        title: String,
        /// 艺术家名称。
        artist: String,
        /// 播放状态。
        status: PlaybackStatus,
    },
    /// 让设备清空显示。
    Clear,
}

impl Frame {
    /// 根据一次轮询结果构造对应的帧：有会话发数据帧，无会话发清屏帧。
    pub fn for_reading(reading: &NowPlaying) -> Self {
        match reading {
            NowPlaying::NoSession => Self::Clear,
            NowPlaying::Session(snapshot) => Self::Track {
                title: snapshot.title.clone(),
                artist: snapshot.artist.clone(),
                status: snapshot.status,
            },
        }
    }

    /// 编码为 UTF-8 字节，包含结尾的换行。
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }

    /// 按接收端的规则解析一行：只在前两个 `|` 处切分。
    ///
    /// 标题中含有 `|` 时，多出的部分会落到艺术家与状态字段中，
    /// 这是协议本身的限制。
    pub fn decode(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if line == CLEAR_COMMAND {
            return Some(Self::Clear);
        }
        let mut parts = line.splitn(3, '|');
        let title = parts.next()?;
        let artist = parts.next()?;
        let status = parts.next()?.parse().ok()?;
        Some(Self::Track {
            title: title.to_string(),
            artist: artist.to_string(),
            status,
        })
    }
}

/// 帧在线路上的文本形式，不含结尾的换行。
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track {
                title,
                artist,
                status,
            } => write!(f, "{title}|{artist}|{status}"),
            Self::Clear => f.write_str(CLEAR_COMMAND),
        }
    }
}

/// 负责打开串口的对象，便于在测试中替换为内存实现。
pub trait PortOpener {
    /// 打开后得到的端口类型。
    type Port: Write;

    /// 尝试打开端口。
    fn open(&self) -> Result<Self::Port>;

    /// 用于日志与状态文本的端口名称。
    fn port_name(&self) -> &str;
}

/// 基于 `serialport` 的真实串口。
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    port: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialPortOpener {
    /// 创建一个打开器；`timeout` 限定每次读写的最长阻塞时间。
    pub fn new(port: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout,
        }
    }
}

impl PortOpener for SerialPortOpener {
    type Port = Box<dyn serialport::SerialPort>;

    fn open(&self) -> Result<Self::Port> {
        let port = serialport::new(self.port.as_str(), self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        Ok(port)
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}

/// 串口链路状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialLinkState {
    /// 端口未打开。
    Disconnected,
    /// 端口已打开，可以写入。
    Connected,
}

/// 一次投递的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 帧已写入并刷新。
    Delivered,
    /// 链路未连接，本次跳过。
    Skipped,
    /// 写入失败，链路已断开。
    Failed,
}

/// 串口输出端，独占链路状态。
pub struct SerialSink<O: PortOpener> {
    opener: O,
    retry_interval: Duration,
    port: Option<O::Port>,
    last_attempt: Option<Instant>,
}

impl<O: PortOpener> SerialSink<O> {
    /// 创建一个尚未连接的输出端。第一次 [`SerialSink::maintain`] 会立即尝试连接。
    pub fn new(opener: O, retry_interval: Duration) -> Self {
        Self {
            opener,
            retry_interval,
            port: None,
            last_attempt: None,
        }
    }

    /// 当前链路状态。
    pub fn link_state(&self) -> SerialLinkState {
        if self.port.is_some() {
            SerialLinkState::Connected
        } else {
            SerialLinkState::Disconnected
        }
    }

    /// 是否已连接。
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// 端口名称。
    pub fn port_name(&self) -> &str {
        self.opener.port_name()
    }

    /// 断开状态下，距上次尝试已满重试间隔时重新打开端口。
    ///
    /// 返回本次是否真正发起了连接尝试。
    pub fn maintain(&mut self, now: Instant, reporter: &StatusReporter) -> bool {
        if self.port.is_some() {
            return false;
        }
        if let Some(last) = self.last_attempt
            && now.saturating_duration_since(last) < self.retry_interval
        {
            return false;
        }

        self.last_attempt = Some(now);
        let name = self.opener.port_name().to_string();
        match self.opener.open() {
            Ok(port) => {
                log::info!("[串口] 已连接到 {name}");
                reporter.publish(status_text(format!("Connected to {name}")));
                self.port = Some(port);
            }
            Err(e) => {
                log::warn!("[串口] 打开端口 {name} 失败: {e}");
                reporter.publish(status_text(format!("COM port error: {e}")));
            }
        }
        true
    }

    /// 写入一帧。未连接时直接跳过；写入失败则断开链路。
    pub fn send(&mut self, frame: &Frame, reporter: &StatusReporter) -> DeliveryOutcome {
        let Some(port) = self.port.as_mut() else {
            log::info!("[串口] 链路未连接，未发送: {frame}");
            return DeliveryOutcome::Skipped;
        };

        let bytes = frame.encode();
        let result = port.write_all(&bytes).and_then(|()| port.flush());
        match result {
            Ok(()) => {
                log::info!("[串口] 已发送: {frame}");
                let detail = match frame {
                    Frame::Track { .. } => "Display connected, sending data.",
                    Frame::Clear => "Display connected, cleared data.",
                };
                reporter.publish(status_text(detail));
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                log::warn!("[串口] 写入失败，链路已断开: {e}");
                reporter.publish(status_text(format!("Display communication error: {e}")));
                self.port = None;
                DeliveryOutcome::Failed
            }
        }
    }

    /// 关闭前发送一帧清屏，然后释放端口。
    pub fn close(&mut self, reporter: &StatusReporter) {
        if self.port.is_none() {
            return;
        }
        self.send(&Frame::Clear, reporter);
        if self.port.take().is_some() {
            log::debug!("[串口] 端口已关闭。");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::error::SenderError;

    /// 内存中的假串口，所有已写入的字节共享给测试查看。
    #[derive(Default, Clone)]
    pub struct MemoryLink {
        pub written: Rc<RefCell<Vec<u8>>>,
        pub fail_writes: Rc<Cell<bool>>,
        pub fail_opens: Rc<Cell<bool>>,
        pub opens: Rc<Cell<usize>>,
    }

    impl MemoryLink {
        pub fn lines(&self) -> Vec<String> {
            String::from_utf8(self.written.borrow().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    pub struct MemoryPort(MemoryLink);

    impl Write for MemoryPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.0.fail_writes.get() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            self.0.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PortOpener for MemoryLink {
        type Port = MemoryPort;

        fn open(&self) -> Result<MemoryPort> {
            self.opens.set(self.opens.get() + 1);
            if self.fail_opens.get() {
                return Err(SenderError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "port busy",
                )));
            }
            Ok(MemoryPort(self.clone()))
        }

        fn port_name(&self) -> &str {
            "TEST0"
        }
    }
}
