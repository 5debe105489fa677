use thiserror::Error;

/// 定义本程序的统一错误枚举。
///
/// 除 [`SenderError::AlreadyRunning`] 与启动阶段的配置错误外，
/// 其余错误都会在轮询循环内被捕获，转换为日志与状态文本，不会终止进程。
#[derive(Debug, Error)]
pub enum SenderError {
    /// 无法启动后台线程（例如托盘显示线程）。
    #[error("无法启动后台线程: {0}")]
    WorkerThread(String),

    /// 底层的 Windows API 或 WinRT 调用失败。
    ///
    /// 读取媒体会话、创建托盘图标、创建命名互斥体时都可能产生此错误。
    #[cfg(windows)]
    #[error("Windows API 调用失败: {0}")]
    Windows(#[from] windows::core::Error),

    /// 串口打开或配置失败。
    #[error("串口错误: {0}")]
    Serial(#[from] serialport::Error),

    /// 文件或串口写入时发生 I/O 错误。
    ///
    /// 也用于 Tokio 运行时创建失败。
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化媒体快照失败。
    #[error("JSON 序列化失败: {0}")]
    Json(#[from] serde_json::Error),

    /// 配置文件不是合法的 TOML。
    #[error("配置文件解析失败: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 配置项的取值不合法。
    #[error("配置无效: {0}")]
    InvalidConfig(String),

    /// 媒体查询超时。
    #[error("媒体查询超时 (>{0:?})")]
    Timeout(std::time::Duration),

    /// 已有另一个实例在运行。
    #[error("另一个实例已在运行。")]
    AlreadyRunning,
}

/// 本程序统一的 `Result` 类型别名。
pub type Result<T> = std::result::Result<T, SenderError>;
