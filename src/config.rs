use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SenderError};

/// 程序配置。
///
/// 可以从 TOML 文件加载，缺失的键使用默认值：
///
/// ```toml
/// poll_interval_secs = 2
///
/// [serial]
/// enabled = true
/// port = "COM4"
/// baud_rate = 115200
/// retry_interval_secs = 60
/// write_timeout_ms = 1000
///
/// [json]
/// enabled = true
/// path = "now_playing_sender.json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 两次轮询之间的间隔（秒）。
    pub poll_interval_secs: f64,
    /// 串口输出设置。
    pub serial: SerialConfig,
    /// JSON 文件输出设置。
    pub json: JsonConfig,
}

/// 串口输出设置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// 是否启用串口输出。
    pub enabled: bool,
    /// 串口名称，例如 `COM4` 或 `/dev/ttyUSB0`。
    pub port: String,
    /// 波特率。
    pub baud_rate: u32,
    /// 链路断开后两次重连尝试之间的最短间隔（秒）。
    pub retry_interval_secs: f64,
    /// 单次写入的超时（毫秒）。
    pub write_timeout_ms: u64,
}

/// JSON 文件输出设置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    /// 是否启用 JSON 文件输出。
    pub enabled: bool,
    /// 状态文件路径。
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2.0,
            serial: SerialConfig::default(),
            json: JsonConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "COM4".to_string(),
            baud_rate: 115_200,
            retry_interval_secs: 60.0,
            write_timeout_ms: 1000,
        }
    }
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("now_playing_sender.json"),
        }
    }
}

impl Config {
    /// 从 TOML 文件加载配置。
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 从 TOML 文本解析配置。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// 检查各项取值是否可用。
    pub fn validate(&self) -> Result<()> {
        if !(self.poll_interval_secs > 0.0
            && Duration::try_from_secs_f64(self.poll_interval_secs).is_ok())
        {
            return Err(SenderError::InvalidConfig(format!(
                "poll_interval_secs 必须为正数且不超出时长范围，当前为 {}",
                self.poll_interval_secs
            )));
        }
        if self.serial.enabled {
            if self.serial.port.trim().is_empty() {
                return Err(SenderError::InvalidConfig(
                    "启用串口输出时 serial.port 不能为空".to_string(),
                ));
            }
            if self.serial.baud_rate == 0 {
                return Err(SenderError::InvalidConfig(
                    "serial.baud_rate 不能为 0".to_string(),
                ));
            }
            if Duration::try_from_secs_f64(self.serial.retry_interval_secs).is_err() {
                return Err(SenderError::InvalidConfig(format!(
                    "serial.retry_interval_secs 必须为非负数且不超出时长范围，当前为 {}",
                    self.serial.retry_interval_secs
                )));
            }
        }
        if self.json.enabled && self.json.path.as_os_str().is_empty() {
            return Err(SenderError::InvalidConfig(
                "启用 JSON 输出时 json.path 不能为空".to_string(),
            ));
        }
        Ok(())
    }

    /// 轮询间隔。
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs).unwrap_or(Duration::from_secs(2))
    }

    /// 串口重连间隔。
    pub fn retry_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.serial.retry_interval_secs)
            .unwrap_or(Duration::from_secs(60))
    }

    /// 串口写入超时。
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.write_timeout_ms)
    }
}
