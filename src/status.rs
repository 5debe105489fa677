use std::sync::{Arc, Mutex, PoisonError};

/// 所有状态文本共用的前缀。
pub const STATUS_PREFIX: &str = "Now Playing: ";

/// 为状态文本加上统一前缀。
pub fn status_text(detail: impl AsRef<str>) -> String {
    format!("{STATUS_PREFIX}{}", detail.as_ref())
}

#[derive(Debug, Default)]
struct Slot {
    message: String,
    generation: u64,
}

/// 单槽位的状态信箱。
///
/// 轮询循环写入，显示线程读取。只保留最后一条消息，没有队列，也没有背压。
/// 克隆得到的句柄共享同一个槽位。
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    slot: Arc<Mutex<Slot>>,
}

impl StatusReporter {
    /// 以一条初始消息创建信箱。
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                message: initial.into(),
                generation: 0,
            })),
        }
    }

    /// 覆盖当前消息。与当前消息相同时不产生新版本。
    pub fn publish(&self, message: impl Into<String>) {
        let message = message.into();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.message == message {
            return;
        }
        log::debug!("[状态] {message}");
        slot.message = message;
        slot.generation = slot.generation.wrapping_add(1);
    }

    /// 当前消息的副本。
    pub fn current(&self) -> String {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .message
            .clone()
    }

    /// 如果消息在 `seen` 版本之后发生过变化，返回新版本号与消息。
    pub fn changed_since(&self, seen: u64) -> Option<(u64, String)> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        (slot.generation != seen).then(|| (slot.generation, slot.message.clone()))
    }
}
