//! stderr 转发：按行缓冲，一次 pump 汇总为一条告警
use crate::progress::StreamEvent;

/// stderr 通道的行缓冲
///
/// 只交出完整行（含结尾 `\n`）；通道关闭后剩余的半行也视为完整行。
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
    closed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// 标记写端已关闭
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn can_read_line(&self) -> bool {
        self.pending.contains(&b'\n') || (self.closed && !self.pending.is_empty())
    }

    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        match self.pending.iter().position(|&b| b == b'\n') {
            Some(i) => Some(self.pending.drain(..=i).collect()),
            None if self.closed && !self.pending.is_empty() => Some(std::mem::take(&mut self.pending)),
            None => None,
        }
    }
}

/// 读出所有完整行并拼接；非空时产出一个 Stderr 事件
pub fn relay_stderr(channel: &mut LineBuffer) -> Option<StreamEvent> {
    let mut text = Vec::new();
    while let Some(line) = channel.read_line() {
        text.extend_from_slice(&line);
    }
    if text.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(&text).into_owned();
    tracing::warn!(stderr = %text.trim_end(), "oscap wrote to stderr");
    Some(StreamEvent::Stderr { text })
}
