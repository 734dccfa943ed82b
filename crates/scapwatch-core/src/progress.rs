//! oscap `--progress` 输出的增量解析（逐字节状态机）
//!
//! 协议（按行，冒号与点号分隔）：
//! - `<rule_id>:<result>\n`：单条规则的结果
//! - `Downloading: <url> ...:<status>\n`：远程资源下载，三个点为固定的进度标记
//!
//! 设计要点：
//! - 不缓冲整行：每个字节到达即推进状态，事件即时产出，分块方式不影响输出。
//! - 遇到意外的分隔符不中断，产出一个格式告警并回到 ReadingPrefix，下一行自愈。
//! - 累积缓冲有上限，超限按格式错误处理。
use serde::Serialize;
use std::collections::VecDeque;

/// 累积缓冲上限（字节）
pub const MAX_BUFFER_LEN: usize = 4096;

/// 下载行的前缀关键字
const DOWNLOADING: &[u8] = b"Downloading";
/// 第三个点到达前缓冲的结尾（空格 + 两个点）
const PROGRESS_MARKER: &[u8] = b" ..";

/// 当前读取阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    ReadingPrefix,
    ReadingRuleResult,
    ReadingDownloadFile,
    ReadingDownloadFileStatus,
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RuleStarted { rule_id: String },
    RuleResult { rule_id: String, result: String },
    DownloadStarted { file_ref: String },
    DownloadFinished { file_ref: String, ok: bool },
}

/// 格式错误的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKind {
    /// 读取规则结果时又遇到 `:`
    UnexpectedColon,
    /// 读取规则 ID 时遇到换行
    UnexpectedNewline,
    /// 单个字段超过 MAX_BUFFER_LEN
    Overflow,
    /// 流结束时仍停在某一行中间
    UnexpectedEof,
}

/// 解析器与 stderr 转发产出的全部事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Malformed { reason: MalformedKind, buffer: String },
    /// stderr 的一批完整行（原样拼接）
    Stderr { text: String },
}

impl From<ProgressEvent> for StreamEvent {
    fn from(e: ProgressEvent) -> Self {
        StreamEvent::Progress(e)
    }
}

/// 解析状态：阶段 + 累积缓冲 + 跨 `:` 保留的上下文
///
/// 不变式：buffer 中永远不含 `\n`；规则行阶段也不含 `:`（二者在追加前就被当作分隔符消费）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserState {
    pub state: ReadState,
    pub buffer: Vec<u8>,
    pub last_rule_id: String,
    pub last_download_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Colon,
    Newline,
    Dot,
    Other,
}

fn classify(b: u8) -> CharClass {
    match b {
        b':' => CharClass::Colon,
        b'\n' => CharClass::Newline,
        b'.' => CharClass::Dot,
        _ => CharClass::Other,
    }
}

impl ParserState {
    /// 初始状态：ReadingPrefix，缓冲为空
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::default()
    }

    /// 回到初始状态（扫描结束/取消时调用）
    pub fn reset(&mut self) {
        self.state = ReadState::ReadingPrefix;
        self.buffer.clear();
        self.last_rule_id.clear();
        self.last_download_file.clear();
    }

    /// 消费一个字节，最多产出一个事件
    pub fn consume(&mut self, b: u8) -> Option<StreamEvent> {
        use CharClass::*;
        use ReadState::*;

        match (self.state, classify(b)) {
            (ReadingPrefix, Colon) => {
                if self.buffer == DOWNLOADING {
                    self.transition(ReadingDownloadFile);
                    None
                } else {
                    self.last_rule_id = self.take_buffer();
                    self.transition(ReadingRuleResult);
                    Some(ProgressEvent::RuleStarted { rule_id: self.last_rule_id.clone() }.into())
                }
            }
            (ReadingPrefix, Newline) => Some(self.malformed(MalformedKind::UnexpectedNewline)),
            (ReadingRuleResult, Colon) => {
                // 保持在 ReadingRuleResult，只丢弃已读内容
                let buffer = self.take_buffer();
                Some(StreamEvent::Malformed { reason: MalformedKind::UnexpectedColon, buffer })
            }
            (ReadingRuleResult, Newline) => {
                let result = self.take_buffer();
                self.transition(ReadingPrefix);
                Some(ProgressEvent::RuleResult { rule_id: self.last_rule_id.clone(), result }.into())
            }
            // 没有为这一转移定义事件
            (ReadingDownloadFile, Newline) => {
                self.transition(ReadingPrefix);
                None
            }
            (ReadingDownloadFile, Dot) if self.buffer.ends_with(PROGRESS_MARKER) => {
                // 去掉开头的空格与结尾的 " .."
                let end = self.buffer.len() - PROGRESS_MARKER.len();
                let start = 1.min(end);
                self.last_download_file = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                self.transition(ReadingDownloadFileStatus);
                Some(ProgressEvent::DownloadStarted { file_ref: self.last_download_file.clone() }.into())
            }
            (ReadingDownloadFileStatus, Newline) => {
                // 首字节是分隔符
                let status = self.buffer.get(1..).unwrap_or(&[]);
                let ok = status == b"ok";
                self.transition(ReadingPrefix);
                Some(ProgressEvent::DownloadFinished { file_ref: self.last_download_file.clone(), ok }.into())
            }
            // 下载行中的 `:` 属于 URL 或状态分隔符，照常追加
            (ReadingDownloadFile | ReadingDownloadFileStatus, Colon) | (_, Dot | Other) => self.append(b),
        }
    }

    /// 流结束：只有 ReadingPrefix 且缓冲为空才算完整，否则产出格式告警并复位
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.state == ReadState::ReadingPrefix && self.buffer.is_empty() {
            return None;
        }
        let pending = self.state;
        let event = self.malformed(MalformedKind::UnexpectedEof);
        tracing::debug!(?pending, "progress stream ended mid-line");
        Some(event)
    }

    fn append(&mut self, b: u8) -> Option<StreamEvent> {
        if self.buffer.len() >= MAX_BUFFER_LEN {
            return Some(self.malformed(MalformedKind::Overflow));
        }
        self.buffer.push(b);
        None
    }

    /// 产出格式告警并回到 ReadingPrefix
    fn malformed(&mut self, reason: MalformedKind) -> StreamEvent {
        let buffer = self.take_buffer();
        self.transition(ReadState::ReadingPrefix);
        StreamEvent::Malformed { reason, buffer }
    }

    fn take_buffer(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        s
    }

    fn transition(&mut self, next: ReadState) {
        self.state = next;
        self.buffer.clear();
    }
}

/// 纯函数形式的单步转移，便于表驱动测试
pub fn step(mut state: ParserState, b: u8) -> (ParserState, Option<StreamEvent>) {
    let event = state.consume(b);
    (state, event)
}

/// 非阻塞字节源：只交出"当前已到达"的字节，没有则返回 None
pub trait ByteSource {
    fn next_available(&mut self) -> Option<u8>;
}

impl ByteSource for VecDeque<u8> {
    fn next_available(&mut self) -> Option<u8> {
        self.pop_front()
    }
}

impl ByteSource for &[u8] {
    fn next_available(&mut self) -> Option<u8> {
        let (&first, rest) = self.split_first()?;
        *self = rest;
        Some(first)
    }
}

/// stdout 进度解析器
///
/// 工具不支持 `--progress` 时进入直通模式：照常读空字节源，但不产出任何事件。
#[derive(Debug, Clone)]
pub struct ProgressParser {
    state: ParserState,
    progress_reporting: bool,
}

impl ProgressParser {
    pub fn new(progress_reporting: bool) -> Self {
        Self { state: ParserState::new(), progress_reporting }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn is_pass_through(&self) -> bool {
        !self.progress_reporting
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// 读空当前可用的字节，事件追加到 `out`；返回消费的字节数
    pub fn pump<S: ByteSource + ?Sized>(&mut self, src: &mut S, out: &mut Vec<StreamEvent>) -> usize {
        let mut consumed = 0;
        while let Some(b) = src.next_available() {
            consumed += 1;
            if !self.progress_reporting { continue; }
            if let Some(ev) = self.state.consume(b) {
                tracing::debug!(event = ?ev, "progress event");
                out.push(ev);
            }
        }
        consumed
    }

    /// stdout 关闭后调用；直通模式下不产出事件
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if !self.progress_reporting { return None; }
        self.state.finish()
    }

    /// 便捷接口：一次喂入一段字节
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.pump(&mut bytes, &mut out);
        out
    }
}
