//! 通知出口：把解析事件转换为 progress / info / warning / error 通知
use serde::Serialize;
use std::io::Write;

use crate::progress::{MalformedKind, ProgressEvent, StreamEvent, MAX_BUFFER_LEN};

/// 规则开始评估时上报的状态
pub const STATUS_PROCESSING: &str = "processing";

/// 通知接收方（UI、日志、JSON 输出等）
///
/// 所有方法即发即忘；每次扫描可以被调用任意次（包括零次）。
pub trait NotificationSink {
    fn progress_report(&mut self, rule_id: &str, status: &str);
    fn info_message(&mut self, text: &str);
    fn warning_message(&mut self, text: &str);
    fn error_message(&mut self, text: &str);

    /// 每个 pump 边界轮询一次；返回 true 时扫描在本轮结束后取消
    fn cancel_requested(&mut self) -> bool {
        false
    }
}

/// 把一个事件投递给 sink
pub fn deliver(event: &StreamEvent, sink: &mut dyn NotificationSink) {
    match event {
        StreamEvent::Progress(ProgressEvent::RuleStarted { rule_id }) => sink.progress_report(rule_id, STATUS_PROCESSING),
        StreamEvent::Progress(ProgressEvent::RuleResult { rule_id, result }) => sink.progress_report(rule_id, result),
        StreamEvent::Progress(ProgressEvent::DownloadStarted { file_ref }) => {
            sink.info_message(&format!("Downloading of \"{file_ref}\"..."))
        }
        StreamEvent::Progress(ProgressEvent::DownloadFinished { file_ref, ok: true }) => {
            sink.info_message(&format!("Downloading of \"{file_ref}\" finished: ok"))
        }
        StreamEvent::Progress(ProgressEvent::DownloadFinished { file_ref, ok: false }) => {
            sink.warning_message(&format!("Failed to download \"{file_ref}\"!"))
        }
        StreamEvent::Malformed { reason, buffer } => {
            tracing::warn!(?reason, %buffer, "malformed progress output");
            sink.warning_message(&malformed_message(*reason, buffer))
        }
        StreamEvent::Stderr { text } => sink.warning_message(&format!(
            "The 'oscap' process has written the following content to stderr:\n{text}"
        )),
    }
}

fn malformed_message(reason: MalformedKind, buffer: &str) -> String {
    let detail = match reason {
        MalformedKind::UnexpectedColon => {
            "':' encountered while not reading rule ID, newline and/or rule result are missing!".to_string()
        }
        MalformedKind::UnexpectedNewline => {
            "Newline encountered while reading rule ID, rule result and/or ':' are missing!".to_string()
        }
        MalformedKind::Overflow => format!("No delimiter found within {MAX_BUFFER_LEN} bytes!"),
        MalformedKind::UnexpectedEof => {
            "Output ended in the middle of a line, rule result and/or newline are missing!".to_string()
        }
    };
    format!(
        "Error when parsing scan progress output from stdout of the 'oscap' process. {detail} Read buffer is '{buffer}'."
    )
}

/// 通知的值形式（便于收集与序列化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Progress { rule_id: String, status: String },
    Info { text: String },
    Warning { text: String },
    Error { text: String },
}

/// 在内存中收集所有通知；可设置在第 N 条进度通知后请求取消
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub notifications: Vec<Notification>,
    cancel_after_progress: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after_progress(n: usize) -> Self {
        Self { notifications: Vec::new(), cancel_after_progress: Some(n) }
    }

    pub fn progress(&self) -> impl Iterator<Item = (&str, &str)> {
        self.notifications.iter().filter_map(|n| match n {
            Notification::Progress { rule_id, status } => Some((rule_id.as_str(), status.as_str())),
            _ => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.notifications.iter().filter_map(|n| match n {
            Notification::Warning { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.notifications.iter().filter_map(|n| match n {
            Notification::Error { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl NotificationSink for CollectingSink {
    fn progress_report(&mut self, rule_id: &str, status: &str) {
        self.notifications.push(Notification::Progress { rule_id: rule_id.into(), status: status.into() });
    }
    fn info_message(&mut self, text: &str) {
        self.notifications.push(Notification::Info { text: text.into() });
    }
    fn warning_message(&mut self, text: &str) {
        self.notifications.push(Notification::Warning { text: text.into() });
    }
    fn error_message(&mut self, text: &str) {
        self.notifications.push(Notification::Error { text: text.into() });
    }
    fn cancel_requested(&mut self) -> bool {
        self.cancel_after_progress.is_some_and(|n| self.progress().count() >= n)
    }
}

/// 每条通知写一行 JSON
///
/// 写失败不会中断扫描：记录第一个错误，由 `finish` 返回。
pub struct JsonLinesSink<W: Write> {
    out: W,
    error: Option<std::io::Error>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write(&mut self, n: Notification) {
        if self.error.is_some() { return; }
        let res = serde_json::to_writer(&mut self.out, &n)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(e) = res {
            self.error = Some(e);
        }
    }
}

impl<W: Write> NotificationSink for JsonLinesSink<W> {
    fn progress_report(&mut self, rule_id: &str, status: &str) {
        self.write(Notification::Progress { rule_id: rule_id.into(), status: status.into() });
    }
    fn info_message(&mut self, text: &str) {
        self.write(Notification::Info { text: text.into() });
    }
    fn warning_message(&mut self, text: &str) {
        self.write(Notification::Warning { text: text.into() });
    }
    fn error_message(&mut self, text: &str) {
        self.write(Notification::Error { text: text.into() });
    }
}
