//! 单次扫描的生命周期：取消标志、输出缓冲与解析状态
//!
//! 所有 pump 都在驱动线程上进行，取消请求也来自同一线程，
//! 因此取消标志只是一个普通 bool，在 pump 边界检查。
use crate::error::{ScanError, ScanResult};
use crate::notify::{deliver, NotificationSink};
use crate::progress::{ByteSource, ProgressParser, StreamEvent};
use crate::relay::{relay_stderr, LineBuffer};

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Canceled,
}

#[derive(Debug, Default, Clone)]
struct ScanOutputs {
    results: Vec<u8>,
    report: Vec<u8>,
    arf: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ScanLifecycle {
    parser: ProgressParser,
    cancel_requested: bool,
    phase: ScanPhase,
    outputs: ScanOutputs,
    events: Vec<StreamEvent>,
}

impl ScanLifecycle {
    pub fn new(progress_reporting: bool) -> Self {
        Self {
            parser: ProgressParser::new(progress_reporting),
            cancel_requested: false,
            phase: ScanPhase::Idle,
            outputs: ScanOutputs::default(),
            events: Vec::new(),
        }
    }

    pub fn parser(&self) -> &ProgressParser {
        &self.parser
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// 开始新一轮扫描：清空上一轮的输出；开始前发出的取消请求保留，在第一个 pump 边界生效
    pub fn begin(&mut self) {
        self.parser.reset();
        self.events.clear();
        self.outputs = ScanOutputs::default();
        self.phase = ScanPhase::Running;
    }

    /// 外部取消请求；在下一个 pump 边界生效
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// 读空 stdout 当前可用字节并投递事件
    pub fn pump_stdout<S: ByteSource + ?Sized>(&mut self, src: &mut S, sink: &mut dyn NotificationSink) -> usize {
        let n = self.parser.pump(src, &mut self.events);
        for ev in self.events.drain(..) {
            deliver(&ev, sink);
        }
        n
    }

    /// stdout 关闭：停在行中间的内容作为格式告警上报
    pub fn finish_stdout(&mut self, sink: &mut dyn NotificationSink) {
        if let Some(ev) = self.parser.finish() {
            deliver(&ev, sink);
        }
    }

    /// 转发 stderr 的完整行
    pub fn pump_stderr(&mut self, channel: &mut LineBuffer, sink: &mut dyn NotificationSink) {
        if let Some(ev) = relay_stderr(channel) {
            deliver(&ev, sink);
        }
    }

    /// 写入本轮扫描的输出（每轮一次，由驱动在成功退出后调用）
    pub fn store_outputs(&mut self, results: Vec<u8>, report: Vec<u8>, arf: Vec<u8>) {
        self.outputs = ScanOutputs { results, report, arf };
    }

    /// 扫描结束（成功或取消）：复位解析状态并清除取消标志
    pub fn signal_completion(&mut self, canceled: bool) {
        self.phase = if canceled { ScanPhase::Canceled } else { ScanPhase::Completed };
        if canceled {
            self.outputs = ScanOutputs::default();
        }
        self.reset();
    }

    /// 幂等复位：解析器回到 ReadingPrefix，缓冲清空，取消标志为 false
    pub fn reset(&mut self) {
        self.parser.reset();
        self.events.clear();
        self.cancel_requested = false;
    }

    pub fn results(&self) -> ScanResult<&[u8]> {
        self.completed().map(|o| o.results.as_slice())
    }

    pub fn report(&self) -> ScanResult<&[u8]> {
        self.completed().map(|o| o.report.as_slice())
    }

    pub fn arf(&self) -> ScanResult<&[u8]> {
        self.completed().map(|o| o.arf.as_slice())
    }

    fn completed(&self) -> ScanResult<&ScanOutputs> {
        match self.phase {
            ScanPhase::Completed if !self.cancel_requested => Ok(&self.outputs),
            _ => Err(ScanError::ResultsUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CollectingSink;
    use crate::progress::ReadState;
    use std::collections::VecDeque;

    #[test]
    fn reset_is_idempotent() {
        let mut lc = ScanLifecycle::new(true);
        lc.begin();
        let mut sink = CollectingSink::new();
        lc.pump_stdout(&mut &b"rule_a:pa"[..], &mut sink);
        lc.cancel();

        lc.reset();
        lc.reset();
        assert_eq!(lc.parser().state().state, ReadState::ReadingPrefix);
        assert!(lc.parser().state().buffer.is_empty());
        assert!(lc.parser().state().last_rule_id.is_empty());
        assert!(!lc.is_cancel_requested());
    }

    #[test]
    fn results_only_after_successful_completion() {
        let mut lc = ScanLifecycle::new(true);
        assert!(matches!(lc.results(), Err(ScanError::ResultsUnavailable)));

        lc.begin();
        lc.store_outputs(b"<results/>".to_vec(), b"<html/>".to_vec(), b"<arf/>".to_vec());
        assert!(lc.report().is_err(), "still running");

        lc.signal_completion(false);
        assert_eq!(lc.phase(), ScanPhase::Completed);
        assert_eq!(lc.results().unwrap(), b"<results/>");
        assert_eq!(lc.report().unwrap(), b"<html/>");
        assert_eq!(lc.arf().unwrap(), b"<arf/>");
    }

    #[test]
    fn cancel_discards_partial_state_and_outputs() {
        let mut lc = ScanLifecycle::new(true);
        lc.begin();
        let mut sink = CollectingSink::new();
        let mut src: VecDeque<u8> = b"Downloading: http://x ...".iter().copied().collect();
        lc.pump_stdout(&mut src, &mut sink);
        assert_eq!(lc.parser().state().state, ReadState::ReadingDownloadFileStatus);

        lc.cancel();
        assert!(lc.is_cancel_requested());
        lc.signal_completion(true);
        assert_eq!(lc.phase(), ScanPhase::Canceled);
        assert!(lc.parser().state().is_initial());
        assert!(!lc.is_cancel_requested());
        assert!(lc.results().is_err());
    }

    #[test]
    fn lifecycle_is_reusable() {
        let mut lc = ScanLifecycle::new(true);
        let mut sink = CollectingSink::new();
        lc.begin();
        lc.pump_stdout(&mut &b"r1:pass\n"[..], &mut sink);
        lc.signal_completion(false);

        lc.begin();
        assert_eq!(lc.phase(), ScanPhase::Running);
        lc.pump_stdout(&mut &b"r2:fail\n"[..], &mut sink);
        lc.signal_completion(false);
        assert_eq!(
            sink.progress().collect::<Vec<_>>(),
            vec![("r1", "processing"), ("r1", "pass"), ("r2", "processing"), ("r2", "fail")]
        );
    }

    #[test]
    fn cancel_before_begin_survives_until_completion() {
        let mut lc = ScanLifecycle::new(true);
        lc.cancel();
        lc.begin();
        assert!(lc.is_cancel_requested());
        lc.signal_completion(true);
        assert!(!lc.is_cancel_requested());
    }

    #[test]
    fn truncated_stdout_reported_on_finish() {
        let mut lc = ScanLifecycle::new(true);
        let mut sink = CollectingSink::new();
        lc.begin();
        lc.pump_stdout(&mut &b"rule_ok:pass\nrule_cut:pa"[..], &mut sink);
        lc.finish_stdout(&mut sink);
        let warnings: Vec<_> = sink.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].ends_with("Read buffer is 'pa'."));
        assert_eq!(lc.parser().state().state, ReadState::ReadingPrefix);

        lc.finish_stdout(&mut sink);
        assert_eq!(sink.warnings().count(), 1);
    }

    #[test]
    fn stderr_pump_delivers_single_warning() {
        let mut lc = ScanLifecycle::new(true);
        let mut sink = CollectingSink::new();
        let mut ch = LineBuffer::new();
        ch.push(b"a\nb\n");
        lc.pump_stderr(&mut ch, &mut sink);
        lc.pump_stderr(&mut ch, &mut sink);
        assert_eq!(sink.warnings().count(), 1);
    }
}
