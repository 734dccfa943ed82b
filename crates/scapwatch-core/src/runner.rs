//! 本地 oscap 子进程驱动
//!
//! 两个读线程把 stdout/stderr 的数据块经通道转交给驱动线程；
//! 驱动线程每个 pump 边界最多等待 `poll_interval`，然后把已到达的字节
//! 交给解析器与 stderr 转发，并检查取消请求。
use crossbeam_channel as channel;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use crate::args::{check_prerequisites, ArgumentBuilder, OutputPaths};
use crate::capabilities::{Feature, ToolCapabilities};
use crate::config::{ScanConfiguration, ScannerMode};
use crate::error::{ScanError, ScanResult};
use crate::lifecycle::ScanLifecycle;
use crate::notify::NotificationSink;
use crate::relay::LineBuffer;

/// 读线程单次读取的块大小
const READ_CHUNK: usize = 4096;

/// 结果文件全部通过时的退出码
pub const EXIT_ALL_PASS: i32 = 0;
/// 存在失败规则时的退出码（仍视为扫描成功）
pub const EXIT_SOME_FAILED: i32 = 2;

/// 扫描结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { exit_code: i32 },
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

enum PipeMsg {
    Data(Pipe, Vec<u8>),
    Closed(Pipe),
}

/// 在本机运行 oscap 的扫描器
pub struct LocalScanner {
    program: PathBuf,
    caps: ToolCapabilities,
    config: ScanConfiguration,
    poll_interval: Duration,
    lifecycle: ScanLifecycle,
}

impl LocalScanner {
    pub fn new(program: impl Into<PathBuf>, caps: ToolCapabilities, config: ScanConfiguration) -> Self {
        let lifecycle = ScanLifecycle::new(caps.supports(Feature::ProgressReporting));
        Self { program: program.into(), caps, config, poll_interval: Duration::from_millis(100), lifecycle }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn lifecycle(&self) -> &ScanLifecycle {
        &self.lifecycle
    }

    /// 在下一次 `run` 的第一个 pump 边界取消
    pub fn cancel(&mut self) {
        self.lifecycle.cancel();
    }

    /// 给定输出路径时将要传给 oscap 的参数（不启动进程）
    pub fn build_args(&self, mode: ScannerMode, input: &Path, outputs: OutputPaths<'_>) -> Vec<OsString> {
        let builder = ArgumentBuilder::new(&self.config, &self.caps);
        match mode {
            ScannerMode::OfflineRemediation => builder.offline_remediation_args(input, outputs),
            ScannerMode::Scan | ScannerMode::ScanOnlineRemediation => builder.evaluation_args(
                input,
                self.config.tailoring_file.as_deref(),
                outputs,
                mode == ScannerMode::ScanOnlineRemediation,
            ),
        }
    }

    /// 执行一次扫描；成功后可通过 `lifecycle()` 读取结果/报告/ARF
    pub fn run(&mut self, mode: ScannerMode, input: &Path, sink: &mut dyn NotificationSink) -> ScanResult<ScanOutcome> {
        if let Err(e) = check_prerequisites(&self.caps, &self.config, mode) {
            tracing::error!(error = %e, "prerequisite check failed");
            sink.error_message(&e.to_string());
            return Err(e);
        }

        let workdir = tempfile::Builder::new()
            .prefix("scapwatch-")
            .tempdir()
            .map_err(|e| ScanError::io("creating scratch directory", e))?;
        let results = workdir.path().join("results.xml");
        let report = workdir.path().join("report.html");
        let arf = workdir.path().join("arf.xml");
        let args = self.build_args(mode, input, OutputPaths { results: &results, report: &report, arf: &arf });

        tracing::info!(program = %self.program.display(), ?args, ?mode, "starting oscap");
        self.lifecycle.begin();

        let res = self.drive(&args, sink);
        let outcome = match res {
            Ok(Some(status)) => status,
            Ok(None) => {
                self.lifecycle.signal_completion(true);
                tracing::info!("scan canceled");
                return Ok(ScanOutcome::Canceled);
            }
            Err(e) => {
                self.lifecycle.signal_completion(true);
                return Err(e);
            }
        };

        let exit_code = match outcome.code() {
            Some(code @ (EXIT_ALL_PASS | EXIT_SOME_FAILED)) => code,
            code => {
                let e = ScanError::ToolFailed { exit_code: code };
                tracing::error!(error = %e, "oscap failed");
                sink.error_message(&e.to_string());
                self.lifecycle.signal_completion(true);
                return Err(e);
            }
        };

        let loaded = read_output(&results)
            .and_then(|r| Ok((r, read_output(&report)?, read_output(&arf)?)));
        match loaded {
            Ok((r, h, a)) => self.lifecycle.store_outputs(r, h, a),
            Err(e) => {
                sink.error_message(&e.to_string());
                self.lifecycle.signal_completion(true);
                return Err(e);
            }
        }

        self.lifecycle.signal_completion(false);
        tracing::info!(exit_code, "scan finished");
        Ok(ScanOutcome::Completed { exit_code })
    }

    /// 启动进程并 pump 直到退出；被取消时返回 Ok(None)
    fn drive(&mut self, args: &[OsString], sink: &mut dyn NotificationSink) -> ScanResult<Option<ExitStatus>> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ScanError::Spawn { program: self.program.clone(), source })?;

        let (tx, rx) = channel::unbounded::<PipeMsg>();
        let mut open = 0;
        if let Some(out) = child.stdout.take() {
            spawn_reader(Pipe::Stdout, out, tx.clone());
            open += 1;
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(Pipe::Stderr, err, tx.clone());
            open += 1;
        }
        // 读线程持有全部 Sender；它们结束后通道断开
        drop(tx);

        let mut stdout_buf: VecDeque<u8> = VecDeque::new();
        let mut stderr_buf = LineBuffer::new();
        let mut stdout_closed = false;
        let mut stdout_finished = false;

        while open > 0 {
            match rx.recv_timeout(self.poll_interval) {
                Ok(msg) => {
                    // 一次取完已到达的全部数据块
                    for msg in std::iter::once(msg).chain(rx.try_iter()) {
                        match msg {
                            PipeMsg::Data(Pipe::Stdout, bytes) => stdout_buf.extend(bytes),
                            PipeMsg::Data(Pipe::Stderr, bytes) => stderr_buf.push(&bytes),
                            PipeMsg::Closed(pipe) => {
                                open -= 1;
                                match pipe {
                                    Pipe::Stdout => stdout_closed = true,
                                    Pipe::Stderr => stderr_buf.close(),
                                }
                            }
                        }
                    }
                }
                Err(channel::RecvTimeoutError::Timeout) => {}
                Err(channel::RecvTimeoutError::Disconnected) => {
                    open = 0;
                    stdout_closed = true;
                    stderr_buf.close();
                }
            }

            self.lifecycle.pump_stdout(&mut stdout_buf, sink);
            self.lifecycle.pump_stderr(&mut stderr_buf, sink);

            if sink.cancel_requested() {
                self.lifecycle.cancel();
            }
            if self.lifecycle.is_cancel_requested() {
                // 取消时未完成的行静默丢弃
                kill(&mut child);
                return Ok(None);
            }

            if stdout_closed && !stdout_finished {
                self.lifecycle.finish_stdout(sink);
                stdout_finished = true;
            }
        }

        child.wait().map(Some).map_err(|e| ScanError::io("waiting for oscap", e))
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Pipe, mut src: R, tx: channel::Sender<PipeMsg>) {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(PipeMsg::Data(pipe, buf[..n].to_vec())).is_err() { return; }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(?pipe, error = %e, "reading oscap output failed");
                    break;
                }
            }
        }
        let _ = tx.send(PipeMsg::Closed(pipe));
    });
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(error = %e, "failed to kill oscap");
    }
    let _ = child.wait();
}

fn read_output(path: &Path) -> ScanResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ScanError::io(format!("reading '{}'", path.display()), e))
}
