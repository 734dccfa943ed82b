//! oscap 扫描驱动核心库
//!
//! 设计要点：
//! - 参数构建与能力检查是纯函数：同样的配置与能力总是得到同样的参数序列。
//! - stdout 进度按字节增量解析，不等待整行；事件以值的形式返回，由调用方决定如何投递。
//! - stderr 按行缓冲，每个 pump 周期汇总为一条告警。
//! - 所有可恢复的异常输入都以告警事件 + 状态复位处理，只有能力缺失会阻止扫描启动。

mod args;
mod capabilities;
mod config;
mod error;
mod lifecycle;
mod notify;
mod progress;
mod relay;
mod runner;

pub use args::{check_prerequisites, ArgumentBuilder, OutputPaths};
pub use capabilities::{detect_capabilities, Feature, ToolCapabilities};
pub use config::{load_config, AppConfig, OscapSettings, ScanConfiguration, ScannerMode};
pub use error::{ScanError, ScanResult};
pub use lifecycle::{ScanLifecycle, ScanPhase};
pub use notify::{deliver, CollectingSink, JsonLinesSink, Notification, NotificationSink, STATUS_PROCESSING};
pub use progress::{
    step, ByteSource, MalformedKind, ParserState, ProgressEvent, ProgressParser, ReadState, StreamEvent,
    MAX_BUFFER_LEN,
};
pub use relay::{relay_stderr, LineBuffer};
pub use runner::{LocalScanner, ScanOutcome, EXIT_ALL_PASS, EXIT_SOME_FAILED};
