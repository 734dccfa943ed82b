//! 错误类型（模块）
use std::path::PathBuf;
use thiserror::Error;

use crate::capabilities::Feature;

/// 核心库统一错误
///
/// 进度流中的格式错误、下载失败、stderr 输出都不属于这里：
/// 它们以事件形式返回，扫描继续进行。
#[derive(Debug, Error)]
pub enum ScanError {
    /// 当前 oscap 版本缺少必需能力，扫描不会启动
    #[error("{}", capability_message(.feature, .version))]
    CapabilityMismatch { feature: Feature, version: String },

    #[error("failed to load configuration '{}': {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// oscap 以非 0/2 的退出码结束（None 表示被信号终止）
    #[error("the 'oscap' process failed ({})", exit_label(.exit_code))]
    ToolFailed { exit_code: Option<i32> },

    /// 扫描尚未完成或已被取消时读取结果
    #[error("scan results are only available after a successful, non-canceled scan")]
    ResultsUnavailable,

    #[error("could not detect oscap version from output '{0}'")]
    VersionUndetected(String),
}

pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ScanError::Io { context: context.into(), source }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}

fn capability_message(feature: &Feature, version: &str) -> String {
    let what = match feature {
        Feature::Baseline => "oscap tool doesn't support basic features required for scapwatch. \
            Please make sure you have openscap 0.8.0 or newer."
            .to_string(),
        Feature::Tailoring => format!(
            "oscap tool doesn't support XCCDF tailoring but the session uses tailoring. \
             Please make sure you have openscap {} or newer on the target machine if you \
             want to use tailoring.",
            feature.min_version()
        ),
        _ => format!(
            "oscap tool doesn't support {}. Please make sure you have openscap {} or newer \
             if you want to use {}.",
            feature.description(),
            feature.min_version(),
            feature.usage()
        ),
    };
    format!("{what} oscap version was detected as '{version}'.")
}
