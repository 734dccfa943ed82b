//! oscap 能力门控（模块）
//!
//! 一次探测得到的只读事实集合：某个版本的 oscap 支持哪些特性。
use regex::Regex;
use semver::Version;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use crate::error::{ScanError, ScanResult};

/// 可查询的工具特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Baseline,
    OnlineRemediation,
    ArfInput,
    SourceDatastreams,
    Tailoring,
    ProgressReporting,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Baseline,
        Feature::OnlineRemediation,
        Feature::ArfInput,
        Feature::SourceDatastreams,
        Feature::Tailoring,
        Feature::ProgressReporting,
    ];

    /// 首次提供该特性的 openscap 版本
    pub fn min_version(self) -> Version {
        match self {
            Feature::Baseline => Version::new(0, 8, 0),
            Feature::SourceDatastreams => Version::new(0, 9, 0),
            Feature::ProgressReporting => Version::new(0, 9, 3),
            Feature::OnlineRemediation => Version::new(0, 9, 5),
            Feature::Tailoring => Version::new(0, 9, 12),
            Feature::ArfInput => Version::new(1, 0, 0),
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            Feature::Baseline => "basic features",
            Feature::OnlineRemediation => "online remediation",
            Feature::ArfInput => "taking ARFs (result datastreams) as input",
            Feature::SourceDatastreams => "source datastreams as input",
            Feature::Tailoring => "XCCDF tailoring",
            Feature::ProgressReporting => "progress reporting",
        }
    }

    pub(crate) fn usage(self) -> &'static str {
        match self {
            Feature::ArfInput => "offline remediation",
            Feature::SourceDatastreams => "source datastreams",
            Feature::ProgressReporting => "live scan progress",
            other => other.description(),
        }
    }
}

/// 探测到的 oscap 能力（构造后只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCapabilities {
    pub baseline: bool,
    pub online_remediation: bool,
    pub arf_input: bool,
    pub source_datastreams: bool,
    pub tailoring: bool,
    pub progress_reporting: bool,
    /// 仅用于诊断信息
    pub version: String,
}

impl ToolCapabilities {
    /// 不支持任何特性（版本未知时的保守值）
    pub fn none(version: impl Into<String>) -> Self {
        Self {
            baseline: false,
            online_remediation: false,
            arf_input: false,
            source_datastreams: false,
            tailoring: false,
            progress_reporting: false,
            version: version.into(),
        }
    }

    /// 按最低版本表推导各特性
    pub fn for_version(version: &Version) -> Self {
        let has = |f: Feature| *version >= f.min_version();
        Self {
            baseline: has(Feature::Baseline),
            online_remediation: has(Feature::OnlineRemediation),
            arf_input: has(Feature::ArfInput),
            source_datastreams: has(Feature::SourceDatastreams),
            tailoring: has(Feature::Tailoring),
            progress_reporting: has(Feature::ProgressReporting),
            version: version.to_string(),
        }
    }

    /// 从 `oscap --version` 的输出中提取第一个 `X.Y.Z` 版本号
    pub fn from_version(text: &str) -> ScanResult<Self> {
        static VERSION_RE: OnceLock<Regex> = OnceLock::new();
        let re = VERSION_RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("static version regex"));
        let caps = re
            .captures(text)
            .ok_or_else(|| ScanError::VersionUndetected(first_line(text).to_string()))?;
        let part = |i: usize| caps[i].parse::<u64>().map_err(|_| ScanError::VersionUndetected(first_line(text).to_string()));
        Ok(Self::for_version(&Version::new(part(1)?, part(2)?, part(3)?)))
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Baseline => self.baseline,
            Feature::OnlineRemediation => self.online_remediation,
            Feature::ArfInput => self.arf_input,
            Feature::SourceDatastreams => self.source_datastreams,
            Feature::Tailoring => self.tailoring,
            Feature::ProgressReporting => self.progress_reporting,
        }
    }

    pub fn version_string(&self) -> &str {
        &self.version
    }
}

/// 运行 `<program> --version` 并解析能力
pub fn detect_capabilities(program: &Path) -> ScanResult<ToolCapabilities> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .map_err(|source| ScanError::Spawn { program: program.to_path_buf(), source })?;
    let text = String::from_utf8_lossy(&output.stdout);
    let caps = ToolCapabilities::from_version(&text)?;
    tracing::debug!(version = %caps.version, "detected oscap capabilities");
    Ok(caps)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}
