//! 扫描配置与配置文件加载（TOML）
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ScanError, ScanResult};

/// 一次调用期间不可变的扫描会话配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScanConfiguration {
    /// 为空表示使用内容中的默认 profile
    pub profile: String,
    pub tailoring_file: Option<PathBuf>,
    /// 输入是否为 source datastream（SDS）
    pub source_datastream: bool,
    pub datastream_id: Option<String>,
    pub component_id: Option<String>,
    pub online_remediation: bool,
    pub fetch_remote_resources: bool,
    pub skip_validation: bool,
}

impl ScanConfiguration {
    /// 空路径等同于未设置
    pub fn has_tailoring(&self) -> bool {
        self.tailoring_file.as_deref().is_some_and(|p| !p.as_os_str().is_empty())
    }
}

/// 扫描器运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerMode {
    Scan,
    ScanOnlineRemediation,
    /// 对之前扫描生成的 ARF/结果文件执行修复
    OfflineRemediation,
}

impl ScannerMode {
    /// 评估模式：配置中请求了在线修复时升级为 ScanOnlineRemediation
    pub fn for_evaluation(config: &ScanConfiguration) -> Self {
        if config.online_remediation { ScannerMode::ScanOnlineRemediation } else { ScannerMode::Scan }
    }
}

/// `[oscap]` 段：外部工具的调用方式
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OscapSettings {
    pub path: PathBuf,
    /// 两次 pump 之间的最长等待（毫秒）
    pub poll_interval_ms: u64,
    /// 设置后跳过 `oscap --version` 探测
    pub assume_version: Option<String>,
}

impl Default for OscapSettings {
    fn default() -> Self {
        Self { path: PathBuf::from("oscap"), poll_interval_ms: 100, assume_version: None }
    }
}

impl OscapSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// 顶层配置文件结构
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub oscap: OscapSettings,
    pub session: ScanConfiguration,
}

/// 读取并解析 TOML 配置文件
pub fn load_config(path: &Path) -> ScanResult<AppConfig> {
    let txt = std::fs::read_to_string(path)
        .map_err(|e| ScanError::io(format!("reading config '{}'", path.display()), e))?;
    parse_config(&txt, path)
}

pub(crate) fn parse_config(txt: &str, origin: &Path) -> ScanResult<AppConfig> {
    toml::from_str(txt).map_err(|source| ScanError::Config { path: origin.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_config("", Path::new("scapwatch.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.oscap.path, PathBuf::from("oscap"));
        assert_eq!(cfg.oscap.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn full_session_table() {
        let txt = r#"
            [oscap]
            path = "/usr/bin/oscap"
            poll_interval_ms = 25
            assume_version = "1.3.5"

            [session]
            profile = "xccdf_org.ssgproject.content_profile_standard"
            tailoring_file = "tailoring.xml"
            source_datastream = true
            datastream_id = "scap_org.open-scap_datastream_from_xccdf_ssg-rhel7-xccdf-1.2.xml"
            component_id = "scap_org.open-scap_cref_ssg-rhel7-xccdf-1.2.xml"
            online_remediation = true
            skip_validation = true
        "#;
        let cfg = parse_config(txt, Path::new("scapwatch.toml")).unwrap();
        assert_eq!(cfg.oscap.assume_version.as_deref(), Some("1.3.5"));
        assert_eq!(cfg.oscap.poll_interval(), Duration::from_millis(25));
        assert!(cfg.session.source_datastream);
        assert!(cfg.session.has_tailoring());
        assert!(!cfg.session.fetch_remote_resources);
        assert_eq!(ScannerMode::for_evaluation(&cfg.session), ScannerMode::ScanOnlineRemediation);
    }

    #[test]
    fn empty_tailoring_path_is_no_tailoring() {
        let cfg = ScanConfiguration { tailoring_file: Some(PathBuf::new()), ..Default::default() };
        assert!(!cfg.has_tailoring());
    }

    #[test]
    fn bad_toml_reports_path() {
        let err = parse_config("[session]\nprofile = 3\n", Path::new("bad.toml")).unwrap_err();
        match err {
            ScanError::Config { path, .. } => assert_eq!(path, PathBuf::from("bad.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
