//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VicError};
use crate::scanner::engine::ScanSettings;
use crate::scanner::incremental::IncrementalPolicy;
use crate::scanner::invoker::{ErrorMarkers, PassParameters, ProcessAnalyzer};
use crate::scanner::mode::{ModeSelector, ScanMode, ToolProfile};
use crate::scanner::model::ModeTimeouts;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub incremental: IncrementalConfig,
    pub tool: ToolConfig,
    pub paths: PathsConfig,
}

/// Worker pool, discovery and mode selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub max_workers: usize,
    pub default_mode: ScanMode,
    pub quick_timeout_seconds: u64,
    pub deep_timeout_seconds: u64,
    pub recursive: bool,
    pub follow_symlinks: bool,
    /// Allowed extensions, without the leading dot. Matched case-insensitively.
    pub extensions: Vec<String>,
    /// Per-extension mode, overriding `default_mode` for matching files.
    pub mode_overrides: BTreeMap<String, ScanMode>,
    /// Time in-flight tasks get to finish after an interrupt before being killed.
    pub shutdown_grace_seconds: u64,
}

/// Incremental re-scan policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IncrementalConfig {
    pub enabled: bool,
    /// Maximum age of a healthy history record before it is re-verified.
    pub max_age_hours: u64,
}

/// External analysis tool command lines and classification knobs.
///
/// `{input}` in an argument list is replaced with the file path; when absent
/// the path is appended as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub quick_program: String,
    pub quick_args: Vec<String>,
    pub deep_program: String,
    pub deep_args: Vec<String>,
    /// Case-insensitive regexes; a matching stderr line marks the file corrupt.
    pub error_patterns: Vec<String>,
    pub max_diagnostic_bytes: usize,
}

/// Filesystem paths used by vic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub history_db: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            default_mode: ScanMode::Quick,
            quick_timeout_seconds: 60,
            deep_timeout_seconds: 3_600,
            recursive: true,
            follow_symlinks: false,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            mode_overrides: BTreeMap::new(),
            shutdown_grace_seconds: 10,
        }
    }
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_hours: 7 * 24,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            quick_program: "ffprobe".to_string(),
            quick_args: to_strings(&[
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,codec_name",
                "-of",
                "default=noprint_wrappers=1",
                "{input}",
            ]),
            deep_program: "ffmpeg".to_string(),
            deep_args: to_strings(&[
                "-nostdin",
                "-hide_banner",
                "-v",
                "error",
                "-i",
                "{input}",
                "-f",
                "null",
                "-",
            ]),
            error_patterns: ErrorMarkers::DEFAULT_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            max_diagnostic_bytes: 64 * 1024,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                tracing::warn!("HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("vic").join("config.toml");
        let data = home_dir.join(".local").join("share").join("vic");
        Self {
            config_file: cfg,
            history_db: data.join("history.sqlite3"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

const DEFAULT_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "3gp",
];

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| VicError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(VicError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VicError::Serialization {
            context: "toml",
            details: e.to_string(),
        })
    }

    /// Engine settings derived from this configuration.
    pub fn scan_settings(&self) -> Result<ScanSettings> {
        let settings = ScanSettings {
            max_workers: self.scan.max_workers,
            modes: ModeSelector::new(self.scan.default_mode)
                .with_overrides(self.scan.mode_overrides.clone()),
            timeouts: ModeTimeouts {
                quick: Duration::from_secs(self.scan.quick_timeout_seconds),
                deep: Duration::from_secs(self.scan.deep_timeout_seconds),
            },
            recursive: self.scan.recursive,
            follow_symlinks: self.scan.follow_symlinks,
            extensions: self.scan.extensions.iter().cloned().collect::<BTreeSet<_>>(),
            incremental: IncrementalPolicy {
                enabled: self.incremental.enabled,
                max_age: Duration::from_secs(self.incremental.max_age_hours.saturating_mul(3_600)),
            },
            tool: ToolProfile {
                quick: PassParameters::new(&self.tool.quick_program, self.tool.quick_args.clone()),
                deep: PassParameters::new(&self.tool.deep_program, self.tool.deep_args.clone()),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Subprocess analyzer built from the `[tool]` section.
    pub fn analyzer(&self) -> Result<ProcessAnalyzer> {
        let markers = ErrorMarkers::new(&self.tool.error_patterns)?;
        Ok(ProcessAnalyzer::new(markers, self.tool.max_diagnostic_bytes))
    }

    /// Grace period granted to in-flight tasks after an interrupt.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.scan.shutdown_grace_seconds)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scan
        if let Some(raw) = lookup("VIC_SCAN_MAX_WORKERS") {
            self.scan.max_workers = parse_env("VIC_SCAN_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("VIC_SCAN_DEFAULT_MODE") {
            self.scan.default_mode =
                raw.parse::<ScanMode>()
                    .map_err(|error| VicError::ConfigParse {
                        context: "env",
                        details: format!("VIC_SCAN_DEFAULT_MODE={raw:?}: {error}"),
                    })?;
        }
        if let Some(raw) = lookup("VIC_SCAN_QUICK_TIMEOUT_SECONDS") {
            self.scan.quick_timeout_seconds = parse_env("VIC_SCAN_QUICK_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("VIC_SCAN_DEEP_TIMEOUT_SECONDS") {
            self.scan.deep_timeout_seconds = parse_env("VIC_SCAN_DEEP_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("VIC_SCAN_RECURSIVE") {
            self.scan.recursive = parse_env("VIC_SCAN_RECURSIVE", &raw)?;
        }

        // incremental
        if let Some(raw) = lookup("VIC_INCREMENTAL_ENABLED") {
            self.incremental.enabled = parse_env("VIC_INCREMENTAL_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("VIC_INCREMENTAL_MAX_AGE_HOURS") {
            self.incremental.max_age_hours = parse_env("VIC_INCREMENTAL_MAX_AGE_HOURS", &raw)?;
        }

        // tool
        if let Some(raw) = lookup("VIC_TOOL_QUICK_PROGRAM") {
            self.tool.quick_program = raw;
        }
        if let Some(raw) = lookup("VIC_TOOL_DEEP_PROGRAM") {
            self.tool.deep_program = raw;
        }

        // paths
        if let Some(raw) = lookup("VIC_PATHS_HISTORY_DB") {
            self.paths.history_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("VIC_PATHS_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Lowercase extensions, strip leading dots, drop duplicates and blanks.
    pub fn normalize(&mut self) {
        let mut seen = BTreeSet::new();
        self.scan.extensions = self
            .scan
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| !ext.is_empty() && seen.insert(ext.clone()))
            .collect();

        self.scan.mode_overrides = std::mem::take(&mut self.scan.mode_overrides)
            .into_iter()
            .map(|(ext, mode)| (normalize_extension(&ext), mode))
            .filter(|(ext, _)| !ext.is_empty())
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.max_workers == 0 {
            return Err(VicError::InvalidConfig {
                details: "scan.max_workers must be >= 1".to_string(),
            });
        }
        if self.scan.quick_timeout_seconds == 0 || self.scan.deep_timeout_seconds == 0 {
            return Err(VicError::InvalidConfig {
                details: "scan.quick_timeout_seconds and scan.deep_timeout_seconds must be > 0"
                    .to_string(),
            });
        }
        if self.scan.extensions.is_empty() {
            return Err(VicError::InvalidConfig {
                details: "scan.extensions must list at least one extension".to_string(),
            });
        }
        if self.tool.quick_program.trim().is_empty() || self.tool.deep_program.trim().is_empty() {
            return Err(VicError::InvalidConfig {
                details: "tool.quick_program and tool.deep_program must not be empty".to_string(),
            });
        }
        if self.tool.max_diagnostic_bytes == 0 {
            return Err(VicError::InvalidConfig {
                details: "tool.max_diagnostic_bytes must be > 0".to_string(),
            });
        }
        ErrorMarkers::new(&self.tool.error_patterns)?;
        Ok(())
    }
}

/// Canonical form of a configured extension: lowercase, no leading dot.
#[must_use]
pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| VicError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, ScanMode, VicError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.scan.max_workers >= 1);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.scan.max_workers = 0;
        let err = cfg.validate().expect_err("expected worker count error");
        assert!(matches!(err, VicError::InvalidConfig { .. }));
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.scan.quick_timeout_seconds = 0;
        let err = cfg.validate().expect_err("expected timeout error");
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn empty_extension_list_rejected() {
        let mut cfg = Config::default();
        cfg.scan.extensions = vec![" ".to_string(), ".".to_string()];
        cfg.normalize();
        let err = cfg.validate().expect_err("expected extensions error");
        assert!(err.to_string().contains("extensions"));
    }

    #[test]
    fn invalid_error_pattern_rejected() {
        let mut cfg = Config::default();
        cfg.tool.error_patterns = vec!["(unclosed".to_string()];
        let err = cfg.validate().expect_err("expected regex error");
        assert!(err.is_fatal());
    }

    #[test]
    fn normalize_lowercases_and_dedupes_extensions() {
        let mut cfg = Config::default();
        cfg.scan.extensions = vec![".MKV".to_string(), "mkv".to_string(), "Mp4".to_string()];
        cfg.scan
            .mode_overrides
            .insert(".TS".to_string(), ScanMode::Deep);
        cfg.normalize();
        assert_eq!(cfg.scan.extensions, vec!["mkv".to_string(), "mp4".to_string()]);
        assert_eq!(cfg.scan.mode_overrides.get("ts"), Some(&ScanMode::Deep));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("VIC_SCAN_MAX_WORKERS", "3"),
            ("VIC_SCAN_DEFAULT_MODE", "hybrid"),
            ("VIC_SCAN_QUICK_TIMEOUT_SECONDS", "5"),
            ("VIC_INCREMENTAL_ENABLED", "false"),
            ("VIC_INCREMENTAL_MAX_AGE_HOURS", "24"),
            ("VIC_TOOL_DEEP_PROGRAM", "/opt/ffmpeg/bin/ffmpeg"),
            ("VIC_PATHS_HISTORY_DB", "/tmp/vic/history.sqlite3"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.scan.max_workers, 3);
        assert_eq!(cfg.scan.default_mode, ScanMode::Hybrid);
        assert_eq!(cfg.scan.quick_timeout_seconds, 5);
        assert!(!cfg.incremental.enabled);
        assert_eq!(cfg.incremental.max_age_hours, 24);
        assert_eq!(cfg.tool.deep_program, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(
            cfg.paths.history_db,
            PathBuf::from("/tmp/vic/history.sqlite3")
        );
    }

    #[test]
    fn env_invalid_mode_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VIC_SCAN_DEFAULT_MODE", "thorough")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid mode should fail");
        match err {
            VicError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("VIC_SCAN_DEFAULT_MODE"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VIC_SCAN_RECURSIVE", "yes-please")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid bool should fail");
        assert!(err.to_string().contains("VIC_SCAN_RECURSIVE"));
    }

    #[test]
    fn toml_round_trip_preserves_sections() {
        let raw = r#"
            [scan]
            max_workers = 4
            default_mode = "deep"
            extensions = ["mkv"]

            [scan.mode_overrides]
            ts = "hybrid"

            [incremental]
            enabled = false
            max_age_hours = 12
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.scan.max_workers, 4);
        assert_eq!(cfg.scan.default_mode, ScanMode::Deep);
        assert_eq!(cfg.scan.mode_overrides.get("ts"), Some(&ScanMode::Hybrid));
        assert!(!cfg.incremental.enabled);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.tool.deep_program, "ffmpeg");
        let rendered = cfg.to_toml().expect("render");
        assert!(rendered.contains("max_workers = 4"));
    }

    #[test]
    fn scan_settings_convert_units() {
        let mut cfg = Config::default();
        cfg.scan.quick_timeout_seconds = 7;
        cfg.incremental.max_age_hours = 2;
        let settings = cfg.scan_settings().expect("settings");
        assert_eq!(settings.timeouts.quick, Duration::from_secs(7));
        assert_eq!(settings.incremental.max_age, Duration::from_secs(7_200));
        assert!(settings.extensions.contains("mkv"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/vic/config.toml")));
        assert!(matches!(result, Err(VicError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vic.toml");
        std::fs::write(&path, "[scan]\nmax_workers = 2\nextensions = [\".MOV\"]\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.scan.max_workers, 2);
        assert_eq!(cfg.scan.extensions, vec!["mov".to_string()]);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        let mut modified = Config::default();
        modified.scan.deep_timeout_seconds += 1;
        let after = modified.stable_hash().expect("hash");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash"));
    }
}
