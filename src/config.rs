//! File configuration and resolution of effective settings.
//!
//! Precedence: CLI flags > config file > built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use exporter_core::export::{
    DEFAULT_BASE_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_LARGE_LOG_THRESHOLD_BYTES,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_JITTER, DEFAULT_METADATA_INTERVAL, ExportConfig,
    RetryPolicy,
};
use exporter_core::source::{
    CommandLimits, DEFAULT_CLI_BINARY, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES,
};

use crate::cli::Args;

/// Directory name under the XDG config home.
const CONFIG_DIR_NAME: &str = "log-exporter";

/// Default export directory, relative to the working directory.
pub const DEFAULT_EXPORT_DIR: &str = "apex-logs";

/// Flat `key = value` configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub export_dir: Option<PathBuf>,
    pub target_org: Option<String>,
    pub cli_binary: Option<String>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub large_log_threshold_bytes: Option<u64>,
    pub retrieval_timeout_secs: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub metadata_interval_ms: Option<u64>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range(
            "batch_size",
            self.batch_size.and_then(|v| u64::try_from(v).ok()),
            1,
            100,
        )?;
        validate_range("max_attempts", self.max_attempts.map(u64::from), 1, 50)?;
        validate_range("base_delay_ms", self.base_delay_ms, 0, 60_000)?;
        validate_range("retrieval_timeout_secs", self.retrieval_timeout_secs, 1, 3600)?;
        validate_range("max_output_bytes", self.max_output_bytes, 1024, 1 << 30)?;
        validate_range("metadata_interval_ms", self.metadata_interval_ms, 0, 60_000)?;
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/log-exporter/config.toml`
/// 2. `$HOME/.config/log-exporter/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "export_dir" => {
                cfg.export_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "target_org" => {
                cfg.target_org = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "cli_binary" => {
                cfg.cli_binary = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "batch_size" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.batch_size = Some(
                    usize::try_from(parsed).map_err(|_| anyhow::anyhow!("batch_size out of range"))?,
                );
            }
            "max_attempts" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.max_attempts = Some(
                    u32::try_from(parsed)
                        .map_err(|_| anyhow::anyhow!("max_attempts out of range for u32"))?,
                );
            }
            "base_delay_ms" => {
                cfg.base_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "large_log_threshold_bytes" => {
                cfg.large_log_threshold_bytes =
                    Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retrieval_timeout_secs" => {
                cfg.retrieval_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_output_bytes" => {
                cfg.max_output_bytes = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "metadata_interval_ms" => {
                cfg.metadata_interval_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub export_dir: PathBuf,
    pub target_org: Option<String>,
    pub cli_binary: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub large_log_threshold_bytes: u64,
    pub limits: CommandLimits,
    pub metadata_interval: Duration,
}

impl Settings {
    /// Merges CLI flags over file values over defaults.
    #[must_use]
    pub fn resolve(args: &Args, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();
        let max_output_bytes = file
            .max_output_bytes
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_OUTPUT_BYTES);

        Self {
            export_dir: args
                .output_dir
                .clone()
                .or(file.export_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR)),
            target_org: args.org.clone().or(file.target_org),
            cli_binary: args
                .cli_binary
                .clone()
                .or(file.cli_binary)
                .unwrap_or_else(|| DEFAULT_CLI_BINARY.to_string()),
            batch_size: args
                .batch_size
                .map(usize::from)
                .or(file.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            max_attempts: args
                .max_attempts
                .or(file.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay: args
                .base_delay_ms
                .or(file.base_delay_ms)
                .map_or(DEFAULT_BASE_DELAY, Duration::from_millis),
            large_log_threshold_bytes: file
                .large_log_threshold_bytes
                .unwrap_or(DEFAULT_LARGE_LOG_THRESHOLD_BYTES),
            limits: CommandLimits {
                timeout: file
                    .retrieval_timeout_secs
                    .map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_secs),
                max_output_bytes,
            },
            metadata_interval: file
                .metadata_interval_ms
                .map_or(DEFAULT_METADATA_INTERVAL, Duration::from_millis),
        }
    }

    /// Engine configuration for these settings.
    #[must_use]
    pub fn export_config(&self) -> ExportConfig {
        ExportConfig::new(&self.export_dir)
            .with_batch_size(self.batch_size)
            .with_retry_policy(RetryPolicy::new(
                self.max_attempts,
                self.base_delay,
                DEFAULT_MAX_JITTER,
            ))
            .with_metadata_interval(self.metadata_interval)
            .with_large_log_threshold(self.large_log_threshold_bytes)
    }
}
