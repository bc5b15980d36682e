//! [`LogSource`] backed by the platform command-line client.
//!
//! Every call spawns the CLI (`sf` by default) as a child process. Each call
//! carries a hard timeout and an output cap; the child is killed when either
//! is exceeded, and the condition surfaces as a [`SourceError`] the retry
//! classifier treats as transient.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::record::{CliEnvelope, LogRecord, QueryResult};
use super::{LogSource, SourceError};
use crate::artifact::{ArtifactDescriptor, EnrichedMetadata};

/// Default CLI program name.
pub const DEFAULT_CLI_BINARY: &str = "sf";

/// Default hard timeout per command (5 minutes).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cap on captured stdout (50 MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

/// Captured stderr is truncated to this many bytes.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Error messages are trimmed to this many characters.
const MAX_MESSAGE_CHARS: usize = 500;

/// Record ids are 15 or 18 alphanumeric characters.
#[allow(clippy::expect_used)]
static RECORD_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]{15}(?:[A-Za-z0-9]{3})?$").expect("record id regex is valid") // Static pattern, safe to panic
});

/// Returns true when `id` is a well-formed record id and safe to embed in a query.
#[must_use]
pub fn is_valid_record_id(id: &str) -> bool {
    RECORD_ID_PATTERN.is_match(id)
}

/// Per-call limits applied to every spawned command.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    /// Hard timeout; the child is killed when it elapses.
    pub timeout: Duration,
    /// Maximum stdout bytes kept in memory.
    pub max_output_bytes: usize,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Log source that shells out to the platform CLI.
#[derive(Debug, Clone)]
pub struct CommandLogSource {
    program: String,
    target_org: Option<String>,
    limits: CommandLimits,
}

impl CommandLogSource {
    /// Creates a source using `program` against `target_org` (CLI default org when `None`).
    #[must_use]
    pub fn new(program: impl Into<String>, target_org: Option<String>, limits: CommandLimits) -> Self {
        Self {
            program: program.into(),
            target_org,
            limits,
        }
    }

    /// Returns the configured program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn org_args(&self) -> Vec<String> {
        match &self.target_org {
            Some(org) => vec!["--target-org".to_string(), org.clone()],
            None => Vec::new(),
        }
    }

    fn describe(&self, args: &[String]) -> String {
        let subcommand: Vec<&str> = args
            .iter()
            .take_while(|arg| !arg.starts_with("--"))
            .map(String::as_str)
            .collect();
        format!("{} {}", self.program, subcommand.join(" "))
    }

    /// Runs the CLI with `args` and returns its stdout.
    async fn run(&self, args: Vec<String>) -> Result<Vec<u8>, SourceError> {
        let command = self.describe(&args);
        let limits = self.limits;
        debug!(command = %command, "running platform command");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::spawn(&self.program, source))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::io("capturing stdout", std::io::Error::other("stdout not piped"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SourceError::io("capturing stderr", std::io::Error::other("stderr not piped"))
        })?;

        // Drained separately so a chatty stderr cannot block stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
            buf
        });

        let collect = async {
            let mut out = Vec::new();
            let cap = u64::try_from(limits.max_output_bytes)
                .unwrap_or(u64::MAX)
                .saturating_add(1);
            stdout
                .take(cap)
                .read_to_end(&mut out)
                .await
                .map_err(|source| SourceError::io(format!("reading output of {command}"), source))?;
            if out.len() > limits.max_output_bytes {
                let _ = child.start_kill();
                return Err(SourceError::output_too_large(&command, limits.max_output_bytes));
            }
            let status = child
                .wait()
                .await
                .map_err(|source| SourceError::io(format!("waiting for {command}"), source))?;
            Ok::<_, SourceError>((status, out))
        };

        let (status, out) = tokio::time::timeout(limits.timeout, collect)
            .await
            .map_err(|_| SourceError::timeout(&command, limits.timeout.as_secs()))??;

        if !status.success() {
            let err_bytes = stderr_task.await.unwrap_or_default();
            let message = failure_message(&err_bytes, &out);
            return Err(SourceError::command_failed(
                &command,
                status.code().unwrap_or(-1),
                message,
            ));
        }
        stderr_task.abort();

        Ok(out)
    }

    fn parse_envelope<T: serde::de::DeserializeOwned>(
        command: &str,
        raw: &[u8],
    ) -> Result<T, SourceError> {
        let envelope: CliEnvelope<T> = serde_json::from_slice(raw)
            .map_err(|e| SourceError::invalid_response(command, e.to_string()))?;
        if envelope.status != 0 {
            return Err(SourceError::command_failed(
                command,
                envelope.status,
                envelope.message.unwrap_or_default(),
            ));
        }
        envelope
            .result
            .ok_or_else(|| SourceError::invalid_response(command, "missing result"))
    }
}

/// Picks the most useful text from a failed command's output.
fn failure_message(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(stdout).into_owned()
    } else {
        stderr.into_owned()
    };
    text.trim().chars().take(MAX_MESSAGE_CHARS).collect()
}

#[async_trait]
impl LogSource for CommandLogSource {
    fn org(&self) -> &str {
        self.target_org.as_deref().unwrap_or("default")
    }

    #[instrument(skip(self), fields(program = %self.program))]
    async fn list_descriptors(&self) -> Result<Vec<ArtifactDescriptor>, SourceError> {
        let mut args: Vec<String> = ["apex", "list", "log", "--json"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(self.org_args());
        let command = self.describe(&args);

        let raw = self.run(args).await?;
        let records: Vec<LogRecord> = Self::parse_envelope(&command, &raw)?;
        Ok(records.into_iter().map(LogRecord::into_descriptor).collect())
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Option<EnrichedMetadata>, SourceError> {
        if !is_valid_record_id(id) {
            return Err(SourceError::invalid_id(id));
        }
        let query = format!(
            "SELECT Id, LogUser.Name, LogUser.Username, Operation, Status, \
             DurationMilliseconds, LogLength, StartTime FROM ApexLog WHERE Id = '{id}'"
        );
        let mut args: Vec<String> = vec![
            "data".to_string(),
            "query".to_string(),
            "--query".to_string(),
            query,
            "--json".to_string(),
        ];
        args.extend(self.org_args());
        let command = self.describe(&args);

        let raw = self.run(args).await?;
        let result: QueryResult = Self::parse_envelope(&command, &raw)?;
        Ok(result
            .records
            .into_iter()
            .next()
            .map(LogRecord::into_metadata))
    }

    async fn retrieve_content(
        &self,
        id: &str,
        size_hint: Option<u64>,
    ) -> Result<String, SourceError> {
        if !is_valid_record_id(id) {
            return Err(SourceError::invalid_id(id));
        }
        debug!(id, size_hint, "retrieving log content");
        let mut args: Vec<String> = vec![
            "apex".to_string(),
            "get".to_string(),
            "log".to_string(),
            "--log-id".to_string(),
            id.to_string(),
        ];
        args.extend(self.org_args());

        let raw = self.run(args).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source() -> CommandLogSource {
        CommandLogSource::new("sf", Some("prod".to_string()), CommandLimits::default())
    }

    #[test]
    fn test_valid_record_ids() {
        assert!(is_valid_record_id("07L5g00000ABCDE"));
        assert!(is_valid_record_id("07L5g00000ABCDEAAA"));
    }

    #[test]
    fn test_invalid_record_ids() {
        assert!(!is_valid_record_id(""));
        assert!(!is_valid_record_id("07L5g00000ABCD"));
        assert!(!is_valid_record_id("07L5g00000ABCDE' OR Id != '"));
        assert!(!is_valid_record_id("07L5g00000ABCDEAA"));
    }

    #[test]
    fn test_describe_keeps_subcommand_only() {
        let args: Vec<String> = ["apex", "get", "log", "--log-id", "x"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(source().describe(&args), "sf apex get log");
    }

    #[test]
    fn test_org_defaults_when_unset() {
        let src = CommandLogSource::new("sf", None, CommandLimits::default());
        assert_eq!(src.org(), "default");
        assert!(src.org_args().is_empty());
        assert_eq!(source().org(), "prod");
    }

    #[test]
    fn test_failure_message_prefers_stderr() {
        assert_eq!(failure_message(b"  boom \n", b"out"), "boom");
        assert_eq!(failure_message(b"", b"from stdout"), "from stdout");
    }

    #[test]
    fn test_parse_envelope_nonzero_status_is_command_failure() {
        let raw = br#"{"status": 1, "message": "No default org"}"#;
        let result: Result<Vec<LogRecord>, _> = CommandLogSource::parse_envelope("sf apex list log", raw);
        assert!(matches!(result, Err(SourceError::CommandFailed { code: 1, .. })));
    }

    #[test]
    fn test_parse_envelope_garbage_is_invalid_response() {
        let result: Result<Vec<LogRecord>, _> =
            CommandLogSource::parse_envelope("sf apex list log", b"not json");
        assert!(matches!(result, Err(SourceError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn test_retrieve_content_rejects_malformed_id_without_spawning() {
        let src = CommandLogSource::new("definitely-not-installed", None, CommandLimits::default());
        let result = src.retrieve_content("bad id", None).await;
        assert!(matches!(result, Err(SourceError::InvalidId { .. })));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let src = CommandLogSource::new(
            "log-exporter-missing-binary-xyz",
            None,
            CommandLimits::default(),
        );
        let result = src.list_descriptors().await;
        assert!(matches!(result, Err(SourceError::Spawn { .. })));
    }
}
