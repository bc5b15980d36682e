//! Error types for the log source channel.

use thiserror::Error;

/// Errors returned by a [`LogSource`](super::LogSource).
///
/// Variants carry enough text for the retry classifier in
/// [`crate::export::classify_error`] to decide whether another attempt can help.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The external command could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external command ran but exited unsuccessfully.
    #[error("command failed: {command} (exit code {code}): {message}")]
    CommandFailed {
        /// Command line summary (program and subcommand).
        command: String,
        /// Exit code, or -1 when killed by a signal.
        code: i32,
        /// Captured stderr (or stdout when stderr was empty).
        message: String,
    },

    /// The command did not finish within the caller-imposed timeout.
    #[error("timed out after {secs}s waiting for {command}")]
    Timeout {
        /// Command line summary.
        command: String,
        /// Timeout that elapsed.
        secs: u64,
    },

    /// Output exceeded the maximum buffer size.
    #[error("output of {command} exceeded maximum buffer size of {limit} bytes")]
    OutputTooLarge {
        /// Command line summary.
        command: String,
        /// Configured cap in bytes.
        limit: usize,
    },

    /// Reading the command's pipes failed.
    #[error("IO error while {context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The response could not be parsed.
    #[error("invalid response from {command}: {message}")]
    InvalidResponse {
        /// Command line summary.
        command: String,
        /// Parse failure detail.
        message: String,
    },

    /// The artifact id is not a well-formed record id.
    #[error("invalid artifact id: {id}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },

    /// The remote system has no artifact with this id.
    #[error("artifact not found: {id}")]
    NotFound {
        /// The missing id.
        id: String,
    },
}

impl SourceError {
    /// Creates a spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Creates a command failure error.
    pub fn command_failed(command: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            code,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(command: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            command: command.into(),
            secs,
        }
    }

    /// Creates an oversized-output error.
    pub fn output_too_large(command: impl Into<String>, limit: usize) -> Self {
        Self::OutputTooLarge {
            command: command.into(),
            limit,
        }
    }

    /// Creates a pipe IO error.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId { id: id.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display_contains_marker_and_code() {
        let error = SourceError::command_failed("sf apex get log", 1, "ECONNRESET");
        let msg = error.to_string();
        assert!(msg.starts_with("command failed"), "got: {msg}");
        assert!(msg.contains("exit code 1"), "got: {msg}");
        assert!(msg.contains("ECONNRESET"), "got: {msg}");
    }

    #[test]
    fn test_timeout_display() {
        let error = SourceError::timeout("sf apex get log", 300);
        assert!(error.to_string().contains("timed out after 300s"));
    }

    #[test]
    fn test_output_too_large_display() {
        let error = SourceError::output_too_large("sf apex get log", 1024);
        let msg = error.to_string();
        assert!(msg.contains("maximum buffer"), "got: {msg}");
        assert!(msg.contains("1024"), "got: {msg}");
    }
}
