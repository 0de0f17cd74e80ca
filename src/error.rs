/// Codebox error types
use std::path::PathBuf;

/// Main error type for codebox operations outside the HTTP layer
#[derive(Debug, thiserror::Error)]
pub enum CodeboxError {
    /// Source could not be written into the run directory
    #[error("Staging error for {path}: {source}")]
    StagingError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The sandbox engine could not be started or awaited
    #[error("Sandbox engine error ({engine}): {source}")]
    EngineError {
        engine: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The sandbox did not emit the sentinel framing lines
    #[error("Sentinel framing violated (stdout: {stdout:?}, stderr: {stderr:?})")]
    FramingViolation { stdout: String, stderr: String },
    /// Key file is missing, unreadable or malformed
    #[error("Credential error in {path}: {reason}")]
    CredentialError { path: PathBuf, reason: String },
    /// Startup configuration could not be validated
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },
    /// Language map could not be parsed or contains invalid entries
    #[error("Language map error in {path}: {reason}")]
    LanguageMapError { path: PathBuf, reason: String },
    /// Wrapped anyhow error for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CodeboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_error_display() {
        let err = CodeboxError::FramingViolation {
            stdout: "early output".to_string(),
            stderr: "".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("early output"));
        assert!(msg.contains("Sentinel"));
    }

    #[test]
    fn test_staging_error_keeps_source() {
        let staging = CodeboxError::StagingError {
            path: PathBuf::from("run/run1234567.py"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(staging.to_string().contains("run/run1234567.py"));
        assert!(std::error::Error::source(&staging).is_some());
    }
}
