use crate::languages::LanguageEntry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod escape;
pub mod podman;

/// First line the entry protocol prints on stdout.
pub const STDOUT_SENTINEL: &str = "stdout-start";
/// First line the entry protocol prints on stderr.
pub const STDERR_SENTINEL: &str = "stderr-start";

/// One validated execution, built once per inbound call.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: Vec<u8>,
    pub language: Arc<LanguageEntry>,
    pub args: String,
    pub stdin: String,
    pub env: BTreeMap<String, String>,
    /// Requested deadline in seconds; `0` means "use the server ceiling".
    pub timeout_secs: u64,
    pub enable_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds spent in the sandbox engine.
    pub container_age: f64,
    #[serde(rename = "timeout")]
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn timed_out(container_age: f64) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            container_age,
            timed_out: true,
        }
    }
}

/// Strip the sentinel line from both streams, or `None` when either stream
/// does not start with its sentinel.
pub fn unframe(stdout: &str, stderr: &str) -> Option<(String, String)> {
    let out = strip_sentinel(stdout, STDOUT_SENTINEL)?;
    let err = strip_sentinel(stderr, STDERR_SENTINEL)?;
    Some((out.to_string(), err.to_string()))
}

fn strip_sentinel<'a>(stream: &'a str, sentinel: &str) -> Option<&'a str> {
    let rest = stream.strip_prefix(sentinel)?;
    Some(rest.strip_prefix('\n').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unframe_strips_one_newline() {
        let (out, err) = unframe("stdout-start\nhello\n", "stderr-start\n\nwarn").unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(err, "\nwarn");
    }

    #[test]
    fn test_unframe_empty_bodies() {
        let (out, err) = unframe("stdout-start\n", "stderr-start").unwrap();
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn test_unframe_rejects_missing_sentinel() {
        assert!(unframe("hello\nstdout-start\n", "stderr-start\n").is_none());
        assert!(unframe("stdout-start\n", "").is_none());
    }

    #[test]
    fn test_timed_out_result_serializes_wire_names() {
        let json = serde_json::to_value(ExecutionResult::timed_out(1.5)).unwrap();
        assert_eq!(json["stdout"], "");
        assert_eq!(json["stderr"], "");
        assert_eq!(json["container_age"], 1.5);
        assert_eq!(json["timeout"], true);
    }
}
