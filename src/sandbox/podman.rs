//! Argument contract for the sandbox engine.
//!
//! The flag set below is the isolation boundary. Every run gets exactly the
//! same profile; callers only influence the image, the two read-only mounts,
//! the hostname suffix and explicit `--env` pairs.

use super::escape::{escape, quote_tokens};
use super::{STDERR_SENTINEL, STDOUT_SENTINEL};
use std::collections::BTreeMap;
use std::path::Path;

/// Path of the entry script inside the sandbox.
pub const ENTRY_MOUNT: &str = "/entry.sh";

const HARDENING: &[&str] = &[
    "--rm",
    "--read-only",
    "--no-hosts",
    "--network",
    "none",
    "--cap-drop",
    "ALL",
    "--memory",
    "512m",
    "--memory-reservation",
    "128m",
    "--cpus",
    "1.0",
    "--pids-limit",
    "32",
    "--user",
    "nobody",
    "--tmpfs",
    "/tmp:rw,size=64m,mode=1777",
    "--tmpfs",
    "/var/tmp:ro,size=32m,mode=1777",
    "--security-opt",
    "no-new-privileges",
    "--security-opt",
    "mask=/home:/etc:/opt:/media:/root:/run:/srv:/sys:/var",
    "--security-opt",
    "label=type:codebox.process",
    "--security-opt",
    "proc-opts=hidepid=2",
    "--unsetenv",
    "container",
];

/// Everything needed to start one sandboxed run.
#[derive(Debug)]
pub struct SandboxInvocation<'a> {
    pub box_id: u32,
    pub entry_script: &'a Path,
    pub source_file: &'a Path,
    pub extension: &'a str,
    pub image: &'a str,
    /// Engine-side timeout; kept above the orchestrator deadline.
    pub engine_timeout_secs: u64,
    pub env: &'a BTreeMap<String, String>,
    pub args: &'a str,
    pub stdin: &'a str,
}

impl SandboxInvocation<'_> {
    pub fn hostname(&self) -> String {
        format!("box{}", self.box_id)
    }

    /// Full argument vector passed to the engine binary.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".to_string()];
        args.extend(HARDENING.iter().map(|s| s.to_string()));
        args.push("--hostname".to_string());
        args.push(self.hostname());
        args.push("--timeout".to_string());
        args.push(self.engine_timeout_secs.to_string());

        for (key, value) in self.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("--volume".to_string());
        args.push(format!("{}:{}:z,ro", self.entry_script.display(), ENTRY_MOUNT));
        args.push("--volume".to_string());
        args.push(format!(
            "{}:/source.{}:Z,ro",
            self.source_file.display(),
            self.extension
        ));

        args.push(self.image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(self.shell_command());
        args
    }

    /// The in-sandbox command line. `args` and `stdin` are quoted per token
    /// before they are spliced in.
    pub fn shell_command(&self) -> String {
        let framing = format!(
            "echo {} && echo {} >&2",
            STDOUT_SENTINEL, STDERR_SENTINEL
        );
        let mut entry = format!("sh {}", ENTRY_MOUNT);
        let args = escape(self.args);
        if !args.is_empty() {
            entry.push(' ');
            entry.push_str(&args);
        }

        match self.stdin_feed() {
            Some(feed) => format!("{} && {} | {}", framing, feed, entry),
            None => format!("{} && {} < /dev/null", framing, entry),
        }
    }

    /// Subshell that prints the quoted stdin tokens as one space-joined line.
    pub fn stdin_feed(&self) -> Option<String> {
        let tokens = quote_tokens(self.stdin);
        if tokens.is_empty() {
            return None;
        }
        Some(format!("(set -- {} && printf '%s\\n' \"$*\")", tokens.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invocation<'a>(
        env: &'a BTreeMap<String, String>,
        entry: &'a Path,
        source: &'a Path,
        args: &'a str,
        stdin: &'a str,
    ) -> SandboxInvocation<'a> {
        SandboxInvocation {
            box_id: 4242424,
            entry_script: entry,
            source_file: source,
            extension: "py",
            image: "codebox-python",
            engine_timeout_secs: 11,
            env,
            args,
            stdin,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn test_hardening_profile_present() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/srv/entry/python.sh");
        let source = PathBuf::from("/srv/run/run4242424.py");
        let args = invocation(&env, &entry, &source, "", "").to_args();

        assert_eq!(args[0], "run");
        for flag in ["--rm", "--read-only", "--no-hosts"] {
            assert!(args.iter().any(|a| a == flag), "missing {}", flag);
        }
        assert_eq!(value_after(&args, "--network"), vec!["none"]);
        assert_eq!(value_after(&args, "--cap-drop"), vec!["ALL"]);
        assert_eq!(value_after(&args, "--pids-limit"), vec!["32"]);
        assert_eq!(value_after(&args, "--user"), vec!["nobody"]);
        assert_eq!(value_after(&args, "--hostname"), vec!["box4242424"]);
        assert_eq!(value_after(&args, "--timeout"), vec!["11"]);
        assert_eq!(value_after(&args, "--unsetenv"), vec!["container"]);
        assert_eq!(value_after(&args, "--tmpfs").len(), 2);
        assert!(value_after(&args, "--security-opt").contains(&"no-new-privileges"));
        assert!(value_after(&args, "--security-opt").contains(&"proc-opts=hidepid=2"));
    }

    #[test]
    fn test_exactly_two_readonly_mounts() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/srv/entry/python.sh");
        let source = PathBuf::from("/srv/run/run4242424.py");
        let args = invocation(&env, &entry, &source, "", "").to_args();

        let volumes = value_after(&args, "--volume");
        assert_eq!(
            volumes,
            vec![
                "/srv/entry/python.sh:/entry.sh:z,ro",
                "/srv/run/run4242424.py:/source.py:Z,ro"
            ]
        );
    }

    #[test]
    fn test_env_passed_explicitly() {
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello world".to_string());
        let entry = PathBuf::from("/e.sh");
        let source = PathBuf::from("/s.py");
        let args = invocation(&env, &entry, &source, "", "").to_args();

        assert_eq!(value_after(&args, "--env"), vec!["GREETING=hello world"]);
    }

    #[test]
    fn test_image_precedes_command() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/e.sh");
        let source = PathBuf::from("/s.py");
        let args = invocation(&env, &entry, &source, "-u", "").to_args();
        let n = args.len();

        assert_eq!(args[n - 4], "codebox-python");
        assert_eq!(&args[n - 3..n - 1], &["sh", "-c"]);
        assert_eq!(
            args[n - 1],
            "echo stdout-start && echo stderr-start >&2 && sh /entry.sh '-u' < /dev/null"
        );
    }

    #[test]
    fn test_stdin_is_piped_quoted() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/e.sh");
        let source = PathBuf::from("/s.py");
        let cmd = invocation(&env, &entry, &source, "", "1 $(id)").shell_command();

        assert_eq!(
            cmd,
            "echo stdout-start && echo stderr-start >&2 && (set -- '1' '$(id)' && printf '%s\\n' \"$*\") | sh /entry.sh"
        );
    }

    #[test]
    fn test_stdin_tokens_arrive_on_one_line() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/e.sh");
        let source = PathBuf::from("/s.py");
        let feed = invocation(&env, &entry, &source, "", "  3 4\n-n 'x' $(id)  ")
            .stdin_feed()
            .unwrap();

        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&feed)
            .output()
            .expect("sh should run");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "3 4 -n 'x' $(id)\n");
    }

    #[test]
    fn test_blank_stdin_reads_dev_null() {
        let env = BTreeMap::new();
        let entry = PathBuf::from("/e.sh");
        let source = PathBuf::from("/s.py");
        let inv = invocation(&env, &entry, &source, "", " \n\t ");
        assert!(inv.stdin_feed().is_none());
        assert!(inv.shell_command().ends_with("sh /entry.sh < /dev/null"));
    }
}
