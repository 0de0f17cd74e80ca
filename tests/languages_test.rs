/// The shipped language map must load and point at existing entry scripts
#[cfg(test)]
mod languages_tests {
    use codebox::languages::LanguageTable;
    use codebox::sandbox::podman::{SandboxInvocation, ENTRY_MOUNT};
    use codebox::selftest::SNIPPETS;
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn shipped() -> LanguageTable {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        LanguageTable::from_file(&root.join("langs.toml")).unwrap()
    }

    #[test]
    fn test_shipped_map_loads() {
        let table = shipped();
        assert_eq!(table.len(), 13);
        assert_eq!(table.get("1").unwrap().entry, "python");
    }

    #[test]
    fn test_every_entry_has_a_script() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        for (id, entry) in shipped().iter() {
            let script = root.join("entry").join(format!("{}.sh", entry.entry));
            assert!(script.is_file(), "language {} has no entry script", id);
        }
    }

    #[test]
    fn test_every_language_has_a_snippet() {
        let table = shipped();
        for id in table.ids() {
            assert!(SNIPPETS.iter().any(|(s, _)| *s == id), "no snippet for {}", id);
        }
    }

    /// Run the in-sandbox command line against the real entry script for
    /// `entry`, with `tool` on PATH replaced by a stub echoing its argv.
    fn tool_argv(entry: &str, tool: &str, args: &str) -> Vec<String> {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let script = root.join("entry").join(format!("{}.sh", entry));
        let bin = tempfile::tempdir().unwrap();
        let stub = bin.path().join(tool);
        std::fs::write(&stub, "#!/bin/sh\nprintf '%s\\n' \"$@\"\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = BTreeMap::new();
        let invocation = SandboxInvocation {
            box_id: 1234567,
            entry_script: &script,
            source_file: Path::new("/unused"),
            extension: "x",
            image: "unused",
            engine_timeout_secs: 1,
            env: &env,
            args,
            stdin: "",
        };
        let command = invocation
            .shell_command()
            .replace(ENTRY_MOUNT, &script.display().to_string());

        let path = format!("{}:{}", bin.path().display(), std::env::var("PATH").unwrap_or_default());
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env("PATH", path)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_args_reach_the_interpreter() {
        assert_eq!(tool_argv("python", "python3", "-O -u"), ["-O", "-u", "/source.py"]);
        assert_eq!(tool_argv("ruby", "ruby", "-w"), ["-w", "/source.rb"]);
    }

    #[test]
    fn test_args_reach_the_compiler() {
        let argv = tool_argv("c", "gcc", "-O2 -lm");
        assert_eq!(&argv[..5], ["-O2", "-lm", "-o", "out", "/source.c"]);
    }

    #[test]
    fn test_args_precede_source_in_every_script() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        for (id, entry) in shipped().iter() {
            let script = std::fs::read_to_string(root.join("entry").join(format!("{}.sh", entry.entry))).unwrap();
            let args_at = script.find("\"$@\"");
            let source_at = script.find("/source.");
            assert!(
                matches!((args_at, source_at), (Some(a), Some(s)) if a < s),
                "language {} must pass args before the source file",
                id
            );
        }
    }
}
