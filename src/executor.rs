use crate::cache::{CacheKey, ResultCache};
use crate::error::{CodeboxError, Result};
use crate::sandbox::escape::escape;
use crate::sandbox::podman::SandboxInvocation;
use crate::sandbox::{unframe, ExecutionRequest, ExecutionResult};
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;

const BOX_ID_MIN: u32 = 1_000_000;
const BOX_ID_MAX: u32 = 10_000_000;
const STAGING_ATTEMPTS: usize = 5;

/// Where the executor finds its engine, scripts and scratch space.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub engine: PathBuf,
    pub entry_dir: PathBuf,
    pub run_dir: PathBuf,
    /// Server-wide ceiling on a single run, in seconds.
    pub timeout_ceiling: u64,
}

/// Runs requests in the sandbox engine, deduplicating through the result
/// cache.
pub struct Executor {
    config: ExecutorConfig,
    cache: Arc<ResultCache>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, cache: Arc<ResultCache>) -> Self {
        Self { config, cache }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// `0` or anything past the ceiling means the ceiling.
    pub fn effective_timeout(&self, requested: u64) -> u64 {
        if requested == 0 || requested > self.config.timeout_ceiling {
            self.config.timeout_ceiling
        } else {
            requested
        }
    }

    pub async fn run_code(&self, request: &ExecutionRequest) -> Result<Arc<ExecutionResult>> {
        let args = escape(&request.args);
        let stdin = escape(&request.stdin);

        let key = request.enable_cache.then(|| {
            CacheKey::derive(&args, &request.language.entry, &request.code, &stdin, &request.env)
        });

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(key = key.as_str(), "Cache hit");
                let cache = Arc::clone(&self.cache);
                let key = key.clone();
                tokio::spawn(async move {
                    cache.extend(&key);
                });
                return Ok(hit);
            }
        }

        let staged =
            StagedSource::create(&self.config.run_dir, &request.language.ext, &request.code).await?;

        let timeout = self.effective_timeout(request.timeout_secs);
        let entry_script = self.config.entry_dir.join(format!("{}.sh", request.language.entry));
        let invocation = SandboxInvocation {
            box_id: staged.box_id,
            entry_script: &entry_script,
            source_file: &staged.path,
            extension: &request.language.ext,
            image: &request.language.image,
            engine_timeout_secs: self.config.timeout_ceiling + 1,
            env: &request.env,
            args: &request.args,
            stdin: &request.stdin,
        };

        let result = Arc::new(self.invoke(&invocation, Duration::from_secs(timeout)).await?);
        drop(staged);

        if let Some(key) = key {
            let cache = Arc::clone(&self.cache);
            let cached = Arc::clone(&result);
            tokio::spawn(async move {
                cache.insert(key, cached);
            });
        }

        Ok(result)
    }

    /// Race the engine against `deadline`. Whichever finishes first decides
    /// the outcome; on expiry the child is killed and its output discarded.
    async fn invoke(
        &self,
        invocation: &SandboxInvocation<'_>,
        deadline: Duration,
    ) -> Result<ExecutionResult> {
        let mut command = Command::new(&self.config.engine);
        command
            .args(invocation.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(|source| CodeboxError::EngineError {
            engine: self.config.engine.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(output) => output.map_err(|source| CodeboxError::EngineError {
                engine: self.config.engine.clone(),
                source,
            })?,
            Err(_) => {
                let age = started.elapsed().as_secs_f64();
                tracing::info!(
                    hostname = %invocation.hostname(),
                    container_age = age,
                    "Execution timed out"
                );
                return Ok(ExecutionResult::timed_out(age));
            }
        };
        let age = started.elapsed().as_secs_f64();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        match unframe(&stdout, &stderr) {
            Some((stdout, stderr)) => Ok(ExecutionResult {
                stdout,
                stderr,
                container_age: age,
                timed_out: false,
            }),
            None => {
                tracing::error!(
                    hostname = %invocation.hostname(),
                    status = ?output.status,
                    stdout = %stdout,
                    stderr = %stderr,
                    "Blocked unsafe output"
                );
                Err(CodeboxError::FramingViolation {
                    stdout: stdout.into_owned(),
                    stderr: stderr.into_owned(),
                })
            }
        }
    }
}

/// Source file written into the run directory, removed on drop.
#[derive(Debug)]
pub struct StagedSource {
    pub box_id: u32,
    pub path: PathBuf,
}

impl StagedSource {
    pub async fn create(run_dir: &Path, ext: &str, code: &[u8]) -> Result<Self> {
        let mut last_err = None;
        for _ in 0..STAGING_ATTEMPTS {
            let box_id = rand::thread_rng().gen_range(BOX_ID_MIN..BOX_ID_MAX);
            let path = run_dir.join(format!("run{}.{}", box_id, ext));
            match write_new(&path, code).await {
                Ok(()) => return Ok(Self { box_id, path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    last_err = Some((path, e));
                }
                Err(source) => {
                    // a partially written file is still ours to remove
                    let _ = std::fs::remove_file(&path);
                    return Err(CodeboxError::StagingError { path, source });
                }
            }
        }
        let (path, source) = last_err.unwrap_or_else(|| {
            (
                run_dir.to_path_buf(),
                std::io::Error::new(ErrorKind::Other, "no staging attempt made"),
            )
        });
        Err(CodeboxError::StagingError { path, source })
    }
}

async fn write_new(path: &Path, code: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(code).await?;
    file.flush().await
}

impl Drop for StagedSource {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not remove staged source");
            }
        }
    }
}

/// Remove leftover staged files from the run directory.
pub fn clean_run_dir(run_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_file() && name.to_string_lossy().starts_with("run") {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
