//! Command-line surface and the validated configuration built from it.

use crate::error::{CodeboxError, Result};
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "codebox", version, about = "Run untrusted code snippets in hardened sandboxes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CODEBOX_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP service (default)
    Serve(ServeArgs),
    /// Generate a master key and write its hash and salt to a key file
    Keygen(KeygenArgs),
    /// Run a known-good snippet for every language against a running server
    SelfTest(SelfTestArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "CODEBOX_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "CODEBOX_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub addr: IpAddr,

    /// Maximum request body size in bytes
    #[arg(short = 'm', long = "max", env = "CODEBOX_MAX_BYTES", default_value_t = 1_000_000)]
    pub max_bytes: usize,

    /// Execution timeout ceiling in seconds
    #[arg(short, long, env = "CODEBOX_TIMEOUT", default_value_t = 10)]
    pub timeout: u64,

    /// Key file holding the master key hash and salt
    #[arg(short, long, env = "CODEBOX_KEY", default_value = ".masterkey")]
    pub key: PathBuf,

    /// Only accept connections from these addresses (e.g. a reverse proxy)
    #[arg(long, env = "CODEBOX_PROXY", value_delimiter = ',')]
    pub proxy: Vec<IpAddr>,

    /// Enable the execution result cache
    #[arg(long, env = "CODEBOX_CACHE")]
    pub cache: bool,

    /// Maximum number of cached results
    #[arg(long, env = "CODEBOX_CACHE_SIZE", default_value_t = crate::cache::DEFAULT_CAPACITY)]
    pub cache_size: usize,

    /// Serve HTTPS using cert.pem and key.pem from --tls-dir
    #[arg(long, env = "CODEBOX_TLS")]
    pub tls: bool,

    #[arg(long, env = "CODEBOX_TLS_DIR", default_value = "tls")]
    pub tls_dir: PathBuf,

    /// Enable the /ping endpoint
    #[arg(long, env = "CODEBOX_PING")]
    pub ping: bool,

    /// Enforce per-client rate limiting in-process
    #[arg(long, env = "CODEBOX_STANDALONE")]
    pub standalone: bool,

    /// Rate limit burst
    #[arg(long, env = "CODEBOX_BURST", default_value_t = 3)]
    pub burst: u32,

    /// Rate limit refill time in seconds
    #[arg(long, env = "CODEBOX_REFILL", default_value_t = 1)]
    pub refill: u64,

    /// Language map (TOML)
    #[arg(long, env = "CODEBOX_LANGS", default_value = "langs.toml")]
    pub langs: PathBuf,

    /// Sandbox engine binary
    #[arg(long, env = "CODEBOX_ENGINE", default_value = "/usr/bin/podman")]
    pub engine: PathBuf,

    /// Directory with one <entry>.sh per language
    #[arg(long, env = "CODEBOX_ENTRY_DIR", default_value = "entry")]
    pub entry_dir: PathBuf,

    /// Scratch directory for staged sources
    #[arg(long, env = "CODEBOX_RUN_DIR", default_value = "run")]
    pub run_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct KeygenArgs {
    /// Master key to hash; random when omitted
    #[arg(long)]
    pub key: Option<String>,

    /// Salt; random when omitted
    #[arg(long)]
    pub salt: Option<String>,

    #[arg(short, long, default_value = ".masterkey")]
    pub out: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SelfTestArgs {
    /// Master key to authenticate with
    #[arg(short, long, env = "CODEBOX_MASTER_KEY")]
    pub key: String,

    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long)]
    pub tls: bool,

    /// Only test languages present in this language map
    #[arg(long)]
    pub langs: Option<PathBuf>,
}

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_bytes: usize,
    pub timeout: u64,
    pub key_file: PathBuf,
    pub allow_list: Vec<IpAddr>,
    pub cache: bool,
    pub cache_size: usize,
    pub tls: Option<TlsFiles>,
    pub ping: bool,
    pub standalone: bool,
    pub burst: NonZeroU32,
    pub refill: Duration,
    pub langs: PathBuf,
    pub engine: PathBuf,
    pub entry_dir: PathBuf,
    pub run_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TryFrom<ServeArgs> for Config {
    type Error = CodeboxError;

    fn try_from(args: ServeArgs) -> Result<Self> {
        let invalid = |reason: &str| CodeboxError::ConfigError {
            reason: reason.to_string(),
        };
        if args.timeout == 0 {
            return Err(invalid("timeout must be at least 1 second"));
        }
        if args.max_bytes == 0 {
            return Err(invalid("max body size must be positive"));
        }
        if args.cache_size == 0 {
            return Err(invalid("cache size must be positive"));
        }
        let burst = NonZeroU32::new(args.burst).ok_or_else(|| invalid("burst must be positive"))?;
        if args.refill == 0 {
            return Err(invalid("refill must be at least 1 second"));
        }

        let tls = args.tls.then(|| TlsFiles {
            cert: args.tls_dir.join("cert.pem"),
            key: args.tls_dir.join("key.pem"),
        });

        Ok(Self {
            listen: SocketAddr::new(args.addr, args.port),
            max_bytes: args.max_bytes,
            timeout: args.timeout,
            key_file: args.key,
            allow_list: args.proxy,
            cache: args.cache,
            cache_size: args.cache_size,
            tls,
            ping: args.ping,
            standalone: args.standalone,
            burst,
            refill: Duration::from_secs(args.refill),
            langs: args.langs,
            engine: args.engine,
            entry_dir: args.entry_dir,
            run_dir: args.run_dir,
        })
    }
}

impl Config {
    /// Filesystem checks that must pass before serving. Creates the run
    /// directory when missing.
    pub fn prepare(&self) -> Result<()> {
        if !self.engine.is_file() {
            return Err(CodeboxError::ConfigError {
                reason: format!("sandbox engine not found at {}", self.engine.display()),
            });
        }
        if !self.entry_dir.is_dir() {
            return Err(CodeboxError::ConfigError {
                reason: format!("entry directory {} does not exist", self.entry_dir.display()),
            });
        }
        std::fs::create_dir_all(&self.run_dir).map_err(|e| CodeboxError::ConfigError {
            reason: format!("could not create run directory {}: {}", self.run_dir.display(), e),
        })?;
        if let Some(tls) = &self.tls {
            for file in [&tls.cert, &tls.key] {
                if !file.is_file() {
                    return Err(CodeboxError::ConfigError {
                        reason: format!("TLS file {} not found", file.display()),
                    });
                }
            }
        }
        Ok(())
    }
}
