//! Connection configuration.
//!
//! Precedence: CLI flag > `CPSH_*` environment variable > config file >
//! built-in default. The file lives at `~/.config/cpsh/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default baud rate for CircuitPython USB CDC consoles.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default outbound chunk size in bytes. The raw REPL input buffer on most
/// boards drains slowly; 64 bytes per chunk is known-safe.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default pause between chunks.
pub const DEFAULT_CHUNK_WAIT: Duration = Duration::from_millis(500);

/// Default bound on banner detection after reset.
pub const DEFAULT_RAW_REPL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single remote execution.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(20);

/// Default block size for bounded remote file reads.
pub const DEFAULT_READ_BLOCK: usize = 1024;

/// Resolved connection settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub baud: u32,
    pub chunk_size: usize,
    pub chunk_wait: Duration,
    pub raw_repl_timeout: Duration,
    pub exec_timeout: Duration,
    pub read_block: usize,
    /// CircuitPython locale tag of the *device* (selects the boot banner).
    pub locale: String,
}

impl Config {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: DEFAULT_BAUD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_wait: DEFAULT_CHUNK_WAIT,
            raw_repl_timeout: DEFAULT_RAW_REPL_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            read_block: DEFAULT_READ_BLOCK,
            locale: default_locale(),
        }
    }
}

/// Optional on-disk settings; every field overrides a default when present.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub chunk_size: Option<usize>,
    pub chunk_wait_ms: Option<u64>,
    pub raw_repl_timeout_secs: Option<u64>,
    pub exec_timeout_secs: Option<u64>,
    pub read_block: Option<usize>,
    pub locale: Option<String>,
}

impl FileConfig {
    /// Load `~/.config/cpsh/config.toml` if it exists.
    pub fn load_default() -> anyhow::Result<Self> {
        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Fold file values into `config` where the CLI left defaults untouched.
    pub fn apply(&self, config: &mut Config) {
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(ms) = self.chunk_wait_ms {
            config.chunk_wait = Duration::from_millis(ms);
        }
        if let Some(secs) = self.raw_repl_timeout_secs {
            config.raw_repl_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.exec_timeout_secs {
            config.exec_timeout = Duration::from_secs(secs);
        }
        if let Some(block) = self.read_block {
            config.read_block = block;
        }
        if let Some(ref locale) = self.locale {
            config.locale = locale.clone();
        }
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cpsh").join("config.toml"))
}

/// Device locale guess: the host's LANG, language part only, else "en".
pub fn default_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let tag = lang.split('.').next().unwrap_or("");
            if tag.is_empty() {
                None
            } else {
                Some(tag.to_string())
            }
        })
        .unwrap_or_else(|| "en".to_string())
}
