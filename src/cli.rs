//! Command-line interface.
//!
//! Settings resolve in precedence order: flag, `CPSH_*` environment
//! variable, config file, built-in default. Remote paths are marked with a
//! leading `:` (for example `cpsh cp main.py :/code.py`).

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::{Config, FileConfig};

#[derive(Debug, Parser)]
#[command(name = "cpsh", version, about = "File operations on CircuitPython boards over the raw REPL")]
pub struct Cli {
    /// Serial port of the board (e.g. /dev/ttyACM0)
    #[arg(short, long, env = "CPSH_PORT", global = true)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(long, env = "CPSH_BAUD", global = true)]
    pub baud: Option<u32>,

    /// CircuitPython locale of the board (selects the boot banner)
    #[arg(long, env = "CPSH_LOCALE", global = true)]
    pub locale: Option<String>,

    /// Bytes per paced write chunk
    #[arg(long, env = "CPSH_CHUNK_SIZE", global = true)]
    pub chunk_size: Option<usize>,

    /// Milliseconds between chunks
    #[arg(long, env = "CPSH_CHUNK_WAIT_MS", global = true)]
    pub chunk_wait_ms: Option<u64>,

    /// Config file (default: ~/.config/cpsh/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List files (defaults to the board's root)
    Ls {
        /// Long listing: size and modification time
        #[arg(short, long)]
        long: bool,
        paths: Vec<String>,
    },
    /// Print file contents
    Cat {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Copy files between host and board
    Cp {
        /// Copy directories recursively
        #[arg(short, long)]
        recursive: bool,
        /// Sources followed by the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,
    },
    /// Remove files or directories
    Rm {
        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Create directories
    Mkdir {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Synchronize a directory tree
    Rsync {
        /// Delete destination entries absent from the source
        #[arg(long)]
        mirror: bool,
        /// Print the plan without applying it
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Include dot-files
        #[arg(long)]
        all: bool,
        src: String,
        dst: String,
    },
    /// Run a code fragment on the board and print its output
    Exec { code: String },
}

impl Cli {
    /// Fold flags, environment, config file and defaults into a [`Config`].
    pub fn resolve_config(&self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::load_default()?,
        };
        let port = self
            .port
            .clone()
            .or_else(|| file.port.clone())
            .ok_or_else(|| anyhow::anyhow!("no serial port given (use --port or CPSH_PORT)"))?;

        let mut config = Config::new(port);
        file.apply(&mut config);
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(ref locale) = self.locale {
            config.locale = locale.clone();
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(ms) = self.chunk_wait_ms {
            config.chunk_wait = std::time::Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cp_with_remote_marker() {
        let cli = Cli::parse_from(["cpsh", "-p", "/dev/ttyACM0", "cp", "main.py", ":/code.py"]);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        match cli.command {
            Command::Cp { recursive, paths } => {
                assert!(!recursive);
                assert_eq!(paths, vec!["main.py", ":/code.py"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cp_requires_two_paths() {
        assert!(Cli::try_parse_from(["cpsh", "cp", "main.py"]).is_err());
    }

    #[test]
    fn flag_overrides_win() {
        let cli = Cli::parse_from([
            "cpsh",
            "--port",
            "/dev/ttyACM1",
            "--baud",
            "921600",
            "--locale",
            "de",
            "ls",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.baud, 921_600);
        assert_eq!(config.locale, "de");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["cpsh", "ls", "-l", ":/lib", "--port", "/dev/ttyACM0"]);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        match cli.command {
            Command::Ls { long, paths } => {
                assert!(long);
                assert_eq!(paths, vec![":/lib"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
