/// Configuration management
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_API_PORT: u16 = 7070;
const DEFAULT_LOG_APPEND_RETRIES: usize = 5;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the document tree and blob store
    pub data_dir: PathBuf,

    /// HTTP API listen address (local clients only)
    pub api_addr: SocketAddr,

    /// Bounded retries for version-conflicted read-modify-writes
    pub log_append_retries: usize,

    /// Flush sled to disk after every write (durability over throughput)
    pub flush_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".threadline"),
            api_addr: format!("127.0.0.1:{}", DEFAULT_API_PORT).parse().unwrap(),
            log_append_retries: DEFAULT_LOG_APPEND_RETRIES,
            flush_writes: true,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        StoreError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = PathBuf::from(path);
                    i += 2;
                }
                "--api-port" => {
                    let p = args.get(i + 1).ok_or_else(|| {
                        StoreError::Config("--api-port requires a port argument".to_string())
                    })?;
                    let port = p.parse::<u16>().map_err(|_| {
                        StoreError::Config("--api-port must be a valid number (0-65535)".to_string())
                    })?;
                    config.api_addr = format!("127.0.0.1:{}", port).parse().unwrap();
                    i += 2;
                }
                "--no-flush" => {
                    config.flush_writes = false;
                    i += 1;
                }
                other => {
                    return Err(StoreError::Config(format!(
                        "Unknown argument: {} (usage: {} [--data-dir <path>] [--api-port <port>] [--no-flush])",
                        other,
                        args.first().map(String::as_str).unwrap_or("threadline")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("THREADLINE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(p) = std::env::var("THREADLINE_API_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            config.api_addr = format!("127.0.0.1:{}", p)
                .parse()
                .map_err(|_| StoreError::Config("Invalid api address".to_string()))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.api_addr.port(), DEFAULT_API_PORT);
        assert!(config.flush_writes);
    }

    #[test]
    fn parses_flags() {
        let args: Vec<String> = ["threadline", "--data-dir", "/tmp/t", "--api-port", "9000", "--no-flush"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/t"));
        assert_eq!(config.api_addr.port(), 9000);
        assert!(!config.flush_writes);
    }

    #[test]
    fn rejects_unknown_flags() {
        let args: Vec<String> = ["threadline", "--bogus"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(Config::from_args(&args), Err(StoreError::Config(_))));
    }
}
