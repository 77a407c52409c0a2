//! Server configuration: defaults, TOML file, environment, CLI overrides.

use crate::transport::OriginPolicy;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use termbridge_core::{BridgeError, BridgeResult};
use tracing::{info, warn};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub terminal: TerminalSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Empty means every origin is accepted.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Bound on a single outbound frame write. 0 disables the bound.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Directory served for plain HTTP requests. Empty disables it.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_path: default_ws_path(),
            allowed_origins: Vec::new(),
            max_message_size: default_max_message_size(),
            write_timeout_secs: default_write_timeout(),
            static_dir: default_static_dir(),
        }
    }
}

/// `[terminal]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            shell: None,
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_message_size() -> usize {
    1_048_576
}
fn default_write_timeout() -> u64 {
    30
}
fn default_static_dir() -> String {
    "./static".to_string()
}
fn default_term() -> String {
    "xterm".to_string()
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_read_buffer_size() -> usize {
    4096
}

/// Values sourced from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// Raw `PORT` value.
    pub port: Option<String>,
    /// Raw `SHELL` value.
    pub shell: Option<String>,
}

impl EnvOverrides {
    /// Read `PORT` and `SHELL`. Empty values count as unset.
    pub fn from_process() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            port: non_empty("PORT"),
            shell: non_empty("SHELL"),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub shell: Option<String>,
    pub allowed_origins: Vec<String>,
    pub static_dir: Option<String>,
}

/// PTY and shell settings handed to every session.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Preferred shell; `None` falls back to PATH lookup.
    pub shell: Option<String>,
    pub term: String,
    pub rows: u16,
    pub cols: u16,
    pub read_buffer_size: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: None,
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Resolved server configuration (all layers merged).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub ws_path: String,
    pub origin_policy: OriginPolicy,
    pub max_message_size: usize,
    pub write_timeout: Option<Duration>,
    /// Static asset root; `None` answers plain HTTP requests with 404.
    pub static_dir: Option<PathBuf>,
    pub terminal: TerminalConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then apply environment and CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        env: &EnvOverrides,
        cli: &CliOverrides,
    ) -> BridgeResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| BridgeError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::merge(file_config, env, cli))
    }

    /// Merge file values with environment and CLI overrides (CLI wins).
    pub fn merge(file: ConfigFile, env: &EnvOverrides, cli: &CliOverrides) -> Self {
        let env_port = env.port.as_deref().and_then(|raw| match raw.parse::<u16>() {
            Ok(port) => Some(port),
            Err(e) => {
                warn!(value = raw, error = %e, "ignoring unparsable PORT");
                None
            }
        });
        let port = cli.port.or(env_port).unwrap_or(file.server.port);
        let bind = cli.bind.clone().unwrap_or(file.server.bind);

        let shell = cli
            .shell
            .clone()
            .or_else(|| env.shell.clone())
            .or(file.terminal.shell);

        let mut origins = file.server.allowed_origins;
        origins.extend(cli.allowed_origins.iter().cloned());
        let origin_policy = OriginPolicy::from_list(origins);

        let static_dir = cli
            .static_dir
            .clone()
            .unwrap_or(file.server.static_dir)
            .trim()
            .to_string();
        let static_dir = (!static_dir.is_empty()).then(|| expand_tilde(Path::new(&static_dir)));

        let write_timeout = match file.server.write_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            bind,
            port,
            ws_path: normalize_path(file.server.ws_path),
            origin_policy,
            max_message_size: file.server.max_message_size.max(1),
            write_timeout,
            static_dir,
            terminal: TerminalConfig {
                shell,
                term: file.terminal.term,
                rows: file.terminal.rows,
                cols: file.terminal.cols,
                read_buffer_size: file.terminal.read_buffer_size.max(1),
            },
        }
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> BridgeResult<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid bind address {}: {e}", self.bind)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(
            ConfigFile::default(),
            &EnvOverrides::default(),
            &CliOverrides::default(),
        )
    }
}

/// Route paths always start with `/`.
fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
