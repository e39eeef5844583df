//! 配置文件
//!
//! TOML 格式，每个字段都有默认值，缺省的段或字段使用默认值：
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 4242
//! max_connections = 10
//! poll_timeout_ms = 100
//!
//! [daemon]
//! user = "nobody"
//! pid_file = "/var/run/marvin42_td.pid"
//! log_default = "/var/log/marvin42_td.log"
//! log_error = "/var/log/marvin42_td.err"
//!
//! [motor]
//! backend = "ev3"          # ev3 | simulated | disabled
//! sysfs_root = "/sys/class"
//! left_port = "outA"
//! right_port = "outB"
//! ```

use marvin_daemon::DaemonConfig;
use marvin_motor::DEFAULT_SYSFS_ROOT;
use marvin_net::ReceiverConfig;
use serde::Deserialize;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "/etc/marvin42_tdrc";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub daemon: DaemonSection,
    pub motor: MotorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
    pub max_connections: u32,
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 4242,
            max_connections: 10,
            poll_timeout_ms: 100,
        }
    }
}

impl ServerConfig {
    /// 解析监听地址（支持主机名）
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let resolve_err = || ConfigError::Resolve {
            host: self.bind_address.clone(),
            port: self.bind_port,
        };
        (self.bind_address.as_str(), self.bind_port)
            .to_socket_addrs()
            .map_err(|_| resolve_err())?
            .next()
            .ok_or_else(resolve_err)
    }

    pub fn receiver_config(&self) -> Result<ReceiverConfig, ConfigError> {
        Ok(ReceiverConfig::new(self.socket_addr()?)
            .with_max_connections(self.max_connections)
            .with_poll_timeout(Duration::from_millis(self.poll_timeout_ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSection {
    /// 脱离终端后切换到的用户
    pub user: String,
    pub pid_file: String,
    /// 标准输出重定向目标
    pub log_default: String,
    /// 标准错误重定向目标
    pub log_error: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            user: "nobody".to_string(),
            pid_file: "/var/run/marvin42_td.pid".to_string(),
            log_default: "/var/log/marvin42_td.log".to_string(),
            log_error: "/var/log/marvin42_td.err".to_string(),
        }
    }
}

impl DaemonSection {
    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig::new(self.user.clone(), full_path(&self.pid_file))
            .with_logs(full_path(&self.log_default), full_path(&self.log_error))
    }
}

/// 电机后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorBackend {
    #[default]
    Ev3,
    Simulated,
    /// 不驱动电机，运动命令一律应答 false
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotorConfig {
    pub backend: MotorBackend,
    pub sysfs_root: String,
    pub left_port: String,
    pub right_port: String,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            backend: MotorBackend::Ev3,
            sysfs_root: DEFAULT_SYSFS_ROOT.to_string(),
            left_port: "outA".to_string(),
            right_port: "outB".to_string(),
        }
    }
}

impl Config {
    /// 读取、解析并校验配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "server.max_connections must be at least 1".to_string(),
            ));
        }
        if self.daemon.user.trim().is_empty() {
            return Err(ConfigError::Invalid("daemon.user must not be empty".to_string()));
        }
        if self.daemon.pid_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "daemon.pid_file must not be empty".to_string(),
            ));
        }
        if self.motor.left_port == self.motor.right_port {
            return Err(ConfigError::Invalid(format!(
                "motor.left_port and motor.right_port are both {:?}",
                self.motor.left_port
            )));
        }
        Ok(())
    }
}

/// 展开 `~` 并转为绝对路径
///
/// 不要求路径存在，也不解析符号链接。
pub fn full_path(raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        _ => PathBuf::from(raw),
    };

    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}
