//! # marvin42 Daemon
//!
//! UNIX 守护进程生命周期管理：
//! - 两次 fork 脱离终端、权限下降、标准流重定向（`daemonize`）
//! - PID 文件读写与退出时清理（`pidfile`）
//! - 信号记录与分发表（`signals`）
//! - `start` / `stop` / `restart` 与主循环（`lifecycle`）
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use marvin_daemon::{Daemon, DaemonApp, DaemonConfig};
//!
//! struct Ticker;
//!
//! impl DaemonApp for Ticker {
//!     type Error = std::io::Error;
//!
//!     fn on_init(&mut self) -> Result<(), Self::Error> {
//!         Ok(())
//!     }
//!
//!     fn on_step(&mut self) -> Result<(), Self::Error> {
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!         Ok(())
//!     }
//! }
//!
//! let config = DaemonConfig::new("nobody", "/tmp/ticker.pid");
//! let mut daemon = Daemon::new(config, Ticker);
//! if let Err(e) = daemon.start() {
//!     eprintln!("{}", e);
//!     std::process::exit(e.exit_code());
//! }
//! ```

pub mod daemonize;
mod error;
pub mod lifecycle;
pub mod pidfile;
pub mod signals;

pub use daemonize::{DetachOptions, daemonize, resolve_user};
pub use error::DaemonError;
pub use lifecycle::{Daemon, DaemonApp, DaemonConfig, LifecycleState, StopOutcome};
pub use pidfile::PidFile;
pub use signals::{SignalAction, SignalTable};

// 应用实现 `on_signal` 时需要的信号类型
pub use nix::sys::signal::Signal;
