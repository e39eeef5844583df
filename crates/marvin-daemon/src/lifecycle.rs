//! 守护进程生命周期
//!
//! 状态机：
//!
//! ```text
//! New ──start()──► Detached ──serve()──► Running ──Exit 信号──► Stopping ──► Terminated
//! ```
//!
//! 应用通过实现 [`DaemonApp`] 接入：生命周期管理器负责脱离、PID 文件和信号，
//! 应用只提供初始化（`on_init`）和单次迭代（`on_step`）。

use crate::daemonize::{DetachOptions, daemonize};
use crate::error::DaemonError;
use crate::pidfile::PidFile;
use crate::signals::{self, SignalAction, SignalTable};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::convert::Infallible;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 应用能力接口
///
/// 生命周期管理器在 PID 文件写入之后调用一次 `on_init`，随后循环调用 `on_step`。
/// `on_step` 应当自带阻塞/超时（例如一次带超时的 poll），否则主循环会空转。
pub trait DaemonApp {
    type Error: std::error::Error + Send + Sync + 'static;

    /// 初始化（绑定端口、查找设备等）
    fn on_init(&mut self) -> Result<(), Self::Error>;

    /// 主循环的一次迭代
    fn on_step(&mut self) -> Result<(), Self::Error>;

    /// 收到 [`SignalAction::Restart`] 时调用，默认重新执行 `on_init`
    fn on_restart(&mut self) -> Result<(), Self::Error> {
        self.on_init()
    }

    /// 收到 [`SignalAction::Notify`] 时调用
    fn on_signal(&mut self, signal: Signal) {
        let _ = signal;
    }

    /// 主循环结束时调用一次（`Exit` 信号或致命错误），之后进程即退出
    ///
    /// `start()` 以 `process::exit` 结束，不会运行析构函数；需要释放的硬件在这里处理。
    fn on_exit(&mut self) {}

    /// 信号动作表，默认见 [`SignalTable::default`]
    fn signal_table(&self) -> SignalTable {
        SignalTable::default()
    }
}

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Detached,
    Running,
    Stopping,
    Terminated,
}

/// 守护进程配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// 运行用户（权限下降目标）
    pub user: String,

    /// PID 文件路径
    pub pid_file: PathBuf,

    /// 标准输出日志路径
    pub stdout: PathBuf,

    /// 标准错误日志路径
    pub stderr: PathBuf,

    /// 发送 SIGTERM 后等待目标退出的时间（默认 100ms）
    pub stop_grace: Duration,

    /// 重启时 stop 与 start 之间的间隔（默认 500ms）
    pub restart_delay: Duration,
}

impl DaemonConfig {
    pub fn new(user: impl Into<String>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            pid_file: pid_file.into(),
            stdout: PathBuf::from("/var/log/daemon.log"),
            stderr: PathBuf::from("/var/log/daemon.log"),
            stop_grace: Duration::from_millis(100),
            restart_delay: Duration::from_millis(500),
        }
    }

    pub fn with_logs(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    fn detach_options(&self) -> DetachOptions {
        DetachOptions {
            user: self.user.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

/// `stop()` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 没有 PID 文件（或内容无法解析，已删除）
    NotRunning,
    /// PID 文件指向的进程已不存在，已删除 PID 文件
    Stale { pid: i32 },
    /// 已发送 SIGTERM
    Stopped { pid: i32 },
}

/// 守护进程生命周期管理器
pub struct Daemon<A: DaemonApp> {
    config: DaemonConfig,
    pid_file: PidFile,
    app: A,
    state: LifecycleState,
}

impl<A: DaemonApp> Daemon<A> {
    pub fn new(config: DaemonConfig, app: A) -> Self {
        let pid_file = PidFile::new(config.pid_file.clone());
        Self {
            config,
            pid_file,
            app,
            state: LifecycleState::New,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// 启动守护进程（脱离终端）
    ///
    /// 成功时不返回：主循环结束后直接以信号表给出的状态码退出进程。
    /// 只有脱离之前（或脱离过程中）的错误会返回给调用方。
    pub fn start(&mut self) -> Result<Infallible, DaemonError> {
        info!("Starting...");
        self.ensure_not_running()?;

        daemonize(&self.config.detach_options())?;
        self.state = LifecycleState::Detached;

        let code = self.serve()?;
        self.state = LifecycleState::Terminated;
        std::process::exit(code)
    }

    /// 前台运行（不脱离终端），返回退出码
    ///
    /// 用于 systemd 等外部进程管理器，以及测试。
    pub fn start_foreground(&mut self) -> Result<i32, DaemonError> {
        info!("Starting in foreground...");
        self.ensure_not_running()?;

        let code = self.serve()?;
        self.state = LifecycleState::Terminated;
        Ok(code)
    }

    /// 停止守护进程
    ///
    /// - 没有 PID 文件：报告"未运行"，不是错误
    /// - 进程不存在（ESRCH）：删除过期的 PID 文件，不是错误
    /// - 无权发送信号（EPERM）：返回 [`DaemonError::PermissionDenied`]
    pub fn stop(&mut self) -> Result<StopOutcome, DaemonError> {
        info!("Stopping...");

        let pid = match self.pid_file.read() {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                info!(
                    "PID file {} doesn't exist. Is the daemon not running?",
                    self.pid_file.path().display()
                );
                return Ok(StopOutcome::NotRunning);
            },
            Err(e) => {
                warn!("{}; removing it", e);
                self.pid_file.remove_quietly();
                return Ok(StopOutcome::NotRunning);
            },
        };

        match kill(pid, None) {
            Ok(()) => {},
            Err(Errno::ESRCH) => {
                info!("Daemon not running (stale pid {})", pid);
                self.pid_file.remove_quietly();
                return Ok(StopOutcome::Stale { pid: pid.as_raw() });
            },
            Err(Errno::EPERM) => {
                error!("Permission denied signalling pid {}", pid);
                return Err(DaemonError::PermissionDenied { pid: pid.as_raw() });
            },
            Err(source) => {
                return Err(DaemonError::Signal {
                    pid: pid.as_raw(),
                    source,
                });
            },
        }

        self.state = LifecycleState::Stopping;
        kill(pid, Signal::SIGTERM).map_err(|source| DaemonError::Signal {
            pid: pid.as_raw(),
            source,
        })?;
        self.pid_file.remove_quietly();
        thread::sleep(self.config.stop_grace);

        self.state = LifecycleState::Terminated;
        info!("Sent SIGTERM to pid {}", pid);
        Ok(StopOutcome::Stopped { pid: pid.as_raw() })
    }

    /// 重启：`stop()`，等待 `restart_delay`，再 `start()`
    pub fn restart(&mut self) -> Result<Infallible, DaemonError> {
        self.stop()?;
        thread::sleep(self.config.restart_delay);
        self.state = LifecycleState::New;
        self.start()
    }

    fn ensure_not_running(&self) -> Result<(), DaemonError> {
        match self.pid_file.read()? {
            Some(pid) => {
                error!(
                    "PID file {} exists. Is the daemon already running?",
                    self.pid_file.path().display()
                );
                Err(DaemonError::AlreadyRunning {
                    path: self.pid_file.path().to_path_buf(),
                    pid: pid.as_raw(),
                })
            },
            None => Ok(()),
        }
    }

    /// 脱离之后的部分：退出钩子、信号、PID 文件、主循环
    ///
    /// 返回信号表中 `Exit` 动作给出的状态码。
    fn serve(&mut self) -> Result<i32, DaemonError> {
        // 先注册退出钩子，再创建 PID 文件
        self.pid_file.remove_on_exit()?;

        let table = self.app.signal_table();
        signals::install_handlers()?;

        self.pid_file.write(Pid::this())?;
        self.app.on_init().map_err(DaemonError::app)?;

        self.state = LifecycleState::Running;
        info!("Daemon running (pid {})", Pid::this());

        let result = self.run_loop(&table);
        self.app.on_exit();
        result
    }

    fn run_loop(&mut self, table: &SignalTable) -> Result<i32, DaemonError> {
        loop {
            self.app.on_step().map_err(DaemonError::app)?;

            for signal in signals::take_pending() {
                match table.action(signal) {
                    SignalAction::Ignore => debug!("Ignoring {:?}", signal),
                    SignalAction::Exit(code) => {
                        info!("Received {:?}, exiting with status {}", signal, code);
                        self.state = LifecycleState::Stopping;
                        return Ok(code);
                    },
                    SignalAction::Restart => {
                        info!("Received {:?}, restarting", signal);
                        self.app.on_restart().map_err(DaemonError::app)?;
                    },
                    SignalAction::Notify => self.app.on_signal(signal),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct Never;

    struct Idle;

    impl DaemonApp for Idle {
        type Error = Never;

        fn on_init(&mut self) -> Result<(), Never> {
            Ok(())
        }

        fn on_step(&mut self) -> Result<(), Never> {
            Ok(())
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = DaemonConfig::new("marvin", "/run/marvin42_td.pid");
        assert_eq!(config.stdout, PathBuf::from("/var/log/daemon.log"));
        assert_eq!(config.stop_grace, Duration::from_millis(100));
        assert_eq!(config.restart_delay, Duration::from_millis(500));

        let config = config.with_logs("/tmp/out.log", "/tmp/err.log");
        assert_eq!(config.stderr, PathBuf::from("/tmp/err.log"));
    }

    #[test]
    fn test_new_daemon_state() {
        let daemon = Daemon::new(DaemonConfig::new("marvin", "/nonexistent/x.pid"), Idle);
        assert_eq!(daemon.state(), LifecycleState::New);
        assert_eq!(daemon.pid_file().path(), std::path::Path::new("/nonexistent/x.pid"));
    }

    #[test]
    fn test_stop_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(
            DaemonConfig::new("marvin", dir.path().join("none.pid")),
            Idle,
        );
        assert_eq!(daemon.stop().unwrap(), StopOutcome::NotRunning);
        assert_eq!(daemon.state(), LifecycleState::New);
    }
}
