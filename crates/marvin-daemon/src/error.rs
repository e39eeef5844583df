//! 生命周期错误类型定义

use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

/// 守护进程生命周期错误
#[derive(Error, Debug)]
pub enum DaemonError {
    /// PID 文件已存在（启动时）
    #[error("PID file {} exists (pid {pid}). Is the daemon already running?", path.display())]
    AlreadyRunning { path: PathBuf, pid: i32 },

    /// 无权向目标进程发送信号（停止时）
    #[error("Permission denied signalling pid {pid}")]
    PermissionDenied { pid: i32 },

    /// PID 文件读写失败
    #[error("PID file {} error: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// PID 文件内容不是十进制整数
    #[error("PID file {} holds invalid content: {content:?}", path.display())]
    InvalidPid { path: PathBuf, content: String },

    /// fork 失败
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    /// setsid 失败
    #[error("setsid failed: {0}")]
    Setsid(#[source] Errno),

    /// 目标用户不存在
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// 权限下降失败
    #[error("Failed to drop privileges to {user}: {source}")]
    PrivilegeDrop {
        user: String,
        #[source]
        source: Errno,
    },

    /// 标准流重定向失败
    #[error("Failed to redirect {stream} to {}: {source}", path.display())]
    Redirect {
        stream: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 信号发送或处理器安装失败
    #[error("Signal error for pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: Errno,
    },

    /// 注册退出钩子失败
    #[error("Failed to register exit hook")]
    ExitHook,

    /// 应用层（`DaemonApp`）错误
    #[error("Application error: {0}")]
    App(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DaemonError {
    pub(crate) fn app<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        DaemonError::App(Box::new(err))
    }

    /// 进程退出码
    ///
    /// 所有生命周期错误（包括"已在运行"和停止时的权限错误）都以 1 退出。
    pub const fn exit_code(&self) -> i32 {
        1
    }
}
