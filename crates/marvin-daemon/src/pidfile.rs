//! PID 文件
//!
//! PID 文件存在且指向一个存活进程，是判断守护进程是否在运行的唯一依据（无心跳）。
//! 文件内容为十进制进程号（UTF-8），不带任何附加信息。

use crate::error::DaemonError;
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

/// 进程退出时要删除的 PID 文件
static EXIT_CLEANUP_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
static EXIT_HOOK: Once = Once::new();

/// `atexit` 钩子：仅当文件仍记录本进程时才删除
///
/// 重启时旧进程可能晚于新进程退出，此时文件已属于新实例，不能删。
extern "C" fn remove_pid_file_at_exit() {
    let guard = match EXIT_CLEANUP_PATH.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(path) = guard.as_ref()
        && let Ok(content) = fs::read_to_string(path)
        && content.trim() == std::process::id().to_string()
    {
        let _ = fs::remove_file(path);
    }
}

/// PID 文件句柄（只保存路径，不持有打开的文件）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 读取 PID
    ///
    /// # 返回
    /// - `Ok(None)`: 文件不存在
    /// - `Ok(Some(pid))`: 文件存在且内容合法
    /// - `Err`: 文件无法读取，或内容不是正整数
    pub fn read(&self) -> Result<Option<Pid>, DaemonError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(DaemonError::PidFile {
                    path: self.path.clone(),
                    source,
                });
            },
        };

        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Some(Pid::from_raw(pid))),
            _ => Err(DaemonError::InvalidPid {
                path: self.path.clone(),
                content,
            }),
        }
    }

    /// 写入 PID（覆盖旧内容）
    pub fn write(&self, pid: Pid) -> Result<(), DaemonError> {
        let to_err = |source| DaemonError::PidFile {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(to_err)?;
        write!(file, "{}", pid.as_raw()).map_err(to_err)?;
        file.sync_all().map_err(to_err)
    }

    /// 删除 PID 文件（文件不存在不算错误）
    pub fn remove(&self) -> Result<(), DaemonError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DaemonError::PidFile {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// 删除 PID 文件，失败只记录日志
    pub fn remove_quietly(&self) {
        if let Err(e) = self.remove() {
            tracing::warn!("{}", e);
        }
    }

    /// 注册进程退出时的清理钩子
    ///
    /// 使用 `atexit` 而不是 `Drop`：信号触发的 `process::exit` 不会展开栈，
    /// 但会执行 `atexit` 注册的函数。多次调用时以最后一次的路径为准，钩子只注册一次。
    pub fn remove_on_exit(&self) -> Result<(), DaemonError> {
        {
            let mut guard = match EXIT_CLEANUP_PATH.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(self.path.clone());
        }

        let mut registered = true;
        EXIT_HOOK.call_once(|| {
            // SAFETY: 回调是无捕获的 extern "C" 函数，进程生命周期内始终有效
            registered = unsafe { libc::atexit(remove_pid_file_at_exit) } == 0;
        });

        if registered {
            Ok(())
        } else {
            Err(DaemonError::ExitHook)
        }
    }
}
