//! 进程脱离（daemonize）
//!
//! [`daemonize`] 返回后保证：
//! - 进程不是会话首进程，且永远无法重新获得控制终端（两次 fork）
//! - 已切换到目标用户/组，工作目录为该用户的主目录，umask 为 `022`
//! - stdin 指向 `/dev/null`，stderr/stdout 分别追加写入日志文件
//!
//! 任何一步失败都是致命的：调用方不得在权限部分下降的状态下继续运行。

use crate::error::DaemonError;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, User, chdir, fork, getgid, getuid, setgid, setsid, setuid};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// 脱离参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachOptions {
    /// 目标用户名
    pub user: String,
    /// 标准输出日志
    pub stdout: PathBuf,
    /// 标准错误日志
    pub stderr: PathBuf,
}

/// 执行完整的脱离流程
///
/// 父进程（两次 fork 的中间进程）在此函数内以状态码 0 退出，只有孙进程返回。
/// 目标用户在第一次 fork 之前查找：用户不存在时错误返回给调用方，而不是在已脱离的子进程里丢失。
pub fn daemonize(options: &DetachOptions) -> Result<(), DaemonError> {
    let user = resolve_user(&options.user)?;

    // 避免缓冲区内容在子进程中被再次刷出
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    fork_and_exit_parent()?;

    // 脱离原会话，清除控制终端
    setsid().map_err(DaemonError::Setsid)?;

    // 第二次 fork：会话首进程退出，孙进程无法再获得控制终端
    fork_and_exit_parent()?;

    drop_privileges(&user)?;
    umask(Mode::from_bits_truncate(0o022));

    redirect_stdio(&options.stdout, &options.stderr)?;

    tracing::info!(
        "Detached: pid={}, uid={}, gid={}",
        std::process::id(),
        getuid(),
        getgid()
    );
    Ok(())
}

fn fork_and_exit_parent() -> Result<(), DaemonError> {
    // SAFETY: 此时进程仍为单线程，子进程可以安全地继续执行任意代码
    match unsafe { fork() }.map_err(DaemonError::Fork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

/// 按用户名查找账户
pub fn resolve_user(username: &str) -> Result<User, DaemonError> {
    User::from_name(username)
        .map_err(|source| DaemonError::PrivilegeDrop {
            user: username.to_string(),
            source,
        })?
        .ok_or_else(|| DaemonError::UnknownUser(username.to_string()))
}

/// 切换到目标用户/组，并进入其主目录
///
/// 只有与当前 uid/gid 不同才调用 setuid/setgid；组必须先于用户切换，
/// 否则放弃 root 后就没有权限再改组。
pub fn drop_privileges(user: &User) -> Result<(), DaemonError> {
    let to_err = |source| DaemonError::PrivilegeDrop {
        user: user.name.clone(),
        source,
    };

    if user.gid != getgid() {
        #[cfg(target_os = "linux")]
        if getuid().is_root() {
            let name = std::ffi::CString::new(user.name.as_str())
                .map_err(|_| DaemonError::UnknownUser(user.name.clone()))?;
            nix::unistd::initgroups(&name, user.gid).map_err(to_err)?;
        }
        setgid(user.gid).map_err(to_err)?;
    }

    if user.uid != getuid() {
        setuid(user.uid).map_err(to_err)?;
        // SAFETY: 脱离阶段进程只有一个线程，没有并发读取环境变量的代码
        unsafe { std::env::set_var("HOME", &user.dir) };
    }

    chdir(&user.dir).map_err(to_err)?;
    Ok(())
}

/// 重定向标准流
///
/// 先重定向 stderr，之后 stdout 重定向失败时错误信息已经能写进日志。
pub fn redirect_stdio(stdout: &Path, stderr: &Path) -> Result<(), DaemonError> {
    let dev_null = File::open("/dev/null").map_err(|source| DaemonError::Redirect {
        stream: "stdin",
        path: PathBuf::from("/dev/null"),
        source,
    })?;
    dup_onto(&dev_null, libc::STDIN_FILENO).map_err(|source| DaemonError::Redirect {
        stream: "stdin",
        path: PathBuf::from("/dev/null"),
        source,
    })?;

    let _ = io::stderr().flush();
    redirect_to_log(stderr, libc::STDERR_FILENO, "stderr")?;

    let _ = io::stdout().flush();
    redirect_to_log(stdout, libc::STDOUT_FILENO, "stdout")?;

    Ok(())
}

fn redirect_to_log(path: &Path, target: RawFd, stream: &'static str) -> Result<(), DaemonError> {
    let to_err = |source| DaemonError::Redirect {
        stream,
        path: path.to_path_buf(),
        source,
    };

    // 追加模式：stdout 与 stderr 指向同一文件时不会互相覆盖
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)?;
    dup_onto(&file, target).map_err(to_err)
}

fn dup_onto(file: &File, target: RawFd) -> io::Result<()> {
    // SAFETY: 两个描述符在调用期间都有效；dup2 之后 file 可以正常关闭
    if unsafe { libc::dup2(file.as_raw_fd(), target) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
