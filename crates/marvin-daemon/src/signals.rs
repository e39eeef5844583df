//! 信号分发
//!
//! 信号处理函数只做一件事：在位图中记录收到的信号。
//! 生命周期主循环在每次 `on_step` 之后取出记录，再通过 [`SignalTable`] 决定动作。
//!
//! ```text
//! kernel ──► record_signal() ──► PENDING (AtomicU64)
//!                                    │
//!            Daemon::serve() loop ◄──┘ take_pending()
//!                  │
//!                  └─► SignalTable::action(sig) ─► Exit / Restart / Notify / Ignore
//! ```

use crate::error::DaemonError;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 已收到但尚未分发的信号（第 n 位对应信号 n）
static PENDING: AtomicU64 = AtomicU64::new(0);

/// 同步故障信号保留默认处理，不安装记录函数
const FAULT_SIGNALS: [Signal; 6] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGSYS,
];

extern "C" fn record_signal(signum: libc::c_int) {
    if (1..64).contains(&signum) {
        PENDING.fetch_or(1u64 << signum, Ordering::SeqCst);
    }
}

/// 信号动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// 不做任何处理
    Ignore,
    /// 立即以给定状态码退出进程（仍会执行 `atexit` 钩子）
    Exit(i32),
    /// 进程内重启应用（`DaemonApp::on_restart`）
    Restart,
    /// 交给应用自行处理（`DaemonApp::on_signal`）
    Notify,
}

/// 信号 → 动作映射表
///
/// 未登记的信号一律为 [`SignalAction::Ignore`]。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTable {
    actions: HashMap<Signal, SignalAction>,
}

impl Default for SignalTable {
    /// 默认策略：SIGINT/SIGTERM 退出（状态码 0），SIGHUP 重启
    fn default() -> Self {
        let mut table = Self::empty();
        table
            .set(Signal::SIGINT, SignalAction::Exit(0))
            .set(Signal::SIGTERM, SignalAction::Exit(0))
            .set(Signal::SIGHUP, SignalAction::Restart);
        table
    }
}

impl SignalTable {
    /// 空表（所有信号都忽略）
    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// 登记或覆盖一个信号的动作
    pub fn set(&mut self, signal: Signal, action: SignalAction) -> &mut Self {
        self.actions.insert(signal, action);
        self
    }

    /// 链式构建版本的 [`set`](Self::set)
    pub fn with(mut self, signal: Signal, action: SignalAction) -> Self {
        self.set(signal, action);
        self
    }

    pub fn action(&self, signal: Signal) -> SignalAction {
        self.actions
            .get(&signal)
            .copied()
            .unwrap_or(SignalAction::Ignore)
    }
}

/// 为所有可捕获的信号安装记录函数
///
/// 无法安装的信号（SIGKILL、SIGSTOP 等）静默跳过。返回成功安装的数量。
pub fn install_handlers() -> Result<usize, DaemonError> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    let mut installed = 0;
    for signal in Signal::iterator() {
        if FAULT_SIGNALS.contains(&signal) {
            continue;
        }

        // SAFETY: record_signal 只执行一次原子操作，是异步信号安全的
        match unsafe { sigaction(signal, &action) } {
            Ok(_) => installed += 1,
            Err(e) => tracing::trace!("Skipping {:?}: {}", signal, e),
        }
    }

    if installed == 0 {
        return Err(DaemonError::Signal {
            pid: std::process::id() as i32,
            source: nix::errno::Errno::EINVAL,
        });
    }

    tracing::debug!("Installed handlers for {} signals", installed);
    Ok(installed)
}

/// 取出并清空所有待分发的信号（按信号编号升序）
pub fn take_pending() -> Vec<Signal> {
    let bits = PENDING.swap(0, Ordering::SeqCst);
    if bits == 0 {
        return Vec::new();
    }

    Signal::iterator()
        .filter(|signal| {
            let n = *signal as i32;
            (1..64).contains(&n) && bits & (1u64 << n) != 0
        })
        .collect()
}
