//! marvin42 传输守护进程
//!
//! 监听 TCP 端口，接收电机命令并驱动履带底盘。
//!
//! ```bash
//! marvin42_td start -c /etc/marvin42_tdrc
//! marvin42_td stop
//! marvin42_td restart
//! ```

mod app;
mod config;

use app::TransmissionDaemon;
use clap::{Parser, ValueEnum};
use config::{Config, DEFAULT_CONFIG_PATH, full_path};
use marvin_daemon::{Daemon, DaemonError, StopOutcome};
use std::process;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Operation {
    Start,
    Stop,
    Restart,
}

/// marvin42 transmission daemon
#[derive(Parser, Debug)]
#[command(name = "marvin42_td")]
#[command(about = "marvin42 transmission daemon", long_about = None)]
#[command(after_help = "marvin42, 2019")]
#[command(version)]
struct Args {
    /// 要执行的操作
    #[arg(value_enum)]
    operation: Operation,

    /// 配置文件路径（`~` 会被展开）
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, value_name = "filepath")]
    config: String,

    /// 不脱离终端，在前台运行（仅 start）
    #[arg(long)]
    foreground: bool,
}

/// 解析参数；用法错误以退出码 1 结束
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        },
    }
}

/// 日志：WARN 及以上写标准错误，其余写标准输出
///
/// 每次写入时重新获取标准流，脱离终端后自然写入重定向后的日志文件。
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

fn run(
    operation: Operation,
    foreground: bool,
    daemon: &mut Daemon<TransmissionDaemon>,
) -> Result<i32, DaemonError> {
    match operation {
        Operation::Start if foreground => daemon.start_foreground(),
        Operation::Start => match daemon.start()? {},
        Operation::Restart => match daemon.restart()? {},
        Operation::Stop => {
            match daemon.stop()? {
                StopOutcome::NotRunning => println!("marvin42_td is not running"),
                StopOutcome::Stale { pid } => {
                    println!("Removed stale pid file (process {} not running)", pid)
                },
                StopOutcome::Stopped { pid } => println!("Stopped marvin42_td (pid {})", pid),
            }
            Ok(0)
        },
    }
}

fn main() {
    let args = parse_args();
    init_logging();

    let config_path = full_path(&args.config);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        },
    };

    let daemon_config = config.daemon.daemon_config();
    let mut daemon = Daemon::new(daemon_config, TransmissionDaemon::new(config));

    let code = match run(args.operation, args.foreground, &mut daemon) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("marvin42_td: {}", e);
            e.exit_code()
        },
    };
    process::exit(code);
}
