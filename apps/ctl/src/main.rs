//! # marvin42 控制客户端
//!
//! 向传输守护进程发送单条电机命令，打印布尔应答。
//!
//! ```bash
//! marvin42_ctl --host robot.local speed 300 -300
//! marvin42_ctl stop
//! marvin42_ctl settings 40
//! ```
//!
//! 应答为 `true` 时退出码 0，否则为 1。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marvin_net::CommandClient;
use marvin_protocol::{Command, MotorSettings, MotorSpeed};
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "marvin42_ctl")]
#[command(about = "Send a motor command to the marvin42 transmission daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// 守护进程主机
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 守护进程端口
    #[arg(short, long, default_value_t = 4242)]
    port: u16,

    /// 连接与读写超时（毫秒）
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum CtlCommand {
    /// 设置左右两侧速度
    #[command(allow_negative_numbers = true)]
    Speed { left: i32, right: i32 },

    /// 停止
    Stop,

    /// 设置自动停车距离
    #[command(allow_negative_numbers = true)]
    Settings { stop_distance: i32 },
}

impl CtlCommand {
    fn to_command(&self) -> Command {
        match self {
            CtlCommand::Speed { left, right } => Command::MotorSpeed(MotorSpeed::new(*left, *right)),
            CtlCommand::Stop => Command::MotorStop,
            CtlCommand::Settings { stop_distance } => {
                Command::MotorSettings(MotorSettings::new(*stop_distance))
            },
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Cannot resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address for {}:{}", host, port))
}

fn run(cli: &Cli) -> Result<bool> {
    let addr = resolve(&cli.host, cli.port)?;
    let client = CommandClient::new(addr).with_timeout(Duration::from_millis(cli.timeout_ms));
    let command = cli.command.to_command();

    client
        .send(&command)
        .with_context(|| format!("Failed to send {:?} to {}", command, addr))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(result) => {
            println!("{}", result);
            process::exit(if result { 0 } else { 1 });
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_negative_speed() {
        let cli = Cli::try_parse_from(["marvin42_ctl", "speed", "100", "-50"]).unwrap();
        assert_eq!(cli.command, CtlCommand::Speed { left: 100, right: -50 });
        assert_eq!(cli.command.to_command(), Command::MotorSpeed(MotorSpeed::new(100, -50)));
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 4242);
    }

    #[test]
    fn test_parse_settings_and_stop() {
        let cli = Cli::try_parse_from(["marvin42_ctl", "--port", "5000", "settings", "40"]).unwrap();
        assert_eq!(cli.port, 5000);
        assert_eq!(cli.command.to_command(), Command::MotorSettings(MotorSettings::new(40)));

        let cli = Cli::try_parse_from(["marvin42_ctl", "stop"]).unwrap();
        assert_eq!(cli.command.to_command(), Command::MotorStop);
    }

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve("127.0.0.1", 4242).unwrap();
        assert_eq!(addr, "127.0.0.1:4242".parse().unwrap());
    }
}
