//! # marvin42 Networking
//!
//! 单线程、基于就绪多路复用（`poll(2)`）的帧接收端，以及配套的阻塞式命令客户端。
//!
//! ## 模块
//!
//! - `receiver`: 事件循环、两阶段帧重组、每连接写队列
//! - `handler`: 连接/断开/命令回调接口
//! - `client`: 发送单条命令并读取布尔应答
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use marvin_net::{PacketReceiver, ReceiverConfig, ReceiverHandler};
//! use marvin_protocol::Command;
//! use std::net::SocketAddr;
//!
//! struct Printer;
//!
//! impl ReceiverHandler for Printer {
//!     fn on_command(&mut self, peer: SocketAddr, command: Command) -> bool {
//!         println!("{}: {:?}", peer, command);
//!         true
//!     }
//! }
//!
//! let config = ReceiverConfig::new("127.0.0.1:4242".parse().unwrap());
//! let mut receiver = PacketReceiver::bind(&config, Printer).unwrap();
//! loop {
//!     receiver.poll_once().unwrap();
//! }
//! ```

pub mod client;
mod connection;
pub mod handler;
pub mod receiver;

pub use client::{ClientError, CommandClient};
pub use connection::ConnectionId;
pub use handler::ReceiverHandler;
pub use receiver::{MAX_QUEUED_FRAMES, PacketReceiver, PollStats, ReceiverConfig};

use nix::errno::Errno;
use std::net::SocketAddr;
use thiserror::Error;

/// 接收端错误类型
///
/// 只有监听套接字或 poll 本身的失败会以错误返回；单个连接的错误在内部处理（断开该连接）。
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// 创建或配置监听套接字失败
    #[error("Socket setup failed for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: Errno,
    },

    /// 最大挂起连接数超出系统允许范围
    #[error("Invalid max_connections: {0}")]
    InvalidBacklog(u32),

    /// poll 调用失败
    #[error("poll failed: {0}")]
    Poll(#[source] Errno),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}
