//! 阻塞式命令客户端
//!
//! 每次 [`CommandClient::send`] 建立一条新连接，发送一帧，读取 3 字节布尔应答后关闭。

use marvin_protocol::{Command, HEADER_SIZE, ProtocolError, decode_response};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 应答帧不是合法的布尔应答
    #[error("Invalid response: {0}")]
    Protocol(#[from] ProtocolError),
}

/// 命令客户端
#[derive(Debug, Clone)]
pub struct CommandClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(5),
        }
    }

    /// 设置连接、读、写的超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 发送一条命令并返回对端的布尔应答
    pub fn send(&self, command: &Command) -> Result<bool, ClientError> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        let frame = command.encode_frame();
        stream.write_all(&frame)?;
        debug!("Sent {:?} to {} ({} bytes)", command, self.addr, frame.len());

        let mut response = [0u8; HEADER_SIZE];
        stream.read_exact(&mut response)?;
        let result = decode_response(&response)?;
        debug!("Response from {}: {}", self.addr, result);

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// 读取一帧请求并回送固定的应答字节
    fn one_shot_server(reply: [u8; 3]) -> (SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; 3];
            stream.read_exact(&mut header).unwrap();
            let size = u16::from_be_bytes([header[1], header[2]]) as usize;
            let mut payload = vec![0u8; size];
            stream.read_exact(&mut payload).unwrap();
            stream.write_all(&reply).unwrap();

            let mut frame = header.to_vec();
            frame.extend_from_slice(&payload);
            frame
        });
        (addr, handle)
    }

    #[test]
    fn test_send_true_response() {
        let (addr, server) = one_shot_server([1, 0, 0]);
        let client = CommandClient::new(addr).with_timeout(Duration::from_secs(2));

        assert!(client.send(&Command::MotorStop).unwrap());
        assert_eq!(server.join().unwrap(), vec![2, 0, 0]);
    }

    #[test]
    fn test_send_false_response() {
        let (addr, server) = one_shot_server([0, 0, 0]);
        let client = CommandClient::new(addr);

        let command = Command::MotorSpeed(marvin_protocol::MotorSpeed::new(100, -50));
        assert!(!client.send(&command).unwrap());
        assert_eq!(server.join().unwrap(), command.encode_frame());
    }

    #[test]
    fn test_send_rejects_invalid_response() {
        let (addr, server) = one_shot_server([7, 0, 0]);
        let client = CommandClient::new(addr);

        let err = client.send(&Command::MotorStop).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(ProtocolError::UnknownCommand(7))));
        server.join().unwrap();
    }

    #[test]
    fn test_send_connection_refused() {
        // 绑定后立即释放，得到一个大概率无人监听的端口
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let client = CommandClient::new(addr).with_timeout(Duration::from_millis(500));
        assert!(matches!(client.send(&Command::MotorStop), Err(ClientError::Io(_))));
    }
}
