//! 单个连接的状态
//!
//! 一个 [`Connection`] 同时承载事件循环的四类跟踪状态：
//! 读集合成员（存在于连接表中）、写集合成员（`write_interest`）、
//! 挂起帧头（`pending_header`）和出站队列（`outbound`）。
//! 从连接表中移除即一次性清除全部状态，随后 `TcpStream` 的 Drop 关闭套接字。

use bytes::Bytes;
use marvin_protocol::{FrameHeader, HEADER_SIZE};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;

/// 连接标识（单调递增，不复用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 一次写操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// 一帧完整发出
    Sent,
    /// 只发出一部分，剩余部分放回队首
    Partial,
    /// 内核发送缓冲区已满，帧放回队首
    Blocked,
    /// 队列为空，已撤销写兴趣
    Idle,
}

pub(crate) struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) pending_header: Option<FrameHeader>,
    pub(crate) outbound: VecDeque<Bytes>,
    pub(crate) write_interest: bool,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            pending_header: None,
            outbound: VecDeque::new(),
            write_interest: false,
        }
    }

    /// 下一步需要的字节数：无挂起帧头时为帧头长度，否则为帧头声明的载荷长度
    pub(crate) fn expected_len(&self) -> usize {
        match &self.pending_header {
            None => HEADER_SIZE,
            Some(header) => header.size as usize,
        }
    }

    /// 不阻塞即可读取的字节数（`FIONREAD`）
    pub(crate) fn bytes_available(&self) -> io::Result<usize> {
        let mut available: libc::c_int = 0;
        // SAFETY: fd 在 stream 生命周期内有效，FIONREAD 向 c_int 写入可读字节数
        let ret = unsafe {
            libc::ioctl(
                self.stream.as_raw_fd(),
                libc::FIONREAD,
                &mut available as *mut libc::c_int,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(available.max(0) as usize)
    }

    /// 精确读取 `len` 字节
    ///
    /// 调用方必须先确认 `bytes_available() >= len`，因此非阻塞套接字上不会出现短读。
    pub(crate) fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 将一帧放入出站队列，并登记写兴趣
    pub(crate) fn queue_frame(&mut self, frame: Bytes) {
        self.outbound.push_back(frame);
        self.write_interest = true;
    }

    /// 发送队首的一帧
    pub(crate) fn flush_one(&mut self) -> io::Result<FlushOutcome> {
        let Some(frame) = self.outbound.pop_front() else {
            self.write_interest = false;
            return Ok(FlushOutcome::Idle);
        };

        match self.stream.write(&frame) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) if n == frame.len() => Ok(FlushOutcome::Sent),
            Ok(n) => {
                self.outbound.push_front(frame.slice(n..));
                Ok(FlushOutcome::Partial)
            },
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
            {
                self.outbound.push_front(frame);
                Ok(FlushOutcome::Blocked)
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    /// 建立一对本地 TCP 连接：(服务端 Connection, 客户端流)
    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        (Connection::new(stream, peer), client)
    }

    fn wait_available(conn: &Connection, n: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let available = conn.bytes_available().unwrap();
            if available >= n || Instant::now() > deadline {
                return available;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_expected_len_follows_pending_header() {
        let (mut conn, _client) = pair();
        assert_eq!(conn.expected_len(), HEADER_SIZE);

        conn.pending_header = Some(FrameHeader::new(1, 8));
        assert_eq!(conn.expected_len(), 8);

        conn.pending_header = Some(FrameHeader::new(2, 0));
        assert_eq!(conn.expected_len(), 0);
    }

    #[test]
    fn test_bytes_available_and_read_exact() {
        let (mut conn, mut client) = pair();
        assert_eq!(conn.bytes_available().unwrap(), 0);

        client.write_all(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(wait_available(&conn, 5), 5);

        assert_eq!(conn.read_exact(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(conn.bytes_available().unwrap(), 2);
    }

    #[test]
    fn test_queue_and_flush() {
        let (mut conn, mut client) = pair();
        assert!(!conn.write_interest);

        conn.queue_frame(Bytes::from_static(&[1, 0, 0]));
        conn.queue_frame(Bytes::from_static(&[0, 0, 0]));
        assert!(conn.write_interest);
        assert_eq!(conn.outbound.len(), 2);

        assert_eq!(conn.flush_one().unwrap(), FlushOutcome::Sent);
        assert_eq!(conn.flush_one().unwrap(), FlushOutcome::Sent);
        // 队列为空时撤销写兴趣，不是错误
        assert_eq!(conn.flush_one().unwrap(), FlushOutcome::Idle);
        assert!(!conn.write_interest);

        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "#7");
    }
}
