//! 多路复用帧接收端
//!
//! 单线程事件循环：每次 [`PacketReceiver::poll_once`] 调用 `poll(2)` 一次（唯一的挂起点），
//! 然后依次处理可读、可写、异常三类就绪事件。
//!
//! 帧按两阶段重组：先等待 3 字节帧头，再等待帧头声明的载荷长度。
//! 只有当内核缓冲区中已有足够字节时才读取，因此不会出现短读，也不需要每连接的重组缓冲区。

use crate::ReceiverError;
use crate::connection::{Connection, ConnectionId, FlushOutcome};
use crate::handler::ReceiverHandler;
use bytes::Bytes;
use libc::c_short;
use marvin_protocol::{Command, FrameHeader, ProtocolError, response_frame};
use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrStorage, bind, listen, setsockopt, sockopt,
    socket,
};
use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 对端关闭写方向
///
/// `nix::poll::PollFlags` 不含 `POLLRDHUP`，就绪集合直接使用 `libc::pollfd`。
#[cfg(any(target_os = "linux", target_os = "android"))]
const HANGUP: c_short = libc::POLLRDHUP | libc::POLLHUP;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const HANGUP: c_short = libc::POLLHUP;

/// 异常状态：出现即拆除连接
const EXCEPTIONAL: c_short = libc::POLLERR | libc::POLLNVAL | libc::POLLPRI;

/// 每个连接出站队列的上限
///
/// 达到上限后不再读取该连接，直到对端取走应答；对端只写不读时内存不会无限增长。
pub const MAX_QUEUED_FRAMES: usize = 16;

/// 接收端配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// 监听地址
    pub addr: SocketAddr,
    /// 监听队列长度（`listen(2)` backlog）
    pub max_connections: u32,
    /// 单次 poll 的超时
    pub poll_timeout: Duration,
}

impl ReceiverConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            max_connections: 10,
            poll_timeout: Duration::from_millis(100),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

/// 单次 poll 迭代的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// 新接受的连接数
    pub accepted: usize,
    /// 分发给回调的命令数
    pub dispatched: usize,
    /// 拆除的连接数
    pub disconnected: usize,
    /// 数据不足、推迟读取的连接数
    pub deferred: usize,
    /// 完整发出的应答帧数
    pub sent: usize,
}

impl PollStats {
    /// 本次迭代是否没有任何进展
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Listener,
    Connection(ConnectionId),
}

/// 一次读取的结果
enum ReadStep {
    /// 读到了帧头或完成了一帧，继续排空
    Progress,
    /// 数据不足，等待下次可读
    Deferred,
    /// 出站队列已满，暂停读取
    Throttled,
    /// 本轮可读数据已排空
    Drained,
    /// 需要拆除连接
    Close,
}

/// 多路复用帧接收端
pub struct PacketReceiver<H: ReceiverHandler> {
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    poll_timeout: Duration,
    handler: H,
}

impl<H: ReceiverHandler> PacketReceiver<H> {
    /// 创建监听套接字并开始监听
    ///
    /// 套接字设置 `SO_REUSEADDR`，以便守护进程重启后立即重新绑定同一端口。
    pub fn bind(config: &ReceiverConfig, handler: H) -> Result<Self, ReceiverError> {
        let addr = config.addr;
        let socket_err = |source: Errno| ReceiverError::Socket { addr, source };

        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let flags = SockFlag::SOCK_CLOEXEC;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let flags = SockFlag::empty();

        let fd = socket(family, SockType::Stream, flags, None).map_err(socket_err)?;
        setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(socket_err)?;
        bind(fd.as_raw_fd(), &SockaddrStorage::from(addr)).map_err(socket_err)?;

        let backlog = i32::try_from(config.max_connections)
            .ok()
            .and_then(|n| Backlog::new(n).ok())
            .ok_or(ReceiverError::InvalidBacklog(config.max_connections))?;
        listen(&fd, backlog).map_err(socket_err)?;

        let listener = TcpListener::from(fd);
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!(
            "Listening on {} (backlog {})",
            local_addr, config.max_connections
        );

        Ok(Self {
            listener,
            local_addr,
            connections: BTreeMap::new(),
            next_id: 0,
            poll_timeout: config.poll_timeout,
            handler,
        })
    }

    /// 实际绑定的地址（端口 0 时由系统分配）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|conn| conn.peer)
    }

    /// 已收到帧头、正在等待载荷的连接返回该帧头
    pub fn pending_header(&self, id: ConnectionId) -> Option<FrameHeader> {
        self.connections.get(&id).and_then(|conn| conn.pending_header)
    }

    /// 出站队列中尚未发出的帧数
    pub fn queued_frames(&self, id: ConnectionId) -> usize {
        self.connections.get(&id).map_or(0, |conn| conn.outbound.len())
    }

    pub fn has_write_interest(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(|conn| conn.write_interest)
    }

    /// 拆除连接，不触发断开回调
    ///
    /// 幂等：对未知或已拆除的连接返回 `false`，不做任何事。
    pub fn teardown(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(conn) => {
                debug!("Connection {} ({}) torn down", id, conn.peer);
                true
            },
            None => false,
        }
    }

    /// 执行一次事件循环迭代
    ///
    /// 顺序：可读 → 可写 → 异常。`EINTR` 视为一次空迭代，
    /// 以便生命周期循环及时处理记录下来的信号。
    pub fn poll_once(&mut self) -> Result<PollStats, ReceiverError> {
        let mut stats = PollStats::default();

        let ready = match self.wait_ready() {
            Ok(ready) => ready,
            Err(Errno::EINTR) => return Ok(stats),
            Err(e) => return Err(ReceiverError::Poll(e)),
        };

        // 1. 可读
        for &(slot, revents) in &ready {
            if revents & (libc::POLLIN | HANGUP) == 0 {
                continue;
            }
            match slot {
                Slot::Listener => self.accept_pending(&mut stats),
                Slot::Connection(id) => self.service_readable(id, revents, &mut stats),
            }
        }

        // 2. 可写
        for &(slot, revents) in &ready {
            if let Slot::Connection(id) = slot
                && revents & libc::POLLOUT != 0
            {
                self.service_writable(id, &mut stats);
            }
        }

        // 3. 异常
        for &(slot, revents) in &ready {
            if let Slot::Connection(id) = slot
                && revents & EXCEPTIONAL != 0
                && self.disconnect(id)
            {
                warn!("Connection {} closed on exceptional condition {:#06x}", id, revents);
                stats.disconnected += 1;
            }
        }

        Ok(stats)
    }

    /// 构建就绪集合并等待；返回每个就绪描述符的事件
    fn wait_ready(&self) -> Result<Vec<(Slot, c_short)>, Errno> {
        let mut slots = Vec::with_capacity(self.connections.len() + 1);
        let mut fds = Vec::with_capacity(self.connections.len() + 1);

        slots.push(Slot::Listener);
        fds.push(libc::pollfd {
            fd: self.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });

        for (id, conn) in &self.connections {
            slots.push(Slot::Connection(*id));
            fds.push(libc::pollfd {
                fd: conn.stream.as_raw_fd(),
                events: conn_events(conn),
                revents: 0,
            });
        }

        let timeout_ms = self.poll_timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: fds 在调用期间有效且长度与 nfds 一致；描述符由 self 持有
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            return Err(Errno::last());
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        Ok(slots
            .into_iter()
            .zip(fds.iter())
            .filter(|(_, fd)| fd.revents != 0)
            .map(|(slot, fd)| (slot, fd.revents))
            .collect())
    }

    /// 接受所有挂起的连接
    fn accept_pending(&mut self, stats: &mut PollStats) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("Failed to set {} non-blocking: {}", peer, e);
                        continue;
                    }
                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;
                    self.connections.insert(id, Connection::new(stream, peer));
                    stats.accepted += 1;

                    info!("Client connected: {} ({})", peer, id);
                    self.handler.on_client_connected(peer);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // 如 EMFILE：保持监听，下次迭代重试
                    warn!("accept failed: {}", e);
                    break;
                },
            }
        }
    }

    /// 排空一个可读连接中所有已完整到达的帧
    fn service_readable(&mut self, id: ConnectionId, revents: c_short, stats: &mut PollStats) {
        let hangup = revents & HANGUP != 0;
        let mut first = true;

        loop {
            match self.read_step(id, first, hangup, stats) {
                ReadStep::Progress => first = false,
                ReadStep::Deferred => {
                    stats.deferred += 1;
                    break;
                },
                ReadStep::Throttled | ReadStep::Drained => break,
                ReadStep::Close => {
                    if self.disconnect(id) {
                        stats.disconnected += 1;
                    }
                    break;
                },
            }
        }
    }

    fn read_step(
        &mut self,
        id: ConnectionId,
        first: bool,
        hangup: bool,
        stats: &mut PollStats,
    ) -> ReadStep {
        let Some(conn) = self.connections.get_mut(&id) else {
            return ReadStep::Drained;
        };

        if conn.outbound.len() >= MAX_QUEUED_FRAMES {
            trace!("Connection {}: {} responses queued, pausing reads", id, conn.outbound.len());
            return ReadStep::Throttled;
        }

        let expected = conn.expected_len();
        let available = match conn.bytes_available() {
            Ok(n) => n,
            Err(e) => {
                warn!("Connection {} ({}): FIONREAD failed: {}", id, conn.peer, e);
                return ReadStep::Close;
            },
        };

        if available < expected {
            if available == 0 {
                // 可读但无数据即对端已关闭
                if first || hangup {
                    return ReadStep::Close;
                }
                return ReadStep::Drained;
            }
            if hangup {
                debug!(
                    "Connection {} ({}) closed with {} of {} bytes pending",
                    id, conn.peer, available, expected
                );
                return ReadStep::Close;
            }
            trace!(
                "Connection {}: {} of {} bytes available, deferring",
                id, available, expected
            );
            return ReadStep::Deferred;
        }

        let bytes = match conn.read_exact(expected) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Connection {} ({}): read failed: {}", id, conn.peer, e);
                return ReadStep::Close;
            },
        };

        match conn.pending_header.take() {
            None => {
                let decoded = FrameHeader::decode(&bytes).and_then(|h| h.validate().map(|_| h));
                let header = match decoded {
                    Ok(header) => header,
                    Err(e) => {
                        warn!("Connection {} ({}): {}", id, conn.peer, e);
                        return ReadStep::Close;
                    },
                };
                trace!("Connection {}: header {:?}", id, header);
                conn.pending_header = Some(header);
                if header.size == 0 {
                    // 无载荷的帧直接完成
                    return self.complete_frame(id, header, &[], stats);
                }
                ReadStep::Progress
            },
            Some(header) => self.complete_frame(id, header, &bytes, stats),
        }
    }

    /// 载荷到齐：解码、分发、排队应答
    fn complete_frame(
        &mut self,
        id: ConnectionId,
        header: FrameHeader,
        payload: &[u8],
        stats: &mut PollStats,
    ) -> ReadStep {
        let Some(peer) = self.peer_addr(id) else {
            return ReadStep::Drained;
        };

        let result = match Command::decode(&header, payload) {
            Ok(command) => {
                debug!("Connection {} ({}): {:?}", id, peer, command);
                stats.dispatched += 1;
                self.handler.on_command(peer, command)
            },
            Err(e @ ProtocolError::UnknownCommand(_)) => {
                warn!("Connection {} ({}): {}", id, peer, e);
                false
            },
            Err(e) => {
                warn!("Connection {} ({}): {}", id, peer, e);
                return ReadStep::Close;
            },
        };

        // 回调期间连接不会被移除，这里仍然存在
        let Some(conn) = self.connections.get_mut(&id) else {
            return ReadStep::Drained;
        };
        conn.pending_header = None;
        conn.queue_frame(Bytes::copy_from_slice(&response_frame(result)));
        ReadStep::Progress
    }

    fn service_writable(&mut self, id: ConnectionId, stats: &mut PollStats) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        match conn.flush_one() {
            Ok(FlushOutcome::Sent) => stats.sent += 1,
            Ok(FlushOutcome::Partial | FlushOutcome::Blocked | FlushOutcome::Idle) => {},
            Err(e) => {
                warn!("Connection {} ({}): write failed: {}", id, conn.peer, e);
                if self.disconnect(id) {
                    stats.disconnected += 1;
                }
            },
        }
    }

    /// 拆除连接并触发断开回调；连接不存在时返回 `false`
    fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.connections.remove(&id) else {
            return false;
        };
        let peer = conn.peer;
        drop(conn);

        info!("Client disconnected: {} ({})", peer, id);
        self.handler.on_client_disconnected(peer);
        true
    }
}

/// 连接关注的事件；出站队列满时不再关注可读
fn conn_events(conn: &Connection) -> c_short {
    let mut events = libc::POLLPRI | HANGUP;
    if conn.outbound.len() < MAX_QUEUED_FRAMES {
        events |= libc::POLLIN;
    }
    if conn.write_interest {
        events |= libc::POLLOUT;
    }
    events
}
