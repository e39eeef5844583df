//! 接收端回调接口

use marvin_protocol::Command;
use std::net::SocketAddr;

/// 接收端回调
///
/// 所有回调都在事件循环线程内同步调用，实现中不得阻塞。
pub trait ReceiverHandler {
    /// 新连接已接受
    fn on_client_connected(&mut self, peer: SocketAddr) {
        let _ = peer;
    }

    /// 连接已断开（对端关闭、读错误或异常状态）
    ///
    /// 每个连接最多调用一次；调用时连接已不在任何跟踪集合中。
    fn on_client_disconnected(&mut self, peer: SocketAddr) {
        let _ = peer;
    }

    /// 一条完整命令已解码
    ///
    /// 返回值作为布尔应答（`PacketId::True` / `PacketId::False`）回送给对端。
    fn on_command(&mut self, peer: SocketAddr, command: Command) -> bool;
}
