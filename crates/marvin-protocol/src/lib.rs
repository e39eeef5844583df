//! # marvin42 Protocol
//!
//! 控制守护进程的二进制帧协议定义（无 I/O 依赖）
//!
//! ## 模块
//!
//! - `header`: 3 字节帧头与布尔应答帧
//! - `command`: 电机命令及其定长载荷编解码
//!
//! ## 字节序
//!
//! 所有整数字段均为网络字节序（大端）。
//!
//! ```text
//! +--------+-----------------+------------------------+
//! | type   | size (u16, BE)  | payload (size bytes)   |
//! +--------+-----------------+------------------------+
//! ```

pub mod command;
pub mod header;

pub use command::{Command, CommandId, MotorSettings, MotorSpeed};
pub use header::{
    FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, PacketId, decode_response, response_frame,
};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 帧头不足 3 字节
    #[error("Malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    /// 载荷长度与命令声明的定长不一致
    #[error("Malformed payload for {command:?}: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        command: CommandId,
        expected: usize,
        actual: usize,
    },

    /// 未知的命令类型
    #[error("Unknown command type: {0}")]
    UnknownCommand(u8),

    /// 帧头声明的载荷长度超过上限
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u16, max: u16 },
}

impl ProtocolError {
    /// 是否为帧同步缺陷
    ///
    /// 返回 `true` 时，后续字节的对齐已不可信，接收端必须关闭连接；
    /// 未知命令类型不影响对齐，只需应答 false。
    pub fn is_framing_defect(&self) -> bool {
        !matches!(self, ProtocolError::UnknownCommand(_))
    }
}
