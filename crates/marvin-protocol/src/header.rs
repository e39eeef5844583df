//! 帧头定义
//!
//! 帧头固定 3 字节：`type`（u8）+ `size`（u16，大端）。
//! 守护进程处理完一个请求帧后，复用 `type` 字段回送布尔结果（见 [`PacketId`]）。

use crate::ProtocolError;

/// 帧头长度（字节）
pub const HEADER_SIZE: usize = 3;

/// 单帧载荷长度上限（字节）
///
/// 协议本身允许到 `u16::MAX`，但所有已定义命令的载荷都远小于此值。
/// 超出上限的帧直接视为非法，避免恶意对端让接收端无限缓冲。
pub const MAX_PAYLOAD_SIZE: u16 = 1024;

/// 应答帧类型（与命令类型共用 `type` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum PacketId {
    /// 命令执行失败
    False = 0,
    /// 命令执行成功
    True = 1,
}

impl From<bool> for PacketId {
    fn from(value: bool) -> Self {
        if value { PacketId::True } else { PacketId::False }
    }
}

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// 命令类型或应答标记
    pub packet_type: u8,
    /// 紧随其后的载荷长度
    pub size: u16,
}

impl FrameHeader {
    pub fn new(packet_type: u8, size: u16) -> Self {
        Self { packet_type, size }
    }

    /// 编码为 3 字节（大端）
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let size = self.size.to_be_bytes();
        [self.packet_type, size[0], size[1]]
    }

    /// 从缓冲区解码帧头
    ///
    /// 只读取前 3 字节；不足 3 字节时返回 [`ProtocolError::MalformedHeader`]。
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        Ok(Self {
            packet_type: buf[0],
            size: u16::from_be_bytes([buf[1], buf[2]]),
        })
    }

    /// 检查载荷长度是否在上限内
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }
}

/// 构建布尔应答帧（无载荷）
pub fn response_frame(result: bool) -> [u8; HEADER_SIZE] {
    FrameHeader::new(PacketId::from(result).into(), 0).encode()
}

/// 解析布尔应答帧
///
/// 应答帧必须是 `type` 为 0/1 且 `size` 为 0 的帧头。
pub fn decode_response(buf: &[u8]) -> Result<bool, ProtocolError> {
    let header = FrameHeader::decode(buf)?;
    let id = PacketId::try_from(header.packet_type)
        .map_err(|_| ProtocolError::UnknownCommand(header.packet_type))?;
    if header.size != 0 {
        return Err(ProtocolError::PayloadTooLarge {
            size: header.size,
            max: 0,
        });
    }
    Ok(id == PacketId::True)
}
