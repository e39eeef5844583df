//! 电机命令
//!
//! 每种命令的载荷都是定长结构，按 `CommandId` 选择解析方式。
//! 不支持变长或部分解析：载荷长度必须与命令声明的长度完全一致。

use crate::ProtocolError;
use crate::header::{FrameHeader, HEADER_SIZE};

/// 命令类型
///
/// 注意：请求方向的 `MotorSpeed = 1` 与应答方向的 `PacketId::True = 1` 共用数值，
/// 二者通过传输方向区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::IntoPrimitive, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum CommandId {
    /// 设置左右履带速度
    MotorSpeed = 1,
    /// 停止电机
    MotorStop = 2,
    /// 应用电机设置
    MotorSettings = 3,
}

impl CommandId {
    /// 该命令载荷的固定长度（字节）
    pub const fn payload_size(self) -> usize {
        match self {
            CommandId::MotorSpeed => MotorSpeed::SIZE,
            CommandId::MotorStop => 0,
            CommandId::MotorSettings => MotorSettings::SIZE,
        }
    }
}

/// 检查载荷长度
fn expect_len(command: CommandId, payload: &[u8]) -> Result<(), ProtocolError> {
    let expected = command.payload_size();
    if payload.len() != expected {
        return Err(ProtocolError::MalformedPayload {
            command,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// 速度载荷（`!ii`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorSpeed {
    pub left: i32,
    pub right: i32,
}

impl MotorSpeed {
    pub const SIZE: usize = 8;

    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.left.to_be_bytes());
        buf[4..8].copy_from_slice(&self.right.to_be_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(CommandId::MotorSpeed, payload)?;
        Ok(Self {
            left: i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            right: i32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
        })
    }
}

/// 设置载荷（`!i`）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorSettings {
    /// 自动停车距离（传感器原始单位）
    pub stop_distance: i32,
}

impl MotorSettings {
    pub const SIZE: usize = 4;

    pub fn new(stop_distance: i32) -> Self {
        Self { stop_distance }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.stop_distance.to_be_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(CommandId::MotorSettings, payload)?;
        Ok(Self {
            stop_distance: i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        })
    }
}

/// 解码后的命令
///
/// 由接收端在帧完整到达后构造，按值交给分发回调，之后不再保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MotorSpeed(MotorSpeed),
    MotorStop,
    MotorSettings(MotorSettings),
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::MotorSpeed(_) => CommandId::MotorSpeed,
            Command::MotorStop => CommandId::MotorStop,
            Command::MotorSettings(_) => CommandId::MotorSettings,
        }
    }

    /// 按帧头类型解析载荷
    pub fn decode(header: &FrameHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        let id = CommandId::try_from(header.packet_type)
            .map_err(|_| ProtocolError::UnknownCommand(header.packet_type))?;

        match id {
            CommandId::MotorSpeed => Ok(Command::MotorSpeed(MotorSpeed::decode(payload)?)),
            CommandId::MotorStop => {
                expect_len(id, payload)?;
                Ok(Command::MotorStop)
            },
            CommandId::MotorSettings => Ok(Command::MotorSettings(MotorSettings::decode(payload)?)),
        }
    }

    /// 仅编码载荷
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Command::MotorSpeed(speed) => speed.encode().to_vec(),
            Command::MotorStop => Vec::new(),
            Command::MotorSettings(settings) => settings.encode().to_vec(),
        }
    }

    /// 编码为完整的帧（帧头 + 载荷）
    pub fn encode_frame(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let header = FrameHeader::new(self.id().into(), payload.len() as u16);

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&payload);
        frame
    }
}
