//! # marvin42 Motor
//!
//! 履带底盘驱动抽象与命令执行。
//!
//! - [`TankDrive`]: 左右两侧电机的最小接口（设置速度、停止）
//! - [`Ev3TankDrive`]: ev3dev `tacho-motor` sysfs 后端
//! - [`SimulatedTank`]: 内存后端，无硬件时使用
//! - [`MotorController`]: 把解码后的 [`Command`](marvin_protocol::Command) 映射到驱动调用

pub mod controller;
pub mod ev3;
pub mod simulated;

pub use controller::MotorController;
pub use ev3::{DEFAULT_SYSFS_ROOT, Ev3TankDrive, TachoMotor};
pub use simulated::{DriveEvent, SimulatedHandle, SimulatedTank};

use std::path::PathBuf;
use thiserror::Error;

/// 电机错误类型
#[derive(Error, Debug)]
pub enum MotorError {
    /// sysfs 属性读写失败
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// sysfs 属性内容无法解析
    #[error("Invalid attribute {path}: {content:?}")]
    InvalidAttribute { path: PathBuf, content: String },

    /// 停车距离必须非负
    #[error("Invalid stop distance: {0}")]
    InvalidStopDistance(i32),
}

/// 履带底盘驱动
///
/// 速度单位由后端决定（ev3dev 为 tacho counts/s）；超出范围的值由后端截断，而不是报错。
pub trait TankDrive {
    /// 设置左右两侧速度并保持运行
    fn set_speed(&mut self, left: i32, right: i32) -> Result<(), MotorError>;

    /// 停止两侧电机
    fn stop(&mut self) -> Result<(), MotorError>;

    /// 用于日志的后端名称
    fn name(&self) -> &str {
        "tank"
    }
}

impl<T: TankDrive + ?Sized> TankDrive for Box<T> {
    fn set_speed(&mut self, left: i32, right: i32) -> Result<(), MotorError> {
        (**self).set_speed(left, right)
    }

    fn stop(&mut self) -> Result<(), MotorError> {
        (**self).stop()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
