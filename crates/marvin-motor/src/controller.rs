//! 命令执行

use crate::{MotorError, TankDrive};
use marvin_protocol::{Command, MotorSettings};
use tracing::{error, info, warn};

/// 把解码后的命令映射到底盘驱动
///
/// 驱动可能不存在（未检测到电机）；此时运动命令返回 `false`，设置命令仍然生效。
pub struct MotorController {
    drive: Option<Box<dyn TankDrive>>,
    settings: MotorSettings,
}

impl MotorController {
    pub fn new(drive: Option<Box<dyn TankDrive>>) -> Self {
        Self {
            drive,
            settings: MotorSettings::default(),
        }
    }

    pub fn has_drive(&self) -> bool {
        self.drive.is_some()
    }

    pub fn drive_name(&self) -> Option<&str> {
        self.drive.as_ref().map(|drive| drive.name())
    }

    /// 替换驱动，返回旧驱动
    pub fn replace_drive(&mut self, drive: Option<Box<dyn TankDrive>>) -> Option<Box<dyn TankDrive>> {
        std::mem::replace(&mut self.drive, drive)
    }

    pub fn settings(&self) -> MotorSettings {
        self.settings
    }

    /// 更新设置；停车距离为负时拒绝
    pub fn apply_settings(&mut self, settings: MotorSettings) -> Result<(), MotorError> {
        if settings.stop_distance < 0 {
            return Err(MotorError::InvalidStopDistance(settings.stop_distance));
        }
        self.settings = settings;
        Ok(())
    }

    /// 执行一条命令，返回回送给客户端的布尔结果
    pub fn execute(&mut self, command: &Command) -> bool {
        let result = match command {
            Command::MotorSettings(settings) => {
                let result = self.apply_settings(*settings);
                if result.is_ok() {
                    info!("Stop distance set to {}", settings.stop_distance);
                }
                result
            },
            Command::MotorSpeed(speed) => match self.drive.as_mut() {
                Some(drive) => drive.set_speed(speed.left, speed.right),
                None => {
                    warn!("No tank drive available, ignoring {:?}", command);
                    return false;
                },
            },
            Command::MotorStop => match self.drive.as_mut() {
                Some(drive) => drive.stop(),
                None => {
                    warn!("No tank drive available, ignoring {:?}", command);
                    return false;
                },
            },
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("{:?} failed: {}", command, e);
                false
            },
        }
    }

    /// 停止电机（如存在），错误只记录
    pub fn halt(&mut self) {
        if let Some(drive) = self.drive.as_mut()
            && let Err(e) = drive.stop()
        {
            error!("Failed to stop {}: {}", drive.name(), e);
        }
    }
}

impl std::fmt::Debug for MotorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorController")
            .field("drive", &self.drive_name())
            .field("settings", &self.settings)
            .finish()
    }
}
