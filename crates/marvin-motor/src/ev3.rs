//! ev3dev sysfs 后端
//!
//! ev3dev 内核驱动把每个大/中型电机暴露为 `/sys/class/tacho-motor/motorN/`，
//! 通过读写其中的文本属性控制：
//!
//! | 属性 | 方向 | 用途 |
//! |------|------|------|
//! | `address` | 读 | 端口名，如 `ev3-ports:outA` |
//! | `max_speed` | 读 | `speed_sp` 的绝对值上限 |
//! | `speed_sp` | 写 | 目标速度 |
//! | `command` | 写 | `run-forever` / `stop` |
//!
//! `motorN` 的编号随插拔顺序变化，因此按 `address` 查找端口。

use crate::{MotorError, TankDrive};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// ev3dev 的 sysfs 类目录
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class";

const TACHO_MOTOR_CLASS: &str = "tacho-motor";

fn read_attr(path: &Path) -> Result<String, MotorError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| MotorError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn write_attr(path: &Path, value: &str) -> Result<(), MotorError> {
    trace!("{} <- {}", path.display(), value);
    fs::write(path, value).map_err(|source| MotorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// 端口名匹配：`outA` 匹配 `outA` 与 `ev3-ports:outA`
fn port_matches(address: &str, port: &str) -> bool {
    address == port || address.rsplit(':').next() == Some(port)
}

/// 单个 tacho 电机
#[derive(Debug, Clone)]
pub struct TachoMotor {
    path: PathBuf,
    address: String,
    max_speed: i32,
}

impl TachoMotor {
    /// 打开一个 `motorN` 目录，读取端口名与速度上限
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MotorError> {
        let path = path.into();
        let address = read_attr(&path.join("address"))?;

        let max_speed_path = path.join("max_speed");
        let content = read_attr(&max_speed_path)?;
        let max_speed = content
            .parse::<i32>()
            .ok()
            .filter(|v| *v >= 0)
            .ok_or(MotorError::InvalidAttribute {
                path: max_speed_path,
                content,
            })?;

        Ok(Self {
            path,
            address,
            max_speed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn max_speed(&self) -> i32 {
        self.max_speed
    }

    /// 截断到 `[-max_speed, max_speed]`
    pub fn clamp_speed(&self, speed: i32) -> i32 {
        speed.clamp(-self.max_speed, self.max_speed)
    }

    pub fn set_speed_sp(&self, speed: i32) -> Result<(), MotorError> {
        write_attr(&self.path.join("speed_sp"), &self.clamp_speed(speed).to_string())
    }

    pub fn command(&self, command: &str) -> Result<(), MotorError> {
        write_attr(&self.path.join("command"), command)
    }
}

/// 左右两个 tacho 电机组成的履带底盘
#[derive(Debug, Clone)]
pub struct Ev3TankDrive {
    left: TachoMotor,
    right: TachoMotor,
}

impl Ev3TankDrive {
    /// 在 `root/tacho-motor/` 下查找左右端口对应的电机
    ///
    /// 任一端口没有电机时返回 `Ok(None)`；只有 sysfs 读取失败才是错误。
    pub fn find(root: &Path, left_port: &str, right_port: &str) -> Result<Option<Self>, MotorError> {
        let class_dir = root.join(TACHO_MOTOR_CLASS);
        if !class_dir.is_dir() {
            debug!("{} not present", class_dir.display());
            return Ok(None);
        }

        let entries = fs::read_dir(&class_dir).map_err(|source| MotorError::Io {
            path: class_dir.clone(),
            source,
        })?;

        let mut left = None;
        let mut right = None;

        for entry in entries {
            let entry = entry.map_err(|source| MotorError::Io {
                path: class_dir.clone(),
                source,
            })?;
            let path = entry.path();

            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && !name.starts_with("motor")
            {
                continue;
            }

            let motor = TachoMotor::open(&path)?;
            debug!("Found tacho motor {} at {}", motor.address(), path.display());

            if left.is_none() && port_matches(motor.address(), left_port) {
                left = Some(motor);
            } else if right.is_none() && port_matches(motor.address(), right_port) {
                right = Some(motor);
            }
        }

        match (left, right) {
            (Some(left), Some(right)) => {
                info!(
                    "Tank drive: left {} (max {}), right {} (max {})",
                    left.address(),
                    left.max_speed(),
                    right.address(),
                    right.max_speed()
                );
                Ok(Some(Self { left, right }))
            },
            _ => Ok(None),
        }
    }

    pub fn left(&self) -> &TachoMotor {
        &self.left
    }

    pub fn right(&self) -> &TachoMotor {
        &self.right
    }
}

impl TankDrive for Ev3TankDrive {
    fn set_speed(&mut self, left: i32, right: i32) -> Result<(), MotorError> {
        self.left.set_speed_sp(left)?;
        self.right.set_speed_sp(right)?;
        self.left.command("run-forever")?;
        self.right.command("run-forever")
    }

    fn stop(&mut self) -> Result<(), MotorError> {
        self.left.command("stop")?;
        self.right.command("stop")
    }

    fn name(&self) -> &str {
        "ev3"
    }
}
