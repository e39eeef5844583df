//! 传输守护进程的应用逻辑
//!
//! - [`CommandDispatcher`]: 接收端回调，把命令交给电机控制器
//! - [`TransmissionDaemon`]: 生命周期钩子，`on_init` 检测电机并绑定监听，`on_step` 执行一次 poll

use crate::config::{Config, ConfigError, MotorBackend};
use marvin_daemon::DaemonApp;
use marvin_motor::{Ev3TankDrive, MotorController, MotorError, SimulatedTank, TankDrive};
use marvin_net::{PacketReceiver, ReceiverError, ReceiverHandler};
use marvin_protocol::Command;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 有连接的帧未收齐时，下一次 poll 前的等待
const DEFERRED_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    #[error("Motor error: {0}")]
    Motor(#[from] MotorError),

    #[error("Receiver not initialized")]
    NotInitialized,
}

/// 接收端回调：记录连接变化，执行电机命令
#[derive(Debug)]
pub struct CommandDispatcher {
    controller: MotorController,
}

impl CommandDispatcher {
    pub fn new(controller: MotorController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &MotorController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut MotorController {
        &mut self.controller
    }
}

impl ReceiverHandler for CommandDispatcher {
    fn on_client_connected(&mut self, peer: SocketAddr) {
        info!("Client connected: {}", peer);
    }

    fn on_client_disconnected(&mut self, peer: SocketAddr) {
        info!("Client disconnected: {}", peer);
    }

    fn on_command(&mut self, peer: SocketAddr, command: Command) -> bool {
        let result = self.controller.execute(&command);
        debug!("{} -> {:?} = {}", peer, command, result);
        result
    }
}

/// 按配置构造底盘驱动；未检测到电机时返回 `None`
fn open_drive(config: &Config) -> Result<Option<Box<dyn TankDrive>>, AppError> {
    let motor = &config.motor;
    match motor.backend {
        MotorBackend::Ev3 => {
            let root = Path::new(&motor.sysfs_root);
            match Ev3TankDrive::find(root, &motor.left_port, &motor.right_port)? {
                Some(drive) => Ok(Some(Box::new(drive))),
                None => {
                    warn!(
                        "No tank motors on {}/{} under {}, motor commands will fail",
                        motor.left_port,
                        motor.right_port,
                        root.display()
                    );
                    Ok(None)
                },
            }
        },
        MotorBackend::Simulated => Ok(Some(Box::new(SimulatedTank::new()))),
        MotorBackend::Disabled => Ok(None),
    }
}

/// 传输守护进程
pub struct TransmissionDaemon {
    config: Config,
    receiver: Option<PacketReceiver<CommandDispatcher>>,
}

impl TransmissionDaemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            receiver: None,
        }
    }

    pub fn receiver(&self) -> Option<&PacketReceiver<CommandDispatcher>> {
        self.receiver.as_ref()
    }

    /// 停止电机并释放监听套接字
    fn shutdown_receiver(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.handler_mut().controller_mut().halt();
            info!(
                "Closing listener {} ({} connections)",
                receiver.local_addr(),
                receiver.connection_count()
            );
        }
    }
}

impl DaemonApp for TransmissionDaemon {
    type Error = AppError;

    fn on_init(&mut self) -> Result<(), AppError> {
        // 重新初始化时先释放旧端口
        self.shutdown_receiver();

        let controller = MotorController::new(open_drive(&self.config)?);
        let receiver_config = self.config.server.receiver_config()?;
        let receiver = PacketReceiver::bind(&receiver_config, CommandDispatcher::new(controller))?;

        info!(
            "Transmission daemon ready on {} (motor backend: {})",
            receiver.local_addr(),
            receiver.handler().controller().drive_name().unwrap_or("none")
        );
        self.receiver = Some(receiver);
        Ok(())
    }

    fn on_step(&mut self) -> Result<(), AppError> {
        let receiver = self.receiver.as_mut().ok_or(AppError::NotInitialized)?;
        let stats = receiver.poll_once()?;
        if stats.deferred > 0 {
            std::thread::sleep(DEFERRED_BACKOFF);
        }
        Ok(())
    }

    fn on_restart(&mut self) -> Result<(), AppError> {
        info!("Restarting transmission daemon");
        self.on_init()
    }

    fn on_exit(&mut self) {
        info!("Stopping transmission daemon");
        self.shutdown_receiver();
    }
}

impl Drop for TransmissionDaemon {
    fn drop(&mut self) {
        self.shutdown_receiver();
    }
}
