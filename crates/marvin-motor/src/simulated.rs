//! 内存模拟后端

use crate::{MotorError, TankDrive};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// 模拟底盘收到的一次调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveEvent {
    Speed { left: i32, right: i32 },
    Stop,
}

#[derive(Debug, Default)]
struct SimState {
    events: Vec<DriveEvent>,
}

/// 模拟底盘
///
/// 所有调用记录在共享状态中；驱动交给 [`MotorController`](crate::MotorController) 之后，
/// 仍可通过 [`SimulatedHandle`] 观察。
#[derive(Debug, Default)]
pub struct SimulatedTank {
    max_speed: Option<i32>,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTank {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 ev3 后端的方式截断速度
    pub fn with_max_speed(mut self, max_speed: i32) -> Self {
        self.max_speed = Some(max_speed.abs());
        self
    }

    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn record(&self, event: DriveEvent) {
        debug!("Simulated drive: {:?}", event);
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .push(event);
    }
}

impl TankDrive for SimulatedTank {
    fn set_speed(&mut self, left: i32, right: i32) -> Result<(), MotorError> {
        let (left, right) = match self.max_speed {
            Some(max) => (left.clamp(-max, max), right.clamp(-max, max)),
            None => (left, right),
        };
        self.record(DriveEvent::Speed { left, right });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MotorError> {
        self.record(DriveEvent::Stop);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// 模拟底盘状态的只读视图
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    pub fn events(&self) -> Vec<DriveEvent> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    /// 最近一次设定且未被停止覆盖的速度
    pub fn current_speed(&self) -> Option<(i32, i32)> {
        match self.events().last() {
            Some(DriveEvent::Speed { left, right }) => Some((*left, *right)),
            _ => None,
        }
    }
}
