// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::services::liveness::{Liveness, LivenessProbe, OwnerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;
use uuid::Uuid;

/// 进程内执行槽租约表
///
/// 执行槽在持有任务期间持有 [`LeaseGuard`]；守卫被释放（正常结束、
/// panic 或任务被中止）时租约随之消失。
#[derive(Debug, Clone, Default)]
pub struct SlotRegistry {
    leases: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一次领取，返回租约守卫
    pub fn register(&self, owner: OwnerId) -> LeaseGuard {
        self.leases.lock().insert(owner.lease, owner.slot);
        LeaseGuard {
            registry: self.clone(),
            owner,
        }
    }

    pub fn is_registered(&self, lease: &Uuid) -> bool {
        self.leases.lock().contains_key(lease)
    }

    /// 当前持有任务的执行槽数量
    pub fn active(&self) -> usize {
        self.leases.lock().len()
    }
}

/// 租约守卫，析构时注销租约
#[derive(Debug)]
pub struct LeaseGuard {
    registry: SlotRegistry,
    owner: OwnerId,
}

impl LeaseGuard {
    /// 写入 `owner` 列的令牌
    pub fn token(&self) -> String {
        self.owner.to_string()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.registry.leases.lock().remove(&self.owner.lease);
    }
}

/// 基于租约表与操作系统进程表的存活探测
pub struct ProcessLiveness {
    registry: SlotRegistry,
    own_pid: u32,
    system: Mutex<System>,
}

impl ProcessLiveness {
    pub fn new(registry: SlotRegistry) -> Self {
        Self {
            registry,
            own_pid: std::process::id(),
            system: Mutex::new(System::new()),
        }
    }

    fn process_exists(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }
}

impl LivenessProbe for ProcessLiveness {
    fn check(&self, owner: Option<&str>) -> Liveness {
        let Some(raw) = owner else {
            return Liveness::Unknown;
        };

        let owner: OwnerId = match raw.parse() {
            Ok(owner) => owner,
            Err(e) => {
                warn!("Cannot judge liveness of owner {:?}: {}", raw, e);
                return Liveness::Unknown;
            }
        };

        if owner.pid == self.own_pid {
            // 本进程内的执行槽：以租约是否仍在为准
            if self.registry.is_registered(&owner.lease) {
                Liveness::Alive
            } else {
                Liveness::Dead
            }
        } else if self.process_exists(owner.pid) {
            Liveness::Alive
        } else {
            Liveness::Dead
        }
    }
}
