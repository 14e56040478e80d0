// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 执行槽持有者标识
///
/// 序列化形式为 `<pid>:<slot>:<lease>`，写入任务记录的 `owner` 列。
/// 每次领取任务都会生成新的租约，因此同一个执行槽的两次领取可以区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId {
    /// 宿主进程ID
    pub pid: u32,
    /// 进程内执行槽编号
    pub slot: usize,
    /// 本次领取的租约
    pub lease: Uuid,
}

impl OwnerId {
    /// 为当前进程的执行槽生成新的持有者标识
    pub fn new(slot: usize) -> Self {
        Self {
            pid: std::process::id(),
            slot,
            lease: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.pid, self.slot, self.lease)
    }
}

impl FromStr for OwnerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(pid), Some(slot), Some(lease)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("malformed owner token: {}", s));
        };

        Ok(Self {
            pid: pid.parse().map_err(|_| format!("invalid pid in {}", s))?,
            slot: slot.parse().map_err(|_| format!("invalid slot in {}", s))?,
            lease: lease.parse().map_err(|_| format!("invalid lease in {}", s))?,
        })
    }
}

/// 持有者存活判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// 无法判断，看门狗不得据此采取行动
    Unknown,
}

/// 持有者存活探测
pub trait LivenessProbe: Send + Sync {
    /// 判断 `owner` 列所记录的持有者是否仍然存活
    fn check(&self, owner: Option<&str>) -> Liveness;
}
