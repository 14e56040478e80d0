// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 非法的存储键
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// 制品存储特质
///
/// 输入与输出制品都以不透明的键引用。渲染器和写入器需要直接
/// 读写文件，因此实现必须能把键解析为本机路径。
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// 使用指定键保存数据到存储中
    async fn save(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// 根据键从存储中检索数据
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// 根据键删除数据
    ///
    /// 幂等：键不存在时返回 `Ok(false)`
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// 检查存储中是否存在指定键
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// 制品字节数，不存在时返回 `None`
    async fn size(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// 将键解析为本机文件路径（父目录保证存在）
    async fn prepare_path(&self, key: &str) -> Result<PathBuf, StorageError>;
}
