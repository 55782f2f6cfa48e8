//! 文件存储的参数

use enumflags2::{bitflags, BitFlags};
use thiserror::Error;

/// 块尾的哨兵字节。损坏只会产生小写字母，所以合法的块一定以它结尾
pub const SENTINEL: u8 = 0;

pub const DEFAULT_BLOCK_COUNT: usize = 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 8;
/// 单个块写入的最多尝试次数
pub const DEFAULT_WRITE_ATTEMPTS: usize = 5;

/// 修复策略的各个开关
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// 读取时重写与投票结果不一致的副本
    HealOnRead = 0b001,
    /// 读到无法恢复的文件时顺带删除它
    DropCorrupted = 0b010,
    /// 删除文件或覆盖写入时清空旧内容占用的块
    ScrubOnDelete = 0b100,
}

pub type RepairPolicy = BitFlags<Repair>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// 块设备的块数
    pub block_count: usize,
    /// 每块的字节数，其中一个字节留给哨兵
    pub block_size: usize,
    /// 每次读写损坏所操作块的概率
    pub corruption_rate: f64,
    /// 每个片段保存的份数（含主副本）
    pub replicas: usize,
    pub max_write_attempts: usize,
    pub policy: RepairPolicy,
    /// 块设备随机源的种子，为空时使用设备的默认种子
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("`replicas` must be a positive integer")]
    NoReplicas,
    #[error("`block_count` must be a positive integer")]
    NoBlocks,
    #[error("`replicas` must be <= `block_count`: {replicas} <= {block_count}")]
    TooManyReplicas { replicas: usize, block_count: usize },
    #[error("`block_size` must be at least 2 bytes: {0} >= 2")]
    BlockTooSmall(usize),
    #[error("`corruption_rate` must lie in [0, 1]: {0}")]
    CorruptionRate(f64),
    #[error("`max_write_attempts` must be a positive integer")]
    NoWriteAttempts,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_count: DEFAULT_BLOCK_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
            corruption_rate: 0.0,
            replicas: 1,
            max_write_attempts: DEFAULT_WRITE_ATTEMPTS,
            policy: Repair::HealOnRead.into(),
            seed: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replicas == 0 {
            return Err(ConfigError::NoReplicas);
        }
        if self.block_count == 0 {
            return Err(ConfigError::NoBlocks);
        }
        if self.replicas > self.block_count {
            return Err(ConfigError::TooManyReplicas {
                replicas: self.replicas,
                block_count: self.block_count,
            });
        }
        if self.block_size < 2 {
            return Err(ConfigError::BlockTooSmall(self.block_size));
        }
        if !(0.0..=1.0).contains(&self.corruption_rate) {
            return Err(ConfigError::CorruptionRate(self.corruption_rate));
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::NoWriteAttempts);
        }

        Ok(())
    }

    /// 每块实际能放下的内容字节数
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.block_size - 1
    }

    /// 相邻副本区域的间距，同时也是主副本区域的块数。
    /// 块数不能被副本数整除时，末尾多出的块不会被使用
    #[inline]
    pub fn stride(&self) -> usize {
        self.block_count / self.replicas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = StoreConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(config.policy.contains(Repair::HealOnRead));
        assert!(!config.policy.contains(Repair::DropCorrupted));
    }

    #[test]
    fn rejects_bad_parameters() {
        let base = StoreConfig::default();
        let cases = [
            (StoreConfig { replicas: 0, ..base }, ConfigError::NoReplicas),
            (StoreConfig { block_count: 0, ..base }, ConfigError::NoBlocks),
            (
                StoreConfig {
                    block_count: 2,
                    replicas: 3,
                    ..base
                },
                ConfigError::TooManyReplicas {
                    replicas: 3,
                    block_count: 2,
                },
            ),
            (StoreConfig { block_size: 1, ..base }, ConfigError::BlockTooSmall(1)),
            (
                StoreConfig {
                    corruption_rate: 1.5,
                    ..base
                },
                ConfigError::CorruptionRate(1.5),
            ),
            (
                StoreConfig {
                    max_write_attempts: 0,
                    ..base
                },
                ConfigError::NoWriteAttempts,
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn stride_floors() {
        let config = StoreConfig {
            block_count: 100,
            replicas: 3,
            ..Default::default()
        };
        assert_eq!(config.stride(), 33);
        assert_eq!(config.payload_size(), 7);
    }
}
