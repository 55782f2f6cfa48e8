use alloc::string::String;

use thiserror::Error;

use crate::ConfigError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("{0} is not found")]
    FileNotFound(String),

    /// 主副本区域的空闲块不足
    #[error("not enough space: need {needed} blocks, have {free} free blocks")]
    OutOfSpace { needed: usize, free: usize },

    /// 冗余与修复都无法确定文件内容。
    ///
    /// `partial` 是尽力恢复的内容，无法恢复的片段以 NUL 填充，
    /// 因此 [`is_corrupted`](crate::is_corrupted) 对它总是成立
    #[error("{name} is corrupted beyond recovery")]
    FileCorrupted { name: String, partial: String },

    /// 内容必须是不含 NUL 的 ASCII 文本
    #[error("content is not storable ASCII text")]
    InvalidContent,

    #[error("invalid parameter: {0}")]
    InvalidConfig(#[from] ConfigError),
}
