#![no_std]

extern crate alloc;

/* replica-fs 的整体架构，自上而下 */

// 文件存储层：按文件名存取文件，维护内存中的文件索引
mod store;

// 副本管理层：冗余写入、写后校验、读时投票与自愈
mod replica;

// 内容编解码层：把文本切成块大小的片段，并附加哨兵
mod codec;

// 块分配层：划分主副本区域，记录空闲块
mod allocator;

mod config;
mod error;

pub use block_dev::{BlockDevice, FaultyBlockDevice};

pub use self::{
    allocator::BlockAllocator,
    codec::{is_corrupted, ContentCodec},
    config::{
        ConfigError, Repair, RepairPolicy, StoreConfig, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE,
        DEFAULT_WRITE_ATTEMPTS, SENTINEL,
    },
    error::{Error, Result},
    replica::RepairStats,
    store::{FileRecord, FileStore},
};
