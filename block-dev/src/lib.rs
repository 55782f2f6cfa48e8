//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 与可靠的磁盘不同，这里的块设备**不可靠**：每次读写都可能静默地损坏
//! 所操作的块，且损坏会一直保留，直到该块被再次写入。
//! 因此读写接口都会把块上**实际**存放的内容交还给调用者。

#![no_std]

extern crate alloc;

mod faulty;

use core::any::Any;

pub use self::faulty::FaultyBlockDevice;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 每块可存放的字节数
    fn block_size(&self) -> usize;

    /// 块的总数
    fn block_count(&self) -> usize;

    /// 读出块内容到 `buf`（长度为块大小）。
    ///
    /// 读取本身也可能损坏该块；`buf` 中得到的总是块上此刻存放的内容。
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 将 `data` 写入块，超出块大小的部分被截断；
    /// 若 `data` 短于块大小，块尾部保留原有内容。
    ///
    /// 写入后块上实际存放的内容回填到 `stored`（长度为块大小）。
    fn write_block(&self, block_id: usize, data: &[u8], stored: &mut [u8]);
}
