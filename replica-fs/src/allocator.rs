//! # 块分配层
//!
//! 块设备被均分为 `replicas` 个区域，每个区域 `stride` 块：
//! - 第 0 个区域存放主副本，由位图记录哪些块已被占用；
//! - 第 r 个区域存放第 r 份副本，主副本块 `i` 的第 r 份副本位于 `i + r * stride`。
//!
//! 副本区域与主副本区域一一对应，所以只需要管理主副本区域的分配情况。

use alloc::vec;
use alloc::vec::Vec;

use crate::{Error, Result};

/// 位图中一组的位数
const GROUP_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// 主副本区域的位图，置位表示已占用
    bitmap: Vec<u64>,
    /// 主副本区域的块数，也是相邻副本区域的间距
    stride: usize,
    replicas: usize,
    /// 空闲块个数
    free: usize,
}

/// 主副本区域内的块编号
struct BlockId(usize);

impl BlockAllocator {
    pub fn new(block_count: usize, replicas: usize) -> Self {
        let stride = block_count / replicas;
        let mut bitmap = vec![0; stride.div_ceil(GROUP_BITS)];

        // 最后一组里超出区域的位永远视为已占用
        let tail = stride % GROUP_BITS;
        if let (Some(last), true) = (bitmap.last_mut(), tail != 0) {
            *last = u64::MAX << tail;
        }

        Self {
            bitmap,
            stride,
            replicas,
            free: stride,
        }
    }

    /// 主副本区域的总块数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    #[inline]
    pub fn free_blocks(&self) -> usize {
        self.free
    }

    pub fn is_reserved(&self, block_id: usize) -> bool {
        if block_id >= self.stride {
            return false;
        }
        let (group_index, ingroup_index) = BlockId(block_id).decode();
        self.bitmap[group_index] & (1 << ingroup_index) != 0
    }

    /// 为 `count` 个片段分配主副本块，按编号升序返回。
    /// 要么全部分配成功，要么什么都不分配
    pub fn reserve(&mut self, count: usize) -> Result<Vec<usize>> {
        if count > self.free {
            return Err(Error::OutOfSpace {
                needed: count,
                free: self.free,
            });
        }

        let mut blocks = Vec::with_capacity(count);
        while blocks.len() < count {
            match self.alloc() {
                Some(block_id) => blocks.push(block_id),
                None => {
                    // 空闲计数与位图不一致，退还已分配的块
                    log::warn!("bitmap exhausted with {} blocks counted free", self.free);
                    self.release(&blocks);
                    return Err(Error::OutOfSpace {
                        needed: count,
                        free: self.free,
                    });
                }
            }
        }

        Ok(blocks)
    }

    /// 归还主副本块，重复归还的块会被忽略
    pub fn release(&mut self, blocks: &[usize]) {
        for &block_id in blocks {
            if !self.is_reserved(block_id) {
                log::warn!("block {block_id} released while not reserved");
                continue;
            }
            let (group_index, ingroup_index) = BlockId(block_id).decode();
            self.bitmap[group_index] &= !(1 << ingroup_index);
            self.free += 1;
        }
    }

    /// 主副本块 `primary` 的第 `replica` 份副本的位置，第 0 份即主副本
    #[inline]
    pub fn replica_index(&self, primary: usize, replica: usize) -> usize {
        replica_index(primary, replica, self.stride)
    }

    /// 主副本块及其全部副本的位置
    #[inline]
    pub fn replica_indices(&self, primary: usize) -> impl Iterator<Item = usize> {
        block_group(primary, self.stride, self.replicas)
    }

    /// 在主副本区域内寻找编号最小的空闲块
    fn alloc(&mut self) -> Option<usize> {
        let (group_index, ingroup_index) =
            self.bitmap
                .iter()
                .enumerate()
                .find_map(|(group_index, &bits)| {
                    (bits != u64::MAX).then_some((group_index, bits.trailing_ones() as usize))
                })?;

        self.bitmap[group_index] |= 1 << ingroup_index;
        self.free -= 1;
        Some(BlockId::encode(group_index, ingroup_index))
    }
}

#[inline]
pub(crate) fn replica_index(primary: usize, replica: usize, stride: usize) -> usize {
    primary + replica * stride
}

pub(crate) fn block_group(
    primary: usize,
    stride: usize,
    replicas: usize,
) -> impl Iterator<Item = usize> {
    (0..replicas).map(move |replica| replica_index(primary, replica, stride))
}

impl BlockId {
    #[inline]
    fn encode(group_index: usize, ingroup_index: usize) -> usize {
        group_index * GROUP_BITS + ingroup_index
    }

    #[inline]
    fn decode(self) -> (usize, usize) {
        (self.0 / GROUP_BITS, self.0 % GROUP_BITS)
    }
}
