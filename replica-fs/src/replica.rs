//! # 副本管理层
//!
//! 每个片段写入主副本块以及同一位置上的各个副本块。
//!
//! - 写：每份独立写入，并与设备回报的实际内容比对，不一致就重写，
//!   最多尝试 `max_write_attempts` 次。只要有一份写对，片段就算写入成功。
//! - 读：每份各读一次（读本身也会损坏块，不做多余的重读），
//!   先用哨兵排除损坏的读数，再在剩余读数中投票。
//!   与投票结果不一致的块通过写路径重写，下次读取就不必再依赖其它副本。

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use block_dev::BlockDevice;

use crate::allocator::block_group;
use crate::{ContentCodec, SENTINEL};

/// 片段的所有副本都无法确认，只在本 crate 内部流转
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkUnrecoverable {
    pub primary: usize,
}

/// 读到的片段
#[derive(Debug)]
pub(crate) struct ChunkRead {
    pub payload: Vec<u8>,
    /// 本次读取中被重写修复的块数
    pub repaired: usize,
}

/// 修复事件计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    /// 写入被损坏后的重写次数
    pub write_retries: usize,
    /// 用尽尝试次数仍未写对的块数
    pub unverified_writes: usize,
    /// 读取时修复的块数
    pub healed_blocks: usize,
    /// 无法恢复的片段数（读写合计）
    pub unrecoverable_chunks: usize,
}

pub(crate) struct ReplicationManager {
    device: Arc<dyn BlockDevice>,
    codec: ContentCodec,
    stride: usize,
    replicas: usize,
    max_write_attempts: usize,
    stats: RepairStats,
}

/// 投票时的一组相同读数
struct Ballot<'a> {
    value: &'a [u8],
    votes: usize,
    /// 主副本是否投给了这组
    primary: bool,
}

impl ReplicationManager {
    pub fn new(
        device: Arc<dyn BlockDevice>,
        stride: usize,
        replicas: usize,
        max_write_attempts: usize,
    ) -> Self {
        let codec = ContentCodec::new(device.block_size());
        Self {
            device,
            codec,
            stride,
            replicas,
            max_write_attempts,
            stats: RepairStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> RepairStats {
        self.stats
    }

    /// 把整块内容 `block` 写入主副本块 `primary` 及其全部副本，返回写对的份数
    pub fn write_chunk(
        &mut self,
        primary: usize,
        block: &[u8],
    ) -> Result<usize, ChunkUnrecoverable> {
        let verified = block_group(primary, self.stride, self.replicas)
            .filter(|&block_id| self.write_block(block_id, block))
            .count();

        if verified == 0 {
            log::warn!("chunk at block {primary}: no copy could be written");
            self.stats.unrecoverable_chunks += 1;
            return Err(ChunkUnrecoverable { primary });
        }

        log::trace!(
            "chunk at block {primary}: {verified}/{} copies verified",
            self.replicas
        );
        Ok(verified)
    }

    /// 读取主副本块 `primary` 上内容长为 `expected_len` 的片段
    pub fn read_chunk(
        &mut self,
        primary: usize,
        expected_len: usize,
        heal: bool,
    ) -> Result<ChunkRead, ChunkUnrecoverable> {
        let copies: Vec<usize> = block_group(primary, self.stride, self.replicas).collect();
        let readings: Vec<Vec<u8>> = copies
            .iter()
            .map(|&block_id| {
                let mut buf = vec![0; self.codec.block_size()];
                self.device.read_block(block_id, &mut buf);
                buf
            })
            .collect();

        let Some(winner) = self.elect(&readings, expected_len).map(<[u8]>::to_vec) else {
            log::warn!("chunk at block {primary}: no authoritative copy");
            self.stats.unrecoverable_chunks += 1;
            return Err(ChunkUnrecoverable { primary });
        };

        let mut repaired = 0;
        if heal {
            for (&block_id, reading) in copies.iter().zip(&readings) {
                if *reading == winner {
                    continue;
                }
                log::debug!("chunk at block {primary}: healing copy at block {block_id}");
                if self.write_block(block_id, &winner) {
                    repaired += 1;
                }
            }
            self.stats.healed_blocks += repaired;
        }

        let payload = winner[..expected_len].to_vec();
        Ok(ChunkRead { payload, repaired })
    }

    /// 把片段的所有副本清空为哨兵，不做校验
    pub fn scrub(&self, primary: usize) {
        let nulls = vec![SENTINEL; self.codec.block_size()];
        let mut stored = vec![0; self.codec.block_size()];
        for block_id in block_group(primary, self.stride, self.replicas) {
            self.device.write_block(block_id, &nulls, &mut stored);
        }
    }

    /// 写入单个块直到设备回报的内容与期望一致，返回是否写对
    fn write_block(&mut self, block_id: usize, block: &[u8]) -> bool {
        let mut stored = vec![0; self.codec.block_size()];
        for attempt in 1..=self.max_write_attempts {
            self.device.write_block(block_id, block, &mut stored);
            if stored == block {
                return true;
            }

            log::debug!("block {block_id}: write attempt {attempt} corrupted");
            if attempt < self.max_write_attempts {
                self.stats.write_retries += 1;
            }
        }

        log::warn!(
            "block {block_id}: unverified after {} attempts",
            self.max_write_attempts
        );
        self.stats.unverified_writes += 1;
        false
    }

    /// 在通过哨兵检查的读数中选出权威值。
    ///
    /// 主副本与至少一个副本一致时直接取主副本的读数，不论其它组票数多少；
    /// 否则票数唯一最多的读数胜出，最多票数并列则无法裁决
    fn elect<'a>(&self, readings: &'a [Vec<u8>], expected_len: usize) -> Option<&'a [u8]> {
        let mut ballots: Vec<Ballot<'a>> = Vec::new();
        for (copy, reading) in readings.iter().enumerate() {
            if !self.codec.check(reading, expected_len) {
                continue;
            }
            match ballots.iter_mut().find(|ballot| ballot.value == reading.as_slice()) {
                Some(ballot) => {
                    ballot.votes += 1;
                    ballot.primary |= copy == 0;
                }
                None => ballots.push(Ballot {
                    value: reading,
                    votes: 1,
                    primary: copy == 0,
                }),
            }
        }

        if let Some(ballot) = ballots
            .iter()
            .find(|ballot| ballot.primary && ballot.votes >= 2)
        {
            return Some(ballot.value);
        }

        let top = ballots.iter().map(|ballot| ballot.votes).max()?;
        let mut leaders = ballots.iter().filter(|ballot| ballot.votes == top);
        let first = leaders.next()?;
        leaders.next().is_none().then_some(first.value)
    }
}
