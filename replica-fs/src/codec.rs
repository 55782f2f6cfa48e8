//! # 内容编解码层
//!
//! 文本按 `block_size - 1` 字节切片，每片尾部用 [`SENTINEL`] 填满整块。
//! 块设备损坏时只会写入小写字母，因此一个块的内容满足
//!
//! ```text
//! [ 非 NUL 的 ASCII * expected_len | NUL * (block_size - expected_len) ]
//! ```
//!
//! 才被认为是本系统完整写入的片段，否则视为损坏。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::{Error, Result, SENTINEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentCodec {
    block_size: usize,
}

impl ContentCodec {
    #[inline]
    pub fn new(block_size: usize) -> Self {
        debug_assert!(block_size >= 2);
        Self { block_size }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 每块实际能放下的内容字节数，另一个字节留给哨兵
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.block_size - 1
    }

    /// 存放 `len` 字节内容所需的片段数，空内容不需要片段
    #[inline]
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.payload_size())
    }

    /// 总长为 `total_len` 的内容中，第 `index` 个片段的内容长度
    #[inline]
    pub fn expected_len(&self, index: usize, total_len: usize) -> usize {
        total_len
            .saturating_sub(index * self.payload_size())
            .min(self.payload_size())
    }

    /// 把文本切成整块大小的片段
    pub fn encode(&self, text: &str) -> Result<Vec<Vec<u8>>> {
        if is_corrupted(text) {
            return Err(Error::InvalidContent);
        }

        Ok(text
            .as_bytes()
            .chunks(self.payload_size())
            .map(|chunk| {
                let mut block = vec![SENTINEL; self.block_size];
                block[..chunk.len()].copy_from_slice(chunk);
                block
            })
            .collect())
    }

    /// 检查读到的块是否是长度为 `expected_len` 的完整片段
    pub fn check(&self, block: &[u8], expected_len: usize) -> bool {
        if block.len() != self.block_size || expected_len > self.payload_size() {
            return false;
        }

        let (payload, padding) = block.split_at(expected_len);
        payload.iter().all(|&b| b != SENTINEL && b.is_ascii())
            && padding.iter().all(|&b| b == SENTINEL)
    }

    /// 拼接各片段的内容，截断到原始长度
    pub fn decode<P: AsRef<[u8]>>(&self, payloads: &[P], original_len: usize) -> String {
        payloads
            .iter()
            .flat_map(|payload| payload.as_ref().iter())
            .take(original_len)
            .map(|&b| char::from(b))
            .collect()
    }
}

/// 粗略判断一段内容是否已损坏：含有哨兵字节或非 ASCII 字符。
///
/// 读取失败时返回的残缺内容以 NUL 填充无法恢复的片段，所以总能被识别
pub fn is_corrupted(content: &str) -> bool {
    content.bytes().any(|b| b == SENTINEL || !b.is_ascii())
}
