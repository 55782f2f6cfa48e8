//! 会损坏数据的内存块设备
//!
//! 每次读写都以概率 `corruption_rate` 把所操作的块整体替换为随机的小写字母，
//! 损坏是持久的。随机源由构造者注入，测试可以固定种子得到确定的行为。

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use spin::Mutex;

use crate::BlockDevice;

/// 未指定种子时使用的默认种子
const DEFAULT_SEED: u64 = 0x5EED_B10C_DE71_CE00;

pub struct FaultyBlockDevice<R = StdRng> {
    block_size: usize,
    block_count: usize,
    inner: Mutex<Inner<R>>,
}

struct Inner<R> {
    /// 所有块首尾相接存放
    data: Vec<u8>,
    rng: R,
    corruption_rate: f64,
}

impl FaultyBlockDevice {
    pub fn new(block_count: usize, block_size: usize, corruption_rate: f64) -> Self {
        Self::with_seed(block_count, block_size, corruption_rate, DEFAULT_SEED)
    }

    pub fn with_seed(
        block_count: usize,
        block_size: usize,
        corruption_rate: f64,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            block_count,
            block_size,
            corruption_rate,
            StdRng::seed_from_u64(seed),
        )
    }
}

impl<R: RngCore> FaultyBlockDevice<R> {
    /// 以给定的随机源构造设备，新设备的每个块都是随机内容
    pub fn with_rng(
        block_count: usize,
        block_size: usize,
        corruption_rate: f64,
        mut rng: R,
    ) -> Self {
        assert!(block_size > 0, "block size must be positive");
        assert!(
            (0.0..=1.0).contains(&corruption_rate),
            "corruption rate out of [0, 1]: {corruption_rate}"
        );

        let mut data = vec![0; block_count * block_size];
        fill_random(&mut rng, &mut data);

        Self {
            block_size,
            block_count,
            inner: Mutex::new(Inner {
                data,
                rng,
                corruption_rate,
            }),
        }
    }

    #[inline]
    pub fn corruption_rate(&self) -> f64 {
        self.inner.lock().corruption_rate
    }

    pub fn set_corruption_rate(&self, corruption_rate: f64) {
        assert!(
            (0.0..=1.0).contains(&corruption_rate),
            "corruption rate out of [0, 1]: {corruption_rate}"
        );
        self.inner.lock().corruption_rate = corruption_rate;
    }

    /// 强制损坏一个块，不消耗读写机会
    pub fn corrupt_block(&self, block_id: usize) {
        let mut inner = self.inner.lock();
        let Inner { data, rng, .. } = &mut *inner;
        fill_random(rng, self.block_mut(data, block_id));
        log::trace!("block {block_id} corrupted by force");
    }

    /// 查看块内容，不会触发损坏
    pub fn peek(&self, block_id: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        inner.data[self.range(block_id)].to_vec()
    }
}

impl<R> FaultyBlockDevice<R> {
    #[inline]
    fn range(&self, block_id: usize) -> core::ops::Range<usize> {
        assert!(
            block_id < self.block_count,
            "block {block_id} out of range 0..{}",
            self.block_count
        );
        let start = block_id * self.block_size;
        start..start + self.block_size
    }

    #[inline]
    fn block_mut<'a>(&self, data: &'a mut [u8], block_id: usize) -> &'a mut [u8] {
        &mut data[self.range(block_id)]
    }
}

impl<R: RngCore + Send + 'static> BlockDevice for FaultyBlockDevice<R> {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");

        let mut inner = self.inner.lock();
        let Inner {
            data,
            rng,
            corruption_rate,
        } = &mut *inner;
        let block = self.block_mut(data, block_id);
        if roll(rng, *corruption_rate, block) {
            log::trace!("block {block_id} corrupted on read");
        }
        buf.copy_from_slice(block);
    }

    fn write_block(&self, block_id: usize, data: &[u8], stored: &mut [u8]) {
        assert_eq!(stored.len(), self.block_size, "not a complete block!");

        let mut inner = self.inner.lock();
        let Inner {
            data: blocks,
            rng,
            corruption_rate,
        } = &mut *inner;
        let block = self.block_mut(blocks, block_id);
        // 超出块大小的部分截断，不足的部分保留旧内容
        let len = data.len().min(self.block_size);
        block[..len].copy_from_slice(&data[..len]);
        if roll(rng, *corruption_rate, block) {
            log::trace!("block {block_id} corrupted on write");
        }
        stored.copy_from_slice(block);
    }
}

impl<R> fmt::Debug for FaultyBlockDevice<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyBlockDevice")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("corruption_rate", &self.inner.lock().corruption_rate)
            .finish_non_exhaustive()
    }
}

/// 掷骰子决定是否损坏该块，返回是否发生了损坏
fn roll(rng: &mut impl RngCore, corruption_rate: f64, block: &mut [u8]) -> bool {
    let corrupted = rng.r#gen::<f64>() < corruption_rate;
    if corrupted {
        fill_random(rng, block);
    }
    corrupted
}

/// 损坏的内容只由小写字母组成，不会出现 NUL
fn fill_random(rng: &mut impl RngCore, buf: &mut [u8]) {
    for byte in buf {
        *byte = rng.gen_range(b'a'..=b'z');
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn read(dev: &impl BlockDevice, block_id: usize) -> Vec<u8> {
        let mut buf = vec![0; dev.block_size()];
        dev.read_block(block_id, &mut buf);
        buf
    }

    fn write(dev: &impl BlockDevice, block_id: usize, data: &[u8]) -> Vec<u8> {
        let mut stored = vec![0; dev.block_size()];
        dev.write_block(block_id, data, &mut stored);
        stored
    }

    #[test]
    fn write_then_read() {
        let dev = FaultyBlockDevice::new(32, 8, 0.0);
        assert_eq!(write(&dev, 0, b"1234abcd"), b"1234abcd");
        assert_eq!(read(&dev, 0), b"1234abcd");
    }

    #[test]
    fn fresh_blocks_are_full() {
        let dev = FaultyBlockDevice::new(32, 8, 0.0);
        let block = read(&dev, 1);
        assert_eq!(block.len(), 8);
        assert!(block.iter().all(u8::is_ascii_lowercase));
    }

    #[test]
    fn long_write_is_truncated() {
        let dev = FaultyBlockDevice::new(4, 8, 0.0);
        assert_eq!(write(&dev, 0, b"123456789"), b"12345678");
    }

    #[test]
    fn short_write_keeps_old_tail() {
        let dev = FaultyBlockDevice::new(4, 8, 0.0);
        write(&dev, 0, b"12345678");
        assert_eq!(write(&dev, 0, b"abcd"), b"abcd5678");
    }

    #[test]
    fn certain_corruption_is_reported_and_persists() {
        let dev = FaultyBlockDevice::with_seed(4, 8, 1.0, 7);
        let stored = write(&dev, 0, b"\0\0\0\0\0\0\0\0");
        assert!(stored.iter().all(u8::is_ascii_lowercase));
        assert_eq!(dev.peek(0), stored);

        dev.set_corruption_rate(0.0);
        assert_eq!(read(&dev, 0), stored);
    }

    #[test]
    fn corrupting_read_loses_original() {
        let dev = FaultyBlockDevice::with_seed(4, 8, 0.0, 11);
        write(&dev, 0, b"1234abcd");

        dev.set_corruption_rate(1.0);
        let garbage = read(&dev, 0);
        assert_ne!(garbage, b"1234abcd");

        dev.set_corruption_rate(0.0);
        assert_eq!(read(&dev, 0), garbage);
    }

    #[test]
    fn same_seed_same_device() {
        let a = FaultyBlockDevice::with_seed(16, 8, 0.5, 42);
        let b = FaultyBlockDevice::with_seed(16, 8, 0.5, 42);
        for id in 0..16 {
            assert_eq!(write(&a, id, b"zzzz"), write(&b, id, b"zzzz"));
        }
    }

    #[test]
    fn forced_corruption() {
        let dev = FaultyBlockDevice::new(4, 8, 0.0);
        write(&dev, 2, b"\0\0\0\0\0\0\0\0");
        dev.corrupt_block(2);
        assert!(!dev.peek(2).contains(&0));
    }

    #[test]
    #[should_panic]
    fn out_of_range_is_a_caller_error() {
        let dev = FaultyBlockDevice::new(4, 8, 0.0);
        read(&dev, 4);
    }
}
