//! # 文件存储层
//!
//! 对外提供按文件名存取 ASCII 文本的接口。文件索引只保存在内存中：
//! 块设备的读也会损坏数据，把索引写回设备得不偿失。
//!
//! 索引、分配器与副本管理器处于同一把锁之下，
//! 分配与索引的修改对其它调用者而言是原子的。

use alloc::borrow::ToOwned;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use block_dev::{BlockDevice, FaultyBlockDevice};
use spin::Mutex;

use crate::replica::{ChunkUnrecoverable, ReplicationManager};
use crate::{
    codec, BlockAllocator, ContentCodec, Error, Repair, RepairStats, Result, StoreConfig,
    SENTINEL,
};

/// 一个文件在块设备上的位置，各副本的位置由主副本块按固定间距推出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 按顺序存放各片段的主副本块
    pub blocks: Vec<usize>,
    pub chunk_count: usize,
    /// 原始内容长度，用于截断最后一个片段
    pub len: usize,
    pub replicas: usize,
}

pub struct FileStore {
    config: StoreConfig,
    codec: ContentCodec,
    device: Arc<dyn BlockDevice>,
    inner: Mutex<Inner>,
}

struct Inner {
    index: BTreeMap<String, FileRecord>,
    allocator: BlockAllocator,
    replication: ReplicationManager,
}

impl FileStore {
    /// 按配置创建一个新的会损坏数据的块设备，并在其上建立文件存储
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let StoreConfig {
            block_count,
            block_size,
            corruption_rate,
            ..
        } = config;
        let device = match config.seed {
            Some(seed) => {
                FaultyBlockDevice::with_seed(block_count, block_size, corruption_rate, seed)
            }
            None => FaultyBlockDevice::new(block_count, block_size, corruption_rate),
        };

        Ok(Self::build(config, Arc::new(device)))
    }

    /// 在已有的块设备上建立文件存储，块数与块大小以设备为准
    pub fn with_device(mut config: StoreConfig, device: Arc<dyn BlockDevice>) -> Result<Self> {
        config.block_count = device.block_count();
        config.block_size = device.block_size();
        config.validate()?;

        Ok(Self::build(config, device))
    }

    fn build(config: StoreConfig, device: Arc<dyn BlockDevice>) -> Self {
        let allocator = BlockAllocator::new(config.block_count, config.replicas);
        let replication = ReplicationManager::new(
            device.clone(),
            allocator.stride(),
            config.replicas,
            config.max_write_attempts,
        );
        log::debug!(
            "file store: {} blocks of {} bytes, {} replicas, {} primary blocks",
            config.block_count,
            config.block_size,
            config.replicas,
            allocator.capacity()
        );

        Self {
            config,
            codec: ContentCodec::new(config.block_size),
            device,
            inner: Mutex::new(Inner {
                index: BTreeMap::new(),
                allocator,
                replication,
            }),
        }
    }

    /// 创建或覆盖文件，返回写入的内容
    pub fn put(&self, file_name: &str, content: &str) -> Result<String> {
        let chunks = self.codec.encode(content)?;
        let needed = chunks.len();

        let mut inner = self.inner.lock();
        let free = inner.allocator.free_blocks();
        if needed > free {
            // 空闲块不够时，看旧文件让出的块是否足够
            let old = inner.index.get(file_name).map_or(0, |record| record.blocks.len());
            if needed > free + old {
                return Err(Error::OutOfSpace {
                    needed,
                    free: free + old,
                });
            }
            log::debug!("{file_name}: dropping old content to make room");
            inner.remove(file_name, self.scrub_on_delete())?;
        }

        let blocks = inner.allocator.reserve(needed)?;
        if let Err(ChunkUnrecoverable { primary }) = inner.write_chunks(&blocks, &chunks) {
            inner.allocator.release(&blocks);
            let written = blocks.iter().take_while(|&&block| block != primary).count();
            let partial = self.partial(content, written);
            log::warn!("{file_name}: put failed at chunk {written}");
            return Err(Error::FileCorrupted {
                name: file_name.to_owned(),
                partial,
            });
        }

        let record = FileRecord {
            chunk_count: blocks.len(),
            blocks,
            len: content.len(),
            replicas: self.config.replicas,
        };
        if let Some(old) = inner.index.insert(file_name.to_owned(), record) {
            inner.discard(&old.blocks, self.scrub_on_delete());
        }
        log::info!("{file_name}: stored {} bytes in {needed} chunks", content.len());

        Ok(content.to_owned())
    }

    /// 读取文件内容
    pub fn get(&self, file_name: &str) -> Result<String> {
        let mut inner = self.inner.lock();
        let record = inner
            .index
            .get(file_name)
            .cloned()
            .ok_or_else(|| Error::FileNotFound(file_name.to_owned()))?;

        let heal = self.config.policy.contains(Repair::HealOnRead);
        let mut payloads = Vec::with_capacity(record.chunk_count);
        let mut corrupted = false;
        for (index, &primary) in record.blocks.iter().enumerate() {
            let expected_len = self.codec.expected_len(index, record.len);
            match inner.replication.read_chunk(primary, expected_len, heal) {
                Ok(read) => {
                    if read.repaired > 0 {
                        log::debug!(
                            "{file_name}: chunk {index} repaired {} blocks",
                            read.repaired
                        );
                    }
                    payloads.push(read.payload);
                }
                Err(ChunkUnrecoverable { .. }) => {
                    corrupted = true;
                    payloads.push(vec![SENTINEL; expected_len]);
                }
            }
        }

        let content = self.codec.decode(&payloads, record.len);
        if corrupted {
            log::warn!("{file_name}: unrecoverable");
            if self.config.policy.contains(Repair::DropCorrupted) {
                inner.remove(file_name, self.scrub_on_delete())?;
            }
            return Err(Error::FileCorrupted {
                name: file_name.to_owned(),
                partial: content,
            });
        }

        Ok(content)
    }

    /// 删除文件，归还它占用的块
    pub fn delete(&self, file_name: &str) -> Result<()> {
        self.inner
            .lock()
            .remove(file_name, self.scrub_on_delete())
            .map(|_| log::info!("{file_name}: deleted"))
    }

    /// 剩余可写入的内容字节数
    pub fn free_space(&self) -> usize {
        self.inner.lock().allocator.free_blocks() * self.codec.payload_size()
    }

    /// 粗略判断调用者拿到的内容是否已损坏，见 [`codec::is_corrupted`]
    pub fn is_corrupted(&self, content: &str) -> bool {
        codec::is_corrupted(content)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.inner.lock().index.contains_key(file_name)
    }

    /// 文件个数
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按名称排序的所有文件名
    pub fn file_names(&self) -> Vec<String> {
        self.inner.lock().index.keys().cloned().collect()
    }

    pub fn file_len(&self, file_name: &str) -> Option<usize> {
        self.inner.lock().index.get(file_name).map(|record| record.len)
    }

    pub fn record(&self, file_name: &str) -> Option<FileRecord> {
        self.inner.lock().index.get(file_name).cloned()
    }

    pub fn stats(&self) -> RepairStats {
        self.inner.lock().replication.stats()
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    #[inline]
    fn scrub_on_delete(&self) -> bool {
        self.config.policy.contains(Repair::ScrubOnDelete)
    }

    /// 写入失败时已确认的内容：前 `written` 个片段照旧，其余以 NUL 填充
    fn partial(&self, content: &str, written: usize) -> String {
        let kept = (written * self.codec.payload_size()).min(content.len());
        let mut partial = String::with_capacity(content.len());
        partial.push_str(&content[..kept]);
        partial.extend(core::iter::repeat(char::from(SENTINEL)).take(content.len() - kept));
        partial
    }
}

impl Inner {
    /// 依次写入各片段，遇到无法写入的片段立即停止
    fn write_chunks(
        &mut self,
        blocks: &[usize],
        chunks: &[Vec<u8>],
    ) -> core::result::Result<(), ChunkUnrecoverable> {
        for (&primary, chunk) in blocks.iter().zip(chunks) {
            self.replication.write_chunk(primary, chunk)?;
        }
        Ok(())
    }

    fn remove(&mut self, file_name: &str, scrub: bool) -> Result<FileRecord> {
        let record = self
            .index
            .remove(file_name)
            .ok_or_else(|| Error::FileNotFound(file_name.to_owned()))?;
        self.discard(&record.blocks, scrub);

        Ok(record)
    }

    /// 归还不再使用的主副本块，需要时先清空它们的所有副本
    fn discard(&mut self, blocks: &[usize], scrub: bool) {
        if scrub {
            for &primary in blocks {
                self.replication.scrub(primary);
            }
        }
        self.allocator.release(blocks);
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FileStore")
            .field("config", &self.config)
            .field("files", &inner.index.len())
            .field("free_blocks", &inner.allocator.free_blocks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(config: StoreConfig) -> FileStore {
        FileStore::new(config).unwrap()
    }

    #[test]
    fn records_the_blocks_we_expected() {
        let store = store(StoreConfig::default());
        store.put("test_file", "foobaryou").unwrap();
        assert_eq!(
            store.record("test_file"),
            Some(FileRecord {
                blocks: vec![0, 1],
                chunk_count: 2,
                len: 9,
                replicas: 1,
            })
        );
    }

    #[test]
    fn replicas_land_in_their_regions() {
        let store = store(StoreConfig {
            block_count: 64,
            replicas: 2,
            ..Default::default()
        });
        store.put("a", "0123456789").unwrap();
        let mut buf = vec![0; 8];
        store.device().read_block(32, &mut buf);
        assert_eq!(buf, b"0123456\0");
        store.device().read_block(33, &mut buf);
        assert_eq!(buf, b"789\0\0\0\0\0");
    }

    #[test]
    fn failed_put_keeps_nothing() {
        let store = store(StoreConfig {
            block_count: 4,
            corruption_rate: 1.0,
            max_write_attempts: 2,
            seed: Some(9),
            ..Default::default()
        });
        let before = store.free_space();

        let err = store.put("file_name", "this is a test").unwrap_err();
        let Error::FileCorrupted { name, partial } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(name, "file_name");
        assert!(store.is_corrupted(&partial));
        assert_eq!(partial.len(), "this is a test".len());

        assert_eq!(store.free_space(), before);
        assert!(!store.contains("file_name"));
        assert_eq!(store.stats().unrecoverable_chunks, 1);
    }

    #[test]
    fn partial_keeps_written_prefix() {
        let store = store(StoreConfig::default());
        assert_eq!(store.partial("0123456789", 1), "0123456\0\0\0");
        assert_eq!(store.partial("0123456789", 0), "\0".repeat(10));
    }

    #[test]
    fn overwrite_can_reuse_own_blocks() {
        let store = store(StoreConfig {
            block_count: 2,
            ..Default::default()
        });
        store.put("f", "0123456789").unwrap();
        assert_eq!(store.free_space(), 0);

        store.put("f", "abcdefghij").unwrap();
        assert_eq!(store.get("f").unwrap(), "abcdefghij");
        assert_eq!(store.free_space(), 0);
    }

    #[test]
    fn debug_does_not_dump_blocks() {
        let store = store(StoreConfig::default());
        store.put("x", "y").unwrap();
        let debug = alloc::format!("{store:?}");
        assert!(debug.contains("files: 1"));
    }
}
