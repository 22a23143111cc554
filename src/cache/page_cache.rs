//! 页缓存
//!
//! 缓存最近读写过的原始页，键为行地址。写入是写穿的：调用者先编程 NAND，
//! 成功后再把同一份数据放进缓存，缓存中永远没有未落盘的数据，驱逐无需写回。

use alloc::vec;
use core::num::NonZeroUsize;
use lru::LruCache;

use super::buffer::{PageBuffer, PageFlags};
use super::CacheStats;
use crate::error::{Error, ErrorKind, Result};
use crate::types::EccStatus;

/// 页缓存
pub struct PageCache {
    cache: LruCache<u32, PageBuffer>,
    /// 原始页大小（字节）
    page_size: usize,
    stats: CacheStats,
}

impl PageCache {
    /// 创建页缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存页数量
    /// * `page_size` - 原始页大小（数据 + 备用区）
    pub fn new(capacity: usize, page_size: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or(Error::new(ErrorKind::InvalidInput, "Page cache capacity must be non-zero"))?;
        Ok(Self {
            cache: LruCache::new(cap),
            page_size,
            stats: CacheStats::default(),
        })
    }

    /// 查找页
    ///
    /// 命中时复制到 `out` 并返回缓存时的 ECC 结果
    pub fn lookup(&mut self, row: u32, out: &mut [u8]) -> Option<EccStatus> {
        self.stats.total_accesses += 1;
        match self.cache.get(&row) {
            Some(buf) if buf.is_uptodate() => {
                self.stats.hits += 1;
                log::trace!("[CACHE] page row={:#x} HIT", row);
                out[..self.page_size].copy_from_slice(&buf.data[..self.page_size]);
                Some(buf.ecc())
            }
            _ => {
                self.stats.misses += 1;
                log::debug!(
                    "[CACHE] page row={:#x} MISS, cache={}/{}",
                    row,
                    self.cache.len(),
                    self.cache.cap().get()
                );
                None
            }
        }
    }

    /// 放入一页（读取或编程成功之后）
    ///
    /// 缓存满时驱逐最久未使用的页，并复用它的缓冲区
    pub fn store(&mut self, row: u32, data: &[u8], ecc: EccStatus) {
        if let Some(buf) = self.cache.get_mut(&row) {
            buf.data[..self.page_size].copy_from_slice(&data[..self.page_size]);
            buf.set_ecc(ecc);
            buf.mark_uptodate();
            return;
        }

        let mut buf = if self.cache.len() >= self.cache.cap().get() {
            match self.cache.pop_lru() {
                Some((old_row, mut old)) => {
                    log::debug!("[CACHE] evicted page row={:#x}", old_row);
                    old.row = row;
                    old
                }
                None => PageBuffer::new(row, vec![0u8; self.page_size]),
            }
        } else {
            PageBuffer::new(row, vec![0u8; self.page_size])
        };

        buf.data[..self.page_size].copy_from_slice(&data[..self.page_size]);
        buf.flags = PageFlags::empty();
        buf.set_ecc(ecc);
        buf.mark_uptodate();
        self.cache.put(row, buf);
    }

    /// 使某块的所有页失效（擦除或退役之后）
    pub fn invalidate_block(&mut self, first_row: u32, pages_per_block: u32) -> usize {
        let end = first_row + pages_per_block;
        let rows: alloc::vec::Vec<u32> = self
            .cache
            .iter()
            .map(|(r, _)| *r)
            .filter(|r| (first_row..end).contains(r))
            .collect();
        for row in &rows {
            self.cache.pop(row);
        }
        rows.len()
    }

    /// 使单页失效
    pub fn invalidate(&mut self, row: u32) {
        self.cache.pop(&row);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }
}
