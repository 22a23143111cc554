//! 缓存模块
//!
//! FTL 在 RAM 中维护三类有界缓存：
//!
//! - [`IndexCache`] - 最近访问的块索引（对应固件的 `BLOCK_CACHE`）
//! - [`PageCache`] - 最近读写的原始页（对应固件的 `PAGE_CACHE`）
//! - 映射表扇区缓存，位于 `table` 模块
//!
//! 三者都使用 `lru` crate 的 `LruCache` 做驱逐。块索引和页缓存中没有未落盘的数据：
//! 索引可以从页头重建，页写入是写穿的。只有映射表扇区会变脏，驱逐前写回。
//!
//! # 内存分配要求
//!
//! 本模块依赖 `alloc` crate，需要用户提供全局分配器。

mod buffer;
mod index_cache;
mod page_cache;

pub use buffer::{PageBuffer, PageFlags};
pub use index_cache::IndexCache;
pub use page_cache::PageCache;

use crate::error::Result;

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 脏项写回次数
    pub writebacks: u64,
    /// 当前脏项数量
    pub dirty_entries: usize,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

/// 块/页缓存管理器
pub struct CacheManager {
    /// 块索引缓存
    pub blocks: IndexCache,
    /// 页缓存
    pub pages: PageCache,
    pages_per_block: u32,
}

impl CacheManager {
    /// 创建缓存管理器
    ///
    /// # 参数
    ///
    /// * `cached_blocks` - 块索引缓存容量
    /// * `cached_pages` - 页缓存容量
    /// * `raw_page_size` - 原始页大小
    /// * `pages_per_block` - 每块页数
    pub fn new(
        cached_blocks: usize,
        cached_pages: usize,
        raw_page_size: usize,
        pages_per_block: u32,
    ) -> Result<Self> {
        Ok(Self {
            blocks: IndexCache::new(cached_blocks)?,
            pages: PageCache::new(cached_pages, raw_page_size)?,
            pages_per_block,
        })
    }

    /// 块被擦除或退役后，丢弃它的索引和所有缓存页
    pub fn invalidate_block(&mut self, pbn: u32) {
        self.blocks.invalidate(pbn);
        let dropped = self
            .pages
            .invalidate_block(pbn * self.pages_per_block, self.pages_per_block);
        log::trace!("[CACHE] invalidated pbn={} ({} pages)", pbn, dropped);
    }

    /// 清空全部缓存
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BlockIndex;
    use crate::types::EccStatus;

    #[test]
    fn test_invalidate_block_drops_both() {
        let mut caches = CacheManager::new(2, 4, 8, 4).unwrap();
        caches.blocks.insert(BlockIndex::for_lbn(3, 0, 4));
        caches.pages.store(12, &[0u8; 8], EccStatus::NoError);
        caches.pages.store(20, &[0u8; 8], EccStatus::NoError);

        caches.invalidate_block(3);
        assert!(!caches.blocks.contains(3));
        assert_eq!(caches.pages.len(), 1);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = CacheStats {
            total_accesses: 4,
            hits: 3,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
