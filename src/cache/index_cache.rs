//! 块索引缓存
//!
//! 对应固件的 `BLOCK_CACHE` 池。索引可以从介质重建，驱逐时直接丢弃。

use core::num::NonZeroUsize;
use lru::LruCache;

use super::CacheStats;
use crate::error::{Error, ErrorKind, Result};
use crate::index::BlockIndex;

/// 块索引缓存
pub struct IndexCache {
    cache: LruCache<u32, BlockIndex>,
    stats: CacheStats,
}

impl IndexCache {
    /// 创建块索引缓存
    pub fn new(capacity: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or(Error::new(
            ErrorKind::InvalidInput,
            "Block cache capacity must be non-zero",
        ))?;
        Ok(Self {
            cache: LruCache::new(cap),
            stats: CacheStats::default(),
        })
    }

    /// 查找块索引并更新 LRU 顺序
    pub fn get(&mut self, pbn: u32) -> Option<&mut BlockIndex> {
        self.stats.total_accesses += 1;
        match self.cache.get_mut(&pbn) {
            Some(idx) => {
                self.stats.hits += 1;
                log::trace!("[CACHE] index pbn={} HIT", pbn);
                Some(idx)
            }
            None => {
                self.stats.misses += 1;
                log::debug!("[CACHE] index pbn={} MISS", pbn);
                None
            }
        }
    }

    /// 是否已缓存（不影响 LRU 顺序和统计）
    pub fn contains(&self, pbn: u32) -> bool {
        self.cache.contains(&pbn)
    }

    /// 查找块索引，未命中时用 `load` 构建并放入缓存
    ///
    /// # 参数
    ///
    /// * `pbn` - 物理块号
    /// * `load` - 未命中时调用（通常是扫描块的页头）
    pub fn get_or_load<F>(&mut self, pbn: u32, load: F) -> Result<&mut BlockIndex>
    where
        F: FnOnce() -> Result<BlockIndex>,
    {
        self.stats.total_accesses += 1;
        if self.cache.contains(&pbn) {
            self.stats.hits += 1;
            log::trace!("[CACHE] index pbn={} HIT", pbn);
        } else {
            self.stats.misses += 1;
            log::debug!("[CACHE] index pbn={} MISS, loading", pbn);
            let idx = load()?;
            self.insert(idx);
        }
        self.cache
            .get_mut(&pbn)
            .ok_or(Error::new(ErrorKind::Fatal, "Block index vanished from cache"))
    }

    /// 放入块索引，满时驱逐最久未使用者
    pub fn insert(&mut self, idx: BlockIndex) {
        let pbn = idx.pbn();
        if let Some((old, _)) = self.cache.push(pbn, idx) {
            if old != pbn {
                log::debug!("[CACHE] evicted index pbn={}", old);
            }
        }
    }

    /// 丢弃块索引
    pub fn invalidate(&mut self, pbn: u32) {
        self.cache.pop(&pbn);
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
