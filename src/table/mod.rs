//! 映射表
//!
//! LBN -> PBN 映射按每扇区 EPS（= 页大小 / 4）项切分为表扇区，
//! 表扇区以 TSN 编号，持久化在 BTT 区域（见 [`BttLog`]）。
//! RAM 中只缓存最近使用的若干个表扇区，`update` 把所在扇区标脏，`flush` 写回。
//!
//! 表项为小端序 `u32` PBN，`0xFFFF_FFFF` 表示未映射。

mod btt;

pub use btt::BttLog;

use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::num::NonZeroUsize;
use lru::LruCache;

use crate::cache::CacheStats;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::nand::{NandDev, NandDriver};
use crate::types::{EccStatus, NandGeometry};

/// 缓存中的表扇区
#[derive(Debug, Clone)]
struct TableSector {
    entries: Vec<u32>,
    dirty: bool,
}

/// 映射表
pub struct MappingTable {
    geometry: NandGeometry,
    /// 每扇区表项数
    eps: u32,
    /// LBN 数量
    lbn_count: u32,
    /// 数据区范围（含），合法表项必须落在其中
    data_start: u32,
    data_end: u32,
    cache: LruCache<u32, TableSector>,
    log: BttLog,
    /// 表扇区 I/O 缓冲区
    buf: Vec<u8>,
    scratch: Vec<u8>,
    stats: CacheStats,
}

impl MappingTable {
    /// 表扇区数量：ceil(lbn_count / eps)
    pub const fn sector_count(lbn_count: u32, eps: u32) -> u32 {
        lbn_count.div_ceil(eps)
    }

    /// 创建映射表
    ///
    /// # 参数
    ///
    /// * `geometry` - 设备几何
    /// * `lbn_count` - 客户可见的逻辑块数
    /// * `btt` - BTT 区域（首块, 末块）
    /// * `data` - 数据区（首块, 末块）
    /// * `capacity` - 缓存的表扇区数
    pub fn new(
        geometry: NandGeometry,
        lbn_count: u32,
        btt: (u32, u32),
        data: (u32, u32),
        capacity: usize,
    ) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or(Error::new(
            ErrorKind::InvalidInput,
            "Table cache capacity must be non-zero",
        ))?;
        let eps = geometry.entries_per_table_sector();
        let tsn_count = Self::sector_count(lbn_count, eps);
        Ok(Self {
            geometry,
            eps,
            lbn_count,
            data_start: data.0,
            data_end: data.1,
            cache: LruCache::new(cap),
            log: BttLog::new(geometry, btt.0, btt.1, tsn_count),
            buf: vec![ERASED_BYTE; geometry.raw_page_size()],
            scratch: vec![ERASED_BYTE; geometry.raw_page_size()],
            stats: CacheStats::default(),
        })
    }

    pub fn tsn_count(&self) -> u32 {
        Self::sector_count(self.lbn_count, self.eps)
    }

    pub fn lbn_count(&self) -> u32 {
        self.lbn_count
    }

    pub fn btt(&self) -> &BttLog {
        &self.log
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.dirty_entries = self.cache.iter().filter(|(_, s)| s.dirty).count();
        stats
    }

    /// 挂载：从 BTT 区域重建 TsnTable
    ///
    /// # 错误
    ///
    /// 任何一个表扇区在 BTT 区域中都没有副本时返回 `Unformatted`
    pub fn mount<D: NandDriver>(&mut self, dev: &mut NandDev<D>) -> Result<()> {
        self.cache.clear();
        self.log.rebuild(dev, &mut self.scratch)?;
        if !self.log.is_complete() {
            log::warn!("[TABLE] mapping table incomplete, medium is unformatted");
            return Err(Error::new(ErrorKind::Unformatted, "Mapping table not found"));
        }
        log::info!(
            "[TABLE] mounted {} sectors ({} entries each)",
            self.tsn_count(),
            self.eps
        );
        Ok(())
    }

    /// 格式化：擦除 BTT 区域并写入全部未映射的表扇区
    pub fn format<D: NandDriver>(&mut self, dev: &mut NandDev<D>) -> Result<()> {
        self.cache.clear();
        self.log.format(dev, &mut self.scratch)?;

        let page = self.geometry.page_size as usize;
        for tsn in 0..self.tsn_count() {
            self.buf[..page].fill(ERASED_BYTE);
            self.log.append(dev, tsn, &mut self.buf, &mut self.scratch)?;
        }
        log::info!("[TABLE] formatted {} sectors", self.tsn_count());
        Ok(())
    }

    fn check_lbn(&self, lbn: u32) -> Result<()> {
        if lbn >= self.lbn_count {
            return Err(Error::new(ErrorKind::InvalidInput, "LBN out of range"));
        }
        Ok(())
    }

    /// 从介质读取一个表扇区（不经过缓存）
    fn read_sector<D: NandDriver>(&mut self, dev: &mut NandDev<D>, tsn: u32) -> Result<Vec<u32>> {
        let row = self
            .log
            .row_of(tsn)
            .ok_or(Error::new(ErrorKind::Unformatted, "Table sector missing"))?;
        let ecc = dev.read_page(row, &mut self.buf)?;
        if ecc == EccStatus::Uncorrected {
            log::error!("[TABLE] tsn={} unreadable at row {:#x}", tsn, row);
            return Err(Error::new(
                ErrorKind::UncorrectedEcc,
                "Mapping table sector unreadable",
            ));
        }
        let mut entries = vec![UNMAPPED; self.eps as usize];
        LittleEndian::read_u32_into(&self.buf[..self.eps as usize * TABLE_ENTRY_SIZE], &mut entries);
        Ok(entries)
    }

    /// 把一个表扇区写入 BTT 区域
    fn write_sector<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        tsn: u32,
        entries: &[u32],
    ) -> Result<()> {
        let len = entries.len() * TABLE_ENTRY_SIZE;
        LittleEndian::write_u32_into(entries, &mut self.buf[..len]);
        self.log.append(dev, tsn, &mut self.buf, &mut self.scratch)?;
        self.stats.writebacks += 1;
        Ok(())
    }

    /// 保证表扇区在缓存中，满时先写回被驱逐的脏扇区
    fn load<D: NandDriver>(&mut self, dev: &mut NandDev<D>, tsn: u32) -> Result<&mut TableSector> {
        self.stats.total_accesses += 1;
        if self.cache.contains(&tsn) {
            self.stats.hits += 1;
            log::trace!("[TABLE] tsn={} HIT", tsn);
        } else {
            self.stats.misses += 1;
            log::debug!("[TABLE] tsn={} MISS", tsn);
            let entries = self.read_sector(dev, tsn)?;

            if self.cache.len() >= self.cache.cap().get() {
                // 写回成功之前脏扇区留在缓存中
                let victim = self
                    .cache
                    .peek_lru()
                    .filter(|(_, sector)| sector.dirty)
                    .map(|(old, sector)| (*old, sector.entries.clone()));
                if let Some((old, entries)) = victim {
                    log::debug!("[TABLE] writing back evicted tsn={}", old);
                    self.write_sector(dev, old, &entries)?;
                }
                self.cache.pop_lru();
            }
            self.cache.put(
                tsn,
                TableSector {
                    entries,
                    dirty: false,
                },
            );
        }

        self.cache
            .get_mut(&tsn)
            .ok_or(Error::new(ErrorKind::Fatal, "Table sector vanished from cache"))
    }

    /// 查找 LBN 的映射
    ///
    /// # 返回
    ///
    /// 从未写入的 LBN 返回 `Ok(None)`
    pub fn lookup<D: NandDriver>(&mut self, dev: &mut NandDev<D>, lbn: u32) -> Result<Option<u32>> {
        self.check_lbn(lbn)?;
        let eps = self.eps;
        let (start, end) = (self.data_start, self.data_end);
        let sector = self.load(dev, lbn / eps)?;
        let entry = sector.entries[(lbn % eps) as usize];

        if entry == UNMAPPED {
            return Ok(None);
        }
        if entry < start || entry > end {
            log::error!("[TABLE] lbn={} maps outside data area: {}", lbn, entry);
            return Err(Error::new(ErrorKind::Corrupted, "Mapping entry outside data area"));
        }
        Ok(Some(entry))
    }

    /// 更新 LBN 的映射（只改缓存，标脏）
    pub fn update<D: NandDriver>(&mut self, dev: &mut NandDev<D>, lbn: u32, pbn: Option<u32>) -> Result<()> {
        self.check_lbn(lbn)?;
        let eps = self.eps;
        let sector = self.load(dev, lbn / eps)?;
        sector.entries[(lbn % eps) as usize] = pbn.unwrap_or(UNMAPPED);
        sector.dirty = true;
        log::debug!("[TABLE] lbn={} -> {:?}", lbn, pbn);
        Ok(())
    }

    /// 写回所有脏扇区
    pub fn flush<D: NandDriver>(&mut self, dev: &mut NandDev<D>) -> Result<()> {
        let dirty: Vec<u32> = self
            .cache
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(tsn, _)| *tsn)
            .collect();

        for tsn in dirty {
            let entries = match self.cache.peek(&tsn) {
                Some(s) => s.entries.clone(),
                None => continue,
            };
            self.write_sector(dev, tsn, &entries)?;
            if let Some(s) = self.cache.peek_mut(&tsn) {
                s.dirty = false;
            }
        }
        Ok(())
    }

    /// 所有 (LBN, PBN) 映射，按 LBN 升序
    ///
    /// 已缓存的扇区取缓存内容，其余直接读介质，不影响缓存。
    pub fn mapped_entries<D: NandDriver>(&mut self, dev: &mut NandDev<D>) -> Result<Vec<(u32, u32)>> {
        let mut out = Vec::new();
        for tsn in 0..self.tsn_count() {
            let entries = match self.cache.peek(&tsn) {
                Some(s) => s.entries.clone(),
                None => self.read_sector(dev, tsn)?,
            };
            let base = tsn * self.eps;
            for (i, &pbn) in entries.iter().enumerate() {
                let lbn = base + i as u32;
                if lbn < self.lbn_count && pbn != UNMAPPED {
                    out.push((lbn, pbn));
                }
            }
        }
        Ok(out)
    }

    /// 是否有任何表项引用该 PBN
    pub fn contains_pbn<D: NandDriver>(&mut self, dev: &mut NandDev<D>, pbn: u32) -> Result<bool> {
        Ok(self.mapped_entries(dev)?.iter().any(|&(_, p)| p == pbn))
    }
}
