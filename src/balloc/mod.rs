//! 数据块分配与回收
//!
//! [`Allocator`] 维护数据区的就绪队列、坏块集合和待回收块集合。
//!
//! ## 分配
//!
//! 队列深度不高于低水位时先补充：
//!
//! 1. 擦除待回收块并入队（存活页最少者优先，待回收块不含存活页，因此按 PBN 升序）
//! 2. 从上次分配位置之后循环扫描数据区，已擦除块入队，途中记录坏块和失效块
//!
//! 补充之后队列仍为空则返回 `Allocation` 错误。
//!
//! ## 失效块
//!
//! 页 0 页头中的 LBN 不再映射回该块的数据块是失效块；页头无法解析时，
//! 只要映射表中没有表项引用它，也视为失效块。

pub mod gc;
mod queue;

pub use gc::{reclaim_block, select_victim, Reclaimed};
pub use queue::ReadyQueue;

use alloc::collections::BTreeSet;

use crate::error::{Error, ErrorKind, Result};
use crate::nand::{NandDev, NandDriver, PageState};
use crate::table::MappingTable;

/// 数据块分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// 坏块标记
    Bad,
    /// 已擦除，可分配
    Erased,
    /// 映射表引用的数据块
    Mapped,
    /// 失效块，可回收
    Stale,
}

/// 数据块分配器
pub struct Allocator {
    /// 数据区首块
    start: u32,
    /// 数据区末块（含）
    end: u32,
    queue: ReadyQueue,
    /// 最近分配的数据块（对应固件的 `LastDBN`）
    last_dbn: u32,
    bad: BTreeSet<u32>,
    candidates: BTreeSet<u32>,
    low_water: usize,
}

impl Allocator {
    /// 创建分配器
    ///
    /// # 参数
    ///
    /// * `start`/`end` - 数据区范围（含）
    /// * `depth` - 就绪队列深度
    /// * `low_water` - 低水位
    pub fn new(start: u32, end: u32, depth: usize, low_water: usize) -> Self {
        Self {
            start,
            end,
            queue: ReadyQueue::new(depth),
            last_dbn: end,
            bad: BTreeSet::new(),
            candidates: BTreeSet::new(),
            low_water,
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.bad.clear();
        self.candidates.clear();
        self.last_dbn = self.end;
    }

    /// 数据区坏块数
    pub fn bad_count(&self) -> usize {
        self.bad.len()
    }

    pub fn is_bad(&self, pbn: u32) -> bool {
        self.bad.contains(&pbn)
    }

    pub fn queue(&self) -> &ReadyQueue {
        &self.queue
    }

    pub fn candidates(&self) -> impl Iterator<Item = u32> + '_ {
        self.candidates.iter().copied()
    }

    pub fn last_dbn(&self) -> u32 {
        self.last_dbn
    }

    fn in_range(&self, pbn: u32) -> bool {
        (self.start..=self.end).contains(&pbn)
    }

    /// 根据页 0 页头和映射表给数据块分类
    pub fn classify<D: NandDriver>(
        dev: &mut NandDev<D>,
        table: &mut MappingTable,
        pbn: u32,
        scratch: &mut [u8],
    ) -> Result<BlockClass> {
        let geo = *dev.geometry();
        let (state, _) = dev.read_header(geo.row(pbn, 0), scratch)?;
        let class = match state {
            PageState::Erased => BlockClass::Erased,
            PageState::Bad => BlockClass::Bad,
            PageState::Valid(header) => {
                let lbn = header.tag / geo.sectors_per_block();
                if lbn < table.lbn_count() && table.lookup(dev, lbn)? == Some(pbn) {
                    BlockClass::Mapped
                } else {
                    BlockClass::Stale
                }
            }
            PageState::Torn => {
                if table.contains_pbn(dev, pbn)? {
                    BlockClass::Mapped
                } else {
                    BlockClass::Stale
                }
            }
        };
        Ok(class)
    }

    /// 挂载时普查数据区
    ///
    /// 每块读一次页头：已擦除块填入就绪队列，失效块记为待回收，坏块计数。
    pub fn census<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        table: &mut MappingTable,
        scratch: &mut [u8],
    ) -> Result<()> {
        self.reset();
        let mut erased = 0usize;
        for pbn in self.start..=self.end {
            match Self::classify(dev, table, pbn, scratch)? {
                BlockClass::Bad => {
                    self.bad.insert(pbn);
                }
                BlockClass::Erased => {
                    erased += 1;
                    if self.queue.push(pbn) {
                        self.last_dbn = pbn;
                    }
                }
                BlockClass::Stale => {
                    self.candidates.insert(pbn);
                }
                BlockClass::Mapped => {}
            }
        }
        log::info!(
            "[ALLOC] census: {} erased, {} stale, {} bad, queue={}",
            erased,
            self.candidates.len(),
            self.bad.len(),
            self.queue.len()
        );
        Ok(())
    }

    /// 格式化数据区：擦除所有好块
    ///
    /// 出厂坏块和擦除失败的块记入坏块集合，随后填满就绪队列。
    pub fn format<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        scratch: &mut [u8],
    ) -> Result<()> {
        self.reset();
        for pbn in self.start..=self.end {
            if dev.is_bad(pbn, scratch)? {
                log::warn!("[ALLOC] pbn={} is marked bad", pbn);
                self.bad.insert(pbn);
                continue;
            }
            match reclaim_block(dev, pbn)? {
                Reclaimed::Erased => {
                    if self.queue.push(pbn) {
                        self.last_dbn = pbn;
                    }
                }
                Reclaimed::Retired => {
                    self.bad.insert(pbn);
                }
            }
        }
        log::info!(
            "[ALLOC] formatted data area {}..={}, {} bad",
            self.start,
            self.end,
            self.bad.len()
        );
        Ok(())
    }

    /// 分配一个已擦除的数据块
    ///
    /// # 错误
    ///
    /// 回收和扫描都找不到可用块时返回 `Allocation`
    pub fn allocate<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        table: &mut MappingTable,
        scratch: &mut [u8],
    ) -> Result<u32> {
        if self.queue.len() <= self.low_water {
            self.fill(dev, table, scratch)?;
        }
        match self.queue.pop() {
            Some(pbn) => {
                log::debug!("[ALLOC] allocated pbn={}, queue={}", pbn, self.queue.len());
                Ok(pbn)
            }
            None => {
                log::error!("[ALLOC] ready queue exhausted");
                Err(Error::new(ErrorKind::Allocation, "No erased block available"))
            }
        }
    }

    /// 补充就绪队列
    fn fill<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        table: &mut MappingTable,
        scratch: &mut [u8],
    ) -> Result<()> {
        let total = self.end - self.start + 1;
        let mut scanned = 0u32;

        while !self.queue.is_full() {
            // 待回收块不含存活页，按 PBN 升序回收
            if let Some(victim) = self.candidates.pop_first() {
                match reclaim_block(dev, victim)? {
                    Reclaimed::Erased => {
                        self.queue.push(victim);
                    }
                    Reclaimed::Retired => {
                        self.bad.insert(victim);
                    }
                }
                continue;
            }

            if scanned >= total {
                break;
            }
            scanned += 1;

            let pbn = if self.last_dbn >= self.end {
                self.start
            } else {
                self.last_dbn + 1
            };
            self.last_dbn = pbn;

            if self.bad.contains(&pbn) || self.queue.contains(pbn) {
                continue;
            }
            match Self::classify(dev, table, pbn, scratch)? {
                BlockClass::Erased => {
                    self.queue.push(pbn);
                }
                BlockClass::Stale => {
                    self.candidates.insert(pbn);
                }
                BlockClass::Bad => {
                    self.bad.insert(pbn);
                }
                BlockClass::Mapped => {}
            }
        }

        log::debug!(
            "[ALLOC] refill: queue={}/{}, scanned {} blocks",
            self.queue.len(),
            self.queue.depth(),
            scanned
        );
        Ok(())
    }

    /// 数据块不再被映射，登记为待回收
    pub fn release(&mut self, pbn: u32) {
        if self.in_range(pbn) && !self.bad.contains(&pbn) {
            self.candidates.insert(pbn);
        }
    }

    /// 将块永久标记为坏块，不再分配
    pub fn retire<D: NandDriver>(&mut self, dev: &mut NandDev<D>, pbn: u32) {
        dev.mark_bad(pbn);
        self.candidates.remove(&pbn);
        if self.bad.insert(pbn) {
            log::warn!("[ALLOC] retired pbn={}, {} bad blocks", pbn, self.bad.len());
        }
    }

    /// 立即回收一个块并放回就绪队列（强制回收路径）
    pub fn reclaim_now<D: NandDriver>(&mut self, dev: &mut NandDev<D>, pbn: u32) -> Result<()> {
        self.candidates.remove(&pbn);
        match reclaim_block(dev, pbn)? {
            Reclaimed::Erased => {
                if !self.queue.push(pbn) {
                    self.candidates.insert(pbn);
                }
            }
            Reclaimed::Retired => {
                self.bad.insert(pbn);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nand::{RamNand, SpareHeader};
    use crate::types::{NandGeometry, PageLayout};
    use alloc::vec::Vec;

    // 24 块，每块 4 页，页 512 字节；BTT 1..=2，数据区 3..=23
    fn setup() -> (NandDev<RamNand>, MappingTable, Allocator) {
        let geo = NandGeometry::new(24, 4, 512, false);
        let mut dev = NandDev::new(RamNand::new(geo), geo, PageLayout::default()).unwrap();
        dev.open().unwrap();
        let mut table = MappingTable::new(geo, 16, (1, 2), (3, 23), 2).unwrap();
        table.format(&mut dev).unwrap();
        (dev, table, Allocator::new(3, 23, 3, 1))
    }

    #[test]
    fn test_format_fills_queue() {
        let (mut dev, _table, mut alloc) = setup();
        let mut scratch = dev.page_buffer();
        alloc.format(&mut dev, &mut scratch).unwrap();
        assert_eq!(alloc.queue().iter().collect::<Vec<_>>(), [3, 4, 5]);
        assert_eq!(alloc.bad_count(), 0);
    }

    #[test]
    fn test_classify() {
        let (mut dev, mut table, _alloc) = setup();
        let mut scratch = dev.page_buffer();
        let mut buf = dev.page_buffer();

        // 块 6 属于 LBN 2（每块 4 扇区）且被映射；块 7 的 LBN 2 副本已失效
        dev.write_tagged(6 * 4, &mut buf, &SpareHeader::data(8)).unwrap();
        dev.write_tagged(7 * 4, &mut buf, &SpareHeader::data(8)).unwrap();
        table.update(&mut dev, 2, Some(6)).unwrap();
        dev.driver_mut().mark_factory_bad(9, &PageLayout::default());

        assert_eq!(Allocator::classify(&mut dev, &mut table, 6, &mut scratch).unwrap(), BlockClass::Mapped);
        assert_eq!(Allocator::classify(&mut dev, &mut table, 7, &mut scratch).unwrap(), BlockClass::Stale);
        assert_eq!(Allocator::classify(&mut dev, &mut table, 8, &mut scratch).unwrap(), BlockClass::Erased);
        assert_eq!(Allocator::classify(&mut dev, &mut table, 9, &mut scratch).unwrap(), BlockClass::Bad);
    }

    #[test]
    fn test_bad_block_never_allocated() {
        let (mut dev, mut table, mut alloc) = setup();
        let mut scratch = dev.page_buffer();
        alloc.format(&mut dev, &mut scratch).unwrap();

        let first = alloc.allocate(&mut dev, &mut table, &mut scratch).unwrap();
        alloc.retire(&mut dev, first);
        alloc.release(first);

        let mut seen = Vec::new();
        for _ in 0..20 {
            let pbn = alloc.allocate(&mut dev, &mut table, &mut scratch).unwrap();
            assert_ne!(pbn, first);
            // 模拟写入后立即失效，块回到待回收集合
            let mut buf = dev.page_buffer();
            dev.write_tagged(pbn * 4, &mut buf, &SpareHeader::data(0)).unwrap();
            alloc.release(pbn);
            seen.push(pbn);
        }
        assert_eq!(alloc.bad_count(), 1);
        assert!(seen.iter().all(|&p| p != first));
    }

    #[test]
    fn test_exhaustion_reports_allocation_error() {
        let (mut dev, mut table, mut alloc) = setup();
        let mut scratch = dev.page_buffer();
        alloc.format(&mut dev, &mut scratch).unwrap();

        // 把所有数据块都标为映射中
        let mut buf = dev.page_buffer();
        for (lbn, pbn) in (3..19u32).enumerate() {
            let lbn = lbn as u32;
            dev.driver_mut().block_erase(pbn * 4).unwrap();
            dev.write_tagged(pbn * 4, &mut buf, &SpareHeader::data(lbn * 4)).unwrap();
            table.update(&mut dev, lbn, Some(pbn)).unwrap();
        }
        for pbn in 19..=23 {
            alloc.retire(&mut dev, pbn);
        }
        alloc.queue.clear();

        let err = alloc.allocate(&mut dev, &mut table, &mut scratch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
    }
}
