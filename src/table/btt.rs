//! BTT 区域日志
//!
//! 映射表扇区以追加方式写入 BTT 区域的块，每个副本带有 TSN 和全局递增的序号。
//! 挂载时扫描整个区域，每个 TSN 取序号最大的副本，结果即 TsnTable。
//!
//! 区域内始终保留一个已擦除块：取用最后一个已擦除块之后立即压缩，
//! 把存活副本最少的块（同数取 PBN 最小者）复制到活动块并擦除。
//! TSN 数量小于每块页数，因此新活动块一定容纳得下被压缩块的存活副本。
//! 挂载时若没有已擦除块（写入中断的页或未完成的压缩），同样先压缩一次。

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use crate::balloc::select_victim;
use crate::error::{Error, ErrorKind, Result};
use crate::nand::{NandDev, NandDriver, PageState, SpareHeader};
use crate::types::{EccStatus, NandGeometry};

/// BTT 区域日志
pub struct BttLog {
    /// 区域首块
    start: u32,
    /// 区域末块（含）
    end: u32,
    geometry: NandGeometry,
    /// TSN -> 最新副本的行地址（对应固件的 `TsnTable`）
    rows: Vec<Option<u32>>,
    /// 下一个副本的序号
    seq: u32,
    /// 活动块
    active: Option<u32>,
    /// 活动块中下一个空闲页
    next_page: u32,
    /// 已擦除块
    erased: BTreeSet<u32>,
    /// 坏块
    bad: BTreeSet<u32>,
    /// 编程失败过、压缩后退役的块
    retiring: BTreeSet<u32>,
    /// 最近写入的 BTT 块（对应固件的 `LastTBN`）
    last_tbn: u32,
}

impl BttLog {
    /// 创建日志（未扫描）
    pub fn new(geometry: NandGeometry, start: u32, end: u32, tsn_count: u32) -> Self {
        Self {
            start,
            end,
            geometry,
            rows: vec![None; tsn_count as usize],
            seq: 0,
            active: None,
            next_page: 0,
            erased: BTreeSet::new(),
            bad: BTreeSet::new(),
            retiring: BTreeSet::new(),
            last_tbn: start,
        }
    }

    fn reset(&mut self) {
        self.rows.iter_mut().for_each(|r| *r = None);
        self.seq = 0;
        self.active = None;
        self.next_page = 0;
        self.erased.clear();
        self.bad.clear();
        self.retiring.clear();
        self.last_tbn = self.start;
    }

    /// 扫描 BTT 区域重建 TsnTable
    pub fn rebuild<D: NandDriver>(&mut self, dev: &mut NandDev<D>, scratch: &mut [u8]) -> Result<()> {
        self.reset();
        let ppb = self.geometry.pages_per_block;
        let mut best: Vec<Option<(u32, u32)>> = vec![None; self.rows.len()];
        // (序号, 块, 下一个空闲页, 块是否已关闭)
        let mut newest: Option<(u32, u32, u32, bool)> = None;

        for pbn in self.start..=self.end {
            let mut fill = ppb;
            let mut closed = false;
            let mut block_max: Option<u32> = None;

            for page in 0..ppb {
                let row = self.geometry.row(pbn, page);
                let (state, ecc) = dev.read_header(row, scratch)?;
                match state {
                    PageState::Erased => {
                        fill = page;
                        break;
                    }
                    PageState::Bad if page == 0 => {
                        self.bad.insert(pbn);
                        closed = true;
                        break;
                    }
                    PageState::Bad | PageState::Torn => {
                        log::warn!("[BTT] torn table page at row {:#x}", row);
                        fill = page;
                        closed = true;
                        break;
                    }
                    PageState::Valid(header) => {
                        block_max = Some(block_max.map_or(header.seq, |m| m.max(header.seq)));
                        let tsn = header.tag as usize;
                        if tsn >= best.len() || ecc == EccStatus::Uncorrected {
                            continue;
                        }
                        if best[tsn].map_or(true, |(seq, _)| header.seq >= seq) {
                            best[tsn] = Some((header.seq, row));
                        }
                    }
                }
            }

            if self.bad.contains(&pbn) {
                continue;
            }
            if fill == 0 && !closed {
                self.erased.insert(pbn);
                continue;
            }
            if let Some(m) = block_max {
                if newest.map_or(true, |(s, ..)| m >= s) {
                    newest = Some((m, pbn, fill, closed));
                }
            }
        }

        for (slot, found) in self.rows.iter_mut().zip(best) {
            *slot = found.map(|(_, row)| row);
        }

        if let Some((seq, pbn, fill, closed)) = newest {
            self.seq = seq.wrapping_add(1);
            self.last_tbn = pbn;
            if !closed && fill < ppb {
                self.active = Some(pbn);
                self.next_page = fill;
            }
        }

        // 掉电可能发生在取用最后一个已擦除块时
        if self.erased.is_empty() && self.is_complete() {
            log::warn!("[BTT] no erased block after rebuild, compacting");
            self.compact(dev, scratch)?;
        }

        log::info!(
            "[BTT] rebuilt: {}/{} sectors found, seq={}, active={:?}, erased={}, bad={}",
            self.rows.iter().filter(|r| r.is_some()).count(),
            self.rows.len(),
            self.seq,
            self.active,
            self.erased.len(),
            self.bad.len()
        );
        Ok(())
    }

    /// 擦除整个 BTT 区域
    ///
    /// 带坏块标记的块和擦除失败的块记入坏块集合。
    pub fn format<D: NandDriver>(&mut self, dev: &mut NandDev<D>, scratch: &mut [u8]) -> Result<()> {
        self.reset();
        for pbn in self.start..=self.end {
            if dev.is_bad(pbn, scratch)? {
                log::warn!("[BTT] pbn={} is marked bad", pbn);
                self.bad.insert(pbn);
                continue;
            }
            match dev.erase_block(pbn) {
                Ok(()) => {
                    self.erased.insert(pbn);
                }
                Err(e) if e.is_media_failure() => {
                    dev.mark_bad(pbn);
                    self.bad.insert(pbn);
                }
                Err(e) => return Err(e),
            }
        }

        if self.erased.len() < 2 {
            return Err(Error::new(
                ErrorKind::Allocation,
                "BTT area needs at least two good blocks",
            ));
        }
        Ok(())
    }

    /// TSN 最新副本的行地址
    pub fn row_of(&self, tsn: u32) -> Option<u32> {
        self.rows.get(tsn as usize).copied().flatten()
    }

    /// 所有 TSN 都有副本
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(|r| r.is_some())
    }

    pub fn last_tbn(&self) -> u32 {
        self.last_tbn
    }

    pub fn bad_count(&self) -> usize {
        self.bad.len()
    }

    pub fn erased_count(&self) -> usize {
        self.erased.len()
    }

    /// 块中存活的副本数
    pub fn live_in(&self, pbn: u32) -> usize {
        let ppb = self.geometry.pages_per_block;
        self.rows
            .iter()
            .flatten()
            .filter(|&&row| row / ppb == pbn)
            .count()
    }

    fn active_room(&self) -> u32 {
        match self.active {
            Some(_) => self.geometry.pages_per_block - self.next_page,
            None => 0,
        }
    }

    /// 写入一个表扇区副本
    ///
    /// `buf` 的数据区由调用者填好。写入成功后 TsnTable 指向新副本，
    /// 旧副本随之过期。
    pub fn append<D: NandDriver>(
        &mut self,
        dev: &mut NandDev<D>,
        tsn: u32,
        buf: &mut [u8],
        scratch: &mut [u8],
    ) -> Result<u32> {
        if tsn as usize >= self.rows.len() {
            return Err(Error::new(ErrorKind::OutOfRange, "Table sector number out of range"));
        }
        let row = self.program(dev, tsn, buf)?;
        self.rows[tsn as usize] = Some(row);

        if self.erased.is_empty() {
            self.compact(dev, scratch)?;
        }
        Ok(row)
    }

    /// 在活动块中编程一页，必要时换用已擦除块
    fn program<D: NandDriver>(&mut self, dev: &mut NandDev<D>, tsn: u32, buf: &mut [u8]) -> Result<u32> {
        loop {
            if self.active_room() == 0 {
                let pbn = self.erased.pop_first().ok_or(Error::new(
                    ErrorKind::Allocation,
                    "BTT area has no erased block",
                ))?;
                log::debug!("[BTT] switching active block to pbn={}", pbn);
                self.active = Some(pbn);
                self.next_page = 0;
            }

            let pbn = match self.active {
                Some(pbn) => pbn,
                None => continue,
            };
            let row = self.geometry.row(pbn, self.next_page);
            let header = SpareHeader::table(tsn, self.seq);

            match dev.write_tagged(row, buf, &header) {
                Ok(()) => {
                    log::debug!("[BTT] tsn={} -> row {:#x} seq={}", tsn, row, self.seq);
                    self.seq = self.seq.wrapping_add(1);
                    self.next_page += 1;
                    self.last_tbn = pbn;
                    if self.next_page >= self.geometry.pages_per_block {
                        self.active = None;
                    }
                    return Ok(row);
                }
                Err(e) if e.is_media_failure() => {
                    log::warn!("[BTT] program failed on pbn={}, closing block", pbn);
                    self.retiring.insert(pbn);
                    self.active = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 压缩存活副本最少的块，补回一个已擦除块
    fn compact<D: NandDriver>(&mut self, dev: &mut NandDev<D>, scratch: &mut [u8]) -> Result<()> {
        let room = self.active_room() as usize;
        let victim = select_victim(
            (self.start..=self.end)
                .filter(|pbn| Some(*pbn) != self.active)
                .filter(|pbn| !self.erased.contains(pbn) && !self.bad.contains(pbn))
                .map(|pbn| (pbn, self.live_in(pbn))),
        );

        let (victim, live) = match victim {
            Some(v) => v,
            None => return Ok(()),
        };
        if live > room {
            log::warn!(
                "[BTT] cannot compact pbn={}: {} live sectors, {} free pages",
                victim,
                live,
                room
            );
            return Ok(());
        }

        log::info!("[BTT] compacting pbn={} ({} live sectors)", victim, live);
        let moving: Vec<(u32, u32)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(tsn, row)| row.map(|r| (tsn as u32, r)))
            .filter(|&(_, row)| self.geometry.pbn_of_row(row) == victim)
            .collect();

        for (tsn, row) in moving {
            let ecc = dev.read_page(row, scratch)?;
            if ecc == EccStatus::Uncorrected {
                log::error!("[BTT] tsn={} unreadable during compaction", tsn);
                return Err(Error::new(
                    ErrorKind::UncorrectedEcc,
                    "Mapping table sector unreadable",
                ));
            }
            let new_row = self.program(dev, tsn, scratch)?;
            self.rows[tsn as usize] = Some(new_row);
        }

        if self.retiring.remove(&victim) {
            dev.mark_bad(victim);
            self.bad.insert(victim);
            return Ok(());
        }
        match dev.erase_block(victim) {
            Ok(()) => {
                self.erased.insert(victim);
                Ok(())
            }
            Err(e) if e.is_media_failure() => {
                dev.mark_bad(victim);
                self.bad.insert(victim);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nand::RamNand;
    use crate::types::PageLayout;

    // 16 块，每块 4 页；BTT 区域为块 1..=3
    fn dev() -> NandDev<RamNand> {
        let geo = NandGeometry::new(16, 4, 512, false);
        let mut dev = NandDev::new(RamNand::new(geo), geo, PageLayout::default()).unwrap();
        dev.open().unwrap();
        dev
    }

    fn write_sector(log: &mut BttLog, dev: &mut NandDev<RamNand>, tsn: u32, fill: u8) -> u32 {
        let mut buf = dev.page_buffer();
        let mut scratch = dev.page_buffer();
        buf[..512].fill(fill);
        log.append(dev, tsn, &mut buf, &mut scratch).unwrap()
    }

    /// 模拟写入中断：只有标签落盘，页头 CRC 仍为擦除态
    fn tear(dev: &mut NandDev<RamNand>, row: u32, tsn: u32) {
        let mut raw = dev.page_buffer();
        let tag = 512 + PageLayout::default().pos_lsn as usize;
        raw[tag..tag + 4].copy_from_slice(&tsn.to_le_bytes());
        dev.driver_mut().page_write(row, &raw).unwrap();
    }

    fn sector_fill(dev: &mut NandDev<RamNand>, row: u32) -> u8 {
        let mut out = dev.page_buffer();
        dev.read_page(row, &mut out).unwrap();
        out[0]
    }

    #[test]
    fn test_rebuild_picks_newest_copy() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.format(&mut dev, &mut scratch).unwrap();

        write_sector(&mut log, &mut dev, 0, 0xA0);
        write_sector(&mut log, &mut dev, 1, 0xB0);
        let newest = write_sector(&mut log, &mut dev, 0, 0xA1);

        let mut fresh = BttLog::new(geo, 1, 3, 2);
        fresh.rebuild(&mut dev, &mut scratch).unwrap();
        assert!(fresh.is_complete());
        assert_eq!(fresh.row_of(0), Some(newest));
        assert_eq!(fresh.seq, 3);
        assert_eq!(fresh.active, Some(1));
        assert_eq!(fresh.next_page, 3);
    }

    #[test]
    fn test_compaction_keeps_an_erased_block() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.format(&mut dev, &mut scratch).unwrap();

        for i in 0..40u32 {
            write_sector(&mut log, &mut dev, i % 2, i as u8);
            assert!(log.erased_count() >= 1);
        }

        let mut fresh = BttLog::new(geo, 1, 3, 2);
        fresh.rebuild(&mut dev, &mut scratch).unwrap();
        assert_eq!(fresh.row_of(0), log.row_of(0));
        assert_eq!(fresh.row_of(1), log.row_of(1));

        let mut out = dev.page_buffer();
        dev.read_page(fresh.row_of(1).unwrap(), &mut out).unwrap();
        assert_eq!(out[0], 39);
    }

    #[test]
    fn test_program_failure_moves_to_next_block() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.format(&mut dev, &mut scratch).unwrap();

        dev.driver_mut().fail_next_program(1);
        let row = write_sector(&mut log, &mut dev, 0, 0x55);
        assert_eq!(geo.pbn_of_row(row), 2);
        assert!(log.retiring.contains(&1));
    }

    #[test]
    fn test_unformatted_area_is_incomplete() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.rebuild(&mut dev, &mut scratch).unwrap();
        assert!(!log.is_complete());
        assert_eq!(log.erased_count(), 3);
    }

    #[test]
    fn test_torn_page_in_active_block() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.format(&mut dev, &mut scratch).unwrap();
        write_sector(&mut log, &mut dev, 0, 0x10);
        write_sector(&mut log, &mut dev, 1, 0x20);
        // 块 1 的页 2 写到一半掉电
        tear(&mut dev, geo.row(1, 2), 0);

        let mut fresh = BttLog::new(geo, 1, 3, 2);
        fresh.rebuild(&mut dev, &mut scratch).unwrap();
        assert!(fresh.is_complete());
        assert_eq!(fresh.active, None);
        assert_eq!(sector_fill(&mut dev, fresh.row_of(0).unwrap()), 0x10);

        let row = write_sector(&mut fresh, &mut dev, 0, 0x11);
        assert_ne!(geo.pbn_of_row(row), 1);
        for i in 0..12u32 {
            write_sector(&mut fresh, &mut dev, i % 2, 0x30 + i as u8);
            assert!(fresh.erased_count() >= 1);
        }

        let mut again = BttLog::new(geo, 1, 3, 2);
        again.rebuild(&mut dev, &mut scratch).unwrap();
        assert_eq!(sector_fill(&mut dev, again.row_of(0).unwrap()), 0x3A);
        assert_eq!(sector_fill(&mut dev, again.row_of(1).unwrap()), 0x3B);
    }

    #[test]
    fn test_torn_page_in_last_erased_block() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 2);
        log.format(&mut dev, &mut scratch).unwrap();
        // 填满块 1 和块 2，只剩块 3 为擦除态
        for i in 0..8u32 {
            write_sector(&mut log, &mut dev, i % 2, i as u8);
        }
        assert_eq!(log.erased_count(), 1);
        // 取用块 3 后第一页写到一半掉电
        tear(&mut dev, geo.row(3, 0), 0);

        let mut fresh = BttLog::new(geo, 1, 3, 2);
        fresh.rebuild(&mut dev, &mut scratch).unwrap();
        assert!(fresh.is_complete());
        assert_eq!(fresh.erased_count(), 1);
        assert_eq!(sector_fill(&mut dev, fresh.row_of(0).unwrap()), 6);
        assert_eq!(sector_fill(&mut dev, fresh.row_of(1).unwrap()), 7);

        for i in 0..16u32 {
            write_sector(&mut fresh, &mut dev, i % 2, 0x40 + i as u8);
            assert!(fresh.erased_count() >= 1);
        }
        assert_eq!(fresh.bad_count(), 0);

        let mut again = BttLog::new(geo, 1, 3, 2);
        again.rebuild(&mut dev, &mut scratch).unwrap();
        assert_eq!(sector_fill(&mut dev, again.row_of(0).unwrap()), 0x4E);
        assert_eq!(sector_fill(&mut dev, again.row_of(1).unwrap()), 0x4F);
    }

    #[test]
    fn test_interrupted_compaction() {
        let mut dev = dev();
        let geo = *dev.geometry();
        let mut scratch = dev.page_buffer();
        let mut log = BttLog::new(geo, 1, 3, 3);
        log.format(&mut dev, &mut scratch).unwrap();
        // 块 1：t0 t1 t2 t2；块 2：t2 x4
        for (tsn, fill) in [(0u32, 0xA0u8), (1, 0xB0), (2, 0xC0), (2, 0xC1)] {
            write_sector(&mut log, &mut dev, tsn, fill);
        }
        for fill in 0xC2..0xC6u8 {
            write_sector(&mut log, &mut dev, 2, fill);
        }
        assert_eq!(log.erased_count(), 1);

        // 手工重放下一次追加：t0 写入块 3，随后压缩块 1 只复制了 t1 就掉电
        let seq = log.seq;
        let mut buf = dev.page_buffer();
        buf[..512].fill(0xA1);
        dev.write_tagged(geo.row(3, 0), &mut buf, &SpareHeader::table(0, seq))
            .unwrap();
        dev.read_page(log.row_of(1).unwrap(), &mut buf).unwrap();
        dev.write_tagged(geo.row(3, 1), &mut buf, &SpareHeader::table(1, seq + 1))
            .unwrap();

        let mut fresh = BttLog::new(geo, 1, 3, 3);
        fresh.rebuild(&mut dev, &mut scratch).unwrap();
        assert_eq!(fresh.row_of(0), Some(geo.row(3, 0)));
        assert_eq!(fresh.row_of(1), Some(geo.row(3, 1)));
        assert_eq!(fresh.active, Some(3));
        // 被中断的块已无存活副本，挂载时擦除
        assert!(fresh.erased.contains(&1));
        assert_eq!(sector_fill(&mut dev, fresh.row_of(1).unwrap()), 0xB0);

        for i in 0..10u32 {
            write_sector(&mut fresh, &mut dev, i % 3, 0x50 + i as u8);
            assert!(fresh.erased_count() >= 1);
        }
        let mut again = BttLog::new(geo, 1, 3, 3);
        again.rebuild(&mut dev, &mut scratch).unwrap();
        assert_eq!(sector_fill(&mut dev, again.row_of(0).unwrap()), 0x59);
        assert_eq!(sector_fill(&mut dev, again.row_of(1).unwrap()), 0x57);
        assert_eq!(sector_fill(&mut dev, again.row_of(2).unwrap()), 0x58);
    }
}
