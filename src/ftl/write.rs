//! 扇区写入与换块
//!
//! 每个逻辑页追加到 LBN 当前绑定块的下一个空闲页。块写满或编程失败时换块：
//! 分配新块，复制除待写页之外的存活页，写入待写页，更新并落盘映射表，
//! 最后把旧块登记为待回收（编程失败时标记为坏块）。
//!
//! 映射表在旧块释放之前落盘，掉电最多留下一个未被映射的新块，由分配器回收。

use alloc::vec::Vec;
use core::mem;

use super::Ftl;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::index::BlockIndex;
use crate::nand::{NandDriver, PageState, SpareHeader};
use crate::types::{EccStatus, IoStatus};

impl<D: NandDriver> Ftl<D> {
    /// 写入连续扇区
    ///
    /// 写操作开始前先处理挂起的强制回收。
    ///
    /// # 参数
    ///
    /// * `lsn` - 起始 LSN
    /// * `buf` - 源数据（至少 `count * 512` 字节）
    /// * `count` - 扇区数
    ///
    /// # 返回
    ///
    /// 遇到编程失败并已换块重试、或部分页写入合并了经过纠错的旧数据时返回 `WarnReliability`
    ///
    /// # 错误
    ///
    /// - `Allocation` - 回收后仍没有可用块，已有映射不受影响
    /// - `UncorrectedEcc` - 部分页写入需要合并的旧数据无法恢复
    /// - `InvalidInput` - 范围越界或缓冲区太小
    pub fn write_sectors(&mut self, lsn: u32, buf: &[u8], count: u32) -> Result<IoStatus> {
        self.check_ready()?;
        self.check_range(lsn, count, buf.len())?;

        if let Some(lbn) = self.gc_lbn.take() {
            if let Err(e) = self.collect(lbn) {
                log::warn!("[GC] pending reclamation of lbn={} failed: {}", lbn, e);
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        let mut page = mem::take(&mut self.page_buf);
        let result = self.write_from(lsn, buf, count, &mut page);
        self.page_buf = page;
        result
    }

    /// 强制回收一个 LBN 的块
    ///
    /// 把存活页复制到新块，旧块立即擦除放回就绪队列。未映射的 LBN 什么都不做。
    pub fn force_gc(&mut self, lbn: u32) -> Result<()> {
        self.check_ready()?;
        if lbn >= self.usable_lbns {
            return Err(Error::new(ErrorKind::InvalidInput, "LBN out of range"));
        }
        if self.gc_lbn == Some(lbn) {
            self.gc_lbn = None;
        }
        self.collect(lbn)
    }

    fn collect(&mut self, lbn: u32) -> Result<()> {
        let old = match self.table.lookup(&mut self.dev, lbn)? {
            Some(pbn) => pbn,
            None => return Ok(()),
        };
        log::info!("[GC] forced reclamation of lbn={} (pbn={})", lbn, old);
        self.relocate(lbn, old, None, false)?;
        self.alloc.reclaim_now(&mut self.dev, old)
    }

    fn write_from(&mut self, lsn: u32, buf: &[u8], count: u32, page: &mut [u8]) -> Result<IoStatus> {
        let geo = self.cfg.geometry;
        let spp = geo.sectors_per_page();
        let spb = geo.sectors_per_block();
        let mut status = IoStatus::Clean;
        let mut done = 0u32;

        while done < count {
            let cur = lsn + done;
            let lbn = cur / spb;
            let lpage = (cur % spb) / spp;
            let first = cur % spp;
            let n = (spp - first).min(count - done);

            if n < spp {
                match self.read_logical(lbn, lpage, page)? {
                    Some(EccStatus::Uncorrected) => {
                        log::error!("[FTL] cannot merge lsn={} into unreadable page", cur);
                        return Err(Error::new(
                            ErrorKind::UncorrectedEcc,
                            "Partial write over unrecoverable page",
                        ));
                    }
                    Some(EccStatus::Corrected) => {
                        log::warn!("[FTL] merged lsn={} into corrected page, scheduling lbn={}", cur, lbn);
                        self.gc_lbn = Some(lbn);
                        status = IoStatus::WarnReliability;
                    }
                    Some(EccStatus::NoError) => {}
                    None => page[..geo.page_size as usize].fill(ERASED_BYTE),
                }
            }

            let dst = first as usize * SECTOR_SIZE;
            let src = done as usize * SECTOR_SIZE;
            let len = n as usize * SECTOR_SIZE;
            page[dst..dst + len].copy_from_slice(&buf[src..src + len]);

            status = status.merge(self.write_logical(lbn, lpage, page)?);
            self.curr_lbn = Some(lbn);
            done += n;
        }
        Ok(status)
    }

    /// 写入一个完整的逻辑页
    fn write_logical(&mut self, lbn: u32, lpage: u32, page: &mut [u8]) -> Result<IoStatus> {
        let header = self.data_header(lbn, lpage);
        let pbn = match self.table.lookup(&mut self.dev, lbn)? {
            Some(pbn) => pbn,
            None => return self.bind_new_block(lbn, lpage, page, &header),
        };

        let next = self.index_of(pbn)?.next_free();
        let off = match next {
            Some(off) => off,
            None => {
                log::debug!("[FTL] pbn={} full, relocating lbn={}", pbn, lbn);
                self.relocate(lbn, pbn, Some((lpage, page)), false)?;
                return Ok(IoStatus::Clean);
            }
        };

        match self.program(pbn, off, page, &header) {
            Ok(()) => {
                self.index_of(pbn)?.record_write(off, lpage, lbn);
                Ok(IoStatus::Clean)
            }
            Err(e) if e.is_media_failure() => {
                log::warn!("[FTL] program failed at pbn={} page {}, relocating lbn={}", pbn, off, lbn);
                self.index_of(pbn)?.mark_full();
                self.relocate(lbn, pbn, Some((lpage, page)), true)?;
                Ok(IoStatus::WarnReliability)
            }
            Err(e) => Err(e),
        }
    }

    /// 为从未写入的 LBN 绑定新块，页写在偏移 0
    fn bind_new_block(
        &mut self,
        lbn: u32,
        lpage: u32,
        page: &mut [u8],
        header: &SpareHeader,
    ) -> Result<IoStatus> {
        let ppb = self.cfg.geometry.pages_per_block;
        let mut status = IoStatus::Clean;
        loop {
            let pbn = self.allocate()?;
            match self.program(pbn, 0, page, header) {
                Ok(()) => {
                    let mut idx = BlockIndex::for_lbn(pbn, lbn, ppb);
                    idx.record_write(0, lpage, lbn);
                    self.caches.blocks.insert(idx);
                    self.table.update(&mut self.dev, lbn, Some(pbn))?;
                    self.table.flush(&mut self.dev)?;
                    log::debug!("[FTL] bound lbn={} to pbn={}", lbn, pbn);
                    return Ok(status);
                }
                Err(e) if e.is_media_failure() => {
                    log::warn!("[FTL] program failed on fresh pbn={}, retrying", pbn);
                    self.discard(pbn);
                    status = IoStatus::WarnReliability;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 换块
    ///
    /// # 参数
    ///
    /// * `lbn` - 逻辑块号
    /// * `old` - 当前绑定的块
    /// * `pending` - 要写入的新页 (逻辑页, 数据)，其旧副本不再复制
    /// * `retire_old` - 旧块标记为坏块而不是待回收
    fn relocate(
        &mut self,
        lbn: u32,
        old: u32,
        pending: Option<(u32, &mut [u8])>,
        retire_old: bool,
    ) -> Result<()> {
        let skip = pending.as_ref().map(|(lpage, _)| *lpage);
        let live: Vec<(u32, u32)> = self
            .index_of(old)?
            .live_pages()
            .filter(|&(lpage, _)| Some(lpage) != skip)
            .collect();

        if live.is_empty() && pending.is_none() {
            log::warn!("[FTL] lbn={} has no live data, unmapping pbn={}", lbn, old);
            self.table.update(&mut self.dev, lbn, None)?;
        } else {
            let mut copy = mem::take(&mut self.copy_buf);
            let result = self.copy_forward(lbn, old, &live, pending, &mut copy);
            self.copy_buf = copy;
            let new = result?;
            self.table.update(&mut self.dev, lbn, Some(new))?;
            log::info!(
                "[FTL] relocated lbn={}: pbn {} -> {} ({} pages copied)",
                lbn,
                old,
                new,
                live.len()
            );
        }
        self.table.flush(&mut self.dev)?;

        self.caches.invalidate_block(old);
        if retire_old {
            self.alloc.retire(&mut self.dev, old);
        } else {
            self.alloc.release(old);
        }
        Ok(())
    }

    /// 把存活页和待写页写入新块，编程失败时丢弃新块重试
    ///
    /// # 返回
    ///
    /// 新块 PBN；其索引已放入缓存
    fn copy_forward(
        &mut self,
        lbn: u32,
        old: u32,
        live: &[(u32, u32)],
        mut pending: Option<(u32, &mut [u8])>,
        copy: &mut [u8],
    ) -> Result<u32> {
        let geo = self.cfg.geometry;

        'retry: loop {
            let new = self.allocate()?;
            let mut idx = BlockIndex::for_lbn(new, lbn, geo.pages_per_block);
            let mut off = 0u32;

            for &(lpage, page) in live {
                let ecc = self.fetch(geo.row(old, page), copy)?;
                let marked = matches!(self.dev.page_state(copy), PageState::Valid(h) if h.corrupt);
                let mut header = self.data_header(lbn, lpage);
                header.corrupt = ecc.is_uncorrected() || marked;
                if header.corrupt {
                    log::warn!("[FTL] carrying unreadable lpage {} of lbn={} forward", lpage, lbn);
                }

                match self.program(new, off, copy, &header) {
                    Ok(()) => idx.record_write(off, lpage, lbn),
                    Err(e) if e.is_media_failure() => {
                        self.discard(new);
                        continue 'retry;
                    }
                    Err(e) => return Err(e),
                }
                off += 1;
            }

            if let Some((lpage, data)) = pending.as_mut() {
                let header = self.data_header(lbn, *lpage);
                match self.program(new, off, &mut **data, &header) {
                    Ok(()) => idx.record_write(off, *lpage, lbn),
                    Err(e) if e.is_media_failure() => {
                        self.discard(new);
                        continue 'retry;
                    }
                    Err(e) => return Err(e),
                }
            }

            self.caches.blocks.insert(idx);
            return Ok(new);
        }
    }

    fn data_header(&self, lbn: u32, lpage: u32) -> SpareHeader {
        let geo = &self.cfg.geometry;
        SpareHeader::data(lbn * geo.sectors_per_block() + lpage * geo.sectors_per_page())
    }

    fn allocate(&mut self) -> Result<u32> {
        let pbn = self
            .alloc
            .allocate(&mut self.dev, &mut self.table, &mut self.scratch)?;
        self.caches.invalidate_block(pbn);
        Ok(pbn)
    }

    /// 编程失败的新块：丢弃缓存并标记为坏块
    fn discard(&mut self, pbn: u32) {
        self.caches.invalidate_block(pbn);
        self.alloc.retire(&mut self.dev, pbn);
    }

    /// 带页头编程一页，成功后写入页缓存
    fn program(&mut self, pbn: u32, page: u32, buf: &mut [u8], header: &SpareHeader) -> Result<()> {
        let row = self.cfg.geometry.row(pbn, page);
        match self.dev.write_tagged(row, buf, header) {
            Ok(()) => {
                self.caches.pages.store(row, buf, EccStatus::NoError);
                Ok(())
            }
            Err(e) => {
                self.caches.pages.invalidate(row);
                Err(e)
            }
        }
    }
}
