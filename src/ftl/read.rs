//! 扇区读取

use core::mem;

use super::Ftl;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::nand::{NandDriver, PageState};
use crate::types::{EccStatus, IoStatus};

impl<D: NandDriver> Ftl<D> {
    /// 读取连续扇区
    ///
    /// # 参数
    ///
    /// * `lsn` - 起始 LSN
    /// * `buf` - 目标缓冲区（至少 `count * 512` 字节）
    /// * `count` - 扇区数
    ///
    /// # 返回
    ///
    /// 读到已纠正的页时返回 `WarnReliability`，同时把该 LBN 登记为下一次写操作前的强制回收对象
    ///
    /// # 错误
    ///
    /// - `NotFound` - 某个扇区从未写入
    /// - `UncorrectedEcc` - 某页数据无法恢复（或复制自无法恢复的页）
    /// - `InvalidInput` - 范围越界或缓冲区太小
    pub fn read_sectors(&mut self, lsn: u32, buf: &mut [u8], count: u32) -> Result<IoStatus> {
        self.check_ready()?;
        self.check_range(lsn, count, buf.len())?;

        let mut page = mem::take(&mut self.page_buf);
        let result = self.read_into(lsn, buf, count, &mut page);
        self.page_buf = page;
        result
    }

    fn read_into(&mut self, lsn: u32, buf: &mut [u8], count: u32, page: &mut [u8]) -> Result<IoStatus> {
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

            match self.read_logical(lbn, lpage, page)? {
                None => {
                    log::debug!("[FTL] read lsn={} never written", cur);
                    return Err(Error::new(ErrorKind::NotFound, "Sector never written"));
                }
                Some(EccStatus::Uncorrected) => {
                    log::error!("[FTL] lsn={} unreadable (lbn={} lpage={})", cur, lbn, lpage);
                    return Err(Error::new(ErrorKind::UncorrectedEcc, "Sector data unrecoverable"));
                }
                Some(EccStatus::Corrected) => {
                    log::warn!("[FTL] lsn={} read with corrected ECC, scheduling lbn={}", cur, lbn);
                    self.gc_lbn = Some(lbn);
                    status = IoStatus::WarnReliability;
                }
                Some(EccStatus::NoError) => {}
            }

            let src = first as usize * SECTOR_SIZE;
            let dst = done as usize * SECTOR_SIZE;
            let len = n as usize * SECTOR_SIZE;
            buf[dst..dst + len].copy_from_slice(&page[src..src + len]);
            done += n;
        }
        Ok(status)
    }

    /// 读取逻辑页的当前副本
    ///
    /// # 返回
    ///
    /// 逻辑页从未写入时返回 `Ok(None)`；带损坏标记的副本按不可纠正处理
    pub(super) fn read_logical(&mut self, lbn: u32, lpage: u32, out: &mut [u8]) -> Result<Option<EccStatus>> {
        let pbn = match self.table.lookup(&mut self.dev, lbn)? {
            Some(pbn) => pbn,
            None => return Ok(None),
        };
        let located = self.index_of(pbn)?.locate(lpage);
        let page = match located {
            Some(page) => page,
            None => return Ok(None),
        };

        let row = self.cfg.geometry.row(pbn, page);
        let ecc = self.fetch(row, out)?;
        if let PageState::Valid(header) = self.dev.page_state(out) {
            if header.corrupt {
                return Ok(Some(EccStatus::Uncorrected));
            }
        }
        Ok(Some(ecc))
    }
}
