//! 块索引
//!
//! 每个物理块一个 [`BlockIndex`]：块内页偏移到逻辑页的映射、块所属的 LBN、
//! 块类型以及下一个空闲页。索引只存在于 RAM 中，首次访问时扫描页头重建。
//!
//! ## 重建规则
//!
//! 从页 0 开始顺序扫描：
//!
//! - 擦除态页头：有效数据结束，该页即下一个空闲页
//! - 页 0 坏块标记：整块为坏块
//! - 写入中断的页头、LBN 不一致或未对齐的标签：有效数据结束，块不再追加
//! - 完整页头：记录该页；同一逻辑页较早的副本标记为过期（块内后写者胜）
//!
//! 页头完整但数据 ECC 不可纠正的页仍然被记录，读取时再报告错误。

use alloc::vec;
use alloc::vec::Vec;

use crate::error::Result;
use crate::nand::{NandDev, NandDriver, PageState};
use crate::types::{BlockKind, NandGeometry};

/// 块内一页的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    /// 未写入
    Empty,
    /// 逻辑页的当前副本
    Live(u16),
    /// 已被块内更晚的副本取代
    Obsolete(u16),
}

/// 单个物理块的索引
#[derive(Debug, Clone)]
pub struct BlockIndex {
    pbn: u32,
    lbn: Option<u32>,
    kind: BlockKind,
    /// 物理页 -> 状态
    slots: Vec<PageSlot>,
    /// 逻辑页 -> 物理页
    live: Vec<Option<u16>>,
    next_free: u32,
    full: bool,
}

impl BlockIndex {
    /// 空块（已擦除）的索引
    pub fn empty(pbn: u32, pages_per_block: u32) -> Self {
        let ppb = pages_per_block as usize;
        Self {
            pbn,
            lbn: None,
            kind: BlockKind::Spare,
            slots: vec![PageSlot::Empty; ppb],
            live: vec![None; ppb],
            next_free: 0,
            full: false,
        }
    }

    /// 绑定到某个 LBN 的空块索引
    pub fn for_lbn(pbn: u32, lbn: u32, pages_per_block: u32) -> Self {
        let mut idx = Self::empty(pbn, pages_per_block);
        idx.lbn = Some(lbn);
        idx.kind = BlockKind::Data;
        idx
    }

    /// 扫描块的页头重建索引
    ///
    /// # 参数
    ///
    /// * `dev` - NAND 设备
    /// * `pbn` - 物理块号
    /// * `scratch` - 原始页大小的临时缓冲区
    pub fn scan<D: NandDriver>(dev: &mut NandDev<D>, pbn: u32, scratch: &mut [u8]) -> Result<Self> {
        let geo: NandGeometry = *dev.geometry();
        let spb = geo.sectors_per_block();
        let spp = geo.sectors_per_page();
        let mut idx = Self::empty(pbn, geo.pages_per_block);

        for page in 0..geo.pages_per_block {
            let (state, _) = dev.read_header(geo.row(pbn, page), scratch)?;
            match state {
                PageState::Erased => {
                    idx.next_free = page;
                    log::debug!(
                        "[INDEX] scan pbn={} lbn={:?} live={} next_free={}",
                        pbn,
                        idx.lbn,
                        idx.live_count(),
                        page
                    );
                    return Ok(idx);
                }
                PageState::Bad if page == 0 => {
                    idx.kind = BlockKind::Bad;
                    idx.full = true;
                    return Ok(idx);
                }
                PageState::Bad | PageState::Torn => {
                    log::warn!("[INDEX] pbn={} torn page {}, block closed", pbn, page);
                    idx.full = true;
                    break;
                }
                PageState::Valid(header) => {
                    let lsn = header.tag;
                    let lbn = lsn / spb;
                    let aligned = lsn % spp == 0;
                    if !aligned || idx.lbn.is_some_and(|l| l != lbn) {
                        log::warn!(
                            "[INDEX] pbn={} page {} carries foreign lsn {}, block closed",
                            pbn,
                            page,
                            lsn
                        );
                        idx.full = true;
                        break;
                    }
                    let lpage = (lsn % spb) / spp;
                    idx.record_write(page, lpage, lbn);
                }
            }
        }

        idx.next_free = geo.pages_per_block;
        idx.full = true;
        log::debug!(
            "[INDEX] scan pbn={} lbn={:?} live={} full",
            pbn,
            idx.lbn,
            idx.live_count()
        );
        Ok(idx)
    }

    pub fn pbn(&self) -> u32 {
        self.pbn
    }

    pub fn lbn(&self) -> Option<u32> {
        self.lbn
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// 记录一次页写入
    ///
    /// 同一逻辑页此前的副本变为过期。不做任何持久化：页头本身就是持久记录。
    pub fn record_write(&mut self, page: u32, lpage: u32, lbn: u32) {
        let page_idx = page as usize;
        let lpage_idx = lpage as usize;
        if page_idx >= self.slots.len() || lpage_idx >= self.live.len() {
            return;
        }

        if let Some(old) = self.live[lpage_idx] {
            self.slots[old as usize] = PageSlot::Obsolete(lpage as u16);
        }
        self.slots[page_idx] = PageSlot::Live(lpage as u16);
        self.live[lpage_idx] = Some(page as u16);

        self.lbn = Some(lbn);
        self.kind = BlockKind::Data;
        self.next_free = self.next_free.max(page + 1);
        if self.next_free as usize >= self.slots.len() {
            self.full = true;
        }
    }

    /// 逻辑页的当前物理页
    pub fn locate(&self, lpage: u32) -> Option<u32> {
        self.live
            .get(lpage as usize)
            .copied()
            .flatten()
            .map(u32::from)
    }

    /// 物理页的状态
    pub fn slot(&self, page: u32) -> PageSlot {
        self.slots.get(page as usize).copied().unwrap_or(PageSlot::Empty)
    }

    /// 下一个可追加的页；块已满时返回 None
    pub fn next_free(&self) -> Option<u32> {
        if self.full || self.next_free as usize >= self.slots.len() {
            None
        } else {
            Some(self.next_free)
        }
    }

    /// 不再向该块追加
    pub fn mark_full(&mut self) {
        self.full = true;
    }

    pub fn is_full(&self) -> bool {
        self.next_free().is_none()
    }

    /// 存活页数量
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|p| p.is_some()).count()
    }

    /// 所有存活页：(逻辑页, 物理页)
    pub fn live_pages(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter_map(|(lpage, page)| page.map(|p| (lpage as u32, p as u32)))
    }
}
