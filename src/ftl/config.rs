//! FTL 配置

use bitflags::bitflags;

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::table::MappingTable;
use crate::types::{NandGeometry, PageLayout};

bitflags! {
    /// FTL 状态标志（对应固件的 `Status`）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FtlStatus: u8 {
        /// 驱动已初始化
        const OPEN      = 0x01;
        /// 映射表已找到，卷可用
        const FORMATTED = 0x02;
    }
}

/// FTL 配置
///
/// `FtlConfig::new` 按固件的尺寸公式填充默认值：
///
/// - BTT 区域：块 1 ..= max(块数 × 3 / 100, 2)，块 0 保留
/// - 数据区：BTT 之后到最后一块
/// - 保留块：数据块数 / 32 + 就绪队列深度
///
/// 所有字段都可以在调用 [`FtlConfig::validate`] 之前修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtlConfig {
    /// 设备几何
    pub geometry: NandGeometry,
    /// 备用区布局
    pub layout: PageLayout,
    /// BTT 区域首块
    pub btt_start: u32,
    /// BTT 区域末块（含）
    pub btt_end: u32,
    /// 数据区首块
    pub data_start: u32,
    /// 数据区末块（含）
    pub data_end: u32,
    /// 不向客户暴露的数据块（就绪队列、换块、坏块替换）
    pub reserved_blocks: u32,
    /// 块索引缓存容量
    pub cached_blocks: usize,
    /// 页缓存容量
    pub cached_pages: usize,
    /// 映射表扇区缓存容量
    pub cached_table_sectors: usize,
    /// 就绪队列低水位
    pub gc_low_water: usize,
}

impl FtlConfig {
    /// 按设备几何生成默认配置
    pub fn new(geometry: NandGeometry) -> Self {
        let blocks = geometry.block_count;
        let btt_size = (blocks * BTT_PERCENT / 100).max(MIN_BTT_BLOCKS);
        let btt_start = FIRST_USABLE_BLOCK;
        let btt_end = btt_start + btt_size - 1;
        let data_start = btt_end + 1;
        let data_end = blocks.saturating_sub(1);
        let data_blocks = (data_end + 1).saturating_sub(data_start);

        Self {
            geometry,
            layout: PageLayout::default(),
            btt_start,
            btt_end,
            data_start,
            data_end,
            reserved_blocks: data_blocks / 32 + READY_QUEUE_DEPTH as u32,
            cached_blocks: DEFAULT_CACHED_BLOCKS,
            cached_pages: DEFAULT_CACHED_PAGES,
            cached_table_sectors: DEFAULT_CACHED_TABLE_SECTORS,
            gc_low_water: DEFAULT_GC_LOW_WATER,
        }
    }

    /// 数据区块数
    pub fn data_blocks(&self) -> u32 {
        (self.data_end + 1).saturating_sub(self.data_start)
    }

    /// BTT 区域块数
    pub fn btt_blocks(&self) -> u32 {
        (self.btt_end + 1).saturating_sub(self.btt_start)
    }

    /// 客户可见的逻辑块数（对应固件的 `NumDataBlocks`）
    pub fn num_data_blocks(&self) -> u32 {
        self.data_blocks().saturating_sub(self.reserved_blocks)
    }

    /// 映射表扇区数（TSN 数量）
    pub fn table_sectors(&self) -> u32 {
        MappingTable::sector_count(
            self.num_data_blocks(),
            self.geometry.entries_per_table_sector(),
        )
    }

    /// 数据区没有超额坏块时客户可见的扇区数
    pub fn capacity_sectors(&self) -> u32 {
        self.num_data_blocks() * self.geometry.sectors_per_block()
    }

    /// 校验配置
    ///
    /// # 错误
    ///
    /// 任何一项不满足时返回 `InvalidInput`
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.layout.validate()?;

        let blocks = self.geometry.block_count;
        if self.btt_start < FIRST_USABLE_BLOCK || self.data_start < FIRST_USABLE_BLOCK {
            return Err(Error::new(ErrorKind::InvalidInput, "Block 0 is reserved"));
        }
        if self.btt_end >= blocks || self.data_end >= blocks {
            return Err(Error::new(ErrorKind::InvalidInput, "Area exceeds device"));
        }
        if self.btt_start > self.btt_end || self.data_start > self.data_end {
            return Err(Error::new(ErrorKind::InvalidInput, "Empty area"));
        }
        if !(self.btt_end < self.data_start || self.data_end < self.btt_start) {
            return Err(Error::new(ErrorKind::InvalidInput, "BTT and data areas overlap"));
        }
        if self.btt_blocks() < MIN_BTT_BLOCKS {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "BTT area needs at least two blocks",
            ));
        }
        if self.reserved_blocks == 0 || self.num_data_blocks() == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Reserved blocks must leave at least one data block and one spare",
            ));
        }
        if self.table_sectors() >= self.geometry.pages_per_block {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Mapping table does not fit below one BTT block",
            ));
        }
        if self.cached_blocks == 0 || self.cached_pages == 0 || self.cached_table_sectors == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Cache capacities must be non-zero",
            ));
        }
        if self.gc_low_water >= READY_QUEUE_DEPTH {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Low-water mark must be below the ready queue depth",
            ));
        }
        Ok(())
    }
}
