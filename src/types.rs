//! NAND 数据结构定义
//!
//! 这个模块包含了设备几何、页布局以及跨模块共享的状态枚举。
//!
//! ## 设计原则
//!
//! 1. **几何信息不可变** - 构造后只读，所有派生量由方法计算
//! 2. **页布局可配置** - 对应固件的 `NAND_PG_LAY`，描述备用区各字段的位置
//! 3. **状态用枚举表达** - 替代固件中的整型返回码

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};

//=============================================================================
// ECC 状态
//=============================================================================

/// 页读取的纠错结果
///
/// 变体按严重程度排序，`merge` 取两者中较严重的一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum EccStatus {
    /// 无错误
    #[default]
    NoError,
    /// 出现位错误但已纠正，数据可用
    Corrected,
    /// 无法纠正，数据不可信
    Uncorrected,
}

impl EccStatus {
    /// 合并两个状态，保留较严重者
    pub fn merge(self, other: EccStatus) -> EccStatus {
        self.max(other)
    }

    /// 是否已纠正（软错误信号）
    pub fn is_corrected(self) -> bool {
        self == EccStatus::Corrected
    }

    /// 是否不可纠正
    pub fn is_uncorrected(self) -> bool {
        self == EccStatus::Uncorrected
    }
}

//=============================================================================
// 块类型
//=============================================================================

/// 物理块类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 映射表（BTT）块
    Table,
    /// 数据块
    Data,
    /// 已擦除的备用块
    Spare,
    /// 坏块
    Bad,
}

//=============================================================================
// 扇区 I/O 结果
//=============================================================================

/// 成功的扇区读写附带的可靠性状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoStatus {
    /// 数据完好
    #[default]
    Clean,
    /// 数据已返回/已写入，但介质出现了边缘行为（纠正过的 ECC、换块）
    WarnReliability,
}

impl IoStatus {
    /// 合并两个状态
    pub fn merge(self, other: IoStatus) -> IoStatus {
        if self == IoStatus::WarnReliability || other == IoStatus::WarnReliability {
            IoStatus::WarnReliability
        } else {
            IoStatus::Clean
        }
    }

    /// 是否带有可靠性警告
    pub fn is_warning(self) -> bool {
        self == IoStatus::WarnReliability
    }
}

//=============================================================================
// 设备几何
//=============================================================================

/// NAND 设备几何
///
/// 对应固件的 `NAND_DRV_CFG`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandGeometry {
    /// 设备总块数
    pub block_count: u32,
    /// 每块页数
    pub pages_per_block: u32,
    /// 页数据大小（字节，不含备用区）
    pub page_size: u32,
    /// 是否由软件计算 ECC
    pub sw_ecc: bool,
}

impl NandGeometry {
    /// 创建设备几何
    pub const fn new(block_count: u32, pages_per_block: u32, page_size: u32, sw_ecc: bool) -> Self {
        Self {
            block_count,
            pages_per_block,
            page_size,
            sw_ecc,
        }
    }

    /// 校验几何参数
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size as usize % SECTOR_SIZE != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Page size must be a non-zero multiple of 512",
            ));
        }
        if self.pages_per_block < 2 || self.pages_per_block > u16::MAX as u32 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Pages per block must be in 2..=65535",
            ));
        }
        if self.block_count < 8 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Device must have at least 8 blocks",
            ));
        }
        if (self.block_count as u64) * (self.pages_per_block as u64) > u32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Row address space exceeds 32 bits",
            ));
        }
        Ok(())
    }

    /// 每页扇区数
    pub const fn sectors_per_page(&self) -> u32 {
        self.page_size / SECTOR_SIZE as u32
    }

    /// 每块扇区数
    pub const fn sectors_per_block(&self) -> u32 {
        self.sectors_per_page() * self.pages_per_block
    }

    /// 每页备用区大小（字节）
    pub const fn spare_size(&self) -> usize {
        self.sectors_per_page() as usize * SPARE_PER_SECTOR
    }

    /// 原始页大小（数据 + 备用区）
    pub const fn raw_page_size(&self) -> usize {
        self.page_size as usize + self.spare_size()
    }

    /// 每个映射表扇区的表项数（EPS）
    pub const fn entries_per_table_sector(&self) -> u32 {
        self.page_size / TABLE_ENTRY_SIZE as u32
    }

    /// 设备地址周期数
    ///
    /// 行周期：总页数超过 65536 时为 3，否则为 2；
    /// 列周期：大页为 2，小页为 1。
    pub const fn addr_cycles(&self) -> u8 {
        let total_pages = self.block_count as u64 * self.pages_per_block as u64;
        let row = if total_pages > ROW_CYCLE_THRESHOLD { 3 } else { 2 };
        let col = if self.page_size > COLUMN_CYCLE_THRESHOLD { 2 } else { 1 };
        row + col
    }

    /// 由块号和块内页偏移计算行地址
    pub const fn row(&self, pbn: u32, page: u32) -> u32 {
        pbn * self.pages_per_block + page
    }

    /// 行地址所在的块号
    pub const fn pbn_of_row(&self, row: u32) -> u32 {
        row / self.pages_per_block
    }

    /// 行地址的块内页偏移
    pub const fn page_of_row(&self, row: u32) -> u32 {
        row % self.pages_per_block
    }
}

//=============================================================================
// 页布局
//=============================================================================

/// 备用区字段位置
///
/// 对应固件的 `NAND_PG_LAY`。所有偏移都相对于一个扇区的 16 字节备用区。
/// 页头字段（标签、序号、校验）只存在于扇区 0 的备用区，ECC 字存在于每个扇区。
///
/// ```text
/// [0..4)  标签 (LSN 或 TSN, LE)
/// [4]     数据损坏标记
/// [5]     坏块标记
/// [6..8)  ECC 字 (LE)
/// [8..12) 序号 (LE, 仅映射表页)
/// [12..16) 页头 CRC32 (LE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    /// 标签位置
    pub pos_lsn: u8,
    /// 损坏标记位置
    pub pos_cor: u8,
    /// 坏块标记位置
    pub pos_bbm: u8,
    /// ECC 字起始位置
    pub pos_ecc: u8,
    /// 序号位置
    pub pos_seq: u8,
    /// 页头 CRC 位置
    pub pos_hcrc: u8,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            pos_lsn: 0,
            pos_cor: 4,
            pos_bbm: 5,
            pos_ecc: 6,
            pos_seq: 8,
            pos_hcrc: 12,
        }
    }
}

impl PageLayout {
    /// 校验字段互不重叠且都在 16 字节备用区内
    pub fn validate(&self) -> Result<()> {
        let fields = [
            (self.pos_lsn as usize, 4usize),
            (self.pos_cor as usize, 1),
            (self.pos_bbm as usize, 1),
            (self.pos_ecc as usize, 2),
            (self.pos_seq as usize, 4),
            (self.pos_hcrc as usize, 4),
        ];

        let mut used = [false; SPARE_PER_SECTOR];
        for (pos, len) in fields {
            if pos + len > SPARE_PER_SECTOR {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "Page layout field exceeds spare area",
                ));
            }
            for slot in &mut used[pos..pos + len] {
                if *slot {
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        "Page layout fields overlap",
                    ));
                }
                *slot = true;
            }
        }
        Ok(())
    }

    /// 第 `sector` 个扇区备用区在原始页中的偏移
    pub fn spare_offset(&self, geometry: &NandGeometry, sector: u32) -> usize {
        geometry.page_size as usize + sector as usize * SPARE_PER_SECTOR
    }
}
