//! FTL 外观
//!
//! [`Ftl`] 是一个卷的全部状态：NAND 设备、映射表、块/页缓存、分配器和设备状态。
//! 调用者负责串行化同一个卷上的操作；不同的卷互不共享状态。
//!
//! - ftl/config.rs 配置与状态标志
//! - ftl/read.rs 扇区读取
//! - ftl/write.rs 扇区写入、换块和强制回收
//!
//! # 示例
//!
//! ```rust,ignore
//! use nand_ftl::{Ftl, FtlConfig, NandGeometry, RamNand};
//!
//! let geometry = NandGeometry::new(1024, 64, 2048, false);
//! let mut ftl = Ftl::new(RamNand::new(geometry), FtlConfig::new(geometry))?;
//!
//! if ftl.init().is_err() {
//!     ftl.format()?;
//! }
//!
//! ftl.write_sectors(0, &data, 4)?;
//! let status = ftl.read_sectors(0, &mut buf, 4)?;
//! if status.is_warning() {
//!     // 数据已返回，但介质出现了可纠正错误
//! }
//! ftl.uninit()?;
//! ```

mod config;
mod read;
mod write;


pub use config::{FtlConfig, FtlStatus};

use alloc::vec::Vec;

use crate::balloc::Allocator;
use crate::cache::{CacheManager, CacheStats};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::index::BlockIndex;
use crate::media::MediaInfo;
use crate::nand::{NandDev, NandDriver, NandStats};
use crate::table::MappingTable;
use crate::types::EccStatus;

/// FTL 统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct FtlStats {
    /// NAND 访问统计
    pub nand: NandStats,
    /// 映射表扇区缓存
    pub table_cache: CacheStats,
    /// 块索引缓存
    pub block_cache: CacheStats,
    /// 页缓存
    pub page_cache: CacheStats,
    /// 坏块总数（BTT 区域 + 数据区）
    pub bad_blocks: usize,
    /// 就绪队列深度
    pub ready_blocks: usize,
}

/// NAND 闪存转换层
pub struct Ftl<D> {
    dev: NandDev<D>,
    cfg: FtlConfig,
    table: MappingTable,
    caches: CacheManager,
    alloc: Allocator,
    status: FtlStatus,
    /// 最近写入的 LBN（对应固件的 `CurrLBN`）
    curr_lbn: Option<u32>,
    /// 下一次写操作前要强制回收的 LBN（对应固件的 `GcLBN`）
    gc_lbn: Option<u32>,
    /// 扣除超额坏块后客户可用的 LBN 数
    usable_lbns: u32,
    /// 待写入页
    page_buf: Vec<u8>,
    /// 换块时复制页
    copy_buf: Vec<u8>,
    /// 扫描和分类
    scratch: Vec<u8>,
}

impl<D: NandDriver> Ftl<D> {
    /// 创建 FTL 实例
    ///
    /// 校验配置并一次性分配所有缓冲区，不访问介质。
    pub fn new(driver: D, cfg: FtlConfig) -> Result<Self> {
        cfg.validate()?;
        let geo = cfg.geometry;
        let dev = NandDev::new(driver, geo, cfg.layout)?;
        let table = MappingTable::new(
            geo,
            cfg.num_data_blocks(),
            (cfg.btt_start, cfg.btt_end),
            (cfg.data_start, cfg.data_end),
            cfg.cached_table_sectors,
        )?;
        let caches = CacheManager::new(
            cfg.cached_blocks,
            cfg.cached_pages,
            geo.raw_page_size(),
            geo.pages_per_block,
        )?;
        let alloc = Allocator::new(
            cfg.data_start,
            cfg.data_end,
            READY_QUEUE_DEPTH,
            cfg.gc_low_water,
        );

        let page_buf = dev.page_buffer();
        let copy_buf = dev.page_buffer();
        let scratch = dev.page_buffer();
        let usable_lbns = cfg.num_data_blocks();

        Ok(Self {
            dev,
            cfg,
            table,
            caches,
            alloc,
            status: FtlStatus::empty(),
            curr_lbn: None,
            gc_lbn: None,
            usable_lbns,
            page_buf,
            copy_buf,
            scratch,
        })
    }

    /// 初始化卷
    ///
    /// 打开驱动，从 BTT 区域重建映射表，普查数据区。
    ///
    /// # 错误
    ///
    /// - `Unformatted` - 介质上找不到完整的映射表；驱动保持打开，可以直接 `format`
    /// - 驱动 init 的错误
    pub fn init(&mut self) -> Result<()> {
        self.dev.open()?;
        self.status = FtlStatus::OPEN;
        self.caches.clear();
        self.curr_lbn = None;
        self.gc_lbn = None;

        self.table.mount(&mut self.dev)?;
        self.alloc
            .census(&mut self.dev, &mut self.table, &mut self.scratch)?;
        self.refresh_capacity()?;
        self.status.insert(FtlStatus::FORMATTED);

        log::info!(
            "[FTL] mounted: {} logical blocks, {} sectors, {} bad blocks",
            self.usable_lbns,
            self.capacity(),
            self.bad_block_count()
        );
        Ok(())
    }

    /// 关闭卷
    ///
    /// 写回映射表后调用驱动的 uninit。
    pub fn uninit(&mut self) -> Result<()> {
        if self.status.contains(FtlStatus::FORMATTED) {
            self.table.flush(&mut self.dev)?;
        }
        self.caches.clear();
        self.status = FtlStatus::empty();
        self.dev.close()?;
        log::info!("[FTL] unmounted");
        Ok(())
    }

    /// 格式化卷
    ///
    /// 先重写 BTT 区域（空映射表），再擦除数据区所有好块并重建就绪队列。
    /// 坏块计数按本次格式化发现的坏块重新计算。
    pub fn format(&mut self) -> Result<()> {
        self.dev.open()?;
        self.status = FtlStatus::OPEN;
        self.caches.clear();
        self.curr_lbn = None;
        self.gc_lbn = None;

        self.table.format(&mut self.dev)?;
        self.alloc.format(&mut self.dev, &mut self.scratch)?;
        self.refresh_capacity()?;
        self.status.insert(FtlStatus::FORMATTED);

        log::info!(
            "[FTL] formatted: {} logical blocks, {} bad blocks",
            self.usable_lbns,
            self.bad_block_count()
        );
        Ok(())
    }

    /// 按数据区坏块数重新计算可用 LBN 数
    ///
    /// 保留块吸收坏块，但至少留一个好块用于换块；超出的坏块从容量中扣除。
    ///
    /// # 错误
    ///
    /// 数据区好块不足两个时返回 `Allocation`
    fn refresh_capacity(&mut self) -> Result<()> {
        let limit = self.cfg.num_data_blocks();
        let good = self
            .cfg
            .data_blocks()
            .saturating_sub(self.alloc.bad_count() as u32);
        self.usable_lbns = limit.min(good.saturating_sub(1));

        if self.usable_lbns == 0 {
            log::error!("[FTL] no usable data blocks ({} good)", good);
            return Err(Error::new(ErrorKind::Allocation, "Too many bad data blocks"));
        }
        if self.usable_lbns < limit {
            log::warn!(
                "[FTL] bad blocks exceed reserve, capacity reduced to {} of {} logical blocks",
                self.usable_lbns,
                limit
            );
        }
        Ok(())
    }

    /// 卷是否可以读写
    fn check_ready(&self) -> Result<()> {
        if !self.status.contains(FtlStatus::OPEN) {
            return Err(Error::new(ErrorKind::NotInitialized, "FTL not initialized"));
        }
        if !self.status.contains(FtlStatus::FORMATTED) {
            return Err(Error::new(ErrorKind::Unformatted, "Medium is not formatted"));
        }
        Ok(())
    }

    /// 校验扇区范围和缓冲区长度
    fn check_range(&self, lsn: u32, count: u32, len: usize) -> Result<()> {
        let end = lsn as u64 + count as u64;
        if end > self.capacity() as u64 {
            return Err(Error::new(ErrorKind::InvalidInput, "Sector range beyond capacity"));
        }
        if len < count as usize * SECTOR_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer too small"));
        }
        Ok(())
    }

    /// 块索引（缓存未命中时扫描）
    fn index_of(&mut self, pbn: u32) -> Result<&mut BlockIndex> {
        let dev = &mut self.dev;
        let scratch = &mut self.scratch;
        self.caches
            .blocks
            .get_or_load(pbn, || BlockIndex::scan(dev, pbn, scratch))
    }

    /// 读取一页，优先使用页缓存
    fn fetch(&mut self, row: u32, out: &mut [u8]) -> Result<EccStatus> {
        if let Some(ecc) = self.caches.pages.lookup(row, out) {
            return Ok(ecc);
        }
        let ecc = self.dev.read_page(row, out)?;
        self.caches.pages.store(row, out, ecc);
        Ok(ecc)
    }

    /// LSN 所在页的行地址；未写入时返回 None
    pub fn locate(&mut self, lsn: u32) -> Result<Option<u32>> {
        self.check_ready()?;
        self.check_range(lsn, 1, SECTOR_SIZE)?;
        let geo = self.cfg.geometry;
        let lbn = lsn / geo.sectors_per_block();
        let lpage = (lsn % geo.sectors_per_block()) / geo.sectors_per_page();

        let pbn = match self.table.lookup(&mut self.dev, lbn)? {
            Some(pbn) => pbn,
            None => return Ok(None),
        };
        Ok(self.index_of(pbn)?.locate(lpage).map(|page| geo.row(pbn, page)))
    }

    /// 所有 (LBN, PBN) 映射
    pub fn mapped_blocks(&mut self) -> Result<Vec<(u32, u32)>> {
        self.check_ready()?;
        self.table.mapped_entries(&mut self.dev)
    }

    /// 坏块总数
    pub fn bad_block_count(&self) -> usize {
        self.alloc.bad_count() + self.table.btt().bad_count()
    }

    /// 最近一次物理页读取的 ECC 结果
    pub fn last_ecc(&self) -> EccStatus {
        self.dev.last_ecc()
    }

    /// 最近分配的数据块
    pub fn last_dbn(&self) -> u32 {
        self.alloc.last_dbn()
    }

    /// 最近写入的 BTT 块
    pub fn last_tbn(&self) -> u32 {
        self.table.btt().last_tbn()
    }

    pub fn curr_lbn(&self) -> Option<u32> {
        self.curr_lbn
    }

    /// 等待强制回收的 LBN
    pub fn gc_lbn(&self) -> Option<u32> {
        self.gc_lbn
    }

    pub fn status(&self) -> FtlStatus {
        self.status
    }

    pub fn config(&self) -> &FtlConfig {
        &self.cfg
    }

    /// 客户可用的逻辑块数
    pub fn usable_lbns(&self) -> u32 {
        self.usable_lbns
    }

    /// 客户可见的扇区数
    pub fn capacity(&self) -> u32 {
        self.usable_lbns * self.cfg.geometry.sectors_per_block()
    }

    /// 报告客户可见的扇区数和扇区大小
    ///
    /// 扇区数在格式化和挂载时按数据区坏块数计算，见 [`Ftl::usable_lbns`]。
    pub fn read_info(&self) -> Result<MediaInfo> {
        self.check_ready()?;
        Ok(MediaInfo {
            block_cnt: self.capacity(),
            read_blen: SECTOR_SIZE as u32,
            write_blen: SECTOR_SIZE as u32,
        })
    }

    pub fn stats(&self) -> FtlStats {
        FtlStats {
            nand: self.dev.stats(),
            table_cache: self.table.stats(),
            block_cache: self.caches.blocks.stats(),
            page_cache: self.caches.pages.stats(),
            bad_blocks: self.bad_block_count(),
            ready_blocks: self.alloc.queue().len(),
        }
    }

    /// 获取底层驱动的引用
    pub fn driver(&self) -> &D {
        self.dev.driver()
    }

    /// 获取底层驱动的可变引用
    ///
    /// 绕过 FTL 直接修改介质后，缓存可能与介质不一致。
    pub fn driver_mut(&mut self) -> &mut D {
        self.dev.driver_mut()
    }

    /// 取回底层驱动（不写回任何东西）
    pub fn into_driver(self) -> D {
        self.dev.into_driver()
    }
}
