//! NAND 设备核心类型

use alloc::vec;
use alloc::vec::Vec;

use super::ecc;
use super::spare::{self, PageState, SpareHeader};
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{EccStatus, NandGeometry, PageLayout};

/// NAND 驱动接口
///
/// 实现此 trait 以提供底层 NAND 访问。对应固件驱动表中的
/// Init/UnInit/PageRead/PageWrite/BlockErase。
///
/// 所有地址都是行地址：`pbn * pages_per_block + page`。
/// 页缓冲区由页数据和紧随其后的备用区组成，长度为
/// [`NandGeometry::raw_page_size`]。
///
/// # 示例
///
/// ```rust,ignore
/// use nand_ftl::{EccStatus, NandDriver, NandGeometry, Result};
///
/// struct MyController {
///     // ...
/// }
///
/// impl NandDriver for MyController {
///     fn page_read(&mut self, row: u32, buf: &mut [u8]) -> Result<EccStatus> {
///         // 发出读命令，等待就绪，读出数据和备用区
///         Ok(EccStatus::NoError)
///     }
///
///     fn page_write(&mut self, row: u32, buf: &[u8]) -> Result<()> {
///         // 发出编程命令，检查状态寄存器
///         Ok(())
///     }
///
///     fn block_erase(&mut self, row: u32) -> Result<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait NandDriver {
    /// 初始化控制器
    ///
    /// 默认实现什么都不做。
    fn init(&mut self, geometry: &NandGeometry) -> Result<()> {
        let _ = geometry;
        Ok(())
    }

    /// 关闭控制器
    fn uninit(&mut self) -> Result<()> {
        Ok(())
    }

    /// 读取一页（数据 + 备用区）
    ///
    /// # 返回
    ///
    /// 硬件 ECC 的结果；无硬件 ECC 的控制器返回 `NoError`
    ///
    /// # 错误
    ///
    /// 超时等硬件错误返回 `HardwareTimeout`/`DmaTimeout`
    fn page_read(&mut self, row: u32, buf: &mut [u8]) -> Result<EccStatus>;

    /// 编程一页（数据 + 备用区）
    ///
    /// # 错误
    ///
    /// 状态寄存器报告失败时返回 `ProgramFailed`
    fn page_write(&mut self, row: u32, buf: &[u8]) -> Result<()>;

    /// 擦除 `row` 所在的块
    ///
    /// # 错误
    ///
    /// 擦除校验失败时返回 `EraseFailed`
    fn block_erase(&mut self, row: u32) -> Result<()>;
}

/// NAND 访问统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NandStats {
    /// 页读取次数
    pub page_reads: u64,
    /// 页编程次数
    pub page_writes: u64,
    /// 块擦除次数
    pub block_erases: u64,
    /// 已纠正的页读取次数
    pub ecc_corrected: u64,
    /// 不可纠正的页读取次数
    pub ecc_uncorrected: u64,
}

/// NAND 设备包装器
///
/// 在驱动之上提供页编解码：软件 ECC、页头编码、坏块标记，并记录统计信息。
///
/// NandDev 本身不包含内部锁，一个实例只服务一个卷。
pub struct NandDev<D> {
    /// 底层驱动
    driver: D,
    geometry: NandGeometry,
    layout: PageLayout,
    stats: NandStats,
    /// 最近一次页读取的 ECC 结果（对应固件的 `LastECC`）
    last_ecc: EccStatus,
    opened: bool,
}

impl<D: NandDriver> NandDev<D> {
    /// 创建设备包装器
    ///
    /// # 错误
    ///
    /// 几何参数或页布局不合法时返回 `InvalidInput`
    pub fn new(driver: D, geometry: NandGeometry, layout: PageLayout) -> Result<Self> {
        geometry.validate()?;
        layout.validate()?;
        Ok(Self {
            driver,
            geometry,
            layout,
            stats: NandStats::default(),
            last_ecc: EccStatus::NoError,
            opened: false,
        })
    }

    /// 打开设备（调用驱动 init）
    pub fn open(&mut self) -> Result<()> {
        if !self.opened {
            self.driver.init(&self.geometry)?;
            self.opened = true;
            log::debug!(
                "[NAND] open: {} blocks x {} pages x {} bytes, {} addr cycles",
                self.geometry.block_count,
                self.geometry.pages_per_block,
                self.geometry.page_size,
                self.geometry.addr_cycles()
            );
        }
        Ok(())
    }

    /// 关闭设备（调用驱动 uninit）
    pub fn close(&mut self) -> Result<()> {
        if self.opened {
            self.opened = false;
            self.driver.uninit()?;
        }
        Ok(())
    }

    /// 设备是否已打开
    pub fn is_open(&self) -> bool {
        self.opened
    }

    /// 获取底层驱动的引用
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// 获取底层驱动的可变引用
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// 取回底层驱动
    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn geometry(&self) -> &NandGeometry {
        &self.geometry
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn stats(&self) -> NandStats {
        self.stats
    }

    pub fn last_ecc(&self) -> EccStatus {
        self.last_ecc
    }

    /// 分配一个原始页大小的缓冲区
    pub fn page_buffer(&self) -> Vec<u8> {
        vec![ERASED_BYTE; self.geometry.raw_page_size()]
    }

    fn check_row(&self, row: u32, len: usize) -> Result<()> {
        if row >= self.geometry.block_count * self.geometry.pages_per_block {
            return Err(Error::new(ErrorKind::OutOfRange, "Row address out of range"));
        }
        if len < self.geometry.raw_page_size() {
            return Err(Error::new(ErrorKind::InvalidInput, "Page buffer too small"));
        }
        Ok(())
    }

    /// 读取一页并校验
    ///
    /// 启用软件 ECC 时逐扇区纠错，结果与驱动报告的硬件 ECC 合并，取较严重者。
    ///
    /// # 参数
    ///
    /// * `row` - 行地址
    /// * `buf` - 目标缓冲区（至少 raw_page_size 字节）
    pub fn read_page(&mut self, row: u32, buf: &mut [u8]) -> Result<EccStatus> {
        self.check_row(row, buf.len())?;
        let raw = self.geometry.raw_page_size();
        let buf = &mut buf[..raw];

        let mut status = self.driver.page_read(row, buf)?;
        self.stats.page_reads += 1;

        if self.geometry.sw_ecc {
            for sector in 0..self.geometry.sectors_per_page() {
                let word = spare::read_ecc(buf, &self.geometry, &self.layout, sector);
                let start = sector as usize * SECTOR_SIZE;
                let data = &mut buf[start..start + SECTOR_SIZE];
                status = status.merge(ecc::correct(data, word));
            }
        }

        match status {
            EccStatus::NoError => {}
            EccStatus::Corrected => {
                self.stats.ecc_corrected += 1;
                log::warn!("[NAND] corrected ECC at row {:#x}", row);
            }
            EccStatus::Uncorrected => {
                self.stats.ecc_uncorrected += 1;
                log::error!("[NAND] uncorrectable ECC at row {:#x}", row);
            }
        }

        self.last_ecc = status;
        log::debug!("[NAND] read row={:#x} ecc={:?}", row, status);
        Ok(status)
    }

    /// 编程一页
    ///
    /// 启用软件 ECC 时先计算每个扇区的校验字并写入备用区。
    pub fn write_page(&mut self, row: u32, buf: &mut [u8]) -> Result<()> {
        self.check_row(row, buf.len())?;
        let raw = self.geometry.raw_page_size();
        let buf = &mut buf[..raw];

        if self.geometry.sw_ecc {
            for sector in 0..self.geometry.sectors_per_page() {
                let start = sector as usize * SECTOR_SIZE;
                let word = ecc::compute(&buf[start..start + SECTOR_SIZE]);
                spare::write_ecc(buf, &self.geometry, &self.layout, sector, word);
            }
        }

        self.stats.page_writes += 1;
        log::debug!("[NAND] write row={:#x}", row);
        self.driver.page_write(row, buf)
    }

    /// 带页头编程一页
    ///
    /// `buf` 的数据区由调用者填好，备用区在此处重置并写入页头。
    pub fn write_tagged(&mut self, row: u32, buf: &mut [u8], header: &SpareHeader) -> Result<()> {
        self.check_row(row, buf.len())?;
        let page = self.geometry.page_size as usize;
        let raw = self.geometry.raw_page_size();
        buf[page..raw].fill(ERASED_BYTE);
        spare::encode_header(
            spare::header_area_mut(buf, &self.geometry),
            &self.layout,
            header,
        );
        self.write_page(row, buf)
    }

    /// 擦除块
    pub fn erase_block(&mut self, pbn: u32) -> Result<()> {
        if pbn >= self.geometry.block_count {
            return Err(Error::new(ErrorKind::OutOfRange, "Block number out of range"));
        }
        self.stats.block_erases += 1;
        log::debug!("[NAND] erase pbn={}", pbn);
        self.driver.block_erase(self.geometry.row(pbn, 0))
    }

    /// 读取页并解码页头
    ///
    /// # 返回
    ///
    /// (页状态, ECC 结果)；页数据留在 `buf` 中
    pub fn read_header(&mut self, row: u32, buf: &mut [u8]) -> Result<(PageState, EccStatus)> {
        let ecc = self.read_page(row, buf)?;
        Ok((self.page_state(buf), ecc))
    }

    /// 解码已读入缓冲区的页的页头
    pub fn page_state(&self, buf: &[u8]) -> PageState {
        spare::decode_header(spare::header_area(buf, &self.geometry), &self.layout)
    }

    /// 块是否带有坏块标记
    pub fn is_bad(&mut self, pbn: u32, buf: &mut [u8]) -> Result<bool> {
        let (state, _) = self.read_header(self.geometry.row(pbn, 0), buf)?;
        Ok(state == PageState::Bad)
    }

    /// 将块永久标记为坏块
    ///
    /// 先尝试擦除，再在页 0 写入 BBM = 0。任一步失败只记录警告。
    pub fn mark_bad(&mut self, pbn: u32) {
        log::warn!("[NAND] marking pbn={} bad", pbn);
        if let Err(e) = self.erase_block(pbn) {
            log::warn!("[NAND] erase before marking pbn={} bad failed: {}", pbn, e);
        }

        let mut buf = self.page_buffer();
        let bbm = self.geometry.page_size as usize + self.layout.pos_bbm as usize;
        buf[bbm] = BBM_BAD;
        let row = self.geometry.row(pbn, 0);
        self.stats.page_writes += 1;
        if let Err(e) = self.driver.page_write(row, &buf) {
            log::warn!("[NAND] bad block marker write to pbn={} failed: {}", pbn, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nand::RamNand;

    fn dev(sw_ecc: bool) -> NandDev<RamNand> {
        let geo = NandGeometry::new(16, 4, 1024, sw_ecc);
        let mut dev = NandDev::new(RamNand::new(geo), geo, PageLayout::default()).unwrap();
        dev.open().unwrap();
        dev
    }

    #[test]
    fn test_tagged_write_and_read() {
        let mut dev = dev(true);
        let mut buf = dev.page_buffer();
        buf[..1024].fill(0x3C);
        dev.write_tagged(5, &mut buf, &SpareHeader::data(2)).unwrap();

        let mut out = dev.page_buffer();
        let (state, ecc) = dev.read_header(5, &mut out).unwrap();
        assert_eq!(ecc, EccStatus::NoError);
        assert_eq!(state, PageState::Valid(SpareHeader::data(2)));
        assert!(out[..1024].iter().all(|&b| b == 0x3C));
        assert_eq!(dev.stats().page_writes, 1);
    }

    #[test]
    fn test_sw_ecc_corrects_flipped_bit() {
        let mut dev = dev(true);
        let mut buf = dev.page_buffer();
        buf[..1024].fill(0x11);
        dev.write_tagged(0, &mut buf, &SpareHeader::data(0)).unwrap();
        dev.driver_mut().flip_bit(0, 700, 2);

        let mut out = dev.page_buffer();
        assert_eq!(dev.read_page(0, &mut out).unwrap(), EccStatus::Corrected);
        assert!(out[..1024].iter().all(|&b| b == 0x11));
        assert_eq!(dev.last_ecc(), EccStatus::Corrected);
        assert_eq!(dev.stats().ecc_corrected, 1);
    }

    #[test]
    fn test_hardware_status_merged() {
        let mut dev = dev(false);
        dev.driver_mut().inject_ecc(3, EccStatus::Uncorrected);
        let mut out = dev.page_buffer();
        assert_eq!(dev.read_page(3, &mut out).unwrap(), EccStatus::Uncorrected);
        assert_eq!(dev.stats().ecc_uncorrected, 1);
    }

    #[test]
    fn test_mark_bad() {
        let mut dev = dev(false);
        let mut buf = dev.page_buffer();
        assert!(!dev.is_bad(7, &mut buf).unwrap());
        dev.mark_bad(7);
        assert!(dev.is_bad(7, &mut buf).unwrap());
    }

    #[test]
    fn test_mark_bad_after_failed_erase() {
        let mut dev = dev(false);
        let mut buf = dev.page_buffer();

        dev.driver_mut().fail_next_erase(6);
        dev.mark_bad(6);
        assert!(dev.is_bad(6, &mut buf).unwrap());
        assert_eq!(dev.driver().erase_count(6), 0);

        // 标记写入失败时不 panic
        dev.driver_mut().fail_next_program(9);
        dev.mark_bad(9);
        assert!(dev.is_bad(9, &mut buf).unwrap());
        assert_eq!(dev.driver().erase_count(9), 1);
    }

    #[test]
    fn test_row_out_of_range() {
        let mut dev = dev(false);
        let mut buf = dev.page_buffer();
        let err = dev.read_page(64, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }
}
