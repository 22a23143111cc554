//! 上层介质接口
//!
//! 目录/日志层通过 [`SectorDevice`] 访问任何可按扇区寻址的介质（对应固件的 `FAT_DRV`
//! 驱动表）。FTL 是其中一种实现；并行 flash、SPI flash、存储卡等介质实现同一个 trait。

use crate::error::{Error, ErrorKind, Result};
use crate::ftl::Ftl;
use crate::nand::NandDriver;
use crate::types::IoStatus;

/// 介质信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    /// 客户可见的扇区数
    pub block_cnt: u32,
    /// 读扇区大小
    pub read_blen: u32,
    /// 写扇区大小
    pub write_blen: u32,
}

/// 设备控制命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceCtrl {
    /// 低级格式化
    Format,
}

/// 扇区设备接口
pub trait SectorDevice {
    /// 初始化介质
    fn init(&mut self) -> Result<()>;

    /// 关闭介质
    fn uninit(&mut self) -> Result<()>;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lsn` - 起始扇区
    /// * `buf` - 目标缓冲区（大小至少为 count * 512）
    /// * `count` - 扇区数
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8], count: u32) -> Result<IoStatus>;

    /// 写入扇区
    fn write_sectors(&mut self, lsn: u32, buf: &[u8], count: u32) -> Result<IoStatus>;

    /// 介质信息
    fn read_info(&mut self) -> Result<MediaInfo>;

    /// 设备控制
    fn device_ctrl(&mut self, cmd: DeviceCtrl) -> Result<()> {
        let _ = cmd;
        Err(Error::new(ErrorKind::Unsupported, "Control command not supported"))
    }
}

impl<D: NandDriver> SectorDevice for Ftl<D> {
    fn init(&mut self) -> Result<()> {
        Ftl::init(self)
    }

    fn uninit(&mut self) -> Result<()> {
        Ftl::uninit(self)
    }

    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8], count: u32) -> Result<IoStatus> {
        Ftl::read_sectors(self, lsn, buf, count)
    }

    fn write_sectors(&mut self, lsn: u32, buf: &[u8], count: u32) -> Result<IoStatus> {
        Ftl::write_sectors(self, lsn, buf, count)
    }

    fn read_info(&mut self) -> Result<MediaInfo> {
        Ftl::read_info(self)
    }

    fn device_ctrl(&mut self, cmd: DeviceCtrl) -> Result<()> {
        match cmd {
            DeviceCtrl::Format => self.format(),
        }
    }
}
