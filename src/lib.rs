//! nand_ftl: NAND flash translation layer
//!
//! 在只能整块擦除、页只能写一次的 NAND 闪存之上提供按 512 字节扇区寻址的读写接口：
//! - **异地更新**：扇区改写追加到块内下一个空闲页，块写满后换块
//! - **掉电可恢复**：块索引和映射表位置都能通过扫描页头重建
//! - **坏块管理**：编程/擦除失败的块被标记并永久排除
//! - **`no_std`**：只依赖 `alloc`，驱动通过 [`NandDriver`] trait 接入
//!
//! # 示例
//!
//! ```rust,ignore
//! use nand_ftl::{Ftl, FtlConfig, NandGeometry, RamNand, Result};
//!
//! fn main() -> Result<()> {
//!     let geometry = NandGeometry::new(256, 64, 2048, true);
//!     let mut ftl = Ftl::new(RamNand::new(geometry), FtlConfig::new(geometry))?;
//!     ftl.format()?;
//!
//!     let data = vec![0xA5u8; 512];
//!     ftl.write_sectors(7, &data, 1)?;
//!
//!     let mut buf = vec![0u8; 512];
//!     ftl.read_sectors(7, &mut buf, 1)?;
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`types`] - 几何、页布局、ECC 状态
//! - [`nand`] - 驱动接口、页编解码、内存模拟器
//! - [`index`] - 块索引
//! - [`table`] - 映射表与 BTT 日志
//! - [`cache`] - 块索引缓存和页缓存
//! - [`balloc`] - 就绪队列、分配与回收
//! - [`ftl`] - FTL 外观
//! - [`media`] - 上层扇区设备接口

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// NAND 设备抽象
pub mod nand;

/// 块索引
pub mod index;

/// 映射表
pub mod table;

/// 块/页缓存
pub mod cache;

/// 块分配与回收
pub mod balloc;

/// FTL 外观
pub mod ftl;

/// 扇区设备接口
pub mod media;

/// CRC32 校验和计算
pub(crate) mod crc;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 类型
pub use types::{BlockKind, EccStatus, IoStatus, NandGeometry, PageLayout};

// NAND
pub use nand::{NandDev, NandDriver, NandStats, PageState, RamNand, SpareHeader};

// 索引与映射表
pub use index::{BlockIndex, PageSlot};
pub use table::{BttLog, MappingTable};

// Cache
pub use cache::{CacheManager, CacheStats, IndexCache, PageBuffer, PageCache, PageFlags};

// 分配
pub use balloc::{Allocator, BlockClass, ReadyQueue};

// FTL
pub use ftl::{Ftl, FtlConfig, FtlStats, FtlStatus};

// 介质接口
pub use media::{DeviceCtrl, MediaInfo, SectorDevice};
