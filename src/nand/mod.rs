//! NAND 设备抽象
//!
//! 提供驱动接口和页级编解码。
//!
//! - nand/device.rs 定义驱动接口 [`NandDriver`] 和包装器 [`NandDev`]，
//!   后者负责软件 ECC、页头编码和坏块标记
//! - nand/spare.rs 编解码扇区 0 备用区中的页头
//! - nand/ecc.rs 是每扇区的汉明校验
//! - nand/ram.rs 是内存模拟器 [`RamNand`]，支持故障注入

mod device;
pub mod ecc;
mod ram;
mod spare;

pub use device::{NandDev, NandDriver, NandStats};
pub use ram::RamNand;
pub use spare::{decode_header, encode_header, PageState, SpareHeader};
