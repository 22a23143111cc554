//! 页缓存项
//!
//! 对应固件的 `PAGE_CACHE { row, buf }`

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::types::EccStatus;

bitflags! {
    /// 页缓存项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// 数据与介质一致
        const UPTODATE  = 0x01;
        /// 读出时 ECC 已纠正
        const CORRECTED = 0x02;
        /// 页头带有损坏标记，或读出时 ECC 不可纠正
        const CORRUPT   = 0x04;
    }
}

/// 缓存的原始页
pub struct PageBuffer {
    /// 行地址
    pub row: u32,
    /// 页数据 + 备用区
    pub data: Vec<u8>,
    /// 状态标志
    pub flags: PageFlags,
}

impl core::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("row", &self.row)
            .field("data_len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl PageBuffer {
    /// 创建缓存项
    pub fn new(row: u32, data: Vec<u8>) -> Self {
        Self {
            row,
            data,
            flags: PageFlags::empty(),
        }
    }

    pub fn is_uptodate(&self) -> bool {
        self.flags.contains(PageFlags::UPTODATE)
    }

    pub fn mark_uptodate(&mut self) {
        self.flags.insert(PageFlags::UPTODATE);
    }

    pub fn is_corrupt(&self) -> bool {
        self.flags.contains(PageFlags::CORRUPT)
    }

    /// 按读出时的 ECC 结果设置标志
    pub fn set_ecc(&mut self, ecc: EccStatus) {
        self.flags.remove(PageFlags::CORRECTED | PageFlags::CORRUPT);
        match ecc {
            EccStatus::NoError => {}
            EccStatus::Corrected => self.flags.insert(PageFlags::CORRECTED),
            EccStatus::Uncorrected => self.flags.insert(PageFlags::CORRUPT),
        }
    }

    /// 缓存项对应的 ECC 结果
    pub fn ecc(&self) -> EccStatus {
        if self.flags.contains(PageFlags::CORRUPT) {
            EccStatus::Uncorrected
        } else if self.flags.contains(PageFlags::CORRECTED) {
            EccStatus::Corrected
        } else {
            EccStatus::NoError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_page_flags() {
        let mut buf = PageBuffer::new(7, vec![0u8; 16]);
        assert!(!buf.is_uptodate());
        buf.mark_uptodate();
        buf.set_ecc(EccStatus::Corrected);
        assert_eq!(buf.ecc(), EccStatus::Corrected);
        buf.set_ecc(EccStatus::Uncorrected);
        assert!(buf.is_corrupt());
        assert_eq!(buf.ecc(), EccStatus::Uncorrected);
        assert!(buf.is_uptodate());
    }
}
