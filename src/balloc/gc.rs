//! 回收
//!
//! 选择回收对象并擦除回收块。

use crate::error::Result;
use crate::nand::{NandDev, NandDriver};

/// 回收擦除的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaimed {
    /// 擦除成功，块可重新使用
    Erased,
    /// 擦除失败，块已标记为坏块
    Retired,
}

/// 选择回收对象：存活页最少者，同数时取 PBN 最小者
///
/// # 参数
///
/// * `blocks` - (PBN, 存活页数) 序列
pub fn select_victim<I>(blocks: I) -> Option<(u32, usize)>
where
    I: IntoIterator<Item = (u32, usize)>,
{
    blocks
        .into_iter()
        .min_by_key(|&(pbn, live)| (live, pbn))
}

/// 擦除一个已无存活数据的块
///
/// 擦除失败时标记为坏块；其他错误（超时等）原样返回。
pub fn reclaim_block<D: NandDriver>(dev: &mut NandDev<D>, pbn: u32) -> Result<Reclaimed> {
    match dev.erase_block(pbn) {
        Ok(()) => {
            log::debug!("[GC] reclaimed pbn={}", pbn);
            Ok(Reclaimed::Erased)
        }
        Err(e) if e.is_media_failure() => {
            log::warn!("[GC] erase failed on pbn={}, retiring", pbn);
            dev.mark_bad(pbn);
            Ok(Reclaimed::Retired)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nand::RamNand;
    use crate::types::{NandGeometry, PageLayout};
    use alloc::vec;

    #[test]
    fn test_select_fewest_live_then_lowest_pbn() {
        assert_eq!(select_victim(vec![(9, 2), (4, 1), (7, 1)]), Some((4, 1)));
        assert_eq!(select_victim(vec![(3, 0)]), Some((3, 0)));
        assert_eq!(select_victim(vec![]), None);
    }

    #[test]
    fn test_reclaim_retires_on_erase_failure() {
        let geo = NandGeometry::new(16, 4, 512, false);
        let mut dev = NandDev::new(RamNand::new(geo), geo, PageLayout::default()).unwrap();
        dev.open().unwrap();

        assert_eq!(reclaim_block(&mut dev, 5).unwrap(), Reclaimed::Erased);
        dev.driver_mut().fail_next_erase(6);
        assert_eq!(reclaim_block(&mut dev, 6).unwrap(), Reclaimed::Retired);

        let mut buf = dev.page_buffer();
        assert!(dev.is_bad(6, &mut buf).unwrap());
    }
}
