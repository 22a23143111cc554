//! 软件 ECC
//!
//! 每个 512 字节扇区一个 16 位校验字：
//!
//! ```text
//! bit 0..12  所有置位比特下标 (byte << 3 | bit) 的异或
//! bit 12     数据奇偶校验
//! bit 13     校验字自身奇偶（使 bit 0..13 中 1 的个数为偶数）
//! bit 14..16 恒为 0
//! ```
//!
//! 单比特错误可以定位并纠正，双比特错误可以检测。
//! 校验字本身的单比特错误报告为已纠正。

use crate::types::EccStatus;

/// 未写入 ECC 的校验字（擦除状态）
pub const ECC_ERASED: u16 = 0xFFFF;

const SYNDROME_MASK: u16 = 0x0FFF;
const PARITY_BIT: u16 = 1 << 12;
const SELF_PARITY_BIT: u16 = 1 << 13;
const RESERVED_MASK: u16 = 0xC000;

/// 计算一个扇区的校验字
pub fn compute(data: &[u8]) -> u16 {
    let mut syndrome: u16 = 0;
    let mut parity: u32 = 0;

    for (i, &byte) in data.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        parity ^= byte.count_ones() & 1;
        for bit in 0..8u16 {
            if byte & (1 << bit) != 0 {
                syndrome ^= ((i as u16) << 3) | bit;
            }
        }
    }

    let mut word = (syndrome & SYNDROME_MASK) | if parity != 0 { PARITY_BIT } else { 0 };
    if word.count_ones() & 1 != 0 {
        word |= SELF_PARITY_BIT;
    }
    word
}

/// 校验字自身是否完好
fn word_intact(word: u16) -> bool {
    word & RESERVED_MASK == 0 && word.count_ones() & 1 == 0
}

/// 校验并就地纠正一个扇区
///
/// # 参数
///
/// * `data` - 扇区数据（可能被纠正）
/// * `stored` - 备用区中读出的校验字
///
/// # 返回
///
/// 扇区的纠错结果
pub fn correct(data: &mut [u8], stored: u16) -> EccStatus {
    if stored == ECC_ERASED {
        return EccStatus::NoError;
    }

    let calc = compute(data);
    if calc == stored {
        return EccStatus::NoError;
    }

    if !word_intact(stored) {
        // 校验字自身出错：数据完好当且仅当只差一位
        return if (calc ^ stored).count_ones() == 1 {
            EccStatus::Corrected
        } else {
            EccStatus::Uncorrected
        };
    }

    let diff = calc ^ stored;
    let syndrome = diff & SYNDROME_MASK;

    if diff & PARITY_BIT == 0 {
        // 偶数个比特翻转
        return EccStatus::Uncorrected;
    }

    let byte = (syndrome >> 3) as usize;
    let bit = syndrome & 7;
    match data.get_mut(byte) {
        Some(b) => {
            *b ^= 1 << bit;
            log::warn!("[ECC] corrected bit {} of byte {}", bit, byte);
            EccStatus::Corrected
        }
        None => EccStatus::Uncorrected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn sample() -> Vec<u8> {
        (0..512u32).map(|i| (i.wrapping_mul(37) ^ 0x5A) as u8).collect()
    }

    #[test]
    fn test_word_is_well_formed() {
        let word = compute(&sample());
        assert!(word_intact(word));
        // 全 0xFF 扇区的校验字为 0，和擦除状态可区分
        assert_eq!(compute(&vec![0xFFu8; 512]), 0);
    }

    #[test]
    fn test_clean_sector() {
        let mut data = sample();
        let word = compute(&data);
        assert_eq!(correct(&mut data, word), EccStatus::NoError);
        assert_eq!(data, sample());
    }

    #[test]
    fn test_single_bit_error_corrected() {
        let word = compute(&sample());
        for &(byte, bit) in &[(0usize, 0u8), (17, 3), (511, 7)] {
            let mut data = sample();
            data[byte] ^= 1 << bit;
            assert_eq!(correct(&mut data, word), EccStatus::Corrected);
            assert_eq!(data, sample());
        }
    }

    #[test]
    fn test_double_bit_error_detected() {
        let word = compute(&sample());
        let mut data = sample();
        data[3] ^= 0x01;
        data[200] ^= 0x40;
        assert_eq!(correct(&mut data, word), EccStatus::Uncorrected);
    }

    #[test]
    fn test_damaged_word_reported_as_corrected() {
        let mut data = sample();
        let word = compute(&data) ^ 0x0010;
        assert_eq!(correct(&mut data, word), EccStatus::Corrected);
        assert_eq!(data, sample());
    }

    #[test]
    fn test_erased_word_skips_check() {
        let mut data = vec![0xFFu8; 512];
        assert_eq!(correct(&mut data, ECC_ERASED), EccStatus::NoError);
    }
}
