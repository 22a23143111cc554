//! CRC32 校验和计算
//!
//! 为页头（备用区中的标签、序号、损坏标记）提供校验和

use crc32fast::Hasher;

/// 计算页头校验和
///
/// 覆盖标签、序号和损坏标记，按小端序拼接。
pub fn header_crc(tag: u32, seq: u32, cor: u8) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&tag.to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[cor]);
    hasher.finalize()
}
