//! 备用区页头编解码
//!
//! 页头只存在于扇区 0 的备用区，所有多字节字段均为小端序。

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;
use crate::crc::header_crc;
use crate::types::{NandGeometry, PageLayout};

/// 页头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpareHeader {
    /// 数据页：页内首个 LSN；映射表页：TSN
    pub tag: u32,
    /// 序号（仅映射表页使用，数据页为 0）
    pub seq: u32,
    /// 数据复制自不可纠正的源页
    pub corrupt: bool,
}

impl SpareHeader {
    /// 数据页页头
    pub const fn data(lsn: u32) -> Self {
        Self {
            tag: lsn,
            seq: 0,
            corrupt: false,
        }
    }

    /// 映射表页页头
    pub const fn table(tsn: u32, seq: u32) -> Self {
        Self {
            tag: tsn,
            seq,
            corrupt: false,
        }
    }
}

/// 由页头推断出的页状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// 擦除后未写入
    Erased,
    /// 坏块标记非 0xFF
    Bad,
    /// 页头完整
    Valid(SpareHeader),
    /// 页头既非擦除态也无法通过校验（写入中断）
    Torn,
}

/// 解码扇区 0 备用区中的页头
pub fn decode_header(spare: &[u8], layout: &PageLayout) -> PageState {
    let lsn = layout.pos_lsn as usize;
    let cor = layout.pos_cor as usize;
    let seq = layout.pos_seq as usize;
    let hcrc = layout.pos_hcrc as usize;

    if spare[layout.pos_bbm as usize] != BBM_GOOD {
        return PageState::Bad;
    }

    let tag = LittleEndian::read_u32(&spare[lsn..lsn + 4]);
    let seq_val = LittleEndian::read_u32(&spare[seq..seq + 4]);
    let cor_val = spare[cor];
    let crc = LittleEndian::read_u32(&spare[hcrc..hcrc + 4]);

    if tag == ERASED_WORD && seq_val == ERASED_WORD && cor_val == ERASED_BYTE && crc == ERASED_WORD
    {
        return PageState::Erased;
    }

    if header_crc(tag, seq_val, cor_val) != crc {
        return PageState::Torn;
    }

    PageState::Valid(SpareHeader {
        tag,
        seq: seq_val,
        corrupt: cor_val != COR_CLEAN,
    })
}

/// 将页头编码进扇区 0 备用区
pub fn encode_header(spare: &mut [u8], layout: &PageLayout, header: &SpareHeader) {
    let lsn = layout.pos_lsn as usize;
    let seq = layout.pos_seq as usize;
    let hcrc = layout.pos_hcrc as usize;
    let cor = if header.corrupt { COR_CORRUPT } else { COR_CLEAN };

    LittleEndian::write_u32(&mut spare[lsn..lsn + 4], header.tag);
    LittleEndian::write_u32(&mut spare[seq..seq + 4], header.seq);
    spare[layout.pos_cor as usize] = cor;
    spare[layout.pos_bbm as usize] = BBM_GOOD;
    LittleEndian::write_u32(
        &mut spare[hcrc..hcrc + 4],
        header_crc(header.tag, header.seq, cor),
    );
}

/// 读取第 `sector` 个扇区的 ECC 字
pub fn read_ecc(raw: &[u8], geometry: &NandGeometry, layout: &PageLayout, sector: u32) -> u16 {
    let off = layout.spare_offset(geometry, sector) + layout.pos_ecc as usize;
    LittleEndian::read_u16(&raw[off..off + 2])
}

/// 写入第 `sector` 个扇区的 ECC 字
pub fn write_ecc(
    raw: &mut [u8],
    geometry: &NandGeometry,
    layout: &PageLayout,
    sector: u32,
    word: u16,
) {
    let off = layout.spare_offset(geometry, sector) + layout.pos_ecc as usize;
    LittleEndian::write_u16(&mut raw[off..off + 2], word);
}

/// 扇区 0 备用区
pub fn header_area<'a>(raw: &'a [u8], geometry: &NandGeometry) -> &'a [u8] {
    let start = geometry.page_size as usize;
    &raw[start..start + SPARE_PER_SECTOR]
}

/// 扇区 0 备用区（可变）
pub fn header_area_mut<'a>(raw: &'a mut [u8], geometry: &NandGeometry) -> &'a mut [u8] {
    let start = geometry.page_size as usize;
    &mut raw[start..start + SPARE_PER_SECTOR]
}
