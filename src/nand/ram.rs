//! 内存 NAND 模拟器
//!
//! 用于测试和主机端仿真。行为上遵守 NAND 的约束：
//!
//! - 页在两次擦除之间只能编程一次，重复编程返回 `Fatal`
//! - 擦除把整块恢复为 0xFF
//!
//! 并支持故障注入：指定行的 ECC 结果、一次性的编程/擦除失败、比特翻转、出厂坏块。

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;

use super::device::NandDriver;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{EccStatus, NandGeometry, PageLayout};

/// 内存 NAND 设备
pub struct RamNand {
    geometry: NandGeometry,
    raw_page: usize,
    /// 所有页的原始内容，按行地址连续存放
    cells: Vec<u8>,
    programmed: Vec<bool>,
    erase_counts: Vec<u32>,
    ecc_faults: BTreeMap<u32, EccStatus>,
    program_faults: BTreeSet<u32>,
    erase_faults: BTreeSet<u32>,
    reads: u64,
    writes: u64,
    initialized: bool,
}

impl RamNand {
    /// 创建一个全部擦除的设备
    pub fn new(geometry: NandGeometry) -> Self {
        let rows = (geometry.block_count * geometry.pages_per_block) as usize;
        let raw_page = geometry.raw_page_size();
        Self {
            geometry,
            raw_page,
            cells: vec![ERASED_BYTE; rows * raw_page],
            programmed: vec![false; rows],
            erase_counts: vec![0; geometry.block_count as usize],
            ecc_faults: BTreeMap::new(),
            program_faults: BTreeSet::new(),
            erase_faults: BTreeSet::new(),
            reads: 0,
            writes: 0,
            initialized: false,
        }
    }

    pub fn geometry(&self) -> &NandGeometry {
        &self.geometry
    }

    /// 驱动是否处于 init 状态
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn check_row(&self, row: u32) -> Result<usize> {
        let row = row as usize;
        if row >= self.programmed.len() {
            return Err(Error::new(ErrorKind::OutOfRange, "Row address out of range"));
        }
        Ok(row)
    }

    fn page(&self, row: usize) -> &[u8] {
        &self.cells[row * self.raw_page..(row + 1) * self.raw_page]
    }

    fn page_mut(&mut self, row: usize) -> &mut [u8] {
        &mut self.cells[row * self.raw_page..(row + 1) * self.raw_page]
    }

    /// 让某一行的读取报告指定的硬件 ECC 结果（持续生效直到清除）
    pub fn inject_ecc(&mut self, row: u32, status: EccStatus) {
        self.ecc_faults.insert(row, status);
    }

    /// 清除某一行的 ECC 注入
    pub fn clear_ecc(&mut self, row: u32) {
        self.ecc_faults.remove(&row);
    }

    /// 下一次对该块任意页的编程失败
    pub fn fail_next_program(&mut self, pbn: u32) {
        self.program_faults.insert(pbn);
    }

    /// 下一次对该块的擦除失败
    pub fn fail_next_erase(&mut self, pbn: u32) {
        self.erase_faults.insert(pbn);
    }

    /// 翻转一页中的一个比特（模拟电荷泄漏）
    pub fn flip_bit(&mut self, row: u32, byte: usize, bit: u8) {
        if let Ok(row) = self.check_row(row) {
            if let Some(b) = self.page_mut(row).get_mut(byte) {
                *b ^= 1 << (bit & 7);
            }
        }
    }

    /// 在块的页 0 写入出厂坏块标记
    pub fn mark_factory_bad(&mut self, pbn: u32, layout: &PageLayout) {
        let row = (pbn * self.geometry.pages_per_block) as usize;
        let bbm = self.geometry.page_size as usize + layout.pos_bbm as usize;
        if row < self.programmed.len() {
            self.page_mut(row)[bbm] = BBM_BAD;
            self.programmed[row] = true;
        }
    }

    /// 块的擦除次数
    pub fn erase_count(&self, pbn: u32) -> u32 {
        self.erase_counts.get(pbn as usize).copied().unwrap_or(0)
    }

    /// 某一行自上次擦除以来是否被编程过
    pub fn is_programmed(&self, row: u32) -> bool {
        self.programmed.get(row as usize).copied().unwrap_or(false)
    }

    /// 总页读取次数
    pub fn read_count(&self) -> u64 {
        self.reads
    }

    /// 总页编程次数
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// 总擦除次数
    pub fn total_erases(&self) -> u64 {
        self.erase_counts.iter().map(|&c| c as u64).sum()
    }
}

impl NandDriver for RamNand {
    fn init(&mut self, geometry: &NandGeometry) -> Result<()> {
        if *geometry != self.geometry {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Geometry does not match the simulated device",
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn uninit(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }

    fn page_read(&mut self, row: u32, buf: &mut [u8]) -> Result<EccStatus> {
        let idx = self.check_row(row)?;
        let raw = self.raw_page;
        buf[..raw].copy_from_slice(self.page(idx));
        self.reads += 1;
        Ok(self.ecc_faults.get(&row).copied().unwrap_or(EccStatus::NoError))
    }

    fn page_write(&mut self, row: u32, buf: &[u8]) -> Result<()> {
        let idx = self.check_row(row)?;
        if self.programmed[idx] {
            return Err(Error::new(
                ErrorKind::Fatal,
                "Page programmed twice without erase",
            ));
        }
        self.programmed[idx] = true;
        self.writes += 1;

        let raw = self.raw_page;
        let page = self.geometry.page_size as usize;
        let pbn = row / self.geometry.pages_per_block;
        let failed = self.program_faults.remove(&pbn);
        let cells = self.page_mut(idx);
        // NAND 编程只能把 1 变成 0
        for (cell, &b) in cells.iter_mut().zip(&buf[..raw]) {
            *cell &= b;
        }

        if failed {
            // 失败的编程留下不完整的备用区
            cells[page..].fill(0);
            return Err(Error::new(ErrorKind::ProgramFailed, "Program status failed"));
        }
        Ok(())
    }

    fn block_erase(&mut self, row: u32) -> Result<()> {
        self.check_row(row)?;
        let pbn = row / self.geometry.pages_per_block;
        if self.erase_faults.remove(&pbn) {
            return Err(Error::new(ErrorKind::EraseFailed, "Erase verify failed"));
        }

        let ppb = self.geometry.pages_per_block as usize;
        let first = pbn as usize * ppb;
        let raw = self.raw_page;
        self.cells[first * raw..(first + ppb) * raw].fill(ERASED_BYTE);
        self.programmed[first..first + ppb].fill(false);
        self.erase_counts[pbn as usize] += 1;
        Ok(())
    }
}
