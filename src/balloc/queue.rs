//! 就绪队列
//!
//! 预擦除、可立即分配的数据块（对应固件的 `PbnQ`）。

use alloc::collections::VecDeque;

/// 预擦除块队列
#[derive(Debug, Clone)]
pub struct ReadyQueue {
    blocks: VecDeque<u32>,
    depth: usize,
}

impl ReadyQueue {
    /// 创建指定深度的队列
    pub fn new(depth: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// 入队；队列已满或块已在队列中时返回 false
    pub fn push(&mut self, pbn: u32) -> bool {
        if self.is_full() || self.contains(pbn) {
            return false;
        }
        self.blocks.push_back(pbn);
        true
    }

    /// 取出最早入队的块
    pub fn pop(&mut self) -> Option<u32> {
        self.blocks.pop_front()
    }

    pub fn contains(&self, pbn: u32) -> bool {
        self.blocks.contains(&pbn)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.depth
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().copied()
    }
}
