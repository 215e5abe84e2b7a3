//! # 缓存层
//!
//! 全文件系统共用一个页内缓冲，兼作读缓存与写合并缓冲。
//! 写窗口 4 字节对齐、预填 0xFF：落盘时未写过的字节保持擦除态，
//! 满足 NOR 只清位的约束；窗口长度按需求收紧，避免整块改写。
//!
//! 换块、读写意图切换、以及任何绕过缓存直接碰闪存的代码，
//! 都必须先冲刷。

use crate::layout::BlockId;
use crate::FlashDevice;
use crate::{BLOCK_SIZE, CACHE_SIZE, PAGE_SIZE};

pub(crate) struct Cache {
    buf: [u8; CACHE_SIZE],
    /// 闪存区起始地址
    base: usize,
    /// 缓冲对应的块，哨兵即缓冲无效
    block: BlockId,
    /// 窗口在块内的起始偏移，恒 4 字节对齐
    offset: usize,
    /// 窗口长度，恒为 4 的倍数
    len: usize,
    /// 写窗口待冲刷
    dirty: bool,
}

impl Cache {
    pub fn new(base: usize) -> Self {
        Self {
            buf: [0xFF; CACHE_SIZE],
            base,
            block: BlockId::SENTINEL,
            offset: 0,
            len: 0,
            dirty: false,
        }
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.block = BlockId::SENTINEL;
        self.dirty = false;
    }

    /// 该块即将被擦除，丢弃可能缓存的旧内容
    #[inline]
    pub fn forget(&mut self, block: BlockId) {
        if self.block == block {
            self.invalidate();
        }
    }

    /// 把待冲刷的写窗口编程到闪存并使缓冲无效；
    /// 只读状态的缓冲保持有效
    pub fn flush(&mut self, dev: &dyn FlashDevice) {
        if !(self.block.is_valid() && self.dirty) {
            return;
        }
        dev.write(self.addr() + self.offset, &self.buf[..self.len]);
        self.invalidate();
    }

    /// 读取 `block` 中自 `offset` 起的一段，返回窗口内可用的字节。
    /// 末尾两字节描述符被截掉，不会出现在返回值里。
    pub fn read(&mut self, dev: &dyn FlashDevice, block: BlockId, offset: usize) -> &[u8] {
        self.flush(dev);
        if !self.covers(block, offset) {
            self.block = block;
            self.offset = offset & !3;
            self.len = CACHE_SIZE.min(PAGE_SIZE - self.offset);
            dev.read(self.addr() + self.offset, &mut self.buf[..self.len]);
        }
        let end = (self.offset + self.len).min(BLOCK_SIZE);
        let avail = end.saturating_sub(offset);
        &self.buf[offset - self.offset..][..avail]
    }

    /// 在 `block` 的 `offset` 处保留写窗口，返回可写的字节。
    /// `needed` 只用来收紧新窗口的长度，调用方可以少写。
    pub fn write(
        &mut self,
        dev: &dyn FlashDevice,
        block: BlockId,
        offset: usize,
        needed: usize,
    ) -> &mut [u8] {
        // 读缓冲不能直接当写窗口用，里面不是 0xFF
        if !self.dirty {
            self.invalidate();
        }
        if !self.covers(block, offset) {
            self.flush(dev);
            self.block = block;
            self.offset = offset & !3;
            let mut len = CACHE_SIZE.min(PAGE_SIZE - self.offset);
            // 被页尾截短多少就放宽多少，窗口贴近页尾时不再收紧
            let bound = ((offset - self.offset) + needed + (CACHE_SIZE - len) + 3) & !3;
            if bound < len {
                len = bound;
            }
            self.len = len;
            self.buf[..len].fill(0xFF);
            self.dirty = true;
        }
        let end = (self.offset + self.len).min(BLOCK_SIZE);
        let avail = end.saturating_sub(offset);
        &mut self.buf[offset - self.offset..][..avail]
    }

    /// 绕过缓存状态机的裸读，借用缓冲当暂存区。
    /// 调用方必须已经冲刷过。
    pub fn load_raw(&mut self, dev: &dyn FlashDevice, addr: usize, len: usize) -> &[u8] {
        self.invalidate();
        dev.read(addr, &mut self.buf[..len]);
        &self.buf[..len]
    }

    #[inline]
    fn covers(&self, block: BlockId, offset: usize) -> bool {
        self.block.is_valid()
            && self.block == block
            && offset >= self.offset
            && offset < self.offset + self.len
    }

    #[inline]
    fn addr(&self) -> usize {
        self.base + usize::from(self.block) * PAGE_SIZE
    }
}
