//! # 块管理层
//!
//! [`Tfs`] 是挂载后的文件系统本体：持有闪存设备、
//! 全体块描述符的内存镜像、唯一的读写缓冲和目录游标。
//! 调用方拥有这个值并独占使用，文件游标一律显式借用它。
//!
//! 描述符的每次改写都是单字编程且只清位，
//! 所以任何时刻掉电，重新挂载都能把中间状态修复掉。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;

use log::{debug, info, trace, warn};

use crate::cache::Cache;
use crate::layout::{BlockDesc, BlockFlag, BlockId};
use crate::File;
use crate::FlashDevice;
use crate::{BLOCK_SIZE, MAGIC, MAX_BLOCKS, PAGE_SIZE};

/// 挂载失败的唯一硬错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountError {
    /// 没有任何带魔数的系统块，闪存上不存在目录
    NoDirectory,
}

pub struct Tfs {
    pub(crate) dev: Arc<dyn FlashDevice>,
    /// 闪存区起始地址，页对齐
    base: usize,
    num_blocks: usize,
    /// 全体描述符的内存镜像，写穿模式维护
    table: Box<[BlockDesc]>,
    pub(crate) cache: Cache,
    pub(crate) free_blocks: usize,
    /// 下一个待写的目录槽位号
    pub(crate) next_file: u16,
    /// 目录中的墓碑数，决定回收整理是否划算
    pub(crate) tombstones: u16,
    /// 磨损均衡提示：上次擦除的块，查找从它的下一块开始
    last_erased: usize,
    /// 常驻的目录游标
    pub(crate) dir: File,
}

impl Tfs {
    /// 挂载。扫描全部描述符、找到目录、修复中断操作留下的残局。
    ///
    /// `last_erased_hint` 是宿主持久化的磨损均衡提示，没有就传 0。
    pub fn mount(
        dev: Arc<dyn FlashDevice>,
        base: usize,
        num_blocks: usize,
        last_erased_hint: usize,
    ) -> Result<Self, MountError> {
        let mut fs = Self::bare(dev, base, num_blocks, last_erased_hint);

        let mut head = None;
        for i in 0..num_blocks {
            let desc = fs.read_desc(i);
            fs.table[i] = desc;
            match desc.flag() {
                BlockFlag::System => {
                    let mut word = [0u8; 4];
                    fs.dev.read(fs.block_addr(BlockId::from(i)), &mut word);
                    if u32::from_le_bytes(word) == MAGIC && head.is_none() {
                        head = Some(BlockId::from(i));
                    } else {
                        // 回收整理中断留下的旧目录头
                        warn!("retiring stray system block {i}");
                        fs.write_desc(BlockId::from(i), BlockDesc::RETIRED);
                        fs.free_blocks += 1;
                    }
                }
                BlockFlag::Dirty | BlockFlag::Erased => fs.free_blocks += 1,
                BlockFlag::Normal => {}
            }
        }

        let head = head.ok_or(MountError::NoDirectory)?;
        fs.init_dir(head, true);
        debug!(
            "mounted: dir head at block {}, {} free blocks, {} files",
            usize::from(head),
            fs.free_blocks,
            fs.next_file
        );
        Ok(fs)
    }

    /// 全片擦除并重建空目录。块 0 成为目录头。
    pub fn format(dev: Arc<dyn FlashDevice>, base: usize, num_blocks: usize) -> Self {
        let mut fs = Self::bare(dev, base, num_blocks, 0);

        for i in 0..num_blocks {
            fs.dev.yield_now();
            fs.dev.erase_sector(base / PAGE_SIZE + i);
        }
        fs.table.fill(BlockDesc::ERASED);

        let head = BlockId::from(0usize);
        fs.write_desc(head, BlockDesc::new(BlockId::SENTINEL, BlockFlag::System));
        fs.dev.write(fs.block_addr(head), &MAGIC.to_le_bytes());
        fs.free_blocks = num_blocks - 1;

        fs.init_dir(head, false);
        info!("formatted {num_blocks} blocks");
        fs
    }

    /// 剩余可写字节数
    #[inline]
    pub fn freespace(&self) -> usize {
        self.free_blocks * BLOCK_SIZE
    }

    /// 擦除一个作废块，换回一个可分配块。
    /// 没有作废块可擦时返回 false。
    pub fn process_erase(&mut self) -> bool {
        let Some(b) = self.find_with_flag(BlockFlag::Dirty) else {
            return false;
        };
        self.cache.forget(b);
        self.dev.erase_sector(self.base / PAGE_SIZE + usize::from(b));
        self.table[usize::from(b)] = BlockDesc::ERASED;
        self.last_erased = b.into();
        self.dev.set_last_block_erased(u16::from(b));
        trace!("erased block {}", usize::from(b));
        true
    }
}

impl Tfs {
    fn bare(dev: Arc<dyn FlashDevice>, base: usize, num_blocks: usize, hint: usize) -> Self {
        assert!(num_blocks <= MAX_BLOCKS, "up to 0x3ffe blocks supported");
        assert!(base % PAGE_SIZE == 0);
        Self {
            dev,
            base,
            num_blocks,
            table: vec![BlockDesc::ERASED; num_blocks].into_boxed_slice(),
            cache: Cache::new(base),
            free_blocks: 0,
            next_file: 0,
            tombstones: 0,
            last_erased: hint,
            dir: File::default(),
        }
    }

    #[inline]
    pub(crate) fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    #[inline]
    pub(crate) fn block_addr(&self, b: BlockId) -> usize {
        self.base + usize::from(b) * PAGE_SIZE
    }

    /// 块 `b` 的描述符：自身的状态 + 后继的编号
    #[inline]
    pub(crate) fn desc_of(&self, b: BlockId) -> BlockDesc {
        self.table[usize::from(b)]
    }

    #[inline]
    pub(crate) fn successor_of(&self, b: BlockId) -> BlockId {
        self.desc_of(b).successor()
    }

    /// 从闪存读出第 `i` 块的描述符，只在挂载扫描时用；
    /// 此后一律走镜像
    fn read_desc(&self, i: usize) -> BlockDesc {
        let mut word = [0u8; 4];
        self.dev
            .read(self.block_addr(BlockId::from(i)) + PAGE_SIZE - 4, &mut word);
        BlockDesc::from_raw((u32::from_le_bytes(word) >> 16) as u16)
    }

    /// 改写块描述符：先冲刷待写数据，再编程页末一个字，
    /// 字的低半保持 0xFF。成功后同步镜像。
    pub(crate) fn write_desc(&mut self, b: BlockId, desc: BlockDesc) {
        debug_assert!(
            self.desc_of(b).permits(desc),
            "descriptor of block {} would set bits: {:04x} -> {:04x}",
            usize::from(b),
            self.desc_of(b).raw(),
            desc.raw()
        );
        self.cache.flush(&*self.dev);
        let word = 0xFFFF | (desc.raw() as u32) << 16;
        self.dev
            .write(self.block_addr(b) + PAGE_SIZE - 4, &word.to_le_bytes());
        self.table[usize::from(b)] = desc;
    }

    /// 自 `last_erased + 1` 起环形查找首个指定状态的块，
    /// 让写入在整个阵列上轮转
    fn find_with_flag(&self, flag: BlockFlag) -> Option<BlockId> {
        let n = self.num_blocks;
        let start = self.last_erased + 1;
        (start..n)
            .chain(0..start.min(n))
            .map(BlockId::from)
            .find(|&b| self.desc_of(b).flag() == flag)
    }

    /// 分配一个新块，描述符初始化为（哨兵, `flag`）。
    /// 没有擦除态块时先回收一次再重试，仍失败即空间耗尽。
    pub(crate) fn allocate(&mut self, flag: BlockFlag) -> Option<BlockId> {
        let b = match self.find_with_flag(BlockFlag::Erased) {
            Some(b) => b,
            None => {
                if !self.process_erase() {
                    return None;
                }
                self.find_with_flag(BlockFlag::Erased)?
            }
        };
        self.write_desc(b, BlockDesc::new(BlockId::SENTINEL, flag));
        self.free_blocks -= 1;
        Some(b)
    }

    /// 把链尾 `prev` 接到 `next` 上。
    /// 只改后继编号，状态保持原样：目录头必须一直是系统态。
    pub(crate) fn chain_to(&mut self, prev: BlockId, next: BlockId) {
        let desc = self.desc_of(prev);
        debug_assert!(!desc.successor().is_valid(), "chaining a non-tail block");
        self.write_desc(prev, BlockDesc::new(next, desc.flag()));
    }

    /// 作废一个已脱离所有链的块
    pub(crate) fn retire(&mut self, b: BlockId) {
        self.write_desc(b, BlockDesc::RETIRED);
    }

    /// 读缓存接口，见 [`Cache::read`]
    #[inline]
    pub(crate) fn cache_read(&mut self, block: BlockId, offset: usize) -> &[u8] {
        self.cache.read(&*self.dev, block, offset)
    }

    /// 写缓存接口，见 [`Cache::write`]
    #[inline]
    pub(crate) fn cache_write(&mut self, block: BlockId, offset: usize, needed: usize) -> &mut [u8] {
        self.cache.write(&*self.dev, block, offset, needed)
    }

    #[inline]
    pub(crate) fn flush_cache(&mut self) {
        self.cache.flush(&*self.dev);
    }
}
