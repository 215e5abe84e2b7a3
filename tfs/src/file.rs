//! # 文件游标层
//!
//! [`File`] 是链上的一个半开字节窗口：只记块号和偏移，
//! 与文件系统的联系全部通过显式传入的 [`Tfs`] 完成。
//! 逻辑位置 = 当前块序号 × 块容量 + 块内偏移。
//!
//! 写入永远发生在链尾；变长文件的结尾以最后一个非 0xFF
//! 字节为准，所以变长文件的末字节不能写 0xFF。

use crate::layout::{BlockFlag, BlockId};
use crate::Tfs;
use crate::BLOCK_SIZE;

/// 文件游标。纯值类型，复制即快照。
#[derive(Debug, Clone, Copy)]
pub struct File {
    /// 文件首块
    pub(crate) first: BlockId,
    /// 当前块，哨兵即游标已关闭
    pub(crate) cur: BlockId,
    /// 当前块在链中的序号
    pub(crate) cur_index: u16,
    /// 当前块内偏移
    pub(crate) offset: u16,
    /// 链尾块
    pub(crate) last: BlockId,
    /// 链尾块已用字节数
    pub(crate) last_size: u16,
    /// 逻辑起点在首块内的偏移，dup 出的子视图用
    pub(crate) fb_offset: u16,
    /// 所属目录槽位号
    pub(crate) fileno: u16,
}

impl Default for File {
    /// 关闭状态的游标
    fn default() -> Self {
        Self {
            first: BlockId::SENTINEL,
            cur: BlockId::SENTINEL,
            cur_index: 0,
            offset: 0,
            last: BlockId::SENTINEL,
            last_size: 0,
            fb_offset: 0,
            fileno: 0,
        }
    }
}

impl File {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.cur.is_valid()
    }

    /// 自文件逻辑起点的当前位置；关闭的游标返回 `None`
    #[inline]
    pub fn position(&self) -> Option<usize> {
        self.is_open()
            .then(|| self.cur_index as usize * BLOCK_SIZE + self.offset as usize)
    }

    /// 顺序读入 `buf`，到逻辑末尾为止。
    /// 返回实际读到的字节数；游标关闭或已在末尾且毫无进展时返回 `None`。
    pub fn read(&mut self, fs: &mut Tfs, buf: &mut [u8]) -> Option<usize> {
        if !self.is_open() {
            return None;
        }
        let mut size = buf.len();
        if self.cur == self.last && self.offset as usize + size > self.last_size as usize {
            if self.offset >= self.last_size {
                return None;
            }
            size = (self.last_size - self.offset) as usize;
        }

        let mut sz = size;
        while sz > 0 {
            let chunk = fs.cache_read(self.cur, self.offset as usize);
            let n = chunk.len().min(sz);
            if n > 0 {
                let filled = size - sz;
                buf[filled..filled + n].copy_from_slice(&chunk[..n]);
                sz -= n;
                self.offset += n as u16;
            }
            if self.offset as usize >= BLOCK_SIZE {
                let next = fs.successor_of(self.cur);
                if !next.is_valid() {
                    self.offset = BLOCK_SIZE as u16;
                    return Some(size - sz);
                }
                self.cur = next;
                self.cur_index += 1;
                self.offset -= BLOCK_SIZE as u16;
                // 跨进末块后重新截断到逻辑末尾
                if self.cur == self.last && self.offset as usize + sz > self.last_size as usize {
                    let cut = (self.last_size - self.offset) as usize;
                    size -= sz - cut;
                    sz = cut;
                }
            }
        }
        Some(size)
    }

    /// 读一个字节
    pub fn read_byte(&mut self, fs: &mut Tfs) -> Option<u8> {
        let mut b = [0u8; 1];
        (self.read(fs, &mut b) == Some(1)).then(|| b[0])
    }

    /// 自逻辑起点绝对定位。目标超出末尾时停在末尾并返回 false。
    pub fn seek(&mut self, fs: &mut Tfs, pos: usize) -> bool {
        if !self.is_open() {
            return false;
        }
        let blockno = pos / BLOCK_SIZE;
        let pos = pos + self.fb_offset as usize;

        if self.cur_index as usize > blockno {
            self.cur_index = 0;
            self.cur = self.first;
        }
        while (self.cur_index as usize) < blockno {
            let next = fs.successor_of(self.cur);
            if !next.is_valid() {
                self.offset = self.last_size;
                return false;
            }
            self.cur = next;
            self.cur_index += 1;
        }

        self.offset = (pos % BLOCK_SIZE) as u16;
        if self.cur == self.last && self.offset > self.last_size {
            self.offset = self.last_size;
            return false;
        }
        true
    }

    /// 追加写。数据总是接在链尾之后，写满一块就再挂一块；
    /// 分配失败时短写，返回已写入的字节数。
    ///
    /// 变长文件靠尾部扫描找结尾，末字节写 0xFF 会被当作未写过。
    pub fn write(&mut self, fs: &mut Tfs, buf: &[u8]) -> Option<usize> {
        if !self.is_open() {
            return None;
        }
        let size = buf.len();
        let mut sz = size;
        while sz > 0 {
            let win = fs.cache_write(self.last, self.last_size as usize, sz);
            let n = win.len().min(sz);
            if n > 0 {
                let filled = size - sz;
                win[..n].copy_from_slice(&buf[filled..filled + n]);
                sz -= n;
                self.last_size += n as u16;
            }
            if self.last_size as usize >= BLOCK_SIZE {
                let Some(nb) = fs.allocate(BlockFlag::Normal) else {
                    self.last_size = BLOCK_SIZE as u16;
                    return Some(size - sz);
                };
                fs.chain_to(self.last, nb);
                self.last = nb;
                self.last_size -= BLOCK_SIZE as u16;
            }
        }
        Some(size)
    }

    /// 把自 `pos` 起 `len` 字节覆写为 `mask`，不动游标位置。
    /// NOR 只能清位，`mask` 必须是既有内容的位子集，清零就传 0。
    /// 范围触及逻辑末尾之外时截断，链提前结束返回 false。
    pub fn erase(&mut self, fs: &mut Tfs, pos: usize, len: usize, mask: u8) -> bool {
        if !self.is_open() {
            return false;
        }
        let oldpos = self.position().unwrap_or(0);
        if !self.seek(fs, pos) {
            self.seek(fs, oldpos);
            return false;
        }
        let mut erb = self.cur;
        let mut offset = self.offset as usize;
        self.seek(fs, oldpos);

        let mut sz = len;
        if erb == self.last && offset + sz > self.last_size as usize {
            sz = (self.last_size as usize).saturating_sub(offset);
        }
        while sz > 0 {
            let win = fs.cache_write(erb, offset, sz);
            let n = win.len().min(sz);
            if n > 0 {
                win[..n].fill(mask);
                sz -= n;
                offset += n;
            }
            if offset >= BLOCK_SIZE {
                let next = fs.successor_of(erb);
                if !next.is_valid() {
                    return false;
                }
                erb = next;
                offset -= BLOCK_SIZE;
                if erb == self.last && offset + sz > self.last_size as usize {
                    sz = self.last_size as usize - offset;
                }
            }
        }
        true
    }

    /// 派生一个独立子视图：逻辑起点移到原文件的 `pos`，
    /// 长度限定为 `len`（`None` 则到原文件末尾）。
    /// 复合文件按此从归档里切出成员。视图只应读取。
    pub fn dup(&mut self, fs: &mut Tfs, pos: usize, len: Option<usize>) -> File {
        let mut f = *self;
        if !self.is_open() {
            return f;
        }
        if pos != 0 {
            self.seek(fs, pos);
            f.first = self.cur;
            f.cur = self.cur;
            f.fb_offset = self.offset;
            f.offset = 0;
            f.cur_index = 0;
        }
        if let Some(len) = len {
            self.seek(fs, pos + len);
            f.last = self.cur;
            f.last_size = self.offset;
        }
        f
    }

    /// 冲刷并关闭游标。文件保持变长（目录里不记长度）。
    pub fn close(&mut self, fs: &mut Tfs) {
        fs.flush_cache();
        self.cur = BlockId::SENTINEL;
    }

    /// 以当前长度封口成定长文件后关闭：
    /// 末块字节数写进目录项，此后结尾不再依赖尾部扫描。
    pub fn close_fixed(&mut self, fs: &mut Tfs) {
        fs.flush_cache();
        fs.fix_size(self.fileno, self.last_size);
        self.cur = BlockId::SENTINEL;
    }
}
