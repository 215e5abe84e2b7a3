//! # 目录层
//!
//! 目录是一个特殊的系统文件：头块状态为系统态、
//! 起始 4 字节是魔数，其后密排定长目录项。
//! 查找就是顺序扫描，删除只清名字首字节留下墓碑，
//! 墓碑攒多了由回收整理重写一份紧凑目录。
//!
//! 建档顺序保证任意时刻掉电都可修复：先分配首块再写目录项，
//! 挂载时把"有项无块"的残槽补成墓碑、把无主的普通块作废。

use alloc::vec;

use log::{debug, warn};

use crate::layout::{BlockFlag, BlockId, FileDesc};
use crate::File;
use crate::Tfs;
use crate::{BLOCK_SIZE, CACHE_SIZE, MAGIC, NAME_SIZE, PAGE_SIZE, SEEK_END};

/// 目录头部（魔数）占用的字节数，目录项从这之后开始
const DIR_HEADER: usize = 4;

/// 按 strncmp 语义归一化文件名：截到 NAME_SIZE 并补零
fn normalize(name: &[u8]) -> [u8; NAME_SIZE] {
    let mut buf = [0u8; NAME_SIZE];
    let n = name.len().min(NAME_SIZE);
    buf[..n].copy_from_slice(&name[..n]);
    buf
}

fn valid_name(name: &[u8]) -> bool {
    !name.is_empty() && name[0] != 0x00 && name[0] != 0xFF
}

impl Tfs {
    /// 打开文件。`create` 为真时不存在就建档。
    /// 名字按前缀比较，最长 NAME_SIZE 字节；
    /// 首字节不能是 0x00 或 0xFF。
    pub fn open(&mut self, name: &[u8], create: bool) -> Option<File> {
        if !valid_name(name) {
            return None;
        }
        let name = normalize(name);
        match self.find_file_desc(&name) {
            Some((fileno, fd)) => Some(self.open_desc(&fd, fileno)),
            None if create => self.do_create(name),
            None => None,
        }
    }

    /// 新建文件，同名旧文件先删除
    pub fn create(&mut self, name: &[u8]) -> Option<File> {
        if !valid_name(name) {
            return None;
        }
        self.remove(name);
        self.do_create(normalize(name))
    }

    /// 删除文件：槽位打墓碑，然后从尾往头逐块作废文件链。
    /// 中途掉电也安全：剩下的块挂载时按无主块回收。
    pub fn remove(&mut self, name: &[u8]) {
        let Some((fileno, fd)) = self.find_file_desc(&normalize(name)) else {
            return;
        };

        let mut dir = self.dir;
        dir.seek(self, DIR_HEADER + fileno as usize * FileDesc::SIZE);
        let (bl, offs) = (dir.cur, dir.offset as usize);
        self.dir = dir;
        self.dir_patch(bl, offs, &[0x00]);
        self.tombstones += 1;

        loop {
            let mut tail = BlockId::SENTINEL;
            let mut b = fd.first_block();
            while b.is_valid() {
                let desc = self.desc_of(b);
                if desc.flag() != BlockFlag::Normal {
                    break;
                }
                tail = b;
                b = desc.successor();
            }
            if !tail.is_valid() {
                break;
            }
            self.retire(tail);
            self.free_blocks += 1;
        }
    }

    pub fn exists(&mut self, name: &[u8]) -> bool {
        self.find_file_desc(&normalize(name)).is_some()
    }

    /// 文件逻辑长度；不存在返回 `None`
    pub fn get_size(&mut self, name: &[u8]) -> Option<usize> {
        let (_, fd) = self.find_file_desc(&normalize(name))?;
        Some(self.size_of_desc(&fd))
    }
}

impl Tfs {
    /// 以 `head` 为目录头初始化常驻目录游标。
    /// 逐槽扫描得到槽位总数与墓碑数；`checkfs` 为真时顺带
    /// 做一致性修复：补墓碑、回收不在任何链上的普通块。
    pub(crate) fn init_dir(&mut self, head: BlockId, checkfs: bool) {
        self.dir = File {
            first: head,
            cur: head,
            cur_index: 0,
            offset: DIR_HEADER as u16,
            last: BlockId::SENTINEL,
            last_size: 0,
            fb_offset: 0,
            fileno: 0,
        };
        self.tombstones = 0;

        let mut marked = vec![0u8; (self.num_blocks() + 7) / 8];
        let mut mark = |bits: &mut [u8], b: BlockId| {
            let i = usize::from(b);
            bits[i / 8] |= 1 << (i & 7);
        };

        let mut dir = self.dir;
        let mut fileno = 0u16;
        loop {
            let (bl, offs) = (dir.cur, dir.offset);
            let mut fd = FileDesc::default();
            let got = dir.read(self, fd.as_bytes_mut());
            if got != Some(FileDesc::SIZE) || fd.is_end() {
                // 结束标记（或链到头都没有标记）就是目录的逻辑末尾
                dir.last = bl;
                dir.last_size = offs;
                self.next_file = fileno;
                break;
            }
            if fd.is_tombstone() {
                self.tombstones += 1;
            } else if fd.first_block_raw() == 0xFFFF {
                // 建档写了目录项、还没分配到块就断电了：补成墓碑
                warn!("tombstoning half-created slot {fileno}");
                self.dir_patch(bl, offs as usize, &[0x00]);
                self.tombstones += 1;
            } else {
                let mut b = fd.first_block();
                while b.is_valid() {
                    mark(&mut marked, b);
                    b = self.successor_of(b);
                }
            }
            fileno += 1;
        }
        self.dir = dir;

        if checkfs {
            let mut b = head;
            while b.is_valid() {
                mark(&mut marked, b);
                b = self.successor_of(b);
            }
            for i in 0..self.num_blocks() {
                let b = BlockId::from(i);
                if marked[i / 8] & (1 << (i & 7)) == 0
                    && self.desc_of(b).flag() == BlockFlag::Normal
                {
                    // 删除中断留下的无主块
                    warn!("reclaiming lost block {i}");
                    self.retire(b);
                    self.free_blocks += 1;
                }
            }
            self.cache.invalidate();
        }
    }

    /// 顺序扫描目录找名字，返回槽位号与目录项
    fn find_file_desc(&mut self, name: &[u8; NAME_SIZE]) -> Option<(u16, FileDesc)> {
        let mut dir = self.dir;
        dir.seek(self, DIR_HEADER);
        let mut fileno = 0u16;
        let found = loop {
            let mut fd = FileDesc::default();
            if dir.read(self, fd.as_bytes_mut()) != Some(FileDesc::SIZE) || fd.is_end() {
                break None;
            }
            if fd.name_bytes() == name {
                break Some((fileno, fd));
            }
            fileno += 1;
        };
        self.dir = dir;
        found
    }

    /// 由目录项构造读游标：走链找到尾块，
    /// 变长文件再扫出末块的实际字节数
    pub(crate) fn open_desc(&mut self, fd: &FileDesc, fileno: u16) -> File {
        let first = fd.first_block();
        let mut last = first;
        let mut next = self.successor_of(first);
        while next.is_valid() {
            last = next;
            next = self.successor_of(next);
        }
        let last_size = match fd.fixed_size() {
            Some(size) => size,
            None => self.find_variable_end(last) as u16,
        };
        File {
            first,
            cur: first,
            cur_index: 0,
            offset: 0,
            last,
            last_size,
            fb_offset: 0,
            fileno,
        }
    }

    pub(crate) fn size_of_desc(&mut self, fd: &FileDesc) -> usize {
        let mut f = self.open_desc(fd, 0);
        f.seek(self, SEEK_END);
        f.position().unwrap_or(0)
    }

    /// 变长文件的结尾：从块尾往前按缓冲粒度扫描，
    /// 最后一个非 0xFF 字节之后就是逻辑末尾。
    /// NOR 上 0xFF 与"没写过"无法区分，所以尾部的 0xFF 不算内容。
    fn find_variable_end(&mut self, bl: BlockId) -> usize {
        self.flush_cache();
        let addr = self.block_addr(bl);
        let mut offs = PAGE_SIZE - CACHE_SIZE;
        loop {
            let chunk = self.cache.load_raw(&*self.dev, addr + offs, CACHE_SIZE);
            // 最高一段去掉页末两字节描述符
            let limit = if offs + CACHE_SIZE == PAGE_SIZE {
                CACHE_SIZE - 2
            } else {
                CACHE_SIZE
            };
            for i in (0..limit).rev() {
                if chunk[i] != 0xFF {
                    return offs + i + 1;
                }
            }
            if offs == 0 {
                return 0;
            }
            offs -= CACHE_SIZE;
        }
    }

    /// 建档：必要时先整理或扩展目录，再分配首块、追加目录项。
    /// 顺序不可倒：目录项必须晚于块分配落盘，挂载才能修复残局。
    fn do_create(&mut self, name: [u8; NAME_SIZE]) -> Option<File> {
        if self.dir.last_size as usize + FileDesc::SIZE >= BLOCK_SIZE {
            let mut dir = self.dir;
            dir.seek(self, SEEK_END);
            let dirpos = dir.position().unwrap_or(0);
            self.dir = dir;

            // 紧凑后的目录装得下就整理；没墓碑可挤时按扩容后的大小估算
            let need = if self.tombstones != 0 {
                dirpos
            } else {
                dirpos + FileDesc::SIZE
            };
            if (need + BLOCK_SIZE - 1) / BLOCK_SIZE < self.free_blocks {
                self.defrag_dir();
            } else if self.free_blocks < 2 {
                return None;
            }
        }
        if self.free_blocks < 1 {
            return None;
        }

        let first = self.allocate(BlockFlag::Normal)?;
        let fd = FileDesc::new(name, first);
        let fileno = self.next_file;
        self.next_file += 1;

        let mut dir = self.dir;
        dir.write(self, fd.as_bytes());
        self.dir = dir;
        self.flush_cache();

        Some(File {
            first,
            cur: first,
            cur_index: 0,
            offset: 0,
            last: first,
            last_size: 0,
            fb_offset: 0,
            fileno,
        })
    }

    /// 回收整理：把在用目录项誊进一个新系统块，
    /// 写上魔数之后抹掉旧头的魔数并作废整条旧链。
    /// 任何一步掉电，挂载都恰好认出一个目录头。
    pub(crate) fn defrag_dir(&mut self) -> bool {
        let Some(head) = self.allocate(BlockFlag::System) else {
            return false;
        };
        let mut nd = File {
            first: head,
            cur: head,
            cur_index: 0,
            offset: 0,
            last: head,
            last_size: DIR_HEADER as u16,
            fb_offset: 0,
            fileno: 0,
        };

        let old_first = self.dir.first;
        self.next_file = 0;
        let mut dir = self.dir;
        dir.seek(self, DIR_HEADER);
        loop {
            let mut fd = FileDesc::default();
            if dir.read(self, fd.as_bytes_mut()) != Some(FileDesc::SIZE) || fd.is_end() {
                break;
            }
            if fd.is_tombstone() {
                continue;
            }
            nd.write(self, fd.as_bytes());
            self.next_file += 1;
        }

        // 目录项全部落盘后，新头才配得上魔数
        self.flush_cache();
        self.dev
            .write(self.block_addr(head), &MAGIC.to_le_bytes());
        self.dev
            .write(self.block_addr(old_first), &0u32.to_le_bytes());

        let mut b = old_first;
        while b.is_valid() {
            let next = self.successor_of(b);
            self.retire(b);
            self.free_blocks += 1;
            b = next;
        }
        self.cache.invalidate();

        self.tombstones = 0;
        self.dir = nd;
        debug!(
            "directory defragmented: {} entries, new head at block {}",
            self.next_file,
            usize::from(head)
        );
        true
    }

    /// 封口：把末块字节数写进目录项的长度字段
    pub(crate) fn fix_size(&mut self, fileno: u16, size: u16) {
        let mut dir = self.dir;
        dir.seek(
            self,
            DIR_HEADER + fileno as usize * FileDesc::SIZE + NAME_SIZE + 2,
        );
        let (bl, offs) = (dir.cur, dir.offset as usize);
        self.dir = dir;
        self.dir_patch(bl, offs, &size.to_le_bytes());
    }

    /// 对目录既有内容打补丁：经写缓存逐块写入，
    /// 窗口自动对齐、其余字节保持 0xFF 不动原数据。
    /// 槽位可能横跨块界（块容量不是槽长的整数倍），这里一并处理。
    fn dir_patch(&mut self, mut block: BlockId, mut offset: usize, bytes: &[u8]) {
        let mut i = 0;
        while i < bytes.len() {
            let win = self.cache_write(block, offset, bytes.len() - i);
            let n = win.len().min(bytes.len() - i);
            if n > 0 {
                win[..n].copy_from_slice(&bytes[i..i + n]);
                i += n;
                offset += n;
            }
            if offset >= BLOCK_SIZE {
                let next = self.successor_of(block);
                if !next.is_valid() {
                    break;
                }
                block = next;
                offset -= BLOCK_SIZE;
            }
        }
        self.flush_cache();
    }
}

/// 目录遍历游标：依槽位顺序产出在用文件，跳过墓碑
#[derive(Debug, Default)]
pub struct Dir {
    fd: FileDesc,
    fileno: u16,
    valid: bool,
}

impl Dir {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前进到下一个在用文件，没有了返回 false
    pub fn next(&mut self, fs: &mut Tfs) -> bool {
        let mut dir = fs.dir;
        self.valid = dir.seek(fs, DIR_HEADER + self.fileno as usize * FileDesc::SIZE);
        if !self.valid {
            fs.dir = dir;
            return false;
        }
        loop {
            self.valid = dir.read(fs, self.fd.as_bytes_mut()) == Some(FileDesc::SIZE);
            self.fileno += 1;
            if !self.valid {
                break;
            }
            if !self.fd.is_tombstone() {
                self.valid = !self.fd.is_end();
                break;
            }
        }
        fs.dir = dir;
        self.valid
    }

    /// 当前文件名，截到第一个 0 字节
    pub fn name(&self) -> Option<&[u8]> {
        if !self.valid {
            return None;
        }
        let name = self.fd.name_bytes();
        let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        Some(&name[..len])
    }

    pub fn size(&self, fs: &mut Tfs) -> Option<usize> {
        self.valid.then(|| fs.size_of_desc(&self.fd))
    }

    /// 是否已封口（定长）
    pub fn is_fixed(&self) -> bool {
        self.valid && self.fd.fixed_size().is_some()
    }
}
