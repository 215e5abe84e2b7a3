//! 宿主侧的 tfs 工具箱：内存 NOR 模拟器、镜像文件设备，
//! 以及模拟掉电的故障注入设备。

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use tfs::FlashDevice;
use tfs::PAGE_SIZE;

/// 内存里的 NOR 闪存：按真实器件的规则行事。
/// 读写必须 4 字节对齐，编程是按位与（1 写不进去），
/// 擦除把整页恢复为 0xFF。
pub struct NorFlash {
    mem: Mutex<Vec<u8>>,
    /// 宿主持久化的磨损均衡提示
    hint: Mutex<u16>,
}

impl NorFlash {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            // 出厂状态未知，用全 0 逼着上层先格式化
            mem: Mutex::new(vec![0u8; num_blocks * PAGE_SIZE]),
            hint: Mutex::new(0),
        }
    }

    /// 当前持久化的磨损均衡提示
    pub fn hint(&self) -> u16 {
        *self.hint.lock().unwrap()
    }

    /// 整片内容的快照，测试用来直接核对闪存真值
    pub fn snapshot(&self) -> Vec<u8> {
        self.mem.lock().unwrap().clone()
    }
}

fn check_access(addr: usize, len: usize) {
    assert_eq!(addr % 4, 0, "flash access must be word aligned");
    assert_eq!(len % 4, 0, "flash access must be whole words");
}

impl FlashDevice for NorFlash {
    fn read(&self, addr: usize, buf: &mut [u8]) {
        check_access(addr, buf.len());
        let mem = self.mem.lock().unwrap();
        buf.copy_from_slice(&mem[addr..addr + buf.len()]);
    }

    fn write(&self, addr: usize, buf: &[u8]) {
        check_access(addr, buf.len());
        let mut mem = self.mem.lock().unwrap();
        for (dst, src) in mem[addr..addr + buf.len()].iter_mut().zip(buf) {
            *dst &= src;
        }
    }

    fn erase_sector(&self, sector: usize) {
        let mut mem = self.mem.lock().unwrap();
        mem[sector * PAGE_SIZE..(sector + 1) * PAGE_SIZE].fill(0xFF);
    }

    fn set_last_block_erased(&self, block: u16) {
        *self.hint.lock().unwrap() = block;
    }
}

/// 镜像文件上的 NOR 设备，打包工具用
pub struct FlashFile(pub Mutex<File>);

impl FlashDevice for FlashFile {
    fn read(&self, addr: usize, buf: &mut [u8]) {
        check_access(addr, buf.len());
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(addr as u64)).expect("seeking error");
        file.read_exact(buf).expect("short image read");
    }

    fn write(&self, addr: usize, buf: &[u8]) {
        check_access(addr, buf.len());
        let mut file = self.0.lock().unwrap();
        // NOR 编程是按位与，先读旧值
        let mut old = vec![0u8; buf.len()];
        file.seek(SeekFrom::Start(addr as u64)).expect("seeking error");
        file.read_exact(&mut old).expect("short image read");
        for (dst, src) in old.iter_mut().zip(buf) {
            *dst &= src;
        }
        file.seek(SeekFrom::Start(addr as u64)).expect("seeking error");
        file.write_all(&old).expect("short image write");
    }

    fn erase_sector(&self, sector: usize) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * PAGE_SIZE) as u64))
            .expect("seeking error");
        file.write_all(&[0xFF; PAGE_SIZE]).expect("short image write");
    }
}

/// 掉电注入：武装后还能写入若干个字，之后一切写入与擦除
/// 都无声丢失，如同电源已断。测试随后丢弃句柄、
/// 在幸存的字节上重新挂载来检验修复逻辑。
pub struct FaultyFlash {
    inner: Arc<NorFlash>,
    /// 剩余可写字数；`None` 即未武装，全部透传
    budget: Mutex<Option<usize>>,
}

impl FaultyFlash {
    pub fn new(inner: Arc<NorFlash>) -> Self {
        Self {
            inner,
            budget: Mutex::new(None),
        }
    }

    /// 再允许写入 `words` 个字，然后断电
    pub fn arm(&self, words: usize) {
        *self.budget.lock().unwrap() = Some(words);
    }
}

impl FlashDevice for FaultyFlash {
    fn read(&self, addr: usize, buf: &mut [u8]) {
        self.inner.read(addr, buf);
    }

    fn write(&self, addr: usize, buf: &[u8]) {
        check_access(addr, buf.len());
        let mut budget = self.budget.lock().unwrap();
        match *budget {
            None => self.inner.write(addr, buf),
            Some(ref mut words) => {
                for (i, word) in buf.chunks_exact(4).enumerate() {
                    if *words == 0 {
                        return;
                    }
                    self.inner.write(addr + i * 4, word);
                    *words -= 1;
                }
            }
        }
    }

    fn erase_sector(&self, sector: usize) {
        let mut budget = self.budget.lock().unwrap();
        match *budget {
            None => self.inner.erase_sector(sector),
            Some(0) => {}
            Some(ref mut words) => {
                *words -= 1;
                self.inner.erase_sector(sector);
            }
        }
    }

    fn set_last_block_erased(&self, block: u16) {
        if *self.budget.lock().unwrap() != Some(0) {
            self.inner.set_last_block_erased(block);
        }
    }
}
