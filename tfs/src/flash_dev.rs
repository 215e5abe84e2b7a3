//! # 闪存设备接口层
//!
//! [`FlashDevice`] 是对 NOR 闪存驱动的抽象：
//! 按 4 字节对齐读写，按页擦除。
//! 写入只会把 1 编程为 0，擦除把整页恢复为全 1。
//!
//! 另外两个方法是宿主回调：长操作中的协作式让出，
//! 以及磨损均衡提示的持久化。

/// NOR 闪存驱动特质
pub trait FlashDevice: Send + Sync {
    /// 读取 `buf.len()` 字节。`addr` 与长度都必须 4 字节对齐。
    fn read(&self, addr: usize, buf: &mut [u8]);

    /// 编程 `buf.len()` 字节。`addr` 与长度都必须 4 字节对齐，
    /// 且调用者保证只清除位（新值是旧值的位子集，1 位不生效）。
    fn write(&self, addr: usize, buf: &[u8]);

    /// 把第 `sector` 页整页置为 0xFF
    fn erase_sector(&self, sector: usize);

    /// 协作式让出，格式化逐页擦除之间调用
    fn yield_now(&self) {}

    /// 持久化磨损均衡提示，每次成功擦除后调用
    fn set_last_block_erased(&self, block: u16) {
        let _ = block;
    }
}
