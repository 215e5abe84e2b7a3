//! # Twilight File System
//!
//! 面向 NOR 闪存的追加写文件系统：
//! 闪存只能以整页擦除（擦后全 1），写入只能把 1 改成 0，
//! 读写均为 4 字节粒度。
//!
//! 每页末尾两字节是块描述符，把所有页串成单链；
//! 目录本身也是一条链，其头块带魔数。
//! 文件只支持顺序读、尾部追加、区间清零与定长封口。

#![no_std]

extern crate alloc;

/* tfs 的整体架构，自下而上 */

// 闪存设备接口层：读写、整页擦除与两个宿主回调
mod flash_dev;
pub use flash_dev::FlashDevice;

// 闪存数据结构层：块描述符与目录项
pub mod layout;

// 缓存层：全局唯一的页内读写缓冲
mod cache;

// 块管理层：挂载、格式化、分配与磨损均衡
mod fs;
pub use fs::{MountError, Tfs};

// 文件游标层：链上的顺序读写
mod file;
pub use file::File;

// 目录层：目录项的查找、回收整理与遍历
mod dir;
pub use dir::Dir;

/// 目录头块起始处的魔数（小端）
pub const MAGIC: u32 = 0xBABA_DEDA;

/// 页大小，即擦除单位
pub const PAGE_SIZE: usize = 4096;
/// 每块数据容量，页末两字节留给描述符
pub const BLOCK_SIZE: usize = PAGE_SIZE - 2;
/// 读写缓冲大小
pub const CACHE_SIZE: usize = 256;
/// 文件名长度，必须是 4 的倍数
pub const NAME_SIZE: usize = 12;
/// 14 位后继编号所限的最大块数
pub const MAX_BLOCKS: usize = 0x3FFE;
/// 超过任何合法文件长度的定位目标，seek 到此即文件末尾
pub const SEEK_END: usize = 0x0400_0000;

const _: () = assert!(NAME_SIZE >= 4 && NAME_SIZE % 4 == 0);
const _: () = assert!(PAGE_SIZE % CACHE_SIZE == 0);
