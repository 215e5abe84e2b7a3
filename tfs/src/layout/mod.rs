//! # 闪存数据结构层
//!
//! tfs 的闪存布局：每页前 4094 字节存数据，
//! 页末一个对齐字承载 16 位块描述符；
//! 目录文件从偏移 4（魔数之后）起密排定长目录项。

mod desc;
pub use desc::{BlockDesc, BlockFlag, BlockId};

mod file_desc;
pub use file_desc::FileDesc;
