use derive_more::{From, Into};

/// 页（块）编号，14 位有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BlockId(u16);

/// 块状态，占描述符高 2 位。
/// 取值顺序使得每次合法迁移都只清除位：
/// 擦除态全 1，作废态全 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BlockFlag {
    Dirty = 0,
    Normal = 1,
    System = 2,
    Erased = 3,
}

/// 16 位块描述符：高 2 位状态 + 低 14 位后继块编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BlockDesc(u16);

impl BlockId {
    /// 链尾哨兵，同时用作无效编号
    pub const SENTINEL: Self = Self(0x3FFF);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw & 0x3FFF)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0x3FFF
    }
}

impl From<BlockId> for usize {
    #[inline]
    fn from(id: BlockId) -> Self {
        id.0 as usize
    }
}

impl From<usize> for BlockId {
    #[inline]
    fn from(raw: usize) -> Self {
        Self::new(raw as u16)
    }
}

impl BlockDesc {
    /// 整页擦除后的自然描述符：(哨兵, 擦除态)
    pub const ERASED: Self = Self(0xFFFF);

    /// 作废描述符：(0, 作废态)
    pub const RETIRED: Self = Self(0);

    #[inline]
    pub const fn new(successor: BlockId, flag: BlockFlag) -> Self {
        Self(successor.0 & 0x3FFF | (flag as u16) << 14)
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn successor(self) -> BlockId {
        BlockId(self.0 & 0x3FFF)
    }

    pub fn flag(self) -> BlockFlag {
        match self.0 >> 14 {
            0 => BlockFlag::Dirty,
            1 => BlockFlag::Normal,
            2 => BlockFlag::System,
            _ => BlockFlag::Erased,
        }
    }

    /// NOR 只能清位：新描述符必须是旧值的位子集
    #[inline]
    pub fn permits(self, next: Self) -> bool {
        next.0 & !self.0 == 0
    }
}
