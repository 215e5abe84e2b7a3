use core::mem;

use tfs::layout::{BlockDesc, BlockFlag, BlockId, FileDesc};
use tfs::{BLOCK_SIZE, NAME_SIZE, PAGE_SIZE};

#[test]
fn on_flash_sizes() {
    assert_eq!(NAME_SIZE + 4, mem::size_of::<FileDesc>());
    assert_eq!(FileDesc::SIZE, mem::size_of::<FileDesc>());
    assert_eq!(2, mem::size_of::<BlockDesc>());
    assert_eq!(PAGE_SIZE - 2, BLOCK_SIZE);
}

#[test]
fn descriptor_packing() {
    let desc = BlockDesc::new(BlockId::new(0x1234), BlockFlag::Normal);
    assert_eq!(desc.raw(), 0x5234);
    assert_eq!(desc.successor(), BlockId::new(0x1234));
    assert_eq!(desc.flag(), BlockFlag::Normal);

    assert_eq!(BlockDesc::ERASED.flag(), BlockFlag::Erased);
    assert!(!BlockDesc::ERASED.successor().is_valid());
    assert_eq!(BlockDesc::RETIRED.flag(), BlockFlag::Dirty);
}

#[test]
fn transitions_only_clear_bits() {
    let erased = BlockDesc::ERASED;
    let normal_tail = BlockDesc::new(BlockId::SENTINEL, BlockFlag::Normal);
    let system_tail = BlockDesc::new(BlockId::SENTINEL, BlockFlag::System);
    let chained = BlockDesc::new(BlockId::new(7), BlockFlag::Normal);

    assert!(erased.permits(normal_tail));
    assert!(erased.permits(system_tail));
    assert!(normal_tail.permits(chained));
    assert!(normal_tail.permits(BlockDesc::RETIRED));
    assert!(system_tail.permits(BlockDesc::RETIRED));
    // 系统块不能就地改成普通块：那得把已清的位写回 1
    assert!(!system_tail.permits(chained));
    assert!(!BlockDesc::RETIRED.permits(erased));

    // 系统态链尾接上后继，状态位不动
    let system_chained = BlockDesc::new(BlockId::new(7), BlockFlag::System);
    assert!(system_tail.permits(system_chained));
}

#[test]
fn file_desc_markers() {
    let unused = FileDesc::default();
    assert!(unused.is_end());
    assert!(!unused.is_tombstone());
    assert_eq!(unused.first_block_raw(), 0xFFFF);

    let fd = FileDesc::new(*b"settings.bin", BlockId::new(3));
    assert!(!fd.is_end());
    assert!(!fd.is_tombstone());
    assert_eq!(fd.first_block(), BlockId::new(3));
    assert_eq!(fd.fixed_size(), None);
    assert_eq!(fd.as_bytes().len(), FileDesc::SIZE);
}
