use std::sync::Arc;

use tfs::{Dir, MountError, Tfs, BLOCK_SIZE, MAGIC, PAGE_SIZE, SEEK_END};

use crate::{FaultyFlash, NorFlash};

const BLOCKS: usize = 16;

fn formatted() -> (Arc<NorFlash>, Tfs) {
    let flash = Arc::new(NorFlash::new(BLOCKS));
    let fs = Tfs::format(flash.clone(), 0, BLOCKS);
    (flash, fs)
}

fn remount(flash: &Arc<NorFlash>, blocks: usize) -> Tfs {
    Tfs::mount(flash.clone(), 0, blocks, flash.hint() as usize).unwrap()
}

/// 从镜像快照直接读块状态：0 作废、1 普通、2 系统、3 擦除
fn desc_flag(image: &[u8], block: usize) -> u16 {
    let word = &image[(block + 1) * PAGE_SIZE - 4..][..4];
    let word = u32::from_le_bytes(word.try_into().unwrap());
    (word >> 16) as u16 >> 14
}

fn free_by_image(image: &[u8], blocks: usize) -> usize {
    (0..blocks)
        .filter(|&b| matches!(desc_flag(image, b), 0 | 3))
        .count()
}

fn magic_count(image: &[u8], blocks: usize) -> usize {
    (0..blocks)
        .filter(|&b| {
            let word = &image[b * PAGE_SIZE..][..4];
            desc_flag(image, b) == 2 && u32::from_le_bytes(word.try_into().unwrap()) == MAGIC
        })
        .count()
}

fn list_names(fs: &mut Tfs) -> Vec<Vec<u8>> {
    let mut names = Vec::new();
    let mut dir = Dir::new();
    while dir.next(fs) {
        names.push(dir.name().unwrap().to_vec());
    }
    names
}

#[test]
fn format_creates_empty_directory() {
    let (flash, mut fs) = formatted();
    assert_eq!(fs.freespace(), (BLOCKS - 1) * BLOCK_SIZE);
    assert!(list_names(&mut fs).is_empty());

    let image = flash.snapshot();
    assert_eq!(desc_flag(&image, 0), 2);
    assert_eq!(magic_count(&image, BLOCKS), 1);
    for b in 1..BLOCKS {
        assert_eq!(desc_flag(&image, b), 3);
    }
}

#[test]
fn mount_without_directory_fails() {
    let flash = Arc::new(NorFlash::new(BLOCKS));
    assert_eq!(
        Tfs::mount(flash, 0, BLOCKS, 0).err(),
        Some(MountError::NoDirectory)
    );
}

#[test]
fn fixed_size_roundtrip() {
    let (_, mut fs) = formatted();
    let data: Vec<u8> = (1..=10).collect();

    let mut file = fs.create(b"a").unwrap();
    assert_eq!(file.write(&mut fs, &data), Some(10));
    file.close_fixed(&mut fs);

    assert_eq!(fs.get_size(b"a"), Some(10));
    let mut file = fs.open(b"a", false).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(file.read(&mut fs, &mut buf), Some(10));
    assert_eq!(&buf[..10], &data[..]);
    // 已到逻辑末尾，再读毫无进展
    assert_eq!(file.read(&mut fs, &mut buf), None);
}

#[test]
fn write_across_block_boundary() {
    let (flash, mut fs) = formatted();
    let data = vec![0x5A; BLOCK_SIZE + 5];

    let mut file = fs.create(b"b").unwrap();
    assert_eq!(file.write(&mut fs, &data), Some(BLOCK_SIZE + 5));
    file.close(&mut fs);

    assert_eq!(fs.get_size(b"b"), Some(BLOCK_SIZE + 5));
    let mut file = fs.open(b"b", false).unwrap();
    assert!(file.seek(&mut fs, BLOCK_SIZE));
    let mut buf = [0u8; 5];
    assert_eq!(file.read(&mut fs, &mut buf), Some(5));
    assert_eq!(buf, [0x5A; 5]);
    assert_eq!(file.position(), Some(BLOCK_SIZE + 5));

    let image = flash.snapshot();
    assert_eq!(free_by_image(&image, BLOCKS) * BLOCK_SIZE, fs.freespace());
}

#[test]
fn variable_file_keeps_content() {
    let (_, mut fs) = formatted();

    let mut file = fs.create(b"c").unwrap();
    assert_eq!(file.write(&mut fs, b"hello\n"), Some(6));
    file.close(&mut fs);

    // 变长文件：结尾全靠尾部扫描恢复
    assert_eq!(fs.get_size(b"c"), Some(6));
    let mut file = fs.open(b"c", false).unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(file.read(&mut fs, &mut buf), Some(6));
    assert_eq!(&buf, b"hello\n");

    let mut dir = Dir::new();
    assert!(dir.next(&mut fs));
    assert!(!dir.is_fixed());
}

#[test]
fn directory_iteration_after_remove() {
    let (flash, mut fs) = formatted();
    for i in 0..10u8 {
        let name = format!("f{i}");
        let mut file = fs.create(name.as_bytes()).unwrap();
        assert_eq!(file.write(&mut fs, &[i; 100]), Some(100));
        file.close_fixed(&mut fs);
    }

    fs.remove(b"f3");
    fs.remove(b"f7");
    assert!(!fs.exists(b"f3"));
    assert!(!fs.exists(b"f7"));
    while fs.process_erase() {}

    drop(fs);
    let mut fs = remount(&flash, BLOCKS);
    let expected: Vec<Vec<u8>> = [0, 1, 2, 4, 5, 6, 8, 9]
        .iter()
        .map(|i| format!("f{i}").into_bytes())
        .collect();
    assert_eq!(list_names(&mut fs), expected);
    // 目录 1 块 + 8 个在用文件各 1 块
    assert_eq!(fs.freespace(), (BLOCKS - 9) * BLOCK_SIZE);

    let image = flash.snapshot();
    assert_eq!(free_by_image(&image, BLOCKS) * BLOCK_SIZE, fs.freespace());
}

#[test]
fn remove_frees_whole_chain() {
    let (flash, mut fs) = formatted();
    let mut file = fs.create(b"long").unwrap();
    // 三块长的链
    let data = vec![0x33; 2 * BLOCK_SIZE + 7];
    assert_eq!(file.write(&mut fs, &data), Some(data.len()));
    file.close(&mut fs);

    let before = fs.freespace();
    fs.remove(b"long");
    assert!(!fs.exists(b"long"));
    assert_eq!(fs.freespace(), before + 3 * BLOCK_SIZE);

    let image = flash.snapshot();
    assert_eq!(free_by_image(&image, BLOCKS) * BLOCK_SIZE, fs.freespace());
}

#[test]
fn crash_during_create_is_repaired() {
    let inner = Arc::new(NorFlash::new(BLOCKS));
    let faulty = Arc::new(FaultyFlash::new(inner.clone()));
    let mut fs = Tfs::format(faulty.clone(), 0, BLOCKS);

    let mut file = fs.create(b"keep").unwrap();
    assert_eq!(file.write(&mut fs, &[0x77; 100]), Some(100));
    file.close_fixed(&mut fs);
    let before = fs.freespace();

    // 足够写完目录项的名字，写不到块号就断电
    faulty.arm(4);
    let _ = fs.create(b"x");
    drop(fs);

    let mut fs = remount(&inner, BLOCKS);
    assert!(!fs.exists(b"x"));
    assert!(fs.exists(b"keep"));
    assert_eq!(fs.freespace(), before);

    let mut file = fs.open(b"keep", false).unwrap();
    let mut buf = [0u8; 100];
    assert_eq!(file.read(&mut fs, &mut buf), Some(100));
    assert_eq!(buf, [0x77; 100]);
}

#[test]
fn no_space_then_reclaim() {
    let (flash, mut fs) = formatted();

    let mut junk = fs.create(b"junk").unwrap();
    assert_eq!(junk.write(&mut fs, &[0x11; 100]), Some(100));
    junk.close_fixed(&mut fs);

    // 把剩下的空间全部写满
    let mut big = fs.create(b"big").unwrap();
    let want = 15 * BLOCK_SIZE;
    let got = big.write(&mut fs, &vec![0x5A; want]).unwrap();
    assert_eq!(got, 14 * BLOCK_SIZE);
    big.close(&mut fs);
    assert_eq!(fs.freespace(), 0);
    assert!(!fs.process_erase());

    fs.remove(b"junk");
    assert_eq!(fs.freespace(), BLOCK_SIZE);
    assert!(fs.process_erase());
    assert!(!fs.process_erase());

    let mut file = fs.create(b"n2").unwrap();
    assert_eq!(file.write(&mut fs, &vec![0x22; BLOCK_SIZE]), Some(BLOCK_SIZE));
    file.close_fixed(&mut fs);
    assert_eq!(fs.get_size(b"n2"), Some(BLOCK_SIZE));

    let image = flash.snapshot();
    assert_eq!(free_by_image(&image, BLOCKS) * BLOCK_SIZE, fs.freespace());
}

#[test]
fn rotational_allocation() {
    let (flash, mut fs) = formatted();
    for name in [b"a", b"b", b"c"] {
        fs.create(name).unwrap().close(&mut fs);
    }
    // 格式化后从块 1 起依序分配
    let image = flash.snapshot();
    assert_eq!(desc_flag(&image, 1), 1);
    assert_eq!(desc_flag(&image, 2), 1);
    assert_eq!(desc_flag(&image, 3), 1);
    assert_eq!(desc_flag(&image, 4), 3);

    fs.remove(b"b");
    assert!(fs.process_erase());
    assert_eq!(flash.hint(), 2);

    // 查找从擦痕之后轮转，不回头复用刚擦的块
    fs.create(b"d").unwrap().close(&mut fs);
    let image = flash.snapshot();
    assert_eq!(desc_flag(&image, 2), 3);
    assert_eq!(desc_flag(&image, 4), 1);
}

#[test]
fn mount_is_idempotent() {
    let (flash, mut fs) = formatted();
    for i in 0..5u8 {
        let name = format!("f{i}");
        let mut file = fs.create(name.as_bytes()).unwrap();
        file.write(&mut fs, &[i; 200]).unwrap();
        file.close_fixed(&mut fs);
    }
    fs.remove(b"f2");
    drop(fs);

    let mut fs = remount(&flash, BLOCKS);
    let names = list_names(&mut fs);
    let free = fs.freespace();
    let image = flash.snapshot();
    drop(fs);

    let mut fs = remount(&flash, BLOCKS);
    assert_eq!(list_names(&mut fs), names);
    assert_eq!(fs.freespace(), free);
    // 第二次挂载没有任何修复可做，闪存一个位都不变
    assert_eq!(flash.snapshot(), image);
}

#[test]
fn erase_zeroes_a_range() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"e").unwrap();
    file.write(&mut fs, &[0x11; 300]).unwrap();

    assert!(file.erase(&mut fs, 8, 100, 0));
    file.close(&mut fs);

    let mut file = fs.open(b"e", false).unwrap();
    let mut buf = [0u8; 300];
    assert_eq!(file.read(&mut fs, &mut buf), Some(300));
    assert_eq!(&buf[..8], &[0x11; 8]);
    assert_eq!(&buf[8..108], &[0u8; 100]);
    assert_eq!(&buf[108..], &[0x11; 192]);
    file.close(&mut fs);
}

#[test]
fn erase_across_block_boundary() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"e2").unwrap();
    file.write(&mut fs, &vec![0x22; BLOCK_SIZE + 406]).unwrap();

    assert!(file.erase(&mut fs, 4000, 200, 0));
    file.close(&mut fs);

    let mut file = fs.open(b"e2", false).unwrap();
    assert!(file.seek(&mut fs, 3999));
    let mut buf = [0u8; 202];
    assert_eq!(file.read(&mut fs, &mut buf), Some(202));
    assert_eq!(buf[0], 0x22);
    assert_eq!(&buf[1..201], &[0u8; 200]);
    assert_eq!(buf[201], 0x22);
}

#[test]
fn erase_clamps_at_logical_end() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"e3").unwrap();
    file.write(&mut fs, &[0x44; 300]).unwrap();

    // 范围触及末尾之外：只清到逻辑末尾，不得延长变长文件
    assert!(file.erase(&mut fs, 250, 100, 0));
    file.close(&mut fs);
    assert_eq!(fs.get_size(b"e3"), Some(300));
}

#[test]
fn dup_views_a_subrange() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"arc").unwrap();
    file.write(&mut fs, b"headerPAYLOADtail").unwrap();

    let mut view = file.dup(&mut fs, 6, Some(7));
    assert!(view.seek(&mut fs, 0));
    let mut buf = [0u8; 16];
    assert_eq!(view.read(&mut fs, &mut buf), Some(7));
    assert_eq!(&buf[..7], b"PAYLOAD");

    // 子视图独立定位
    assert!(view.seek(&mut fs, 3));
    assert_eq!(view.read_byte(&mut fs), Some(b'L'));
    file.close(&mut fs);
}

#[test]
fn names_compare_by_prefix() {
    let (_, mut fs) = formatted();
    fs.create(b"exactly12byt").unwrap().close(&mut fs);

    // 超长名字截断到 NAME_SIZE 再比较
    assert!(fs.open(b"exactly12byteXX", false).is_some());
    assert!(fs.open(b"exactly12by", false).is_none());
    // 槽位 0 也找得到
    assert!(fs.exists(b"exactly12byt"));
}

#[test]
fn create_replaces_existing_file() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"cfg").unwrap();
    file.write(&mut fs, b"old").unwrap();
    file.close(&mut fs);

    let mut file = fs.create(b"cfg").unwrap();
    file.write(&mut fs, b"new!").unwrap();
    file.close(&mut fs);

    assert_eq!(fs.get_size(b"cfg"), Some(4));
    let mut file = fs.open(b"cfg", false).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut fs, &mut buf), Some(4));
    assert_eq!(&buf, b"new!");
}

#[test]
fn seek_to_end_reports_size() {
    let (_, mut fs) = formatted();
    let mut file = fs.create(b"sz").unwrap();
    file.write(&mut fs, &[9; 1234]).unwrap();
    file.close_fixed(&mut fs);

    let mut file = fs.open(b"sz", false).unwrap();
    assert!(!file.seek(&mut fs, SEEK_END));
    assert_eq!(file.position(), Some(1234));
}

const DEFRAG_BLOCKS: usize = 300;

fn filled_directory(dev: Arc<dyn tfs::FlashDevice>) -> Tfs {
    let mut fs = Tfs::format(dev, 0, DEFRAG_BLOCKS);
    // 填满整块目录：255 个槽位之后再建档就得整理或扩展
    for i in 0..255 {
        let name = format!("t{i:03}");
        fs.create(name.as_bytes()).unwrap().close(&mut fs);
    }
    for i in 0..100 {
        let name = format!("t{i:03}");
        fs.remove(name.as_bytes());
    }
    fs
}

#[test]
fn defrag_compacts_directory() {
    let flash = Arc::new(NorFlash::new(DEFRAG_BLOCKS));
    let mut fs = filled_directory(flash.clone());

    // 这次建档装不进目录尾块，触发回收整理
    fs.create(b"u0").unwrap().close(&mut fs);

    assert!(fs.exists(b"u0"));
    assert!(!fs.exists(b"t000"));
    assert!(!fs.exists(b"t099"));
    assert!(fs.exists(b"t100"));
    assert!(fs.exists(b"t254"));
    assert_eq!(magic_count(&flash.snapshot(), DEFRAG_BLOCKS), 1);

    drop(fs);
    let mut fs = remount(&flash, DEFRAG_BLOCKS);
    assert_eq!(list_names(&mut fs).len(), 156);

    let image = flash.snapshot();
    assert_eq!(
        free_by_image(&image, DEFRAG_BLOCKS) * BLOCK_SIZE,
        fs.freespace()
    );
}

#[test]
fn crash_during_defrag_keeps_one_directory() {
    let inner = Arc::new(NorFlash::new(DEFRAG_BLOCKS));
    let faulty = Arc::new(FaultyFlash::new(inner.clone()));
    let mut fs = filled_directory(faulty.clone());

    // 新目录头的描述符刚落盘、魔数还没写就断电
    faulty.arm(1);
    let _ = fs.create(b"v0");
    drop(fs);

    let mut fs = remount(&inner, DEFRAG_BLOCKS);
    assert_eq!(magic_count(&inner.snapshot(), DEFRAG_BLOCKS), 1);
    assert!(!fs.exists(b"v0"));
    assert!(fs.exists(b"t100"));
    assert!(fs.exists(b"t254"));
    // 旧目录 1 块 + 155 个在用文件各 1 块，其余全部可用
    assert_eq!(fs.freespace(), (DEFRAG_BLOCKS - 156) * BLOCK_SIZE);
}
