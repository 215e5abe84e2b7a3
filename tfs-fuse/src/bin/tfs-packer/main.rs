mod cli;

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use cli::Cli;
use tfs::{Dir, FlashDevice, Tfs, NAME_SIZE, PAGE_SIZE};
use tfs_fuse::FlashFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nimage={:?}", cli.source, cli.image);

    let flash: Arc<dyn FlashDevice> = Arc::new(FlashFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len((cli.blocks * PAGE_SIZE) as u64).unwrap();

        fd
    })));

    let mut fs = Tfs::format(flash, 0, cli.blocks);

    let names = fs::read_dir(&cli.source)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<Vec<_>, _>>()?;

    for name in names {
        let name = name.to_str().expect("source file name is not UTF-8");
        assert!(
            name.len() <= NAME_SIZE,
            "file name {name:?} longer than {NAME_SIZE} bytes"
        );

        let mut host_file = File::open(cli.source.join(name))?;
        let mut data: Vec<u8> = Vec::new();
        host_file.read_to_end(&mut data)?;

        let mut file = fs.create(name.as_bytes()).expect("image out of space");
        let written = file.write(&mut fs, &data).unwrap();
        assert_eq!(written, data.len(), "image out of space");
        file.close_fixed(&mut fs);
        println!("packed {name:?}: {} bytes", data.len());
    }

    let mut dir = Dir::new();
    while dir.next(&mut fs) {
        let name = String::from_utf8_lossy(dir.name().unwrap()).into_owned();
        let size = dir.size(&mut fs).unwrap();
        println!("{name:<12} {size:>8} bytes");
    }

    Ok(())
}
