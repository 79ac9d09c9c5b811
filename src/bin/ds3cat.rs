//! Print an inode's block list and raw content.

use std::env;
use std::fmt::Display;
use std::io::{self, Write};
use std::process::exit;

use ds3::disk::Disk;
use ds3::fs::FileSystem;

fn fail(e: impl Display) -> ! {
    eprintln!("ds3cat: {}", e);
    exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} diskImageFile inodeNumber", args[0]);
        exit(1);
    }
    let inum: u32 = args[2]
        .parse()
        .unwrap_or_else(|_| fail("inodeNumber must be a non-negative integer"));

    let disk = Disk::open(&args[1]).unwrap_or_else(|e| fail(e));
    let mut fs = FileSystem::new(disk);
    let inode = fs.stat(inum).unwrap_or_else(|e| fail(e));

    println!("File blocks");
    for addr in &inode.direct[..inode.nblocks() as usize] {
        println!("{}", addr);
    }
    println!();

    println!("File data");
    let mut buf = vec![0u8; inode.size as usize];
    fs.read(inum, &mut buf).unwrap_or_else(|e| fail(e));
    io::stdout().write_all(&buf).unwrap_or_else(|e| fail(e));
}
