//! Print an image's superblock addresses and allocation bitmaps.

use std::env;
use std::fmt::Display;
use std::process::exit;

use ds3::disk::Disk;
use ds3::fs::Superblock;

fn fail(e: impl Display) -> ! {
    eprintln!("ds3bits: {}", e);
    exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} diskImageFile", args[0]);
        exit(1);
    }

    let mut disk = Disk::open(&args[1]).unwrap_or_else(|e| fail(e));
    let sb = Superblock::read(&mut disk).unwrap_or_else(|e| fail(e));

    println!("Super");
    println!("inode_region_addr {}", sb.inode_region_addr());
    println!("data_region_addr {}", sb.data_region_addr());
    println!();

    let inode_bitmap = sb.read_inode_bitmap(&mut disk).unwrap_or_else(|e| fail(e));
    println!("Inode bitmap");
    for byte in &inode_bitmap.as_bytes()[..(sb.num_inodes() as usize + 7) / 8] {
        print!("{} ", byte);
    }
    println!();
    println!();

    let data_bitmap = sb.read_data_bitmap(&mut disk).unwrap_or_else(|e| fail(e));
    println!("Data bitmap");
    for byte in &data_bitmap.as_bytes()[..(sb.num_data() as usize + 7) / 8] {
        print!("{} ", byte);
    }
    println!();
}
