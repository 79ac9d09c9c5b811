//! Build a fresh ds3 disk image.

use std::env;
use std::fmt::Display;
use std::process::exit;

use ds3::disk::Disk;
use ds3::fs::{FileSystem, Superblock};
use ds3::param::{NDATA, NINODES};

fn fail(e: impl Display) -> ! {
    eprintln!("mkfs: {}", e);
    exit(1);
}

fn usage(argv0: &str) -> ! {
    eprintln!("usage: {} diskImageFile [numInodes numDataBlocks]", argv0);
    exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let (image, num_inodes, num_data) = match args.len() {
        2 => (args[1].as_str(), NINODES, NDATA),
        4 => {
            let num_inodes = args[2].parse().unwrap_or_else(|_| usage(&args[0]));
            let num_data = args[3].parse().unwrap_or_else(|_| usage(&args[0]));
            (args[1].as_str(), num_inodes, num_data)
        }
        _ => usage(&args[0]),
    };
    if num_inodes == 0 || num_data == 0 {
        fail("an image needs at least one inode and one data block");
    }

    let sb = Superblock::new(num_inodes, num_data);
    let disk = Disk::create(image, sb.total_blocks()).unwrap_or_else(|e| fail(e));
    FileSystem::format(disk, num_inodes, num_data).unwrap_or_else(|e| fail(e));

    eprintln!(
        "{}: {} inodes, {} data blocks, {} blocks total (bitmaps {}+{}, inode region {})",
        image,
        num_inodes,
        num_data,
        sb.total_blocks(),
        sb.inode_bitmap_len(),
        sb.data_bitmap_len(),
        sb.inode_region_len(),
    );
}
