//! Recursively list an image's directory tree.

use std::env;
use std::fmt::Display;
use std::process::exit;

use ds3::disk::Disk;
use ds3::fs::{FileSystem, FsError, InodeType, ROOTINO};

fn fail(e: impl Display) -> ! {
    eprintln!("ds3ls: {}", e);
    exit(1);
}

/// Print one directory, then descend. Regular files end the recursion.
fn list(fs: &mut FileSystem, dir_name: &str, inum: u32) -> Result<(), FsError> {
    let inode = fs.stat(inum)?;
    if inode.typ == InodeType::RegularFile {
        return Ok(());
    }

    let mut entries = fs.readdir(inum)?;
    entries.sort_by(|a, b| a.name_bytes().cmp(b.name_bytes()));

    println!("Directory {}", dir_name);
    for de in &entries {
        println!("{}\t{}", de.inum(), String::from_utf8_lossy(de.name_bytes()));
    }
    println!();

    for de in &entries {
        if de.name_bytes() == b"." || de.name_bytes() == b".." {
            continue;
        }
        let name = String::from_utf8_lossy(de.name_bytes());
        list(fs, &format!("{}{}/", dir_name, name), de.inum())?;
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} diskImageFile", args[0]);
        exit(1);
    }

    let disk = Disk::open(&args[1]).unwrap_or_else(|e| fail(e));
    let mut fs = FileSystem::new(disk);
    list(&mut fs, "/", ROOTINO).unwrap_or_else(|e| fail(e));
}
