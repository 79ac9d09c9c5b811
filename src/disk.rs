//! File-backed block device.
//!
//! A disk image is a byte-addressable array of [`BSIZE`]-byte blocks on a
//! backing file; all I/O is full-block. The device is also the sole
//! failure-atomicity primitive: while a transaction is open, writes still go
//! straight to the image (so later reads observe them), but the pre-image of
//! every block touched is captured once, on first write. `commit` discards
//! the pre-images and closes the scope; `rollback` writes them back, which
//! restores the image bit-for-bit. Transactions do not nest.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::param::BSIZE;

/// One disk block.
pub type Block = [u8; BSIZE];

pub struct Disk {
    file: File,
    nblocks: u32,

    /// Pre-images of blocks written under the open transaction, in
    /// first-touch order. `None` means no transaction is open.
    undo: Option<Vec<(u32, Box<Block>)>>,
}

impl Disk {
    /// Open an existing disk image.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Disk> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % BSIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "image size is not a multiple of the block size",
            ));
        }
        Ok(Disk {
            file,
            nblocks: (len / BSIZE as u64) as u32,
            undo: None,
        })
    }

    /// Create a zero-filled image of `nblocks` blocks, replacing any
    /// existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, nblocks: u32) -> io::Result<Disk> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(nblocks as u64 * BSIZE as u64)?;
        Ok(Disk {
            file,
            nblocks,
            undo: None,
        })
    }

    /// Number of blocks in the image.
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    pub fn read_block(&mut self, bno: u32, buf: &mut Block) -> io::Result<()> {
        assert!(bno < self.nblocks, "read_block: block {} out of range", bno);
        self.file.seek(SeekFrom::Start(bno as u64 * BSIZE as u64))?;
        self.file.read_exact(buf)
    }

    pub fn write_block(&mut self, bno: u32, buf: &Block) -> io::Result<()> {
        self.capture(bno)?;
        self.write_raw(bno, buf)
    }

    /// Open a recording scope. Calling this with a transaction already open
    /// is a usage error.
    pub fn begin_transaction(&mut self) {
        assert!(self.undo.is_none(), "transaction already open");
        self.undo = Some(Vec::new());
    }

    pub fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    /// Close the scope, keeping every write made under it. The writes were
    /// applied to the image as they were issued; only the pre-images are
    /// dropped here.
    pub fn commit(&mut self) {
        assert!(self.undo.is_some(), "commit outside of transaction");
        self.undo = None;
    }

    /// Close the scope, restoring the pre-image of every block written
    /// under it.
    pub fn rollback(&mut self) -> io::Result<()> {
        let undo = match self.undo.take() {
            Some(undo) => undo,
            None => panic!("rollback outside of transaction"),
        };
        for (bno, pre) in undo.iter().rev() {
            self.write_raw(*bno, pre)?;
        }
        Ok(())
    }

    /// Record `bno`'s pre-image if a transaction is open and this is the
    /// first write touching it.
    fn capture(&mut self, bno: u32) -> io::Result<()> {
        let untouched = match &self.undo {
            Some(undo) => undo.iter().all(|(n, _)| *n != bno),
            None => false,
        };
        if untouched {
            let mut pre = Box::new([0u8; BSIZE]);
            self.read_block(bno, &mut pre)?;
            if let Some(undo) = &mut self.undo {
                undo.push((bno, pre));
            }
        }
        Ok(())
    }

    fn write_raw(&mut self, bno: u32, buf: &Block) -> io::Result<()> {
        assert!(bno < self.nblocks, "write_block: block {} out of range", bno);
        self.file.seek(SeekFrom::Start(bno as u64 * BSIZE as u64))?;
        self.file.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn image(tag: &str, nblocks: u32) -> (Disk, PathBuf) {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let path = std::env::temp_dir().join(format!(
            "ds3-disk-{}-{}-{}.img",
            tag,
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        (Disk::create(&path, nblocks).unwrap(), path)
    }

    fn filled(byte: u8) -> Block {
        [byte; BSIZE]
    }

    #[test]
    fn read_back_what_was_written() {
        let (mut disk, path) = image("rw", 4);
        disk.write_block(2, &filled(0xab)).unwrap();
        let mut buf = [0u8; BSIZE];
        disk.read_block(2, &mut buf).unwrap();
        assert_eq!(buf[..], filled(0xab)[..]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn reads_inside_transaction_see_writes() {
        let (mut disk, path) = image("ryw", 4);
        disk.begin_transaction();
        disk.write_block(1, &filled(0x11)).unwrap();
        let mut buf = [0u8; BSIZE];
        disk.read_block(1, &mut buf).unwrap();
        assert_eq!(buf[..], filled(0x11)[..]);
        disk.commit();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn rollback_restores_the_image_bit_for_bit() {
        let (mut disk, path) = image("rollback", 4);
        disk.write_block(1, &filled(0x11)).unwrap();
        disk.write_block(3, &filled(0x33)).unwrap();
        let before = std::fs::read(&path).unwrap();

        disk.begin_transaction();
        disk.write_block(1, &filled(0xff)).unwrap();
        disk.write_block(2, &filled(0xee)).unwrap();
        // A second write to the same block must not clobber the pre-image.
        disk.write_block(1, &filled(0xdd)).unwrap();
        disk.rollback().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(!disk.in_transaction());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn commit_keeps_writes() {
        let (mut disk, path) = image("commit", 4);
        disk.begin_transaction();
        disk.write_block(0, &filled(0x77)).unwrap();
        disk.commit();
        let mut buf = [0u8; BSIZE];
        disk.read_block(0, &mut buf).unwrap();
        assert_eq!(buf[..], filled(0x77)[..]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    #[should_panic(expected = "transaction already open")]
    fn transactions_do_not_nest() {
        let (mut disk, _path) = image("nest", 2);
        disk.begin_transaction();
        disk.begin_transaction();
    }
}
