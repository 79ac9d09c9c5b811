//! File system implementation.  Four layers:
//!   + Disk: file-backed block array with transactional batch writes.
//!   + Allocator: inode and data-block bitmaps.
//!   + Inodes: allocation, reading, writing, metadata.
//!   + Directories: inode with special contents (list of other inodes!)
//!
//! This module contains the engine tying the layers together. Every
//! operation re-reads the on-disk structures it needs; there is no cache
//! that outlives a call. The engine never opens transactions itself: a
//! caller composing a multi-step mutation brackets it with
//! [`Disk::begin_transaction`]/[`Disk::commit`], or uses
//! [`FileSystem::transaction`], and any error inside the bracket rolls the
//! image back to its pre-transaction bytes.

use std::cmp;
use std::io;

use arrayvec::ArrayVec;
use itertools::izip;
use log::{debug, info};
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use crate::disk::{Block, Disk};
use crate::param::BSIZE;

mod bitmap;
mod inode;
mod path;
mod superblock;

pub use bitmap::Bitmap;
pub use inode::{Dinode, Dirent, Inode, InodeType, DIRENT_SIZE, DIRSIZ};
pub use path::FileName;
pub use superblock::Superblock;

/// root i-number
pub const ROOTINO: u32 = 0;

/// Direct block pointers per inode; there are no indirects, so this also
/// caps file size.
pub const NDIRECT: usize = 30;

/// Largest file the direct pointers can address (bytes).
pub const MAXFILE: usize = NDIRECT * BSIZE;

#[derive(Debug, Error)]
pub enum FsError {
    /// Inode number out of range, or not a directory where one is required.
    #[error("invalid inode")]
    InvalidInode,
    /// An existing entry has a conflicting type, or a write target is not a
    /// regular file.
    #[error("conflicting file type")]
    InvalidType,
    /// Empty name, name longer than [`DIRSIZ`], or name containing NUL.
    #[error("invalid name")]
    InvalidName,
    /// Requested size outside `[0, MAXFILE]`.
    #[error("size out of range")]
    InvalidSize,
    /// No directory entry with the given name.
    #[error("not found")]
    NotFound,
    /// Unlink of a directory that still has entries besides `.` and `..`.
    #[error("directory not empty")]
    DirNotEmpty,
    /// Unlink of `.` or `..`.
    #[error("refusing to unlink `.` or `..`")]
    UnlinkNotAllowed,
    /// Not enough free inodes or data blocks.
    #[error("not enough space")]
    NoSpace,
    #[error("disk i/o: {0}")]
    Io(#[from] io::Error),
}

pub struct FileSystem {
    disk: Disk,
}

impl FileSystem {
    /// Mount an already-formatted image.
    pub fn new(disk: Disk) -> FileSystem {
        FileSystem { disk }
    }

    /// Build a fresh filesystem on `disk`: superblock, bitmaps, inode
    /// table, and a root directory holding only `.` and `..`.
    pub fn format(mut disk: Disk, num_inodes: u32, num_data: u32) -> Result<FileSystem, FsError> {
        let sb = Superblock::new(num_inodes, num_data);
        if disk.nblocks() < sb.total_blocks() {
            return Err(FsError::NoSpace);
        }

        let mut inode_bitmap =
            Bitmap::from_bytes(vec![0; sb.inode_bitmap_len() as usize * BSIZE]);
        let mut data_bitmap = Bitmap::from_bytes(vec![0; sb.data_bitmap_len() as usize * BSIZE]);
        let mut inodes = vec![Dinode::new_zeroed(); num_inodes as usize];

        // The root directory takes the first inode and the first data block.
        let root_inum = inode_bitmap.alloc(num_inodes).ok_or(FsError::NoSpace)?;
        let root_bit = data_bitmap.alloc(num_data).ok_or(FsError::NoSpace)?;
        debug_assert_eq!(root_inum, ROOTINO);
        let mut root = Inode {
            typ: InodeType::Directory,
            size: (2 * DIRENT_SIZE) as u32,
            direct: [0; NDIRECT],
        };
        root.direct[0] = sb.data_region_addr() + root_bit;
        inodes[ROOTINO as usize] = Dinode::encode(&root);

        let mut buf: Block = [0; BSIZE];
        buf[..DIRENT_SIZE].copy_from_slice(Dirent::new(ROOTINO, b".").as_bytes());
        buf[DIRENT_SIZE..2 * DIRENT_SIZE].copy_from_slice(Dirent::new(ROOTINO, b"..").as_bytes());
        disk.write_block(root.direct[0], &buf)?;

        sb.write(&mut disk)?;
        sb.write_inode_bitmap(&mut disk, &inode_bitmap)?;
        sb.write_data_bitmap(&mut disk, &data_bitmap)?;
        sb.write_inode_region(&mut disk, &inodes)?;
        info!(
            "formatted image: {} inodes, {} data blocks, {} blocks total",
            num_inodes,
            num_data,
            sb.total_blocks()
        );
        Ok(FileSystem { disk })
    }

    /// The block device underneath, for composing multi-step atomic
    /// operations with its transaction primitives.
    pub fn disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    /// Run `f` inside a transaction: commit its writes if it returns `Ok`,
    /// roll every one of them back if it returns `Err`.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut FileSystem) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        self.disk.begin_transaction();
        match f(self) {
            Ok(v) => {
                self.disk.commit();
                Ok(v)
            }
            Err(e) => {
                self.disk.rollback()?;
                Err(e)
            }
        }
    }

    /// Look up the inode record for `inum`. The allocation bitmap is not
    /// consulted; callers reach inodes through the directory tree.
    pub fn stat(&mut self, inum: u32) -> Result<Inode, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        self.stat_inner(&sb, inum)
    }

    /// Find `name` in the directory `parent` and return its inode number.
    pub fn lookup(&mut self, parent: u32, name: &FileName) -> Result<u32, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        self.lookup_inner(&sb, parent, name)
    }

    /// Read `buf.len()` bytes from the start of `inum`'s content. On
    /// success exactly `buf.len()` bytes are reported read; bytes past the
    /// file's on-disk extent are left untouched in `buf`, so callers are
    /// expected to size requests from `stat`. Directories yield their
    /// packed entry records.
    pub fn read(&mut self, inum: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        let ip = self.stat_inner(&sb, inum)?;
        if buf.len() > MAXFILE {
            return Err(FsError::InvalidSize);
        }
        let extent = self.read_extent(&ip)?;
        let n = cmp::min(buf.len(), extent.len());
        buf[..n].copy_from_slice(&extent[..n]);
        Ok(buf.len())
    }

    /// The entries of directory `inum`, in slot order.
    pub fn readdir(&mut self, inum: u32) -> Result<Vec<Dirent>, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        let dp = self.stat_inner(&sb, inum)?;
        if dp.typ != InodeType::Directory {
            return Err(FsError::InvalidInode);
        }
        self.dir_entries(&dp)
    }

    /// Create `name` of the given type under the directory `parent` and
    /// return the new inode number. Creating an entry that already exists
    /// with the same type returns the existing inode number; with a
    /// different type it is a conflict.
    pub fn create(
        &mut self,
        parent: u32,
        typ: InodeType,
        name: &FileName,
    ) -> Result<u32, FsError> {
        let sb = Superblock::read(&mut self.disk)?;

        match self.lookup_inner(&sb, parent, name) {
            Ok(existing) => {
                let ip = self.stat_inner(&sb, existing)?;
                return if ip.typ == typ {
                    Ok(existing)
                } else {
                    Err(FsError::InvalidType)
                };
            }
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let mut inodes = sb.read_inode_region(&mut self.disk)?;
        let mut dp = inodes[parent as usize].decode()?;

        // Growing the parent may spill its entry list into a fresh block;
        // that block is part of this operation's space requirement.
        let new_parent_size = dp.size as usize + DIRENT_SIZE;
        if new_parent_size > MAXFILE {
            return Err(FsError::NoSpace);
        }
        let parent_needs_block = dp.size as usize % BSIZE == 0;
        let mut need_extra = if typ == InodeType::Directory { 1 } else { 0 };
        if parent_needs_block {
            need_extra += 1;
        }

        let mut inode_bitmap = sb.read_inode_bitmap(&mut self.disk)?;
        let mut data_bitmap = sb.read_data_bitmap(&mut self.disk)?;
        if !fits(&sb, &inode_bitmap, &data_bitmap, 1, 0, need_extra) {
            return Err(FsError::NoSpace);
        }
        let inum = inode_bitmap.alloc(sb.num_inodes()).ok_or(FsError::NoSpace)?;

        // Append the new entry to the parent.
        let mut entries = self.dir_entries(&dp)?;
        entries.push(Dirent::new(inum, name.as_bytes()));
        if parent_needs_block {
            let bit = data_bitmap.alloc(sb.num_data()).ok_or(FsError::NoSpace)?;
            dp.direct[dp.nblocks() as usize] = sb.data_region_addr() + bit;
        }
        dp.size = new_parent_size as u32;

        // Initialize the child: directories start with a block holding
        // their `.` and `..` entries, files start empty.
        let mut ip = Inode {
            typ,
            size: 0,
            direct: [0; NDIRECT],
        };
        let mut dot_block = None;
        if typ == InodeType::Directory {
            let bit = data_bitmap.alloc(sb.num_data()).ok_or(FsError::NoSpace)?;
            let addr = sb.data_region_addr() + bit;
            ip.direct[0] = addr;
            ip.size = (2 * DIRENT_SIZE) as u32;
            let mut buf: Block = [0; BSIZE];
            buf[..DIRENT_SIZE].copy_from_slice(Dirent::new(inum, b".").as_bytes());
            buf[DIRENT_SIZE..2 * DIRENT_SIZE]
                .copy_from_slice(Dirent::new(parent, b"..").as_bytes());
            dot_block = Some((addr, buf));
        }

        inodes[parent as usize] = Dinode::encode(&dp);
        inodes[inum as usize] = Dinode::encode(&ip);

        self.write_dir_entries(&dp, &entries)?;
        if let Some((addr, buf)) = dot_block {
            self.disk.write_block(addr, &buf)?;
        }
        sb.write_inode_region(&mut self.disk, &inodes)?;
        sb.write_inode_bitmap(&mut self.disk, &inode_bitmap)?;
        sb.write_data_bitmap(&mut self.disk, &data_bitmap)?;

        debug!("create {:?} inum {} under {}", typ, inum, parent);
        Ok(inum)
    }

    /// Replace the whole content of the regular file `inum` with `data`,
    /// growing or shrinking its block list as needed. There is no
    /// positional write.
    pub fn write(&mut self, inum: u32, data: &[u8]) -> Result<usize, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        if inum >= sb.num_inodes() {
            return Err(FsError::InvalidInode);
        }
        let mut inodes = sb.read_inode_region(&mut self.disk)?;
        let mut ip = inodes[inum as usize].decode()?;
        if ip.typ != InodeType::RegularFile {
            return Err(FsError::InvalidType);
        }
        if data.len() > MAXFILE {
            return Err(FsError::InvalidSize);
        }

        let cur_blocks = ip.nblocks() as usize;
        let new_blocks = (data.len() + BSIZE - 1) / BSIZE;

        let inode_bitmap = sb.read_inode_bitmap(&mut self.disk)?;
        let mut data_bitmap = sb.read_data_bitmap(&mut self.disk)?;
        if new_blocks > cur_blocks {
            if !fits(
                &sb,
                &inode_bitmap,
                &data_bitmap,
                0,
                0,
                (new_blocks - cur_blocks) as u32,
            ) {
                return Err(FsError::NoSpace);
            }
            let mut fresh: ArrayVec<u32, NDIRECT> = ArrayVec::new();
            for _ in cur_blocks..new_blocks {
                let bit = data_bitmap.alloc(sb.num_data()).ok_or(FsError::NoSpace)?;
                fresh.push(sb.data_region_addr() + bit);
            }
            ip.direct[cur_blocks..new_blocks].copy_from_slice(&fresh);
        } else {
            // Truncation: give the trailing blocks back.
            for addr in &ip.direct[new_blocks..cur_blocks] {
                data_bitmap.free(addr - sb.data_region_addr());
            }
        }

        // Write the content, zero-padding the tail of the last block.
        for (addr, chunk) in izip!(&ip.direct[..new_blocks], data.chunks(BSIZE)) {
            let mut buf: Block = [0; BSIZE];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.disk.write_block(*addr, &buf)?;
        }

        ip.size = data.len() as u32;
        inodes[inum as usize] = Dinode::encode(&ip);
        sb.write_inode_region(&mut self.disk, &inodes)?;
        sb.write_data_bitmap(&mut self.disk, &data_bitmap)?;

        debug!("write inum {}: {} bytes in {} blocks", inum, data.len(), new_blocks);
        Ok(data.len())
    }

    /// Remove `name` from the directory `parent`, freeing the child's
    /// inode and data blocks. Unlinking an absent name succeeds as a
    /// no-op; unlinking a directory requires it to be empty.
    pub fn unlink(&mut self, parent: u32, name: &FileName) -> Result<(), FsError> {
        if name.as_bytes() == b"." || name.as_bytes() == b".." {
            return Err(FsError::UnlinkNotAllowed);
        }
        let sb = Superblock::read(&mut self.disk)?;
        let inum = match self.lookup_inner(&sb, parent, name) {
            Ok(inum) => inum,
            Err(FsError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut inodes = sb.read_inode_region(&mut self.disk)?;
        let ip = inodes[inum as usize].decode()?;
        if ip.typ == InodeType::Directory && ip.size as usize > 2 * DIRENT_SIZE {
            return Err(FsError::DirNotEmpty);
        }
        let mut dp = inodes[parent as usize].decode()?;

        let mut data_bitmap = sb.read_data_bitmap(&mut self.disk)?;
        for addr in &ip.direct[..ip.nblocks() as usize] {
            data_bitmap.free(addr - sb.data_region_addr());
        }
        let mut inode_bitmap = sb.read_inode_bitmap(&mut self.disk)?;
        inode_bitmap.free(inum);

        // Drop the entry; survivors shift left so the list stays packed,
        // with `.` and `..` still at slots 0 and 1.
        let mut entries = self.dir_entries(&dp)?;
        entries.retain(|de| de.inum() != inum);
        let old_blocks = dp.nblocks();
        dp.size -= DIRENT_SIZE as u32;
        if dp.nblocks() < old_blocks {
            data_bitmap.free(dp.direct[(old_blocks - 1) as usize] - sb.data_region_addr());
        }

        self.write_dir_entries(&dp, &entries)?;
        inodes[parent as usize] = Dinode::encode(&dp);
        sb.write_inode_region(&mut self.disk, &inodes)?;
        sb.write_inode_bitmap(&mut self.disk, &inode_bitmap)?;
        sb.write_data_bitmap(&mut self.disk, &data_bitmap)?;

        debug!("unlink inum {} from {}", inum, parent);
        Ok(())
    }

    /// Capacity query: true iff the image can take `need_inodes` more
    /// inodes and `ceil(need_bytes / BSIZE) + need_extra_blocks` more data
    /// blocks.
    pub fn has_space(
        &mut self,
        need_inodes: u32,
        need_bytes: usize,
        need_extra_blocks: u32,
    ) -> Result<bool, FsError> {
        let sb = Superblock::read(&mut self.disk)?;
        let inode_bitmap = sb.read_inode_bitmap(&mut self.disk)?;
        let data_bitmap = sb.read_data_bitmap(&mut self.disk)?;
        Ok(fits(
            &sb,
            &inode_bitmap,
            &data_bitmap,
            need_inodes,
            need_bytes,
            need_extra_blocks,
        ))
    }

    fn stat_inner(&mut self, sb: &Superblock, inum: u32) -> Result<Inode, FsError> {
        if inum >= sb.num_inodes() {
            return Err(FsError::InvalidInode);
        }
        let inodes = sb.read_inode_region(&mut self.disk)?;
        inodes[inum as usize].decode()
    }

    fn lookup_inner(
        &mut self,
        sb: &Superblock,
        parent: u32,
        name: &FileName,
    ) -> Result<u32, FsError> {
        let dp = self.stat_inner(sb, parent)?;
        if dp.typ != InodeType::Directory {
            return Err(FsError::InvalidInode);
        }
        for de in self.dir_entries(&dp)? {
            if de.name_bytes() == name.as_bytes() {
                return Ok(de.inum());
            }
        }
        Err(FsError::NotFound)
    }

    /// Concatenation of the inode's live direct blocks.
    fn read_extent(&mut self, ip: &Inode) -> Result<Vec<u8>, FsError> {
        let nblocks = ip.nblocks() as usize;
        let mut bytes = vec![0u8; nblocks * BSIZE];
        for (addr, chunk) in izip!(&ip.direct[..nblocks], bytes.chunks_exact_mut(BSIZE)) {
            let mut buf: Block = [0; BSIZE];
            self.disk.read_block(*addr, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        Ok(bytes)
    }

    fn dir_entries(&mut self, dp: &Inode) -> Result<Vec<Dirent>, FsError> {
        let mut bytes = self.read_extent(dp)?;
        bytes.truncate(dp.size as usize);
        let entries = LayoutVerified::<_, [Dirent]>::new_slice_unaligned(&bytes[..])
            .ok_or(FsError::InvalidInode)?;
        Ok(entries.to_vec())
    }

    fn write_dir_entries(&mut self, dp: &Inode, entries: &[Dirent]) -> Result<(), FsError> {
        debug_assert_eq!(entries.len() * DIRENT_SIZE, dp.size as usize);
        let nblocks = dp.nblocks() as usize;
        let mut bytes = vec![0u8; nblocks * BSIZE];
        bytes[..entries.len() * DIRENT_SIZE].copy_from_slice(entries.as_bytes());
        for (addr, chunk) in izip!(&dp.direct[..nblocks], bytes.chunks_exact(BSIZE)) {
            let mut buf: Block = [0; BSIZE];
            buf.copy_from_slice(chunk);
            self.disk.write_block(*addr, &buf)?;
        }
        Ok(())
    }
}

/// The capacity check behind [`FileSystem::has_space`], on bitmaps the
/// caller has already read.
fn fits(
    sb: &Superblock,
    inode_bitmap: &Bitmap,
    data_bitmap: &Bitmap,
    need_inodes: u32,
    need_bytes: usize,
    need_extra_blocks: u32,
) -> bool {
    let free_inodes = sb.num_inodes() - inode_bitmap.count(sb.num_inodes());
    let free_blocks = sb.num_data() - data_bitmap.count(sb.num_data());
    let need_blocks = (need_bytes + BSIZE - 1) / BSIZE + need_extra_blocks as usize;
    free_inodes >= need_inodes && free_blocks as usize >= need_blocks
}
