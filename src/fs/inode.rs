//! On-disk inodes and directory entries.
//!
//! An inode describes a single unnamed file: its type, its size, and the
//! direct pointers locating its content. Inodes are laid out sequentially
//! in the inode region; each inode's number is its position there. A
//! directory is an inode whose content is a packed array of [`Dirent`]
//! records, with `.` at slot 0 and `..` at slot 1.

use std::mem;

use static_assertions::const_assert;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use super::{FsError, NDIRECT};
use crate::param::BSIZE;

type U32Le = U32<LittleEndian>;

/// Directory-entry name field width.
pub const DIRSIZ: usize = 28;

/// dirent size
pub const DIRENT_SIZE: usize = mem::size_of::<Dirent>();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeType {
    Directory,
    RegularFile,
}

impl InodeType {
    fn from_raw(raw: u32) -> Option<InodeType> {
        match raw {
            0 => Some(InodeType::Directory),
            1 => Some(InodeType::RegularFile),
            _ => None,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            InodeType::Directory => 0,
            InodeType::RegularFile => 1,
        }
    }
}

/// On-disk inode structure. All fields little-endian.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
pub struct Dinode {
    /// File type
    typ: U32Le,

    /// Size of file (bytes)
    size: U32Le,

    /// Direct data block addresses
    direct: [U32Le; NDIRECT],
}

const_assert!(mem::size_of::<Dinode>() == 128);
const_assert!(BSIZE % mem::size_of::<Dinode>() == 0);

/// In-memory copy of a disk inode.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    pub typ: InodeType,
    pub size: u32,
    pub direct: [u32; NDIRECT],
}

impl Inode {
    /// Number of data blocks holding the first `size` bytes of content.
    /// Only that many leading `direct` slots are meaningful.
    pub fn nblocks(&self) -> u32 {
        ((self.size as usize + BSIZE - 1) / BSIZE) as u32
    }
}

impl Dinode {
    pub fn decode(&self) -> Result<Inode, FsError> {
        let typ = InodeType::from_raw(self.typ.get()).ok_or(FsError::InvalidInode)?;
        let mut direct = [0u32; NDIRECT];
        for (d, s) in direct.iter_mut().zip(&self.direct) {
            *d = s.get();
        }
        Ok(Inode {
            typ,
            size: self.size.get(),
            direct,
        })
    }

    pub fn encode(inode: &Inode) -> Dinode {
        let mut direct = [U32Le::new(0); NDIRECT];
        for (d, s) in direct.iter_mut().zip(&inode.direct) {
            *d = U32Le::new(*s);
        }
        Dinode {
            typ: U32Le::new(inode.typ.as_raw()),
            size: U32Le::new(inode.size),
            direct,
        }
    }
}

/// Directory entry: an inode number and a NUL-padded name. A name of
/// exactly [`DIRSIZ`] bytes has no terminator.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
pub struct Dirent {
    inum: U32Le,
    name: [u8; DIRSIZ],
}

const_assert!(BSIZE % DIRENT_SIZE == 0);

impl Dirent {
    /// `name` must be at most DIRSIZ bytes; shorter names are NUL-padded.
    pub fn new(inum: u32, name: &[u8]) -> Dirent {
        debug_assert!(!name.is_empty() && name.len() <= DIRSIZ);
        let mut de = Dirent {
            inum: U32Le::new(inum),
            name: [0; DIRSIZ],
        };
        de.name[..name.len()].copy_from_slice(name);
        de
    }

    pub fn inum(&self) -> u32 {
        self.inum.get()
    }

    /// The stored name, with the NUL padding stripped.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&ch| ch == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }
}
