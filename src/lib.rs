//! ds3: a small Unix-style block filesystem on a fixed-size disk image.
//!
//! A disk image is a flat array of 4096-byte blocks holding a superblock,
//! two allocation bitmaps, a packed inode table and a data region. The
//! [`fs::FileSystem`] engine exposes `stat`/`lookup`/`read`/`write`/
//! `create`/`unlink` over it; the [`disk::Disk`] underneath provides the
//! transaction bracket that makes compound mutations all-or-nothing.

pub mod disk;
pub mod fs;
pub mod param;
