//! Superblock and the on-disk layout codec.
//!
//! Disk layout:
//! [ super block | inode bitmap | data bitmap | inode blocks | data blocks ]
//!
//! mkfs computes the super block and builds an initial file system. The
//! super block describes the layout; everything else reads it from block 0.
//! The codec below moves whole structures between RAM and the image: the
//! caller works on a contiguous byte array (a bitmap, the inode table) and
//! the codec partitions it into block-granular reads and writes.

use std::mem;

use static_assertions::const_assert;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use super::bitmap::Bitmap;
use super::inode::Dinode;
use super::FsError;
use crate::disk::{Block, Disk};
use crate::param::BSIZE;

type U32Le = U32<LittleEndian>;

/// Block 0 of every image. Addresses are block numbers, lengths are block
/// counts; all fields little-endian. The bitmaps may span more bits than
/// there are objects; `num_inodes` and `num_data` are authoritative.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
pub struct Superblock {
    inode_bitmap_addr: U32Le,
    inode_bitmap_len: U32Le,
    data_bitmap_addr: U32Le,
    data_bitmap_len: U32Le,
    inode_region_addr: U32Le,
    inode_region_len: U32Le,
    data_region_addr: U32Le,
    data_region_len: U32Le,
    num_inodes: U32Le,
    num_data: U32Le,
}

const_assert!(mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    /// Lay out a fresh image: superblock, inode bitmap, data bitmap, inode
    /// region and data region, in that order, each starting at the next
    /// free block.
    pub fn new(num_inodes: u32, num_data: u32) -> Superblock {
        assert!(num_inodes > 0, "an image needs at least the root inode");
        assert!(num_data > 0, "an image needs at least the root block");
        let bits_per_block = (BSIZE * 8) as u32;
        let inode_bitmap_len = (num_inodes + bits_per_block - 1) / bits_per_block;
        let data_bitmap_len = (num_data + bits_per_block - 1) / bits_per_block;
        let inode_bytes = num_inodes as usize * mem::size_of::<Dinode>();
        let inode_region_len = ((inode_bytes + BSIZE - 1) / BSIZE) as u32;

        let inode_bitmap_addr = 1;
        let data_bitmap_addr = inode_bitmap_addr + inode_bitmap_len;
        let inode_region_addr = data_bitmap_addr + data_bitmap_len;
        let data_region_addr = inode_region_addr + inode_region_len;
        Superblock {
            inode_bitmap_addr: U32Le::new(inode_bitmap_addr),
            inode_bitmap_len: U32Le::new(inode_bitmap_len),
            data_bitmap_addr: U32Le::new(data_bitmap_addr),
            data_bitmap_len: U32Le::new(data_bitmap_len),
            inode_region_addr: U32Le::new(inode_region_addr),
            inode_region_len: U32Le::new(inode_region_len),
            data_region_addr: U32Le::new(data_region_addr),
            data_region_len: U32Le::new(num_data),
            num_inodes: U32Le::new(num_inodes),
            num_data: U32Le::new(num_data),
        }
    }

    pub fn inode_bitmap_addr(&self) -> u32 {
        self.inode_bitmap_addr.get()
    }

    pub fn inode_bitmap_len(&self) -> u32 {
        self.inode_bitmap_len.get()
    }

    pub fn data_bitmap_addr(&self) -> u32 {
        self.data_bitmap_addr.get()
    }

    pub fn data_bitmap_len(&self) -> u32 {
        self.data_bitmap_len.get()
    }

    pub fn inode_region_addr(&self) -> u32 {
        self.inode_region_addr.get()
    }

    pub fn inode_region_len(&self) -> u32 {
        self.inode_region_len.get()
    }

    pub fn data_region_addr(&self) -> u32 {
        self.data_region_addr.get()
    }

    pub fn data_region_len(&self) -> u32 {
        self.data_region_len.get()
    }

    pub fn num_inodes(&self) -> u32 {
        self.num_inodes.get()
    }

    pub fn num_data(&self) -> u32 {
        self.num_data.get()
    }

    /// Size of the whole image in blocks.
    pub fn total_blocks(&self) -> u32 {
        self.data_region_addr() + self.data_region_len()
    }

    /// Read the super block.
    pub fn read(disk: &mut Disk) -> Result<Superblock, FsError> {
        let mut buf: Block = [0; BSIZE];
        disk.read_block(0, &mut buf)?;
        // The const_assert above makes this split infallible.
        Ok(Superblock::read_from_prefix(&buf[..]).expect("superblock fits in a block"))
    }

    pub fn write(&self, disk: &mut Disk) -> Result<(), FsError> {
        let mut buf: Block = [0; BSIZE];
        buf[..mem::size_of::<Superblock>()].copy_from_slice(self.as_bytes());
        disk.write_block(0, &buf)?;
        Ok(())
    }

    pub fn read_inode_bitmap(&self, disk: &mut Disk) -> Result<Bitmap, FsError> {
        let bytes = read_region(disk, self.inode_bitmap_addr(), self.inode_bitmap_len())?;
        Ok(Bitmap::from_bytes(bytes))
    }

    pub fn write_inode_bitmap(&self, disk: &mut Disk, bitmap: &Bitmap) -> Result<(), FsError> {
        write_region(disk, self.inode_bitmap_addr(), self.inode_bitmap_len(), bitmap.as_bytes())
    }

    pub fn read_data_bitmap(&self, disk: &mut Disk) -> Result<Bitmap, FsError> {
        let bytes = read_region(disk, self.data_bitmap_addr(), self.data_bitmap_len())?;
        Ok(Bitmap::from_bytes(bytes))
    }

    pub fn write_data_bitmap(&self, disk: &mut Disk, bitmap: &Bitmap) -> Result<(), FsError> {
        write_region(disk, self.data_bitmap_addr(), self.data_bitmap_len(), bitmap.as_bytes())
    }

    /// Read the packed inode table, `num_inodes` records in index order.
    pub fn read_inode_region(&self, disk: &mut Disk) -> Result<Vec<Dinode>, FsError> {
        let bytes = read_region(disk, self.inode_region_addr(), self.inode_region_len())?;
        let live = self.num_inodes() as usize * mem::size_of::<Dinode>();
        let table = zerocopy::LayoutVerified::<_, [Dinode]>::new_slice_unaligned(&bytes[..live])
            .expect("inode region length is a multiple of the inode size");
        Ok(table.to_vec())
    }

    pub fn write_inode_region(&self, disk: &mut Disk, inodes: &[Dinode]) -> Result<(), FsError> {
        debug_assert_eq!(inodes.len(), self.num_inodes() as usize);
        let mut bytes = vec![0u8; self.inode_region_len() as usize * BSIZE];
        bytes[..inodes.len() * mem::size_of::<Dinode>()].copy_from_slice(inodes.as_bytes());
        write_region(disk, self.inode_region_addr(), self.inode_region_len(), &bytes)
    }
}

/// Read `len` consecutive blocks starting at `addr` into one byte array.
fn read_region(disk: &mut Disk, addr: u32, len: u32) -> Result<Vec<u8>, FsError> {
    let mut bytes = vec![0u8; len as usize * BSIZE];
    for (i, chunk) in bytes.chunks_exact_mut(BSIZE).enumerate() {
        let mut buf: Block = [0; BSIZE];
        disk.read_block(addr + i as u32, &mut buf)?;
        chunk.copy_from_slice(&buf);
    }
    Ok(bytes)
}

/// Write one byte array over `len` consecutive blocks starting at `addr`.
fn write_region(disk: &mut Disk, addr: u32, len: u32, bytes: &[u8]) -> Result<(), FsError> {
    debug_assert_eq!(bytes.len(), len as usize * BSIZE);
    for (i, chunk) in bytes.chunks_exact(BSIZE).enumerate() {
        let mut buf: Block = [0; BSIZE];
        buf.copy_from_slice(chunk);
        disk.write_block(addr + i as u32, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_contiguous_from_block_one() {
        let sb = Superblock::new(64, 64);
        assert_eq!(sb.inode_bitmap_addr(), 1);
        assert_eq!(sb.inode_bitmap_len(), 1);
        assert_eq!(sb.data_bitmap_addr(), 2);
        assert_eq!(sb.data_bitmap_len(), 1);
        assert_eq!(sb.inode_region_addr(), 3);
        // 64 inodes * 128 bytes = two blocks.
        assert_eq!(sb.inode_region_len(), 2);
        assert_eq!(sb.data_region_addr(), 5);
        assert_eq!(sb.num_inodes(), 64);
        assert_eq!(sb.num_data(), 64);
        assert_eq!(sb.total_blocks(), 69);
    }

    #[test]
    fn wire_form_is_forty_little_endian_bytes() {
        let sb = Superblock::new(64, 64);
        let bytes = sb.as_bytes();
        assert_eq!(bytes.len(), 40);
        // First field: inode_bitmap_addr == 1, little-endian.
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        let back = Superblock::read_from(bytes).unwrap();
        assert_eq!(back.total_blocks(), sb.total_blocks());
    }
}
