//! Image-wide parameters.

/// block size (bytes)
pub const BSIZE: usize = 4096;

/// default inode count for a fresh image
pub const NINODES: u32 = 64;

/// default data-block count for a fresh image
pub const NDATA: u32 = 64;
