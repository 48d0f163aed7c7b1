mod access;
mod bitmap;
mod block_cache;
mod block_dev;
mod directory;
mod disk;
mod error;
#[allow(clippy::module_inception)]
mod fs;
mod layout;
mod open_file;
mod sync;
mod synch_disk;

extern crate log;

/// Bytes per sector, the minimum I/O granularity of the disk
pub const SECTOR_SIZE: usize = 128;
pub const SECTORS_PER_TRACK: usize = 32;
pub const NUM_TRACKS: usize = 32;
/// Total number of sectors on the disk
pub const NUM_SECTORS: usize = SECTORS_PER_TRACK * NUM_TRACKS;
/// 一个扇区可以容纳的扇区号个数
pub const POINTERS_PER_SECTOR: usize = SECTOR_SIZE / 4;
/// Pointer slots inside a file header; the header's other 7 words hold metadata
pub const NUM_DIRECT: usize = POINTERS_PER_SECTOR - 7;
/// Slots that point at data directly; slot `REAL_NUM_DIRECT` points at the indirect block
pub const REAL_NUM_DIRECT: usize = NUM_DIRECT - 1;
/// Pointers held by the single indirect block
pub const NUM_INDIRECT: usize = POINTERS_PER_SECTOR;
/// Largest file that fits in the direct slots alone
pub const DIRECT_MAX_SIZE: usize = REAL_NUM_DIRECT * SECTOR_SIZE;
pub const MAX_FILE_SECTORS: usize = REAL_NUM_DIRECT + NUM_INDIRECT;
pub const MAX_FILE_SIZE: usize = MAX_FILE_SECTORS * SECTOR_SIZE;
/// Sector 0 holds the bitmap header and is never handed out, so it doubles as "no sector"
pub const INVALID_SECTOR: u32 = 0;
/// Parent sector recorded by headers that have no parent directory
pub const NO_PARENT_SECTOR: i32 = -1;
/// Well-known sector of the free-space bitmap's header
pub const FREE_MAP_SECTOR: u32 = 0;
/// Well-known sector of the root directory's header
pub const DIRECTORY_SECTOR: u32 = 1;
pub const BITS_IN_BYTE: usize = 8;
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / BITS_IN_BYTE;
/// The max length of a file name
pub const FILE_NAME_MAX_LEN: usize = 9;
/// 目录项的大小
pub const DIR_ENTRY_SIZE: usize = 20;
/// Entries per directory, fixed when the directory is created
pub const NUM_DIR_ENTRIES: usize = 10;
pub const DIRECTORY_FILE_SIZE: usize = DIR_ENTRY_SIZE * NUM_DIR_ENTRIES;
/// 为了避免在扇区缓存上浪费过多内存, 内存中同时只能驻留有限个扇区的缓冲区
pub const DISK_CACHE_SIZE: usize = 16;

pub use access::AccessRegistry;
pub use bitmap::Bitmap;
pub use block_cache::CachedDisk;
pub use block_dev::BlockDevice;
pub use directory::Directory;
pub use disk::{Disk, DiskStats};
pub use error::{FsError, Result};
pub use fs::FileSystem;
pub use layout::*;
pub use open_file::OpenFile;
pub use sync::{Lock, ReadWriteLock, Semaphore};
pub use synch_disk::SynchDisk;
