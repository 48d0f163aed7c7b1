//! 磁盘数据结构层: [`FileHeader`] 与 [`DirEntry`]
//!
//! 磁盘上没有超级块, 只有两个位于固定扇区的文件头:
//!
//! - 扇区 0 是空闲扇区位图文件的文件头, 扇区 0 永远不会被分配出去, 因此也被用作 "无效扇区" 标记
//! - 扇区 1 是根目录文件的文件头
//!
//! 其余扇区要么是某个文件的文件头, 要么是文件的数据块, 要么是文件的一级间接索引块,
//! 由位图统一管理它们的分配与回收.

use std::fmt::{Debug, Formatter, Result as FmtResult, Write};

use chrono::{DateTime, Local};
use log::debug;

use super::{
    Bitmap, CachedDisk, FsError, Result, DIRECT_MAX_SIZE, DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN,
    INVALID_SECTOR, MAX_FILE_SECTORS, MAX_FILE_SIZE, NO_PARENT_SECTOR, NUM_DIRECT, NUM_INDIRECT,
    REAL_NUM_DIRECT, SECTOR_SIZE,
};

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum FileType {
    Regular,
    Directory,
}

impl FileType {
    const REGULAR_TAG: u32 = 0;
    const DIRECTORY_TAG: u32 = 1;

    fn tag(self) -> u32 {
        match self {
            FileType::Regular => Self::REGULAR_TAG,
            FileType::Directory => Self::DIRECTORY_TAG,
        }
    }

    fn from_tag(tag: u32) -> Self {
        match tag {
            Self::DIRECTORY_TAG => FileType::Directory,
            _ => FileType::Regular,
        }
    }
}

/// 一级间接索引块实质上是一个 u32 数组, 每个都指向一个数据块
type IndirectBlock = [u32; NUM_INDIRECT];

// 作为一个文件而言, 它的内容在文件系统看来没有任何既定的格式, 都只是
// 一个 (u8) 字节序列, 因此每个保存内容的数据块都只是一个字节数组
type DataBlock = [u8; SECTOR_SIZE];

/// 文件头 (也就是 UNIX 中的 i-node), 恰好占据一个扇区
///
/// 由 7 个元数据字和 25 个扇区指针组成, 共 32 * 4 = 128 B.
///
/// 前 24 个指针直接指向数据块, 最后一个指针 `data_sectors[REAL_NUM_DIRECT]`
/// 指向一个一级间接索引块, 它只在文件超过 24 个数据块时才会被分配.
/// 对于 `num_sectors` 个数据块的文件, 下标 `num_sectors` 处的指针 (不论它在文件头里
/// 还是在间接索引块里) 总是被置为 [`INVALID_SECTOR`].
#[repr(C)]
#[derive(Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// 文件内容的字节数
    num_bytes: u32,
    /// 数据块的数量, 恰好为 ceil(num_bytes / SECTOR_SIZE)
    num_sectors: u32,
    data_sectors: [u32; NUM_DIRECT],
    file_type: u32,
    create_time: u32,
    last_access_time: u32,
    last_modify_time: u32,
    /// 父目录文件头所在的扇区, 没有父目录时为 [`NO_PARENT_SECTOR`]
    parent_sector: i32,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == SECTOR_SIZE);

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            data_sectors: [INVALID_SECTOR; NUM_DIRECT],
            file_type: FileType::Regular.tag(),
            create_time: 0,
            last_access_time: 0,
            last_modify_time: 0,
            parent_sector: NO_PARENT_SECTOR,
        }
    }

    /// 设置文件类型与父目录, 并以当前时间初始化三个时间戳
    pub fn initialize(&mut self, file_type: FileType, parent: Option<u32>) {
        let now = now();
        self.file_type = file_type.tag();
        self.create_time = now;
        self.last_access_time = now;
        self.last_modify_time = now;
        self.parent_sector = parent.map_or(NO_PARENT_SECTOR, |sector| sector as i32);
    }

    /// 从磁盘上读入一个文件头
    pub fn load(sector: u32, disk: &CachedDisk) -> Self {
        let mut header = Self::new();
        header.fetch_from(sector, disk);
        header
    }

    /// 用磁盘上 sector 处的文件头覆盖自身
    pub fn fetch_from(&mut self, sector: u32, disk: &CachedDisk) {
        disk.read_sector(sector as usize, self.as_bytes_mut());
    }

    /// 将文件头写回磁盘上的 sector
    pub fn write_back(&self, sector: u32, disk: &CachedDisk) {
        disk.write_sector(sector as usize, self.as_bytes());
    }

    /// 为一个新文件分配数据块
    ///
    /// 先填满直接索引, 超出之后再分配一级间接索引块并继续填充, 间接索引块会立即写回磁盘.
    /// 位图中的空闲扇区 (包括可能需要的间接索引块) 不够时返回 [`FsError::OutOfSpace`], 此时位图不变.
    pub fn allocate(
        &mut self,
        free_map: &mut Bitmap,
        file_size: usize,
        disk: &CachedDisk,
    ) -> Result<()> {
        assert!(
            file_size <= MAX_FILE_SIZE,
            "file size {} exceeds the maximum {}",
            file_size,
            MAX_FILE_SIZE
        );
        let num_sectors = file_size.div_ceil(SECTOR_SIZE);
        if free_map.num_clear() < Self::sectors_claimed(num_sectors) {
            return Err(FsError::OutOfSpace);
        }
        debug!("header: allocate {} bytes in {} sectors", file_size, num_sectors);
        self.num_bytes = file_size as u32;
        self.num_sectors = 0;
        self.data_sectors = [INVALID_SECTOR; NUM_DIRECT];
        self.grow_to(num_sectors, free_map, disk);
        Ok(())
    }

    /// 回收文件占据的所有数据块, 最后回收间接索引块本身
    pub fn deallocate(&mut self, free_map: &mut Bitmap, disk: &CachedDisk) {
        debug!("header: deallocate {} sectors", self.num_sectors);
        self.shrink_to(0, free_map, disk);
        self.num_bytes = 0;
    }

    /// 将文件内的字节偏移翻译为保存该字节的扇区号
    ///
    /// 每次都会从磁盘 (经过缓存) 重新读取间接索引块.
    pub fn byte_to_sector(&self, offset: usize, disk: &CachedDisk) -> u32 {
        assert!(offset < MAX_FILE_SIZE, "offset {} out of range", offset);
        if offset < DIRECT_MAX_SIZE {
            self.data_sectors[offset / SECTOR_SIZE]
        } else {
            let indirect = read_indirect(self.data_sectors[REAL_NUM_DIRECT], disk);
            indirect[(offset - DIRECT_MAX_SIZE) / SECTOR_SIZE]
        }
    }

    /// 文件增大 delta 字节
    ///
    /// 在分配任何扇区之前就检查最大文件大小和位图中的空闲扇区数, 失败时没有任何副作用.
    pub fn extend(&mut self, delta: isize, free_map: &mut Bitmap, disk: &CachedDisk) -> Result<()> {
        if delta < 0 {
            return Err(FsError::InvalidArgument);
        }
        if delta == 0 {
            return Ok(());
        }
        let new_bytes = self.num_bytes as usize + delta as usize;
        if new_bytes > MAX_FILE_SIZE {
            return Err(FsError::SizeExceeded);
        }
        let new_sectors = new_bytes.div_ceil(SECTOR_SIZE);
        let needed = Self::sectors_claimed(new_sectors)
            - Self::sectors_claimed(self.num_sectors as usize);
        if free_map.num_clear() < needed {
            return Err(FsError::OutOfSpace);
        }
        debug!(
            "header: extend {} -> {} bytes, {} new sectors",
            self.num_bytes, new_bytes, needed
        );
        self.grow_to(new_sectors, free_map, disk);
        self.num_bytes = new_bytes as u32;
        Ok(())
    }

    /// 文件缩小 delta 字节, 从尾部回收不再需要的扇区
    pub fn shrink(&mut self, delta: isize, free_map: &mut Bitmap, disk: &CachedDisk) -> Result<()> {
        if delta < 0 {
            return Err(FsError::InvalidArgument);
        }
        if delta == 0 {
            return Ok(());
        }
        let new_bytes = (self.num_bytes as usize)
            .checked_sub(delta as usize)
            .ok_or(FsError::InvalidArgument)?;
        debug!("header: shrink {} -> {} bytes", self.num_bytes, new_bytes);
        self.shrink_to(new_bytes.div_ceil(SECTOR_SIZE), free_map, disk);
        self.num_bytes = new_bytes as u32;
        Ok(())
    }

    /// 按顺序列出文件的所有数据块
    pub fn data_sectors(&self, disk: &CachedDisk) -> Vec<u32> {
        let indirect = self.indirect_sector().map(|sector| read_indirect(sector, disk));
        (0..self.num_sectors as usize)
            .map(|idx| self.index_to_sector(idx, indirect.as_ref()))
            .collect()
    }

    pub fn file_length(&self) -> usize {
        self.num_bytes as usize
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors as usize
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_tag(self.file_type)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn parent_sector(&self) -> Option<u32> {
        (self.parent_sector != NO_PARENT_SECTOR).then_some(self.parent_sector as u32)
    }

    /// 间接索引块所在的扇区, 文件没有用到间接索引时为 None
    pub fn indirect_sector(&self) -> Option<u32> {
        (self.num_sectors as usize > REAL_NUM_DIRECT).then_some(self.data_sectors[REAL_NUM_DIRECT])
    }

    pub fn create_time(&self) -> u32 {
        self.create_time
    }

    pub fn last_access_time(&self) -> u32 {
        self.last_access_time
    }

    pub fn last_modify_time(&self) -> u32 {
        self.last_modify_time
    }

    pub fn update_last_access_time(&mut self) {
        self.last_access_time = now();
    }

    pub fn update_last_modify_time(&mut self) {
        let now = now();
        self.last_access_time = now;
        self.last_modify_time = now;
    }

    /// 打印文件头的元信息与扇区列表, with_content 时附上文件内容 (不可打印字符以 \xx 表示)
    pub fn dump(&self, disk: &CachedDisk, with_content: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "***** File meta info ******");
        let _ = writeln!(
            out,
            "Type: {}",
            match self.file_type() {
                FileType::Regular => "file",
                FileType::Directory => "dir",
            }
        );
        let _ = writeln!(out, "Created at: {}", format_time(self.create_time));
        let _ = writeln!(out, "Last Accessed at: {}", format_time(self.last_access_time));
        let _ = writeln!(out, "Last Modified at: {}", format_time(self.last_modify_time));
        let _ = writeln!(out, "Path sector: {}", self.parent_sector);
        let _ = writeln!(
            out,
            "FileHeader contents.  File size: {}.  File blocks:",
            self.num_bytes
        );
        let sectors = self.data_sectors(disk);
        for sector in sectors.iter() {
            let _ = write!(out, "{} ", sector);
        }
        out.push('\n');
        if !with_content {
            return out;
        }
        let _ = writeln!(out, "File contents:");
        let mut remaining = self.num_bytes as usize;
        for sector in sectors {
            let mut data: DataBlock = [0u8; SECTOR_SIZE];
            disk.read_sector(sector as usize, &mut data);
            for byte in data.iter().take(remaining.min(SECTOR_SIZE)) {
                if (0x20..=0x7e).contains(byte) {
                    out.push(*byte as char);
                } else {
                    let _ = write!(out, "\\{:x}", byte);
                }
            }
            remaining = remaining.saturating_sub(SECTOR_SIZE);
            out.push('\n');
        }
        out
    }

    /// 容纳 num_sectors 个数据块一共要占用的扇区数, 包括间接索引块
    fn sectors_claimed(num_sectors: usize) -> usize {
        num_sectors + usize::from(num_sectors > REAL_NUM_DIRECT)
    }

    /// 第 idx 个数据块的扇区号, idx 超出直接索引时需要已经读入的间接索引块
    fn index_to_sector(&self, idx: usize, indirect: Option<&IndirectBlock>) -> u32 {
        if idx < REAL_NUM_DIRECT {
            return self.data_sectors[idx];
        }
        let indirect = indirect.expect("indirect block must be loaded");
        indirect[idx - REAL_NUM_DIRECT]
    }

    /// 修改第 idx 个数据块的指针
    fn set_slot(&mut self, idx: usize, indirect: Option<&mut IndirectBlock>, sector: u32) {
        if idx < REAL_NUM_DIRECT || indirect.is_none() {
            // 没有间接索引块时, 下标 REAL_NUM_DIRECT 就是间接索引指针自身
            self.data_sectors[idx] = sector;
        } else if let Some(indirect) = indirect {
            indirect[idx - REAL_NUM_DIRECT] = sector;
        }
    }

    /// 将数据块数增加到 new_sectors, 调用者保证位图中有足够的空闲扇区
    fn grow_to(&mut self, new_sectors: usize, free_map: &mut Bitmap, disk: &CachedDisk) {
        let old_sectors = self.num_sectors as usize;
        assert!(new_sectors >= old_sectors && new_sectors <= MAX_FILE_SECTORS);
        let mut claim = || -> u32 {
            free_map
                .find()
                .expect("free sectors are counted before allocating") as u32
        };

        let mut indirect: Option<IndirectBlock> = if new_sectors > REAL_NUM_DIRECT {
            if old_sectors > REAL_NUM_DIRECT {
                Some(read_indirect(self.data_sectors[REAL_NUM_DIRECT], disk))
            } else {
                // 第一次越过直接索引的容量, 分配间接索引块
                self.data_sectors[REAL_NUM_DIRECT] = claim();
                Some([INVALID_SECTOR; NUM_INDIRECT])
            }
        } else {
            None
        };

        for idx in old_sectors..new_sectors {
            let sector = claim();
            self.set_slot(idx, indirect.as_mut(), sector);
        }
        if new_sectors < MAX_FILE_SECTORS {
            self.set_slot(new_sectors, indirect.as_mut(), INVALID_SECTOR);
        }
        if let Some(indirect) = indirect {
            write_indirect(self.data_sectors[REAL_NUM_DIRECT], &indirect, disk);
        }
        self.num_sectors = new_sectors as u32;
    }

    /// 将数据块数减少到 new_sectors, 必要时回收间接索引块
    fn shrink_to(&mut self, new_sectors: usize, free_map: &mut Bitmap, disk: &CachedDisk) {
        let old_sectors = self.num_sectors as usize;
        assert!(new_sectors <= old_sectors);
        if new_sectors == old_sectors {
            return;
        }
        // 在下标 REAL_NUM_DIRECT 的指针被标记为无效之前记下间接索引块
        let indirect_sector = self.indirect_sector();
        let mut indirect = indirect_sector.map(|sector| read_indirect(sector, disk));

        for idx in new_sectors..old_sectors {
            let sector = self.index_to_sector(idx, indirect.as_ref());
            free_map.clear(sector as usize);
            if idx < REAL_NUM_DIRECT {
                self.data_sectors[idx] = INVALID_SECTOR;
            } else if let Some(indirect) = indirect.as_mut() {
                indirect[idx - REAL_NUM_DIRECT] = INVALID_SECTOR;
            }
        }

        if let Some(sector) = indirect_sector {
            if new_sectors <= REAL_NUM_DIRECT {
                free_map.clear(sector as usize);
                self.data_sectors[REAL_NUM_DIRECT] = INVALID_SECTOR;
            } else if let Some(indirect) = indirect {
                write_indirect(sector, &indirect, disk);
            }
        }
        self.num_sectors = new_sectors as u32;
    }

    // 文件头在磁盘上的格式与内存中的格式完全一致 (repr(C), 全部为 4 字节整数),
    // 因此可以直接把自身当作一个扇区大小的字节数组读写

    fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, SECTOR_SIZE) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, SECTOR_SIZE) }
    }
}

impl Debug for FileHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FileHeader")
            .field("num_bytes", &self.num_bytes)
            .field("num_sectors", &self.num_sectors)
            .field("data_sectors", &self.data_sectors)
            .field("file_type", &self.file_type())
            .field("parent_sector", &self.parent_sector)
            .finish()
    }
}

fn read_indirect(sector: u32, disk: &CachedDisk) -> IndirectBlock {
    let mut raw: DataBlock = [0u8; SECTOR_SIZE];
    disk.read_sector(sector as usize, &mut raw);
    let mut indirect = [INVALID_SECTOR; NUM_INDIRECT];
    for (slot, word) in indirect.iter_mut().zip(raw.chunks_exact(4)) {
        *slot = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    indirect
}

fn write_indirect(sector: u32, indirect: &IndirectBlock, disk: &CachedDisk) {
    let mut raw: DataBlock = [0u8; SECTOR_SIZE];
    for (word, slot) in raw.chunks_exact_mut(4).zip(indirect.iter()) {
        word.copy_from_slice(&slot.to_le_bytes());
    }
    disk.write_sector(sector as usize, &raw);
}

fn now() -> u32 {
    Local::now().timestamp() as u32
}

fn format_time(timestamp: u32) -> String {
    DateTime::from_timestamp(timestamp as i64, 0)
        .map(|time| time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

// 目录的内容需要遵从一种特殊的格式: 它可以看成一个目录项的数组,
// 每个目录项记录了是否在用, 目录下一个文件 (或子目录) 的文件头所在扇区, 以及它的名字.
#[repr(C)]
#[derive(Clone, PartialEq, Eq)]
/// 目录项
///
/// 它自身占据空间 20 字节
pub struct DirEntry {
    in_use: u32,
    sector: u32,
    /// 最大允许保存长度为 9 的文件名, 之后至少有一个 '\0'
    name: [u8; DIR_ENTRY_SIZE - 8],
}

const _: () = assert!(std::mem::size_of::<DirEntry>() == DIR_ENTRY_SIZE);

impl DirEntry {
    /// 创建一个空的目录项
    pub fn create_empty() -> Self {
        Self {
            in_use: 0,
            sector: INVALID_SECTOR,
            name: [0; DIR_ENTRY_SIZE - 8],
        }
    }

    /// 通过文件名和文件头扇区创建一个目录项
    pub fn new(name: &str, sector: u32) -> Result<Self> {
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        if name.is_empty() || name.contains('\0') || name.contains('/') {
            return Err(FsError::InvalidArgument);
        }
        let mut entry = Self::create_empty();
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry.sector = sector;
        entry.in_use = 1;
        Ok(entry)
    }

    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, DIR_ENTRY_SIZE)
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self as *mut Self as *mut u8, DIR_ENTRY_SIZE)
        }
    }
}

impl Debug for DirEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DirEntry")
            .field("in_use", &self.in_use())
            .field("sector", &self.sector)
            .field("name", &self.name())
            .finish()
    }
}
