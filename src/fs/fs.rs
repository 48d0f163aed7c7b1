//! 文件系统: 目录树上的所有操作都经过 [`FileSystem`] 完成
//!
//! 磁盘上两个固定的文件头:
//!
//! - [`FREE_MAP_SECTOR`]: 空闲扇区位图文件
//! - [`DIRECTORY_SECTOR`]: 根目录文件
//!
//! 每个修改目录树的操作 (create/remove/mkdir/rmdir/cd/extend/shrink) 都先获取全局的串行化锁,
//! 在内存中读入当前目录和位图并完成修改, 成功时依次写回文件头, 目录和位图, 失败时直接丢弃内存中的修改.
//! 文件的读写不经过这把锁, 只受该文件自己的读写锁保护.

use std::{fmt::Write, sync::Arc};

use log::{debug, info, warn};
use spin::{Mutex, MutexGuard};

use super::{
    AccessRegistry, Bitmap, CachedDisk, Directory, FileHeader, FileType, FsError, OpenFile,
    Result, DIRECTORY_FILE_SIZE, DIRECTORY_SECTOR, FREE_MAP_FILE_SIZE, FREE_MAP_SECTOR,
    MAX_FILE_SIZE, NUM_DIR_ENTRIES, NUM_SECTORS,
};

pub struct FileSystem {
    /// 扇区缓存, 所有磁盘访问都经过它
    disk: Arc<CachedDisk>,
    /// 访问控制表, 与文件系统的装载同生命周期
    registry: Arc<AccessRegistry>,
    /// 位图文件与根目录文件在文件系统装载期间一直打开
    free_map_file: OpenFile,
    directory_file: OpenFile,
    /// 全局串行化锁, 同时保存当前工作目录的文件头扇区
    current_dir: Mutex<u32>,
}

impl FileSystem {
    /// 在磁盘上格式化一个空的文件系统: 只有位图文件和一个空的根目录
    pub fn create(disk: Arc<CachedDisk>) -> Result<Self> {
        info!("fs: formatting the disk");
        let mut free_map = Bitmap::new(NUM_SECTORS);
        // 两个文件头所在的扇区首先被占用, 扇区 0 因此永远不会被分配出去
        free_map.mark(FREE_MAP_SECTOR as usize);
        free_map.mark(DIRECTORY_SECTOR as usize);

        let mut map_header = FileHeader::new();
        map_header.allocate(&mut free_map, FREE_MAP_FILE_SIZE, &disk)?;
        map_header.initialize(FileType::Regular, None);
        let mut dir_header = FileHeader::new();
        dir_header.allocate(&mut free_map, DIRECTORY_FILE_SIZE, &disk)?;
        dir_header.initialize(FileType::Directory, None);

        // 文件头要先落盘, 打开文件时才能读到它们
        map_header.write_back(FREE_MAP_SECTOR, &disk);
        dir_header.write_back(DIRECTORY_SECTOR, &disk);

        let fs = Self::open(disk);
        Directory::new(NUM_DIR_ENTRIES).write_back(&fs.directory_file);
        free_map.write_back(&fs.free_map_file);
        fs.disk.write_all_back();
        debug!("fs: {}", free_map.dump().trim_end());
        Ok(fs)
    }

    /// 装载磁盘上已有的文件系统, 当前目录为根目录
    pub fn open(disk: Arc<CachedDisk>) -> Self {
        let registry = Arc::new(AccessRegistry::new());
        let free_map_file = OpenFile::new(FREE_MAP_SECTOR, Arc::clone(&disk), Arc::clone(&registry));
        let directory_file =
            OpenFile::new(DIRECTORY_SECTOR, Arc::clone(&disk), Arc::clone(&registry));
        Self {
            disk,
            registry,
            free_map_file,
            directory_file,
            current_dir: Mutex::new(DIRECTORY_SECTOR),
        }
    }

    /// 根据 format 格式化或者装载
    pub fn new(disk: Arc<CachedDisk>, format: bool) -> Result<Self> {
        if format {
            Self::create(disk)
        } else {
            Ok(Self::open(disk))
        }
    }

    fn open_sector(&self, sector: u32) -> OpenFile {
        OpenFile::new(sector, Arc::clone(&self.disk), Arc::clone(&self.registry))
    }

    fn load_free_map(&self) -> Bitmap {
        let mut free_map = Bitmap::new(NUM_SECTORS);
        free_map.fetch_from(&self.free_map_file);
        free_map
    }

    fn load_directory(&self, file: &OpenFile) -> Directory {
        let mut directory = Directory::new(NUM_DIR_ENTRIES);
        directory.fetch_from(file);
        directory
    }

    /// 读入文件头位于 sector 的目录, 读完即关闭
    fn read_directory(&self, sector: u32) -> Directory {
        let file = self.open_sector(sector);
        self.load_directory(&file)
    }

    fn serialize(&self) -> MutexGuard<'_, u32> {
        self.current_dir.lock()
    }

    /// 创建一个 size 字节的普通文件
    pub fn create_file(&self, name: &str, size: usize) -> Result<()> {
        let cwd = self.serialize();
        self.create_entry(*cwd, name, size, FileType::Regular)
    }

    /// 创建一个空目录
    pub fn mkdir(&self, name: &str) -> Result<()> {
        let cwd = self.serialize();
        self.create_entry(*cwd, name, DIRECTORY_FILE_SIZE, FileType::Directory)
    }

    /// 在目录 parent 下创建文件或目录, 调用者持有串行化锁
    fn create_entry(&self, parent: u32, name: &str, size: usize, file_type: FileType) -> Result<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidArgument);
        }
        let dir_file = self.open_sector(parent);
        let mut directory = self.load_directory(&dir_file);
        if directory.find(name).is_some() {
            warn!("fs: {} already exists", name);
            return Err(FsError::AlreadyExists);
        }
        if size > MAX_FILE_SIZE {
            return Err(FsError::SizeExceeded);
        }

        // 以下修改都只发生在内存中, 任何一步失败都直接返回, 磁盘保持不变
        let mut free_map = self.load_free_map();
        let sector = free_map.find().ok_or(FsError::OutOfSpace)? as u32;
        directory.add(name, sector)?;
        let mut header = FileHeader::new();
        header.allocate(&mut free_map, size, &self.disk)?;
        header.initialize(file_type, Some(parent));

        header.write_back(sector, &self.disk);
        if file_type == FileType::Directory {
            // 新分配的扇区里可能残留着旧数据
            let file = self.open_sector(sector);
            Directory::new(NUM_DIR_ENTRIES).write_back(&file);
        }
        directory.write_back(&dir_file);
        free_map.write_back(&self.free_map_file);
        info!("fs: created {:?} {} ({} bytes) at sector {}", file_type, name, size, sector);
        Ok(())
    }

    /// 打开当前目录下的一个文件
    pub fn open_file(&self, name: &str) -> Result<OpenFile> {
        let cwd = self.serialize();
        let directory = self.read_directory(*cwd);
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        debug!("fs: open {} at sector {}", name, sector);
        Ok(self.open_sector(sector))
    }

    /// 删除当前目录下的一个文件, 目录只有为空时才能被删除
    ///
    /// 文件正被打开时返回 [`FsError::Busy`], 不会等待.
    pub fn remove(&self, name: &str) -> Result<()> {
        let cwd = self.serialize();
        self.remove_entry(*cwd, name, false)
    }

    /// 删除当前目录下的一个空目录
    pub fn rmdir(&self, name: &str) -> Result<()> {
        let cwd = self.serialize();
        self.remove_entry(*cwd, name, true)
    }

    /// 从目录 parent 中删除 name, 调用者持有串行化锁
    fn remove_entry(&self, parent: u32, name: &str, require_dir: bool) -> Result<()> {
        let dir_file = self.open_sector(parent);
        let mut directory = self.load_directory(&dir_file);
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        let mut header = FileHeader::load(sector, &self.disk);
        if require_dir && !header.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.registry.is_in_use(sector) {
            warn!("fs: {} is in use", name);
            return Err(FsError::Busy);
        }
        if header.is_dir() && !self.read_directory(sector).is_empty() {
            warn!("fs: directory {} is not empty", name);
            return Err(FsError::NotEmpty);
        }

        let mut free_map = self.load_free_map();
        header.deallocate(&mut free_map, &self.disk);
        free_map.clear(sector as usize);
        directory.remove(name)?;

        directory.write_back(&dir_file);
        free_map.write_back(&self.free_map_file);
        info!("fs: removed {}", name);
        Ok(())
    }

    /// 删除当前目录下的一个目录以及其中的所有内容
    ///
    /// 子树中任何一个文件正被打开时返回 [`FsError::Busy`], 什么也不删除.
    pub fn rmdir_recursive(&self, name: &str) -> Result<()> {
        let cwd = self.serialize();
        let dir_file = self.open_sector(*cwd);
        let mut directory = self.load_directory(&dir_file);
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        if !FileHeader::load(sector, &self.disk).is_dir() {
            return Err(FsError::NotADirectory);
        }

        let mut subtree = Vec::new();
        self.collect_subtree(sector, &mut subtree);
        if let Some(busy) = subtree.iter().find(|s| self.registry.is_in_use(**s)) {
            warn!("fs: sector {} under {} is in use", busy, name);
            return Err(FsError::Busy);
        }

        let mut free_map = self.load_free_map();
        for sector in subtree.iter() {
            let mut header = FileHeader::load(*sector, &self.disk);
            header.deallocate(&mut free_map, &self.disk);
            free_map.clear(*sector as usize);
        }
        directory.remove(name)?;

        directory.write_back(&dir_file);
        free_map.write_back(&self.free_map_file);
        info!("fs: removed {} with {} entries", name, subtree.len());
        Ok(())
    }

    /// 收集以 sector 为根的子树中所有文件头扇区, 包括 sector 自身
    fn collect_subtree(&self, sector: u32, out: &mut Vec<u32>) {
        if FileHeader::load(sector, &self.disk).is_dir() {
            for (_, child) in self.read_directory(sector).entries() {
                self.collect_subtree(child, out);
            }
        }
        out.push(sector);
    }

    /// 切换当前目录: "/" 回到根目录, "." 不动, ".." 回到父目录, 其他名字进入子目录
    pub fn cd(&self, name: &str) -> Result<()> {
        let mut cwd = self.serialize();
        let target = match name {
            "/" => DIRECTORY_SECTOR,
            "." => *cwd,
            ".." => FileHeader::load(*cwd, &self.disk)
                .parent_sector()
                .ok_or(FsError::NoParent)?,
            _ => {
                let sector = self
                    .read_directory(*cwd)
                    .find(name)
                    .ok_or(FsError::NotFound)?;
                if !FileHeader::load(sector, &self.disk).is_dir() {
                    return Err(FsError::NotADirectory);
                }
                sector
            }
        };
        debug!("fs: cd {} -> sector {}", name, target);
        *cwd = target;
        Ok(())
    }

    /// 当前目录的名字, 根目录为 "/"
    pub fn current_dir_name(&self) -> String {
        let cwd = self.serialize();
        self.name_of(*cwd)
    }

    /// 当前目录的完整路径, 沿着父目录指针一直走到根目录
    pub fn current_path(&self) -> String {
        let cwd = self.serialize();
        let mut components = Vec::new();
        let mut sector = *cwd;
        while let Some(parent) = FileHeader::load(sector, &self.disk).parent_sector() {
            components.push(self.name_of(sector));
            sector = parent;
        }
        components.reverse();
        format!("/{}", components.join("/"))
    }

    fn name_of(&self, sector: u32) -> String {
        match FileHeader::load(sector, &self.disk).parent_sector() {
            None => String::from("/"),
            Some(parent) => self
                .read_directory(parent)
                .name_of(sector)
                .map(String::from)
                .unwrap_or_default(),
        }
    }

    /// 当前目录下的所有文件名
    pub fn list(&self) -> Vec<String> {
        let cwd = self.serialize();
        self.read_directory(*cwd).list()
    }

    /// 位图文件头, 根目录文件头, 位图, 以及当前目录下每个文件的文件头;
    /// with_content 时附上每个文件的内容
    pub fn print(&self, with_content: bool) -> String {
        let cwd = self.serialize();
        let mut out = String::new();
        let _ = writeln!(out, "Bit map file header:");
        out.push_str(&FileHeader::load(FREE_MAP_SECTOR, &self.disk).dump(&self.disk, with_content));
        let _ = writeln!(out, "Directory file header:");
        out.push_str(&FileHeader::load(DIRECTORY_SECTOR, &self.disk).dump(&self.disk, with_content));
        out.push_str(&self.load_free_map().dump());
        let _ = writeln!(out, "Directory contents:");
        for (name, sector) in self.read_directory(*cwd).entries() {
            let _ = writeln!(out, "Name: {}, Sector: {}", name, sector);
            out.push_str(&FileHeader::load(sector, &self.disk).dump(&self.disk, with_content));
        }
        out
    }

    /// 当前目录下一个文件的文件头
    pub fn stat(&self, name: &str) -> Result<FileHeader> {
        let cwd = self.serialize();
        let sector = self
            .read_directory(*cwd)
            .find(name)
            .ok_or(FsError::NotFound)?;
        Ok(FileHeader::load(sector, &self.disk))
    }

    /// 打印当前目录下一个文件的文件头
    pub fn dump(&self, name: &str, with_content: bool) -> Result<String> {
        Ok(self.stat(name)?.dump(&self.disk, with_content))
    }

    /// 将文件增大 delta 字节, 成功时写回文件头与位图; 目录的大小固定, 返回 [`FsError::IsADirectory`]
    pub fn extend_size(&self, name: &str, delta: isize) -> Result<()> {
        self.resize(name, delta, false)
    }

    /// 将文件缩小 delta 字节, 文件正被打开时返回 [`FsError::Busy`]
    pub fn shrink_size(&self, name: &str, delta: isize) -> Result<()> {
        self.resize(name, delta, true)
    }

    fn resize(&self, name: &str, delta: isize, shrink: bool) -> Result<()> {
        let cwd = self.serialize();
        let sector = self
            .read_directory(*cwd)
            .find(name)
            .ok_or(FsError::NotFound)?;
        // 目录表的长度固定, 截断会丢掉表项和它们占用的扇区
        if FileHeader::load(sector, &self.disk).is_dir() {
            warn!("fs: {} is a directory", name);
            return Err(FsError::IsADirectory);
        }
        if shrink && self.registry.is_in_use(sector) {
            warn!("fs: {} is in use", name);
            return Err(FsError::Busy);
        }

        // 打开文件使它出现在访问控制表中, 再在它的写锁下修改文件头
        let file = self.open_sector(sector);
        self.registry.before_write(file.header_sector());
        let mut header = FileHeader::load(sector, &self.disk);
        let mut free_map = self.load_free_map();
        let result = if shrink {
            header.shrink(delta, &mut free_map, &self.disk)
        } else {
            header.extend(delta, &mut free_map, &self.disk)
        };
        if result.is_ok() {
            header.update_last_modify_time();
            header.write_back(sector, &self.disk);
            free_map.write_back(&self.free_map_file);
            info!("fs: resized {} to {} bytes", name, header.file_length());
        } else {
            warn!("fs: resizing {} by {} failed: {:?}", name, delta, result);
        }
        self.registry.after_write(file.header_sector());
        result
    }

    /// 创建一个恰好容纳 data 的文件并写入内容
    pub fn copy_in(&self, name: &str, data: &[u8]) -> Result<()> {
        self.create_file(name, data.len())?;
        let file = self.open_file(name)?;
        let written = file.write_at(data, 0);
        assert_eq!(written, data.len());
        Ok(())
    }

    pub fn before_read(&self, sector: u32) {
        self.registry.before_read(sector);
    }

    pub fn after_read(&self, sector: u32) {
        self.registry.after_read(sector);
    }

    pub fn before_write(&self, sector: u32) {
        self.registry.before_write(sector);
    }

    pub fn after_write(&self, sector: u32) {
        self.registry.after_write(sector);
    }

    pub fn disk(&self) -> &Arc<CachedDisk> {
        &self.disk
    }

    /// 空闲扇区数
    pub fn num_free_sectors(&self) -> usize {
        let _cwd = self.serialize();
        self.load_free_map().num_clear()
    }

    /// 将缓存中的脏扇区全部写回磁盘
    pub fn flush(&self) {
        self.disk.write_all_back();
    }
}
