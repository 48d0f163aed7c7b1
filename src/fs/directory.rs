//! 目录: 文件名到文件头扇区的映射表
//!
//! 目录本身也是一个文件, 它的内容就是 [`DirEntry`] 数组, 容量在创建时就固定了.
//! 和位图一样, 目录在内存中操作, 通过 [`Directory::fetch_from`] / [`Directory::write_back`]
//! 与目录文件交换内容.

use super::{DirEntry, FsError, OpenFile, Result, DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Directory {
    table: Vec<DirEntry>,
}

impl Directory {
    /// 创建一个有 size 个空目录项的目录
    pub fn new(size: usize) -> Self {
        Self {
            table: (0..size).map(|_| DirEntry::create_empty()).collect(),
        }
    }

    /// 从目录文件中读入目录表
    pub fn fetch_from(&mut self, file: &OpenFile) {
        let mut bytes = vec![0u8; self.table.len() * DIR_ENTRY_SIZE];
        file.read_at(&mut bytes, 0);
        for (entry, raw) in self.table.iter_mut().zip(bytes.chunks_exact(DIR_ENTRY_SIZE)) {
            entry.as_bytes_mut().copy_from_slice(raw);
        }
    }

    /// 将目录表写回目录文件
    pub fn write_back(&self, file: &OpenFile) {
        let bytes: Vec<u8> = self
            .table
            .iter()
            .flat_map(|entry| entry.as_bytes().iter().copied())
            .collect();
        file.write_at(&bytes, 0);
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.in_use() && entry.name() == name)
    }

    /// 查找文件名对应的文件头扇区
    pub fn find(&self, name: &str) -> Option<u32> {
        self.find_index(name).map(|idx| self.table[idx].sector())
    }

    /// 在第一个空闲目录项中记录 name -> sector
    pub fn add(&mut self, name: &str, sector: u32) -> Result<()> {
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter_mut()
            .find(|entry| !entry.in_use())
            .ok_or(FsError::DirectoryFull)?;
        *slot = DirEntry::new(name, sector)?;
        Ok(())
    }

    /// 删除一个目录项, 不会回收文件本身
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let idx = self.find_index(name).ok_or(FsError::NotFound)?;
        self.table[idx] = DirEntry::create_empty();
        Ok(())
    }

    /// 所有在用目录项的文件名
    pub fn list(&self) -> Vec<String> {
        self.entries().map(|(name, _)| String::from(name)).collect()
    }

    /// 在用目录项的 (文件名, 文件头扇区)
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.table
            .iter()
            .filter(|entry| entry.in_use())
            .map(|entry| (entry.name(), entry.sector()))
    }

    /// 反查: 文件头位于 sector 的目录项名字
    pub fn name_of(&self, sector: u32) -> Option<&str> {
        self.entries()
            .find(|(_, entry_sector)| *entry_sector == sector)
            .map(|(name, _)| name)
    }

    pub fn num_used(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_used() == 0
    }
}
