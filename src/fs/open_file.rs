//! 打开的文件
//!
//! [`OpenFile`] 只记住文件头所在的扇区和读写位置, 每次读写都在文件的读写锁下从磁盘重新读入文件头,
//! 因此其他线程通过 `extend_size` / `shrink_size` 修改文件大小之后, 已经打开的文件也能看到新的大小.
//!
//! 读写不会改变文件大小, 超出文件末尾的部分被截断; 文件只能通过
//! [`FileSystem::extend_size`](super::FileSystem::extend_size) 增大.

use std::{ops::Range, sync::Arc};

use log::trace;
use spin::Mutex;

use super::{AccessRegistry, CachedDisk, FileHeader, SECTOR_SIZE};

pub struct OpenFile {
    sector: u32,
    seek_position: Mutex<usize>,
    disk: Arc<CachedDisk>,
    registry: Arc<AccessRegistry>,
}

impl OpenFile {
    /// 打开文件头位于 sector 的文件, 在访问控制表中登记一次打开
    pub fn new(sector: u32, disk: Arc<CachedDisk>, registry: Arc<AccessRegistry>) -> Self {
        registry.register_open(sector);
        Self {
            sector,
            seek_position: Mutex::new(0),
            disk,
            registry,
        }
    }

    pub fn header_sector(&self) -> u32 {
        self.sector
    }

    pub fn seek(&self, position: usize) {
        *self.seek_position.lock() = position;
    }

    pub fn position(&self) -> usize {
        *self.seek_position.lock()
    }

    /// 文件当前的字节数
    pub fn length(&self) -> usize {
        self.registry.before_read(self.sector);
        let length = FileHeader::load(self.sector, &self.disk).file_length();
        self.registry.after_read(self.sector);
        length
    }

    /// 当前文件头的一份拷贝
    pub fn header(&self) -> FileHeader {
        self.registry.before_read(self.sector);
        let header = FileHeader::load(self.sector, &self.disk);
        self.registry.after_read(self.sector);
        header
    }

    /// 从读写位置开始读, 读写位置随之前进
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut position = self.seek_position.lock();
        let read = self.read_at(buf, *position);
        *position += read;
        read
    }

    /// 从读写位置开始写, 读写位置随之前进
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut position = self.seek_position.lock();
        let written = self.write_at(buf, *position);
        *position += written;
        written
    }

    /// 从 position 开始读入至多 buf.len() 个字节, 返回实际读到的字节数
    pub fn read_at(&self, buf: &mut [u8], position: usize) -> usize {
        self.registry.before_read(self.sector);
        let header = FileHeader::load(self.sector, &self.disk);
        let read = self.transfer(&header, position, buf.len(), false, |chunk, range, block| {
            buf[chunk].copy_from_slice(&block[range]);
        });
        self.registry.after_read(self.sector);
        trace!("file {}: read {} bytes at {}", self.sector, read, position);
        read
    }

    /// 从 position 开始写入至多 buf.len() 个字节, 返回实际写入的字节数
    ///
    /// 不完整的扇区先读入再修改. 写入之后更新文件头的访问与修改时间并写回.
    pub fn write_at(&self, buf: &[u8], position: usize) -> usize {
        self.registry.before_write(self.sector);
        let mut header = FileHeader::load(self.sector, &self.disk);
        let written = self.transfer(&header, position, buf.len(), true, |chunk, range, block| {
            block[range].copy_from_slice(&buf[chunk]);
        });
        if written > 0 {
            header.update_last_modify_time();
            header.write_back(self.sector, &self.disk);
        }
        self.registry.after_write(self.sector);
        trace!("file {}: wrote {} bytes at {}", self.sector, written, position);
        written
    }

    /// 以扇区为单位遍历 [position, position + len) 与文件内容的交集
    ///
    /// 对每个扇区调用 f(缓冲区中的区间, 扇区内的区间, 扇区数据), writing 时把扇区写回.
    /// 只有整扇区写入时才跳过读盘.
    fn transfer(
        &self,
        header: &FileHeader,
        position: usize,
        len: usize,
        writing: bool,
        mut f: impl FnMut(Range<usize>, Range<usize>, &mut [u8]),
    ) -> usize {
        let file_length = header.file_length();
        if position >= file_length {
            return 0;
        }
        let end = file_length.min(position + len);
        let mut start = position;
        let mut block = [0u8; SECTOR_SIZE];
        while start < end {
            let sector_start = start / SECTOR_SIZE * SECTOR_SIZE;
            let stop = end.min(sector_start + SECTOR_SIZE);
            let sector = header.byte_to_sector(start, &self.disk) as usize;
            let whole = start == sector_start && stop == sector_start + SECTOR_SIZE;
            if !(writing && whole) {
                self.disk.read_sector(sector, &mut block);
            }
            f(
                start - position..stop - position,
                start - sector_start..stop - sector_start,
                &mut block,
            );
            if writing {
                self.disk.write_sector(sector, &block);
            }
            start = stop;
        }
        end - position
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.registry.register_close(self.sector);
    }
}
