use crate::fs::{BlockDevice, NUM_SECTORS, SECTOR_SIZE};
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

pub struct BlockFile(pub Mutex<File>);

// std::fs::File 由 Rust 标准库 std 提供, 可以访问 Linux 上的一个文件.
// 我们将它包装成 BlockFile 类型来模拟一块磁盘, 为它实现 BlockDevice 接口.
// 注意 File 本身仅通过 read/write 接口是不能实现随机读写的,
// 在访问一个特定的扇区的时候, 我们必须先 seek 到这个扇区的开头位置

impl BlockFile {
    /// 打开 (必要时创建) 一个磁盘镜像, 并将它的大小设置为整块磁盘
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        f.set_len((NUM_SECTORS * SECTOR_SIZE) as u64)?;
        Ok(Self(Mutex::new(f)))
    }
}

impl BlockDevice for BlockFile {
    /// 从文件读取一个扇区
    fn read_block(&self, sector: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("Error when seeking!");
        file.read_exact(buf).expect("Not a complete sector");
    }

    /// 写一个扇区到文件
    fn write_block(&self, sector: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))
            .expect("Error when seeking!");
        file.write_all(buf).expect("Not a complete sector");
    }
}

/// 内存中的一块磁盘, 测试时使用
#[cfg_attr(not(test), allow(dead_code))]
pub struct MemoryDisk(spin::Mutex<Vec<u8>>);

#[cfg_attr(not(test), allow(dead_code))]
impl MemoryDisk {
    pub fn new() -> Self {
        Self(spin::Mutex::new(vec![0u8; NUM_SECTORS * SECTOR_SIZE]))
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemoryDisk {
    fn read_block(&self, sector: usize, buf: &mut [u8]) {
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&self.0.lock()[start..start + SECTOR_SIZE]);
    }

    fn write_block(&self, sector: usize, buf: &[u8]) {
        let start = sector * SECTOR_SIZE;
        self.0.lock()[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}
