//! 块设备仅支持以扇区为单位进行随机读写, 需要由具体的设备来实现这两个方法.
//! 中断驱动的磁盘 [`Disk`](super::Disk) 会调用这两个方法完成真正的数据传输.
//! 泛用性: 可以挂载任何实现了 BlockDevice Trait 的存储, 例如宿主机上的一个文件或者一段内存.

use std::any::Any;

// 扇区 (Sector) 是磁盘随机读写的数据单位, 本文件系统中每个扇区为 128 字节,
// 文件系统直接以扇区为块, 不再区分块与扇区.

pub trait BlockDevice: Send + Sync + Any {
    // read_block 将编号为 sector 的扇区从存储读入内存中的缓冲区 buf ;
    fn read_block(&self, sector: usize, buf: &mut [u8]);

    // write_block 将内存中的缓冲区 buf 中的数据写入存储编号为 sector 的扇区.
    fn write_block(&self, sector: usize, buf: &[u8]);
}
