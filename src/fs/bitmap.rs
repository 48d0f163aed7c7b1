//! 空闲扇区位图
//!
//! 每个 bit 代表一个扇区的分配状态, 0 意味着空闲, 1 意味着已经分配出去.
//! 位图本身驻留在内存中, 由当前持有它的操作独占;
//! 它作为一个普通文件 (头部位于 [`FREE_MAP_SECTOR`](super::FREE_MAP_SECTOR)) 持久化在磁盘上,
//! 通过 [`Bitmap::fetch_from`] / [`Bitmap::write_back`] 与该文件交换内容.
//!
//! 位图所要做的事情是通过基于 bit 为单位的分配(寻找一个为 0 的 bit 位并设置为 1)
//! 和回收(将bit位清零)来进行扇区的分配和回收

use std::fmt::Write;

use super::OpenFile;

/// 位图以 u64 为一组进行操作, 每组打包了 64 bits
const BITS_PER_GROUP: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    groups: Vec<u64>,
    num_bits: usize,
}

impl Bitmap {
    pub fn new(num_bits: usize) -> Self {
        Self {
            groups: vec![0; num_bits.div_ceil(BITS_PER_GROUP)],
            num_bits,
        }
    }

    pub fn mark(&mut self, bit: usize) {
        let (group, inner) = decomposition(self.check(bit));
        self.groups[group] |= 1u64 << inner;
    }

    /// 回收一个 bit, 该 bit 必须处于已分配状态
    pub fn clear(&mut self, bit: usize) {
        assert!(self.test(bit), "sector {} is already free", bit);
        let (group, inner) = decomposition(bit);
        self.groups[group] &= !(1u64 << inner);
    }

    pub fn test(&self, bit: usize) -> bool {
        let (group, inner) = decomposition(self.check(bit));
        self.groups[group] & (1u64 << inner) != 0
    }

    /// 分配一个空闲 bit 并返回它的编号, 也就是扇区号
    ///
    /// 以 bit 组为单位进行遍历, 找到一个尚未被全部分配出去的组,
    /// 最后在里面分配最低的那个空闲 bit.
    /// 如果所有bit均已经被分配出去了, 则返回 None .
    pub fn find(&mut self) -> Option<usize> {
        let bit = self
            .groups
            .iter()
            .enumerate()
            // 如果它并没有达到 u64::MAX (即该组未分配完),
            .find(|(_, bits64)| **bits64 != u64::MAX)
            // 则通过 u64::trailing_ones 找到最低的一个 0 的位置
            .map(|(group, bits64)| group * BITS_PER_GROUP + bits64.trailing_ones() as usize)
            .filter(|bit| *bit < self.num_bits)?;
        self.mark(bit);
        Some(bit)
    }

    pub fn num_clear(&self) -> usize {
        (0..self.num_bits).filter(|bit| !self.test(*bit)).count()
    }

    /// 从位图文件中读入位图内容
    pub fn fetch_from(&mut self, file: &OpenFile) {
        let mut bytes = vec![0u8; self.byte_len()];
        file.read_at(&mut bytes, 0);
        for (group, chunk) in self.groups.iter_mut().zip(bytes.chunks(8)) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            *group = u64::from_le_bytes(word);
        }
    }

    /// 将位图内容写回位图文件
    pub fn write_back(&self, file: &OpenFile) {
        let bytes: Vec<u8> = self
            .groups
            .iter()
            .flat_map(|group| group.to_le_bytes())
            .take(self.byte_len())
            .collect();
        file.write_at(&bytes, 0);
    }

    /// 列出所有已分配的扇区
    pub fn dump(&self) -> String {
        let mut out = String::from("Bitmap set:\n");
        for bit in (0..self.num_bits).filter(|bit| self.test(*bit)) {
            let _ = write!(out, "{}, ", bit);
        }
        out.push('\n');
        out
    }

    fn byte_len(&self) -> usize {
        self.num_bits.div_ceil(8)
    }

    fn check(&self, bit: usize) -> usize {
        assert!(bit < self.num_bits, "bit {} out of range", bit);
        bit
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("num_bits", &self.num_bits)
            .field("num_clear", &self.num_clear())
            .finish()
    }
}

/// 将bit编号分解为组编号 bits64_pos 以及组内编号 inner_pos 的二元组
fn decomposition(bit: usize) -> (usize, usize) {
    (bit / BITS_PER_GROUP, bit % BITS_PER_GROUP)
}
