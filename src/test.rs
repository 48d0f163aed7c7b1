#![allow(unused)]
use super::device;
use super::fs;
use device::{BlockFile, MemoryDisk};
use fs::{
    CachedDisk, FileSystem, FsError, DIRECTORY_FILE_SIZE, DIRECT_MAX_SIZE, MAX_FILE_SIZE,
    NUM_DIR_ENTRIES, NUM_SECTORS, SECTOR_SIZE,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 格式化之后剩余的空闲扇区: 两个文件头, 位图 1 个扇区, 根目录 2 个扇区
const FREE_AFTER_FORMAT: usize = NUM_SECTORS - 2 - 1 - 2;

fn format_memory_disk() -> FileSystem {
    crate::logging::init(None);
    let disk = Arc::new(CachedDisk::new(Arc::new(MemoryDisk::new())));
    FileSystem::create(disk).unwrap()
}

#[test]
fn write_then_read_back() {
    let fs = format_memory_disk();
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
    fs.create_file("a", 8).unwrap();
    {
        let file = fs.open_file("a").unwrap();
        assert_eq!(file.write(b"xy"), 2);
    }
    let file = fs.open_file("a").unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(file.read(&mut buf), 2);
    assert_eq!(&buf, b"xy");
    assert_eq!(file.length(), 8);
}

#[test]
fn nested_directories() {
    let fs = format_memory_disk();
    assert_eq!(fs.current_dir_name(), "/");
    fs.mkdir("d").unwrap();
    fs.cd("d").unwrap();
    assert_eq!(fs.current_dir_name(), "d");
    fs.create_file("f", 4).unwrap();
    fs.cd("..").unwrap();
    assert_eq!(fs.remove("d"), Err(FsError::NotEmpty));
    assert_eq!(fs.rmdir("d"), Err(FsError::NotEmpty));
    fs.cd("d").unwrap();
    fs.remove("f").unwrap();
    fs.cd("..").unwrap();
    fs.rmdir("d").unwrap();
    assert!(fs.list().is_empty());
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn paths_follow_parent_links() {
    let fs = format_memory_disk();
    assert_eq!(fs.current_path(), "/");
    fs.mkdir("usr").unwrap();
    fs.cd("usr").unwrap();
    fs.mkdir("lib").unwrap();
    fs.cd("lib").unwrap();
    assert_eq!(fs.current_path(), "/usr/lib");
    assert_eq!(fs.current_dir_name(), "lib");
    fs.cd(".").unwrap();
    assert_eq!(fs.current_path(), "/usr/lib");
    fs.cd("/").unwrap();
    assert_eq!(fs.current_path(), "/");
    assert_eq!(fs.cd(".."), Err(FsError::NoParent));
}

#[test]
fn directory_operations_reject_bad_targets() {
    let fs = format_memory_disk();
    fs.create_file("plain", 10).unwrap();
    assert_eq!(fs.cd("plain"), Err(FsError::NotADirectory));
    assert_eq!(fs.rmdir("plain"), Err(FsError::NotADirectory));
    assert_eq!(fs.rmdir_recursive("plain"), Err(FsError::NotADirectory));
    assert_eq!(fs.cd("missing"), Err(FsError::NotFound));
    assert_eq!(fs.rmdir("missing"), Err(FsError::NotFound));
    assert_eq!(fs.remove("missing"), Err(FsError::NotFound));
    assert!(fs.open_file("missing").is_err());
    assert_eq!(fs.create_file("plain", 1), Err(FsError::AlreadyExists));
    assert_eq!(fs.mkdir("plain"), Err(FsError::AlreadyExists));
    assert_eq!(fs.create_file("abcdefghij", 1), Err(FsError::NameTooLong));
    assert_eq!(fs.create_file("..", 1), Err(FsError::InvalidArgument));
    assert_eq!(
        fs.create_file("huge", MAX_FILE_SIZE + 1),
        Err(FsError::SizeExceeded)
    );
}

#[test]
fn failed_create_leaves_disk_unchanged() {
    let fs = format_memory_disk();
    for i in 0..NUM_DIR_ENTRIES {
        fs.create_file(&format!("f{}", i), 1).unwrap();
    }
    let free = fs.num_free_sectors();
    assert_eq!(fs.create_file("extra", 1), Err(FsError::DirectoryFull));
    assert_eq!(fs.num_free_sectors(), free);
    assert_eq!(fs.list().len(), NUM_DIR_ENTRIES);
}

#[test]
fn out_of_space_is_reported_without_partial_allocation() {
    let fs = format_memory_disk();
    // 每个最大文件占 56 个数据块 + 1 个间接索引块 + 1 个文件头
    let max_file_cost = MAX_FILE_SIZE / SECTOR_SIZE + 2;
    for i in 0..NUM_DIR_ENTRIES - 1 {
        fs.create_file(&format!("f{}", i), MAX_FILE_SIZE).unwrap();
    }
    fs.mkdir("d").unwrap();
    fs.cd("d").unwrap();
    for i in 0..8 {
        fs.create_file(&format!("f{}", i), MAX_FILE_SIZE).unwrap();
    }
    let free = FREE_AFTER_FORMAT - 17 * max_file_cost - 3;
    assert_eq!(fs.num_free_sectors(), free);
    assert_eq!(free, 30);

    // 30 个数据块还需要 1 个间接索引块和 1 个文件头
    assert_eq!(
        fs.create_file("x", 30 * SECTOR_SIZE),
        Err(FsError::OutOfSpace)
    );
    assert_eq!(fs.num_free_sectors(), free);
    assert!(fs.open_file("x").is_err());

    fs.create_file("x", 28 * SECTOR_SIZE).unwrap();
    assert_eq!(fs.num_free_sectors(), 0);
    assert_eq!(fs.extend_size("x", 1), Err(FsError::OutOfSpace));
    assert_eq!(fs.stat("x").unwrap().file_length(), 28 * SECTOR_SIZE);
    assert_eq!(fs.create_file("y", 0), Err(FsError::OutOfSpace));

    fs.remove("f0").unwrap();
    assert_eq!(fs.num_free_sectors(), max_file_cost);
    fs.extend_size("x", SECTOR_SIZE as isize).unwrap();
    assert_eq!(fs.num_free_sectors(), max_file_cost - 1);
}

#[test]
fn file_past_direct_capacity_uses_one_indirect_block() {
    let fs = format_memory_disk();
    fs.create_file("big", DIRECT_MAX_SIZE + 1).unwrap();
    // 文件头 + 25 个数据块 + 1 个间接索引块
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT - 27);
    let header = fs.stat("big").unwrap();
    let indirect = header.indirect_sector().unwrap();
    assert!(!header.data_sectors(fs.disk()).contains(&indirect));

    fs.shrink_size("big", 1).unwrap();
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT - 25);
    let header = fs.stat("big").unwrap();
    assert_eq!(header.file_length(), DIRECT_MAX_SIZE);
    assert_eq!(header.indirect_sector(), None);
    // 所有偏移都落在直接索引里
    let sectors = header.data_sectors(fs.disk());
    for offset in (0..DIRECT_MAX_SIZE).step_by(SECTOR_SIZE) {
        assert_eq!(
            header.byte_to_sector(offset, fs.disk()),
            sectors[offset / SECTOR_SIZE]
        );
    }
    assert!(!sectors.contains(&indirect));
}

#[test]
fn open_file_cannot_be_removed() {
    let fs = format_memory_disk();
    fs.create_file("f", 16).unwrap();
    let file = fs.open_file("f").unwrap();
    assert_eq!(fs.remove("f"), Err(FsError::Busy));
    assert_eq!(fs.shrink_size("f", 1), Err(FsError::Busy));
    drop(file);
    fs.remove("f").unwrap();
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn recursive_rmdir_frees_whole_subtree() {
    let fs = format_memory_disk();
    fs.mkdir("top").unwrap();
    fs.cd("top").unwrap();
    fs.create_file("a", 3000).unwrap();
    fs.mkdir("sub").unwrap();
    fs.cd("sub").unwrap();
    fs.create_file("b", 5000).unwrap();
    let file = fs.open_file("b").unwrap();
    fs.cd("/").unwrap();

    assert_eq!(fs.rmdir_recursive("top"), Err(FsError::Busy));
    drop(file);
    fs.rmdir_recursive("top").unwrap();
    assert!(fs.list().is_empty());
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn resize_through_the_file_system() {
    let fs = format_memory_disk();
    fs.create_file("f", 100).unwrap();
    assert_eq!(fs.extend_size("nope", 10), Err(FsError::NotFound));
    assert_eq!(fs.extend_size("f", -1), Err(FsError::InvalidArgument));
    assert_eq!(fs.shrink_size("f", -1), Err(FsError::InvalidArgument));
    assert_eq!(fs.shrink_size("f", 101), Err(FsError::InvalidArgument));
    assert_eq!(
        fs.extend_size("f", MAX_FILE_SIZE as isize),
        Err(FsError::SizeExceeded)
    );
    let free = fs.num_free_sectors();

    fs.extend_size("f", 4000).unwrap();
    // 已打开的文件能看到新的大小
    let file = fs.open_file("f").unwrap();
    assert_eq!(file.length(), 4100);
    assert_eq!(file.write_at(b"tail", 4096), 4);
    drop(file);

    fs.shrink_size("f", 4000).unwrap();
    assert_eq!(fs.stat("f").unwrap().file_length(), 100);
    assert_eq!(fs.num_free_sectors(), free);
}

#[test]
fn directories_keep_their_size() {
    let fs = format_memory_disk();
    fs.mkdir("d").unwrap();
    fs.cd("d").unwrap();
    for i in 0..7 {
        fs.create_file(&format!("f{}", i), 300).unwrap();
    }
    fs.cd("..").unwrap();
    let free = fs.num_free_sectors();

    assert_eq!(fs.shrink_size("d", 100), Err(FsError::IsADirectory));
    assert_eq!(fs.extend_size("d", 100), Err(FsError::IsADirectory));
    assert_eq!(fs.num_free_sectors(), free);
    assert_eq!(fs.stat("d").unwrap().file_length(), DIRECTORY_FILE_SIZE);

    // 所有表项都还在, 删除之后扇区全部归还
    fs.cd("d").unwrap();
    assert_eq!(fs.list().len(), 7);
    for i in 0..7 {
        fs.remove(&format!("f{}", i)).unwrap();
    }
    fs.cd("..").unwrap();
    fs.rmdir("d").unwrap();
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn rmdir_never_removes_a_regular_file() {
    let fs = Arc::new(format_memory_disk());
    let remover = {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            for _ in 0..200 {
                let _ = fs.rmdir("x");
            }
        })
    };
    for _ in 0..200 {
        fs.mkdir("x").unwrap();
        // 目录可能已经被另一个线程删掉
        let _ = fs.remove("x");
        fs.create_file("x", 10).unwrap();
        assert_eq!(fs.remove("x"), Ok(()));
    }
    remover.join().unwrap();
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn file_system_write_lock_blocks_readers() {
    let fs = Arc::new(format_memory_disk());
    fs.copy_in("f", b"locked").unwrap();
    let file = fs.open_file("f").unwrap();
    let sector = file.header_sector();

    // 读锁可以共享
    fs.before_read(sector);
    let mut buf = [0u8; 6];
    assert_eq!(file.read_at(&mut buf, 0), 6);
    fs.after_read(sector);

    fs.before_write(sector);
    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let fs = Arc::clone(&fs);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let file = fs.open_file("f").unwrap();
            let mut buf = [0u8; 6];
            assert_eq!(file.read_at(&mut buf, 0), 6);
            assert_eq!(&buf, b"locked");
            done.store(true, Ordering::SeqCst);
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));
    fs.after_write(sector);
    reader.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn random_contents_round_trip() {
    use rand::Rng;
    let fs = format_memory_disk();
    let mut rng = rand::thread_rng();

    let mut random_str_test = |len: usize| {
        let data: String = (0..len)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        fs.copy_in("rand", data.as_bytes()).unwrap();
        let file = fs.open_file("rand").unwrap();
        let mut read_buffer = [0u8; 127];
        let mut read_str = String::new();
        loop {
            let len = file.read(&mut read_buffer);
            if len == 0 {
                break;
            }
            read_str.push_str(core::str::from_utf8(&read_buffer[..len]).unwrap());
        }
        assert_eq!(data, read_str);
        drop(file);
        fs.remove("rand").unwrap();
    };

    random_str_test(4 * SECTOR_SIZE);
    random_str_test(8 * SECTOR_SIZE + SECTOR_SIZE / 2);
    random_str_test(DIRECT_MAX_SIZE);
    random_str_test(DIRECT_MAX_SIZE + SECTOR_SIZE / 7);
    random_str_test(MAX_FILE_SIZE);
    assert_eq!(fs.num_free_sectors(), FREE_AFTER_FORMAT);
}

#[test]
fn concurrent_readers_never_see_torn_writes() {
    let fs = Arc::new(format_memory_disk());
    fs.create_file("shared", 3 * SECTOR_SIZE).unwrap();
    let torn = Arc::new(AtomicUsize::new(0));

    let writers = (1..=3u8).map(|tag| {
        let fs = Arc::clone(&fs);
        thread::spawn(move || {
            let file = fs.open_file("shared").unwrap();
            for _ in 0..30 {
                assert_eq!(file.write_at(&[tag; 3 * SECTOR_SIZE], 0), 3 * SECTOR_SIZE);
            }
        })
    });
    let readers = (0..3).map(|_| {
        let fs = Arc::clone(&fs);
        let torn = Arc::clone(&torn);
        thread::spawn(move || {
            let file = fs.open_file("shared").unwrap();
            let mut buf = [0u8; 3 * SECTOR_SIZE];
            for _ in 0..30 {
                assert_eq!(file.read_at(&mut buf, 0), buf.len());
                if buf.iter().any(|b| *b != buf[0]) {
                    torn.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
    });
    let handles: Vec<_> = writers.chain(readers).collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(torn.load(Ordering::SeqCst), 0);
    fs.remove("shared").unwrap();
}

#[test]
fn file_system_survives_remount() -> std::io::Result<()> {
    std::fs::create_dir_all("target")?;
    let path = "target/nachos-fs-remount.img";
    {
        let disk = Arc::new(CachedDisk::new(Arc::new(BlockFile::open(path)?)));
        let fs = FileSystem::create(disk).unwrap();
        fs.mkdir("docs").unwrap();
        fs.cd("docs").unwrap();
        fs.copy_in("note", b"persisted across mounts").unwrap();
    }
    let disk = Arc::new(CachedDisk::new(Arc::new(BlockFile::open(path)?)));
    let fs = FileSystem::open(disk);
    assert_eq!(fs.list(), vec![String::from("docs")]);
    fs.cd("docs").unwrap();
    let file = fs.open_file("note").unwrap();
    let mut buf = vec![0u8; file.length()];
    file.read_at(&mut buf, 0);
    assert_eq!(buf, b"persisted across mounts");
    drop(file);
    assert_eq!(fs.current_path(), "/docs");
    std::fs::remove_file(path)?;
    Ok(())
}
