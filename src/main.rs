use std::{
    error::Error,
    io::{self, Write},
    sync::Arc,
};

use clap::Parser;

use cli::{Cli, Command};
use device::BlockFile;
use fs::{CachedDisk, FileSystem, FileType};

mod cli;
mod device;
mod fs;
mod logging;
#[cfg(test)]
mod test;

fn main() {
    if let Err(err) = nachos_fs() {
        eprintln!("nachos-fs: {}", err);
        std::process::exit(1);
    }
}

fn nachos_fs() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init(cli.log);

    let format = matches!(cli.command, Command::Format);
    if !format && !cli.disk.exists() {
        return Err(format!("{} does not exist, run `format` first", cli.disk.display()).into());
    }

    // 打开 (必要时创建) 磁盘镜像, 在它之上依次搭建中断驱动磁盘, 同步磁盘和扇区缓存
    let block_file = Arc::new(BlockFile::open(&cli.disk)?);
    let disk = Arc::new(CachedDisk::new(block_file));
    let fs = FileSystem::new(disk, format)?;

    if let Some(dir) = cli.dir.as_deref() {
        enter(&fs, dir)?;
    }

    match cli.command {
        Command::Format => println!("formatted {}", cli.disk.display()),
        Command::Cp { host, name } => {
            let data = std::fs::read(&host)?;
            fs.copy_in(&name, &data)?;
            println!("{}: {} bytes", name, data.len());
        }
        Command::Cat { name } => {
            let file = fs.open_file(&name)?;
            let mut buf = vec![0u8; file.length()];
            let len = file.read_at(&mut buf, 0);
            io::stdout().write_all(&buf[..len])?;
        }
        Command::Ls => {
            for name in fs.list() {
                println!("{}", name);
            }
        }
        Command::Rm { name } => fs.remove(&name)?,
        Command::Mkdir { name } => fs.mkdir(&name)?,
        Command::Rmdir { name, recursive } => {
            if recursive {
                fs.rmdir_recursive(&name)?
            } else {
                fs.rmdir(&name)?
            }
        }
        Command::Extend { name, delta } => fs.extend_size(&name, delta)?,
        Command::Shrink { name, delta } => fs.shrink_size(&name, delta)?,
        Command::Dump { name: None, content } => print!("{}", fs.print(content)),
        Command::Dump {
            name: Some(name),
            content,
        } => print!("{}", fs.dump(&name, content)?),
        Command::Stat { name } => {
            let header = fs.stat(&name)?;
            let kind = match header.file_type() {
                FileType::Regular => "file",
                FileType::Directory => "dir",
            };
            println!(
                "{} ({}) in {}: {} bytes, {} data sectors, indirect block: {}, {} sectors free",
                name,
                kind,
                fs.current_path(),
                header.file_length(),
                header.num_sectors(),
                header
                    .indirect_sector()
                    .map_or(String::from("none"), |sector| sector.to_string()),
                fs.num_free_sectors(),
            );
        }
    }

    fs.flush();
    Ok(())
}

/// 按路径逐级进入目录, 以 '/' 开头时从根目录出发
fn enter(fs: &FileSystem, path: &str) -> fs::Result<()> {
    if path.starts_with('/') {
        fs.cd("/")?;
    }
    for component in path.split('/').filter(|c| !c.is_empty()) {
        fs.cd(component)?;
    }
    Ok(())
}
