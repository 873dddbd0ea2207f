use std::{fs, path::PathBuf};

use anyhow::{anyhow, Result};
use sunxi_boot_image::{egon::EgonHeader, mkimage::MkimageHeader};

fn inspect_egon(path: &PathBuf) -> Result<()> {
    let buf = fs::read(path)?;
    let header = EgonHeader::parse(&buf).map_err(|e| anyhow!(e))?;
    println!("eGON header: {:?}", header);
    println!("spl_len: {} of {} bytes in file", header.spl_len, buf.len());
    if buf.len() as u32 > header.spl_len {
        println!(
            "{} trailing bytes after the SPL image",
            buf.len() as u32 - header.spl_len
        );
    }
    Ok(())
}

fn inspect_mkimage(path: &PathBuf) -> Result<()> {
    let buf = fs::read(path)?;
    let header = MkimageHeader::parse(&buf).map_err(|e| anyhow!(e))?;
    println!("mkimage header: {:?}", header);
    println!("name: {}", header.name);
    Ok(())
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Parse and checksum-validate an eGON SPL header.
    Egon { path: PathBuf },
    /// Parse and validate an mkimage firmware/script header.
    Mkimage { path: PathBuf },
}

#[derive(clap::Parser)]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let opt = <Opts as clap::Parser>::parse();

    match opt.command {
        Command::Egon { path } => inspect_egon(&path),
        Command::Mkimage { path } => inspect_mkimage(&path),
    }
}
