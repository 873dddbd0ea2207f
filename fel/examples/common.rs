use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap_num::maybe_hex;
use fel::device::{Device, Transport};
use indicatif::{ProgressBar, ProgressStyle};
use sunxi_boot_image::mkimage::{ImageKind, MkimageHeader};

/// After any host-initiated file upload, check whether the uploaded bytes
/// look like a mkimage boot script or a `uEnv.txt`-style import and, if so,
/// tell the SPL about it.
pub fn apply_payload_hooks<T>(device: &mut Device<T>, addr: u32, buf: &[u8]) -> Result<()>
where
    T: Transport,
    T::TransportError: Send + Sync,
{
    if let Ok(header) = MkimageHeader::parse(buf) {
        if header.kind == ImageKind::Script {
            device.pass_fel_information(addr, 0)?;
            return Ok(());
        }
    }
    if sunxi_boot_image::mkimage::is_uenv(buf) {
        device.pass_fel_information(addr, buf.len() as u32)?;
    }
    Ok(())
}

pub fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

#[derive(Debug, Clone)]
pub struct DeviceArg {
    pub bus_number: u8,
    pub address: u8,
}

pub fn parse_device(device: &str) -> Result<DeviceArg> {
    let mut parts = device.split(':');
    let bus_number = parts
        .next()
        .ok_or_else(|| anyhow!("No bus number: use <bus>:<address>"))?
        .parse()
        .map_err(|_| anyhow!("Bus should be a number"))?;
    let address = parts
        .next()
        .ok_or_else(|| anyhow!("No address: use <bus>:<address>"))?
        .parse()
        .map_err(|_| anyhow!("Address should be a number"))?;
    if parts.next().is_some() {
        return Err(anyhow!("Too many parts"));
    }
    Ok(DeviceArg { bus_number, address })
}

#[derive(clap::Parser)]
pub struct Opts {
    /// Device, specified as <bus>:<address>; auto-selected if only one is attached
    #[arg(short, long, value_parser = parse_device)]
    pub device: Option<DeviceArg>,
    /// Print per-stage progress information
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// List FEL devices currently attached
    List,
    /// Print the VERSION reply: soc id, protocol version, scratchpad address
    Version,
    /// Read `length` bytes starting at `offset` into a file
    Read {
        #[clap(value_parser=maybe_hex::<u32>)]
        offset: u32,
        #[clap(value_parser=maybe_hex::<u32>)]
        length: u32,
        path: PathBuf,
    },
    /// Write `length` bytes read from a file to `offset`
    Write {
        #[clap(value_parser=maybe_hex::<u32>)]
        offset: u32,
        #[clap(value_parser=maybe_hex::<u32>)]
        length: u32,
        path: PathBuf,
    },
    /// Write an entire file to `offset`
    WriteFile {
        #[clap(value_parser=maybe_hex::<u32>)]
        offset: u32,
        path: PathBuf,
    },
    /// Branch the BROM to `addr` and wait for the status reply
    Exec {
        #[clap(value_parser=maybe_hex::<u32>)]
        addr: u32,
    },
    /// Read a single 32-bit word
    Readl {
        #[clap(value_parser=maybe_hex::<u32>)]
        addr: u32,
    },
    /// Read `n` consecutive 32-bit words
    ReadlN {
        #[clap(value_parser=maybe_hex::<u32>)]
        addr: u32,
        n: usize,
    },
    /// Write a single 32-bit word
    Writel {
        #[clap(value_parser=maybe_hex::<u32>)]
        addr: u32,
        #[clap(value_parser=maybe_hex::<u32>)]
        value: u32,
    },
    /// Write consecutive 32-bit words
    WritelN {
        #[clap(value_parser=maybe_hex::<u32>)]
        addr: u32,
        #[clap(value_parser=maybe_hex::<u32>, num_args=1..)]
        values: Vec<u32>,
    },
    /// Print the chip's unique id, if the SoC registry has `sid_addr`
    Sid,
    /// Stage an eGON SPL image from a file
    Spl { path: PathBuf },
    /// Stage a mkimage U-Boot firmware/script image from a file; the target
    /// address comes from the image's own header, not the command line
    Uboot {
        path: PathBuf,
    },
    /// Request a warm reset to `entry_point` via RMR
    Rmr {
        #[clap(value_parser=maybe_hex::<u32>)]
        entry_point: u32,
        /// Request an AArch64 warm reset instead of AArch32
        #[arg(long)]
        aarch64: bool,
    },
    /// Stage an SPL and optional trailing U-Boot image from one file
    Process { path: PathBuf },
}

impl Command {
    pub fn run<T>(self, mut device: Device<T>, verbose: bool) -> Result<()>
    where
        T: Transport,
        T::TransportError: Send + Sync,
    {
        match self {
            Command::List => unreachable!(),
            Command::Version => {
                let version = device.version()?;
                println!(
                    "soc id: {:#06x}, protocol: {:#010x}, scratchpad: {:#010x}",
                    version.soc_id, version.protocol, version.scratchpad
                );
                Ok(())
            }
            Command::Read { offset, length, path } => {
                let data = device.read(offset, length as usize)?;
                File::create(&path)?.write_all(&data)?;
                Ok(())
            }
            Command::Write { offset, length, path } => {
                let mut buf = vec![0u8; length as usize];
                File::open(&path)?.read_exact(&mut buf)?;
                let bar = if verbose { Some(progress_bar(buf.len() as u64)) } else { None };
                let mut callback = bar.as_ref().map(|b| {
                    let b = b.clone();
                    move |n: usize| b.inc(n as u64)
                });
                device.write(offset, &buf, callback.as_mut().map(|c| c as &mut dyn FnMut(usize)))?;
                apply_payload_hooks(&mut device, offset, &buf)
            }
            Command::WriteFile { offset, path } => {
                let mut buf = Vec::new();
                File::open(&path)?.read_to_end(&mut buf)?;
                let bar = if verbose { Some(progress_bar(buf.len() as u64)) } else { None };
                let mut callback = bar.as_ref().map(|b| {
                    let b = b.clone();
                    move |n: usize| b.inc(n as u64)
                });
                device.write(offset, &buf, callback.as_mut().map(|c| c as &mut dyn FnMut(usize)))?;
                apply_payload_hooks(&mut device, offset, &buf)
            }
            Command::Exec { addr } => device.execute(addr).map_err(Into::into),
            Command::Readl { addr } => {
                println!("{:#010x}", device.readl(addr)?);
                Ok(())
            }
            Command::ReadlN { addr, n } => {
                for (i, word) in device.readl_n(addr, n)?.into_iter().enumerate() {
                    println!("{:#010x}: {:#010x}", addr + (i as u32) * 4, word);
                }
                Ok(())
            }
            Command::Writel { addr, value } => device.writel(addr, value).map_err(Into::into),
            Command::WritelN { addr, values } => device.writel_n(addr, &values).map_err(Into::into),
            Command::Sid => {
                match device.read_sid()? {
                    Some(sid) => println!(
                        "{:08x}{:08x}{:08x}{:08x}",
                        sid[0], sid[1], sid[2], sid[3]
                    ),
                    None => println!("unknown"),
                }
                Ok(())
            }
            Command::Spl { path } => {
                let mut buf = Vec::new();
                File::open(&path)?.read_to_end(&mut buf)?;
                let bar = if verbose { Some(progress_bar(buf.len() as u64)) } else { None };
                let mut callback = bar.as_ref().map(|b| {
                    let b = b.clone();
                    move |n: usize| b.inc(n as u64)
                });
                fel::spl::stage(&mut device, &buf, callback.as_mut().map(|c| c as &mut dyn FnMut(usize)))
                    .map_err(Into::into)
            }
            Command::Uboot { path } => {
                let mut buf = Vec::new();
                File::open(&path)?.read_to_end(&mut buf)?;
                let bar = if verbose { Some(progress_bar(buf.len() as u64)) } else { None };
                let mut callback = bar.as_ref().map(|b| {
                    let b = b.clone();
                    move |n: usize| b.inc(n as u64)
                });
                let record = fel::uboot::stage(&mut device, &buf, callback.as_mut().map(|c| c as &mut dyn FnMut(usize)))?;
                apply_payload_hooks(&mut device, record.entry, &buf)
            }
            Command::Rmr { entry_point, aarch64 } => {
                match device.rmr_request(entry_point, aarch64)? {
                    fel::device::RmrOutcome::Requested => println!("warm reset requested"),
                    fel::device::RmrOutcome::Unsupported => {
                        println!("this soc has no rvbar_reg; warm reset not supported")
                    }
                }
                Ok(())
            }
            Command::Process { path } => {
                let mut buf = Vec::new();
                File::open(&path)?.read_to_end(&mut buf)?;
                let bar = if verbose { Some(progress_bar(buf.len() as u64)) } else { None };
                let mut callback = bar.as_ref().map(|b| {
                    let b = b.clone();
                    move |n: usize| b.inc(n as u64)
                });
                let uboot = device.process_spl_and_uboot(
                    &buf,
                    callback.as_mut().map(|c| c as &mut dyn FnMut(usize)),
                )?;
                if let Some(record) = uboot {
                    apply_payload_hooks(&mut device, record.entry, &buf[fel::spl::SPL_LEN_LIMIT..])?;
                }
                Ok(())
            }
        }
    }
}
