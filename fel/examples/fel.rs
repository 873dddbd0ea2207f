mod common;

use anyhow::{anyhow, Result};
use clap::Parser;
use common::Command;
use fel::libusb::DeviceUnavailable;

fn list_available_devices() -> Result<()> {
    let devices = fel::libusb::Devices::new()?;
    println!("Available FEL devices");
    for d in devices.iter() {
        match d {
            Ok(d) => println!("* {}:{}", d.bus_number(), d.address()),
            Err(DeviceUnavailable { device, error }) => {
                println!("* {:?} - unavailable: {}", device, error)
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let opt = common::Opts::parse();

    if matches!(opt.command, Command::List) {
        return list_available_devices();
    }

    let devices = fel::libusb::Devices::new()?;
    let device = if let Some(dev) = opt.device {
        devices
            .iter()
            .find(|d| match d {
                Ok(device) => device.bus_number() == dev.bus_number && device.address() == dev.address,
                Err(DeviceUnavailable { device, .. }) => {
                    device.bus_number() == dev.bus_number && device.address() == dev.address
                }
            })
            .ok_or_else(|| anyhow!("specified device not found"))?
    } else {
        let mut devices: Vec<_> = devices.iter().collect();
        match devices.len() {
            0 => Err(anyhow!("no devices found")),
            1 => Ok(devices.pop().unwrap()),
            _ => {
                drop(devices);
                let _ = list_available_devices();
                println!();
                Err(anyhow!("please select a specific device using the -d option"))
            }
        }?
    }?;

    opt.command.run(device, opt.verbose)
}
