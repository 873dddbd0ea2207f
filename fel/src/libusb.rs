use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};
use thiserror::Error;

use crate::device::{DeviceResult, Error};
use crate::operation::{OperationSteps, UsbStep};
use crate::protocol::{self, UsbDirection};

/// USB vendor id Allwinner boot ROMs identify as while in FEL mode.
pub const FEL_VENDOR_ID: u16 = 0x1F3A;
/// USB product id Allwinner boot ROMs identify as while in FEL mode.
pub const FEL_PRODUCT_ID: u16 = 0xEFE8;

const BULK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bulk chunk size, matching `AW_USB_MAX_BULK_SEND`.
const DEFAULT_CHUNK: usize = 512 * 1024;
/// Chunk size used while a progress callback is active, for more frequent
/// notifications.
const PROGRESS_CHUNK: usize = 128 * 1024;

/// Error indicating a device is not available or could not be claimed.
#[derive(Debug, Error)]
#[error("device is not available: {device:?}: {error}")]
pub struct DeviceUnavailable {
    pub device: rusb::Device<GlobalContext>,
    #[source]
    pub error: rusb::Error,
}

/// Iterates over connected devices presenting the FEL vendor/product id.
pub struct Devices {
    devices: rusb::DeviceList<GlobalContext>,
}

impl Devices {
    pub fn new() -> Result<Self, rusb::Error> {
        let devices = rusb::DeviceList::new()?;
        Ok(Self { devices })
    }

    pub fn iter(&self) -> DevicesIter<'_> {
        DevicesIter {
            iter: self.devices.iter(),
        }
    }
}

pub struct DevicesIter<'a> {
    iter: rusb::Devices<'a, GlobalContext>,
}

impl Iterator for DevicesIter<'_> {
    type Item = Result<Device, DeviceUnavailable>;

    fn next(&mut self) -> Option<Self::Item> {
        for device in self.iter.by_ref() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != FEL_VENDOR_ID || desc.product_id() != FEL_PRODUCT_ID {
                continue;
            }
            let handle = match device.open() {
                Ok(handle) => handle,
                Err(error) => return Some(Err(DeviceUnavailable { device, error })),
            };
            return Some(Device::from_usb_device(handle));
        }
        None
    }
}

/// libusb-backed [`crate::device::Transport`].
pub struct Transport {
    handle: DeviceHandle<GlobalContext>,
    ep_in: u8,
    ep_out: u8,
    interface: u8,
    detached_kernel_driver: bool,
}

impl Transport {
    pub fn handle(&self) -> &DeviceHandle<GlobalContext> {
        &self.handle
    }

    /// C1's `write`: envelope, chunked bulk-out transfer, 13-byte status.
    fn c1_write(
        &mut self,
        data: &[u8],
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> Result<(), Error<rusb::Error>> {
        let envelope = protocol::UsbEnvelope::new(UsbDirection::Write, data.len() as u32);
        self.handle
            .write_bulk(self.ep_out, &envelope.to_bytes(), BULK_TIMEOUT)
            .map_err(Error::Transport)?;

        let chunk = if progress.is_some() {
            PROGRESS_CHUNK
        } else {
            DEFAULT_CHUNK
        };
        for segment in data.chunks(chunk.max(1)) {
            let written = self
                .handle
                .write_bulk(self.ep_out, segment, BULK_TIMEOUT)
                .map_err(Error::Transport)?;
            if let Some(progress) = progress.as_deref_mut() {
                progress(written);
            }
        }

        let mut status = [0u8; protocol::USB_STATUS_BYTES];
        self.handle
            .read_bulk(self.ep_in, &mut status, BULK_TIMEOUT)
            .map_err(Error::Transport)?;
        protocol::parse_status(&status)?;
        Ok(())
    }

    /// C1's `read`: envelope, chunked bulk-in transfer, 13-byte status.
    fn c1_read(&mut self, data: &mut [u8]) -> Result<(), Error<rusb::Error>> {
        let envelope = protocol::UsbEnvelope::new(UsbDirection::Read, data.len() as u32);
        self.handle
            .write_bulk(self.ep_out, &envelope.to_bytes(), BULK_TIMEOUT)
            .map_err(Error::Transport)?;

        for segment in data.chunks_mut(DEFAULT_CHUNK.max(1)) {
            self.handle
                .read_bulk(self.ep_in, segment, BULK_TIMEOUT)
                .map_err(Error::Transport)?;
        }

        let mut status = [0u8; protocol::USB_STATUS_BYTES];
        self.handle
            .read_bulk(self.ep_in, &mut status, BULK_TIMEOUT)
            .map_err(Error::Transport)?;
        protocol::parse_status(&status)?;
        Ok(())
    }
}

impl crate::device::Transport for Transport {
    type TransportError = rusb::Error;

    fn handle_operation<O, T>(
        &mut self,
        mut operation: O,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<T, Self>
    where
        O: OperationSteps<T>,
    {
        loop {
            match operation.step() {
                UsbStep::WriteBulk {
                    data,
                    progress_eligible,
                } => {
                    let sink = if progress_eligible {
                        progress.as_deref_mut()
                    } else {
                        None
                    };
                    self.c1_write(data, sink)?;
                }
                UsbStep::ReadBulk { data } => {
                    self.c1_read(data)?;
                }
                UsbStep::Finished(r) => break r.map_err(Error::from),
            }
        }
    }
}

pub type Device = crate::device::Device<Transport>;

impl Device {
    fn new_libusb(
        handle: DeviceHandle<GlobalContext>,
        interface: u8,
        ep_in: u8,
        ep_out: u8,
    ) -> Result<Self, DeviceUnavailable> {
        let detached_kernel_driver = match handle.kernel_driver_active(interface) {
            Ok(true) => match handle.detach_kernel_driver(interface) {
                Ok(()) => true,
                Err(rusb::Error::NotSupported) => false,
                Err(error) => {
                    return Err(DeviceUnavailable {
                        device: handle.device(),
                        error,
                    })
                }
            },
            _ => false,
        };

        handle
            .claim_interface(interface)
            .map_err(|error| DeviceUnavailable {
                device: handle.device(),
                error,
            })?;

        Ok(Self::new(Transport {
            handle,
            ep_in,
            ep_out,
            interface,
            detached_kernel_driver,
        }))
    }

    /// Discover the first bulk IN/OUT endpoint pair and claim its interface.
    pub fn from_usb_device(handle: DeviceHandle<GlobalContext>) -> Result<Self, DeviceUnavailable> {
        let device = handle.device();
        let desc = device
            .device_descriptor()
            .map_err(|error| DeviceUnavailable {
                device: device.clone(),
                error,
            })?;
        for c in 0..desc.num_configurations() {
            let config = device
                .config_descriptor(c)
                .map_err(|error| DeviceUnavailable {
                    device: device.clone(),
                    error,
                })?;
            for interface in config.interfaces() {
                for setting in interface.descriptors() {
                    let output = setting.endpoint_descriptors().find(|e| {
                        e.direction() == rusb::Direction::Out
                            && e.transfer_type() == rusb::TransferType::Bulk
                    });
                    let input = setting.endpoint_descriptors().find(|e| {
                        e.direction() == rusb::Direction::In
                            && e.transfer_type() == rusb::TransferType::Bulk
                    });
                    if let (Some(input), Some(output)) = (input, output) {
                        return Self::new_libusb(
                            handle,
                            setting.setting_number(),
                            input.address(),
                            output.address(),
                        );
                    }
                }
            }
        }
        Err(DeviceUnavailable {
            device,
            error: rusb::Error::NotFound,
        })
    }

    pub fn bus_number(&self) -> u8 {
        self.transport().handle.device().bus_number()
    }

    pub fn address(&self) -> u8 {
        self.transport().handle.device().address()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
        if self.detached_kernel_driver {
            let _ = self.handle.attach_kernel_driver(self.interface);
        }
    }
}
