//! U-Boot staging (C7): validates a trailing mkimage header and writes its
//! payload to the declared load address.

use sunxi_boot_image::mkimage::{ImageKind, MkimageHeader};

use crate::device::{Device, DeviceResult, Transport};
use crate::error::Error;

/// The `{entry, size}` pair recorded after a successful stage, consulted by
/// the overwrite guard (§3 "Loaded-U-Boot record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UbootRecord {
    pub entry: u32,
    pub size: u32,
}

/// Validate `buf` as an mkimage image, write its payload to `load_addr`,
/// and record `{uboot_entry, uboot_size}` on `device`.
pub fn stage<T>(
    device: &mut Device<T>,
    buf: &[u8],
    progress: Option<&mut dyn FnMut(usize)>,
) -> DeviceResult<UbootRecord, T>
where
    T: Transport,
{
    let header = MkimageHeader::parse(buf)?;
    if header.kind != ImageKind::Firmware {
        return Err(Error::Validation(
            "mkimage header is not a FIRMWARE image".to_string(),
        ));
    }
    let payload = header.payload(buf);
    device.write_unguarded(header.load_addr, payload, progress)?;
    let record = UbootRecord {
        entry: header.load_addr,
        size: header.data_size,
    };
    device.set_uboot_record(record);
    Ok(record)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{MockDevice, MockTransport};
    use sunxi_boot_image::mkimage::{IH_ARCH_ARM, IH_MAGIC, IH_TYPE_FIRMWARE};

    fn build_image(load_addr: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 64 + payload.len()];
        buf[0..4].copy_from_slice(&IH_MAGIC.to_be_bytes());
        buf[12..16].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        buf[16..20].copy_from_slice(&load_addr.to_be_bytes());
        buf[29] = IH_ARCH_ARM;
        buf[30] = IH_TYPE_FIRMWARE;
        buf[64..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn stage_writes_the_payload_and_records_the_region() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let payload = vec![0xAAu8; 128];
        let image = build_image(0x4A00_0000, &payload);

        let record = stage(&mut device, &image, None).unwrap();
        assert_eq!(record.entry, 0x4A00_0000);
        assert_eq!(record.size, 128);
        assert_eq!(device.uboot_record(), Some(record));
        assert_eq!(device.read(0x4A00_0000, 128).unwrap(), payload);
    }

    #[test]
    fn stage_rejects_a_truncated_image() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let mut image = build_image(0x4A00_0000, &[0u8; 32]);
        image.truncate(image.len() - 1);
        assert!(stage(&mut device, &image, None).is_err());
    }

    #[test]
    fn stage_rejects_a_script_image() {
        use sunxi_boot_image::mkimage::IH_TYPE_SCRIPT;
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let mut image = build_image(0x4300_0000, &[0u8; 16]);
        image[30] = IH_TYPE_SCRIPT;
        assert!(stage(&mut device, &image, None).is_err());
    }
}
