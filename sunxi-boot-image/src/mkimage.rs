use bytes::Buf;
use thiserror::Error;

pub const HEADER_SIZE: usize = 64;
const HEADER_NAME_OFFSET: usize = 32;
const HEADER_NAME_LEN: usize = 32;

pub const IH_MAGIC: u32 = 0x2705_1956;
pub const IH_ARCH_ARM: u8 = 2;
pub const IH_TYPE_FIRMWARE: u8 = 5;
pub const IH_TYPE_SCRIPT: u8 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MkimageError {
    #[error("input is only {0} bytes, need more than the {HEADER_SIZE}-byte mkimage header")]
    TooShort(usize),
    #[error("invalid image: mkimage magic not found")]
    InvalidMagic,
    #[error("invalid image: architecture {0:#04x} is not ARM ({IH_ARCH_ARM:#04x})")]
    ArchMismatch(u8),
    #[error("invalid image: unexpected type byte {0:#04x}")]
    UnexpectedType(u8),
    #[error(
        "invalid image: header declares {declared} bytes of data but {actual} bytes follow the header"
    )]
    SizeMismatch { declared: u32, actual: usize },
}

/// Image type declared in a parsed [`MkimageHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// U-Boot main firmware/bootloader image.
    Firmware,
    /// U-Boot boot script.
    Script,
}

/// A validated 64-byte mkimage header (big-endian fields), plus the declared
/// payload boundaries within the original buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkimageHeader {
    pub kind: ImageKind,
    pub data_size: u32,
    pub load_addr: u32,
    pub entry_point: u32,
    /// Payload CRC32 as declared by the header. Never checked against the
    /// actual payload bytes.
    pub data_crc: u32,
    pub name: String,
}

impl MkimageHeader {
    /// Parse and validate the header at the start of `buf`. `buf` must
    /// contain the full image: header plus payload.
    pub fn parse(buf: &[u8]) -> Result<MkimageHeader, MkimageError> {
        if buf.len() <= HEADER_SIZE {
            return Err(MkimageError::TooShort(buf.len()));
        }

        let magic = (&buf[0..4]).get_u32();
        if magic != IH_MAGIC {
            return Err(MkimageError::InvalidMagic);
        }

        let arch = buf[29];
        if arch != IH_ARCH_ARM {
            return Err(MkimageError::ArchMismatch(arch));
        }

        let type_byte = buf[30];
        let kind = match type_byte {
            IH_TYPE_FIRMWARE => ImageKind::Firmware,
            IH_TYPE_SCRIPT => ImageKind::Script,
            other => return Err(MkimageError::UnexpectedType(other)),
        };

        let data_size = (&buf[12..16]).get_u32();
        let load_addr = (&buf[16..20]).get_u32();
        let entry_point = (&buf[20..24]).get_u32();
        let data_crc = (&buf[24..28]).get_u32();

        let actual = buf.len() - HEADER_SIZE;
        if data_size as usize != actual {
            return Err(MkimageError::SizeMismatch {
                declared: data_size,
                actual,
            });
        }

        let name_bytes = &buf[HEADER_NAME_OFFSET..HEADER_NAME_OFFSET + HEADER_NAME_LEN];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        Ok(MkimageHeader {
            kind,
            data_size,
            load_addr,
            entry_point,
            data_crc,
            name,
        })
    }

    /// The payload bytes, i.e. everything after the 64-byte header.
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[HEADER_SIZE..]
    }
}

/// True if `buf` looks like a `uEnv.txt`-style environment import script:
/// more than 6 bytes, starting with `"#=uEnv"`.
pub fn is_uenv(buf: &[u8]) -> bool {
    buf.len() > 6 && &buf[0..6] == b"#=uEnv"
}

#[cfg(test)]
mod test {
    use super::*;

    fn build_image(kind_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
        buf[0..4].copy_from_slice(&IH_MAGIC.to_be_bytes());
        buf[12..16].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        buf[16..20].copy_from_slice(&0x4A00_0000u32.to_be_bytes());
        buf[20..24].copy_from_slice(&0x4A00_0000u32.to_be_bytes());
        buf[29] = IH_ARCH_ARM;
        buf[30] = kind_byte;
        buf[HEADER_SIZE..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn parses_firmware_image() {
        let payload = vec![0xAAu8; 4096];
        let buf = build_image(IH_TYPE_FIRMWARE, &payload);
        let header = MkimageHeader::parse(&buf).unwrap();
        assert_eq!(header.kind, ImageKind::Firmware);
        assert_eq!(header.data_size, 4096);
        assert_eq!(header.load_addr, 0x4A00_0000);
        assert_eq!(header.payload(&buf), payload.as_slice());
    }

    #[test]
    fn parses_script_image() {
        let buf = build_image(IH_TYPE_SCRIPT, &[0u8; 16]);
        let header = MkimageHeader::parse(&buf).unwrap();
        assert_eq!(header.kind, ImageKind::Script);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = build_image(IH_TYPE_FIRMWARE, &[0u8; 16]);
        buf[0] = 0;
        assert_eq!(MkimageHeader::parse(&buf), Err(MkimageError::InvalidMagic));
    }

    #[test]
    fn rejects_non_arm_arch() {
        let mut buf = build_image(IH_TYPE_FIRMWARE, &[0u8; 16]);
        buf[29] = 7;
        assert_eq!(MkimageHeader::parse(&buf), Err(MkimageError::ArchMismatch(7)));
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut buf = build_image(IH_TYPE_FIRMWARE, &[0u8; 16]);
        buf[12..16].copy_from_slice(&999u32.to_be_bytes());
        assert!(matches!(
            MkimageHeader::parse(&buf),
            Err(MkimageError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn uenv_detection() {
        assert!(is_uenv(b"#=uEnv\nfoo=bar\n"));
        assert!(!is_uenv(b"#=uEn"));
        assert!(!is_uenv(b"not uenv at all"));
    }
}
