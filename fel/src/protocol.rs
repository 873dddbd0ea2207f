//! Wire formats for the two protocol layers this crate speaks on top of a
//! bulk USB connection: the outer "AWUC/AWUS" envelope (C1) and the FEL
//! request record carried inside it (C2).

use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Signature written into every outgoing envelope.
pub const REQUEST_SIGNATURE: &[u8; 4] = b"AWUC";
/// Signature expected at the start of every device status reply.
pub const RESPONSE_SIGNATURE: &[u8; 4] = b"AWUS";

/// Size in bytes of a serialized [`UsbEnvelope`].
pub const USB_ENVELOPE_BYTES: usize = 32;
/// Size in bytes of the framing-level status the device returns after an
/// envelope + payload.
pub const USB_STATUS_BYTES: usize = 13;

const ENVELOPE_MARKER: u32 = 0x0C00_0000;

/// Direction encoded in the envelope's `request` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum UsbDirection {
    Read = 0x11,
    Write = 0x12,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeParseError {
    #[error("short read: got {0} bytes, need {USB_ENVELOPE_BYTES}")]
    ShortRead(usize),
    #[error("unrecognized direction {0:#06x}")]
    UnknownDirection(u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusParseError {
    #[error("short read: got {0} bytes, need {USB_STATUS_BYTES}")]
    ShortRead(usize),
    #[error("usb framing desynchronized: expected signature {RESPONSE_SIGNATURE:?}, got {0:?}")]
    BadSignature([u8; 4]),
}

/// The fixed 32-byte header that precedes every bulk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbEnvelope {
    pub direction: UsbDirection,
    pub length: u32,
}

impl UsbEnvelope {
    pub fn new(direction: UsbDirection, length: u32) -> Self {
        UsbEnvelope { direction, length }
    }

    pub fn to_bytes(self) -> [u8; USB_ENVELOPE_BYTES] {
        let mut buf = [0u8; USB_ENVELOPE_BYTES];
        let mut out = &mut buf[..];
        out.put_slice(REQUEST_SIGNATURE);
        out.put_bytes(0, 4); // pad signature field to 8 bytes
        out.put_u32_le(self.length);
        out.put_u32_le(ENVELOPE_MARKER);
        out.put_u16_le(self.direction.into());
        out.put_u32_le(self.length); // length2, always a duplicate of length
        out.put_bytes(0, 10);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<UsbEnvelope, EnvelopeParseError> {
        if buf.len() < USB_ENVELOPE_BYTES {
            return Err(EnvelopeParseError::ShortRead(buf.len()));
        }
        let mut buf = buf;
        buf.advance(8); // signature, not round-tripped
        let length = buf.get_u32_le();
        buf.advance(4); // marker
        let direction = buf.get_u16_le();
        let direction = UsbDirection::try_from(direction)
            .map_err(|_| EnvelopeParseError::UnknownDirection(direction))?;
        // length2 + padding intentionally unparsed; callers only care that
        // length == length2 held when the envelope was built.
        Ok(UsbEnvelope { direction, length })
    }
}

/// Validate a 13-byte status reply's signature. The remaining bytes are not
/// meaningful to this layer.
pub fn parse_status(buf: &[u8]) -> Result<(), StatusParseError> {
    if buf.len() < USB_STATUS_BYTES {
        return Err(StatusParseError::ShortRead(buf.len()));
    }
    let mut signature = [0u8; 4];
    signature.copy_from_slice(&buf[0..4]);
    if &signature != RESPONSE_SIGNATURE {
        return Err(StatusParseError::BadSignature(signature));
    }
    Ok(())
}

/// FEL command types, carried in the 16-byte request record below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum FelRequestType {
    Version = 0x001,
    Write = 0x101,
    Execute = 0x102,
    Read = 0x103,
}

/// Size in bytes of a serialized [`FelRequest`].
pub const FEL_REQUEST_BYTES: usize = 16;

/// The FEL command record: `{type, address, length, pad}`, all
/// little-endian, sent as the payload of a C1 write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelRequest {
    pub request: FelRequestType,
    pub address: u32,
    pub length: u32,
}

impl FelRequest {
    pub fn version() -> Self {
        FelRequest {
            request: FelRequestType::Version,
            address: 0,
            length: 0,
        }
    }

    pub fn read(address: u32, length: u32) -> Self {
        FelRequest {
            request: FelRequestType::Read,
            address,
            length,
        }
    }

    pub fn write(address: u32, length: u32) -> Self {
        FelRequest {
            request: FelRequestType::Write,
            address,
            length,
        }
    }

    pub fn execute(address: u32) -> Self {
        FelRequest {
            request: FelRequestType::Execute,
            address,
            length: 0,
        }
    }

    pub fn to_bytes(self) -> [u8; FEL_REQUEST_BYTES] {
        let mut buf = [0u8; FEL_REQUEST_BYTES];
        let mut out = &mut buf[..];
        out.put_u32_le(self.request.into());
        out.put_u32_le(self.address);
        out.put_u32_le(self.length);
        out.put_u32_le(0); // pad
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_roundtrip_preserves_direction_and_length() {
        let envelope = UsbEnvelope::new(UsbDirection::Write, 0x1234);
        let bytes = envelope.to_bytes();
        assert_eq!(bytes.len(), USB_ENVELOPE_BYTES);
        assert_eq!(&bytes[0..4], REQUEST_SIGNATURE);
        let parsed = UsbEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn envelope_length_and_length2_always_match() {
        let bytes = UsbEnvelope::new(UsbDirection::Read, 512).to_bytes();
        let length = (&bytes[8..12]).get_u32_le();
        let length2 = (&bytes[18..22]).get_u32_le();
        assert_eq!(length, 512);
        assert_eq!(length2, 512);
    }

    #[test]
    fn status_accepts_awus_signature() {
        let mut buf = [0u8; USB_STATUS_BYTES];
        buf[0..4].copy_from_slice(RESPONSE_SIGNATURE);
        assert!(parse_status(&buf).is_ok());
    }

    #[test]
    fn status_rejects_bad_signature() {
        let buf = [0u8; USB_STATUS_BYTES];
        assert!(matches!(
            parse_status(&buf),
            Err(StatusParseError::BadSignature(_))
        ));
    }

    #[test]
    fn fel_request_roundtrips_fields() {
        let request = FelRequest::read(0x4000_0000, 64);
        let bytes = request.to_bytes();
        assert_eq!(bytes.len(), FEL_REQUEST_BYTES);
        let mut b = &bytes[..];
        assert_eq!(b.get_u32_le(), FelRequestType::Read.into());
        assert_eq!(b.get_u32_le(), 0x4000_0000);
        assert_eq!(b.get_u32_le(), 64);
    }
}
