use bytes::Buf;
use thiserror::Error;

/// Magic tag at the start of an SPL image: `"eGON.BT0"`.
pub const EGON_MAGIC: &[u8; 8] = b"eGON.BT0";

/// Marker the SPL writes back at `spl_addr + 4` once it has handed control
/// back to FEL.
pub const EGON_FEL_MAGIC: &[u8; 8] = b"eGON.FEL";

const CHECKSUM_SEED: u32 = 0x5F0A6C39;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EgonError {
    #[error("input is only {0} bytes, need at least 32 for an eGON header")]
    TooShort(usize),
    #[error("eGON header is not found")]
    BadMagic,
    #[error("bad length in the eGON header: spl_len={spl_len} is not a multiple of 4 or exceeds the {input_len}-byte input")]
    BadLength { spl_len: u32, input_len: usize },
    #[error("checksum check failed: stored checksum does not match the image contents")]
    BadChecksum,
}

/// A parsed, checksum-verified eGON SPL header.
///
/// `spl_len` is the number of bytes (a multiple of 4, at most the input
/// length) that make up the SPL image proper; anything beyond it in the
/// source buffer belongs to a trailing U-Boot image, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EgonHeader {
    pub checksum: u32,
    pub spl_len: u32,
}

impl EgonHeader {
    /// Parse and checksum-validate an eGON header from the start of `buf`.
    ///
    /// `buf` must contain the whole candidate SPL image: the checksum is
    /// computed over `spl_len` bytes of `buf`, not just the header.
    pub fn parse(buf: &[u8]) -> Result<EgonHeader, EgonError> {
        if buf.len() < 32 {
            return Err(EgonError::TooShort(buf.len()));
        }
        if &buf[4..12] != EGON_MAGIC {
            return Err(EgonError::BadMagic);
        }

        let checksum = (&buf[12..16]).get_u32_le();
        let spl_len = (&buf[16..20]).get_u32_le();

        if spl_len % 4 != 0 || spl_len as usize > buf.len() {
            return Err(EgonError::BadLength {
                spl_len,
                input_len: buf.len(),
            });
        }

        // The sum runs over the literal bytes, including the checksum field
        // itself as stored on the wire (the header is not zeroed out first).
        let expected_sum = checksum.wrapping_mul(2).wrapping_sub(CHECKSUM_SEED);
        let mut words = &buf[0..spl_len as usize];
        let mut sum: u32 = 0;
        while words.has_remaining() {
            sum = sum.wrapping_add(words.get_u32_le());
        }
        if sum != expected_sum {
            return Err(EgonError::BadChecksum);
        }

        Ok(EgonHeader { checksum, spl_len })
    }
}

/// Compute the checksum word that makes `buf[0..spl_len]` a valid eGON
/// image, given the checksum field (bytes 12..16) currently reads zero.
/// Used by tests (and by SPL image builders) to fill in a real header.
pub fn checksum_for(buf: &[u8], spl_len: usize) -> u32 {
    let mut rest = &buf[0..spl_len];
    let mut sum: u32 = 0;
    while rest.has_remaining() {
        sum = sum.wrapping_add(rest.get_u32_le());
    }
    sum.wrapping_add(CHECKSUM_SEED)
}

#[cfg(test)]
mod test {
    use super::*;

    fn build_spl(len: usize) -> Vec<u8> {
        assert_eq!(len % 4, 0);
        let mut buf = vec![0u8; len];
        buf[4..12].copy_from_slice(EGON_MAGIC);
        // word index 4 (bytes 16..20) is spl_len, written after checksum is known
        let spl_len = len as u32;
        buf[16..20].copy_from_slice(&spl_len.to_le_bytes());
        // fill the rest with a recognisable, non-zero pattern
        for (i, b) in buf.iter_mut().enumerate().skip(20) {
            *b = (i as u8).wrapping_mul(7);
        }
        let checksum = checksum_for(&buf, len);
        buf[12..16].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    #[test]
    fn accepts_valid_header() {
        let buf = build_spl(256);
        let header = EgonHeader::parse(&buf).unwrap();
        assert_eq!(header.spl_len, 256);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = build_spl(64);
        buf[4..12].copy_from_slice(b"XGON.BT0");
        assert_eq!(EgonHeader::parse(&buf), Err(EgonError::BadMagic));
    }

    #[test]
    fn rejects_checksum_off_by_one() {
        let mut buf = build_spl(64);
        let checksum = (&buf[12..16]).get_u32_le();
        buf[12..16].copy_from_slice(&(checksum + 1).to_le_bytes());
        assert_eq!(EgonHeader::parse(&buf), Err(EgonError::BadChecksum));
    }

    #[test]
    fn rejects_spl_len_not_multiple_of_four() {
        let mut buf = build_spl(64);
        buf[16..20].copy_from_slice(&65u32.to_le_bytes());
        assert!(matches!(
            EgonHeader::parse(&buf),
            Err(EgonError::BadLength { .. })
        ));
    }

    #[test]
    fn rejects_spl_len_beyond_input() {
        let mut buf = build_spl(64);
        buf[16..20].copy_from_slice(&128u32.to_le_bytes());
        assert!(matches!(
            EgonHeader::parse(&buf),
            Err(EgonError::BadLength { .. })
        ));
    }

    #[test]
    fn rejects_too_short_input() {
        assert_eq!(EgonHeader::parse(&[0u8; 31]), Err(EgonError::TooShort(31)));
    }
}
