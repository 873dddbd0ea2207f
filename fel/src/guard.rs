//! Overwrite guard (C8): refuses host WRITEs that would clobber a staged
//! U-Boot image.

use crate::error::Error;
use crate::uboot::UbootRecord;

/// Half-open interval overlap test. `uboot` is `None` until a U-Boot image
/// has actually been staged; internal WRITEs (scratch, thunk, SPL itself)
/// go through [`crate::device::Device::write_unguarded`] and never reach
/// this check (§4.8).
pub fn check<TE>(uboot: Option<UbootRecord>, offset: u32, len: u32) -> Result<(), Error<TE>> {
    let Some(record) = uboot else {
        return Ok(());
    };
    let uboot_start = record.entry;
    let uboot_end = record.entry + record.size;
    let end = offset + len;
    if offset < uboot_end && end > uboot_start {
        return Err(Error::Overwrite {
            offset,
            end,
            uboot_start,
            uboot_end,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const RECORD: UbootRecord = UbootRecord {
        entry: 0x4000_0000,
        size: 0x0010_0000,
    };

    #[test]
    fn no_record_never_rejects() {
        assert!(check::<()>(None, 0x3FFF_F000, 0x2000).is_ok());
    }

    #[test]
    fn overlapping_write_is_rejected() {
        assert!(check::<()>(Some(RECORD), 0x3FFF_F000, 0x2000).is_err());
    }

    #[test]
    fn write_ending_exactly_at_entry_is_accepted() {
        assert!(check::<()>(Some(RECORD), 0x3FFF_F000, 0x1000).is_ok());
    }

    #[test]
    fn write_starting_exactly_at_end_is_accepted() {
        assert!(check::<()>(Some(RECORD), 0x4010_0000, 0x1000).is_ok());
    }
}
