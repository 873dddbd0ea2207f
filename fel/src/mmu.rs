//! MMU save/restore (C5): read the BROM's 1:1 section-mapped translation
//! table, retune its memory attributes for DRAM/BROM, and write it back —
//! or synthesize one from scratch when the BROM never enabled the MMU.

use std::ops::Range;

use thiserror::Error;

use crate::device::{Device, DeviceResult, Transport};

/// SCTLR bits this module's sanity check ignores: M(0), Z(11), I(12), V(13).
const SCTLR_IGNORE_MASK: u32 = (1 << 0) | (1 << 11) | (1 << 12) | (1 << 13);
const SCTLR_EXPECTED: u32 = 0x00C5_0038;
const DACR_EXPECTED: u32 = 0x5555_5555;

const TABLE_ENTRIES: usize = 4096;
const TABLE_BYTES: usize = TABLE_ENTRIES * 4;

/// Index range (address >> 20) of the DRAM window whose attributes are
/// retuned before the SPL runs (§4.5).
const DRAM_TT_INDEX_RANGE: Range<usize> = 0x400..0x1400;
/// Index of the BROM's own 1:1 mapping.
const BROM_TT_INDEX: usize = 0xFFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MmuError {
    #[error("SCTLR {actual:#010x} does not match the expected boot-rom configuration")]
    UnexpectedSctlr { actual: u32 },
    #[error("DACR {actual:#010x} does not match the expected boot-rom configuration")]
    UnexpectedDacr { actual: u32 },
    #[error("TTBCR {actual:#010x} is non-zero; short-descriptor split translation is not supported")]
    UnexpectedTtbcr { actual: u32 },
    #[error("TTBR0 {actual:#010x} is not 16 KiB aligned")]
    UnalignedTtbr0 { actual: u32 },
    #[error("translation table entry {index:#05x} ({value:#010x}) is not a direct 1:1 section mapping")]
    BadDescriptor { index: usize, value: u32 },
}

/// A 4096-entry ARM short-descriptor section translation table.
#[derive(Debug, Clone)]
pub struct TranslationTable {
    entries: [u32; TABLE_ENTRIES],
}

impl TranslationTable {
    fn from_bytes(buf: &[u8]) -> Self {
        let mut entries = [0u32; TABLE_ENTRIES];
        for (i, word) in buf.chunks_exact(4).enumerate() {
            entries[i] = u32::from_le_bytes(word.try_into().unwrap());
        }
        TranslationTable { entries }
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// `true` if entry `i` is a direct 1:1 section descriptor: bit 1 set,
    /// bit 18 clear, bits 20..31 equal `i` (§3 invariant).
    fn is_direct_section(&self, i: usize) -> bool {
        let v = self.entries[i];
        (v >> 1) & 1 == 1 && (v >> 18) & 1 == 0 && (v >> 20) as usize == i
    }

    fn validate_direct(&self) -> Result<(), MmuError> {
        for i in 0..TABLE_ENTRIES {
            if !self.is_direct_section(i) {
                return Err(MmuError::BadDescriptor {
                    index: i,
                    value: self.entries[i],
                });
            }
        }
        Ok(())
    }

    /// Generate `tt[i] = 0x00000DE2 | (i<<20)`, with entries 0 and 0xFFF
    /// additionally OR'd with `0x1000` (§4.5).
    fn synthesize() -> Self {
        let mut entries = [0u32; TABLE_ENTRIES];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = 0x0000_0DE2 | ((i as u32) << 20);
        }
        entries[0] |= 0x1000;
        entries[BROM_TT_INDEX] |= 0x1000;
        TranslationTable { entries }
    }

    /// Retune DRAM to Normal/uncached-write-combine and the BROM page to
    /// Normal/write-back, preserving the 1:1 mapping (§4.5 steps 1-2).
    fn retune_attributes(&mut self) {
        const TEX_C_B_MASK: u32 = (0b111 << 12) | (1 << 3) | (1 << 2);
        for i in DRAM_TT_INDEX_RANGE {
            self.entries[i] = (self.entries[i] & !TEX_C_B_MASK) | (0b001 << 12);
        }
        self.entries[BROM_TT_INDEX] =
            (self.entries[BROM_TT_INDEX] & !TEX_C_B_MASK) | (0b001 << 12) | (1 << 3) | (1 << 2);
    }
}

/// §4.5 `backup_and_disable`: `Ok(None)` if the BROM never enabled the MMU.
/// On success, also returns the `TTBR0` value the table was read from, so
/// [`restore_and_enable`] can write it back to the same place.
pub fn backup_and_disable<T>(
    device: &mut Device<T>,
) -> DeviceResult<Option<(u32, TranslationTable)>, T>
where
    T: Transport,
{
    let sctlr = device.cp_read(15, 0, 1, 0, 0)?; // SCTLR: c1,c0,0
    if sctlr & 1 == 0 {
        return Ok(None);
    }

    if sctlr & !SCTLR_IGNORE_MASK != SCTLR_EXPECTED {
        return Err(MmuError::UnexpectedSctlr { actual: sctlr }.into());
    }
    let dacr = device.cp_read(15, 0, 3, 0, 0)?; // DACR: c3,c0,0
    if dacr != DACR_EXPECTED {
        return Err(MmuError::UnexpectedDacr { actual: dacr }.into());
    }
    let ttbcr = device.cp_read(15, 0, 2, 0, 2)?; // TTBCR: c2,c0,2
    if ttbcr != 0 {
        return Err(MmuError::UnexpectedTtbcr { actual: ttbcr }.into());
    }
    let ttbr0 = device.cp_read(15, 0, 2, 0, 0)?; // TTBR0: c2,c0,0
    if ttbr0 & 0x3FFF != 0 {
        return Err(MmuError::UnalignedTtbr0 { actual: ttbr0 }.into());
    }

    let raw = device.read(ttbr0, TABLE_BYTES)?;
    let table = TranslationTable::from_bytes(&raw);
    table.validate_direct()?;

    device.mmu_disable()?;
    Ok(Some((ttbr0, table)))
}

/// §4.5 `restore_and_enable`: retunes and writes `table` back to `ttbr0`,
/// then re-enables the MMU.
pub fn restore_and_enable<T>(
    device: &mut Device<T>,
    ttbr0: u32,
    mut table: TranslationTable,
) -> DeviceResult<(), T>
where
    T: Transport,
{
    table.retune_attributes();
    device.write_unguarded(ttbr0, &table.to_bytes(), None)?;
    device.mmu_enable()
}

/// Write a synthetic 1:1 table plus DACR/TTBCR/TTBR0 at `mmu_tt_addr`, used
/// when the BROM never enabled the MMU but the SoC provides a scratch
/// location for one (§4.5).
pub fn synthesize_and_configure<T>(device: &mut Device<T>, mmu_tt_addr: u32) -> DeviceResult<(), T>
where
    T: Transport,
{
    let table = TranslationTable::synthesize();
    device.write_unguarded(mmu_tt_addr, &table.to_bytes(), None)?;
    device.cp_write(15, 0, 3, 0, 0, DACR_EXPECTED)?; // DACR
    device.cp_write(15, 0, 2, 0, 2, 0)?; // TTBCR
    device.cp_write(15, 0, 2, 0, 0, mmu_tt_addr) // TTBR0
}
