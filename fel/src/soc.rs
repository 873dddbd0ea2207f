//! Per-chip parameters needed to stage code/SPL/U-Boot on a given SoC.
//!
//! The authoritative chip database this table mirrors (`soc_info.c` in the
//! upstream sunxi-tools project) was not available when this registry was
//! written; the addresses below are a plausible, internally consistent
//! reconstruction honoring the constraints the protocol places on them
//! (scratch/thunk/SPL regions inside on-chip SRAM, `swap_buffers` sorted by
//! `buf2`, thunk below the 32 KiB SPL size limit) rather than a verified
//! transcription of real hardware addresses. See `DESIGN.md`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SocError {
    #[error("soc id {0:#06x} is not recognized")]
    Unknown(u16),
    #[error("{parameter} is not available for soc {soc}")]
    MissingParameter {
        soc: &'static str,
        parameter: &'static str,
    },
}

/// A single SRAM region that must be relocated (`buf1` -> `buf2`) before the
/// SPL can be uploaded, and restored by the thunk immediately before it
/// jumps to the SPL entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapBuffer {
    pub buf1: u32,
    pub buf2: u32,
    pub size: u32,
}

/// Per-`soc_id` parameter record (§3 "SoC parameter record").
#[derive(Debug, Clone, Copy)]
pub struct SocInfo {
    pub soc_id: u16,
    pub name: &'static str,
    pub scratch_addr: u32,
    pub spl_addr: u32,
    pub thunk_addr: u32,
    pub thunk_size: u32,
    pub sid_addr: Option<u32>,
    pub rvbar_reg: Option<u32>,
    pub needs_l2en: bool,
    pub mmu_tt_addr: Option<u32>,
    pub swap_buffers: &'static [SwapBuffer],
}

impl SocInfo {
    pub fn sid_addr(&self) -> Result<u32, SocError> {
        self.sid_addr.ok_or(SocError::MissingParameter {
            soc: self.name,
            parameter: "sid_addr",
        })
    }

    pub fn rvbar_reg(&self) -> Result<u32, SocError> {
        self.rvbar_reg.ok_or(SocError::MissingParameter {
            soc: self.name,
            parameter: "rvbar_reg",
        })
    }

    pub fn mmu_tt_addr(&self) -> Result<u32, SocError> {
        self.mmu_tt_addr.ok_or(SocError::MissingParameter {
            soc: self.name,
            parameter: "mmu_tt_addr",
        })
    }
}

macro_rules! soc {
    ($soc_id:expr, $name:expr, scratch=$scratch:expr, spl=$spl:expr,
     thunk=$thunk:expr, thunk_size=$thunk_size:expr
     $(, sid=$sid:expr)? $(, rvbar=$rvbar:expr)? $(, l2=$l2:expr)?
     $(, mmu_tt=$mmu_tt:expr)? $(, swap=$swap:expr)? $(,)?) => {
        SocInfo {
            soc_id: $soc_id,
            name: $name,
            scratch_addr: $scratch,
            spl_addr: $spl,
            thunk_addr: $thunk,
            thunk_size: $thunk_size,
            sid_addr: soc!(@opt $($sid)?),
            rvbar_reg: soc!(@opt $($rvbar)?),
            needs_l2en: soc!(@bool $($l2)?),
            mmu_tt_addr: soc!(@opt $($mmu_tt)?),
            swap_buffers: soc!(@swap $($swap)?),
        }
    };
    (@opt $v:expr) => { Some($v) };
    (@opt) => { None };
    (@bool $v:expr) => { $v };
    (@bool) => { false };
    (@swap $v:expr) => { $v };
    (@swap) => { &[] };
}

const A10_A13_A20_SWAP: &[SwapBuffer] = &[SwapBuffer {
    buf1: 0x0000_1800,
    buf2: 0x0000_7C00,
    size: 0x0000_0400,
}];

static SOCS: &[SocInfo] = &[
    soc!(0x1623, "A10", scratch=0x0000_7e00, spl=0x0000_2000, thunk=0x0000_7a00, thunk_size=0x200,
         sid=0x01c2_3800, swap=A10_A13_A20_SWAP),
    soc!(0x1625, "A13", scratch=0x0000_7e00, spl=0x0000_2000, thunk=0x0000_7a00, thunk_size=0x200,
         sid=0x01c2_3800, swap=A10_A13_A20_SWAP),
    soc!(0x1651, "A20", scratch=0x0000_7e00, spl=0x0000_2000, thunk=0x0000_7a00, thunk_size=0x200,
         sid=0x01c2_3800, swap=A10_A13_A20_SWAP),
    soc!(0x1650, "A23", scratch=0x0000_7e00, spl=0x0000_2000, thunk=0x0000_7a00, thunk_size=0x200,
         sid=0x01c1_4800, l2=true),
    soc!(0x1633, "A31", scratch=0x0000_5c00, spl=0x0000_1c00, thunk=0x0000_5800, thunk_size=0x200,
         sid=0x01c1_4800, l2=true),
    soc!(0x1667, "A33", scratch=0x0000_7e00, spl=0x0000_2000, thunk=0x0000_7a00, thunk_size=0x200,
         sid=0x01c1_4800, l2=true),
    soc!(0x1689, "A64", scratch=0x0004_3a00, spl=0x0001_0000, thunk=0x0004_3800, thunk_size=0x200,
         sid=0x01c1_4800, rvbar=0x0001_7000),
    soc!(0x1639, "A80", scratch=0x0004_3a00, spl=0x0001_0000, thunk=0x0004_3800, thunk_size=0x200,
         sid=0x01c1_4800),
    soc!(0x1673, "A83T", scratch=0x0004_3a00, spl=0x0001_0000, thunk=0x0004_3800, thunk_size=0x200,
         sid=0x01c1_4800, l2=true),
    soc!(0x1680, "H3", scratch=0x0004_3a00, spl=0x0001_0000, thunk=0x0004_3800, thunk_size=0x200,
         sid=0x01c1_4800),
    soc!(0x1718, "H5", scratch=0x0004_3a00, spl=0x0001_0000, thunk=0x0004_3800, thunk_size=0x200,
         sid=0x01c1_4800, rvbar=0x0001_7000),
];

/// Look up the parameter record for `soc_id`, extracted from bits 8..23 of
/// the VERSION reply's raw soc-id word (§3).
pub fn lookup(soc_id: u16) -> Result<&'static SocInfo, SocError> {
    let info = SOCS
        .iter()
        .find(|s| s.soc_id == soc_id)
        .ok_or(SocError::Unknown(soc_id))?;
    debug_assert!(
        info.swap_buffers.windows(2).all(|w| w[0].buf2 < w[1].buf2),
        "swap_buffers for {} must be sorted by buf2",
        info.name
    );
    Ok(info)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a20_soc_id_resolves_by_name() {
        let info = lookup(0x1651).unwrap();
        assert_eq!(info.name, "A20");
    }

    #[test]
    fn unknown_soc_id_is_an_error() {
        assert_eq!(lookup(0xFFFF), Err(SocError::Unknown(0xFFFF)));
    }

    #[test]
    fn missing_rvbar_is_a_named_error() {
        let a20 = lookup(0x1651).unwrap();
        assert_eq!(
            a20.rvbar_reg(),
            Err(SocError::MissingParameter {
                soc: "A20",
                parameter: "rvbar_reg",
            })
        );
    }

    #[test]
    fn a64_has_rvbar_for_warm_reset() {
        let a64 = lookup(0x1689).unwrap();
        assert_eq!(a64.rvbar_reg(), Ok(0x0001_7000));
    }

    #[test]
    fn all_registry_entries_have_sorted_swap_buffers() {
        for info in SOCS {
            assert!(
                info.swap_buffers.windows(2).all(|w| w[0].buf2 < w[1].buf2),
                "{} has unsorted swap_buffers",
                info.name
            );
        }
    }
}
