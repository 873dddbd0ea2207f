//! The crate-wide error type, generic over a transport's own error type.
//!
//! Each layer below this composes its own small error enum (see
//! [`crate::protocol`] and [`crate::soc`]) and those are folded in here via
//! `#[from]`, mirroring how the FEL command layer is itself built on top of
//! the USB framing layer.

use thiserror::Error;

use crate::protocol::{EnvelopeParseError, StatusParseError};
use crate::soc::SocError;
use sunxi_boot_image::{egon::EgonError, mkimage::MkimageError};

/// Anything that can abort a FEL session.
///
/// There is no recovery path for any of these (§7): every variant is
/// surfaced to the caller, who is expected to print it and exit nonzero.
#[derive(Debug, Error)]
pub enum Error<TE> {
    /// A bulk transfer's own status was non-zero, including timeouts.
    #[error("usb transport error: {0}")]
    Transport(TE),

    /// A device reply did not begin with the expected signature.
    #[error("{0}")]
    Framing(#[from] StatusParseError),

    #[error("{0}")]
    Envelope(#[from] EnvelopeParseError),

    /// Header/checksum/table validation failure.
    #[error("{0}")]
    Validation(String),

    /// A required SoC parameter is missing, or the SoC id is unrecognized.
    #[error("{0}")]
    Configuration(#[from] SocError),

    /// A user WRITE would overlap the loaded U-Boot region.
    #[error(
        "write at {offset:#010x}..{end:#010x} overlaps the loaded U-Boot image at {uboot_start:#010x}..{uboot_end:#010x}"
    )]
    Overwrite {
        offset: u32,
        end: u32,
        uboot_start: u32,
        uboot_end: u32,
    },

    /// The SPL did not report `"eGON.FEL"` after the thunk ran.
    #[error("SPL failed to start: unexpected completion code {0:02x?}")]
    Completion([u8; 8]),
}

impl<TE> From<EgonError> for Error<TE> {
    fn from(value: EgonError) -> Self {
        Error::Validation(value.to_string())
    }
}

impl<TE> From<MkimageError> for Error<TE> {
    fn from(value: MkimageError) -> Self {
        Error::Validation(value.to_string())
    }
}

impl<TE> From<crate::mmu::MmuError> for Error<TE> {
    fn from(value: crate::mmu::MmuError) -> Self {
        Error::Validation(value.to_string())
    }
}

impl<TE> From<crate::operation::UsbOperationError> for Error<TE> {
    fn from(value: crate::operation::UsbOperationError) -> Self {
        match value {
            crate::operation::UsbOperationError::Framing(e) => Error::Framing(e),
        }
    }
}
