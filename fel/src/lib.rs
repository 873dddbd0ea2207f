#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc = include_str!("../README.md")]

/// libusb transport implementation
#[cfg(feature = "libusb")]
pub mod libusb;

/// sans-io protocol implementations
///
/// This module contains all protocol logic; each operation implements the
/// [operation::OperationSteps] trait which gives a transport a series of
/// [operation::UsbStep] to execute to complete an operation.
pub mod operation;
/// low-level USB envelope and FEL request record framing
pub mod protocol;

/// the claimed-device session object and the operations it exposes
pub mod device;
/// the crate-wide error type
pub mod error;
/// the overwrite guard (C8)
pub mod guard;
/// code-injection primitives (C4): readl/writel, coprocessor access, MMU
/// toggling, RMR
pub mod inject;
/// MMU translation-table save/restore (C5)
pub mod mmu;
/// per-SoC parameter registry (C3)
pub mod soc;
/// SPL staging engine (C6)
pub mod spl;
/// U-Boot staging (C7)
pub mod uboot;

#[cfg(test)]
pub(crate) mod testutil;

pub use device::{Device, DeviceResult, Transport};
pub use error::Error;
