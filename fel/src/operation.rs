//! sans-io state machine for a single FEL command round trip: send the
//! 16-byte request, optionally move a data payload, read the trailing
//! 8-byte status. A transport drives this by repeatedly calling
//! [`OperationSteps::step`] and performing whatever I/O each [`UsbStep`]
//! asks for.

use thiserror::Error;

use crate::protocol::{FelRequest, FelRequestType};

/// Errors a transport can surface while driving an operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsbOperationError {
    #[error("usb framing desynchronized: {0}")]
    Framing(#[from] crate::protocol::StatusParseError),
}

/// Step a transport must perform before calling [`OperationSteps::step`]
/// again.
#[derive(Debug, Eq, PartialEq)]
pub enum UsbStep<'a, T> {
    /// Send the 32-byte envelope followed by `data` as a single bulk-out
    /// transfer (chunked internally by the transport per C1).
    ///
    /// `progress_eligible` is true only for the actual command payload
    /// (the bytes a caller asked to write), never for the 16-byte request
    /// record or the 8-byte status read — those are too small to warrant
    /// progress reporting and the transport must not apply the 128 KiB
    /// progress-mode chunk cap to them.
    WriteBulk { data: &'a [u8], progress_eligible: bool },
    /// Read an envelope-wrapped reply into `data` (chunked internally by
    /// the transport per C1).
    ReadBulk { data: &'a mut [u8] },
    /// The operation is done; either the result or the error that aborted
    /// it.
    Finished(Result<T, UsbOperationError>),
}

/// Implemented by each concrete FEL operation (version/read/write/execute).
pub trait OperationSteps<T> {
    fn step(&mut self) -> UsbStep<T>;
}

#[derive(Debug, Eq, PartialEq)]
enum Stage {
    SendRequest,
    TransferData,
    ReadStatus,
    Done,
}

/// Drives one `VERSION`, `READ`, `WRITE` or `EXECUTE` exchange.
///
/// `request` bytes are always written first. Then, depending on
/// `request.request`, either a caller-supplied write buffer is sent or a
/// caller-supplied read buffer is filled. Finally an 8-byte status is read
/// and discarded — only the fact that it arrived matters (§4.2).
pub struct FelOperation<'a> {
    stage: Stage,
    request: [u8; crate::protocol::FEL_REQUEST_BYTES],
    kind: FelRequestType,
    write_data: Option<&'a [u8]>,
    read_data: Option<&'a mut [u8]>,
    status: [u8; 8],
}

impl<'a> FelOperation<'a> {
    pub fn version(out: &'a mut [u8]) -> Self {
        Self::new(FelRequest::version(), None, Some(out))
    }

    pub fn read(addr: u32, out: &'a mut [u8]) -> Self {
        Self::new(FelRequest::read(addr, out.len() as u32), None, Some(out))
    }

    pub fn write(addr: u32, data: &'a [u8]) -> Self {
        Self::new(FelRequest::write(addr, data.len() as u32), Some(data), None)
    }

    pub fn execute(addr: u32) -> Self {
        Self::new(FelRequest::execute(addr), None, None)
    }

    fn new(
        request: FelRequest,
        write_data: Option<&'a [u8]>,
        read_data: Option<&'a mut [u8]>,
    ) -> Self {
        FelOperation {
            stage: Stage::SendRequest,
            kind: request.request,
            request: request.to_bytes(),
            write_data,
            read_data,
            status: [0; 8],
        }
    }
}

impl<'a> OperationSteps<()> for FelOperation<'a> {
    fn step(&mut self) -> UsbStep<()> {
        match self.stage {
            Stage::SendRequest => {
                self.stage = Stage::TransferData;
                UsbStep::WriteBulk {
                    data: &self.request,
                    progress_eligible: false,
                }
            }
            Stage::TransferData => {
                self.stage = Stage::ReadStatus;
                match self.kind {
                    FelRequestType::Write => {
                        if let Some(data) = self.write_data.take() {
                            return UsbStep::WriteBulk {
                                data,
                                progress_eligible: true,
                            };
                        }
                        self.step()
                    }
                    FelRequestType::Read | FelRequestType::Version => {
                        if let Some(data) = self.read_data.take() {
                            return UsbStep::ReadBulk { data };
                        }
                        self.step()
                    }
                    FelRequestType::Execute => self.step(),
                }
            }
            Stage::ReadStatus => {
                self.stage = Stage::Done;
                UsbStep::ReadBulk {
                    data: &mut self.status,
                }
            }
            Stage::Done => UsbStep::Finished(Ok(())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_operation_steps_through_request_data_status() {
        let data = [0xAAu8; 4];
        let mut op = FelOperation::write(0x4000_0000, &data);

        match op.step() {
            UsbStep::WriteBulk { data, progress_eligible } => {
                assert_eq!(data.len(), crate::protocol::FEL_REQUEST_BYTES);
                assert!(!progress_eligible);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match op.step() {
            UsbStep::WriteBulk { data, progress_eligible } => {
                assert_eq!(data, &[0xAAu8; 4]);
                assert!(progress_eligible);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match op.step() {
            UsbStep::ReadBulk { data } => assert_eq!(data.len(), 8),
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(op.step(), UsbStep::Finished(Ok(())));
    }

    #[test]
    fn execute_operation_skips_data_stage() {
        let mut op = FelOperation::execute(0x4A00_0000);
        assert!(matches!(op.step(), UsbStep::WriteBulk { .. }));
        // no data stage: goes straight to reading the status
        match op.step() {
            UsbStep::ReadBulk { data } => assert_eq!(data.len(), 8),
            other => panic!("unexpected step: {other:?}"),
        }
        assert_eq!(op.step(), UsbStep::Finished(Ok(())));
    }

    #[test]
    fn read_operation_fills_caller_buffer() {
        let mut out = [0u8; 16];
        let mut op = FelOperation::read(0x4000_0000, &mut out);
        assert!(matches!(op.step(), UsbStep::WriteBulk { .. }));
        match op.step() {
            UsbStep::ReadBulk { data } => assert_eq!(data.len(), 16),
            other => panic!("unexpected step: {other:?}"),
        }
        assert!(matches!(op.step(), UsbStep::ReadBulk { .. }));
        assert_eq!(op.step(), UsbStep::Finished(Ok(())));
    }
}
