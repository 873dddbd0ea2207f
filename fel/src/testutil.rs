//! In-memory mock [`crate::device::Transport`] for exercising the protocol
//! and staging layers without real hardware (§10.6). Only built under
//! `#[cfg(test)]`.

use std::collections::HashMap;

use bytes::Buf;
use thiserror::Error;

use crate::device::{DeviceResult, Error, Transport};
use crate::operation::{OperationSteps, UsbStep};
use crate::protocol::FelRequestType;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("mock transport error")]
pub struct MockError;

/// A flat, sparse address space standing in for device memory, plus a
/// canned VERSION reply. EXECUTE is a no-op: this mock cannot run the
/// injected ARM code, so any register/stack value a real BROM would
/// compute by executing code comes back as whatever was last written to
/// that scratch location (usually zero).
pub struct MockTransport {
    pub memory: HashMap<u32, u8>,
    pub version_reply: [u8; 28],
}

impl MockTransport {
    pub fn new(soc_id: u16) -> Self {
        let mut version_reply = [0u8; 28];
        version_reply[0..8].copy_from_slice(b"AWUSBFEX");
        // soc id sits at bits 8..23 of the little-endian word at offset 8.
        let soc_word = (soc_id as u32) << 8;
        version_reply[8..12].copy_from_slice(&soc_word.to_le_bytes());
        MockTransport {
            memory: HashMap::new(),
            version_reply,
        }
    }

    pub fn read_mem(&self, addr: u32, out: &mut [u8]) {
        for (i, b) in out.iter_mut().enumerate() {
            *b = *self.memory.get(&(addr + i as u32)).unwrap_or(&0);
        }
    }

    pub fn write_mem(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.memory.insert(addr + i as u32, b);
        }
    }
}

impl Transport for MockTransport {
    type TransportError = MockError;

    fn handle_operation<O, T>(
        &mut self,
        mut operation: O,
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<T, Self>
    where
        O: OperationSteps<T>,
    {
        let mut kind = None;
        let mut addr = 0u32;
        // Whether this operation's single data-transfer step (as opposed to
        // the request or the trailing 8-byte status) has been handled yet.
        let mut data_consumed = false;

        loop {
            match operation.step() {
                UsbStep::WriteBulk { data, progress_eligible } => {
                    if kind.is_none() {
                        let mut b = data;
                        let request: u32 = b.get_u32_le();
                        kind = Some(FelRequestType::try_from(request).expect("valid request type"));
                        addr = b.get_u32_le();
                    } else {
                        self.write_mem(addr, data);
                        data_consumed = true;
                        if progress_eligible {
                            if let Some(p) = progress.as_deref_mut() {
                                p(data.len());
                            }
                        }
                    }
                }
                UsbStep::ReadBulk { data } => match kind {
                    Some(FelRequestType::Version) if !data_consumed => {
                        data.copy_from_slice(&self.version_reply);
                        data_consumed = true;
                    }
                    Some(FelRequestType::Read) if !data_consumed => {
                        self.read_mem(addr, data);
                        data_consumed = true;
                    }
                    _ => {} // the trailing 8-byte FEL status: contents are discarded
                },
                UsbStep::Finished(r) => break r.map_err(Error::from),
            }
        }
    }
}

pub type MockDevice = crate::device::Device<MockTransport>;
