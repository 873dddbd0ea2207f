//! The session object: a claimed transport plus the state a FEL session
//! accumulates (cached SoC parameters, the loaded-U-Boot record) and the
//! operations exposed to callers (§6).

use crate::inject::{self, CP_READ_RESULT_OFFSET, LCODE_DATA_OFFSET_WORDS, LCODE_MAX_WORDS};
use crate::operation::{FelOperation, OperationSteps};
use crate::soc::{SocError, SocInfo};
use crate::uboot::UbootRecord;

pub use crate::error::Error;

/// Implemented by each concrete transport (today, only [`crate::libusb`]).
///
/// Drives an [`OperationSteps`] state machine to completion, performing
/// whatever bulk I/O each [`crate::operation::UsbStep`] asks for.
pub trait Transport {
    type TransportError: std::fmt::Debug + std::fmt::Display + 'static;

    fn handle_operation<O, T>(
        &mut self,
        operation: O,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<T, Self>
    where
        O: OperationSteps<T>,
        Self: Sized;
}

/// Result type returned by most [`Device`] methods.
pub type DeviceResult<T, Trans> = Result<T, Error<<Trans as Transport>::TransportError>>;

/// Size in bytes of a VERSION reply (§3).
pub const VERSION_RESPONSE_BYTES: usize = 28;

/// Parsed VERSION reply.
#[derive(Debug, Clone, Copy)]
pub struct VersionRecord {
    pub signature: [u8; 8],
    pub soc_id: u16,
    pub protocol: u32,
    pub scratchpad: u32,
    pub reserved: [u32; 2],
}

impl VersionRecord {
    pub fn parse(buf: &[u8; VERSION_RESPONSE_BYTES]) -> Self {
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&buf[0..8]);
        let soc_word = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let soc_id = ((soc_word >> 8) & 0xFFFF) as u16;
        let protocol = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let scratchpad = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let reserved = [
            u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        ];
        VersionRecord {
            signature,
            soc_id,
            protocol,
            scratchpad,
            reserved,
        }
    }
}

/// Outcome of [`Device::rmr_request`]: the SoC may not expose an RVBAR
/// register at all, in which case no code is injected (§8 scenario 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmrOutcome {
    Requested,
    Unsupported,
}

/// A claimed device session: the transport plus everything accumulated
/// over its lifetime (§3 "Device session", §9 "fold into the session
/// object").
pub struct Device<T> {
    transport: T,
    soc: Option<&'static SocInfo>,
    uboot: Option<UbootRecord>,
}

impl<T> Device<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            soc: None,
            uboot: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The region a previous U-Boot stage recorded, if any (§8 overwrite
    /// guard input).
    pub fn uboot_record(&self) -> Option<UbootRecord> {
        self.uboot
    }

    /// VERSION (§4.2).
    pub fn version(&mut self) -> DeviceResult<VersionRecord, T> {
        let mut buf = [0u8; VERSION_RESPONSE_BYTES];
        self.transport
            .handle_operation(FelOperation::version(&mut buf), None)?;
        Ok(VersionRecord::parse(&buf))
    }

    /// Cached SoC parameter lookup (§4.3); issues a VERSION on first call.
    pub fn soc_info(&mut self) -> DeviceResult<&'static SocInfo, T> {
        if self.soc.is_none() {
            let version = self.version()?;
            let info = crate::soc::lookup(version.soc_id)?;
            self.soc = Some(info);
        }
        Ok(self.soc.unwrap())
    }

    /// READ (§4.2).
    pub fn read(&mut self, addr: u32, len: usize) -> DeviceResult<Vec<u8>, T> {
        let mut buf = vec![0u8; len];
        self.transport
            .handle_operation(FelOperation::read(addr, &mut buf), None)?;
        Ok(buf)
    }

    /// WRITE (§4.2), guarded against overlapping a loaded U-Boot image
    /// (§4.8).
    pub fn write(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<(), T> {
        crate::guard::check::<T::TransportError>(self.uboot, addr, data.len() as u32)?;
        self.write_unguarded(addr, data, progress)
    }

    /// WRITE without the overwrite guard, for internal staging use (scratch
    /// uploads, the SPL itself, the thunk) which all run before any U-Boot
    /// region is recorded (§4.8).
    pub(crate) fn write_unguarded(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<(), T> {
        self.transport
            .handle_operation(FelOperation::write(addr, data), progress)
    }

    /// EXECUTE (§4.2); returns once the injected code branches back to the
    /// link register and the trailing status arrives.
    pub fn execute(&mut self, addr: u32) -> DeviceResult<(), T> {
        self.transport
            .handle_operation(FelOperation::execute(addr), None)
    }

    /// Record the result of a successful U-Boot stage; used by
    /// [`crate::uboot::stage`].
    pub(crate) fn set_uboot_record(&mut self, record: UbootRecord) {
        self.uboot = Some(record);
    }

    // -- code injection (C4) --------------------------------------------

    pub(crate) fn inject_and_execute(&mut self, code: &[u32]) -> DeviceResult<(), T> {
        let scratch = self.soc_info()?.scratch_addr;
        let bytes = inject::words_to_bytes(code);
        self.write_unguarded(scratch, &bytes, None)?;
        self.execute(scratch)
    }

    fn inject_and_read_result(
        &mut self,
        code: &[u32],
        result_offset: u32,
        result_len: usize,
    ) -> DeviceResult<Vec<u8>, T> {
        let scratch = self.soc_info()?.scratch_addr;
        self.inject_and_execute(code)?;
        self.read(scratch + result_offset, result_len)
    }

    pub(crate) fn cp_read(
        &mut self,
        coproc: u8,
        opc1: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
    ) -> DeviceResult<u32, T> {
        let code = inject::cp_read_code(coproc, opc1, crn, crm, opc2);
        let bytes = self.inject_and_read_result(&code, CP_READ_RESULT_OFFSET, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub(crate) fn cp_write(
        &mut self,
        coproc: u8,
        opc1: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
        value: u32,
    ) -> DeviceResult<(), T> {
        let code = inject::cp_write_code(coproc, opc1, crn, crm, opc2, value);
        self.inject_and_execute(&code)
    }

    /// Switches to IRQ mode and back to capture `(sp, sp_irq)` for the SPL
    /// thunk (§4.4 "Stack capture").
    pub(crate) fn capture_stacks(&mut self) -> DeviceResult<(u32, u32), T> {
        let scratch = self.soc_info()?.scratch_addr;
        let result_addr = scratch + inject::STACK_CAPTURE_RESULT_OFFSET;
        self.inject_and_execute(&inject::stack_capture_code())?;
        let bytes = self.read(result_addr, 8)?;
        let sp_irq = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let sp = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok((sp, sp_irq))
    }

    pub(crate) fn l2_enable(&mut self) -> DeviceResult<(), T> {
        self.inject_and_execute(&inject::l2_enable_code())
    }

    pub(crate) fn mmu_disable(&mut self) -> DeviceResult<(), T> {
        self.inject_and_execute(&inject::mmu_disable_code())
    }

    pub(crate) fn mmu_enable(&mut self) -> DeviceResult<(), T> {
        self.inject_and_execute(&inject::mmu_enable_code())
    }

    /// `readl_n` (§4.4), auto-tiling across the 244-word scratch window.
    pub fn readl_n(&mut self, addr: u32, n: usize) -> DeviceResult<Vec<u32>, T> {
        let mut out = Vec::with_capacity(n);
        let mut remaining = n;
        let mut cur_addr = addr;
        while remaining > 0 {
            let take = remaining.min(LCODE_MAX_WORDS);
            let code = inject::readl_n_code(cur_addr, take as u32);
            let scratch = self.soc_info()?.scratch_addr;
            self.inject_and_execute(&code)?;
            let data_addr = scratch + LCODE_DATA_OFFSET_WORDS * 4;
            let raw = self.read(data_addr, take * 4)?;
            out.extend(inject::bytes_to_words(&raw));
            remaining -= take;
            cur_addr += (take * 4) as u32;
        }
        Ok(out)
    }

    pub fn readl(&mut self, addr: u32) -> DeviceResult<u32, T> {
        Ok(self.readl_n(addr, 1)?[0])
    }

    /// `writel_n` (§4.4), auto-tiling across the 244-word scratch window.
    pub fn writel_n(&mut self, addr: u32, words: &[u32]) -> DeviceResult<(), T> {
        let mut cur_addr = addr;
        for chunk in words.chunks(LCODE_MAX_WORDS) {
            let code = inject::writel_n_code(cur_addr, chunk);
            self.inject_and_execute(&code)?;
            cur_addr += (chunk.len() * 4) as u32;
        }
        Ok(())
    }

    pub fn writel(&mut self, addr: u32, value: u32) -> DeviceResult<(), T> {
        self.writel_n(addr, &[value])
    }

    /// `print_sid` (§6): `None` when the SoC has no `sid_addr`, matching
    /// §7's "benign for optional [parameters]".
    pub fn read_sid(&mut self) -> DeviceResult<Option<[u32; 4]>, T> {
        let addr = match self.soc_info()?.sid_addr() {
            Ok(addr) => addr,
            Err(SocError::MissingParameter { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let words = self.readl_n(addr, 4)?;
        Ok(Some([words[0], words[1], words[2], words[3]]))
    }

    /// RMR warm-reset request (§4.4). Returns
    /// [`RmrOutcome::Unsupported`] without injecting anything when the SoC
    /// has no `rvbar_reg` (§8 scenario 6).
    pub fn rmr_request(&mut self, entry_point: u32, aarch64: bool) -> DeviceResult<RmrOutcome, T> {
        let rvbar = match self.soc_info()?.rvbar_reg() {
            Ok(addr) => addr,
            Err(SocError::MissingParameter { .. }) => return Ok(RmrOutcome::Unsupported),
            Err(e) => return Err(e.into()),
        };
        let code = inject::rmr_code(rvbar, entry_point, aarch64);
        self.inject_and_execute(&code)?;
        Ok(RmrOutcome::Requested)
    }

    /// §4.6 + §4.7: stage an SPL and, if `buf` extends past the fixed SPL
    /// size limit, a trailing U-Boot image.
    ///
    /// The untruncated `buf` is handed to [`crate::spl::stage`]: the eGON
    /// header check validates `spl_len` against the true file length, not
    /// against the fixed split point, and the upload walk applies the
    /// `SPL_LEN_LIMIT`-derived size limit itself (§4.6).
    pub fn process_spl_and_uboot(
        &mut self,
        buf: &[u8],
        mut progress: Option<&mut dyn FnMut(usize)>,
    ) -> DeviceResult<Option<UbootRecord>, T> {
        crate::spl::stage(self, buf, progress.as_deref_mut())?;
        if buf.len() > crate::spl::SPL_LEN_LIMIT {
            let record = crate::uboot::stage(self, &buf[crate::spl::SPL_LEN_LIMIT..], progress)?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// §6 "Special payload-aware hooks": write `{script_addr, uenv_len}` at
    /// `spl_addr + 0x18` iff the staged SPL carries the `"SPL"` signature
    /// with version 1 at `spl_addr + 0x14`. Returns whether the hook fired.
    pub fn pass_fel_information(
        &mut self,
        script_addr: u32,
        uenv_len: u32,
    ) -> DeviceResult<bool, T> {
        let spl_addr = self.soc_info()?.spl_addr;
        let sig = self.read(spl_addr + 0x14, 4)?;
        if &sig[0..3] != b"SPL" || sig[3] != 1 {
            return Ok(false);
        }
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&script_addr.to_le_bytes());
        payload.extend_from_slice(&uenv_len.to_le_bytes());
        self.write_unguarded(spl_addr + 0x18, &payload, None)?;
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use crate::testutil::{MockDevice, MockTransport};

    #[test]
    fn version_reports_the_soc_id_encoded_by_the_mock() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let version = device.version().unwrap();
        assert_eq!(version.soc_id, 0x1651);
    }

    #[test]
    fn write_then_read_roundtrips_an_arbitrary_payload() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let data: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        device.write(0x4000_0000, &data, None).unwrap();
        let back = device.read(0x4000_0000, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn writel_n_readl_n_roundtrip_across_the_scratch_tiling_boundary() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let words: Vec<u32> = (0..300).collect(); // > LCODE_MAX_WORDS, forces tiling
        device.writel_n(0x4300_0000, &words).unwrap();
        let back = device.readl_n(0x4300_0000, words.len()).unwrap();
        assert_eq!(back, words);
    }

    #[test]
    fn readl_n_with_zero_words_is_a_no_op() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        assert_eq!(device.readl_n(0x4300_0000, 0).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn write_overlapping_a_recorded_uboot_region_is_rejected() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        device.set_uboot_record(crate::uboot::UbootRecord {
            entry: 0x4000_0000,
            size: 0x1000,
        });
        assert!(device.write(0x4000_0500, &[0u8; 16], None).is_err());
        assert!(device.write(0x3FFF_FF00, &[0u8; 16], None).is_ok());
    }

    #[test]
    fn sid_reads_back_whatever_is_seeded_at_sid_addr() {
        // every registry entry currently carries a sid_addr; read_sid's
        // MissingParameter branch is covered separately via a SocError
        // constructed directly in soc::test, since no entry lacks it.
        let mut device = MockDevice::new(MockTransport::new(0x1651)); // A20
        let soc = crate::soc::lookup(0x1651).unwrap();
        let seeded = [0x1111_2222u32, 0x3333_4444, 0x5555_6666, 0x7777_8888];
        let mut bytes = Vec::with_capacity(16);
        for w in &seeded {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        device
            .write_unguarded(soc.sid_addr().unwrap(), &bytes, None)
            .unwrap();
        assert_eq!(device.read_sid().unwrap(), Some(seeded));
    }

    #[test]
    fn rmr_request_is_unsupported_without_rvbar_reg() {
        // A20 (0x1651) has no rvbar_reg.
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        assert_eq!(
            device.rmr_request(0x4A00_0000, false).unwrap(),
            super::RmrOutcome::Unsupported
        );
    }

    #[test]
    fn rmr_request_succeeds_when_rvbar_reg_is_present() {
        // A64 (0x1689) has rvbar_reg = Some(0x0001_7000).
        let mut device = MockDevice::new(MockTransport::new(0x1689));
        assert_eq!(
            device.rmr_request(0x4A00_0000, true).unwrap(),
            super::RmrOutcome::Requested
        );
    }

    #[test]
    fn pass_fel_information_writes_the_hook_payload_when_signature_matches() {
        let mut device = MockDevice::new(MockTransport::new(0x1651)); // A20
        let soc = crate::soc::lookup(0x1651).unwrap();
        device
            .write_unguarded(soc.spl_addr + 0x14, &[b'S', b'P', b'L', 1], None)
            .unwrap();

        let fired = device.pass_fel_information(0x4300_0000, 0x200).unwrap();
        assert!(fired);

        let payload = device.read(soc.spl_addr + 0x18, 8).unwrap();
        assert_eq!(&payload[0..4], &0x4300_0000u32.to_le_bytes());
        assert_eq!(&payload[4..8], &0x200u32.to_le_bytes());
    }

    #[test]
    fn pass_fel_information_is_a_no_op_without_the_spl_signature() {
        let mut device = MockDevice::new(MockTransport::new(0x1651));
        let fired = device.pass_fel_information(0x4300_0000, 0x200).unwrap();
        assert!(!fired);
    }
}
