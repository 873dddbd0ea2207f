//! SPL staging (C6): validates the eGON header, prepares the target (L2,
//! captured stacks, MMU disable/synthesize), performs the swap-aware
//! upload, hands off via the thunk, and checks for the `"eGON.FEL"`
//! completion marker.

use std::time::Duration;

use sunxi_boot_image::egon::{EgonHeader, EGON_FEL_MAGIC};

use crate::device::{Device, DeviceResult, Transport};
use crate::error::Error;
use crate::inject;
use crate::mmu;
use crate::soc::SwapBuffer;

/// Fixed split point between the SPL portion of an uploaded blob and any
/// trailing U-Boot image (§4.7).
pub const SPL_LEN_LIMIT: usize = 32 * 1024;

/// How long to wait after executing the thunk before checking for the
/// completion marker; empirically required, cause unconfirmed (§9).
pub const SPL_POST_THUNK_DELAY: Duration = Duration::from_millis(250);

/// Validate `buf` as an eGON SPL image, upload it (with whatever SRAM swap
/// dance the SoC's registry entry requires), hand off via the thunk, and
/// confirm the SPL signalled completion.
pub fn stage<T>(
    device: &mut Device<T>,
    buf: &[u8],
    mut progress: Option<&mut dyn FnMut(usize)>,
) -> DeviceResult<(), T>
where
    T: Transport,
{
    let header = EgonHeader::parse(buf)?;
    let soc = device.soc_info()?;
    let spl_addr = soc.spl_addr;
    let thunk_addr = soc.thunk_addr;
    let swap_buffers: Vec<SwapBuffer> = soc.swap_buffers.to_vec();

    if soc.needs_l2en {
        device.l2_enable()?;
    }
    let (sp, sp_irq) = device.capture_stacks()?;

    let mmu_backup = match mmu::backup_and_disable(device)? {
        Some((ttbr0, table)) => Some((ttbr0, table)),
        None => {
            if let Ok(mmu_tt_addr) = soc.mmu_tt_addr() {
                mmu::synthesize_and_configure(device, mmu_tt_addr)?;
            }
            None
        }
    };

    upload_with_swaps(
        device,
        buf,
        header.spl_len as usize,
        spl_addr,
        thunk_addr,
        &swap_buffers,
        progress.as_deref_mut(),
    )?;

    run_thunk(device, spl_addr, thunk_addr, sp, sp_irq, &swap_buffers)?;

    std::thread::sleep(SPL_POST_THUNK_DELAY);
    check_completion(device, spl_addr)?;

    if let Some((ttbr0, table)) = mmu_backup {
        mmu::restore_and_enable(device, ttbr0, table)?;
    }

    Ok(())
}

/// Walk `swap_buffers` in order, shrinking the allowed SPL size whenever a
/// swap's `buf2` would fall inside the not-yet-uploaded SPL window, then
/// flush whatever remains straight to the cursor (§4.6 "Swap-aware
/// upload").
#[allow(clippy::too_many_arguments)]
fn upload_with_swaps<T>(
    device: &mut Device<T>,
    buf: &[u8],
    spl_len: usize,
    spl_addr: u32,
    thunk_addr: u32,
    swap_buffers: &[SwapBuffer],
    mut progress: Option<&mut dyn FnMut(usize)>,
) -> DeviceResult<(), T>
where
    T: Transport,
{
    let mut spl_len_limit: u32 = SPL_LEN_LIMIT as u32;
    let mut cur_addr = spl_addr;
    let mut cur_offset: usize = 0;

    for sb in swap_buffers {
        let window_end = spl_addr + spl_len_limit;
        if sb.buf2 < window_end && sb.buf2 + sb.size > spl_addr {
            spl_len_limit = sb.buf2 - spl_addr;
        }

        if sb.buf1 > cur_addr {
            let straight_len = (sb.buf1 - cur_addr) as usize;
            let end_offset = (cur_offset + straight_len).min(buf.len());
            if end_offset > cur_offset {
                device.write_unguarded(cur_addr, &buf[cur_offset..end_offset], progress.as_deref_mut())?;
            }
            cur_offset = end_offset;
        }
        cur_addr = sb.buf1;

        let swap_offset = (sb.buf1.saturating_sub(spl_addr)) as usize;
        let swap_end = (swap_offset + sb.size as usize).min(buf.len());
        if swap_end > swap_offset {
            device.write_unguarded(sb.buf2, &buf[swap_offset..swap_end], progress.as_deref_mut())?;
        }
        cur_addr = sb.buf1 + sb.size;
        cur_offset = swap_end.max(cur_offset);
    }

    spl_len_limit = spl_len_limit.min(thunk_addr.saturating_sub(spl_addr));
    if spl_len > spl_len_limit as usize {
        return Err(Error::Validation("SPL too large".to_string()));
    }

    if cur_offset < spl_len {
        device.write_unguarded(cur_addr, &buf[cur_offset..spl_len], progress)?;
    }
    Ok(())
}

fn run_thunk<T>(
    device: &mut Device<T>,
    spl_addr: u32,
    thunk_addr: u32,
    sp: u32,
    sp_irq: u32,
    swap_buffers: &[SwapBuffer],
) -> DeviceResult<(), T>
where
    T: Transport,
{
    let code = inject::spl_thunk_code(thunk_addr + (inject::SPL_THUNK_CODE_WORDS * 4) as u32);
    let mut trailer = vec![sp_irq, sp, spl_addr];
    for sb in swap_buffers {
        trailer.push(sb.buf1);
        trailer.push(sb.buf2);
        trailer.push(sb.size);
    }
    trailer.extend_from_slice(&[0, 0, 0]); // terminator

    let mut words = code;
    words.extend_from_slice(&trailer);
    let bytes = inject::words_to_bytes(&words);
    device.write_unguarded(thunk_addr, &bytes, None)?;
    device.execute(thunk_addr)
}

fn check_completion<T>(device: &mut Device<T>, spl_addr: u32) -> DeviceResult<(), T>
where
    T: Transport,
{
    let raw = device.read(spl_addr + 4, 8)?;
    if raw.as_slice() == EGON_FEL_MAGIC.as_slice() {
        return Ok(());
    }
    let mut code = [0u8; 8];
    code.copy_from_slice(&raw);
    Err(Error::Completion(code))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::MockTransport;
    use sunxi_boot_image::egon::{checksum_for, EGON_MAGIC};

    fn build_spl(len: usize) -> Vec<u8> {
        assert_eq!(len % 4, 0);
        let mut buf = vec![0u8; len];
        buf[4..12].copy_from_slice(EGON_MAGIC);
        buf[16..20].copy_from_slice(&(len as u32).to_le_bytes());
        for (i, b) in buf.iter_mut().enumerate().skip(20) {
            *b = (i as u8).wrapping_mul(7);
        }
        let checksum = checksum_for(&buf, len);
        buf[12..16].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// A23 has no `rvbar_reg`/`mmu_tt_addr` and no `swap_buffers`, so this
    /// exercises the l2-enable step plus a straight (non-swapped) upload.
    /// The mock's scratch reads come back zeroed, so `backup_and_disable`
    /// sees SCTLR.M == 0 and takes the "BROM never enabled the MMU" path.
    /// The mock also can't run the injected thunk, so it can't make the SPL
    /// write back its own completion marker; this test seeds it directly to
    /// simulate a cooperating device and exercise the upload/thunk/
    /// completion-check pipeline on its own.
    #[test]
    fn stage_uploads_the_spl_and_accepts_the_completion_marker() {
        let soc = crate::soc::lookup(0x1650).unwrap(); // A23
        let mut transport = MockTransport::new(0x1650);
        transport.write_mem(soc.spl_addr + 4, b"eGON.FEL");
        let mut device = crate::device::Device::new(transport);

        let buf = build_spl(256);
        stage(&mut device, &buf, None).unwrap();

        assert_eq!(
            device.read(soc.spl_addr, 256).unwrap()[20],
            (20u8).wrapping_mul(7)
        );
    }

    /// A `spl_len` beyond `SPL_LEN_LIMIT` is a valid eGON header (the header
    /// check validates against the true file length, not the fixed 32 KiB
    /// split point) but is still too large to fit before A23's `thunk_addr`;
    /// `stage` must reject it with the upload-walk's "too large" error, not
    /// the header parser's length check. Exercises the fix to
    /// `Device::process_spl_and_uboot` passing the untruncated buffer
    /// through to `stage` (§4.6/§4.7).
    #[test]
    fn oversized_spl_is_rejected_by_the_upload_walk_not_the_header_check() {
        let transport = MockTransport::new(0x1650); // A23
        let mut device = crate::device::Device::new(transport);

        let buf = build_spl(SPL_LEN_LIMIT + 0x1000);
        let err = stage(&mut device, &buf, None).unwrap_err();
        match err {
            Error::Validation(msg) => assert_eq!(msg, "SPL too large"),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}
