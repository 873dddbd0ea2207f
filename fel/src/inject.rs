//! Builds the small native ARM instruction sequences the staging engine
//! uploads to `scratch_addr` and executes in order to emulate register-level
//! operations the boot ROM has no direct command for (§4.4).
//!
//! Every routine here is pure: it returns a little-endian-ready `Vec<u32>`
//! of instruction words (plus, where relevant, trailing data words) and
//! leaves writing/executing/reading-back to the caller (`Device`). Keep the
//! opcodes as named constants with their disassembly alongside, so the
//! routines stay auditable without an assembler.

/// Maximum instruction words in a `readl_n`/`writel_n` code template.
pub const LCODE_ARM_WORDS: usize = 12;
/// Total scratch-area budget available for a `readl_n`/`writel_n` request:
/// template words plus room for up to `LCODE_MAX_WORDS` data words.
pub const LCODE_MAX_TOTAL: usize = 0x100;
/// Largest `n` a single `readl_n`/`writel_n` call can cover; larger requests
/// are tiled by the caller.
pub const LCODE_MAX_WORDS: usize = LCODE_MAX_TOTAL - LCODE_ARM_WORDS;

const BX_LR: u32 = 0xe12f_ff1e;
const STR_R0_PC: u32 = 0xe58f_0000; // str r0, [pc]
const LDR_R0_PC_12: u32 = 0xe59f_000c; // ldr r0, [pc, #12]
const DSB_SY: u32 = 0xf57f_f04f;
const ISB_SY: u32 = 0xf57f_f06f;
const WFI: u32 = 0xe320_f003;
const NOP: u32 = 0xe320_f000;

/// `MRC p15, opc1, Rd, CRn, CRm, opc2` with `Rd` fixed to `r0`.
fn mrc(coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8) -> u32 {
    0xEE00_0000
        | (1 << 20)
        | (1 << 4)
        | ((opc1 as u32 & 7) << 21)
        | ((crn as u32 & 15) << 16)
        | ((coproc as u32 & 15) << 8)
        | ((opc2 as u32 & 7) << 5)
        | (crm as u32 & 15)
}

/// `MCR p15, opc1, Rd, CRn, CRm, opc2` with `Rd` fixed to `r0`.
fn mcr(coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8) -> u32 {
    0xEE00_0000
        | (1 << 4)
        | ((opc1 as u32 & 7) << 21)
        | ((crn as u32 & 15) << 16)
        | ((coproc as u32 & 15) << 8)
        | ((opc2 as u32 & 7) << 5)
        | (crm as u32 & 15)
}

/// Offset at which a coprocessor-read routine's result is found inside
/// `scratch_addr`: right after the 3-word code (mrc, str, bx).
pub const CP_READ_RESULT_OFFSET: u32 = 12;

/// `MRC {...} -> r0; STR r0,[pc]; BX lr`. Execute at `scratch_addr`, then
/// read 4 bytes at `scratch_addr + CP_READ_RESULT_OFFSET`.
pub fn cp_read_code(coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8) -> Vec<u32> {
    vec![mrc(coproc, opc1, crn, crm, opc2), STR_R0_PC, BX_LR]
}

/// `LDR r0,[pc,#12]; MCR {...}; DSB sy; ISB sy; BX lr; <value>`. Execute at
/// `scratch_addr` after writing the code plus the trailing value word.
pub fn cp_write_code(coproc: u8, opc1: u8, crn: u8, crm: u8, opc2: u8, value: u32) -> Vec<u32> {
    vec![
        LDR_R0_PC_12,
        mcr(coproc, opc1, crn, crm, opc2),
        DSB_SY,
        ISB_SY,
        BX_LR,
        value,
    ]
}

/// Offset, in words, at which a `readl_n`/`writel_n` template's data begins
/// relative to the start of the code.
pub const LCODE_DATA_OFFSET_WORDS: u32 = LCODE_ARM_WORDS as u32;

/// Build the fixed 12-word `readl_n` loop: loads `n` sequential 32-bit words
/// from `addr` and stores them immediately after the code. `n` must be
/// `<= LCODE_MAX_WORDS`.
///
/// r0 = addr, r1 = dest (pc-relative, computed at runtime), r2 = count.
pub fn readl_n_code(addr: u32, n: u32) -> Vec<u32> {
    assert!(n as usize <= LCODE_MAX_WORDS);
    vec![
        0xe59f_0020, // ldr r0, [pc, #0x20]   ; r0 = addr (word 10)
        0xe28f_1024, // add r1, pc, #0x24     ; r1 = &data[0] (word 12)
        0xe59f_201c, // ldr r2, [pc, #0x1c]   ; r2 = n (word 11)
        0xe252_2001, // subs r2, r2, #1
        0x4a00_0002, // bmi done (word 8)
        0xe490_3004, // ldr r3, [r0], #4
        0xe481_3004, // str r3, [r1], #4
        0xeaff_fffa, // b loop
        BX_LR,        // done: bx lr
        NOP,
        addr,
        n,
    ]
}

/// Build the `writel_n` loop: copies `n` words following the code into
/// device memory starting at `addr`. `words.len() == n`,
/// `n <= LCODE_MAX_WORDS`.
pub fn writel_n_code(addr: u32, words: &[u32]) -> Vec<u32> {
    assert!(words.len() <= LCODE_MAX_WORDS);
    let n = words.len() as u32;
    let mut code = vec![
        0xe59f_0020, // ldr r0, [pc, #0x20]   ; r0 = addr (word 10)
        0xe28f_1024, // add r1, pc, #0x24     ; r1 = &data[0] (word 12)
        0xe59f_201c, // ldr r2, [pc, #0x1c]   ; r2 = n (word 11)
        0xe252_2001, // subs r2, r2, #1
        0x4a00_0002, // bmi done (word 8)
        0xe491_3004, // ldr r3, [r1], #4
        0xe480_3004, // str r3, [r0], #4
        0xeaff_fffa, // b loop
        BX_LR,
        NOP,
        addr,
        n,
    ];
    code.extend_from_slice(words);
    code
}

/// Offset of the captured `sp`/`sp_irq` pair inside the scratch area after
/// executing [`stack_capture_code`]: right after its 9-word/36-byte body, so
/// no trailer patching is needed — the two trailing `str ..., [pc, #4]`
/// instructions compute this address themselves.
pub const STACK_CAPTURE_RESULT_OFFSET: u32 = 0x24;

/// Switch to IRQ mode, capture `sp` as `sp_irq`, switch back to the caller's
/// original mode, capture `sp` again; store both at
/// `scratch_addr + STACK_CAPTURE_RESULT_OFFSET` as `[sp_irq, sp]`.
pub fn stack_capture_code() -> Vec<u32> {
    vec![
        0xe10f_0000, // mrs r0, cpsr
        0xe3c0_101f, // bic r1, r0, #0x1f
        0xe381_1012, // orr r1, r1, #0x12   ; IRQ mode
        0xe121_f001, // msr cpsr_c, r1
        0xe1a0_100d, // mov r1, sp          ; r1 = sp_irq
        0xe121_f000, // msr cpsr_c, r0      ; back to the original mode
        0xe58f_1004, // str r1, [pc, #4]    ; -> scratch + 0x24
        0xe58f_d004, // str sp, [pc, #4]    ; -> scratch + 0x28
        BX_LR,
    ]
}

/// Set bit 1 of CP15 `c1,c0,{1}` (L2 cache enable): `MRC; ORR #2; MCR; BX lr`.
pub fn l2_enable_code() -> Vec<u32> {
    vec![
        mrc(15, 0, 1, 0, 1),
        0xe381_0002, // orr r0, r0, #2
        mcr(15, 0, 1, 0, 1),
        BX_LR,
    ]
}

const SCTLR_M: u32 = 1 << 0;
const SCTLR_Z: u32 = 1 << 11;
const SCTLR_I: u32 = 1 << 12;

/// Clear SCTLR bits M(0)/Z(11)/I(12), disabling the MMU, branch prediction
/// and I-cache.
///
/// The `#(1<<12)`/`#(1<<11)` immediates don't fit the 8-bit rotated-immediate
/// field directly; `0x0A01` (imm8=0x01, rotate=10 => ROR giving bit 12) and
/// `0x0B02` (imm8=0x02, rotate=11 => ROR giving bit 11) are the encodings
/// that actually produce those single-bit values. `#1` needs no rotation.
pub fn mmu_disable_code() -> Vec<u32> {
    vec![
        mrc(15, 0, 1, 0, 0),
        0xe3c0_0a01, // bic r0, r0, #(1<<12)   ; clear I
        0xe3c0_0b02, // bic r0, r0, #(1<<11)   ; clear Z
        0xe3c0_0001, // bic r0, r0, #1         ; clear M
        mcr(15, 0, 1, 0, 0),
        BX_LR,
    ]
}

/// Invalidate I-cache/TLB/BTB, `DSB; ISB`, then set SCTLR bits M(0)/I(12)/
/// Z(11), enabling the MMU. See [`mmu_disable_code`] for the immediate
/// encodings of `#(1<<11)`/`#(1<<12)`.
pub fn mmu_enable_code() -> Vec<u32> {
    vec![
        0xe3a0_0000, // mov r0, #0
        mcr(15, 0, 7, 5, 0), // invalidate icache
        mcr(15, 0, 8, 7, 0), // invalidate tlb
        mcr(15, 0, 7, 5, 6), // invalidate btb
        DSB_SY,
        ISB_SY,
        mrc(15, 0, 1, 0, 0),
        0xe380_0001, // orr r0, r0, #1          ; set M
        0xe380_0b02, // orr r0, r0, #(1<<11)    ; set Z
        0xe380_0a01, // orr r0, r0, #(1<<12)    ; set I
        mcr(15, 0, 1, 0, 0),
        BX_LR,
    ]
}

/// Store `entry_point` to `rvbar_reg`, set the RMR mode bit(s), `ISB`, then
/// spin on `WFI`. Never returns on a real device.
pub fn rmr_code(rvbar_reg: u32, entry_point: u32, aarch64: bool) -> Vec<u32> {
    let rmr_mode: u32 = (1 << 1) | if aarch64 { 1 } else { 0 };
    vec![
        0xe59f_0024, // ldr r0, [pc, #0x24]  ; r0 = rvbar_reg (word 11)
        0xe59f_1024, // ldr r1, [pc, #0x24]  ; r1 = entry_point (word 12)
        0xe580_1000, // str r1, [r0]
        DSB_SY,
        ISB_SY,
        mrc(15, 0, 12, 0, 2), // mrc p15, 0, r0, c12, c0, 2  ; read RMR
        0xe380_0000 | rmr_mode, // orr r0, r0, #rmr_mode
        mcr(15, 0, 12, 0, 2), // mcr p15, 0, r0, c12, c0, 2  ; write RMR
        ISB_SY,
        WFI,
        0xeaff_fffd, // b . (spin on wfi)
        rvbar_reg,
        entry_point,
    ]
}

/// Number of instruction words in [`spl_thunk_code`], before its trailer.
pub const SPL_THUNK_CODE_WORDS: usize = 26;

/// Build the SPL hand-off thunk: restores each `{buf1,buf2,size}` swap
/// entry (copying `buf2` back to `buf1`), restores the captured `sp_irq`/
/// `sp`, then branches to the SPL entry point. `trailer_addr` is the
/// absolute device address immediately following this code, where the
/// caller writes `[sp_irq, sp, spl_addr, {buf1,buf2,size}..., {0,0,0}]`.
///
/// TODO: cross-check this opcode stream against a disassembler; the
/// original `fel-to-spl-thunk.o` this mirrors was not available to diff
/// against, so these encodings are hand-assembled and unverified on real
/// hardware.
pub fn spl_thunk_code(trailer_addr: u32) -> Vec<u32> {
    vec![
        0xE59F_405C, // ldr r4, [pc, #0x5c]   ; r4 = &trailer
        0xE494_5004, // ldr r5, [r4], #4      ; sp_irq
        0xE494_6004, // ldr r6, [r4], #4      ; sp
        0xE494_7004, // ldr r7, [r4], #4      ; spl_addr
        0xE594_1000, // loop: ldr r1, [r4]        ; buf1
        0xE594_2004, // ldr r2, [r4, #4]      ; buf2
        0xE594_3008, // ldr r3, [r4, #8]      ; size
        0xE353_0000, // cmp r3, #0
        0x0A00_0005, // beq done
        0xE492_0004, // copyloop: ldr r0, [r2], #4
        0xE481_0004, // str r0, [r1], #4
        0xE253_3004, // subs r3, r3, #4
        0x1AFF_FFFB, // bne copyloop
        0xE284_400C, // add r4, r4, #0xc
        0xEAFF_FFF4, // b loop
        0xE10F_3000, // done: mrs r3, cpsr
        0xE3C3_301F, // bic r3, r3, #0x1f
        0xE383_3012, // orr r3, r3, #0x12     ; IRQ mode
        0xE121_F003, // msr cpsr_c, r3
        0xE1A0_D005, // mov sp, r5
        0xE3C3_301F, // bic r3, r3, #0x1f
        0xE383_3013, // orr r3, r3, #0x13     ; SVC mode
        0xE121_F003, // msr cpsr_c, r3
        0xE1A0_D006, // mov sp, r6
        0xE12F_FF17, // bx r7
        trailer_addr,
    ]
}

/// Serialize instruction/data words to the little-endian byte stream the
/// device expects.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Inverse of [`words_to_bytes`]; `bytes.len()` must be a multiple of 4.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}
