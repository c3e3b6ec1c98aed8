//! x86-64 block translator. One basic block per translation: straight-line
//! code ending at the first branch, jump, environment call or untranslatable
//! instruction. Generated code receives the guest state pointer in RDI,
//! parks it in RBX and addresses registers, PC, the cycle counter and the
//! exception latch as [rbx + disp32] slots. Memory accesses and environment
//! calls go through `extern "C"` trampolines back into the bus record.

use std::mem::offset_of;

use super::code_cache::Block;
use super::{exec, Cpu, REG_ZERO};
use crate::decode;
use crate::exception::Exception;
use crate::isa::*;

type BlockFn = unsafe extern "C" fn(*mut Cpu);

const MAX_BLOCK_INSTRS: u32 = 64;

#[inline]
fn x_disp(reg: u32) -> i32 {
    (offset_of!(Cpu, x) + 4 * reg as usize) as i32
}

#[inline]
fn pc_disp() -> i32 {
    offset_of!(Cpu, pc) as i32
}

#[inline]
fn exc_disp() -> i32 {
    offset_of!(Cpu, exception) as i32
}

#[inline]
fn cycle_disp() -> i32 {
    offset_of!(Cpu, csr_cycle) as i32
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EmitFlow {
    Continue,
    /// The block ends here; RAX carries the next guest PC.
    Terminate,
    /// The block ends here and the helper already stored the next guest PC.
    TerminateHelper,
}

#[derive(Clone, Copy)]
#[repr(u8)]
enum Cc {
    B = 0x2,
    AE = 0x3,
    E = 0x4,
    NE = 0x5,
    L = 0xC,
    GE = 0xD,
}

struct X64Emitter {
    bytes: Vec<u8>,
    exit_jumps: Vec<usize>,
}

impl X64Emitter {
    const RAX: u8 = 0;
    const RCX: u8 = 1;
    const RDX: u8 = 2;
    const RBX: u8 = 3;
    const RSI: u8 = 6;
    const RDI: u8 = 7;
    const R10: u8 = 10;
    const R11: u8 = 11;

    fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(256),
            exit_jumps: Vec::new(),
        }
    }

    #[inline]
    fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    #[inline]
    fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_rex(&mut self, w: bool, r: u8, x: u8, b: u8) {
        let rex = 0x40
            | ((w as u8) << 3)
            | (((r >> 3) & 1) << 2)
            | (((x >> 3) & 1) << 1)
            | ((b >> 3) & 1);
        if rex != 0x40 {
            self.emit_u8(rex);
        }
    }

    #[inline]
    fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.emit_u8(((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7));
    }

    #[inline]
    fn emit_sib(&mut self, scale: u8, index: u8, base: u8) {
        self.emit_u8(((scale & 0x3) << 6) | ((index & 0x7) << 3) | (base & 0x7));
    }

    fn emit_mem_disp32(&mut self, reg_field: u8, base: u8, disp: i32) {
        if (base & 0x7) == 0x4 {
            self.emit_modrm(0b10, reg_field, 0x4);
            self.emit_sib(0, 0x4, base & 0x7);
        } else {
            self.emit_modrm(0b10, reg_field, base & 0x7);
        }
        self.emit_u32(disp as u32);
    }

    fn push_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x50 + (reg & 0x7));
    }

    fn pop_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x58 + (reg & 0x7));
    }

    fn mov_r64_r64(&mut self, dst: u8, src: u8) {
        self.emit_rex(true, src, 0, dst);
        self.emit_u8(0x89);
        self.emit_modrm(0b11, src, dst);
    }

    fn mov_r64_imm64(&mut self, dst: u8, imm: u64) {
        self.emit_rex(true, 0, 0, dst);
        self.emit_u8(0xB8 + (dst & 0x7));
        self.emit_u64(imm);
    }

    fn mov_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x89);
        self.emit_modrm(0b11, src, dst);
    }

    fn xor_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x31);
        self.emit_modrm(0b11, src, dst);
    }

    // mov r, 0 folds to xor r, r; callers relying on flags surviving must
    // order their immediates before the compare.
    fn mov_r32_imm32(&mut self, dst: u8, imm: u32) {
        if imm == 0 {
            self.xor_r32_r32(dst, dst);
        } else {
            self.emit_rex(false, 0, 0, dst);
            self.emit_u8(0xB8 + (dst & 0x7));
            self.emit_u32(imm);
        }
    }

    fn mov_r32_m32(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit_rex(false, dst, 0, base);
        self.emit_u8(0x8B);
        self.emit_mem_disp32(dst, base, disp);
    }

    fn mov_m32_r32(&mut self, base: u8, disp: i32, src: u8) {
        self.emit_rex(false, src, 0, base);
        self.emit_u8(0x89);
        self.emit_mem_disp32(src, base, disp);
    }

    fn mov_m32_imm32(&mut self, base: u8, disp: i32, imm: u32) {
        self.emit_rex(false, 0, 0, base);
        self.emit_u8(0xC7);
        self.emit_mem_disp32(0, base, disp);
        self.emit_u32(imm);
    }

    fn add_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x01);
        self.emit_modrm(0b11, src, dst);
    }

    fn sub_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x29);
        self.emit_modrm(0b11, src, dst);
    }

    fn and_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x21);
        self.emit_modrm(0b11, src, dst);
    }

    fn or_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, src, 0, dst);
        self.emit_u8(0x09);
        self.emit_modrm(0b11, src, dst);
    }

    fn cmp_r32_r32(&mut self, lhs: u8, rhs: u8) {
        self.emit_rex(false, rhs, 0, lhs);
        self.emit_u8(0x39);
        self.emit_modrm(0b11, rhs, lhs);
    }

    // add r, 0 is elided.
    fn add_r32_imm32(&mut self, dst: u8, imm: i32) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, dst);
            self.emit_u8(0x81);
            self.emit_modrm(0b11, 0, dst);
            self.emit_u32(imm as u32);
        }
    }

    fn or_r32_imm32(&mut self, dst: u8, imm: i32) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, dst);
            self.emit_u8(0x81);
            self.emit_modrm(0b11, 1, dst);
            self.emit_u32(imm as u32);
        }
    }

    // and r, 0 folds to xor r, r.
    fn and_r32_imm32(&mut self, dst: u8, imm: i32) {
        if imm == 0 {
            self.xor_r32_r32(dst, dst);
        } else {
            self.emit_rex(false, 0, 0, dst);
            self.emit_u8(0x81);
            self.emit_modrm(0b11, 4, dst);
            self.emit_u32(imm as u32);
        }
    }

    fn xor_r32_imm32(&mut self, dst: u8, imm: i32) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, dst);
            self.emit_u8(0x81);
            self.emit_modrm(0b11, 6, dst);
            self.emit_u32(imm as u32);
        }
    }

    fn cmp_r32_imm32(&mut self, lhs: u8, imm: i32) {
        self.emit_rex(false, 0, 0, lhs);
        self.emit_u8(0x81);
        self.emit_modrm(0b11, 7, lhs);
        self.emit_u32(imm as u32);
    }

    fn test_r32_imm32(&mut self, reg: u8, imm: u32) {
        self.emit_rex(false, 0, 0, reg);
        self.emit_u8(0xF7);
        self.emit_modrm(0b11, 0, reg);
        self.emit_u32(imm);
    }

    fn shl_r32_imm8(&mut self, reg: u8, imm: u8) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, reg);
            self.emit_u8(0xC1);
            self.emit_modrm(0b11, 4, reg);
            self.emit_u8(imm);
        }
    }

    fn shr_r32_imm8(&mut self, reg: u8, imm: u8) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, reg);
            self.emit_u8(0xC1);
            self.emit_modrm(0b11, 5, reg);
            self.emit_u8(imm);
        }
    }

    fn sar_r32_imm8(&mut self, reg: u8, imm: u8) {
        if imm != 0 {
            self.emit_rex(false, 0, 0, reg);
            self.emit_u8(0xC1);
            self.emit_modrm(0b11, 7, reg);
            self.emit_u8(imm);
        }
    }

    fn shl_r32_cl(&mut self, reg: u8) {
        self.emit_rex(false, 0, 0, reg);
        self.emit_u8(0xD3);
        self.emit_modrm(0b11, 4, reg);
    }

    fn shr_r32_cl(&mut self, reg: u8) {
        self.emit_rex(false, 0, 0, reg);
        self.emit_u8(0xD3);
        self.emit_modrm(0b11, 5, reg);
    }

    fn sar_r32_cl(&mut self, reg: u8) {
        self.emit_rex(false, 0, 0, reg);
        self.emit_u8(0xD3);
        self.emit_modrm(0b11, 7, reg);
    }

    fn imul_r32_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, dst, 0, src);
        self.emit_u8(0x0F);
        self.emit_u8(0xAF);
        self.emit_modrm(0b11, dst, src);
    }

    fn movsx_r32_r8(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, dst, 0, src);
        self.emit_u8(0x0F);
        self.emit_u8(0xBE);
        self.emit_modrm(0b11, dst, src);
    }

    fn movsx_r32_r16(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, dst, 0, src);
        self.emit_u8(0x0F);
        self.emit_u8(0xBF);
        self.emit_modrm(0b11, dst, src);
    }

    fn movzx_r32_r8(&mut self, dst: u8, src: u8) {
        self.emit_rex(false, dst, 0, src);
        self.emit_u8(0x0F);
        self.emit_u8(0xB6);
        self.emit_modrm(0b11, dst, src);
    }

    fn setcc_al(&mut self, cc: Cc) {
        self.emit_u8(0x0F);
        self.emit_u8(0x90 + (cc as u8));
        self.emit_u8(0xC0);
    }

    fn cmovcc_r32_r32(&mut self, dst: u8, src: u8, cc: Cc) {
        self.emit_rex(false, dst, 0, src);
        self.emit_u8(0x0F);
        self.emit_u8(0x40 + (cc as u8));
        self.emit_modrm(0b11, dst, src);
    }

    fn add_m64_imm32(&mut self, base: u8, disp: i32, imm: i32) {
        self.emit_rex(true, 0, 0, base);
        self.emit_u8(0x81);
        self.emit_mem_disp32(0, base, disp);
        self.emit_u32(imm as u32);
    }

    fn cmp_m32_imm32(&mut self, base: u8, disp: i32, imm: u32) {
        self.emit_rex(false, 0, 0, base);
        self.emit_u8(0x81);
        self.emit_mem_disp32(7, base, disp);
        self.emit_u32(imm);
    }

    /// Short conditional jump with the displacement patched in later.
    fn jcc_short_fixup(&mut self, cc: Cc) -> usize {
        self.emit_u8(0x70 + (cc as u8));
        self.emit_u8(0);
        self.bytes.len() - 1
    }

    fn patch_jcc_short(&mut self, at: usize) {
        self.bytes[at] = (self.bytes.len() - at - 1) as u8;
    }

    /// Long jump to the (not yet emitted) epilogue.
    fn jmp_exit(&mut self) {
        self.emit_u8(0xE9);
        self.exit_jumps.push(self.bytes.len());
        self.emit_u32(0);
    }

    /// Point every recorded exit jump at the current position.
    fn patch_exit_jumps(&mut self) {
        let target = self.bytes.len();
        for at in std::mem::take(&mut self.exit_jumps) {
            let rel = (target - (at + 4)) as u32;
            self.bytes[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }
    }

    fn call_rax(&mut self) {
        self.emit_u8(0xFF);
        self.emit_u8(0xD0);
    }

    fn ret(&mut self) {
        self.emit_u8(0xC3);
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

// Reads of x0 produce zero without touching the state block; writes to x0
// emit nothing.
fn emit_load_xreg(em: &mut X64Emitter, host: u8, reg: u32) {
    if reg == 0 {
        em.xor_r32_r32(host, host);
    } else {
        em.mov_r32_m32(host, X64Emitter::RBX, x_disp(reg));
    }
}

fn emit_store_xreg(em: &mut X64Emitter, reg: u32, host: u8) {
    if reg != 0 {
        em.mov_m32_r32(X64Emitter::RBX, x_disp(reg), host);
    }
}

/// After a trampoline call: if the callback latched an exception, store the
/// already-advanced PC and the instructions retired so far, then bail to
/// the epilogue before the block terminator can run.
fn emit_latch_check(em: &mut X64Emitter, next_pc: u32, retired: u32) {
    em.cmp_m32_imm32(X64Emitter::RBX, exc_disp(), 0);
    let skip = em.jcc_short_fixup(Cc::E);
    em.mov_m32_imm32(X64Emitter::RBX, pc_disp(), next_pc);
    em.add_m64_imm32(X64Emitter::RBX, cycle_disp(), retired as i32);
    em.jmp_exit();
    em.patch_jcc_short(skip);
}

/// Translate one guest instruction at `pc`. Returns None when the
/// instruction is not translatable, which ends the block before it.
fn emit_instr(em: &mut X64Emitter, pc: u32, inst: u32, emitted: u32) -> Option<EmitFlow> {
    let rd = decode::rd(inst);
    let rs1 = decode::rs1(inst);
    let rs2 = decode::rs2(inst);

    match decode::opcode(inst) {
        OPCODE_LUI => {
            if rd != 0 {
                em.mov_r32_imm32(X64Emitter::R10, decode::imm_u(inst));
                emit_store_xreg(em, rd, X64Emitter::R10);
            }
            Some(EmitFlow::Continue)
        }
        OPCODE_AUIPC => {
            if rd != 0 {
                em.mov_r32_imm32(X64Emitter::R10, pc.wrapping_add(decode::imm_u(inst)));
                emit_store_xreg(em, rd, X64Emitter::R10);
            }
            Some(EmitFlow::Continue)
        }
        OPCODE_OP_IMM => {
            let imm = decode::imm_i(inst);
            let shamt = (imm & 0x1f) as u8;
            emit_load_xreg(em, X64Emitter::R10, rs1);
            match decode::funct3(inst) {
                F3_ADD_SUB => em.add_r32_imm32(X64Emitter::R10, imm),
                F3_SLT => {
                    em.cmp_r32_imm32(X64Emitter::R10, imm);
                    em.setcc_al(Cc::L);
                    em.movzx_r32_r8(X64Emitter::R10, X64Emitter::RAX);
                }
                F3_SLTU => {
                    em.cmp_r32_imm32(X64Emitter::R10, imm);
                    em.setcc_al(Cc::B);
                    em.movzx_r32_r8(X64Emitter::R10, X64Emitter::RAX);
                }
                F3_XOR => em.xor_r32_imm32(X64Emitter::R10, imm),
                F3_OR => em.or_r32_imm32(X64Emitter::R10, imm),
                F3_AND => em.and_r32_imm32(X64Emitter::R10, imm),
                F3_SLL => {
                    if decode::funct7(inst) != F7_BASE {
                        return None;
                    }
                    em.shl_r32_imm8(X64Emitter::R10, shamt);
                }
                F3_SRL_SRA => match decode::funct7(inst) {
                    F7_BASE => em.shr_r32_imm8(X64Emitter::R10, shamt),
                    F7_SUB_SRA => em.sar_r32_imm8(X64Emitter::R10, shamt),
                    _ => return None,
                },
                _ => return None,
            }
            emit_store_xreg(em, rd, X64Emitter::R10);
            Some(EmitFlow::Continue)
        }
        OPCODE_OP => {
            emit_load_xreg(em, X64Emitter::R10, rs1);
            emit_load_xreg(em, X64Emitter::R11, rs2);
            match (decode::funct7(inst), decode::funct3(inst)) {
                (F7_BASE, F3_ADD_SUB) => em.add_r32_r32(X64Emitter::R10, X64Emitter::R11),
                (F7_SUB_SRA, F3_ADD_SUB) => em.sub_r32_r32(X64Emitter::R10, X64Emitter::R11),
                (F7_BASE, F3_AND) => em.and_r32_r32(X64Emitter::R10, X64Emitter::R11),
                (F7_BASE, F3_OR) => em.or_r32_r32(X64Emitter::R10, X64Emitter::R11),
                (F7_BASE, F3_XOR) => em.xor_r32_r32(X64Emitter::R10, X64Emitter::R11),
                (F7_BASE, F3_SLL) => {
                    em.mov_r32_r32(X64Emitter::RCX, X64Emitter::R11);
                    em.shl_r32_cl(X64Emitter::R10);
                }
                (F7_BASE, F3_SRL_SRA) => {
                    em.mov_r32_r32(X64Emitter::RCX, X64Emitter::R11);
                    em.shr_r32_cl(X64Emitter::R10);
                }
                (F7_SUB_SRA, F3_SRL_SRA) => {
                    em.mov_r32_r32(X64Emitter::RCX, X64Emitter::R11);
                    em.sar_r32_cl(X64Emitter::R10);
                }
                (F7_BASE, F3_SLT) => {
                    em.cmp_r32_r32(X64Emitter::R10, X64Emitter::R11);
                    em.setcc_al(Cc::L);
                    em.movzx_r32_r8(X64Emitter::R10, X64Emitter::RAX);
                }
                (F7_BASE, F3_SLTU) => {
                    em.cmp_r32_r32(X64Emitter::R10, X64Emitter::R11);
                    em.setcc_al(Cc::B);
                    em.movzx_r32_r8(X64Emitter::R10, X64Emitter::RAX);
                }
                #[cfg(feature = "m")]
                (F7_MULDIV, F3_ADD_SUB) => em.imul_r32_r32(X64Emitter::R10, X64Emitter::R11),
                _ => return None,
            }
            emit_store_xreg(em, rd, X64Emitter::R10);
            Some(EmitFlow::Continue)
        }
        OPCODE_LOAD => {
            let tramp = match decode::funct3(inst) {
                F3_LB | F3_LBU => jit_read_b as *const () as usize as u64,
                F3_LH | F3_LHU => jit_read_s as *const () as usize as u64,
                F3_LW => jit_read_w as *const () as usize as u64,
                _ => return None,
            };
            emit_load_xreg(em, X64Emitter::RSI, rs1);
            em.add_r32_imm32(X64Emitter::RSI, decode::imm_i(inst));
            em.mov_r64_r64(X64Emitter::RDI, X64Emitter::RBX);
            em.mov_r64_imm64(X64Emitter::RAX, tramp);
            em.call_rax();
            match decode::funct3(inst) {
                F3_LB => em.movsx_r32_r8(X64Emitter::RAX, X64Emitter::RAX),
                F3_LH => em.movsx_r32_r16(X64Emitter::RAX, X64Emitter::RAX),
                _ => {}
            }
            emit_store_xreg(em, rd, X64Emitter::RAX);
            emit_latch_check(em, pc.wrapping_add(4), emitted + 1);
            Some(EmitFlow::Continue)
        }
        OPCODE_STORE => {
            let tramp = match decode::funct3(inst) {
                F3_SB => jit_write_b as *const () as usize as u64,
                F3_SH => jit_write_s as *const () as usize as u64,
                F3_SW => jit_write_w as *const () as usize as u64,
                _ => return None,
            };
            emit_load_xreg(em, X64Emitter::RSI, rs1);
            em.add_r32_imm32(X64Emitter::RSI, decode::imm_s(inst));
            emit_load_xreg(em, X64Emitter::RDX, rs2);
            em.mov_r64_r64(X64Emitter::RDI, X64Emitter::RBX);
            em.mov_r64_imm64(X64Emitter::RAX, tramp);
            em.call_rax();
            emit_latch_check(em, pc.wrapping_add(4), emitted + 1);
            Some(EmitFlow::Continue)
        }
        OPCODE_JAL => {
            let target = pc.wrapping_add(decode::imm_j(inst) as u32);
            if target & 0x3 != 0 {
                // Let the interpreter latch the misalignment.
                return None;
            }
            if rd != 0 {
                em.mov_r32_imm32(X64Emitter::R10, pc.wrapping_add(4));
                emit_store_xreg(em, rd, X64Emitter::R10);
            }
            em.mov_r32_imm32(X64Emitter::RAX, target);
            Some(EmitFlow::Terminate)
        }
        OPCODE_JALR => {
            emit_load_xreg(em, X64Emitter::R10, rs1);
            em.add_r32_imm32(X64Emitter::R10, decode::imm_i(inst));
            em.and_r32_imm32(X64Emitter::R10, -2);
            if rd != 0 {
                em.mov_r32_imm32(X64Emitter::R11, pc.wrapping_add(4));
                emit_store_xreg(em, rd, X64Emitter::R11);
            }
            em.mov_r32_r32(X64Emitter::RAX, X64Emitter::R10);
            // The target is dynamic: latch misalignment at run time, then
            // store the PC either way, like the interpreter does.
            em.test_r32_imm32(X64Emitter::RAX, 0x3);
            let skip = em.jcc_short_fixup(Cc::E);
            em.mov_m32_imm32(
                X64Emitter::RBX,
                exc_disp(),
                Exception::InstMisaligned as u32,
            );
            em.patch_jcc_short(skip);
            Some(EmitFlow::Terminate)
        }
        OPCODE_BRANCH => {
            let taken = pc.wrapping_add(decode::imm_b(inst) as u32);
            if taken & 0x3 != 0 {
                return None;
            }
            let cc = match decode::funct3(inst) {
                F3_BEQ => Cc::E,
                F3_BNE => Cc::NE,
                F3_BLT => Cc::L,
                F3_BGE => Cc::GE,
                F3_BLTU => Cc::B,
                F3_BGEU => Cc::AE,
                _ => return None,
            };
            emit_load_xreg(em, X64Emitter::R10, rs1);
            emit_load_xreg(em, X64Emitter::R11, rs2);
            // Immediates before the compare: a zero immediate folds to an
            // xor, which would clobber the flags.
            em.mov_r32_imm32(X64Emitter::RAX, taken);
            em.mov_r32_imm32(X64Emitter::RDX, pc.wrapping_add(4));
            em.cmp_r32_r32(X64Emitter::R10, X64Emitter::R11);
            em.cmovcc_r32_r32(X64Emitter::RDX, X64Emitter::RAX, cc);
            em.mov_r32_r32(X64Emitter::RAX, X64Emitter::RDX);
            Some(EmitFlow::Terminate)
        }
        #[cfg(feature = "zifencei")]
        OPCODE_MISC_MEM => match decode::funct3(inst) {
            F3_FENCE | F3_FENCE_I => Some(EmitFlow::Continue),
            _ => None,
        },
        OPCODE_SYSTEM => {
            if decode::funct3(inst) != F3_SYSTEM {
                // CSR instructions fall back to the interpreter.
                return None;
            }
            let imm = decode::csr(inst);
            if imm != IMM_ECALL && imm != IMM_EBREAK {
                return None;
            }
            em.mov_r64_r64(X64Emitter::RDI, X64Emitter::RBX);
            em.mov_r32_imm32(X64Emitter::RSI, pc);
            em.mov_r32_imm32(X64Emitter::RDX, inst);
            em.mov_r64_imm64(
                X64Emitter::RAX,
                jit_system as *const () as usize as u64,
            );
            em.call_rax();
            Some(EmitFlow::TerminateHelper)
        }
        _ => None,
    }
}

impl Cpu {
    fn translate_block(&mut self) -> Option<Block> {
        let start_pc = self.pc;
        let mut pc = start_pc;
        let mut emitted = 0u32;
        let mut flow = EmitFlow::Continue;
        let mut em = X64Emitter::new();

        // Prologue: park the guest state pointer in a callee-saved register.
        // With a single push, RSP is 16-byte aligned at every call below.
        em.push_r64(X64Emitter::RBX);
        em.mov_r64_r64(X64Emitter::RBX, X64Emitter::RDI);

        while emitted < MAX_BLOCK_INSTRS {
            let ifetch = self.io.mem_ifetch;
            let inst = ifetch(self, pc);
            let Some(step) = emit_instr(&mut em, pc, inst, emitted) else {
                break;
            };
            pc = pc.wrapping_add(4);
            emitted += 1;
            flow = step;
            if flow != EmitFlow::Continue {
                break;
            }
        }

        if emitted == 0 {
            return None;
        }

        match flow {
            // Ran off the end of the window: fall through sequentially.
            EmitFlow::Continue => em.mov_m32_imm32(X64Emitter::RBX, pc_disp(), pc),
            EmitFlow::Terminate => em.mov_m32_r32(X64Emitter::RBX, pc_disp(), X64Emitter::RAX),
            EmitFlow::TerminateHelper => {}
        }
        em.add_m64_imm32(X64Emitter::RBX, cycle_disp(), emitted as i32);
        em.patch_exit_jumps();
        em.pop_r64(X64Emitter::RBX);
        em.ret();

        let code = em.finish();
        let block = self.jit.insert(start_pc, &code, pc, emitted)?;
        if self.jit.trace {
            eprintln!(
                "jit-x64: compiled pc={:#010x}..{:#010x} instrs={} bytes={}",
                start_pc,
                block.pc_end,
                block.instrs,
                code.len()
            );
        }
        Some(block)
    }

    pub(super) fn try_run_block(&mut self, target: u64) -> bool {
        if !self.jit.enabled {
            return false;
        }
        let start_pc = self.pc;
        let block = match self.jit.lookup(start_pc) {
            Some(block) => block,
            None => {
                if self.jit.is_failed(start_pc) {
                    return false;
                }
                match self.translate_block() {
                    Some(block) => block,
                    None => {
                        if self.jit.trace {
                            eprintln!("jit-x64: refused pc={:#010x}", start_pc);
                        }
                        self.jit.mark_failed(start_pc);
                        return false;
                    }
                }
            }
        };
        // A block is atomic with respect to the cycle budget: run it only
        // when the whole thing fits, otherwise interpret this quantum.
        if u64::from(block.instrs) > target.saturating_sub(self.csr_cycle) {
            return false;
        }
        let Some(entry) = self.jit.entry_ptr(block.offset) else {
            return false;
        };
        // SAFETY: entry points at a completed translation in executable
        // memory. The block reads and writes guest state only through the
        // pointer passed here and returns to us; trampolines reconstruct a
        // unique &mut while no other reference is live.
        let func: BlockFn = unsafe { std::mem::transmute(entry) };
        unsafe { func(self as *mut Cpu) };
        self.x[REG_ZERO] = 0;
        true
    }
}

unsafe extern "C" fn jit_read_b(cpu: *mut Cpu, addr: u32) -> u32 {
    // SAFETY: generated code passes the state pointer its block was entered
    // with; no other reference is live while the block runs.
    let rv = unsafe { &mut *cpu };
    let read = rv.io.mem_read_b;
    read(rv, addr) as u32
}

unsafe extern "C" fn jit_read_s(cpu: *mut Cpu, addr: u32) -> u32 {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    let read = rv.io.mem_read_s;
    read(rv, addr) as u32
}

unsafe extern "C" fn jit_read_w(cpu: *mut Cpu, addr: u32) -> u32 {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    let read = rv.io.mem_read_w;
    read(rv, addr)
}

unsafe extern "C" fn jit_write_b(cpu: *mut Cpu, addr: u32, val: u32) {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    let write = rv.io.mem_write_b;
    write(rv, addr, val as u8);
}

unsafe extern "C" fn jit_write_s(cpu: *mut Cpu, addr: u32, val: u32) {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    let write = rv.io.mem_write_s;
    write(rv, addr, val as u16);
}

unsafe extern "C" fn jit_write_w(cpu: *mut Cpu, addr: u32, val: u32) {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    let write = rv.io.mem_write_w;
    write(rv, addr, val);
}

unsafe extern "C" fn jit_system(cpu: *mut Cpu, pc: u32, inst: u32) {
    // SAFETY: as above.
    let rv = unsafe { &mut *cpu };
    // Resync the guest PC, then run the interpreter's SYSTEM handler so
    // ECALL and EBREAK behave identically in both tiers.
    rv.pc = pc;
    exec::op_system(rv, inst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mov_zero_folds_to_xor() {
        let mut em = X64Emitter::new();
        em.mov_r32_imm32(X64Emitter::RAX, 0);
        assert_eq!(em.bytes, [0x31, 0xC0]);
    }

    #[test]
    fn mov_nonzero_is_plain_mov() {
        let mut em = X64Emitter::new();
        em.mov_r32_imm32(X64Emitter::RAX, 5);
        assert_eq!(em.bytes, [0xB8, 5, 0, 0, 0]);
    }

    #[test]
    fn add_zero_elided() {
        let mut em = X64Emitter::new();
        em.add_r32_imm32(X64Emitter::RAX, 0);
        em.or_r32_imm32(X64Emitter::RDX, 0);
        em.xor_r32_imm32(X64Emitter::RCX, 0);
        assert!(em.bytes.is_empty());
    }

    #[test]
    fn shift_zero_elided() {
        let mut em = X64Emitter::new();
        em.shl_r32_imm8(X64Emitter::RAX, 0);
        em.shr_r32_imm8(X64Emitter::RAX, 0);
        em.sar_r32_imm8(X64Emitter::RAX, 0);
        assert!(em.bytes.is_empty());
    }

    #[test]
    fn and_zero_folds_to_xor() {
        let mut em = X64Emitter::new();
        em.and_r32_imm32(X64Emitter::RCX, 0);
        assert_eq!(em.bytes, [0x31, 0xC9]);
    }

    #[test]
    fn x0_reads_fold_to_xor_and_writes_vanish() {
        let mut em = X64Emitter::new();
        emit_load_xreg(&mut em, X64Emitter::RAX, 0);
        assert_eq!(em.bytes, [0x31, 0xC0]);
        let before = em.bytes.len();
        emit_store_xreg(&mut em, 0, X64Emitter::RAX);
        assert_eq!(em.bytes.len(), before);
    }

    #[test]
    fn extended_regs_get_rex() {
        let mut em = X64Emitter::new();
        em.mov_r32_m32(X64Emitter::R10, X64Emitter::RBX, 8);
        assert_eq!(em.bytes, [0x44, 0x8B, 0x93, 8, 0, 0, 0]);
    }

    #[test]
    fn exit_jumps_land_on_epilogue() {
        let mut em = X64Emitter::new();
        em.jmp_exit();
        em.emit_u8(0x90);
        em.patch_exit_jumps();
        em.ret();
        // E9 rel32 over one nop: displacement 1.
        assert_eq!(em.bytes[..6], [0xE9, 1, 0, 0, 0, 0x90]);
    }
}
