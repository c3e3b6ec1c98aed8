//! Interpreter: one handler per major opcode, dispatched through a fixed
//! 32-slot table indexed by instr[6:2]. A handler decodes, executes,
//! advances PC and reports whether the next instruction is sequential.

use super::*;
use crate::decode;
use crate::isa::*;

pub(super) type OpFn = fn(&mut Cpu, u32) -> bool;

#[cfg(feature = "f")]
const OP_LOAD_FP: Option<OpFn> = Some(fp::op_load_fp as OpFn);
#[cfg(not(feature = "f"))]
const OP_LOAD_FP: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_STORE_FP: Option<OpFn> = Some(fp::op_store_fp as OpFn);
#[cfg(not(feature = "f"))]
const OP_STORE_FP: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_FP: Option<OpFn> = Some(fp::op_fp as OpFn);
#[cfg(not(feature = "f"))]
const OP_FP: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_MADD: Option<OpFn> = Some(fp::op_madd as OpFn);
#[cfg(not(feature = "f"))]
const OP_MADD: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_MSUB: Option<OpFn> = Some(fp::op_msub as OpFn);
#[cfg(not(feature = "f"))]
const OP_MSUB: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_NMSUB: Option<OpFn> = Some(fp::op_nmsub as OpFn);
#[cfg(not(feature = "f"))]
const OP_NMSUB: Option<OpFn> = None;

#[cfg(feature = "f")]
const OP_NMADD: Option<OpFn> = Some(fp::op_nmadd as OpFn);
#[cfg(not(feature = "f"))]
const OP_NMADD: Option<OpFn> = None;

#[cfg(feature = "a")]
const OP_AMO: Option<OpFn> = Some(op_amo as OpFn);
#[cfg(not(feature = "a"))]
const OP_AMO: Option<OpFn> = None;

#[cfg(feature = "zifencei")]
const OP_MISC_MEM: Option<OpFn> = Some(op_misc_mem as OpFn);
#[cfg(not(feature = "zifencei"))]
const OP_MISC_MEM: Option<OpFn> = None;

// Opcode dispatch table, indexed by instr[6:2]. Empty slots are illegal.
#[rustfmt::skip]
pub(super) const OPCODES: [Option<OpFn>; 32] = [
    //  000                     001          010                       011
    Some(op_load as OpFn),      OP_LOAD_FP,  None,                     OP_MISC_MEM,  // 00
    Some(op_op_imm as OpFn),    Some(op_auipc as OpFn), None,          None,
    Some(op_store as OpFn),     OP_STORE_FP, None,                     OP_AMO,       // 01
    Some(op_op as OpFn),        Some(op_lui as OpFn),   None,          None,
    OP_MADD,                    OP_MSUB,     OP_NMSUB,                 OP_NMADD,     // 10
    OP_FP,                      None,        None,                     None,
    Some(op_branch as OpFn),    Some(op_jalr as OpFn),  None,          Some(op_jal as OpFn), // 11
    Some(op_system as OpFn),    None,        None,                     None,
];

pub(super) fn illegal(rv: &mut Cpu) -> bool {
    rv.exception = Exception::IllegalInst;
    false
}

fn op_load(rv: &mut Cpu, inst: u32) -> bool {
    let imm = decode::imm_i(inst);
    let rs1 = decode::rs1(inst);
    let funct3 = decode::funct3(inst);
    let rd = decode::rd(inst);
    let addr = rv.x[rs1 as usize].wrapping_add(imm as u32);
    let io = rv.io;
    let val = match funct3 {
        F3_LB => (io.mem_read_b)(rv, addr) as i8 as i32 as u32,
        F3_LH => (io.mem_read_s)(rv, addr) as i16 as i32 as u32,
        F3_LW => (io.mem_read_w)(rv, addr),
        F3_LBU => (io.mem_read_b)(rv, addr) as u32,
        F3_LHU => (io.mem_read_s)(rv, addr) as u32,
        _ => return illegal(rv),
    };
    rv.set_rd(rd, val);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

fn op_store(rv: &mut Cpu, inst: u32) -> bool {
    let imm = decode::imm_s(inst);
    let rs1 = decode::rs1(inst);
    let rs2 = decode::rs2(inst);
    let addr = rv.x[rs1 as usize].wrapping_add(imm as u32);
    let data = rv.x[rs2 as usize];
    let io = rv.io;
    match decode::funct3(inst) {
        F3_SB => (io.mem_write_b)(rv, addr, data as u8),
        F3_SH => (io.mem_write_s)(rv, addr, data as u16),
        F3_SW => (io.mem_write_w)(rv, addr, data),
        _ => return illegal(rv),
    }
    rv.pc = rv.pc.wrapping_add(4);
    true
}

fn op_op_imm(rv: &mut Cpu, inst: u32) -> bool {
    let imm = decode::imm_i(inst);
    let rd = decode::rd(inst);
    let a = rv.x[decode::rs1(inst) as usize];
    let shamt = (imm & 0x1f) as u32;
    let val = match decode::funct3(inst) {
        F3_ADD_SUB => a.wrapping_add(imm as u32),
        F3_SLL => {
            if decode::funct7(inst) != F7_BASE {
                return illegal(rv);
            }
            a << shamt
        }
        F3_SLT => (((a as i32) < imm) as u32),
        F3_SLTU => ((a < imm as u32) as u32),
        F3_XOR => a ^ imm as u32,
        F3_SRL_SRA => match decode::funct7(inst) {
            F7_BASE => a >> shamt,
            F7_SUB_SRA => ((a as i32) >> shamt) as u32,
            _ => return illegal(rv),
        },
        F3_OR => a | imm as u32,
        _ => a & imm as u32, // ANDI
    };
    rv.set_rd(rd, val);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

fn op_op(rv: &mut Cpu, inst: u32) -> bool {
    let rd = decode::rd(inst);
    let funct3 = decode::funct3(inst);
    let a = rv.x[decode::rs1(inst) as usize];
    let b = rv.x[decode::rs2(inst) as usize];
    let val = match (decode::funct7(inst), funct3) {
        (F7_BASE, F3_ADD_SUB) => a.wrapping_add(b),
        (F7_BASE, F3_SLL) => a << (b & 0x1f),
        (F7_BASE, F3_SLT) => ((a as i32) < (b as i32)) as u32,
        (F7_BASE, F3_SLTU) => (a < b) as u32,
        (F7_BASE, F3_XOR) => a ^ b,
        (F7_BASE, F3_SRL_SRA) => a >> (b & 0x1f),
        (F7_BASE, F3_OR) => a | b,
        (F7_BASE, F3_AND) => a & b,
        (F7_SUB_SRA, F3_ADD_SUB) => a.wrapping_sub(b),
        (F7_SUB_SRA, F3_SRL_SRA) => ((a as i32) >> (b & 0x1f)) as u32,
        #[cfg(feature = "m")]
        (F7_MULDIV, _) => mul_div(a, b, funct3),
        _ => return illegal(rv),
    };
    rv.set_rd(rd, val);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

#[cfg(feature = "m")]
fn mul_div(a: u32, b: u32, funct3: u32) -> u32 {
    match funct3 {
        // MUL: low 32 of signed * signed
        F3_ADD_SUB => a.wrapping_mul(b),
        // MULH: high 32 of signed * signed
        F3_SLL => (((a as i32 as i64).wrapping_mul(b as i32 as i64) as u64) >> 32) as u32,
        // MULHSU: high 32 of signed * unsigned
        F3_SLT => (((a as i32 as i64).wrapping_mul(b as i64) as u64) >> 32) as u32,
        // MULHU: high 32 of unsigned * unsigned
        F3_SLTU => (((a as u64) * (b as u64)) >> 32) as u32,
        // DIV
        F3_XOR => {
            let n = a as i32;
            let d = b as i32;
            if d == 0 {
                u32::MAX
            } else if n == i32::MIN && d == -1 {
                a
            } else {
                (n / d) as u32
            }
        }
        // DIVU
        F3_SRL_SRA => {
            if b == 0 {
                u32::MAX
            } else {
                a / b
            }
        }
        // REM
        F3_OR => {
            let n = a as i32;
            let d = b as i32;
            if d == 0 {
                a
            } else if n == i32::MIN && d == -1 {
                0
            } else {
                (n % d) as u32
            }
        }
        // REMU
        _ => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
    }
}

fn op_lui(rv: &mut Cpu, inst: u32) -> bool {
    rv.set_rd(decode::rd(inst), decode::imm_u(inst));
    rv.pc = rv.pc.wrapping_add(4);
    true
}

fn op_auipc(rv: &mut Cpu, inst: u32) -> bool {
    rv.set_rd(decode::rd(inst), decode::imm_u(inst).wrapping_add(rv.pc));
    rv.pc = rv.pc.wrapping_add(4);
    true
}

fn op_branch(rv: &mut Cpu, inst: u32) -> bool {
    let a = rv.x[decode::rs1(inst) as usize];
    let b = rv.x[decode::rs2(inst) as usize];
    let taken = match decode::funct3(inst) {
        F3_BEQ => a == b,
        F3_BNE => a != b,
        F3_BLT => (a as i32) < (b as i32),
        F3_BGE => (a as i32) >= (b as i32),
        F3_BLTU => a < b,
        F3_BGEU => a >= b,
        _ => return illegal(rv),
    };
    if taken {
        rv.pc = rv.pc.wrapping_add(decode::imm_b(inst) as u32);
        rv.check_pc_align();
    } else {
        rv.pc = rv.pc.wrapping_add(4);
    }
    false
}

fn op_jal(rv: &mut Cpu, inst: u32) -> bool {
    let ra = rv.pc.wrapping_add(4);
    rv.pc = rv.pc.wrapping_add(decode::imm_j(inst) as u32);
    rv.set_rd(decode::rd(inst), ra);
    rv.check_pc_align();
    false
}

fn op_jalr(rv: &mut Cpu, inst: u32) -> bool {
    let ra = rv.pc.wrapping_add(4);
    let base = rv.x[decode::rs1(inst) as usize];
    rv.pc = base.wrapping_add(decode::imm_i(inst) as u32) & !1;
    rv.set_rd(decode::rd(inst), ra);
    rv.check_pc_align();
    false
}

// Also invoked from translated blocks for ECALL/EBREAK terminators, so the
// JIT stays bit-identical to the interpreter for environment calls.
pub(super) fn op_system(rv: &mut Cpu, inst: u32) -> bool {
    match decode::funct3(inst) {
        F3_SYSTEM => match decode::csr(inst) {
            IMM_ECALL => {
                let cb = rv.io.on_ecall;
                let pc = rv.pc;
                cb(rv, pc, inst);
            }
            IMM_EBREAK => {
                let cb = rv.io.on_ebreak;
                let pc = rv.pc;
                cb(rv, pc, inst);
            }
            _ => return illegal(rv),
        },
        #[cfg(feature = "zicsr")]
        F3_CSRRW => {
            let val = rv.x[decode::rs1(inst) as usize];
            let old = rv.csrrw(decode::csr(inst), val);
            rv.set_rd(decode::rd(inst), old);
        }
        #[cfg(feature = "zicsr")]
        F3_CSRRS => {
            let mask = rv.x[decode::rs1(inst) as usize];
            let old = rv.csrrs(decode::csr(inst), mask);
            rv.set_rd(decode::rd(inst), old);
        }
        #[cfg(feature = "zicsr")]
        F3_CSRRC => {
            let mask = rv.x[decode::rs1(inst) as usize];
            let old = rv.csrrc(decode::csr(inst), mask);
            rv.set_rd(decode::rd(inst), old);
        }
        #[cfg(feature = "zicsr")]
        F3_CSRRWI => {
            let old = rv.csrrw(decode::csr(inst), decode::rs1(inst));
            rv.set_rd(decode::rd(inst), old);
        }
        #[cfg(feature = "zicsr")]
        F3_CSRRSI => {
            let old = rv.csrrs(decode::csr(inst), decode::rs1(inst));
            rv.set_rd(decode::rd(inst), old);
        }
        #[cfg(feature = "zicsr")]
        F3_CSRRCI => {
            let old = rv.csrrc(decode::csr(inst), decode::rs1(inst));
            rv.set_rd(decode::rd(inst), old);
        }
        _ => return illegal(rv),
    }
    rv.pc = rv.pc.wrapping_add(4);
    true
}

#[cfg(feature = "zifencei")]
fn op_misc_mem(rv: &mut Cpu, inst: u32) -> bool {
    match decode::funct3(inst) {
        // Single hart, no caches to order: both fences retire as no-ops.
        F3_FENCE | F3_FENCE_I => {
            rv.pc = rv.pc.wrapping_add(4);
            true
        }
        _ => illegal(rv),
    }
}

#[cfg(feature = "a")]
fn op_amo(rv: &mut Cpu, inst: u32) -> bool {
    let rd = decode::rd(inst);
    let rs1 = decode::rs1(inst);
    let rs2 = decode::rs2(inst);
    // funct7 low bits are aq/rl; meaningless on a single hart.
    let funct5 = decode::funct7(inst) >> 2;
    if decode::funct3(inst) != F3_AMO_W {
        return illegal(rv);
    }
    let addr = rv.x[rs1 as usize];
    let src = rv.x[rs2 as usize];
    let io = rv.io;
    let old = match funct5 {
        // No reservation set is tracked: LR is a plain load and SC always
        // reports success.
        F5_LR => (io.mem_read_w)(rv, addr),
        F5_SC => {
            (io.mem_write_w)(rv, addr, src);
            0
        }
        F5_AMOSWAP => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, src);
            old
        }
        F5_AMOADD => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old.wrapping_add(src));
            old
        }
        F5_AMOXOR => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old ^ src);
            old
        }
        F5_AMOAND => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old & src);
            old
        }
        F5_AMOOR => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old | src);
            old
        }
        F5_AMOMIN => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, (old as i32).min(src as i32) as u32);
            old
        }
        F5_AMOMAX => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, (old as i32).max(src as i32) as u32);
            old
        }
        F5_AMOMINU => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old.min(src));
            old
        }
        F5_AMOMAXU => {
            let old = (io.mem_read_w)(rv, addr);
            (io.mem_write_w)(rv, addr, old.max(src));
            old
        }
        _ => return illegal(rv),
    };
    rv.set_rd(rd, old);
    rv.pc = rv.pc.wrapping_add(4);
    true
}
