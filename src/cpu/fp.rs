//! F extension: single-precision loads/stores, arithmetic, sign injection,
//! compares, conversions, bit-exact moves and FCLASS. The rounding-mode
//! field is decoded but the host default is used.

use super::exec::illegal;
use super::*;
use crate::decode;
use crate::isa::*;

pub(super) fn op_load_fp(rv: &mut Cpu, inst: u32) -> bool {
    if decode::funct3(inst) != F3_FPW {
        return illegal(rv);
    }
    let addr = rv.x[decode::rs1(inst) as usize].wrapping_add(decode::imm_i(inst) as u32);
    let io = rv.io;
    let data = (io.mem_read_w)(rv, addr);
    rv.f[decode::rd(inst) as usize] = f32::from_bits(data);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

pub(super) fn op_store_fp(rv: &mut Cpu, inst: u32) -> bool {
    if decode::funct3(inst) != F3_FPW {
        return illegal(rv);
    }
    let addr = rv.x[decode::rs1(inst) as usize].wrapping_add(decode::imm_s(inst) as u32);
    let data = rv.f[decode::rs2(inst) as usize].to_bits();
    let io = rv.io;
    (io.mem_write_w)(rv, addr, data);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

pub(super) fn op_fp(rv: &mut Cpu, inst: u32) -> bool {
    let rd = decode::rd(inst);
    let rs1 = decode::rs1(inst) as usize;
    let rs2 = decode::rs2(inst) as usize;
    // funct3 doubles as the rounding mode for the arithmetic group.
    let rm = decode::funct3(inst);
    match decode::funct7(inst) {
        F7_FADD => rv.f[rd as usize] = rv.f[rs1] + rv.f[rs2],
        F7_FSUB => rv.f[rd as usize] = rv.f[rs1] - rv.f[rs2],
        F7_FMUL => rv.f[rd as usize] = rv.f[rs1] * rv.f[rs2],
        F7_FDIV => rv.f[rd as usize] = rv.f[rs1] / rv.f[rs2],
        F7_FSQRT => {
            if rs2 != 0 {
                return illegal(rv);
            }
            rv.f[rd as usize] = rv.f[rs1].sqrt();
        }
        F7_FSGNJ => {
            // Sign injection works on the raw encodings, not the values.
            let f1 = rv.f[rs1].to_bits();
            let f2 = rv.f[rs2].to_bits();
            let bits = match rm {
                0b000 => (f1 & !FMASK_SIGN) | (f2 & FMASK_SIGN),
                0b001 => (f1 & !FMASK_SIGN) | (!f2 & FMASK_SIGN),
                0b010 => f1 ^ (f2 & FMASK_SIGN),
                _ => return illegal(rv),
            };
            rv.f[rd as usize] = f32::from_bits(bits);
        }
        F7_FMINMAX => match rm {
            0b000 => rv.f[rd as usize] = rv.f[rs1].min(rv.f[rs2]),
            0b001 => rv.f[rd as usize] = rv.f[rs1].max(rv.f[rs2]),
            _ => return illegal(rv),
        },
        F7_FCMP => {
            let val = match rm {
                0b010 => rv.f[rs1] == rv.f[rs2],
                0b001 => rv.f[rs1] < rv.f[rs2],
                0b000 => rv.f[rs1] <= rv.f[rs2],
                _ => return illegal(rv),
            };
            rv.set_rd(rd, val as u32);
        }
        F7_FCVT_W_S => match rs2 {
            0b00000 => rv.set_rd(rd, rv.f[rs1] as i32 as u32),
            0b00001 => rv.set_rd(rd, rv.f[rs1] as u32),
            _ => return illegal(rv),
        },
        F7_FCVT_S_W => match rs2 {
            0b00000 => rv.f[rd as usize] = rv.x[rs1] as i32 as f32,
            0b00001 => rv.f[rd as usize] = rv.x[rs1] as f32,
            _ => return illegal(rv),
        },
        F7_FMV_X_W => match rm {
            // Bit-exact copy between the register files.
            0b000 => rv.set_rd(rd, rv.f[rs1].to_bits()),
            0b001 => rv.set_rd(rd, fclass(rv.f[rs1].to_bits())),
            _ => return illegal(rv),
        },
        F7_FMV_W_X => {
            if rm != 0 {
                return illegal(rv);
            }
            rv.f[rd as usize] = f32::from_bits(rv.x[rs1]);
        }
        _ => return illegal(rv),
    }
    rv.pc = rv.pc.wrapping_add(4);
    true
}

/// FCLASS.S bit mask. Exactly one bit is set for any input encoding.
pub(super) fn fclass(bits: u32) -> u32 {
    let sign = bits & FMASK_SIGN != 0;
    let expn = bits & FMASK_EXPN;
    let frac = bits & FMASK_FRAC;
    if expn == FMASK_EXPN {
        if frac == 0 {
            if sign {
                0x001 // -INF
            } else {
                0x080 // +INF
            }
        } else if frac & FFRAC_QUIET != 0 {
            0x200 // quiet NaN
        } else {
            0x100 // signaling NaN
        }
    } else if expn == 0 {
        match (frac, sign) {
            (0, true) => 0x008,  // -0
            (0, false) => 0x010, // +0
            (_, true) => 0x004,  // negative subnormal
            (_, false) => 0x020, // positive subnormal
        }
    } else if sign {
        0x002 // negative normal
    } else {
        0x040 // positive normal
    }
}

pub(super) fn op_madd(rv: &mut Cpu, inst: u32) -> bool {
    let (rd, a, b, c) = r4_operands(rv, inst);
    rv.f[rd] = a.mul_add(b, c);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

pub(super) fn op_msub(rv: &mut Cpu, inst: u32) -> bool {
    let (rd, a, b, c) = r4_operands(rv, inst);
    rv.f[rd] = a.mul_add(b, -c);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

pub(super) fn op_nmsub(rv: &mut Cpu, inst: u32) -> bool {
    let (rd, a, b, c) = r4_operands(rv, inst);
    rv.f[rd] = (-a).mul_add(b, c);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

pub(super) fn op_nmadd(rv: &mut Cpu, inst: u32) -> bool {
    let (rd, a, b, c) = r4_operands(rv, inst);
    rv.f[rd] = (-a).mul_add(b, -c);
    rv.pc = rv.pc.wrapping_add(4);
    true
}

#[inline]
fn r4_operands(rv: &Cpu, inst: u32) -> (usize, f32, f32, f32) {
    (
        decode::rd(inst) as usize,
        rv.f[decode::rs1(inst) as usize],
        rv.f[decode::rs2(inst) as usize],
        rv.f[decode::rs3(inst) as usize],
    )
}
