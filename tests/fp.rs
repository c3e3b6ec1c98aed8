//! F extension scenarios: bit-exact moves, classification, sign injection,
//! compares, conversions and the fused multiply-add family.

#![cfg(feature = "f")]

mod common;

use common::*;
use rv32vm::{Exception, JitConfig};

fn run(prog: &[u32]) -> Vm {
    let mut vm = vm(prog);
    vm.cpu.step(1000);
    assert_eq!(vm.cpu.exception(), Exception::Ecall);
    vm
}

#[test]
fn fmv_round_trip_preserves_bits() {
    // Including NaN payloads in both quiet and signaling space.
    for bits in [
        0x0000_0000u32,
        0x8000_0000,
        0x3F80_0000,
        0x7F80_0001,
        0x7FC0_DEAD,
        0xFFC0_0001,
        0x0000_0001,
        0xFF80_0000,
    ] {
        let mut prog = li(1, bits);
        prog.push(fmv_w_x(1, 1));
        prog.push(fmv_x_w(2, 1));
        prog.push(ecall());
        let vm = run(&prog);
        assert_eq!(vm.cpu.x(2), bits, "bits={bits:#010x}");
        assert_eq!(vm.cpu.f(1).to_bits(), bits);
    }
}

#[test]
fn fclass_encodings() {
    let cases = [
        (0xFF80_0000u32, 0x001u32), // -inf
        (0xBF80_0000, 0x002),       // negative normal
        (0x8000_0001, 0x004),       // negative subnormal
        (0x8000_0000, 0x008),       // -0
        (0x0000_0000, 0x010),       // +0
        (0x0000_0001, 0x020),       // positive subnormal
        (0x3F80_0000, 0x040),       // positive normal
        (0x7F80_0000, 0x080),       // +inf
        (0x7F80_0001, 0x100),       // signaling NaN: top fraction bit clear
        (0x7FC0_0000, 0x200),       // quiet NaN
        (0xFFC0_0001, 0x200),       // quiet NaN, sign ignored
    ];
    for (bits, expect) in cases {
        let mut prog = li(1, bits);
        prog.push(fmv_w_x(1, 1));
        prog.push(fclass(2, 1));
        prog.push(ecall());
        let vm = run(&prog);
        assert_eq!(vm.cpu.x(2), expect, "bits={bits:#010x}");
    }
}

#[test]
fn fclass_is_exactly_one_bit_for_any_pattern() {
    let mut bits = 0x1234_5678u32;
    for _ in 0..512 {
        bits = bits.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let mut prog = li(1, bits);
        prog.push(fmv_w_x(1, 1));
        prog.push(fclass(2, 1));
        prog.push(ecall());
        let mut vm = vm_with(
            0,
            &prog,
            JitConfig {
                enabled: false,
                ..Default::default()
            },
        );
        vm.cpu.step(100);
        let mask = vm.cpu.x(2);
        assert_eq!(mask.count_ones(), 1, "bits={bits:#010x} mask={mask:#x}");
    }
}

#[test]
fn arithmetic_and_sqrt() {
    let mut prog = li(1, 1.5f32.to_bits());
    prog.extend(li(2, 2.25f32.to_bits()));
    prog.extend(li(8, 4.0f32.to_bits()));
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fmv_w_x(8, 8));
    prog.push(fop(0b0000000, 3, 1, 2, 0)); // fadd
    prog.push(fop(0b0000100, 4, 1, 2, 0)); // fsub
    prog.push(fop(0b0001000, 5, 1, 2, 0)); // fmul
    prog.push(fop(0b0001100, 6, 1, 2, 0)); // fdiv
    prog.push(fop(0b0101100, 7, 8, 0, 0)); // fsqrt
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.f(3), 3.75);
    assert_eq!(vm.cpu.f(4), -0.75);
    assert_eq!(vm.cpu.f(5), 3.375);
    assert_eq!(vm.cpu.f(6), 1.5 / 2.25);
    assert_eq!(vm.cpu.f(7), 2.0);
}

#[test]
fn min_max() {
    let mut prog = li(1, 1.5f32.to_bits());
    prog.extend(li(2, (-2.0f32).to_bits()));
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fop(0b0010100, 3, 1, 2, 0)); // fmin
    prog.push(fop(0b0010100, 4, 1, 2, 1)); // fmax
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.f(3), -2.0);
    assert_eq!(vm.cpu.f(4), 1.5);
}

#[test]
fn sign_injection_is_bit_level() {
    let mut prog = li(1, 1.5f32.to_bits());
    prog.extend(li(2, (-2.0f32).to_bits()));
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fop(0b0010000, 3, 1, 2, 0)); // fsgnj
    prog.push(fop(0b0010000, 4, 1, 2, 1)); // fsgnjn
    prog.push(fop(0b0010000, 5, 1, 2, 2)); // fsgnjx
    // NaN bits pass through untouched apart from the sign.
    prog.extend(li(6, 0x7FC0_1234));
    prog.push(fmv_w_x(6, 6));
    prog.push(fop(0b0010000, 7, 6, 2, 0));
    prog.push(fmv_x_w(8, 7));
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.f(3), -1.5);
    assert_eq!(vm.cpu.f(4), 1.5);
    assert_eq!(vm.cpu.f(5), -1.5);
    assert_eq!(vm.cpu.x(8), 0xFFC0_1234);
}

#[test]
fn compares_produce_flags_in_x() {
    let mut prog = li(1, 1.5f32.to_bits());
    prog.extend(li(2, 2.25f32.to_bits()));
    prog.extend(li(3, 0x7FC0_0000)); // qNaN
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fmv_w_x(3, 3));
    prog.push(fop(0b1010000, 10, 1, 2, 2)); // feq
    prog.push(fop(0b1010000, 11, 1, 2, 1)); // flt
    prog.push(fop(0b1010000, 12, 1, 2, 0)); // fle
    prog.push(fop(0b1010000, 13, 1, 1, 2)); // feq self
    prog.push(fop(0b1010000, 14, 1, 3, 1)); // flt vs NaN
    prog.push(fop(0b1010000, 15, 3, 3, 2)); // feq NaN NaN
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.x(10), 0);
    assert_eq!(vm.cpu.x(11), 1);
    assert_eq!(vm.cpu.x(12), 1);
    assert_eq!(vm.cpu.x(13), 1);
    assert_eq!(vm.cpu.x(14), 0);
    assert_eq!(vm.cpu.x(15), 0);
}

#[test]
fn conversions() {
    let mut prog = li(1, (-1.5f32).to_bits());
    prog.extend(li(2, 3.75f32.to_bits()));
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fop(0b1100000, 10, 1, 0, 0)); // fcvt.w.s: trunc toward zero
    prog.push(fop(0b1100000, 11, 2, 0, 0));
    prog.push(fop(0b1100000, 12, 2, 1, 0)); // fcvt.wu.s
    prog.push(addi(5, 0, -5));
    prog.push(fop(0b1101000, 3, 5, 0, 0)); // fcvt.s.w
    prog.extend(li(6, 0xFFFF_FFFF));
    prog.push(fop(0b1101000, 4, 6, 1, 0)); // fcvt.s.wu
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.x(10), (-1i32) as u32);
    assert_eq!(vm.cpu.x(11), 3);
    assert_eq!(vm.cpu.x(12), 3);
    assert_eq!(vm.cpu.f(3), -5.0);
    assert_eq!(vm.cpu.f(4), 4_294_967_296.0);
}

#[test]
fn fused_multiply_add_family() {
    let mut prog = li(1, 2.0f32.to_bits());
    prog.extend(li(2, 3.0f32.to_bits()));
    prog.extend(li(3, 4.0f32.to_bits()));
    prog.push(fmv_w_x(1, 1));
    prog.push(fmv_w_x(2, 2));
    prog.push(fmv_w_x(3, 3));
    prog.push(rv_r4(3, 2, 1, 0, 4, 0b1000011)); // fmadd: 2*3+4
    prog.push(rv_r4(3, 2, 1, 0, 5, 0b1000111)); // fmsub: 2*3-4
    prog.push(rv_r4(3, 2, 1, 0, 6, 0b1001011)); // fnmsub: -(2*3)+4
    prog.push(rv_r4(3, 2, 1, 0, 7, 0b1001111)); // fnmadd: -(2*3)-4
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.f(4), 10.0);
    assert_eq!(vm.cpu.f(5), 2.0);
    assert_eq!(vm.cpu.f(6), -2.0);
    assert_eq!(vm.cpu.f(7), -10.0);
}

#[test]
fn flw_fsw_round_trip_through_memory() {
    let bits = 0x7FC0_BEEF; // NaN payload survives the round trip
    let mut prog = li(1, bits);
    prog.push(addi(2, 0, 0x300));
    prog.push(sw(1, 2, 0));
    prog.push(flw(1, 2, 0));
    prog.push(fsw(1, 2, 4));
    prog.push(ecall());
    let vm = run(&prog);
    assert_eq!(vm.cpu.f(1).to_bits(), bits);
    assert_eq!(vm.mem.read32(0x304), bits);
}

#[test]
fn float_registers_cleared_on_reset() {
    let mut prog = li(1, 1.5f32.to_bits());
    prog.push(fmv_w_x(1, 1));
    prog.push(ecall());
    let mut vm = run(&prog);
    vm.cpu.reset(0);
    assert_eq!(vm.cpu.f(1), 0.0);
}
