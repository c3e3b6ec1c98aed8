//! The RV32 hart: architectural state, lifecycle and the stepping driver.
//! Per-concern submodules extend [`Cpu`] with the interpreter handlers and
//! the x86-64 block translator.

use crate::bus::IoBus;
use crate::exception::Exception;

#[cfg(all(feature = "jit", target_arch = "x86_64"))]
mod code_cache;
#[cfg(feature = "zicsr")]
mod csr;
mod exec;
#[cfg(feature = "f")]
mod fp;
#[cfg(all(feature = "jit", target_arch = "x86_64"))]
mod jit_x64;

#[cfg(all(feature = "jit", target_arch = "x86_64"))]
use code_cache::BlockCache;

pub const REG_ZERO: usize = 0;
pub const REG_SP: usize = 2;

/// Stack pointer seeded by [`Cpu::reset`]. 16-byte aligned; the embedder is
/// expected to map memory below it.
pub const DEFAULT_STACK_ADDR: u32 = 0xFFFF_F000;

/// Block-translator construction knobs.
#[derive(Clone, Copy)]
pub struct JitConfig {
    pub enabled: bool,
    /// Size of the executable code arena in bytes.
    pub arena_size: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            arena_size: 4 * 1024 * 1024,
        }
    }
}

pub struct Cpu {
    x: [u32; 32],
    pc: u32,
    exception: Exception,
    csr_cycle: u64,
    csr_mstatus: u32,
    #[cfg(feature = "f")]
    csr_fcsr: u32,
    #[cfg(feature = "f")]
    f: [f32; 32],
    io: IoBus,
    userdata: *mut (),
    #[cfg(all(feature = "jit", target_arch = "x86_64"))]
    jit: BlockCache,
}

impl Cpu {
    /// Build a hart with the default JIT configuration, reset to PC 0.
    pub fn new(io: IoBus, userdata: *mut ()) -> Self {
        Self::with_jit_config(io, userdata, JitConfig::default())
    }

    pub fn with_jit_config(io: IoBus, userdata: *mut (), config: JitConfig) -> Self {
        #[cfg(not(all(feature = "jit", target_arch = "x86_64")))]
        let _ = config;
        let mut cpu = Self {
            x: [0; 32],
            pc: 0,
            exception: Exception::None,
            csr_cycle: 0,
            csr_mstatus: 0,
            #[cfg(feature = "f")]
            csr_fcsr: 0,
            #[cfg(feature = "f")]
            f: [0.0; 32],
            io,
            userdata,
            #[cfg(all(feature = "jit", target_arch = "x86_64"))]
            jit: BlockCache::new(config),
        };
        cpu.reset(0);
        cpu
    }

    /// Clear registers and CSRs, seed the stack pointer and set PC.
    /// Translated blocks are discarded: a reset usually means new guest code.
    pub fn reset(&mut self, pc: u32) {
        self.x = [0; 32];
        self.x[REG_SP] = DEFAULT_STACK_ADDR;
        self.pc = pc;
        self.exception = Exception::None;
        self.csr_cycle = 0;
        self.csr_mstatus = 0;
        #[cfg(feature = "f")]
        {
            self.csr_fcsr = 0;
            self.f = [0.0; 32];
        }
        #[cfg(all(feature = "jit", target_arch = "x86_64"))]
        self.jit.flush();
    }

    /// Run up to `cycles` guest instructions. Returns early when an
    /// exception is latched; the latch is sticky until the embedder clears
    /// it. Each outer iteration first offers the current PC to the block
    /// translator, then falls back to interpreting until the next control
    /// transfer.
    pub fn step(&mut self, cycles: u32) {
        let target = self.csr_cycle.saturating_add(u64::from(cycles));
        while self.csr_cycle < target && self.exception == Exception::None {
            #[cfg(all(feature = "jit", target_arch = "x86_64"))]
            if self.try_run_block(target) {
                continue;
            }
            while self.csr_cycle < target && self.exception == Exception::None {
                let ifetch = self.io.mem_ifetch;
                let pc = self.pc;
                let inst = ifetch(self, pc);
                let sequential = match exec::OPCODES[((inst >> 2) & 0x1f) as usize] {
                    Some(op) => op(self, inst),
                    None => {
                        self.exception = Exception::IllegalInst;
                        break;
                    }
                };
                // An illegal instruction never retires; everything else,
                // including a faulting control transfer, does.
                if self.exception != Exception::IllegalInst {
                    self.csr_cycle += 1;
                }
                if !sequential {
                    break;
                }
            }
        }
    }

    /// Drop every translated block. Embedders whose guests write to code
    /// pages must call this before re-entering the affected region.
    pub fn jit_flush(&mut self) {
        #[cfg(all(feature = "jit", target_arch = "x86_64"))]
        self.jit.flush();
    }

    pub fn x(&self, reg: usize) -> u32 {
        self.x[reg]
    }

    pub fn set_x(&mut self, reg: usize, val: u32) {
        if reg != REG_ZERO {
            self.x[reg] = val;
        }
    }

    #[cfg(feature = "f")]
    pub fn f(&self, reg: usize) -> f32 {
        self.f[reg]
    }

    #[cfg(feature = "f")]
    pub fn set_f(&mut self, reg: usize, val: f32) {
        self.f[reg] = val;
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Retired-instruction counter, also visible to the guest as the
    /// `cycle`/`cycleh` CSR pair.
    pub fn cycle(&self) -> u64 {
        self.csr_cycle
    }

    pub fn exception(&self) -> Exception {
        self.exception
    }

    /// Latch an exception. Bus callbacks use this to halt stepping.
    pub fn raise(&mut self, exception: Exception) {
        self.exception = exception;
    }

    pub fn clear_exception(&mut self) {
        self.exception = Exception::None;
    }

    pub fn userdata(&self) -> *mut () {
        self.userdata
    }

    /// Register write with the zero-register discipline applied post-write.
    #[inline]
    fn set_rd(&mut self, rd: u32, val: u32) {
        self.x[rd as usize] = val;
        self.x[REG_ZERO] = 0;
    }

    #[inline]
    fn check_pc_align(&mut self) {
        if self.pc & 0x3 != 0 {
            self.exception = Exception::InstMisaligned;
        }
    }
}
