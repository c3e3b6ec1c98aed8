use thiserror::Error;

/// The exception latch. `None` means the hart is runnable; any other value
/// halts the stepping loop until the embedder inspects and clears it.
///
/// The representation is fixed so generated code can test the latch with a
/// single 32-bit compare against zero.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Exception {
    #[error("no exception")]
    None = 0,
    #[error("instruction address misaligned")]
    InstMisaligned = 1,
    #[error("illegal instruction")]
    IllegalInst = 2,
    #[error("memory access fault")]
    MemFault = 3,
    #[error("environment call")]
    Ecall = 4,
    #[error("breakpoint")]
    Ebreak = 5,
}
