//! Translated-block bookkeeping: a map from guest start PC to compiled
//! block, backed by one mmap'd executable arena. The arena follows W^X
//! discipline: pages are writable only while a block is being installed,
//! executable the rest of the time.

use std::collections::{HashMap, HashSet};
use std::io;
use std::ptr;

use super::JitConfig;

/// One translated basic block. Identity is the guest start PC used as the
/// cache key; `offset` locates the code inside the arena.
#[derive(Clone, Copy)]
pub(super) struct Block {
    pub(super) offset: usize,
    /// One past the last translated guest instruction.
    pub(super) pc_end: u32,
    pub(super) instrs: u32,
}

pub(super) struct BlockCache {
    pub(super) enabled: bool,
    pub(super) trace: bool,
    blocks: HashMap<u32, Block>,
    failed: HashSet<u32>,
    arena: Option<CodeArena>,
}

impl BlockCache {
    pub(super) fn new(config: JitConfig) -> Self {
        let arena = if config.enabled {
            CodeArena::new(config.arena_size).ok()
        } else {
            None
        };
        let enabled = arena.is_some();
        if config.enabled && !enabled {
            eprintln!("jit-x64: disabled (failed to allocate executable code arena)");
        }
        Self {
            enabled,
            trace: enabled && env_flag("RV32VM_JIT_TRACE"),
            blocks: HashMap::new(),
            failed: HashSet::new(),
            arena,
        }
    }

    pub(super) fn flush(&mut self) {
        self.blocks.clear();
        self.failed.clear();
        if let Some(arena) = self.arena.as_mut() {
            arena.clear();
        }
    }

    pub(super) fn lookup(&self, pc: u32) -> Option<Block> {
        self.blocks.get(&pc).copied()
    }

    pub(super) fn is_failed(&self, pc: u32) -> bool {
        self.failed.contains(&pc)
    }

    pub(super) fn mark_failed(&mut self, pc: u32) {
        self.failed.insert(pc);
    }

    /// Install a freshly translated block. A full arena evicts every cached
    /// block and retries once; nothing is executing while we translate, so
    /// the eviction cannot free a live block. A block that does not fit an
    /// empty arena disables the translator.
    pub(super) fn insert(&mut self, pc: u32, code: &[u8], pc_end: u32, instrs: u32) -> Option<Block> {
        let offset = match self.arena.as_mut().and_then(|a| a.alloc(code)) {
            Some(off) => off,
            None => {
                self.blocks.clear();
                self.failed.clear();
                let retry = self.arena.as_mut().and_then(|a| {
                    a.clear();
                    a.alloc(code)
                });
                match retry {
                    Some(off) => off,
                    None => {
                        self.enabled = false;
                        return None;
                    }
                }
            }
        };
        let block = Block {
            offset,
            pc_end,
            instrs,
        };
        self.blocks.insert(pc, block);
        Some(block)
    }

    pub(super) fn entry_ptr(&self, offset: usize) -> Option<*const u8> {
        self.arena.as_ref().map(|a| a.ptr_at(offset))
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

struct CodeArena {
    ptr: *mut u8,
    size: usize,
    used: usize,
}

impl CodeArena {
    fn new(size: usize) -> io::Result<Self> {
        // SAFETY: sysconf is always safe to call.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let size = (size.max(page) + page - 1) & !(page - 1);
        // SAFETY: anonymous private mapping, no file backing. Mapped
        // execute-only-plus-read; alloc() flips to writable around copies.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            used: 0,
        })
    }

    fn clear(&mut self) {
        self.used = 0;
    }

    fn alloc(&mut self, code: &[u8]) -> Option<usize> {
        let offset = (self.used + 15) & !15;
        let end = offset.checked_add(code.len())?;
        if end > self.size {
            return None;
        }
        self.set_prot(libc::PROT_READ | libc::PROT_WRITE).ok()?;
        // SAFETY: offset..end is within the mapping and the pages are
        // writable at this point.
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.ptr.add(offset), code.len());
        }
        self.set_prot(libc::PROT_READ | libc::PROT_EXEC).ok()?;
        self.used = end;
        Some(offset)
    }

    fn ptr_at(&self, offset: usize) -> *const u8 {
        debug_assert!(offset < self.used);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) }
    }

    fn set_prot(&self, prot: i32) -> io::Result<()> {
        // SAFETY: ptr/size describe the live mapping owned by self.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for CodeArena {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in new() and is freed only here.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
        }
    }
}
