//! §6 external-collaborator contract for minidump parsing. `FileMinidumpSource`
//! is the concrete adapter over the `minidump`/`minidump-common` crates; the
//! trait keeps the loader and context restorer independent of that choice.

mod file;

pub use file::FileMinidumpSource;

use crate::bitness::Bitness;
use crate::engine::Permission;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct MemoryInfoEntry {
    pub base: u64,
    pub size: u64,
    pub protection: Permission,
    pub committed: bool,
}

#[derive(Debug, Clone)]
pub struct MemorySegment {
    pub base: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub base: u64,
    pub size: u64,
    pub path: String,
}

/// A thread's saved register context, bitness-tagged because WOW64 dumps
/// carry both a native x86-64 `CONTEXT` and a WOW64 x86 `CONTEXT`.
#[derive(Debug, Clone, Default)]
pub struct ThreadContext {
    pub gp: Vec<(&'static str, u64)>,
    pub mxcsr: u32,
    pub eflags: u32,
    pub dr0: u64,
    pub dr1: u64,
    pub dr2: u64,
    pub dr3: u64,
    pub dr6: u64,
    pub dr7: u64,
}

pub struct ThreadInfo {
    pub teb_address: u64,
    pub context: ThreadContext,
}

/// Read-only view over a parsed minidump, sufficient to drive the
/// address-space loader, module table, and thread-context restorer.
pub trait MinidumpSource {
    fn bitness(&self) -> Bitness;
    fn memory_info(&self) -> Result<Vec<MemoryInfoEntry>>;
    fn memory_segments(&self) -> Result<Vec<MemorySegment>>;
    fn modules(&self) -> Result<Vec<ModuleEntry>>;
    fn module_raw_bytes(&self, path: &str) -> Result<Vec<u8>>;
    /// The thread the dump was captured on, or the first thread if the
    /// dump carries no explicit "current thread" marker.
    fn main_thread(&self) -> Result<ThreadInfo>;
}
