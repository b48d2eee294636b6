//! The CPU engine contract (§6): the narrow capability set the core needs
//! from whatever concrete emulation engine backs a session. `EmulatorSession`
//! (Component I) is written entirely against this trait so it can be driven
//! by a fake in unit tests without linking a real emulator.

pub mod regid;
pub mod unicorn;

pub use regid::RegId;

use crate::error::Result;
use std::cell::RefCell;
use std::rc::Rc;

bitflags::bitflags! {
    /// Engine-visible memory permissions, the target of the §6
    /// `AllocationProtect -> permissions` mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u32 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const EXEC  = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Bits32,
    Bits64,
}

/// Which kind of memory fault the hook observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFault {
    ReadUnmapped,
    WriteUnmapped,
    FetchUnmapped,
    ReadProtected,
    WriteProtected,
    FetchProtected,
}

/// Specific instructions the core wants to intercept, rather than stepping
/// every instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrappedInsn {
    Syscall,
    Sysenter,
}

/// Per Design Note (e): "hook callbacks as free functions capturing the
/// session" in the original becomes a vtable the engine invokes, with the
/// engine holding only an opaque pointer to the session. `EmulatorSession`
/// implements this trait over itself.
pub trait SessionHooks {
    /// Unmapped or protection-violated access. Return value is forwarded to
    /// the engine's own repair-or-fault decision; the core always declines
    /// (`false`) per §4.I.
    fn on_mem_fault(&mut self, fault: MemFault, address: u64, size: usize, value: i64) -> bool;

    /// Fired once per instruction when tracing is enabled.
    fn on_code(&mut self, address: u64, size: u32);

    /// `SYSCALL` or `SYSENTER` was about to execute.
    fn on_insn(&mut self, insn: TrappedInsn);

    /// A CPU interrupt fired (`#BP`, `#GP`, ...).
    fn on_intr(&mut self, number: u32);
}

/// Everything `session::EmulatorSession` needs from a CPU emulation engine.
pub trait CpuEngine {
    fn map(&mut self, addr: u64, size: u64, perm: Permission) -> Result<()>;
    fn mem_write(&mut self, addr: u64, data: &[u8]) -> Result<()>;
    fn mem_read(&mut self, addr: u64, size: usize) -> Result<Vec<u8>>;

    fn reg_read(&self, reg: RegId) -> Result<u64>;
    fn reg_write(&mut self, reg: RegId, value: u64) -> Result<()>;
    /// Wide read/write for XMM/YMM/ZMM-class registers, value as little-endian bytes.
    fn reg_read_wide(&self, reg: RegId) -> Result<Vec<u8>>;
    fn reg_write_wide(&mut self, reg: RegId, value: &[u8]) -> Result<()>;

    /// Install the four hooks described in §4.I, routing every callback
    /// through `hooks`. `trace` gates whether the per-instruction hook is
    /// actually registered (it is always implemented, just optionally
    /// wired, per §4.I "optional per-instruction trace").
    fn install_hooks(&mut self, hooks: Rc<RefCell<dyn SessionHooks>>, trace: bool) -> Result<()>;

    /// Run from `begin` until `until` is reached (or `count` non-zero
    /// instructions have retired). Errors from the underlying engine are
    /// returned to the caller rather than panicking; §4.I's controller
    /// decides whether to swallow them.
    fn emu_start(&mut self, begin: u64, until: u64, count: usize) -> Result<()>;

    fn emu_stop(&mut self) -> Result<()>;

    /// Loads the engine's GDTR to point at a descriptor table the caller has
    /// already written into mapped guest memory (Component F).
    fn load_gdtr(&mut self, base: u64, limit: u16) -> Result<()>;
}
