//! Error taxonomy for the session, per the error-handling design.
//!
//! Construction faults are fatal and propagate as `Result`; faults raised
//! from inside a hook are logged and stashed on the session as its
//! `last_fault`, matching the "single session-wide outcome" rule.

use thiserror::Error;

/// The kind of memory access that triggered an unmapped/protected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessKind {
    Read,
    Write,
    Fetch,
}

impl core::fmt::Display for MemoryAccessKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            MemoryAccessKind::Read => "read",
            MemoryAccessKind::Write => "write",
            MemoryAccessKind::Fetch => "fetch",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum DumpulatorError {
    /// Fatal fault at session construction time: missing ntdll, absent
    /// primary thread context, no free region large enough for the arena.
    #[error("configuration fault: {0}")]
    ConfigFault(String),

    /// Unmapped or protection-violated memory access during execution.
    #[error("{kind} access to {address:#x}[{size:#x}] faulted at rip={rip:#x}")]
    UnmappedAccess {
        kind: MemoryAccessKind,
        address: u64,
        size: usize,
        rip: u64,
    },

    /// Service number out of range, or no handler registered for it.
    #[error("unimplemented syscall index {index:#x} ({name:?})")]
    UnimplementedSyscall { index: u32, name: Option<String> },

    /// Argument position beyond what the calling convention supports.
    #[error("calling convention does not support argument position {position}")]
    UnsupportedArgPosition { position: usize },

    /// The bump allocator ran out of room.
    #[error("bump allocator exhausted: requested {requested:#x}, {remaining:#x} remaining")]
    AllocatorExhausted { requested: u64, remaining: u64 },

    /// The CPU engine itself reported an error (mapping, register access, ...).
    #[error("cpu engine error: {0}")]
    Engine(String),

    /// A named register or alias was not recognized.
    #[error("unknown register name '{0}'")]
    UnknownRegister(String),
}

pub type Result<T> = core::result::Result<T, DumpulatorError>;
