//! Session construction options, generalizing the original constructor's
//! single `trace: bool` argument.

/// Size in bytes of the synthetic bump-allocation arena (§3 `BumpArena`).
pub const DEFAULT_ARENA_SIZE: u64 = 0x10000;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Install the per-instruction trace hook and log each fetched
    /// instruction at `trace` level.
    pub trace: bool,
    /// Size of the bump-allocation arena carved out of the first qualifying
    /// free region.
    pub arena_size: u64,
    /// Default instruction budget passed to `start`/`call` when the caller
    /// doesn't specify one. `0` means unbounded.
    pub default_instruction_budget: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            trace: false,
            arena_size: DEFAULT_ARENA_SIZE,
            default_instruction_budget: 0,
        }
    }
}
