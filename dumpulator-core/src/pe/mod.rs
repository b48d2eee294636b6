//! §6 external-collaborator contract for PE image parsing. `GoblinPe` is the
//! concrete adapter; the trait exists so the module table and syscall
//! dispatcher never depend on `goblin` directly.

mod goblin_pe;

pub use goblin_pe::GoblinPe;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PeExport {
    pub rva: u32,
    pub ordinal: u32,
    pub name: Option<String>,
    pub is_forwarder: bool,
}

/// A parsed PE image. Implementors hold the raw bytes; all accessors are
/// read-only and cheap to call repeatedly (the syscall dispatcher calls
/// `exports()` once per module at startup, not per syscall).
pub trait PeImage {
    fn exports(&self) -> Result<Vec<PeExport>>;

    /// Raw file offset of the byte at `rva`, following the section table,
    /// for the Wow64Transition patch (§4.H) which edits the image's raw
    /// bytes rather than the mapped guest memory.
    fn rva_to_file_offset(&self, rva: u32) -> Option<usize>;

    fn raw_data(&self) -> &[u8];
}
