//! Component G — Thread-Context Restorer. Copies the dump's saved thread
//! context into the engine's registers, ahead of GDT setup which needs the
//! restored TEB address.

use crate::bitness::Bitness;
use crate::dump::ThreadInfo;
use crate::engine::{CpuEngine, RegId};
use crate::error::Result;
use crate::registers::RegisterFile;

/// Restores general-purpose registers, MXCSR, EFLAGS and DR0-7 from `thread`
/// into `engine`. Segment selectors are deliberately left untouched here;
/// `gdt::setup` assigns them once the descriptor table exists (§2's
/// E -> D -> G -> F -> H -> I construction order).
pub fn restore<E: CpuEngine>(engine: &mut E, bitness: Bitness, thread: &ThreadInfo) -> Result<()> {
    let mut regs = RegisterFile::new(engine, bitness);

    for &(name, value) in &thread.context.gp {
        regs.write(name, value)?;
    }

    regs.set(RegId::Eflags, thread.context.eflags as u64)?;

    if bitness.is_x64() {
        regs.set(RegId::Mxcsr, thread.context.mxcsr as u64)?;
    }

    regs.set(RegId::Dr0, thread.context.dr0)?;
    regs.set(RegId::Dr1, thread.context.dr1)?;
    regs.set(RegId::Dr2, thread.context.dr2)?;
    regs.set(RegId::Dr3, thread.context.dr3)?;
    regs.set(RegId::Dr6, thread.context.dr6)?;
    regs.set(RegId::Dr7, thread.context.dr7)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::ThreadContext;
    use crate::testutil::FakeEngine;

    #[test]
    fn restores_gp_registers_and_flags() {
        let mut engine = FakeEngine::new();
        let thread = ThreadInfo {
            teb_address: 0x7ffd_e000,
            context: ThreadContext {
                gp: vec![("rax", 0x11), ("rip", 0x4000)],
                mxcsr: 0x1f80,
                eflags: 0x202,
                ..Default::default()
            },
        };
        restore(&mut engine, Bitness::X64, &thread).unwrap();
        let regs = RegisterFile::new(&mut engine, Bitness::X64);
        assert_eq!(regs.read("rax").unwrap(), 0x11);
        assert_eq!(regs.read("rip").unwrap(), 0x4000);
        assert_eq!(regs.get(RegId::Eflags).unwrap(), 0x202);
    }
}
