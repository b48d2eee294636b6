//! Component B — Argument View. Reads/writes call arguments at integer
//! positions per the guest's calling convention.

use crate::bitness::Bitness;
use crate::engine::CpuEngine;
use crate::error::{DumpulatorError, Result};
use crate::memory::{BumpArena, MemoryServices};
use crate::registers::RegisterFile;

pub struct ArgumentView<'a, E: CpuEngine> {
    engine: &'a mut E,
    bitness: Bitness,
    arena: &'a mut BumpArena,
}

impl<'a, E: CpuEngine> ArgumentView<'a, E> {
    pub fn new(engine: &'a mut E, bitness: Bitness, arena: &'a mut BumpArena) -> Self {
        Self {
            engine,
            bitness,
            arena,
        }
    }

    fn regs(&mut self) -> RegisterFile<'_, E> {
        RegisterFile::new(self.engine, self.bitness)
    }

    fn mem(&mut self) -> MemoryServices<'_, E> {
        MemoryServices::new(self.engine, self.bitness, self.arena)
    }

    /// Reads argument `index`. x86-64: positions 0..3 alias RCX/RDX/R8/R9;
    /// 4..19 read `[RSP + (i+1)*8]`; >=20 fails. x86: all positions read
    /// `[ESP + (i+2)*4]`.
    pub fn get(&mut self, index: usize) -> Result<u64> {
        if self.bitness.is_x64() {
            if index < 4 {
                let name = ["rcx", "rdx", "r8", "r9"][index];
                return self.regs().read(name);
            }
            if index >= 20 {
                return Err(DumpulatorError::UnsupportedArgPosition { position: index });
            }
            let rsp = self.regs().read("rsp")?;
            let addr = rsp + (index as u64 + 1) * 8;
            self.mem().read_ptr(addr)
        } else {
            let esp = self.regs().read("esp")?;
            let addr = esp + (index as u64 + 2) * 4;
            self.mem().read_u32(addr).map(|v| v as u64)
        }
    }

    /// Writes argument `index`. Only x86-64 positions 0..3 (the register
    /// slots) are writable; everything else fails per §4.B.
    pub fn set(&mut self, index: usize, value: u64) -> Result<()> {
        if !self.bitness.is_x64() {
            return Err(DumpulatorError::UnsupportedArgPosition { position: index });
        }
        if index >= 4 {
            return Err(DumpulatorError::UnsupportedArgPosition { position: index });
        }
        let name = ["rcx", "rdx", "r8", "r9"][index];
        self.regs().write(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Permission;
    use crate::testutil::FakeEngine;

    #[test]
    fn x64_register_args() {
        let mut engine = FakeEngine::new();
        engine.reg_write(crate::engine::RegId::Rcx, 0x11).unwrap();
        engine.reg_write(crate::engine::RegId::Rdx, 0x22).unwrap();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut args = ArgumentView::new(&mut engine, Bitness::X64, &mut arena);
        assert_eq!(args.get(0).unwrap(), 0x11);
        assert_eq!(args.get(1).unwrap(), 0x22);
    }

    #[test]
    fn x64_stack_args() {
        let mut engine = FakeEngine::new();
        engine.map(0x7000, 0x1000, Permission::READ | Permission::WRITE).unwrap();
        engine.reg_write(crate::engine::RegId::Rsp, 0x7000).unwrap();
        engine.mem_write(0x7000 + 5 * 8, &99u64.to_le_bytes()).unwrap();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut args = ArgumentView::new(&mut engine, Bitness::X64, &mut arena);
        assert_eq!(args.get(4).unwrap(), 99);
    }

    #[test]
    fn x64_position_20_fails() {
        let mut engine = FakeEngine::new();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut args = ArgumentView::new(&mut engine, Bitness::X64, &mut arena);
        assert!(matches!(
            args.get(20),
            Err(DumpulatorError::UnsupportedArgPosition { position: 20 })
        ));
    }

    #[test]
    fn x86_writes_are_rejected() {
        let mut engine = FakeEngine::new();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut args = ArgumentView::new(&mut engine, Bitness::X86, &mut arena);
        assert!(args.set(0, 5).is_err());
    }
}
