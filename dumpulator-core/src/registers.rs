//! Component A — Register File. Named-register read/write over the CPU
//! engine, with a bitness-aware alias layer (`cax`, `cip`, ...).

use crate::bitness::Bitness;
use crate::engine::{regid, CpuEngine, RegId};
use crate::error::{DumpulatorError, Result};

pub struct RegisterFile<'a, E: CpuEngine> {
    engine: &'a mut E,
    x64: bool,
}

impl<'a, E: CpuEngine> RegisterFile<'a, E> {
    pub fn new(engine: &'a mut E, bitness: Bitness) -> Self {
        Self {
            engine,
            x64: bitness.is_x64(),
        }
    }

    fn resolve(&self, name: &str) -> Result<RegId> {
        for (alias, reg) in regid::alias_table(self.x64) {
            if alias == name {
                return Ok(reg);
            }
        }
        for &(known, reg) in regid::NAME_TABLE {
            if known == name {
                return Ok(reg);
            }
        }
        Err(DumpulatorError::UnknownRegister(name.to_string()))
    }

    pub fn read(&self, name: &str) -> Result<u64> {
        self.get(self.resolve(name)?)
    }

    pub fn write(&mut self, name: &str, value: u64) -> Result<()> {
        let reg = self.resolve(name)?;
        self.set(reg, value)
    }

    /// Direct access by `RegId`, bypassing name resolution; used internally
    /// by the context restorer, GDT setup and syscall dispatcher, all of
    /// which already know which architectural register they want.
    pub fn get(&self, reg: RegId) -> Result<u64> {
        if regid::is_wide(reg) {
            let bytes = self.engine.reg_read_wide(reg)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            return Ok(u64::from_le_bytes(buf));
        }
        self.engine.reg_read(reg)
    }

    pub fn set(&mut self, reg: RegId, value: u64) -> Result<()> {
        if regid::is_wide(reg) {
            return self.engine.reg_write_wide(reg, &value.to_le_bytes());
        }
        self.engine.reg_write(reg, value)
    }

    pub fn get_wide(&self, reg: RegId) -> Result<Vec<u8>> {
        self.engine.reg_read_wide(reg)
    }

    pub fn set_wide(&mut self, reg: RegId, value: &[u8]) -> Result<()> {
        self.engine.reg_write_wide(reg, value)
    }

    /// `cax`/`cip`/... bitness-neutral aliases (§4.A).
    pub fn cax(&self) -> Result<u64> {
        self.get(self.alias(0))
    }

    pub fn set_cax(&mut self, value: u64) -> Result<()> {
        let reg = self.alias(0);
        self.set(reg, value)
    }

    pub fn csp(&self) -> Result<u64> {
        self.get(self.alias(5))
    }

    pub fn set_csp(&mut self, value: u64) -> Result<()> {
        let reg = self.alias(5);
        self.set(reg, value)
    }

    pub fn cip(&self) -> Result<u64> {
        self.get(self.alias(8))
    }

    pub fn set_cip(&mut self, value: u64) -> Result<()> {
        let reg = self.alias(8);
        self.set(reg, value)
    }

    fn alias(&self, index: usize) -> RegId {
        regid::alias_table(self.x64)[index].1
    }
}
