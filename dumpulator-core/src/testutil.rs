//! In-process fakes used by unit tests, the same way the original's
//! `tests/harness-tests.py` builds a tiny real dump rather than mocking
//! `unicorn`/`pefile`. Here it is cheaper to hand-write a fake `CpuEngine`
//! against the trait than to spin up a real Unicorn instance per test.

#![cfg(test)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::{CpuEngine, MemFault, Permission, RegId, SessionHooks, TrappedInsn};
use crate::error::{DumpulatorError, Result};

#[derive(Default)]
pub struct FakeEngine {
    regs: HashMap<RegId, u64>,
    wide_regs: HashMap<RegId, Vec<u8>>,
    pages: HashMap<u64, (Vec<u8>, Permission)>,
    page_size: u64,
    hooks: Option<Rc<RefCell<dyn SessionHooks>>>,
    stop_requested: bool,
    gdtr: Option<(u64, u16)>,
}

const PAGE: u64 = 0x1000;

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            page_size: PAGE,
            ..Default::default()
        }
    }

    fn page_base(addr: u64) -> u64 {
        addr & !(PAGE - 1)
    }

    fn find_page(&self, addr: u64) -> Option<(&Vec<u8>, Permission)> {
        self.pages.get(&Self::page_base(addr)).map(|(d, p)| (d, *p))
    }
}

impl CpuEngine for FakeEngine {
    fn map(&mut self, addr: u64, size: u64, perm: Permission) -> Result<()> {
        let mut base = Self::page_base(addr);
        let end = addr + size;
        while base < end {
            self.pages
                .entry(base)
                .or_insert_with(|| (vec![0u8; self.page_size as usize], perm));
            base += self.page_size;
        }
        Ok(())
    }

    fn mem_write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        for (i, &b) in data.iter().enumerate() {
            let a = addr + i as u64;
            let base = Self::page_base(a);
            let page = self
                .pages
                .get_mut(&base)
                .ok_or_else(|| DumpulatorError::Engine(format!("write to unmapped {a:#x}")))?;
            page.0[(a - base) as usize] = b;
        }
        Ok(())
    }

    fn mem_read(&mut self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size);
        for i in 0..size as u64 {
            let a = addr + i;
            let base = Self::page_base(a);
            let (data, _) = self
                .find_page(a)
                .ok_or_else(|| DumpulatorError::Engine(format!("read from unmapped {a:#x}")))?;
            out.push(data[(a - base) as usize]);
        }
        Ok(out)
    }

    fn reg_read(&self, reg: RegId) -> Result<u64> {
        Ok(*self.regs.get(&reg).unwrap_or(&0))
    }

    fn reg_write(&mut self, reg: RegId, value: u64) -> Result<()> {
        self.regs.insert(reg, value);
        Ok(())
    }

    fn reg_read_wide(&self, reg: RegId) -> Result<Vec<u8>> {
        Ok(self.wide_regs.get(&reg).cloned().unwrap_or_else(|| vec![0u8; 64]))
    }

    fn reg_write_wide(&mut self, reg: RegId, value: &[u8]) -> Result<()> {
        self.wide_regs.insert(reg, value.to_vec());
        Ok(())
    }

    fn install_hooks(&mut self, hooks: Rc<RefCell<dyn SessionHooks>>, _trace: bool) -> Result<()> {
        self.hooks = Some(hooks);
        Ok(())
    }

    fn emu_start(&mut self, _begin: u64, _until: u64, _count: usize) -> Result<()> {
        self.stop_requested = false;
        Ok(())
    }

    fn emu_stop(&mut self) -> Result<()> {
        self.stop_requested = true;
        Ok(())
    }

    fn load_gdtr(&mut self, base: u64, limit: u16) -> Result<()> {
        self.gdtr = Some((base, limit));
        Ok(())
    }
}

/// Exercises the installed hooks directly, standing in for what the real
/// engine would do when it traps a fault/instruction/interrupt.
impl FakeEngine {
    pub fn fire_mem_fault(&self, fault: MemFault, addr: u64, size: usize, value: i64) -> bool {
        self.hooks
            .as_ref()
            .map(|h| h.borrow_mut().on_mem_fault(fault, addr, size, value))
            .unwrap_or(false)
    }

    pub fn fire_insn(&self, insn: TrappedInsn) {
        if let Some(h) = &self.hooks {
            h.borrow_mut().on_insn(insn);
        }
    }
}
