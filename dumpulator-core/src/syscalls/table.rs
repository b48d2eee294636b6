//! Builds the syscall index from ntdll's `Zw*` exports and applies the
//! WOW64 transition patch.

use log::debug;

use crate::bitness::Bitness;
use crate::engine::CpuEngine;
use crate::error::{DumpulatorError, Result};
use crate::modules::ModuleTable;

/// `MOV EDX, ESP; SYSENTER; RET` — replaces whatever `Wow64Transition`
/// normally points at (a call into `wow64cpu.dll`) so a WOW64 process's
/// syscalls trap through the same `SYSENTER` path as a native x86 process.
pub const WOW64_TRANSITION_PATCH: [u8; 5] = [0x8B, 0xD4, 0x0F, 0x34, 0xC3];

#[derive(Debug, Clone)]
pub struct SyscallEntry {
    pub index: u32,
    pub name: String,
    pub address: u64,
}

/// Ordinal-free index from service number to `Zw*` export, built by
/// enumerating ntdll's exports and sorting the `Zw*` subset by ascending
/// RVA — the same trick the loader relies on to recover Windows' own
/// (undocumented) service numbering without a symbol file.
pub struct SyscallTable {
    by_index: Vec<SyscallEntry>,
}

impl SyscallTable {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self { by_index: Vec::new() }
    }

    /// Looks up `ntdll.dll` in `modules`, walks its `Zw*` exports in
    /// ascending address order, and assigns each one a service number equal
    /// to its position in that order.
    pub fn build(modules: &ModuleTable, regions: &crate::regions::RegionTable) -> Result<Self> {
        let ntdll = modules
            .find_by_name_ci(regions, "ntdll.dll")
            .ok_or_else(|| DumpulatorError::ConfigFault("ntdll.dll not present in dump".into()))?;

        let mut zw_exports: Vec<_> = ntdll
            .exports
            .iter()
            .filter(|e| e.name.as_deref().is_some_and(|n| n.starts_with("Zw")))
            .collect();
        zw_exports.sort_by_key(|e| e.address);

        let by_index = zw_exports
            .into_iter()
            .enumerate()
            .map(|(index, export)| SyscallEntry {
                index: index as u32,
                name: export.name.clone().unwrap(),
                address: export.address,
            })
            .collect();

        Ok(Self { by_index })
    }

    pub fn get(&self, index: u32) -> Option<&SyscallEntry> {
        self.by_index.get(index as usize)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SyscallEntry> {
        self.by_index.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// `Wow64Transition` is a variable holding a pointer to `wow64cpu.dll`'s
    /// entry stub, not code itself; overwrites the 5 bytes at the pointer it
    /// holds with [`WOW64_TRANSITION_PATCH`], if present. Absent on native
    /// x86-64 dumps, which is not an error.
    pub fn patch_wow64_transition<E: CpuEngine>(
        modules: &ModuleTable,
        engine: &mut E,
        bitness: Bitness,
    ) -> Result<()> {
        let Some(ntdll) = modules.iter().find(|m| m.name.eq_ignore_ascii_case("ntdll.dll")) else {
            return Ok(());
        };
        let Some(export) = ntdll.export_by_name("Wow64Transition") else {
            return Ok(());
        };
        let ptr_size = bitness.pointer_size() as usize;
        let raw = engine.mem_read(export.address, ptr_size)?;
        let mut bytes = [0u8; 8];
        bytes[..ptr_size].copy_from_slice(&raw);
        let patch_addr = u64::from_le_bytes(bytes);
        debug!("patching Wow64Transition target at {patch_addr:#x} (variable at {:#x})", export.address);
        engine.mem_write(patch_addr, &WOW64_TRANSITION_PATCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Permission;
    use crate::regions::{MemoryRegion, MemoryState, RegionTable};

    #[test]
    fn zw_exports_are_ordered_by_ascending_address() {
        let mut regions = RegionTable::new();
        regions.insert(MemoryRegion {
            base: 0x7000_0000,
            size: 0x1000,
            protection: Permission::READ | Permission::EXEC,
            state: MemoryState::Commit,
            info: None,
        });
        let mut modules = ModuleTable::new();
        let idx = modules.add(&mut regions, 0x7000_0000, 0x1000, "C:\\Windows\\System32\\ntdll.dll".into()).unwrap();
        let module = modules.get_mut(idx);
        module.exports.push(crate::modules::ModuleExport {
            address: 0x7000_0200,
            ordinal: 2,
            name: Some("ZwClose".into()),
            is_forwarder: false,
        });
        module.exports.push(crate::modules::ModuleExport {
            address: 0x7000_0100,
            ordinal: 1,
            name: Some("ZwOpenFile".into()),
            is_forwarder: false,
        });
        module.exports.push(crate::modules::ModuleExport {
            address: 0x7000_0050,
            ordinal: 3,
            name: Some("RtlInitUnicodeString".into()),
            is_forwarder: false,
        });

        let table = SyscallTable::build(&modules, &regions).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().name, "ZwOpenFile");
        assert_eq!(table.get(1).unwrap().name, "ZwClose");
    }

    #[test]
    fn wow64_patch_targets_the_pointer_not_the_variable() {
        use crate::testutil::FakeEngine;

        let mut regions = RegionTable::new();
        regions.insert(MemoryRegion {
            base: 0x7000_0000,
            size: 0x1000,
            protection: Permission::READ | Permission::WRITE,
            state: MemoryState::Commit,
            info: None,
        });
        let mut modules = ModuleTable::new();
        let idx = modules
            .add(&mut regions, 0x7000_0000, 0x1000, "C:\\Windows\\System32\\ntdll.dll".into())
            .unwrap();
        let variable_addr = 0x7000_0300u64;
        let target_addr = 0x7000_0400u64;
        modules.get_mut(idx).exports.push(crate::modules::ModuleExport {
            address: variable_addr,
            ordinal: 4,
            name: Some("Wow64Transition".into()),
            is_forwarder: false,
        });

        let mut engine = FakeEngine::new();
        engine.map(0x7000_0000, 0x1000, Permission::READ | Permission::WRITE).unwrap();
        engine.mem_write(variable_addr, &target_addr.to_le_bytes()).unwrap();

        SyscallTable::patch_wow64_transition(&modules, &mut engine, Bitness::X64).unwrap();

        assert_eq!(engine.mem_read(target_addr, 5).unwrap(), WOW64_TRANSITION_PATCH);
        // the variable itself is left holding the pointer, not the patch bytes.
        assert_ne!(engine.mem_read(variable_addr, 5).unwrap(), WOW64_TRANSITION_PATCH);
    }
}
