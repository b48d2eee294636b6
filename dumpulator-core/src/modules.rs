//! Component D — Module Table. Index of PE images present in the dump, with
//! export enumeration by name/ordinal.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use fnv::FnvHasher;

use crate::error::{DumpulatorError, Result};
use crate::pe::{PeExport, PeImage};
use crate::regions::RegionTable;

#[derive(Debug, Clone)]
pub struct ModuleExport {
    pub address: u64,
    pub ordinal: u32,
    pub name: Option<String>,
    /// §9 Open Question (a): forwarder exports are recorded but their
    /// forwarder string is not resolved to a target module/export.
    pub is_forwarder: bool,
}

/// Export lookups are keyed by address/name and probed on every resolved
/// call, same access pattern as the teacher's vmexit-handler table — hashed
/// with `fnv` rather than the default SipHash, same trade the teacher makes.
type FnvMap<K, V> = HashMap<K, V, BuildHasherDefault<FnvHasher>>;

pub struct Module {
    pub base: u64,
    pub size: u64,
    pub path: String,
    pub name: String,
    pub exports: Vec<ModuleExport>,
    exports_by_addr: FnvMap<u64, usize>,
    exports_by_name: FnvMap<String, usize>,
}

impl Module {
    fn new(base: u64, size: u64, path: String) -> Self {
        let name = path.rsplit('\\').next().unwrap_or(&path).to_string();
        Self {
            base,
            size,
            path,
            name,
            exports: Vec::new(),
            exports_by_addr: FnvMap::default(),
            exports_by_name: FnvMap::default(),
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    pub fn export_by_name(&self, name: &str) -> Option<&ModuleExport> {
        self.exports_by_name.get(name).map(|&i| &self.exports[i])
    }

    pub fn export_by_address(&self, addr: u64) -> Option<&ModuleExport> {
        self.exports_by_addr.get(&addr).map(|&i| &self.exports[i])
    }

    /// §4.D `parse_pe`: decode the export directory and populate the
    /// ordered export list and its two indices. A pure-ordinal export (no
    /// name) is recorded with `name: None` and is only reachable by address.
    pub fn parse_pe(&mut self, pe: &dyn PeImage, image_base_for_rva: u64) -> Result<()> {
        for PeExport {
            rva,
            ordinal,
            name,
            is_forwarder,
        } in pe.exports()?
        {
            let va = image_base_for_rva + rva as u64;
            let index = self.exports.len();
            self.exports_by_addr.insert(va, index);
            if let Some(name) = &name {
                self.exports_by_name.insert(name.clone(), index);
            }
            self.exports.push(ModuleExport {
                address: va,
                ordinal,
                name,
                is_forwarder,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKey<'a> {
    Address(u64),
    Name(&'a str),
}

pub struct ModuleTable {
    modules: Vec<Module>,
    name_lookup: FnvMap<String, usize>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            name_lookup: FnvMap::default(),
        }
    }

    /// §4.D `add(base, size, path)`: builds a `Module`, locates the single
    /// region that starts exactly at `base` (asserts one exists), stores
    /// the module as that region's `info`, and registers three lookup keys
    /// (basename, lowercased basename, full path).
    pub fn add(
        &mut self,
        regions: &mut RegionTable,
        base: u64,
        size: u64,
        path: String,
    ) -> Result<usize> {
        let module = Module::new(base, size, path);
        let name = module.name.clone();
        let path = module.path.clone();
        let index = self.modules.len();

        let region = regions.find_exact_mut(base).ok_or_else(|| {
            DumpulatorError::ConfigFault(format!("no committed region starts at module base {base:#x}"))
        })?;
        region.info = Some(index);

        self.name_lookup.insert(name.clone(), index);
        self.name_lookup.insert(name.to_lowercase(), index);
        self.name_lookup.insert(path, index);

        self.modules.push(module);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> &Module {
        &self.modules[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Module {
        &mut self.modules[index]
    }

    /// §4.D `find`: integer keys delegate to the region index; string keys
    /// resolve the base through `name_lookup` and recurse.
    pub fn find<'a>(&self, regions: &RegionTable, key: ModuleKey<'a>) -> Option<&Module> {
        match key {
            ModuleKey::Address(addr) => {
                let region = regions.find_containing(addr)?;
                region.info.map(|i| &self.modules[i])
            }
            ModuleKey::Name(name) => {
                let index = self.name_lookup.get(name)?;
                Some(&self.modules[*index])
            }
        }
    }

    pub fn find_by_name_ci(&self, regions: &RegionTable, name: &str) -> Option<&Module> {
        self.find(regions, ModuleKey::Name(&name.to_lowercase()))
    }

    /// Iteration yields modules in insertion order of their base (§3).
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Permission;
    use crate::regions::{MemoryRegion, MemoryState};

    fn region(base: u64, size: u64) -> MemoryRegion {
        MemoryRegion {
            base,
            size,
            protection: Permission::READ | Permission::EXEC,
            state: MemoryState::Commit,
            info: None,
        }
    }

    #[test]
    fn find_by_address_returns_owning_module_only() {
        let mut regions = RegionTable::new();
        regions.insert(region(0x1000, 0x2000));
        regions.insert(region(0x5000, 0x1000));

        let mut table = ModuleTable::new();
        table.add(&mut regions, 0x1000, 0x2000, "C:\\Windows\\ntdll.dll".into()).unwrap();

        let found = table.find(&regions, ModuleKey::Address(0x1500)).unwrap();
        assert_eq!(found.base, 0x1000);
        assert!(table.find(&regions, ModuleKey::Address(0x5500)).is_none());
        assert!(table.find(&regions, ModuleKey::Address(0x3500)).is_none());
    }

    #[test]
    fn name_lookup_is_case_insensitive_via_lowercased_key() {
        let mut regions = RegionTable::new();
        regions.insert(region(0x1000, 0x2000));
        let mut table = ModuleTable::new();
        table.add(&mut regions, 0x1000, 0x2000, "C:\\Windows\\ntdll.dll".into()).unwrap();

        assert!(table.find_by_name_ci(&regions, "NTDLL.DLL").is_some());
    }

    #[test]
    fn add_without_matching_region_fails() {
        let mut regions = RegionTable::new();
        let mut table = ModuleTable::new();
        assert!(table.add(&mut regions, 0x9000, 0x1000, "x.dll".into()).is_err());
    }
}
