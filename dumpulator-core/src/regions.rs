//! §3 `MemoryRegion` and the region index the address-space loader builds
//! and the module table and loader both consult.
//!
//! Design Note: region <-> module is a back-reference, not an ownership
//! cycle. `MemoryRegion` owns bytes/permissions; `info` is a non-owning
//! index into the module table's own `Vec<Module>`, not a pointer to the
//! module itself.

use std::collections::BTreeMap;

use crate::engine::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Commit,
    Free,
    Reserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub size: u64,
    pub protection: Permission,
    pub state: MemoryState,
    /// Non-owning index into `ModuleTable`'s module vector, set once a
    /// module claims this region via `ModuleTable::add`.
    pub info: Option<usize>,
}

impl MemoryRegion {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// Non-overlapping, base-ordered index of regions, built once by the
/// address-space loader and then consulted (read-mostly) for the rest of
/// the session's life.
#[derive(Default)]
pub struct RegionTable {
    by_base: BTreeMap<u64, MemoryRegion>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: MemoryRegion) {
        self.by_base.insert(region.base, region);
    }

    /// §4.D: "locates the single memory region that starts exactly at base".
    pub fn find_exact(&self, base: u64) -> Option<&MemoryRegion> {
        self.by_base.get(&base)
    }

    pub fn find_exact_mut(&mut self, base: u64) -> Option<&mut MemoryRegion> {
        self.by_base.get_mut(&base)
    }

    /// Region containing `addr`, used by `ModuleTable::find(int)` and by
    /// §8's "any addr in [module.base, module.base+size)" property.
    pub fn find_containing(&self, addr: u64) -> Option<&MemoryRegion> {
        self.by_base
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.by_base.values()
    }
}
