//! Component E — Address-Space Loader. Walks the dump's memory-info and
//! memory-segment streams, maps committed regions into the engine, and
//! picks a first-fit free region for the synthetic bump arena.

use log::{debug, warn};

use crate::dump::MinidumpSource;
use crate::engine::{CpuEngine, Permission};
use crate::error::{DumpulatorError, Result};
use crate::memory::BumpArena;
use crate::regions::{MemoryRegion, MemoryState, RegionTable};

pub struct LoadResult {
    pub regions: RegionTable,
    pub arena: BumpArena,
}

/// Minimum span of free address space we'll accept for the bump arena.
/// Below this the session would exhaust it on the first handful of
/// allocations the syscall handlers make.
const MIN_ARENA_SIZE: u64 = 0x1000;

pub fn load<E: CpuEngine, S: MinidumpSource>(
    engine: &mut E,
    source: &S,
    requested_arena_size: u64,
) -> Result<LoadResult> {
    let mut regions = RegionTable::new();
    let mut arena_base = None;

    for info in source.memory_info()? {
        let state = if info.committed {
            MemoryState::Commit
        } else {
            MemoryState::Free
        };
        if state == MemoryState::Free {
            if arena_base.is_none() && info.size >= requested_arena_size.max(MIN_ARENA_SIZE) {
                arena_base = Some(info.base);
            }
            regions.insert(MemoryRegion {
                base: info.base,
                size: info.size,
                protection: Permission::empty(),
                state,
                info: None,
            });
            continue;
        }
        regions.insert(MemoryRegion {
            base: info.base,
            size: info.size,
            protection: info.protection,
            state,
            info: None,
        });
        engine.map(info.base, info.size, info.protection)?;
    }

    for segment in source.memory_segments()? {
        let region = regions.find_containing(segment.base);
        if region.map(|r| r.state) != Some(MemoryState::Commit) {
            warn!(
                "memory segment at {:#x} has no matching committed region; skipping",
                segment.base
            );
            continue;
        }
        debug!("writing {} bytes at {:#x}", segment.data.len(), segment.base);
        engine.mem_write(segment.base, &segment.data)?;
    }

    let arena_base = arena_base.ok_or_else(|| {
        DumpulatorError::ConfigFault("no free region large enough for the bump arena".into())
    })?;

    Ok(LoadResult {
        regions,
        arena: BumpArena::new(arena_base, requested_arena_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitness::Bitness;
    use crate::dump::{MemoryInfoEntry, MemorySegment, MinidumpSource, ModuleEntry, ThreadInfo};
    use crate::testutil::FakeEngine;

    struct FakeSource {
        info: Vec<MemoryInfoEntry>,
        segments: Vec<MemorySegment>,
    }

    impl MinidumpSource for FakeSource {
        fn bitness(&self) -> Bitness {
            Bitness::X64
        }
        fn memory_info(&self) -> Result<Vec<MemoryInfoEntry>> {
            Ok(self.info.clone())
        }
        fn memory_segments(&self) -> Result<Vec<MemorySegment>> {
            Ok(self.segments.clone())
        }
        fn modules(&self) -> Result<Vec<ModuleEntry>> {
            Ok(Vec::new())
        }
        fn module_raw_bytes(&self, _path: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }
        fn main_thread(&self) -> Result<ThreadInfo> {
            unimplemented!()
        }
    }

    #[test]
    fn picks_first_free_region_large_enough_for_arena() {
        let source = FakeSource {
            info: vec![
                MemoryInfoEntry { base: 0x1000, size: 0x1000, protection: Permission::READ, committed: true },
                MemoryInfoEntry { base: 0x2000, size: 0x500, protection: Permission::empty(), committed: false },
                MemoryInfoEntry { base: 0x3000, size: 0x2000, protection: Permission::empty(), committed: false },
            ],
            segments: vec![],
        };
        let mut engine = FakeEngine::new();
        let result = load(&mut engine, &source, 0x1000).unwrap();
        assert_eq!(result.arena.base(), 0x3000);
    }

    #[test]
    fn no_large_enough_region_is_an_error() {
        let source = FakeSource {
            info: vec![MemoryInfoEntry { base: 0x1000, size: 0x10, protection: Permission::empty(), committed: false }],
            segments: vec![],
        };
        let mut engine = FakeEngine::new();
        assert!(load(&mut engine, &source, 0x1000).is_err());
    }
}
