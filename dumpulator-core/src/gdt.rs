//! Component F — GDT/Segment Setup. Synthesizes a 31-entry descriptor table
//! so the ring-3 CS/DS/SS and FS-or-GS selectors the dump's thread context
//! expects resolve to real segments, with FS/GS base pointing at the TEB.

use bitfield::bitfield;
use static_assertions::assert_eq_size;

use crate::bitness::Bitness;
use crate::engine::{CpuEngine, Permission};
use crate::error::Result;
use crate::memory::MemoryServices;

assert_eq_size!(Descriptor, u64);

/// Address the synthetic GDT is mapped at (§6 fixed memory layout).
pub const GDT_BASE: u64 = 0x3000;
const GDT_ENTRY_COUNT: u64 = 31;
const GDT_ENTRY_SIZE: u64 = 8;
pub const GDT_SIZE: u64 = GDT_ENTRY_COUNT * GDT_ENTRY_SIZE;

bitfield! {
    /// Raw 8-byte x86 segment descriptor, per the Intel SDM's layout:
    /// limit[15:0], base[23:0], access, limit[19:16]+flags, base[31:24].
    pub struct Descriptor(u64);
    impl Debug;
    u32, limit_low, set_limit_low: 15, 0;
    u32, base_low, set_base_low: 39, 16;
    u8, access, set_access: 47, 40;
    u8, limit_high, set_limit_high: 51, 48;
    u8, flags, set_flags: 55, 52;
    u8, base_high, set_base_high: 63, 56;
}

impl Descriptor {
    fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        let mut d = Descriptor(0);
        d.set_limit_low((limit & 0xFFFF) as u32);
        d.set_base_low(base & 0x00FF_FFFF);
        d.set_access(access);
        d.set_limit_high(((limit >> 16) & 0xF) as u8);
        d.set_flags(flags);
        d.set_base_high((base >> 24) as u8);
        d
    }
}

/// §4.F's fixed slot table.
const SLOT_WOW64_CODE: u64 = 6;
const SLOT_GS_DATA: u64 = 15;
const SLOT_DS: u64 = 16;
const SLOT_CS: u64 = 17;
const SLOT_SS: u64 = 18;
const SLOT_FS: u64 = 19;

/// Access byte bits: Present | S=1 (code/data, not system) | Ring | Type.
/// Direction/Conforming (bit 2) is always set, per §4.F.
const PRESENT_S: u8 = 0b1001_0000;
const DIRECTION_CONFORMING: u8 = 0b0000_0100;
const TYPE_CODE_READABLE: u8 = 0b0000_1010;
const TYPE_DATA_WRITABLE: u8 = 0b0000_0010;

fn access(ring: u8, type_bits: u8) -> u8 {
    PRESENT_S | ((ring & 0x3) << 5) | DIRECTION_CONFORMING | type_bits
}

/// Flags nibble: G (granularity) | D/B or L (64-bit) | reserved | AVL.
const FLAGS_GRANULAR_32BIT: u8 = 0b1100;
const FLAGS_GRANULAR_64BIT: u8 = 0b1010;
const FLAGS_BYTE_GRANULAR: u8 = 0b0000;

const LIMIT_FLAT: u32 = 0xFFFFF;
const LIMIT_PAGE: u32 = 0x000;

pub struct SegmentLayout {
    pub cs: u16,
    pub ds: u16,
    pub ss: u16,
    pub fs: u16,
    pub gs: u16,
}

fn selector(slot: u64, privilege: u8) -> u16 {
    ((slot << 3) as u16) | (privilege as u16 & 0x3)
}

/// Writes the descriptor table to [`GDT_BASE`], maps it, loads it into the
/// engine's GDTR, and returns the selectors appropriate for `bitness`. `teb`
/// is the thread's TEB address, folded into the FS (x86) or GS (x86-64)
/// descriptor's base.
pub fn setup<E: CpuEngine>(
    engine: &mut E,
    bitness: Bitness,
    arena_placeholder: &mut crate::memory::BumpArena,
    teb: u64,
) -> Result<SegmentLayout> {
    engine.map(GDT_BASE, GDT_SIZE, Permission::READ | Permission::WRITE)?;

    let code_flags = match bitness {
        Bitness::X64 => FLAGS_GRANULAR_64BIT,
        Bitness::X86 => FLAGS_GRANULAR_32BIT,
    };

    let mut table = vec![0u64; GDT_ENTRY_COUNT as usize];
    table[SLOT_WOW64_CODE as usize] =
        Descriptor::new(0, LIMIT_FLAT, access(3, TYPE_CODE_READABLE), FLAGS_GRANULAR_32BIT).0;
    table[SLOT_GS_DATA as usize] =
        Descriptor::new(teb as u32, LIMIT_PAGE, access(3, TYPE_DATA_WRITABLE), FLAGS_BYTE_GRANULAR).0;
    table[SLOT_DS as usize] =
        Descriptor::new(0, LIMIT_FLAT, access(3, TYPE_DATA_WRITABLE), FLAGS_GRANULAR_32BIT).0;
    table[SLOT_CS as usize] =
        Descriptor::new(0, LIMIT_FLAT, access(3, TYPE_CODE_READABLE), code_flags).0;
    table[SLOT_SS as usize] =
        Descriptor::new(0, LIMIT_FLAT, access(0, TYPE_DATA_WRITABLE), FLAGS_GRANULAR_32BIT).0;
    table[SLOT_FS as usize] =
        Descriptor::new(teb as u32, LIMIT_FLAT, access(3, TYPE_DATA_WRITABLE), FLAGS_GRANULAR_32BIT).0;

    let mut mem = MemoryServices::new(engine, bitness, arena_placeholder);
    for (i, entry) in table.iter().enumerate() {
        mem.write(GDT_BASE + i as u64 * GDT_ENTRY_SIZE, &entry.to_le_bytes())?;
    }

    engine.load_gdtr(GDT_BASE, (GDT_SIZE - 1) as u16)?;

    let cs = selector(SLOT_CS, 3);
    let ds = selector(SLOT_DS, 3);
    let ss = selector(SLOT_SS, 0);

    Ok(match bitness {
        Bitness::X64 => SegmentLayout {
            cs,
            ds,
            ss,
            fs: 0,
            gs: selector(SLOT_GS_DATA, 3),
        },
        Bitness::X86 => SegmentLayout {
            cs,
            ds,
            ss,
            fs: selector(SLOT_FS, 3),
            gs: 0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_packs_slot_and_privilege() {
        assert_eq!(selector(SLOT_GS_DATA, 3), 0x7B);
        assert_eq!(selector(SLOT_DS, 3), (SLOT_DS as u16) << 3 | 3);
    }

    #[test]
    fn gdtr_limit_covers_exactly_31_entries() {
        assert_eq!(GDT_SIZE - 1, 0xF7);
    }

    #[test]
    fn access_byte_always_sets_direction_conforming() {
        assert_eq!(access(3, TYPE_DATA_WRITABLE), 0xF6);
        assert_eq!(access(0, TYPE_CODE_READABLE), 0x9E);
    }

    #[test]
    fn gs_descriptor_base_matches_teb() {
        let teb = 0x7FF000u64;
        let d = Descriptor::new(teb as u32, LIMIT_PAGE, access(3, TYPE_DATA_WRITABLE), FLAGS_BYTE_GRANULAR);
        let base = (d.base_low() as u64) | ((d.base_high() as u64) << 24);
        assert_eq!(base, teb);
    }
}
