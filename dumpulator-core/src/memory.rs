//! Component C — Memory Services. Typed read/write helpers, a NUL-terminated
//! string reader, and the bump allocator of synthetic pages (§3 `BumpArena`).

use crate::bitness::Bitness;
use crate::engine::{CpuEngine, Permission};
use crate::error::{DumpulatorError, Result};

/// Maximum bytes scanned for a terminating NUL by `read_str` (§4.C).
const MAX_STRING_LEN: usize = 512;

/// §3's `BumpArena`: `{base, cursor, limit}`, lazily mapped on first use.
pub struct BumpArena {
    base: u64,
    size: u64,
    cursor: Option<u64>,
}

impl BumpArena {
    pub fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            cursor: None,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }
}

pub struct MemoryServices<'a, E: CpuEngine> {
    engine: &'a mut E,
    bitness: Bitness,
    arena: &'a mut BumpArena,
}

impl<'a, E: CpuEngine> MemoryServices<'a, E> {
    pub fn new(engine: &'a mut E, bitness: Bitness, arena: &'a mut BumpArena) -> Self {
        Self {
            engine,
            bitness,
            arena,
        }
    }

    pub fn read(&mut self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.engine.mem_read(addr, size)
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.engine.mem_write(addr, data)
    }

    pub fn read_ptr(&mut self, addr: u64) -> Result<u64> {
        let size = self.bitness.pointer_size() as usize;
        let data = self.read(addr, size)?;
        Ok(le_to_u64(&data))
    }

    pub fn write_ptr(&mut self, addr: u64, value: u64) -> Result<()> {
        let size = self.bitness.pointer_size() as usize;
        self.write(addr, &value.to_le_bytes()[..size])
    }

    pub fn read_u32(&mut self, addr: u64) -> Result<u32> {
        let data = self.read(addr, 4)?;
        Ok(u32::from_le_bytes(data.try_into().unwrap()))
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn read_i32(&mut self, addr: u64) -> Result<i32> {
        let data = self.read(addr, 4)?;
        Ok(i32::from_le_bytes(data.try_into().unwrap()))
    }

    pub fn write_i32(&mut self, addr: u64, value: i32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Reads up to `MAX_STRING_LEN` bytes and decodes up to the first NUL
    /// with `encoding`. Only UTF-8 is implemented; callers asking for
    /// anything else get a configuration-style error rather than silently
    /// falling back, matching §4.C's "caller-chosen encoding".
    pub fn read_str(&mut self, addr: u64, encoding: StrEncoding) -> Result<String> {
        let data = self.read(addr, MAX_STRING_LEN)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        match encoding {
            StrEncoding::Utf8 => String::from_utf8(data[..end].to_vec())
                .map_err(|e| DumpulatorError::ConfigFault(format!("invalid utf-8 string: {e}"))),
            StrEncoding::Utf16Le => {
                let units: Vec<u16> = data[..end.saturating_sub(end % 2)]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map_err(|e| DumpulatorError::ConfigFault(format!("invalid utf-16 string: {e}")))
            }
        }
    }

    /// Push-one-slot helper used by the x86 `call` convention and by the
    /// thread-context restorer's stack bookkeeping. Advances `csp` down by
    /// one pointer and writes `value` there.
    pub fn push(&mut self, csp: u64, value: u64) -> Result<u64> {
        let new_csp = csp - self.bitness.pointer_size() as u64;
        self.write_ptr(new_csp, value)?;
        Ok(new_csp)
    }

    /// §4.C `allocate(size)`: lazily maps the arena's region on first call,
    /// returns `cursor + size` pre-increment, fails past `base + limit`.
    pub fn allocate(&mut self, size: u64) -> Result<u64> {
        if self.arena.cursor.is_none() {
            self.engine
                .map(self.arena.base, self.arena.size, Permission::READ | Permission::WRITE)?;
            self.arena.cursor = Some(self.arena.base);
        }
        let cursor = self.arena.cursor.unwrap();
        let next = cursor + size;
        if next > self.arena.base + self.arena.size {
            return Err(DumpulatorError::AllocatorExhausted {
                requested: size,
                remaining: (self.arena.base + self.arena.size).saturating_sub(cursor),
            });
        }
        self.arena.cursor = Some(next);
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrEncoding {
    Utf8,
    Utf16Le,
}

impl Default for StrEncoding {
    fn default() -> Self {
        StrEncoding::Utf8
    }
}

fn le_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeEngine;

    #[test]
    fn allocator_is_monotonic_and_lazy() {
        let mut engine = FakeEngine::new();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut mem = MemoryServices::new(&mut engine, Bitness::X64, &mut arena);

        assert!(mem.arena.cursor.is_none());
        let a = mem.allocate(0x10).unwrap();
        let b = mem.allocate(0x20).unwrap();
        assert_eq!(a, 0x2000_0010);
        assert_eq!(b, 0x2000_0030);
        assert!(b > a);
        assert_eq!(b - a, 0x20);
    }

    #[test]
    fn allocator_exhausts() {
        let mut engine = FakeEngine::new();
        let mut arena = BumpArena::new(0x2000_0000, 0x10);
        let mut mem = MemoryServices::new(&mut engine, Bitness::X64, &mut arena);
        assert!(mem.allocate(0x8).is_ok());
        assert!(matches!(
            mem.allocate(0x100),
            Err(DumpulatorError::AllocatorExhausted { .. })
        ));
    }

    #[test]
    fn ptr_round_trip() {
        let mut engine = FakeEngine::new();
        engine.map(0x1000, 0x1000, Permission::READ | Permission::WRITE).unwrap();
        let mut arena = BumpArena::new(0x2000_0000, 0x1000);
        let mut mem = MemoryServices::new(&mut engine, Bitness::X64, &mut arena);
        mem.write_ptr(0x1008, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read_ptr(0x1008).unwrap(), 0x1122_3344_5566_7788);
    }
}
