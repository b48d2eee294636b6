use std::path::Path;

use minidump::{Minidump, MinidumpMemory64List, MinidumpMemoryInfoList, MinidumpModuleList, MinidumpThreadList};
use minidump_common::format::MINIDUMP_MEMORY_INFO;

use super::{MemoryInfoEntry, MemorySegment, MinidumpSource, ModuleEntry, ThreadContext, ThreadInfo};
use crate::bitness::Bitness;
use crate::engine::Permission;
use crate::error::{DumpulatorError, Result};

pub struct FileMinidumpSource {
    dump: Minidump<'static, memmap2::Mmap>,
}

impl FileMinidumpSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dump = Minidump::read_path(path.as_ref())
            .map_err(|e| DumpulatorError::ConfigFault(format!("failed to read minidump: {e}")))?;
        Ok(Self { dump })
    }

    fn stream<T: minidump::MinidumpStream<'static>>(&self) -> Result<T> {
        self.dump
            .get_stream::<T>()
            .map_err(|e| DumpulatorError::ConfigFault(format!("missing minidump stream: {e}")))
    }
}

/// `AllocationProtect` -> engine permissions, per the fixed table: every
/// `PAGE_EXECUTE*` constant carries read, and both `*_WRITECOPY` variants
/// carry write, same as the copy-on-write and execute semantics Windows
/// itself grants the page.
fn to_permission(info: &MINIDUMP_MEMORY_INFO) -> Permission {
    use minidump_common::format::MemoryProtection;
    let prot = MemoryProtection::from_bits_truncate(info.protection);
    let mut perm = Permission::empty();
    if prot.intersects(
        MemoryProtection::PAGE_READONLY
            | MemoryProtection::PAGE_READWRITE
            | MemoryProtection::PAGE_WRITECOPY
            | MemoryProtection::PAGE_EXECUTE
            | MemoryProtection::PAGE_EXECUTE_READ
            | MemoryProtection::PAGE_EXECUTE_READWRITE
            | MemoryProtection::PAGE_EXECUTE_WRITECOPY,
    ) {
        perm |= Permission::READ;
    }
    if prot.intersects(
        MemoryProtection::PAGE_READWRITE
            | MemoryProtection::PAGE_WRITECOPY
            | MemoryProtection::PAGE_EXECUTE_READWRITE
            | MemoryProtection::PAGE_EXECUTE_WRITECOPY,
    ) {
        perm |= Permission::WRITE;
    }
    if prot.intersects(
        MemoryProtection::PAGE_EXECUTE
            | MemoryProtection::PAGE_EXECUTE_READ
            | MemoryProtection::PAGE_EXECUTE_READWRITE
            | MemoryProtection::PAGE_EXECUTE_WRITECOPY,
    ) {
        perm |= Permission::EXEC;
    }
    perm
}

impl MinidumpSource for FileMinidumpSource {
    fn bitness(&self) -> Bitness {
        match self.dump.system_info().map(|si| si.raw.processor_architecture) {
            Ok(9) => Bitness::X64, // PROCESSOR_ARCHITECTURE_AMD64
            _ => Bitness::X86,
        }
    }

    fn memory_info(&self) -> Result<Vec<MemoryInfoEntry>> {
        let list: MinidumpMemoryInfoList = self.stream()?;
        Ok(list
            .iter()
            .map(|info| MemoryInfoEntry {
                base: info.raw.base_address,
                size: info.raw.region_size,
                protection: to_permission(&info.raw),
                committed: info.raw.state == minidump_common::format::MemoryState::MEM_COMMIT.0,
            })
            .collect())
    }

    fn memory_segments(&self) -> Result<Vec<MemorySegment>> {
        let list: MinidumpMemory64List = self.stream()?;
        Ok(list
            .iter()
            .map(|mem| MemorySegment {
                base: mem.base_address,
                data: mem.bytes().to_vec(),
            })
            .collect())
    }

    fn modules(&self) -> Result<Vec<ModuleEntry>> {
        let list: MinidumpModuleList = self.stream()?;
        Ok(list
            .iter()
            .map(|m| ModuleEntry {
                base: m.raw.base_of_image,
                size: m.raw.size_of_image as u64,
                path: m.name.clone(),
            })
            .collect())
    }

    fn module_raw_bytes(&self, path: &str) -> Result<Vec<u8>> {
        Err(DumpulatorError::ConfigFault(format!(
            "module {path} not backed by file on disk; dump does not embed module bytes"
        )))
    }

    fn main_thread(&self) -> Result<ThreadInfo> {
        let list: MinidumpThreadList = self.stream()?;
        let thread = list
            .threads
            .first()
            .ok_or_else(|| DumpulatorError::ConfigFault("minidump has no threads".into()))?;
        let context = thread
            .context(&self.dump.system_info().ok(), None)
            .map_err(|e| DumpulatorError::ConfigFault(format!("failed to read thread context: {e}")))?;

        let mut gp = Vec::new();
        let mut mxcsr = 0;
        let mut eflags = 0;
        let (mut dr0, mut dr1, mut dr2, mut dr3, mut dr6, mut dr7) = (0, 0, 0, 0, 0, 0);

        if let Some(ctx) = context.raw.as_amd64() {
            gp = vec![
                ("rax", ctx.rax), ("rbx", ctx.rbx), ("rcx", ctx.rcx), ("rdx", ctx.rdx),
                ("rsi", ctx.rsi), ("rdi", ctx.rdi), ("rbp", ctx.rbp), ("rsp", ctx.rsp),
                ("r8", ctx.r8), ("r9", ctx.r9), ("r10", ctx.r10), ("r11", ctx.r11),
                ("r12", ctx.r12), ("r13", ctx.r13), ("r14", ctx.r14), ("r15", ctx.r15),
                ("rip", ctx.rip),
            ];
            mxcsr = ctx.mx_csr;
            eflags = ctx.e_flags;
            dr0 = ctx.dr0;
            dr1 = ctx.dr1;
            dr2 = ctx.dr2;
            dr3 = ctx.dr3;
            dr6 = ctx.dr6;
            dr7 = ctx.dr7;
        } else if let Some(ctx) = context.raw.as_x86() {
            gp = vec![
                ("eax", ctx.eax as u64), ("ebx", ctx.ebx as u64), ("ecx", ctx.ecx as u64),
                ("edx", ctx.edx as u64), ("esi", ctx.esi as u64), ("edi", ctx.edi as u64),
                ("ebp", ctx.ebp as u64), ("esp", ctx.esp as u64), ("eip", ctx.eip as u64),
            ];
            eflags = ctx.eflags;
            dr0 = ctx.dr0 as u64;
            dr1 = ctx.dr1 as u64;
            dr2 = ctx.dr2 as u64;
            dr3 = ctx.dr3 as u64;
            dr6 = ctx.dr6 as u64;
            dr7 = ctx.dr7 as u64;
        }

        Ok(ThreadInfo {
            teb_address: thread.raw.teb,
            context: ThreadContext {
                gp,
                mxcsr,
                eflags,
                dr0,
                dr1,
                dr2,
                dr3,
                dr6,
                dr7,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minidump_common::format::MemoryProtection;

    fn perm_for(bits: MemoryProtection) -> Permission {
        let info = MINIDUMP_MEMORY_INFO {
            base_address: 0,
            allocation_base: 0,
            allocation_protection: 0,
            __alignment1: 0,
            region_size: 0x1000,
            state: minidump_common::format::MemoryState::MEM_COMMIT.0,
            protection: bits.bits(),
            _type: 0,
            __alignment2: 0,
        };
        to_permission(&info)
    }

    #[test]
    fn writecopy_variants_carry_read_and_write() {
        assert_eq!(perm_for(MemoryProtection::PAGE_WRITECOPY), Permission::READ | Permission::WRITE);
        assert_eq!(
            perm_for(MemoryProtection::PAGE_EXECUTE_WRITECOPY),
            Permission::READ | Permission::WRITE | Permission::EXEC
        );
    }

    #[test]
    fn execute_alone_carries_read() {
        assert_eq!(perm_for(MemoryProtection::PAGE_EXECUTE), Permission::READ | Permission::EXEC);
    }
}
