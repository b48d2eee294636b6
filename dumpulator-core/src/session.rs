//! Component I — Emulator Controller. Owns every other component and is the
//! crate's single public entry point: load a dump, call into it, read the
//! result.

use std::cell::RefCell;
use std::rc::Rc;

use log::{error, warn};

use crate::arguments::ArgumentView;
use crate::bitness::Bitness;
use crate::context;
use crate::dump::MinidumpSource;
use crate::engine::{CpuEngine, MemFault, Mode, SessionHooks, TrappedInsn};
use crate::error::{DumpulatorError, MemoryAccessKind, Result};
use crate::gdt::{self, SegmentLayout};
use crate::loader;
use crate::memory::{BumpArena, MemoryServices};
use crate::modules::ModuleTable;
use crate::regions::RegionTable;
use crate::registers::RegisterFile;
use crate::syscalls::{self, SyscallTable};

/// Pseudo-handles Windows reserves for "the current process"/"the current
/// thread", used by callers composing `NtCurrentProcess()`/`NtCurrentThread()`
/// style arguments without a real handle table.
const CURRENT_PROCESS: u64 = u64::MAX;
const CURRENT_THREAD: u64 = u64::MAX - 1;

/// §6 fixed memory layout: one page, filled with `0xCC`, whose base also
/// serves as the sentinel `call` watches for to recognize normal return.
pub const CAVE_ADDR: u64 = 0x5000;
const CAVE_SIZE: u64 = 0x1000;

/// Everything a loaded dump needs to run guest code: the engine, the
/// address-space/module/syscall indexes built from it, and the one
/// session-wide outcome (`last_fault`/`exit_code`) a hook can record.
pub struct EmulatorSession<E: CpuEngine> {
    engine: E,
    bitness: Bitness,
    regions: RegionTable,
    modules: ModuleTable,
    syscalls: SyscallTable,
    arena: BumpArena,
    segments: SegmentLayout,
    exit_code: Option<i32>,
    last_fault: Option<DumpulatorError>,
    trace: bool,
}

impl EmulatorSession<crate::engine::unicorn::UnicornEngine> {
    /// Loads `source` through the full E -> D -> G -> F -> H construction
    /// order (§2): map the address space, index modules, restore the
    /// thread context, synthesize the GDT, build the syscall table — then
    /// wrap it all as the session (I).
    pub fn load<S: MinidumpSource>(source: &S, config: crate::config::SessionConfig) -> Result<Self> {
        let bitness = source.bitness();
        let mode = match bitness {
            Bitness::X64 => Mode::Bits64,
            Bitness::X86 => Mode::Bits32,
        };
        let mut engine = crate::engine::unicorn::UnicornEngine::new(mode)?;
        let trace = config.trace;
        Self::build(&mut engine, source, config).map(|(regions, modules, syscalls, arena, segments)| {
            EmulatorSession {
                engine,
                bitness,
                regions,
                modules,
                syscalls,
                arena,
                segments,
                exit_code: None,
                last_fault: None,
                trace,
            }
        })
    }
}

impl<E: CpuEngine> EmulatorSession<E> {
    #[allow(clippy::type_complexity)]
    fn build<S: MinidumpSource>(
        engine: &mut E,
        source: &S,
        config: crate::config::SessionConfig,
    ) -> Result<(RegionTable, ModuleTable, SyscallTable, BumpArena, SegmentLayout)> {
        let bitness = source.bitness();

        // E: address-space loader.
        let loader::LoadResult { mut regions, mut arena } = loader::load(engine, source, config.arena_size)?;

        // D: module table, populated from the dump's module list plus each
        // module's parsed PE export directory.
        let mut modules = ModuleTable::new();
        for entry in source.modules()? {
            let index = modules.add(&mut regions, entry.base, entry.size, entry.path.clone())?;
            if let Ok(raw) = source.module_raw_bytes(&entry.path) {
                if let Ok(pe) = crate::pe::GoblinPe::parse(raw) {
                    modules.get_mut(index).parse_pe(&pe, entry.base)?;
                }
            }
        }

        // G: thread-context restorer.
        let thread = source.main_thread()?;
        context::restore(engine, bitness, &thread)?;

        // F: GDT/segment setup, needs the TEB address context just restored.
        let segments = gdt::setup(engine, bitness, &mut arena, thread.teb_address)?;

        // H: syscall table, needs modules populated above.
        let syscalls = SyscallTable::build(&modules, &regions)?;
        SyscallTable::patch_wow64_transition(&modules, engine, bitness)?;

        // I: the code cave, the sentinel `call` returns control to.
        engine.map(CAVE_ADDR, CAVE_SIZE, crate::engine::Permission::READ | crate::engine::Permission::EXEC)?;
        engine.mem_write(CAVE_ADDR, &vec![0xCCu8; CAVE_SIZE as usize])?;

        Ok((regions, modules, syscalls, arena, segments))
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn last_fault(&self) -> Option<&DumpulatorError> {
        self.last_fault.as_ref()
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn segments(&self) -> &SegmentLayout {
        &self.segments
    }

    pub fn registers(&mut self) -> RegisterFile<'_, E> {
        RegisterFile::new(&mut self.engine, self.bitness)
    }

    pub fn memory(&mut self) -> MemoryServices<'_, E> {
        MemoryServices::new(&mut self.engine, self.bitness, &mut self.arena)
    }

    pub fn arguments(&mut self) -> ArgumentView<'_, E> {
        ArgumentView::new(&mut self.engine, self.bitness, &mut self.arena)
    }

    pub const fn current_process() -> u64 {
        CURRENT_PROCESS
    }

    pub const fn current_thread() -> u64 {
        CURRENT_THREAD
    }

    pub fn stop(&mut self, exit_code: Option<i32>) -> Result<()> {
        self.exit_code = exit_code.or(self.exit_code);
        self.engine.emu_stop()
    }

    /// §4.I `start`: run from `begin` until `until`, for at most `count`
    /// instructions (0 = unbounded), with this session installed as the
    /// engine's hook vtable.
    pub fn start(this: Rc<RefCell<Self>>, begin: u64, until: u64, count: usize) -> Result<()> {
        {
            let mut session = this.borrow_mut();
            let trace = session.trace;
            session.engine.install_hooks(this.clone(), trace)?;
        }
        let mut session = this.borrow_mut();
        session.engine.emu_start(begin, until, count)
    }

    /// §4.I `call(addr, args, count=0)`: places arguments per the calling
    /// convention, pushes [`CAVE_ADDR`] as the return address, starts the
    /// engine at `addr` until it reaches the cave, and returns `cax`. The
    /// stack frame is laid out so `ArgumentView::get`'s own offset formula
    /// (`[csp + (i+1)*ptr]` on x86-64, `[csp + (i+2)*4]` on x86) addresses
    /// the same slots this writes, rather than pushing args one at a time.
    pub fn call(this: Rc<RefCell<Self>>, address: u64, args: &[u64], count: usize) -> Result<u64> {
        {
            let mut session = this.borrow_mut();
            let bitness = session.bitness;
            let csp = session.registers().csp()?;
            let ptr = bitness.pointer_size() as u64;

            // A zero-argument call reserves only the return-address slot, so
            // `sp` after the callee's `RET` is exactly the pre-call value
            // (§8 property 4 / scenario 4). Stack args beyond that get only
            // as many extra slots as `ArgumentView`'s own read offsets need.
            let new_csp = if bitness.is_x64() {
                for (i, &value) in args.iter().enumerate().take(4) {
                    session.arguments().set(i, value)?;
                }
                let stack_slots = if args.len() > 4 { args.len() as u64 } else { 0 };
                let new_csp = csp - ptr - stack_slots * ptr;
                for (i, &value) in args.iter().enumerate().skip(4) {
                    session.memory().write_ptr(new_csp + (i as u64 + 1) * ptr, value)?;
                }
                new_csp
            } else {
                let total_slots = if args.is_empty() { 1 } else { args.len() as u64 + 2 };
                let new_csp = csp - total_slots * ptr;
                for (i, &value) in args.iter().enumerate() {
                    session.memory().write_u32(new_csp + (i as u64 + 2) * ptr, value as u32)?;
                }
                new_csp
            };

            session.memory().write_ptr(new_csp, CAVE_ADDR)?;
            session.registers().set_csp(new_csp)?;
            session.registers().set_cip(address)?;
        }

        Self::start(this.clone(), address, CAVE_ADDR, count)?;

        let mut session = this.borrow_mut();
        session.registers().cax()
    }
}

/// Disassembles a single instruction for the trace log, same decoder the
/// teacher's inline-hook code uses to find an instruction's length before
/// patching over it.
fn decode_one(bytes: &[u8], address: u64, bitness: Bitness) -> Option<String> {
    use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

    let width = if bitness.is_x64() { 64 } else { 32 };
    let mut decoder = Decoder::with_ip(width, bytes, address, DecoderOptions::NONE);
    if !decoder.can_decode() {
        return None;
    }
    let insn = decoder.decode();
    let mut out = String::new();
    NasmFormatter::new().format(&insn, &mut out);
    Some(out)
}

impl<E: CpuEngine> SessionHooks for EmulatorSession<E> {
    fn on_mem_fault(&mut self, fault: MemFault, address: u64, size: usize, _value: i64) -> bool {
        let kind = match fault {
            MemFault::ReadUnmapped | MemFault::ReadProtected => MemoryAccessKind::Read,
            MemFault::WriteUnmapped | MemFault::WriteProtected => MemoryAccessKind::Write,
            MemFault::FetchUnmapped | MemFault::FetchProtected => MemoryAccessKind::Fetch,
        };
        let rip = self.registers().cip().unwrap_or(0);
        error!("{kind} access to {address:#x}[{size:#x}] faulted at rip={rip:#x}");
        self.last_fault = Some(DumpulatorError::UnmappedAccess { kind, address, size, rip });
        // The core never asks the engine to paper over a fault (§4.I):
        // always decline the repair-or-continue offer.
        false
    }

    fn on_code(&mut self, address: u64, size: u32) {
        if !self.trace {
            return;
        }
        match self.engine.mem_read(address, size as usize) {
            Ok(bytes) => match decode_one(&bytes, address, self.bitness) {
                Some(text) => log::trace!("{address:#x}: {text}"),
                None => log::trace!("{address:#x}: <undecodable, {size} bytes>"),
            },
            Err(e) => log::trace!("{address:#x}: <unreadable: {e}>"),
        }
    }

    fn on_insn(&mut self, insn: TrappedInsn) {
        let result = (|| -> Result<()> {
            let index = (self.registers().cax()? & 0xFFFF) as u32;
            let status = syscalls::dispatch(
                &self.syscalls,
                index,
                &mut self.engine,
                self.bitness,
                &mut self.arena,
                &mut self.exit_code,
            )?;
            self.registers().set_cax(status as u64)?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!("syscall dispatch failed ({insn:?}): {e}");
            self.last_fault = Some(e);
        }
    }

    fn on_intr(&mut self, number: u32) {
        warn!("unhandled interrupt {number:#x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeEngine;

    #[test]
    fn current_process_and_thread_are_distinct_sentinels() {
        assert_ne!(
            EmulatorSession::<FakeEngine>::current_process(),
            EmulatorSession::<FakeEngine>::current_thread()
        );
    }

    /// Builds a minimal session around a [`FakeEngine`] without a real
    /// minidump, for exercising `call`'s stack-frame construction in
    /// isolation (`FakeEngine::emu_start` never actually retires the callee,
    /// so this checks the frame `call` lays down, not a post-return state).
    fn fake_session(bitness: Bitness) -> Rc<RefCell<EmulatorSession<FakeEngine>>> {
        let mut engine = FakeEngine::new();
        engine.map(0, 0x10000, crate::engine::Permission::READ | crate::engine::Permission::WRITE).unwrap();

        let session = EmulatorSession {
            engine,
            bitness,
            regions: RegionTable::new(),
            modules: ModuleTable::new(),
            syscalls: SyscallTable::empty(),
            arena: BumpArena::new(0x8000, 0x1000),
            segments: SegmentLayout { cs: 0, ds: 0, ss: 0, fs: 0, gs: 0 },
            exit_code: None,
            last_fault: None,
            trace: false,
        };
        Rc::new(RefCell::new(session))
    }

    #[test]
    fn zero_arg_call_reserves_only_the_return_slot() {
        let session = fake_session(Bitness::X64);
        let ptr = Bitness::X64.pointer_size() as u64;
        let csp_before = 0x9000u64;
        session.borrow_mut().registers().set_csp(csp_before).unwrap();

        EmulatorSession::call(session.clone(), 0x1000, &[], 0).unwrap();

        let csp_after = session.borrow_mut().registers().csp().unwrap();
        assert_eq!(csp_after, csp_before - ptr);

        let pushed_return = session.borrow_mut().memory().read_ptr(csp_after).unwrap();
        assert_eq!(pushed_return, CAVE_ADDR);
    }
}
