//! Component H — Syscall Dispatcher. Builds the `Zw*` service-number table
//! from ntdll and routes trapped `SYSCALL`/`SYSENTER` instructions to a
//! handler, writing the NTSTATUS result back into the caller's return
//! register.

mod handlers;
mod table;

pub use handlers::{ArgKind, HandlerSpec, STATUS_NOT_IMPLEMENTED, STATUS_SUCCESS};
pub use table::{SyscallEntry, SyscallTable, WOW64_TRANSITION_PATCH};

use log::warn;

use crate::arguments::ArgumentView;
use crate::bitness::Bitness;
use crate::engine::CpuEngine;
use crate::error::{DumpulatorError, Result};
use crate::memory::BumpArena;

/// Dispatches one trapped syscall: resolves `index` to a `Zw*` name via
/// `table`, looks up (or falls back to) a handler, reads exactly as many
/// arguments as the handler's descriptor names, calls it, and returns the
/// NTSTATUS-shaped result the caller should see in `cax`.
///
/// Per §7, an out-of-range or unregistered service number is not fatal: it
/// is logged and answered with [`STATUS_NOT_IMPLEMENTED`] rather than
/// propagated as a hard [`DumpulatorError`] that would abort the session.
pub fn dispatch<E: CpuEngine>(
    table: &SyscallTable,
    index: u32,
    engine: &mut E,
    bitness: Bitness,
    arena: &mut BumpArena,
    exit_code: &mut Option<i32>,
) -> Result<i64> {
    let entry = table.get(index);
    let name = entry.map(|e| e.name.as_str());

    let spec: HandlerSpec<E> = match name.and_then(handlers::lookup) {
        Some(spec) => spec,
        None => {
            warn!("unimplemented syscall index {index:#x} ({name:?})");
            if entry.is_none() {
                return Err(DumpulatorError::UnimplementedSyscall {
                    index,
                    name: name.map(str::to_string),
                });
            }
            handlers::unimplemented()
        }
    };

    let mut args = Vec::with_capacity(spec.args.len());
    {
        let mut view = ArgumentView::new(engine, bitness, arena);
        for i in 0..spec.args.len() {
            args.push(view.get(i)?);
        }
    }

    let mut ctx = handlers::SyscallContext {
        args: &args,
        engine,
        bitness,
        arena,
        exit_code,
    };
    (spec.call)(&mut ctx)
}
