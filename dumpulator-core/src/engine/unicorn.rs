//! Default `CpuEngine` backed by the `unicorn-engine` crate, the standard
//! Rust binding to the Unicorn CPU emulator and the direct equivalent of the
//! original's `unicorn` Python binding.

use std::cell::RefCell;
use std::rc::Rc;

use unicorn_engine::unicorn_const::{HookType, MemType};
use unicorn_engine::{RegisterX86, Unicorn};

use super::{CpuEngine, MemFault, Mode, Permission, RegId, SessionHooks, TrappedInsn};
use crate::error::{DumpulatorError, Result};

fn to_unicorn_perm(perm: Permission) -> unicorn_engine::unicorn_const::Permission {
    use unicorn_engine::unicorn_const::Permission as UcPerm;
    let mut out = UcPerm::NONE;
    if perm.contains(Permission::READ) {
        out |= UcPerm::READ;
    }
    if perm.contains(Permission::WRITE) {
        out |= UcPerm::WRITE;
    }
    if perm.contains(Permission::EXEC) {
        out |= UcPerm::EXEC;
    }
    out
}

fn to_unicorn_reg(reg: RegId) -> RegisterX86 {
    macro_rules! map {
        ($($from:ident => $to:ident),+ $(,)?) => {
            match reg {
                $(RegId::$from => RegisterX86::$to),+
            }
        };
    }
    map! {
        Ah => AH, Al => AL, Ax => AX,
        Bh => BH, Bl => BL, Bp => BP, Bpl => BPL, Bx => BX,
        Ch => CH, Cl => CL, Cs => CS, Cx => CX,
        Dh => DH, Di => DI, Dil => DIL, Dl => DL, Ds => DS, Dx => DX,
        Eax => EAX, Ebp => EBP, Ebx => EBX, Ecx => ECX, Edi => EDI,
        Edx => EDX, Eflags => EFLAGS, Eip => EIP, Es => ES,
        Esi => ESI, Esp => ESP,
        Fs => FS, Gs => GS,
        Rax => RAX, Rbp => RBP, Rbx => RBX, Rcx => RCX, Rdi => RDI,
        Rdx => RDX, Rip => RIP, Rsi => RSI, Rsp => RSP,
        Si => SI, Sil => SIL, Sp => SP, Spl => SPL, Ss => SS,
        Cr0 => CR0, Cr2 => CR2, Cr3 => CR3, Cr4 => CR4, Cr8 => CR8,
        Dr0 => DR0, Dr1 => DR1, Dr2 => DR2, Dr3 => DR3, Dr6 => DR6, Dr7 => DR7,
        R8 => R8, R9 => R9, R10 => R10, R11 => R11, R12 => R12, R13 => R13, R14 => R14, R15 => R15,
        R8d => R8D, R9d => R9D, R10d => R10D, R11d => R11D,
        R12d => R12D, R13d => R13D, R14d => R14D, R15d => R15D,
        R8w => R8W, R9w => R9W, R10w => R10W, R11w => R11W,
        R12w => R12W, R13w => R13W, R14w => R14W, R15w => R15W,
        R8b => R8B, R9b => R9B, R10b => R10B, R11b => R11B,
        R12b => R12B, R13b => R13B, R14b => R14B, R15b => R15B,
        St0 => ST0, St1 => ST1, St2 => ST2, St3 => ST3,
        St4 => ST4, St5 => ST5, St6 => ST6, St7 => ST7,
        Mm0 => MM0, Mm1 => MM1, Mm2 => MM2, Mm3 => MM3,
        Mm4 => MM4, Mm5 => MM5, Mm6 => MM6, Mm7 => MM7,
        Xmm0 => XMM0, Xmm1 => XMM1, Xmm2 => XMM2, Xmm3 => XMM3,
        Xmm4 => XMM4, Xmm5 => XMM5, Xmm6 => XMM6, Xmm7 => XMM7,
        Xmm8 => XMM8, Xmm9 => XMM9, Xmm10 => XMM10, Xmm11 => XMM11,
        Xmm12 => XMM12, Xmm13 => XMM13, Xmm14 => XMM14, Xmm15 => XMM15,
        Ymm0 => YMM0, Ymm1 => YMM1, Ymm2 => YMM2, Ymm3 => YMM3,
        Ymm4 => YMM4, Ymm5 => YMM5, Ymm6 => YMM6, Ymm7 => YMM7,
        Ymm8 => YMM8, Ymm9 => YMM9, Ymm10 => YMM10, Ymm11 => YMM11,
        Ymm12 => YMM12, Ymm13 => YMM13, Ymm14 => YMM14, Ymm15 => YMM15,
        Zmm0 => ZMM0, Zmm1 => ZMM1, Zmm2 => ZMM2, Zmm3 => ZMM3,
        Zmm4 => ZMM4, Zmm5 => ZMM5, Zmm6 => ZMM6, Zmm7 => ZMM7,
        K0 => K0, K1 => K1, K2 => K2, K3 => K3, K4 => K4, K5 => K5, K6 => K6, K7 => K7,
        Tr => TR, Idtr => IDTR, Gdtr => GDTR, Ldtr => LDTR,
        FpCw => FPCW, FpTag => FPTAG, Msr => MSR, Mxcsr => MXCSR,
        FsBase => FS_BASE, GsBase => GS_BASE,
    }
}

/// `Unicorn`'s `user_data` slot holds the session's hook vtable; hook
/// trampolines recover it and forward into `SessionHooks`, keeping the
/// engine itself ignorant of `EmulatorSession`'s concrete type (Design
/// Note: "the engine stores an opaque pointer to the session and invokes a
/// vtable of hook methods").
type Hooks = Rc<RefCell<dyn SessionHooks>>;

pub struct UnicornEngine {
    uc: Unicorn<'static, Hooks>,
}

impl UnicornEngine {
    pub fn new(mode: Mode) -> Result<Self> {
        use unicorn_engine::unicorn_const::{Arch, Mode as UcMode};
        let uc_mode = match mode {
            Mode::Bits32 => UcMode::MODE_32,
            Mode::Bits64 => UcMode::MODE_64,
        };
        let uc = Unicorn::new_with_data(Arch::X86, uc_mode, Rc::new(RefCell::new(NullHooks)))
            .map_err(|e| DumpulatorError::Engine(format!("{e:?}")))?;
        Ok(Self { uc })
    }
}

/// Placeholder installed before the real session hooks exist; `install_hooks`
/// replaces it with the live session before construction finishes.
struct NullHooks;
impl SessionHooks for NullHooks {
    fn on_mem_fault(&mut self, _: MemFault, _: u64, _: usize, _: i64) -> bool {
        false
    }
    fn on_code(&mut self, _: u64, _: u32) {}
    fn on_insn(&mut self, _: TrappedInsn) {}
    fn on_intr(&mut self, _: u32) {}
}

impl CpuEngine for UnicornEngine {
    fn map(&mut self, addr: u64, size: u64, perm: Permission) -> Result<()> {
        self.uc
            .mem_map(addr, size as usize, to_unicorn_perm(perm))
            .map_err(|e| DumpulatorError::Engine(format!("mem_map({addr:#x}, {size:#x}): {e:?}")))
    }

    fn mem_write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.uc
            .mem_write(addr, data)
            .map_err(|e| DumpulatorError::Engine(format!("mem_write({addr:#x}): {e:?}")))
    }

    fn mem_read(&mut self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.uc
            .mem_read_as_vec(addr, size)
            .map_err(|e| DumpulatorError::Engine(format!("mem_read({addr:#x}): {e:?}")))
    }

    fn reg_read(&self, reg: RegId) -> Result<u64> {
        self.uc
            .reg_read(to_unicorn_reg(reg))
            .map_err(|e| DumpulatorError::Engine(format!("reg_read({reg:?}): {e:?}")))
    }

    fn reg_write(&mut self, reg: RegId, value: u64) -> Result<()> {
        self.uc
            .reg_write(to_unicorn_reg(reg), value)
            .map_err(|e| DumpulatorError::Engine(format!("reg_write({reg:?}): {e:?}")))
    }

    fn reg_read_wide(&self, reg: RegId) -> Result<Vec<u8>> {
        self.uc
            .reg_read_long(to_unicorn_reg(reg))
            .map(|v| v.to_le_bytes().to_vec())
            .map_err(|e| DumpulatorError::Engine(format!("reg_read_wide({reg:?}): {e:?}")))
    }

    fn reg_write_wide(&mut self, reg: RegId, value: &[u8]) -> Result<()> {
        let mut buf = [0u8; 16];
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        self.uc
            .reg_write_long(to_unicorn_reg(reg), u128::from_le_bytes(buf))
            .map_err(|e| DumpulatorError::Engine(format!("reg_write_wide({reg:?}): {e:?}")))
    }

    fn install_hooks(&mut self, hooks: Hooks, trace: bool) -> Result<()> {
        self.uc.set_data(hooks);

        self.uc
            .add_mem_hook(
                HookType::MEM_READ_UNMAPPED
                    | HookType::MEM_WRITE_UNMAPPED
                    | HookType::MEM_FETCH_UNMAPPED
                    | HookType::MEM_READ_PROT
                    | HookType::MEM_WRITE_PROT
                    | HookType::MEM_FETCH_PROT,
                0,
                u64::MAX,
                |uc, mem_type, address, size, value| {
                    let fault = match mem_type {
                        MemType::READ_UNMAPPED => MemFault::ReadUnmapped,
                        MemType::WRITE_UNMAPPED => MemFault::WriteUnmapped,
                        MemType::FETCH_UNMAPPED => MemFault::FetchUnmapped,
                        MemType::READ_PROT => MemFault::ReadProtected,
                        MemType::WRITE_PROT => MemFault::WriteProtected,
                        _ => MemFault::FetchProtected,
                    };
                    uc.get_data().borrow_mut().on_mem_fault(fault, address, size, value)
                },
            )
            .map_err(|e| DumpulatorError::Engine(format!("hook_mem_invalid: {e:?}")))?;

        if trace {
            self.uc
                .add_code_hook(0, u64::MAX, |uc, address, size| {
                    uc.get_data().borrow_mut().on_code(address, size as u32);
                })
                .map_err(|e| DumpulatorError::Engine(format!("hook_code: {e:?}")))?;
        }

        self.uc
            .add_insn_sys_hook(
                unicorn_engine::InsnSysX86::SYSCALL,
                0,
                u64::MAX,
                |uc| uc.get_data().borrow_mut().on_insn(TrappedInsn::Syscall),
            )
            .map_err(|e| DumpulatorError::Engine(format!("hook_insn(syscall): {e:?}")))?;

        self.uc
            .add_insn_sys_hook(
                unicorn_engine::InsnSysX86::SYSENTER,
                0,
                u64::MAX,
                |uc| uc.get_data().borrow_mut().on_insn(TrappedInsn::Sysenter),
            )
            .map_err(|e| DumpulatorError::Engine(format!("hook_insn(sysenter): {e:?}")))?;

        self.uc
            .add_intr_hook(|uc, number| uc.get_data().borrow_mut().on_intr(number))
            .map_err(|e| DumpulatorError::Engine(format!("hook_intr: {e:?}")))?;

        Ok(())
    }

    fn emu_start(&mut self, begin: u64, until: u64, count: usize) -> Result<()> {
        self.uc
            .emu_start(begin, until, 0, count)
            .map_err(|e| DumpulatorError::Engine(format!("emu_start: {e:?}")))
    }

    fn emu_stop(&mut self) -> Result<()> {
        self.uc
            .emu_stop()
            .map_err(|e| DumpulatorError::Engine(format!("emu_stop: {e:?}")))
    }

    fn load_gdtr(&mut self, base: u64, limit: u16) -> Result<()> {
        let mmr = unicorn_engine::X86Mmr {
            selector: 0,
            base,
            limit: limit as u32,
            flags: 0,
        };
        self.uc
            .reg_write_x86_mmr(RegisterX86::GDTR, mmr)
            .map_err(|e| DumpulatorError::Engine(format!("load_gdtr: {e:?}")))
    }
}
