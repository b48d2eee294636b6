//! Engine-neutral register identifiers and the name -> id table behind
//! `registers::RegisterFile`.
//!
//! Design Note: the original leans on Python's dynamic attribute dispatch
//! (`__getattr__`/`__setattr__` over a dict). Here that becomes a static
//! table built once from a declarative list, with a second, bitness-gated
//! alias table (`cax`, `cip`, ...) layered on top of it.

macro_rules! regids {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum RegId {
            $($variant),+
        }

        /// Canonical architectural names, in declaration order.
        pub static NAME_TABLE: &[(&str, RegId)] = &[
            $(($name, RegId::$variant)),+
        ];
    };
}

regids! {
    Ah => "ah", Al => "al", Ax => "ax",
    Bh => "bh", Bl => "bl", Bp => "bp", Bpl => "bpl", Bx => "bx",
    Ch => "ch", Cl => "cl", Cs => "cs", Cx => "cx",
    Dh => "dh", Di => "di", Dil => "dil", Dl => "dl", Ds => "ds", Dx => "dx",
    Eax => "eax", Ebp => "ebp", Ebx => "ebx", Ecx => "ecx", Edi => "edi",
    Edx => "edx", Eflags => "eflags", Eip => "eip", Es => "es",
    Esi => "esi", Esp => "esp",
    Fs => "fs", Gs => "gs",
    Rax => "rax", Rbp => "rbp", Rbx => "rbx", Rcx => "rcx", Rdi => "rdi",
    Rdx => "rdx", Rip => "rip", Rsi => "rsi", Rsp => "rsp",
    Si => "si", Sil => "sil", Sp => "sp", Spl => "spl", Ss => "ss",

    Cr0 => "cr0", Cr2 => "cr2", Cr3 => "cr3", Cr4 => "cr4", Cr8 => "cr8",
    Dr0 => "dr0", Dr1 => "dr1", Dr2 => "dr2", Dr3 => "dr3",
    Dr6 => "dr6", Dr7 => "dr7",

    R8 => "r8", R9 => "r9", R10 => "r10", R11 => "r11",
    R12 => "r12", R13 => "r13", R14 => "r14", R15 => "r15",
    R8d => "r8d", R9d => "r9d", R10d => "r10d", R11d => "r11d",
    R12d => "r12d", R13d => "r13d", R14d => "r14d", R15d => "r15d",
    R8w => "r8w", R9w => "r9w", R10w => "r10w", R11w => "r11w",
    R12w => "r12w", R13w => "r13w", R14w => "r14w", R15w => "r15w",
    R8b => "r8b", R9b => "r9b", R10b => "r10b", R11b => "r11b",
    R12b => "r12b", R13b => "r13b", R14b => "r14b", R15b => "r15b",

    St0 => "st0", St1 => "st1", St2 => "st2", St3 => "st3",
    St4 => "st4", St5 => "st5", St6 => "st6", St7 => "st7",
    Mm0 => "mm0", Mm1 => "mm1", Mm2 => "mm2", Mm3 => "mm3",
    Mm4 => "mm4", Mm5 => "mm5", Mm6 => "mm6", Mm7 => "mm7",

    Xmm0 => "xmm0", Xmm1 => "xmm1", Xmm2 => "xmm2", Xmm3 => "xmm3",
    Xmm4 => "xmm4", Xmm5 => "xmm5", Xmm6 => "xmm6", Xmm7 => "xmm7",
    Xmm8 => "xmm8", Xmm9 => "xmm9", Xmm10 => "xmm10", Xmm11 => "xmm11",
    Xmm12 => "xmm12", Xmm13 => "xmm13", Xmm14 => "xmm14", Xmm15 => "xmm15",

    Ymm0 => "ymm0", Ymm1 => "ymm1", Ymm2 => "ymm2", Ymm3 => "ymm3",
    Ymm4 => "ymm4", Ymm5 => "ymm5", Ymm6 => "ymm6", Ymm7 => "ymm7",
    Ymm8 => "ymm8", Ymm9 => "ymm9", Ymm10 => "ymm10", Ymm11 => "ymm11",
    Ymm12 => "ymm12", Ymm13 => "ymm13", Ymm14 => "ymm14", Ymm15 => "ymm15",

    Zmm0 => "zmm0", Zmm1 => "zmm1", Zmm2 => "zmm2", Zmm3 => "zmm3",
    Zmm4 => "zmm4", Zmm5 => "zmm5", Zmm6 => "zmm6", Zmm7 => "zmm7",

    K0 => "k0", K1 => "k1", K2 => "k2", K3 => "k3",
    K4 => "k4", K5 => "k5", K6 => "k6", K7 => "k7",

    Tr => "tr", Idtr => "idtr", Gdtr => "gdtr", Ldtr => "ldtr",
    FpCw => "fpcw", FpTag => "fptag", Msr => "msr", Mxcsr => "mxcsr",
    FsBase => "fs_base", GsBase => "gs_base",
}

/// The bitness-neutral aliases from §4.A: `cax`, `cbx`, ... `cip`, resolved
/// to the 64-bit or 32-bit register depending on `Bitness`. This table
/// shadows `NAME_TABLE` when doing a lookup (Design Note §9).
pub fn alias_table(x64: bool) -> [(&'static str, RegId); 9] {
    if x64 {
        [
            ("cax", RegId::Rax),
            ("cbx", RegId::Rbx),
            ("ccx", RegId::Rcx),
            ("cdx", RegId::Rdx),
            ("cbp", RegId::Rbp),
            ("csp", RegId::Rsp),
            ("csi", RegId::Rsi),
            ("cdi", RegId::Rdi),
            ("cip", RegId::Rip),
        ]
    } else {
        [
            ("cax", RegId::Eax),
            ("cbx", RegId::Ebx),
            ("ccx", RegId::Ecx),
            ("cdx", RegId::Edx),
            ("cbp", RegId::Ebp),
            ("csp", RegId::Esp),
            ("csi", RegId::Esi),
            ("cdi", RegId::Edi),
            ("cip", RegId::Eip),
        ]
    }
}

/// True for the registers `RegisterFile` reads/writes through
/// `reg_read_wide`/`reg_write_wide` rather than the 64-bit scalar path.
pub fn is_wide(reg: RegId) -> bool {
    matches!(
        reg,
        RegId::Xmm0
            | RegId::Xmm1
            | RegId::Xmm2
            | RegId::Xmm3
            | RegId::Xmm4
            | RegId::Xmm5
            | RegId::Xmm6
            | RegId::Xmm7
            | RegId::Xmm8
            | RegId::Xmm9
            | RegId::Xmm10
            | RegId::Xmm11
            | RegId::Xmm12
            | RegId::Xmm13
            | RegId::Xmm14
            | RegId::Xmm15
            | RegId::Ymm0
            | RegId::Ymm1
            | RegId::Ymm2
            | RegId::Ymm3
            | RegId::Ymm4
            | RegId::Ymm5
            | RegId::Ymm6
            | RegId::Ymm7
            | RegId::Ymm8
            | RegId::Ymm9
            | RegId::Ymm10
            | RegId::Ymm11
            | RegId::Ymm12
            | RegId::Ymm13
            | RegId::Ymm14
            | RegId::Ymm15
            | RegId::Zmm0
            | RegId::Zmm1
            | RegId::Zmm2
            | RegId::Zmm3
            | RegId::Zmm4
            | RegId::Zmm5
            | RegId::Zmm6
            | RegId::Zmm7
    )
}
