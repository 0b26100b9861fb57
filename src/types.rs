//! Core types for the assembler.
//!
//! This module defines the fundamental types shared across the engine:
//! CPU variant identifiers and their gating masks, the evaluator value
//! with its undefined sentinel, address modes, engine limits, and the
//! options and summary structures of the public API.

use bitflags::bitflags;
use std::fmt;

/// Result of evaluating an expression or looking up a symbol.
///
/// `None` is the undefined sentinel: it is produced by forward references
/// and division by zero, and propagates through every operator. During
/// resolution passes an undefined value is harmless; on the emission pass
/// it is an error at the point of use.
pub type Value = Option<i64>;

bitflags! {
    /// One bit per CPU variant.
    ///
    /// Opcode table entries carry a mask of *disallowed* variants; an
    /// instruction is rejected when its mask intersects the active CPU bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuMask: u8 {
        /// Original NMOS 6502 (and 6510).
        const MOS6502 = 1 << 0;
        /// 65SC02 (CMOS core without the Rockwell bit instructions).
        const CSG65SC02 = 1 << 1;
        /// 65C02 with Rockwell/WDC bit instructions.
        const WDC65C02 = 1 << 2;
        /// 45GS02 (MEGA65) with Q register and long branches.
        const CSG45GS02 = 1 << 3;
        /// 65816 in emulation-friendly subset.
        const WDC65816 = 1 << 4;
    }
}

impl CpuMask {
    /// Mask matching every supported variant.
    pub const ANY: CpuMask = CpuMask::all();
    /// Mask matching no variant (entry is never rejected).
    pub const NONE: CpuMask = CpuMask::empty();
}

/// CPU variant selected for assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cpu {
    /// NMOS 6502 / 6510.
    #[default]
    Mos6502,
    /// 65SC02.
    Sc02,
    /// 65C02.
    C02,
    /// 45GS02 (MEGA65 / C65 core).
    Gs02,
    /// 65816.
    W816,
}

impl Cpu {
    /// The gating bit for this variant.
    pub fn mask(self) -> CpuMask {
        match self {
            Cpu::Mos6502 => CpuMask::MOS6502,
            Cpu::Sc02 => CpuMask::CSG65SC02,
            Cpu::C02 => CpuMask::WDC65C02,
            Cpu::Gs02 => CpuMask::CSG45GS02,
            Cpu::W816 => CpuMask::WDC65816,
        }
    }

    /// Parse a `CPU` directive operand. Accepts the spellings used in
    /// existing sources, case-insensitively.
    pub fn from_name(name: &str) -> Option<Cpu> {
        let n = name.trim();
        if n.eq_ignore_ascii_case("6502") || n.eq_ignore_ascii_case("6510") {
            Some(Cpu::Mos6502)
        } else if n.eq_ignore_ascii_case("65SC02") {
            Some(Cpu::Sc02)
        } else if n.eq_ignore_ascii_case("65C02") || n.eq_ignore_ascii_case("65c02") {
            Some(Cpu::C02)
        } else if n.eq_ignore_ascii_case("45GS02")
            || n.eq_ignore_ascii_case("4502")
            || n.eq_ignore_ascii_case("4510")
            || n.eq_ignore_ascii_case("MEGA65")
            || n.eq_ignore_ascii_case("C65")
        {
            Some(Cpu::Gs02)
        } else if n.eq_ignore_ascii_case("65816") || n.eq_ignore_ascii_case("65C816") {
            Some(Cpu::W816)
        } else {
            None
        }
    }

    /// Human-readable variant name.
    pub fn name(self) -> &'static str {
        match self {
            Cpu::Mos6502 => "6502",
            Cpu::Sc02 => "65SC02",
            Cpu::C02 => "65C02",
            Cpu::Gs02 => "45GS02",
            Cpu::W816 => "65816",
        }
    }

    /// Long branch encodings exist only on the 45GS02.
    pub fn has_long_branches(self) -> bool {
        self == Cpu::Gs02
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address mode of an encoded instruction.
///
/// Also recorded as the use-attribute of symbol references so the
/// cross-reference can mark indexed-indirect and indirect-Y uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    /// No operand.
    Impl,
    /// Operand is the accumulator (or the Q register behind a prefix).
    Accu,
    /// `#expr`.
    Imme,
    /// Base-page direct.
    Zpag,
    /// Base-page indexed by X.
    Zpgx,
    /// Base-page indexed by Y.
    Zpgy,
    /// 16-bit absolute.
    Abso,
    /// Absolute indexed by X.
    Absx,
    /// Absolute indexed by Y.
    Absy,
    /// `(expr,X)` indexed-indirect.
    Indx,
    /// `(expr),Y` indirect-Y.
    Indy,
    /// `(expr)` / `(expr),Z` indirect (Z on the 45GS02).
    Indz,
    /// `[expr],Z` 32-bit indirect (45GS02, NOP-prefixed).
    Ind32,
    /// 8-bit branch displacement.
    Rela,
    /// 16-bit branch displacement (45GS02 long branches, BSR).
    RelaLong,
}

/// Engine limits.
///
/// Nesting and table ceilings; exceeding any of them is an error.
pub mod limits {
    /// Resolution passes tried before giving up on convergence.
    pub const MAX_PASSES: u32 = 20;
    /// Recoverable errors tolerated per pass.
    pub const MAX_ERRORS: u32 = 10;
    /// Symbol table capacity.
    pub const MAX_SYMBOLS: usize = 4096;
    /// Macro table capacity.
    pub const MAX_MACROS: usize = 64;
    /// Macro parameter count.
    pub const MAX_MACRO_ARGS: usize = 10;
    /// Include nesting depth.
    pub const MAX_INCLUDES: usize = 99;
    /// Conditional-assembly nesting depth.
    pub const MAX_IF_LEVELS: usize = 10;
    /// `STORE` directives per assembly.
    pub const MAX_STORES: usize = 20;
    /// Memory image size: 64K plus one guard page, so that length checks
    /// may be performed after an emission near the boundary.
    pub const IMAGE_SIZE: usize = 0x10100;
}

/// Options controlling an assembly run.
#[derive(Debug, Clone)]
pub struct AsmOptions {
    /// Selected CPU variant at start of assembly.
    pub cpu: Cpu,
    /// Symbol names compare case-insensitively.
    pub case_insensitive: bool,
    /// Enable automatic short/long branch selection (45GS02).
    pub branch_opt: bool,
    /// Strip a fixed-width disassembly prefix from every source line.
    pub strip_disassembly: bool,
    /// Fill byte for the memory image.
    pub fill_byte: u8,
    /// Accept `@` as an octal literal prefix.
    pub octal_prefix: bool,
    /// Compatibility mode (`.src` sources): module scopes and old defaults.
    pub compat: bool,
    /// Include line numbers in the listing.
    pub line_numbers: bool,
    /// Write a preprocessed copy of the source next to the listing.
    pub preprocess: bool,
    /// Locked symbols from the command line, as `name = expression` text.
    pub defines: Vec<(String, String)>,
}

impl AsmOptions {
    /// Default options for `.asm` sources.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::Mos6502,
            case_insensitive: false,
            branch_opt: false,
            strip_disassembly: false,
            fill_byte: 0,
            octal_prefix: false,
            compat: false,
            line_numbers: false,
            preprocess: false,
            defines: Vec::new(),
        }
    }

    /// Compatibility defaults for `.src` sources: 45GS02, case-insensitive
    /// symbols, branch optimization, ROM fill and the octal prefix.
    pub fn compat() -> Self {
        Self {
            cpu: Cpu::Gs02,
            case_insensitive: true,
            branch_opt: true,
            strip_disassembly: false,
            fill_byte: 0xFF,
            octal_prefix: true,
            compat: true,
            line_numbers: false,
            preprocess: false,
            defines: Vec::new(),
        }
    }
}

impl Default for AsmOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a finished assembly, returned by the library entry points.
#[derive(Debug, Clone, Default)]
pub struct AsmSummary {
    /// Source lines read (all files, final pass).
    pub source_lines: u32,
    /// Symbols in the table.
    pub symbols: usize,
    /// Macros recorded.
    pub macros: usize,
    /// Resolution passes run before the emission pass.
    pub passes: u32,
    /// Recoverable errors reported.
    pub errors: u32,
    /// Lowest address assembled, if anything was emitted.
    pub gen_start: Option<u16>,
    /// Highest address assembled (exclusive), if anything was emitted.
    pub gen_end: Option<u32>,
    /// Binary files written by `STORE`.
    pub stored_files: Vec<String>,
}
