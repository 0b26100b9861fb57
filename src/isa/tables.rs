//! Opcode tables for the 6502 family.
//!
//! Four tables drive recognition: implied (and accumulator) forms, short
//! branches, the 45GS02 bit-test group, and the general table with one
//! row per mnemonic and one cell per address mode. Every entry carries a
//! mask of *disallowed* CPU variants; a cell whose mask intersects the
//! active CPU bit is treated as absent.

use crate::types::{AddrMode, Cpu, CpuMask};

/// Available on every variant.
const ANY: CpuMask = CpuMask::empty();
/// CMOS instruction, absent on the NMOS 6502.
const NOT_NMOS: CpuMask = CpuMask::MOS6502;
/// 45GS02 extension.
const GS02_ONLY: CpuMask = CpuMask::MOS6502
    .union(CpuMask::CSG65SC02)
    .union(CpuMask::WDC65C02)
    .union(CpuMask::WDC65816);
/// 65816 extension.
const W816_ONLY: CpuMask = CpuMask::MOS6502
    .union(CpuMask::CSG65SC02)
    .union(CpuMask::WDC65C02)
    .union(CpuMask::CSG45GS02);

/// One opcode with its byte length and gating mask.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    /// Opcode byte.
    pub code: u8,
    /// Instruction length without prefixes.
    pub len: u8,
    /// Variants this entry is not available on.
    pub banned: CpuMask,
}

impl Op {
    /// Entry is usable on the given variant.
    pub fn allowed(&self, cpu: Cpu) -> bool {
        !self.banned.intersects(cpu.mask())
    }
}

/// A cell of the general table.
pub type Cell = Option<Op>;

const fn op(code: u8, len: u8, banned: CpuMask) -> Cell {
    Some(Op { code, len, banned })
}

const N: Cell = None;

/// Implied or accumulator-mode instruction.
#[derive(Debug, Clone, Copy)]
pub struct ImpliedOp {
    /// Mnemonic.
    pub mne: &'static str,
    /// Opcode byte.
    pub code: u8,
    /// Variants this entry is not available on.
    pub banned: CpuMask,
}

const fn imp(mne: &'static str, code: u8, banned: CpuMask) -> ImpliedOp {
    ImpliedOp { mne, code, banned }
}

/// Implied table: one-byte instructions, the accumulator shift/rotate
/// forms included (selected when the operand is empty or literal `A`).
pub const IMPLIED: &[ImpliedOp] = &[
    imp("BRK", 0x00, ANY),
    imp("CLE", 0x02, GS02_ONLY),
    imp("SEE", 0x03, GS02_ONLY),
    imp("PHP", 0x08, ANY),
    imp("ASL", 0x0A, ANY),
    imp("TSY", 0x0B, GS02_ONLY),
    imp("PHD", 0x0B, W816_ONLY),
    imp("CLC", 0x18, ANY),
    imp("INC", 0x1A, NOT_NMOS),
    imp("INZ", 0x1B, GS02_ONLY),
    imp("TCS", 0x1B, W816_ONLY),
    imp("PLP", 0x28, ANY),
    imp("ROL", 0x2A, ANY),
    imp("TYS", 0x2B, GS02_ONLY),
    imp("PLD", 0x2B, W816_ONLY),
    imp("SEC", 0x38, ANY),
    imp("DEC", 0x3A, NOT_NMOS),
    imp("DEZ", 0x3B, GS02_ONLY),
    imp("TSC", 0x3B, W816_ONLY),
    imp("RTI", 0x40, ANY),
    imp("NEG", 0x42, GS02_ONLY),
    imp("WDM", 0x42, W816_ONLY),
    imp("ASR", 0x43, GS02_ONLY),
    imp("TAZ", 0x4B, GS02_ONLY),
    imp("PHK", 0x4B, W816_ONLY),
    imp("PHA", 0x48, ANY),
    imp("LSR", 0x4A, ANY),
    imp("CLI", 0x58, ANY),
    imp("PHY", 0x5A, NOT_NMOS),
    imp("TAB", 0x5B, GS02_ONLY),
    imp("MAP", 0x5C, GS02_ONLY),
    imp("RTS", 0x60, ANY),
    imp("PLA", 0x68, ANY),
    imp("ROR", 0x6A, ANY),
    imp("TZA", 0x6B, GS02_ONLY),
    imp("RTL", 0x6B, W816_ONLY),
    imp("SEI", 0x78, ANY),
    imp("PLY", 0x7A, NOT_NMOS),
    imp("TBA", 0x7B, GS02_ONLY),
    imp("DEY", 0x88, ANY),
    imp("TXA", 0x8A, ANY),
    imp("PHB", 0x8B, W816_ONLY),
    imp("TYA", 0x98, ANY),
    imp("TXS", 0x9A, ANY),
    imp("TAY", 0xA8, ANY),
    imp("TAX", 0xAA, ANY),
    imp("PLB", 0xAB, W816_ONLY),
    imp("CLV", 0xB8, ANY),
    imp("TSX", 0xBA, ANY),
    imp("INY", 0xC8, ANY),
    imp("DEX", 0xCA, ANY),
    imp("WAI", 0xCB, W816_ONLY),
    imp("CLD", 0xD8, ANY),
    imp("PHX", 0xDA, NOT_NMOS),
    imp("PHZ", 0xDB, GS02_ONLY),
    imp("STP", 0xDB, W816_ONLY),
    imp("INX", 0xE8, ANY),
    imp("NOP", 0xEA, ANY),
    imp("EOM", 0xEA, GS02_ONLY),
    imp("XBA", 0xEB, W816_ONLY),
    imp("SED", 0xF8, ANY),
    imp("PLX", 0xFA, NOT_NMOS),
    imp("PLZ", 0xFB, GS02_ONLY),
    imp("XCE", 0xFB, W816_ONLY),
];

/// Short-branch instruction.
#[derive(Debug, Clone, Copy)]
pub struct BranchOp {
    /// Mnemonic.
    pub mne: &'static str,
    /// Opcode byte; the 45GS02 long form is `code | 3`.
    pub code: u8,
    /// Variants this entry is not available on.
    pub banned: CpuMask,
}

const fn bra(mne: &'static str, code: u8, banned: CpuMask) -> BranchOp {
    BranchOp { mne, code, banned }
}

/// Short branches with an 8-bit displacement.
pub const BRANCHES: &[BranchOp] = &[
    bra("BPL", 0x10, ANY),
    bra("BMI", 0x30, ANY),
    bra("BVC", 0x50, ANY),
    bra("BVS", 0x70, ANY),
    bra("BCC", 0x90, ANY),
    bra("BCS", 0xB0, ANY),
    bra("BNE", 0xD0, ANY),
    bra("BEQ", 0xF0, ANY),
    bra("BRA", 0x80, NOT_NMOS),
    bra("BRU", 0x80, GS02_ONLY),
];

/// `BSR` long subroutine branch (45GS02), 16-bit displacement.
pub const BSR_CODE: u8 = 0x63;

/// Base opcodes of the bit-test group; the bit digit is OR'd in as
/// `digit << 4`.
pub mod bit_test {
    /// `RMBn zp`.
    pub const RMB: u8 = 0x07;
    /// `SMBn zp`.
    pub const SMB: u8 = 0x87;
    /// `BBRn zp,target`.
    pub const BBR: u8 = 0x0F;
    /// `BBSn zp,target`.
    pub const BBS: u8 = 0x8F;
}

/// Q-register mnemonics (45GS02): each maps onto the A-register row of
/// the general table and is emitted behind a `NEG NEG` prefix.
pub const Q_ALIASES: &[(&str, &str)] = &[
    ("LDQ", "LDA"),
    ("STQ", "STA"),
    ("ORQ", "ORA"),
    ("ANDQ", "AND"),
    ("EORQ", "EOR"),
    ("ADCQ", "ADC"),
    ("SBCQ", "SBC"),
    ("CMPQ", "CMP"),
    ("CPQ", "CMP"),
    ("ASLQ", "ASL"),
    ("ASRQ", "ASR"),
    ("LSRQ", "LSR"),
    ("ROLQ", "ROL"),
    ("RORQ", "ROR"),
    ("INQ", "INC"),
    ("DEQ", "DEC"),
    ("BITQ", "BIT"),
];

/// The two-byte Q prefix (`NEG NEG`).
pub const Q_PREFIX: [u8; 2] = [0x42, 0x42];

/// Extra prefix byte (`NOP`) turning an indirect operand into a 32-bit
/// indirect one.
pub const IND32_PREFIX: u8 = 0xEA;

/// Column count of the general table.
pub const COLUMNS: usize = 10;

/// A general-table row: one cell per address-mode column.
///
/// Column order: immediate, base page, base page X, base page Y,
/// absolute, absolute X, absolute Y, indexed-indirect, indirect-Y,
/// indirect(-Z).
#[derive(Debug, Clone, Copy)]
pub struct GenOp {
    /// Mnemonic.
    pub mne: &'static str,
    /// Cells in column order.
    pub ops: [Cell; COLUMNS],
}

/// Index of an address mode's column, when the mode is table-driven.
pub fn column(mode: AddrMode) -> Option<usize> {
    Some(match mode {
        AddrMode::Imme => 0,
        AddrMode::Zpag => 1,
        AddrMode::Zpgx => 2,
        AddrMode::Zpgy => 3,
        AddrMode::Abso => 4,
        AddrMode::Absx => 5,
        AddrMode::Absy => 6,
        AddrMode::Indx => 7,
        AddrMode::Indy => 8,
        AddrMode::Indz => 9,
        _ => return None,
    })
}

const fn row(mne: &'static str, ops: [Cell; COLUMNS]) -> GenOp {
    GenOp { mne, ops }
}

/// General table. Row order groups the ALU set first, then loads and
/// stores, read-modify-write, compares and the control-flow rows.
#[rustfmt::skip]
pub const GENERAL: &[GenOp] = &[
    //                 Imme              Zpag              Zpgx              Zpgy              Abso              Absx              Absy              Indx              Indy              Indz
    row("ORA", [op(0x09,2,ANY),  op(0x05,2,ANY),  op(0x15,2,ANY),  N,                op(0x0D,3,ANY),  op(0x1D,3,ANY),  op(0x19,3,ANY),  op(0x01,2,ANY),  op(0x11,2,ANY),  op(0x12,2,NOT_NMOS)]),
    row("AND", [op(0x29,2,ANY),  op(0x25,2,ANY),  op(0x35,2,ANY),  N,                op(0x2D,3,ANY),  op(0x3D,3,ANY),  op(0x39,3,ANY),  op(0x21,2,ANY),  op(0x31,2,ANY),  op(0x32,2,NOT_NMOS)]),
    row("EOR", [op(0x49,2,ANY),  op(0x45,2,ANY),  op(0x55,2,ANY),  N,                op(0x4D,3,ANY),  op(0x5D,3,ANY),  op(0x59,3,ANY),  op(0x41,2,ANY),  op(0x51,2,ANY),  op(0x52,2,NOT_NMOS)]),
    row("ADC", [op(0x69,2,ANY),  op(0x65,2,ANY),  op(0x75,2,ANY),  N,                op(0x6D,3,ANY),  op(0x7D,3,ANY),  op(0x79,3,ANY),  op(0x61,2,ANY),  op(0x71,2,ANY),  op(0x72,2,NOT_NMOS)]),
    row("SBC", [op(0xE9,2,ANY),  op(0xE5,2,ANY),  op(0xF5,2,ANY),  N,                op(0xED,3,ANY),  op(0xFD,3,ANY),  op(0xF9,3,ANY),  op(0xE1,2,ANY),  op(0xF1,2,ANY),  op(0xF2,2,NOT_NMOS)]),
    row("CMP", [op(0xC9,2,ANY),  op(0xC5,2,ANY),  op(0xD5,2,ANY),  N,                op(0xCD,3,ANY),  op(0xDD,3,ANY),  op(0xD9,3,ANY),  op(0xC1,2,ANY),  op(0xD1,2,ANY),  op(0xD2,2,NOT_NMOS)]),
    row("LDA", [op(0xA9,2,ANY),  op(0xA5,2,ANY),  op(0xB5,2,ANY),  N,                op(0xAD,3,ANY),  op(0xBD,3,ANY),  op(0xB9,3,ANY),  op(0xA1,2,ANY),  op(0xB1,2,ANY),  op(0xB2,2,NOT_NMOS)]),
    row("STA", [N,               op(0x85,2,ANY),  op(0x95,2,ANY),  N,                op(0x8D,3,ANY),  op(0x9D,3,ANY),  op(0x99,3,ANY),  op(0x81,2,ANY),  op(0x91,2,ANY),  op(0x92,2,NOT_NMOS)]),
    row("LDX", [op(0xA2,2,ANY),  op(0xA6,2,ANY),  N,               op(0xB6,2,ANY),  op(0xAE,3,ANY),  N,               op(0xBE,3,ANY),  N,               N,               N]),
    row("LDY", [op(0xA0,2,ANY),  op(0xA4,2,ANY),  op(0xB4,2,ANY),  N,                op(0xAC,3,ANY),  op(0xBC,3,ANY),  N,               N,               N,               N]),
    row("LDZ", [op(0xA3,2,GS02_ONLY), N,          N,               N,                op(0xAB,3,GS02_ONLY), op(0xBB,3,GS02_ONLY), N,     N,               N,               N]),
    row("STX", [N,               op(0x86,2,ANY),  N,               op(0x96,2,ANY),  op(0x8E,3,ANY),  N,               N,               N,               N,               N]),
    row("STY", [N,               op(0x84,2,ANY),  op(0x94,2,ANY),  N,                op(0x8C,3,ANY),  N,               N,               N,               N,               N]),
    row("STZ", [N,               op(0x64,2,NOT_NMOS), op(0x74,2,NOT_NMOS), N,        op(0x9C,3,NOT_NMOS), op(0x9E,3,NOT_NMOS), N,       N,               N,               N]),
    row("ASL", [N,               op(0x06,2,ANY),  op(0x16,2,ANY),  N,                op(0x0E,3,ANY),  op(0x1E,3,ANY),  N,               N,               N,               N]),
    row("ROL", [N,               op(0x26,2,ANY),  op(0x36,2,ANY),  N,                op(0x2E,3,ANY),  op(0x3E,3,ANY),  N,               N,               N,               N]),
    row("LSR", [N,               op(0x46,2,ANY),  op(0x56,2,ANY),  N,                op(0x4E,3,ANY),  op(0x5E,3,ANY),  N,               N,               N,               N]),
    row("ROR", [N,               op(0x66,2,ANY),  op(0x76,2,ANY),  N,                op(0x6E,3,ANY),  op(0x7E,3,ANY),  N,               N,               N,               N]),
    row("ASR", [N,               op(0x44,2,GS02_ONLY), op(0x54,2,GS02_ONLY), N,      N,               N,               N,               N,               N,               N]),
    row("INC", [N,               op(0xE6,2,ANY),  op(0xF6,2,ANY),  N,                op(0xEE,3,ANY),  op(0xFE,3,ANY),  N,               N,               N,               N]),
    row("DEC", [N,               op(0xC6,2,ANY),  op(0xD6,2,ANY),  N,                op(0xCE,3,ANY),  op(0xDE,3,ANY),  N,               N,               N,               N]),
    row("INW", [N,               op(0xE3,2,GS02_ONLY), N,          N,                N,               N,               N,               N,               N,               N]),
    row("DEW", [N,               op(0xC3,2,GS02_ONLY), N,          N,                N,               N,               N,               N,               N,               N]),
    row("ASW", [N,               N,               N,               N,                op(0xCB,3,GS02_ONLY), N,          N,               N,               N,               N]),
    row("ROW", [N,               N,               N,               N,                op(0xEB,3,GS02_ONLY), N,          N,               N,               N,               N]),
    row("BIT", [op(0x89,2,NOT_NMOS), op(0x24,2,ANY), op(0x34,2,NOT_NMOS), N,         op(0x2C,3,ANY),  op(0x3C,3,NOT_NMOS), N,           N,               N,               N]),
    row("TSB", [N,               op(0x04,2,NOT_NMOS), N,           N,                op(0x0C,3,NOT_NMOS), N,           N,               N,               N,               N]),
    row("TRB", [N,               op(0x14,2,NOT_NMOS), N,           N,                op(0x1C,3,NOT_NMOS), N,           N,               N,               N,               N]),
    row("CPX", [op(0xE0,2,ANY),  op(0xE4,2,ANY),  N,               N,                op(0xEC,3,ANY),  N,               N,               N,               N,               N]),
    row("CPY", [op(0xC0,2,ANY),  op(0xC4,2,ANY),  N,               N,                op(0xCC,3,ANY),  N,               N,               N,               N,               N]),
    row("CPZ", [op(0xC2,2,GS02_ONLY), op(0xD4,2,GS02_ONLY), N,     N,                op(0xDC,3,GS02_ONLY), N,          N,               N,               N,               N]),
    row("JMP", [N,               N,               N,               N,                op(0x4C,3,ANY),  N,               N,               op(0x7C,3,NOT_NMOS), N,           op(0x6C,3,ANY)]),
    row("JSR", [N,               N,               N,               N,                op(0x20,3,ANY),  N,               N,               op(0x23,3,GS02_ONLY), N,          op(0x22,3,GS02_ONLY)]),
    row("PHW", [op(0xF4,3,GS02_ONLY), N,          N,               N,                op(0xFC,3,GS02_ONLY), N,          N,               N,               N,               N]),
];

/// Find a general-table row by mnemonic, case-insensitively.
pub fn general(mne: &str) -> Option<&'static GenOp> {
    GENERAL.iter().find(|r| r.mne.eq_ignore_ascii_case(mne))
}

/// Find an implied entry usable on the given variant. `Err` with the
/// entry means the mnemonic exists but is gated off.
pub fn implied(mne: &str, cpu: Cpu) -> Option<std::result::Result<&'static ImpliedOp, &'static ImpliedOp>> {
    let mut gated = None;
    for entry in IMPLIED {
        if entry.mne.eq_ignore_ascii_case(mne) {
            if !entry.banned.intersects(cpu.mask()) {
                return Some(Ok(entry));
            }
            gated = Some(entry);
        }
    }
    gated.map(Err)
}

/// Any implied entry with this mnemonic, regardless of variant.
pub fn implied_exists(mne: &str) -> bool {
    IMPLIED.iter().any(|e| e.mne.eq_ignore_ascii_case(mne))
}

/// Find a short-branch entry by mnemonic.
pub fn branch(mne: &str) -> Option<&'static BranchOp> {
    BRANCHES.iter().find(|b| b.mne.eq_ignore_ascii_case(mne))
}

/// Resolve a Q-register alias to its base mnemonic.
pub fn q_alias(mne: &str) -> Option<&'static str> {
    Q_ALIASES
        .iter()
        .find(|(q, _)| q.eq_ignore_ascii_case(mne))
        .map(|(_, base)| *base)
}
