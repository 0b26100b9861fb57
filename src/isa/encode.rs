//! Instruction encoder.
//!
//! Recognition order: 45GS02 bit-test group, Q-register aliases, long
//! branches, implied/accumulator forms, short branches, then the general
//! table. The address mode is inferred from the operand syntax; the
//! operand expression is evaluated afterwards. A still-unresolved
//! forward reference assembles as the absolute form for that pass; once
//! the symbol lands in the base page on a later pass the instruction
//! shrinks, and the pass loop re-runs until every size has settled.

use tracing::debug;

use crate::error::{AsmError, Result};
use crate::expr::{self, EvalCtx};
use crate::isa::tables::{self, Op};
use crate::types::{AddrMode, Cpu, Value};

/// One encoding request: the line's mnemonic and operand plus the
/// assembler state the encoder reads.
#[derive(Debug)]
pub struct EncodeRequest<'a> {
    /// Mnemonic token.
    pub mnemonic: &'a str,
    /// Operand text, comment already stripped.
    pub operand: &'a str,
    /// Program counter at the instruction.
    pub pc: i64,
    /// Base-page value for shortening.
    pub bp: u8,
    /// Active CPU variant.
    pub cpu: Cpu,
    /// Branch optimization enabled.
    pub branch_opt: bool,
    /// This is the emission pass: range and definedness are enforced.
    pub emit_pass: bool,
    /// Opcode byte recorded at this pc by the previous pass, for keeping
    /// branch-size decisions stable.
    pub prev_opcode: Option<u8>,
}

/// A successfully encoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Instruction bytes, prefixes included.
    pub bytes: Vec<u8>,
    /// Selected address mode.
    pub mode: AddrMode,
}

/// Operand shapes distinguished by syntax alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Imme,
    Plain,
    PlainX,
    PlainY,
    IndX,
    IndY,
    IndZ,
    Ind32,
}

/// Decide whether a token is an instruction mnemonic on the given CPU.
///
/// Names that only exist on other variants are not reserved: `LDQ` is a
/// valid label on a 6502. A general row counts as long as any of its
/// cells is available.
pub fn is_instruction(mne: &str, cpu: Cpu) -> bool {
    if cpu == Cpu::Gs02 {
        if bit_test(mne).is_some() || tables::q_alias(mne).is_some() {
            return true;
        }
        if mne.eq_ignore_ascii_case("BSR") || long_branch(mne).is_some() {
            return true;
        }
    }
    if tables::implied_exists(mne) {
        return true;
    }
    if let Some(b) = tables::branch(mne) {
        return !b.banned.intersects(cpu.mask());
    }
    if let Some(row) = tables::general(mne) {
        return row.ops.iter().flatten().any(|c| c.allowed(cpu));
    }
    false
}

/// Encode one instruction.
pub fn encode(req: &EncodeRequest<'_>, ctx: &mut EvalCtx<'_>) -> Result<Encoded> {
    let mne = req.mnemonic;
    let operand = req.operand.trim();

    if req.cpu == Cpu::Gs02 {
        if let Some((base, bit, is_branch)) = bit_test(mne) {
            return encode_bit_test(req, ctx, base | (bit << 4), is_branch, operand);
        }
        if let Some(base) = tables::q_alias(mne) {
            return encode_q(req, ctx, base, operand);
        }
        if mne.eq_ignore_ascii_case("BSR") {
            return encode_long_branch(req, ctx, tables::BSR_CODE, operand);
        }
        if let Some(code) = long_branch(mne) {
            return encode_long_branch(req, ctx, code, operand);
        }
    }

    if operand.is_empty() || operand.eq_ignore_ascii_case("A") {
        if let Some(entry) = tables::implied(mne, req.cpu) {
            let entry = entry.map_err(|gated| AsmError::UnknownMnemonic {
                text: format!("{} not available on the {}", gated.mne, req.cpu),
            })?;
            let mode = if operand.is_empty() {
                AddrMode::Impl
            } else {
                AddrMode::Accu
            };
            return Ok(Encoded {
                bytes: vec![entry.code],
                mode,
            });
        }
    }

    if let Some(b) = tables::branch(mne) {
        if b.banned.intersects(req.cpu.mask()) {
            return Err(AsmError::UnknownMnemonic {
                text: format!("{} not available on the {}", b.mne, req.cpu),
            });
        }
        return encode_branch(req, ctx, b.code, operand);
    }

    if let Some(row) = tables::general(mne) {
        return encode_general(req, ctx, row, operand, &[]);
    }

    if tables::implied_exists(mne) {
        return Err(AsmError::MalformedOperand {
            message: format!("implied address mode of {mne} must not have an operand"),
        });
    }

    Err(AsmError::UnknownMnemonic {
        text: mne.to_string(),
    })
}

/// Split a bit-test mnemonic into its base opcode and bit digit.
fn bit_test(mne: &str) -> Option<(u8, u8, bool)> {
    if mne.len() != 4 {
        return None;
    }
    let (head, digit) = mne.split_at(3);
    let bit = digit.chars().next()?.to_digit(8)? as u8;
    let (base, is_branch) = if head.eq_ignore_ascii_case("RMB") {
        (tables::bit_test::RMB, false)
    } else if head.eq_ignore_ascii_case("SMB") {
        (tables::bit_test::SMB, false)
    } else if head.eq_ignore_ascii_case("BBR") {
        (tables::bit_test::BBR, true)
    } else if head.eq_ignore_ascii_case("BBS") {
        (tables::bit_test::BBS, true)
    } else {
        return None;
    };
    Some((base, bit, is_branch))
}

/// `L`-prefixed short-branch mnemonic, as its long-form opcode.
fn long_branch(mne: &str) -> Option<u8> {
    let rest = mne.strip_prefix(['L', 'l'])?;
    let b = tables::branch(rest)?;
    if b.banned.intersects(Cpu::Gs02.mask()) {
        return None;
    }
    Some(b.code | 3)
}

fn record_mode(ctx: &mut EvalCtx<'_>, mode: AddrMode) {
    if let Some((_, slot)) = ctx.record.as_mut() {
        *slot = mode;
    }
}

/// Evaluate a complete operand expression; trailing text is an error.
fn eval_operand(ctx: &mut EvalCtx<'_>, text: &str) -> Result<Value> {
    let (v, rest) = expr::eval(ctx, text)?;
    let rest = crate::scan::skip_space(rest);
    if !rest.is_empty() {
        return Err(AsmError::MalformedOperand {
            message: format!("unexpected trailing text {rest:?}"),
        });
    }
    Ok(v)
}

fn require_defined(req: &EncodeRequest<'_>, v: Value) -> Result<i64> {
    match v {
        Some(x) => Ok(x),
        None if req.emit_pass => Err(AsmError::UndefinedSymbol),
        None => Ok(0),
    }
}

fn encode_branch(
    req: &EncodeRequest<'_>,
    ctx: &mut EvalCtx<'_>,
    code: u8,
    operand: &str,
) -> Result<Encoded> {
    record_mode(ctx, AddrMode::Rela);
    let target = eval_operand(ctx, operand)?;
    let long_form = code | 3;
    let can_promote = req.branch_opt && req.cpu.has_long_branches();
    // The emission pass honors the size chosen by the last resolution
    // pass, so the final output cannot flip between short and long.
    let locked_long = req.emit_pass && can_promote && req.prev_opcode == Some(long_form);

    let displacement = target.map(|t| t - (req.pc + 2));
    let fits = matches!(displacement, Some(d) if (-128..=127).contains(&d));

    if fits && !locked_long {
        let d = displacement.unwrap();
        debug!(code, d, "short branch");
        return Ok(Encoded {
            bytes: vec![code, (d as i8) as u8],
            mode: AddrMode::Rela,
        });
    }
    if can_promote {
        let d16 = match displacement {
            Some(d) => d & 0xFFFF,
            None if req.emit_pass => return Err(AsmError::UndefinedSymbol),
            None => 0,
        };
        debug!(code = long_form, d16, "long branch");
        return Ok(Encoded {
            bytes: vec![long_form, (d16 & 0xFF) as u8, (d16 >> 8) as u8],
            mode: AddrMode::RelaLong,
        });
    }
    match displacement {
        None if req.emit_pass => Err(AsmError::UndefinedSymbol),
        Some(d) if req.emit_pass => Err(AsmError::BranchRange { displacement: d }),
        // Resolution pass: keep the short length and let the next pass
        // settle the target.
        _ => Ok(Encoded {
            bytes: vec![code, 0],
            mode: AddrMode::Rela,
        }),
    }
}

fn encode_long_branch(
    req: &EncodeRequest<'_>,
    ctx: &mut EvalCtx<'_>,
    code: u8,
    operand: &str,
) -> Result<Encoded> {
    record_mode(ctx, AddrMode::RelaLong);
    let target = eval_operand(ctx, operand)?;
    let t = require_defined(req, target)?;
    let d16 = (t - req.pc - 2) & 0xFFFF;
    Ok(Encoded {
        bytes: vec![code, (d16 & 0xFF) as u8, (d16 >> 8) as u8],
        mode: AddrMode::RelaLong,
    })
}

fn encode_bit_test(
    req: &EncodeRequest<'_>,
    ctx: &mut EvalCtx<'_>,
    code: u8,
    is_branch: bool,
    operand: &str,
) -> Result<Encoded> {
    record_mode(ctx, AddrMode::Zpag);
    let (zp, rest) = expr::eval(ctx, operand)?;
    let zp = require_defined(req, zp)?;
    check_base_page(req, zp)?;
    if !is_branch {
        let rest = crate::scan::skip_space(rest);
        if !rest.is_empty() {
            return Err(AsmError::MalformedOperand {
                message: format!("unexpected trailing text {rest:?}"),
            });
        }
        return Ok(Encoded {
            bytes: vec![code, (zp & 0xFF) as u8],
            mode: AddrMode::Zpag,
        });
    }
    let rest = crate::scan::skip_space(rest);
    let rest = rest.strip_prefix(',').ok_or(AsmError::MissingDelimiter {
        delimiter: ',',
        context: "between bit-test operand and branch target".into(),
    })?;
    let target = eval_operand(ctx, rest)?;
    let displacement = match target {
        Some(t) => {
            let d = t - (req.pc + 3);
            if req.emit_pass && !(-128..=127).contains(&d) {
                return Err(AsmError::BranchRange { displacement: d });
            }
            d
        }
        None if req.emit_pass => return Err(AsmError::UndefinedSymbol),
        None => 0,
    };
    Ok(Encoded {
        bytes: vec![code, (zp & 0xFF) as u8, (displacement as i8) as u8],
        mode: AddrMode::Rela,
    })
}

fn encode_q(
    req: &EncodeRequest<'_>,
    ctx: &mut EvalCtx<'_>,
    base: &str,
    operand: &str,
) -> Result<Encoded> {
    if operand.eq_ignore_ascii_case("A") {
        return Err(AsmError::MalformedOperand {
            message: format!("{} operates on Q, not on A", req.mnemonic),
        });
    }
    if operand.is_empty() || operand.eq_ignore_ascii_case("Q") {
        let entry = match tables::implied(base, req.cpu) {
            Some(Ok(e)) => e,
            _ => {
                return Err(AsmError::MalformedOperand {
                    message: format!("{} requires an operand", req.mnemonic),
                })
            }
        };
        let mut bytes = tables::Q_PREFIX.to_vec();
        bytes.push(entry.code);
        return Ok(Encoded {
            bytes,
            mode: AddrMode::Accu,
        });
    }
    let row = tables::general(base).ok_or_else(|| AsmError::UnknownMnemonic {
        text: base.to_string(),
    })?;
    encode_general(req, ctx, row, operand, &tables::Q_PREFIX)
}

fn encode_general(
    req: &EncodeRequest<'_>,
    ctx: &mut EvalCtx<'_>,
    row: &'static tables::GenOp,
    operand: &str,
    prefix: &[u8],
) -> Result<Encoded> {
    let (syntax, expr_text, force16) = split_operand(operand)?;
    record_mode(
        ctx,
        match syntax {
            Syntax::Imme => AddrMode::Imme,
            Syntax::Plain => AddrMode::Abso,
            Syntax::PlainX => AddrMode::Absx,
            Syntax::PlainY => AddrMode::Absy,
            Syntax::IndX => AddrMode::Indx,
            Syntax::IndY => AddrMode::Indy,
            Syntax::IndZ => AddrMode::Indz,
            Syntax::Ind32 => AddrMode::Ind32,
        },
    );
    let value = eval_operand(ctx, expr_text)?;
    debug!(mnemonic = row.mne, ?syntax, ?value, "encode");

    let mut bytes = prefix.to_vec();
    let encoded = match syntax {
        Syntax::Imme => {
            let cell = pick(req, row, AddrMode::Imme)?;
            if cell.len == 2 {
                if req.emit_pass {
                    let v = require_defined(req, value)?;
                    if !(-127..=255).contains(&v) {
                        return Err(AsmError::OperandRange {
                            mode: "immediate",
                            value: v,
                        });
                    }
                }
                let v = value.unwrap_or(0);
                bytes.push(cell.code);
                bytes.push((v & 0xFF) as u8);
            } else {
                let v = require_defined(req, value)?;
                bytes.push(cell.code);
                bytes.push((v & 0xFF) as u8);
                bytes.push(((v >> 8) & 0xFF) as u8);
            }
            Encoded {
                bytes,
                mode: AddrMode::Imme,
            }
        }
        Syntax::Plain | Syntax::PlainX | Syntax::PlainY => {
            let (zp_mode, abs_mode) = match syntax {
                Syntax::Plain => (AddrMode::Zpag, AddrMode::Abso),
                Syntax::PlainX => (AddrMode::Zpgx, AddrMode::Absx),
                _ => (AddrMode::Zpgy, AddrMode::Absy),
            };
            let zp_cell = cell_for(req, row, zp_mode);
            let abs_cell = cell_for(req, row, abs_mode);
            let shortened = !force16
                && zp_cell.is_some()
                && matches!(value, Some(v) if v >> 8 == i64::from(req.bp));
            if shortened || abs_cell.is_none() {
                let cell = zp_cell.ok_or_else(|| illegal(req, row))?;
                if req.emit_pass {
                    let v = require_defined(req, value)?;
                    check_base_page(req, v)?;
                }
                bytes.push(cell.code);
                bytes.push((value.unwrap_or(0) & 0xFF) as u8);
                Encoded {
                    bytes,
                    mode: zp_mode,
                }
            } else {
                let cell = abs_cell.ok_or_else(|| illegal(req, row))?;
                if req.emit_pass {
                    require_defined(req, value)?;
                }
                let v = value.unwrap_or(0);
                bytes.push(cell.code);
                bytes.push((v & 0xFF) as u8);
                bytes.push(((v >> 8) & 0xFF) as u8);
                Encoded {
                    bytes,
                    mode: abs_mode,
                }
            }
        }
        Syntax::IndX | Syntax::IndY | Syntax::IndZ => {
            let mode = match syntax {
                Syntax::IndX => AddrMode::Indx,
                Syntax::IndY => AddrMode::Indy,
                _ => AddrMode::Indz,
            };
            let cell = pick(req, row, mode)?;
            if cell.len == 2 {
                if req.emit_pass {
                    let v = require_defined(req, value)?;
                    check_base_page(req, v)?;
                }
                bytes.push(cell.code);
                bytes.push((value.unwrap_or(0) & 0xFF) as u8);
            } else {
                // 16-bit indirect (JMP/JSR).
                if req.emit_pass {
                    require_defined(req, value)?;
                }
                let v = value.unwrap_or(0);
                bytes.push(cell.code);
                bytes.push((v & 0xFF) as u8);
                bytes.push(((v >> 8) & 0xFF) as u8);
            }
            Encoded { bytes, mode }
        }
        Syntax::Ind32 => {
            if req.cpu != Cpu::Gs02 {
                return Err(illegal(req, row));
            }
            let cell = pick(req, row, AddrMode::Indz)?;
            if req.emit_pass {
                let v = require_defined(req, value)?;
                check_base_page(req, v)?;
            }
            bytes.push(tables::IND32_PREFIX);
            bytes.push(cell.code);
            bytes.push((value.unwrap_or(0) & 0xFF) as u8);
            Encoded {
                bytes,
                mode: AddrMode::Ind32,
            }
        }
    };
    Ok(encoded)
}

/// The cell for a mode, filtered by the active CPU.
fn cell_for(req: &EncodeRequest<'_>, row: &'static tables::GenOp, mode: AddrMode) -> Option<Op> {
    let col = tables::column(mode)?;
    row.ops[col].filter(|c| c.allowed(req.cpu))
}

fn pick(req: &EncodeRequest<'_>, row: &'static tables::GenOp, mode: AddrMode) -> Result<Op> {
    cell_for(req, row, mode).ok_or_else(|| illegal(req, row))
}

fn illegal(req: &EncodeRequest<'_>, row: &'static tables::GenOp) -> AsmError {
    AsmError::IllegalAddressMode {
        mnemonic: row.mne.to_string(),
        cpu: req.cpu,
    }
}

/// Base-page window check for single-byte operands (emission pass).
fn check_base_page(req: &EncodeRequest<'_>, v: i64) -> Result<()> {
    if !req.emit_pass {
        return Ok(());
    }
    let window = i64::from(req.bp) << 8;
    if (window..window + 0x100).contains(&v) {
        Ok(())
    } else {
        Err(AsmError::OperandRange {
            mode: "base-page",
            value: v,
        })
    }
}

/// Case-insensitive suffix test.
fn ends_with_icase(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len() && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Classify the operand's syntax and isolate its expression text.
fn split_operand(s: &str) -> Result<(Syntax, &str, bool)> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('#') {
        return Ok((Syntax::Imme, rest, false));
    }
    let (force16, s) = match s.strip_prefix('`') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, s),
    };
    if let Some(body) = s.strip_prefix('[') {
        // Only `[expr],Z` is the 32-bit indirect form; any other use of
        // the bracket is arithmetic and stays with the expression.
        if let Some(close) = body.rfind(']') {
            let tail = body[close + 1..].trim();
            if tail.eq_ignore_ascii_case(",Z") || tail.eq_ignore_ascii_case(", Z") {
                return Ok((Syntax::Ind32, &body[..close], force16));
            }
        }
    }
    if s.starts_with('(') {
        if ends_with_icase(s, ",X)") && s.len() > 4 {
            return Ok((Syntax::IndX, &s[1..s.len() - 3], force16));
        }
        if ends_with_icase(s, "),Y") && s.len() > 4 {
            return Ok((Syntax::IndY, &s[1..s.len() - 3], force16));
        }
        if ends_with_icase(s, "),Z") && s.len() > 4 {
            return Ok((Syntax::IndZ, &s[1..s.len() - 3], force16));
        }
        if s.ends_with(')') && s.len() > 2 {
            return Ok((Syntax::IndZ, &s[1..s.len() - 1], force16));
        }
        // A parenthesis that is not an outer indirect bracket belongs to
        // the expression itself.
    }
    if ends_with_icase(s, ",X") {
        return Ok((Syntax::PlainX, &s[..s.len() - 2], force16));
    }
    if ends_with_icase(s, ",Y") {
        return Ok((Syntax::PlainY, &s[..s.len() - 2], force16));
    }
    Ok((Syntax::Plain, s, force16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;
    use pretty_assertions::assert_eq;

    fn run(mne: &str, operand: &str, cpu: Cpu, emit: bool) -> Result<Encoded> {
        let mut tab = SymbolTable::new(false);
        run_with(&mut tab, mne, operand, cpu, emit, 0x1000, 0, false, None)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_with(
        tab: &mut SymbolTable,
        mne: &str,
        operand: &str,
        cpu: Cpu,
        emit: bool,
        pc: i64,
        bp: u8,
        branch_opt: bool,
        prev_opcode: Option<u8>,
    ) -> Result<Encoded> {
        let req = EncodeRequest {
            mnemonic: mne,
            operand,
            pc,
            bp,
            cpu,
            branch_opt,
            emit_pass: emit,
            prev_opcode,
        };
        let mut ctx = EvalCtx {
            symbols: tab,
            pc: Some(pc),
            scope: "",
            octal: false,
            record: None,
        };
        encode(&req, &mut ctx)
    }

    #[test]
    fn test_immediate() {
        let e = run("LDA", "#$42", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xA9, 0x42]);
        assert_eq!(e.mode, AddrMode::Imme);
    }

    #[test]
    fn test_base_page_shortening() {
        let e = run("LDA", "$40", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xA5, 0x40]);
        let e = run("LDA", "$0040", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xA5, 0x40]);
        let e = run("LDA", "`$0040", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xAD, 0x40, 0x00]);
        let e = run("LDA", "$1234", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xAD, 0x34, 0x12]);
    }

    #[test]
    fn test_configured_base_page() {
        let mut tab = SymbolTable::new(false);
        let e = run_with(&mut tab, "LDA", "$D012", Cpu::Gs02, true, 0x1000, 0xD0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0xA5, 0x12]);
        let e = run_with(&mut tab, "LDA", "$40", Cpu::Gs02, true, 0x1000, 0xD0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0xAD, 0x40, 0x00]);
    }

    #[test]
    fn test_indexed_modes() {
        assert_eq!(
            run("LDA", "$1234,X", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xBD, 0x34, 0x12]
        );
        assert_eq!(
            run("LDA", "$12,X", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xB5, 0x12]
        );
        assert_eq!(
            run("LDA", "$1234,Y", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xB9, 0x34, 0x12]
        );
        assert_eq!(
            run("LDX", "$12,Y", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xB6, 0x12]
        );
        assert_eq!(
            run("STX", "$12,Y", Cpu::Mos6502, true).unwrap().bytes,
            vec![0x96, 0x12]
        );
    }

    #[test]
    fn test_indirect_modes() {
        assert_eq!(
            run("LDA", "($FB),Y", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xB1, 0xFB]
        );
        assert_eq!(
            run("LDA", "($FB,X)", Cpu::Mos6502, true).unwrap().bytes,
            vec![0xA1, 0xFB]
        );
        assert_eq!(
            run("JMP", "($1234)", Cpu::Mos6502, true).unwrap().bytes,
            vec![0x6C, 0x34, 0x12]
        );
        assert_eq!(
            run("LDA", "($FB)", Cpu::C02, true).unwrap().bytes,
            vec![0xB2, 0xFB]
        );
        assert_eq!(
            run("LDA", "($FB),Z", Cpu::Gs02, true).unwrap().bytes,
            vec![0xB2, 0xFB]
        );
    }

    #[test]
    fn test_indirect_gated_on_nmos() {
        assert!(matches!(
            run("LDA", "($FB)", Cpu::Mos6502, true),
            Err(AsmError::IllegalAddressMode { .. })
        ));
    }

    #[test]
    fn test_implied_and_accu() {
        assert_eq!(run("NOP", "", Cpu::Mos6502, true).unwrap().bytes, vec![0xEA]);
        let e = run("ASL", "A", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0x0A]);
        assert_eq!(e.mode, AddrMode::Accu);
        assert_eq!(run("INC", "A", Cpu::C02, true).unwrap().bytes, vec![0x1A]);
        assert!(run("INC", "A", Cpu::Mos6502, true).is_err());
    }

    #[test]
    fn test_branch_backwards() {
        // LOOP: BNE LOOP at pc 0x1000: displacement -2.
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("LOOP").unwrap();
        tab.get_mut(i).address = Some(0x1000);
        let e = run_with(&mut tab, "BNE", "LOOP", Cpu::Mos6502, true, 0x1000, 0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0xD0, 0xFE]);
    }

    #[test]
    fn test_branch_out_of_range() {
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("FAR").unwrap();
        tab.get_mut(i).address = Some(0x2000);
        let r = run_with(&mut tab, "BNE", "FAR", Cpu::Mos6502, true, 0x1000, 0, false, None);
        assert!(matches!(r, Err(AsmError::BranchRange { .. })));
    }

    #[test]
    fn test_branch_promotion() {
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("FAR").unwrap();
        tab.get_mut(i).address = Some(0x2000);
        let e = run_with(&mut tab, "BNE", "FAR", Cpu::Gs02, true, 0x1000, 0, true, None)
            .unwrap();
        // 0xD0 | 3 with displacement 0x2000 - 0x1000 - 2 = 0x0FFE.
        assert_eq!(e.bytes, vec![0xD3, 0xFE, 0x0F]);
        assert_eq!(e.mode, AddrMode::RelaLong);
    }

    #[test]
    fn test_branch_lock_keeps_long_form() {
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("NEAR").unwrap();
        tab.get_mut(i).address = Some(0x1010);
        // Near target, but the previous pass chose the long form.
        let e = run_with(
            &mut tab,
            "BNE",
            "NEAR",
            Cpu::Gs02,
            true,
            0x1000,
            0,
            true,
            Some(0xD3),
        )
        .unwrap();
        assert_eq!(e.bytes[0], 0xD3);
        assert_eq!(e.bytes.len(), 3);
    }

    #[test]
    fn test_undefined_branch_with_optimization_promotes() {
        let mut tab = SymbolTable::new(false);
        let e = run_with(&mut tab, "BNE", "LATER", Cpu::Gs02, false, 0x1000, 0, true, None)
            .unwrap();
        assert_eq!(e.bytes.len(), 3);
        assert_eq!(e.bytes[0], 0xD3);
    }

    #[test]
    fn test_bsr_and_long_branch() {
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("SUB").unwrap();
        tab.get_mut(i).address = Some(0x3000);
        let e = run_with(&mut tab, "BSR", "SUB", Cpu::Gs02, true, 0x1000, 0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0x63, 0xFE, 0x1F]);
        let e = run_with(&mut tab, "LBNE", "SUB", Cpu::Gs02, true, 0x1000, 0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0xD3, 0xFE, 0x1F]);
    }

    #[test]
    fn test_bit_test_group() {
        let e = run("RMB3", "$12", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x37, 0x12]);
        let e = run("SMB0", "$12", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x87, 0x12]);
        let mut tab = SymbolTable::new(false);
        let i = tab.intern("NEXT").unwrap();
        tab.get_mut(i).address = Some(0x1005);
        let e = run_with(&mut tab, "BBR7", "$12,NEXT", Cpu::Gs02, true, 0x1000, 0, false, None)
            .unwrap();
        assert_eq!(e.bytes, vec![0x7F, 0x12, 0x02]);
    }

    #[test]
    fn test_q_register_forms() {
        let e = run("LDQ", "$1234", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x42, 0x42, 0xAD, 0x34, 0x12]);
        let e = run("ASLQ", "", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x42, 0x42, 0x0A]);
        let e = run("LDQ", "($FB),Z", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x42, 0x42, 0xB2, 0xFB]);
        let e = run("LDQ", "[$FB],Z", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0x42, 0x42, 0xEA, 0xB2, 0xFB]);
        assert!(run("ASLQ", "A", Cpu::Gs02, true).is_err());
    }

    #[test]
    fn test_ind32_without_q() {
        let e = run("LDA", "[$FB],Z", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0xEA, 0xB2, 0xFB]);
    }

    #[test]
    fn test_q_not_recognized_off_gs02() {
        assert!(!is_instruction("LDQ", Cpu::C02));
        assert!(is_instruction("LDQ", Cpu::Gs02));
        assert!(!is_instruction("BBR3", Cpu::C02));
        assert!(is_instruction("BBR3", Cpu::Gs02));
    }

    #[test]
    fn test_immediate_range() {
        assert!(run("LDA", "#300", Cpu::Mos6502, true).is_err());
        assert!(run("LDA", "#-128", Cpu::Mos6502, true).is_err());
        assert!(run("LDA", "#-127", Cpu::Mos6502, true).is_ok());
        assert!(run("LDA", "#255", Cpu::Mos6502, true).is_ok());
    }

    #[test]
    fn test_sta_immediate_rejected() {
        assert!(matches!(
            run("STA", "#1", Cpu::Mos6502, true),
            Err(AsmError::IllegalAddressMode { .. })
        ));
    }

    #[test]
    fn test_undefined_operand_resolution_vs_emission() {
        let mut tab = SymbolTable::new(false);
        // Resolution pass assumes the absolute length.
        let e = run_with(&mut tab, "LDA", "LATER", Cpu::Mos6502, false, 0x1000, 0, false, None)
            .unwrap();
        assert_eq!(e.bytes.len(), 3);
        let r = run_with(&mut tab, "LDA", "LATER", Cpu::Mos6502, true, 0x1000, 0, false, None);
        assert!(matches!(r, Err(AsmError::UndefinedSymbol)));
    }

    #[test]
    fn test_arithmetic_brackets_not_indirect() {
        // A leading [ without the ,Z tail is an arithmetic bracket.
        let e = run("LDA", "[$20+3]*2", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xA5, 0x46]);
        // A parenthesis that is closed mid-operand stays arithmetic too;
        // only a fully parenthesized operand reads as indirect.
        let e = run("LDA", "($20+3)*2", Cpu::Mos6502, true).unwrap();
        assert_eq!(e.bytes, vec![0xA5, 0x46]);
    }

    #[test]
    fn test_phw_16bit_immediate() {
        let e = run("PHW", "#$1234", Cpu::Gs02, true).unwrap();
        assert_eq!(e.bytes, vec![0xF4, 0x34, 0x12]);
    }

    #[test]
    fn test_jmp_indexed_indirect() {
        let e = run("JMP", "($1234,X)", Cpu::C02, true).unwrap();
        assert_eq!(e.bytes, vec![0x7C, 0x34, 0x12]);
    }

    #[test]
    fn test_is_instruction() {
        assert!(is_instruction("LDA", Cpu::Mos6502));
        assert!(is_instruction("nop", Cpu::Mos6502));
        assert!(is_instruction("BNE", Cpu::Mos6502));
        assert!(!is_instruction("BRA", Cpu::Mos6502));
        assert!(is_instruction("BRA", Cpu::C02));
        assert!(!is_instruction("LDZ", Cpu::Mos6502));
        assert!(is_instruction("LDZ", Cpu::Gs02));
        assert!(!is_instruction("HELLO", Cpu::Gs02));
    }
}
