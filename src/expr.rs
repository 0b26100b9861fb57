//! Expression evaluator.
//!
//! Recursive descent over unary prefixes and infix operators with a
//! precedence table. Values are `Option<i64>`: an undefined operand
//! (forward reference, division by zero) propagates through every
//! operator, so a whole expression becomes undefined rather than wrong.
//! Unknown symbols are created in the table as forward references.
//!
//! The operator sets are closed enums applied by a single function each,
//! rather than function-pointer tables.

use tracing::trace;

use crate::error::{AsmError, Result};
use crate::scan;
use crate::symbols::SymbolTable;
use crate::types::{AddrMode, Value};

/// Binary operators, in the notation of the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinOp {
    Mul,
    Div,
    Add,
    Sub,
    Shl,
    Shr,
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinOp {
    /// Binding strength; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div => 11,
            BinOp::Add | BinOp::Sub => 10,
            BinOp::Shl | BinOp::Shr => 9,
            BinOp::Le | BinOp::Lt | BinOp::Ge | BinOp::Gt => 8,
            BinOp::Eq | BinOp::Ne => 7,
            BinOp::BitAnd => 6,
            BinOp::BitXor => 5,
            BinOp::BitOr => 4,
            BinOp::LogAnd => 3,
            BinOp::LogOr => 2,
        }
    }
}

/// Match a binary operator at the start of `s`, longest spelling first.
fn peek_binop(s: &str) -> Option<(BinOp, &str)> {
    const TWO: &[(&str, BinOp)] = &[
        ("<<", BinOp::Shl),
        (">>", BinOp::Shr),
        ("<=", BinOp::Le),
        (">=", BinOp::Ge),
        ("==", BinOp::Eq),
        ("!=", BinOp::Ne),
        ("&&", BinOp::LogAnd),
        ("||", BinOp::LogOr),
    ];
    for (text, op) in TWO {
        if let Some(rest) = s.strip_prefix(text) {
            return Some((*op, rest));
        }
    }
    let op = match s.chars().next()? {
        '*' => BinOp::Mul,
        '/' => BinOp::Div,
        '+' => BinOp::Add,
        '-' => BinOp::Sub,
        '<' => BinOp::Lt,
        '>' => BinOp::Gt,
        '&' => BinOp::BitAnd,
        '^' => BinOp::BitXor,
        '|' => BinOp::BitOr,
        _ => return None,
    };
    Some((op, &s[1..]))
}

/// Apply a binary operator; any undefined operand or division by zero
/// yields undefined. Relational and logical operators yield 0 or 1.
fn apply_bin(op: BinOp, lhs: Value, rhs: Value) -> Value {
    let a = lhs?;
    let b = rhs?;
    let v = match op {
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr => a.wrapping_shr(b as u32),
        BinOp::Le => i64::from(a <= b),
        BinOp::Lt => i64::from(a < b),
        BinOp::Ge => i64::from(a >= b),
        BinOp::Gt => i64::from(a > b),
        BinOp::Eq => i64::from(a == b),
        BinOp::Ne => i64::from(a != b),
        BinOp::BitAnd => a & b,
        BinOp::BitXor => a ^ b,
        BinOp::BitOr => a | b,
        BinOp::LogAnd => i64::from(a != 0 && b != 0),
        BinOp::LogOr => i64::from(a != 0 || b != 0),
    };
    Some(v)
}

/// Evaluation context: the mutable symbol table plus the assembler state
/// an expression may observe.
pub struct EvalCtx<'a> {
    /// Symbol table; unknown names are interned as forward references.
    pub symbols: &'a mut SymbolTable,
    /// Current program counter, for the `*` operand.
    pub pc: Value,
    /// Scope prefix for module-local names; empty outside a module.
    pub scope: &'a str,
    /// `@` octal literals are enabled (compatibility mode).
    pub octal: bool,
    /// When set, symbol uses are recorded with this line number and
    /// address mode (emission pass only).
    pub record: Option<(u32, AddrMode)>,
}

impl<'a> EvalCtx<'a> {
    /// Qualify a module-local name with the current scope.
    fn qualify(&self, name: &str) -> String {
        if self.scope.is_empty() {
            return name.to_string();
        }
        if let Some(local) = name.strip_prefix('.') {
            format!("{}_{}", self.scope, local)
        } else if name.starts_with('_') || name.ends_with('$') {
            format!("{}{}", self.scope, name)
        } else {
            name.to_string()
        }
    }

    /// Intern a (qualified) symbol, record the use, and return its value.
    fn symbol_value(&mut self, name: &str) -> Result<Value> {
        let qualified = self.qualify(name);
        let index = self.symbols.intern(&qualified)?;
        if let Some((line, mode)) = self.record {
            self.symbols.record_use(index, line, mode);
        }
        Ok(self.symbols.get(index).address)
    }

    /// Like `symbol_value`, but yields the data-region length (`?`).
    fn symbol_bytes(&mut self, name: &str) -> Result<Value> {
        let qualified = self.qualify(name);
        let index = self.symbols.intern(&qualified)?;
        if let Some((line, mode)) = self.record {
            self.symbols.record_use(index, line, mode);
        }
        let sym = self.symbols.get(index);
        if sym.address.is_none() {
            Ok(None)
        } else {
            Ok(Some(sym.bytes))
        }
    }
}

/// Evaluate an expression at the start of `text`.
///
/// Returns the value and the remaining text. Structural problems
/// (missing bracket, empty operand) are errors; undefined operands are
/// not.
pub fn eval<'t>(ctx: &mut EvalCtx<'_>, text: &'t str) -> Result<(Value, &'t str)> {
    let (value, rest) = eval_prec(ctx, text, 0)?;
    trace!(value = ?value, rest = rest, "eval");
    Ok((value, rest))
}

/// Evaluate a full expression and require that nothing but whitespace
/// follows it.
pub fn eval_complete(ctx: &mut EvalCtx<'_>, text: &str) -> Result<Value> {
    let (value, rest) = eval(ctx, text)?;
    let rest = scan::skip_space(rest);
    if rest.is_empty() {
        Ok(value)
    } else {
        Err(AsmError::MalformedOperand {
            message: format!("unexpected trailing text {rest:?}"),
        })
    }
}

fn eval_prec<'t>(ctx: &mut EvalCtx<'_>, text: &'t str, min_prec: u8) -> Result<(Value, &'t str)> {
    let (mut lhs, mut rest) = eval_unary(ctx, text)?;
    loop {
        let look = scan::skip_space(rest);
        let Some((op, after)) = peek_binop(look) else {
            break;
        };
        let prec = op.precedence();
        if prec < min_prec {
            break;
        }
        let (rhs, tail) = eval_prec(ctx, after, prec + 1)?;
        lhs = apply_bin(op, lhs, rhs);
        rest = tail;
    }
    Ok((lhs, rest))
}

fn eval_unary<'t>(ctx: &mut EvalCtx<'_>, text: &'t str) -> Result<(Value, &'t str)> {
    let s = scan::skip_space(text);
    let Some(first) = s.chars().next() else {
        return Err(AsmError::MalformedOperand {
            message: "empty operand".into(),
        });
    };
    match first {
        '[' => eval_bracket(ctx, &s[1..], ']'),
        '(' => eval_bracket(ctx, &s[1..], ')'),
        '+' => eval_unary(ctx, &s[1..]),
        '-' => {
            let (v, rest) = eval_unary(ctx, &s[1..])?;
            Ok((v.map(i64::wrapping_neg), rest))
        }
        '!' => {
            let (v, rest) = eval_unary(ctx, &s[1..])?;
            Ok((v.map(|x| i64::from(x == 0)), rest))
        }
        '~' => {
            let (v, rest) = eval_unary(ctx, &s[1..])?;
            Ok((v.map(|x| !x), rest))
        }
        '<' => {
            let (v, rest) = eval_unary(ctx, &s[1..])?;
            Ok((v.map(|x| x & 0xFF), rest))
        }
        '>' => {
            let (v, rest) = eval_unary(ctx, &s[1..])?;
            Ok((v.map(|x| x >> 8), rest))
        }
        '*' => Ok((ctx.pc, &s[1..])),
        '$' => parse_hex(&s[1..]),
        '%' => parse_bin(&s[1..]),
        '\'' => parse_char(&s[1..]),
        '?' => {
            let (name, rest) = take_name(&s[1..])?;
            Ok((ctx.symbol_bytes(&name)?, rest))
        }
        '@' if ctx.octal => parse_oct(&s[1..]),
        c if c.is_ascii_digit() => {
            if let Some((label, rest)) = scan::take_numeric_label(s) {
                Ok((ctx.symbol_value(label)?, rest))
            } else {
                parse_dec(s)
            }
        }
        c if scan::is_sym_start(c) => {
            let (name, rest) = scan::take_symbol(s);
            Ok((ctx.symbol_value(name)?, rest))
        }
        c => Err(AsmError::MalformedOperand {
            message: format!("illegal operand character {c:?}"),
        }),
    }
}

fn eval_bracket<'t>(
    ctx: &mut EvalCtx<'_>,
    text: &'t str,
    close: char,
) -> Result<(Value, &'t str)> {
    let (v, rest) = eval_prec(ctx, text, 0)?;
    let rest = scan::skip_space(rest);
    match rest.strip_prefix(close) {
        Some(after) => Ok((v, after)),
        None => Err(AsmError::MissingDelimiter {
            delimiter: close,
            context: "in expression".into(),
        }),
    }
}

/// Symbol name after a prefix operator, numeric-label form included.
fn take_name(text: &str) -> Result<(String, &str)> {
    let s = scan::skip_space(text);
    if let Some((label, rest)) = scan::take_numeric_label(s) {
        return Ok((label.to_string(), rest));
    }
    let (name, rest) = scan::take_symbol(s);
    if name.is_empty() {
        return Err(AsmError::MalformedOperand {
            message: "expected symbol name".into(),
        });
    }
    Ok((name.to_string(), rest))
}

fn parse_hex(text: &str) -> Result<(Value, &str)> {
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_hexdigit()).len();
    if digits == 0 {
        return Err(AsmError::BadNumericLiteral {
            text: format!("${}", text.chars().take(4).collect::<String>()),
        });
    }
    let mut v: i64 = 0;
    for c in text[..digits].bytes() {
        v = v.wrapping_mul(16) + i64::from((c as char).to_digit(16).unwrap());
    }
    Ok((Some(v), &text[digits..]))
}

fn parse_dec(text: &str) -> Result<(Value, &str)> {
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let mut v: i64 = 0;
    for c in text[..digits].bytes() {
        v = v.wrapping_mul(10) + i64::from(c - b'0');
    }
    Ok((Some(v), &text[digits..]))
}

/// Binary literal; `.` counts as 0 and `*` as 1, so bit masks can be
/// written the way they look in a sprite or character definition.
fn parse_bin(text: &str) -> Result<(Value, &str)> {
    let mut v: i64 = 0;
    let mut len = 0;
    for c in text.bytes() {
        match c {
            b'0' | b'.' => v <<= 1,
            b'1' | b'*' => v = (v << 1) | 1,
            _ => break,
        }
        len += 1;
    }
    if len == 0 {
        return Err(AsmError::BadNumericLiteral {
            text: format!("%{}", text.chars().take(4).collect::<String>()),
        });
    }
    Ok((Some(v), &text[len..]))
}

fn parse_oct(text: &str) -> Result<(Value, &str)> {
    let digits = text.len() - text.trim_start_matches(|c: char| ('0'..='7').contains(&c)).len();
    if digits == 0 {
        return Err(AsmError::BadNumericLiteral {
            text: format!("@{}", text.chars().take(4).collect::<String>()),
        });
    }
    let mut v: i64 = 0;
    for c in text[..digits].bytes() {
        v = v.wrapping_mul(8) + i64::from(c - b'0');
    }
    Ok((Some(v), &text[digits..]))
}

/// Character literal with the string escapes of the data directives.
fn parse_char(text: &str) -> Result<(Value, &str)> {
    let mut chars = text.char_indices();
    let (_, c) = chars.next().ok_or(AsmError::MissingDelimiter {
        delimiter: '\'',
        context: "after character operand".into(),
    })?;
    let (value, rest) = if c == '\\' {
        let (_, esc) = chars.next().ok_or(AsmError::MissingDelimiter {
            delimiter: '\'',
            context: "after character operand".into(),
        })?;
        (i64::from(escape_byte(esc)), chars.as_str())
    } else {
        (i64::from(c as u8), chars.as_str())
    };
    match rest.strip_prefix('\'') {
        Some(after) => Ok((Some(value), after)),
        None => Err(AsmError::MissingDelimiter {
            delimiter: '\'',
            context: "after character operand".into(),
        }),
    }
}

/// Byte value of a string escape; unknown escapes are the character
/// itself.
pub fn escape_byte(c: char) -> u8 {
    match c {
        'r' => 13,
        'n' => 10,
        'a' => 7,
        'e' => 27,
        '0' => 0,
        '\\' => b'\\',
        other => other as u8,
    }
}
