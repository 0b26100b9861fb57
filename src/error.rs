//! Error types for the assembler.
//!
//! This module defines all error types used throughout the engine,
//! providing source position and excerpt information for diagnostics.

use thiserror::Error;

/// Primary error type for the assembler.
#[derive(Debug, Error)]
pub enum AsmError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown mnemonic or pseudo op.
    #[error("Unknown mnemonic or pseudo op: {text}")]
    UnknownMnemonic { text: String },

    /// Malformed operand text.
    #[error("Malformed operand: {message}")]
    MalformedOperand { message: String },

    /// A required delimiter was not found.
    #[error("Missing delimiter '{delimiter}' {context}")]
    MissingDelimiter { delimiter: char, context: String },

    /// Illegal character inside a numeric literal.
    #[error("Illegal character in numeric literal: {text}")]
    BadNumericLiteral { text: String },

    /// Duplicate symbol definition with a different value.
    #[error("Multiple definitions for symbol [{name}]: ${first:04X} vs ${second:04X}")]
    DuplicateSymbol { name: String, first: u32, second: u32 },

    /// A positional symbol settled on a different address in the emission pass.
    #[error("Phase error for symbol [{name}]: resolved ${recorded:04X}, emitted ${computed:04X}")]
    PhaseError {
        name: String,
        recorded: u32,
        computed: u32,
    },

    /// An undefined symbol was used on the emission pass.
    #[error("Use of undefined symbol on final pass")]
    UndefinedSymbol,

    /// Operand value out of range for the selected mode.
    #[error("{mode} operand out of range: {value}")]
    OperandRange { mode: &'static str, value: i64 },

    /// Branch displacement does not fit in a signed byte.
    #[error("Branch out of range ({displacement})")]
    BranchRange { displacement: i64 },

    /// Address mode not available for this mnemonic on the active CPU.
    #[error("Illegal address mode for {mnemonic} on the {cpu}")]
    IllegalAddressMode {
        mnemonic: String,
        cpu: crate::types::Cpu,
    },

    /// Program counter left the 64K address space.
    #[error("Program counter exceeds 64 KB")]
    PcOverflow,

    /// Assembling without a program counter (no ORG seen).
    #[error("Program counter is undefined (missing ORG)")]
    PcUndefined,

    /// A table or nesting limit was exceeded.
    #[error("Too many {what} (limit {limit})")]
    TooMany { what: &'static str, limit: usize },

    /// Macro called with the wrong number of arguments.
    #[error("Macro [{name}] called with {got} arguments, defined with {expected}")]
    MacroArity {
        name: String,
        got: usize,
        expected: usize,
    },

    /// Malformed directive syntax.
    #[error("{directive}: {message}")]
    BadDirective {
        directive: &'static str,
        message: String,
    },

    /// `CPU` directive with an unsupported name.
    #[error("Unsupported CPU name: {name}")]
    UnknownCpu { name: String },

    /// Exponent out of range when encoding a real literal.
    #[error("Real constant out of range: {text}")]
    RealRange { text: String },

    /// `#endif` without a matching `#if`.
    #[error("#endif without #if")]
    EndifWithoutIf,

    /// `#endif` statements missing at end of input.
    #[error("{count} #endif statement(s) missing")]
    MissingEndif { count: usize },

    /// User-raised `#error` directive.
    #[error("{message}")]
    UserError { message: String },

    /// The error ceiling for one pass was reached.
    #[error("Error count reached maximum of {max}, assembly stopped")]
    TooManyErrors { max: u32 },

    /// Symbol addresses kept changing across the pass ceiling.
    #[error("Assembly did not converge after {passes} passes")]
    NoConvergence { passes: u32 },
}

/// Result type alias for assembler operations.
pub type Result<T> = std::result::Result<T, AsmError>;

/// A reported diagnostic: an error with its source position and an
/// optional caret-pointed excerpt of the offending line.
#[derive(Debug)]
pub struct Diagnostic {
    /// Source file name.
    pub file: String,
    /// Line number within the file.
    pub line: u32,
    /// The source line text.
    pub text: String,
    /// Caret position within `text`, if a specific column is known.
    pub column: Option<usize>,
    /// The underlying error.
    pub error: AsmError,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "*** Error {}:{}: {}", self.file, self.line, self.error)?;
        if !self.text.is_empty() {
            writeln!(f, "{}", self.text)?;
            if let Some(col) = self.column {
                writeln!(f, "{}^", " ".repeat(col.min(self.text.len())))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AsmError::DuplicateSymbol {
            name: "LOOP".into(),
            first: 0x1000,
            second: 0x2000,
        };
        let msg = err.to_string();
        assert!(msg.contains("LOOP"));
        assert!(msg.contains("1000"));
        assert!(msg.contains("2000"));
    }

    #[test]
    fn test_diagnostic_caret() {
        let d = Diagnostic {
            file: "test.asm".into(),
            line: 7,
            text: "  LDA #$1G".into(),
            column: Some(8),
            error: AsmError::BadNumericLiteral { text: "$1G".into() },
        };
        let rendered = d.to_string();
        assert!(rendered.contains("test.asm:7"));
        assert!(rendered.contains("        ^"));
    }

    #[test]
    fn test_branch_range_message() {
        let err = AsmError::BranchRange { displacement: 300 };
        assert!(err.to_string().contains("300"));
    }
}
