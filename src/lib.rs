//! asm65 - Cross-Assembler for the 6502 Family
//!
//! This library assembles sources for the 6502 family of 8-bit
//! microprocessors and its descendants (65SC02, 65C02, 45GS02/MEGA65,
//! 65816), producing raw binary images at configured memory addresses
//! plus a listing with a symbol cross-reference.
//!
//! # Features
//!
//! - **Multi-pass resolution**: symbol addresses iterate to a fixed
//!   point, with branch-size optimization and phase-error detection
//! - **Full expression evaluator**: prefix and infix operators with a
//!   precedence table, forward references and scope-local names
//! - **Per-CPU opcode tables**: instruction selection across implied,
//!   branch, bit-test and general tables, gated by CPU variant
//! - **Base-page shortening**: absolute forms shrink automatically when
//!   the operand lands in the configured base page
//! - **Macros**: recorded once, expanded textually with up to 10
//!   positional parameters
//! - **Rich directives**: data emission in ASCII/PETSCII/screen code,
//!   CBM floating-point, conditional assembly, includes, stores
//!
//! # Quick Start
//!
//! ```rust
//! use asm65::{assemble_source, AsmOptions};
//!
//! fn main() -> asm65::Result<()> {
//!     let out = assemble_source("demo.asm", "* = $1000\n LDA #$42\n RTS\n", AsmOptions::new())?;
//!     assert_eq!(out.image.slice(0x1000, 3), &[0xA9, 0x42, 0x60]);
//!     Ok(())
//! }
//! ```
//!
//! # CPU Support
//!
//! - **6502/6510**: the NMOS base instruction set
//! - **65SC02**: CMOS additions without the bit instructions
//! - **65C02**: CMOS additions
//! - **45GS02**: MEGA65 extensions including the Q register, long
//!   branches and 32-bit indirect addressing
//! - **65816**: a compatible subset with its extra implied instructions

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod asm;
pub mod cond;
pub mod directives;
pub mod error;
pub mod expr;
pub mod image;
pub mod isa;
pub mod listing;
pub mod macros;
pub mod scan;
pub mod source;
pub mod symbols;
pub mod types;

pub use asm::{AsmOutput, Assembler};
pub use error::{AsmError, Diagnostic, Result};
pub use types::{AddrMode, AsmOptions, AsmSummary, Cpu, CpuMask, Value};

use std::path::Path;

/// Assemble a source file.
///
/// This is the primary entry point for file-based assembly. Besides the
/// returned output it writes the listing next to the source
/// (`<source>.lst`), the preprocessed copy when requested
/// (`<source>.pp`), and one binary per `STORE` directive.
///
/// # Arguments
///
/// * `path` - Path to the assembly source
/// * `opts` - Assembly options (use [`AsmOptions::compat`] for `.src`
///   sources)
///
/// # Example
///
/// ```rust,no_run
/// use asm65::{assemble_file, AsmOptions};
///
/// let out = assemble_file("game.asm", AsmOptions::new())?;
/// println!("{} symbols, {} errors", out.summary.symbols, out.summary.errors);
/// # Ok::<(), asm65::AsmError>(())
/// ```
pub fn assemble_file<P: AsRef<Path>>(path: P, opts: AsmOptions) -> Result<AsmOutput> {
    let path = path.as_ref();
    let out = Assembler::from_file(path, opts).run()?;
    std::fs::write(path.with_extension("lst"), &out.listing)?;
    if let Some(pp) = &out.preprocessed {
        std::fs::write(path.with_extension("pp"), pp)?;
    }
    Ok(out)
}

/// Assemble in-memory source text.
///
/// `STORE` outputs resolve relative to the current directory; no
/// listing file is written (the listing text is in the returned
/// output).
///
/// # Arguments
///
/// * `name` - Source name used in diagnostics
/// * `text` - The assembly source
/// * `opts` - Assembly options
pub fn assemble_source(name: &str, text: &str, opts: AsmOptions) -> Result<AsmOutput> {
    Assembler::from_text(name, text, opts).run()
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_assemble_source() {
        let out = assemble_source("t.asm", "* = $1000\n LDA #$42\n RTS\n", AsmOptions::new())
            .unwrap();
        assert_eq!(out.image.slice(0x1000, 3), &[0xA9, 0x42, 0x60]);
        assert_eq!(out.summary.errors, 0);
    }

    #[test]
    fn test_assemble_file_writes_listing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("t.asm");
        std::fs::write(&src, "* = $1000\n NOP\n").unwrap();
        let mut opts = AsmOptions::new();
        opts.preprocess = true;
        let out = assemble_file(&src, opts).unwrap();
        assert!(dir.path().join("t.lst").exists());
        assert!(dir.path().join("t.pp").exists());
        assert!(out.listing.contains("NOP"));
    }
}
