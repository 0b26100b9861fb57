//! asm65 CLI
//!
//! Command-line cross-assembler for the 6502 family.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use asm65::{AsmOptions, AsmOutput};

/// Cross-assembler for the 6502 family.
///
/// Reads an assembly source (`.asm`, or `.src` for compatibility mode)
/// and writes binary images per `STORE` directive plus a listing with a
/// symbol cross-reference.
#[derive(Parser, Debug)]
#[command(name = "asm65")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Assembly source file (the .asm extension may be omitted)
    source: PathBuf,

    /// Strip a disassembly prefix from each input line
    #[arg(short = 'x')]
    strip_disassembly: bool,

    /// Enable branch optimization (45GS02 long branches)
    #[arg(short = 'b')]
    branch_opt: bool,

    /// Write a verbose debug log to Debug.lst
    #[arg(short = 'd')]
    debug: bool,

    /// Case-insensitive symbol names
    #[arg(short = 'i')]
    ignore_case: bool,

    /// Include line numbers in the listing
    #[arg(short = 'n')]
    line_numbers: bool,

    /// Emit the preprocessed source to <source>.pp
    #[arg(short = 'p')]
    preprocess: bool,

    /// Pre-define a locked symbol, e.g. -D C64=1 (repeatable)
    #[arg(short = 'D', value_name = "NAME=EXPR")]
    define: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        match std::fs::File::create("Debug.lst") {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter("asm65=debug")
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .init();
            }
            Err(e) => {
                eprintln!("Cannot create Debug.lst: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "asm65=warn".into()),
            )
            .init();
    }

    match run(&args) {
        Ok(out) => {
            print_summary(&out);
            for d in &out.diagnostics {
                eprint!("{d}");
            }
            for name in &out.undefined {
                eprintln!("Undefined: {name}");
            }
            if out.diagnostics.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("*** {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<AsmOutput> {
    let path = resolve_source(&args.source);
    let compat = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("src"));

    let mut opts = if compat {
        AsmOptions::compat()
    } else {
        AsmOptions::new()
    };
    opts.strip_disassembly |= args.strip_disassembly;
    opts.branch_opt |= args.branch_opt;
    opts.case_insensitive |= args.ignore_case;
    opts.line_numbers |= args.line_numbers;
    opts.preprocess |= args.preprocess;
    for def in &args.define {
        let (name, expr) = def
            .split_once('=')
            .with_context(|| format!("-D {def}: expected NAME=EXPR"))?;
        opts.defines.push((name.to_string(), expr.to_string()));
    }

    asm65::assemble_file(&path, opts)
        .with_context(|| format!("assembling {}", path.display()))
}

/// Append the default `.asm` extension when the path has none.
fn resolve_source(source: &PathBuf) -> PathBuf {
    if source.extension().is_some() || source.exists() {
        source.clone()
    } else {
        source.with_extension("asm")
    }
}

fn print_summary(out: &AsmOutput) {
    let s = &out.summary;
    println!("Source lines: {:6}", s.source_lines);
    println!("Symbols     : {:6}", s.symbols);
    println!("Macros      : {:6}", s.macros);
    println!("Passes      : {:6}", s.passes + 1);
    if let (Some(start), Some(end)) = (s.gen_start, s.gen_end) {
        println!("Assembled   : ${start:04X} - ${:04X}", end.saturating_sub(1));
    }
    for file in &s.stored_files {
        println!("Written     : {file}");
    }
    if s.errors > 0 {
        println!("Errors      : {:6}", s.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["asm65", "game.asm"]).unwrap();
        assert_eq!(args.source, PathBuf::from("game.asm"));
        assert!(!args.branch_opt);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from(["asm65", "-b", "-i", "-n", "game.src"]).unwrap();
        assert!(args.branch_opt);
        assert!(args.ignore_case);
        assert!(args.line_numbers);
    }

    #[test]
    fn test_defines() {
        let args =
            Args::try_parse_from(["asm65", "-D", "C64=1", "-D", "PAL=0", "game.asm"]).unwrap();
        assert_eq!(args.define, vec!["C64=1", "PAL=0"]);
    }

    #[test]
    fn test_resolve_source() {
        assert_eq!(
            resolve_source(&PathBuf::from("prog")),
            PathBuf::from("prog.asm")
        );
        assert_eq!(
            resolve_source(&PathBuf::from("prog.src")),
            PathBuf::from("prog.src")
        );
    }
}
