//! Assembler state and pass driver.
//!
//! The `Assembler` bundles every piece of mutable state (program
//! counter, tables, counters) and is threaded by mutable reference
//! through the per-line parser; there are no globals. Resolution passes
//! run until a full pass records no symbol address change, then one
//! emission pass produces bytes, listing and diagnostics. Branch-size
//! decisions recorded in the image by the last resolution pass are
//! honored verbatim during emission, so the output cannot oscillate.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cond::CondStack;
use crate::directives::{self, TextMode};
use crate::error::{AsmError, Diagnostic, Result};
use crate::expr::{self, EvalCtx};
use crate::image::{self, MemoryImage, StoreEntry, StorePlan};
use crate::isa::{self, EncodeRequest};
use crate::listing::Listing;
use crate::macros::{self, MacroTable};
use crate::scan;
use crate::source::LineSource;
use crate::symbols::{RefKind, SymbolTable};
use crate::types::{limits, AddrMode, AsmOptions, AsmSummary, Cpu, Value};

/// Where the root source comes from.
enum RootSource {
    File(PathBuf),
    Text { name: String, text: String },
}

/// Everything a finished assembly produces.
#[derive(Debug)]
pub struct AsmOutput {
    /// Counters and generated-range summary.
    pub summary: AsmSummary,
    /// The listing text, cross-reference included.
    pub listing: String,
    /// Preprocessed source, when requested.
    pub preprocessed: Option<String>,
    /// The final memory image.
    pub image: MemoryImage,
    /// Recoverable diagnostics from the emission pass.
    pub diagnostics: Vec<Diagnostic>,
    /// Symbols still undefined after assembly.
    pub undefined: Vec<String>,
}

/// Directive names, accepted with or without a leading `.` or `!`.
const DIRECTIVES: &[&str] = &[
    "BYTE", "BYT", "PET", "DISP", "SCREEN", "WORD", "WOR", "BIGW", "HEX4", "DEC4", "QUAD",
    "REAL", "REAL4", "BITS", "LITS", "FILL", "BSS", "ORG", "LOAD", "STORE", "INCLUDE", "SRC",
    "END", "CPU", "BASE", "CASE", "SIZE", "SKI", "PAG", "NAM", "SUBTTL", "ADDR",
];

/// The assembler.
pub struct Assembler {
    opts: AsmOptions,
    root: RootSource,
    base_dir: PathBuf,

    symbols: SymbolTable,
    macros: MacroTable,
    image: MemoryImage,
    store: StorePlan,
    cond: CondStack,
    listing: Listing,
    preprocessed: String,
    diagnostics: Vec<Diagnostic>,

    pc: Value,
    bss: i64,
    bp: u8,
    cpu: Cpu,
    octal: bool,
    branch_opt: bool,
    case_insensitive: bool,
    scope: String,
    scope_start: Value,
    load_flag: bool,

    pass: u32,
    emit: bool,
    changes: u32,
    errors_this_pass: u32,

    line_no: u32,
    file_name: String,
    display_line: String,
    line_listed: bool,
    pending_addr: Option<i64>,

    source_lines: u32,
    gen_start: i64,
    gen_end: i64,
}

impl Assembler {
    fn new(root: RootSource, base_dir: PathBuf, opts: AsmOptions) -> Self {
        let ci = opts.case_insensitive;
        Self {
            symbols: SymbolTable::new(ci),
            macros: MacroTable::new(ci),
            image: MemoryImage::new(opts.fill_byte),
            store: StorePlan::new(),
            cond: CondStack::new(),
            listing: Listing::new(opts.line_numbers),
            preprocessed: String::new(),
            diagnostics: Vec::new(),
            pc: None,
            bss: 0,
            bp: 0,
            cpu: opts.cpu,
            octal: opts.octal_prefix,
            branch_opt: opts.branch_opt,
            case_insensitive: ci,
            scope: String::new(),
            scope_start: None,
            load_flag: false,
            pass: 0,
            emit: false,
            changes: 0,
            errors_this_pass: 0,
            line_no: 0,
            file_name: String::new(),
            display_line: String::new(),
            line_listed: false,
            pending_addr: None,
            source_lines: 0,
            gen_start: 0x10000,
            gen_end: 0,
            root,
            base_dir,
            opts,
        }
    }

    /// Assemble a source file on disk. Included files and `STORE`
    /// outputs resolve relative to its directory.
    pub fn from_file<P: AsRef<Path>>(path: P, opts: AsmOptions) -> Self {
        let path = path.as_ref().to_path_buf();
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(RootSource::File(path), base, opts)
    }

    /// Assemble in-memory text.
    pub fn from_text(name: &str, text: &str, opts: AsmOptions) -> Self {
        Self::new(
            RootSource::Text {
                name: name.to_string(),
                text: text.to_string(),
            },
            PathBuf::from("."),
            opts,
        )
    }

    /// Run all passes and produce the output.
    pub fn run(mut self) -> Result<AsmOutput> {
        self.define_cli_symbols()?;

        let mut pass = 1;
        loop {
            self.begin_pass(pass, false);
            self.run_pass()?;
            debug!(pass, changes = self.changes, "resolution pass done");
            if self.changes == 0 {
                break;
            }
            if pass >= limits::MAX_PASSES {
                return Err(AsmError::NoConvergence { passes: pass });
            }
            pass += 1;
        }

        self.begin_pass(pass + 1, true);
        self.run_pass()?;
        info!(
            passes = pass,
            symbols = self.symbols.len(),
            macros = self.macros.len(),
            "assembly finished"
        );

        self.symbols.pair_indirect();
        let mut listing = std::mem::replace(&mut self.listing, Listing::new(false));
        listing.cross_reference(&self.symbols);
        let stored_files = image::write_binaries(&self.image, &self.store, &self.base_dir)?;
        let undefined: Vec<String> = self
            .symbols
            .undefined()
            .iter()
            .map(|s| s.name.clone())
            .collect();

        let summary = AsmSummary {
            source_lines: self.source_lines,
            symbols: self.symbols.len(),
            macros: self.macros.len(),
            passes: pass,
            errors: self.diagnostics.len() as u32,
            gen_start: (self.gen_start <= 0xFFFF).then_some(self.gen_start as u16),
            gen_end: (self.gen_end > 0).then_some(self.gen_end as u32),
            stored_files,
        };

        Ok(AsmOutput {
            summary,
            listing: listing.finish(),
            preprocessed: self.opts.preprocess.then_some(self.preprocessed),
            image: self.image,
            diagnostics: self.diagnostics,
            undefined,
        })
    }

    /// Pre-define locked symbols from the command line.
    fn define_cli_symbols(&mut self) -> Result<()> {
        for (name, text) in self.opts.defines.clone() {
            let (value, _) = self.eval_expr(&text, AddrMode::Abso)?;
            let value = value.ok_or_else(|| AsmError::BadDirective {
                directive: "-D",
                message: format!("undefined expression for {name}"),
            })?;
            let idx = self.symbols.intern(&name)?;
            let sym = self.symbols.get_mut(idx);
            sym.address = Some(value);
            sym.locked = true;
            debug!(name = %name, value, "locked symbol");
        }
        Ok(())
    }

    fn begin_pass(&mut self, pass: u32, emit: bool) {
        self.pass = pass;
        self.emit = emit;
        self.changes = 0;
        self.errors_this_pass = 0;
        self.pc = None;
        self.bss = 0;
        self.bp = 0;
        self.cpu = self.opts.cpu;
        self.octal = self.opts.octal_prefix;
        self.branch_opt = self.opts.branch_opt;
        self.case_insensitive = self.opts.case_insensitive;
        self.symbols.set_case_insensitive(self.case_insensitive);
        self.macros.set_case_insensitive(self.case_insensitive);
        self.scope.clear();
        self.scope_start = None;
        self.load_flag = false;
        self.cond = CondStack::new();
        self.line_no = 0;
        debug!(pass, emit, "pass started");
    }

    fn open_source(&self) -> Result<LineSource> {
        match &self.root {
            RootSource::File(path) => LineSource::from_file(path),
            RootSource::Text { name, text } => Ok(LineSource::from_text(name, text)),
        }
    }

    fn run_pass(&mut self) -> Result<()> {
        let mut source = self.open_source()?;
        while let Some(line) = source.next_line()? {
            self.line_no = source.line_no();
            self.file_name = source.file_name().to_string();
            self.display_line = line.text.clone();
            self.line_listed = false;
            self.pending_addr = None;
            if self.emit {
                if !line.from_macro {
                    self.source_lines += 1;
                }
                if self.opts.preprocess {
                    self.preprocessed.push_str(&line.text);
                    self.preprocessed.push('\n');
                }
            }
            match self.parse_line(&mut source, &line.text) {
                Ok(()) => {}
                Err(e) if Self::is_fatal(&e) => return Err(e),
                Err(e) => self.report(e)?,
            }
            if self.emit && !self.line_listed {
                self.list_line(self.pending_addr.or(self.pc), &[]);
            }
        }
        if self.cond.depth() > 0 {
            return Err(AsmError::MissingEndif {
                count: self.cond.depth(),
            });
        }
        Ok(())
    }

    /// Errors that make further parsing pointless.
    fn is_fatal(e: &AsmError) -> bool {
        matches!(
            e,
            AsmError::Io(_)
                | AsmError::MissingDelimiter { .. }
                | AsmError::DuplicateSymbol { .. }
                | AsmError::PhaseError { .. }
                | AsmError::TooMany { .. }
                | AsmError::MacroArity { .. }
                | AsmError::TooManyErrors { .. }
                | AsmError::NoConvergence { .. }
                | AsmError::MissingEndif { .. }
                | AsmError::EndifWithoutIf
                | AsmError::UserError { .. }
        )
    }

    /// Record a recoverable diagnostic; stop the pass at the ceiling.
    fn report(&mut self, error: AsmError) -> Result<()> {
        tracing::error!(file = %self.file_name, line = self.line_no, %error, "error");
        self.errors_this_pass += 1;
        if self.emit {
            self.diagnostics.push(Diagnostic {
                file: self.file_name.clone(),
                line: self.line_no,
                text: self.display_line.clone(),
                column: None,
                error,
            });
        }
        if self.errors_this_pass >= limits::MAX_ERRORS {
            return Err(AsmError::TooManyErrors {
                max: limits::MAX_ERRORS,
            });
        }
        Ok(())
    }

    // ----- per-line parsing ------------------------------------------------

    fn parse_line(&mut self, source: &mut LineSource, raw: &str) -> Result<()> {
        let stripped = if self.opts.strip_disassembly {
            scan::strip_disassembly_prefix(raw)
        } else {
            raw
        };
        let trimmed = scan::skip_space(stripped);

        if self.check_conditional(trimmed)? {
            return Ok(());
        }
        if self.cond.skipping() {
            if self.emit {
                let disp = self.display_line.clone();
                self.listing.tagged(self.line_no, "SKIP", &disp);
                self.line_listed = true;
            }
            return Ok(());
        }
        if let Some(message) = error_directive(trimmed) {
            return Err(AsmError::UserError {
                message: message.to_string(),
            });
        }

        let (code, _comment) = scan::split_comment(stripped);
        let code = scan::skip_space(code);
        if code.is_empty() {
            return Ok(());
        }
        self.statement(source, code)
    }

    fn statement(&mut self, source: &mut LineSource, code: &str) -> Result<()> {
        let s = scan::skip_space(code);
        let Some(first) = s.chars().next() else {
            return Ok(());
        };

        if first == '*' {
            return self.set_pc(&s[1..]);
        }
        if first == '&' {
            return self.set_bss(&s[1..]);
        }
        if first == '.' || first == '!' {
            let (token, rest) = scan::take_symbol(&s[1..]);
            if self.is_directive(token) {
                return self.directive(source, token, rest);
            }
            if first == '.' && !token.is_empty() {
                // Not a pseudo op, so a module-local label.
                return self.label_statement(source, &s[..1 + token.len()], rest);
            }
            return Err(AsmError::UnknownMnemonic {
                text: s.split_whitespace().next().unwrap_or(s).to_string(),
            });
        }
        if let Some((label, rest)) = scan::take_numeric_label(s) {
            return self.label_statement(source, label, rest);
        }
        if scan::is_sym_start(first) {
            let (token, rest) = scan::take_symbol(s);
            if token.eq_ignore_ascii_case("MACRO") {
                return self.record_macro(source, rest);
            }
            if token.eq_ignore_ascii_case("ENDMAC") {
                return Ok(());
            }
            if isa::is_instruction(token, self.cpu) {
                return self.instruction(token, rest);
            }
            if self.is_directive(token) {
                return self.directive(source, token, rest);
            }
            if self.macros.index_of(token).is_some() {
                return self.call_macro(source, token, rest);
            }
            return self.label_statement(source, token, rest);
        }
        Err(AsmError::MalformedOperand {
            message: format!("unexpected {first:?} at start of statement"),
        })
    }

    fn is_directive(&self, token: &str) -> bool {
        DIRECTIVES.iter().any(|d| d.eq_ignore_ascii_case(token))
    }

    // ----- conditional assembly --------------------------------------------

    fn check_conditional(&mut self, trimmed: &str) -> Result<bool> {
        let t = match trimmed.strip_prefix('#') {
            Some(rest) => scan::skip_space(rest),
            None => trimmed,
        };
        if let Some(rest) = scan::match_keyword(t, "ifdef") {
            let (name, _) = scan::take_symbol(scan::skip_space(rest));
            let qualified = self.qualify(name);
            let defined = self
                .symbols
                .index_of(&qualified)
                .is_some_and(|i| self.symbols.get(i).address.is_some());
            self.cond.push(defined)?;
            self.list_cond(defined);
            return Ok(true);
        }
        if let Some(rest) = scan::match_keyword(t, "if") {
            let (value, _) = self.eval_expr(scan::split_comment(rest).0, AddrMode::Abso)?;
            let taken = matches!(value, Some(v) if v != 0);
            self.cond.push(taken)?;
            self.list_cond(taken);
            return Ok(true);
        }
        if scan::match_keyword(t, "else").is_some() {
            self.cond.flip()?;
            return Ok(true);
        }
        if scan::match_keyword(t, "endif").is_some() {
            self.cond.pop()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn list_cond(&mut self, taken: bool) {
        if self.emit {
            let disp = self.display_line.clone();
            self.listing
                .tagged(self.line_no, if taken { "TRUE" } else { "FALSE" }, &disp);
            self.line_listed = true;
        }
    }

    // ----- labels ----------------------------------------------------------

    /// Scope-qualify a module-local name.
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

    fn label_statement(
        &mut self,
        source: &mut LineSource,
        name: &str,
        rest: &str,
    ) -> Result<()> {
        let rest = rest.strip_prefix(':').unwrap_or(rest);
        let rest = scan::skip_space(rest);

        if let Some(after) = rest.strip_prefix('=') {
            let (value, tail) = self.eval_expr(after, AddrMode::Abso)?;
            let tail = scan::skip_space(tail);
            if !tail.is_empty() {
                return Err(AsmError::MalformedOperand {
                    message: format!("unexpected trailing text {tail:?}"),
                });
            }
            self.define_value(name, value, false)?;
            self.pending_addr = value;
            return Ok(());
        }

        let dotless = rest.strip_prefix(['.', '!']).unwrap_or("");
        if let Some(after) = scan::match_keyword(dotless, "BSS") {
            let (n, _) = self.eval_expr(after, AddrMode::Abso)?;
            return self.define_bss_label(name, n);
        }

        self.define_position(name)?;
        if !rest.is_empty() {
            return self.statement(source, rest);
        }
        Ok(())
    }

    fn define_value(&mut self, name: &str, value: Value, from_cli: bool) -> Result<()> {
        let qualified = self.qualify(name);
        let idx = self.symbols.intern(&qualified)?;
        self.symbols
            .record_definition(idx, self.line_no, RefKind::DefValue);
        let pass = self.pass;
        let emit = self.emit;
        let sym = self.symbols.get_mut(idx);
        if from_cli {
            sym.address = value;
            sym.locked = true;
            return Ok(());
        }
        if sym.locked {
            return Ok(());
        }
        match (sym.address, value) {
            (Some(old), Some(new)) if old != new => {
                if emit || sym.last_def_pass == pass {
                    return Err(AsmError::DuplicateSymbol {
                        name: qualified,
                        first: old as u32,
                        second: new as u32,
                    });
                }
                sym.address = value;
                sym.last_def_pass = pass;
                self.changes += 1;
            }
            (None, Some(_)) => {
                sym.address = value;
                sym.last_def_pass = pass;
                self.changes += 1;
            }
            _ => {
                sym.last_def_pass = pass;
            }
        }
        Ok(())
    }

    fn define_bss_label(&mut self, name: &str, size: Value) -> Result<()> {
        let qualified = self.qualify(name);
        let idx = self.symbols.intern(&qualified)?;
        self.symbols
            .record_definition(idx, self.line_no, RefKind::DefBss);
        let pass = self.pass;
        let emit = self.emit;
        let bss = self.bss;
        let sym = self.symbols.get_mut(idx);
        if !sym.locked {
            match sym.address {
                Some(old) if old != bss => {
                    if emit || sym.last_def_pass == pass {
                        return Err(AsmError::DuplicateSymbol {
                            name: qualified,
                            first: old as u32,
                            second: bss as u32,
                        });
                    }
                    sym.address = Some(bss);
                    self.changes += 1;
                }
                None => {
                    sym.address = Some(bss);
                    self.changes += 1;
                }
                _ => {}
            }
            sym.last_def_pass = pass;
            if let Some(n) = size {
                sym.bytes = n;
            }
        }
        self.pending_addr = Some(bss);
        match size {
            Some(n) => self.bss += n,
            None if emit => return Err(AsmError::UndefinedSymbol),
            None => {}
        }
        Ok(())
    }

    fn define_position(&mut self, name: &str) -> Result<()> {
        let qualified = self.qualify(name);
        let idx = self.symbols.intern(&qualified)?;
        self.symbols
            .record_definition(idx, self.line_no, RefKind::DefPos);
        let pass = self.pass;
        let emit = self.emit;
        let pc = self.pc;
        let sym = self.symbols.get_mut(idx);
        if !sym.locked {
            match (sym.address, pc) {
                (Some(old), Some(new)) if old != new => {
                    if emit {
                        return Err(AsmError::PhaseError {
                            name: qualified,
                            recorded: old as u32,
                            computed: new as u32,
                        });
                    }
                    if sym.last_def_pass == pass {
                        return Err(AsmError::DuplicateSymbol {
                            name: qualified,
                            first: old as u32,
                            second: new as u32,
                        });
                    }
                    sym.address = pc;
                    self.changes += 1;
                }
                (None, Some(_)) => {
                    sym.address = pc;
                    self.changes += 1;
                }
                _ => {}
            }
            sym.last_def_pass = pass;
        }
        self.pending_addr = self.symbols.get(idx).address;

        // A top-level label opens a module scope in compatibility mode.
        if self.opts.compat && !name.starts_with(['.', '_']) && !name.ends_with('$') {
            self.scope = name.to_string();
            self.scope_start = self.pc;
        }
        Ok(())
    }

    // ----- expression plumbing ---------------------------------------------

    fn eval_expr<'t>(&mut self, text: &'t str, mode: AddrMode) -> Result<(Value, &'t str)> {
        let record = if self.emit {
            Some((self.line_no, mode))
        } else {
            None
        };
        let mut ctx = EvalCtx {
            symbols: &mut self.symbols,
            pc: self.pc,
            scope: &self.scope,
            octal: self.octal,
            record,
        };
        expr::eval(&mut ctx, text)
    }

    fn eval_expr_complete(&mut self, text: &str, mode: AddrMode) -> Result<Value> {
        let (v, rest) = self.eval_expr(text, mode)?;
        let rest = scan::skip_space(rest);
        if rest.is_empty() {
            Ok(v)
        } else {
            Err(AsmError::MalformedOperand {
                message: format!("unexpected trailing text {rest:?}"),
            })
        }
    }

    // ----- emission --------------------------------------------------------

    fn list_line(&mut self, addr: Option<i64>, bytes: &[u8]) {
        if !self.emit || self.line_listed {
            return;
        }
        let disp = self.display_line.clone();
        self.listing
            .line(self.line_no, addr.map(|a| a as u32), bytes, &disp);
        self.line_listed = true;
    }

    /// Write bytes at the program counter and advance it.
    fn emit_data(&mut self, bytes: &[u8]) -> Result<()> {
        let pc = self.pc.ok_or(AsmError::PcUndefined)?;
        let len = bytes.len() as i64;
        if pc + len > 0x10000 {
            if self.emit {
                return Err(AsmError::PcOverflow);
            }
            return Ok(());
        }
        self.image.set_all(pc as usize, bytes);
        if self.emit {
            self.gen_start = self.gen_start.min(pc);
            self.gen_end = self.gen_end.max(pc + len);
            self.list_line(Some(pc), bytes);
        }
        self.pc = Some(pc + len);
        Ok(())
    }

    fn instruction(&mut self, mnemonic: &str, rest: &str) -> Result<()> {
        let pc = self.pc.ok_or(AsmError::PcUndefined)?;
        let operand = scan::skip_space(rest);
        let prev_opcode = Some(self.image.get(pc as usize));
        let encoded = {
            let req = EncodeRequest {
                mnemonic,
                operand,
                pc,
                bp: self.bp,
                cpu: self.cpu,
                branch_opt: self.branch_opt,
                emit_pass: self.emit,
                prev_opcode,
            };
            let record = if self.emit {
                Some((self.line_no, AddrMode::Abso))
            } else {
                None
            };
            let mut ctx = EvalCtx {
                symbols: &mut self.symbols,
                pc: Some(pc),
                scope: &self.scope,
                octal: self.octal,
                record,
            };
            isa::encode(&req, &mut ctx)?
        };
        self.emit_data(&encoded.bytes)
    }

    // ----- macros ----------------------------------------------------------

    fn record_macro(&mut self, source: &mut LineSource, rest: &str) -> Result<()> {
        let (name, after) = scan::take_symbol(scan::skip_space(rest));
        if name.is_empty() {
            return Err(AsmError::BadDirective {
                directive: "MACRO",
                message: "missing macro name".into(),
            });
        }
        let after = scan::skip_space(after);
        let params = match after.strip_prefix('(') {
            Some(list) => macros::parse_params(list)?.0,
            None => Vec::new(),
        };

        let mut body = Vec::new();
        loop {
            let Some(line) = source.next_file_line()? else {
                return Err(AsmError::BadDirective {
                    directive: "MACRO",
                    message: format!("missing ENDMAC for [{name}]"),
                });
            };
            if self.emit {
                self.preprocess_line(&line.text);
                self.listing.line(source.line_no(), None, &[], &line.text);
            }
            if scan::contains_ignore_case(&line.text, "ENDMAC") {
                break;
            }
            body.push(macros::encode_body_line(&line.text, &params));
        }
        let recorded = self.macros.record(name, params.len(), body)?;
        debug!(name, params = params.len(), recorded, "macro");
        Ok(())
    }

    fn preprocess_line(&mut self, text: &str) {
        if self.opts.preprocess {
            self.preprocessed.push_str(text);
            self.preprocessed.push('\n');
        }
    }

    fn call_macro(&mut self, source: &mut LineSource, name: &str, rest: &str) -> Result<()> {
        let index = self.macros.index_of(name).expect("checked by caller");
        let rest = scan::skip_space(rest);
        let args = match rest.strip_prefix('(') {
            Some(list) => macros::parse_call_args(list)?.0,
            None => Vec::new(),
        };
        let mac = self.macros.get(index);
        if args.len() != mac.params {
            return Err(AsmError::MacroArity {
                name: mac.name.clone(),
                got: args.len(),
                expected: mac.params,
            });
        }
        debug!(name = %mac.name, args = args.len(), "macro call");
        source.start_macro(mac.body.clone(), args);
        Ok(())
    }

    // ----- directives ------------------------------------------------------

    fn set_pc(&mut self, rest: &str) -> Result<()> {
        let rest = scan::skip_space(rest);
        let rest = rest.strip_prefix('=').ok_or(AsmError::MissingDelimiter {
            delimiter: '=',
            context: "in set pc * instruction".into(),
        })?;
        let value = self.eval_expr_complete(rest, AddrMode::Abso)?;
        self.apply_pc(value)
    }

    fn apply_pc(&mut self, value: Value) -> Result<()> {
        if let Some(v) = value {
            if !(0..=0xFFFF).contains(&v) {
                return Err(AsmError::OperandRange {
                    mode: "program counter",
                    value: v,
                });
            }
        }
        self.pc = value;
        self.pending_addr = value;
        Ok(())
    }

    fn set_bss(&mut self, rest: &str) -> Result<()> {
        let rest = scan::skip_space(rest);
        let rest = rest.strip_prefix('=').ok_or(AsmError::MissingDelimiter {
            delimiter: '=',
            context: "in set bss & instruction".into(),
        })?;
        let value = self.eval_expr_complete(rest, AddrMode::Abso)?;
        match value {
            Some(v) => self.bss = v,
            None if self.emit => return Err(AsmError::UndefinedSymbol),
            None => {}
        }
        self.pending_addr = value;
        Ok(())
    }

    fn directive(&mut self, source: &mut LineSource, name: &str, rest: &str) -> Result<()> {
        let upper = name.to_ascii_uppercase();
        let rest = scan::skip_space(rest);
        match upper.as_str() {
            "BYTE" | "BYT" => self.data_bytes(rest, TextMode::Ascii),
            "PET" => self.data_bytes(rest, TextMode::Petscii),
            "DISP" | "SCREEN" => self.data_bytes(rest, TextMode::Screen),
            "WORD" | "WOR" => self.data_words(rest, directives::word_le),
            "BIGW" => self.data_words(rest, directives::word_be),
            "HEX4" => self.data_digits(rest, directives::hex4),
            "DEC4" => self.data_digits(rest, directives::dec4),
            "QUAD" => self.data_quads(rest),
            "REAL" => self.data_real(rest, 4),
            "REAL4" => self.data_real(rest, 3),
            "BITS" => self.data_bits(rest, true),
            "LITS" => self.data_bits(rest, false),
            "FILL" => self.fill(rest),
            "BSS" => self.plain_bss(rest),
            "ORG" => {
                let rest = rest.strip_prefix('=').map(scan::skip_space).unwrap_or(rest);
                let value = self.eval_expr_complete(rest, AddrMode::Abso)?;
                self.apply_pc(value)
            }
            "LOAD" => {
                self.load_flag = true;
                Ok(())
            }
            "STORE" => self.store_directive(rest),
            "INCLUDE" | "SRC" => self.include(source, rest),
            "END" => {
                source.end_current_file();
                Ok(())
            }
            "CPU" => self.cpu_directive(rest),
            "BASE" => self.base_directive(rest),
            "CASE" => self.case_directive(rest),
            "SIZE" => {
                self.size_annotation();
                Ok(())
            }
            // Listing hints without meaning here.
            "SKI" | "PAG" | "NAM" | "SUBTTL" | "ADDR" => Ok(()),
            _ => Err(AsmError::UnknownMnemonic {
                text: name.to_string(),
            }),
        }
    }

    fn data_bytes(&mut self, rest: &str, mode: TextMode) -> Result<()> {
        let emit = self.emit;
        let bytes = {
            let record = emit.then_some((self.line_no, AddrMode::Abso));
            let mut ctx = EvalCtx {
                symbols: &mut self.symbols,
                pc: self.pc,
                scope: &self.scope,
                octal: self.octal,
                record,
            };
            directives::parse_byte_items(&mut ctx, rest, mode, emit)?
        };
        // The label in front of a data line owns its length, for the `?`
        // operator.
        if let Some(pc) = self.pc {
            if let Some(idx) = self.symbols.index_at_address(pc) {
                self.symbols.get_mut(idx).bytes = bytes.len() as i64;
            }
        }
        self.emit_data(&bytes)
    }

    fn data_words(&mut self, rest: &str, layout: fn(i64) -> [u8; 2]) -> Result<()> {
        let values = self.expr_list(rest)?;
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for v in values {
            bytes.extend(layout(self.required(v)?));
        }
        self.emit_data(&bytes)
    }

    fn data_quads(&mut self, rest: &str) -> Result<()> {
        let values = self.expr_list(rest)?;
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend(directives::quad_le(self.required(v)?));
        }
        self.emit_data(&bytes)
    }

    fn data_digits(&mut self, rest: &str, layout: fn(i64) -> [u8; 4]) -> Result<()> {
        let values = self.expr_list(rest)?;
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend(layout(self.required(v)?));
        }
        self.emit_data(&bytes)
    }

    fn data_real(&mut self, rest: &str, mantissa_len: usize) -> Result<()> {
        let bytes = directives::encode_real(scan::split_comment(rest).0, mantissa_len)?;
        self.emit_data(&bytes)
    }

    fn data_bits(&mut self, rest: &str, msb_first: bool) -> Result<()> {
        let bytes = directives::parse_bits(rest, msb_first)?;
        self.emit_data(&bytes)
    }

    fn expr_list(&mut self, rest: &str) -> Result<Vec<Value>> {
        let record = self.emit.then_some((self.line_no, AddrMode::Abso));
        let mut ctx = EvalCtx {
            symbols: &mut self.symbols,
            pc: self.pc,
            scope: &self.scope,
            octal: self.octal,
            record,
        };
        directives::parse_expr_list(&mut ctx, rest)
    }

    /// Undefined values pass through as 0 during resolution and error on
    /// the emission pass.
    fn required(&self, v: Value) -> Result<i64> {
        match v {
            Some(x) => Ok(x),
            None if self.emit => Err(AsmError::UndefinedSymbol),
            None => Ok(0),
        }
    }

    fn fill(&mut self, rest: &str) -> Result<()> {
        let (count, after) = self.eval_expr(rest, AddrMode::Abso)?;
        let after = scan::skip_space(after);
        let after = after.strip_prefix('(').ok_or(AsmError::MissingDelimiter {
            delimiter: '(',
            context: "before FILL value".into(),
        })?;
        let (value, tail) = self.eval_expr(after, AddrMode::Abso)?;
        let tail = scan::skip_space(tail);
        if !tail.starts_with(')') {
            return Err(AsmError::MissingDelimiter {
                delimiter: ')',
                context: "after FILL value".into(),
            });
        }
        let count = self.required(count)?;
        if self.emit && !(0..=32767).contains(&count) {
            return Err(AsmError::BadDirective {
                directive: "FILL",
                message: format!("illegal multiplier {count}"),
            });
        }
        let byte = (self.required(value)? & 0xFF) as u8;
        let bytes = vec![byte; count.clamp(0, 32767) as usize];
        self.emit_data(&bytes)
    }

    fn plain_bss(&mut self, rest: &str) -> Result<()> {
        let size = self.eval_expr_complete(rest, AddrMode::Abso)?;
        let size = self.required(size)?;
        if self.emit && !(1..=32767).contains(&size) {
            return Err(AsmError::BadDirective {
                directive: "BSS",
                message: format!("illegal size {size}"),
            });
        }
        self.pending_addr = Some(self.bss);
        self.bss += size.max(0);
        Ok(())
    }

    fn store_directive(&mut self, rest: &str) -> Result<()> {
        let (start, after) = self.eval_expr(rest, AddrMode::Abso)?;
        let after = scan::skip_space(after);
        let after = after.strip_prefix(',').ok_or(AsmError::MissingDelimiter {
            delimiter: ',',
            context: "after STORE start address".into(),
        })?;
        let (length, after) = self.eval_expr(after, AddrMode::Abso)?;
        let after = scan::skip_space(after);
        let after = after.strip_prefix(',').ok_or(AsmError::MissingDelimiter {
            delimiter: ',',
            context: "after STORE length".into(),
        })?;
        let (filename, _) = quoted_string(after)?;

        if !self.emit {
            return Ok(());
        }
        let start = self.required(start)?;
        let length = self.required(length)?;
        if !(0..=0xFFFF).contains(&start) {
            return Err(AsmError::BadDirective {
                directive: "STORE",
                message: format!("illegal start address {start}"),
            });
        }
        if !(0..=0x10000).contains(&length) {
            return Err(AsmError::BadDirective {
                directive: "STORE",
                message: format!("illegal length {length}"),
            });
        }
        self.store.push(StoreEntry {
            start: start as u16,
            length: length as u32,
            filename,
            load_address: self.load_flag,
        })?;
        self.load_flag = false;
        Ok(())
    }

    fn include(&mut self, source: &mut LineSource, rest: &str) -> Result<()> {
        let (filename, _) = quoted_string(rest)?;
        source.push_include(&filename)
    }

    fn cpu_directive(&mut self, rest: &str) -> Result<()> {
        let rest = rest.strip_prefix('=').map(scan::skip_space).unwrap_or(rest);
        let name = scan::split_comment(rest).0.trim();
        match Cpu::from_name(name) {
            Some(cpu) => {
                debug!(%cpu, "cpu selected");
                self.cpu = cpu;
                Ok(())
            }
            None => Err(AsmError::UnknownCpu {
                name: name.to_string(),
            }),
        }
    }

    fn base_directive(&mut self, rest: &str) -> Result<()> {
        let rest = rest.strip_prefix('=').map(scan::skip_space).unwrap_or(rest);
        let value = self.eval_expr_complete(rest, AddrMode::Abso)?;
        match value {
            Some(v) if (0..=0xFF).contains(&v) => {
                self.bp = v as u8;
                Ok(())
            }
            Some(v) => Err(AsmError::BadDirective {
                directive: "BASE",
                message: format!("base page {v} out of range"),
            }),
            None if self.emit => Err(AsmError::UndefinedSymbol),
            None => Ok(()),
        }
    }

    fn case_directive(&mut self, rest: &str) -> Result<()> {
        let flag = scan::skip_space(rest).chars().next();
        let insensitive = match flag {
            Some('+') => false,
            Some('-') => true,
            _ => {
                return Err(AsmError::BadDirective {
                    directive: "CASE",
                    message: "expected + or -".into(),
                })
            }
        };
        self.case_insensitive = insensitive;
        self.symbols.set_case_insensitive(insensitive);
        self.macros.set_case_insensitive(insensitive);
        Ok(())
    }

    fn size_annotation(&mut self) {
        if !self.emit {
            return;
        }
        let size = match (self.pc, self.scope_start) {
            (Some(pc), Some(start)) => pc - start,
            _ => 0,
        };
        let module = if self.scope.is_empty() {
            "total"
        } else {
            &self.scope
        };
        let text = format!("{}  ; {}: {} bytes", self.display_line, module, size);
        self.listing
            .line(self.line_no, self.pc.map(|p| p as u32), &[], &text);
        self.line_listed = true;
    }
}

/// Recognize `#error msg`.
fn error_directive(trimmed: &str) -> Option<&str> {
    let t = trimmed.strip_prefix('#')?;
    let rest = scan::match_keyword(scan::skip_space(t), "error")?;
    Some(rest.trim())
}

/// Parse a double-quoted string, returning its content and the rest.
fn quoted_string(text: &str) -> Result<(String, &str)> {
    let t = scan::skip_space(text);
    let body = t.strip_prefix('"').ok_or(AsmError::MissingDelimiter {
        delimiter: '"',
        context: "around file name".into(),
    })?;
    match body.find('"') {
        Some(end) => Ok((body[..end].to_string(), &body[end + 1..])),
        None => Err(AsmError::MissingDelimiter {
            delimiter: '"',
            context: "at end of file name".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assemble(src: &str) -> AsmOutput {
        Assembler::from_text("test.asm", src, AsmOptions::new())
            .run()
            .expect("assembly failed")
    }

    fn assemble_with(src: &str, opts: AsmOptions) -> AsmOutput {
        Assembler::from_text("test.asm", src, opts)
            .run()
            .expect("assembly failed")
    }

    fn bytes_at(out: &AsmOutput, addr: usize, len: usize) -> Vec<u8> {
        out.image.slice(addr, len).to_vec()
    }

    #[test]
    fn test_immediate_load() {
        let out = assemble("* = $1000\n LDA #$42\n");
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA9, 0x42]);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_base_page_shortening_and_force() {
        let out = assemble("* = $1000\n LDA $40\n LDA $0040\n LDA `$0040\n");
        assert_eq!(
            bytes_at(&out, 0x1000, 7),
            vec![0xA5, 0x40, 0xA5, 0x40, 0xAD, 0x40, 0x00]
        );
    }

    #[test]
    fn test_branch_backwards() {
        let out = assemble("* = $1000\nLOOP: BNE LOOP\n");
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xD0, 0xFE]);
    }

    #[test]
    fn test_byte_data() {
        let out = assemble("* = $1000\n.BYTE \"AB\",0,$FF\n");
        assert_eq!(bytes_at(&out, 0x1000, 4), vec![0x41, 0x42, 0x00, 0xFF]);
    }

    #[test]
    fn test_macro_expansion() {
        let src = "\
* = $1000
MACRO LDXY(W)
 LDX W
 LDY W+1
ENDMAC
V = $2000
 LDXY(V)
";
        let out = assemble(src);
        assert_eq!(
            bytes_at(&out, 0x1000, 6),
            vec![0xAE, 0x00, 0x20, 0xAC, 0x01, 0x20]
        );
        assert_eq!(out.summary.macros, 1);
    }

    #[test]
    fn test_word_layouts() {
        let out = assemble("* = $1000\n.WORD $1234, $5678\n.BIGW $1234\n");
        assert_eq!(
            bytes_at(&out, 0x1000, 6),
            vec![0x34, 0x12, 0x78, 0x56, 0x12, 0x34]
        );
    }

    #[test]
    fn test_conditional_assembly() {
        let src = "\
* = $1000
#if 0
 LDA #1
#else
 LDA #2
#endif
";
        let out = assemble(src);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA9, 0x02]);
        assert_eq!(out.image.get(0x1002), 0);
    }

    #[test]
    fn test_fill() {
        let out = assemble("* = $1000\n.FILL 3 ($EA)\n");
        assert_eq!(bytes_at(&out, 0x1000, 3), vec![0xEA, 0xEA, 0xEA]);
    }

    #[test]
    fn test_forward_reference_multi_pass() {
        let src = "\
* = $1000
 JMP TARGET
TARGET: LDA #1
";
        let out = assemble(src);
        assert_eq!(
            bytes_at(&out, 0x1000, 5),
            vec![0x4C, 0x03, 0x10, 0xA9, 0x01]
        );
        assert!(out.summary.passes >= 2);
    }

    #[test]
    fn test_forward_base_page_reference_shrinks_on_resolution() {
        // The forward reference is sized as absolute on the first pass;
        // once VALUE resolves into the base page, the next pass shrinks
        // the instruction and the loop re-runs until placement settles.
        let src = "\
* = $1000
 LDA VALUE
VALUE = $20
 NOP
";
        let out = assemble(src);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA5, 0x20]);
    }

    #[test]
    fn test_bss_allocation() {
        let src = "\
& = $033A
TXTTAB .BSS 2
VARTAB .BSS 2
* = $1000
 LDA TXTTAB
 LDA VARTAB
";
        let out = assemble(src);
        assert_eq!(bytes_at(&out, 0x1000, 6), vec![0xAD, 0x3A, 0x03, 0xAD, 0x3C, 0x03]);
    }

    #[test]
    fn test_value_assignment_and_length_operator() {
        let src = "\
* = $1000
MSG: .BYTE \"HELLO\"
 LDA #?MSG
";
        let out = assemble(src);
        assert_eq!(bytes_at(&out, 0x1005, 2), vec![0xA9, 0x05]);
    }

    #[test]
    fn test_undefined_symbol_is_reported() {
        let out = Assembler::from_text("t.asm", "* = $1000\n LDA MISSING\n", AsmOptions::new())
            .run()
            .unwrap();
        assert_eq!(out.summary.errors, 1);
        assert_eq!(out.undefined, vec!["MISSING".to_string()]);
    }

    #[test]
    fn test_duplicate_value_same_pass_is_fatal() {
        let r = Assembler::from_text("t.asm", "A = 1\nA = 2\n", AsmOptions::new()).run();
        assert!(matches!(r, Err(AsmError::DuplicateSymbol { .. })));
    }

    #[test]
    fn test_locked_symbol_survives_redefinition() {
        let mut opts = AsmOptions::new();
        opts.defines.push(("CONFIG".into(), "7".into()));
        let out = assemble_with("CONFIG = 1\n* = $1000\n LDA #CONFIG\n", opts);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA9, 0x07]);
    }

    #[test]
    fn test_cpu_gating() {
        let out = Assembler::from_text("t.asm", "* = $1000\n PHX\n", AsmOptions::new())
            .run()
            .unwrap();
        assert_eq!(out.summary.errors, 1);
        let out = assemble("* = $1000\nCPU 65C02\n PHX\n");
        assert_eq!(bytes_at(&out, 0x1000, 1), vec![0xDA]);
    }

    #[test]
    fn test_branch_optimization_converges() {
        let mut opts = AsmOptions::new();
        opts.cpu = Cpu::Gs02;
        opts.branch_opt = true;
        let mut src = String::from("* = $1000\n BNE FAR\n");
        for _ in 0..100 {
            src.push_str(" NOP\n");
        }
        src.push_str("FAR: RTS\n");
        let out = assemble_with(&src, opts);
        // Near branch stays short even with optimization enabled.
        assert_eq!(bytes_at(&out, 0x1000, 1), vec![0xD0]);
        assert_eq!(out.image.get(0x1001), 100);
    }

    #[test]
    fn test_branch_promotion_to_long() {
        let mut opts = AsmOptions::new();
        opts.cpu = Cpu::Gs02;
        opts.branch_opt = true;
        let mut src = String::from("* = $1000\n BNE FAR\n");
        for _ in 0..200 {
            src.push_str(" NOP\n");
        }
        src.push_str("FAR: RTS\n");
        let out = assemble_with(&src, opts);
        assert_eq!(out.image.get(0x1000), 0xD3);
        // Long branch: 3-byte instruction, then 200 NOPs.
        assert_eq!(out.image.get(0x1003), 0xEA);
        assert_eq!(out.image.get(0x1000 + 3 + 200), 0x60);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_compat_scope_locals() {
        let mut opts = AsmOptions::compat();
        opts.cpu = Cpu::Mos6502;
        let src = "\
* = $1000
FIRST:
_loop: JMP _loop
SECOND:
_loop: JMP _loop
";
        let out = assemble_with(src, opts);
        assert_eq!(bytes_at(&out, 0x1000, 3), vec![0x4C, 0x00, 0x10]);
        assert_eq!(bytes_at(&out, 0x1003, 3), vec![0x4C, 0x03, 0x10]);
    }

    #[test]
    fn test_case_directive() {
        let src = "\
CASE -
value = 7
* = $1000
 LDA #VALUE
";
        let out = assemble(src);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA9, 0x07]);
    }

    #[test]
    fn test_base_directive() {
        let src = "\
* = $1000
BASE $D0
 LDA $D015
";
        let mut opts = AsmOptions::new();
        opts.cpu = Cpu::Gs02;
        let out = assemble_with(src, opts);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA5, 0x15]);
    }

    #[test]
    fn test_error_directive_is_fatal() {
        let r = Assembler::from_text(
            "t.asm",
            "#if 1\n#error broken configuration\n#endif\n",
            AsmOptions::new(),
        )
        .run();
        assert!(matches!(r, Err(AsmError::UserError { .. })));
    }

    #[test]
    fn test_error_directive_skipped_when_false() {
        let out = assemble("#if 0\n#error never seen\n#endif\n* = $1000\n NOP\n");
        assert_eq!(bytes_at(&out, 0x1000, 1), vec![0xEA]);
    }

    #[test]
    fn test_missing_endif() {
        let r = Assembler::from_text("t.asm", "#if 1\n NOP\n", AsmOptions::new()).run();
        assert!(matches!(r, Err(AsmError::MissingEndif { count: 1 })));
    }

    #[test]
    fn test_pc_overflow() {
        let out = Assembler::from_text(
            "t.asm",
            "* = $FFFF\n LDA #1\n",
            AsmOptions::new(),
        )
        .run()
        .unwrap();
        assert_eq!(out.summary.errors, 1);
    }

    #[test]
    fn test_store_and_load_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("prog.asm");
        std::fs::write(
            &src_path,
            "* = $0801\n.LOAD\n LDA #$42\n RTS\n.STORE $0801,3,\"prog.prg\"\n.STORE $0801,3,\"prog.raw\"\n",
        )
        .unwrap();
        let out = Assembler::from_file(&src_path, AsmOptions::new())
            .run()
            .unwrap();
        assert_eq!(out.summary.stored_files.len(), 2);
        let prg = std::fs::read(dir.path().join("prog.prg")).unwrap();
        assert_eq!(prg, vec![0x01, 0x08, 0xA9, 0x42, 0x60]);
        // LOAD applies to the next STORE only.
        let raw = std::fs::read(dir.path().join("prog.raw")).unwrap();
        assert_eq!(raw, vec![0xA9, 0x42, 0x60]);
    }

    #[test]
    fn test_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("defs.asm"), "VALUE = $55\n").unwrap();
        let main = dir.path().join("main.asm");
        std::fs::write(&main, ".INCLUDE \"defs.asm\"\n* = $1000\n LDA #VALUE\n").unwrap();
        let out = Assembler::from_file(&main, AsmOptions::new()).run().unwrap();
        assert_eq!(out.image.slice(0x1000, 2), &[0xA9, 0x55]);
    }

    #[test]
    fn test_idempotence() {
        let src = "\
* = $1000
MACRO INCW(W)
 INC W
 BNE 1$
 INC W+1
1$:
ENDMAC
COUNT = $FB
START:
 INCW(COUNT)
 JMP START
.BYTE \"DONE\",0
";
        let mut opts = AsmOptions::compat();
        opts.cpu = Cpu::C02;
        opts.line_numbers = true;
        let a = Assembler::from_text("t.src", src, opts.clone()).run().unwrap();
        let b = Assembler::from_text("t.src", src, opts).run().unwrap();
        assert_eq!(a.listing, b.listing);
        assert_eq!(a.image.slice(0, 0x10100), b.image.slice(0, 0x10100));
    }

    #[test]
    fn test_listing_contains_cross_reference() {
        let out = assemble("* = $1000\nSTART: JMP START\n");
        assert!(out.listing.contains("START"));
        assert!(out.listing.contains("Symbols"));
    }

    #[test]
    fn test_quad_and_real() {
        let out = assemble("* = $1000\n.QUAD $01020304\n.REAL 10\n");
        assert_eq!(
            bytes_at(&out, 0x1000, 9),
            vec![0x04, 0x03, 0x02, 0x01, 0x84, 0x20, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_hex4_dec4_bits() {
        let out = assemble("* = $1000\n.HEX4 $12AB\n.DEC4 4711\n.BITS *...**.*\n");
        assert_eq!(
            bytes_at(&out, 0x1000, 9),
            vec![b'1', b'2', b'A', b'B', b'4', b'7', b'1', b'1', 0b1000_1101]
        );
    }

    #[test]
    fn test_petscii_directive() {
        let out = assemble("* = $1000\n.PET \"aZ\"\n");
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![b'A', b'Z' + 0x80]);
    }

    #[test]
    fn test_numeric_local_labels() {
        let mut opts = AsmOptions::compat();
        opts.cpu = Cpu::Mos6502;
        let src = "\
* = $1000
MOD1:
10$: JMP 10$
MOD2:
10$: JMP 10$
";
        let out = assemble_with(src, opts);
        assert_eq!(bytes_at(&out, 0x1000, 3), vec![0x4C, 0x00, 0x10]);
        assert_eq!(bytes_at(&out, 0x1003, 3), vec![0x4C, 0x03, 0x10]);
    }

    #[test]
    fn test_org_directive_and_label_colon() {
        let out = assemble(".ORG $2000\nENTRY: LDA #1\n");
        assert_eq!(bytes_at(&out, 0x2000, 2), vec![0xA9, 0x01]);
        assert_eq!(out.summary.gen_start, Some(0x2000));
        assert_eq!(out.summary.gen_end, Some(0x2002));
    }

    #[test]
    fn test_end_directive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tail.asm"),
            " LDA #1\n.END\n LDA #2\n",
        )
        .unwrap();
        let main = dir.path().join("m.asm");
        std::fs::write(&main, "* = $1000\n.INCLUDE \"tail.asm\"\n RTS\n").unwrap();
        let out = Assembler::from_file(&main, AsmOptions::new()).run().unwrap();
        assert_eq!(out.image.slice(0x1000, 3), &[0xA9, 0x01, 0x60]);
    }

    #[test]
    fn test_ignored_listing_hints() {
        let out = assemble("* = $1000\n.PAG\n.SKI 3\n.NAM demo\n NOP\n");
        assert_eq!(bytes_at(&out, 0x1000, 1), vec![0xEA]);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_q_instructions_end_to_end() {
        let mut opts = AsmOptions::new();
        opts.cpu = Cpu::Gs02;
        let out = assemble_with("* = $1000\n LDQ $1234\n ASLQ\n", opts);
        assert_eq!(
            bytes_at(&out, 0x1000, 8),
            vec![0x42, 0x42, 0xAD, 0x34, 0x12, 0x42, 0x42, 0x0A]
        );
    }

    #[test]
    fn test_disassembly_prefix_stripping() {
        let mut opts = AsmOptions::new();
        opts.strip_disassembly = true;
        let src = "* = $1000\n00010 1000 A9 01    LDA #$01\n";
        let out = assemble_with(src, opts);
        assert_eq!(bytes_at(&out, 0x1000, 2), vec![0xA9, 0x01]);
    }
}
