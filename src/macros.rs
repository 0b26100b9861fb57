//! Macro table, recorder and textual expander.
//!
//! A macro body is recorded with every textual occurrence of a parameter
//! name replaced by a positional placeholder `&0`…`&9`; expansion pastes
//! the call's argument texts back in. Substitution is purely textual:
//! parameter names are matched even inside quoted strings and comments,
//! and arguments are never evaluated before substitution.

use crate::error::{AsmError, Result};
use crate::scan;
use crate::types::limits;

/// A recorded macro.
#[derive(Debug, Clone)]
pub struct Macro {
    /// Macro name.
    pub name: String,
    /// Declared parameter count (0-10).
    pub params: usize,
    /// Body lines with `&<digit>` placeholders.
    pub body: Vec<String>,
}

/// Mapping from macro name to parameter count and body.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: Vec<Macro>,
    case_insensitive: bool,
}

impl MacroTable {
    /// Create an empty table.
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            macros: Vec::new(),
            case_insensitive,
        }
    }

    /// Change name folding; affects subsequent lookups only.
    pub fn set_case_insensitive(&mut self, ci: bool) {
        self.case_insensitive = ci;
    }

    /// Number of recorded macros.
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// True when no macro has been recorded.
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Look up a macro by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.macros
            .iter()
            .position(|m| scan::names_equal(&m.name, name, self.case_insensitive))
    }

    /// Shared access by index.
    pub fn get(&self, index: usize) -> &Macro {
        &self.macros[index]
    }

    /// Record a macro. Returns `false` when the name already exists; the
    /// new definition is then silently dropped (the recorder has already
    /// drained the body lines from the source).
    pub fn record(&mut self, name: &str, params: usize, body: Vec<String>) -> Result<bool> {
        if self.index_of(name).is_some() {
            return Ok(false);
        }
        if self.macros.len() >= limits::MAX_MACROS {
            return Err(AsmError::TooMany {
                what: "macros",
                limit: limits::MAX_MACROS,
            });
        }
        self.macros.push(Macro {
            name: name.to_string(),
            params,
            body,
        });
        Ok(true)
    }
}

/// Rewrite one body line, replacing parameter names with `&<digit>`.
///
/// The match is a naive, case-sensitive textual scan; a parameter name
/// appearing inside a quoted string is substituted too.
pub fn encode_body_line(line: &str, params: &[String]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    'scan: while !rest.is_empty() {
        for (i, param) in params.iter().enumerate() {
            if !param.is_empty() && rest.starts_with(param.as_str()) {
                out.push('&');
                out.push((b'0' + i as u8) as char);
                rest = &rest[param.len()..];
                continue 'scan;
            }
        }
        let c = rest.chars().next().unwrap();
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Replace `&<digit>` placeholders with the call's argument texts.
///
/// An `&` not followed by a digit of a bound argument is kept literally.
pub fn substitute(line: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'&' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            let slot = (bytes[i + 1] - b'0') as usize;
            if slot < args.len() {
                out.push_str(&args[slot]);
                i += 2;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Parse the parameter list of a `MACRO Name(a,b,…)` definition.
///
/// `text` starts after the opening parenthesis; parameter names are
/// identifiers. Returns the names and the text after the closing
/// parenthesis.
pub fn parse_params(text: &str) -> Result<(Vec<String>, &str)> {
    let mut params = Vec::new();
    let mut rest = scan::skip_space(text);
    loop {
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((params, after));
        }
        let (name, after) = scan::take_symbol(rest);
        if name.is_empty() {
            return Err(AsmError::BadDirective {
                directive: "MACRO",
                message: format!("expected parameter name, found {rest:?}"),
            });
        }
        if params.len() >= limits::MAX_MACRO_ARGS {
            return Err(AsmError::TooMany {
                what: "macro parameters",
                limit: limits::MAX_MACRO_ARGS,
            });
        }
        params.push(name.to_string());
        rest = scan::skip_space(after);
        match rest.chars().next() {
            Some(',') => rest = scan::skip_space(&rest[1..]),
            Some(')') => {}
            _ => {
                return Err(AsmError::MissingDelimiter {
                    delimiter: ')',
                    context: "in macro parameter list".into(),
                })
            }
        }
    }
}

/// Parse the argument list of a macro call.
///
/// `text` starts after the opening parenthesis. Arguments are raw token
/// sequences: balanced up to a `,` or the closing `)` at depth zero,
/// with string literals skipped over. They are substituted textually,
/// never evaluated here.
pub fn parse_call_args(text: &str) -> Result<(Vec<String>, &str)> {
    let mut args = Vec::new();
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut delim: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    loop {
        let c = match bytes.get(i) {
            Some(&c) => c,
            None => {
                return Err(AsmError::MissingDelimiter {
                    delimiter: ')',
                    context: "in macro call".into(),
                })
            }
        };
        match delim {
            Some(d) => {
                if c == d {
                    delim = None;
                }
            }
            None => match c {
                b'"' | b'\'' => delim = Some(c),
                b'(' | b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b',' | b')' if depth == 0 => {
                    let piece = text[start..i].trim();
                    if !piece.is_empty() || c == b',' || !args.is_empty() {
                        if args.len() >= limits::MAX_MACRO_ARGS {
                            return Err(AsmError::TooMany {
                                what: "macro arguments",
                                limit: limits::MAX_MACRO_ARGS,
                            });
                        }
                        args.push(piece.to_string());
                    }
                    if c == b')' {
                        return Ok((args, &text[i + 1..]));
                    }
                    start = i + 1;
                }
                b')' => depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_body_line() {
        let params = vec!["Word".to_string()];
        assert_eq!(encode_body_line("   LDX Word", &params), "   LDX &0");
        assert_eq!(encode_body_line("   LDY Word+1", &params), "   LDY &0+1");
    }

    #[test]
    fn test_encode_matches_inside_strings() {
        // Textual substitution is naive on purpose.
        let params = vec!["N".to_string()];
        assert_eq!(encode_body_line(".BYTE \"N\"", &params), ".BYTE \"&0\"");
    }

    #[test]
    fn test_substitute() {
        let args = vec!["Vector".to_string()];
        assert_eq!(substitute("   LDX &0", &args), "   LDX Vector");
        assert_eq!(substitute("   LDY &0+1", &args), "   LDY Vector+1");
        assert_eq!(substitute("A & B", &args), "A & B");
    }

    #[test]
    fn test_parse_params() {
        let (params, rest) = parse_params("a, b ,c) ; tail").unwrap();
        assert_eq!(params, vec!["a", "b", "c"]);
        assert_eq!(rest, " ; tail");
        let (none, _) = parse_params(")").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_parse_call_args() {
        let (args, rest) = parse_call_args("V, X+[2*Y], \"a,b\")").unwrap();
        assert_eq!(args, vec!["V", "X+[2*Y]", "\"a,b\""]);
        assert_eq!(rest, "");
        let (empty, _) = parse_call_args(")").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_parse_call_args_unterminated() {
        assert!(parse_call_args("V, W").is_err());
    }

    #[test]
    fn test_record_skips_duplicate() {
        let mut tab = MacroTable::new(false);
        assert!(tab.record("LDXY", 1, vec!["LDX &0".into()]).unwrap());
        assert!(!tab.record("LDXY", 1, vec!["LDY &0".into()]).unwrap());
        assert_eq!(tab.len(), 1);
        assert_eq!(tab.get(0).body, vec!["LDX &0".to_string()]);
    }
}
