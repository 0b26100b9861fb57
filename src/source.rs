//! Line source: include stack and macro expansion frame.
//!
//! Exactly one of two places yields the next source line at any moment:
//! the top of the include stack, or the active macro body. Include
//! frames carry their own line counter, restored when the frame pops;
//! macro expansion never advances the user-visible line counter. There
//! is a single macro slot: a nested macro call replaces the body being
//! replayed, so a call must be the last body line for the caller to
//! resume.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use crate::error::{AsmError, Result};
use crate::macros;
use crate::types::limits;

/// One open file on the include stack.
struct FileFrame {
    reader: Box<dyn BufRead>,
    name: String,
    dir: PathBuf,
    line: u32,
}

/// Replay state of a macro expansion.
struct MacroFrame {
    body: Vec<String>,
    args: Vec<String>,
    cursor: usize,
}

/// A line handed to the pass driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Line text with the line ending stripped.
    pub text: String,
    /// The line came from a macro body.
    pub from_macro: bool,
}

/// Stacked line source feeding one pass.
pub struct LineSource {
    files: Vec<FileFrame>,
    macro_frame: Option<MacroFrame>,
}

impl LineSource {
    /// Open the root source file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Self {
            files: vec![FileFrame {
                reader: Box::new(BufReader::new(file)),
                name: path.display().to_string(),
                dir,
                line: 0,
            }],
            macro_frame: None,
        })
    }

    /// Use in-memory text as the root source.
    pub fn from_text(name: &str, text: &str) -> Self {
        Self {
            files: vec![FileFrame {
                reader: Box::new(Cursor::new(text.to_string())),
                name: name.to_string(),
                dir: PathBuf::from("."),
                line: 0,
            }],
            macro_frame: None,
        }
    }

    /// Name of the file currently being read.
    pub fn file_name(&self) -> &str {
        self.files.last().map(|f| f.name.as_str()).unwrap_or("")
    }

    /// Line number within the current file.
    pub fn line_no(&self) -> u32 {
        self.files.last().map(|f| f.line).unwrap_or(0)
    }

    /// Current include nesting depth.
    pub fn depth(&self) -> usize {
        self.files.len()
    }

    /// True while a macro body is being replayed.
    pub fn in_macro(&self) -> bool {
        self.macro_frame.is_some()
    }

    /// Push an included file. The path is resolved relative to the
    /// directory of the including file.
    pub fn push_include(&mut self, path: &str) -> Result<()> {
        if self.files.len() >= limits::MAX_INCLUDES {
            return Err(AsmError::TooMany {
                what: "include levels",
                limit: limits::MAX_INCLUDES,
            });
        }
        let resolved = match self.files.last() {
            Some(top) => top.dir.join(path),
            None => PathBuf::from(path),
        };
        let file = File::open(&resolved)?;
        let dir = resolved
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        self.files.push(FileFrame {
            reader: Box::new(BufReader::new(file)),
            name: resolved.display().to_string(),
            dir,
            line: 0,
        });
        Ok(())
    }

    /// Terminate the current file early (`END` directive).
    pub fn end_current_file(&mut self) {
        self.files.pop();
    }

    /// Begin replaying a macro body with the given argument texts.
    /// A body already being replayed is replaced (single slot).
    pub fn start_macro(&mut self, body: Vec<String>, args: Vec<String>) {
        self.macro_frame = Some(MacroFrame {
            body,
            args,
            cursor: 0,
        });
    }

    /// Fetch the next line, from the macro frame when one is active,
    /// otherwise from the include stack. Returns `None` at end of input.
    pub fn next_line(&mut self) -> Result<Option<SourceLine>> {
        if let Some(frame) = &mut self.macro_frame {
            if frame.cursor < frame.body.len() {
                let text = macros::substitute(&frame.body[frame.cursor], &frame.args);
                frame.cursor += 1;
                return Ok(Some(SourceLine {
                    text,
                    from_macro: true,
                }));
            }
            self.macro_frame = None;
        }
        self.next_file_line()
    }

    /// Fetch the next line from the include stack only, bypassing any
    /// macro frame. The macro recorder uses this to drain body lines.
    pub fn next_file_line(&mut self) -> Result<Option<SourceLine>> {
        loop {
            let frame = match self.files.last_mut() {
                Some(f) => f,
                None => return Ok(None),
            };
            let mut buf = String::new();
            if frame.reader.read_line(&mut buf)? == 0 {
                self.files.pop();
                continue;
            }
            frame.line += 1;
            while buf.ends_with('\n') || buf.ends_with('\r') {
                buf.pop();
            }
            return Ok(Some(SourceLine {
                text: buf,
                from_macro: false,
            }));
        }
    }
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("files", &self.files.iter().map(|x| &x.name).collect::<Vec<_>>())
            .field("line", &self.line_no())
            .field("in_macro", &self.in_macro())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain(src: &mut LineSource) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = src.next_line().unwrap() {
            out.push(line.text);
        }
        out
    }

    #[test]
    fn test_text_source() {
        let mut src = LineSource::from_text("t.asm", "one\r\ntwo\nthree");
        assert_eq!(drain(&mut src), vec!["one", "two", "three"]);
        assert_eq!(src.line_no(), 0);
    }

    #[test]
    fn test_line_counter() {
        let mut src = LineSource::from_text("t.asm", "a\nb\n");
        src.next_line().unwrap();
        assert_eq!(src.line_no(), 1);
        src.next_line().unwrap();
        assert_eq!(src.line_no(), 2);
    }

    #[test]
    fn test_macro_replay_and_substitution() {
        let mut src = LineSource::from_text("t.asm", "after\n");
        src.start_macro(
            vec!["LDX &0".to_string(), "LDY &0+1".to_string()],
            vec!["Vector".to_string()],
        );
        let a = src.next_line().unwrap().unwrap();
        assert!(a.from_macro);
        assert_eq!(a.text, "LDX Vector");
        assert_eq!(src.next_line().unwrap().unwrap().text, "LDY Vector+1");
        let tail = src.next_line().unwrap().unwrap();
        assert!(!tail.from_macro);
        assert_eq!(tail.text, "after");
    }

    #[test]
    fn test_macro_does_not_advance_line_counter() {
        let mut src = LineSource::from_text("t.asm", "x\ny\n");
        src.next_line().unwrap();
        src.start_macro(vec!["NOP".to_string()], vec![]);
        src.next_line().unwrap();
        assert_eq!(src.line_no(), 1);
    }

    #[test]
    fn test_include_stack() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.asm");
        let mut f = File::create(&inner).unwrap();
        writeln!(f, "INNER1").unwrap();
        writeln!(f, "INNER2").unwrap();
        drop(f);

        let outer = dir.path().join("outer.asm");
        let mut f = File::create(&outer).unwrap();
        writeln!(f, "OUTER1").unwrap();
        writeln!(f, "OUTER2").unwrap();
        drop(f);

        let mut src = LineSource::from_file(&outer).unwrap();
        assert_eq!(src.next_line().unwrap().unwrap().text, "OUTER1");
        src.push_include("inner.asm").unwrap();
        assert_eq!(src.depth(), 2);
        assert_eq!(src.next_line().unwrap().unwrap().text, "INNER1");
        assert_eq!(src.line_no(), 1);
        assert_eq!(src.next_line().unwrap().unwrap().text, "INNER2");
        // EOF pops back to the outer file with its counter restored.
        assert_eq!(src.next_line().unwrap().unwrap().text, "OUTER2");
        assert_eq!(src.line_no(), 2);
        assert!(src.next_line().unwrap().is_none());
    }

    #[test]
    fn test_end_pops_early() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("i.asm");
        std::fs::write(&inner, "A\nB\nC\n").unwrap();
        let outer = dir.path().join("o.asm");
        std::fs::write(&outer, "TOP\nBOTTOM\n").unwrap();

        let mut src = LineSource::from_file(&outer).unwrap();
        src.next_line().unwrap();
        src.push_include("i.asm").unwrap();
        src.next_line().unwrap();
        src.end_current_file();
        assert_eq!(src.next_line().unwrap().unwrap().text, "BOTTOM");
    }

    #[test]
    fn test_missing_include() {
        let mut src = LineSource::from_text("t.asm", "x\n");
        assert!(src.push_include("no/such/file.asm").is_err());
    }
}
