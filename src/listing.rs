//! Listing output and symbol cross-reference.
//!
//! Listing lines carry an optional 5-digit line number, the 4-hex-digit
//! address, up to five emitted bytes and the literal source line. The
//! cross-reference prints every unpaired symbol with its address and
//! reference lines, definitions marked `D` and the indexed-indirect
//! modes marked `x`/`y`, five references per row.

use std::fmt::Write as _;

use crate::symbols::SymbolTable;

/// Maximum emitted bytes shown on one listing line.
const BYTES_SHOWN: usize = 5;

/// In-memory listing builder.
#[derive(Debug)]
pub struct Listing {
    text: String,
    line_numbers: bool,
}

impl Listing {
    /// Create an empty listing.
    pub fn new(line_numbers: bool) -> Self {
        Self {
            text: String::new(),
            line_numbers,
        }
    }

    fn push_line_no(&mut self, line_no: u32) {
        if self.line_numbers {
            let _ = write!(self.text, "{line_no:5} ");
        }
    }

    /// One listing line: address, emitted bytes, source text.
    pub fn line(&mut self, line_no: u32, addr: Option<u32>, bytes: &[u8], source: &str) {
        self.push_line_no(line_no);
        match addr {
            Some(a) => {
                let _ = write!(self.text, "{:04X} ", a & 0xFFFF);
            }
            None => self.text.push_str("     "),
        }
        for i in 0..BYTES_SHOWN {
            match bytes.get(i) {
                Some(b) => {
                    let _ = write!(self.text, "{b:02X} ");
                }
                None => self.text.push_str("   "),
            }
        }
        self.text.push_str(source);
        self.text.push('\n');
    }

    /// A line with a tag instead of address and bytes (`SKIP`, `TRUE`,
    /// `FALSE`).
    pub fn tagged(&mut self, line_no: u32, tag: &str, source: &str) {
        self.push_line_no(line_no);
        let _ = write!(self.text, "{tag:<20}");
        self.text.push_str(source);
        self.text.push('\n');
    }

    /// Append the symbol cross-reference. Pairing must already have run
    /// on the table.
    pub fn cross_reference(&mut self, symbols: &SymbolTable) {
        let _ = write!(self.text, "\n\n{:5} Symbols\n", symbols.len());
        self.text.push_str("-------------\n");

        let mut ordered: Vec<_> = symbols.iter().filter(|s| !s.paired).collect();
        ordered.sort_by_key(|s| s.address.unwrap_or(i64::MAX));

        for sym in ordered {
            match sym.address {
                Some(a) => {
                    let _ = write!(self.text, "{:<30.30} ${:04X}", sym.name, a & 0xFFFF);
                }
                None => {
                    let _ = write!(self.text, "{:<30.30} ?????", sym.name);
                }
            }
            for (i, r) in sym.refs.iter().enumerate() {
                if i > 0 && i % 5 == 0 {
                    self.text.push_str("\n                                    ");
                }
                let _ = write!(self.text, "{:6}{}", r.line, r.kind.marker());
            }
            self.text.push('\n');
        }
    }

    /// The finished listing text.
    pub fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::RefKind;
    use crate::types::AddrMode;

    #[test]
    fn test_line_format() {
        let mut l = Listing::new(true);
        l.line(3, Some(0x1000), &[0xA9, 0x42], "   LDA #$42");
        let text = l.finish();
        let expected = format!(
            "{:5} {:04X} A9 42 {}   LDA #$42\n",
            3,
            0x1000,
            "   ".repeat(3)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_line_without_numbers() {
        let mut l = Listing::new(false);
        l.line(3, Some(0x1000), &[0xEA], "   NOP");
        let text = l.finish();
        assert!(text.starts_with("1000 EA "));
        assert!(text.ends_with("   NOP\n"));
        // Byte columns stay aligned: 5 slots of 3 characters each.
        assert_eq!(text.len(), "1000 ".len() + 15 + "   NOP\n".len());
    }

    #[test]
    fn test_five_bytes_shown() {
        let mut l = Listing::new(false);
        l.line(1, Some(0), &[1, 2, 3, 4, 5, 6, 7], "DATA");
        let text = l.finish();
        assert!(text.contains("01 02 03 04 05 DATA"));
        assert!(!text.contains("06"));
    }

    #[test]
    fn test_tagged_line() {
        let mut l = Listing::new(true);
        l.tagged(9, "SKIP", "   LDA #2");
        let text = l.finish();
        assert!(text.starts_with("    9 SKIP"));
        assert!(text.ends_with("LDA #2\n"));
    }

    #[test]
    fn test_cross_reference() {
        let mut tab = SymbolTable::new(false);
        let a = tab.intern("START").unwrap();
        tab.get_mut(a).address = Some(0x1000);
        tab.record_definition(a, 2, RefKind::DefPos);
        tab.record_use(a, 7, AddrMode::Abso);
        tab.record_use(a, 9, AddrMode::Indy);
        let b = tab.intern("NEVER").unwrap();
        tab.record_use(b, 12, AddrMode::Abso);

        let mut l = Listing::new(false);
        l.cross_reference(&tab);
        let text = l.finish();
        assert!(text.contains("START"));
        assert!(text.contains("$1000"));
        assert!(text.contains("2D"));
        assert!(text.contains("9y"));
        assert!(text.contains("NEVER"));
        assert!(text.contains("?????"));
    }
}
