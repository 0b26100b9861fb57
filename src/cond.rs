//! Conditional-assembly stack.
//!
//! Nested `#if` / `#ifdef` / `#else` / `#endif` levels. Each level
//! carries a skip flag; lines are skipped while any level on the stack
//! skips, so an inner true branch stays dark inside an outer false one.

use crate::error::{AsmError, Result};
use crate::types::limits;

/// Stack of conditional-assembly levels.
#[derive(Debug, Default)]
pub struct CondStack {
    skip: Vec<bool>,
}

impl CondStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a conditional block. `taken` is the truth of the condition;
    /// the level skips when the condition is false.
    pub fn push(&mut self, taken: bool) -> Result<()> {
        if self.skip.len() >= limits::MAX_IF_LEVELS {
            return Err(AsmError::TooMany {
                what: "nested #if levels",
                limit: limits::MAX_IF_LEVELS,
            });
        }
        self.skip.push(!taken);
        Ok(())
    }

    /// Flip the current level for `#else`.
    pub fn flip(&mut self) -> Result<()> {
        match self.skip.last_mut() {
            Some(s) => {
                *s = !*s;
                Ok(())
            }
            None => Err(AsmError::BadDirective {
                directive: "#else",
                message: "without #if".into(),
            }),
        }
    }

    /// Leave the current level for `#endif`.
    pub fn pop(&mut self) -> Result<()> {
        self.skip.pop().map(|_| ()).ok_or(AsmError::EndifWithoutIf)
    }

    /// True while any level on the stack skips.
    pub fn skipping(&self) -> bool {
        self.skip.iter().any(|&s| s)
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.skip.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_else_endif() {
        let mut c = CondStack::new();
        c.push(false).unwrap();
        assert!(c.skipping());
        c.flip().unwrap();
        assert!(!c.skipping());
        c.pop().unwrap();
        assert!(!c.skipping());
        assert_eq!(c.depth(), 0);
    }

    #[test]
    fn test_nested_inner_true_stays_skipped() {
        let mut c = CondStack::new();
        c.push(false).unwrap();
        c.push(true).unwrap();
        assert!(c.skipping());
        c.pop().unwrap();
        assert!(c.skipping());
        c.pop().unwrap();
    }

    #[test]
    fn test_endif_without_if() {
        let mut c = CondStack::new();
        assert!(matches!(c.pop(), Err(AsmError::EndifWithoutIf)));
    }

    #[test]
    fn test_depth_limit() {
        let mut c = CondStack::new();
        for _ in 0..limits::MAX_IF_LEVELS {
            c.push(true).unwrap();
        }
        assert!(c.push(true).is_err());
    }
}
