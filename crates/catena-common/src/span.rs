//! Source positions.
//!
//! `Span` wraps `rowan::TextRange` so every AST node, constraint, and error
//! in the core can carry a position without the core itself knowing how to
//! render one -- that is the driver's job (`spec.md` §7).

use std::fmt;

use rowan::TextRange;

/// A byte-offset range into the original source text.
///
/// The core never inspects the text a `Span` points into; it only threads
/// spans through unmodified from the AST it is handed to the errors it
/// produces.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span(pub TextRange);

impl Span {
    /// Construct a span from a start/end byte offset pair.
    pub fn new(start: u32, end: u32) -> Self {
        Span(TextRange::new(start.into(), end.into()))
    }

    /// A zero-width span at the given offset, used for synthesized nodes
    /// (e.g. a dictionary parameter inserted during elaboration) that have
    /// no source location of their own.
    pub fn synthetic(at: u32) -> Self {
        Span::new(at, at)
    }

    pub fn start(&self) -> u32 {
        self.0.start().into()
    }

    pub fn end(&self) -> u32 {
        self.0.end().into()
    }

    /// The smallest span containing both `self` and `other`.
    pub fn cover(&self, other: &Span) -> Span {
        Span(self.0.cover(other.0))
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start(), self.end())
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start(), self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_spans_both_ranges() {
        let a = Span::new(2, 5);
        let b = Span::new(10, 14);
        let c = a.cover(&b);
        assert_eq!(c.start(), 2);
        assert_eq!(c.end(), 14);
    }

    #[test]
    fn synthetic_is_zero_width() {
        let s = Span::synthetic(7);
        assert_eq!(s.start(), 7);
        assert_eq!(s.end(), 7);
    }
}
