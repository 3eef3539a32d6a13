//! Abelian equations (`spec.md` §4.B, component B).
//!
//! An `Equation` is a signed multiset over variable names and constant
//! names -- a product in a free Abelian group. It backs both unit-of-measure
//! types (`meter * second^-2`) and the two-valued Boolean attribute lattices
//! (sharing, totality, validity, trust, clearance), which `spec.md` §9
//! says reuse the same solver by encoding `true`/`false` as constants of
//! exponent 0/1 in a multiplicative group of order two.

use std::fmt;

use rustc_hash::FxHashMap;

/// A signed multiset of variable and constant exponents representing a
/// product in a free Abelian group. The invariant from `spec.md` §3 holds
/// throughout: no key maps to exponent zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Equation {
    vars: FxHashMap<String, i64>,
    consts: FxHashMap<String, i64>,
}

fn prune(map: &mut FxHashMap<String, i64>) {
    map.retain(|_, exp| *exp != 0);
}

impl Equation {
    /// The Abelian identity, `1`.
    pub fn identity() -> Self {
        Equation::default()
    }

    pub fn var(name: impl Into<String>) -> Self {
        let mut vars = FxHashMap::default();
        vars.insert(name.into(), 1);
        Equation { vars, consts: FxHashMap::default() }
    }

    pub fn constant(name: impl Into<String>) -> Self {
        let mut consts = FxHashMap::default();
        consts.insert(name.into(), 1);
        Equation { vars: FxHashMap::default(), consts }
    }

    pub fn is_identity(&self) -> bool {
        self.vars.is_empty() && self.consts.is_empty()
    }

    pub fn var_names(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn var_exponent(&self, name: &str) -> i64 {
        self.vars.get(name).copied().unwrap_or(0)
    }

    /// Multiply two equations (elementwise exponent addition).
    pub fn add(&self, other: &Equation) -> Equation {
        let mut vars = self.vars.clone();
        for (k, v) in &other.vars {
            *vars.entry(k.clone()).or_insert(0) += v;
        }
        let mut consts = self.consts.clone();
        for (k, v) in &other.consts {
            *consts.entry(k.clone()).or_insert(0) += v;
        }
        prune(&mut vars);
        prune(&mut consts);
        Equation { vars, consts }
    }

    /// The multiplicative inverse: negate every exponent.
    pub fn invert(&self) -> Equation {
        self.scale(-1)
    }

    /// Raise the whole equation to an integer power.
    pub fn scale(&self, k: i64) -> Equation {
        if k == 0 {
            return Equation::identity();
        }
        let mut vars: FxHashMap<String, i64> = self.vars.iter().map(|(n, e)| (n.clone(), e * k)).collect();
        let mut consts: FxHashMap<String, i64> = self.consts.iter().map(|(n, e)| (n.clone(), e * k)).collect();
        prune(&mut vars);
        prune(&mut consts);
        Equation { vars, consts }
    }

    /// `self / other`, i.e. `self.add(&other.invert())`.
    pub fn divide(&self, other: &Equation) -> Equation {
        self.add(&other.invert())
    }

    /// Pivot on the variable with the smallest absolute exponent
    /// (`spec.md` §4.C rule 5 / §4.B). Returns `(pivoted_var, solution)`
    /// where `solution` is the equation that variable must equal for the
    /// whole equation to be the identity, i.e. solving
    /// `var^k * remainder = 1` for `var`.
    ///
    /// Per `spec.md` §4.B: "removes `v`, scales remaining exponents by
    /// `1/k` (integer), negates." Returns `None` if there are no variables
    /// left to pivot on.
    pub fn pivot(&self) -> Option<(String, Equation)> {
        let (name, k) = self
            .vars
            .iter()
            .min_by_key(|(_, exp)| exp.abs())
            .map(|(n, e)| (n.clone(), *e))?;

        let mut remainder = self.clone();
        remainder.vars.remove(&name);

        let vars: FxHashMap<String, i64> =
            remainder.vars.iter().map(|(n, e)| (n.clone(), -(e / k))).collect();
        let consts: FxHashMap<String, i64> =
            remainder.consts.iter().map(|(n, e)| (n.clone(), -(e / k))).collect();
        let mut solution = Equation { vars, consts };
        prune(&mut solution.vars);
        prune(&mut solution.consts);
        Some((name, solution))
    }

    /// Substitute `replacement` for every occurrence of `var` (raised to
    /// `var`'s own exponent in `self`), then drop `var` from the result.
    pub fn substitute_var(&self, var: &str, replacement: &Equation) -> Equation {
        let exp = self.var_exponent(var);
        if exp == 0 {
            return self.clone();
        }
        let mut base = self.clone();
        base.vars.remove(var);
        base.add(&replacement.scale(exp))
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            return write!(f, "1");
        }
        let mut terms: Vec<String> = self
            .consts
            .iter()
            .map(|(n, e)| (n.clone(), *e))
            .chain(self.vars.iter().map(|(n, e)| (n.clone(), *e)))
            .map(|(n, e)| if e == 1 { n } else { format!("{n}^{e}") })
            .collect();
        terms.sort();
        write!(f, "{}", terms.join(" * "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_invert_add_is_identity() {
        let e = Equation::var("m").add(&Equation::constant("s").scale(-2));
        let combined = e.invert().add(&e);
        assert!(combined.is_identity(), "E.invert().add(E) should be identity, got {combined}");
    }

    #[test]
    fn pivot_removes_the_variable() {
        let e = Equation::var("a").add(&Equation::var("b").scale(2)).add(&Equation::constant("m"));
        let (pivoted, solution) = e.pivot().expect("expected a pivotable variable");
        assert_eq!(pivoted, "a", "smallest |exponent| variable should be chosen (a has exp 1, b has exp 2)");
        assert!(!solution.var_names().any(|n| n == "a"));
    }

    #[test]
    fn pivot_then_substitute_eliminates_variable() {
        let e = Equation::var("a").add(&Equation::constant("m"));
        let (pivoted, solution) = e.pivot().unwrap();
        let result = e.substitute_var(&pivoted, &solution);
        assert_eq!(result.var_exponent("a"), 0);
    }

    #[test]
    fn boolean_lattice_shares_the_equation_representation() {
        // `false` is encoded as the identity (exponent 0, i.e. absent);
        // `true` is a single generator of exponent 1 (`spec.md` §9). Both
        // flow through the same `Equation` unification/pivot machinery
        // units do, rather than a dedicated two-valued comparator.
        let false_val = Equation::identity();
        let true_val = Equation::constant("true");
        assert!(false_val.is_identity());
        assert!(!true_val.is_identity());
        assert_eq!(true_val.divide(&true_val), Equation::identity());
    }

    #[test]
    fn display_sorts_terms_deterministically() {
        let e = Equation::var("b").add(&Equation::var("a"));
        assert_eq!(e.to_string(), "a * b");
    }
}
