//! Constraint Handling Rules and the CHR solver (`spec.md` §4.F, component F).
//!
//! No teacher analogue exists for CHR solving: `mesh-typeck` resolves
//! overloads by direct instance search (`traits.rs::TraitRegistry`). The
//! one-way "does this rule's heads match a subset of the predicate set"
//! step below is grounded on `TraitRegistry::register_impl`'s structural
//! match-via-temporary-unification, generalized from "match one impl head
//! against one predicate" to "match a multi-predicate rule head against a
//! subset of the live predicate set."

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::CoreError;
use crate::ty::{Predicate, SeqElem, Subst, Type, TyCon, TyVar};
use crate::unify::match_one_way;

/// A constraint handling rule (`spec.md` §3/§4.F).
#[derive(Clone, Debug)]
pub enum Chr {
    /// `heads -> body`: replaces the matched heads with the body.
    Simplification { name: String, heads: Vec<Predicate>, body: Vec<Predicate> },
    /// `heads => body`: adds the body without removing the heads.
    Propagation { name: String, heads: Vec<Predicate>, body: Vec<Predicate> },
}

impl Chr {
    fn heads(&self) -> &[Predicate] {
        match self {
            Chr::Simplification { heads, .. } => heads,
            Chr::Propagation { heads, .. } => heads,
        }
    }

    fn body(&self) -> &[Predicate] {
        match self {
            Chr::Simplification { body, .. } => body,
            Chr::Propagation { body, .. } => body,
        }
    }

    fn name(&self) -> &str {
        match self {
            Chr::Simplification { name, .. } => name,
            Chr::Propagation { name, .. } => name,
        }
    }

    fn is_propagation(&self) -> bool {
        matches!(self, Chr::Propagation { .. })
    }
}

/// Try to match `rule`'s heads against some subset of `predicates`, in
/// declared head order, returning the matching substitution and the
/// matched predicates' indices if every head matches a distinct predicate.
///
/// Head order is normalized by always scanning `rule.heads()` in the order
/// they were declared (`spec.md` §4.F: "normalize head order") and by
/// trying predicates in the order they appear in the live set, so two
/// structurally-equal predicate sets always attempt matches in the same
/// order -- required for the determinism property in `spec.md` §8.
fn match_rule(rule: &Chr, predicates: &[Predicate]) -> Option<(Subst, Vec<usize>)> {
    // A rule with no heads would otherwise vacuously "match" an empty
    // subset of any predicate set and fire forever without changing
    // anything -- a rule needs at least one head to ever legitimately fire.
    if rule.heads().is_empty() {
        return None;
    }
    fn go(
        heads: &[Predicate],
        predicates: &[Predicate],
        used: &mut FxHashSet<usize>,
        subst: &Subst,
        matched: &mut Vec<usize>,
    ) -> Option<Subst> {
        let Some((head, rest)) = heads.split_first() else {
            return Some(subst.clone());
        };
        for (i, pred) in predicates.iter().enumerate() {
            if used.contains(&i) || pred.name != head.name {
                continue;
            }
            let head_arg = head.arg.substitute(subst).ok()?;
            if let Some(delta) = match_one_way(&head_arg, &pred.arg) {
                let combined = delta.compose(subst);
                used.insert(i);
                matched.push(i);
                if let Some(result) = go(rest, predicates, used, &combined, matched) {
                    return Some(result);
                }
                matched.pop();
                used.remove(&i);
            }
        }
        None
    }

    let mut used = FxHashSet::default();
    let mut matched = Vec::new();
    let subst = go(rule.heads(), predicates, &mut used, &Subst::empty(), &mut matched)?;
    matched.sort_unstable();
    Some((subst, matched))
}

/// The result of running the CHR solver to a fixpoint (`spec.md` §4.F/§8
/// property 10).
pub struct SolveResult {
    pub predicates: Vec<Predicate>,
    pub subst: Subst,
}

/// A memo of `(rule name, matched predicate set)` pairs that have already
/// fired, keeping a propagation rule from re-firing on the same heads.
type FiredMemo = FxHashSet<(String, Vec<Predicate>)>;

/// Every way a single rule firing can advance `predicates` by one step:
/// one successor per rule that currently matches. Each successor carries
/// its own copy of the fired-memo, since a sibling branch that chose a
/// different rule must not see this branch's propagation firings.
fn step_all(predicates: &[Predicate], rules: &[Chr], fired: &FiredMemo) -> Vec<(Vec<Predicate>, Subst, FiredMemo)> {
    let mut successors = Vec::new();
    for rule in rules {
        let Some((delta, matched_idx)) = match_rule(rule, predicates) else { continue };
        let matched_preds: Vec<Predicate> = matched_idx.iter().map(|&i| predicates[i].clone()).collect();

        let mut next_fired = fired.clone();
        if rule.is_propagation() {
            let memo_key = (rule.name().to_string(), matched_preds);
            if fired.contains(&memo_key) {
                continue;
            }
            next_fired.insert(memo_key);
        }

        let body: Vec<Predicate> = rule
            .body()
            .iter()
            .map(|p| Predicate { name: p.name.clone(), arg: p.arg.substitute(&delta).unwrap_or_else(|_| p.arg.clone()) })
            .collect();

        let mut next_predicates = if rule.is_propagation() {
            predicates.to_vec()
        } else {
            let matched_set: FxHashSet<usize> = matched_idx.into_iter().collect();
            predicates.iter().enumerate().filter(|(i, _)| !matched_set.contains(i)).map(|(_, p)| p.clone()).collect()
        };
        next_predicates.extend(body);
        successors.push((next_predicates, delta, next_fired));
    }
    successors
}

/// Depth-first search over every rule-firing order reachable from
/// `predicates`, collecting one `(residual, subst)` pair per normal form
/// reached. `visited` is keyed on the canonical (variable-renamed) residual
/// at each state, so two branches that reach the same residual up to
/// renaming are not re-explored -- this bounds the search but means a
/// branch reachable only through a fired-memo this search has already
/// pruned elsewhere is not retried; acceptable since confluence only cares
/// about the set of *normal forms* reached, not every path to them.
fn explore(
    predicates: Vec<Predicate>,
    subst: Subst,
    fired: FiredMemo,
    rules: &[Chr],
    terminals: &mut Vec<(Vec<Predicate>, Subst)>,
    visited: &mut FxHashSet<Vec<Predicate>>,
) {
    if !visited.insert(canonicalize(&predicates)) {
        return;
    }
    let successors = step_all(&predicates, rules, &fired);
    if successors.is_empty() {
        terminals.push((predicates, subst));
        return;
    }
    for (next_predicates, delta, next_fired) in successors {
        let next_subst = delta.compose(&subst);
        explore(next_predicates, next_subst, next_fired, rules, terminals, visited);
    }
}

/// Replace every type variable in `ty` with a position-indexed canonical
/// one, assigning fresh canonical names in the order variables are first
/// encountered. Two structurally-isomorphic types that differ only in
/// which fresh-variable counters they happened to use compare equal after
/// this rewrite.
fn rename_vars(ty: &Type, map: &mut FxHashMap<TyVar, TyVar>, next: &mut usize) -> Type {
    match ty {
        Type::Var(v) => {
            let canon = map.entry(v.clone()).or_insert_with(|| {
                let name = format!("c{next}");
                *next += 1;
                TyVar { name, kind: v.kind.clone() }
            });
            Type::Var(canon.clone())
        }
        Type::App(f, a) => Type::App(Box::new(rename_vars(f, map, next)), Box::new(rename_vars(a, map, next))),
        Type::RowExtend(label, elem, tail) => {
            Type::RowExtend(label.clone(), Box::new(rename_vars(elem, map, next)), Box::new(rename_vars(tail, map, next)))
        }
        Type::Seq(elems) => Type::Seq(
            elems
                .iter()
                .map(|e| match e {
                    SeqElem::Indexed(t) => SeqElem::Indexed(rename_vars(t, map, next)),
                    SeqElem::Dotted(t) => SeqElem::Dotted(rename_vars(t, map, next)),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// A variable-erased rendering of `ty`, used only to order predicates
/// deterministically before canonical variable names are assigned --
/// every variable becomes the same placeholder constant regardless of its
/// original identity, so sort order does not itself depend on fresh-name
/// counters.
fn skeleton(ty: &Type) -> String {
    fn strip(ty: &Type) -> Type {
        match ty {
            Type::Var(v) => Type::Con(TyCon::new("_", v.kind.clone())),
            Type::App(f, a) => Type::App(Box::new(strip(f)), Box::new(strip(a))),
            Type::RowExtend(label, elem, tail) => {
                Type::RowExtend(label.clone(), Box::new(strip(elem)), Box::new(strip(tail)))
            }
            Type::Seq(elems) => Type::Seq(
                elems
                    .iter()
                    .map(|e| match e {
                        SeqElem::Indexed(t) => SeqElem::Indexed(strip(t)),
                        SeqElem::Dotted(t) => SeqElem::Dotted(strip(t)),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }
    strip(ty).to_string()
}

/// Canonicalize a residual predicate set for confluence comparison
/// (`spec.md` §4.F: "the same residual up to renaming"): sort by name and
/// variable-erased shape, then assign canonical variable names in the
/// order they appear in that sorted order.
fn canonicalize(predicates: &[Predicate]) -> Vec<Predicate> {
    let mut sorted: Vec<&Predicate> = predicates.iter().collect();
    sorted.sort_by(|a, b| (a.name.as_str(), skeleton(&a.arg)).cmp(&(b.name.as_str(), skeleton(&b.arg))));
    let mut map = FxHashMap::default();
    let mut next = 0usize;
    sorted.into_iter().map(|p| Predicate { name: p.name.clone(), arg: rename_vars(&p.arg, &mut map, &mut next) }).collect()
}

/// Run the CHR solver over `predicates` under `rules` to every normal form
/// reachable by some rule-firing order.
///
/// Simplification replaces its matched heads with its body (substituted);
/// propagation adds its body without removing the heads, and records the
/// `(rule name, matched predicate set)` pair in a memo so the same rule
/// cannot re-fire on the same heads (`spec.md` §4.F). If every reachable
/// normal form is the same residual up to renaming, that residual is
/// returned; if more than one distinct residual survives, the rule set is
/// rejected as non-confluent (`spec.md` §4.F, §7's `NonConfluentContext`,
/// §8 property 10).
pub fn solve(predicates: Vec<Predicate>, rules: &[Chr]) -> Result<SolveResult, CoreError> {
    let mut terminals = Vec::new();
    let mut visited = FxHashSet::default();
    explore(predicates, Subst::empty(), FiredMemo::default(), rules, &mut terminals, &mut visited);

    let mut distinct: Vec<(Vec<Predicate>, Subst)> = Vec::new();
    let mut distinct_canon: Vec<Vec<Predicate>> = Vec::new();
    for terminal in terminals {
        let canon = canonicalize(&terminal.0);
        if !distinct_canon.contains(&canon) {
            distinct_canon.push(canon);
            distinct.push(terminal);
        }
    }

    if distinct.len() > 1 {
        let residues =
            distinct.iter().map(|(preds, _)| preds.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")).collect::<Vec<_>>();
        return Err(CoreError::non_confluent(&residues));
    }

    let (predicates, subst) = distinct.into_iter().next().unwrap_or((vec![], Subst::empty()));
    Ok(SolveResult { predicates, subst })
}

/// The ambiguity check from `spec.md` §4.G: after CHR reduction, every free
/// variable of the residual context must also appear in `head`.
pub fn check_ambiguous(head: &Type, residual: &[Predicate]) -> Result<(), CoreError> {
    let head_vars = head.free_vars();
    for pred in residual {
        for var in pred.arg.free_vars() {
            if !head_vars.contains(&var) {
                return Err(CoreError::ambiguous_overload(pred.arg.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;

    fn con(name: &str) -> Type {
        Type::Con(TyCon::new(name, Kind::Value))
    }

    fn var(name: &str) -> Type {
        Type::Var(TyVar { name: name.into(), kind: Kind::Value })
    }

    fn fact(name: &str, arg: &str) -> Predicate {
        Predicate { name: name.into(), arg: con(arg) }
    }

    /// A rule head matches any argument, so it binds through a variable
    /// rather than the concrete constant a fired predicate carries.
    fn head(name: &str) -> Predicate {
        Predicate { name: name.into(), arg: var("a") }
    }

    #[test]
    fn a_rule_that_discharges_its_predicate_leaves_an_empty_residual() {
        let rules = vec![Chr::Simplification { name: "discharge-eq".into(), heads: vec![head("Eq")], body: vec![] }];
        let result = solve(vec![fact("Eq", "I32")], &rules).expect("single firing order is confluent");
        assert!(result.predicates.is_empty());
    }

    #[test]
    fn two_rules_racing_on_the_same_predicate_are_rejected_as_non_confluent() {
        let rules = vec![
            Chr::Simplification { name: "to-q".into(), heads: vec![head("P")], body: vec![head("Q")] },
            Chr::Simplification { name: "to-r".into(), heads: vec![head("P")], body: vec![head("R")] },
        ];
        let err = solve(vec![fact("P", "I32")], &rules);
        assert!(matches!(err, Err(CoreError::NonConfluentContext { .. })), "expected NonConfluentContext, got {err:?}");
    }

    #[test]
    fn canonicalize_ignores_which_fresh_counter_a_variable_happened_to_use() {
        let a = Predicate { name: "Eq".into(), arg: Type::Var(TyVar { name: "t7".into(), kind: Kind::Value }) };
        let b = Predicate { name: "Eq".into(), arg: Type::Var(TyVar { name: "t42".into(), kind: Kind::Value }) };
        assert_eq!(canonicalize(&[a]), canonicalize(&[b]));
    }
}
