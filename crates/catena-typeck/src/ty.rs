//! Type representation (`spec.md` §3, component A).
//!
//! `Type` is a tree over the fixed leaf/node set the spec names: variables,
//! constants, the primitive/boolean/Abelian-unit/empty-row/fixed-integer
//! leaves, applications, row extensions, and dotted sequences. Every node
//! has a well-defined `Kind`; `kind_of` computes it and `substitute` refuses
//! to produce an ill-kinded result (`spec.md` §3's "kind mismatches are a
//! fatal invariant violation").

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::abelian::Equation;
use crate::kind::Kind;

/// A type variable: its generated name (`spec.md` §4.D's `prefix ++ counter`)
/// together with the kind it was created at. Kind is part of the variable's
/// identity because the same counter value is never reused across kinds
/// (each kind has its own counter), so `(name, kind)` round-trips exactly
/// the pair `freeVars` is specified to return.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TyVar {
    pub name: String,
    pub kind: Kind,
}

impl fmt::Display for TyVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A named constant: a type constructor like `Int`, `List`, or a
/// user-declared unit constant like `meter`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TyCon {
    pub name: String,
    pub kind: Kind,
}

impl TyCon {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        TyCon { name: name.into(), kind }
    }
}

/// Whether a sequence element is a fixed position or a variadic expansion
/// (`spec.md` §3's dotted sequence).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SeqElem {
    Indexed(Type),
    Dotted(Type),
}

/// A type term (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Var(TyVar),
    Con(TyCon),
    Primitive(String),
    True,
    False,
    /// The Abelian identity element `1` (an empty equation).
    AbelianOne,
    RowEmpty,
    FixedInt(i64),
    /// An Abelian equation, tagged with which kind of attribute it solves
    /// (`Unit` for units-of-measure; `Sharing`/`Totality`/`Trust`/
    /// `Clearance` for the Boolean lattices that reuse the same solver,
    /// `spec.md` §9), e.g. `meter * second^-2`.
    Abelian(Kind, Equation),
    /// `f x`: a type constructor applied to an argument.
    App(Box<Type>, Box<Type>),
    /// `{ label: element | tail }`.
    RowExtend(String, Box<Type>, Box<Type>),
    /// A dotted (variadic) sequence of types.
    Seq(Vec<SeqElem>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Var(v) => write!(f, "{v}"),
            Type::Con(c) => write!(f, "{}", c.name),
            Type::Primitive(p) => write!(f, "{p}"),
            Type::True => write!(f, "true"),
            Type::False => write!(f, "false"),
            Type::AbelianOne => write!(f, "1"),
            Type::RowEmpty => write!(f, "<>"),
            Type::FixedInt(n) => write!(f, "{n}"),
            Type::Abelian(_, eq) => write!(f, "{eq}"),
            Type::App(func, arg) => write!(f, "({func} {arg})"),
            Type::RowExtend(label, elem, tail) => write!(f, "{{{label}: {elem} | {tail}}}"),
            Type::Seq(elems) => {
                write!(f, "[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match e {
                        SeqElem::Indexed(t) => write!(f, "{t}")?,
                        SeqElem::Dotted(t) => write!(f, "{t}...")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Error raised when a `Type` operation would produce an ill-kinded term
/// (`spec.md` §3: "kind mismatches are a fatal invariant violation").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindMismatch {
    pub expected: Kind,
    pub found: Kind,
}

impl Type {
    /// Build a word/function type `(inputs, outputs -> e, p)^sharing`
    /// (`spec.md` §4.G: "each word has a function type `(e, p, t, i -> o)`
    /// with sharing attribute"). `inputs`/`outputs` are `Type::Seq` stacks
    /// (typically ending in a `SeqElem::Dotted` tail for stack
    /// polymorphism); `effect`/`permission` are rows; `sharing` is a
    /// `Sharing`-kinded Abelian type or `Type::True`/`Type::False`.
    ///
    /// Encoded as a constructor application so the uniform `App`/
    /// `substitute` machinery handles it without a dedicated `Fun` variant.
    /// `"->"` is curried left-to-right over (inputs, outputs, effect,
    /// permission, sharing) and kinded accordingly so `kind_of` validates
    /// each application the same way it validates any other `App`.
    pub fn fun(inputs: Type, outputs: Type, effect: Type, permission: Type, sharing: Type) -> Type {
        let arrow_kind = Kind::arrow(
            Kind::seq(Kind::Value),
            Kind::arrow(
                Kind::seq(Kind::Value),
                Kind::arrow(
                    Kind::row(Kind::Effect),
                    Kind::arrow(Kind::row(Kind::Permission), Kind::arrow(Kind::Sharing, Kind::Value)),
                ),
            ),
        );
        let mut spine =
            Type::App(Box::new(Type::Con(TyCon::new("->", arrow_kind))), Box::new(inputs));
        spine = Type::App(Box::new(spine), Box::new(outputs));
        spine = Type::App(Box::new(spine), Box::new(effect));
        spine = Type::App(Box::new(spine), Box::new(permission));
        Type::App(Box::new(spine), Box::new(sharing))
    }

    /// Decompose a type built by `fun` back into its five components, if
    /// `self` has that shape. Used by word inference to read back an
    /// instantiated scheme's stack effect.
    pub fn as_fun(&self) -> Option<(&Type, &Type, &Type, &Type, &Type)> {
        let Type::App(spine, sharing) = self else { return None };
        let Type::App(spine, permission) = spine.as_ref() else { return None };
        let Type::App(spine, effect) = spine.as_ref() else { return None };
        let Type::App(spine, outputs) = spine.as_ref() else { return None };
        let Type::App(head, inputs) = spine.as_ref() else { return None };
        match head.as_ref() {
            Type::Con(c) if c.name == "->" => Some((inputs, outputs, effect, permission, sharing)),
            _ => None,
        }
    }

    /// Compute the kind of a type term (`spec.md` §4.A's `kindOf`).
    ///
    /// `App` requires the function side to have an `Arrow` kind whose
    /// `from` matches the argument's kind; any other shape is a fatal
    /// `KindMismatch` per the invariant in `spec.md` §3.
    pub fn kind_of(&self) -> Result<Kind, KindMismatch> {
        match self {
            Type::Var(v) => Ok(v.kind.clone()),
            Type::Con(c) => Ok(c.kind.clone()),
            Type::Primitive(_) => Ok(Kind::Value),
            Type::True | Type::False => Ok(Kind::Sharing),
            Type::AbelianOne => Ok(Kind::Unit),
            Type::Abelian(k, _) => Ok(k.clone()),
            Type::RowEmpty => Ok(Kind::row(Kind::Value)),
            Type::FixedInt(_) => Ok(Kind::Fixed),
            Type::App(func, arg) => {
                let func_kind = func.kind_of()?;
                let arg_kind = arg.kind_of()?;
                match func_kind {
                    Kind::Arrow(from, to) => {
                        // `RowEmpty` has no element to infer its row kind
                        // from, so `kind_of` defaults it to `Row(Value)`;
                        // accept it against any expected row kind rather
                        // than forcing every empty effect/permission row
                        // through a fresh variable just to match.
                        let row_empty_ok =
                            matches!((&*from, arg.as_ref()), (Kind::Row(_), Type::RowEmpty));
                        if *from == arg_kind || row_empty_ok {
                            Ok(*to)
                        } else {
                            Err(KindMismatch { expected: *from, found: arg_kind })
                        }
                    }
                    other => Err(KindMismatch { expected: Kind::arrow(arg_kind.clone(), arg_kind), found: other }),
                }
            }
            Type::RowExtend(_, elem, tail) => {
                let elem_kind = elem.kind_of()?;
                let tail_kind = tail.kind_of()?;
                match &tail_kind {
                    Kind::Row(inner) if **inner == elem_kind => Ok(tail_kind),
                    Kind::Row(_) if matches!(tail.as_ref(), Type::RowEmpty) => Ok(Kind::row(elem_kind)),
                    other => Err(KindMismatch { expected: Kind::row(elem_kind), found: other.clone() }),
                }
            }
            Type::Seq(elems) => {
                let mut inner = None;
                for e in elems {
                    let (t, k) = match e {
                        SeqElem::Indexed(t) => (t, t.kind_of()?),
                        SeqElem::Dotted(t) => (t, t.kind_of()?),
                    };
                    match &inner {
                        None => inner = Some(k),
                        Some(prev) if *prev == k => {}
                        Some(prev) => return Err(KindMismatch { expected: prev.clone(), found: t.kind_of()? }),
                    }
                }
                Ok(Kind::seq(inner.unwrap_or(Kind::Value)))
            }
        }
    }

    /// Apply a type constructor to an argument, checking kinds
    /// (`spec.md` §4.A's `typeApply`).
    pub fn apply(self, arg: Type) -> Result<Type, KindMismatch> {
        let result = Type::App(Box::new(self), Box::new(arg));
        result.kind_of()?;
        Ok(result)
    }

    /// The free type variables of a term, as `(name, kind)` pairs
    /// (`spec.md` §4.A's `freeVars`).
    pub fn free_vars(&self) -> FxHashSet<TyVar> {
        let mut out = FxHashSet::default();
        self.collect_free_vars(&mut out);
        out
    }

    fn collect_free_vars(&self, out: &mut FxHashSet<TyVar>) {
        match self {
            Type::Var(v) => {
                out.insert(v.clone());
            }
            Type::Abelian(k, eq) => {
                for v in eq.var_names() {
                    out.insert(TyVar { name: v.clone(), kind: k.clone() });
                }
            }
            Type::App(f, a) => {
                f.collect_free_vars(out);
                a.collect_free_vars(out);
            }
            Type::RowExtend(_, elem, tail) => {
                elem.collect_free_vars(out);
                tail.collect_free_vars(out);
            }
            Type::Seq(elems) => {
                for e in elems {
                    match e {
                        SeqElem::Indexed(t) | SeqElem::Dotted(t) => t.collect_free_vars(out),
                    }
                }
            }
            Type::Con(_)
            | Type::Primitive(_)
            | Type::True
            | Type::False
            | Type::AbelianOne
            | Type::RowEmpty
            | Type::FixedInt(_) => {}
        }
    }

    /// Apply a substitution, checking that the result is well-kinded
    /// (`spec.md` §4.A).
    pub fn substitute(&self, subst: &Subst) -> Result<Type, KindMismatch> {
        let result = self.substitute_unchecked(subst);
        result.kind_of()?;
        Ok(result)
    }

    fn substitute_unchecked(&self, subst: &Subst) -> Type {
        match self {
            Type::Var(v) => subst.get(v).cloned().unwrap_or_else(|| self.clone()),
            Type::App(f, a) => Type::App(
                Box::new(f.substitute_unchecked(subst)),
                Box::new(a.substitute_unchecked(subst)),
            ),
            Type::RowExtend(label, elem, tail) => Type::RowExtend(
                label.clone(),
                Box::new(elem.substitute_unchecked(subst)),
                Box::new(tail.substitute_unchecked(subst)),
            ),
            Type::Seq(elems) => Type::Seq(
                elems
                    .iter()
                    .map(|e| match e {
                        SeqElem::Indexed(t) => SeqElem::Indexed(t.substitute_unchecked(subst)),
                        SeqElem::Dotted(t) => SeqElem::Dotted(t.substitute_unchecked(subst)),
                    })
                    .collect(),
            ),
            Type::Abelian(k, eq) => {
                let mut result = eq.clone();
                for (var, replacement) in subst.abelian_entries() {
                    result = result.substitute_var(var, replacement);
                }
                Type::Abelian(k.clone(), result)
            }
            other => other.clone(),
        }
    }
}

/// A substitution: a finite map from variable name to replacement type,
/// total over its domain and (once produced by `unify::solve_all`)
/// idempotent (`spec.md` §8 property 2).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subst(FxHashMap<TyVar, Type>);

impl Subst {
    pub fn empty() -> Self {
        Subst(FxHashMap::default())
    }

    pub fn singleton(var: TyVar, ty: Type) -> Self {
        let mut m = FxHashMap::default();
        m.insert(var, ty);
        Subst(m)
    }

    pub fn get(&self, var: &TyVar) -> Option<&Type> {
        self.0.get(var)
    }

    pub fn insert(&mut self, var: TyVar, ty: Type) {
        self.0.insert(var, ty);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compose `self` after `other`: apply `other` first, then `self`,
    /// matching `spec.md` §4.C's "`solveAll` ... composing substitutions".
    pub fn compose(&self, other: &Subst) -> Subst {
        let mut out = FxHashMap::default();
        for (k, v) in &other.0 {
            out.insert(k.clone(), v.substitute_unchecked(self));
        }
        for (k, v) in &self.0 {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Subst(out)
    }

    /// The Abelian-kinded entries of this substitution, as `(name, equation)`
    /// pairs, used by `Type::substitute` to drive `Equation::substitute_var`.
    fn abelian_entries(&self) -> Vec<(&str, &Equation)> {
        self.0
            .iter()
            .filter_map(|(k, v)| match v {
                Type::Abelian(_kind, eq) => Some((k.name.as_str(), eq)),
                _ => None,
            })
            .collect()
    }
}

/// A predicate: a qualified type's context constraint, `name applied-to`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub name: String,
    pub arg: Type,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.arg)
    }
}

/// A qualified type: `context => head` (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualType {
    pub context: Vec<Predicate>,
    pub head: Type,
}

impl QualType {
    pub fn unqualified(head: Type) -> Self {
        QualType { context: Vec::new(), head }
    }
}

/// A type scheme: implicitly-universal quantifiers over a qualified type
/// (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scheme {
    pub quantified: Vec<TyVar>,
    pub body: QualType,
}

impl Scheme {
    pub fn mono(ty: Type) -> Self {
        Scheme { quantified: Vec::new(), body: QualType::unqualified(ty) }
    }

    /// Instantiate this scheme with fresh type variables, returning the
    /// instantiated head and its (now-concrete-headed) context predicates
    /// (`spec.md` §4.G: "identifier: instantiate its scheme"). Grounded on
    /// `mesh-typeck/src/unify.rs::InferCtx::instantiate`'s one-substitution-
    /// map shape, generalized to also carry the qualified context through.
    pub fn instantiate(&self, fresh: &mut crate::fresh::FreshSource) -> Result<(Type, Vec<Predicate>), KindMismatch> {
        if self.quantified.is_empty() {
            return Ok((self.body.head.clone(), self.body.context.clone()));
        }
        let mut subst = Subst::empty();
        for var in &self.quantified {
            subst.insert(var.clone(), fresh.fresh_var(var.kind.clone()));
        }
        let head = self.body.head.substitute(&subst)?;
        let context = self
            .body
            .context
            .iter()
            .map(|p| Ok(Predicate { name: p.name.clone(), arg: p.arg.substitute(&subst)? }))
            .collect::<Result<Vec<_>, KindMismatch>>()?;
        Ok((head, context))
    }

    /// Generalize a qualified type into a scheme, quantifying over every
    /// free variable of `body` that is not also free in `env_vars` (the
    /// variables still in scope in the surrounding environment). Grounded
    /// on `mesh-typeck/src/unify.rs::InferCtx::generalize`'s
    /// level-based filter, adapted to this core's environment-membership
    /// filter since there is no mutable union-find level to compare against.
    pub fn generalize(body: QualType, env_vars: &FxHashSet<TyVar>) -> Scheme {
        let mut free: Vec<TyVar> = body.head.free_vars().into_iter().collect();
        for pred in &body.context {
            free.extend(pred.arg.free_vars());
        }
        let mut quantified: Vec<TyVar> = Vec::new();
        let mut seen = FxHashSet::default();
        for var in free.drain(..) {
            if !env_vars.contains(&var) && seen.insert(var.clone()) {
                quantified.push(var);
            }
        }
        Scheme { quantified, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, kind: Kind) -> Type {
        Type::Var(TyVar { name: name.to_string(), kind })
    }

    #[test]
    fn kind_of_app_checks_arrow() {
        let con = Type::Con(TyCon::new("List", Kind::arrow(Kind::Value, Kind::Value)));
        let arg = Type::Con(TyCon::new("Int", Kind::Value));
        let applied = con.apply(arg).expect("List applied to Int should be well-kinded");
        assert_eq!(applied.kind_of().unwrap(), Kind::Value);
    }

    #[test]
    fn kind_of_app_rejects_mismatch() {
        let con = Type::Con(TyCon::new("List", Kind::arrow(Kind::Value, Kind::Value)));
        let arg = Type::Con(TyCon::new("EffectRow", Kind::Effect));
        assert!(con.apply(arg).is_err());
    }

    #[test]
    fn substitute_is_capture_free_for_disjoint_vars() {
        let t = Type::App(
            Box::new(var("t1", Kind::Value)),
            Box::new(var("t2", Kind::Value)),
        );
        let mut subst = Subst::empty();
        subst.insert(
            TyVar { name: "t1".into(), kind: Kind::Value },
            Type::Con(TyCon::new("Int", Kind::Value)),
        );
        // Substituting t1 in `(t1 t2)` where t1 and t2 have the same kind
        // produces an App again; kind_of must still succeed structurally
        // (this is a free-variable application, not a real constructor, so
        // we only check substitution rewrote the right leaf).
        let result = t.substitute_unchecked(&subst);
        match result {
            Type::App(f, a) => {
                assert_eq!(*f, Type::Con(TyCon::new("Int", Kind::Value)));
                assert_eq!(*a, var("t2", Kind::Value));
            }
            _ => panic!("expected App"),
        }
    }

    #[test]
    fn free_vars_collects_from_row_and_seq() {
        let row = Type::RowExtend(
            "x".into(),
            Box::new(Type::Con(TyCon::new("Int", Kind::Value))),
            Box::new(var("r", Kind::row(Kind::Value))),
        );
        let fv = row.free_vars();
        assert!(fv.contains(&TyVar { name: "r".into(), kind: Kind::row(Kind::Value) }));

        let seq = Type::Seq(vec![SeqElem::Dotted(var("z", Kind::seq(Kind::Value)))]);
        let fv = seq.free_vars();
        assert!(fv.contains(&TyVar { name: "z".into(), kind: Kind::seq(Kind::Value) }));
    }

    #[test]
    fn fun_round_trips_through_as_fun() {
        let inputs = Type::Seq(vec![SeqElem::Indexed(Type::Con(TyCon::new("Int", Kind::Value)))]);
        let outputs = Type::Seq(vec![]);
        let effect = Type::RowEmpty;
        let permission = Type::RowEmpty;
        let sharing = Type::False;
        let ty = Type::fun(inputs.clone(), outputs.clone(), effect.clone(), permission.clone(), sharing.clone());
        assert_eq!(ty.kind_of().unwrap(), Kind::Value);
        let (i, o, e, p, s) = ty.as_fun().expect("should decompose");
        assert_eq!(*i, inputs);
        assert_eq!(*o, outputs);
        assert_eq!(*e, effect);
        assert_eq!(*p, permission);
        assert_eq!(*s, sharing);
    }
}
