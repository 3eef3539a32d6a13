//! Elaboration (`spec.md` §4.H, component H).
//!
//! Inference leaves `Placeholder` nodes in its output tree wherever an
//! identifier resolved to an overloaded or recursive binding (`spec.md`
//! §4.H: "an inferred top-level expression whose AST contains placeholders
//! `OverloadPlaceholder`, `MethodPlaceholder`, `RecursivePlaceholder`").
//! `resolve` walks that tree and replaces every placeholder with concrete
//! words, consulting the current substitution rather than re-running
//! inference -- elaboration is purely syntactic.
//!
//! No teacher analogue resolves CHR placeholders; the one-way type-matching
//! step below is grounded on `traits.rs::TraitRegistry::register_impl`'s
//! structural match of an impl head against a call site, generalized from
//! "one impl, one call" to "one instance, one placeholder" via
//! `unify::match_one_way`.

use catena_common::ast::{IntSize, Pattern, UnitOp};

use crate::env::{Env, EnvEntry};
use crate::error::CoreError;
use crate::ty::{Predicate, Subst, Type};
use crate::unify::match_one_way;

/// A placeholder left by inference at a word that resolved to an
/// overloaded or recursive binding (`spec.md` §4.H).
#[derive(Clone, Debug)]
pub enum Placeholder {
    /// `OverloadPlaceholder(pred)`: a context predicate threaded through
    /// from an outer overloaded identifier, not yet resolved to an
    /// instance.
    Overload(Predicate),
    /// `MethodPlaceholder(name, pred)`: the overloaded identifier itself.
    Method(String, Predicate),
    /// `RecursivePlaceholder(name, ty)`: a use of the function currently
    /// being defined, before its scheme is generalized.
    Recursive(String, Type),
}

/// An effect handler in elaborated form.
#[derive(Clone, Debug)]
pub struct ElabHandler {
    pub operation: String,
    pub params: Vec<Pattern>,
    pub body: Vec<Elab>,
}

/// A word after inference, still possibly containing placeholders
/// (`spec.md` §4.H). Mirrors `catena_common::ast::Word`'s shape, with
/// `Ident` split into a concrete name and an unresolved `Placeholder`.
#[derive(Clone, Debug)]
pub enum Elab {
    PushInt(String, IntSize),
    PushBool(bool),
    Ident(String),
    Placeholder(Placeholder),
    Statements { bindings: Vec<(Pattern, Vec<Elab>)>, body: Vec<Elab> },
    If { then: Vec<Elab>, else_: Vec<Elab> },
    While { cond: Vec<Elab>, body: Vec<Elab> },
    FunctionLiteral(Vec<Elab>),
    LetRecs { names: Vec<String>, bodies: Vec<Vec<Elab>>, body: Vec<Elab> },
    Handle {
        params: Vec<Pattern>,
        body: Vec<Elab>,
        handlers: Vec<ElabHandler>,
        return_: Option<(Pattern, Vec<Elab>)>,
    },
    NewRef,
    GetRef,
    PutRef,
    WithState(Vec<Elab>),
    UnitOp(UnitOp, String),
    RecordExtend(String),
    RecordSelect(String),
    RecordRestrict(String),
    VariantLiteral(String),
    Case { label: String, then: Vec<Elab>, else_: Vec<Elab> },
    /// Dictionary-passing prelude: push the named parameter
    /// (`spec.md` §4.H: "a prelude of let-bound dictionary parameter
    /// names"), emitted by `resolve` ahead of a generalized definition's
    /// body.
    DictParam(String),
    /// Invoke whatever is on top of the stack as a function
    /// (`spec.md` §4.H: "the resolved code ends in `do`").
    Do,
}

/// Resolve every placeholder in `words`, given the substitution produced by
/// inference/CHR solving and the environment visible at this point (for
/// instance search). Returns the elaborated words with no `Elab::Placeholder`
/// nodes remaining.
pub fn resolve(words: &[Elab], env: &Env, subst: &Subst) -> Result<Vec<Elab>, CoreError> {
    words.iter().map(|w| resolve_one(w, env, subst)).collect()
}

fn resolve_one(word: &Elab, env: &Env, subst: &Subst) -> Result<Elab, CoreError> {
    let resolved = match word {
        Elab::Placeholder(Placeholder::Overload(pred)) => {
            return resolve_overload(pred, env, subst);
        }
        Elab::Placeholder(Placeholder::Method(_name, pred)) => {
            let resolved = resolve_overload(pred, env, subst)?;
            let mut out = flatten(resolved);
            out.push(Elab::Do);
            return Ok(Elab::Statements { bindings: vec![], body: out });
        }
        Elab::Placeholder(Placeholder::Recursive(name, _ty)) => Elab::Ident(name.clone()),
        Elab::PushInt(d, size) => Elab::PushInt(d.clone(), *size),
        Elab::PushBool(b) => Elab::PushBool(*b),
        Elab::Ident(n) => Elab::Ident(n.clone()),
        Elab::Statements { bindings, body } => Elab::Statements {
            bindings: bindings
                .iter()
                .map(|(p, b)| Ok((p.clone(), resolve(b, env, subst)?)))
                .collect::<Result<_, CoreError>>()?,
            body: resolve(body, env, subst)?,
        },
        Elab::If { then, else_ } => {
            Elab::If { then: resolve(then, env, subst)?, else_: resolve(else_, env, subst)? }
        }
        Elab::While { cond, body } => {
            Elab::While { cond: resolve(cond, env, subst)?, body: resolve(body, env, subst)? }
        }
        Elab::FunctionLiteral(body) => Elab::FunctionLiteral(resolve(body, env, subst)?),
        Elab::LetRecs { names, bodies, body } => Elab::LetRecs {
            names: names.clone(),
            bodies: bodies.iter().map(|b| resolve(b, env, subst)).collect::<Result<_, CoreError>>()?,
            body: resolve(body, env, subst)?,
        },
        Elab::Handle { params, body, handlers, return_ } => Elab::Handle {
            params: params.clone(),
            body: resolve(body, env, subst)?,
            handlers: handlers
                .iter()
                .map(|h| {
                    Ok(ElabHandler {
                        operation: h.operation.clone(),
                        params: h.params.clone(),
                        body: resolve(&h.body, env, subst)?,
                    })
                })
                .collect::<Result<_, CoreError>>()?,
            return_: match return_ {
                Some((p, b)) => Some((p.clone(), resolve(b, env, subst)?)),
                None => None,
            },
        },
        Elab::NewRef => Elab::NewRef,
        Elab::GetRef => Elab::GetRef,
        Elab::PutRef => Elab::PutRef,
        Elab::WithState(body) => Elab::WithState(resolve(body, env, subst)?),
        Elab::UnitOp(op, unit) => Elab::UnitOp(*op, unit.clone()),
        Elab::RecordExtend(l) => Elab::RecordExtend(l.clone()),
        Elab::RecordSelect(l) => Elab::RecordSelect(l.clone()),
        Elab::RecordRestrict(l) => Elab::RecordRestrict(l.clone()),
        Elab::VariantLiteral(l) => Elab::VariantLiteral(l.clone()),
        Elab::Case { label, then, else_ } => {
            Elab::Case { label: label.clone(), then: resolve(then, env, subst)?, else_: resolve(else_, env, subst)? }
        }
        Elab::DictParam(n) => Elab::DictParam(n.clone()),
        Elab::Do => Elab::Do,
    };
    Ok(resolved)
}

fn flatten(body: Elab) -> Vec<Elab> {
    match body {
        Elab::Statements { bindings, body } if bindings.is_empty() => body,
        other => vec![other],
    }
}

/// Resolve a single overload predicate: search instances first, falling
/// back to a dictionary parameter (`spec.md` §4.H's `OverloadPlaceholder`
/// rule).
fn resolve_overload(pred: &Predicate, env: &Env, subst: &Subst) -> Result<Elab, CoreError> {
    let arg = pred.arg.substitute(subst).map_err(|m| CoreError::kind_mismatch(&m.expected, &m.found))?;

    if let Some(instances) = env.lookup_predicate(&pred.name) {
        for instance in instances {
            let (head, context) = instance
                .scheme
                .instantiate(&mut crate::fresh::FreshSource::new())
                .map_err(|m| CoreError::kind_mismatch(&m.expected, &m.found))?;
            if match_one_way(&head, &arg).is_some() {
                let mut nested = Vec::new();
                for ctx_pred in &context {
                    nested.push(resolve_overload(ctx_pred, env, subst)?);
                }
                nested.push(Elab::Ident(instance.function_name.clone()));
                return Ok(Elab::FunctionLiteral(nested));
            }
        }
    }

    let dict_name = dictionary_param_name(pred);
    if env.lookup(&dict_name).is_some() {
        return Ok(Elab::DictParam(dict_name));
    }

    Err(CoreError::instance_not_found(&pred.name))
}

/// The name a generalized definition's dictionary parameter is bound
/// under, derived from the predicate it discharges (`spec.md` §4.H's
/// "a prelude of let-bound dictionary parameter names -- one per context
/// predicate").
pub fn dictionary_param_name(pred: &Predicate) -> String {
    format!("${}", pred.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;
    use crate::ty::{Scheme, TyCon};
    use crate::env::Instance;

    fn con(name: &str) -> Type {
        Type::Con(TyCon::new(name, Kind::Value))
    }

    #[test]
    fn overload_resolves_to_matching_instance() {
        let instance = Instance { scheme: Scheme::mono(con("I32")), function_name: "eq-i32".into() };
        let env = Env::empty().with(
            "eq",
            EnvEntry::Overload { predicate_name: "Eq".into(), base_scheme: Scheme::mono(con("I32")), instances: vec![instance] },
        );
        let pred = Predicate { name: "eq".into(), arg: con("I32") };
        let resolved = resolve_overload(&pred, &env, &Subst::empty()).unwrap();
        match resolved {
            Elab::FunctionLiteral(body) => {
                assert_eq!(body.len(), 1);
                assert!(matches!(&body[0], Elab::Ident(name) if name == "eq-i32"));
            }
            other => panic!("expected FunctionLiteral, got {other:?}"),
        }
    }

    #[test]
    fn overload_falls_back_to_dictionary_parameter() {
        let pred = Predicate { name: "eq".into(), arg: con("I32") };
        let env = Env::empty().with(dictionary_param_name(&pred), EnvEntry::Variable(Scheme::mono(con("I32"))));
        let resolved = resolve_overload(&pred, &env, &Subst::empty()).unwrap();
        assert!(matches!(resolved, Elab::DictParam(n) if n == "$eq"));
    }

    #[test]
    fn overload_with_no_instance_and_no_dictionary_fails() {
        let pred = Predicate { name: "eq".into(), arg: con("I32") };
        let env = Env::empty();
        let err = resolve_overload(&pred, &env, &Subst::empty());
        assert!(matches!(err, Err(CoreError::InstanceNotFound { .. })));
    }
}
