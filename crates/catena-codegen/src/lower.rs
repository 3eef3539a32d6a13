//! Core lowering (`spec.md` §4.I, component I).
//!
//! Grounded on `mesh-codegen/src/mir/lower.rs`'s walker shape: one big
//! `match` over surface-expr variants producing MIR variants, plus
//! `mir/types.rs::resolve_type`'s "should not exist post-checking" panic
//! convention, reused below for the one post-elaboration invariant this
//! stage assumes (`elaborate::resolve` has already removed every
//! `Elab::Placeholder`).
//!
//! Produces `Ir`: a tree with no scheme information, closures annotated
//! with their free-variable list but not yet assigned a block name --
//! naming and closure *conversion* is the bytecode generator's job
//! (component J's `genClosure`), not lowering's.

use catena_common::ast::{IntSize, Pattern, UnitOp};
use catena_typeck::elaborate::{Elab, ElabHandler};
use catena_typeck::env::{Env, EnvEntry};

/// The kind of entry an identifier resolved to, used to choose which `Ir`
/// variant an `Elab::Ident` lowers to (`spec.md` §4.I: "Identifier -> either
/// `WCallVar`, `WValueVar`, `WOperatorVar`, `WConstructorVar`,
/// `WTestConstructorVar`, or `WPrimVar` depending on the entry kind").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IdentKind {
    Call,
    Value,
    Operator,
    Constructor,
    TestConstructor,
    Primitive,
}

/// Core IR (`spec.md` §3's "IR word (core)" list).
#[derive(Clone, Debug)]
pub enum Ir {
    CallVar(String),
    ValueVar(String),
    OperatorVar(String),
    ConstructorVar(String),
    TestConstructorVar(String),
    PrimVar(String),
    PushInt(String, IntSize),
    PushBool(bool),
    Do,
    If { then: Vec<Ir>, else_: Vec<Ir> },
    While { cond: Vec<Ir>, body: Vec<Ir> },
    Vars { bindings: Vec<(Pattern, Vec<Ir>)>, body: Vec<Ir> },
    LetRecs { names: Vec<String>, bodies: Vec<Vec<Ir>>, body: Vec<Ir> },
    /// A function literal, with its free variable names already collected
    /// (`spec.md` §4.I). The block name is assigned later, during
    /// closure conversion. A `letrecs` group's bodies reuse this same node
    /// (one per name); the bytecode generator tells them apart from an
    /// ordinary closure by the `IMutual` it wraps them in, not by IR shape.
    Closure { free_vars: Vec<String>, body: Vec<Ir> },
    Handle { params: Vec<Pattern>, body: Vec<Ir>, handlers: Vec<IrHandler>, return_: Vec<Ir> },
    /// `with-state`'s runtime shadow: transparent at this stage (the heap
    /// escape check it names is a type-level-only concern, `spec.md`
    /// §4.G); lowering keeps the node so a future bytecode generator
    /// extension point exists, but it carries no instructions of its own.
    WithPermission(Vec<Ir>),
    UnitOp(UnitOp, String),
    RecordExtend(String),
    RecordSelect(String),
    RecordRestrict(String),
    VariantLiteral(String),
    Case { label: String, then: Vec<Ir>, else_: Vec<Ir> },
}

#[derive(Clone, Debug)]
pub struct IrHandler {
    pub operation: String,
    pub params: Vec<Pattern>,
    pub body: Vec<Ir>,
}

/// Lower a fully-elaborated word sequence to `Ir` (`spec.md` §4.I).
///
/// # Panics
/// Panics if `words` still contains an `Elab::Placeholder` -- elaboration
/// (`catena_typeck::elaborate::resolve`) is specified to remove every one
/// before this stage runs; seeing one here is an invariant violation, not
/// a recoverable error (`mir/types.rs::resolve_type`'s panic convention).
pub fn lower(env: &Env, words: &[Elab]) -> Vec<Ir> {
    words.iter().map(|w| lower_one(env, w)).collect()
}

fn lower_one(env: &Env, word: &Elab) -> Ir {
    match word {
        Elab::PushInt(digits, size) => Ir::PushInt(digits.clone(), *size),
        Elab::PushBool(b) => Ir::PushBool(*b),
        Elab::Ident(name) => lower_ident(env, name),
        Elab::Placeholder(_) => {
            panic!("unresolved placeholder reached core lowering: elaboration should have removed it")
        }
        Elab::Statements { bindings, body } => Ir::Vars {
            bindings: bindings.iter().map(|(p, b)| (p.clone(), lower(env, b))).collect(),
            body: lower(env, body),
        },
        Elab::If { then, else_ } => Ir::If { then: lower(env, then), else_: lower(env, else_) },
        Elab::While { cond, body } => Ir::While { cond: lower(env, cond), body: lower(env, body) },
        Elab::FunctionLiteral(body) => {
            let lowered = lower(env, body);
            Ir::Closure { free_vars: free_idents(&lowered), body: lowered }
        }
        Elab::LetRecs { names, bodies, body } => {
            let lowered_bodies: Vec<Vec<Ir>> = bodies.iter().map(|b| lower(env, b)).collect();
            Ir::LetRecs { names: names.clone(), bodies: lowered_bodies, body: lower(env, body) }
        }
        Elab::Handle { params, body, handlers, return_ } => Ir::Handle {
            params: params.clone(),
            body: lower(env, body),
            handlers: handlers.iter().map(|h| lower_handler(env, h)).collect(),
            return_: match return_ {
                Some((_, b)) => lower(env, b),
                None => Vec::new(),
            },
        },
        Elab::NewRef => Ir::PrimVar("new-ref".into()),
        Elab::GetRef => Ir::PrimVar("get-ref".into()),
        Elab::PutRef => Ir::PrimVar("put-ref".into()),
        Elab::WithState(body) => Ir::WithPermission(lower(env, body)),
        Elab::UnitOp(op, unit) => Ir::UnitOp(*op, unit.clone()),
        Elab::RecordExtend(l) => Ir::RecordExtend(l.clone()),
        Elab::RecordSelect(l) => Ir::RecordSelect(l.clone()),
        Elab::RecordRestrict(l) => Ir::RecordRestrict(l.clone()),
        Elab::VariantLiteral(l) => Ir::VariantLiteral(l.clone()),
        Elab::Case { label, then, else_ } => {
            Ir::Case { label: label.clone(), then: lower(env, then), else_: lower(env, else_) }
        }
        Elab::DictParam(name) => Ir::ValueVar(name.clone()),
        Elab::Do => Ir::Do,
    }
}

fn lower_handler(env: &Env, handler: &ElabHandler) -> IrHandler {
    IrHandler { operation: handler.operation.clone(), params: handler.params.clone(), body: lower(env, &handler.body) }
}

/// An effect operation's surface name ends in `!` by convention (e.g.
/// `raise!`, matching `spec.md` §8 scenario S3) -- there is no dedicated
/// `EnvEntry` variant for effect operations in this core's environment, so
/// this is how `lower_ident` tells an operator-var apart from an ordinary
/// call.
fn is_operator_name(name: &str) -> bool {
    name.ends_with('!')
}

fn classify(env: &Env, name: &str) -> IdentKind {
    if is_operator_name(name) {
        return IdentKind::Operator;
    }
    match env.lookup_pattern(name) {
        Some(EnvEntry::Constructor { .. }) => return IdentKind::Constructor,
        Some(EnvEntry::Pattern(_)) => return IdentKind::TestConstructor,
        _ => {}
    }
    match env.lookup_word(name) {
        Some(EnvEntry::Variable(_)) => IdentKind::Value,
        Some(EnvEntry::Function(_)) if name.contains('-') => IdentKind::Primitive,
        _ => IdentKind::Call,
    }
}

fn lower_ident(env: &Env, name: &str) -> Ir {
    match classify(env, name) {
        IdentKind::Call => Ir::CallVar(name.to_string()),
        IdentKind::Value => Ir::ValueVar(name.to_string()),
        IdentKind::Operator => Ir::OperatorVar(name.to_string()),
        IdentKind::Constructor => Ir::ConstructorVar(name.to_string()),
        IdentKind::TestConstructor => Ir::TestConstructorVar(name.to_string()),
        IdentKind::Primitive => Ir::PrimVar(name.to_string()),
    }
}

/// The free identifiers of a lowered body -- every `ValueVar`/`CallVar`
/// name it mentions that isn't itself bound by a nested `Vars`/`LetRecs`
/// inside it. Used to annotate `Closure` nodes (`spec.md` §4.I).
fn free_idents(body: &[Ir]) -> Vec<String> {
    let mut out = Vec::new();
    let mut bound = rustc_hash::FxHashSet::default();
    collect_free(body, &mut bound, &mut out);
    out
}

fn collect_free(body: &[Ir], bound: &mut rustc_hash::FxHashSet<String>, out: &mut Vec<String>) {
    for ir in body {
        collect_free_one(ir, bound, out);
    }
}

fn collect_free_one(ir: &Ir, bound: &mut rustc_hash::FxHashSet<String>, out: &mut Vec<String>) {
    match ir {
        Ir::ValueVar(n) | Ir::CallVar(n) => {
            if !bound.contains(n) && !out.contains(n) {
                out.push(n.clone());
            }
        }
        Ir::If { then, else_ } => {
            collect_free(then, bound, out);
            collect_free(else_, bound, out);
        }
        Ir::While { cond, body } => {
            collect_free(cond, bound, out);
            collect_free(body, bound, out);
        }
        Ir::Vars { bindings, body } => {
            let mut inner = bound.clone();
            for (pattern, rhs) in bindings {
                collect_free(rhs, &mut inner, out);
                for name in pattern_names(pattern) {
                    inner.insert(name);
                }
            }
            collect_free(body, &mut inner, out);
        }
        Ir::LetRecs { names, bodies, body } => {
            let mut inner = bound.clone();
            for name in names {
                inner.insert(name.clone());
            }
            for b in bodies {
                collect_free(b, &mut inner, out);
            }
            collect_free(body, &mut inner, out);
        }
        Ir::Closure { body, .. } => collect_free(body, bound, out),
        Ir::Handle { params, body, handlers, return_ } => {
            let mut inner = bound.clone();
            for p in params {
                for name in pattern_names(p) {
                    inner.insert(name);
                }
            }
            collect_free(body, &mut inner, out);
            for h in handlers {
                let mut handler_scope = bound.clone();
                handler_scope.insert("resume".to_string());
                for p in &h.params {
                    for name in pattern_names(p) {
                        handler_scope.insert(name);
                    }
                }
                collect_free(&h.body, &mut handler_scope, out);
            }
            collect_free(return_, bound, out);
        }
        Ir::WithPermission(body) => collect_free(body, bound, out),
        Ir::Case { then, else_, .. } => {
            collect_free(then, bound, out);
            collect_free(else_, bound, out);
        }
        Ir::OperatorVar(_)
        | Ir::ConstructorVar(_)
        | Ir::TestConstructorVar(_)
        | Ir::PrimVar(_)
        | Ir::PushInt(..)
        | Ir::PushBool(_)
        | Ir::Do
        | Ir::UnitOp(..)
        | Ir::RecordExtend(_)
        | Ir::RecordSelect(_)
        | Ir::RecordRestrict(_)
        | Ir::VariantLiteral(_) => {}
    }
}

fn pattern_names(pattern: &Pattern) -> Vec<String> {
    match pattern {
        Pattern::Var { name, .. } => vec![name.clone()],
        Pattern::Wildcard { .. } => vec![],
        Pattern::Constructor { args, .. } => args.iter().flat_map(pattern_names).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catena_common::Span;

    fn span() -> Span {
        Span::new(0, 1)
    }

    #[test]
    fn push_literals_lower_directly() {
        let ir = lower(&Env::empty(), &[Elab::PushInt("2".into(), IntSize::I32), Elab::PushBool(true)]);
        assert!(matches!(ir[0], Ir::PushInt(_, IntSize::I32)));
        assert!(matches!(ir[1], Ir::PushBool(true)));
    }

    #[test]
    fn operator_names_lower_to_operator_var() {
        let ir = lower(&Env::empty(), &[Elab::Ident("raise!".into())]);
        assert!(matches!(&ir[0], Ir::OperatorVar(n) if n == "raise!"));
    }

    #[test]
    fn unbound_ident_lowers_to_call_var() {
        let ir = lower(&Env::empty(), &[Elab::Ident("ack".into())]);
        assert!(matches!(&ir[0], Ir::CallVar(n) if n == "ack"));
    }

    #[test]
    fn dash_named_function_lowers_to_prim_var() {
        use catena_typeck::ty::{Scheme, Type, TyCon};
        use catena_typeck::kind::Kind;
        let env = Env::empty().with(
            "add-i32",
            EnvEntry::Function(Scheme::mono(Type::Con(TyCon::new("I32", Kind::Value)))),
        );
        let ir = lower(&env, &[Elab::Ident("add-i32".into())]);
        assert!(matches!(&ir[0], Ir::PrimVar(n) if n == "add-i32"));
    }

    #[test]
    fn closure_collects_its_free_variables_excluding_bound_ones() {
        let body = vec![
            Elab::Ident("x".into()),
            Elab::Statements {
                bindings: vec![(Pattern::Var { name: "y".into(), span: span() }, vec![Elab::Ident("x".into())])],
                body: vec![Elab::Ident("y".into())],
            },
        ];
        let ir = lower(&Env::empty(), &[Elab::FunctionLiteral(body)]);
        match &ir[0] {
            Ir::Closure { free_vars, .. } => assert_eq!(free_vars, &vec!["x".to_string()]),
            other => panic!("expected Closure, got {other:?}"),
        }
    }
}
