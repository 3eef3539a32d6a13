//! Primitive registry (`spec.md` §4.G/§6, feeding component K's naming
//! convention back into the environment inference runs against).
//!
//! Grounded on `mesh-typeck/src/builtins.rs::register_builtins`'s ordering:
//! insert primitive type constructors, then arithmetic/comparison
//! operators (one scheme per sized integer), then the compiler-known
//! overloads (`eq`). The teacher registers its primitives directly as
//! `Function` schemes on a flat nominal `Ty`; here the same schemes are
//! built over the richer `Type::fun` stack-effect encoding this core's
//! words carry.

use catena_common::ast::IntSize;

use crate::env::{Env, EnvEntry, Instance};
use crate::fresh::FreshSource;
use crate::kind::Kind;
use crate::ty::{Predicate, QualType, Scheme, SeqElem, Type, TyCon, TyVar};

const INT_SIZES: [IntSize; 10] = [
    IntSize::I8,
    IntSize::U8,
    IntSize::I16,
    IntSize::U16,
    IntSize::I32,
    IntSize::U32,
    IntSize::I64,
    IntSize::U64,
    IntSize::ISize,
    IntSize::USize,
];

fn int_con_name(size: IntSize) -> &'static str {
    match size {
        IntSize::I8 => "I8",
        IntSize::U8 => "U8",
        IntSize::I16 => "I16",
        IntSize::U16 => "U16",
        IntSize::I32 => "I32",
        IntSize::U32 => "U32",
        IntSize::I64 => "I64",
        IntSize::U64 => "U64",
        IntSize::ISize => "ISize",
        IntSize::USize => "USize",
    }
}

fn int_type(size: IntSize) -> Type {
    Type::Con(TyCon::new(int_con_name(size), Kind::Value))
}

fn bool_type() -> Type {
    Type::Con(TyCon::new("Bool", Kind::Value))
}

fn stack(elems: Vec<Type>) -> Type {
    Type::Seq(elems.into_iter().map(SeqElem::Indexed).collect())
}

/// A pure, total, unshared, effect/permission-free word type -- the shape
/// every built-in primitive has (`spec.md` §6's primitives never raise an
/// effect or require a permission of their own).
fn pure_word(inputs: Vec<Type>, outputs: Vec<Type>) -> Type {
    Type::fun(stack(inputs), stack(outputs), Type::RowEmpty, Type::RowEmpty, Type::False)
}

fn function(env: Env, name: &str, ty: Type) -> Env {
    env.with(name, EnvEntry::Function(Scheme::mono(ty)))
}

/// Register every type constructor, arithmetic/comparison/conversion
/// primitive, list/ref/record primitive, and the compiler-known `eq`
/// overload into a fresh `Env` (`spec.md` §6's "full recognized set").
pub fn register_builtins(fresh: &mut FreshSource) -> Env {
    let mut env = Env::empty();

    env = env.with("Bool", EnvEntry::TypeCtor(Kind::Value));
    for size in INT_SIZES {
        env = env.with(int_con_name(size), EnvEntry::TypeCtor(Kind::Value));
    }
    env = env.with("Ref", EnvEntry::TypeCtor(Kind::arrow(Kind::Heap, Kind::arrow(Kind::Value, Kind::Value))));
    env = env.with("Measure", EnvEntry::TypeCtor(Kind::arrow(Kind::Value, Kind::arrow(Kind::Unit, Kind::Value))));
    env = env.with("Record", EnvEntry::TypeCtor(Kind::arrow(Kind::row(Kind::Value), Kind::Value)));
    env = env.with("Variant", EnvEntry::TypeCtor(Kind::arrow(Kind::row(Kind::Value), Kind::Value)));
    env = env.with("List", EnvEntry::TypeCtor(Kind::arrow(Kind::Value, Kind::Value)));

    for size in INT_SIZES {
        let t = int_type(size);
        let s = size.suffix();
        env = function(env, &format!("add-{s}"), pure_word(vec![t.clone(), t.clone()], vec![t.clone()]));
        env = function(env, &format!("sub-{s}"), pure_word(vec![t.clone(), t.clone()], vec![t.clone()]));
        env = function(env, &format!("mul-{s}"), pure_word(vec![t.clone(), t.clone()], vec![t.clone()]));
        env = function(env, &format!("div-{s}"), pure_word(vec![t.clone(), t.clone()], vec![t.clone()]));
        env = function(env, &format!("mod-{s}"), pure_word(vec![t.clone(), t.clone()], vec![t.clone()]));
        env = function(env, &format!("neg-{s}"), pure_word(vec![t.clone()], vec![t.clone()]));

        env = function(env, &format!("eq-{s}"), pure_word(vec![t.clone(), t.clone()], vec![bool_type()]));
        env = function(env, &format!("lt-{s}"), pure_word(vec![t.clone(), t.clone()], vec![bool_type()]));
        env = function(env, &format!("le-{s}"), pure_word(vec![t.clone(), t.clone()], vec![bool_type()]));
        env = function(env, &format!("gt-{s}"), pure_word(vec![t.clone(), t.clone()], vec![bool_type()]));
        env = function(env, &format!("ge-{s}"), pure_word(vec![t.clone(), t.clone()], vec![bool_type()]));

        for from in INT_SIZES {
            if from == size {
                continue;
            }
            env = function(
                env,
                &format!("conv-{s}-{}", from.suffix()),
                pure_word(vec![int_type(from)], vec![t.clone()]),
            );
        }
    }

    env = function(env, "eq-bool", pure_word(vec![bool_type(), bool_type()], vec![bool_type()]));
    env = function(env, "and-bool", pure_word(vec![bool_type(), bool_type()], vec![bool_type()]));
    env = function(env, "or-bool", pure_word(vec![bool_type(), bool_type()], vec![bool_type()]));
    env = function(env, "not-bool", pure_word(vec![bool_type()], vec![bool_type()]));

    let list_of = |elem: Type| -> Type {
        Type::App(Box::new(Type::Con(TyCon::new("List", Kind::arrow(Kind::Value, Kind::Value)))), Box::new(elem))
    };
    let a = fresh.fresh_var(Kind::Value);
    env = function(env, "cons", pure_word(vec![a.clone(), list_of(a.clone())], vec![list_of(a.clone())]));
    let a = fresh.fresh_var(Kind::Value);
    env = function(env, "head", pure_word(vec![list_of(a.clone())], vec![a]));
    let a = fresh.fresh_var(Kind::Value);
    env = function(env, "tail", pure_word(vec![list_of(a.clone())], vec![list_of(a)]));
    let a = fresh.fresh_var(Kind::Value);
    env = function(env, "nil?", pure_word(vec![list_of(a)], vec![bool_type()]));

    env = register_eq_overload(env, fresh);
    env
}

/// `eq`: the compiler-known overload used by S4/S6 (`spec.md` §8). Its
/// base scheme is qualified over its own `Eq` predicate so that
/// `infer_ident` can read the predicate straight back off the
/// instantiated context (`infer.rs::infer_ident`'s `Overload` branch).
fn register_eq_overload(env: Env, fresh: &mut FreshSource) -> Env {
    let tyvar = TyVar { name: "__eq_a".into(), kind: Kind::Value };
    let a = Type::Var(tyvar.clone());
    let base_ty = pure_word(vec![a.clone(), a.clone()], vec![bool_type()]);
    let base_scheme = Scheme {
        quantified: vec![tyvar],
        body: QualType { context: vec![Predicate { name: "Eq".into(), arg: a }], head: base_ty },
    };

    let list_elem = fresh.fresh_var(Kind::Value);
    let list_ty = Type::App(
        Box::new(Type::Con(TyCon::new("List", Kind::arrow(Kind::Value, Kind::Value)))),
        Box::new(list_elem),
    );

    let instances = vec![
        Instance { scheme: Scheme::mono(bool_type()), function_name: "eq-bool".into() },
        Instance { scheme: Scheme::mono(int_type(IntSize::I32)), function_name: "eq-i32".into() },
        Instance { scheme: Scheme::mono(list_ty), function_name: "eq-list".into() },
    ];

    env.with("eq", EnvEntry::Overload { predicate_name: "Eq".into(), base_scheme, instances })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_sized_arithmetic_operator() {
        let mut fresh = FreshSource::new();
        let env = register_builtins(&mut fresh);
        for size in INT_SIZES {
            let name = format!("add-{}", size.suffix());
            assert!(env.lookup_word(&name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn eq_overload_has_the_expected_instances() {
        let mut fresh = FreshSource::new();
        let env = register_builtins(&mut fresh);
        match env.lookup_word("eq") {
            Some(EnvEntry::Overload { predicate_name, instances, .. }) => {
                assert_eq!(predicate_name, "Eq");
                assert_eq!(instances.len(), 3);
            }
            other => panic!("expected Overload entry, got {other:?}"),
        }
    }

    #[test]
    fn type_constructors_are_registered_at_the_right_kind() {
        let mut fresh = FreshSource::new();
        let env = register_builtins(&mut fresh);
        assert_eq!(env.lookup_type_ctor("Bool"), Some(&Kind::Value));
        assert!(env.lookup_type_ctor("Ref").is_some());
    }
}
