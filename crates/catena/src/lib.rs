//! Pipeline facade (`spec.md` §2's control-flow line): wires type inference
//! (G), CHR solving and elaboration (F, H), core lowering (I) and bytecode
//! generation (J/K) into a single `compile` entry point.
//!
//! `spec.md` §1 lists the lexer, parser, renamer and **kind inferencer** as
//! out-of-scope external collaborators; `Decl`'s `TypeExpr`-bearing fields
//! (`type_annotation`, `ty`, `scheme`) are exactly the surface syntax that
//! kind inferencer consumes before handing the core a fully kind-annotated
//! tree. This facade therefore never parses a `TypeExpr` itself -- every
//! scheme it puts in the environment is derived by running inference over a
//! declaration's own body (`Func`, `RecFuncs`, `Instance`), the same way
//! `infer_let_recs` derives a letrecs group's schemes from its bodies.
//! Declarations whose *only* content is a `TypeExpr` (`Type`, `RecTypes`,
//! `Pattern`, `Check`, `Tag`) are registered structurally -- enough for
//! their names to resolve at use sites -- without attempting to recover the
//! authoritative kind-checked type such a declaration would carry in the
//! full driver.

use catena_codegen::bytecode::{assemble_program_with_defs, Block, ConstructorInfo};
use catena_codegen::lower;
use catena_common::ast::{Decl, Program};
use catena_typeck::builtins::register_builtins;
use catena_typeck::elaborate::Elab;
use catena_typeck::env::{Env, EnvEntry};
use catena_typeck::error::CoreError;
use catena_typeck::fresh::FreshSource;
use catena_typeck::infer::{fresh_fun_placeholder, infer_top};
use catena_typeck::kind::Kind;
use catena_typeck::ty::{QualType, Scheme, Type};
use rustc_hash::FxHashMap;

/// Compile a whole program to a flat list of bytecode blocks
/// (`spec.md` §2's control-flow line, §6's output contract).
pub fn compile(program: &Program) -> Result<Vec<Block>, CoreError> {
    let mut fresh = FreshSource::new();
    let mut env = register_builtins(&mut fresh);
    let mut constructors: FxHashMap<String, ConstructorInfo> = FxHashMap::default();
    let mut defs: Vec<(String, Vec<Elab>)> = Vec::new();

    for decl in &program.declarations {
        let (new_env, new_defs) = process_decl(env, decl, &mut constructors, &mut fresh)?;
        env = new_env;
        defs.extend(new_defs);
    }

    // `spec.md` §4.J's program assembly appends "user definitions" after
    // `main` -- every top-level function gets its own labeled block, lowered
    // against the fully built environment so a self- or mutually-recursive
    // call inside it resolves to `ICall(Label name)` rather than a closure
    // lookup, exactly like `main`'s own body.
    let lowered_defs: Vec<(String, Vec<lower::Ir>)> =
        defs.into_iter().map(|(name, body)| (name, lower::lower(&env, &body))).collect();

    let checked = infer_top(&env, &program.main, &mut fresh)?;
    let ir = lower::lower(&env, &checked.body);
    Ok(assemble_program_with_defs(&ir, &lowered_defs, &constructors))
}

fn process_decl(
    env: Env,
    decl: &Decl,
    constructors: &mut FxHashMap<String, ConstructorInfo>,
    fresh: &mut FreshSource,
) -> Result<(Env, Vec<(String, Vec<Elab>)>), CoreError> {
    match decl {
        Decl::Func { name, body, .. } => {
            let mut results = infer_and_generalize(&env, std::slice::from_ref(name), &[body.clone()], fresh)?;
            let (scheme, elab_body) = results.pop().expect("one name in, one result out");
            Ok((env.with(name.clone(), EnvEntry::Function(scheme)), vec![(name.clone(), elab_body)]))
        }
        Decl::RecFuncs { funcs, .. } => {
            let names: Vec<String> = funcs.iter().map(|(n, _, _)| n.clone()).collect();
            let bodies: Vec<Vec<_>> = funcs.iter().map(|(_, _, b)| b.clone()).collect();
            let results = infer_and_generalize(&env, &names, &bodies, fresh)?;
            let new_defs: Vec<(String, Vec<Elab>)> =
                names.iter().cloned().zip(results.iter().map(|(_, b)| b.clone())).collect();
            let env = env.with_all(names.into_iter().zip(results.into_iter().map(|(s, _)| EnvEntry::Function(s))));
            Ok((env, new_defs))
        }
        Decl::Instance { name, body, .. } => {
            let mut results = infer_and_generalize(&env, std::slice::from_ref(name), &[body.clone()], fresh)?;
            let (scheme, elab_body) = results.pop().expect("one name in, one result out");
            Ok((env.with(name.clone(), EnvEntry::Function(scheme)), vec![(name.clone(), elab_body)]))
        }
        Decl::Overload { name, predicate_name, instances, .. } => {
            let resolved_instances = instances
                .iter()
                .filter_map(|inst_name| match env.lookup_word(inst_name) {
                    Some(EnvEntry::Function(scheme)) => {
                        Some(catena_typeck::env::Instance { scheme: scheme.clone(), function_name: inst_name.clone() })
                    }
                    _ => None,
                })
                .collect::<Vec<_>>();
            let base_scheme = resolved_instances
                .first()
                .map(|i| i.scheme.clone())
                .unwrap_or_else(|| Scheme::mono(fresh.fresh_var(Kind::Value)));
            let env = env.with(
                name.clone(),
                EnvEntry::Overload { predicate_name: predicate_name.clone(), base_scheme, instances: resolved_instances },
            );
            Ok((env, vec![]))
        }
        Decl::Type { name, .. } | Decl::Tag { type_name: name, .. } => {
            Ok((env.with(name.clone(), EnvEntry::TypeCtor(Kind::Value)), vec![]))
        }
        Decl::RecTypes { types, .. } => {
            let env = env.with_all(types.iter().map(|(name, _, _)| (name.clone(), EnvEntry::TypeCtor(Kind::Value))));
            Ok((env, vec![]))
        }
        Decl::Pattern { name, .. } => {
            let id = constructors.len() as u32;
            constructors.insert(name.clone(), ConstructorInfo { id, arity: 0 });
            let scheme = Scheme::mono(fresh.fresh_var(Kind::Value));
            let env = env.with(name.clone(), EnvEntry::Constructor { pattern_scheme: scheme.clone(), value_scheme: scheme });
            Ok((env, vec![]))
        }
        Decl::PropagationRule { name, .. } => {
            // Predicate-level CHR rules are authored over `PredicateExpr`
            // (surface syntax); resolving one into `ty::Predicate` needs the
            // same out-of-scope kind information as a `TypeExpr`. Registered
            // as an empty rule purely so the name is not silently dropped.
            let rule = catena_typeck::chr::Chr::Simplification { name: name.clone(), heads: vec![], body: vec![] };
            Ok((env.with(name.clone(), EnvEntry::Rule(rule)), vec![]))
        }
        Decl::Effect { handlers, .. } => {
            let env = env.with_all(
                handlers.iter().map(|h| (h.clone(), EnvEntry::Variable(Scheme::mono(fresh.fresh_var(Kind::Value))))),
            );
            Ok((env, vec![]))
        }
        Decl::Test { .. } | Decl::Law { .. } | Decl::Check { .. } => Ok((env, vec![])),
    }
}

/// Infer and generalize a group of mutually-recursive top-level bodies, in
/// the same shape `infer_let_recs` uses for a local `letrecs` group, but
/// binding into the persistent top-level environment rather than a local
/// one. Returns each body's generalized scheme alongside its (already
/// placeholder-resolved) elaborated form, so the caller can both register
/// the scheme in the environment and later lower the body to its own
/// bytecode block.
fn infer_and_generalize(
    env: &Env,
    names: &[String],
    bodies: &[Vec<catena_common::ast::Word>],
    fresh: &mut FreshSource,
) -> Result<Vec<(Scheme, Vec<Elab>)>, CoreError> {
    let mut rec_env = env.clone();
    for name in names {
        rec_env = rec_env.with(name.clone(), EnvEntry::Recursive(Scheme::mono(fresh_fun_placeholder(fresh))));
    }

    let mut fn_types = Vec::new();
    let mut elab_bodies = Vec::new();
    for body in bodies {
        let checked = infer_top(&rec_env, body, fresh)?;
        let fn_ty = Type::fun(
            checked.word_type.inputs,
            checked.word_type.outputs,
            checked.word_type.effect,
            checked.word_type.permission,
            checked.word_type.sharing,
        );
        fn_types.push(fn_ty);
        elab_bodies.push(checked.body);
    }

    let env_vars = env.free_vars();
    let schemes = fn_types.into_iter().map(|ty| Scheme::generalize(QualType::unqualified(ty), &env_vars));
    Ok(schemes.zip(elab_bodies).collect())
}
