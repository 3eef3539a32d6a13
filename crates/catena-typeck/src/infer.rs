//! Type inference over word sequences (`spec.md` §4.G, component G).
//!
//! Grounded on `mesh-typeck/src/infer.rs`'s function-type-per-expression,
//! constraint-emission style: each surface node gets its own `infer_*`
//! helper returning a type plus whatever side information the caller needs,
//! mirroring the teacher's `fn_return_type_stack`/`loop_depth`/
//! `enter_closure`/`exit_closure` pattern for tracking enclosing-context
//! state (reused directly below for `handle`'s `resume` typing and
//! `with-state`'s heap scoping). This core has no expression tree to walk,
//! so the unit of inference is a *word*: each one consumes a prefix of the
//! stack and produces a new one, and composing two adjacent words is
//! exactly unifying the left word's outputs against the right word's
//! inputs (`spec.md` §4.G).

use catena_common::ast::{Handler, IntSize, Pattern, UnitOp, Word};

use crate::abelian::Equation;
use crate::elaborate::{Elab, ElabHandler, Placeholder};
use crate::env::{Env, EnvEntry};
use crate::error::CoreError;
use crate::fresh::FreshSource;
use crate::kind::Kind;
use crate::ty::{KindMismatch, Predicate, QualType, Scheme, SeqElem, Subst, Type, TyCon};
use crate::unify::unify;
use crate::{chr, elaborate};

/// A word's stack effect (`spec.md` §4.G: "each word has a function type
/// `(e, p, t, i -> o)` with sharing attribute"). `inputs`/`outputs` are
/// `Type::Seq` stacks, normally ending in a `SeqElem::Dotted` tail standing
/// for "the rest of the stack, untouched" -- the mechanism stack
/// polymorphism rides on, reusing `unify::unify_seq`'s dotted-absorption
/// directly.
#[derive(Clone, Debug)]
pub struct WordType {
    pub inputs: Type,
    pub outputs: Type,
    pub effect: Type,
    pub permission: Type,
    pub totality: Type,
    pub sharing: Type,
}

fn sub(ty: &Type, s: &Subst) -> Result<Type, CoreError> {
    ty.substitute(s).map_err(kind_err)
}

fn kind_err(m: KindMismatch) -> CoreError {
    CoreError::kind_mismatch(&m.expected, &m.found)
}

fn fresh_stack_tail(fresh: &mut FreshSource) -> Type {
    fresh.fresh_var(Kind::seq(Kind::Value))
}

/// A fully fresh function type: every one of `Type::fun`'s five slots is
/// its own fresh variable, at the kind that slot requires. Used as a
/// recursive binding's placeholder type so that a self-call occurring
/// *inside* the very body being inferred still has a fun-shaped type to
/// decompose via `as_fun` -- a bare `fresh_var(Kind::Value)` would fail
/// `word_type_from_fun` the moment such a call is reached, before the
/// placeholder is ever unified against the body's real inferred type.
pub fn fresh_fun_placeholder(fresh: &mut FreshSource) -> Type {
    Type::fun(
        fresh_stack_tail(fresh),
        fresh_stack_tail(fresh),
        fresh.fresh_var(Kind::row(Kind::Effect)),
        fresh.fresh_var(Kind::row(Kind::Permission)),
        fresh.fresh_var(Kind::Sharing),
    )
}

/// Build a `Type::Seq` of `elems` (top-of-stack first) followed by a
/// dotted `tail`.
fn stack_of(elems: Vec<Type>, tail: Type) -> Type {
    let mut seq: Vec<SeqElem> = elems.into_iter().map(SeqElem::Indexed).collect();
    seq.push(SeqElem::Dotted(tail));
    Type::Seq(seq)
}

fn prepend(elem: Type, seq: &Type) -> Type {
    match seq {
        Type::Seq(elems) => {
            let mut new = Vec::with_capacity(elems.len() + 1);
            new.push(SeqElem::Indexed(elem));
            new.extend(elems.clone());
            Type::Seq(new)
        }
        other => Type::Seq(vec![SeqElem::Indexed(elem), SeqElem::Dotted(other.clone())]),
    }
}

/// A word that consumes `consumes` (top-first) and produces `produces`
/// (top-first) off the same, otherwise-untouched stack tail, with a fresh
/// effect/permission row, total and unshared by default.
fn simple(consumes: Vec<Type>, produces: Vec<Type>, fresh: &mut FreshSource) -> WordType {
    let tail = fresh_stack_tail(fresh);
    WordType {
        inputs: stack_of(consumes, tail.clone()),
        outputs: stack_of(produces, tail),
        effect: fresh.fresh_var(Kind::row(Kind::Effect)),
        permission: fresh.fresh_var(Kind::row(Kind::Permission)),
        totality: Type::True,
        sharing: Type::False,
    }
}

/// `a AND b` over the `True`/`False`/variable three-way totality lattice:
/// short-circuit on a concrete operand, otherwise force equality (the
/// variable case has no other constraint to fall back on).
fn bool_and(a: &Type, b: &Type, fresh: &mut FreshSource) -> Result<(Type, Subst), CoreError> {
    match (a, b) {
        (Type::False, _) | (_, Type::False) => Ok((Type::False, Subst::empty())),
        (Type::True, other) | (other, Type::True) => Ok((other.clone(), Subst::empty())),
        _ => {
            let s = unify(a, b, fresh)?;
            Ok((sub(a, &s)?, s))
        }
    }
}

/// `a OR b` over the sharing lattice, dual to `bool_and`.
fn bool_or(a: &Type, b: &Type, fresh: &mut FreshSource) -> Result<(Type, Subst), CoreError> {
    match (a, b) {
        (Type::True, _) | (_, Type::True) => Ok((Type::True, Subst::empty())),
        (Type::False, other) | (other, Type::False) => Ok((other.clone(), Subst::empty())),
        _ => {
            let s = unify(a, b, fresh)?;
            Ok((sub(a, &s)?, s))
        }
    }
}

/// Compose two adjacent words' stack effects left-to-right: unify the
/// left's outputs against the right's inputs, unify the effect and
/// permission rows, `AND` totality, `OR` sharing (`spec.md` §4.G). The
/// running substitution is threaded the same way `unify::solve_all`
/// threads its own (`step.compose(&running)`), then applied once at the
/// end to build the composed result.
fn compose(left: &WordType, right: &WordType, fresh: &mut FreshSource) -> Result<(WordType, Subst), CoreError> {
    let mut subst = unify(&left.outputs, &right.inputs, fresh)?;

    let s = unify(&sub(&left.effect, &subst)?, &sub(&right.effect, &subst)?, fresh)?;
    subst = s.compose(&subst);

    let s = unify(&sub(&left.permission, &subst)?, &sub(&right.permission, &subst)?, fresh)?;
    subst = s.compose(&subst);

    let (_, s) = bool_and(&sub(&left.totality, &subst)?, &sub(&right.totality, &subst)?, fresh)?;
    subst = s.compose(&subst);

    let (_, s) = bool_or(&sub(&left.sharing, &subst)?, &sub(&right.sharing, &subst)?, fresh)?;
    subst = s.compose(&subst);

    // Recompute each component against the final substitution rather than
    // the partial ones captured mid-composition above.
    let (totality, _) = bool_and(&sub(&left.totality, &subst)?, &sub(&right.totality, &subst)?, fresh)?;
    let (sharing, _) = bool_or(&sub(&left.sharing, &subst)?, &sub(&right.sharing, &subst)?, fresh)?;

    Ok((
        WordType {
            inputs: sub(&left.inputs, &subst)?,
            outputs: sub(&right.outputs, &subst)?,
            effect: sub(&left.effect, &subst)?,
            permission: sub(&left.permission, &subst)?,
            totality: sub(&totality, &subst)?,
            sharing: sub(&sharing, &subst)?,
        },
        subst,
    ))
}

/// Infer a whole word sequence left-to-right, folding `compose` over each
/// word's own inferred type.
pub fn infer_words(env: &Env, words: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Vec<Elab>), CoreError> {
    let mut iter = words.iter();
    let Some(first) = iter.next() else {
        return Ok((simple(vec![], vec![], fresh), vec![]));
    };
    let (mut acc, elab0) = infer_word(env, first, fresh)?;
    let mut elabs = vec![elab0];
    for word in iter {
        let (wt, elab) = infer_word(env, word, fresh)?;
        let (composed, _subst) = compose(&acc, &wt, fresh)?;
        acc = composed;
        elabs.push(elab);
    }
    Ok((acc, elabs))
}

fn infer_word(env: &Env, word: &Word, fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    match word {
        Word::PushInt { digits, size, .. } => Ok(infer_push_int(digits, *size, fresh)),
        Word::PushBool { value, .. } => Ok(infer_push_bool(*value, fresh)),
        Word::Ident { name, span } => infer_ident(env, name, *span, fresh),
        Word::Statements { bindings, body, .. } => infer_statements(env, bindings, body, fresh),
        Word::If { then, else_, .. } => infer_if(env, then, else_, fresh),
        Word::While { cond, body, .. } => infer_while(env, cond, body, fresh),
        Word::FunctionLiteral { body, .. } => infer_function_literal(env, body, fresh),
        Word::LetRecs { names, bodies, body, .. } => infer_let_recs(env, names, bodies, body, fresh),
        Word::Handle { params, body, handlers, return_, .. } => {
            infer_handle(env, params, body, handlers, return_, fresh)
        }
        Word::NewRef { .. } => Ok((infer_new_ref(fresh), Elab::NewRef)),
        Word::GetRef { .. } => Ok((infer_get_ref(fresh), Elab::GetRef)),
        Word::PutRef { .. } => Ok((infer_put_ref(fresh), Elab::PutRef)),
        Word::WithState { body, .. } => infer_with_state(env, body, fresh),
        Word::UnitOp { op, unit, .. } => Ok((infer_unit_op(*op, unit, fresh), Elab::UnitOp(*op, unit.clone()))),
        Word::RecordExtend { label, .. } => {
            Ok((infer_record_extend(label, fresh), Elab::RecordExtend(label.clone())))
        }
        Word::RecordSelect { label, .. } => {
            Ok((infer_record_select(label, fresh), Elab::RecordSelect(label.clone())))
        }
        Word::RecordRestrict { label, .. } => {
            Ok((infer_record_restrict(label, fresh), Elab::RecordRestrict(label.clone())))
        }
        Word::VariantLiteral { label, .. } => {
            Ok((infer_variant_literal(label, fresh), Elab::VariantLiteral(label.clone())))
        }
        Word::Case { label, then, else_, .. } => infer_case(env, label, then, else_, fresh),
    }
}

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

fn infer_push_int(digits: &str, size: IntSize, fresh: &mut FreshSource) -> (WordType, Elab) {
    (simple(vec![], vec![int_type(size)], fresh), Elab::PushInt(digits.to_string(), size))
}

fn infer_push_bool(value: bool, fresh: &mut FreshSource) -> (WordType, Elab) {
    (simple(vec![], vec![bool_type()], fresh), Elab::PushBool(value))
}

/// A scheme's function type decomposed into a `WordType`. Individual
/// bindings don't carry their own totality in their stored `Type::fun`
/// encoding (there is no totality slot in that spine) -- by the time a
/// name is looked up it has already been checked once, so a call to it is
/// treated as total from the caller's point of view.
fn word_type_from_fun(ty: &Type) -> Result<WordType, CoreError> {
    let (inputs, outputs, effect, permission, sharing) = ty
        .as_fun()
        .ok_or_else(|| CoreError::kind_mismatch(&Kind::Value, &ty.kind_of().unwrap_or(Kind::Value)))?;
    Ok(WordType {
        inputs: inputs.clone(),
        outputs: outputs.clone(),
        effect: effect.clone(),
        permission: permission.clone(),
        totality: Type::True,
        sharing: sharing.clone(),
    })
}

/// Wrap the remaining context predicates of an instantiated scheme as
/// `OverloadPlaceholder`s pushed before the identifier itself
/// (`spec.md` §4.G/§4.H).
fn wrap_context(name_elab: Elab, context: &[Predicate]) -> Elab {
    if context.is_empty() {
        return name_elab;
    }
    let mut body: Vec<Elab> =
        context.iter().map(|p| Elab::Placeholder(Placeholder::Overload(p.clone()))).collect();
    body.push(name_elab);
    Elab::Statements { bindings: vec![], body }
}

fn infer_ident(env: &Env, name: &str, span: catena_common::Span, fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    match env.lookup_word(name) {
        Some(EnvEntry::Overload { predicate_name, base_scheme, .. }) => {
            let (ty, context) = base_scheme.instantiate(fresh).map_err(kind_err)?;
            let wt = word_type_from_fun(&ty)?;
            let (first, rest) = context
                .split_first()
                .ok_or_else(|| CoreError::instance_not_found(predicate_name))?;
            let method = Elab::Placeholder(Placeholder::Method(name.to_string(), first.clone()));
            Ok((wt, wrap_context(method, rest)))
        }
        Some(EnvEntry::Recursive(scheme)) => {
            let (ty, context) = scheme.instantiate(fresh).map_err(kind_err)?;
            let wt = word_type_from_fun(&ty)?;
            let recur = Elab::Placeholder(Placeholder::Recursive(name.to_string(), ty));
            Ok((wt, wrap_context(recur, &context)))
        }
        Some(EnvEntry::Variable(scheme)) | Some(EnvEntry::Function(scheme)) => {
            let (ty, context) = scheme.instantiate(fresh).map_err(kind_err)?;
            let wt = word_type_from_fun(&ty)?;
            Ok((wt, wrap_context(Elab::Ident(name.to_string()), &context)))
        }
        _ => Err(CoreError::unbound_name(name, span)),
    }
}

/// Pop a single value off the top of a stack type, returning it and the
/// remaining (fresh-tailed) stack.
fn pop_one(outputs: &Type, fresh: &mut FreshSource) -> Result<(Type, Type), CoreError> {
    let elem = fresh.fresh_var(Kind::Value);
    let tail = fresh_stack_tail(fresh);
    let pattern = stack_of(vec![elem.clone()], tail.clone());
    let s = unify(outputs, &pattern, fresh)?;
    Ok((sub(&elem, &s)?, sub(&tail, &s)?))
}

fn seq_single(ty: &Type) -> Result<Type, CoreError> {
    match ty {
        Type::Seq(elems) if elems.len() == 1 => match &elems[0] {
            SeqElem::Indexed(t) | SeqElem::Dotted(t) => Ok(t.clone()),
        },
        other => Err(CoreError::rigid_rigid("<single-value stack>", &other.to_string())),
    }
}

/// Infer a pattern's matched type, the variable bindings it introduces,
/// and the join (`OR`) of its arguments' sharing, used by `let`-bindings
/// and `handle`/`case` parameter lists (`spec.md` §4.G).
fn infer_pattern(env: &Env, pattern: &Pattern, fresh: &mut FreshSource) -> Result<(Type, Vec<(String, Type)>, Type), CoreError> {
    match pattern {
        Pattern::Wildcard { .. } => Ok((fresh.fresh_var(Kind::Value), vec![], Type::False)),
        Pattern::Var { name, .. } => {
            let ty = fresh.fresh_var(Kind::Value);
            Ok((ty.clone(), vec![(name.clone(), ty)], Type::False))
        }
        Pattern::Constructor { name, args, span } => {
            let entry = env.lookup_pattern(name).ok_or_else(|| CoreError::unbound_name(name, *span))?;
            let EnvEntry::Constructor { pattern_scheme, .. } = entry else {
                return Err(CoreError::unbound_name(name, *span));
            };
            let (scheme_ty, _context) = pattern_scheme.instantiate(fresh).map_err(kind_err)?;
            let (inputs, outputs, ..) = scheme_ty
                .as_fun()
                .ok_or_else(|| CoreError::kind_mismatch(&Kind::Value, &Kind::Value))?;
            let arg_vars: Vec<Type> = (0..args.len()).map(|_| fresh.fresh_var(Kind::Value)).collect();
            let probe = Type::Seq(arg_vars.iter().cloned().map(SeqElem::Indexed).collect());
            let s0 = unify(inputs, &probe, fresh)?;

            let mut bindings = Vec::new();
            let mut sharing = Type::False;
            for (sub_pattern, expected) in args.iter().zip(arg_vars.iter()) {
                let expected = sub(expected, &s0)?;
                let (sub_ty, sub_bindings, sub_sharing) = infer_pattern(env, sub_pattern, fresh)?;
                let s1 = unify(&sub_ty, &expected, fresh)?;
                for (n, t) in sub_bindings {
                    bindings.push((n, sub(&t, &s1)?));
                }
                let (joined, _) = bool_or(&sharing, &sub_sharing, fresh)?;
                sharing = joined;
            }
            let value_ty = seq_single(outputs)?;
            Ok((value_ty, bindings, sharing))
        }
    }
}

fn infer_statements(
    env: &Env,
    bindings: &[(Pattern, Vec<Word>)],
    body: &[Word],
    fresh: &mut FreshSource,
) -> Result<(WordType, Elab), CoreError> {
    let mut scope = env.clone();
    let mut acc: Option<WordType> = None;
    let mut elab_bindings = Vec::new();

    for (pattern, rhs) in bindings {
        let (rhs_wt, rhs_elabs) = infer_words(&scope, rhs, fresh)?;
        let (elem, tail) = pop_one(&rhs_wt.outputs, fresh)?;
        let (pattern_ty, pat_bindings, pat_sharing) = infer_pattern(&scope, pattern, fresh)?;
        let s = unify(&elem, &pattern_ty, fresh)?;
        for (name, ty) in pat_bindings {
            scope = scope.with(name, EnvEntry::Variable(Scheme::mono(sub(&ty, &s)?)));
        }

        let (sharing, _) = bool_or(&sub(&rhs_wt.sharing, &s)?, &sub(&pat_sharing, &s)?, fresh)?;
        let popped = WordType {
            inputs: sub(&rhs_wt.inputs, &s)?,
            outputs: sub(&tail, &s)?,
            effect: sub(&rhs_wt.effect, &s)?,
            permission: sub(&rhs_wt.permission, &s)?,
            totality: sub(&rhs_wt.totality, &s)?,
            sharing,
        };
        acc = Some(match acc {
            None => popped,
            Some(prev) => compose(&prev, &popped, fresh)?.0,
        });
        elab_bindings.push((pattern.clone(), rhs_elabs));
    }

    let (body_wt, body_elabs) = infer_words(&scope, body, fresh)?;
    let final_wt = match acc {
        None => body_wt,
        Some(prev) => compose(&prev, &body_wt, fresh)?.0,
    };
    Ok((final_wt, Elab::Statements { bindings: elab_bindings, body: body_elabs }))
}

fn infer_if(env: &Env, then: &[Word], else_: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    let (then_wt, then_elabs) = infer_words(env, then, fresh)?;
    let (else_wt, else_elabs) = infer_words(env, else_, fresh)?;

    let mut subst = unify(&then_wt.inputs, &else_wt.inputs, fresh)?;
    let s = unify(&sub(&then_wt.outputs, &subst)?, &sub(&else_wt.outputs, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&then_wt.effect, &subst)?, &sub(&else_wt.effect, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&then_wt.permission, &subst)?, &sub(&else_wt.permission, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let (totality, s) = bool_and(&sub(&then_wt.totality, &subst)?, &sub(&else_wt.totality, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let (sharing, s) = bool_or(&sub(&then_wt.sharing, &subst)?, &sub(&else_wt.sharing, &subst)?, fresh)?;
    subst = s.compose(&subst);

    let wt = WordType {
        inputs: prepend(bool_type(), &sub(&then_wt.inputs, &subst)?),
        outputs: sub(&then_wt.outputs, &subst)?,
        effect: sub(&then_wt.effect, &subst)?,
        permission: sub(&then_wt.permission, &subst)?,
        totality: sub(&totality, &subst)?,
        sharing: sub(&sharing, &subst)?,
    };
    Ok((wt, Elab::If { then: then_elabs, else_: else_elabs }))
}

fn infer_while(env: &Env, cond: &[Word], body: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    let (cond_wt, cond_elabs) = infer_words(env, cond, fresh)?;
    let mut subst = unify(&cond_wt.outputs, &prepend(bool_type(), &cond_wt.inputs), fresh)?;

    let (body_wt, body_elabs) = infer_words(env, body, fresh)?;
    let s = unify(&sub(&body_wt.inputs, &subst)?, &sub(&cond_wt.inputs, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&body_wt.outputs, &subst)?, &sub(&cond_wt.inputs, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&cond_wt.effect, &subst)?, &sub(&body_wt.effect, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&cond_wt.permission, &subst)?, &sub(&body_wt.permission, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let (sharing, s) = bool_or(&sub(&cond_wt.sharing, &subst)?, &sub(&body_wt.sharing, &subst)?, fresh)?;
    subst = s.compose(&subst);

    let wt = WordType {
        inputs: sub(&cond_wt.inputs, &subst)?,
        outputs: sub(&cond_wt.inputs, &subst)?,
        effect: sub(&cond_wt.effect, &subst)?,
        permission: sub(&cond_wt.permission, &subst)?,
        // a loop may not terminate regardless of its condition's and
        // body's own totality.
        totality: Type::False,
        sharing: sub(&sharing, &subst)?,
    };
    Ok((wt, Elab::While { cond: cond_elabs, body: body_elabs }))
}

fn infer_function_literal(env: &Env, body: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    let (body_wt, body_elabs) = infer_words(env, body, fresh)?;
    let fn_ty = Type::fun(body_wt.inputs, body_wt.outputs, body_wt.effect, body_wt.permission, body_wt.sharing);
    Ok((simple(vec![], vec![fn_ty], fresh), Elab::FunctionLiteral(body_elabs)))
}

fn infer_let_recs(
    env: &Env,
    names: &[String],
    bodies: &[Vec<Word>],
    body: &[Word],
    fresh: &mut FreshSource,
) -> Result<(WordType, Elab), CoreError> {
    let mut rec_env = env.clone();
    let mut placeholders = Vec::new();
    for name in names {
        let ty = fresh_fun_placeholder(fresh);
        rec_env = rec_env.with(name.clone(), EnvEntry::Recursive(Scheme::mono(ty.clone())));
        placeholders.push(ty);
    }

    let mut elab_bodies = Vec::new();
    let mut subst = Subst::empty();
    let mut fn_types = Vec::new();
    for (placeholder_ty, rec_body) in placeholders.iter().zip(bodies.iter()) {
        let (body_wt, body_elabs) = infer_words(&rec_env, rec_body, fresh)?;
        let fn_ty =
            Type::fun(body_wt.inputs, body_wt.outputs, body_wt.effect, body_wt.permission, body_wt.sharing);
        let s = unify(&sub(placeholder_ty, &subst)?, &sub(&fn_ty, &subst)?, fresh)?;
        subst = s.compose(&subst);
        elab_bodies.push(body_elabs);
        fn_types.push(fn_ty);
    }

    let env_vars = env.free_vars();
    let mut final_env = env.clone();
    for (name, fn_ty) in names.iter().zip(fn_types.iter()) {
        let fn_ty = sub(fn_ty, &subst)?;
        let scheme = Scheme::generalize(QualType::unqualified(fn_ty), &env_vars);
        final_env = final_env.with(name.clone(), EnvEntry::Function(scheme));
    }

    let (body_wt, final_body_elabs) = infer_words(&final_env, body, fresh)?;
    Ok((
        body_wt,
        Elab::LetRecs { names: names.to_vec(), bodies: elab_bodies, body: final_body_elabs },
    ))
}

fn ref_type(heap: Type, value: Type) -> Type {
    let con = TyCon::new("Ref", Kind::arrow(Kind::Heap, Kind::arrow(Kind::Value, Kind::Value)));
    Type::App(Box::new(Type::App(Box::new(Type::Con(con)), Box::new(heap))), Box::new(value))
}

fn infer_new_ref(fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let heap = fresh.fresh_var(Kind::Heap);
    simple(vec![value.clone()], vec![ref_type(heap, value)], fresh)
}

fn infer_get_ref(fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let heap = fresh.fresh_var(Kind::Heap);
    simple(vec![ref_type(heap, value.clone())], vec![value], fresh)
}

fn infer_put_ref(fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let heap = fresh.fresh_var(Kind::Heap);
    simple(vec![ref_type(heap, value.clone()), value], vec![], fresh)
}

/// `with-state` checks that no `Ref` created inside `body` escapes in its
/// outputs: any `Heap`-kinded variable free in `body`'s outputs that was
/// not already free in the surrounding environment must have been
/// introduced locally (`spec.md` §7's `HeapEscape`).
fn infer_with_state(env: &Env, body: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    let (body_wt, body_elabs) = infer_words(env, body, fresh)?;
    let outer_vars = env.free_vars();
    for var in body_wt.outputs.free_vars() {
        if var.kind == Kind::Heap && !outer_vars.contains(&var) {
            return Err(CoreError::heap_escape(&var.name));
        }
    }
    Ok((body_wt, Elab::WithState(body_elabs)))
}

fn measure_type(base: Type, unit: Type) -> Type {
    let con = TyCon::new("Measure", Kind::arrow(Kind::Value, Kind::arrow(Kind::Unit, Kind::Value)));
    Type::App(Box::new(Type::App(Box::new(Type::Con(con)), Box::new(base))), Box::new(unit))
}

fn infer_unit_op(op: UnitOp, unit: &str, fresh: &mut FreshSource) -> WordType {
    let base = fresh.fresh_var(Kind::Value);
    let in_unit = fresh.fresh_var(Kind::Unit);
    let in_name = match &in_unit {
        Type::Var(v) => v.name.clone(),
        _ => unreachable!("fresh_var always produces Type::Var"),
    };
    let out_unit = match op {
        UnitOp::Untag => Type::AbelianOne,
        UnitOp::By => Type::Abelian(Kind::Unit, Equation::var(in_name).add(&Equation::constant(unit))),
        UnitOp::Per => {
            Type::Abelian(Kind::Unit, Equation::var(in_name).add(&Equation::constant(unit).invert()))
        }
    };
    simple(vec![measure_type(base.clone(), in_unit)], vec![measure_type(base, out_unit)], fresh)
}

fn record_type(row: Type) -> Type {
    let con = TyCon::new("Record", Kind::arrow(Kind::row(Kind::Value), Kind::Value));
    Type::App(Box::new(Type::Con(con)), Box::new(row))
}

fn variant_type(row: Type) -> Type {
    let con = TyCon::new("Variant", Kind::arrow(Kind::row(Kind::Value), Kind::Value));
    Type::App(Box::new(Type::Con(con)), Box::new(row))
}

fn infer_record_extend(label: &str, fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let row = fresh.fresh_var(Kind::row(Kind::Value));
    let extended = Type::RowExtend(label.to_string(), Box::new(value.clone()), Box::new(row.clone()));
    simple(vec![value, record_type(row)], vec![record_type(extended)], fresh)
}

fn infer_record_select(label: &str, fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let tail = fresh.fresh_var(Kind::row(Kind::Value));
    let row = Type::RowExtend(label.to_string(), Box::new(value.clone()), Box::new(tail));
    simple(vec![record_type(row)], vec![value], fresh)
}

fn infer_record_restrict(label: &str, fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let tail = fresh.fresh_var(Kind::row(Kind::Value));
    let row = Type::RowExtend(label.to_string(), Box::new(value), Box::new(tail.clone()));
    simple(vec![record_type(row)], vec![record_type(tail)], fresh)
}

fn infer_variant_literal(label: &str, fresh: &mut FreshSource) -> WordType {
    let value = fresh.fresh_var(Kind::Value);
    let tail = fresh.fresh_var(Kind::row(Kind::Value));
    let row = Type::RowExtend(label.to_string(), Box::new(value.clone()), Box::new(tail));
    simple(vec![value], vec![variant_type(row)], fresh)
}

fn infer_case(env: &Env, label: &str, then: &[Word], else_: &[Word], fresh: &mut FreshSource) -> Result<(WordType, Elab), CoreError> {
    let (then_wt, then_elabs) = infer_words(env, then, fresh)?;
    let (else_wt, else_elabs) = infer_words(env, else_, fresh)?;

    let mut subst = unify(&then_wt.outputs, &else_wt.outputs, fresh)?;
    let s = unify(&sub(&then_wt.effect, &subst)?, &sub(&else_wt.effect, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let s = unify(&sub(&then_wt.permission, &subst)?, &sub(&else_wt.permission, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let (totality, s) = bool_and(&sub(&then_wt.totality, &subst)?, &sub(&else_wt.totality, &subst)?, fresh)?;
    subst = s.compose(&subst);
    let (sharing, s) = bool_or(&sub(&then_wt.sharing, &subst)?, &sub(&else_wt.sharing, &subst)?, fresh)?;
    subst = s.compose(&subst);

    // `then` receives the matched payload on top of the narrowed stack;
    // `else_` receives the narrowed variant itself. Both describe the same
    // underlying stack once that one-element difference is unified away.
    let value = fresh.fresh_var(Kind::Value);
    let tail_row = fresh.fresh_var(Kind::row(Kind::Value));
    let full_row = Type::RowExtend(label.to_string(), Box::new(value.clone()), Box::new(tail_row));

    let s = unify(
        &sub(&then_wt.inputs, &subst)?,
        &prepend(value, &sub(&else_wt.inputs, &subst)?),
        fresh,
    )?;
    subst = s.compose(&subst);

    let wt = WordType {
        inputs: prepend(variant_type(sub(&full_row, &subst)?), &sub(&else_wt.inputs, &subst)?),
        outputs: sub(&then_wt.outputs, &subst)?,
        effect: sub(&then_wt.effect, &subst)?,
        permission: sub(&then_wt.permission, &subst)?,
        totality: sub(&totality, &subst)?,
        sharing: sub(&sharing, &subst)?,
    };
    Ok((wt, Elab::Case { label: label.to_string(), then: then_elabs, else_: else_elabs }))
}

fn infer_handle(
    env: &Env,
    params: &[Pattern],
    body: &[Word],
    handlers: &[Handler],
    return_: &Option<(Pattern, Vec<Word>)>,
    fresh: &mut FreshSource,
) -> Result<(WordType, Elab), CoreError> {
    let mut handle_env = env.clone();
    for p in params {
        let (ty, bindings, _sharing) = infer_pattern(&handle_env, p, fresh)?;
        let _ = ty;
        for (name, var_ty) in bindings {
            handle_env = handle_env.with(name, EnvEntry::Variable(Scheme::mono(var_ty)));
        }
    }

    let (body_wt, body_elabs) = infer_words(&handle_env, body, fresh)?;

    let mut elab_handlers = Vec::new();
    let mut subst = Subst::empty();
    let mut effect_row = body_wt.effect.clone();
    for handler in handlers {
        let mut op_env = handle_env.clone();
        for p in &handler.params {
            let (_ty, bindings, _sharing) = infer_pattern(&op_env, p, fresh)?;
            for (name, var_ty) in bindings {
                op_env = op_env.with(name, EnvEntry::Variable(Scheme::mono(var_ty)));
            }
        }
        // `resume` completes the handled computation exactly as falling
        // off the end of `body` would: a one-shot resumption back to the
        // point of the effect call (`spec.md` §4.G).
        let resume_ty = Type::fun(
            stack_of(vec![fresh.fresh_var(Kind::Value)], fresh_stack_tail(fresh)),
            body_wt.outputs.clone(),
            fresh.fresh_var(Kind::row(Kind::Effect)),
            fresh.fresh_var(Kind::row(Kind::Permission)),
            Type::False,
        );
        op_env = op_env.with("resume", EnvEntry::Function(Scheme::mono(resume_ty)));

        let (op_wt, op_elabs) = infer_words(&op_env, &handler.body, fresh)?;
        let s = unify(&sub(&op_wt.outputs, &subst)?, &sub(&body_wt.outputs, &subst)?, fresh)?;
        subst = s.compose(&subst);

        if let Some(stripped) = strip_label(&sub(&effect_row, &subst)?, &handler.operation) {
            effect_row = stripped;
        }

        elab_handlers.push(ElabHandler {
            operation: handler.operation.clone(),
            params: handler.params.clone(),
            body: op_elabs,
        });
    }

    let (return_elab, return_outputs) = match return_ {
        Some((pattern, return_body)) => {
            let (elem, tail) = pop_one(&sub(&body_wt.outputs, &subst)?, fresh)?;
            let (pattern_ty, pat_bindings, _sharing) = infer_pattern(&handle_env, pattern, fresh)?;
            let s = unify(&elem, &pattern_ty, fresh)?;
            subst = s.compose(&subst);
            let mut return_env = handle_env.clone();
            for (name, ty) in pat_bindings {
                return_env = return_env.with(name, EnvEntry::Variable(Scheme::mono(sub(&ty, &subst)?)));
            }
            let (return_wt, return_elabs) = infer_words(&return_env, return_body, fresh)?;
            let s = unify(&sub(&tail, &subst)?, &sub(&return_wt.inputs, &subst)?, fresh)?;
            subst = s.compose(&subst);
            (Some((pattern.clone(), return_elabs)), sub(&return_wt.outputs, &subst)?)
        }
        None => (None, sub(&body_wt.outputs, &subst)?),
    };

    let wt = WordType {
        inputs: sub(&body_wt.inputs, &subst)?,
        outputs: return_outputs,
        effect: sub(&effect_row, &subst)?,
        permission: sub(&body_wt.permission, &subst)?,
        totality: sub(&body_wt.totality, &subst)?,
        sharing: sub(&body_wt.sharing, &subst)?,
    };
    Ok((
        wt,
        Elab::Handle { params: params.to_vec(), body: body_elabs, handlers: elab_handlers, return_: return_elab },
    ))
}

/// Remove the first occurrence of `label` from an effect/permission row,
/// leaving the rest in place. `None` if `label` is not present (the
/// handler then leaves the row untouched -- it is handling an operation
/// the row never recorded, which is itself presumably caught elsewhere).
fn strip_label(row: &Type, label: &str) -> Option<Type> {
    match row {
        Type::RowExtend(l, _, tail) if l == label => Some((**tail).clone()),
        Type::RowExtend(l, elem, tail) => {
            strip_label(tail, label).map(|rest| Type::RowExtend(l.clone(), elem.clone(), Box::new(rest)))
        }
        _ => None,
    }
}

/// The result of fully checking a top-level word sequence: its inferred
/// type and its elaborated, placeholder-free body.
pub struct Checked {
    pub word_type: WordType,
    pub body: Vec<Elab>,
}

/// Run inference over a top-level word sequence (a function body or the
/// `main` body), then discharge every overload placeholder it produced
/// through the CHR solver and elaboration (`spec.md` §4.F/§4.G/§4.H
/// wired together, as `infer.rs` is specified to do for each top-level
/// definition).
pub fn infer_top(env: &Env, words: &[Word], fresh: &mut FreshSource) -> Result<Checked, CoreError> {
    let (word_type, elabs) = infer_words(env, words, fresh)?;
    let predicates = collect_predicates(&elabs);
    let rules = env.rules();
    let solved = chr::solve(predicates, &rules)?;

    let head = Type::fun(
        word_type.inputs.clone(),
        word_type.outputs.clone(),
        word_type.effect.clone(),
        word_type.permission.clone(),
        word_type.sharing.clone(),
    );
    chr::check_ambiguous(&head, &solved.predicates)?;

    let body = elaborate::resolve(&elabs, env, &solved.subst)?;
    Ok(Checked { word_type, body })
}

fn collect_predicates(elabs: &[Elab]) -> Vec<Predicate> {
    let mut out = Vec::new();
    collect_predicates_into(elabs, &mut out);
    out
}

fn collect_predicates_into(elabs: &[Elab], out: &mut Vec<Predicate>) {
    for e in elabs {
        collect_one(e, out);
    }
}

fn collect_one(e: &Elab, out: &mut Vec<Predicate>) {
    match e {
        Elab::Placeholder(Placeholder::Overload(p)) => out.push(p.clone()),
        Elab::Placeholder(Placeholder::Method(_, p)) => out.push(p.clone()),
        Elab::Placeholder(Placeholder::Recursive(..)) => {}
        Elab::Statements { bindings, body } => {
            for (_, b) in bindings {
                collect_predicates_into(b, out);
            }
            collect_predicates_into(body, out);
        }
        Elab::If { then, else_ } => {
            collect_predicates_into(then, out);
            collect_predicates_into(else_, out);
        }
        Elab::Case { then, else_, .. } => {
            collect_predicates_into(then, out);
            collect_predicates_into(else_, out);
        }
        Elab::While { cond, body } => {
            collect_predicates_into(cond, out);
            collect_predicates_into(body, out);
        }
        Elab::FunctionLiteral(body) | Elab::WithState(body) => collect_predicates_into(body, out),
        Elab::LetRecs { bodies, body, .. } => {
            for b in bodies {
                collect_predicates_into(b, out);
            }
            collect_predicates_into(body, out);
        }
        Elab::Handle { body, handlers, return_, .. } => {
            collect_predicates_into(body, out);
            for h in handlers {
                collect_predicates_into(&h.body, out);
            }
            if let Some((_, b)) = return_ {
                collect_predicates_into(b, out);
            }
        }
        Elab::PushInt(..)
        | Elab::PushBool(_)
        | Elab::Ident(_)
        | Elab::NewRef
        | Elab::GetRef
        | Elab::PutRef
        | Elab::UnitOp(..)
        | Elab::RecordExtend(_)
        | Elab::RecordSelect(_)
        | Elab::RecordRestrict(_)
        | Elab::VariantLiteral(_)
        | Elab::DictParam(_)
        | Elab::Do => {}
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
    fn composing_push_int_and_push_bool_stacks_both_values() {
        let mut fresh = FreshSource::new();
        let words = vec![
            Word::PushInt { digits: "1".into(), size: IntSize::I32, span: span() },
            Word::PushBool { value: true, span: span() },
        ];
        let (wt, elabs) = infer_words(&Env::empty(), &words, &mut fresh).expect("should infer");
        assert_eq!(elabs.len(), 2);
        match wt.outputs {
            Type::Seq(elems) => assert_eq!(elems.len(), 3), // I32, Bool, dotted tail
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn if_unifies_both_branch_outputs() {
        let mut fresh = FreshSource::new();
        let then = vec![Word::PushInt { digits: "1".into(), size: IntSize::I32, span: span() }];
        let else_ = vec![Word::PushInt { digits: "2".into(), size: IntSize::I32, span: span() }];
        let (wt, _elab) = infer_if(&Env::empty(), &then, &else_, &mut fresh).expect("branches should unify");
        match wt.inputs {
            Type::Seq(elems) => assert!(matches!(&elems[0], SeqElem::Indexed(t) if *t == bool_type())),
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn if_rejects_mismatched_branch_outputs() {
        let mut fresh = FreshSource::new();
        let then = vec![Word::PushInt { digits: "1".into(), size: IntSize::I32, span: span() }];
        let else_ = vec![Word::PushBool { value: true, span: span() }];
        assert!(infer_if(&Env::empty(), &then, &else_, &mut fresh).is_err());
    }

    #[test]
    fn unbound_identifier_is_an_error() {
        let mut fresh = FreshSource::new();
        let err = infer_ident(&Env::empty(), "nope", span(), &mut fresh);
        assert!(matches!(err, Err(CoreError::UnboundName { .. })));
    }

    #[test]
    fn with_state_rejects_an_escaping_ref() {
        let mut fresh = FreshSource::new();
        let body = vec![
            Word::PushInt { digits: "1".into(), size: IntSize::I32, span: span() },
            Word::NewRef { span: span() },
        ];
        let err = infer_with_state(&Env::empty(), &body, &mut fresh);
        assert!(matches!(err, Err(CoreError::HeapEscape { .. })));
    }

    #[test]
    fn let_binding_introduces_a_variable_of_the_right_type() {
        let mut fresh = FreshSource::new();
        let bindings = vec![(
            Pattern::Var { name: "x".into(), span: span() },
            vec![Word::PushInt { digits: "1".into(), size: IntSize::I32, span: span() }],
        )];
        let body = vec![Word::Ident { name: "x".into(), span: span() }];
        let (wt, _elab) =
            infer_statements(&Env::empty(), &bindings, &body, &mut fresh).expect("x should resolve");
        match wt.outputs {
            Type::Seq(elems) => assert!(matches!(&elems[0], SeqElem::Indexed(t) if *t == int_type(IntSize::I32))),
            other => panic!("expected Seq, got {other:?}"),
        }
    }

    #[test]
    fn overload_identifier_emits_a_method_placeholder() {
        use crate::ty::TyVar;

        let mut fresh = FreshSource::new();
        let tyvar = TyVar { name: "a0".into(), kind: Kind::Value };
        let a = Type::Var(tyvar.clone());
        let fn_ty = Type::fun(
            stack_of(vec![a.clone(), a.clone()], Type::Seq(vec![])),
            stack_of(vec![bool_type()], Type::Seq(vec![])),
            Type::RowEmpty,
            Type::RowEmpty,
            Type::False,
        );
        // A genuinely overloaded binding is qualified over its own
        // predicate (`Eq a => (a, a -> Bool)`), not monomorphic --
        // `infer_ident` reads that leading context predicate back out as
        // the method placeholder to resolve.
        let base_scheme = Scheme {
            quantified: vec![tyvar],
            body: QualType { context: vec![Predicate { name: "Eq".into(), arg: a }], head: fn_ty },
        };
        let env = Env::empty().with(
            "eq",
            EnvEntry::Overload { predicate_name: "Eq".into(), base_scheme, instances: vec![] },
        );
        let (_wt, elab) = infer_ident(&env, "eq", span(), &mut fresh).expect("should instantiate");
        assert!(matches!(elab, Elab::Placeholder(Placeholder::Method(name, _)) if name == "eq"));
    }
}
