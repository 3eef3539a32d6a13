//! Core errors (`spec.md` §7).
//!
//! Grounded directly on `mesh-typeck/src/error.rs`'s `TypeError`: a single
//! flat enum, one variant per condition, each carrying the data named in
//! `spec.md` §7's table plus a `Span` for provenance. All errors here are
//! fatal at the core boundary (`spec.md` §7: "the core does not attempt
//! recovery"); the driver decides how to render them.

use std::fmt;

use catena_common::Span;
use serde::Serialize;

use crate::kind::Kind;
use crate::ty::Type;

/// A fatal error raised by any core component (`spec.md` §7).
#[derive(Clone, Debug, Serialize)]
pub enum CoreError {
    /// A substitution or application violated kinding
    /// (`spec.md` §4.C rule: `UnifyKindMismatch`; §7: `KindMismatch`).
    KindMismatch { expected: String, found: String, span: Option<Span> },
    /// Two distinct constants were unified (`spec.md` §4.C rule 7;
    /// §7: `RigidRigidMismatch`).
    RigidRigidMismatch { left: String, right: String, span: Option<Span> },
    /// Unifying a variable with a type that contains it would produce an
    /// infinite type.
    OccursCheck { var: String, ty: String, span: Option<Span> },
    /// After CHR reduction, the residual context mentions a variable not
    /// present in the generalized head.
    AmbiguousOverload { ty: String },
    /// The CHR solver reached more than one residual predicate set.
    NonConfluentContext { predicates: Vec<String> },
    /// An identifier was not found in the environment.
    UnboundName { name: String, span: Option<Span> },
    /// Elaboration could not resolve an overload placeholder to any
    /// instance or dictionary parameter.
    InstanceNotFound { predicate: String, span: Option<Span> },
    /// `with-state` would export a heap variable still free in the outer
    /// environment.
    HeapEscape { heap_var: String, span: Option<Span> },
    /// `main` does not yield a value convertible to `I32`.
    MainSignatureMismatch { expected: String, found: String },
}

impl CoreError {
    pub fn kind_mismatch(expected: &Kind, found: &Kind) -> Self {
        CoreError::KindMismatch { expected: expected.to_string(), found: found.to_string(), span: None }
    }

    pub fn rigid_rigid(left: &str, right: &str) -> Self {
        CoreError::RigidRigidMismatch { left: left.to_string(), right: right.to_string(), span: None }
    }

    pub fn occurs_check(var: &str, ty: &Type) -> Self {
        CoreError::OccursCheck { var: var.to_string(), ty: ty.to_string(), span: None }
    }

    pub fn ambiguous_overload(ty: Type) -> Self {
        CoreError::AmbiguousOverload { ty: ty.to_string() }
    }

    pub fn non_confluent(predicates: &[String]) -> Self {
        CoreError::NonConfluentContext { predicates: predicates.to_vec() }
    }

    pub fn unbound_name(name: &str, span: Span) -> Self {
        CoreError::UnboundName { name: name.to_string(), span: Some(span) }
    }

    pub fn instance_not_found(predicate: &str) -> Self {
        CoreError::InstanceNotFound { predicate: predicate.to_string(), span: None }
    }

    pub fn heap_escape(heap_var: &str) -> Self {
        CoreError::HeapEscape { heap_var: heap_var.to_string(), span: None }
    }

    pub fn main_signature_mismatch(expected: &str, found: &str) -> Self {
        CoreError::MainSignatureMismatch { expected: expected.to_string(), found: found.to_string() }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::KindMismatch { expected, found, .. } => {
                write!(f, "kind mismatch: expected {expected}, found {found}")
            }
            CoreError::RigidRigidMismatch { left, right, .. } => {
                write!(f, "cannot unify distinct constants `{left}` and `{right}`")
            }
            CoreError::OccursCheck { var, ty, .. } => {
                write!(f, "occurs check: `{var}` occurs in `{ty}`")
            }
            CoreError::AmbiguousOverload { ty } => {
                write!(f, "ambiguous overload: `{ty}` is not determined by the head of its scheme")
            }
            CoreError::NonConfluentContext { predicates } => {
                write!(f, "non-confluent context: {}", predicates.join(", "))
            }
            CoreError::UnboundName { name, .. } => write!(f, "unbound name `{name}`"),
            CoreError::InstanceNotFound { predicate, .. } => {
                write!(f, "no instance found for `{predicate}`")
            }
            CoreError::HeapEscape { heap_var, .. } => {
                write!(f, "heap variable `{heap_var}` escapes its `with-state` scope")
            }
            CoreError::MainSignatureMismatch { expected, found } => {
                write!(f, "`main` must yield `{expected}`, found `{found}`")
            }
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_non_empty() {
        let err = CoreError::unbound_name("foo", Span::new(0, 3));
        assert_eq!(err.to_string(), "unbound name `foo`");
    }
}
