//! Lexical environment (`spec.md` §4.E, component E).
//!
//! Grounded on `snow-typeck/src/env.rs`'s `TypeEnv`: a name-to-binding map
//! with shadow-by-insertion semantics and innermost-first lookup. The
//! teacher's version is a `Vec` of `FxHashMap` scopes with explicit
//! push/pop; `spec.md` §4.E says push/pop discipline is not required here,
//! so `Env` instead persists each extension as an immutable node sharing an
//! `Rc` of its parent (`SPEC_FULL.md` §4.E supplement) -- cheap to clone
//! into a CHR/instance-search backtracking branch without disturbing the
//! caller's view of the environment.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::chr::Chr;
use crate::kind::Kind;
use crate::ty::{Scheme, TyVar};

/// One instance of an overload: its own (possibly qualified) scheme and the
/// name of the function generated to implement it (`spec.md` §4.E:
/// "Instance. (instance-scheme, generated-function-name)").
#[derive(Clone, Debug)]
pub struct Instance {
    pub scheme: Scheme,
    pub function_name: String,
}

/// A binding in the environment (`spec.md` §4.E: "Environment entry").
#[derive(Clone, Debug)]
pub enum EnvEntry {
    Variable(Scheme),
    Function(Scheme),
    Overload { predicate_name: String, base_scheme: Scheme, instances: Vec<Instance> },
    Constructor { pattern_scheme: Scheme, value_scheme: Scheme },
    Pattern(Scheme),
    Rule(Chr),
    TypeCtor(Kind),
    Recursive(Scheme),
}

struct Node {
    name: String,
    entry: EnvEntry,
    parent: Option<Rc<Node>>,
}

/// A persistent lexical environment. Four namespaces (`spec.md` §4.E: word,
/// pattern, type-constructor, predicate) share the same name domain but are
/// looked up through different entry points below, mirroring how the
/// teacher's single `scopes` stack serves every binding kind.
#[derive(Clone)]
pub struct Env {
    top: Option<Rc<Node>>,
}

impl Env {
    pub fn empty() -> Self {
        Env { top: None }
    }

    /// Extend this environment with one more binding, returning a new
    /// environment. `self` is left untouched (no push/pop discipline --
    /// `spec.md` §4.E).
    pub fn with(&self, name: impl Into<String>, entry: EnvEntry) -> Env {
        Env {
            top: Some(Rc::new(Node { name: name.into(), entry, parent: self.top.clone() })),
        }
    }

    /// Extend with several bindings at once (e.g. a `let-recs` group), in
    /// order, so later names shadow earlier ones in the same group.
    pub fn with_all(&self, bindings: impl IntoIterator<Item = (String, EnvEntry)>) -> Env {
        let mut env = self.clone();
        for (name, entry) in bindings {
            env = env.with(name, entry);
        }
        env
    }

    /// Look up the nearest binding for `name`, searching from the most
    /// recently added entry outward.
    pub fn lookup(&self, name: &str) -> Option<&EnvEntry> {
        let mut cursor = self.top.as_deref();
        while let Some(node) = cursor {
            if node.name == name {
                return Some(&node.entry);
            }
            cursor = node.parent.as_deref();
        }
        None
    }

    /// Look up a word-namespace binding: `Variable`, `Function`, `Overload`
    /// or `Recursive` (`spec.md` §4.E's "word" namespace).
    pub fn lookup_word(&self, name: &str) -> Option<&EnvEntry> {
        match self.lookup(name) {
            Some(entry @ (EnvEntry::Variable(_) | EnvEntry::Function(_) | EnvEntry::Overload { .. } | EnvEntry::Recursive(_))) => {
                Some(entry)
            }
            _ => None,
        }
    }

    /// Look up a pattern-namespace binding: `Pattern` or the pattern half
    /// of a `Constructor` (`spec.md` §4.E's "pattern" namespace).
    pub fn lookup_pattern(&self, name: &str) -> Option<&EnvEntry> {
        match self.lookup(name) {
            Some(entry @ (EnvEntry::Pattern(_) | EnvEntry::Constructor { .. })) => Some(entry),
            _ => None,
        }
    }

    /// Look up a type-constructor binding (`spec.md` §4.E's "type-constructor"
    /// namespace).
    pub fn lookup_type_ctor(&self, name: &str) -> Option<&Kind> {
        match self.lookup(name) {
            Some(EnvEntry::TypeCtor(kind)) => Some(kind),
            _ => None,
        }
    }

    /// Look up a predicate-namespace binding: the instances of the
    /// `Overload` entry whose own *predicate name* matches (`spec.md`
    /// §4.E's "predicate" namespace) -- not its word name. An overload is
    /// bound in the environment under the word programs call it by (e.g.
    /// `"eq"`), but the placeholder a use site builds names the class it
    /// discharges (e.g. `"Eq"`); those two names are rarely the same, so
    /// this searches every binding's `predicate_name` field rather than the
    /// word-namespace lookup chain.
    pub fn lookup_predicate(&self, predicate_name: &str) -> Option<&[Instance]> {
        let mut cursor = self.top.as_deref();
        while let Some(node) = cursor {
            if let EnvEntry::Overload { predicate_name: p, instances, .. } = &node.entry {
                if p == predicate_name {
                    return Some(instances);
                }
            }
            cursor = node.parent.as_deref();
        }
        None
    }

    /// The free type variables of every scheme bound in this environment,
    /// used by `Scheme::generalize` to decide which variables in a newly
    /// inferred type are still free in the surrounding scope (and so must
    /// not be quantified over).
    pub fn free_vars(&self) -> FxHashSet<TyVar> {
        fn scheme_free_vars(scheme: &Scheme) -> FxHashSet<TyVar> {
            let mut out = scheme.body.head.free_vars();
            for pred in &scheme.body.context {
                out.extend(pred.arg.free_vars());
            }
            for q in &scheme.quantified {
                out.remove(q);
            }
            out
        }

        let mut out = FxHashSet::default();
        let mut cursor = self.top.as_deref();
        while let Some(node) = cursor {
            match &node.entry {
                EnvEntry::Variable(s)
                | EnvEntry::Function(s)
                | EnvEntry::Pattern(s)
                | EnvEntry::Recursive(s) => out.extend(scheme_free_vars(s)),
                EnvEntry::Overload { base_scheme, .. } => out.extend(scheme_free_vars(base_scheme)),
                EnvEntry::Constructor { pattern_scheme, value_scheme } => {
                    out.extend(scheme_free_vars(pattern_scheme));
                    out.extend(scheme_free_vars(value_scheme));
                }
                EnvEntry::Rule(_) | EnvEntry::TypeCtor(_) => {}
            }
            cursor = node.parent.as_deref();
        }
        out
    }

    /// All CHR rules visible in this environment, innermost-first.
    pub fn rules(&self) -> Vec<Chr> {
        let mut out = Vec::new();
        let mut cursor = self.top.as_deref();
        while let Some(node) = cursor {
            if let EnvEntry::Rule(rule) = &node.entry {
                out.push(rule.clone());
            }
            cursor = node.parent.as_deref();
        }
        out
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Kind;
    use crate::ty::Type;

    fn mono(name: &str) -> Scheme {
        Scheme::mono(Type::Primitive(name.to_string()))
    }

    #[test]
    fn lookup_finds_nearest_binding() {
        let env = Env::empty().with("x", EnvEntry::Variable(mono("I32")));
        assert!(matches!(env.lookup("x"), Some(EnvEntry::Variable(_))));
        assert!(env.lookup("y").is_none());
    }

    #[test]
    fn extension_does_not_mutate_parent() {
        let base = Env::empty().with("x", EnvEntry::Variable(mono("I32")));
        let extended = base.with("x", EnvEntry::Variable(mono("Bool")));
        match (base.lookup("x"), extended.lookup("x")) {
            (Some(EnvEntry::Variable(a)), Some(EnvEntry::Variable(b))) => {
                assert_ne!(a.body.head.to_string(), b.body.head.to_string());
            }
            _ => panic!("expected Variable entries"),
        }
    }

    #[test]
    fn namespaces_do_not_cross() {
        let env = Env::empty()
            .with("foo", EnvEntry::TypeCtor(Kind::Value))
            .with("foo", EnvEntry::Variable(mono("I32")));
        assert!(env.lookup_word("foo").is_some());
        assert!(matches!(env.lookup("foo"), Some(EnvEntry::Variable(_))));
    }

    #[test]
    fn rules_collect_from_every_scope() {
        let rule = Chr::Simplification { name: "r".into(), heads: vec![], body: vec![] };
        let env = Env::empty().with("r", EnvEntry::Rule(rule));
        assert_eq!(env.rules().len(), 1);
    }
}
