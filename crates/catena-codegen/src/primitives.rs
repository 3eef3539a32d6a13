//! Primitive registry (`spec.md` §4.J/§6, component K).
//!
//! Grounded on `mesh-codegen/src/codegen/intrinsics.rs`'s flat
//! name-to-opcode table: a fixed set of recognized intrinsic names that
//! codegen looks up rather than synthesizes. `spec.md` §6: "callers may not
//! invent new primitive names" -- `is_recognized` is the enforcement point
//! for that invariant, called from `bytecode.rs`'s `WPrimVar` lowering.

use catena_common::ast::IntSize;

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

const ARITHMETIC_OPS: [&str; 6] = ["add", "sub", "mul", "div", "mod", "neg"];
const COMPARISON_OPS: [&str; 4] = ["lt", "le", "gt", "ge"];
const BOOL_PRIMS: [&str; 4] = ["eq-bool", "and-bool", "or-bool", "not-bool"];
const LIST_PRIMS: [&str; 4] = ["cons", "head", "tail", "nil?"];
const REF_PRIMS: [&str; 3] = ["new-ref", "get-ref", "put-ref"];

/// Every primitive name this core recognizes, following the `<op>-<size>`
/// suffix convention (`spec.md` §6) for the sized arithmetic/comparison/
/// conversion families plus the fixed boolean, list and ref names.
pub fn recognized_primitives() -> rustc_hash::FxHashSet<String> {
    let mut out = rustc_hash::FxHashSet::default();
    for size in INT_SIZES {
        let s = size.suffix();
        for op in ARITHMETIC_OPS {
            out.insert(format!("{op}-{s}"));
        }
        for op in COMPARISON_OPS {
            out.insert(format!("{op}-{s}"));
        }
        out.insert(format!("eq-{s}"));
        for from in INT_SIZES {
            if from != size {
                out.insert(format!("conv-{s}-{}", from.suffix()));
            }
        }
    }
    for name in BOOL_PRIMS {
        out.insert(name.to_string());
    }
    for name in LIST_PRIMS {
        out.insert(name.to_string());
    }
    for name in REF_PRIMS {
        out.insert(name.to_string());
    }
    out
}

/// Whether `name` is a recognized primitive (`spec.md` §6's closed-world
/// invariant on primitive names).
pub fn is_recognized(name: &str) -> bool {
    recognized_primitives().contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_arithmetic_and_comparison_are_recognized() {
        assert!(is_recognized("add-i32"));
        assert!(is_recognized("lt-u64"));
        assert!(is_recognized("conv-i32-u16"));
    }

    #[test]
    fn bool_list_and_ref_primitives_are_recognized() {
        assert!(is_recognized("and-bool"));
        assert!(is_recognized("cons"));
        assert!(is_recognized("new-ref"));
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(!is_recognized("definitely-not-a-primitive"));
    }
}
