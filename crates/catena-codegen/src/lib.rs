//! Core lowering and closure-converting bytecode generation (`spec.md` §2,
//! components I-K).

pub mod bytecode;
pub mod lower;
pub mod primitives;
