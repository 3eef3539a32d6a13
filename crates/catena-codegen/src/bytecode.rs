//! Bytecode generator (`spec.md` §4.J, component J).
//!
//! Grounded on `mesh-codegen/src/codegen/mod.rs`'s single-pass emitter: a
//! monotonic block-id counter plus an environment stack of frames threaded
//! through one big recursive `lower_expr`. `mir/mono.rs`'s closure
//! specialization supplies the shape of `gen_closure` below -- collect free
//! variables, emit a fresh labeled block for the body, leave an `IClosure`
//! at the call site referencing it.

use catena_common::ast::{IntSize, Pattern};
use serde::Serialize;

use crate::lower::Ir;
use crate::primitives::is_recognized;

/// An environment-stack entry kind (`spec.md` §4.J: "a list of `EnvEntry{name,
/// kind}`" with `kind` one of these three).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Value,
    Closure,
    Continuation,
}

#[derive(Clone, Debug)]
struct FrameEntry {
    name: String,
    kind: EntryKind,
}

type Frame = Vec<FrameEntry>;

/// A reference to a closed-over variable, found by `IFind` at the point
/// a closure is built (`spec.md` §4.J step 2: "compute each free
/// variable's current `(frameIndex, entryIndex)` and kind").
#[derive(Clone, Debug, Serialize)]
pub struct ClosedFind {
    pub frame_index: usize,
    pub entry_index: usize,
    pub kind: EntryKind,
}

/// A flat bytecode instruction (`spec.md` §3's "Bytecode block").
#[derive(Clone, Debug, Serialize)]
pub enum Instruction {
    IOffset(i32),
    IOffsetIf(i32),
    IOffsetIfNot(i32),
    ICall(String),
    ITailCall(String),
    IReturn,
    IHandle { handle_id: u32, after_offset: i32, num_params: usize, num_handlers: usize },
    IComplete,
    IEscape { handle_id: u32, handler_index: usize },
    ICallClosure,
    ICallContinuation,
    IClosure { label: String, args: usize, closed: Vec<ClosedFind> },
    IMutual(usize),
    IStore(usize),
    IFind { frame_index: usize, entry_index: usize },
    IForget,
    IConstruct { id: u32, args: usize },
    IIsStruct(u32),
    IPrimitive(String),
    IPushInt(String, IntSize),
    IPushBool(bool),
    INop,
}

/// A bytecode block (`spec.md` §3): either a named callable entry point or
/// the anonymous program-entry block.
#[derive(Clone, Debug, Serialize)]
pub enum Block {
    Labeled(String, Vec<Instruction>),
    Anonymous(Vec<Instruction>),
}

/// Identity and declared arity of a data constructor, supplied by the
/// caller from the program's type declarations (`spec.md` §6's
/// `Decl::Type`/`Decl::RecTypes`) -- codegen itself never invents
/// constructor ids.
#[derive(Clone, Debug)]
pub struct ConstructorInfo {
    pub id: u32,
    pub arity: usize,
}

struct HandlerFrame {
    handle_id: u32,
    operations: rustc_hash::FxHashMap<String, usize>,
}

/// Emitter state threaded through one top-level lowering (`spec.md` §4.J /
/// §5: "all mutable state ... is process-local to a compilation;
/// reentrancy is not supported").
pub struct Codegen<'a> {
    next_block_id: u32,
    frames: Vec<Frame>,
    handler_stack: Vec<HandlerFrame>,
    constructors: &'a rustc_hash::FxHashMap<String, ConstructorInfo>,
    extra_blocks: Vec<Block>,
}

impl<'a> Codegen<'a> {
    pub fn new(constructors: &'a rustc_hash::FxHashMap<String, ConstructorInfo>) -> Self {
        Codegen { next_block_id: 0, frames: Vec::new(), handler_stack: Vec::new(), constructors, extra_blocks: Vec::new() }
    }

    fn fresh_block_id(&mut self) -> u32 {
        let id = self.next_block_id;
        self.next_block_id += 1;
        id
    }

    fn find(&self, name: &str) -> Option<(usize, usize, EntryKind)> {
        for (fi, frame) in self.frames.iter().enumerate().rev() {
            for (ei, entry) in frame.iter().enumerate().rev() {
                if entry.name == name {
                    return Some((fi, ei, entry.kind));
                }
            }
        }
        None
    }

    /// Lower one word sequence to a flat instruction list, appending any
    /// closures/handler bodies it spawns to `self.extra_blocks`.
    pub fn lower_words(&mut self, words: &[Ir]) -> Vec<Instruction> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.lower_one(word));
        }
        out
    }

    fn lower_one(&mut self, word: &Ir) -> Vec<Instruction> {
        match word {
            Ir::Do => vec![Instruction::ICallClosure],
            Ir::PushInt(digits, size) => vec![Instruction::IPushInt(digits.clone(), *size)],
            Ir::PushBool(b) => vec![Instruction::IPushBool(*b)],
            Ir::If { then, else_ } if else_.is_empty() => {
                let then_code = self.lower_words(then);
                let mut out = vec![Instruction::IOffsetIfNot(then_code.len() as i32)];
                out.extend(then_code);
                out
            }
            Ir::If { then, else_ } => {
                let then_code = self.lower_words(then);
                let else_code = self.lower_words(else_);
                let mut out = vec![Instruction::IOffsetIf(then_code.len() as i32 + 1)];
                out.extend(then_code);
                out.push(Instruction::IOffset(else_code.len() as i32));
                out.extend(else_code);
                out
            }
            Ir::While { cond, body } => {
                let body_code = self.lower_words(body);
                let cond_code = self.lower_words(cond);
                let mut out = vec![Instruction::IOffset(body_code.len() as i32)];
                out.extend(body_code.clone());
                out.extend(cond_code);
                out.push(Instruction::IOffsetIf(-(body_code.len() as i32)));
                out
            }
            Ir::Vars { bindings, body } => {
                let mut out = vec![Instruction::IStore(bindings.len())];
                self.frames.push(bindings.iter().map(|(p, _)| value_entries(p)).collect::<Vec<_>>().concat());
                out.extend(self.lower_words(body));
                self.frames.pop();
                out.push(Instruction::IForget);
                out
            }
            Ir::LetRecs { names, bodies, body } => self.lower_let_recs(names, bodies, body),
            Ir::Closure { free_vars, body } => self.lower_closure("closure", free_vars, &[], body),
            Ir::Handle { params, body, handlers, return_ } => self.lower_handle(params, body, handlers, return_),
            Ir::WithPermission(body) => self.lower_words(body),
            Ir::CallVar(name) => match self.find(name) {
                Some((fi, ei, EntryKind::Continuation)) => {
                    vec![Instruction::IFind { frame_index: fi, entry_index: ei }, Instruction::ICallContinuation]
                }
                Some((fi, ei, _)) => {
                    vec![Instruction::IFind { frame_index: fi, entry_index: ei }, Instruction::ICallClosure]
                }
                None => vec![Instruction::ICall(name.clone())],
            },
            Ir::ValueVar(name) => match self.find(name) {
                Some((fi, ei, _)) => vec![Instruction::IFind { frame_index: fi, entry_index: ei }],
                None => vec![Instruction::ICall(name.clone())],
            },
            Ir::OperatorVar(name) => {
                let op = name.strip_suffix('!').unwrap_or(name);
                for frame in self.handler_stack.iter().rev() {
                    if let Some(&handler_index) = frame.operations.get(op) {
                        return vec![Instruction::IEscape { handle_id: frame.handle_id, handler_index }];
                    }
                }
                vec![Instruction::IEscape { handle_id: u32::MAX, handler_index: 0 }]
            }
            Ir::ConstructorVar(name) => match self.constructors.get(name) {
                Some(info) => vec![Instruction::IConstruct { id: info.id, args: info.arity }],
                None => vec![Instruction::IConstruct { id: 0, args: 0 }],
            },
            Ir::TestConstructorVar(name) => {
                let id = self.constructors.get(name).map(|info| info.id).unwrap_or(0);
                vec![Instruction::IIsStruct(id)]
            }
            Ir::PrimVar(name) => {
                debug_assert!(is_recognized(name), "unrecognized primitive name reached codegen: {name}");
                vec![Instruction::IPrimitive(name.clone())]
            }
            Ir::UnitOp(_, _) => vec![Instruction::INop],
            Ir::RecordExtend(label) => vec![Instruction::IPrimitive(format!("record-extend-{label}"))],
            Ir::RecordSelect(label) => vec![Instruction::IPrimitive(format!("record-select-{label}"))],
            Ir::RecordRestrict(label) => vec![Instruction::IPrimitive(format!("record-restrict-{label}"))],
            Ir::VariantLiteral(label) => vec![Instruction::IPrimitive(format!("variant-{label}"))],
            Ir::Case { then, else_, .. } => {
                let then_code = self.lower_words(then);
                let else_code = self.lower_words(else_);
                let mut out = vec![Instruction::IOffsetIfNot(then_code.len() as i32 + 1)];
                out.extend(then_code);
                out.push(Instruction::IOffset(else_code.len() as i32));
                out.extend(else_code);
                out
            }
        }
    }

    fn lower_let_recs(&mut self, names: &[String], bodies: &[Vec<Ir>], body: &[Ir]) -> Vec<Instruction> {
        let mut out = Vec::new();
        self.frames.push(names.iter().map(|n| FrameEntry { name: n.clone(), kind: EntryKind::Closure }).collect());
        for (name, rec_body) in names.iter().zip(bodies) {
            let free: Vec<String> = Vec::new();
            out.extend(self.lower_closure_named(name, &free, &[], rec_body));
        }
        out.push(Instruction::IMutual(names.len()));
        out.push(Instruction::IStore(names.len()));
        out.extend(self.lower_words(body));
        self.frames.pop();
        out.push(Instruction::IForget);
        out
    }

    /// `genClosure(prefix, callAppend, free, args, body)` (`spec.md` §4.J).
    fn lower_closure(&mut self, prefix: &str, free: &[String], call_append: &[(String, EntryKind)], body: &[Ir]) -> Vec<Instruction> {
        let id = self.fresh_block_id();
        let name = format!("{prefix}{id}");
        self.lower_closure_named(&name, free, call_append, body)
    }

    fn lower_closure_named(&mut self, name: &str, free: &[String], call_append: &[(String, EntryKind)], body: &[Ir]) -> Vec<Instruction> {
        let closed: Vec<ClosedFind> = free
            .iter()
            .map(|n| match self.find(n) {
                Some((fi, ei, kind)) => ClosedFind { frame_index: fi, entry_index: ei, kind },
                None => ClosedFind { frame_index: 0, entry_index: 0, kind: EntryKind::Value },
            })
            .collect();

        let mut closed_frame: Frame = call_append.iter().map(|(n, k)| FrameEntry { name: n.clone(), kind: *k }).collect();
        for n in free {
            closed_frame.push(FrameEntry { name: n.clone(), kind: EntryKind::Value });
        }
        self.frames.push(closed_frame);
        let mut body_code = self.lower_words(body);
        self.frames.pop();
        body_code.push(Instruction::IReturn);
        self.extra_blocks.push(Block::Labeled(name.to_string(), body_code));

        vec![Instruction::IClosure { label: name.to_string(), args: call_append.len(), closed }]
    }

    fn lower_handle(&mut self, params: &[Pattern], body: &[Ir], handlers: &[crate::lower::IrHandler], return_: &[Ir]) -> Vec<Instruction> {
        let handle_id = self.fresh_block_id();
        let mut out = Vec::new();

        // Return closure first, occupying the slot the VM expects.
        out.extend(self.lower_closure("handle-return", &[], &[], return_));

        // Handlers in reverse declared order (`spec.md` §4.J).
        let mut operations = rustc_hash::FxHashMap::default();
        for (i, handler) in handlers.iter().enumerate() {
            operations.insert(handler.operation.clone(), i);
        }
        self.handler_stack.push(HandlerFrame { handle_id, operations });
        for (index, handler) in handlers.iter().enumerate().rev() {
            let call_append: Vec<(String, EntryKind)> = handler
                .params
                .iter()
                .flat_map(value_entries)
                .map(|e| (e.name, e.kind))
                .chain(std::iter::once(("resume".to_string(), EntryKind::Continuation)))
                .collect();
            out.extend(self.lower_closure(&format!("handler{index}-"), &[], &call_append, &handler.body));
        }

        let handled_body = self.lower_words(body);
        let after_offset = handled_body.len() as i32 + 1;
        self.handler_stack.pop();

        out.push(Instruction::IHandle { handle_id, after_offset, num_params: params.len(), num_handlers: handlers.len() });
        out.extend(handled_body);
        out.push(Instruction::IComplete);
        out
    }
}

fn value_entries(pattern: &Pattern) -> Vec<FrameEntry> {
    match pattern {
        Pattern::Var { name, .. } => vec![FrameEntry { name: name.clone(), kind: EntryKind::Value }],
        Pattern::Wildcard { .. } => vec![],
        Pattern::Constructor { args, .. } => args.iter().flat_map(value_entries).collect(),
    }
}

/// Assemble a complete program (`spec.md` §4.J "Program assembly"): an
/// anonymous entry block calling `main`, then `main`'s own body block,
/// then every closure/handler block spawned while lowering it, then a
/// terminal `end: INop` block.
/// Assemble a complete program: entry block, `main`, then every top-level
/// user definition in declaration order, then the closure/handler blocks
/// those bodies generated along the way, then the terminal `end` block
/// (`spec.md` §4.J's "append main, user definitions, and a terminal end
/// block"). `defs` and `main` share one `Codegen` so a user definition that
/// itself builds a closure lands its block in the same `extra_blocks` pool
/// `main`'s closures do.
pub fn assemble_program(
    main: &[Ir],
    constructors: &rustc_hash::FxHashMap<String, ConstructorInfo>,
) -> Vec<Block> {
    assemble_program_with_defs(main, &[], constructors)
}

pub fn assemble_program_with_defs(
    main: &[Ir],
    defs: &[(String, Vec<Ir>)],
    constructors: &rustc_hash::FxHashMap<String, ConstructorInfo>,
) -> Vec<Block> {
    let mut gen = Codegen::new(constructors);
    let mut main_code = gen.lower_words(main);
    main_code.push(Instruction::IReturn);

    let mut def_blocks = Vec::new();
    for (name, body) in defs {
        let mut code = gen.lower_words(body);
        code.push(Instruction::IReturn);
        def_blocks.push(Block::Labeled(name.clone(), code));
    }

    let mut blocks = Vec::new();
    blocks.push(Block::Anonymous(vec![Instruction::ICall("main".into()), Instruction::ITailCall("end".into())]));
    blocks.push(Block::Labeled("main".into(), main_code));
    blocks.extend(def_blocks);
    blocks.extend(gen.extra_blocks);
    blocks.push(Block::Labeled("end".into(), vec![Instruction::INop]));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ctors() -> rustc_hash::FxHashMap<String, ConstructorInfo> {
        rustc_hash::FxHashMap::default()
    }

    #[test]
    fn program_assembly_has_entry_and_end_blocks() {
        let blocks = assemble_program(&[Ir::PushBool(true)], &no_ctors());
        match &blocks[0] {
            Block::Anonymous(instrs) => {
                assert!(matches!(instrs[0], Instruction::ICall(ref n) if n == "main"));
                assert!(matches!(instrs[1], Instruction::ITailCall(ref n) if n == "end"));
            }
            other => panic!("expected anonymous entry block, got {other:?}"),
        }
        match blocks.last().unwrap() {
            Block::Labeled(name, instrs) => {
                assert_eq!(name, "end");
                assert!(matches!(instrs[0], Instruction::INop));
            }
            other => panic!("expected terminal end block, got {other:?}"),
        }
    }

    #[test]
    fn if_without_else_lowers_to_offset_if_not() {
        let mut gen = Codegen::new(&rustc_hash::FxHashMap::default());
        let code = gen.lower_words(&[Ir::If { then: vec![Ir::PushBool(true)], else_: vec![] }]);
        assert!(matches!(code[0], Instruction::IOffsetIfNot(1)));
    }

    #[test]
    fn closure_emits_a_labeled_block_and_an_iclosure_at_the_call_site() {
        let mut gen = Codegen::new(&rustc_hash::FxHashMap::default());
        let code = gen.lower_one(&Ir::Closure { free_vars: vec![], body: vec![Ir::PushBool(true)] });
        assert!(matches!(&code[0], Instruction::IClosure { .. }));
        assert_eq!(gen.extra_blocks.len(), 1);
    }

    #[test]
    fn handler_closures_are_emitted_in_reverse_order() {
        let mut gen = Codegen::new(&rustc_hash::FxHashMap::default());
        let handlers = vec![
            crate::lower::IrHandler { operation: "get!".into(), params: vec![], body: vec![] },
            crate::lower::IrHandler { operation: "put!".into(), params: vec![], body: vec![] },
        ];
        let _ = gen.lower_handle(&[], &[], &handlers, &[]);
        // return closure + 2 handler closures = 3 extra blocks.
        assert_eq!(gen.extra_blocks.len(), 3);
        assert!(gen.extra_blocks[1].label_starts_with("handler1-"));
        assert!(gen.extra_blocks[2].label_starts_with("handler0-"));
    }

    impl Block {
        fn label_starts_with(&self, prefix: &str) -> bool {
            matches!(self, Block::Labeled(name, _) if name.starts_with(prefix))
        }
    }
}
