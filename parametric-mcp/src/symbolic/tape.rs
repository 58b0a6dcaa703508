//! Instruction-tape engine: expressions are flattened once into static
//! single-assignment form, with shared nodes emitted exactly once, and each
//! evaluation is a single pass over the tape.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::expr::{BinaryOp, Expr, Node, UnaryOp};
use super::{CompiledFn, VarLayout};

#[derive(Clone, Copy, Debug)]
enum Instr {
    Const(f64),
    Load(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Powi(usize, i32),
}

pub(super) fn compile(exprs: &[Expr], layout: &VarLayout) -> CompiledFn {
    let mut instrs: Vec<Instr> = Vec::new();
    let mut slots: FxHashMap<*const Node, usize> = FxHashMap::default();
    let outputs: Vec<usize> = exprs
        .iter()
        .map(|e| emit(e, layout, &mut instrs, &mut slots))
        .collect();

    // One slot per instruction; the buffer is reused across calls.
    let buffer = RefCell::new(vec![0.0_f64; instrs.len()]);
    Box::new(move |out, input| {
        let mut buf = buffer.borrow_mut();
        for (slot, instr) in instrs.iter().enumerate() {
            buf[slot] = match *instr {
                Instr::Const(c) => c,
                Instr::Load(offset) => input[offset],
                Instr::Unary(op, a) => op.apply(buf[a]),
                Instr::Binary(op, a, b) => op.apply(buf[a], buf[b]),
                Instr::Powi(a, exponent) => buf[a].powi(exponent),
            };
        }
        for (dst, &slot) in out.iter_mut().zip(&outputs) {
            *dst = buf[slot];
        }
    })
}

fn emit(
    expr: &Expr,
    layout: &VarLayout,
    instrs: &mut Vec<Instr>,
    slots: &mut FxHashMap<*const Node, usize>,
) -> usize {
    let key = Rc::as_ptr(&expr.0);
    if let Some(&slot) = slots.get(&key) {
        return slot;
    }
    let instr = match &*expr.0 {
        Node::Constant(c) => Instr::Const(*c),
        Node::Variable { name, index } => {
            let offset = layout
                .offset_of(name)
                .expect("expression mentions a variable set absent from the layout");
            Instr::Load(offset + index)
        }
        Node::Unary { op, arg } => Instr::Unary(*op, emit(arg, layout, instrs, slots)),
        Node::Powi { arg, exponent } => Instr::Powi(emit(arg, layout, instrs, slots), *exponent),
        Node::Binary { op, lhs, rhs } => {
            let a = emit(lhs, layout, instrs, slots);
            let b = emit(rhs, layout, instrs, slots);
            Instr::Binary(*op, a, b)
        }
    };
    let slot = instrs.len();
    instrs.push(instr);
    slots.insert(key, slot);
    slot
}
