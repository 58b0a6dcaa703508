//! Expression-graph engine: evaluation walks the shared graph directly,
//! memoizing by node identity so shared subexpressions are computed once per
//! call.

use rustc_hash::FxHashMap;

use super::expr::Expr;
use super::{CompiledFn, VarLayout};

pub(super) fn compile(exprs: &[Expr], layout: &VarLayout) -> CompiledFn {
    let exprs = exprs.to_vec();
    let layout = layout.clone();
    Box::new(move |out, input| {
        let mut memo = FxHashMap::default();
        for (dst, expr) in out.iter_mut().zip(&exprs) {
            *dst = expr.eval(&layout, input, &mut memo);
        }
    })
}
