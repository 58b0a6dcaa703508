use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use super::VarLayout;

/// A traced scalar expression.
///
/// Expressions are built by applying ordinary arithmetic to variables
/// created through [`SymbolicBackend::variables`](super::SymbolicBackend::variables).
/// Nodes are reference-counted, so shared subexpressions stay shared: the
/// code generators deduplicate by node identity.
#[derive(Clone, Debug)]
pub struct Expr(pub(crate) Rc<Node>);

#[derive(Debug)]
pub(crate) enum Node {
    Constant(f64),
    Variable { name: &'static str, index: usize },
    Unary { op: UnaryOp, arg: Expr },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Powi { arg: Expr, exponent: i32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Sign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl UnaryOp {
    pub(crate) fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sin => libm::sin(x),
            UnaryOp::Cos => libm::cos(x),
            UnaryOp::Exp => libm::exp(x),
            UnaryOp::Ln => libm::log(x),
            UnaryOp::Sqrt => libm::sqrt(x),
            UnaryOp::Abs => libm::fabs(x),
            UnaryOp::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl BinaryOp {
    pub(crate) fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => libm::pow(lhs, rhs),
        }
    }
}

impl Expr {
    /// A constant expression.
    pub fn constant(value: f64) -> Self {
        Expr(Rc::new(Node::Constant(value)))
    }

    /// A single variable out of the set `name`.
    pub fn variable(name: &'static str, index: usize) -> Self {
        Expr(Rc::new(Node::Variable { name, index }))
    }

    pub(crate) fn as_constant(&self) -> Option<f64> {
        if let Node::Constant(c) = *self.0 { Some(c) } else { None }
    }

    pub(crate) fn variable_id(&self) -> Option<(&'static str, usize)> {
        if let Node::Variable { name, index } = *self.0 {
            Some((name, index))
        } else {
            None
        }
    }

    fn unary(op: UnaryOp, arg: Expr) -> Self {
        if let Some(c) = arg.as_constant() {
            return Expr::constant(op.apply(c));
        }
        Expr(Rc::new(Node::Unary { op, arg }))
    }

    // Structural simplification wants exact zeros and ones; anything folded
    // here must leave the sparsity pattern conservative, never wrong.
    #[allow(clippy::float_cmp)]
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        match (lhs.as_constant(), rhs.as_constant()) {
            (Some(a), Some(b)) => return Expr::constant(op.apply(a, b)),
            (Some(a), None) => match op {
                BinaryOp::Add if a == 0.0 => return rhs,
                BinaryOp::Sub if a == 0.0 => return Expr::unary(UnaryOp::Neg, rhs),
                BinaryOp::Mul if a == 0.0 => return Expr::constant(0.0),
                BinaryOp::Mul if a == 1.0 => return rhs,
                BinaryOp::Div if a == 0.0 => return Expr::constant(0.0),
                _ => {}
            },
            (None, Some(b)) => match op {
                BinaryOp::Add | BinaryOp::Sub if b == 0.0 => return lhs,
                BinaryOp::Mul if b == 0.0 => return Expr::constant(0.0),
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow if b == 1.0 => return lhs,
                BinaryOp::Pow if b == 0.0 => return Expr::constant(1.0),
                _ => {}
            },
            (None, None) => {}
        }
        Expr(Rc::new(Node::Binary { op, lhs, rhs }))
    }

    /// Sine.
    pub fn sin(&self) -> Self {
        Expr::unary(UnaryOp::Sin, self.clone())
    }

    /// Cosine.
    pub fn cos(&self) -> Self {
        Expr::unary(UnaryOp::Cos, self.clone())
    }

    /// Natural exponential.
    pub fn exp(&self) -> Self {
        Expr::unary(UnaryOp::Exp, self.clone())
    }

    /// Natural logarithm.
    pub fn ln(&self) -> Self {
        Expr::unary(UnaryOp::Ln, self.clone())
    }

    /// Square root.
    pub fn sqrt(&self) -> Self {
        Expr::unary(UnaryOp::Sqrt, self.clone())
    }

    /// Absolute value. Its derivative is taken as `sign(x)`, with
    /// `sign(0) = 0`.
    pub fn abs(&self) -> Self {
        Expr::unary(UnaryOp::Abs, self.clone())
    }

    /// Integer power.
    pub fn powi(&self, exponent: i32) -> Self {
        if let Some(c) = self.as_constant() {
            return Expr::constant(c.powi(exponent));
        }
        match exponent {
            0 => Expr::constant(1.0),
            1 => self.clone(),
            _ => Expr(Rc::new(Node::Powi { arg: self.clone(), exponent })),
        }
    }

    /// Real power with a constant exponent.
    pub fn powf(&self, exponent: f64) -> Self {
        Expr::binary(BinaryOp::Pow, self.clone(), Expr::constant(exponent))
    }

    /// Real power with an expression exponent.
    pub fn pow(&self, exponent: &Expr) -> Self {
        Expr::binary(BinaryOp::Pow, self.clone(), exponent.clone())
    }

    /// Symbolic partial derivative with respect to the variable
    /// `(name, index)`.
    pub fn derivative(&self, name: &'static str, index: usize) -> Expr {
        let mut memo: FxHashMap<*const Node, Expr> = FxHashMap::default();
        self.derivative_inner(name, index, &mut memo)
    }

    fn derivative_inner(
        &self,
        name: &'static str,
        index: usize,
        memo: &mut FxHashMap<*const Node, Expr>,
    ) -> Expr {
        let key = Rc::as_ptr(&self.0);
        if let Some(found) = memo.get(&key) {
            return found.clone();
        }
        let result = match &*self.0 {
            Node::Constant(_) => Expr::constant(0.0),
            Node::Variable { name: var, index: i } => {
                Expr::constant(if *var == name && *i == index { 1.0 } else { 0.0 })
            }
            Node::Unary { op, arg } => {
                let inner = arg.derivative_inner(name, index, memo);
                match op {
                    UnaryOp::Neg => -inner,
                    UnaryOp::Sin => arg.cos() * inner,
                    UnaryOp::Cos => -arg.sin() * inner,
                    UnaryOp::Exp => arg.exp() * inner,
                    UnaryOp::Ln => inner / arg,
                    UnaryOp::Sqrt => inner / (2.0 * arg.sqrt()),
                    UnaryOp::Abs => Expr::unary(UnaryOp::Sign, arg.clone()) * inner,
                    // A step function is flat almost everywhere.
                    UnaryOp::Sign => Expr::constant(0.0),
                }
            }
            Node::Powi { arg, exponent } => {
                let inner = arg.derivative_inner(name, index, memo);
                Expr::constant(f64::from(*exponent)) * arg.powi(exponent - 1) * inner
            }
            Node::Binary { op, lhs, rhs } => {
                let dl = lhs.derivative_inner(name, index, memo);
                let dr = rhs.derivative_inner(name, index, memo);
                match op {
                    BinaryOp::Add => dl + dr,
                    BinaryOp::Sub => dl - dr,
                    BinaryOp::Mul => dl * rhs + lhs * dr,
                    BinaryOp::Div => (dl * rhs - lhs * dr) / (rhs * rhs),
                    BinaryOp::Pow => {
                        if let Some(c) = rhs.as_constant() {
                            Expr::constant(c) * lhs.powf(c - 1.0) * dl
                        } else {
                            self.clone() * (dr * lhs.ln() + rhs * dl / lhs)
                        }
                    }
                }
            }
        };
        memo.insert(key, result.clone());
        result
    }

    /// Collects every variable the expression structurally mentions.
    pub(crate) fn collect_variables(&self, out: &mut IndexSet<(&'static str, usize)>) {
        let mut visited: FxHashSet<*const Node> = FxHashSet::default();
        self.collect_variables_inner(out, &mut visited);
    }

    fn collect_variables_inner(
        &self,
        out: &mut IndexSet<(&'static str, usize)>,
        visited: &mut FxHashSet<*const Node>,
    ) {
        if !visited.insert(Rc::as_ptr(&self.0)) {
            return;
        }
        match &*self.0 {
            Node::Constant(_) => {}
            Node::Variable { name, index } => {
                out.insert((*name, *index));
            }
            Node::Unary { arg, .. } | Node::Powi { arg, .. } => {
                arg.collect_variables_inner(out, visited);
            }
            Node::Binary { lhs, rhs, .. } => {
                lhs.collect_variables_inner(out, visited);
                rhs.collect_variables_inner(out, visited);
            }
        }
    }

    /// Does the expression mention any of `variables`?
    pub(crate) fn references_any(&self, variables: &FxHashSet<(&'static str, usize)>) -> bool {
        let mut visited: FxHashSet<*const Node> = FxHashSet::default();
        self.references_any_inner(variables, &mut visited)
    }

    // Relies on short-circuiting: a node already in `visited` has been fully
    // explored without finding a match, so revisiting it cannot either.
    fn references_any_inner(
        &self,
        variables: &FxHashSet<(&'static str, usize)>,
        visited: &mut FxHashSet<*const Node>,
    ) -> bool {
        if !visited.insert(Rc::as_ptr(&self.0)) {
            return false;
        }
        match &*self.0 {
            Node::Constant(_) => false,
            Node::Variable { name, index } => variables.contains(&(*name, *index)),
            Node::Unary { arg, .. } | Node::Powi { arg, .. } => {
                arg.references_any_inner(variables, visited)
            }
            Node::Binary { lhs, rhs, .. } => {
                lhs.references_any_inner(variables, visited)
                    || rhs.references_any_inner(variables, visited)
            }
        }
    }

    /// Evaluates the expression over `input`, laid out per `layout`.
    pub(crate) fn eval(
        &self,
        layout: &VarLayout,
        input: &[f64],
        memo: &mut FxHashMap<*const Node, f64>,
    ) -> f64 {
        let key = Rc::as_ptr(&self.0);
        if let Some(&value) = memo.get(&key) {
            return value;
        }
        let value = match &*self.0 {
            Node::Constant(c) => *c,
            Node::Variable { name, index } => {
                let offset = layout
                    .offset_of(name)
                    .expect("expression mentions a variable set absent from the layout");
                input[offset + index]
            }
            Node::Unary { op, arg } => op.apply(arg.eval(layout, input, memo)),
            Node::Powi { arg, exponent } => arg.eval(layout, input, memo).powi(*exponent),
            Node::Binary { op, lhs, rhs } => {
                op.apply(lhs.eval(layout, input, memo), rhs.eval(layout, input, memo))
            }
        };
        memo.insert(key, value);
        value
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

macro_rules! impl_expr_op {
    ($trait_:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait_<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }
        impl std::ops::$trait_<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self, rhs.clone())
            }
        }
        impl std::ops::$trait_<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
        impl std::ops::$trait_<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }
        impl std::ops::$trait_<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, Expr::constant(rhs))
            }
        }
        impl std::ops::$trait_<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self.clone(), Expr::constant(rhs))
            }
        }
        impl std::ops::$trait_<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs)
            }
        }
        impl std::ops::$trait_<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::constant(self), rhs.clone())
            }
        }
    };
}

impl_expr_op!(Add, add, BinaryOp::Add);
impl_expr_op!(Sub, sub, BinaryOp::Sub);
impl_expr_op!(Mul, mul, BinaryOp::Mul);
impl_expr_op!(Div, div, BinaryOp::Div);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl std::ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}
