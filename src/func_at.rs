//! Traversal helpers for intra-function entities.
//!
//! [`FuncAt<P>`]/[`FuncAtMut<P>`] are like `(&FuncBody, P)`/`(&mut FuncBody, P`)
//! (where `P` is some type describing a "position" in the function), except:
//! * they only borrow the [`EntityDefs`] fields of [`FuncBody`]
//!   * this can prevent borrow conflicts, especially when mutating the `block`
//!     (i.e. statements) while also defining new expressions
//!   * it also avoids accidentally accessing parts of the function body
//!     without going through `P` (as [`EntityDefs`] requires keys for any access)
//! * they're dedicated types with inherent methods and trait `impl`s

use crate::{EntityDefs, Expr, ExprKind, FuncBody, LocalVar, LocalVarDecl, UnaryOp};
use smallvec::{SmallVec, smallvec};

/// Immutable traversal (i.e. visiting) helper for intra-function entities.
///
/// The point/position type `P` should be an entity (or `()` for "anywhere").
#[derive(Copy, Clone)]
pub struct FuncAt<'a, P: Copy> {
    pub exprs: &'a EntityDefs<Expr>,
    pub locals: &'a EntityDefs<LocalVar>,

    pub position: P,
}

impl<'a, P: Copy> FuncAt<'a, P> {
    /// Reposition to `new_position`.
    pub fn at<P2: Copy>(self, new_position: P2) -> FuncAt<'a, P2> {
        FuncAt { exprs: self.exprs, locals: self.locals, position: new_position }
    }
}

impl<'a> FuncAt<'a, Expr> {
    pub fn def(self) -> &'a ExprKind {
        &self.exprs[self.position]
    }

    /// If this is `&x`, return `x`.
    pub fn addr_of_operand(self) -> Option<Expr> {
        match *self.def() {
            ExprKind::Unary { op: UnaryOp::AddrOf, arg } => Some(arg),
            _ => None,
        }
    }

    /// Direct child expressions, in evaluation order.
    pub fn children(self) -> SmallVec<[Expr; 4]> {
        match self.def() {
            ExprKind::Literal(_)
            | ExprKind::ZeroValue(_)
            | ExprKind::Param(_)
            | ExprKind::Local(_)
            | ExprKind::GlobalVar(_) => SmallVec::new(),
            ExprKind::Construct { args, .. }
            | ExprKind::Call { args, .. }
            | ExprKind::Builtin { args, .. } => args.clone(),
            &ExprKind::Unary { arg, .. } | &ExprKind::Bitcast { arg, .. } => smallvec![arg],
            &ExprKind::Member { base, .. } | &ExprKind::Swizzle { base, .. } => smallvec![base],
            &ExprKind::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            &ExprKind::Index { base, index } => smallvec![base, index],
        }
    }
}

impl<'a> FuncAt<'a, LocalVar> {
    pub fn def(self) -> &'a LocalVarDecl {
        &self.locals[self.position]
    }
}

/// Mutable traversal (i.e. transforming) helper for intra-function entities.
///
/// The point/position type `P` should be an entity (or `()` for "anywhere").
pub struct FuncAtMut<'a, P: Copy> {
    pub exprs: &'a mut EntityDefs<Expr>,
    pub locals: &'a mut EntityDefs<LocalVar>,

    pub position: P,
}

impl<'a, P: Copy> FuncAtMut<'a, P> {
    /// Emulate a "reborrow", which is automatic only for `&mut` types.
    pub fn reborrow(&mut self) -> FuncAtMut<'_, P> {
        FuncAtMut { exprs: self.exprs, locals: self.locals, position: self.position }
    }

    /// Reposition to `new_position`.
    pub fn at<P2: Copy>(self, new_position: P2) -> FuncAtMut<'a, P2> {
        FuncAtMut { exprs: self.exprs, locals: self.locals, position: new_position }
    }

    /// Demote to a `FuncAt`, with the same `position`.
    pub fn freeze(self) -> FuncAt<'a, P> {
        let FuncAtMut { exprs, locals, position } = self;
        FuncAt { exprs, locals, position }
    }

    /// Define a new expression (which must be used exactly once afterwards).
    pub fn define_expr(&mut self, kind: ExprKind) -> Expr {
        self.exprs.define(kind)
    }

    pub fn define_local(&mut self, decl: LocalVarDecl) -> LocalVar {
        self.locals.define(decl)
    }
}

impl<'a> FuncAtMut<'a, Expr> {
    pub fn def(self) -> &'a mut ExprKind {
        &mut self.exprs[self.position]
    }
}

impl<'a> FuncAtMut<'a, LocalVar> {
    pub fn def(self) -> &'a mut LocalVarDecl {
        &mut self.locals[self.position]
    }
}

impl FuncBody {
    /// Start immutably traversing the function at `position`.
    pub fn at<P: Copy>(&self, position: P) -> FuncAt<'_, P> {
        FuncAt { exprs: &self.exprs, locals: &self.locals, position }
    }

    /// Start mutably traversing the function at `position`.
    pub fn at_mut<P: Copy>(&mut self, position: P) -> FuncAtMut<'_, P> {
        FuncAtMut { exprs: &mut self.exprs, locals: &mut self.locals, position }
    }
}
