//! Immutable IR traversal.

use crate::func_at::FuncAt;
use crate::{
    Block, ConstValue, Expr, ExprKind, Func, FuncDecl, FuncParam, FuncRet, GlobalVar,
    GlobalVarDecl, Item, LocalVar, LocalVarDecl, Module, Stmt, Struct, StructDecl, StructMember,
    Type, TypeKind,
};

// FIXME `Sized` bound shouldn't be needed but removing it requires
// writing `impl Visitor<'a> + ?Sized` in `fn inner_visit_with` signatures.
pub trait Visitor<'a>: Sized {
    // Context-interned leaves (no default provided).
    // NOTE: visitors wanting to look inside types need to hold their own
    // `&'a Context`, and call `cx[ty].inner_visit_with(self)` themselves.
    fn visit_type_use(&mut self, ty: Type);

    // Module-stored entity leaves (no default provided).
    fn visit_struct_use(&mut self, s: Struct);
    fn visit_global_var_use(&mut self, gv: GlobalVar);
    fn visit_func_use(&mut self, func: Func);

    // Leaves (noop default behavior).
    fn visit_local_var_use(&mut self, _local: LocalVar) {}

    // Non-leaves (defaulting to calling `.inner_visit_with(self)`).
    fn visit_module(&mut self, module: &'a Module) {
        module.inner_visit_with(self);
    }
    fn visit_type_kind(&mut self, kind: &'a TypeKind) {
        kind.inner_visit_with(self);
    }
    fn visit_struct_decl(&mut self, struct_decl: &'a StructDecl) {
        struct_decl.inner_visit_with(self);
    }
    fn visit_global_var_decl(&mut self, gv_decl: &'a GlobalVarDecl) {
        gv_decl.inner_visit_with(self);
    }
    fn visit_func_decl(&mut self, func_decl: &'a FuncDecl) {
        func_decl.inner_visit_with(self);
    }
    fn visit_local_var_decl(&mut self, func_at_local: FuncAt<'a, LocalVar>) {
        func_at_local.inner_visit_with(self);
    }
    fn visit_stmt(&mut self, func_at_stmt: FuncAt<'a, &'a Stmt>) {
        func_at_stmt.inner_visit_with(self);
    }
    fn visit_expr(&mut self, func_at_expr: FuncAt<'a, Expr>) {
        func_at_expr.inner_visit_with(self);
    }
}

/// Trait implemented on "visitable" types (shallowly visitable, at least).
///
/// That is, an `impl Visit for X` will call the relevant [`Visitor`] method for
/// `X`, typically named `Visitor::visit_X` or `Visitor::visit_X_use`.
pub trait Visit {
    fn visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>);
}

macro_rules! impl_visit {
    (
        by_val { $($by_val_method:ident($by_val_ty:ty)),* $(,)? }
        by_ref { $($by_ref_method:ident($by_ref_ty:ty)),* $(,)? }
    ) => {
        $(impl Visit for $by_val_ty {
            fn visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
                visitor.$by_val_method(*self);
            }
        })*
        $(impl Visit for $by_ref_ty {
            fn visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
                visitor.$by_ref_method(self);
            }
        })*
    };
}

impl_visit! {
    by_val {
        visit_type_use(Type),
        visit_struct_use(Struct),
        visit_global_var_use(GlobalVar),
        visit_func_use(Func),
    }
    by_ref {
        visit_module(Module),
        visit_type_kind(TypeKind),
        visit_struct_decl(StructDecl),
        visit_global_var_decl(GlobalVarDecl),
        visit_func_decl(FuncDecl),
    }
}

/// Trait implemented on "deeply visitable" types, to further "explore" a type
/// by visiting its "interior" (i.e. variants and/or fields).
///
/// That is, an `impl InnerVisit for X` will call the relevant [`Visitor`] method
/// for each `X` field, effectively performing a single level of a deep visit.
/// Also, if `Visitor::visit_X` exists for a given `X`, its default should be to
/// call `X::inner_visit_with` (i.e. so that visiting is mostly-deep by default).
pub trait InnerVisit {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>);
}

impl InnerVisit for Module {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        // NOTE: only `items` decides what's live, the arenas aren't visited.
        for item in &self.items {
            item.inner_visit_with(visitor);
        }
    }
}

impl InnerVisit for Item {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        match *self {
            Item::Struct(s) => visitor.visit_struct_use(s),
            Item::GlobalVar(gv) => visitor.visit_global_var_use(gv),
            Item::Func(func) => visitor.visit_func_use(func),
        }
    }
}

impl InnerVisit for TypeKind {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        match *self {
            TypeKind::Scalar(_)
            | TypeKind::Vector { .. }
            | TypeKind::Matrix { .. }
            | TypeKind::Atomic(_)
            | TypeKind::Texture2d { .. }
            | TypeKind::Sampler { .. } => {}

            TypeKind::Array { elem, len: _ } => visitor.visit_type_use(elem),
            TypeKind::Struct(s) => visitor.visit_struct_use(s),
            TypeKind::Ptr { addr_space: _, pointee, access: _ } => visitor.visit_type_use(pointee),
        }
    }
}

impl InnerVisit for StructDecl {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { name: _, members } = self;

        for member in members {
            let StructMember { name: _, ty, io: _, offset: _ } = *member;
            visitor.visit_type_use(ty);
        }
    }
}

impl InnerVisit for GlobalVarDecl {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { name: _, ty, addr_space: _, access: _, binding: _, initializer, io: _ } = self;

        visitor.visit_type_use(*ty);
        if let Some(initializer) = initializer {
            initializer.inner_visit_with(visitor);
        }
    }
}

impl InnerVisit for ConstValue {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        match self {
            ConstValue::Literal(_) => {}
            &ConstValue::Zero(ty) => visitor.visit_type_use(ty),
            ConstValue::Composite { ty, elems } => {
                visitor.visit_type_use(*ty);
                for elem in elems {
                    elem.inner_visit_with(visitor);
                }
            }
        }
    }
}

impl InnerVisit for FuncDecl {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { name: _, stage: _, workgroup_size: _, params, ret, body } = self;

        for param in params {
            param.inner_visit_with(visitor);
        }
        if let Some(FuncRet { ty, io: _ }) = *ret {
            visitor.visit_type_use(ty);
        }
        body.at(&body.block).inner_visit_with(visitor);
    }
}

impl InnerVisit for FuncParam {
    fn inner_visit_with<'a>(&'a self, visitor: &mut impl Visitor<'a>) {
        let Self { name: _, ty, io: _, binding: _, waivers: _ } = *self;

        visitor.visit_type_use(ty);
    }
}

// NOTE: the `FuncAt` impls below can't implement `InnerVisit` because of the
// `&'a self` requirement, whereas these have `'a` in `self: FuncAt<'a, ...>`.
impl<'a> FuncAt<'a, &'a Block> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        for stmt in &self.position.stmts {
            visitor.visit_stmt(self.at(stmt));
        }
    }
}

impl<'a> FuncAt<'a, &'a Stmt> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        match self.position {
            &Stmt::Decl(local) => {
                visitor.visit_local_var_use(local);
                visitor.visit_local_var_decl(self.at(local));
            }
            &Stmt::Assign { lhs, rhs } => {
                visitor.visit_expr(self.at(lhs));
                visitor.visit_expr(self.at(rhs));
            }
            &Stmt::Expr(e) | &Stmt::Return(Some(e)) => visitor.visit_expr(self.at(e)),
            Stmt::If { cond, then_block, else_block } => {
                visitor.visit_expr(self.at(*cond));
                self.at(then_block).inner_visit_with(visitor);
                self.at(else_block).inner_visit_with(visitor);
            }
            Stmt::Loop { body, continuing } => {
                self.at(body).inner_visit_with(visitor);
                self.at(continuing).inner_visit_with(visitor);
            }
            Stmt::Block(block) => self.at(block).inner_visit_with(visitor),
            Stmt::Break | Stmt::Continue | Stmt::Return(None) | Stmt::Discard => {}
        }
    }
}

impl<'a> FuncAt<'a, LocalVar> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        let LocalVarDecl { name: _, ty, kind: _, init, waivers: _ } = *self.def();

        visitor.visit_type_use(ty);
        if let Some(init) = init {
            visitor.visit_expr(self.at(init));
        }
    }
}

impl<'a> FuncAt<'a, Expr> {
    pub fn inner_visit_with(self, visitor: &mut impl Visitor<'a>) {
        match *self.def() {
            ExprKind::Literal(_)
            | ExprKind::Param(_)
            | ExprKind::Unary { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
            | ExprKind::Swizzle { .. }
            | ExprKind::Builtin { .. } => {}

            ExprKind::ZeroValue(ty)
            | ExprKind::Construct { ty, .. }
            | ExprKind::Bitcast { ty, .. } => visitor.visit_type_use(ty),
            ExprKind::Local(local) => visitor.visit_local_var_use(local),
            ExprKind::GlobalVar(gv) => visitor.visit_global_var_use(gv),
            ExprKind::Call { callee, .. } => visitor.visit_func_use(callee),
        }
        for child in self.children() {
            visitor.visit_expr(self.at(child));
        }
    }
}
