//! Construction shorthands, used by passes (and tests) to build new IR.

use crate::{
    Access, AddrSpace, BinaryOp, BuiltinFn, ConstValue, Expr, ExprKind, Func, FuncBody, FuncDecl,
    GlobalVar, GlobalVarDecl, InternedStr, IoAttrs, Item, Literal, LocalKind, LocalVar,
    LocalVarDecl, Module, Struct, StructDecl, StructMember, Type, UnaryOp, ValidationWaivers,
};
use smallvec::SmallVec;

impl Module {
    /// Define a struct and append it to `items`.
    pub fn define_struct(&mut self, decl: StructDecl) -> Struct {
        let s = self.structs.define(decl);
        self.items.push(Item::Struct(s));
        s
    }

    pub fn define_global_var(&mut self, decl: GlobalVarDecl) -> GlobalVar {
        let gv = self.global_vars.define(decl);
        self.items.push(Item::GlobalVar(gv));
        gv
    }

    pub fn define_func(&mut self, decl: FuncDecl) -> Func {
        let func = self.funcs.define(decl);
        self.items.push(Item::Func(func));
        func
    }

    /// Insert `new_item` right before `before` in `items` (or at the end, if
    /// `before` isn't live).
    pub fn insert_item_before(&mut self, before: Item, new_item: Item) {
        match self.items.iter().position(|&item| item == before) {
            Some(idx) => self.items.insert(idx, new_item),
            None => self.items.push(new_item),
        }
    }

    pub fn remove_item(&mut self, item: Item) {
        self.items.retain(|&i| i != item);
    }
}

impl StructDecl {
    pub fn new(name: InternedStr, members: impl IntoIterator<Item = StructMember>) -> Self {
        Self { name, members: members.into_iter().collect() }
    }
}

impl StructMember {
    pub fn new(name: InternedStr, ty: Type) -> Self {
        Self { name, ty, io: IoAttrs::default(), offset: None }
    }
}

impl GlobalVarDecl {
    pub fn new(name: InternedStr, ty: Type, addr_space: AddrSpace) -> Self {
        let access = match addr_space {
            AddrSpace::Uniform | AddrSpace::Handle | AddrSpace::PushConstant | AddrSpace::In => {
                Access::Read
            }
            _ => Access::ReadWrite,
        };
        Self {
            name,
            ty,
            addr_space,
            access,
            binding: None,
            initializer: None,
            io: IoAttrs::default(),
        }
    }
}

impl FuncDecl {
    /// A regular (non-entry-point) function with an empty body.
    pub fn new(name: InternedStr) -> Self {
        Self {
            name,
            stage: None,
            workgroup_size: None,
            params: SmallVec::new(),
            ret: None,
            body: FuncBody::default(),
        }
    }
}

impl LocalVarDecl {
    pub fn new_let(name: InternedStr, ty: Type, init: Expr) -> Self {
        Self {
            name,
            ty,
            kind: LocalKind::Let,
            init: Some(init),
            waivers: ValidationWaivers::default(),
        }
    }

    pub fn new_var(name: InternedStr, ty: Type, init: Option<Expr>) -> Self {
        Self {
            name,
            ty,
            kind: LocalKind::Var(AddrSpace::Function),
            init,
            waivers: ValidationWaivers::default(),
        }
    }
}

// Expression shorthands, all defining a new `Expr` in `self.exprs`.
impl FuncBody {
    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        self.exprs.define(kind)
    }

    pub fn local(&mut self, decl: LocalVarDecl) -> LocalVar {
        self.locals.define(decl)
    }

    pub fn lit(&mut self, lit: Literal) -> Expr {
        self.expr(ExprKind::Literal(lit))
    }

    pub fn param(&mut self, idx: u32) -> Expr {
        self.expr(ExprKind::Param(idx))
    }

    pub fn local_ref(&mut self, local: LocalVar) -> Expr {
        self.expr(ExprKind::Local(local))
    }

    pub fn global_ref(&mut self, gv: GlobalVar) -> Expr {
        self.expr(ExprKind::GlobalVar(gv))
    }

    pub fn addr_of(&mut self, arg: Expr) -> Expr {
        self.expr(ExprKind::Unary { op: UnaryOp::AddrOf, arg })
    }

    pub fn deref(&mut self, arg: Expr) -> Expr {
        self.expr(ExprKind::Unary { op: UnaryOp::Deref, arg })
    }

    pub fn member(&mut self, base: Expr, member: u32) -> Expr {
        self.expr(ExprKind::Member { base, member })
    }

    pub fn call(&mut self, callee: Func, args: impl IntoIterator<Item = Expr>) -> Expr {
        self.expr(ExprKind::Call { callee, args: args.into_iter().collect() })
    }

    pub fn builtin(&mut self, func: BuiltinFn, args: impl IntoIterator<Item = Expr>) -> Expr {
        self.expr(ExprKind::Builtin { func, args: args.into_iter().collect() })
    }

    pub fn index(&mut self, base: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index { base, index })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary { op, lhs, rhs })
    }

    pub fn construct(&mut self, ty: Type, args: impl IntoIterator<Item = Expr>) -> Expr {
        self.expr(ExprKind::Construct { ty, args: args.into_iter().collect() })
    }

    /// Materialize a module-scope constant as a (tree of) expression(s).
    pub fn const_value(&mut self, value: &ConstValue) -> Expr {
        match value {
            &ConstValue::Literal(lit) => self.lit(lit),
            &ConstValue::Zero(ty) => self.expr(ExprKind::ZeroValue(ty)),
            ConstValue::Composite { ty, elems } => {
                let args: SmallVec<[Expr; 4]> =
                    elems.iter().map(|elem| self.const_value(elem)).collect();
                self.expr(ExprKind::Construct { ty: *ty, args })
            }
        }
    }
}
