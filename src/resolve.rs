//! Expression typing, module validation, and dependency ordering.
//!
//! Modules are expected to arrive already valid (front-ends are responsible for
//! user-facing errors), so [`check`] mostly guards passes against producing
//! malformed output, and its diagnostics are phrased for compiler developers.

use crate::layout::Layouter;
use crate::visit::{InnerVisit, Visitor};
use crate::{
    Access, AddrSpace, BinaryOp, Block, BuiltinFn, BuiltinValue, ConstValue, Context, Diag,
    EntityOrientedDenseMap, Expr, ExprKind, Failure, Func, FuncDecl, FxIndexSet, GlobalVar, IoAttrs,
    Item, LocalKind, Module, PipelineStage, ScalarType, Stmt, Struct, Type, TypeKind, UnaryOp,
};
use itertools::Itertools as _;
use rustc_hash::FxHashSet;

/// The type of an expression, distinguishing memory references (which are
/// implicitly loaded when used as values) from plain values.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExprTy {
    Value(Type),
    Ref { addr_space: AddrSpace, store_ty: Type, access: Access },
    /// Calls to functions (or builtins) without a return value.
    Void,
}

impl ExprTy {
    /// The type of the value produced by using this expression as a value
    /// (i.e. after an implicit load, for references).
    pub fn value_ty(self) -> Option<Type> {
        match self {
            ExprTy::Value(ty) => Some(ty),
            ExprTy::Ref { store_ty, .. } => Some(store_ty),
            ExprTy::Void => None,
        }
    }
}

/// Memoized expression typing for one function.
pub struct FuncTypes<'a> {
    module: &'a Module,
    cx: &'a Context,
    func: &'a FuncDecl,
    cache: EntityOrientedDenseMap<Expr, ExprTy>,
}

impl<'a> FuncTypes<'a> {
    pub fn new(module: &'a Module, func: &'a FuncDecl) -> Self {
        Self { module, cx: module.cx_ref(), func, cache: EntityOrientedDenseMap::new() }
    }

    pub fn func(&self) -> &'a FuncDecl {
        self.func
    }

    pub fn type_of(&mut self, expr: Expr) -> Result<ExprTy, Diag> {
        if let Some(&ty) = self.cache.get(expr) {
            return Ok(ty);
        }
        let ty = self.compute(expr)?;
        self.cache.insert(expr, ty);
        Ok(ty)
    }

    /// Type of `expr` used as a value (see [`ExprTy::value_ty`]).
    pub fn value_ty(&mut self, expr: Expr) -> Result<Type, Diag> {
        self.type_of(expr)?
            .value_ty()
            .ok_or_else(|| Diag::err("call without a return value used as a value"))
    }

    fn ty_name(&self, ty: Type) -> String {
        self.module.type_name(ty)
    }

    fn mismatch(&self, what: &str, expected: Type, found: Type) -> Diag {
        Diag::err(format!(
            "{what}: expected `{}`, found `{}`",
            self.ty_name(expected),
            self.ty_name(found)
        ))
    }

    fn compute(&mut self, expr: Expr) -> Result<ExprTy, Diag> {
        let cx = self.cx;
        let func = self.func;
        let value = |ty| Ok(ExprTy::Value(ty));

        match &func.body.exprs[expr] {
            &ExprKind::Literal(lit) => value(cx.scalar_ty(lit.scalar_type())),
            &ExprKind::ZeroValue(ty) => {
                self.check_constructible(ty)?;
                value(ty)
            }
            ExprKind::Construct { ty, args } => {
                self.check_construct(*ty, args)?;
                value(*ty)
            }
            &ExprKind::Param(idx) => match func.params.get(idx as usize) {
                Some(param) => value(param.ty),
                None => Err(Diag::err(format!("parameter index {idx} out of range"))),
            },
            &ExprKind::Local(local) => {
                let decl = &func.body.locals[local];
                Ok(match decl.kind {
                    LocalKind::Let => ExprTy::Value(decl.ty),
                    LocalKind::Var(addr_space) => {
                        ExprTy::Ref { addr_space, store_ty: decl.ty, access: Access::ReadWrite }
                    }
                })
            }
            &ExprKind::GlobalVar(gv) => {
                let decl = &self.module.global_vars[gv];
                Ok(match decl.addr_space {
                    AddrSpace::Handle => ExprTy::Value(decl.ty),
                    addr_space => {
                        ExprTy::Ref { addr_space, store_ty: decl.ty, access: decl.access }
                    }
                })
            }
            &ExprKind::Unary { op, arg } => self.unary(op, arg),
            &ExprKind::Binary { op, lhs, rhs } => {
                let (l, r) = (self.value_ty(lhs)?, self.value_ty(rhs)?);
                self.binary(op, l, r).map(ExprTy::Value)
            }
            &ExprKind::Member { base, member } => {
                let base_ty = self.type_of(base)?;
                let store_ty = base_ty.value_ty().ok_or_else(|| Diag::err("member of void"))?;
                let TypeKind::Struct(s) = cx[store_ty] else {
                    return Err(Diag::err(format!(
                        "member access on non-struct `{}`",
                        self.ty_name(store_ty)
                    )));
                };
                let member_ty = match self.module.structs[s].members.get(member as usize) {
                    Some(m) => m.ty,
                    None => return Err(Diag::err(format!("member index {member} out of range"))),
                };
                Ok(refine(base_ty, member_ty))
            }
            &ExprKind::Index { base, index } => {
                let index_ty = self.value_ty(index)?;
                if !matches!(cx[index_ty], TypeKind::Scalar(ScalarType::I32 | ScalarType::U32)) {
                    return Err(Diag::err(format!(
                        "index must be `i32` or `u32`, found `{}`",
                        self.ty_name(index_ty)
                    )));
                }
                let base_ty = self.type_of(base)?;
                let store_ty = base_ty.value_ty().ok_or_else(|| Diag::err("index of void"))?;
                let elem_ty = match cx[store_ty] {
                    TypeKind::Array { elem, .. } => elem,
                    TypeKind::Vector { elem, .. } => cx.scalar_ty(elem),
                    TypeKind::Matrix { rows, elem, .. } => cx.vector_ty(elem, rows),
                    _ => {
                        return Err(Diag::err(format!(
                            "cannot index into `{}`",
                            self.ty_name(store_ty)
                        )));
                    }
                };
                Ok(refine(base_ty, elem_ty))
            }
            ExprKind::Swizzle { base, components } => {
                let base_ty = self.value_ty(*base)?;
                let TypeKind::Vector { elem, len } = cx[base_ty] else {
                    return Err(Diag::err("swizzle of non-vector"));
                };
                if components.is_empty() || components.iter().any(|&c| c >= len) {
                    return Err(Diag::err(format!("invalid swizzle of `vec{len}`")));
                }
                match components.len() {
                    1 => value(cx.scalar_ty(elem)),
                    n => value(cx.vector_ty(elem, n as u8)),
                }
            }
            ExprKind::Call { callee, args } => {
                let callee_decl = &self.module.funcs[*callee];
                if callee_decl.is_entry_point() {
                    return Err(Diag::err(format!(
                        "entry point `{}` cannot be called",
                        &cx[callee_decl.name]
                    )));
                }
                if args.len() != callee_decl.params.len() {
                    return Err(Diag::err(format!(
                        "`{}` expects {} arguments, found {}",
                        &cx[callee_decl.name],
                        callee_decl.params.len(),
                        args.len()
                    )));
                }
                for (&arg, param) in args.iter().zip(&callee_decl.params) {
                    let arg_ty = self.value_ty(arg)?;
                    if arg_ty != param.ty {
                        let what = format!(
                            "argument `{}` of `{}`",
                            &cx[param.name], &cx[callee_decl.name]
                        );
                        return Err(self.mismatch(&what, param.ty, arg_ty));
                    }
                }
                Ok(callee_decl.ret.map_or(ExprTy::Void, |ret| ExprTy::Value(ret.ty)))
            }
            ExprKind::Builtin { func: builtin, args } => self.builtin(*builtin, args),
            &ExprKind::Bitcast { ty, arg } => {
                let arg_ty = self.value_ty(arg)?;
                let shape = |ty| match cx[ty] {
                    TypeKind::Scalar(s) => Some((s, 1)),
                    TypeKind::Vector { elem, len } => Some((elem, len)),
                    _ => None,
                };
                let is_32bit = |s| matches!(s, ScalarType::I32 | ScalarType::U32 | ScalarType::F32);
                match (shape(ty), shape(arg_ty)) {
                    (Some((to, to_len)), Some((from, from_len)))
                        if to_len == from_len && is_32bit(to) && is_32bit(from) =>
                    {
                        value(ty)
                    }
                    _ => Err(Diag::err(format!(
                        "invalid bitcast from `{}` to `{}`",
                        self.ty_name(arg_ty),
                        self.ty_name(ty)
                    ))),
                }
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, arg: Expr) -> Result<ExprTy, Diag> {
        let cx = self.cx;
        match op {
            UnaryOp::AddrOf => match self.type_of(arg)? {
                ExprTy::Ref { addr_space, store_ty, access } => {
                    Ok(ExprTy::Value(cx.ptr_ty(addr_space, store_ty, access)))
                }
                _ => Err(Diag::err("cannot take the address of a value")),
            },
            UnaryOp::Deref => {
                let ptr_ty = self.value_ty(arg)?;
                match cx[ptr_ty] {
                    TypeKind::Ptr { addr_space, pointee, access } => {
                        Ok(ExprTy::Ref { addr_space, store_ty: pointee, access })
                    }
                    _ => Err(Diag::err(format!(
                        "cannot dereference non-pointer `{}`",
                        self.ty_name(ptr_ty)
                    ))),
                }
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                let ty = self.value_ty(arg)?;
                let ok = match (op, self.module.scalar_of(ty)) {
                    (UnaryOp::Neg, Some(s)) => s.is_float() || s == ScalarType::I32,
                    (UnaryOp::Not, Some(s)) => s == ScalarType::Bool,
                    (UnaryOp::BitNot, Some(s)) => s.is_integer(),
                    _ => false,
                };
                if ok && !matches!(cx[ty], TypeKind::Matrix { .. }) {
                    Ok(ExprTy::Value(ty))
                } else {
                    Err(Diag::err(format!("invalid operand `{}` for {op:?}", self.ty_name(ty))))
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, l: Type, r: Type) -> Result<Type, Diag> {
        let cx = self.cx;
        let invalid = || {
            Diag::err(format!(
                "invalid operands `{}` {} `{}`",
                self.ty_name(l),
                op.symbol(),
                self.ty_name(r)
            ))
        };
        let bool_ty_like = |ty: Type| match cx[ty] {
            TypeKind::Vector { len, .. } => cx.vector_ty(ScalarType::Bool, len),
            _ => cx.scalar_ty(ScalarType::Bool),
        };
        let (lk, rk) = (&cx[l], &cx[r]);
        let is_matrix = |k: &TypeKind| matches!(k, TypeKind::Matrix { .. });
        let (ls, rs) = (self.module.scalar_of(l), self.module.scalar_of(r));

        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                if matches!(lk, TypeKind::Scalar(ScalarType::Bool)) && l == r {
                    Ok(l)
                } else {
                    Err(invalid())
                }
            }
            _ if op.is_comparison() => {
                let ordered = !matches!(op, BinaryOp::Eq | BinaryOp::Ne);
                match ls {
                    Some(s) if l == r && !is_matrix(lk) && !(ordered && s == ScalarType::Bool) => {
                        Ok(bool_ty_like(l))
                    }
                    _ => Err(invalid()),
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let same_shape = match (lk, rk) {
                    (TypeKind::Scalar(_), TypeKind::Scalar(_)) => true,
                    (TypeKind::Vector { len: a, .. }, TypeKind::Vector { len: b, .. }) => a == b,
                    _ => false,
                };
                match (ls, rs) {
                    (Some(s), Some(ScalarType::U32)) if s.is_integer() && same_shape => Ok(l),
                    _ => Err(invalid()),
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match ls {
                Some(s) if l == r && !is_matrix(lk) => {
                    let bool_ok = op != BinaryOp::BitXor && s == ScalarType::Bool;
                    if s.is_integer() || bool_ok { Ok(l) } else { Err(invalid()) }
                }
                _ => Err(invalid()),
            },
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let numeric = |s: Option<ScalarType>| s.is_some_and(|s| s != ScalarType::Bool);
                if !numeric(ls) || ls != rs {
                    return Err(invalid());
                }
                match (lk, rk) {
                    (TypeKind::Matrix { .. }, TypeKind::Matrix { .. })
                        if l == r && matches!(op, BinaryOp::Add | BinaryOp::Sub) =>
                    {
                        Ok(l)
                    }
                    (TypeKind::Matrix { .. }, _) | (_, TypeKind::Matrix { .. }) => {
                        if op != BinaryOp::Mul {
                            return Err(invalid());
                        }
                        self.matrix_mul(l, r).ok_or_else(invalid)
                    }
                    _ if l == r => Ok(l),
                    (TypeKind::Vector { .. }, TypeKind::Scalar(_)) => Ok(l),
                    (TypeKind::Scalar(_), TypeKind::Vector { .. }) => Ok(r),
                    _ => Err(invalid()),
                }
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                Err(invalid())
            }
        }
    }

    fn matrix_mul(&self, l: Type, r: Type) -> Option<Type> {
        let cx = self.cx;
        match (&cx[l], &cx[r]) {
            (&TypeKind::Matrix { columns, rows, elem }, &TypeKind::Vector { len, .. }) => {
                (len == columns).then(|| cx.vector_ty(elem, rows))
            }
            (&TypeKind::Vector { len, .. }, &TypeKind::Matrix { columns, rows, elem }) => {
                (len == rows).then(|| cx.vector_ty(elem, columns))
            }
            (
                &TypeKind::Matrix { columns: c1, rows: r1, elem },
                &TypeKind::Matrix { columns: c2, rows: r2, .. },
            ) => (c1 == r2).then(|| cx.matrix_ty(c2, r1, elem)),
            (TypeKind::Matrix { .. }, TypeKind::Scalar(_)) => Some(l),
            (TypeKind::Scalar(_), TypeKind::Matrix { .. }) => Some(r),
            _ => None,
        }
    }

    fn builtin(&mut self, builtin: BuiltinFn, args: &[Expr]) -> Result<ExprTy, Diag> {
        let cx = self.cx;
        let arg_tys: Vec<Type> =
            args.iter().map(|&arg| self.value_ty(arg)).collect::<Result<_, _>>()?;
        let invalid = || {
            Diag::err(format!(
                "invalid arguments for `{}({})`",
                builtin.name(),
                arg_tys.iter().map(|&ty| self.ty_name(ty)).join(", ")
            ))
        };
        let same = |n: usize| arg_tys.len() == n && arg_tys.iter().all_equal();
        let scalar = |ty: Type| self.module.scalar_of(ty);
        let is_vector = |ty: Type| matches!(cx[ty], TypeKind::Vector { .. });
        let non_matrix = |ty: Type| !matches!(cx[ty], TypeKind::Matrix { .. });
        let float = |ty: Type| non_matrix(ty) && scalar(ty).is_some_and(|s| s.is_float());
        let numeric =
            |ty: Type| non_matrix(ty) && scalar(ty).is_some_and(|s| s != ScalarType::Bool);
        let value = |ty| Ok(ExprTy::Value(ty));

        match builtin {
            BuiltinFn::Abs if same(1) && numeric(arg_tys[0]) => value(arg_tys[0]),
            BuiltinFn::Sqrt
            | BuiltinFn::Floor
            | BuiltinFn::Ceil
            | BuiltinFn::Fract
            | BuiltinFn::Sin
            | BuiltinFn::Cos
            | BuiltinFn::Exp
            | BuiltinFn::Log
                if same(1) && float(arg_tys[0]) =>
            {
                value(arg_tys[0])
            }
            BuiltinFn::Normalize if same(1) && float(arg_tys[0]) && is_vector(arg_tys[0]) => {
                value(arg_tys[0])
            }
            BuiltinFn::Length if same(1) && float(arg_tys[0]) => {
                value(cx.scalar_ty(scalar(arg_tys[0]).ok_or_else(invalid)?))
            }
            BuiltinFn::Min | BuiltinFn::Max if same(2) && numeric(arg_tys[0]) => value(arg_tys[0]),
            BuiltinFn::Clamp if same(3) && numeric(arg_tys[0]) => value(arg_tys[0]),
            BuiltinFn::Pow if same(2) && float(arg_tys[0]) => value(arg_tys[0]),
            BuiltinFn::Fma | BuiltinFn::Mix if same(3) && float(arg_tys[0]) => value(arg_tys[0]),
            BuiltinFn::Dot if same(2) && numeric(arg_tys[0]) && is_vector(arg_tys[0]) => {
                value(cx.scalar_ty(scalar(arg_tys[0]).ok_or_else(invalid)?))
            }
            BuiltinFn::Cross
                if same(2)
                    && float(arg_tys[0])
                    && matches!(cx[arg_tys[0]], TypeKind::Vector { len: 3, .. }) =>
            {
                value(arg_tys[0])
            }
            BuiltinFn::Select if arg_tys.len() == 3 && arg_tys[0] == arg_tys[1] => {
                let cond_ok = match (&cx[arg_tys[0]], &cx[arg_tys[2]]) {
                    (_, TypeKind::Scalar(ScalarType::Bool)) => true,
                    (
                        TypeKind::Vector { len, .. },
                        TypeKind::Vector { elem: ScalarType::Bool, len: cond_len },
                    ) => len == cond_len,
                    _ => false,
                };
                if cond_ok { value(arg_tys[0]) } else { Err(invalid()) }
            }
            BuiltinFn::ArrayLength if arg_tys.len() == 1 => match cx[arg_tys[0]] {
                TypeKind::Ptr { addr_space: AddrSpace::Storage, pointee, .. }
                    if matches!(cx[pointee], TypeKind::Array { len: None, .. }) =>
                {
                    value(cx.scalar_ty(ScalarType::U32))
                }
                _ => Err(invalid()),
            },
            BuiltinFn::TextureSample if arg_tys.len() == 3 => {
                match (&cx[arg_tys[0]], &cx[arg_tys[1]], &cx[arg_tys[2]]) {
                    (
                        TypeKind::Texture2d { sampled: ScalarType::F32 },
                        TypeKind::Sampler { comparison: false },
                        TypeKind::Vector { elem: ScalarType::F32, len: 2 },
                    ) => value(cx.vector_ty(ScalarType::F32, 4)),
                    _ => Err(invalid()),
                }
            }
            BuiltinFn::TextureLoad if arg_tys.len() == 3 => {
                match (&cx[arg_tys[0]], &cx[arg_tys[1]], &cx[arg_tys[2]]) {
                    (
                        &TypeKind::Texture2d { sampled },
                        TypeKind::Vector { elem: ScalarType::I32 | ScalarType::U32, len: 2 },
                        TypeKind::Scalar(ScalarType::I32 | ScalarType::U32),
                    ) => value(cx.vector_ty(sampled, 4)),
                    _ => Err(invalid()),
                }
            }
            BuiltinFn::WorkgroupBarrier | BuiltinFn::StorageBarrier if args.is_empty() => {
                Ok(ExprTy::Void)
            }
            _ => Err(invalid()),
        }
    }

    fn check_constructible(&self, ty: Type) -> Result<(), Diag> {
        match self.cx[ty] {
            TypeKind::Scalar(_)
            | TypeKind::Vector { .. }
            | TypeKind::Matrix { .. }
            | TypeKind::Struct(_)
            | TypeKind::Array { len: Some(_), .. } => Ok(()),
            _ => Err(Diag::err(format!("`{}` is not constructible", self.ty_name(ty)))),
        }
    }

    fn check_construct(&mut self, ty: Type, args: &[Expr]) -> Result<(), Diag> {
        let cx = self.cx;
        self.check_constructible(ty)?;
        let arg_tys: Vec<Type> =
            args.iter().map(|&arg| self.value_ty(arg)).collect::<Result<_, _>>()?;
        if arg_tys.is_empty() {
            return Ok(());
        }
        let invalid = || {
            Diag::err(format!(
                "invalid construction `{}({})`",
                self.ty_name(ty),
                arg_tys.iter().map(|&arg_ty| self.ty_name(arg_ty)).join(", ")
            ))
        };
        let ok = match cx[ty] {
            TypeKind::Scalar(_) => {
                arg_tys.len() == 1 && matches!(cx[arg_tys[0]], TypeKind::Scalar(_))
            }
            TypeKind::Vector { elem, len } => {
                // Splats and (same-length) vector conversions.
                let single_conversion = arg_tys.len() == 1
                    && match cx[arg_tys[0]] {
                        TypeKind::Scalar(_) => true,
                        TypeKind::Vector { len: arg_len, .. } => arg_len == len,
                        _ => false,
                    };
                let components: Option<u32> = arg_tys
                    .iter()
                    .map(|&arg_ty| match cx[arg_ty] {
                        TypeKind::Scalar(s) if s == elem => Some(1),
                        TypeKind::Vector { elem: e, len } if e == elem => Some(u32::from(len)),
                        _ => None,
                    })
                    .sum();
                single_conversion || components == Some(u32::from(len))
            }
            TypeKind::Matrix { columns, rows, elem } => {
                let column = cx.vector_ty(elem, rows);
                let scalar = cx.scalar_ty(elem);
                (arg_tys.len() == usize::from(columns) && arg_tys.iter().all(|&t| t == column))
                    || (arg_tys.len() == usize::from(columns) * usize::from(rows)
                        && arg_tys.iter().all(|&t| t == scalar))
            }
            TypeKind::Array { elem, len: Some(len) } => {
                arg_tys.len() == len.get() as usize && arg_tys.iter().all(|&t| t == elem)
            }
            TypeKind::Struct(s) => {
                let members = &self.module.structs[s].members;
                members.len() == arg_tys.len()
                    && members.iter().zip(&arg_tys).all(|(m, &t)| m.ty == t)
            }
            _ => false,
        };
        if ok { Ok(()) } else { Err(invalid()) }
    }
}

/// Project a member/element type through a reference (keeping it a reference),
/// or a value (keeping it a value).
fn refine(base: ExprTy, elem_ty: Type) -> ExprTy {
    match base {
        ExprTy::Ref { addr_space, store_ty: _, access } => {
            ExprTy::Ref { addr_space, store_ty: elem_ty, access }
        }
        ExprTy::Value(_) | ExprTy::Void => ExprTy::Value(elem_ty),
    }
}

// Type queries shared by passes and printers.
impl Module {
    /// Human-readable (WGSL-like) name of a type, for diagnostics and naming.
    pub fn type_name(&self, ty: Type) -> String {
        let cx = self.cx_ref();
        match cx[ty] {
            TypeKind::Scalar(s) => s.name().to_string(),
            TypeKind::Vector { elem, len } => format!("vec{len}<{}>", elem.name()),
            TypeKind::Matrix { columns, rows, elem } => {
                format!("mat{columns}x{rows}<{}>", elem.name())
            }
            TypeKind::Array { elem, len: Some(len) } => {
                format!("array<{}, {len}>", self.type_name(elem))
            }
            TypeKind::Array { elem, len: None } => format!("array<{}>", self.type_name(elem)),
            TypeKind::Atomic(s) => format!("atomic<{}>", s.name()),
            TypeKind::Struct(s) => cx[self.structs[s].name].to_string(),
            TypeKind::Ptr { addr_space, pointee, access } => {
                let access = match access {
                    Access::Read => "read",
                    Access::ReadWrite => "read_write",
                };
                format!("ptr<{}, {}, {access}>", addr_space.name(), self.type_name(pointee))
            }
            TypeKind::Texture2d { sampled } => format!("texture_2d<{}>", sampled.name()),
            TypeKind::Sampler { comparison: false } => "sampler".to_string(),
            TypeKind::Sampler { comparison: true } => "sampler_comparison".to_string(),
        }
    }

    /// Scalar type of a scalar, vector or matrix type.
    pub fn scalar_of(&self, ty: Type) -> Option<ScalarType> {
        match self.cx_ref()[ty] {
            TypeKind::Scalar(s) => Some(s),
            TypeKind::Vector { elem, .. } | TypeKind::Matrix { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Whether `ty` is, or (through arrays/structs) contains, a matrix.
    pub fn contains_matrix(&self, ty: Type) -> bool {
        match self.cx_ref()[ty] {
            TypeKind::Matrix { .. } => true,
            TypeKind::Array { elem, .. } => self.contains_matrix(elem),
            TypeKind::Struct(s) => {
                self.structs[s].members.iter().any(|m| self.contains_matrix(m.ty))
            }
            _ => false,
        }
    }

    pub fn is_runtime_array(&self, ty: Type) -> bool {
        matches!(self.cx_ref()[ty], TypeKind::Array { len: None, .. })
    }

    /// All builtins carried by a value of type `ty` with attributes `io`,
    /// including those of (top-level) struct members.
    pub fn io_builtins(&self, ty: Type, io: &IoAttrs) -> Vec<BuiltinValue> {
        match self.cx_ref()[ty] {
            TypeKind::Struct(s) => {
                self.structs[s].members.iter().filter_map(|m| m.io.builtin).collect()
            }
            _ => io.builtin.into_iter().collect(),
        }
    }
}

/// Collects the top-level items one declaration depends on.
struct ItemDeps<'a> {
    cx: &'a Context,
    seen_types: FxHashSet<Type>,
    deps: FxIndexSet<Item>,
}

impl<'a> Visitor<'a> for ItemDeps<'a> {
    fn visit_type_use(&mut self, ty: Type) {
        if self.seen_types.insert(ty) {
            let cx = self.cx;
            cx[ty].inner_visit_with(self);
        }
    }
    fn visit_struct_use(&mut self, s: Struct) {
        self.deps.insert(Item::Struct(s));
    }
    fn visit_global_var_use(&mut self, gv: GlobalVar) {
        self.deps.insert(Item::GlobalVar(gv));
    }
    fn visit_func_use(&mut self, func: Func) {
        self.deps.insert(Item::Func(func));
    }
}

/// Top-level items directly used by `item`'s declaration, in first-use order.
///
/// A recursive function is its own dependency.
pub fn item_deps(module: &Module, item: Item) -> FxIndexSet<Item> {
    let mut collector = ItemDeps {
        cx: module.cx_ref(),
        seen_types: FxHashSet::default(),
        deps: FxIndexSet::default(),
    };
    match item {
        Item::Struct(s) => collector.visit_struct_decl(&module.structs[s]),
        Item::GlobalVar(gv) => collector.visit_global_var_decl(&module.global_vars[gv]),
        Item::Func(func) => collector.visit_func_decl(&module.funcs[func]),
    }
    collector.deps
}

/// Live items in declaration order, except that every item comes after all of
/// the items it depends on (i.e. a stable topological sort).
pub fn dependency_ordered_items(module: &Module) -> Result<Vec<Item>, Diag> {
    #[derive(Copy, Clone, PartialEq, Eq)]
    enum State {
        Visiting,
        Done,
    }

    struct Sorter<'a> {
        module: &'a Module,
        live: FxHashSet<Item>,
        states: rustc_hash::FxHashMap<Item, State>,
        order: Vec<Item>,
    }

    impl Sorter<'_> {
        fn visit(&mut self, item: Item) -> Result<(), Diag> {
            let cx = self.module.cx_ref();
            match self.states.get(&item) {
                Some(State::Done) => return Ok(()),
                Some(State::Visiting) => {
                    return Err(Diag::err(format!(
                        "cyclic dependency involving `{}`",
                        &cx[self.module.item_name(item)]
                    )));
                }
                None => {}
            }
            if !self.live.contains(&item) {
                return Err(Diag::err(format!(
                    "`{}` is used but not declared",
                    &cx[self.module.item_name(item)]
                )));
            }
            self.states.insert(item, State::Visiting);
            for dep in item_deps(self.module, item) {
                self.visit(dep)?;
            }
            self.states.insert(item, State::Done);
            self.order.push(item);
            Ok(())
        }
    }

    let mut sorter = Sorter {
        module,
        live: module.items.iter().copied().collect(),
        states: Default::default(),
        order: Vec::with_capacity(module.items.len()),
    };
    for &item in &module.items {
        sorter.visit(item)?;
    }
    Ok(sorter.order)
}

/// Validate `module`, returning all the problems found.
pub fn check(module: &Module) -> Result<(), Failure> {
    let mut diags = vec![];
    let cx = module.cx_ref();

    if let Err(diag) = dependency_ordered_items(module) {
        // NOTE: everything else assumes dependencies can be followed.
        return Err(diag.into());
    }

    let mut names = FxHashSet::default();
    for &item in &module.items {
        let name = module.item_name(item);
        if !names.insert(name) {
            diags.push(Diag::err(format!("`{}` is declared more than once", &cx[name])));
        }
    }

    let mut layouter = Layouter::new(module);
    for s in module.live_structs() {
        let decl = &module.structs[s];
        if decl.members.is_empty() {
            diags.push(Diag::err(format!("struct `{}` has no members", &cx[decl.name])));
        }
        for (i, member) in decl.members.iter().enumerate() {
            let is_last = i + 1 == decl.members.len();
            let bad = match cx[member.ty] {
                TypeKind::Ptr { .. } | TypeKind::Texture2d { .. } | TypeKind::Sampler { .. } => {
                    true
                }
                TypeKind::Array { len: None, .. } => !is_last,
                _ => false,
            };
            if bad {
                diags.push(Diag::err(format!(
                    "struct member `{}.{}` cannot have type `{}`",
                    &cx[decl.name],
                    &cx[member.name],
                    module.type_name(member.ty)
                )));
            }
        }
    }

    for gv in module.live_global_vars() {
        let decl = &module.global_vars[gv];
        let name = &cx[decl.name];
        let mut err = |msg: String| diags.push(Diag::err(format!("`{name}`: {msg}")));

        let is_handle_ty =
            matches!(cx[decl.ty], TypeKind::Texture2d { .. } | TypeKind::Sampler { .. });
        if is_handle_ty != (decl.addr_space == AddrSpace::Handle) {
            err(format!(
                "type `{}` invalid in address space `{}`",
                module.type_name(decl.ty),
                decl.addr_space.name()
            ));
        }
        let needs_binding =
            matches!(decl.addr_space, AddrSpace::Uniform | AddrSpace::Storage | AddrSpace::Handle);
        if needs_binding != decl.binding.is_some() {
            err(format!(
                "resource bindings are required exactly for uniform/storage/handle variables, \
                 not `{}`",
                decl.addr_space.name()
            ));
        }
        match decl.addr_space {
            AddrSpace::Function => err("module-scope variables cannot be `function`".into()),
            AddrSpace::Uniform | AddrSpace::Storage | AddrSpace::PushConstant => {
                if let Err(diag) = layouter.layout_of(decl.ty) {
                    err(diag.message.into_owned());
                }
            }
            AddrSpace::Workgroup if decl.initializer.is_some() => {
                err("`workgroup` variables cannot have initializers".into());
            }
            AddrSpace::In | AddrSpace::Out if decl.io.is_empty() => {
                err("pipeline IO variables need IO attributes".into());
            }
            _ => {}
        }
        if let Some(init) = &decl.initializer {
            if let Err(diag) = check_const(module, init, decl.ty) {
                err(diag.message.into_owned());
            }
        }
    }

    for func in module.live_funcs() {
        let decl = &module.funcs[func];
        let name = &cx[decl.name];
        let mut checker = FuncChecker { types: FuncTypes::new(module, decl), diags: vec![] };
        checker.check_signature();
        checker.check_block(&decl.body.block, 0);
        diags.extend(
            checker
                .diags
                .into_iter()
                .map(|d| Diag::new(d.level, format!("in `{name}`: {}", d.message))),
        );
    }

    if diags.is_empty() { Ok(()) } else { Err(Failure { diags }) }
}

fn check_const(module: &Module, value: &ConstValue, expected: Type) -> Result<(), Diag> {
    let cx = module.cx_ref();
    let found = match value {
        ConstValue::Literal(lit) => cx.scalar_ty(lit.scalar_type()),
        &ConstValue::Zero(ty) => ty,
        ConstValue::Composite { ty, elems } => {
            let elem_tys: Vec<Type> = match cx[*ty] {
                TypeKind::Struct(s) => module.structs[s].members.iter().map(|m| m.ty).collect(),
                TypeKind::Array { elem, len: Some(len) } => vec![elem; len.get() as usize],
                TypeKind::Vector { elem, len } => vec![cx.scalar_ty(elem); usize::from(len)],
                TypeKind::Matrix { columns, rows, elem } => {
                    vec![cx.vector_ty(elem, rows); usize::from(columns)]
                }
                _ => return Err(Diag::err("invalid composite constant")),
            };
            if elem_tys.len() != elems.len() {
                return Err(Diag::err("composite constant has the wrong number of elements"));
            }
            for (elem, elem_ty) in elems.iter().zip(elem_tys) {
                check_const(module, elem, elem_ty)?;
            }
            *ty
        }
    };
    if found == expected {
        Ok(())
    } else {
        Err(Diag::err(format!(
            "initializer: expected `{}`, found `{}`",
            module.type_name(expected),
            module.type_name(found)
        )))
    }
}

struct FuncChecker<'a> {
    types: FuncTypes<'a>,
    diags: Vec<Diag>,
}

impl FuncChecker<'_> {
    fn check_signature(&mut self) {
        let module = self.types.module;
        let cx = self.types.cx;
        let decl = self.types.func;

        match (decl.stage, decl.workgroup_size) {
            (Some(PipelineStage::Compute), Some(size)) if size.iter().all(|&n| n >= 1) => {}
            (Some(PipelineStage::Compute), _) => {
                self.diags.push(Diag::err("compute entry points need a workgroup size >= 1"));
            }
            (_, Some(_)) => {
                self.diags.push(Diag::err("only compute entry points have a workgroup size"));
            }
            (_, None) => {}
        }

        let Some(stage) = decl.stage else {
            for param in &decl.params {
                if param.binding.is_some() {
                    self.diags.push(Diag::err(format!(
                        "parameter `{}`: only entry point parameters can have bindings",
                        &cx[param.name]
                    )));
                }
            }
            return;
        };

        // Entry point IO has to be fully attributed (modulo waivers).
        let io_complete = |ty: Type, io: &IoAttrs| match cx[ty] {
            TypeKind::Struct(s) => module.structs[s].members.iter().all(|m| !m.io.is_empty()),
            _ => !io.is_empty(),
        };
        let mut input_builtins = FxHashSet::default();
        for param in &decl.params {
            if !param.waivers.entry_point_parameter {
                if !io_complete(param.ty, &param.io) {
                    self.diags.push(Diag::err(format!(
                        "entry point parameter `{}` is missing IO attributes",
                        &cx[param.name]
                    )));
                }
                if param.binding.is_some() || matches!(cx[param.ty], TypeKind::Ptr { .. }) {
                    self.diags.push(Diag::err(format!(
                        "entry point parameter `{}` cannot be a resource",
                        &cx[param.name]
                    )));
                }
            }
            for builtin in module.io_builtins(param.ty, &param.io) {
                if !input_builtins.insert(builtin) {
                    self.diags.push(Diag::err(format!(
                        "duplicate builtin `{}` in entry point inputs",
                        builtin.name()
                    )));
                }
            }
        }
        if let Some(ret) = &decl.ret {
            if !io_complete(ret.ty, &ret.io) {
                self.diags.push(Diag::err("entry point return value is missing IO attributes"));
            }
            let builtins = module.io_builtins(ret.ty, &ret.io);
            if !builtins.iter().all_unique() {
                self.diags.push(Diag::err("duplicate builtin in entry point outputs"));
            }
            if builtins.contains(&BuiltinValue::FragDepth) && stage != PipelineStage::Fragment {
                self.diags.push(Diag::err("`frag_depth` is only a fragment shader output"));
            }
        }
    }

    fn check_block(&mut self, block: &Block, loop_depth: usize) {
        for stmt in &block.stmts {
            if let Err(diag) = self.check_stmt(stmt, loop_depth) {
                self.diags.push(diag);
            }
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, loop_depth: usize) -> Result<(), Diag> {
        let cx = self.types.cx;
        let func = self.types.func;
        match stmt {
            &Stmt::Decl(local) => {
                let decl = &func.body.locals[local];
                match decl.kind {
                    LocalKind::Let if decl.init.is_none() => {
                        return Err(Diag::err(format!("`let {}` needs a value", &cx[decl.name])));
                    }
                    LocalKind::Var(addr_space)
                        if addr_space != AddrSpace::Function
                            && !decl.waivers.ignore_address_space =>
                    {
                        return Err(Diag::err(format!(
                            "local `{}` cannot be in address space `{}`",
                            &cx[decl.name],
                            addr_space.name()
                        )));
                    }
                    _ => {}
                }
                if let Some(init) = decl.init {
                    let init_ty = self.types.value_ty(init)?;
                    if init_ty != decl.ty {
                        return Err(self.types.mismatch(&cx[decl.name], decl.ty, init_ty));
                    }
                }
            }
            &Stmt::Assign { lhs, rhs } => match self.types.type_of(lhs)? {
                ExprTy::Ref { access: Access::ReadWrite, store_ty, .. } => {
                    let rhs_ty = self.types.value_ty(rhs)?;
                    if rhs_ty != store_ty {
                        return Err(self.types.mismatch("assignment", store_ty, rhs_ty));
                    }
                }
                _ => return Err(Diag::err("assignment to a non-writable expression")),
            },
            &Stmt::Expr(e) => {
                self.types.type_of(e)?;
            }
            Stmt::If { cond, then_block, else_block } => {
                let cond_ty = self.types.value_ty(*cond)?;
                if cond_ty != cx.scalar_ty(ScalarType::Bool) {
                    return Err(Diag::err("`if` condition must be `bool`"));
                }
                self.check_block(then_block, loop_depth);
                self.check_block(else_block, loop_depth);
            }
            Stmt::Loop { body, continuing } => {
                self.check_block(body, loop_depth + 1);
                self.check_block(continuing, loop_depth + 1);
            }
            Stmt::Break | Stmt::Continue if loop_depth == 0 => {
                return Err(Diag::err("`break`/`continue` outside of a loop"));
            }
            Stmt::Break | Stmt::Continue | Stmt::Discard => {}
            &Stmt::Return(value) => match (func.ret, value) {
                (None, None) => {}
                (Some(ret), Some(value)) => {
                    let value_ty = self.types.value_ty(value)?;
                    if value_ty != ret.ty {
                        return Err(self.types.mismatch("return value", ret.ty, value_ty));
                    }
                }
                (Some(_), None) => return Err(Diag::err("missing return value")),
                (None, Some(_)) => return Err(Diag::err("unexpected return value")),
            },
            Stmt::Block(block) => self.check_block(block, loop_depth),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FuncRet, GlobalVarDecl, Literal, LocalVarDecl, StructDecl, StructMember,
        ValidationWaivers,
    };
    use std::rc::Rc;

    fn module() -> Module {
        Module::new(Rc::new(Context::new()))
    }

    #[test]
    fn refs_and_pointers() {
        let mut module = module();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let gv = module.define_global_var(GlobalVarDecl::new(
            cx.intern("g"),
            f32_ty,
            AddrSpace::Private,
        ));
        let mut func = FuncDecl::new(cx.intern("f"));
        let g = func.body.global_ref(gv);
        let p = func.body.addr_of(g);
        let g2 = func.body.global_ref(gv);
        let p2 = func.body.addr_of(g2);
        let d = func.body.deref(p2);

        let mut types = FuncTypes::new(&module, &func);
        assert_eq!(
            types.type_of(g).unwrap(),
            ExprTy::Ref {
                addr_space: AddrSpace::Private,
                store_ty: f32_ty,
                access: Access::ReadWrite
            }
        );
        assert_eq!(
            types.type_of(p).unwrap(),
            ExprTy::Value(cx.ptr_ty(AddrSpace::Private, f32_ty, Access::ReadWrite))
        );
        assert_eq!(types.value_ty(d).unwrap(), f32_ty);
    }

    #[test]
    fn matrix_vector_products() {
        let module = module();
        let cx = module.cx();
        let func = FuncDecl::new(cx.intern("f"));
        let types = FuncTypes::new(&module, &func);
        let m = cx.matrix_ty(4, 3, ScalarType::F32);
        let v4 = cx.vector_ty(ScalarType::F32, 4);
        let v3 = cx.vector_ty(ScalarType::F32, 3);
        assert_eq!(types.binary(BinaryOp::Mul, m, v4).unwrap(), v3);
        assert_eq!(types.binary(BinaryOp::Mul, v3, m).unwrap(), v4);
        assert!(types.binary(BinaryOp::Mul, m, v3).is_err());
        assert!(types.binary(BinaryOp::Add, m, v4).is_err());
    }

    #[test]
    fn dependency_order_puts_callees_first() {
        let mut module = module();
        let cx = module.cx();
        let caller = module.define_func(FuncDecl::new(cx.intern("caller")));
        let callee = module.define_func(FuncDecl::new(cx.intern("callee")));
        let body = &mut module.funcs[caller].body;
        let call = body.call(callee, []);
        body.block.stmts.push(Stmt::Expr(call));

        let order = dependency_ordered_items(&module).unwrap();
        assert_eq!(order, vec![Item::Func(callee), Item::Func(caller)]);
        assert!(check(&module).is_ok());
    }

    #[test]
    fn recursion_is_rejected() {
        let mut module = module();
        let cx = module.cx();
        let f = module.define_func(FuncDecl::new(cx.intern("f")));
        let body = &mut module.funcs[f].body;
        let call = body.call(f, []);
        body.block.stmts.push(Stmt::Expr(call));
        assert!(dependency_ordered_items(&module).is_err());
        assert_eq!(item_deps(&module, Item::Func(f)).into_iter().collect::<Vec<_>>(), [
            Item::Func(f)
        ]);

        let Err(failure) = check(&module) else {
            panic!("recursive `f` passed validation");
        };
        assert_eq!(failure.diags.len(), 1);
        assert!(failure.diags[0].message.contains("cyclic dependency involving `f`"));
    }

    #[test]
    fn duplicate_builtins_are_rejected() {
        let mut module = module();
        let cx = module.cx();
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let mut func = FuncDecl::new(cx.intern("main"));
        func.stage = Some(PipelineStage::Compute);
        func.workgroup_size = Some([1, 1, 1]);
        for name in ["a", "b"] {
            func.params.push(crate::FuncParam {
                name: cx.intern(name),
                ty: u32_ty,
                io: IoAttrs::builtin(BuiltinValue::LocalInvocationIndex),
                binding: None,
                waivers: ValidationWaivers::default(),
            });
        }
        module.define_func(func);
        let failure = check(&module).unwrap_err();
        assert!(failure.diags.iter().any(|d| d.message.contains("duplicate builtin")));
    }

    #[test]
    fn entry_point_resources_need_waivers() {
        let mut module = module();
        let cx = module.cx();
        let tex = cx.intern(TypeKind::Texture2d { sampled: ScalarType::F32 });
        let mut func = FuncDecl::new(cx.intern("main"));
        func.stage = Some(PipelineStage::Fragment);
        func.params.push(crate::FuncParam {
            name: cx.intern("t"),
            ty: tex,
            io: IoAttrs::default(),
            binding: Some(crate::BindingPoint { group: 0, binding: 0 }),
            waivers: ValidationWaivers::default(),
        });
        let f = module.define_func(func);
        assert!(check(&module).is_err());

        module.funcs[f].params[0].waivers.entry_point_parameter = true;
        assert!(check(&module).is_ok());
    }

    #[test]
    fn struct_construction_and_returns() {
        let mut module = module();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let s = module.define_struct(StructDecl::new(cx.intern("S"), [
            StructMember::new(cx.intern("a"), f32_ty),
            StructMember::new(cx.intern("b"), f32_ty),
        ]));
        let s_ty = cx.struct_ty(s);

        let mut func = FuncDecl::new(cx.intern("f"));
        func.ret = Some(FuncRet { ty: s_ty, io: IoAttrs::default() });
        let a = func.body.lit(Literal::F32(1.0));
        let b = func.body.lit(Literal::F32(2.0));
        let value = func.body.construct(s_ty, [a, b]);
        let local = func.body.local(LocalVarDecl::new_let(cx.intern("v"), s_ty, value));
        let read = func.body.local_ref(local);
        let member = func.body.member(read, 1);
        let bad = func.body.local(LocalVarDecl::new_let(cx.intern("w"), s_ty, member));
        let ret = func.body.local_ref(local);
        func.body.block.stmts.extend([Stmt::Decl(local), Stmt::Decl(bad), Stmt::Return(Some(ret))]);
        module.define_func(func);

        let failure = check(&module).unwrap_err();
        assert_eq!(failure.diags.len(), 1);
        assert!(failure.diags[0].message.contains("expected `S`, found `f32`"));
    }
}
