//! Mutable IR traversal.

use crate::func_at::FuncAtMut;
use crate::{
    Block, ConstValue, ExprKind, Func, FuncBody, FuncDecl, FuncParam, FuncRet, GlobalVar,
    GlobalVarDecl, Item, LocalVar, Module, Stmt, Struct, StructDecl, Type, TypeKind,
};
use std::cmp::Ordering;

/// The result of a transformation (which is not in-place).
#[must_use]
#[derive(Copy, Clone, Debug)]
pub enum Transformed<T> {
    /// The original `T` value remains as it was, at no cost.
    Unchanged,

    /// Some part of the original `T` value was transformed, and a new `T` value
    /// had to be constructed. This change will propagate in any "outer" value.
    Changed(T),
}

impl<T> Transformed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        match self {
            Transformed::Unchanged => Transformed::Unchanged,
            Transformed::Changed(new) => Transformed::Changed(f(new)),
        }
    }

    pub fn apply_to(self, dest: &mut T) {
        match self {
            Transformed::Unchanged => {}
            Transformed::Changed(new) => *dest = new,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Transformed::Changed(_))
    }

    /// Get the transformed value, or (a clone of) the `original` if unchanged.
    pub fn unwrap_or_clone(self, original: &T) -> T
    where
        T: Clone,
    {
        match self {
            Transformed::Unchanged => original.clone(),
            Transformed::Changed(new) => new,
        }
    }
}

// HACK the `Self` type here doesn't matter, it only exists so that we
// can call e.g. `Transformed::foo(...)` methods.
impl Transformed<()> {
    /// Map every element of an iterator through `transform_elem` and return
    /// [`Transformed::Changed(new_iter)`] if any `transform_elem` call returned
    /// [`Transformed::Changed`], with `new_iter` containing a combination of the
    /// changed elements, and clones of the unchanged elements.
    pub fn map_iter<'a, T: 'a + Clone>(
        iter: impl Iterator<Item = &'a T> + Clone + 'a,
        mut transform_elem: impl FnMut(&'a T) -> Transformed<T> + 'a,
    ) -> Transformed<impl Iterator<Item = T> + 'a> {
        for (i, elem_i) in iter.clone().enumerate() {
            if let Transformed::Changed(new_elem_i) = transform_elem(elem_i) {
                let mut new_elem_i = Some(new_elem_i);
                return Transformed::Changed(iter.enumerate().map(move |(j, elem_j)| {
                    match j.cmp(&i) {
                        // Earlier elements, for which `transform_elem` was called
                        // already, and had returned `Unchanged`.
                        Ordering::Less => elem_j.clone(),

                        // The first element for which `transform_elem` returned
                        // `Changed`, resulting in the `Changed` iterator.
                        Ordering::Equal => new_elem_i.take().unwrap_or_else(|| elem_j.clone()),

                        // Later elements, for which only now `transform_elem`
                        // gets called, and may be `Unchanged` or `Changed`.
                        Ordering::Greater => transform_elem(elem_j).unwrap_or_clone(elem_j),
                    }
                }));
            }
        }
        Transformed::Unchanged
    }
}

/// Helper macro to create a combined [`Transformed`] out of several variables,
/// each with their own transformation, where any [`Transformed::Changed`] input
/// will result in a [`Transformed::Changed`] output, using a combination of the
/// changed inputs, and clones of the unchanged inputs.
macro_rules! transform {
    ({ $($input:ident -> $input_transformed:expr),+ $(,)? } => $output:expr) => {{
        let ($($input,)+) = ($(($input_transformed, $input),)+);
        if $($input.0.is_changed())||+ {
            let ($($input,)+) = ($($input.0.unwrap_or_clone(&$input.1),)+);
            Transformed::Changed($output)
        } else {
            Transformed::Unchanged
        }
    }};
}

// FIXME `Sized` bound shouldn't be needed but removing it requires
// writing `impl Transformer + ?Sized` in `fn inner_transform_with` signatures.
pub trait Transformer: Sized {
    // Context-interned leaves (noop default behavior).
    fn transform_type_use(&mut self, _ty: Type) -> Transformed<Type> {
        Transformed::Unchanged
    }

    // Module-stored entity leaves (noop default behavior).
    fn transform_struct_use(&mut self, _s: Struct) -> Transformed<Struct> {
        Transformed::Unchanged
    }
    fn transform_global_var_use(&mut self, _gv: GlobalVar) -> Transformed<GlobalVar> {
        Transformed::Unchanged
    }
    fn transform_func_use(&mut self, _func: Func) -> Transformed<Func> {
        Transformed::Unchanged
    }

    // Function-local entity leaves (noop default behavior).
    fn transform_local_var_use(&mut self, _local: LocalVar) -> Transformed<LocalVar> {
        Transformed::Unchanged
    }

    // Non-leaves (defaulting to calling `.inner_transform_with(self)`).
    fn transform_type_kind(&mut self, kind: &TypeKind) -> Transformed<TypeKind> {
        kind.inner_transform_with(self)
    }
    fn transform_const_value(&mut self, value: &ConstValue) -> Transformed<ConstValue> {
        value.inner_transform_with(self)
    }
    fn transform_expr_kind(&mut self, kind: &ExprKind) -> Transformed<ExprKind> {
        kind.inner_transform_with(self)
    }

    // Non-leaves transformed in-place (defaulting to calling
    // `.inner_in_place_transform_with(self)`).
    fn in_place_transform_module(&mut self, module: &mut Module) {
        module.inner_in_place_transform_with(self);
    }
    fn in_place_transform_struct_decl(&mut self, struct_decl: &mut StructDecl) {
        struct_decl.inner_in_place_transform_with(self);
    }
    fn in_place_transform_global_var_decl(&mut self, gv_decl: &mut GlobalVarDecl) {
        gv_decl.inner_in_place_transform_with(self);
    }
    fn in_place_transform_func_decl(&mut self, func_decl: &mut FuncDecl) {
        func_decl.inner_in_place_transform_with(self);
    }
    fn in_place_transform_func_param(&mut self, param: &mut FuncParam) {
        param.inner_in_place_transform_with(self);
    }
    fn in_place_transform_local_var_decl(&mut self, mut func_at_local: FuncAtMut<'_, LocalVar>) {
        func_at_local.inner_in_place_transform_with(self);
    }
    /// Statements can only be transformed in place, but they get access to the
    /// function's arenas, to define new expressions/locals as needed.
    fn in_place_transform_stmt(&mut self, mut func_at: FuncAtMut<'_, ()>, stmt: &mut Stmt) {
        stmt.inner_in_place_transform_with(self, func_at.reborrow());
    }
}

/// Trait implemented on "transformable" types, to further "elaborate" a type by
/// transforming its "interior" (i.e. variants and/or fields).
///
/// That is, an `impl InnerTransform for X` will call the relevant [`Transformer`]
/// method for each `X` field, effectively performing a single level of a deep
/// transform.
/// Also, if `Transformer::transform_X` exists for a given `X`, its default should
/// be to call `X::inner_transform_with` (i.e. so that transforming is mostly-deep
/// by default).
pub trait InnerTransform: Sized {
    fn inner_transform_with(&self, transformer: &mut impl Transformer) -> Transformed<Self>;
}

/// Like [`InnerTransform`], but only for the `in_place_transform_X` cases.
pub trait InnerInPlaceTransform {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer);
}

impl InnerInPlaceTransform for Module {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        for item in self.items.clone() {
            match item {
                Item::Struct(s) => transformer.in_place_transform_struct_decl(&mut self.structs[s]),
                Item::GlobalVar(gv) => {
                    transformer.in_place_transform_global_var_decl(&mut self.global_vars[gv]);
                }
                Item::Func(func) => transformer.in_place_transform_func_decl(&mut self.funcs[func]),
            }
        }

        for item in &mut self.items {
            let new_item = match *item {
                Item::Struct(s) => transformer.transform_struct_use(s).map(Item::Struct),
                Item::GlobalVar(gv) => {
                    transformer.transform_global_var_use(gv).map(Item::GlobalVar)
                }
                Item::Func(func) => transformer.transform_func_use(func).map(Item::Func),
            };
            new_item.apply_to(item);
        }
    }
}

impl InnerTransform for TypeKind {
    fn inner_transform_with(&self, transformer: &mut impl Transformer) -> Transformed<Self> {
        match *self {
            TypeKind::Scalar(_)
            | TypeKind::Vector { .. }
            | TypeKind::Matrix { .. }
            | TypeKind::Atomic(_)
            | TypeKind::Texture2d { .. }
            | TypeKind::Sampler { .. } => Transformed::Unchanged,

            TypeKind::Array { elem, len } => transform!({
                elem -> transformer.transform_type_use(elem),
            } => TypeKind::Array { elem, len }),

            TypeKind::Struct(s) => transform!({
                s -> transformer.transform_struct_use(s),
            } => TypeKind::Struct(s)),

            TypeKind::Ptr { addr_space, pointee, access } => transform!({
                pointee -> transformer.transform_type_use(pointee),
            } => TypeKind::Ptr { addr_space, pointee, access }),
        }
    }
}

impl InnerInPlaceTransform for StructDecl {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        for member in &mut self.members {
            transformer.transform_type_use(member.ty).apply_to(&mut member.ty);
        }
    }
}

impl InnerInPlaceTransform for GlobalVarDecl {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let Self { name: _, ty, addr_space: _, access: _, binding: _, initializer, io: _ } = self;

        transformer.transform_type_use(*ty).apply_to(ty);
        if let Some(initializer) = initializer {
            transformer.transform_const_value(initializer).apply_to(initializer);
        }
    }
}

impl InnerTransform for ConstValue {
    fn inner_transform_with(&self, transformer: &mut impl Transformer) -> Transformed<Self> {
        match self {
            ConstValue::Literal(_) => Transformed::Unchanged,
            &ConstValue::Zero(ty) => transform!({
                ty -> transformer.transform_type_use(ty),
            } => ConstValue::Zero(ty)),
            ConstValue::Composite { ty, elems } => transform!({
                ty -> transformer.transform_type_use(*ty),
                elems -> Transformed::map_iter(
                    elems.iter(),
                    |elem| transformer.transform_const_value(elem),
                ).map(|new_iter| new_iter.collect::<Vec<_>>()),
            } => ConstValue::Composite { ty, elems }),
        }
    }
}

impl InnerInPlaceTransform for FuncDecl {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let Self { name: _, stage: _, workgroup_size: _, params, ret, body } = self;

        for param in params {
            transformer.in_place_transform_func_param(param);
        }
        if let Some(FuncRet { ty, io: _ }) = ret {
            transformer.transform_type_use(*ty).apply_to(ty);
        }
        body.inner_in_place_transform_with(transformer);
    }
}

impl InnerInPlaceTransform for FuncParam {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        transformer.transform_type_use(self.ty).apply_to(&mut self.ty);
    }
}

impl InnerInPlaceTransform for FuncBody {
    fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        // NOTE: every expression/local in the arenas is transformed (even if
        // unused), before any statements (which may define new ones).
        for expr in self.exprs.keys() {
            let new_kind = transformer.transform_expr_kind(&self.exprs[expr]);
            new_kind.apply_to(&mut self.exprs[expr]);
        }
        for local in self.locals.keys() {
            transformer.in_place_transform_local_var_decl(self.at_mut(local));
        }

        let FuncBody { exprs, locals, block } = self;
        FuncAtMut { exprs, locals, position: () }.in_place_transform_block(transformer, block);
    }
}

impl FuncAtMut<'_, ()> {
    pub fn in_place_transform_block(
        &mut self,
        transformer: &mut impl Transformer,
        block: &mut Block,
    ) {
        for stmt in &mut block.stmts {
            transformer.in_place_transform_stmt(self.reborrow(), stmt);
        }
    }
}

impl FuncAtMut<'_, LocalVar> {
    pub fn inner_in_place_transform_with(&mut self, transformer: &mut impl Transformer) {
        let decl = self.reborrow().def();
        transformer.transform_type_use(decl.ty).apply_to(&mut decl.ty);
    }
}

impl Stmt {
    /// Recurse into nested blocks (expressions are handled separately, through
    /// [`Transformer::transform_expr_kind`], by the arena-wide pass).
    pub fn inner_in_place_transform_with(
        &mut self,
        transformer: &mut impl Transformer,
        mut func_at: FuncAtMut<'_, ()>,
    ) {
        match self {
            Stmt::Decl(_)
            | Stmt::Assign { .. }
            | Stmt::Expr(_)
            | Stmt::Break
            | Stmt::Continue
            | Stmt::Return(_)
            | Stmt::Discard => {}

            Stmt::If { cond: _, then_block, else_block } => {
                func_at.in_place_transform_block(transformer, then_block);
                func_at.in_place_transform_block(transformer, else_block);
            }
            Stmt::Loop { body, continuing } => {
                func_at.in_place_transform_block(transformer, body);
                func_at.in_place_transform_block(transformer, continuing);
            }
            Stmt::Block(block) => func_at.in_place_transform_block(transformer, block),
        }
    }
}

impl InnerTransform for ExprKind {
    fn inner_transform_with(&self, transformer: &mut impl Transformer) -> Transformed<Self> {
        match self {
            ExprKind::Literal(_)
            | ExprKind::Param(_)
            | ExprKind::Unary { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
            | ExprKind::Swizzle { .. }
            | ExprKind::Builtin { .. } => Transformed::Unchanged,

            &ExprKind::ZeroValue(ty) => transform!({
                ty -> transformer.transform_type_use(ty),
            } => ExprKind::ZeroValue(ty)),
            ExprKind::Construct { ty, args } => transform!({
                ty -> transformer.transform_type_use(*ty),
            } => ExprKind::Construct { ty, args: args.clone() }),
            &ExprKind::Bitcast { ty, arg } => transform!({
                ty -> transformer.transform_type_use(ty),
            } => ExprKind::Bitcast { ty, arg }),

            &ExprKind::Local(local) => transform!({
                local -> transformer.transform_local_var_use(local),
            } => ExprKind::Local(local)),
            &ExprKind::GlobalVar(gv) => transform!({
                gv -> transformer.transform_global_var_use(gv),
            } => ExprKind::GlobalVar(gv)),
            ExprKind::Call { callee, args } => transform!({
                callee -> transformer.transform_func_use(*callee),
            } => ExprKind::Call { callee, args: args.clone() }),
        }
    }
}
