//! Replacement of `arrayLength` calls on storage buffers by reads from a
//! uniform buffer of (API-provided) buffer byte sizes.
//!
//! The sizes are packed as `array<vec4<u32>, N>` (uniform arrays need 16-byte
//! strides), so size index `i` is read from `buffer_size[i / 4][i % 4]`, and
//! the array length is `(size - offset) / stride`, with `offset` the byte
//! offset of the runtime-sized array in the buffer.

use super::pass::{Pass, PassOutputs};
use crate::func_at::FuncAt;
use crate::layout::Layouter;
use crate::transform::Transformed;
use crate::visit::{InnerVisit, Visitor};
use crate::{
    AddrSpace, BinaryOp, BindingPoint, BuiltinFn, Expr, ExprKind, Failure, Func, GlobalVar,
    GlobalVarDecl, Item, Literal, Module, ScalarType, Struct, StructDecl, StructMember, Type,
    TypeKind, resolve,
};
use std::num::NonZeroU32;

#[derive(Clone, Default, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArrayLengthFromUniformOptions {
    /// Binding of the injected buffer sizes uniform.
    pub ubo_binding: BindingPoint,

    /// Which size index each storage buffer's size is found at.
    pub size_indices: Vec<BufferSizeIndex>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct BufferSizeIndex {
    pub binding: BindingPoint,
    pub index: u32,
}

pub struct ArrayLengthFromUniform {
    options: ArrayLengthFromUniformOptions,
}

impl ArrayLengthFromUniform {
    pub fn new(options: ArrayLengthFromUniformOptions) -> Self {
        Self { options }
    }
}

/// An `arrayLength` call to replace.
struct Site {
    func: Func,
    expr: Expr,
    size_index: u32,
    offset: u32,
    stride: u32,
}

/// Collects all `arrayLength(p)` calls (with their `p`) in a function.
#[derive(Default)]
struct ArrayLengthCalls {
    calls: Vec<(Expr, Expr)>,
}

impl<'a> Visitor<'a> for ArrayLengthCalls {
    fn visit_type_use(&mut self, _: Type) {}
    fn visit_struct_use(&mut self, _: Struct) {}
    fn visit_global_var_use(&mut self, _: GlobalVar) {}
    fn visit_func_use(&mut self, _: Func) {}

    fn visit_expr(&mut self, func_at_expr: FuncAt<'a, Expr>) {
        if let ExprKind::Builtin { func: BuiltinFn::ArrayLength, args } = func_at_expr.def() {
            if let [ptr] = args[..] {
                self.calls.push((func_at_expr.position, ptr));
            }
        }
        func_at_expr.inner_visit_with(self);
    }
}

impl ArrayLengthFromUniform {
    /// Match `&buffer` and `&buffer.member` (where `buffer` has a mapped
    /// binding), returning the size index and the array's byte offset/stride.
    fn resolve_site(
        &self,
        module: &Module,
        layouter: &mut Layouter<'_>,
        func_at_ptr: FuncAt<'_, Expr>,
    ) -> Result<Option<(u32, u32, u32)>, Failure> {
        let cx = module.cx_ref();
        let Some(place) = func_at_ptr.addr_of_operand() else {
            return Ok(None);
        };
        let (gv, member) = match *func_at_ptr.at(place).def() {
            ExprKind::GlobalVar(gv) => (gv, None),
            ExprKind::Member { base, member } => match *func_at_ptr.at(base).def() {
                ExprKind::GlobalVar(gv) => (gv, Some(member)),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        let decl = &module.global_vars[gv];
        let Some(size_index) = decl.binding.and_then(|binding| {
            self.options.size_indices.iter().find(|idx| idx.binding == binding).map(|idx| idx.index)
        }) else {
            return Ok(None);
        };

        let (array_ty, offset) = match (member, &cx[decl.ty]) {
            (None, _) => (decl.ty, 0),
            (Some(member), &TypeKind::Struct(s)) => {
                let layout = layouter.struct_layout(s)?;
                (module.structs[s].members[member as usize].ty, layout.offsets[member as usize])
            }
            (Some(_), _) => return Err(Failure::bug("member access on a non-struct buffer")),
        };
        let TypeKind::Array { elem, len: None } = cx[array_ty] else {
            return Err(Failure::bug("`arrayLength` of a non-runtime-sized array"));
        };
        Ok(Some((size_index, offset, layouter.array_stride(elem)?)))
    }
}

impl Pass for ArrayLengthFromUniform {
    fn name(&self) -> &'static str {
        "ArrayLengthFromUniform"
    }

    fn run(
        &self,
        module: &Module,
        outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let Some(max_index) = self.options.size_indices.iter().map(|idx| idx.index).max() else {
            return Ok(Transformed::Unchanged);
        };

        let mut layouter = Layouter::new(module);
        let mut sites = vec![];
        for func in module.live_funcs() {
            let func_decl = &module.funcs[func];
            let mut calls = ArrayLengthCalls::default();
            func_decl.inner_visit_with(&mut calls);
            for (expr, ptr) in calls.calls {
                if let Some((size_index, offset, stride)) =
                    self.resolve_site(module, &mut layouter, func_decl.body.at(ptr))?
                {
                    sites.push(Site { func, expr, size_index, offset, stride });
                }
            }
        }
        let Some(first_func) = sites.first().map(|site| site.func) else {
            return Ok(Transformed::Unchanged);
        };

        let mut module = module.clone();
        let cx = module.cx();
        let sizes_array_ty = cx.intern(TypeKind::Array {
            elem: cx.vector_ty(ScalarType::U32, 4),
            len: NonZeroU32::new(max_index / 4 + 1),
        });

        let sizes_struct_name = module.fresh_name("BufferSizes");
        let sizes_struct = module.structs.define(StructDecl::new(sizes_struct_name, [
            StructMember::new(cx.intern("buffer_size"), sizes_array_ty),
        ]));
        module.insert_item_before(Item::Func(first_func), Item::Struct(sizes_struct));
        let sizes_var_name = module.fresh_name("buffer_sizes");
        let sizes_var = module.global_vars.define(GlobalVarDecl {
            binding: Some(self.options.ubo_binding),
            ..GlobalVarDecl::new(sizes_var_name, cx.struct_ty(sizes_struct), AddrSpace::Uniform)
        });
        module.insert_item_before(Item::Func(first_func), Item::GlobalVar(sizes_var));

        for site in &sites {
            let body = &mut module.funcs[site.func].body;
            let sizes = body.global_ref(sizes_var);
            let sizes = body.member(sizes, 0);
            let vec_idx = body.lit(Literal::U32(site.size_index / 4));
            let size = body.index(sizes, vec_idx);
            let component = body.lit(Literal::U32(site.size_index % 4));
            let mut size = body.index(size, component);
            if site.offset != 0 {
                let offset = body.lit(Literal::U32(site.offset));
                size = body.binary(BinaryOp::Sub, size, offset);
            }
            let stride = body.lit(Literal::U32(site.stride));
            body.exprs[site.expr] = ExprKind::Binary { op: BinaryOp::Div, lhs: size, rhs: stride };
            outputs.used_array_length_indices.insert(site.size_index);
        }
        log::trace!("ArrayLengthFromUniform: {} call(s) replaced", sites.len());
        resolve::check(&module)?;
        Ok(Transformed::Changed(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, FuncDecl, LocalVar, LocalVarDecl, Stmt};
    use std::rc::Rc;

    fn bp(group: u32, binding: u32) -> BindingPoint {
        BindingPoint { group, binding }
    }

    /// `struct SB { count: u32, data: array<f32> }`, bound at `(0, 1)`, and a
    /// function doing `let n = arrayLength(&sb.data);`.
    fn module_with_array_length() -> (Module, Func, LocalVar) {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let data_ty = cx.array_ty(cx.scalar_ty(ScalarType::F32), None);
        let sb_struct = module.define_struct(StructDecl::new(cx.intern("SB"), [
            StructMember::new(cx.intern("count"), u32_ty),
            StructMember::new(cx.intern("data"), data_ty),
        ]));
        let sb = module.define_global_var(GlobalVarDecl {
            binding: Some(bp(0, 1)),
            ..GlobalVarDecl::new(cx.intern("sb"), cx.struct_ty(sb_struct), AddrSpace::Storage)
        });

        let func = module.define_func(FuncDecl::new(cx.intern("f")));
        let body = &mut module.funcs[func].body;
        let sb_ref = body.global_ref(sb);
        let data = body.member(sb_ref, 1);
        let ptr = body.addr_of(data);
        let len = body.builtin(BuiltinFn::ArrayLength, [ptr]);
        let n = body.local(LocalVarDecl::new_let(cx.intern("n"), u32_ty, len));
        body.block.stmts.push(Stmt::Decl(n));
        (module, func, n)
    }

    #[test]
    fn array_length_reads_the_sizes_uniform() {
        let (module, func, n) = module_with_array_length();
        resolve::check(&module).unwrap();

        let pass = ArrayLengthFromUniform::new(ArrayLengthFromUniformOptions {
            ubo_binding: bp(0, 30),
            size_indices: vec![BufferSizeIndex { binding: bp(0, 1), index: 5 }],
        });
        let mut outputs = PassOutputs::default();
        let Transformed::Changed(out) = pass.run(&module, &mut outputs).unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(outputs.used_array_length_indices.iter().copied().collect::<Vec<_>>(), [5]);

        let Some(Item::GlobalVar(sizes)) = out.find_item("buffer_sizes") else {
            panic!("missing `buffer_sizes`");
        };
        assert_eq!(out.global_vars[sizes].binding, Some(bp(0, 30)));
        assert_eq!(out.type_name(out.global_vars[sizes].ty), "BufferSizes");

        // `(buffer_sizes.buffer_size[1][1] - 4) / 4`
        let body = &out.funcs[func].body;
        let init = body.locals[n].init.unwrap();
        let ExprKind::Binary { op: BinaryOp::Div, lhs, rhs } = body.exprs[init] else {
            panic!("expected a division");
        };
        assert!(matches!(body.exprs[rhs], ExprKind::Literal(Literal::U32(4))));
        let ExprKind::Binary { op: BinaryOp::Sub, rhs: offset, .. } = body.exprs[lhs] else {
            panic!("expected a subtraction");
        };
        assert!(matches!(body.exprs[offset], ExprKind::Literal(Literal::U32(4))));
    }

    #[test]
    fn unmapped_buffers_are_unchanged() {
        let (module, ..) = module_with_array_length();
        let pass = ArrayLengthFromUniform::new(ArrayLengthFromUniformOptions {
            ubo_binding: bp(0, 30),
            size_indices: vec![BufferSizeIndex { binding: bp(2, 2), index: 0 }],
        });
        let mut outputs = PassOutputs::default();
        assert!(!pass.run(&module, &mut outputs).unwrap().is_changed());
        assert!(outputs.used_array_length_indices.is_empty());
    }
}
