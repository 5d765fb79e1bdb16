//! Clamping of fragment depth outputs, for backends (and drivers) that don't
//! clamp `frag_depth` to the viewport depth range themselves.
//!
//! The range is read from push constants (at caller-chosen offsets), through
//! an injected `clamp_frag_depth` helper, which every `return` of an affected
//! fragment entry point is routed through (for struct returns, through a
//! per-struct helper, which only clamps the depth member).

use super::pass::{Pass, PassOutputs, rewrite_returns};
use crate::layout::{Layouter, PushConstantLayout, PushConstantMember};
use crate::transform::Transformed;
use crate::{
    AddrSpace, BuiltinFn, BuiltinValue, ExprKind, Failure, Func, FuncDecl, FuncParam, FuncRet,
    FxIndexMap, GlobalVarDecl, IoAttrs, Item, Module, PipelineStage, ScalarType, Stmt, Struct,
    StructDecl, StructMember, TypeKind, resolve,
};
use std::cmp::Ordering;

/// Byte offsets of the minimum and maximum depth values in push constants.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct RangeOffsets {
    pub min: u32,
    pub max: u32,
}

#[derive(Copy, Clone, Default, Debug)]
pub struct Config {
    /// Without offsets, there is nowhere to read the range from, and the pass
    /// doesn't apply.
    pub offsets: Option<RangeOffsets>,
}

pub struct ClampFragDepth {
    config: Config,
}

impl ClampFragDepth {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

/// How an entry point returns its depth.
#[derive(Copy, Clone)]
enum DepthReturn {
    Scalar,
    Member(Struct),
}

fn depth_return(module: &Module, func: &FuncDecl) -> Option<DepthReturn> {
    if func.stage != Some(PipelineStage::Fragment) {
        return None;
    }
    let ret = func.ret?;
    if ret.io.builtin == Some(BuiltinValue::FragDepth) {
        return Some(DepthReturn::Scalar);
    }
    match module.cx_ref()[ret.ty] {
        TypeKind::Struct(s)
            if module.structs[s]
                .members
                .iter()
                .any(|m| m.io.builtin == Some(BuiltinValue::FragDepth)) =>
        {
            Some(DepthReturn::Member(s))
        }
        _ => None,
    }
}

impl Pass for ClampFragDepth {
    fn name(&self) -> &'static str {
        "ClampFragDepth"
    }

    fn run(
        &self,
        module: &Module,
        outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let Some(offsets) = self.config.offsets else {
            return Ok(Transformed::Unchanged);
        };
        let targets: Vec<(Func, DepthReturn)> = module
            .entry_points()
            .filter_map(|func| Some((func, depth_return(module, &module.funcs[func])?)))
            .collect();
        let Some(&(first_target, _)) = targets.first() else {
            return Ok(Transformed::Unchanged);
        };

        let mut module = module.clone();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);

        // Range push constants, and the scalar helper (declared ahead of the
        // first affected entry point).
        let (bounds, [min_member, max_member]) = range_members(offsets);
        let args_struct_name = module.fresh_name("FragDepthClampArgs");
        let args_struct = module.structs.define(StructDecl::new(
            args_struct_name,
            bounds.iter().map(|&(name, offset)| StructMember {
                offset: Some(offset),
                ..StructMember::new(cx.intern(name), f32_ty)
            }),
        ));
        module.insert_item_before(Item::Func(first_target), Item::Struct(args_struct));
        let args_var_name = module.fresh_name("frag_depth_clamp_args");
        let args_var = module.global_vars.define(GlobalVarDecl::new(
            args_var_name,
            cx.struct_ty(args_struct),
            AddrSpace::PushConstant,
        ));
        module.insert_item_before(Item::Func(first_target), Item::GlobalVar(args_var));

        let mut clamp = FuncDecl::new(module.fresh_name("clamp_frag_depth"));
        clamp.params.push(FuncParam {
            name: cx.intern("v"),
            ty: f32_ty,
            io: IoAttrs::default(),
            binding: None,
            waivers: Default::default(),
        });
        clamp.ret = Some(FuncRet { ty: f32_ty, io: IoAttrs::default() });
        {
            let body = &mut clamp.body;
            let v = body.param(0);
            let [min, max] = [min_member, max_member].map(|member| {
                let args = body.global_ref(args_var);
                body.member(args, member)
            });
            let clamped = body.builtin(BuiltinFn::Clamp, [v, min, max]);
            body.block.stmts.push(Stmt::Return(Some(clamped)));
        }
        let clamp = module.funcs.define(clamp);
        module.insert_item_before(Item::Func(first_target), Item::Func(clamp));

        // One struct helper per distinct return struct, shared by all the
        // entry points returning it.
        let mut struct_helpers = FxIndexMap::<Struct, Func>::default();
        for &(func, depth) in &targets {
            let wrapper = match depth {
                DepthReturn::Scalar => clamp,
                DepthReturn::Member(s) => match struct_helpers.get(&s) {
                    Some(&helper) => helper,
                    None => {
                        let helper = define_struct_helper(&mut module, s, clamp);
                        module.insert_item_before(Item::Func(func), Item::Func(helper));
                        log::trace!(
                            "ClampFragDepth: new helper `{}`",
                            &cx[module.funcs[helper].name]
                        );
                        struct_helpers.insert(s, helper);
                        helper
                    }
                },
            };
            rewrite_returns(&mut module.funcs[func].body, |func_at, value| {
                func_at.define_expr(ExprKind::Call {
                    callee: wrapper,
                    args: [value].into_iter().collect(),
                })
            });
        }

        let layout = Layouter::new(&module).struct_layout(args_struct)?;
        outputs.push_constant_layout = Some(PushConstantLayout {
            size: layout.layout.size,
            members: [("min_depth", min_member), ("max_depth", max_member)]
                .into_iter()
                .map(|(name, member)| PushConstantMember {
                    name: name.to_string(),
                    offset: layout.offsets[member as usize],
                })
                .collect(),
        });

        resolve::check(&module)?;
        Ok(Transformed::Changed(module))
    }
}

/// Members of the range push constants struct, in offset order, and the
/// indices of the minimum and maximum among them.
fn range_members(offsets: RangeOffsets) -> (Vec<(&'static str, u32)>, [u32; 2]) {
    let RangeOffsets { min, max } = offsets;
    match min.cmp(&max) {
        Ordering::Less => (vec![("min_depth", min), ("max_depth", max)], [0, 1]),
        Ordering::Greater => (vec![("max_depth", max), ("min_depth", min)], [1, 0]),
        // A zero-width range, read through a single member.
        Ordering::Equal => (vec![("depth", min)], [0, 0]),
    }
}

/// Define (without adding to `items`) `clamp_frag_depth_S(s: S) -> S`, which
/// rebuilds `s` with its depth member passed through `clamp`.
fn define_struct_helper(module: &mut Module, s: Struct, clamp: Func) -> Func {
    let cx = module.cx();
    let struct_ty = cx.struct_ty(s);
    let struct_name = &cx[module.structs[s].name];

    let mut helper = FuncDecl::new(module.fresh_name(&format!("clamp_frag_depth_{struct_name}")));
    helper.params.push(FuncParam {
        name: cx.intern("s"),
        ty: struct_ty,
        io: IoAttrs::default(),
        binding: None,
        waivers: Default::default(),
    });
    helper.ret = Some(FuncRet { ty: struct_ty, io: IoAttrs::default() });

    let body = &mut helper.body;
    let members: Vec<_> = module.structs[s]
        .members
        .iter()
        .enumerate()
        .map(|(i, member)| {
            let param = body.param(0);
            let value = body.member(param, i as u32);
            if member.io.builtin == Some(BuiltinValue::FragDepth) {
                body.call(clamp, [value])
            } else {
                value
            }
        })
        .collect();
    let rebuilt = body.construct(struct_ty, members);
    body.block.stmts.push(Stmt::Return(Some(rebuilt)));

    module.funcs.define(helper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Literal};
    use std::rc::Rc;

    fn fragment(module: &mut Module, name: &str, ret: FuncRet) -> Func {
        let cx = module.cx();
        let mut func = FuncDecl::new(cx.intern(name));
        func.stage = Some(PipelineStage::Fragment);
        func.ret = Some(ret);
        module.define_func(func)
    }

    fn return_value(module: &mut Module, func: Func, kind: ExprKind) {
        let body = &mut module.funcs[func].body;
        let value = body.expr(kind);
        body.block.stmts.push(Stmt::Return(Some(value)));
    }

    fn pass() -> ClampFragDepth {
        ClampFragDepth::new(Config { offsets: Some(RangeOffsets { min: 0, max: 4 }) })
    }

    fn count_funcs(module: &Module) -> usize {
        module.live_funcs().count()
    }

    fn returned_callee(module: &Module, func: Func, stmt_idx: usize) -> Option<Func> {
        let body = &module.funcs[func].body;
        let Stmt::Return(Some(value)) = body.block.stmts[stmt_idx] else { return None };
        match body.exprs[value] {
            ExprKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    #[test]
    fn no_config_or_no_depth_is_unchanged() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let vec4 = cx.vector_ty(ScalarType::F32, 4);
        let f = fragment(&mut module, "main", FuncRet { ty: vec4, io: IoAttrs::location(0) });
        return_value(&mut module, f, ExprKind::ZeroValue(vec4));

        let mut outputs = PassOutputs::default();
        let result = pass().run(&module, &mut outputs).unwrap();
        assert!(!result.is_changed());

        let result = ClampFragDepth::new(Config::default()).run(&module, &mut outputs).unwrap();
        assert!(!result.is_changed());
        assert!(outputs.push_constant_layout.is_none());
    }

    #[test]
    fn scalar_depth_returns_are_clamped() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let depth = FuncRet { ty: f32_ty, io: IoAttrs::builtin(BuiltinValue::FragDepth) };
        let a = fragment(&mut module, "a", depth);
        return_value(&mut module, a, ExprKind::Literal(Literal::F32(0.5)));
        let b = fragment(&mut module, "b", depth);
        return_value(&mut module, b, ExprKind::Literal(Literal::F32(2.0)));
        return_value(&mut module, b, ExprKind::Literal(Literal::F32(3.0)));

        let mut outputs = PassOutputs::default();
        let Transformed::Changed(new_module) = pass().run(&module, &mut outputs).unwrap() else {
            panic!("expected a change");
        };

        let Some(Item::Func(clamp)) = new_module.find_item("clamp_frag_depth") else {
            panic!("missing `clamp_frag_depth`");
        };
        assert_eq!(count_funcs(&new_module), count_funcs(&module) + 1);
        assert_eq!(returned_callee(&new_module, a, 0), Some(clamp));
        assert_eq!(returned_callee(&new_module, b, 0), Some(clamp));
        assert_eq!(returned_callee(&new_module, b, 1), Some(clamp));
        assert!(new_module.find_item("frag_depth_clamp_args").is_some());

        let layout = outputs.push_constant_layout.unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(layout.members[1], PushConstantMember { name: "max_depth".into(), offset: 4 });
    }

    /// Struct member names of the range push constants, with their offsets.
    fn range_struct(module: &Module) -> Vec<(String, Option<u32>)> {
        let cx = module.cx_ref();
        let Some(Item::Struct(s)) = module.find_item("FragDepthClampArgs") else {
            panic!("missing `FragDepthClampArgs`");
        };
        module.structs[s].members.iter().map(|m| (cx[m.name].to_string(), m.offset)).collect()
    }

    /// The members `clamp_frag_depth` reads its `[min, max]` bounds from.
    fn clamp_bounds(module: &Module) -> [u32; 2] {
        let Some(Item::Func(clamp)) = module.find_item("clamp_frag_depth") else {
            panic!("missing `clamp_frag_depth`");
        };
        let body = &module.funcs[clamp].body;
        let Stmt::Return(Some(clamped)) = body.block.stmts[0] else {
            panic!("`clamp_frag_depth` should return the clamped value");
        };
        let ExprKind::Builtin { func: BuiltinFn::Clamp, args } = &body.exprs[clamped] else {
            panic!("`clamp_frag_depth` should call `clamp`");
        };
        [args[1], args[2]].map(|bound| match body.exprs[bound] {
            ExprKind::Member { member, .. } => member,
            _ => panic!("bounds should be push constant members"),
        })
    }

    fn clamp_scalar_depth(offsets: RangeOffsets) -> (Module, PushConstantLayout) {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let depth = FuncRet {
            ty: cx.scalar_ty(ScalarType::F32),
            io: IoAttrs::builtin(BuiltinValue::FragDepth),
        };
        let main = fragment(&mut module, "main", depth);
        return_value(&mut module, main, ExprKind::Literal(Literal::F32(0.5)));

        let mut outputs = PassOutputs::default();
        let pass = ClampFragDepth::new(Config { offsets: Some(offsets) });
        let Transformed::Changed(new_module) = pass.run(&module, &mut outputs).unwrap() else {
            panic!("expected a change");
        };
        (new_module, outputs.push_constant_layout.unwrap())
    }

    #[test]
    fn range_members_follow_offset_order() {
        let (module, layout) = clamp_scalar_depth(RangeOffsets { min: 4, max: 0 });
        assert_eq!(range_struct(&module), [
            ("max_depth".to_string(), Some(0)),
            ("min_depth".to_string(), Some(4))
        ]);
        assert_eq!(clamp_bounds(&module), [1, 0]);
        assert_eq!(layout.size, 8);
        assert_eq!(layout.members, [
            PushConstantMember { name: "min_depth".into(), offset: 4 },
            PushConstantMember { name: "max_depth".into(), offset: 0 },
        ]);
    }

    #[test]
    fn equal_offsets_share_a_member() {
        let (module, layout) = clamp_scalar_depth(RangeOffsets { min: 8, max: 8 });
        assert_eq!(range_struct(&module), [("depth".to_string(), Some(8))]);
        assert_eq!(clamp_bounds(&module), [0, 0]);
        assert_eq!(layout.size, 12);
        assert_eq!(layout.members, [
            PushConstantMember { name: "min_depth".into(), offset: 8 },
            PushConstantMember { name: "max_depth".into(), offset: 8 },
        ]);
    }

    #[test]
    fn struct_helpers_are_shared_per_struct() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let vec4 = cx.vector_ty(ScalarType::F32, 4);
        let out = module.define_struct(StructDecl::new(cx.intern("Out"), [
            StructMember {
                io: IoAttrs::location(0),
                ..StructMember::new(cx.intern("color"), vec4)
            },
            StructMember {
                io: IoAttrs::builtin(BuiltinValue::FragDepth),
                ..StructMember::new(cx.intern("depth"), f32_ty)
            },
        ]));
        let out_ty = cx.struct_ty(out);
        let ret = FuncRet { ty: out_ty, io: IoAttrs::default() };
        let a = fragment(&mut module, "a", ret);
        return_value(&mut module, a, ExprKind::ZeroValue(out_ty));
        let b = fragment(&mut module, "b", ret);
        return_value(&mut module, b, ExprKind::ZeroValue(out_ty));

        let Transformed::Changed(new_module) =
            pass().run(&module, &mut PassOutputs::default()).unwrap()
        else {
            panic!("expected a change");
        };

        // `clamp_frag_depth` and a single `clamp_frag_depth_Out`.
        assert_eq!(count_funcs(&new_module), count_funcs(&module) + 2);
        let Some(Item::Func(helper)) = new_module.find_item("clamp_frag_depth_Out") else {
            panic!("missing struct helper");
        };
        assert_eq!(returned_callee(&new_module, a, 0), Some(helper));
        assert_eq!(returned_callee(&new_module, b, 0), Some(helper));

        // Only `depth` goes through `clamp_frag_depth`, `color` is copied.
        let Some(Item::Func(clamp)) = new_module.find_item("clamp_frag_depth") else {
            panic!("missing `clamp_frag_depth`");
        };
        let body = &new_module.funcs[helper].body;
        let Stmt::Return(Some(rebuilt)) = body.block.stmts[0] else {
            panic!("struct helper should return the rebuilt struct");
        };
        let ExprKind::Construct { ty, args } = &body.exprs[rebuilt] else {
            panic!("struct helper should construct `Out`");
        };
        assert_eq!(*ty, out_ty);
        assert!(matches!(body.exprs[args[0]], ExprKind::Member { member: 0, .. }));
        let ExprKind::Call { callee, args: clamp_args } = &body.exprs[args[1]] else {
            panic!("`depth` should be clamped");
        };
        assert_eq!(*callee, clamp);
        assert!(matches!(body.exprs[clamp_args[0]], ExprKind::Member { member: 1, .. }));
    }
}
