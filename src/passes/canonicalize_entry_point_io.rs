//! Canonicalization of entry point inputs/outputs, into the shapes the MSL and
//! GLSL printers expect.
//!
//! MSL: location-attributed inputs are gathered into one `[[stage_in]]` struct
//! parameter (builtins stay separate parameters, struct parameters get
//! flattened), and non-struct return values are wrapped in structs.
//!
//! GLSL: entry points lose all parameters and return values, which become
//! `in`/`out` module-scope variables, read and written by a wrapper around the
//! original entry point (demoted to a regular `<entry>_inner` function).

use super::pass::{Pass, PassOutputs, rewrite_returns};
use crate::transform::Transformed;
use crate::{
    AddrSpace, BindingPoint, Context, Expr, ExprKind, Failure, Func, FuncBody, FuncDecl, FuncParam,
    FuncRet, GlobalVar, GlobalVarDecl, InternedStr, IoAttrs, Item, LocalVar, LocalVarDecl, Module,
    Stmt, StructDecl, StructMember, Type, TypeKind, ValidationWaivers, resolve,
};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ShaderStyle {
    Msl,
    Glsl,
}

pub struct CanonicalizeEntryPointIo {
    style: ShaderStyle,
}

impl CanonicalizeEntryPointIo {
    pub fn new(style: ShaderStyle) -> Self {
        Self { style }
    }
}

impl Pass for CanonicalizeEntryPointIo {
    fn name(&self) -> &'static str {
        "CanonicalizeEntryPointIo"
    }

    fn run(
        &self,
        module: &Module,
        _outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let entry_points: Vec<Func> = module.entry_points().collect();
        let mut out = module.clone();
        let mut changed = false;
        for func in entry_points {
            changed |= match self.style {
                ShaderStyle::Msl => canonicalize_msl(&mut out, func),
                ShaderStyle::Glsl => canonicalize_glsl(&mut out, func)?,
            };
        }
        if !changed {
            return Ok(Transformed::Unchanged);
        }
        resolve::check(&out)?;
        Ok(Transformed::Changed(out))
    }
}

/// Pick a name not in `taken` (starting with `base` itself), and reserve it.
fn unique_name(cx: &Context, base: InternedStr, taken: &mut FxHashSet<InternedStr>) -> InternedStr {
    if taken.insert(base) {
        return base;
    }
    let base_str = &cx[base];
    (1..)
        .map(|i| cx.intern(format!("{base_str}_{i}")))
        .find(|&name| taken.insert(name))
        .unwrap_or(base)
}

fn has_location(module: &Module, ty: Type, io: &IoAttrs) -> bool {
    match module.cx_ref()[ty] {
        TypeKind::Struct(s) => module.structs[s].members.iter().any(|m| m.io.location.is_some()),
        _ => io.location.is_some(),
    }
}

/// Where an input value comes from, after the MSL rewrite.
#[derive(Copy, Clone)]
enum Leaf {
    Param(u32),
    /// Member of the `[[stage_in]]` struct, always parameter `0`.
    StageIn(u32),
    /// Struct inputs, rebuilt from their (flattened) members.
    Local(LocalVar),
}

impl Leaf {
    fn kind(self, body: &mut FuncBody) -> ExprKind {
        match self {
            Leaf::Param(idx) => ExprKind::Param(idx),
            Leaf::StageIn(member) => {
                let base = body.param(0);
                ExprKind::Member { base, member }
            }
            Leaf::Local(local) => ExprKind::Local(local),
        }
    }
}

fn canonicalize_msl(module: &mut Module, func: Func) -> bool {
    let cx = module.cx();
    let decl = &module.funcs[func];
    let entry_name = cx[decl.name].to_string();

    let is_io_param = |param: &FuncParam| !param.waivers.entry_point_parameter;
    let needs_stage_in =
        decl.params.iter().any(|p| is_io_param(p) && has_location(module, p.ty, &p.io));
    let has_struct_inputs = decl
        .params
        .iter()
        .any(|p| is_io_param(p) && matches!(cx[p.ty], TypeKind::Struct(_)));
    let wrapped_ret =
        decl.ret.filter(|ret| !ret.io.is_empty() && !matches!(cx[ret.ty], TypeKind::Struct(_)));
    if !needs_stage_in && !has_struct_inputs && wrapped_ret.is_none() {
        return false;
    }

    // Flatten inputs into parameters and `[[stage_in]]` members.
    enum Input {
        Leaf(Leaf),
        Struct { ty: Type, name: InternedStr, members: Vec<Leaf> },
    }
    let mut new_params = SmallVec::<[FuncParam; 2]>::new();
    let mut param_names = FxHashSet::default();
    let mut stage_in_members = vec![];
    let mut stage_in_names = FxHashSet::default();
    let first_param_idx = u32::from(needs_stage_in);
    let mut leaf_for = |name: InternedStr,
                        ty: Type,
                        io: IoAttrs,
                        binding: Option<BindingPoint>,
                        waivers: ValidationWaivers| {
        if io.location.is_some() {
            let name = unique_name(&cx, name, &mut stage_in_names);
            stage_in_members.push(StructMember { name, ty, io, offset: None });
            Leaf::StageIn((stage_in_members.len() - 1) as u32)
        } else {
            let name = unique_name(&cx, name, &mut param_names);
            new_params.push(FuncParam { name, ty, io, binding, waivers });
            Leaf::Param(first_param_idx + (new_params.len() - 1) as u32)
        }
    };
    let inputs: Vec<Input> = decl
        .params
        .iter()
        .map(|param| match cx[param.ty] {
            TypeKind::Struct(s) if is_io_param(param) => Input::Struct {
                ty: param.ty,
                name: param.name,
                members: module.structs[s]
                    .members
                    .iter()
                    .map(|m| leaf_for(m.name, m.ty, m.io, None, Default::default()))
                    .collect(),
            },
            _ => {
                Input::Leaf(leaf_for(param.name, param.ty, param.io, param.binding, param.waivers))
            }
        })
        .collect();

    if needs_stage_in {
        let stage_in_name = module.fresh_name(&format!("{entry_name}_in"));
        let stage_in = module.structs.define(StructDecl::new(stage_in_name, stage_in_members));
        module.insert_item_before(Item::Func(func), Item::Struct(stage_in));
        let name = unique_name(&cx, cx.intern("inputs"), &mut param_names);
        new_params.insert(0, FuncParam {
            name,
            ty: cx.struct_ty(stage_in),
            io: IoAttrs::default(),
            binding: None,
            waivers: Default::default(),
        });
    }
    let out_struct = wrapped_ret.map(|ret| {
        let name = module.fresh_name(&format!("{entry_name}_out"));
        let s = module.structs.define(StructDecl::new(name, [StructMember {
            io: ret.io,
            ..StructMember::new(cx.intern("value"), ret.ty)
        }]));
        module.insert_item_before(Item::Func(func), Item::Struct(s));
        cx.struct_ty(s)
    });

    let decl = &mut module.funcs[func];
    decl.params = new_params;
    let body = &mut decl.body;
    let old_exprs: Vec<Expr> = body.exprs.keys().collect();

    let mut prologue = vec![];
    let leaves: Vec<Leaf> = inputs
        .into_iter()
        .map(|input| match input {
            Input::Leaf(leaf) => leaf,
            Input::Struct { ty, name, members } => {
                let args: SmallVec<[Expr; 4]> = members
                    .into_iter()
                    .map(|member| {
                        let kind = member.kind(body);
                        body.expr(kind)
                    })
                    .collect();
                let value = body.construct(ty, args);
                let local = body.local(LocalVarDecl::new_let(name, ty, value));
                prologue.push(Stmt::Decl(local));
                Leaf::Local(local)
            }
        })
        .collect();
    for expr in old_exprs {
        if let ExprKind::Param(idx) = body.exprs[expr] {
            if let Some(&leaf) = leaves.get(idx as usize) {
                let kind = leaf.kind(body);
                body.exprs[expr] = kind;
            }
        }
    }
    body.block.stmts.splice(0..0, prologue);

    if let Some(out_ty) = out_struct {
        decl.ret = Some(FuncRet { ty: out_ty, io: IoAttrs::default() });
        rewrite_returns(&mut decl.body, |func_at, value| {
            func_at.define_expr(ExprKind::Construct {
                ty: out_ty,
                args: [value].into_iter().collect(),
            })
        });
    }
    true
}

/// Define an `in`/`out` variable, ahead of `before`.
fn define_io_var(
    module: &mut Module,
    before: Func,
    name: &str,
    ty: Type,
    addr_space: AddrSpace,
    io: IoAttrs,
) -> GlobalVar {
    let name = module.fresh_name(name);
    let gv =
        module.global_vars.define(GlobalVarDecl { io, ..GlobalVarDecl::new(name, ty, addr_space) });
    module.insert_item_before(Item::Func(before), Item::GlobalVar(gv));
    gv
}

/// The `in`/`out` variables standing for one GLSL entry point input/output.
enum IoVars {
    Var(GlobalVar),
    /// One variable per struct member.
    Struct { ty: Type, members: Vec<GlobalVar> },
}

impl IoVars {
    fn define(
        module: &mut Module,
        before: Func,
        base: &str,
        ty: Type,
        io: IoAttrs,
        addr_space: AddrSpace,
    ) -> Self {
        let cx = module.cx();
        match cx[ty] {
            TypeKind::Struct(s) => {
                let members = module.structs[s].members.clone();
                let members = members
                    .iter()
                    .map(|m| {
                        let name = format!("{base}_{}", &cx[m.name]);
                        define_io_var(module, before, &name, m.ty, addr_space, m.io)
                    })
                    .collect();
                IoVars::Struct { ty, members }
            }
            _ => IoVars::Var(define_io_var(module, before, base, ty, addr_space, io)),
        }
    }
}

fn canonicalize_glsl(module: &mut Module, func: Func) -> Result<bool, Failure> {
    let cx = module.cx();
    let decl = module.funcs[func].clone();
    if decl.params.is_empty() && decl.ret.is_none() {
        return Ok(false);
    }
    let entry_name = cx[decl.name].to_string();

    let mut inputs = vec![];
    for param in &decl.params {
        if param.waivers.entry_point_parameter || param.binding.is_some() {
            return Err(Failure::bug(format!(
                "entry point `{entry_name}`: resource parameter `{}` has no GLSL equivalent",
                &cx[param.name]
            )));
        }
        let base = format!("{}_in", &cx[param.name]);
        inputs.push(IoVars::define(module, func, &base, param.ty, param.io, AddrSpace::In));
    }
    let output = decl.ret.map(|ret| {
        let base = format!("{entry_name}_out");
        IoVars::define(module, func, &base, ret.ty, ret.io, AddrSpace::Out)
    });

    // The original entry point, demoted to a regular function.
    let mut inner = decl.clone();
    inner.name = module.fresh_name(&format!("{entry_name}_inner"));
    inner.stage = None;
    inner.workgroup_size = None;
    for param in &mut inner.params {
        param.io = IoAttrs::default();
    }
    if let Some(ret) = &mut inner.ret {
        ret.io = IoAttrs::default();
    }
    let inner = module.funcs.define(inner);
    module.insert_item_before(Item::Func(func), Item::Func(inner));

    let mut wrapper = FuncDecl::new(decl.name);
    wrapper.stage = decl.stage;
    wrapper.workgroup_size = decl.workgroup_size;
    let body = &mut wrapper.body;
    let args: SmallVec<[Expr; 4]> = inputs
        .iter()
        .map(|input| match input {
            &IoVars::Var(gv) => body.global_ref(gv),
            IoVars::Struct { ty, members } => {
                let args: SmallVec<[Expr; 4]> =
                    members.iter().map(|&gv| body.global_ref(gv)).collect();
                body.construct(*ty, args)
            }
        })
        .collect();
    let call = body.call(inner, args);
    match output {
        None => body.block.stmts.push(Stmt::Expr(call)),
        Some(IoVars::Var(gv)) => {
            let lhs = body.global_ref(gv);
            body.block.stmts.push(Stmt::Assign { lhs, rhs: call });
        }
        Some(IoVars::Struct { ty, members }) => {
            let result = body.local(LocalVarDecl::new_let(cx.intern("result"), ty, call));
            body.block.stmts.push(Stmt::Decl(result));
            for (member, gv) in members.into_iter().enumerate() {
                let lhs = body.global_ref(gv);
                let result = body.local_ref(result);
                let rhs = body.member(result, member as u32);
                body.block.stmts.push(Stmt::Assign { lhs, rhs });
            }
        }
    }
    module.funcs[func] = wrapper;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuiltinValue, PipelineStage, ScalarType};
    use std::rc::Rc;

    fn io_param(cx: &Context, name: &str, ty: Type, io: IoAttrs) -> FuncParam {
        FuncParam { name: cx.intern(name), ty, io, binding: None, waivers: Default::default() }
    }

    /// `@fragment fn fs(@location(0) color: vec4<f32>, @builtin(position) pos: vec4<f32>)
    ///     -> @location(0) vec4<f32> { return color; }`
    fn fragment_module() -> (Module, Func) {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let vec4 = cx.vector_ty(ScalarType::F32, 4);
        let mut fs = FuncDecl::new(cx.intern("fs"));
        fs.stage = Some(PipelineStage::Fragment);
        fs.params.push(io_param(&cx, "color", vec4, IoAttrs::location(0)));
        fs.params.push(io_param(&cx, "pos", vec4, IoAttrs::builtin(BuiltinValue::Position)));
        fs.ret = Some(FuncRet { ty: vec4, io: IoAttrs::location(0) });
        let color = fs.body.param(0);
        fs.body.block.stmts.push(Stmt::Return(Some(color)));
        let fs = module.define_func(fs);
        (module, fs)
    }

    /// A vertex shader with struct input and output.
    fn vertex_module() -> (Module, Func) {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let vec4 = cx.vector_ty(ScalarType::F32, 4);
        let v_in = module.define_struct(StructDecl::new(cx.intern("VIn"), [
            StructMember { io: IoAttrs::location(0), ..StructMember::new(cx.intern("a"), f32_ty) },
            StructMember {
                io: IoAttrs::builtin(BuiltinValue::VertexIndex),
                ..StructMember::new(cx.intern("vi"), u32_ty)
            },
        ]));
        let v_out = module.define_struct(StructDecl::new(cx.intern("VOut"), [
            StructMember {
                io: IoAttrs::builtin(BuiltinValue::Position),
                ..StructMember::new(cx.intern("p"), vec4)
            },
            StructMember { io: IoAttrs::location(0), ..StructMember::new(cx.intern("c"), f32_ty) },
        ]));

        let mut vs = FuncDecl::new(cx.intern("vs"));
        vs.stage = Some(PipelineStage::Vertex);
        vs.params.push(io_param(&cx, "input", cx.struct_ty(v_in), IoAttrs::default()));
        vs.ret = Some(FuncRet { ty: cx.struct_ty(v_out), io: IoAttrs::default() });
        let body = &mut vs.body;
        let p = body.expr(ExprKind::ZeroValue(vec4));
        let input = body.param(0);
        let a = body.member(input, 0);
        let out = body.construct(cx.struct_ty(v_out), [p, a]);
        body.block.stmts.push(Stmt::Return(Some(out)));
        let vs = module.define_func(vs);
        (module, vs)
    }

    fn run(style: ShaderStyle, module: &Module) -> Module {
        let pass = CanonicalizeEntryPointIo::new(style);
        match pass.run(module, &mut PassOutputs::default()).unwrap() {
            Transformed::Changed(out) => out,
            Transformed::Unchanged => panic!("expected a change"),
        }
    }

    #[test]
    fn msl_gathers_locations_into_stage_in() {
        let (module, fs) = fragment_module();
        resolve::check(&module).unwrap();
        let out = run(ShaderStyle::Msl, &module);
        let cx = out.cx();

        let fs = &out.funcs[fs];
        let params: Vec<_> = fs.params.iter().map(|p| cx[p.name].to_string()).collect();
        assert_eq!(params, ["inputs", "pos"]);
        assert_eq!(out.type_name(fs.params[0].ty), "fs_in");
        assert_eq!(fs.params[1].io.builtin, Some(BuiltinValue::Position));

        let ret = fs.ret.unwrap();
        assert_eq!(out.type_name(ret.ty), "fs_out");
        assert!(ret.io.is_empty());
        let Some(&Stmt::Return(Some(value))) = fs.body.block.stmts.last() else {
            panic!("expected a return");
        };
        let ExprKind::Construct { ref args, .. } = fs.body.exprs[value] else {
            panic!("expected a struct construction");
        };
        // `inputs.color`
        assert!(matches!(fs.body.exprs[args[0]], ExprKind::Member { member: 0, .. }));
    }

    #[test]
    fn msl_flattens_struct_inputs() {
        let (module, vs) = vertex_module();
        resolve::check(&module).unwrap();
        let out = run(ShaderStyle::Msl, &module);
        let cx = out.cx();

        let vs = &out.funcs[vs];
        let params: Vec<_> = vs.params.iter().map(|p| cx[p.name].to_string()).collect();
        assert_eq!(params, ["inputs", "vi"]);
        // The struct return already carries attributes, and stays as-is.
        assert_eq!(out.type_name(vs.ret.unwrap().ty), "VOut");
        // `let input = VIn(inputs.a, vi);`
        let Stmt::Decl(input) = vs.body.block.stmts[0] else { panic!("expected a `let`") };
        assert_eq!(&cx[vs.body.locals[input].name], "input");
    }

    #[test]
    fn msl_builtin_only_compute_is_unchanged() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let mut cs = FuncDecl::new(cx.intern("cs"));
        cs.stage = Some(PipelineStage::Compute);
        cs.workgroup_size = Some([64, 1, 1]);
        let id_ty = cx.vector_ty(ScalarType::U32, 3);
        let id_io = IoAttrs::builtin(BuiltinValue::GlobalInvocationId);
        cs.params.push(io_param(&cx, "id", id_ty, id_io));
        module.define_func(cs);

        let pass = CanonicalizeEntryPointIo::new(ShaderStyle::Msl);
        assert!(!pass.run(&module, &mut PassOutputs::default()).unwrap().is_changed());
    }

    #[test]
    fn glsl_moves_io_to_module_scope() {
        let (module, fs) = fragment_module();
        let out = run(ShaderStyle::Glsl, &module);
        let cx = out.cx();

        let names: Vec<_> =
            out.items.iter().map(|&item| cx[out.item_name(item)].to_string()).collect();
        assert_eq!(names, ["color_in", "pos_in", "fs_out", "fs_inner", "fs"]);

        let wrapper = &out.funcs[fs];
        assert_eq!(wrapper.stage, Some(PipelineStage::Fragment));
        assert!(wrapper.params.is_empty() && wrapper.ret.is_none());
        assert!(matches!(wrapper.body.block.stmts[..], [Stmt::Assign { .. }]));

        let Some(Item::GlobalVar(pos_in)) = out.find_item("pos_in") else { unreachable!() };
        assert_eq!(out.global_vars[pos_in].addr_space, AddrSpace::In);
        assert_eq!(out.global_vars[pos_in].io.builtin, Some(BuiltinValue::Position));

        let Some(Item::Func(inner)) = out.find_item("fs_inner") else { unreachable!() };
        assert!(!out.funcs[inner].is_entry_point());
        assert!(out.funcs[inner].params.iter().all(|p| p.io.is_empty()));
    }

    #[test]
    fn glsl_splits_structs_per_member() {
        let (module, vs) = vertex_module();
        let out = run(ShaderStyle::Glsl, &module);
        let cx = out.cx();

        let io_vars: Vec<_> = out
            .live_global_vars()
            .map(|gv| (cx[out.global_vars[gv].name].to_string(), out.global_vars[gv].addr_space))
            .collect();
        assert_eq!(io_vars, [
            ("input_in_a".to_string(), AddrSpace::In),
            ("input_in_vi".to_string(), AddrSpace::In),
            ("vs_out_p".to_string(), AddrSpace::Out),
            ("vs_out_c".to_string(), AddrSpace::Out),
        ]);

        // `let result = vs_inner(VIn(input_in_a, input_in_vi));`, then one
        // assignment per output member.
        let stmts = &out.funcs[vs].body.block.stmts;
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0], Stmt::Decl(_)));
    }
}
