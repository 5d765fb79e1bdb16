//! Hoisting of module-scope variables into entry point parameters (and
//! locals), for backends without module-scope variable declarations.
//!
//! Every function (transitively) using module-scope variables gets them passed
//! in explicitly, with the strategy depending on the address space:
//! * `handle`: by value
//! * `storage`/`uniform`: by pointer (runtime-sized arrays wrapped in a struct,
//!   as pointers to them are not expressible)
//! * `workgroup`: entry point locals, except when containing matrices, in
//!   which case they become members of one per-entry-point struct, passed in
//!   by pointer (and reached through `let` pointers); by pointer in helpers
//! * `private`: all aggregated into one struct, instantiated as a local by
//!   entry points (re-assigning initializers), and passed by pointer to helpers
//!
//! `pixel_local` variables are left alone, and `push_constant` ones are not
//! supported (reported as a bug, earlier passes should have removed them).

use super::pass::{Pass, PassOutputs};
use crate::transform::Transformed;
use crate::visit::Visitor;
use crate::{
    Access, AddrSpace, Expr, ExprKind, Failure, Func, FuncBody, FuncParam, FxIndexSet, GlobalVar,
    IoAttrs, Item, LocalKind, LocalVar, LocalVarDecl, Module, Stmt, Struct, StructDecl,
    StructMember, Type, UnaryOp, ValidationWaivers, resolve,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

pub struct ModuleScopeVarToEntryPointParam;

/// Per-variable (i.e. module-wide) hoisting decision.
#[derive(Copy, Clone)]
enum Strategy {
    ByValue,
    /// Pointer to the variable itself, or to a wrapper struct (whose only
    /// member is the runtime-sized array the variable used to be).
    ByPointer { wrapper: Option<Struct> },
    Workgroup { contains_matrix: bool },
    /// Member of the private variables aggregate struct.
    Private { member: u32 },
}

/// Per-function replacement for a hoisted variable.
#[derive(Copy, Clone)]
enum Binding {
    ValueParam(u32),
    PtrParam { param: u32, wrapped: bool },
    /// `let` holding a pointer to the variable.
    PtrLet(LocalVar),
    Local(LocalVar),
    Private { base: PrivateBase, member: u32 },
}

/// Where a function finds the private variables aggregate.
#[derive(Copy, Clone)]
enum PrivateBase {
    Local(LocalVar),
    PtrParam(u32),
}

/// Parameters injected into a helper (non-entry-point) function, in order.
#[derive(Copy, Clone)]
enum Injected {
    Var(GlobalVar),
    PrivateVars,
}

impl PrivateBase {
    /// Reference to the whole aggregate.
    fn reference(self, body: &mut FuncBody) -> ExprKind {
        match self {
            PrivateBase::Local(local) => ExprKind::Local(local),
            PrivateBase::PtrParam(param) => {
                let ptr = body.param(param);
                ExprKind::Unary { op: UnaryOp::Deref, arg: ptr }
            }
        }
    }

    fn pointer(self, body: &mut FuncBody) -> Expr {
        match self {
            PrivateBase::Local(local) => {
                let local = body.local_ref(local);
                body.addr_of(local)
            }
            PrivateBase::PtrParam(param) => body.param(param),
        }
    }
}

impl Binding {
    /// What a use of the original variable turns into (a reference for all
    /// address spaces except `handle`, which are used by value).
    fn reference(self, body: &mut FuncBody) -> ExprKind {
        match self {
            Binding::ValueParam(param) => ExprKind::Param(param),
            Binding::PtrParam { param, wrapped } => {
                let ptr = body.param(param);
                if wrapped {
                    let wrapper = body.deref(ptr);
                    ExprKind::Member { base: wrapper, member: 0 }
                } else {
                    ExprKind::Unary { op: UnaryOp::Deref, arg: ptr }
                }
            }
            Binding::PtrLet(local) => {
                let ptr = body.local_ref(local);
                ExprKind::Unary { op: UnaryOp::Deref, arg: ptr }
            }
            Binding::Local(local) => ExprKind::Local(local),
            Binding::Private { base, member } => {
                let base = base.reference(body);
                let base = body.expr(base);
                ExprKind::Member { base, member }
            }
        }
    }

    /// The argument for the corresponding parameter of a callee.
    fn arg(self, body: &mut FuncBody) -> Expr {
        match self {
            Binding::ValueParam(param) | Binding::PtrParam { param, wrapped: _ } => {
                body.param(param)
            }
            Binding::PtrLet(local) => body.local_ref(local),
            Binding::Local(local) => {
                let local = body.local_ref(local);
                body.addr_of(local)
            }
            Binding::Private { base, .. } => base.pointer(body),
        }
    }
}

/// Collects the direct uses of module-scope variables, and direct callees.
#[derive(Default)]
struct DirectUses {
    vars: FxIndexSet<GlobalVar>,
    callees: FxIndexSet<Func>,
}

impl Visitor<'_> for DirectUses {
    fn visit_type_use(&mut self, _: Type) {}
    fn visit_struct_use(&mut self, _: Struct) {}
    fn visit_global_var_use(&mut self, gv: GlobalVar) {
        self.vars.insert(gv);
    }
    fn visit_func_use(&mut self, func: Func) {
        self.callees.insert(func);
    }
}

fn new_param(name: crate::InternedStr, ty: Type) -> FuncParam {
    FuncParam { name, ty, io: IoAttrs::default(), binding: None, waivers: Default::default() }
}

impl Pass for ModuleScopeVarToEntryPointParam {
    fn name(&self) -> &'static str {
        "ModuleScopeVarToEntryPointParam"
    }

    fn run(
        &self,
        module: &Module,
        _outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let cx = module.cx();

        let hoisted: Vec<GlobalVar> = module
            .live_global_vars()
            .filter(|&gv| module.global_vars[gv].addr_space != AddrSpace::PixelLocal)
            .collect();
        if hoisted.is_empty() {
            return Ok(Transformed::Unchanged);
        }

        let mut out = module.clone();
        let mut hoisting = Hoisting {
            strategies: FxHashMap::default(),
            privates: vec![],
            private_struct: None,
            injected_params: FxHashMap::default(),
        };

        // Module-wide strategies (and the structs they need).
        for &gv in &hoisted {
            let decl = &module.global_vars[gv];
            let strategy = match decl.addr_space {
                AddrSpace::Handle => Strategy::ByValue,
                AddrSpace::Storage | AddrSpace::Uniform => {
                    let wrapper = module.is_runtime_array(decl.ty).then(|| {
                        let name = out.fresh_name(&format!("{}_wrapper", &cx[decl.name]));
                        let wrapper = out.structs.define(StructDecl::new(name, [
                            StructMember::new(cx.intern("arr"), decl.ty),
                        ]));
                        out.insert_item_before(Item::GlobalVar(gv), Item::Struct(wrapper));
                        wrapper
                    });
                    Strategy::ByPointer { wrapper }
                }
                AddrSpace::Workgroup => {
                    Strategy::Workgroup { contains_matrix: module.contains_matrix(decl.ty) }
                }
                AddrSpace::Private => {
                    hoisting.privates.push(gv);
                    Strategy::Private { member: (hoisting.privates.len() - 1) as u32 }
                }
                AddrSpace::PushConstant
                | AddrSpace::Function
                | AddrSpace::In
                | AddrSpace::Out
                | AddrSpace::PixelLocal => {
                    return Err(Failure::bug(format!(
                        "ModuleScopeVarToEntryPointParam: unhandled address space `{}` (for `{}`)",
                        decl.addr_space.name(),
                        &cx[decl.name]
                    )));
                }
            };
            hoisting.strategies.insert(gv, strategy);
        }

        if !hoisting.privates.is_empty() {
            let name = out.fresh_name("PrivateVars");
            let s = out.structs.define(StructDecl::new(
                name,
                hoisting.privates.iter().map(|&gv| {
                    let decl = &module.global_vars[gv];
                    StructMember::new(decl.name, decl.ty)
                }),
            ));
            match module.live_funcs().next() {
                Some(func) => out.insert_item_before(Item::Func(func), Item::Struct(s)),
                None => out.items.push(Item::Struct(s)),
            }
            hoisting.private_struct = Some(s);
        }

        let decl_order: FxHashMap<GlobalVar, usize> =
            hoisted.iter().enumerate().map(|(i, &gv)| (gv, i)).collect();

        // Callees are always visited before their callers.
        let mut transitive_uses = FxHashMap::<Func, Vec<GlobalVar>>::default();
        for item in resolve::dependency_ordered_items(module)? {
            let Item::Func(func) = item else { continue };

            let mut direct = DirectUses::default();
            direct.visit_func_decl(&module.funcs[func]);
            let mut uses: FxIndexSet<GlobalVar> = direct
                .vars
                .into_iter()
                .filter(|gv| hoisting.strategies.contains_key(gv))
                .collect();
            for callee in &direct.callees {
                uses.extend(transitive_uses.get(callee).into_iter().flatten().copied());
            }
            let mut uses: Vec<_> = uses.into_iter().collect();
            uses.sort_by_key(|gv| decl_order[gv]);

            if !uses.is_empty() {
                let injected = hoisting.rewrite_func(&mut out, func, &uses);
                hoisting.injected_params.insert(func, injected);
            }
            transitive_uses.insert(func, uses);
        }

        out.items.retain(|item| match *item {
            Item::GlobalVar(gv) => !hoisting.strategies.contains_key(&gv),
            _ => true,
        });

        resolve::check(&out)?;
        Ok(Transformed::Changed(out))
    }
}

struct Hoisting {
    strategies: FxHashMap<GlobalVar, Strategy>,

    /// Private variables, in aggregate struct member order.
    privates: Vec<GlobalVar>,
    private_struct: Option<Struct>,

    /// Parameters injected into already rewritten helper functions.
    injected_params: FxHashMap<Func, Vec<Injected>>,
}

impl Hoisting {
    /// Rewrite `func` to take `uses` (in declaration order) through parameters
    /// (or locals), returning the parameters injected into it (for helpers).
    fn rewrite_func(&self, out: &mut Module, func: Func, uses: &[GlobalVar]) -> Vec<Injected> {
        let cx = out.cx();
        let is_entry = out.funcs[func].is_entry_point();
        let entry_waiver = ValidationWaivers { entry_point_parameter: true, ..Default::default() };

        let mut injected = vec![];
        let mut bindings = FxHashMap::default();
        let mut prologue = vec![];

        let uses_private =
            uses.iter().any(|gv| matches!(self.strategies[gv], Strategy::Private { .. }));
        let private_base = match self.private_struct {
            Some(private_struct) if uses_private => {
                Some(self.private_base(out, func, private_struct, &mut prologue))
            }
            _ => None,
        };
        if private_base.is_some() && !is_entry {
            injected.push(Injected::PrivateVars);
        }

        let mut matrix_workgroup_vars = vec![];
        for &gv in uses {
            let gv_decl = out.global_vars[gv].clone();
            let push_param = |out: &mut Module, ty: Type| {
                let mut param = new_param(gv_decl.name, ty);
                if is_entry {
                    param.binding = gv_decl.binding;
                    param.waivers = entry_waiver;
                }
                let params = &mut out.funcs[func].params;
                params.push(param);
                (params.len() - 1) as u32
            };
            let binding = match self.strategies[&gv] {
                Strategy::ByValue => Binding::ValueParam(push_param(out, gv_decl.ty)),
                Strategy::ByPointer { wrapper } => {
                    let pointee = wrapper.map_or(gv_decl.ty, |s| cx.struct_ty(s));
                    let ptr_ty = cx.ptr_ty(gv_decl.addr_space, pointee, gv_decl.access);
                    Binding::PtrParam { param: push_param(out, ptr_ty), wrapped: wrapper.is_some() }
                }
                Strategy::Workgroup { contains_matrix: true } if is_entry => {
                    matrix_workgroup_vars.push(gv);
                    continue;
                }
                Strategy::Workgroup { contains_matrix: false } if is_entry => {
                    let local = out.funcs[func].body.local(LocalVarDecl {
                        name: gv_decl.name,
                        ty: gv_decl.ty,
                        kind: LocalKind::Var(AddrSpace::Workgroup),
                        init: None,
                        waivers: ValidationWaivers {
                            ignore_address_space: true,
                            ..Default::default()
                        },
                    });
                    prologue.push(Stmt::Decl(local));
                    Binding::Local(local)
                }
                Strategy::Workgroup { .. } => {
                    let ptr_ty = cx.ptr_ty(AddrSpace::Workgroup, gv_decl.ty, Access::ReadWrite);
                    Binding::PtrParam { param: push_param(out, ptr_ty), wrapped: false }
                }
                Strategy::Private { member } => {
                    if let Some(base) = private_base {
                        bindings.insert(gv, Binding::Private { base, member });
                    }
                    continue;
                }
            };
            if !is_entry {
                injected.push(Injected::Var(gv));
            }
            bindings.insert(gv, binding);
        }

        if !matrix_workgroup_vars.is_empty() {
            self.bind_matrix_workgroup_vars(
                out,
                func,
                &matrix_workgroup_vars,
                &mut bindings,
                &mut prologue,
            );
        }

        let body = &mut out.funcs[func].body;
        let exprs: Vec<Expr> = body.exprs.keys().collect();

        // Avoid `&*x`, by replacing `&g` directly with the pointer `g` is
        // reached through (if any).
        let addr_of_parent: FxHashMap<Expr, Expr> = exprs
            .iter()
            .filter_map(|&e| match body.exprs[e] {
                ExprKind::Unary { op: UnaryOp::AddrOf, arg } => Some((arg, e)),
                _ => None,
            })
            .collect();

        enum Site {
            Var(GlobalVar),
            Call(Func),
        }
        for &e in &exprs {
            let site = match body.exprs[e] {
                ExprKind::GlobalVar(gv) => Site::Var(gv),
                ExprKind::Call { callee, .. } => Site::Call(callee),
                _ => continue,
            };
            match site {
                Site::Var(gv) => {
                    let Some(&binding) = bindings.get(&gv) else { continue };
                    match (binding.reference(body), addr_of_parent.get(&e)) {
                        (ExprKind::Unary { op: UnaryOp::Deref, arg: ptr }, Some(&parent)) => {
                            let ptr_kind = body.exprs[ptr].clone();
                            body.exprs[parent] = ptr_kind;
                        }
                        (kind, _) => body.exprs[e] = kind,
                    }
                }
                Site::Call(callee) => {
                    let Some(callee_params) = self.injected_params.get(&callee) else {
                        continue;
                    };
                    let new_args: SmallVec<[Expr; 4]> = callee_params
                        .iter()
                        .filter_map(|&injected| match injected {
                            Injected::Var(gv) => Some(bindings.get(&gv)?.arg(body)),
                            Injected::PrivateVars => Some(private_base?.pointer(body)),
                        })
                        .collect();
                    if let ExprKind::Call { args, .. } = &mut body.exprs[e] {
                        args.extend(new_args);
                    }
                }
            }
        }

        body.block.stmts.splice(0..0, prologue);
        injected
    }

    /// Entry points get a local aggregate (with initializers re-assigned, as
    /// it starts out zeroed), helpers get a pointer to their caller's.
    fn private_base(
        &self,
        out: &mut Module,
        func: Func,
        private_struct: Struct,
        prologue: &mut Vec<Stmt>,
    ) -> PrivateBase {
        let cx = out.cx();
        let private_ty = cx.struct_ty(private_struct);
        let name = cx.intern("private_vars");

        if !out.funcs[func].is_entry_point() {
            let ptr_ty = cx.ptr_ty(AddrSpace::Function, private_ty, Access::ReadWrite);
            let params = &mut out.funcs[func].params;
            params.push(new_param(name, ptr_ty));
            return PrivateBase::PtrParam((params.len() - 1) as u32);
        }

        let initializers: Vec<_> = self
            .privates
            .iter()
            .map(|&gv| out.global_vars[gv].initializer.clone())
            .collect();
        let body = &mut out.funcs[func].body;
        let local = body.local(LocalVarDecl::new_var(name, private_ty, None));
        prologue.push(Stmt::Decl(local));
        for (member, init) in initializers.iter().enumerate() {
            if let Some(init) = init {
                let base = body.local_ref(local);
                let lhs = body.member(base, member as u32);
                let rhs = body.const_value(init);
                prologue.push(Stmt::Assign { lhs, rhs });
            }
        }
        PrivateBase::Local(local)
    }

    /// Gather an entry point's matrix-containing workgroup variables into one
    /// struct, passed in by pointer, with a `let` pointer per variable.
    fn bind_matrix_workgroup_vars(
        &self,
        out: &mut Module,
        func: Func,
        vars: &[GlobalVar],
        bindings: &mut FxHashMap<GlobalVar, Binding>,
        prologue: &mut Vec<Stmt>,
    ) {
        let cx = out.cx();
        let struct_name = out.fresh_name(&format!("{}_workgroup_vars", &cx[out.funcs[func].name]));
        let s = out.structs.define(StructDecl::new(
            struct_name,
            vars.iter().map(|&gv| {
                let decl = &out.global_vars[gv];
                StructMember::new(decl.name, decl.ty)
            }),
        ));
        out.insert_item_before(Item::Func(func), Item::Struct(s));

        let ptr_ty = cx.ptr_ty(AddrSpace::Workgroup, cx.struct_ty(s), Access::ReadWrite);
        let params = &mut out.funcs[func].params;
        params.push(FuncParam {
            waivers: ValidationWaivers { entry_point_parameter: true, ..Default::default() },
            ..new_param(cx.intern("workgroup_vars"), ptr_ty)
        });
        let param = (params.len() - 1) as u32;

        for (member, &gv) in vars.iter().enumerate() {
            let (name, ty) = (out.global_vars[gv].name, out.global_vars[gv].ty);
            let body = &mut out.funcs[func].body;
            let ptr = body.param(param);
            let workgroup_vars = body.deref(ptr);
            let var = body.member(workgroup_vars, member as u32);
            let init = body.addr_of(var);
            let local = body.local(LocalVarDecl::new_let(
                name,
                cx.ptr_ty(AddrSpace::Workgroup, ty, Access::ReadWrite),
                init,
            ));
            prologue.push(Stmt::Decl(local));
            bindings.insert(gv, Binding::PtrLet(local));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BindingPoint, Context, DiagLevel, FuncDecl, GlobalVarDecl, Literal, PipelineStage,
        ScalarType, TypeKind,
    };
    use std::rc::Rc;

    fn new_module() -> Module {
        Module::new(Rc::new(Context::new()))
    }

    fn compute_entry(module: &mut Module, name: &str) -> Func {
        let cx = module.cx();
        let mut func = FuncDecl::new(cx.intern(name));
        func.stage = Some(PipelineStage::Compute);
        func.workgroup_size = Some([1, 1, 1]);
        module.define_func(func)
    }

    /// Define a module-scope variable without a binding.
    fn plain_var(module: &mut Module, name: &str, ty: Type, addr_space: AddrSpace) -> GlobalVar {
        let cx = module.cx();
        module.define_global_var(GlobalVarDecl::new(cx.intern(name), ty, addr_space))
    }

    fn run(module: &Module) -> Result<Transformed<Module>, Failure> {
        ModuleScopeVarToEntryPointParam.run(module, &mut PassOutputs::default())
    }

    fn changed(module: &Module) -> Module {
        match run(module).unwrap() {
            Transformed::Changed(module) => module,
            Transformed::Unchanged => panic!("expected a change"),
        }
    }

    #[test]
    fn no_module_scope_vars_is_unchanged() {
        let mut module = new_module();
        compute_entry(&mut module, "main");
        assert!(!run(&module).unwrap().is_changed());
    }

    #[test]
    fn runtime_sized_uniform_array_is_wrapped() {
        let mut module = new_module();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let buf = module.define_global_var(GlobalVarDecl {
            binding: Some(BindingPoint { group: 0, binding: 0 }),
            ..GlobalVarDecl::new(cx.intern("buf"), cx.array_ty(f32_ty, None), AddrSpace::Uniform)
        });
        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let array = body.global_ref(buf);
        let idx = body.lit(Literal::U32(0));
        let elem = body.index(array, idx);
        let x = body.local(LocalVarDecl::new_let(cx.intern("x"), f32_ty, elem));
        body.block.stmts.push(Stmt::Decl(x));

        let out = changed(&module);
        assert!(out.find_item("buf").is_none());

        let params = &out.funcs[main].params;
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].binding, Some(BindingPoint { group: 0, binding: 0 }));
        assert!(params[0].waivers.entry_point_parameter);
        let TypeKind::Ptr { addr_space: AddrSpace::Uniform, pointee, .. } = cx[params[0].ty] else {
            panic!("expected a uniform pointer parameter");
        };
        let TypeKind::Struct(wrapper) = cx[pointee] else { panic!("expected a wrapper struct") };
        let members = &out.structs[wrapper].members;
        assert_eq!(members.len(), 1);
        assert_eq!(&cx[members[0].name], "arr");
    }

    #[test]
    fn private_vars_are_aggregated() {
        let mut module = new_module();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let i32_ty = cx.scalar_ty(ScalarType::I32);
        let a = module.define_global_var(GlobalVarDecl {
            initializer: Some(crate::ConstValue::Literal(Literal::F32(1.0))),
            ..GlobalVarDecl::new(cx.intern("a"), f32_ty, AddrSpace::Private)
        });
        let b = plain_var(&mut module, "b", i32_ty, AddrSpace::Private);

        // Callers first, to check that callees still get rewritten first.
        let main = compute_entry(&mut module, "main");
        let helper = module.define_func(FuncDecl::new(cx.intern("helper")));

        let body = &mut module.funcs[helper].body;
        let lhs = body.global_ref(b);
        let rhs = body.lit(Literal::I32(2));
        let a_ref = body.global_ref(a);
        let t = body.local(LocalVarDecl::new_let(cx.intern("t"), f32_ty, a_ref));
        body.block.stmts.extend([Stmt::Assign { lhs, rhs }, Stmt::Decl(t)]);

        let body = &mut module.funcs[main].body;
        let call = body.call(helper, []);
        let a_ref = body.global_ref(a);
        let y = body.local(LocalVarDecl::new_let(cx.intern("y"), f32_ty, a_ref));
        body.block.stmts.extend([Stmt::Expr(call), Stmt::Decl(y)]);

        let out = changed(&module);
        let aggregates: Vec<Struct> = out
            .live_structs()
            .filter(|&s| cx[out.structs[s].name].starts_with("PrivateVars"))
            .collect();
        assert_eq!(aggregates.len(), 1);
        let private_ty = cx.struct_ty(aggregates[0]);

        let helper_params = &out.funcs[helper].params;
        assert_eq!(helper_params.len(), 1);
        assert_eq!(
            helper_params[0].ty,
            cx.ptr_ty(AddrSpace::Function, private_ty, Access::ReadWrite)
        );

        let main_body = &out.funcs[main].body;
        let Stmt::Decl(local) = main_body.block.stmts[0] else { panic!("expected a local") };
        assert_eq!(main_body.locals[local].ty, private_ty);
        let init_assigns =
            main_body.block.stmts.iter().filter(|stmt| matches!(stmt, Stmt::Assign { .. })).count();
        assert_eq!(init_assigns, 1);
        let Stmt::Expr(call) = main_body.block.stmts[2] else { panic!("expected the call") };
        let ExprKind::Call { args, .. } = &main_body.exprs[call] else { unreachable!() };
        assert_eq!(args.len(), 1);

        // Nothing left to hoist.
        assert!(!run(&out).unwrap().is_changed());
    }

    #[test]
    fn addr_of_is_not_stacked_on_deref() {
        let mut module = new_module();
        let cx = module.cx();
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let s = module.define_global_var(GlobalVarDecl {
            binding: Some(BindingPoint { group: 0, binding: 1 }),
            ..GlobalVarDecl::new(cx.intern("s"), u32_ty, AddrSpace::Storage)
        });

        let mut store = FuncDecl::new(cx.intern("store"));
        store.params.push(new_param(
            cx.intern("p"),
            cx.ptr_ty(AddrSpace::Storage, u32_ty, Access::ReadWrite),
        ));
        let p = store.body.param(0);
        let lhs = store.body.deref(p);
        let rhs = store.body.lit(Literal::U32(1));
        store.body.block.stmts.push(Stmt::Assign { lhs, rhs });
        let store = module.define_func(store);

        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let s_ref = body.global_ref(s);
        let ptr = body.addr_of(s_ref);
        let call = body.call(store, [ptr]);
        body.block.stmts.push(Stmt::Expr(call));

        let out = changed(&module);
        let body = &out.funcs[main].body;
        let ExprKind::Call { args, .. } = &body.exprs[call] else { unreachable!() };
        assert!(matches!(body.exprs[args[0]], ExprKind::Param(0)));
        assert_eq!(out.funcs[store].params.len(), 1);
    }

    #[test]
    fn workgroup_matrices_go_through_a_struct() {
        let mut module = new_module();
        let cx = module.cx();
        let mat_ty = cx.matrix_ty(2, 2, ScalarType::F32);
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let m = plain_var(&mut module, "m", mat_ty, AddrSpace::Workgroup);
        let c = plain_var(&mut module, "c", u32_ty, AddrSpace::Workgroup);
        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let m_ref = body.global_ref(m);
        let zero = body.expr(ExprKind::ZeroValue(mat_ty));
        let c_ref = body.global_ref(c);
        let one = body.lit(Literal::U32(1));
        body.block.stmts.extend([
            Stmt::Assign { lhs: m_ref, rhs: zero },
            Stmt::Assign { lhs: c_ref, rhs: one },
        ]);

        let out = changed(&module);
        assert!(matches!(out.find_item("main_workgroup_vars"), Some(Item::Struct(_))));
        let params = &out.funcs[main].params;
        assert_eq!(params.len(), 1);
        assert!(matches!(cx[params[0].ty], TypeKind::Ptr { addr_space: AddrSpace::Workgroup, .. }));

        let body = &out.funcs[main].body;
        let [Stmt::Decl(c_local), Stmt::Decl(m_local), ..] = &body.block.stmts[..] else {
            panic!("expected two local declarations first");
        };
        assert_eq!(body.locals[*c_local].kind, LocalKind::Var(AddrSpace::Workgroup));
        assert!(body.locals[*c_local].waivers.ignore_address_space);
        assert_eq!(body.locals[*m_local].kind, LocalKind::Let);
    }

    #[test]
    fn handles_are_passed_by_value() {
        let mut module = new_module();
        let cx = module.cx();
        let texture_ty = cx.intern(TypeKind::Texture2d { sampled: ScalarType::F32 });
        let sampler_ty = cx.intern(TypeKind::Sampler { comparison: false });
        let vec4 = cx.vector_ty(ScalarType::F32, 4);
        let t = module.define_global_var(GlobalVarDecl {
            binding: Some(BindingPoint { group: 0, binding: 1 }),
            ..GlobalVarDecl::new(cx.intern("t"), texture_ty, AddrSpace::Handle)
        });
        let smp = module.define_global_var(GlobalVarDecl {
            binding: Some(BindingPoint { group: 0, binding: 2 }),
            ..GlobalVarDecl::new(cx.intern("smp"), sampler_ty, AddrSpace::Handle)
        });

        // `fn sample() -> vec4<f32> { return textureSample(t, smp, vec2(0.0)); }`
        let mut sample = FuncDecl::new(cx.intern("sample"));
        sample.ret = Some(crate::FuncRet { ty: vec4, io: IoAttrs::default() });
        let t_ref = sample.body.global_ref(t);
        let smp_ref = sample.body.global_ref(smp);
        let uv = sample.body.expr(ExprKind::ZeroValue(cx.vector_ty(ScalarType::F32, 2)));
        let texel = sample.body.builtin(crate::BuiltinFn::TextureSample, [t_ref, smp_ref, uv]);
        sample.body.block.stmts.push(Stmt::Return(Some(texel)));
        let sample = module.define_func(sample);

        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let call = body.call(sample, []);
        let c = body.local(LocalVarDecl::new_let(cx.intern("c"), vec4, call));
        body.block.stmts.push(Stmt::Decl(c));

        let out = changed(&module);
        assert!(out.find_item("t").is_none());
        assert!(out.find_item("smp").is_none());

        // Entry point resources keep their bindings.
        let params = &out.funcs[main].params;
        assert_eq!(params.iter().map(|p| p.ty).collect::<Vec<_>>(), [texture_ty, sampler_ty]);
        assert_eq!(params[0].binding, Some(BindingPoint { group: 0, binding: 1 }));
        assert_eq!(params[1].binding, Some(BindingPoint { group: 0, binding: 2 }));
        assert!(params.iter().all(|p| p.waivers.entry_point_parameter));

        // Helpers take the same handles, as plain parameters.
        let params = &out.funcs[sample].params;
        assert_eq!(params.iter().map(|p| p.ty).collect::<Vec<_>>(), [texture_ty, sampler_ty]);
        assert!(params.iter().all(|p| p.binding.is_none() && !p.waivers.entry_point_parameter));
        let body = &out.funcs[sample].body;
        assert!(matches!(body.exprs[t_ref], ExprKind::Param(0)));
        assert!(matches!(body.exprs[smp_ref], ExprKind::Param(1)));

        let body = &out.funcs[main].body;
        let ExprKind::Call { args, .. } = &body.exprs[call] else { unreachable!() };
        let args: Vec<_> = args.iter().map(|&arg| &body.exprs[arg]).collect();
        assert!(matches!(args[..], [ExprKind::Param(0), ExprKind::Param(1)]));
    }

    #[test]
    fn pixel_local_vars_stay_module_scope() {
        let mut module = new_module();
        let cx = module.cx();
        let u32_ty = cx.scalar_ty(ScalarType::U32);
        let pl = plain_var(&mut module, "pl", u32_ty, AddrSpace::PixelLocal);
        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let pl_ref = body.global_ref(pl);
        let x = body.local(LocalVarDecl::new_let(cx.intern("x"), u32_ty, pl_ref));
        body.block.stmts.push(Stmt::Decl(x));

        // Nothing else to hoist.
        assert!(!run(&module).unwrap().is_changed());

        let p = plain_var(&mut module, "p", u32_ty, AddrSpace::Private);
        let body = &mut module.funcs[main].body;
        let p_ref = body.global_ref(p);
        let y = body.local(LocalVarDecl::new_let(cx.intern("y"), u32_ty, p_ref));
        body.block.stmts.push(Stmt::Decl(y));

        let out = changed(&module);
        assert!(out.find_item("p").is_none());
        assert_eq!(out.find_item("pl"), Some(Item::GlobalVar(pl)));
        assert!(out.funcs[main].params.is_empty());
        assert!(matches!(out.funcs[main].body.exprs[pl_ref], ExprKind::GlobalVar(gv) if gv == pl));
    }

    #[test]
    fn push_constants_are_a_bug() {
        let mut module = new_module();
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let pc = plain_var(&mut module, "pc", f32_ty, AddrSpace::PushConstant);
        let main = compute_entry(&mut module, "main");
        let body = &mut module.funcs[main].body;
        let pc_ref = body.global_ref(pc);
        let x = body.local(LocalVarDecl::new_let(cx.intern("x"), f32_ty, pc_ref));
        body.block.stmts.push(Stmt::Decl(x));

        let Err(failure) = run(&module) else {
            panic!("push constant use was not reported");
        };
        assert!(matches!(failure.diags[0].level, DiagLevel::Bug(_)));
    }
}
