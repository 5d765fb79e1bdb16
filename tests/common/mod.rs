//! Small modules shared by the backend tests.

#![allow(dead_code)]

use sluice::{
    AddrSpace, BindingPoint, BuiltinFn, BuiltinValue, Context, ExprKind, Func, FuncDecl, FuncParam,
    FuncRet, GlobalVar, GlobalVarDecl, IoAttrs, Literal, LocalVarDecl, Module, PipelineStage,
    ScalarType, Stmt, StructDecl, StructMember, Type,
};
use std::rc::Rc;

pub fn bp(group: u32, binding: u32) -> BindingPoint {
    BindingPoint { group, binding }
}

/// `@group(g) @binding(b) var<storage, read_write> data: array<f32>;`
pub fn storage_array(module: &mut Module, binding: BindingPoint) -> GlobalVar {
    let cx = module.cx();
    let ty = cx.array_ty(cx.scalar_ty(ScalarType::F32), None);
    module.define_global_var(GlobalVarDecl {
        binding: Some(binding),
        ..GlobalVarDecl::new(cx.intern("data"), ty, AddrSpace::Storage)
    })
}

/// `@compute @workgroup_size(8, 1, 1)
///  fn main(@builtin(global_invocation_id) id: vec3<u32>)`, with an empty body.
pub fn compute_main(module: &mut Module) -> Func {
    let cx = module.cx();
    let mut main = FuncDecl::new(cx.intern("main"));
    main.stage = Some(PipelineStage::Compute);
    main.workgroup_size = Some([8, 1, 1]);
    main.params.push(FuncParam {
        name: cx.intern("id"),
        ty: cx.vector_ty(ScalarType::U32, 3),
        io: IoAttrs::builtin(BuiltinValue::GlobalInvocationId),
        binding: None,
        waivers: Default::default(),
    });
    module.define_func(main)
}

/// ```wgsl
/// @group(0) @binding(0) var<storage, read_write> data: array<f32>;
///
/// @compute @workgroup_size(8, 1, 1)
/// fn main(@builtin(global_invocation_id) id: vec3<u32>) {
///     data[id.x] = 1.0;
/// }
/// ```
pub fn storage_compute() -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let data = storage_array(&mut module, bp(0, 0));
    let main = compute_main(&mut module);

    let body = &mut module.funcs[main].body;
    let id = body.param(0);
    let x = body.expr(ExprKind::Swizzle { base: id, components: [0].into_iter().collect() });
    let data = body.global_ref(data);
    let lhs = body.index(data, x);
    let rhs = body.lit(Literal::F32(1.0));
    body.block.stmts.push(Stmt::Assign { lhs, rhs });
    module
}

/// Like [`storage_compute`] (with `data` at `binding`), but the body being
/// `let n = arrayLength(&data);`, repeated `count` times (as `n`, `n_1`, ...).
pub fn array_length_compute(binding: BindingPoint, count: usize) -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let cx = module.cx();
    let u32_ty = cx.scalar_ty(ScalarType::U32);
    let data = storage_array(&mut module, binding);
    let main = compute_main(&mut module);

    let body = &mut module.funcs[main].body;
    for i in 0..count {
        let data = body.global_ref(data);
        let ptr = body.addr_of(data);
        let len = body.builtin(BuiltinFn::ArrayLength, [ptr]);
        let name = if i == 0 { "n".to_string() } else { format!("n_{i}") };
        let n = body.local(LocalVarDecl::new_let(cx.intern(name), u32_ty, len));
        body.block.stmts.push(Stmt::Decl(n));
    }
    module
}

/// ```wgsl
/// struct S { a: f32, b: vec3<f32> }
/// @group(0) @binding(0) var<ADDR_SPACE> s: S;
///
/// @compute @workgroup_size(8, 1, 1)
/// fn main(@builtin(global_invocation_id) id: vec3<u32>) {
///     let x = s.a;
/// }
/// ```
pub fn f32_vec3_buffer(addr_space: AddrSpace) -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let cx = module.cx();
    let f32_ty = cx.scalar_ty(ScalarType::F32);
    let s = module.define_struct(StructDecl::new(cx.intern("S"), [
        StructMember::new(cx.intern("a"), f32_ty),
        StructMember::new(cx.intern("b"), cx.vector_ty(ScalarType::F32, 3)),
    ]));
    let buffer = module.define_global_var(GlobalVarDecl {
        binding: Some(bp(0, 0)),
        ..GlobalVarDecl::new(cx.intern("s"), cx.struct_ty(s), addr_space)
    });
    let main = compute_main(&mut module);

    let body = &mut module.funcs[main].body;
    let buffer = body.global_ref(buffer);
    let a = body.member(buffer, 0);
    let x = body.local(LocalVarDecl::new_let(cx.intern("x"), f32_ty, a));
    body.block.stmts.push(Stmt::Decl(x));
    module
}

/// ```wgsl
/// @group(0) @binding(0) var<ADDR_SPACE> v: T;
///
/// @compute @workgroup_size(8, 1, 1)
/// fn main(@builtin(global_invocation_id) id: vec3<u32>) {
///     let x = v[id.x];
/// }
/// ```
/// with `T` (an array type) built by `array_ty`.
pub fn indexed_buffer(addr_space: AddrSpace, array_ty: impl FnOnce(&Context) -> Type) -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let cx = module.cx();
    let ty = array_ty(&cx);
    let sluice::TypeKind::Array { elem, .. } = cx[ty] else {
        panic!("`indexed_buffer` needs an array type");
    };
    let v = module.define_global_var(GlobalVarDecl {
        binding: Some(bp(0, 0)),
        ..GlobalVarDecl::new(cx.intern("v"), ty, addr_space)
    });
    let main = compute_main(&mut module);

    let body = &mut module.funcs[main].body;
    let id = body.param(0);
    let i = body.expr(ExprKind::Swizzle { base: id, components: [0].into_iter().collect() });
    let v = body.global_ref(v);
    let elem_value = body.index(v, i);
    let x = body.local(LocalVarDecl::new_let(cx.intern("x"), elem, elem_value));
    body.block.stmts.push(Stmt::Decl(x));
    module
}

/// `@fragment fn main() -> @builtin(frag_depth) f32 { return 0.5; }`
pub fn fragment_depth() -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let cx = module.cx();
    let mut main = FuncDecl::new(cx.intern("main"));
    main.stage = Some(PipelineStage::Fragment);
    main.ret = Some(FuncRet {
        ty: cx.scalar_ty(ScalarType::F32),
        io: IoAttrs::builtin(BuiltinValue::FragDepth),
    });
    let depth = main.body.lit(Literal::F32(0.5));
    main.body.block.stmts.push(Stmt::Return(Some(depth)));
    module.define_func(main);
    module
}

/// Two empty compute entry points, `a` and `b`.
pub fn two_entry_points() -> Module {
    let mut module = Module::new(Rc::new(Context::new()));
    let cx = module.cx();
    for name in ["a", "b"] {
        let mut func = FuncDecl::new(cx.intern(name));
        func.stage = Some(PipelineStage::Compute);
        func.workgroup_size = Some([1, 1, 1]);
        module.define_func(func);
    }
    module
}
