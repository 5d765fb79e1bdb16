//! HLSL (Shader Model 5.1+, i.e. `register(..., spaceN)` syntax).

use super::{BufferClass, Dialect, HelperKey, Printer, float_literal, i32_literal};
use crate::layout::{Layout, round_up};
use crate::{
    Access, AddrSpace, BinaryOp, BindingPoint, BuiltinFn, BuiltinValue, Expr, ExprKind, Failure,
    FuncDecl, FuncParam, GlobalVar, InterpolationSampling, InterpolationType, IoAttrs, Literal,
    PipelineStage, ScalarType, Struct, StructMember, Type, TypeKind,
};
use std::num::NonZeroU32;

pub(super) struct Hlsl;

fn builtin_semantic(builtin: BuiltinValue) -> Result<&'static str, Failure> {
    Ok(match builtin {
        BuiltinValue::Position => "SV_Position",
        BuiltinValue::FragDepth => "SV_Depth",
        BuiltinValue::VertexIndex => "SV_VertexID",
        BuiltinValue::InstanceIndex => "SV_InstanceID",
        BuiltinValue::FrontFacing => "SV_IsFrontFace",
        BuiltinValue::SampleIndex => "SV_SampleIndex",
        BuiltinValue::SampleMask => "SV_Coverage",
        BuiltinValue::LocalInvocationId => "SV_GroupThreadID",
        BuiltinValue::LocalInvocationIndex => "SV_GroupIndex",
        BuiltinValue::GlobalInvocationId => "SV_DispatchThreadID",
        BuiltinValue::WorkgroupId => "SV_GroupID",
        BuiltinValue::NumWorkgroups => {
            return Err(Failure::err("HLSL: `num_workgroups` has no system value semantic"));
        }
    })
}

/// ` : SEMANTIC` (or nothing), with locations of fragment outputs being
/// render targets, and all others `TEXCOORDn`.
fn semantic(io: &IoAttrs, fragment_output: bool) -> Result<String, Failure> {
    Ok(match (io.builtin, io.location) {
        (Some(builtin), _) => format!(" : {}", builtin_semantic(builtin)?),
        (None, Some(location)) if fragment_output => format!(" : SV_Target{location}"),
        (None, Some(location)) => format!(" : TEXCOORD{location}"),
        (None, None) => String::new(),
    })
}

/// Interpolation/invariance modifiers preceding a declaration.
fn modifiers(p: &mut Printer<'_, Hlsl>, io: &IoAttrs) -> String {
    let mut modifiers = String::new();
    if io.invariant {
        p.has_invariant_attribute = true;
        modifiers += "precise ";
    }
    if let Some(interpolation) = io.interpolation {
        modifiers += match interpolation.ty {
            InterpolationType::Perspective => "",
            InterpolationType::Linear => "noperspective ",
            InterpolationType::Flat => "nointerpolation ",
        };
        modifiers += match interpolation.sampling {
            None | Some(InterpolationSampling::Center) => "",
            Some(InterpolationSampling::Centroid) => "centroid ",
            Some(InterpolationSampling::Sample) => "sample ",
        };
    }
    modifiers
}

/// `row_major ` for matrices (and arrays of them) in memory, as their HLSL
/// rows are WGSL columns.
fn matrix_packing(p: &Printer<'_, Hlsl>, ty: Type) -> &'static str {
    let cx = p.cx;
    let mut ty = ty;
    while let TypeKind::Array { elem, .. } = cx[ty] {
        ty = elem;
    }
    if let TypeKind::Matrix { .. } = cx[ty] { "row_major " } else { "" }
}

fn binding_of(binding: Option<BindingPoint>, name: &str) -> Result<BindingPoint, Failure> {
    binding.ok_or_else(|| Failure::bug(format!("HLSL: resource `{name}` has no binding")))
}

impl Hlsl {
    /// `cbuffer` wrapping one declaration, for uniforms and push constants.
    fn cbuffer(
        p: &mut Printer<'_, Self>,
        name: &str,
        ty: Type,
        binding: BindingPoint,
    ) -> Result<(), Failure> {
        let declared = p.declare(ty, name)?;
        p.line(&format!(
            "cbuffer cbuffer_{name} : register(b{}, space{}) {{",
            binding.binding, binding.group
        ));
        p.indent += 1;
        p.line(&format!("{}{declared};", matrix_packing(p, ty)));
        p.indent -= 1;
        p.line("};");
        Ok(())
    }

    /// `[RW]StructuredBuffer<T>` type for a storage buffer of type `ty`.
    fn structured_buffer(
        p: &mut Printer<'_, Self>,
        name: &str,
        ty: Type,
        access: Access,
    ) -> Result<String, Failure> {
        let module = p.module;
        let cx = p.cx;
        let elem = match cx[ty] {
            TypeKind::Array { elem, len: None } => elem,
            TypeKind::Array { len: Some(_), .. } => {
                return Err(Failure::err(format!(
                    "HLSL: storage buffer `{name}` of fixed-size array type is not supported"
                )));
            }
            TypeKind::Struct(s)
                if module.structs[s].members.iter().any(|m| module.is_runtime_array(m.ty)) =>
            {
                return Err(Failure::err(format!(
                    "HLSL: storage buffer `{name}` with a runtime-sized array member is not \
                     supported"
                )));
            }
            _ => ty,
        };
        let prefix = match access {
            Access::Read => "",
            Access::ReadWrite => "RW",
        };
        Ok(format!("{prefix}StructuredBuffer<{}{}>", matrix_packing(p, elem), p.type_name(elem)?))
    }

    fn array_length(p: &mut Printer<'_, Self>, args: &[Expr]) -> Result<String, Failure> {
        let &[ptr] = args else {
            return Err(Failure::bug("`arrayLength` takes one argument"));
        };
        let gv = p.buffer_of(ptr)?;
        let module = p.module;
        let decl = &module.global_vars[gv];
        let name = p.name(decl.name);
        if !module.is_runtime_array(decl.ty) {
            return Err(Failure::err(format!(
                "HLSL: `arrayLength` of a member of `{name}` requires `array_length_from_uniform`"
            )));
        }
        let buffer = Self::structured_buffer(p, name, decl.ty, decl.access)?;
        let key = HelperKey::ArrayLength { buffer: decl.ty, access: decl.access };
        let helper = p.helper(key, "array_length", |_, helper| {
            Ok(format!(
                "uint {helper}({buffer} buffer) {{\n  uint count;\n  uint stride;\n  \
                 buffer.GetDimensions(count, stride);\n  return count;\n}}\n"
            ))
        })?;
        Ok(format!("{helper}({name})"))
    }

    fn struct_ctor(p: &mut Printer<'_, Self>, s: Struct) -> Result<String, Failure> {
        let module = p.module;
        let decl = &module.structs[s];
        let struct_name = p.name(decl.name);
        p.helper(HelperKey::StructCtor(s), &format!("make_{struct_name}"), |p, helper| {
            let params: Vec<String> = decl
                .members
                .iter()
                .enumerate()
                .map(|(i, m)| p.declare(m.ty, &format!("p{i}")))
                .collect::<Result<_, _>>()?;
            let values = (0..decl.members.len()).map(|i| format!("p{i}")).collect();
            let values = p.padded_struct_args(s, values)?.join(", ");
            Ok(format!(
                "{struct_name} {helper}({}) {{\n  {struct_name} value = {{{values}}};\n  \
                 return value;\n}}\n",
                params.join(", ")
            ))
        })
    }
}

impl Dialect for Hlsl {
    const NAME: &'static str = "HLSL";
    const DISCARD: &'static str = "discard;";

    fn header(_: &mut Printer<'_, Self>) -> Result<(), Failure> {
        Ok(())
    }

    fn scalar(_: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<&'static str, Failure> {
        Ok(match scalar {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "int",
            ScalarType::U32 => "uint",
            ScalarType::F32 => "float",
            ScalarType::F16 => "float16_t",
        })
    }

    fn vector(p: &mut Printer<'_, Self>, elem: ScalarType, len: u8) -> Result<String, Failure> {
        Ok(format!("{}{len}", Self::scalar(p, elem)?))
    }

    fn matrix(
        p: &mut Printer<'_, Self>,
        columns: u8,
        rows: u8,
        elem: ScalarType,
    ) -> Result<String, Failure> {
        // NOTE: column vectors are rows (and `mul` operands swapped, see `binary`).
        Ok(format!("{}{columns}x{rows}", Self::scalar(p, elem)?))
    }

    fn array_type(
        _: &mut Printer<'_, Self>,
        _: Type,
        _: NonZeroU32,
    ) -> Result<String, Failure> {
        Err(Failure::err("HLSL: array types are only supported in declarations"))
    }

    fn runtime_array_dim(_: &mut Printer<'_, Self>) -> Result<&'static str, Failure> {
        Err(Failure::err("HLSL: runtime-sized arrays are only supported as whole storage buffers"))
    }

    fn atomic(p: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<String, Failure> {
        Ok(Self::scalar(p, scalar)?.to_string())
    }

    fn ptr_type(
        _: &mut Printer<'_, Self>,
        _: AddrSpace,
        _: Type,
        _: Access,
    ) -> Result<String, Failure> {
        Err(Failure::err("HLSL: pointer-typed values are not supported"))
    }

    fn handle_type(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Texture2d { sampled } => {
                Ok(format!("Texture2D<{}4>", Self::scalar(p, sampled)?))
            }
            TypeKind::Sampler { comparison: false } => Ok("SamplerState".to_string()),
            TypeKind::Sampler { comparison: true } => Ok("SamplerComparisonState".to_string()),
            _ => Err(Failure::bug("not a handle type")),
        }
    }

    fn buffer_class(addr_space: AddrSpace) -> Option<BufferClass> {
        match addr_space {
            AddrSpace::Storage => Some(BufferClass::Storage),
            AddrSpace::Uniform | AddrSpace::PushConstant => Some(BufferClass::Uniform),
            _ => None,
        }
    }

    /// Structured buffers pack everything tightly (with scalar alignment),
    /// while constant buffers start arrays, structs and matrix rows on a new
    /// 16-byte register (see also `place`).
    fn leaf_layout(
        p: &mut Printer<'_, Self>,
        ty: Type,
        class: BufferClass,
    ) -> Result<Layout, Failure> {
        let cx = p.cx;
        let layout = p.layouter.layout_of(ty)?;
        match cx[ty] {
            TypeKind::Matrix { columns, rows, elem } => {
                let column = p.layouter.layout_of(cx.vector_ty(elem, rows))?;
                let expected = round_up(column.size, column.align);
                let (stride, align) = match class {
                    BufferClass::Storage => (column.size, column.size / u32::from(rows)),
                    BufferClass::Uniform => (16, 16),
                };
                if stride != expected {
                    return Err(Failure::err(format!(
                        "HLSL: `{}` columns are {stride} bytes apart in {} buffers, instead of \
                         {expected}",
                        p.module.type_name(ty),
                        match class {
                            BufferClass::Storage => "structured",
                            BufferClass::Uniform => "constant",
                        }
                    )));
                }
                Ok(Layout { size: (u32::from(columns) - 1) * stride + column.size, align })
            }
            TypeKind::Vector { len, .. } => {
                Ok(Layout { size: layout.size, align: layout.size / u32::from(len) })
            }
            _ => Ok(layout),
        }
    }

    fn place(class: BufferClass, end: u32, layout: Layout) -> u32 {
        let offset = round_up(end, layout.align);
        match class {
            BufferClass::Uniform if offset % 16 + layout.size > 16 => round_up(offset, 16),
            _ => offset,
        }
    }

    fn aggregate_align(class: BufferClass, align: u32) -> u32 {
        match class {
            BufferClass::Storage => align,
            BufferClass::Uniform => align.max(16),
        }
    }

    fn array_size(class: BufferClass, count: u32, stride: u32, elem_size: u32) -> u32 {
        match class {
            BufferClass::Storage => count * stride,
            // NOTE: the last element isn't padded up to the stride.
            BufferClass::Uniform => (count - 1) * stride + elem_size,
        }
    }

    fn struct_size(class: BufferClass, end: u32, align: u32) -> u32 {
        match class {
            BufferClass::Storage => round_up(end, align),
            BufferClass::Uniform => end,
        }
    }

    fn ptr_param(
        p: &mut Printer<'_, Self>,
        param: &FuncParam,
        addr_space: AddrSpace,
        pointee: Type,
        _: Access,
    ) -> Result<String, Failure> {
        match addr_space {
            AddrSpace::Function | AddrSpace::Private => {
                Ok(format!("inout {}", p.declare(pointee, p.name(param.name))?))
            }
            _ => Err(Failure::err(format!(
                "HLSL: pointer parameters into `{}` are not supported",
                addr_space.name()
            ))),
        }
    }

    fn member_decl(
        p: &mut Printer<'_, Self>,
        s: Struct,
        member: &StructMember,
        decl: String,
    ) -> Result<String, Failure> {
        let fragment_output = p.struct_roles.get(&s).is_some_and(|role| role.fragment_output);
        let mut modifiers = modifiers(p, &member.io);
        if p.buffer_structs.contains_key(&s) {
            modifiers += matrix_packing(p, member.ty);
        }
        Ok(format!("{modifiers}{decl}{}", semantic(&member.io, fragment_output)?))
    }

    fn global_var(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<(), Failure> {
        let module = p.module;
        let cx = p.cx;
        let decl = &module.global_vars[gv];
        let name = p.name(decl.name);
        match decl.addr_space {
            AddrSpace::Uniform => Self::cbuffer(p, name, decl.ty, binding_of(decl.binding, name)?)?,
            AddrSpace::PushConstant => {
                let binding = p.options.push_constant_binding.ok_or_else(|| {
                    Failure::err(format!(
                        "HLSL: push constant `{name}` needs a `push_constant_binding`"
                    ))
                })?;
                Self::cbuffer(p, name, decl.ty, binding)?;
            }
            AddrSpace::Storage => {
                let binding = binding_of(decl.binding, name)?;
                let buffer = Self::structured_buffer(p, name, decl.ty, decl.access)?;
                let register = match decl.access {
                    Access::Read => 't',
                    Access::ReadWrite => 'u',
                };
                p.line(&format!(
                    "{buffer} {name} : register({register}{}, space{});",
                    binding.binding, binding.group
                ));
            }
            AddrSpace::Handle => {
                let binding = binding_of(decl.binding, name)?;
                let register = match cx[decl.ty] {
                    TypeKind::Sampler { .. } => 's',
                    _ => 't',
                };
                let ty = Self::handle_type(p, decl.ty)?;
                p.line(&format!(
                    "{ty} {name} : register({register}{}, space{});",
                    binding.binding, binding.group
                ));
            }
            AddrSpace::Private => {
                let declared = p.declare(decl.ty, name)?;
                match &decl.initializer {
                    Some(init) => {
                        let init = p.const_value(init)?;
                        p.line(&format!("static {declared} = {init};"));
                    }
                    None => p.line(&format!("static {declared};")),
                }
            }
            AddrSpace::Workgroup => {
                let declared = p.declare(decl.ty, name)?;
                p.line(&format!("groupshared {declared};"));
            }
            addr_space => {
                return Err(Failure::bug(format!(
                    "HLSL: no strategy for `{}` module-scope variable `{name}`",
                    addr_space.name()
                )));
            }
        }
        p.blank_line();
        Ok(())
    }

    fn global_ref(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<String, Failure> {
        let module = p.module;
        let decl = &module.global_vars[gv];
        let name = p.name(decl.name);
        // Non-array storage buffers are single-element structured buffers.
        if decl.addr_space == AddrSpace::Storage && !module.is_runtime_array(decl.ty) {
            Ok(format!("{name}[0]"))
        } else {
            Ok(name.to_string())
        }
    }

    fn entry_signature(p: &mut Printer<'_, Self>, func: &FuncDecl) -> Result<String, Failure> {
        let cx = p.cx;
        let name = p.name(func.name);
        let stage = func.stage.ok_or_else(|| Failure::bug("not an entry point"))?;

        let mut attrs = String::new();
        if stage == PipelineStage::Compute {
            let [x, y, z] = func.workgroup_size.unwrap_or([1, 1, 1]);
            attrs = format!("[numthreads({x}, {y}, {z})]\n");
        }

        let mut params = vec![];
        for param in &func.params {
            let param_name = p.name(param.name);
            let declared = p.declare(param.ty, param_name)?;
            if param.io.is_empty() {
                if !matches!(cx[param.ty], TypeKind::Struct(_)) {
                    return Err(Failure::err(format!(
                        "HLSL: entry point parameter `{param_name}` has no IO attributes"
                    )));
                }
                params.push(declared);
            } else {
                let modifiers = modifiers(p, &param.io);
                params.push(format!("{modifiers}{declared}{}", semantic(&param.io, false)?));
            }
        }

        let (ret, ret_semantic) = match func.ret {
            None => ("void".to_string(), String::new()),
            Some(ret) => {
                (p.type_name(ret.ty)?, semantic(&ret.io, stage == PipelineStage::Fragment)?)
            }
        };
        Ok(format!("{attrs}{ret} {name}({}){ret_semantic}", params.join(", ")))
    }

    fn literal(_: &mut Printer<'_, Self>, lit: Literal) -> Result<String, Failure> {
        Ok(match lit {
            Literal::Bool(value) => value.to_string(),
            Literal::I32(value) => i32_literal(value),
            Literal::U32(value) => format!("{value}u"),
            Literal::F32(value) => float_literal(value, "f")?,
            Literal::F16(value) => format!("float16_t({})", float_literal(value, "")?),
        })
    }

    fn let_decl(
        p: &mut Printer<'_, Self>,
        ty: Type,
        name: &str,
        init: &str,
    ) -> Result<String, Failure> {
        let cx = p.cx;
        if let TypeKind::Ptr { .. } = cx[ty] {
            return Err(Failure::err(format!("HLSL: pointer-typed `let {name}` is not supported")));
        }
        Ok(format!("const {} = {init};", p.declare(ty, name)?))
    }

    fn workgroup_local(_: &mut Printer<'_, Self>, _: Type, name: &str) -> Result<String, Failure> {
        Err(Failure::bug(format!("HLSL: function-scope `var<workgroup> {name}`")))
    }

    fn zero_value(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        Ok(format!("({})0", p.declare(ty, "")?))
    }

    fn construct(p: &mut Printer<'_, Self>, ty: Type, args: &[Expr]) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Struct(s) => {
                let ctor = Self::struct_ctor(p, s)?;
                p.call(&ctor, args)
            }
            TypeKind::Array { .. } => {
                Err(Failure::err("HLSL: array values can only be constructed in declarations"))
            }
            TypeKind::Vector { .. }
                if args.len() == 1 && matches!(cx[p.value_ty(args[0])?], TypeKind::Scalar(_)) =>
            {
                // Splat.
                Ok(format!("(({}){})", p.type_name(ty)?, p.expr(args[0])?))
            }
            _ => {
                let ty = p.type_name(ty)?;
                p.call(&ty, args)
            }
        }
    }

    fn const_composite(
        p: &mut Printer<'_, Self>,
        ty: Type,
        elems: Vec<String>,
    ) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Struct(s) => {
                Ok(format!("{{{}}}", p.padded_struct_args(s, elems)?.join(", ")))
            }
            TypeKind::Array { .. } => Ok(format!("{{{}}}", elems.join(", "))),
            _ => Ok(format!("{}({})", p.type_name(ty)?, elems.join(", "))),
        }
    }

    fn initializer(p: &mut Printer<'_, Self>, init: Expr) -> Result<String, Failure> {
        let cx = p.cx;
        let func = p.current_func()?;
        match &func.body.exprs[init] {
            ExprKind::Construct { ty, args } if matches!(cx[*ty], TypeKind::Array { .. }) => {
                let elems: Vec<String> = args
                    .iter()
                    .map(|&arg| Self::initializer(p, arg))
                    .collect::<Result<_, _>>()?;
                Ok(format!("{{{}}}", elems.join(", ")))
            }
            _ => p.expr(init),
        }
    }

    fn binary(
        p: &mut Printer<'_, Self>,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<String, Failure> {
        if op == BinaryOp::Mul {
            let cx = p.cx;
            let (lhs_ty, rhs_ty) = (p.value_ty(lhs)?, p.value_ty(rhs)?);
            let is_matrix = |ty: Type| matches!(cx[ty], TypeKind::Matrix { .. });
            let is_scalar = |ty: Type| matches!(cx[ty], TypeKind::Scalar(_));
            let no_scalar = !is_scalar(lhs_ty) && !is_scalar(rhs_ty);
            if (is_matrix(lhs_ty) || is_matrix(rhs_ty)) && no_scalar {
                let (lhs, rhs) = (p.expr(lhs)?, p.expr(rhs)?);
                return Ok(format!("mul({rhs}, {lhs})"));
            }
        }
        p.plain_binary(op, lhs, rhs)
    }

    fn builtin(
        p: &mut Printer<'_, Self>,
        func: BuiltinFn,
        args: &[Expr],
    ) -> Result<String, Failure> {
        let name = match func {
            BuiltinFn::Fma => "mad",
            BuiltinFn::Fract => "frac",
            BuiltinFn::Mix => "lerp",
            BuiltinFn::Select => {
                let [f, t, cond] = p.fixed_args(func, args)?;
                return Ok(format!("({cond} ? {t} : {f})"));
            }
            BuiltinFn::ArrayLength => return Self::array_length(p, args),
            BuiltinFn::TextureSample => {
                let [t, s, coords] = p.fixed_args(func, args)?;
                return Ok(format!("{t}.Sample({s}, {coords})"));
            }
            BuiltinFn::TextureLoad => {
                let [t, coords, level] = p.fixed_args(func, args)?;
                return Ok(format!("{t}.Load(int3(int2({coords}), int({level})))"));
            }
            BuiltinFn::WorkgroupBarrier => "GroupMemoryBarrierWithGroupSync",
            BuiltinFn::StorageBarrier => "DeviceMemoryBarrierWithGroupSync",
            _ => func.name(),
        };
        p.call(name, args)
    }

    fn bitcast(p: &mut Printer<'_, Self>, ty: Type, arg: Expr) -> Result<String, Failure> {
        let from = p.value_ty(arg)?;
        let intrinsic = match p.module.scalar_of(ty) {
            Some(ScalarType::U32) => "asuint",
            Some(ScalarType::I32) => "asint",
            Some(ScalarType::F32) => "asfloat",
            _ => {
                return Err(Failure::err(format!(
                    "HLSL: bitcast to `{}` is not supported",
                    p.module.type_name(ty)
                )));
            }
        };
        let (from_name, to_name) = (p.type_name(from)?, p.type_name(ty)?);
        let key = HelperKey::Bitcast { from, to: ty };
        let helper = p.helper(key, &format!("bitcast_{from_name}_to_{to_name}"), |_, helper| {
            Ok(format!(
                "{to_name} {helper}({from_name} value) {{\n  return {intrinsic}(value);\n}}\n"
            ))
        })?;
        Ok(format!("{helper}({})", p.expr(arg)?))
    }
}
