//! GLSL (ES by default), for modules with a single entry point, which always
//! becomes `void main()`.
//!
//! Entry point IO is expected as `in`/`out` module-scope variables, with
//! builtins mapped onto `gl_*` variables instead of being declared.

use super::{BufferClass, Dialect, HelperKey, Printer, float_literal, i32_literal};
use crate::layout::{Layout, round_up};
use crate::{
    Access, AddrSpace, BinaryOp, BuiltinFn, BuiltinValue, Expr, Failure, FuncDecl, FuncParam,
    GlobalVar, GlobalVarDecl, InterpolationSampling, InterpolationType, Literal, PipelineStage,
    ScalarType, Struct, StructMember, Type, TypeKind,
};
use itertools::Itertools as _;
use std::num::NonZeroU32;

pub(super) struct Glsl;

/// The `gl_*` expression standing for `builtin` (read from `In`, or written
/// to through `Out`).
fn builtin_var(builtin: BuiltinValue, addr_space: AddrSpace) -> Result<&'static str, Failure> {
    Ok(match (builtin, addr_space) {
        (BuiltinValue::Position, AddrSpace::In) => "gl_FragCoord",
        (BuiltinValue::Position, _) => "gl_Position",
        (BuiltinValue::FragDepth, _) => "gl_FragDepth",
        (BuiltinValue::VertexIndex, _) => "uint(gl_VertexID)",
        (BuiltinValue::InstanceIndex, _) => "uint(gl_InstanceID)",
        (BuiltinValue::FrontFacing, _) => "gl_FrontFacing",
        (BuiltinValue::SampleIndex, _) => "uint(gl_SampleID)",
        (BuiltinValue::SampleMask, AddrSpace::In) => "uint(gl_SampleMaskIn[0])",
        (BuiltinValue::SampleMask, _) => {
            return Err(Failure::err("GLSL: writing `sample_mask` is not supported"));
        }
        (BuiltinValue::LocalInvocationId, _) => "gl_LocalInvocationID",
        (BuiltinValue::LocalInvocationIndex, _) => "gl_LocalInvocationIndex",
        (BuiltinValue::GlobalInvocationId, _) => "gl_GlobalInvocationID",
        (BuiltinValue::WorkgroupId, _) => "gl_WorkGroupID",
        (BuiltinValue::NumWorkgroups, _) => "gl_NumWorkGroups",
    })
}

impl Glsl {
    fn stage(p: &Printer<'_, Self>) -> Option<PipelineStage> {
        p.module.entry_points().next().and_then(|func| p.module.funcs[func].stage)
    }

    /// `layout(...) uniform/buffer` interface block for `decl`, with struct
    /// types flattened into the block itself (see `global_ref`).
    fn interface_block(
        p: &mut Printer<'_, Self>,
        decl: &GlobalVarDecl,
        binding: u32,
    ) -> Result<(), Failure> {
        let cx = p.cx;
        let name = p.name(decl.name);
        let (layout, keyword) = match (decl.addr_space, decl.access) {
            (AddrSpace::Storage, Access::Read) => ("std430", "readonly buffer"),
            (AddrSpace::Storage, Access::ReadWrite) => ("std430", "buffer"),
            _ => ("std140", "uniform"),
        };
        let members = match cx[decl.ty] {
            TypeKind::Struct(s) => p.struct_members(s)?,
            _ => vec![format!("{};", p.declare(decl.ty, "inner")?)],
        };
        p.line(&format!("layout(binding = {binding}, {layout}) {keyword} {name}_block {{"));
        p.indent += 1;
        for member in members {
            p.line(&member);
        }
        p.indent -= 1;
        p.line(&format!("}} {name};"));
        Ok(())
    }

    fn io_var(p: &mut Printer<'_, Self>, decl: &GlobalVarDecl) -> Result<(), Failure> {
        let name = p.name(decl.name);
        if let Some(builtin) = decl.io.builtin {
            if decl.io.invariant {
                p.has_invariant_attribute = true;
                p.line(&format!("invariant {};", builtin_var(builtin, decl.addr_space)?));
            }
            return Ok(());
        }
        let location = decl.io.location.ok_or_else(|| {
            Failure::bug(format!("GLSL: IO variable `{name}` has no location"))
        })?;

        // Interpolation only applies between the vertex and fragment stages.
        let interstage = matches!(
            (decl.addr_space, Self::stage(p)),
            (AddrSpace::Out, Some(PipelineStage::Vertex))
                | (AddrSpace::In, Some(PipelineStage::Fragment))
        );
        let mut qualifiers = String::new();
        if interstage {
            let integer = p.module.scalar_of(decl.ty).is_some_and(ScalarType::is_integer);
            let flat = integer
                || decl.io.interpolation.is_some_and(|i| i.ty == InterpolationType::Flat);
            if flat {
                qualifiers += "flat ";
            } else if let Some(interpolation) = decl.io.interpolation {
                qualifiers += match interpolation.sampling {
                    None | Some(InterpolationSampling::Center) => "",
                    Some(InterpolationSampling::Centroid) => "centroid ",
                    Some(InterpolationSampling::Sample) => "sample ",
                };
            }
        }
        if decl.io.invariant {
            p.has_invariant_attribute = true;
            qualifiers.insert_str(0, "invariant ");
        }
        let direction = if decl.addr_space == AddrSpace::In { "in" } else { "out" };
        let declared = p.declare(decl.ty, name)?;
        p.line(&format!("layout(location = {location}) {qualifiers}{direction} {declared};"));
        Ok(())
    }

    fn zero_scalar(scalar: ScalarType) -> Result<&'static str, Failure> {
        match scalar {
            ScalarType::Bool => Ok("false"),
            ScalarType::I32 => Ok("0"),
            ScalarType::U32 => Ok("0u"),
            ScalarType::F32 => Ok("0.0f"),
            ScalarType::F16 => Err(Failure::err("GLSL: `f16` is not supported")),
        }
    }
}

impl Dialect for Glsl {
    const NAME: &'static str = "GLSL";
    const DISCARD: &'static str = "discard;";

    fn header(p: &mut Printer<'_, Self>) -> Result<(), Failure> {
        let version = p.options.glsl_version;
        let profile = if version.es { " es" } else { "" };
        p.line(&format!("#version {}{}0{profile}", version.major, version.minor));
        if version.es {
            p.blank_line();
            p.line("precision highp float;");
            p.line("precision highp int;");
        }
        p.blank_line();
        Ok(())
    }

    fn scalar(_: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<&'static str, Failure> {
        Ok(match scalar {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "int",
            ScalarType::U32 => "uint",
            ScalarType::F32 => "float",
            ScalarType::F16 => return Err(Failure::err("GLSL: `f16` is not supported")),
        })
    }

    fn vector(_: &mut Printer<'_, Self>, elem: ScalarType, len: u8) -> Result<String, Failure> {
        let prefix = match elem {
            ScalarType::Bool => "b",
            ScalarType::I32 => "i",
            ScalarType::U32 => "u",
            ScalarType::F32 => "",
            ScalarType::F16 => return Err(Failure::err("GLSL: `f16` is not supported")),
        };
        Ok(format!("{prefix}vec{len}"))
    }

    fn matrix(
        _: &mut Printer<'_, Self>,
        columns: u8,
        rows: u8,
        elem: ScalarType,
    ) -> Result<String, Failure> {
        if elem != ScalarType::F32 {
            return Err(Failure::err(format!("GLSL: `{}` matrices are not supported", elem.name())));
        }
        Ok(if columns == rows { format!("mat{columns}") } else { format!("mat{columns}x{rows}") })
    }

    fn array_type(
        p: &mut Printer<'_, Self>,
        elem: Type,
        len: NonZeroU32,
    ) -> Result<String, Failure> {
        Ok(format!("{}[{len}]", p.type_name(elem)?))
    }

    fn runtime_array_dim(_: &mut Printer<'_, Self>) -> Result<&'static str, Failure> {
        Ok("[]")
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
        Err(Failure::err("GLSL: pointer-typed values are not supported"))
    }

    fn handle_type(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Texture2d { sampled } => {
                let prefix = match sampled {
                    ScalarType::I32 => "i",
                    ScalarType::U32 => "u",
                    _ => "",
                };
                Ok(format!("highp {prefix}sampler2D"))
            }
            TypeKind::Sampler { .. } => {
                Err(Failure::err("GLSL: samplers can only be used with `textureSample`"))
            }
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

    /// `std430` matches WGSL, `std140` rounds matrix columns up to 16 bytes.
    fn leaf_layout(
        p: &mut Printer<'_, Self>,
        ty: Type,
        class: BufferClass,
    ) -> Result<Layout, Failure> {
        let cx = p.cx;
        let layout = p.layouter.layout_of(ty)?;
        if let (TypeKind::Matrix { rows, elem, .. }, BufferClass::Uniform) = (&cx[ty], class) {
            let column = p.layouter.layout_of(cx.vector_ty(*elem, *rows))?;
            let stride = round_up(column.size, column.align);
            if stride != 16 {
                return Err(Failure::err(format!(
                    "GLSL: `{}` columns are {stride} bytes apart, but 16 in `std140` blocks",
                    p.module.type_name(ty)
                )));
            }
        }
        Ok(layout)
    }

    fn aggregate_align(class: BufferClass, align: u32) -> u32 {
        match class {
            BufferClass::Storage => align,
            BufferClass::Uniform => round_up(align, 16),
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
                "GLSL: pointer parameters into `{}` are not supported",
                addr_space.name()
            ))),
        }
    }

    fn member_decl(
        _: &mut Printer<'_, Self>,
        _: Struct,
        _: &StructMember,
        decl: String,
    ) -> Result<String, Failure> {
        Ok(decl)
    }

    fn global_var(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<(), Failure> {
        let module = p.module;
        let cx = p.cx;
        let decl = &module.global_vars[gv];
        let name = p.name(decl.name);
        let binding = || {
            decl.binding
                .map(|binding| binding.binding)
                .ok_or_else(|| Failure::bug(format!("GLSL: resource `{name}` has no binding")))
        };
        match decl.addr_space {
            AddrSpace::Uniform | AddrSpace::Storage => Self::interface_block(p, decl, binding()?)?,
            AddrSpace::PushConstant => {
                let binding = p.options.push_constant_binding.ok_or_else(|| {
                    Failure::err(format!(
                        "GLSL: push constant `{name}` needs a `push_constant_binding`"
                    ))
                })?;
                Self::interface_block(p, decl, binding.binding)?;
            }
            AddrSpace::Handle => match cx[decl.ty] {
                // NOTE: textures are sampled without their sampler.
                TypeKind::Sampler { .. } => return Ok(()),
                _ => {
                    let ty = Self::handle_type(p, decl.ty)?;
                    p.line(&format!("layout(binding = {}) uniform {ty} {name};", binding()?));
                }
            },
            AddrSpace::Private => {
                let declared = p.declare(decl.ty, name)?;
                let init = match &decl.initializer {
                    Some(init) => p.const_value(init)?,
                    None => Self::zero_value(p, decl.ty)?,
                };
                p.line(&format!("{declared} = {init};"));
            }
            AddrSpace::Workgroup => {
                let declared = p.declare(decl.ty, name)?;
                p.line(&format!("shared {declared};"));
            }
            AddrSpace::In | AddrSpace::Out => {
                Self::io_var(p, decl)?;
                if decl.io.builtin.is_some() && !decl.io.invariant {
                    return Ok(());
                }
            }
            addr_space => {
                return Err(Failure::bug(format!(
                    "GLSL: no strategy for `{}` module-scope variable `{name}`",
                    addr_space.name()
                )));
            }
        }
        p.blank_line();
        Ok(())
    }

    fn global_ref(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<String, Failure> {
        let module = p.module;
        let cx = p.cx;
        let decl = &module.global_vars[gv];
        let name = p.name(decl.name);
        match decl.addr_space {
            AddrSpace::Uniform | AddrSpace::Storage | AddrSpace::PushConstant => match cx[decl.ty] {
                TypeKind::Struct(_) => Ok(name.to_string()),
                _ => Ok(format!("{name}.inner")),
            },
            AddrSpace::In | AddrSpace::Out => match decl.io.builtin {
                Some(builtin) => Ok(builtin_var(builtin, decl.addr_space)?.to_string()),
                None => Ok(name.to_string()),
            },
            _ => Ok(name.to_string()),
        }
    }

    fn entry_signature(p: &mut Printer<'_, Self>, func: &FuncDecl) -> Result<String, Failure> {
        if !func.params.is_empty() || func.ret.is_some() {
            return Err(Failure::bug(format!(
                "GLSL: entry point `{}` IO should have been moved to module scope",
                p.name(func.name)
            )));
        }
        if func.stage == Some(PipelineStage::Compute) {
            let [x, y, z] = func.workgroup_size.unwrap_or([1, 1, 1]);
            return Ok(format!(
                "layout(local_size_x = {x}, local_size_y = {y}, local_size_z = {z}) in;\n\
                 void main()"
            ));
        }
        Ok("void main()".to_string())
    }

    fn literal(_: &mut Printer<'_, Self>, lit: Literal) -> Result<String, Failure> {
        Ok(match lit {
            Literal::Bool(value) => value.to_string(),
            Literal::I32(value) => i32_literal(value),
            Literal::U32(value) => format!("{value}u"),
            Literal::F32(value) => float_literal(value, "f")?,
            Literal::F16(_) => return Err(Failure::err("GLSL: `f16` is not supported")),
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
            return Err(Failure::err(format!("GLSL: pointer-typed `let {name}` is not supported")));
        }
        Ok(format!("{} = {init};", p.declare(ty, name)?))
    }

    fn workgroup_local(_: &mut Printer<'_, Self>, _: Type, name: &str) -> Result<String, Failure> {
        Err(Failure::bug(format!("GLSL: function-scope `var<workgroup> {name}`")))
    }

    fn zero_value(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        let module = p.module;
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Scalar(scalar) | TypeKind::Atomic(scalar) => {
                Ok(Self::zero_scalar(scalar)?.to_string())
            }
            TypeKind::Vector { elem, .. } | TypeKind::Matrix { elem, .. } => {
                Ok(format!("{}({})", p.type_name(ty)?, Self::zero_scalar(elem)?))
            }
            TypeKind::Array { elem, len: Some(len) } => {
                let elem = Self::zero_value(p, elem)?;
                let elems = itertools::repeat_n(elem, len.get() as usize).join(", ");
                Ok(format!("{}({elems})", p.type_name(ty)?))
            }
            TypeKind::Struct(s) => {
                let members: Vec<String> = module.structs[s]
                    .members
                    .iter()
                    .map(|member| Self::zero_value(p, member.ty))
                    .collect::<Result<_, _>>()?;
                let members = p.padded_struct_args(s, members)?;
                Ok(format!("{}({})", p.type_name(ty)?, members.join(", ")))
            }
            _ => Err(Failure::err(format!(
                "GLSL: no zero value for `{}`",
                module.type_name(ty)
            ))),
        }
    }

    fn construct(p: &mut Printer<'_, Self>, ty: Type, args: &[Expr]) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Struct(_) => {
                let args = p.args(args)?;
                Self::const_composite(p, ty, args)
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
        let elems = match cx[ty] {
            TypeKind::Struct(s) => p.padded_struct_args(s, elems)?,
            _ => elems,
        };
        Ok(format!("{}({})", p.type_name(ty)?, elems.join(", ")))
    }

    fn not(p: &mut Printer<'_, Self>, arg: Expr) -> Result<String, Failure> {
        let cx = p.cx;
        let ty = p.value_ty(arg)?;
        let arg = p.expr(arg)?;
        match cx[ty] {
            TypeKind::Vector { .. } => Ok(format!("not({arg})")),
            _ => Ok(format!("!({arg})")),
        }
    }

    fn binary(
        p: &mut Printer<'_, Self>,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<String, Failure> {
        let cx = p.cx;
        let lhs_ty = p.value_ty(lhs)?;
        if op.is_comparison() && matches!(cx[lhs_ty], TypeKind::Vector { .. }) {
            let func = match op {
                BinaryOp::Eq => "equal",
                BinaryOp::Ne => "notEqual",
                BinaryOp::Lt => "lessThan",
                BinaryOp::Le => "lessThanEqual",
                BinaryOp::Gt => "greaterThan",
                _ => "greaterThanEqual",
            };
            let (lhs, rhs) = (p.expr(lhs)?, p.expr(rhs)?);
            return Ok(format!("{func}({lhs}, {rhs})"));
        }
        if op == BinaryOp::Rem && p.module.scalar_of(lhs_ty).is_some_and(ScalarType::is_float) {
            // Truncating, unlike GLSL's `mod`.
            let (lhs, rhs) = (p.expr(lhs)?, p.expr(rhs)?);
            return Ok(format!("({lhs} - {rhs} * trunc({lhs} / {rhs}))"));
        }
        p.plain_binary(op, lhs, rhs)
    }

    fn builtin(
        p: &mut Printer<'_, Self>,
        func: BuiltinFn,
        args: &[Expr],
    ) -> Result<String, Failure> {
        match func {
            BuiltinFn::Fma => {
                let [a, b, c] = p.fixed_args(func, args)?;
                Ok(format!("({a} * {b} + {c})"))
            }
            BuiltinFn::Select => {
                let cx = p.cx;
                let cond_ty = match args {
                    [_, _, cond] => p.value_ty(*cond)?,
                    _ => return Err(Failure::bug("`select` takes 3 arguments")),
                };
                let [f, t, cond] = p.fixed_args(func, args)?;
                match cx[cond_ty] {
                    TypeKind::Vector { .. } => Ok(format!("mix({f}, {t}, {cond})")),
                    _ => Ok(format!("({cond} ? {t} : {f})")),
                }
            }
            BuiltinFn::ArrayLength => {
                // NOTE: `&` is transparent, this prints the array itself.
                let [array] = p.fixed_args(func, args)?;
                Ok(format!("uint({array}.length())"))
            }
            BuiltinFn::TextureSample => {
                let [t, _sampler, coords] = p.fixed_args(func, args)?;
                Ok(format!("texture({t}, {coords})"))
            }
            BuiltinFn::TextureLoad => {
                let [t, coords, level] = p.fixed_args(func, args)?;
                Ok(format!("texelFetch({t}, ivec2({coords}), int({level}))"))
            }
            BuiltinFn::WorkgroupBarrier => Ok("barrier()".to_string()),
            BuiltinFn::StorageBarrier => Ok("memoryBarrierBuffer()".to_string()),
            _ => p.call(func.name(), args),
        }
    }

    fn bitcast(p: &mut Printer<'_, Self>, ty: Type, arg: Expr) -> Result<String, Failure> {
        let from = p.value_ty(arg)?;
        let (from_name, to_name) = (p.type_name(from)?, p.type_name(ty)?);
        let conversion = match (p.module.scalar_of(from), p.module.scalar_of(ty)) {
            (Some(from), Some(to)) if from == to => String::new(),
            (Some(ScalarType::F32), Some(ScalarType::U32)) => "floatBitsToUint".to_string(),
            (Some(ScalarType::F32), Some(ScalarType::I32)) => "floatBitsToInt".to_string(),
            (Some(ScalarType::U32), Some(ScalarType::F32)) => "uintBitsToFloat".to_string(),
            (Some(ScalarType::I32), Some(ScalarType::F32)) => "intBitsToFloat".to_string(),
            (Some(ScalarType::I32 | ScalarType::U32), Some(ScalarType::I32 | ScalarType::U32)) => {
                to_name.clone()
            }
            _ => {
                return Err(Failure::err(format!(
                    "GLSL: bitcast from `{}` to `{}` is not supported",
                    p.module.type_name(from),
                    p.module.type_name(ty)
                )));
            }
        };
        let key = HelperKey::Bitcast { from, to: ty };
        let helper = p.helper(key, &format!("bitcast_{from_name}_to_{to_name}"), |_, helper| {
            Ok(format!(
                "{to_name} {helper}({from_name} value) {{\n  return {conversion}(value);\n}}\n"
            ))
        })?;
        Ok(format!("{helper}({})", p.expr(arg)?))
    }
}
