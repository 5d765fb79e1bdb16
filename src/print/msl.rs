//! Metal Shading Language.
//!
//! Module-scope variables have no MSL equivalent, so printing expects them to
//! have been moved into entry point parameters (and entry point IO gathered
//! into `[[stage_in]]` structs) beforehand.

use super::{BufferClass, Dialect, Printer, float_literal, i32_literal};
use crate::layout::{Layout, round_up};
use crate::{
    Access, AddrSpace, BinaryOp, BindingPoint, BuiltinFn, BuiltinValue, Expr, ExprKind, Failure,
    FuncDecl, GlobalVar, InterpolationSampling, InterpolationType, IoAttrs, Literal,
    PipelineStage, ScalarType, Struct, StructMember, Type, TypeKind,
};
use itertools::Itertools as _;
use std::num::NonZeroU32;

pub(super) struct Msl;

fn builtin_attr(builtin: BuiltinValue) -> &'static str {
    match builtin {
        BuiltinValue::Position => "position",
        BuiltinValue::FragDepth => "depth(any)",
        BuiltinValue::VertexIndex => "vertex_id",
        BuiltinValue::InstanceIndex => "instance_id",
        BuiltinValue::FrontFacing => "front_facing",
        BuiltinValue::SampleIndex => "sample_id",
        BuiltinValue::SampleMask => "sample_mask",
        BuiltinValue::LocalInvocationId => "thread_position_in_threadgroup",
        BuiltinValue::LocalInvocationIndex => "thread_index_in_threadgroup",
        BuiltinValue::GlobalInvocationId => "thread_position_in_grid",
        BuiltinValue::WorkgroupId => "threadgroup_position_in_grid",
        BuiltinValue::NumWorkgroups => "threadgroups_per_grid",
    }
}

fn address_space(addr_space: AddrSpace, access: Access) -> Result<&'static str, Failure> {
    Ok(match (addr_space, access) {
        (AddrSpace::Function | AddrSpace::Private, _) => "thread",
        (AddrSpace::Workgroup, _) => "threadgroup",
        (AddrSpace::Storage, Access::Read) => "const device",
        (AddrSpace::Storage, Access::ReadWrite) => "device",
        (AddrSpace::Uniform, _) => "constant",
        _ => {
            return Err(Failure::bug(format!(
                "MSL: no pointers into `{}`",
                addr_space.name()
            )));
        }
    })
}

fn binding_index(binding: Option<BindingPoint>, name: &str) -> Result<u32, Failure> {
    binding
        .map(|binding| binding.binding)
        .ok_or_else(|| Failure::bug(format!("MSL: resource parameter `{name}` has no binding")))
}

impl Msl {
    fn not_hoisted(p: &Printer<'_, Self>, gv: GlobalVar) -> Failure {
        Failure::bug(format!(
            "MSL: module-scope variable `{}` should have been moved into entry point parameters",
            p.name(p.module.global_vars[gv].name)
        ))
    }

    /// ` [[...]]` attributes for IO attributes `io` of a stage-in/out value.
    fn io_attrs(p: &mut Printer<'_, Self>, io: &IoAttrs, role: LocationRole) -> String {
        let mut attrs = vec![];
        if let Some(builtin) = io.builtin {
            attrs.push(builtin_attr(builtin).to_string());
        }
        if let Some(location) = io.location {
            attrs.push(match role {
                LocationRole::VertexInput => format!("attribute({location})"),
                LocationRole::FragmentOutput => format!("color({location})"),
                LocationRole::Interstage => format!("user(locn{location})"),
            });
        }
        if let Some(interpolation) = io.interpolation {
            let perspective = match interpolation.ty {
                InterpolationType::Flat => None,
                InterpolationType::Perspective => Some("perspective"),
                InterpolationType::Linear => Some("no_perspective"),
            };
            let sampling = match interpolation.sampling {
                None | Some(InterpolationSampling::Center) => "center",
                Some(InterpolationSampling::Centroid) => "centroid",
                Some(InterpolationSampling::Sample) => "sample",
            };
            attrs.push(match perspective {
                None => "flat".to_string(),
                Some(perspective) => format!("{sampling}_{perspective}"),
            });
        }
        if io.invariant {
            p.has_invariant_attribute = true;
            attrs.push("invariant".to_string());
        }
        attrs.iter().map(|attr| format!(" [[{attr}]]")).join("")
    }
}

/// What a `location` attribute means, depending on which side of which stage
/// the value is on.
#[derive(Copy, Clone)]
enum LocationRole {
    VertexInput,
    FragmentOutput,
    Interstage,
}

impl Dialect for Msl {
    const NAME: &'static str = "MSL";
    const DISCARD: &'static str = "discard_fragment();";

    fn header(p: &mut Printer<'_, Self>) -> Result<(), Failure> {
        p.line("#include <metal_stdlib>");
        p.blank_line();
        p.line("using namespace metal;");
        p.blank_line();
        Ok(())
    }

    fn scalar(_: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<&'static str, Failure> {
        Ok(match scalar {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "int",
            ScalarType::U32 => "uint",
            ScalarType::F32 => "float",
            ScalarType::F16 => "half",
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
        Ok(format!("{}{columns}x{rows}", Self::scalar(p, elem)?))
    }

    fn array_type(
        _: &mut Printer<'_, Self>,
        _: Type,
        _: NonZeroU32,
    ) -> Result<String, Failure> {
        Err(Failure::err("MSL: array types are only supported in declarations"))
    }

    fn runtime_array_dim(_: &mut Printer<'_, Self>) -> Result<&'static str, Failure> {
        Ok("[1]")
    }

    fn atomic(p: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<String, Failure> {
        Ok(format!("atomic_{}", Self::scalar(p, scalar)?))
    }

    fn ptr_type(
        p: &mut Printer<'_, Self>,
        addr_space: AddrSpace,
        pointee: Type,
        access: Access,
    ) -> Result<String, Failure> {
        let space = address_space(addr_space, access)?;
        Ok(format!("{space} {}*", p.type_name(pointee)?))
    }

    fn handle_type(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Texture2d { sampled } => {
                Ok(format!("texture2d<{}, access::sample>", Self::scalar(p, sampled)?))
            }
            TypeKind::Sampler { .. } => Ok("sampler".to_string()),
            _ => Err(Failure::bug("not a handle type")),
        }
    }

    fn buffer_class(addr_space: AddrSpace) -> Option<BufferClass> {
        match addr_space {
            AddrSpace::Storage | AddrSpace::Workgroup => Some(BufferClass::Storage),
            AddrSpace::Uniform | AddrSpace::PushConstant => Some(BufferClass::Uniform),
            _ => None,
        }
    }

    fn leaf_layout(
        p: &mut Printer<'_, Self>,
        ty: Type,
        _: BufferClass,
    ) -> Result<Layout, Failure> {
        let cx = p.cx;
        let layout = p.layouter.layout_of(ty)?;
        match cx[ty] {
            // NOTE: 3-element vectors are as large as 4-element ones.
            TypeKind::Vector { .. } => {
                Ok(Layout { size: round_up(layout.size, layout.align), align: layout.align })
            }
            _ => Ok(layout),
        }
    }

    /// `packed_T3` for 3-element vector members, which (unlike `T3`) can be
    /// followed by a scalar in their last 4 bytes.
    fn packed_member(
        p: &mut Printer<'_, Self>,
        ty: Type,
        _: BufferClass,
    ) -> Result<Option<(String, Layout)>, Failure> {
        let cx = p.cx;
        let TypeKind::Vector { elem, len: 3 } = cx[ty] else {
            return Ok(None);
        };
        let size = p.layouter.layout_of(ty)?.size;
        let packed = format!("packed_{}3", Self::scalar(p, elem)?);
        Ok(Some((packed, Layout { size, align: size / 3 })))
    }

    fn member_decl(
        p: &mut Printer<'_, Self>,
        s: Struct,
        member: &StructMember,
        decl: String,
    ) -> Result<String, Failure> {
        let role = match p.struct_roles.get(&s) {
            Some(role) if role.vertex_input => LocationRole::VertexInput,
            Some(role) if role.fragment_output => LocationRole::FragmentOutput,
            _ => LocationRole::Interstage,
        };
        Ok(format!("{decl}{}", Self::io_attrs(p, &member.io, role)))
    }

    fn global_var(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<(), Failure> {
        Err(Self::not_hoisted(p, gv))
    }

    fn global_ref(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<String, Failure> {
        Err(Self::not_hoisted(p, gv))
    }

    fn entry_signature(p: &mut Printer<'_, Self>, func: &FuncDecl) -> Result<String, Failure> {
        let cx = p.cx;
        let name = p.name(func.name);
        let stage = func.stage.ok_or_else(|| Failure::bug("not an entry point"))?;

        let (attrs, keyword) = match stage {
            PipelineStage::Vertex => (String::new(), "vertex"),
            PipelineStage::Fragment => (String::new(), "fragment"),
            PipelineStage::Compute => {
                // NOTE: the exact workgroup size is only specified at dispatch.
                let [x, y, z] = func.workgroup_size.unwrap_or([1, 1, 1]);
                let total = x.saturating_mul(y).saturating_mul(z);
                (format!("[[max_total_threads_per_threadgroup({total})]]\n"), "kernel")
            }
        };

        let mut params = vec![];
        let mut threadgroup_sizes = vec![];
        for param in &func.params {
            let param_name = p.name(param.name);
            let param = match cx[param.ty] {
                _ if param.io.builtin.is_some() => {
                    let declared = p.declare(param.ty, param_name)?;
                    format!("{declared}{}", Self::io_attrs(p, &param.io, LocationRole::Interstage))
                }
                _ if !param.io.is_empty() => {
                    return Err(Failure::bug(format!(
                        "MSL: entry point parameter `{param_name}` should be part of `[[stage_in]]`"
                    )));
                }
                TypeKind::Struct(_) => {
                    format!("{} {param_name} [[stage_in]]", p.type_name(param.ty)?)
                }
                TypeKind::Texture2d { .. } => format!(
                    "{} {param_name} [[texture({})]]",
                    Self::handle_type(p, param.ty)?,
                    binding_index(param.binding, param_name)?
                ),
                TypeKind::Sampler { .. } => format!(
                    "sampler {param_name} [[sampler({})]]",
                    binding_index(param.binding, param_name)?
                ),
                TypeKind::Ptr { addr_space: AddrSpace::Workgroup, pointee, access } => {
                    let index = threadgroup_sizes.len();
                    threadgroup_sizes.push(p.buffer_layout(pointee, BufferClass::Storage)?.size);
                    let ptr = Self::ptr_type(p, AddrSpace::Workgroup, pointee, access)?;
                    format!("{ptr} {param_name} [[threadgroup({index})]]")
                }
                TypeKind::Ptr { addr_space, pointee, access } => {
                    let ptr = Self::ptr_type(p, addr_space, pointee, access)?;
                    let index = binding_index(param.binding, param_name)?;
                    format!("{ptr} {param_name} [[buffer({index})]]")
                }
                _ => {
                    return Err(Failure::err(format!(
                        "MSL: entry point parameter `{param_name}` has no IO attributes"
                    )));
                }
            };
            params.push(param);
        }
        if !threadgroup_sizes.is_empty() {
            p.workgroup_allocations.insert(name.to_string(), threadgroup_sizes);
        }

        let ret = match func.ret {
            None => "void".to_string(),
            Some(ret) if ret.io.is_empty() => p.type_name(ret.ty)?,
            Some(_) => {
                return Err(Failure::bug(format!(
                    "MSL: entry point `{name}` should return a struct"
                )));
            }
        };
        Ok(format!("{attrs}{keyword} {ret} {name}({})", params.join(", ")))
    }

    fn literal(_: &mut Printer<'_, Self>, lit: Literal) -> Result<String, Failure> {
        Ok(match lit {
            Literal::Bool(value) => value.to_string(),
            Literal::I32(value) => i32_literal(value),
            Literal::U32(value) => format!("{value}u"),
            Literal::F32(value) => float_literal(value, "f")?,
            Literal::F16(value) => float_literal(value, "h")?,
        })
    }

    fn let_decl(
        p: &mut Printer<'_, Self>,
        ty: Type,
        name: &str,
        init: &str,
    ) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Ptr { .. } => Ok(format!("{} const {name} = {init};", p.type_name(ty)?)),
            _ => Ok(format!("const {} = {init};", p.declare(ty, name)?)),
        }
    }

    fn workgroup_local(p: &mut Printer<'_, Self>, ty: Type, name: &str) -> Result<String, Failure> {
        Ok(format!("threadgroup {};", p.declare(ty, name)?))
    }

    fn zero_value(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Array { .. } => {
                Err(Failure::err("MSL: array values can only be constructed in declarations"))
            }
            _ => Ok(format!("{}{{}}", p.type_name(ty)?)),
        }
    }

    fn zero_init(_: &mut Printer<'_, Self>, _: Type) -> Result<String, Failure> {
        Ok("{}".to_string())
    }

    fn construct(p: &mut Printer<'_, Self>, ty: Type, args: &[Expr]) -> Result<String, Failure> {
        let cx = p.cx;
        match cx[ty] {
            TypeKind::Struct(s) => {
                let args = p.args(args)?;
                let args = p.padded_struct_args(s, args)?;
                Ok(format!("{}{{{}}}", p.type_name(ty)?, args.join(", ")))
            }
            TypeKind::Array { .. } => {
                Err(Failure::err("MSL: array values can only be constructed in declarations"))
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
                let elems = p.padded_struct_args(s, elems)?;
                Ok(format!("{}{{{}}}", p.type_name(ty)?, elems.join(", ")))
            }
            TypeKind::Array { .. } => Ok(format!("{{{}}}", elems.join(", "))),
            _ => Ok(format!("{}({})", p.type_name(ty)?, elems.join(", "))),
        }
    }

    fn initializer(p: &mut Printer<'_, Self>, init: Expr) -> Result<String, Failure> {
        let cx = p.cx;
        let func = p.current_func()?;
        match &func.body.exprs[init] {
            ExprKind::ZeroValue(_) => Ok("{}".to_string()),
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

    fn addr_of(p: &mut Printer<'_, Self>, place: Expr) -> Result<String, Failure> {
        Ok(format!("(&{})", p.expr(place)?))
    }

    fn deref(p: &mut Printer<'_, Self>, ptr: Expr) -> Result<String, Failure> {
        Ok(format!("(*{})", p.expr(ptr)?))
    }

    fn binary(
        p: &mut Printer<'_, Self>,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<String, Failure> {
        if op == BinaryOp::Rem {
            let lhs_ty = p.value_ty(lhs)?;
            if p.module.scalar_of(lhs_ty).is_some_and(ScalarType::is_float) {
                let (lhs, rhs) = (p.expr(lhs)?, p.expr(rhs)?);
                return Ok(format!("fmod({lhs}, {rhs})"));
            }
        }
        p.plain_binary(op, lhs, rhs)
    }

    fn builtin(
        p: &mut Printer<'_, Self>,
        func: BuiltinFn,
        args: &[Expr],
    ) -> Result<String, Failure> {
        match func {
            BuiltinFn::ArrayLength => Err(Failure::err(
                "MSL: `arrayLength` requires `array_length_from_uniform` to be configured",
            )),
            BuiltinFn::TextureSample => {
                let [t, s, coords] = p.fixed_args(func, args)?;
                Ok(format!("{t}.sample({s}, {coords})"))
            }
            BuiltinFn::TextureLoad => {
                let [t, coords, level] = p.fixed_args(func, args)?;
                Ok(format!("{t}.read(uint2({coords}), uint({level}))"))
            }
            BuiltinFn::WorkgroupBarrier => {
                Ok("threadgroup_barrier(mem_flags::mem_threadgroup)".to_string())
            }
            BuiltinFn::StorageBarrier => {
                Ok("threadgroup_barrier(mem_flags::mem_device)".to_string())
            }
            // NOTE: MSL `select(a, b, c)` has the same operand order.
            _ => p.call(func.name(), args),
        }
    }

    fn bitcast(p: &mut Printer<'_, Self>, ty: Type, arg: Expr) -> Result<String, Failure> {
        Ok(format!("as_type<{}>({})", p.type_name(ty)?, p.expr(arg)?))
    }
}
