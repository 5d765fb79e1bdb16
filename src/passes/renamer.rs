//! Renaming of identifiers which are reserved (keywords, builtin functions and
//! types, or reserved prefixes) in the target language.

use super::pass::{Pass, PassOutputs};
use crate::transform::Transformed;
use crate::{Failure, Item, Module, resolve};
use rustc_hash::FxHashSet;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Target {
    Hlsl,
    Msl,
    Glsl,
}

pub struct Renamer {
    target: Target,
}

const HLSL_RESERVED: &[&str] = &[
    "AppendStructuredBuffer", "BlendState", "Buffer", "ByteAddressBuffer",
    "ConsumeStructuredBuffer", "InputPatch", "OutputPatch", "RWBuffer", "RWByteAddressBuffer",
    "RWStructuredBuffer",
    "RWTexture2D", "SamplerComparisonState", "SamplerState", "StructuredBuffer", "Texture2D",
    "abs", "asfloat", "asint", "asm", "asuint", "bool", "bool2", "bool3", "bool4", "break",
    "buffer", "case", "cbuffer", "centroid", "ceil", "clamp", "class", "column_major", "compile",
    "const", "continue", "cos", "cross", "default", "discard", "do", "dot", "double", "else",
    "exp", "export", "extern", "false", "float", "float2", "float2x2", "float2x3", "float2x4",
    "float3", "float3x2", "float3x3", "float3x4", "float4", "float4x2", "float4x3", "float4x4",
    "floor", "for", "frac", "groupshared", "half", "if", "in", "inline", "inout", "int", "int2",
    "int3", "int4", "interface", "length", "lerp", "line", "log", "mad", "matrix", "max", "min",
    "mul", "namespace", "nointerpolation", "normalize", "out", "packoffset", "pass", "point",
    "pow", "precise", "register", "return", "row_major", "sample", "sampler", "saturate",
    "shared", "sin", "sqrt", "static", "string", "struct", "switch", "texture", "true",
    "typedef", "uint", "uint2", "uint3", "uint4", "uniform", "unsigned", "vector", "void",
    "volatile", "while",
];

const MSL_RESERVED: &[&str] = &[
    "abs", "alignas", "alignof", "array", "atomic", "auto", "bool", "bool2", "bool3", "bool4",
    "break", "case", "catch", "ceil", "char", "clamp", "class", "const", "const_cast",
    "constant", "constexpr", "continue", "cos", "cross", "decltype", "default", "delete",
    "device", "discard_fragment", "do", "dot", "double", "else", "enum", "exp", "explicit",
    "extern", "false", "float", "float2", "float2x2", "float3", "float3x3", "float4",
    "float4x4", "floor", "fma", "for", "fract", "fragment", "friend", "goto", "half", "half2",
    "half3", "half4", "if", "inline", "int", "int2", "int3", "int4", "kernel", "length", "log",
    "long", "main", "max", "metal", "min", "mix", "mutable", "namespace", "new", "noexcept",
    "normalize", "nullptr", "operator", "packed_float3", "pow", "private", "protected",
    "public", "ray_data", "register", "return", "sampler", "select", "short", "signed", "sin",
    "sizeof", "sqrt", "static", "static_assert", "static_cast", "struct", "switch", "template",
    "texture2d", "this", "thread", "threadgroup", "throw", "true", "try", "typedef", "typename",
    "uint", "uint2", "uint3", "uint4", "union", "unsigned", "using", "vertex", "virtual",
    "void", "volatile", "while",
];

const GLSL_RESERVED: &[&str] = &[
    "abs", "active", "asm", "attribute", "break", "buffer", "bvec2", "bvec3", "bvec4", "case",
    "cast", "ceil", "centroid", "clamp", "class", "coherent", "common", "const", "continue",
    "cos", "cross", "default", "discard", "do", "dot", "double", "else", "enum", "exp",
    "extern", "external", "false", "filter", "flat", "float", "floor", "for", "fract", "goto",
    "half", "highp", "if", "in", "inline", "inout", "input", "int", "interface", "invariant",
    "isampler2D", "ivec2", "ivec3", "ivec4", "layout", "length", "log", "long", "lowp", "main",
    "mat2", "mat2x2", "mat2x3", "mat2x4", "mat3", "mat3x2", "mat3x3", "mat3x4", "mat4",
    "mat4x2", "mat4x3", "mat4x4", "max", "mediump", "min", "mix", "namespace", "noinline",
    "noperspective", "normalize", "out", "output", "partition", "patch", "pow", "precise",
    "precision", "public", "readonly", "resource", "restrict", "return", "sample", "sampler",
    "sampler2D", "shared", "short", "sin", "sizeof", "smooth", "sqrt", "static", "struct",
    "subroutine", "superp", "switch", "template", "texelFetch", "texture", "this", "true",
    "typedef", "uint", "uniform", "union", "unsigned", "usampler2D", "using", "uvec2", "uvec3",
    "uvec4", "varying", "vec2", "vec3", "vec4", "void", "volatile", "while", "writeonly",
];

impl Renamer {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    fn is_reserved(&self, name: &str) -> bool {
        match self.target {
            Target::Hlsl => HLSL_RESERVED.contains(&name),
            Target::Msl => MSL_RESERVED.contains(&name) || name.starts_with("__"),
            Target::Glsl => {
                GLSL_RESERVED.contains(&name) || name.starts_with("gl_") || name.contains("__")
            }
        }
    }

    /// Pick a replacement for `name`, if it's reserved, avoiding `taken` names.
    fn rename(&self, name: &str, taken: &FxHashSet<String>) -> Option<String> {
        if !self.is_reserved(name) {
            return None;
        }
        let mut base = name.to_string();
        while base.contains("__") {
            base = base.replace("__", "_");
        }
        if base.starts_with("gl_") {
            base.insert_str(0, "r_");
        }
        let base = match base.trim_end_matches('_') {
            "" => "r",
            trimmed => trimmed,
        };
        std::iter::once(format!("{base}_"))
            .chain((1..).map(|i| format!("{base}_{i}")))
            .find(|candidate| !self.is_reserved(candidate) && !taken.contains(candidate))
    }
}

impl Pass for Renamer {
    fn name(&self) -> &'static str {
        "Renamer"
    }

    fn run(
        &self,
        module: &Module,
        outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let mut out = module.clone();
        let cx = out.cx();
        let mut renamed = 0;

        // NOTE: GLSL entry points are all emitted as `main` (and there is
        // only ever one of them), so their names never reach the output.
        let keep_entry_point_names = self.target == Target::Glsl;

        let mut top_level: FxHashSet<String> =
            out.items.iter().map(|&item| cx[out.item_name(item)].to_string()).collect();
        for item in out.items.clone() {
            if let Item::Func(func) = item {
                if keep_entry_point_names && out.funcs[func].is_entry_point() {
                    continue;
                }
            }
            let old_name = &cx[out.item_name(item)];
            let Some(new_name) = self.rename(old_name, &top_level) else {
                continue;
            };
            log::trace!("Renamer: `{old_name}` -> `{new_name}`");
            top_level.insert(new_name.clone());
            let new_name_str = cx.intern(&*new_name);
            match item {
                Item::Struct(s) => out.structs[s].name = new_name_str,
                Item::GlobalVar(gv) => out.global_vars[gv].name = new_name_str,
                Item::Func(func) => {
                    if out.funcs[func].is_entry_point() {
                        outputs.entry_point_renames.insert(old_name.to_string(), new_name);
                    }
                    out.funcs[func].name = new_name_str;
                }
            }
            renamed += 1;
        }

        for s in out.live_structs().collect::<Vec<_>>() {
            let members = &mut out.structs[s].members;
            let mut taken: FxHashSet<String> =
                members.iter().map(|member| cx[member.name].to_string()).collect();
            for member in members {
                if let Some(new_name) = self.rename(&cx[member.name], &taken) {
                    member.name = cx.intern(&*new_name);
                    taken.insert(new_name);
                    renamed += 1;
                }
            }
        }

        for func in out.live_funcs().collect::<Vec<_>>() {
            let func_decl = &mut out.funcs[func];
            let locals = &mut func_decl.body.locals;
            let mut taken: FxHashSet<String> = func_decl
                .params
                .iter()
                .map(|param| param.name)
                .chain(locals.iter().map(|(_, local)| local.name))
                .map(|name| cx[name].to_string())
                .collect();
            let param_names = func_decl.params.iter_mut().map(|param| &mut param.name);
            let local_names: Vec<_> = locals.keys().collect();
            for name in param_names {
                if let Some(new_name) = self.rename(&cx[*name], &taken) {
                    *name = cx.intern(&*new_name);
                    taken.insert(new_name);
                    renamed += 1;
                }
            }
            for local in local_names {
                let name = &mut locals[local].name;
                if let Some(new_name) = self.rename(&cx[*name], &taken) {
                    *name = cx.intern(&*new_name);
                    taken.insert(new_name);
                    renamed += 1;
                }
            }
        }

        if renamed == 0 {
            return Ok(Transformed::Unchanged);
        }
        log::debug!("Renamer: {renamed} identifier(s) renamed for {:?}", self.target);
        resolve::check(&out)?;
        Ok(Transformed::Changed(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Context, FuncDecl, FuncParam, IoAttrs, LocalVarDecl, PipelineStage, ScalarType, Stmt,
        StructDecl, StructMember,
    };
    use std::rc::Rc;

    fn names(module: &Module) -> Vec<String> {
        let cx = module.cx();
        module.items.iter().map(|&item| cx[module.item_name(item)].to_string()).collect()
    }

    fn module_with(func_names: &[&str]) -> Module {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        module.define_struct(StructDecl::new(cx.intern("Data"), [
            StructMember::new(cx.intern("in"), f32_ty),
            StructMember::new(cx.intern("x"), f32_ty),
        ]));
        for &name in func_names {
            let mut func = FuncDecl::new(cx.intern(name));
            func.params.push(FuncParam {
                name: cx.intern("line"),
                ty: f32_ty,
                io: IoAttrs::default(),
                binding: None,
                waivers: Default::default(),
            });
            let param = func.body.param(0);
            let local = func.body.local(LocalVarDecl::new_let(cx.intern("y"), f32_ty, param));
            func.body.block.stmts.push(Stmt::Decl(local));
            module.define_func(func);
        }
        module
    }

    #[test]
    fn hlsl_keywords_are_renamed() {
        let module = module_with(&["frac", "helper"]);
        let Transformed::Changed(out) =
            Renamer::new(Target::Hlsl).run(&module, &mut PassOutputs::default()).unwrap()
        else {
            panic!("expected a change");
        };
        let cx = out.cx();
        assert_eq!(names(&out), ["Data", "frac_", "helper"]);

        let data = out.live_structs().next().unwrap();
        let members: Vec<_> =
            out.structs[data].members.iter().map(|m| cx[m.name].to_string()).collect();
        assert_eq!(members, ["in_", "x"]);

        for func in out.live_funcs() {
            let func = &out.funcs[func];
            assert_eq!(&cx[func.params[0].name], "line_");
            let (_, local) = func.body.locals.iter().next().unwrap();
            assert_eq!(&cx[local.name], "y");
        }
    }

    #[test]
    fn unreserved_names_are_unchanged() {
        let module = module_with(&["helper"]);
        // `in` and `line` are only reserved in HLSL.
        let result = Renamer::new(Target::Msl).run(&module, &mut PassOutputs::default()).unwrap();
        assert!(!result.is_changed());
    }

    #[test]
    fn glsl_reserved_prefixes() {
        let module = module_with(&["gl_helper", "a__b", "main"]);
        let Transformed::Changed(out) =
            Renamer::new(Target::Glsl).run(&module, &mut PassOutputs::default()).unwrap()
        else {
            panic!("expected a change");
        };
        assert_eq!(names(&out), ["Data", "r_gl_helper_", "a_b_", "main_"]);
    }

    #[test]
    fn renamed_entry_points_are_reported() {
        let mut module = module_with(&[]);
        let cx = module.cx();
        let mut main = FuncDecl::new(cx.intern("main"));
        main.stage = Some(PipelineStage::Compute);
        main.workgroup_size = Some([8, 1, 1]);
        module.define_func(main);

        let mut outputs = PassOutputs::default();
        let Transformed::Changed(out) =
            Renamer::new(Target::Msl).run(&module, &mut outputs).unwrap()
        else {
            panic!("expected a change");
        };
        assert_eq!(names(&out), ["Data", "main_"]);
        assert_eq!(outputs.entry_point_renames.get("main").map(|s| &s[..]), Some("main_"));

        // GLSL keeps entry point names (they're all emitted as `main`).
        let mut outputs = PassOutputs::default();
        let Transformed::Changed(out) =
            Renamer::new(Target::Glsl).run(&module, &mut outputs).unwrap()
        else {
            panic!("expected a change (to the `in` member)");
        };
        assert_eq!(names(&out), ["Data", "main"]);
        assert!(outputs.entry_point_renames.is_empty());
    }
}
