use super::pass::{Pass, PassOutputs};
use crate::transform::{InnerInPlaceTransform, Transformed, Transformer};
use crate::{BindingPoint, Failure, FuncParam, GlobalVarDecl, Module, resolve};
use rustc_hash::FxHashMap;

/// One `from -> to` resource binding remapping.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct BindingRemap {
    pub from: BindingPoint,
    pub to: BindingPoint,
}

/// Rewrites resource bindings (of module-scope variables, and of resource
/// entry point parameters) according to a remapping table.
pub struct BindingRemapper {
    remaps: FxHashMap<BindingPoint, BindingPoint>,
}

impl BindingRemapper {
    pub fn new(remaps: impl IntoIterator<Item = BindingRemap>) -> Self {
        Self { remaps: remaps.into_iter().map(|remap| (remap.from, remap.to)).collect() }
    }

    fn remapped(&self, binding: Option<BindingPoint>) -> Option<BindingPoint> {
        let binding = binding?;
        self.remaps.get(&binding).copied().filter(|&to| to != binding)
    }
}

struct Remap<'a>(&'a BindingRemapper);

impl Transformer for Remap<'_> {
    fn in_place_transform_global_var_decl(&mut self, gv_decl: &mut GlobalVarDecl) {
        if let Some(to) = self.0.remapped(gv_decl.binding) {
            gv_decl.binding = Some(to);
        }
    }
    fn in_place_transform_func_param(&mut self, param: &mut FuncParam) {
        if let Some(to) = self.0.remapped(param.binding) {
            param.binding = Some(to);
        }
    }
}

impl Pass for BindingRemapper {
    fn name(&self) -> &'static str {
        "BindingRemapper"
    }

    fn run(
        &self,
        module: &Module,
        _outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let global_bindings = module.live_global_vars().map(|gv| module.global_vars[gv].binding);
        let param_bindings = module
            .live_funcs()
            .flat_map(|func| module.funcs[func].params.iter().map(|param| param.binding));
        if !global_bindings.chain(param_bindings).any(|binding| self.remapped(binding).is_some()) {
            return Ok(Transformed::Unchanged);
        }

        let mut module = module.clone();
        module.inner_in_place_transform_with(&mut Remap(self));
        resolve::check(&module)?;
        Ok(Transformed::Changed(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddrSpace, Context, ScalarType, TypeKind};
    use std::rc::Rc;

    fn bp(group: u32, binding: u32) -> BindingPoint {
        BindingPoint { group, binding }
    }

    #[test]
    fn only_matching_bindings_move() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let tex = cx.intern(TypeKind::Texture2d { sampled: ScalarType::F32 });
        let sampler = cx.intern(TypeKind::Sampler { comparison: false });
        let t = module.define_global_var(GlobalVarDecl {
            binding: Some(bp(0, 0)),
            ..GlobalVarDecl::new(cx.intern("t"), tex, AddrSpace::Handle)
        });
        let s = module.define_global_var(GlobalVarDecl {
            binding: Some(bp(0, 1)),
            ..GlobalVarDecl::new(cx.intern("s"), sampler, AddrSpace::Handle)
        });

        let remapper = BindingRemapper::new([
            BindingRemap { from: bp(0, 0), to: bp(1, 5) },
            BindingRemap { from: bp(3, 3), to: bp(0, 1) },
        ]);
        let Transformed::Changed(out) =
            remapper.run(&module, &mut PassOutputs::default()).unwrap()
        else {
            panic!("expected a change");
        };
        assert_eq!(out.global_vars[t].binding, Some(bp(1, 5)));
        assert_eq!(out.global_vars[s].binding, Some(bp(0, 1)));
    }

    #[test]
    fn identity_or_unmatched_remaps_are_unchanged() {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let sampler = cx.intern(TypeKind::Sampler { comparison: false });
        module.define_global_var(GlobalVarDecl {
            binding: Some(bp(0, 1)),
            ..GlobalVarDecl::new(cx.intern("s"), sampler, AddrSpace::Handle)
        });

        let remapper = BindingRemapper::new([
            BindingRemap { from: bp(0, 1), to: bp(0, 1) },
            BindingRemap { from: bp(2, 2), to: bp(4, 4) },
        ]);
        let result = remapper.run(&module, &mut PassOutputs::default()).unwrap();
        assert!(!result.is_changed());
    }
}
