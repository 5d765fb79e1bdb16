use super::pass::{Pass, PassOutputs};
use crate::transform::Transformed;
use crate::{Failure, Item, Module, resolve};
use rustc_hash::FxHashSet;

/// Strips a module down to one entry point, and the declarations it
/// (transitively) depends on.
pub struct SingleEntryPoint {
    name: String,
}

impl SingleEntryPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Pass for SingleEntryPoint {
    fn name(&self) -> &'static str {
        "SingleEntryPoint"
    }

    fn run(
        &self,
        module: &Module,
        _outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure> {
        let cx = module.cx_ref();
        let entry = module
            .entry_points()
            .find(|&func| cx[module.funcs[func].name] == *self.name)
            .ok_or_else(|| Failure::err(format!("entry point `{}` not found", self.name)))?;

        let mut reachable = FxHashSet::default();
        let mut worklist = vec![Item::Func(entry)];
        while let Some(item) = worklist.pop() {
            if reachable.insert(item) {
                worklist.extend(resolve::item_deps(module, item));
            }
        }

        if reachable.len() == module.items.len() {
            return Ok(Transformed::Unchanged);
        }
        let mut module = module.clone();
        module.items.retain(|item| reachable.contains(item));
        resolve::check(&module)?;
        Ok(Transformed::Changed(module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AddrSpace, Context, FuncDecl, GlobalVarDecl, LocalVarDecl, PipelineStage, ScalarType,
        Stmt,
    };
    use std::rc::Rc;

    fn module_with_two_entries() -> Module {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        let f32_ty = cx.scalar_ty(ScalarType::F32);
        let private = |name| GlobalVarDecl::new(cx.intern(name), f32_ty, AddrSpace::Private);
        let used = module.define_global_var(private("used"));
        module.define_global_var(private("unused"));

        let helper = module.define_func(FuncDecl::new(cx.intern("helper")));
        let body = &mut module.funcs[helper].body;
        let value = body.global_ref(used);
        let x = body.local(LocalVarDecl::new_let(cx.intern("x"), f32_ty, value));
        body.block.stmts.push(Stmt::Decl(x));

        for name in ["a", "b"] {
            let mut func = FuncDecl::new(cx.intern(name));
            func.stage = Some(PipelineStage::Compute);
            func.workgroup_size = Some([1, 1, 1]);
            let func = module.define_func(func);
            if name == "a" {
                let body = &mut module.funcs[func].body;
                let call = body.call(helper, []);
                body.block.stmts.push(Stmt::Expr(call));
            }
        }
        module
    }

    #[test]
    fn keeps_only_what_the_entry_point_uses() {
        let module = module_with_two_entries();
        let Transformed::Changed(out) =
            SingleEntryPoint::new("a").run(&module, &mut PassOutputs::default()).unwrap()
        else {
            panic!("expected a change");
        };
        let names: Vec<_> =
            out.items.iter().map(|&item| out.cx()[out.item_name(item)].to_string()).collect();
        assert_eq!(names, ["used", "helper", "a"]);
    }

    #[test]
    fn unknown_entry_point_fails() {
        let module = module_with_two_entries();
        let Err(failure) = SingleEntryPoint::new("nope").run(&module, &mut PassOutputs::default())
        else {
            panic!("unknown entry point accepted");
        };
        assert!(failure.diags[0].message.contains("`nope`"));
    }

    #[test]
    fn helper_names_are_not_entry_points() {
        let module = module_with_two_entries();
        assert!(SingleEntryPoint::new("helper").run(&module, &mut PassOutputs::default()).is_err());
    }
}
