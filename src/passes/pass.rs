use crate::func_at::FuncAtMut;
use crate::layout::PushConstantLayout;
use crate::transform::{InnerInPlaceTransform, Transformed, Transformer};
use crate::{Expr, Failure, FuncBody, Module, Stmt};
use std::collections::{BTreeMap, BTreeSet};

/// One whole-[`Module`] rewrite.
///
/// Passes never mutate their input: they either report that they don't apply
/// ([`Transformed::Unchanged`]), or return a new (valid) [`Module`].
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Apply the pass, recording any metadata the API layer will need (which
    /// backends forward into their [`Output`](crate::writer::Output)) in `outputs`.
    fn run(
        &self,
        module: &Module,
        outputs: &mut PassOutputs,
    ) -> Result<Transformed<Module>, Failure>;
}

/// Metadata produced by passes, for the API layer.
#[derive(Clone, Default, Debug)]
pub struct PassOutputs {
    /// Indices (into the buffer sizes uniform) actually read, see
    /// [`ArrayLengthFromUniform`](super::ArrayLengthFromUniform).
    pub used_array_length_indices: BTreeSet<u32>,

    /// Layout of the push constants injected by depth clamping, if any.
    pub push_constant_layout: Option<PushConstantLayout>,

    /// Entry points renamed by [`Renamer`](super::Renamer), original name to
    /// emitted name.
    pub entry_point_renames: BTreeMap<String, String>,
}

/// An ordered list of passes, applied one after the other.
#[derive(Default)]
pub struct Sanitizer {
    passes: Vec<Box<dyn Pass>>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|pass| pass.name())
    }

    /// Run every pass in order, stopping at the first failure.
    ///
    /// The result is [`Transformed::Unchanged`] only if every pass was skipped
    /// (in which case the input module needs no copying).
    pub fn run(&self, module: &Module) -> Result<(Transformed<Module>, PassOutputs), Failure> {
        let mut outputs = PassOutputs::default();
        let mut current: Option<Module> = None;
        for pass in &self.passes {
            let input = current.as_ref().unwrap_or(module);
            match pass.run(input, &mut outputs) {
                Ok(Transformed::Unchanged) => log::debug!("pass `{}`: skipped", pass.name()),
                Ok(Transformed::Changed(new_module)) => {
                    log::debug!("pass `{}`: applied", pass.name());
                    current = Some(new_module);
                }
                Err(failure) => {
                    log::debug!(
                        "pass `{}`: failed ({} diagnostics)",
                        pass.name(),
                        failure.diags.len()
                    );
                    return Err(failure);
                }
            }
        }
        Ok((current.map_or(Transformed::Unchanged, Transformed::Changed), outputs))
    }
}

/// Rewrites every `return value` (at any nesting depth) into
/// `return wrap(value)`, see [`rewrite_returns`].
struct ReturnRewriter<F> {
    wrap: F,
}

impl<F: FnMut(&mut FuncAtMut<'_, ()>, Expr) -> Expr> Transformer for ReturnRewriter<F> {
    fn in_place_transform_stmt(&mut self, mut func_at: FuncAtMut<'_, ()>, stmt: &mut Stmt) {
        if let Stmt::Return(Some(value)) = stmt {
            *value = (self.wrap)(&mut func_at, *value);
        }
        stmt.inner_in_place_transform_with(self, func_at);
    }
}

pub(super) fn rewrite_returns(
    body: &mut FuncBody,
    wrap: impl FnMut(&mut FuncAtMut<'_, ()>, Expr) -> Expr,
) {
    body.inner_in_place_transform_with(&mut ReturnRewriter { wrap });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, ExprKind, FuncDecl, Literal};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Renaming {
        runs: Rc<Cell<u32>>,
        changes: bool,
    }

    impl Pass for Renaming {
        fn name(&self) -> &'static str {
            "Renaming"
        }
        fn run(
            &self,
            module: &Module,
            _outputs: &mut PassOutputs,
        ) -> Result<Transformed<Module>, Failure> {
            self.runs.set(self.runs.get() + 1);
            if !self.changes {
                return Ok(Transformed::Unchanged);
            }
            let mut module = module.clone();
            let cx = module.cx();
            for func in module.live_funcs().collect::<Vec<_>>() {
                let name = format!("{}_x", &cx[module.funcs[func].name]);
                module.funcs[func].name = cx.intern(name);
            }
            Ok(Transformed::Changed(module))
        }
    }

    struct Failing;

    impl Pass for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }
        fn run(&self, _: &Module, _: &mut PassOutputs) -> Result<Transformed<Module>, Failure> {
            Err(Failure::err("nope"))
        }
    }

    fn module_with_func() -> Module {
        let mut module = Module::new(Rc::new(Context::new()));
        let cx = module.cx();
        module.define_func(FuncDecl::new(cx.intern("f")));
        module
    }

    #[test]
    fn changes_chain_through_passes() {
        let module = module_with_func();
        let runs = Rc::new(Cell::new(0));
        let mut sanitizer = Sanitizer::new();
        sanitizer
            .add(Renaming { runs: runs.clone(), changes: true })
            .add(Renaming { runs: runs.clone(), changes: false })
            .add(Renaming { runs: runs.clone(), changes: true });

        let (result, _) = sanitizer.run(&module).unwrap();
        let Transformed::Changed(new_module) = result else { panic!("expected a change") };
        let func = new_module.live_funcs().next().unwrap();
        assert_eq!(&new_module.cx()[new_module.funcs[func].name], "f_x_x");
        assert_eq!(runs.get(), 3);

        // The input is left alone.
        assert_eq!(&module.cx()[module.funcs[func].name], "f");
    }

    #[test]
    fn all_skipped_is_unchanged() {
        let runs = Rc::new(Cell::new(0));
        let mut sanitizer = Sanitizer::new();
        sanitizer.add(Renaming { runs, changes: false });
        let (result, _) = sanitizer.run(&module_with_func()).unwrap();
        assert!(!result.is_changed());
    }

    #[test]
    fn failure_stops_the_pipeline() {
        let runs = Rc::new(Cell::new(0));
        let mut sanitizer = Sanitizer::new();
        sanitizer.add(Failing).add(Renaming { runs: runs.clone(), changes: true });
        assert!(sanitizer.run(&module_with_func()).is_err());
        assert_eq!(runs.get(), 0);
        assert_eq!(sanitizer.pass_names().collect::<Vec<_>>(), ["Failing", "Renaming"]);
    }

    #[test]
    fn nested_returns_are_rewritten() {
        let cx = Rc::new(Context::new());
        let mut func = FuncDecl::new(cx.intern("f"));
        let cond = func.body.lit(Literal::Bool(true));
        let inner = func.body.lit(Literal::I32(1));
        let outer = func.body.lit(Literal::I32(2));
        func.body.block.stmts.push(Stmt::If {
            cond,
            then_block: crate::Block::new(vec![Stmt::Return(Some(inner))]),
            else_block: crate::Block::default(),
        });
        func.body.block.stmts.push(Stmt::Return(Some(outer)));

        rewrite_returns(&mut func.body, |func_at, value| {
            let one = func_at.define_expr(ExprKind::Literal(Literal::I32(1)));
            func_at.define_expr(ExprKind::Binary { op: crate::BinaryOp::Add, lhs: value, rhs: one })
        });

        let Stmt::If { then_block, .. } = &func.body.block.stmts[0] else { unreachable!() };
        for stmt in [&then_block.stmts[0], &func.body.block.stmts[1]] {
            let Stmt::Return(Some(value)) = *stmt else { panic!("not a return") };
            assert!(matches!(func.body.exprs[value], ExprKind::Binary { .. }));
        }
    }
}
