use super::{Backend, Options, Sanitized};
use crate::passes::{
    ArrayLengthFromUniform, CanonicalizeEntryPointIo, ModuleScopeVarToEntryPointParam, Renamer,
    RenamerTarget, ShaderStyle,
};
use crate::print::{self, Printed};
use crate::{Failure, Module};

/// Metal Shading Language.
pub struct Msl;

impl Backend for Msl {
    fn name(&self) -> &'static str {
        "MSL"
    }

    fn sanitize<'a>(
        &self,
        module: &'a Module,
        options: &Options,
    ) -> Result<Sanitized<'a>, Failure> {
        if options.depth_range_offsets.is_some() {
            log::warn!("MSL: ignoring `depth_range_offsets`, Metal clamps depth outputs itself");
        }
        let mut sanitizer = options.common_passes();
        if let Some(array_length_from_uniform) = &options.array_length_from_uniform {
            sanitizer.add(ArrayLengthFromUniform::new(array_length_from_uniform.clone()));
        }
        sanitizer
            .add(CanonicalizeEntryPointIo::new(ShaderStyle::Msl))
            .add(ModuleScopeVarToEntryPointParam)
            .add(Renamer::new(RenamerTarget::Msl));
        Sanitized::run(module, &sanitizer)
    }

    fn print(&self, module: &Module, options: &Options) -> Result<Printed, Failure> {
        print::msl(module, &options.print_options())
    }
}
