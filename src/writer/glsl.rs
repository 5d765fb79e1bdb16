use super::{Backend, Options, Sanitized};
use crate::passes::{
    CanonicalizeEntryPointIo, ClampFragDepth, ClampFragDepthConfig, Renamer, RenamerTarget,
    ShaderStyle,
};
use crate::print::{self, Printed};
use crate::{Failure, Module};

/// GLSL (ES 3.1 unless [`Options::glsl_version`] says otherwise).
pub struct Glsl;

impl Backend for Glsl {
    fn name(&self) -> &'static str {
        "GLSL"
    }

    fn sanitize<'a>(
        &self,
        module: &'a Module,
        options: &Options,
    ) -> Result<Sanitized<'a>, Failure> {
        // NOTE: the entry point becomes `main`, so there can only be one.
        if options.entry_point.is_none() && module.entry_points().count() > 1 {
            return Err(Failure::err(
                "GLSL: modules with multiple entry points require `entry_point` to be set",
            ));
        }
        let mut sanitizer = options.common_passes();
        sanitizer
            .add(ClampFragDepth::new(ClampFragDepthConfig { offsets: options.depth_range_offsets }))
            .add(CanonicalizeEntryPointIo::new(ShaderStyle::Glsl))
            .add(Renamer::new(RenamerTarget::Glsl));
        Sanitized::run(module, &sanitizer)
    }

    fn print(&self, module: &Module, options: &Options) -> Result<Printed, Failure> {
        print::glsl(module, &options.print_options())
    }
}
