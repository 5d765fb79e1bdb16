use super::{Backend, Options, Sanitized};
use crate::passes::{
    ArrayLengthFromUniform, ClampFragDepth, ClampFragDepthConfig, Renamer, RenamerTarget,
};
use crate::print::{self, Printed};
use crate::{Failure, Module};

/// HLSL (Shader Model 5.1+).
pub struct Hlsl;

impl Backend for Hlsl {
    fn name(&self) -> &'static str {
        "HLSL"
    }

    fn sanitize<'a>(
        &self,
        module: &'a Module,
        options: &Options,
    ) -> Result<Sanitized<'a>, Failure> {
        let mut sanitizer = options.common_passes();
        if let Some(array_length_from_uniform) = &options.array_length_from_uniform {
            sanitizer.add(ArrayLengthFromUniform::new(array_length_from_uniform.clone()));
        }
        sanitizer
            .add(ClampFragDepth::new(ClampFragDepthConfig { offsets: options.depth_range_offsets }))
            .add(Renamer::new(RenamerTarget::Hlsl));
        Sanitized::run(module, &sanitizer)
    }

    fn print(&self, module: &Module, options: &Options) -> Result<Printed, Failure> {
        print::hlsl(module, &options.print_options())
    }
}
