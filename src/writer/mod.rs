//! Code generation entry point: [`generate`] runs a [`Backend`]'s sanitizer
//! and printer over a [`Module`], collecting everything the caller needs to
//! use the result into an [`Output`].

mod glsl;
mod hlsl;
mod msl;

pub use glsl::Glsl;
pub use hlsl::Hlsl;
pub use msl::Msl;

use crate::layout::PushConstantLayout;
use crate::passes::{
    ArrayLengthFromUniformOptions, BindingRemap, BindingRemapper, PassOutputs, RangeOffsets,
    Sanitizer, SingleEntryPoint,
};
use crate::print::{GlslVersion, PrintOptions, Printed};
use crate::transform::Transformed;
use crate::{BindingPoint, Failure, Module, PipelineStage, resolve};
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// Code generation options (shared by all backends, each using what applies).
#[derive(Clone, Default, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Options {
    /// Only emit this entry point (and what it uses).
    pub entry_point: Option<String>,

    pub binding_remap: Vec<BindingRemap>,

    /// Where the API places the depth range in push constants, enabling
    /// clamping of `frag_depth` outputs.
    pub depth_range_offsets: Option<RangeOffsets>,

    pub array_length_from_uniform: Option<ArrayLengthFromUniformOptions>,

    /// Binding standing in for push constants, on targets without them.
    pub push_constant_binding: Option<BindingPoint>,

    pub glsl_version: GlslVersion,
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn print_options(&self) -> PrintOptions {
        PrintOptions {
            push_constant_binding: self.push_constant_binding,
            glsl_version: self.glsl_version,
        }
    }

    /// The `SingleEntryPoint`/`BindingRemapper` prefix all sanitizers share.
    fn common_passes(&self) -> Sanitizer {
        let mut sanitizer = Sanitizer::new();
        if let Some(entry_point) = &self.entry_point {
            sanitizer.add(SingleEntryPoint::new(entry_point.clone()));
        }
        sanitizer.add(BindingRemapper::new(self.binding_remap.iter().copied()));
        sanitizer
    }
}

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize)]
pub struct EntryPoint {
    pub name: String,
    pub stage: PipelineStage,
}

#[derive(Clone, Default, Debug, serde::Serialize)]
pub struct Output {
    pub source: String,

    /// Entry points (by their input name), in declaration order.
    pub entry_points: Vec<EntryPoint>,

    /// Byte sizes of the workgroup allocations the API has to make for each
    /// entry point (only used by MSL).
    pub workgroup_allocations: BTreeMap<String, Vec<u32>>,

    pub used_array_length_from_uniform_indices: BTreeSet<u32>,
    pub needs_storage_buffer_sizes: bool,
    pub has_invariant_attribute: bool,

    /// Layout of the push constants the generated code reads, if any.
    pub push_constant_layout: Option<PushConstantLayout>,

    /// Entry points that had to be renamed in `source`, input name to
    /// emitted name.
    pub remapped_entry_point_names: BTreeMap<String, String>,
}

impl Output {
    /// Everything but `source`, as JSON.
    pub fn metadata_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("source");
        }
        Ok(value)
    }
}

/// A sanitized module (borrowing the input if no pass applied).
pub struct Sanitized<'a> {
    pub module: Cow<'a, Module>,
    pub outputs: PassOutputs,
}

impl<'a> Sanitized<'a> {
    pub fn run(module: &'a Module, sanitizer: &Sanitizer) -> Result<Self, Failure> {
        let (result, outputs) = sanitizer.run(module)?;
        let module = match result {
            Transformed::Unchanged => Cow::Borrowed(module),
            Transformed::Changed(module) => Cow::Owned(module),
        };
        Ok(Self { module, outputs })
    }
}

/// One output language.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn sanitize<'a>(&self, module: &'a Module, options: &Options) -> Result<Sanitized<'a>, Failure>;

    fn print(&self, module: &Module, options: &Options) -> Result<Printed, Failure>;
}

/// Generate `backend` source for `module`.
///
/// Invalid input modules fail with exactly their own diagnostics, without any
/// sanitizing or printing taking place.
pub fn generate(
    backend: &dyn Backend,
    module: &Module,
    options: &Options,
) -> Result<Output, Failure> {
    let name = backend.name();
    if !module.is_valid() {
        log::debug!("{name}: invalid input ({} diagnostics)", module.diags.len());
        return Err(module.diags.clone().into());
    }

    log::debug!("{name}: sanitizing");
    let Sanitized { module: sanitized, outputs } = backend.sanitize(module, options)?;
    resolve::check(&sanitized)?;

    log::debug!("{name}: printing");
    let printed = backend.print(&sanitized, options)?;

    let original_names: FxHashMap<&str, &str> = outputs
        .entry_point_renames
        .iter()
        .map(|(original, renamed)| (renamed.as_str(), original.as_str()))
        .collect();
    let original_name = |name: &str| original_names.get(name).copied().unwrap_or(name).to_string();

    let cx = sanitized.cx_ref();
    let entry_points = sanitized
        .entry_points()
        .filter_map(|func| {
            let decl = &sanitized.funcs[func];
            Some(EntryPoint { name: original_name(&cx[decl.name]), stage: decl.stage? })
        })
        .collect::<Vec<_>>();
    let workgroup_allocations = printed
        .workgroup_allocations
        .into_iter()
        .map(|(entry, sizes)| (original_name(&entry), sizes))
        .collect();

    log::debug!("{name}: {} entry point(s), {} bytes", entry_points.len(), printed.source.len());
    Ok(Output {
        source: printed.source,
        entry_points,
        workgroup_allocations,
        needs_storage_buffer_sizes: !outputs.used_array_length_indices.is_empty(),
        used_array_length_from_uniform_indices: outputs.used_array_length_indices,
        has_invariant_attribute: printed.has_invariant_attribute,
        push_constant_layout: outputs.push_constant_layout,
        remapped_entry_point_names: outputs.entry_point_renames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_from_empty_json() {
        assert_eq!(Options::from_json("{}").unwrap(), Options::default());
        let options = Options::default();
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(Options::from_json(&json).unwrap(), options);
    }

    #[test]
    fn options_partial_json() {
        let options = Options::from_json(
            r#"{
                "entry_point": "main",
                "binding_remap": [{
                    "from": { "group": 0, "binding": 1 },
                    "to": { "group": 2, "binding": 3 }
                }],
                "glsl_version": { "major": 4, "minor": 5, "es": false }
            }"#,
        )
        .unwrap();
        assert_eq!(options.entry_point.as_deref(), Some("main"));
        assert_eq!(options.binding_remap[0].to, BindingPoint { group: 2, binding: 3 });
        assert_eq!(options.glsl_version, GlslVersion { major: 4, minor: 5, es: false });
        assert_eq!(options.depth_range_offsets, None);
    }

    #[test]
    fn metadata_json_omits_source() {
        let output = Output { source: "void main() {}".to_string(), ..Output::default() };
        let metadata = output.metadata_json().unwrap();
        assert!(metadata.get("source").is_none());
        assert_eq!(metadata["needs_storage_buffer_sizes"], serde_json::json!(false));
    }
}
