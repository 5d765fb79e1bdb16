mod common;

use sluice::print::Printed;
use sluice::writer::{self, Backend, Glsl, Hlsl, Msl, Options, Sanitized};
use sluice::passes::Sanitizer;
use sluice::{Diag, Failure, Module};
use std::cell::Cell;

/// Backend that doesn't sanitize anything, and records what it was asked to do.
#[derive(Default)]
struct Spy {
    sanitized: Cell<u32>,
    printed: Cell<u32>,
}

impl Backend for Spy {
    fn name(&self) -> &'static str {
        "spy"
    }

    fn sanitize<'a>(&self, module: &'a Module, _: &Options) -> Result<Sanitized<'a>, Failure> {
        self.sanitized.set(self.sanitized.get() + 1);
        Sanitized::run(module, &Sanitizer::new())
    }

    fn print(&self, _: &Module, _: &Options) -> Result<Printed, Failure> {
        self.printed.set(self.printed.get() + 1);
        Ok(Printed { source: "// spy".to_string(), ..Printed::default() })
    }
}

#[test]
fn invalid_input_fails_with_its_own_diagnostics() {
    let mut module = common::storage_compute();
    module.diags.push(Diag::warn("unused variable"));
    module.diags.push(Diag::err("unknown type `vec5`"));

    let spy = Spy::default();
    let failure = writer::generate(&spy, &module, &Options::default()).unwrap_err();
    assert_eq!(failure.diags, module.diags);
    assert_eq!((spy.sanitized.get(), spy.printed.get()), (0, 0));

    for backend in [&Hlsl as &dyn Backend, &Msl, &Glsl] {
        let failure = writer::generate(backend, &module, &Options::default()).unwrap_err();
        assert_eq!(failure.diags, module.diags, "{}", backend.name());
    }
}

#[test]
fn warnings_alone_dont_make_input_invalid() {
    let mut module = common::storage_compute();
    module.diags.push(Diag::warn("unused variable"));

    let spy = Spy::default();
    let output = writer::generate(&spy, &module, &Options::default()).unwrap();
    assert_eq!(output.source, "// spy");
    assert_eq!((spy.sanitized.get(), spy.printed.get()), (1, 1));
    assert_eq!(output.entry_points.len(), 1);
}

#[test]
fn unknown_entry_point_is_an_error() {
    let options = Options { entry_point: Some("nope".to_string()), ..Options::default() };
    for backend in [&Hlsl as &dyn Backend, &Msl, &Glsl] {
        let result = writer::generate(backend, &common::storage_compute(), &options);
        assert!(result.is_err(), "{}", backend.name());
    }
}

#[test]
fn single_entry_point_drops_the_others() {
    let options = Options { entry_point: Some("a".to_string()), ..Options::default() };
    let output = writer::generate(&Hlsl, &common::two_entry_points(), &options).unwrap();
    let names: Vec<_> = output.entry_points.iter().map(|ep| ep.name.as_str()).collect();
    assert_eq!(names, ["a"]);
    assert!(output.source.contains("void a()"));
    assert!(!output.source.contains("void b()"));
}

#[test]
fn metadata_matches_the_output() {
    let output = writer::generate(&Msl, &common::storage_compute(), &Options::default()).unwrap();
    let metadata = output.metadata_json().unwrap();
    assert_eq!(metadata["entry_points"][0]["name"], "main");
    assert_eq!(metadata["remapped_entry_point_names"]["main"], "main_");
    assert_eq!(metadata["needs_storage_buffer_sizes"], false);
    assert!(metadata.get("source").is_none());
}
