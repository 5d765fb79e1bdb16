mod common;

use common::bp;
use sluice::passes::{ArrayLengthFromUniformOptions, BufferSizeIndex, RangeOffsets};
use sluice::writer::{self, EntryPoint, Hlsl, Options};
use sluice::{AddrSpace, ExprKind, Item, Literal, PipelineStage, ScalarType, Stmt};
use std::collections::BTreeSet;

#[test]
fn compute_with_storage_buffer() {
    let output = writer::generate(&Hlsl, &common::storage_compute(), &Options::default()).unwrap();
    insta::assert_snapshot!(output.source, @r"
    RWStructuredBuffer<float> data : register(u0, space0);

    [numthreads(8, 1, 1)]
    void main(uint3 id : SV_DispatchThreadID) {
      data[id.x] = 1.0f;
    }
    ");
    assert_eq!(output.entry_points, [EntryPoint {
        name: "main".to_string(),
        stage: PipelineStage::Compute
    }]);
    assert!(output.remapped_entry_point_names.is_empty());
    assert!(output.workgroup_allocations.is_empty());
    assert!(!output.needs_storage_buffer_sizes);
    assert!(!output.has_invariant_attribute);
}

#[test]
fn binding_remap_applies_to_registers() {
    let options = Options::from_json(
        r#"{ "binding_remap": [{
            "from": { "group": 0, "binding": 0 },
            "to": { "group": 2, "binding": 5 }
        }] }"#,
    )
    .unwrap();
    let output = writer::generate(&Hlsl, &common::storage_compute(), &options).unwrap();
    assert!(output.source.contains("RWStructuredBuffer<float> data : register(u5, space2);"));
}

#[test]
fn frag_depth_is_clamped_through_push_constants() {
    let options = Options {
        depth_range_offsets: Some(RangeOffsets { min: 0, max: 4 }),
        push_constant_binding: Some(bp(1, 0)),
        ..Options::default()
    };
    let output = writer::generate(&Hlsl, &common::fragment_depth(), &options).unwrap();
    let source = &output.source;
    assert!(source.contains("cbuffer cbuffer_frag_depth_clamp_args : register(b0, space1) {"));
    assert!(source.contains("float clamp_frag_depth(float v) {"));
    assert!(source.contains("float main() : SV_Depth {"));
    assert!(source.contains("return clamp_frag_depth(0.5f);"));

    let layout = output.push_constant_layout.unwrap();
    assert_eq!(layout.size, 8);
    let offsets: Vec<_> = layout.members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
    assert_eq!(offsets, [("min_depth", 0), ("max_depth", 4)]);
}

#[test]
fn frag_depth_clamp_needs_push_constant_binding() {
    let options = Options {
        depth_range_offsets: Some(RangeOffsets { min: 0, max: 4 }),
        ..Options::default()
    };
    let failure = writer::generate(&Hlsl, &common::fragment_depth(), &options).unwrap_err();
    assert!(failure.to_string().contains("push_constant_binding"));
}

#[test]
fn unclamped_frag_depth() {
    let output = writer::generate(&Hlsl, &common::fragment_depth(), &Options::default()).unwrap();
    assert!(output.source.contains("return 0.5f;"));
    assert!(output.push_constant_layout.is_none());
}

#[test]
fn array_length_helper_is_shared() {
    let module = common::array_length_compute(bp(0, 1), 2);
    let output = writer::generate(&Hlsl, &module, &Options::default()).unwrap();
    let source = &output.source;
    assert_eq!(source.matches("uint array_length(RWStructuredBuffer<float> buffer) {").count(), 1);
    assert!(source.contains("const uint n = array_length(data);"));
    assert!(source.contains("const uint n_1 = array_length(data);"));
    // Helpers are emitted ahead of their first user.
    let helper = source.find("uint array_length(").unwrap();
    assert!(helper < source.find("[numthreads(8, 1, 1)]").unwrap());
    assert!(!output.needs_storage_buffer_sizes);
}

#[test]
fn array_length_from_uniform() {
    let module = common::array_length_compute(bp(0, 1), 1);
    let options = Options {
        array_length_from_uniform: Some(ArrayLengthFromUniformOptions {
            ubo_binding: bp(30, 0),
            size_indices: vec![BufferSizeIndex { binding: bp(0, 1), index: 2 }],
        }),
        ..Options::default()
    };
    let output = writer::generate(&Hlsl, &module, &options).unwrap();
    let source = &output.source;
    assert!(source.contains("cbuffer cbuffer_buffer_sizes : register(b0, space30) {"));
    assert!(source.contains("const uint n = (buffer_sizes.buffer_size[0u][2u] / 4u);"));
    assert!(!source.contains("array_length("));

    assert!(output.needs_storage_buffer_sizes);
    assert_eq!(output.used_array_length_from_uniform_indices, BTreeSet::from([2]));
}

#[test]
fn reserved_entry_point_name_is_reported() {
    let mut module = common::storage_compute();
    let cx = module.cx();
    let main = module.entry_points().next().unwrap();
    module.funcs[main].name = cx.intern("frac");

    let output = writer::generate(&Hlsl, &module, &Options::default()).unwrap();
    assert!(output.source.contains("void frac_(uint3 id : SV_DispatchThreadID) {"));
    assert_eq!(output.entry_points[0].name, "frac");
    assert_eq!(output.remapped_entry_point_names["frac"], "frac_");
}

const PADDED_S: &str = "struct S {
  float a;
  uint pad_1_0;
  uint pad_1_1;
  uint pad_1_2;
  float3 b;
  uint pad_2_0;
};
";

#[test]
fn buffer_structs_are_padded_to_match_offsets() {
    for addr_space in [AddrSpace::Storage, AddrSpace::Uniform] {
        let module = common::f32_vec3_buffer(addr_space);
        let output = writer::generate(&Hlsl, &module, &Options::default()).unwrap();
        assert!(output.source.starts_with(PADDED_S), "{addr_space:?}:\n{}", output.source);
    }
}

#[test]
fn padded_struct_constructors_fill_padding() {
    let mut module = common::f32_vec3_buffer(AddrSpace::Storage);
    let cx = module.cx();
    let Some(Item::Struct(s)) = module.find_item("S") else { panic!("no struct `S`") };
    let Some(Item::GlobalVar(buffer)) = module.find_item("s") else { panic!("no buffer `s`") };
    let main = module.entry_points().next().unwrap();
    let body = &mut module.funcs[main].body;
    let a = body.lit(Literal::F32(1.0));
    let b = body.expr(ExprKind::ZeroValue(cx.vector_ty(ScalarType::F32, 3)));
    let rhs = body.construct(cx.struct_ty(s), [a, b]);
    let lhs = body.global_ref(buffer);
    body.block.stmts.push(Stmt::Assign { lhs, rhs });

    let output = writer::generate(&Hlsl, &module, &Options::default()).unwrap();
    let source = &output.source;
    assert!(source.contains("S make_S(float p0, float3 p1) {"));
    assert!(source.contains("  S value = {p0, 0u, 0u, 0u, p1, 0u};"));
    assert!(source.contains("s[0] = make_S(1.0f, (float3)0);"));
}

#[test]
fn cbuffer_matrices_are_row_major() {
    let module = common::indexed_buffer(AddrSpace::Uniform, |cx| {
        cx.array_ty(cx.matrix_ty(4, 4, ScalarType::F32), Some(2))
    });
    let output = writer::generate(&Hlsl, &module, &Options::default()).unwrap();
    assert!(output.source.contains("  row_major float4x4 v[2];"));
}

#[test]
fn unrepresentable_structured_buffer_layouts_are_errors() {
    let vec3s = common::indexed_buffer(AddrSpace::Storage, |cx| {
        cx.array_ty(cx.vector_ty(ScalarType::F32, 3), None)
    });
    let failure = writer::generate(&Hlsl, &vec3s, &Options::default()).unwrap_err();
    assert!(failure.to_string().contains("12-byte stride, instead of 16"));

    let mat3s = common::indexed_buffer(AddrSpace::Storage, |cx| {
        cx.array_ty(cx.matrix_ty(3, 3, ScalarType::F32), None)
    });
    let failure = writer::generate(&Hlsl, &mat3s, &Options::default()).unwrap_err();
    assert!(failure.to_string().contains("columns are 12 bytes apart in structured buffers"));

    let vec4s = common::indexed_buffer(AddrSpace::Storage, |cx| {
        cx.array_ty(cx.vector_ty(ScalarType::F32, 4), None)
    });
    let output = writer::generate(&Hlsl, &vec4s, &Options::default()).unwrap();
    assert!(output.source.contains("RWStructuredBuffer<float4> v : register(u0, space0);"));
}
