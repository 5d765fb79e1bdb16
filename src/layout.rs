//! Memory layouts of host-shareable types (size, alignment, member offsets and
//! array strides), following WGSL's layout rules.

use crate::{Diag, Module, ScalarType, Struct, Type, TypeKind};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Layout {
    pub size: u32,
    pub align: u32,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StructLayout {
    /// Byte offset of each member, in declaration order.
    pub offsets: SmallVec<[u32; 4]>,
    pub layout: Layout,
}

pub fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Memoizing layout computation for one [`Module`].
pub struct Layouter<'a> {
    module: &'a Module,
    types: FxHashMap<Type, Layout>,
    structs: FxHashMap<Struct, Rc<StructLayout>>,
}

impl<'a> Layouter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module, types: FxHashMap::default(), structs: FxHashMap::default() }
    }

    pub fn layout_of(&mut self, ty: Type) -> Result<Layout, Diag> {
        if let Some(&layout) = self.types.get(&ty) {
            return Ok(layout);
        }
        let cx = self.module.cx();
        let layout = match cx[ty] {
            TypeKind::Scalar(scalar) | TypeKind::Atomic(scalar) => scalar_layout(scalar),
            TypeKind::Vector { elem, len } => {
                let elem_size = scalar_layout(elem).size;
                let align = match len {
                    2 => 2 * elem_size,
                    3 | 4 => 4 * elem_size,
                    _ => return Err(Diag::bug(format!("invalid vector length {len}"))),
                };
                Layout { size: u32::from(len) * elem_size, align }
            }
            TypeKind::Matrix { columns, rows, elem } => {
                let column = self.layout_of(cx.vector_ty(elem, rows))?;
                Layout {
                    size: u32::from(columns) * round_up(column.size, column.align),
                    align: column.align,
                }
            }
            TypeKind::Array { elem, len } => {
                let stride = self.array_stride(elem)?;
                let align = self.layout_of(elem)?.align;
                // NOTE: runtime-sized arrays are sized as if they had one element
                // (i.e. the minimum binding size for their contents).
                let count = len.map_or(1, |len| len.get());
                Layout { size: count * stride, align }
            }
            TypeKind::Struct(s) => self.struct_layout(s)?.layout,
            TypeKind::Ptr { .. } | TypeKind::Texture2d { .. } | TypeKind::Sampler { .. } => {
                return Err(Diag::err(format!("type `{ty:?}` is not host-shareable")));
            }
        };
        self.types.insert(ty, layout);
        Ok(layout)
    }

    pub fn array_stride(&mut self, elem: Type) -> Result<u32, Diag> {
        let elem = self.layout_of(elem)?;
        Ok(round_up(elem.size, elem.align))
    }

    pub fn struct_layout(&mut self, s: Struct) -> Result<Rc<StructLayout>, Diag> {
        if let Some(layout) = self.structs.get(&s) {
            return Ok(layout.clone());
        }
        let module = self.module;
        let decl = &module.structs[s];
        let cx = module.cx_ref();

        let mut offsets = SmallVec::new();
        let mut end = 0;
        let mut struct_align = 1;
        for member in &decl.members {
            let member_layout = self.layout_of(member.ty)?;
            let implied = round_up(end, member_layout.align);
            let offset = match member.offset {
                Some(offset) if offset < end || offset % member_layout.align != 0 => {
                    return Err(Diag::err(format!(
                        "`{}.{}`: explicit offset {offset} conflicts with layout \
                         (needs >= {end}, multiple of {})",
                        &cx[decl.name], &cx[member.name], member_layout.align,
                    )));
                }
                Some(offset) => offset,
                None => implied,
            };
            offsets.push(offset);
            end = offset + member_layout.size;
            struct_align = struct_align.max(member_layout.align);
        }
        if decl.members.is_empty() {
            return Err(Diag::err(format!("struct `{}` has no members", &cx[decl.name])));
        }

        let layout = Rc::new(StructLayout {
            offsets,
            layout: Layout { size: round_up(end, struct_align), align: struct_align },
        });
        self.structs.insert(s, layout.clone());
        Ok(layout)
    }
}

fn scalar_layout(scalar: ScalarType) -> Layout {
    match scalar {
        ScalarType::F16 => Layout { size: 2, align: 2 },
        ScalarType::Bool | ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => {
            Layout { size: 4, align: 4 }
        }
    }
}

/// Layout of a push-constant block, as reported to the API layer, which has to
/// upload values at these byte offsets.
#[derive(Clone, PartialEq, Debug, serde::Serialize)]
pub struct PushConstantLayout {
    pub size: u32,
    pub members: Vec<PushConstantMember>,
}

#[derive(Clone, PartialEq, Debug, serde::Serialize)]
pub struct PushConstantMember {
    pub name: String,
    pub offset: u32,
}

impl PushConstantLayout {
    /// Write `value` into `data` at the offset of the member named `name`,
    /// returning `false` if there is no such member (or it doesn't fit).
    pub fn write_f32(&self, data: &mut [u8], name: &str, value: f32) -> bool {
        let Some(member) = self.members.iter().find(|m| m.name == name) else {
            return false;
        };
        let start = member.offset as usize;
        match data.get_mut(start..start + 4) {
            Some(dst) => {
                dst.copy_from_slice(bytemuck::bytes_of(&value));
                true
            }
            None => false,
        }
    }

    /// Encode a `[min, max]` depth range into a block of `size` bytes, for the
    /// members injected by depth clamping (`min_depth` and `max_depth`).
    pub fn encode_frag_depth_range(&self, min: f32, max: f32) -> Vec<u8> {
        let mut data = vec![0; self.size as usize];
        self.write_f32(&mut data, "min_depth", min);
        self.write_f32(&mut data, "max_depth", max);
        data
    }
}
