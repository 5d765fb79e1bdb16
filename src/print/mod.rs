//! Shader source printing, for the (C-like) HLSL, MSL and GLSL targets.
//!
//! All three share one [`Printer`], which handles everything structural
//! (declaration order, statements, most expressions), and defers to a
//! [`Dialect`] for types, declarations, attributes and builtin functions.
//!
//! Printers expect sanitized modules (see [`writer`](crate::writer)), and
//! report anything they have no way to express as a [`Failure`].

mod glsl;
mod hlsl;
mod msl;

use crate::layout::{Layout, Layouter, round_up};
use crate::resolve::{self, ExprTy, FuncTypes};
use crate::{
    Access, AddrSpace, BinaryOp, BindingPoint, Block, BuiltinFn, ConstValue, Context, Expr,
    ExprKind, Failure, FuncDecl, FuncParam, GlobalVar, InternedStr, Item, Literal, LocalKind,
    LocalVar, Module, PipelineStage, ScalarType, Stmt, Struct, StructMember, Type, TypeKind,
    UnaryOp,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::rc::Rc;

/// GLSL `#version` to target.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlslVersion {
    pub major: u32,
    pub minor: u32,
    /// OpenGL ES (as opposed to desktop OpenGL) GLSL.
    pub es: bool,
}

impl Default for GlslVersion {
    fn default() -> Self {
        Self { major: 3, minor: 1, es: true }
    }
}

#[derive(Clone, Default, Debug)]
pub struct PrintOptions {
    /// Where push constants go, for targets without them (HLSL and GLSL).
    pub push_constant_binding: Option<BindingPoint>,

    pub glsl_version: GlslVersion,
}

/// Printer output, i.e. the source text, and what was learned printing it.
#[derive(Clone, Default, Debug)]
pub struct Printed {
    pub source: String,

    /// Byte sizes of the `threadgroup` allocations of each (MSL) entry point,
    /// in `[[threadgroup(i)]]` order.
    pub workgroup_allocations: BTreeMap<String, Vec<u32>>,

    pub has_invariant_attribute: bool,
}

pub fn hlsl(module: &Module, options: &PrintOptions) -> Result<Printed, Failure> {
    Printer::<hlsl::Hlsl>::new(module, options).print_module()
}

pub fn msl(module: &Module, options: &PrintOptions) -> Result<Printed, Failure> {
    Printer::<msl::Msl>::new(module, options).print_module()
}

pub fn glsl(module: &Module, options: &PrintOptions) -> Result<Printed, Failure> {
    Printer::<glsl::Glsl>::new(module, options).print_module()
}

/// Memory shared with the API (or between invocations), whose contents have
/// to be laid out exactly as WGSL lays them out, under target rules that
/// depend on the kind of buffer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum BufferClass {
    Storage,
    Uniform,
}

/// Target-specific printing decisions, as associated functions taking the
/// whole [`Printer`] (which they can recurse back into).
trait Dialect: Sized {
    const NAME: &'static str;

    /// Statement used for [`Stmt::Discard`].
    const DISCARD: &'static str;

    fn header(p: &mut Printer<'_, Self>) -> Result<(), Failure>;

    fn scalar(p: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<&'static str, Failure>;
    fn vector(p: &mut Printer<'_, Self>, elem: ScalarType, len: u8) -> Result<String, Failure>;
    fn matrix(
        p: &mut Printer<'_, Self>,
        columns: u8,
        rows: u8,
        elem: ScalarType,
    ) -> Result<String, Failure>;
    /// Array types outside of declarators (e.g. constructors, return types).
    fn array_type(p: &mut Printer<'_, Self>, elem: Type, len: NonZeroU32)
    -> Result<String, Failure>;
    /// Declarator suffix for runtime-sized arrays (e.g. `[]`).
    fn runtime_array_dim(p: &mut Printer<'_, Self>) -> Result<&'static str, Failure>;
    fn atomic(p: &mut Printer<'_, Self>, scalar: ScalarType) -> Result<String, Failure>;
    fn ptr_type(
        p: &mut Printer<'_, Self>,
        addr_space: AddrSpace,
        pointee: Type,
        access: Access,
    ) -> Result<String, Failure>;
    fn handle_type(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure>;

    /// The layout rules (if any) the target applies to memory in `addr_space`.
    fn buffer_class(addr_space: AddrSpace) -> Option<BufferClass>;

    /// Target layout of a scalar, vector, matrix or atomic type in a `class`
    /// buffer, failing if the target lays out its contents differently.
    fn leaf_layout(
        p: &mut Printer<'_, Self>,
        ty: Type,
        class: BufferClass,
    ) -> Result<Layout, Failure>;

    /// Alignment of arrays and structs in `class` buffers, given the largest
    /// alignment of their contents.
    fn aggregate_align(_class: BufferClass, align: u32) -> u32 {
        align
    }

    /// Size of an array of `count` elements, `stride` bytes apart.
    fn array_size(_class: BufferClass, count: u32, stride: u32, _elem_size: u32) -> u32 {
        count * stride
    }

    /// Where a value with `layout` goes, after memory used up to `end`.
    fn place(_class: BufferClass, end: u32, layout: Layout) -> u32 {
        round_up(end, layout.align)
    }

    /// Size of a struct whose members (and padding) end at `end`.
    fn struct_size(_class: BufferClass, end: u32, align: u32) -> u32 {
        round_up(end, align)
    }

    /// Type (and layout) to declare a `class` buffer struct member of type
    /// `ty` with, when different from the usual one.
    fn packed_member(
        _p: &mut Printer<'_, Self>,
        _ty: Type,
        _class: BufferClass,
    ) -> Result<Option<(String, Layout)>, Failure> {
        Ok(None)
    }

    /// Pointer parameters of regular functions.
    fn ptr_param(
        p: &mut Printer<'_, Self>,
        param: &FuncParam,
        addr_space: AddrSpace,
        pointee: Type,
        access: Access,
    ) -> Result<String, Failure> {
        let ptr = Self::ptr_type(p, addr_space, pointee, access)?;
        Ok(format!("{ptr} {}", p.name(param.name)))
    }

    /// Decorate a struct member declarator (`decl`) with IO attributes.
    fn member_decl(
        p: &mut Printer<'_, Self>,
        s: Struct,
        member: &StructMember,
        decl: String,
    ) -> Result<String, Failure>;

    fn global_var(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<(), Failure>;
    fn global_ref(p: &mut Printer<'_, Self>, gv: GlobalVar) -> Result<String, Failure>;

    /// Everything before the body's `{`, for an entry point.
    fn entry_signature(p: &mut Printer<'_, Self>, func: &FuncDecl) -> Result<String, Failure>;

    fn literal(p: &mut Printer<'_, Self>, lit: Literal) -> Result<String, Failure>;

    fn let_decl(
        p: &mut Printer<'_, Self>,
        ty: Type,
        name: &str,
        init: &str,
    ) -> Result<String, Failure>;
    fn workgroup_local(p: &mut Printer<'_, Self>, ty: Type, name: &str) -> Result<String, Failure>;

    /// Zero value, as an expression.
    fn zero_value(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure>;
    /// Zero value, as the initializer of a declaration.
    fn zero_init(p: &mut Printer<'_, Self>, ty: Type) -> Result<String, Failure> {
        Self::zero_value(p, ty)
    }

    fn construct(p: &mut Printer<'_, Self>, ty: Type, args: &[Expr]) -> Result<String, Failure>;
    fn const_composite(
        p: &mut Printer<'_, Self>,
        ty: Type,
        elems: Vec<String>,
    ) -> Result<String, Failure>;

    /// The initializer of a declaration (which allows more than expressions).
    fn initializer(p: &mut Printer<'_, Self>, init: Expr) -> Result<String, Failure> {
        p.expr(init)
    }

    fn addr_of(p: &mut Printer<'_, Self>, place: Expr) -> Result<String, Failure> {
        p.expr(place)
    }
    fn deref(p: &mut Printer<'_, Self>, ptr: Expr) -> Result<String, Failure> {
        p.expr(ptr)
    }
    fn not(p: &mut Printer<'_, Self>, arg: Expr) -> Result<String, Failure> {
        Ok(format!("!({})", p.expr(arg)?))
    }
    fn binary(
        p: &mut Printer<'_, Self>,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
    ) -> Result<String, Failure> {
        p.plain_binary(op, lhs, rhs)
    }
    fn builtin(p: &mut Printer<'_, Self>, func: BuiltinFn, args: &[Expr])
    -> Result<String, Failure>;
    fn bitcast(p: &mut Printer<'_, Self>, ty: Type, arg: Expr) -> Result<String, Failure>;
}

/// Memoization key for helper functions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum HelperKey {
    Bitcast { from: Type, to: Type },
    ArrayLength { buffer: Type, access: Access },
    StructCtor(Struct),
}

/// How entry points use a struct (relevant to IO attributes of its members).
#[derive(Copy, Clone, Default)]
struct StructRole {
    vertex_input: bool,
    fragment_output: bool,
}

/// How a struct is laid out in one class of buffers.
struct BufferStructPlan {
    /// `u32` padding members before each member (and after the last one).
    pads: SmallVec<[u32; 4]>,
    layout: Layout,
}

struct Printer<'a, D> {
    module: &'a Module,
    cx: &'a Context,
    options: &'a PrintOptions,
    layouter: Layouter<'a>,
    dialect: PhantomData<D>,

    out: String,
    indent: usize,

    /// Helper function definitions requested while printing the current item,
    /// to be emitted ahead of it.
    pending_helpers: String,
    helpers: FxHashMap<HelperKey, String>,
    helper_names: FxHashSet<String>,

    printed_structs: FxHashSet<Struct>,
    struct_roles: FxHashMap<Struct, StructRole>,

    /// Types of everything placed in buffers, with the rules they follow.
    buffer_types: Vec<(Type, BufferClass)>,
    /// Buffer classes each struct (transitively) appears in.
    buffer_structs: FxHashMap<Struct, SmallVec<[BufferClass; 2]>>,
    buffer_struct_plans: FxHashMap<(Struct, BufferClass), Rc<BufferStructPlan>>,

    func: Option<&'a FuncDecl>,
    types: Option<FuncTypes<'a>>,
    /// `continuing` blocks of the enclosing loops, innermost last.
    continuings: Vec<&'a Block>,

    workgroup_allocations: BTreeMap<String, Vec<u32>>,
    has_invariant_attribute: bool,
}

impl<'a, D: Dialect> Printer<'a, D> {
    fn new(module: &'a Module, options: &'a PrintOptions) -> Self {
        let cx: &'a Context = module.cx_ref();

        let mut struct_roles = FxHashMap::<Struct, StructRole>::default();
        for func in module.entry_points() {
            let decl = &module.funcs[func];
            for param in &decl.params {
                if let (TypeKind::Struct(s), Some(PipelineStage::Vertex)) =
                    (&cx[param.ty], decl.stage)
                {
                    struct_roles.entry(*s).or_default().vertex_input = true;
                }
            }
            if let Some(ret) = decl.ret {
                if let (TypeKind::Struct(s), Some(PipelineStage::Fragment)) =
                    (&cx[ret.ty], decl.stage)
                {
                    struct_roles.entry(*s).or_default().fragment_output = true;
                }
            }
        }

        let buffer_types = buffer_types::<D>(module);
        let mut buffer_structs = FxHashMap::<Struct, SmallVec<[BufferClass; 2]>>::default();
        for &(ty, class) in &buffer_types {
            mark_buffer_structs(module, ty, class, &mut buffer_structs);
        }

        Self {
            module,
            cx,
            options,
            layouter: Layouter::new(module),
            dialect: PhantomData,
            out: String::new(),
            indent: 0,
            pending_helpers: String::new(),
            helpers: FxHashMap::default(),
            helper_names: FxHashSet::default(),
            printed_structs: FxHashSet::default(),
            struct_roles,
            buffer_types,
            buffer_structs,
            buffer_struct_plans: FxHashMap::default(),
            func: None,
            types: None,
            continuings: vec![],
            workgroup_allocations: BTreeMap::new(),
            has_invariant_attribute: false,
        }
    }

    fn print_module(mut self) -> Result<Printed, Failure> {
        D::header(&mut self)?;

        for (ty, class) in std::mem::take(&mut self.buffer_types) {
            self.buffer_layout(ty, class)?;
        }

        for item in resolve::dependency_ordered_items(self.module)? {
            let start = self.out.len();
            match item {
                Item::Struct(s) => self.struct_decl(s)?,
                Item::GlobalVar(gv) => D::global_var(&mut self, gv)?,
                Item::Func(func) => {
                    let module = self.module;
                    self.func_def(&module.funcs[func])?;
                }
            }
            if !self.pending_helpers.is_empty() {
                let helpers = std::mem::take(&mut self.pending_helpers);
                self.out.insert_str(start, &helpers);
            }
        }

        log::debug!(
            "{} printer: {} bytes, {} helper(s)",
            D::NAME,
            self.out.len(),
            self.helpers.len()
        );
        Ok(Printed {
            source: self.out,
            workgroup_allocations: self.workgroup_allocations,
            has_invariant_attribute: self.has_invariant_attribute,
        })
    }

    fn name(&self, name: InternedStr) -> &'a str {
        let cx = self.cx;
        &cx[name]
    }

    fn line(&mut self, text: &str) {
        for line in text.lines() {
            if !line.is_empty() {
                for _ in 0..self.indent {
                    self.out.push_str("  ");
                }
            }
            self.out.push_str(line);
            self.out.push('\n');
        }
    }

    fn blank_line(&mut self) {
        self.out.push('\n');
    }

    fn current_func(&self) -> Result<&'a FuncDecl, Failure> {
        self.func.ok_or_else(|| Failure::bug("expression printed outside of a function"))
    }

    fn expr_ty(&mut self, expr: Expr) -> Result<ExprTy, Failure> {
        let types = self.types.as_mut().ok_or_else(|| Failure::bug("no function to type in"))?;
        Ok(types.type_of(expr)?)
    }

    fn value_ty(&mut self, expr: Expr) -> Result<Type, Failure> {
        let types = self.types.as_mut().ok_or_else(|| Failure::bug("no function to type in"))?;
        Ok(types.value_ty(expr)?)
    }

    /// Return the name of the helper for `key`, defining it first (through
    /// `define`, given the chosen name) if needed.
    fn helper(
        &mut self,
        key: HelperKey,
        base_name: &str,
        define: impl FnOnce(&mut Self, &str) -> Result<String, Failure>,
    ) -> Result<String, Failure> {
        if let Some(name) = self.helpers.get(&key) {
            return Ok(name.clone());
        }
        let name = if self.is_name_taken(base_name) {
            (1..)
                .map(|i| format!("{base_name}_{i}"))
                .find(|name| !self.is_name_taken(name))
                .unwrap_or_else(|| base_name.to_string())
        } else {
            base_name.to_string()
        };
        let def = define(self, &name)?;
        log::trace!("{} printer: new helper `{name}`", D::NAME);
        self.pending_helpers.push_str(&def);
        self.pending_helpers.push('\n');
        self.helper_names.insert(name.clone());
        self.helpers.insert(key, name.clone());
        Ok(name)
    }

    fn is_name_taken(&self, name: &str) -> bool {
        self.helper_names.contains(name) || self.module.find_item(name).is_some()
    }

    fn type_name(&mut self, ty: Type) -> Result<String, Failure> {
        let cx = self.cx;
        match cx[ty] {
            TypeKind::Scalar(scalar) => Ok(D::scalar(self, scalar)?.to_string()),
            TypeKind::Vector { elem, len } => D::vector(self, elem, len),
            TypeKind::Matrix { columns, rows, elem } => D::matrix(self, columns, rows, elem),
            TypeKind::Array { elem, len: Some(len) } => D::array_type(self, elem, len),
            TypeKind::Array { len: None, .. } => {
                let msg = format!("{}: runtime-sized arrays can't be used by value", D::NAME);
                Err(Failure::err(msg))
            }
            TypeKind::Atomic(scalar) => D::atomic(self, scalar),
            TypeKind::Struct(s) => Ok(self.name(self.module.structs[s].name).to_string()),
            TypeKind::Ptr { addr_space, pointee, access } => {
                D::ptr_type(self, addr_space, pointee, access)
            }
            TypeKind::Texture2d { .. } | TypeKind::Sampler { .. } => D::handle_type(self, ty),
        }
    }

    /// C-style declaration of `name` with type `ty` (i.e. `T name[N]`), or
    /// just the type (e.g. `T[N]`), when `name` is empty.
    fn declare(&mut self, ty: Type, name: &str) -> Result<String, Failure> {
        let cx = self.cx;
        let mut dims = String::new();
        let mut base = ty;
        while let TypeKind::Array { elem, len } = cx[base] {
            match len {
                Some(len) => dims += &format!("[{len}]"),
                None => dims += D::runtime_array_dim(self)?,
            }
            base = elem;
        }
        let base = self.type_name(base)?;
        Ok(if name.is_empty() { format!("{base}{dims}") } else { format!("{base} {name}{dims}") })
    }

    /// Target layout of `ty` in a `class` buffer, failing unless it matches
    /// the WGSL layout (given the padding members of structs).
    fn buffer_layout(&mut self, ty: Type, class: BufferClass) -> Result<Layout, Failure> {
        let cx = self.cx;
        match cx[ty] {
            TypeKind::Struct(s) => Ok(self.buffer_struct_plan(s, class)?.layout),
            TypeKind::Array { elem, len } => {
                let elem_layout = self.buffer_layout(elem, class)?;
                let align = D::aggregate_align(class, elem_layout.align);
                let stride = round_up(elem_layout.size, align);
                let expected = self.layouter.array_stride(elem)?;
                if stride != expected {
                    return Err(Failure::err(format!(
                        "{}: arrays of `{}` have a {stride}-byte stride, instead of {expected}",
                        D::NAME,
                        self.module.type_name(elem)
                    )));
                }
                let count = len.map_or(1, |len| len.get());
                Ok(Layout { size: D::array_size(class, count, stride, elem_layout.size), align })
            }
            _ => D::leaf_layout(self, ty, class),
        }
    }

    fn buffer_struct_plan(
        &mut self,
        s: Struct,
        class: BufferClass,
    ) -> Result<Rc<BufferStructPlan>, Failure> {
        if let Some(plan) = self.buffer_struct_plans.get(&(s, class)) {
            return Ok(plan.clone());
        }
        let module = self.module;
        let decl = &module.structs[s];
        let struct_name = self.name(decl.name);
        let expected = self.layouter.struct_layout(s)?;

        let mut pads = SmallVec::new();
        let mut end = 0;
        let mut align = 1;
        for (member, &offset) in decl.members.iter().zip(&expected.offsets) {
            let layout = match D::packed_member(self, member.ty, class)? {
                Some((_, layout)) => layout,
                None => self.buffer_layout(member.ty, class)?,
            };
            let pad = if D::place(class, end, layout) == offset {
                0
            } else if offset >= end && D::place(class, offset, layout) == offset {
                padding_words::<D>(struct_name, offset - end)?
            } else {
                return Err(Failure::err(format!(
                    "{}: `{struct_name}.{}` can't be placed at offset {offset}",
                    D::NAME,
                    self.name(member.name)
                )));
            };
            pads.push(pad);
            end = offset + layout.size;
            align = align.max(layout.align);
        }

        let align = D::aggregate_align(class, align);
        let size = expected.layout.size;
        // NOTE: nothing can follow a runtime-sized array.
        let unpadded = decl.members.last().is_some_and(|m| module.is_runtime_array(m.ty))
            || D::struct_size(class, end, align) == size;
        if unpadded {
            pads.push(0);
        } else if end <= size {
            pads.push(padding_words::<D>(struct_name, size - end)?);
            end = size;
        } else {
            return Err(Failure::err(format!(
                "{}: `{struct_name}` takes {end} bytes, instead of {size}",
                D::NAME
            )));
        }

        let plan = Rc::new(BufferStructPlan {
            pads,
            layout: Layout { size: D::struct_size(class, end, align), align },
        });
        self.buffer_struct_plans.insert((s, class), plan.clone());
        Ok(plan)
    }

    /// The class of buffers `s` is laid out for (if any), and the padding
    /// members it needs (one count per member, plus a trailing one).
    fn struct_padding(
        &mut self,
        s: Struct,
    ) -> Result<(Option<BufferClass>, SmallVec<[u32; 4]>), Failure> {
        let member_count = self.module.structs[s].members.len();
        let classes = self.buffer_structs.get(&s).cloned().unwrap_or_default();
        let mut padding: Option<(BufferClass, SmallVec<[u32; 4]>)> = None;
        for class in classes {
            let plan = self.buffer_struct_plan(s, class)?;
            match &padding {
                None => padding = Some((class, plan.pads.clone())),
                Some((_, pads)) if *pads == plan.pads => {}
                Some(_) => {
                    return Err(Failure::err(format!(
                        "{}: `{}` is used in buffers with incompatible layouts",
                        D::NAME,
                        self.name(self.module.structs[s].name)
                    )));
                }
            }
        }
        Ok(match padding {
            Some((class, pads)) => (Some(class), pads),
            None => (None, SmallVec::from_elem(0, member_count + 1)),
        })
    }

    /// Struct constructor arguments, with zeros for the padding members.
    fn padded_struct_args(&mut self, s: Struct, args: Vec<String>) -> Result<Vec<String>, Failure> {
        let (_, pads) = self.struct_padding(s)?;
        let mut padded = vec![];
        let mut args = args.into_iter();
        for &pad in &pads {
            padded.extend((0..pad).map(|_| "0u".to_string()));
            padded.extend(args.next());
        }
        Ok(padded)
    }

    /// The declarations of a struct's members (including padding members).
    fn struct_members(&mut self, s: Struct) -> Result<Vec<String>, Failure> {
        let module = self.module;
        let decl = &module.structs[s];
        let (class, pads) = self.struct_padding(s)?;
        let pad_ty = D::scalar(self, ScalarType::U32)?;

        let mut lines = vec![];
        for (i, &pad) in pads.iter().enumerate() {
            lines.extend((0..pad).map(|j| format!("{pad_ty} pad_{i}_{j};")));
            let Some(member) = decl.members.get(i) else { break };
            let name = self.name(member.name);
            let packed = match class {
                Some(class) => D::packed_member(self, member.ty, class)?,
                None => None,
            };
            let declared = match packed {
                Some((ty, _)) => format!("{ty} {name}"),
                None => self.declare(member.ty, name)?,
            };
            let declared = D::member_decl(self, s, member, declared)?;
            lines.push(format!("{declared};"));
        }
        Ok(lines)
    }

    fn struct_decl(&mut self, s: Struct) -> Result<(), Failure> {
        if !self.printed_structs.insert(s) {
            return Ok(());
        }
        let members = self.struct_members(s)?;
        self.line(&format!("struct {} {{", self.name(self.module.structs[s].name)));
        self.indent += 1;
        for member in members {
            self.line(&member);
        }
        self.indent -= 1;
        self.line("};");
        self.blank_line();
        Ok(())
    }

    fn const_value(&mut self, value: &ConstValue) -> Result<String, Failure> {
        match value {
            &ConstValue::Literal(lit) => D::literal(self, lit),
            &ConstValue::Zero(ty) => D::zero_init(self, ty),
            ConstValue::Composite { ty, elems } => {
                let elems: Vec<String> =
                    elems.iter().map(|elem| self.const_value(elem)).collect::<Result<_, _>>()?;
                D::const_composite(self, *ty, elems)
            }
        }
    }

    fn func_def(&mut self, decl: &'a FuncDecl) -> Result<(), Failure> {
        self.func = Some(decl);
        self.types = Some(FuncTypes::new(self.module, decl));

        let signature = if decl.is_entry_point() {
            D::entry_signature(self, decl)?
        } else {
            let ret = match decl.ret {
                Some(ret) => self.type_name(ret.ty)?,
                None => "void".to_string(),
            };
            let params: Vec<String> =
                decl.params.iter().map(|param| self.param(param)).collect::<Result<_, _>>()?;
            format!("{ret} {}({})", self.name(decl.name), params.join(", "))
        };
        self.line(&format!("{signature} {{"));
        self.nested_block(&decl.body.block)?;
        self.line("}");
        self.blank_line();

        self.func = None;
        self.types = None;
        Ok(())
    }

    fn param(&mut self, param: &FuncParam) -> Result<String, Failure> {
        let cx = self.cx;
        match cx[param.ty] {
            TypeKind::Ptr { addr_space, pointee, access } => {
                D::ptr_param(self, param, addr_space, pointee, access)
            }
            _ => self.declare(param.ty, self.name(param.name)),
        }
    }

    fn nested_block(&mut self, block: &'a Block) -> Result<(), Failure> {
        self.indent += 1;
        let result = self.block(block);
        self.indent -= 1;
        result
    }

    fn block(&mut self, block: &'a Block) -> Result<(), Failure> {
        block.stmts.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<(), Failure> {
        match stmt {
            &Stmt::Decl(local) => {
                let decl = self.local_decl(local)?;
                self.line(&decl);
            }
            &Stmt::Assign { lhs, rhs } => {
                let (lhs, rhs) = (self.expr(lhs)?, self.expr(rhs)?);
                self.line(&format!("{lhs} = {rhs};"));
            }
            &Stmt::Expr(expr) => {
                let expr = self.expr(expr)?;
                self.line(&format!("{expr};"));
            }
            Stmt::If { cond, then_block, else_block } => {
                let cond = self.expr(*cond)?;
                self.line(&format!("if ({cond}) {{"));
                self.nested_block(then_block)?;
                if !else_block.stmts.is_empty() {
                    self.line("} else {");
                    self.nested_block(else_block)?;
                }
                self.line("}");
            }
            Stmt::Loop { body, continuing } => {
                self.line("while (true) {");
                self.continuings.push(continuing);
                let body = self.nested_block(body);
                self.continuings.pop();
                body?;
                self.nested_block(continuing)?;
                self.line("}");
            }
            Stmt::Break => self.line("break;"),
            Stmt::Continue => {
                // NOTE: `continue` has to run the `continuing` block first.
                if let Some(continuing) = self.continuings.last().copied() {
                    self.block(continuing)?;
                }
                self.line("continue;");
            }
            Stmt::Return(None) => self.line("return;"),
            &Stmt::Return(Some(value)) => {
                let value = self.expr(value)?;
                self.line(&format!("return {value};"));
            }
            Stmt::Discard => self.line(D::DISCARD),
            Stmt::Block(block) => {
                self.line("{");
                self.nested_block(block)?;
                self.line("}");
            }
        }
        Ok(())
    }

    fn local_decl(&mut self, local: LocalVar) -> Result<String, Failure> {
        let func = self.current_func()?;
        let decl = &func.body.locals[local];
        let name = self.name(decl.name);
        match decl.kind {
            LocalKind::Let => {
                let init = decl
                    .init
                    .ok_or_else(|| Failure::bug(format!("`let {name}` without a value")))?;
                let init = D::initializer(self, init)?;
                D::let_decl(self, decl.ty, name, &init)
            }
            LocalKind::Var(AddrSpace::Function) => {
                let declared = self.declare(decl.ty, name)?;
                let init = match decl.init {
                    Some(init) => D::initializer(self, init)?,
                    None => D::zero_init(self, decl.ty)?,
                };
                Ok(format!("{declared} = {init};"))
            }
            LocalKind::Var(AddrSpace::Workgroup) => D::workgroup_local(self, decl.ty, name),
            LocalKind::Var(addr_space) => Err(Failure::bug(format!(
                "{}: local `{name}` in address space `{}`",
                D::NAME,
                addr_space.name()
            ))),
        }
    }

    fn args(&mut self, args: &[Expr]) -> Result<Vec<String>, Failure> {
        args.iter().map(|&arg| self.expr(arg)).collect()
    }

    /// Print exactly `N` arguments (of `builtin`).
    fn fixed_args<const N: usize>(
        &mut self,
        builtin: BuiltinFn,
        args: &[Expr],
    ) -> Result<[String; N], Failure> {
        self.args(args)?
            .try_into()
            .map_err(|_| Failure::bug(format!("`{}` takes {N} arguments", builtin.name())))
    }

    /// `name(args...)`, for builtins mapping 1:1 to a target function.
    fn call(&mut self, name: &str, args: &[Expr]) -> Result<String, Failure> {
        Ok(format!("{name}({})", self.args(args)?.join(", ")))
    }

    fn plain_binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Result<String, Failure> {
        let (lhs, rhs) = (self.expr(lhs)?, self.expr(rhs)?);
        Ok(format!("({lhs} {} {rhs})", op.symbol()))
    }

    fn expr(&mut self, expr: Expr) -> Result<String, Failure> {
        let func = self.current_func()?;
        match &func.body.exprs[expr] {
            &ExprKind::Literal(lit) => D::literal(self, lit),
            &ExprKind::ZeroValue(ty) => D::zero_value(self, ty),
            ExprKind::Construct { ty, args } => D::construct(self, *ty, args),
            &ExprKind::Param(idx) => match func.params.get(idx as usize) {
                Some(param) => Ok(self.name(param.name).to_string()),
                None => Err(Failure::bug(format!("parameter index {idx} out of range"))),
            },
            &ExprKind::Local(local) => Ok(self.name(func.body.locals[local].name).to_string()),
            &ExprKind::GlobalVar(gv) => D::global_ref(self, gv),
            &ExprKind::Unary { op, arg } => match op {
                UnaryOp::AddrOf => D::addr_of(self, arg),
                UnaryOp::Deref => D::deref(self, arg),
                UnaryOp::Not => D::not(self, arg),
                UnaryOp::Neg => Ok(format!("(-{})", self.expr(arg)?)),
                UnaryOp::BitNot => Ok(format!("(~{})", self.expr(arg)?)),
            },
            &ExprKind::Binary { op, lhs, rhs } => D::binary(self, op, lhs, rhs),
            &ExprKind::Member { base, member } => {
                let base_ty = self.expr_ty(base)?.value_ty();
                let cx = self.cx;
                let Some(TypeKind::Struct(s)) = base_ty.map(|ty| &cx[ty]) else {
                    return Err(Failure::bug("member access on a non-struct"));
                };
                let member = &self.module.structs[*s].members[member as usize];
                Ok(format!("{}.{}", self.expr(base)?, self.name(member.name)))
            }
            &ExprKind::Index { base, index } => {
                Ok(format!("{}[{}]", self.expr(base)?, self.expr(index)?))
            }
            ExprKind::Swizzle { base, components } => {
                let components: String =
                    components.iter().map(|&c| ['x', 'y', 'z', 'w'][usize::from(c)]).collect();
                Ok(format!("{}.{components}", self.expr(*base)?))
            }
            ExprKind::Call { callee, args } => {
                let callee = self.name(self.module.funcs[*callee].name);
                self.call(callee, args)
            }
            ExprKind::Builtin { func, args } => D::builtin(self, *func, args),
            &ExprKind::Bitcast { ty, arg } => D::bitcast(self, ty, arg),
        }
    }

    /// The module-scope variable behind `&gv`/`&gv.member` (i.e. the only
    /// pointers `arrayLength` is ever applied to).
    fn buffer_of(&self, ptr: Expr) -> Result<GlobalVar, Failure> {
        let body = &self.current_func()?.body;
        let place = body.at(ptr).addr_of_operand();
        let place = match place.map(|place| &body.exprs[place]) {
            Some(&ExprKind::Member { base, .. }) => &body.exprs[base],
            Some(place) => place,
            None => {
                return Err(Failure::err(format!(
                    "{}: unsupported `arrayLength` argument",
                    D::NAME
                )));
            }
        };
        match *place {
            ExprKind::GlobalVar(gv) => Ok(gv),
            _ => Err(Failure::err(format!("{}: unsupported `arrayLength` argument", D::NAME))),
        }
    }
}

/// `u32` padding members filling `bytes`.
fn padding_words<D: Dialect>(struct_name: &str, bytes: u32) -> Result<u32, Failure> {
    if bytes % 4 != 0 {
        return Err(Failure::err(format!(
            "{}: `{struct_name}` needs {bytes} bytes of padding, which isn't a whole number of \
             words",
            D::NAME
        )));
    }
    Ok(bytes / 4)
}

/// Types of the memory `D` lays out under buffer rules, i.e. that of
/// module-scope variables, entry point pointer parameters (after moving
/// variables into those) and function-scope `workgroup` variables.
fn buffer_types<D: Dialect>(module: &Module) -> Vec<(Type, BufferClass)> {
    let cx = module.cx_ref();
    let mut types = vec![];
    for gv in module.live_global_vars() {
        let decl = &module.global_vars[gv];
        types.extend(D::buffer_class(decl.addr_space).map(|class| (decl.ty, class)));
    }
    for func in module.live_funcs() {
        let decl = &module.funcs[func];
        for param in &decl.params {
            if let TypeKind::Ptr { addr_space, pointee, .. } = cx[param.ty] {
                types.extend(D::buffer_class(addr_space).map(|class| (pointee, class)));
            }
        }
        for (_, local) in decl.body.locals.iter() {
            if let LocalKind::Var(addr_space) = local.kind {
                types.extend(D::buffer_class(addr_space).map(|class| (local.ty, class)));
            }
        }
    }
    types.dedup();
    types
}

fn mark_buffer_structs(
    module: &Module,
    ty: Type,
    class: BufferClass,
    structs: &mut FxHashMap<Struct, SmallVec<[BufferClass; 2]>>,
) {
    match module.cx_ref()[ty] {
        TypeKind::Array { elem, .. } => mark_buffer_structs(module, elem, class, structs),
        TypeKind::Struct(s) => {
            let classes = structs.entry(s).or_default();
            if !classes.contains(&class) {
                classes.push(class);
                for member in &module.structs[s].members {
                    mark_buffer_structs(module, member.ty, class, structs);
                }
            }
        }
        _ => {}
    }
}

fn float_literal(value: f32, suffix: &str) -> Result<String, Failure> {
    if !value.is_finite() {
        return Err(Failure::err(format!("non-finite float literal `{value}`")));
    }
    Ok(format!("{value:?}{suffix}"))
}

fn i32_literal(value: i32) -> String {
    if value == i32::MIN {
        // NOTE: `2147483648` itself is out of range for `int`.
        format!("({} - 1)", i32::MIN + 1)
    } else {
        value.to_string()
    }
}
