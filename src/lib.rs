//! **`sluice`** lowers validated shader modules through backend-specific
//! sanitization passes, and prints them as HLSL, MSL or GLSL source.
//!
//! #### Notable types/modules
//!
//! ##### IR data types
// HACK using `(struct.Context.html)` to link `Context`, not `context::Context`.
//! * [`Context`](struct.Context.html): handles interning ([`Type`]s and strings)
//! * [`Module`]: owns [`Struct`]s, [`GlobalVar`]s and [`Func`]s
//!   (rooted by [`items`](Module::items))
//! * [`FuncBody`]: owns [`Expr`]s and [`LocalVar`]s (rooted by [`block`](FuncBody::block))
//!
//! ##### Utilities and passes
//! * [`resolve`]: expression typing, validation, and dependency ordering
//! * [`layout`]: host-shareable memory layouts
//! * [`passes`]: whole-[`Module`] rewrites, each implementing [`passes::Pass`]
//! * [`writer`]: the [`writer::generate`] entry point, and one [`writer::Backend`] per target
//!

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_wild_err_arm,
    clippy::mem_forget,
    clippy::mut_mut,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::useless_transmute,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:
#![allow(
    // NOTE: `match` is often more readable than `if let ... else`.
    clippy::single_match_else,
)]
// NOTE: this is stronger than the "Embark standard lints" above.
#![forbid(unsafe_code)]

// NOTE: all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
mod builder;
mod context;
pub mod func_at;
pub mod layout;
pub mod print;
pub mod resolve;
pub mod transform;
pub mod visit;
pub mod writer;
pub mod passes {
    //! IR transformations (whole-[`Module`](crate::Module)), see [`Pass`].

    mod array_length_from_uniform;
    mod binding_remapper;
    mod canonicalize_entry_point_io;
    mod clamp_frag_depth;
    mod module_scope_var_to_entry_point_param;
    mod pass;
    mod renamer;
    mod single_entry_point;

    pub use array_length_from_uniform::{
        ArrayLengthFromUniform, ArrayLengthFromUniformOptions, BufferSizeIndex,
    };
    pub use binding_remapper::{BindingRemap, BindingRemapper};
    pub use canonicalize_entry_point_io::{CanonicalizeEntryPointIo, ShaderStyle};
    pub use clamp_frag_depth::{ClampFragDepth, Config as ClampFragDepthConfig, RangeOffsets};
    pub use module_scope_var_to_entry_point_param::ModuleScopeVarToEntryPointParam;
    pub use pass::{Pass, PassOutputs, Sanitizer};
    pub use renamer::{Renamer, Target as RenamerTarget};
    pub use single_entry_point::SingleEntryPoint;
}

use arrayvec::ArrayVec;
use itertools::Itertools as _;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::num::NonZeroU32;
use std::rc::Rc;

// HACK work around the lack of `FxIndex{Map,Set}` type aliases elsewhere.
#[doc(hidden)]
type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
#[doc(hidden)]
type FxIndexSet<V> = indexmap::IndexSet<V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

// NOTE: these reexports are all documented inside `context`.
pub use context::{
    Context, Entity, EntityDefs, EntityOrientedDenseMap, Expr, Func, GlobalVar, InternInCx,
    InternedStr, LocalVar, Struct, Type,
};

// HACK this only serves to disallow modifying the `cx` field of `Module`.
#[doc(hidden)]
mod sealed {
    use super::*;

    #[derive(Clone)]
    pub struct Module {
        /// Context used for everything interned, in this module.
        ///
        /// Notable choices made for this field:
        /// * private to disallow switching the context of a module
        /// * [`Rc`] sharing to allow multiple modules to use the same context
        ///   (`Context: !Sync` because of the interners so it can't be `Arc`)
        cx: Rc<Context>,

        pub structs: EntityDefs<Struct>,
        pub global_vars: EntityDefs<GlobalVar>,
        pub funcs: EntityDefs<Func>,

        /// Live top-level declarations, in declaration order.
        ///
        /// Entities not listed here are dead (even if still in the arenas).
        pub items: Vec<Item>,

        /// Diagnostics attached by whatever produced this module (e.g. a
        /// front-end), any `Error`/`Bug` makes the whole module invalid.
        pub diags: Vec<Diag>,
    }

    impl Module {
        pub fn new(cx: Rc<Context>) -> Self {
            Self {
                cx,

                structs: Default::default(),
                global_vars: Default::default(),
                funcs: Default::default(),

                items: vec![],
                diags: vec![],
            }
        }

        pub fn cx(&self) -> Rc<Context> {
            self.cx.clone()
        }

        pub fn cx_ref(&self) -> &Rc<Context> {
            &self.cx
        }
    }
}
pub use sealed::Module;

impl Module {
    pub fn is_valid(&self) -> bool {
        !self.diags.iter().any(|diag| diag.level.is_error())
    }

    pub fn live_structs(&self) -> impl Iterator<Item = Struct> + '_ {
        self.items.iter().filter_map(|&item| match item {
            Item::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn live_global_vars(&self) -> impl Iterator<Item = GlobalVar> + '_ {
        self.items.iter().filter_map(|&item| match item {
            Item::GlobalVar(gv) => Some(gv),
            _ => None,
        })
    }

    pub fn live_funcs(&self) -> impl Iterator<Item = Func> + '_ {
        self.items.iter().filter_map(|&item| match item {
            Item::Func(func) => Some(func),
            _ => None,
        })
    }

    /// Live functions with a [`PipelineStage`], in declaration order.
    pub fn entry_points(&self) -> impl Iterator<Item = Func> + '_ {
        self.live_funcs().filter(|&func| self.funcs[func].stage.is_some())
    }

    pub fn item_name(&self, item: Item) -> InternedStr {
        match item {
            Item::Struct(s) => self.structs[s].name,
            Item::GlobalVar(gv) => self.global_vars[gv].name,
            Item::Func(func) => self.funcs[func].name,
        }
    }

    /// Find a live top-level declaration by name.
    pub fn find_item(&self, name: &str) -> Option<Item> {
        self.items.iter().copied().find(|&item| &self.cx_ref()[self.item_name(item)] == name)
    }

    /// Pick a top-level name not used by any live item, starting with `base`
    /// itself, and then trying `base_1`, `base_2`, etc.
    pub fn fresh_name(&self, base: &str) -> InternedStr {
        let cx = self.cx_ref();
        let taken = |name: &str| self.items.iter().any(|&item| &cx[self.item_name(item)] == name);
        if !taken(base) {
            return cx.intern(base);
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !taken(candidate))
            .map(|name| cx.intern(name))
            .unwrap_or_else(|| cx.intern(base))
    }
}

/// A live top-level declaration of a [`Module`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, derive_more::From)]
pub enum Item {
    Struct(Struct),
    GlobalVar(GlobalVar),
    Func(Func),
}

/// Diagnostics produced by front-ends, passes and printers.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Diag {
    pub level: DiagLevel,
    pub message: Cow<'static, str>,
}

impl Diag {
    pub fn new(level: DiagLevel, message: impl Into<Cow<'static, str>>) -> Self {
        Self { level, message: message.into() }
    }

    #[track_caller]
    pub fn bug(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(DiagLevel::Bug(std::panic::Location::caller()), message)
    }

    pub fn err(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warn(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            DiagLevel::Bug(loc) => write!(f, "BUG @ {loc}: {}", self.message),
            DiagLevel::Error => write!(f, "error: {}", self.message),
            DiagLevel::Warning => write!(f, "warning: {}", self.message),
        }
    }
}

/// The "severity" level of a [`Diag`]nostic.
///
/// Note: `Bug` diagnostics track their emission point for easier identification.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DiagLevel {
    Bug(&'static std::panic::Location<'static>),
    Error,
    Warning,
}

impl DiagLevel {
    pub fn is_error(self) -> bool {
        match self {
            DiagLevel::Bug(_) | DiagLevel::Error => true,
            DiagLevel::Warning => false,
        }
    }
}

/// Error type for everything that can fail to produce a result (passes,
/// printers and [`writer::generate`]), carrying all relevant diagnostics.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[error("{}", .diags.iter().join("\n"))]
pub struct Failure {
    pub diags: Vec<Diag>,
}

impl Failure {
    #[track_caller]
    pub fn bug(message: impl Into<Cow<'static, str>>) -> Self {
        Diag::bug(message).into()
    }

    pub fn err(message: impl Into<Cow<'static, str>>) -> Self {
        Diag::err(message).into()
    }
}

impl From<Diag> for Failure {
    fn from(diag: Diag) -> Self {
        Self { diags: vec![diag] }
    }
}

impl From<Vec<Diag>> for Failure {
    fn from(diags: Vec<Diag>) -> Self {
        Self { diags }
    }
}

/// Scalar types (also used as the element type of vectors and matrices).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ScalarType {
    Bool,
    I32,
    U32,
    F32,
    F16,
}

impl ScalarType {
    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F16)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ScalarType::I32 | ScalarType::U32)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "i32",
            ScalarType::U32 => "u32",
            ScalarType::F32 => "f32",
            ScalarType::F16 => "f16",
        }
    }
}

/// Definition for a [`Type`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    Scalar(ScalarType),
    Vector {
        elem: ScalarType,
        len: u8,
    },
    /// `columns` vectors of `rows` elements each.
    Matrix {
        columns: u8,
        rows: u8,
        elem: ScalarType,
    },
    /// Runtime-sized iff `len` is `None`.
    Array {
        elem: Type,
        len: Option<NonZeroU32>,
    },
    Atomic(ScalarType),
    Struct(Struct),
    Ptr {
        addr_space: AddrSpace,
        pointee: Type,
        access: Access,
    },
    Texture2d {
        sampled: ScalarType,
    },
    Sampler {
        comparison: bool,
    },
}

// Shorthands for common type constructions.
impl Context {
    pub fn scalar_ty(&self, scalar: ScalarType) -> Type {
        self.intern(TypeKind::Scalar(scalar))
    }

    pub fn vector_ty(&self, elem: ScalarType, len: u8) -> Type {
        self.intern(TypeKind::Vector { elem, len })
    }

    pub fn matrix_ty(&self, columns: u8, rows: u8, elem: ScalarType) -> Type {
        self.intern(TypeKind::Matrix { columns, rows, elem })
    }

    pub fn array_ty(&self, elem: Type, len: Option<u32>) -> Type {
        self.intern(TypeKind::Array { elem, len: len.and_then(NonZeroU32::new) })
    }

    pub fn struct_ty(&self, s: Struct) -> Type {
        self.intern(TypeKind::Struct(s))
    }

    pub fn ptr_ty(&self, addr_space: AddrSpace, pointee: Type, access: Access) -> Type {
        self.intern(TypeKind::Ptr { addr_space, pointee, access })
    }
}

/// Address space of a variable (or of the memory behind a pointer).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AddrSpace {
    /// Function-local variables (never valid for module-scope ones).
    Function,
    Private,
    Uniform,
    Storage,
    Workgroup,
    /// Opaque resources (textures and samplers).
    Handle,
    PushConstant,
    PixelLocal,

    /// Pipeline stage inputs, only produced by entry point IO canonicalization.
    In,
    /// Pipeline stage outputs, only produced by entry point IO canonicalization.
    Out,
}

impl AddrSpace {
    pub fn name(self) -> &'static str {
        match self {
            AddrSpace::Function => "function",
            AddrSpace::Private => "private",
            AddrSpace::Uniform => "uniform",
            AddrSpace::Storage => "storage",
            AddrSpace::Workgroup => "workgroup",
            AddrSpace::Handle => "handle",
            AddrSpace::PushConstant => "push_constant",
            AddrSpace::PixelLocal => "pixel_local",
            AddrSpace::In => "in",
            AddrSpace::Out => "out",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Resource binding point, as `@group(group) @binding(binding)`.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct BindingPoint {
    pub group: u32,
    pub binding: u32,
}

/// Per-declaration flags disabling individual validation checks, used by
/// passes injecting declarations that are only legal for specific backends.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct ValidationWaivers {
    /// Allow entry point parameters without IO attributes (e.g. resources).
    pub entry_point_parameter: bool,

    /// Allow a declaration in an otherwise invalid address space.
    pub ignore_address_space: bool,
}

/// Hardware-provided (or consumed) values, see [`IoAttrs::builtin`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BuiltinValue {
    Position,
    FragDepth,
    VertexIndex,
    InstanceIndex,
    FrontFacing,
    SampleIndex,
    SampleMask,
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    WorkgroupId,
    NumWorkgroups,
}

impl BuiltinValue {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinValue::Position => "position",
            BuiltinValue::FragDepth => "frag_depth",
            BuiltinValue::VertexIndex => "vertex_index",
            BuiltinValue::InstanceIndex => "instance_index",
            BuiltinValue::FrontFacing => "front_facing",
            BuiltinValue::SampleIndex => "sample_index",
            BuiltinValue::SampleMask => "sample_mask",
            BuiltinValue::LocalInvocationId => "local_invocation_id",
            BuiltinValue::LocalInvocationIndex => "local_invocation_index",
            BuiltinValue::GlobalInvocationId => "global_invocation_id",
            BuiltinValue::WorkgroupId => "workgroup_id",
            BuiltinValue::NumWorkgroups => "num_workgroups",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InterpolationType {
    Perspective,
    Linear,
    Flat,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InterpolationSampling {
    Center,
    Centroid,
    Sample,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Interpolation {
    pub ty: InterpolationType,
    pub sampling: Option<InterpolationSampling>,
}

/// Shader IO attributes of a function parameter/return value, or struct member.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct IoAttrs {
    pub builtin: Option<BuiltinValue>,
    pub location: Option<u32>,
    pub interpolation: Option<Interpolation>,
    pub invariant: bool,
}

impl IoAttrs {
    pub fn builtin(builtin: BuiltinValue) -> Self {
        Self { builtin: Some(builtin), ..Self::default() }
    }

    pub fn location(location: u32) -> Self {
        Self { location: Some(location), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: InternedStr,
    pub members: SmallVec<[StructMember; 4]>,
}

#[derive(Clone, Debug)]
pub struct StructMember {
    pub name: InternedStr,
    pub ty: Type,
    pub io: IoAttrs,

    /// Explicit byte offset (`@offset`), otherwise implied by alignment rules.
    pub offset: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct GlobalVarDecl {
    pub name: InternedStr,

    /// The type of the value stored in this variable (not a pointer type).
    pub ty: Type,

    pub addr_space: AddrSpace,
    pub access: Access,
    pub binding: Option<BindingPoint>,
    pub initializer: Option<ConstValue>,

    /// Only used by [`AddrSpace::In`]/[`AddrSpace::Out`] variables.
    pub io: IoAttrs,
}

/// Constant (module-scope) values, used for [`GlobalVarDecl::initializer`].
#[derive(Clone, PartialEq, Debug)]
pub enum ConstValue {
    Literal(Literal),
    Zero(Type),
    Composite { ty: Type, elems: Vec<ConstValue> },
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    /// `f16` values are kept in `f32` (all `f16` values are representable).
    F16(f32),
}

impl Literal {
    pub fn scalar_type(self) -> ScalarType {
        match self {
            Literal::Bool(_) => ScalarType::Bool,
            Literal::I32(_) => ScalarType::I32,
            Literal::U32(_) => ScalarType::U32,
            Literal::F32(_) => ScalarType::F32,
            Literal::F16(_) => ScalarType::F16,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Clone)]
pub struct FuncDecl {
    pub name: InternedStr,

    /// Entry points have a pipeline stage, regular functions do not.
    pub stage: Option<PipelineStage>,

    /// Only meaningful for [`PipelineStage::Compute`].
    pub workgroup_size: Option<[u32; 3]>,

    pub params: SmallVec<[FuncParam; 2]>,
    pub ret: Option<FuncRet>,

    pub body: FuncBody,
}

impl FuncDecl {
    pub fn is_entry_point(&self) -> bool {
        self.stage.is_some()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct FuncParam {
    pub name: InternedStr,
    pub ty: Type,
    pub io: IoAttrs,

    /// Only for resources passed directly into entry points.
    pub binding: Option<BindingPoint>,

    pub waivers: ValidationWaivers,
}

#[derive(Copy, Clone, Debug)]
pub struct FuncRet {
    pub ty: Type,
    pub io: IoAttrs,
}

/// Function body: arenas for expressions and local variables, and the root
/// [`Block`] (the only thing deciding which of those are actually used).
#[derive(Clone, Default)]
pub struct FuncBody {
    pub exprs: EntityDefs<Expr>,
    pub locals: EntityDefs<LocalVar>,
    pub block: Block,
}

impl FuncBody {
    /// Replace the root block, returning the previous one.
    pub fn set_block(&mut self, block: Block) -> Block {
        std::mem::replace(&mut self.block, block)
    }
}

#[derive(Clone, Debug)]
pub struct LocalVarDecl {
    pub name: InternedStr,

    /// For `Var`s, the type of the stored value, for `Let`s, the value's type.
    pub ty: Type,

    pub kind: LocalKind,

    /// Required for `Let`s, optional (zero-initialized) for `Var`s.
    pub init: Option<Expr>,

    pub waivers: ValidationWaivers,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LocalKind {
    /// Immutable value binding (`let`).
    Let,

    /// Mutable variable, in [`AddrSpace::Function`] unless otherwise waived
    /// (e.g. entry point local [`AddrSpace::Workgroup`] variables).
    Var(AddrSpace),
}

#[derive(Clone, Default, Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Decl(LocalVar),
    Assign { lhs: Expr, rhs: Expr },
    Expr(Expr),
    If { cond: Expr, then_block: Block, else_block: Block },
    /// Infinite loop (exited through `Break`/`Return`), where `continuing`
    /// runs at the end of every iteration (including through `Continue`).
    Loop { body: Block, continuing: Block },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Block(Block),
}

/// Definition for an [`Expr`].
///
/// Expressions form trees: every [`Expr`] handle is used at most once.
#[derive(Clone, Debug)]
pub enum ExprKind {
    Literal(Literal),
    ZeroValue(Type),
    Construct { ty: Type, args: SmallVec<[Expr; 4]> },

    /// The function parameter with the given index.
    Param(u32),
    Local(LocalVar),
    GlobalVar(GlobalVar),

    Unary { op: UnaryOp, arg: Expr },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },

    /// Struct member access, by member index.
    Member { base: Expr, member: u32 },
    Index { base: Expr, index: Expr },
    Swizzle { base: Expr, components: ArrayVec<u8, 4> },

    Call { callee: Func, args: SmallVec<[Expr; 4]> },
    Builtin { func: BuiltinFn, args: SmallVec<[Expr; 4]> },
    Bitcast { ty: Type, arg: Expr },
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    AddrOf,
    Deref,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// Builtin functions (the subset with backend mappings).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BuiltinFn {
    Abs,
    Clamp,
    Min,
    Max,
    Fma,
    Dot,
    Cross,
    Length,
    Normalize,
    Sqrt,
    Floor,
    Ceil,
    Fract,
    Sin,
    Cos,
    Pow,
    Exp,
    Log,
    Mix,
    /// `select(f, t, cond)`, i.e. `cond ? t : f`.
    Select,
    /// `arrayLength(p)`, where `p` points to a runtime-sized array.
    ArrayLength,
    /// `textureSample(t, s, coords)`.
    TextureSample,
    /// `textureLoad(t, coords, level)`.
    TextureLoad,
    WorkgroupBarrier,
    StorageBarrier,
}

impl BuiltinFn {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::Abs => "abs",
            BuiltinFn::Clamp => "clamp",
            BuiltinFn::Min => "min",
            BuiltinFn::Max => "max",
            BuiltinFn::Fma => "fma",
            BuiltinFn::Dot => "dot",
            BuiltinFn::Cross => "cross",
            BuiltinFn::Length => "length",
            BuiltinFn::Normalize => "normalize",
            BuiltinFn::Sqrt => "sqrt",
            BuiltinFn::Floor => "floor",
            BuiltinFn::Ceil => "ceil",
            BuiltinFn::Fract => "fract",
            BuiltinFn::Sin => "sin",
            BuiltinFn::Cos => "cos",
            BuiltinFn::Pow => "pow",
            BuiltinFn::Exp => "exp",
            BuiltinFn::Log => "log",
            BuiltinFn::Mix => "mix",
            BuiltinFn::Select => "select",
            BuiltinFn::ArrayLength => "arrayLength",
            BuiltinFn::TextureSample => "textureSample",
            BuiltinFn::TextureLoad => "textureLoad",
            BuiltinFn::WorkgroupBarrier => "workgroupBarrier",
            BuiltinFn::StorageBarrier => "storageBarrier",
        }
    }
}
