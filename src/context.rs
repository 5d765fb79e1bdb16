//! Interning context and per-module entity storage.

use crate::TypeKind;
use elsa::FrozenIndexSet;
use rustc_hash::FxHasher;
use std::hash::{BuildHasherDefault, Hash};
use std::ops::{Index, IndexMut};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Context object with global resources for the IR.
///
/// Those resources currently are:
/// * interners, for anything without an identity, and which can be deduplicated
///   (i.e. strings and [`Type`]s, which compare equal iff their handles do)
///
/// Anything with an identity ([`Struct`], [`GlobalVar`], [`Func`], etc.) is
/// instead owned by the [`Module`](crate::Module) defining it.
///
/// `Context: !Sync` (interning uses interior mutability), so modules share it
/// through `Rc`, and every thread compiling shaders needs its own.
#[derive(Default)]
pub struct Context {
    interned_strs: FrozenIndexSet<Box<str>, FxBuildHasher>,
    interned_types: FrozenIndexSet<Box<TypeKind>, FxBuildHasher>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern<T: InternInCx<I>, I>(&self, x: T) -> I {
        x.intern_in_cx(self)
    }
}

/// Conversion into an interned handle, used by [`Context::intern`].
pub trait InternInCx<I> {
    #[must_use]
    fn intern_in_cx(self, cx: &Context) -> I;
}

/// Interned handle for a [`str`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InternedStr(u32);

impl InternInCx<InternedStr> for &'_ str {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interned_strs.insert_full(self.into());
        InternedStr(idx as u32)
    }
}

impl InternInCx<InternedStr> for String {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interned_strs.insert_full(self.into_boxed_str());
        InternedStr(idx as u32)
    }
}

impl Index<InternedStr> for Context {
    type Output = str;

    fn index(&self, s: InternedStr) -> &str {
        // NOTE: handles are only ever created by interning into `self`.
        &self.interned_strs.get_index(s.0 as usize).expect("InternedStr from another Context")
    }
}

/// Interned handle for a [`TypeKind`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Type(u32);

impl InternInCx<Type> for TypeKind {
    fn intern_in_cx(self, cx: &Context) -> Type {
        let (idx, _) = cx.interned_types.insert_full(Box::new(self));
        Type(idx as u32)
    }
}

impl Index<Type> for Context {
    type Output = TypeKind;

    fn index(&self, ty: Type) -> &TypeKind {
        &self.interned_types.get_index(ty.0 as usize).expect("Type from another Context")
    }
}

/// Handle to an entity whose definition is stored in an [`EntityDefs`].
pub trait Entity: Copy + Eq + Hash {
    type Def;

    #[doc(hidden)]
    fn from_idx(idx: usize) -> Self;

    #[doc(hidden)]
    fn to_idx(self) -> usize;
}

macro_rules! entities {
    ($($(#[$attr:meta])* $name:ident => $def:ty),+ $(,)?) => {$(
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(u32);

        impl Entity for $name {
            type Def = $def;

            fn from_idx(idx: usize) -> Self {
                Self(idx as u32)
            }

            fn to_idx(self) -> usize {
                self.0 as usize
            }
        }
    )+};
}

entities! {
    /// Entity handle for a [`StructDecl`](crate::StructDecl).
    Struct => crate::StructDecl,

    /// Entity handle for a [`GlobalVarDecl`](crate::GlobalVarDecl)
    /// (a module-scope variable).
    GlobalVar => crate::GlobalVarDecl,

    /// Entity handle for a [`FuncDecl`](crate::FuncDecl).
    Func => crate::FuncDecl,

    /// Entity handle for an [`ExprKind`](crate::ExprKind), in some function's
    /// expression arena.
    Expr => crate::ExprKind,

    /// Entity handle for a [`LocalVarDecl`](crate::LocalVarDecl), in some
    /// function's local variable arena.
    LocalVar => crate::LocalVarDecl,
}

/// Append-only arena of entity definitions, indexed by entity handles.
///
/// Definitions are never removed: an entity stops existing once nothing refers
/// to it anymore (e.g. a [`Module`](crate::Module) item removed from `items`).
pub struct EntityDefs<E: Entity> {
    defs: Vec<E::Def>,
}

impl<E: Entity> Default for EntityDefs<E> {
    fn default() -> Self {
        Self { defs: vec![] }
    }
}

impl<E: Entity> Clone for EntityDefs<E>
where
    E::Def: Clone,
{
    fn clone(&self) -> Self {
        Self { defs: self.defs.clone() }
    }
}

impl<E: Entity> EntityDefs<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: E::Def) -> E {
        let entity = E::from_idx(self.defs.len());
        self.defs.push(def);
        entity
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// All entities ever defined, in definition order (including unused ones).
    pub fn keys(
        &self,
    ) -> impl DoubleEndedIterator<Item = E> + ExactSizeIterator + Clone + use<E> {
        (0..self.defs.len()).map(E::from_idx)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (E, &E::Def)> {
        self.defs.iter().enumerate().map(|(i, def)| (E::from_idx(i), def))
    }
}

impl<E: Entity> Index<E> for EntityDefs<E> {
    type Output = E::Def;

    fn index(&self, entity: E) -> &E::Def {
        &self.defs[entity.to_idx()]
    }
}

impl<E: Entity> IndexMut<E> for EntityDefs<E> {
    fn index_mut(&mut self, entity: E) -> &mut E::Def {
        &mut self.defs[entity.to_idx()]
    }
}

/// Dense map keyed by entities of one [`EntityDefs`], for side-tables.
#[derive(Clone)]
pub struct EntityOrientedDenseMap<E: Entity, V> {
    values: Vec<Option<V>>,
    _marker: std::marker::PhantomData<E>,
}

impl<E: Entity, V> Default for EntityOrientedDenseMap<E, V> {
    fn default() -> Self {
        Self { values: vec![], _marker: std::marker::PhantomData }
    }
}

impl<E: Entity, V> EntityOrientedDenseMap<E, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: E, value: V) -> Option<V> {
        let idx = key.to_idx();
        if idx >= self.values.len() {
            self.values.resize_with(idx + 1, || None);
        }
        self.values[idx].replace(value)
    }

    pub fn get(&self, key: E) -> Option<&V> {
        self.values.get(key.to_idx())?.as_ref()
    }

    pub fn get_mut(&mut self, key: E) -> Option<&mut V> {
        self.values.get_mut(key.to_idx())?.as_mut()
    }

    pub fn contains_key(&self, key: E) -> bool {
        self.get(key).is_some()
    }
}
