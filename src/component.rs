//! Component type identity.
//!
//! Spec's C-derived design calls for a process-global dense integer id
//! assigned to each component type on first reference. Rust already gives
//! every `'static` type a process-lifetime-stable identity via
//! [`std::any::TypeId`], so that's what a pool is keyed by — no counter, no
//! registry, no first-use bookkeeping to get wrong. See DESIGN.md for the
//! reasoning.

use std::any::TypeId;

/// Any plain, `'static` record type can be a component. No self-referential
/// lifetimes, no trait methods to implement — this is a marker, blanket-
/// implemented for every eligible type the same way `hecs`/`bevy_ecs` treat
/// component types.
pub trait Component: 'static {}

impl<T: 'static> Component for T {}

#[inline]
pub(crate) fn component_type_id<T: Component>() -> TypeId {
    TypeId::of::<T>()
}
