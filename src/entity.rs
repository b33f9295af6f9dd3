//! Entity identity and the façade that pairs it with a `World`.
//!
//! An [`EntityId`] is the bare 64-bit handle described by the wire layout
//! `(version << 32) | slot` — it can be copied, hashed, and stored in a
//! component pool's dense array with no borrow of anything. [`Entity`] is the
//! convenience façade: a handle plus a non-owning pointer back to the `World`
//! that issued it, so callers can write `entity.add(Velocity { .. })` instead
//! of `world.add(handle, Velocity { .. })`.

use std::fmt;

use crate::component::Component;
use crate::world::World;

/// Index into the identity table that never gets issued to a real entity.
pub const NULL_SLOT: u32 = u32::MAX;

/// The handle value meaning "no entity".
pub const NULL_HANDLE: EntityId = EntityId(u64::MAX);

/// Opaque 64-bit entity identity.
///
/// Bit layout: `(version << 32) | slot`, matching spec's interop
/// requirement — callers that need the raw integer can go through
/// [`EntityId::as_u64`] / [`EntityId::from_u64`] directly.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub(crate) fn new(slot: u32, version: u32) -> Self {
        EntityId(((version as u64) << 32) | slot as u64)
    }

    /// The sentinel meaning "no entity".
    #[inline]
    pub fn null() -> Self {
        NULL_HANDLE
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == NULL_HANDLE
    }

    #[inline]
    pub fn slot(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    #[inline]
    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        EntityId(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "EntityId(null)")
        } else {
            write!(f, "EntityId(slot={}, version={})", self.slot(), self.version())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot(), self.version())
    }
}

/// A handle paired with a non-owning reference to the `World` that owns it.
///
/// This is the ergonomic surface: `entity.add(T)`, `entity.get::<T>()`,
/// `entity.destroy()`. It carries a raw pointer rather than a borrow because
/// the whole point of the type is to be handed around and stashed (e.g. in a
/// `Vec<Entity>`) while the `World` itself is mutated through other paths —
/// exactly the aliasing spec's deferred-free discipline is designed to make
/// safe for the one path (component storage) that actually hands out
/// interior references. Every method re-validates the handle before use.
///
/// Single-threaded only: a `*mut World` that outlives the borrow checker is
/// only sound because nothing here is `Send`/`Sync` and the crate has no
/// suspension points (spec §5).
#[derive(Clone, Copy)]
pub struct Entity {
    handle: EntityId,
    world: *mut World,
}

impl Entity {
    pub(crate) fn new(handle: EntityId, world: *mut World) -> Self {
        Self { handle, world }
    }

    /// The sentinel entity: a null handle bound to no world.
    pub fn null() -> Self {
        Self {
            handle: EntityId::null(),
            world: std::ptr::null_mut(),
        }
    }

    pub fn get_handle(&self) -> EntityId {
        self.handle
    }

    pub fn get_id(&self) -> u32 {
        self.handle.slot()
    }

    pub fn get_version(&self) -> u32 {
        self.handle.version()
    }

    /// `world != null && slot(handle) < table.len && table[slot] == handle`.
    pub fn valid(&self) -> bool {
        if self.world.is_null() {
            return false;
        }
        // SAFETY: non-null and only ever constructed from a live `&mut World`.
        unsafe { (*self.world).is_live(self.handle) }
    }

    fn world_ref(&self) -> &World {
        assert!(self.valid(), "Entity::world_ref: entity is not valid");
        unsafe { &*self.world }
    }

    fn world_mut(&mut self) -> &mut World {
        assert!(self.valid(), "Entity method called on an invalid entity");
        unsafe { &mut *self.world }
    }

    pub fn has<T: Component>(&self) -> bool {
        self.world_ref().has::<T>(self.handle)
    }

    pub fn add<T: Component>(&mut self, value: T) {
        let handle = self.handle;
        self.world_mut().add(handle, value);
    }

    pub fn get<T: Component>(&self) -> &T {
        self.world_ref().get::<T>(self.handle)
    }

    pub fn get_mut<T: Component>(&mut self) -> &mut T {
        let handle = self.handle;
        self.world_mut().get_mut::<T>(handle)
    }

    pub fn remove<T: Component>(&mut self) {
        let handle = self.handle;
        self.world_mut().remove::<T>(handle);
    }

    pub fn destroy(mut self) {
        let handle = self.handle;
        self.world_mut().destroy(handle);
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && self.world == other.world
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_layout_roundtrip() {
        let h = EntityId::new(7, 3);
        assert_eq!(h.slot(), 7);
        assert_eq!(h.version(), 3);
        assert_eq!(h.as_u64(), (3u64 << 32) | 7);
    }

    #[test]
    fn null_handle_is_all_ones() {
        assert_eq!(EntityId::null().as_u64(), u64::MAX);
        assert!(EntityId::null().is_null());
    }

    #[test]
    fn null_entity_is_never_valid() {
        assert!(!Entity::null().valid());
    }
}
