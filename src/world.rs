//! The registry that owns entity identity, component pools, and the
//! deferred-free discipline that makes views safe to grow under.
//!
//! Grounded on `cobalt_core::ecs::{World, storage}` and `cobalt_ecs::World`
//! for overall shape (identity table + pool directory + view factory), but
//! the pool directory here is a linear `Vec<Box<Pool>>` scanned by `TypeId`
//! rather than the teacher's `hashbrown` map — spec §4.1 specifies a linear
//! scan, and dropping the hashmap is one of the deliberate dependency cuts
//! recorded in DESIGN.md.

use std::any::TypeId;

use crate::component::{component_type_id, Component};
use crate::entity::{Entity, EntityId, NULL_SLOT};
use crate::error::EcsError;
use crate::pool::{Hook, Pool, RawBuffer};

/// Hard cap on pending deferred frees (spec §6). An implementer may raise
/// this or switch to a growable queue; 64 is the value the source ships.
pub const MAX_DEFERRED_FREES: usize = 64;

/// Hard cap on the number of component types a single view may span.
pub const MAX_VIEW_COMPONENTS: usize = 16;

struct IdentitySlot {
    /// Live: `make_handle(slot, version)`. Free: `make_handle(next_free, next_version)`.
    handle: EntityId,
}

/// The ECS registry. Owns the identity table, the component pool directory,
/// and the deferred-free queue that views drain once the outermost one
/// closes.
pub struct World {
    table: Vec<IdentitySlot>,
    avail_slot: u32,
    alive_count: u64,
    pools: Vec<Box<Pool>>,
    deferred_frees: Vec<RawBuffer>,
    iteration_depth: u32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        World {
            table: Vec::new(),
            avail_slot: NULL_SLOT,
            alive_count: 0,
            pools: Vec::with_capacity(8),
            deferred_frees: Vec::new(),
            iteration_depth: 0,
        }
    }

    /// Creates a world whose identity table is pre-sized for
    /// `entity_capacity` entities. Purely an allocation hint — the table
    /// still grows past this on demand, exactly as [`World::new`]'s does.
    pub fn with_capacity(entity_capacity: usize) -> Self {
        World {
            table: Vec::with_capacity(entity_capacity),
            avail_slot: NULL_SLOT,
            alive_count: 0,
            pools: Vec::with_capacity(8),
            deferred_frees: Vec::new(),
            iteration_depth: 0,
        }
    }

    // ---- entity lifecycle -------------------------------------------------

    /// Returns a fresh live handle, recycling the most recently freed slot
    /// first (spec §8: "recycling uses the most-recently-freed slot").
    pub fn new_entity(&mut self) -> Entity {
        let world_ptr: *mut World = &mut *self;
        let handle = if self.avail_slot == NULL_SLOT {
            let slot = self.table.len() as u32;
            let handle = EntityId::new(slot, 0);
            self.table.push(IdentitySlot { handle });
            handle
        } else {
            let slot = self.avail_slot;
            let freed = &self.table[slot as usize].handle;
            let next_free = freed.slot();
            let version = freed.version();
            let handle = EntityId::new(slot, version);
            self.table[slot as usize].handle = handle;
            self.avail_slot = next_free;
            handle
        };
        self.alive_count += 1;
        log::trace!("new_entity: {}", handle);
        Entity::new(handle, world_ptr)
    }

    /// Number of currently live entities.
    pub fn count(&self) -> u64 {
        self.alive_count
    }

    /// Handle stored at identity-table index `i`. May be a free-list node
    /// (not live) — callers check validity themselves (spec §4.1).
    pub fn at(&self, i: usize) -> EntityId {
        self.table[i].handle
    }

    /// `table[slot(handle)] == handle`, the liveness test underlying
    /// `Entity::valid()` (spec §3, I1/I3).
    pub(crate) fn is_live(&self, handle: EntityId) -> bool {
        if handle.is_null() {
            return false;
        }
        let slot = handle.slot() as usize;
        slot < self.table.len() && self.table[slot].handle == handle
    }

    fn assert_live(&self, handle: EntityId) {
        if !self.is_live(handle) {
            panic!("{}", EcsError::InvalidEntity);
        }
    }

    /// Removes every component, then recycles the slot with `version + 1`
    /// (spec §4.1).
    pub fn destroy(&mut self, handle: EntityId) {
        self.assert_live(handle);
        let world_ptr: *mut World = &mut *self;
        let slot = handle.slot();

        for i in 0..self.pools.len() {
            if self.pools[i].has(slot) {
                self.remove_from_pool(i, handle, world_ptr);
            }
        }

        let next_version = handle.version().wrapping_add(1);
        self.table[slot as usize].handle = EntityId::new(self.avail_slot, next_version);
        self.avail_slot = slot;
        self.alive_count -= 1;
        log::trace!("destroy: {} (slot {} now free, next version {})", handle, slot, next_version);
    }

    // ---- pool directory ----------------------------------------------------

    fn find_pool(&self, type_id: TypeId) -> Option<usize> {
        self.pools.iter().position(|p| p.type_id == type_id)
    }

    /// Returns the index of T's pool, lazily creating it (spec §4.1:
    /// "linearly scans the pool array... if absent, grows the pool array").
    fn get_or_create_pool<T: Component>(&mut self) -> usize {
        let type_id = component_type_id::<T>();
        if let Some(idx) = self.find_pool(type_id) {
            return idx;
        }
        log::debug!("creating pool for {}", std::any::type_name::<T>());
        self.pools.push(Box::new(Pool::new::<T>(self.table.len())));
        self.pools.len() - 1
    }

    fn remove_from_pool(&mut self, pool_idx: usize, handle: EntityId, world_ptr: *mut World) {
        let pool_ptr: *mut Pool = &mut *self.pools[pool_idx];
        unsafe {
            (*pool_ptr).fire_on_destroy(Entity::new(handle, world_ptr));
            (*pool_ptr).remove(handle.slot());
        }
    }

    // ---- component operations ----------------------------------------------

    pub fn has<T: Component>(&self, handle: EntityId) -> bool {
        self.assert_live(handle);
        match self.find_pool(component_type_id::<T>()) {
            Some(idx) => self.pools[idx].has(handle.slot()),
            None => false,
        }
    }

    /// Asserts the component is not already present — no implicit replace
    /// (spec §4.3).
    pub fn add<T: Component>(&mut self, handle: EntityId, value: T) {
        self.assert_live(handle);
        let pool_idx = self.get_or_create_pool::<T>();
        if self.pools[pool_idx].has(handle.slot()) {
            panic!("{}", EcsError::DuplicateComponent(component_type_id::<T>()));
        }

        let world_ptr: *mut World = &mut *self;
        let iterating = self.iteration_depth > 0;
        let element_size = std::mem::size_of::<T>();
        let ptr = self.pools[pool_idx].reserve_slot(
            handle,
            element_size,
            &mut self.deferred_frees,
            MAX_DEFERRED_FREES,
            iterating,
        );
        unsafe { (ptr as *mut T).write(value) };

        self.pools[pool_idx].fire_on_create(Entity::new(handle, world_ptr));
    }

    pub fn get<T: Component>(&self, handle: EntityId) -> &T {
        self.assert_live(handle);
        let idx = self
            .find_pool(component_type_id::<T>())
            .filter(|&idx| self.pools[idx].has(handle.slot()))
            .unwrap_or_else(|| panic!("{}", EcsError::MissingComponent(component_type_id::<T>())));
        unsafe { self.pools[idx].get::<T>(handle.slot()) }
    }

    pub fn get_mut<T: Component>(&mut self, handle: EntityId) -> &mut T {
        self.assert_live(handle);
        let idx = self
            .find_pool(component_type_id::<T>())
            .filter(|&idx| self.pools[idx].has(handle.slot()))
            .unwrap_or_else(|| panic!("{}", EcsError::MissingComponent(component_type_id::<T>())));
        unsafe { self.pools[idx].get_mut::<T>(handle.slot()) }
    }

    pub fn remove<T: Component>(&mut self, handle: EntityId) {
        self.assert_live(handle);
        let type_id = component_type_id::<T>();
        let idx = self
            .find_pool(type_id)
            .filter(|&idx| self.pools[idx].has(handle.slot()))
            .unwrap_or_else(|| panic!("{}", EcsError::MissingComponent(type_id)));
        let world_ptr: *mut World = &mut *self;
        self.remove_from_pool(idx, handle, world_ptr);
    }

    /// Registers (or replaces) the `on_create` hook for `T`, creating the
    /// pool if necessary.
    pub fn set_create_func<T: Component>(&mut self, hook: impl FnMut(Entity) + 'static) {
        let idx = self.get_or_create_pool::<T>();
        self.pools[idx].set_on_create(Box::new(hook) as Hook);
    }

    /// Registers (or replaces) the `on_destroy` hook for `T`, creating the
    /// pool if necessary.
    pub fn set_destroy_func<T: Component>(&mut self, hook: impl FnMut(Entity) + 'static) {
        let idx = self.get_or_create_pool::<T>();
        self.pools[idx].set_on_destroy(Box::new(hook) as Hook);
    }

    // ---- garbage collection -------------------------------------------------

    /// Commits pending deferred frees, then shrinks any pool whose
    /// `capacity > 2n` and `n > 8` down to `ceil(n, 8)` elements (spec
    /// §4.1). Must not be called while a view is active (spec §5).
    pub fn collect_garbage(&mut self) {
        assert_eq!(
            self.iteration_depth, 0,
            "collect_garbage called while a view is active"
        );
        if !self.deferred_frees.is_empty() {
            log::debug!("collect_garbage: dropping {} deferred buffers", self.deferred_frees.len());
            self.deferred_frees.clear();
        }
        for pool in &mut self.pools {
            let n = pool.len();
            if n > 8 && pool.capacity() > 2 * n {
                let target = div_ceil(n, 8) * 8;
                pool.shrink_to(target);
            }
        }
    }

    // ---- views ---------------------------------------------------------------

    /// Returns a [`View`] over the intersection of up to 16 component types,
    /// panicking if more are requested (spec §4.4). See [`World::try_new_view`]
    /// for the non-panicking form.
    pub fn new_view(&mut self, type_ids: &[TypeId]) -> View<'_> {
        match self.try_new_view(type_ids) {
            Ok(view) => view,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible counterpart of [`World::new_view`] — the one error path
    /// (view width over the hard cap) that a caller may want to check
    /// rather than treat as fatal.
    pub fn try_new_view(&mut self, type_ids: &[TypeId]) -> Result<View<'_>, EcsError> {
        if type_ids.len() > MAX_VIEW_COMPONENTS {
            return Err(EcsError::TooManyComponents(type_ids.len()));
        }
        // Spec §4.4 scopes view width to 1..=16. A zero-width request has no
        // driver pool to pick, so hand back a view that is vacuously empty
        // (same as the missing-pool case below) rather than bumping
        // `iteration_depth` and then indexing an empty `pool_indices`.
        if type_ids.is_empty() {
            return Ok(View::empty(self));
        }

        let mut pool_indices: Vec<Option<usize>> = Vec::with_capacity(type_ids.len());
        for &tid in type_ids {
            pool_indices.push(self.find_pool(tid));
        }

        // Any missing pool means the view is vacuously empty (spec §4.4.1,
        // §8 invariant 9) — no pool gets allocated for a type never seen.
        if pool_indices.iter().any(Option::is_none) {
            return Ok(View::empty(self));
        }
        let pool_indices: Vec<usize> = pool_indices.into_iter().map(Option::unwrap).collect();

        let mut driver = 0;
        for i in 1..pool_indices.len() {
            if self.pools[pool_indices[i]].len() < self.pools[pool_indices[driver]].len() {
                driver = i;
            }
        }

        self.iteration_depth += 1;
        log::trace!("view opened over {} types, depth now {}", type_ids.len(), self.iteration_depth);

        let driver_pool_idx = pool_indices[driver];
        let cursor = self.pools[driver_pool_idx].len() as i64 - 1;

        let mut view = View {
            world: self,
            pool_indices,
            driver,
            cursor,
            closed: false,
        };
        view.skip_to_match();
        Ok(view)
    }

    fn dec_iteration_depth(&mut self) {
        debug_assert!(self.iteration_depth > 0);
        self.iteration_depth -= 1;
        if self.iteration_depth == 0 {
            self.commit_deferred_frees();
        }
    }

    fn commit_deferred_frees(&mut self) {
        if !self.deferred_frees.is_empty() {
            log::trace!("flushing {} deferred buffers", self.deferred_frees.len());
            self.deferred_frees.clear();
        }
    }
}

/// World teardown (spec §4.2: "On World teardown: if `on_destroy` is set,
/// fire it for each remaining entity in dense order; then free all three
/// buffers"). Firing happens here, one level above `Pool`'s own `Drop`
/// impl, because building the `Entity` argument needs a `*mut World` that
/// only `World` has; the buffer frees themselves still happen afterward,
/// automatically, when `self.pools` (and each `Pool`'s own fields) drop in
/// the usual field order once this function returns.
impl Drop for World {
    fn drop(&mut self) {
        let world_ptr: *mut World = &mut *self;
        for pool in self.pools.iter_mut() {
            if !pool.has_on_destroy() {
                continue;
            }
            for i in 0..pool.len() {
                let entity = pool.dense_entity(i);
                pool.fire_on_destroy(Entity::new(entity, world_ptr));
            }
        }
    }
}

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// A transient cursor over the intersection of up to 16 component pools.
///
/// Iterates the driver pool's dense array from high index to low (spec
/// §4.4) so entities appended mid-iteration, which land at indices ≥ the
/// cursor's starting point, are never visited. Dropping a `View` before it
/// is exhausted leaves the world's iteration depth incremented — per spec
/// §4.4 a view that is "abandoned" without exhausting it never commits
/// deferred frees, so callers should drive views to completion.
pub struct View<'a> {
    world: &'a mut World,
    /// Index into `world.pools`, one per requested type, in caller order.
    pool_indices: Vec<usize>,
    /// Index into `pool_indices` naming the driver pool.
    driver: usize,
    cursor: i64,
    closed: bool,
}

impl<'a> View<'a> {
    pub const MAX_COMPONENTS: usize = MAX_VIEW_COMPONENTS;

    fn empty(world: &'a mut World) -> Self {
        View {
            world,
            pool_indices: Vec::new(),
            driver: 0,
            cursor: -1,
            closed: true,
        }
    }

    fn driver_pool_idx(&self) -> usize {
        self.pool_indices[self.driver]
    }

    fn current_entity(&self) -> Option<EntityId> {
        if self.cursor < 0 {
            return None;
        }
        Some(self.world.pools[self.driver_pool_idx()].dense_entity(self.cursor as usize))
    }

    fn matches_all(&self, entity: EntityId) -> bool {
        self.pool_indices
            .iter()
            .enumerate()
            .all(|(i, &idx)| i == self.driver || self.world.pools[idx].has(entity.slot()))
    }

    /// Walks the cursor down to the next entity present in every pool, or to
    /// exhaustion.
    fn skip_to_match(&mut self) {
        while self.cursor >= 0 {
            let e = self.world.pools[self.driver_pool_idx()].dense_entity(self.cursor as usize);
            if self.matches_all(e) {
                return;
            }
            self.cursor -= 1;
        }
        self.close_if_needed();
    }

    fn close_if_needed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.world.dec_iteration_depth();
        }
    }

    /// Whether the cursor currently sits on a qualifying entity. On the
    /// transition to exhausted, this is also where the world's iteration
    /// depth gets decremented and deferred frees get committed once it
    /// reaches zero (spec §4.4).
    pub fn valid(&mut self) -> bool {
        if self.cursor < 0 {
            self.close_if_needed();
            return false;
        }
        true
    }

    /// Advances to the previous qualifying entity (driver dense array, high
    /// to low).
    pub fn next(&mut self) {
        if self.cursor < 0 {
            return;
        }
        self.cursor -= 1;
        self.skip_to_match();
    }

    /// Reference to the current entity's `T` payload. `T` must be one of the
    /// types this view was constructed over — unchecked by design (spec §4.4).
    pub fn get<T: Component>(&self) -> &T {
        let entity = self.current_entity().expect("View::get called past exhaustion");
        let type_id = component_type_id::<T>();
        let idx = self
            .pool_indices
            .iter()
            .find(|&&idx| self.world.pools[idx].type_id == type_id)
            .copied()
            .unwrap_or_else(|| panic!("{}", EcsError::MissingComponent(type_id)));
        unsafe { self.world.pools[idx].get::<T>(entity.slot()) }
    }

    /// Façade for the current entity.
    pub fn get_entity(&mut self) -> Entity {
        let entity = self.current_entity().expect("View::get_entity called past exhaustion");
        let world_ptr: *mut World = &mut *self.world;
        Entity::new(entity, world_ptr)
    }

    /// Reborrows the `World` this view is iterating. Structural mutation
    /// through here (e.g. `new_entity`/`add` on a different entity) is safe
    /// mid-iteration by the same deferred-free discipline that protects
    /// `entity.add(..)` calls made via [`View::get_entity`] — growth while
    /// `iteration_depth > 0` defers the old buffer's free instead of
    /// dropping it (spec §5).
    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }
}

impl<'a> Drop for View<'a> {
    fn drop(&mut self) {
        self.close_if_needed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag {
        name: &'static str,
    }
    struct Transform {
        x: i32,
        y: i32,
    }

    #[test]
    fn new_entity_recycles_lifo() {
        let mut world = World::new();
        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(world.new_entity().get_handle());
        }
        let victim = handles[4];
        world.destroy(victim);
        let recycled = world.new_entity();
        assert_eq!(recycled.get_id(), 4);
        assert_eq!(recycled.get_version(), 1);
        assert!(!world.is_live(victim));
    }

    #[test]
    fn destroy_then_create_preserves_count() {
        let mut world = World::new();
        let before = world.count();
        let e = world.new_entity();
        e.destroy();
        assert_eq!(world.count(), before);
    }

    #[test]
    fn add_get_remove_add_again() {
        let mut world = World::new();
        let mut a = world.new_entity();
        a.add(Transform { x: 1, y: 2 });
        assert_eq!(a.get::<Transform>().x, 1);
        a.remove::<Transform>();
        assert!(!a.has::<Transform>());
        a.add(Transform { x: 9, y: 9 });
        assert_eq!(a.get::<Transform>().y, 9);
    }

    #[test]
    fn view_over_two_pools_yields_expected_pairs() {
        let mut world = World::new();
        let mut a = world.new_entity();
        a.add(Tag { name: "Bob" });
        a.add(Transform { x: 5, y: 3 });
        let mut b = world.new_entity();
        b.add(Tag { name: "Alice" });
        b.add(Transform { x: 3, y: 55 });

        let mut seen = Vec::new();
        {
            let mut view = world.try_new_view(&[TypeId::of::<Tag>(), TypeId::of::<Transform>()]).unwrap();
            while view.valid() {
                let name = view.get::<Tag>().name;
                let t = view.get::<Transform>();
                seen.push((name, t.x, t.y));
                view.next();
            }
        }
        seen.sort();
        assert_eq!(seen, vec![("Alice", 3, 55), ("Bob", 5, 3)]);
    }

    #[test]
    fn on_create_hook_sees_installed_value() {
        let mut world = World::new();
        world.set_create_func::<Tag>(|e| {
            assert_eq!(e.get::<Tag>().name, "X");
        });
        let mut e = world.new_entity();
        e.add(Tag { name: "X" });
    }

    #[test]
    fn on_destroy_hook_fires_once_with_last_value() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut world = World::new();
        world.set_destroy_func::<Tag>(move |e| {
            seen_cb.borrow_mut().push(e.get::<Tag>().name);
        });
        let mut e = world.new_entity();
        e.add(Tag { name: "final" });
        e.destroy();
        assert_eq!(*seen.borrow(), vec!["final"]);
    }

    #[test]
    fn dropping_world_fires_on_destroy_for_still_attached_components() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut world = World::new();
        world.set_destroy_func::<Tag>(move |e| {
            seen_cb.borrow_mut().push(e.get::<Tag>().name);
        });
        let mut a = world.new_entity();
        a.add(Tag { name: "one" });
        let mut b = world.new_entity();
        b.add(Tag { name: "two" });

        // Neither entity is explicitly destroyed — the hook must still fire
        // for both, in dense order, as the World itself tears down.
        drop(world);
        assert_eq!(*seen.borrow(), vec!["one", "two"]);
    }

    #[test]
    fn view_over_unknown_type_is_empty_and_allocates_nothing() {
        let mut world = World::new();
        let mut view = world.try_new_view(&[TypeId::of::<Tag>()]).unwrap();
        assert!(!view.valid());
        assert_eq!(world.pools.len(), 0);
    }

    #[test]
    fn zero_width_view_is_empty_and_does_not_touch_iteration_depth() {
        let mut world = World::new();
        let mut view = world.try_new_view(&[]).unwrap();
        assert!(!view.valid());
        drop(view);
        assert_eq!(world.iteration_depth, 0);
    }

    #[test]
    fn collect_garbage_does_not_shrink_within_slack_factor() {
        // n = 40 fits in the doubled-from-8 capacity of 64; 2n = 80 >= 64,
        // so spec says this must NOT shrink, even though n > 8.
        let mut world = World::new();
        let mut handles = Vec::new();
        for i in 0..40 {
            let mut e = world.new_entity();
            e.add(Transform { x: i, y: i });
            handles.push(e.get_handle());
        }
        world.collect_garbage();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(world.get::<Transform>(h).x, i as i32);
        }
        let idx = world.find_pool(TypeId::of::<Transform>()).unwrap();
        assert_eq!(world.pools[idx].capacity(), 64);
    }

    #[test]
    fn growth_during_iteration_does_not_visit_new_entity() {
        let mut world = World::new();
        for i in 0..4 {
            let mut e = world.new_entity();
            e.add(Transform { x: i, y: i });
        }

        let mut visited = 0;
        {
            let mut view = world.try_new_view(&[TypeId::of::<Transform>()]).unwrap();
            while view.valid() {
                visited += 1;
                view.next();
            }
        }
        assert_eq!(visited, 4);
    }

    #[test]
    fn collect_garbage_shrinks_and_preserves_survivors() {
        let mut world = World::new();
        let mut keep = Vec::new();
        for i in 0..1000 {
            let mut e = world.new_entity();
            e.add(Transform { x: i, y: i });
            if i < 100 {
                keep.push(e.get_handle());
            }
        }
        for i in 100..1000 {
            let h = EntityId::new(i as u32, 0);
            world.destroy(h);
        }
        world.collect_garbage();
        for h in keep {
            assert!(world.has::<Transform>(h));
        }
    }

    #[test]
    #[should_panic]
    fn add_duplicate_component_panics() {
        let mut world = World::new();
        let mut e = world.new_entity();
        e.add(Transform { x: 0, y: 0 });
        e.add(Transform { x: 1, y: 1 });
    }

    #[test]
    #[should_panic]
    fn get_missing_component_panics() {
        let mut world = World::new();
        let e = world.new_entity();
        let _ = world.get::<Transform>(e.get_handle());
    }

    #[test]
    #[should_panic]
    fn operation_on_destroyed_entity_panics() {
        let mut world = World::new();
        let e = world.new_entity();
        let handle = e.get_handle();
        world.destroy(handle);
        world.has::<Transform>(handle);
    }
}
