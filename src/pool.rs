//! Per-component sparse-set storage.
//!
//! Grounded on `cobalt_core::ecs::storage::ComponentStorage`: a hand-rolled
//! byte buffer (`std::alloc`, not `Vec<T>`, because the pool is generic over
//! an opaque `T` chosen at the call site, not known to the `Pool` type
//! itself) paired with a sparse index array. Unlike the teacher's storage,
//! which recycles dead slots via a free list and never compacts, this pool
//! follows spec §3/§4.2 literally: removal is a swap-and-pop, so `dense` and
//! `data` stay contiguous (P1–P5) and iteration never walks a hole.

use std::any::TypeId;
use std::fmt;

use crate::entity::{Entity, EntityId};
use crate::error::EcsError;

/// A growable byte buffer that owns its allocation and frees it on `Drop`.
///
/// Pool growth moves an instance of this into the world's deferred-free
/// queue instead of dropping it immediately when a view is mid-iteration
/// (spec §5) — the queue just holds a `Vec<RawBuffer>` and lets normal
/// `Drop` do the deallocation once it's safe.
pub(crate) struct RawBuffer {
    ptr: std::ptr::NonNull<u8>,
    bytes: usize,
}

impl RawBuffer {
    fn dangling() -> Self {
        Self {
            ptr: std::ptr::NonNull::dangling(),
            bytes: 0,
        }
    }

    fn alloc(bytes: usize) -> Self {
        if bytes == 0 {
            return Self::dangling();
        }
        unsafe {
            let layout = std::alloc::Layout::array::<u8>(bytes).unwrap();
            let ptr = std::alloc::alloc(layout);
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Self {
                ptr: std::ptr::NonNull::new_unchecked(ptr),
                bytes,
            }
        }
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.bytes == 0 {
            return;
        }
        unsafe {
            let layout = std::alloc::Layout::array::<u8>(self.bytes).unwrap();
            std::alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

pub(crate) type Hook = Box<dyn FnMut(Entity)>;

/// One component type's sparse set: `sparse[slot] -> dense index`, plus the
/// packed `dense`/`data` arrays those indices point into.
pub(crate) struct Pool {
    /// Indexed by entity slot. `-1` means the entity has no component here.
    sparse: Vec<i64>,
    /// Packed array of owning entities, parallel to `data`.
    dense: Vec<EntityId>,
    data: RawBuffer,
    len: usize,
    element_size: usize,
    pub(crate) type_id: TypeId,
    type_name: &'static str,
    drop_fn: Box<dyn FnMut(*mut u8)>,
    on_create: Option<Hook>,
    on_destroy: Option<Hook>,
    /// Set for the duration of a create/destroy hook callback so a reentrant
    /// structural call into *this same pool* can be rejected (spec §6: "the
    /// caveat that mutating the same pool from its own hook is disallowed").
    in_hook: bool,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("type_name", &self.type_name)
            .field("len", &self.len)
            .finish()
    }
}

impl Pool {
    pub(crate) fn new<T: 'static>(entity_capacity: usize) -> Self {
        Self {
            sparse: vec![-1; entity_capacity],
            dense: Vec::new(),
            data: RawBuffer::dangling(),
            len: 0,
            element_size: std::mem::size_of::<T>(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            drop_fn: Box::new(|ptr: *mut u8| unsafe { std::ptr::drop_in_place(ptr as *mut T) }),
            on_create: None,
            on_destroy: None,
            in_hook: false,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Growth to keep `sparse` able to index any live slot (spec §4.2: grows
    /// to exactly `slot+1`, no doubling — callers only ask when they must).
    pub(crate) fn ensure_slot_capacity(&mut self, slot: u32) {
        let needed = slot as usize + 1;
        if self.sparse.len() < needed {
            self.sparse.resize(needed, -1);
        }
    }

    #[inline]
    pub(crate) fn has(&self, slot: u32) -> bool {
        (slot as usize) < self.sparse.len() && self.sparse[slot as usize] >= 0
    }

    fn dense_index(&self, slot: u32) -> usize {
        self.sparse[slot as usize] as usize
    }

    /// Reserves a dense slot for `entity` and returns a pointer to the
    /// uninitialized payload byte range. The caller must `ptr::write` a
    /// valid `T` there before anything else touches the pool.
    ///
    /// Any reallocation of the payload buffer that happens while `iterating`
    /// is true moves the old buffer onto `deferred` rather than dropping it,
    /// per spec §4.2/§5.
    pub(crate) fn reserve_slot(
        &mut self,
        entity: EntityId,
        element_size: usize,
        deferred: &mut Vec<RawBuffer>,
        max_deferred: usize,
        iterating: bool,
    ) -> *mut u8 {
        debug_assert!(!self.in_hook, "cannot add to pool {} from its own hook", self.type_name);
        self.ensure_slot_capacity(entity.slot());

        let index = self.len;
        let needed_bytes = (index + 1) * element_size;
        if needed_bytes > self.data.bytes && element_size > 0 {
            let mut new_cap = if self.data.bytes == 0 { 8 * element_size } else { self.data.bytes * 2 };
            while new_cap < needed_bytes {
                new_cap *= 2;
            }
            let mut new_buf = RawBuffer::alloc(new_cap);
            unsafe {
                std::ptr::copy_nonoverlapping(self.data.as_ptr(), new_buf.as_ptr(), self.len * element_size);
            }
            std::mem::swap(&mut self.data, &mut new_buf);
            if iterating {
                assert!(
                    deferred.len() < max_deferred,
                    "{}",
                    EcsError::DeferredQueueOverflow(max_deferred)
                );
                log::trace!("pool {}: deferring free of old {}-byte buffer (view active)", self.type_name, new_buf.bytes);
                deferred.push(new_buf);
            } else {
                log::trace!("pool {}: freeing old {}-byte buffer immediately", self.type_name, new_buf.bytes);
                drop(new_buf);
            }
        }

        self.sparse[entity.slot() as usize] = index as i64;
        self.dense.push(entity);
        self.len += 1;

        if element_size == 0 {
            self.data.as_ptr()
        } else {
            unsafe { self.data.as_ptr().add(index * element_size) }
        }
    }

    /// Takes the `on_create` hook out, invoking it with no pool borrow held
    /// (the hook may freely call back into the `World`, including into this
    /// same type's pool — the reentrancy guard below is what stops that from
    /// corrupting state mid-update, not a Rust borrow).
    pub(crate) fn fire_on_create(&mut self, entity: Entity) {
        let mut hook = match self.on_create.take() {
            Some(h) => h,
            None => return,
        };
        assert!(!self.in_hook, "cannot mutate pool {} from its own on_create hook", self.type_name);
        self.in_hook = true;
        hook(entity);
        self.in_hook = false;
        self.on_create = Some(hook);
    }

    pub(crate) fn fire_on_destroy(&mut self, entity: Entity) {
        let mut hook = match self.on_destroy.take() {
            Some(h) => h,
            None => return,
        };
        assert!(!self.in_hook, "cannot mutate pool {} from its own on_destroy hook", self.type_name);
        self.in_hook = true;
        hook(entity);
        self.in_hook = false;
        self.on_destroy = Some(hook);
    }

    pub(crate) fn set_on_create(&mut self, hook: Hook) {
        self.on_create = Some(hook);
    }

    pub(crate) fn set_on_destroy(&mut self, hook: Hook) {
        self.on_destroy = Some(hook);
    }

    /// # Safety
    /// `T` must be the type this pool was created for, and `slot` must be
    /// present (`has(slot)`).
    pub(crate) unsafe fn get<T>(&self, slot: u32) -> &T {
        if self.element_size == 0 {
            return &*(self.data.as_ptr() as *const T);
        }
        let index = self.dense_index(slot);
        &*(self.data.as_ptr().add(index * self.element_size) as *const T)
    }

    /// # Safety
    /// Same preconditions as [`Pool::get`].
    pub(crate) unsafe fn get_mut<T>(&mut self, slot: u32) -> &mut T {
        if self.element_size == 0 {
            return &mut *(self.data.as_ptr() as *mut T);
        }
        let index = self.dense_index(slot);
        &mut *(self.data.as_ptr().add(index * self.element_size) as *mut T)
    }

    /// Swap-and-pop removal (spec §4.2). `on_destroy` has already fired by
    /// the time this runs — callers invoke [`Pool::fire_on_destroy`] first.
    pub(crate) fn remove(&mut self, slot: u32) {
        debug_assert!(!self.in_hook, "cannot remove from pool {} from its own hook", self.type_name);
        let pos = self.dense_index(slot);
        let last = self.len - 1;

        let drop_ptr = if self.element_size == 0 {
            self.data.as_ptr()
        } else {
            unsafe { self.data.as_ptr().add(pos * self.element_size) }
        };
        self.drop_fn.as_mut()(drop_ptr);

        if self.element_size > 0 && pos != last {
            // Open question in spec §9: the original memmoves
            // unconditionally; skipping the copy when `pos == last` is
            // observably identical and avoids the self-overlap case.
            unsafe {
                let src = self.data.as_ptr().add(last * self.element_size);
                let dst = self.data.as_ptr().add(pos * self.element_size);
                std::ptr::copy_nonoverlapping(src, dst, self.element_size);
            }
        }

        if pos != last {
            let moved_entity = self.dense[last];
            self.dense[pos] = moved_entity;
            self.sparse[moved_entity.slot() as usize] = pos as i64;
        }
        self.dense.pop();
        self.sparse[slot as usize] = -1;
        self.len -= 1;
    }

    /// Dense entity at position `i` (used by [`crate::View`]).
    #[inline]
    pub(crate) fn dense_entity(&self, i: usize) -> EntityId {
        self.dense[i]
    }

    /// Whether an `on_destroy` hook is registered for this component type.
    #[inline]
    pub(crate) fn has_on_destroy(&self) -> bool {
        self.on_destroy.is_some()
    }

    /// Currently allocated element capacity of the payload buffer
    /// (`data.bytes / element_size`). Zero for zero-sized components, which
    /// never allocate a payload buffer in the first place.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.data.bytes / self.element_size
        }
    }

    /// Copies the live prefix into a freshly sized buffer, per spec §9's
    /// second open question (the original copies `capacity` bytes after
    /// shrinking, which silently drops live data when `capacity` shrinks
    /// below `n * element_size`; copying `n * element_size` is correct).
    pub(crate) fn shrink_to(&mut self, new_capacity_elems: usize) {
        if self.element_size == 0 {
            return;
        }
        let new_bytes = new_capacity_elems * self.element_size;
        if new_bytes >= self.data.bytes {
            return;
        }
        let mut new_buf = RawBuffer::alloc(new_bytes);
        let live_bytes = self.len * self.element_size;
        unsafe {
            std::ptr::copy_nonoverlapping(self.data.as_ptr(), new_buf.as_ptr(), live_bytes);
        }
        self.data = new_buf;
    }
}

/// Runs each remaining element's Rust destructor, then frees `sparse`/
/// `dense`/`data` via their own `Drop` impls. Spec §4.2's teardown hook
/// firing ("if `on_destroy` is set, fire it for each remaining entity in
/// dense order") happens one level up, in [`crate::World`]'s own `Drop`
/// impl, since firing a hook needs a `*mut World` to build the `Entity`
/// argument and a `Pool` doesn't hold one.
impl Drop for Pool {
    fn drop(&mut self) {
        for i in 0..self.len {
            let ptr = if self.element_size == 0 {
                self.data.as_ptr()
            } else {
                unsafe { self.data.as_ptr().add(i * self.element_size) }
            };
            self.drop_fn.as_mut()(ptr);
        }
    }
}
