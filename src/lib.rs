//! A lightweight, single-threaded entity-component-system core: versioned
//! entity handles over a recycling identity table, per-component sparse-set
//! storage, and a view iterator that tolerates storage growth mid-walk via
//! deferred deallocation.
//!
//! ```
//! use shard_ecs::World;
//!
//! struct Position { x: f32, y: f32 }
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let mut e = world.new_entity();
//! e.add(Position { x: 0.0, y: 0.0 });
//! e.add(Velocity { dx: 1.0, dy: 0.0 });
//!
//! let mut view = world.new_view(&[
//!     std::any::TypeId::of::<Position>(),
//!     std::any::TypeId::of::<Velocity>(),
//! ]);
//! while view.valid() {
//!     let _pos = view.get::<Position>();
//!     view.next();
//! }
//! ```

mod component;
mod entity;
mod error;
mod pool;
mod tests;
mod world;

pub use component::Component;
pub use entity::{Entity, EntityId, NULL_HANDLE, NULL_SLOT};
pub use error::EcsError;
pub use world::{World, View, MAX_DEFERRED_FREES, MAX_VIEW_COMPONENTS};
