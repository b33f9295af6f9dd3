//! Error taxonomy for programmer-error contract violations (spec §7).
//!
//! Every variant here corresponds to a fatal condition: the registry has no
//! recoverable path for any of these, so the normal surface is a panic whose
//! message is this type's `Display` impl (via `thiserror`, matching the
//! teacher's `cobalt_core::graphics`/`cobalt_assets::manifest` error enums).
//! The one exception is view construction, where [`World::try_new_view`]
//! hands the [`EcsError::TooManyComponents`] case back as a `Result` instead
//! of panicking, since a caller building a view from a dynamically sized
//! type list may reasonably want to check first.

use std::any::TypeId;

use crate::world::View;

#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    #[error("operation attempted on an invalid entity")]
    InvalidEntity,

    #[error("entity already has a component of type {0:?}")]
    DuplicateComponent(TypeId),

    #[error("entity does not have a component of type {0:?}")]
    MissingComponent(TypeId),

    #[error("deferred free queue overflowed (more than {0} pending frees)")]
    DeferredQueueOverflow(usize),

    #[error("view requested over {0} component types, the hard cap is {max}", max = View::MAX_COMPONENTS)]
    TooManyComponents(usize),
}
