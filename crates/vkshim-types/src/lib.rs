//! Owned, driver-independent mirrors of the Vulkan structures the
//! compatibility layer consumes and forwards.
//!
//! Extension chains are closed enums rather than tagged pointer chains, so
//! every possible chain member is matched explicitly and nothing can be
//! dropped without the layer noticing.

pub mod barrier;
pub mod pipeline;
pub mod render;
pub mod submit;
pub mod sync;
