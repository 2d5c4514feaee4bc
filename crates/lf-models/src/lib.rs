//! Model lifecycle: the TTL-evicting cache with per-key load serialisation,
//! the per-family backend contracts, and reasoning-model utilities.

pub mod adapter;
pub mod cache;
pub mod gguf;
pub mod thinking;

pub use adapter::{BackendFactory, LoadSpec, ModelHandle};
pub use cache::{spawn_reaper, ModelCache};
