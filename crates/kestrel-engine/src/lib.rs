//! Kestrel Engine -- frame driver around the Kestrel ECS world.
//!
//! This crate builds on [`kestrel_ecs`] to provide what a host application
//! needs to run a world: a [`StepLoop`](step::StepLoop) that turns wall-clock
//! frame time into fixed-rate simulation steps followed by one variable and
//! one render step, JSON engine configuration, and `tracing` subscriber setup.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_engine::prelude::*;
//!
//! let mut registry = ComponentRegistry::new();
//! registry.register::<u32>("score");
//!
//! let config = EngineConfig { fixed_dt: 0.25, ..Default::default() };
//! let mut step_loop = StepLoop::from_registry(Arc::new(registry), config);
//!
//! step_loop
//!     .add_system(Timeline::FixedUpdate, "example", |_ctx: &mut StepContext<'_>| {
//!         // game logic here
//!     })
//!     .unwrap();
//!
//! step_loop.frame(1.0);
//! assert_eq!(step_loop.fixed_step_count(), 4);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod logging;
pub mod step;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use kestrel_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use kestrel_ecs::prelude::*;

    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::logging::init_logging;
    pub use crate::step::{FrameDiagnostics, StepLoop};
}
