//! Frame driver: fixed-rate simulation steps plus per-frame variable and
//! render steps.
//!
//! Each call to [`StepLoop::frame`]:
//!
//! 1. Adds the frame's wall-clock time to an accumulator and runs
//!    `FixedUpdate` steps of `fixed_dt` while a whole step is available, up
//!    to `max_steps_per_frame`. Time the budget could not cover is dropped.
//! 2. Runs one `VariableUpdate` step with the frame time.
//! 3. Runs one `Render` step with the frame time.
//!
//! Every step reconciles the world once after its systems, so entities
//! created by a fixed step are visible to the render step of the same frame.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_engine::prelude::*;
//!
//! let registry = Arc::new(ComponentRegistry::new());
//! let config = EngineConfig { fixed_dt: 0.5, ..Default::default() };
//! let mut step_loop = StepLoop::from_registry(registry, config);
//!
//! step_loop.frame(0.75);
//! assert_eq!(step_loop.fixed_step_count(), 1);
//! assert_eq!(step_loop.interpolation(), 0.5);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_ecs::component::ComponentRegistry;
use kestrel_ecs::system::{StepDiagnostics, System, Timeline};
use kestrel_ecs::world::World;
use kestrel_ecs::EcsError;

use crate::config::EngineConfig;

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// What the last frame ran and how long it took.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// One entry per fixed step run this frame.
    pub fixed: Vec<StepDiagnostics>,
    pub variable: StepDiagnostics,
    pub render: StepDiagnostics,
    /// Simulation time discarded because the step budget ran out.
    pub dropped_time: f64,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// StepLoop
// ---------------------------------------------------------------------------

/// Owns a [`World`] and advances it frame by frame.
///
/// Simulation time is `fixed_step_count * fixed_dt`, computed by
/// multiplication so it does not drift from repeated addition.
pub struct StepLoop {
    world: World,
    config: EngineConfig,
    accumulator: f64,
    fixed_steps: u64,
    frames: u64,
    last_frame: FrameDiagnostics,
}

impl StepLoop {
    /// Wrap an existing world.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite, or if
    /// `config.max_steps_per_frame` is zero.
    pub fn new(world: World, config: EngineConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        assert!(
            config.max_steps_per_frame > 0,
            "max_steps_per_frame must be at least 1"
        );
        Self {
            world,
            config,
            accumulator: 0.0,
            fixed_steps: 0,
            frames: 0,
            last_frame: FrameDiagnostics::default(),
        }
    }

    /// Build a world from `registry` and `config.world`, then wrap it.
    pub fn from_registry(registry: Arc<ComponentRegistry>, config: EngineConfig) -> Self {
        let world = World::with_config(registry, config.world.clone());
        Self::new(world, config)
    }

    /// Register a system on the owned world.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system<S>(&mut self, timeline: Timeline, name: &str, system: S) -> Result<(), EcsError>
    where
        S: System + 'static,
    {
        self.world.add_system(timeline, name, system)
    }

    /// Advance by `frame_dt` seconds of wall-clock time.
    ///
    /// # Panics
    ///
    /// Panics if `frame_dt` is negative or not finite.
    pub fn frame(&mut self, frame_dt: f64) -> &FrameDiagnostics {
        assert!(
            frame_dt >= 0.0 && frame_dt.is_finite(),
            "frame_dt must be non-negative and finite, got {frame_dt}"
        );
        let frame_start = Instant::now();
        let fixed_dt = self.config.fixed_dt;

        self.accumulator += frame_dt;
        let mut fixed = Vec::new();
        while self.accumulator >= fixed_dt && fixed.len() < self.config.max_steps_per_frame as usize {
            fixed.push(self.world.step(Timeline::FixedUpdate, fixed_dt));
            self.accumulator -= fixed_dt;
            self.fixed_steps += 1;
        }

        let mut dropped_time = 0.0;
        if self.accumulator >= fixed_dt {
            dropped_time = (self.accumulator / fixed_dt).floor() * fixed_dt;
            self.accumulator -= dropped_time;
            tracing::warn!(
                frame = self.frames,
                dropped_time,
                budget = self.config.max_steps_per_frame,
                "fixed step budget exhausted, dropping simulation time"
            );
        }

        let variable = self.world.step(Timeline::VariableUpdate, frame_dt);
        let render = self.world.step(Timeline::Render, frame_dt);
        self.frames += 1;

        self.last_frame = FrameDiagnostics {
            fixed,
            variable,
            render,
            dropped_time,
            total_time: frame_start.elapsed(),
        };
        tracing::debug!(
            frame = self.frames - 1,
            fixed_steps = self.last_frame.fixed.len(),
            total_us = self.last_frame.total_time.as_micros() as u64,
            "frame complete"
        );
        &self.last_frame
    }

    /// Run `count` fixed steps directly, bypassing the accumulator.
    pub fn run_fixed_steps(&mut self, count: u64) {
        for _ in 0..count {
            self.world.step(Timeline::FixedUpdate, self.config.fixed_dt);
            self.fixed_steps += 1;
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn fixed_step_count(&self) -> u64 {
        self.fixed_steps
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Simulation time in seconds.
    pub fn sim_time(&self) -> f64 {
        self.fixed_steps as f64 * self.config.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.config.fixed_dt
    }

    /// Fraction of a fixed step left in the accumulator, in `[0, 1)`. Render
    /// systems use it to interpolate between the last two fixed states.
    pub fn interpolation(&self) -> f64 {
        self.accumulator / self.config.fixed_dt
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world for setup and tests.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn into_world(self) -> World {
        self.world
    }

    pub fn last_frame(&self) -> &FrameDiagnostics {
        &self.last_frame
    }
}

impl std::fmt::Debug for StepLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepLoop")
            .field("fixed_steps", &self.fixed_steps)
            .field("frames", &self.frames)
            .field("accumulator", &self.accumulator)
            .field("world", &self.world)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use kestrel_ecs::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter(u64);

    fn config(fixed_dt: f64) -> EngineConfig {
        EngineConfig {
            fixed_dt,
            ..Default::default()
        }
    }

    fn step_loop(fixed_dt: f64) -> StepLoop {
        let mut registry = ComponentRegistry::new();
        registry.register::<Counter>("counter");
        StepLoop::from_registry(Arc::new(registry), config(fixed_dt))
    }

    // -- construction -------------------------------------------------------

    #[test]
    fn new_loop_starts_at_zero() {
        let step_loop = step_loop(0.5);
        assert_eq!(step_loop.fixed_step_count(), 0);
        assert_eq!(step_loop.frame_count(), 0);
        assert_eq!(step_loop.sim_time(), 0.0);
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let _ = step_loop(0.0);
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn infinity_dt_panics() {
        let _ = step_loop(f64::INFINITY);
    }

    #[test]
    #[should_panic(expected = "frame_dt must be non-negative")]
    fn negative_frame_panics() {
        step_loop(0.5).frame(-1.0);
    }

    // -- accumulation -------------------------------------------------------

    #[test]
    fn accumulator_carries_partial_steps() {
        let mut step_loop = step_loop(0.25);
        assert_eq!(step_loop.frame(0.125).fixed.len(), 0);
        assert_eq!(step_loop.frame(0.125).fixed.len(), 1);
        assert_eq!(step_loop.frame(0.625).fixed.len(), 2);
        assert_eq!(step_loop.fixed_step_count(), 3);
        assert_eq!(step_loop.sim_time(), 0.75);
        assert_eq!(step_loop.interpolation(), 0.5);
        assert_eq!(step_loop.frame_count(), 3);
    }

    #[test]
    fn step_budget_drops_excess_time() {
        let mut step_loop = step_loop(0.25);
        let frame = step_loop.frame(10.0 + 0.125);
        assert_eq!(frame.fixed.len(), 5);
        assert_eq!(frame.dropped_time, 10.0 - 1.25);
        assert_eq!(step_loop.interpolation(), 0.5);
    }

    #[test]
    fn frame_runs_fixed_then_variable_then_render() {
        let mut step_loop = step_loop(0.5);
        let order = Arc::new(Mutex::new(Vec::new()));
        for (timeline, name) in [
            (Timeline::Render, "draw"),
            (Timeline::VariableUpdate, "animate"),
            (Timeline::FixedUpdate, "simulate"),
        ] {
            let order = Arc::clone(&order);
            step_loop
                .add_system(timeline, name, move |ctx: &mut StepContext<'_>| {
                    order.lock().unwrap().push((ctx.timeline(), ctx.dt()));
                })
                .unwrap();
        }

        step_loop.frame(1.0);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                (Timeline::FixedUpdate, 0.5),
                (Timeline::FixedUpdate, 0.5),
                (Timeline::VariableUpdate, 1.0),
                (Timeline::Render, 1.0),
            ]
        );
    }

    #[test]
    fn entities_spawned_in_fixed_step_are_visible_to_render() {
        let mut step_loop = step_loop(0.5);
        let query = FamilyQuery::builder(step_loop.world().registry())
            .require::<Counter>()
            .build()
            .unwrap();
        let counters = step_loop.world_mut().bind_family(query);

        step_loop
            .add_system(Timeline::FixedUpdate, "spawn", |ctx: &mut StepContext<'_>| {
                ctx.create_entity().add_component(Counter(0)).unwrap();
            })
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        step_loop
            .add_system(Timeline::Render, "count", move |ctx: &mut StepContext<'_>| {
                sink.lock().unwrap().push(ctx.family(&counters).len());
            })
            .unwrap();

        step_loop.frame(0.5);
        step_loop.frame(1.0);
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn run_fixed_steps_skips_frame_timelines() {
        let mut step_loop = step_loop(0.1);
        let renders = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&renders);
        step_loop
            .add_system(Timeline::Render, "draw", move |_: &mut StepContext<'_>| {
                *sink.lock().unwrap() += 1;
            })
            .unwrap();
        step_loop.run_fixed_steps(10);
        assert_eq!(step_loop.fixed_step_count(), 10);
        assert_eq!(step_loop.world().step_count(), 10);
        assert_eq!(*renders.lock().unwrap(), 0);
        assert!((step_loop.sim_time() - 1.0).abs() < 1e-12);
    }
}
