//! Trail simulation controller
//!
//! Drives the ping-pong kernel set once per frame: the first tick of an
//! allocation seeds Position, Velocity and Orthnorm from the source's current
//! snapshot, later ticks run UpdateVelocity, UpdatePosition and
//! UpdateOrthnorm in that order. Every tick ends with exactly one swap.

use crate::backend::{Backend, BufferHandle};
use crate::baking::{SnapshotPair, SnapshotSource};
use crate::config::TrailSettings;
use crate::error::{NotReadyError, SimulationError, StaleReferenceError};
use crate::kernel_set::KernelBufferManager;
use crate::kernels::{trail_inputs, trail_program, TrailBuffer, TrailKernel};
use crate::params::TrailUniforms;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use trail_physics::{LineWidth, TrailTemplate};

/// Allocation lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailState {
    /// Nothing allocated; the next ready tick allocates and initializes
    Idle,
    /// Initialized; ticks run the update kernels
    Running,
    /// Source or seed changed; the next tick releases and re-initializes
    PendingReset,
}

/// Both slots of a buffer pair after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPair {
    /// Older state, overwritten by the next tick
    pub working: BufferHandle,
    /// Written by this tick
    pub last: BufferHandle,
}

/// Everything the display side needs for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    pub position: SlotPair,
    pub velocity: SlotPair,
    pub orthnorm: SlotPair,
    /// `(max_width, cutoff_speed, speed_to_width / max_width)`
    pub line_width: [f32; 3],
    pub random_seed: u32,
    pub line_count: u32,
    pub history_length: u32,
    /// Columns of every simulation buffer (the source's vertex count)
    pub width: u32,
    /// Ticks simulated since the last (re)initialization, this one included
    pub frame: u64,
    /// Whether this tick ran the initialization kernels
    pub initialized: bool,
}

struct SourceBinding {
    label: String,
    source: Weak<RefCell<dyn SnapshotSource>>,
}

pub struct TrailSimulationController {
    kernels: KernelBufferManager<TrailBuffer, TrailKernel>,
    template: TrailTemplate,
    settings: TrailSettings,
    source: Option<SourceBinding>,
    state: TrailState,
    frame_count: u64,
}

impl TrailSimulationController {
    pub fn new(template: TrailTemplate, settings: TrailSettings) -> Result<Self, SimulationError> {
        let kernels = KernelBufferManager::new(trail_program())?;
        Ok(Self {
            kernels,
            template,
            settings: settings.sanitized(),
            source: None,
            state: TrailState::Idle,
            frame_count: 0,
        })
    }

    pub fn state(&self) -> TrailState {
        self.state
    }

    pub fn template(&self) -> TrailTemplate {
        self.template
    }

    pub fn settings(&self) -> &TrailSettings {
        &self.settings
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn line_width(&self) -> LineWidth {
        self.settings.line_width()
    }

    /// The underlying kernel set, for inspection
    pub fn kernels(&self) -> &KernelBufferManager<TrailBuffer, TrailKernel> {
        &self.kernels
    }

    fn reconfigure(&mut self) {
        if self.kernels.is_allocated() {
            self.state = TrailState::PendingReset;
        }
    }

    /// Bind a baking pipeline. Held weakly; forces a reset.
    pub fn set_source<S: SnapshotSource + 'static>(&mut self, source: &Rc<RefCell<S>>) {
        let label = source
            .try_borrow()
            .map(|s| s.label().to_string())
            .unwrap_or_else(|_| "vertex baking pipeline".to_string());
        let source: Rc<RefCell<dyn SnapshotSource>> = source.clone();
        self.source = Some(SourceBinding {
            label,
            source: Rc::downgrade(&source),
        });
        self.reconfigure();
    }

    pub fn clear_source(&mut self) {
        self.source = None;
        self.reconfigure();
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Forces a reset
    pub fn set_random_seed(&mut self, seed: u32) {
        self.settings.random_seed = seed;
        self.reconfigure();
    }

    /// Changing the history length changes the buffer height; forces a reset.
    pub fn set_template(&mut self, template: TrailTemplate) {
        if template != self.template {
            self.template = template;
            self.reconfigure();
        }
    }

    pub fn set_speed_limit(&mut self, speed_limit: f32) {
        self.settings.speed_limit = speed_limit;
    }

    pub fn set_drag(&mut self, drag: f32) {
        self.settings.drag = drag;
    }

    pub fn set_cutoff_speed(&mut self, cutoff_speed: f32) {
        self.settings.cutoff_speed = cutoff_speed.max(0.0);
    }

    pub fn set_speed_to_width(&mut self, speed_to_width: f32) {
        self.settings.speed_to_width = speed_to_width.max(0.0);
    }

    pub fn set_max_width(&mut self, max_width: f32) {
        self.settings.max_width = max_width.max(0.0);
    }

    /// Replace every setting. Only a seed change forces a reset.
    pub fn apply_settings(&mut self, settings: TrailSettings) {
        let seed_changed = settings.random_seed != self.settings.random_seed;
        self.settings = settings.sanitized();
        if seed_changed {
            self.reconfigure();
        }
    }

    /// Guards: no source bound, a source borrowed elsewhere or a source
    /// warming up skip the tick; a dropped source is an error. Nothing is
    /// mutated when a guard trips.
    fn acquire_snapshot(&self) -> Result<Option<SnapshotPair>, SimulationError> {
        let Some(binding) = &self.source else {
            log::debug!("Trail tick skipped: no source bound");
            return Ok(None);
        };
        let strong = binding
            .source
            .upgrade()
            .ok_or_else(|| StaleReferenceError(binding.label.clone()))?;
        let Ok(source) = strong.try_borrow() else {
            log::debug!("Trail tick skipped: `{}` is mutably borrowed", binding.label);
            return Ok(None);
        };
        let snapshot = source.snapshot();
        match snapshot {
            Ok(pair) => Ok(Some(pair)),
            Err(NotReadyError::WarmingUp { frames }) => {
                log::debug!("Trail tick skipped: `{}` warming up ({frames} frames)", binding.label);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the simulation by one frame.
    ///
    /// Returns `None` when the tick was skipped.
    pub fn tick(&mut self, backend: &mut dyn Backend, delta_time: f32) -> Result<Option<FrameOutput>, SimulationError> {
        let Some(snapshot) = self.acquire_snapshot()? else {
            return Ok(None);
        };

        if self.state == TrailState::PendingReset {
            log::info!("Trail reconfigured, releasing kernel buffers");
            self.kernels.release(backend);
            self.state = TrailState::Idle;
        }

        self.kernels
            .setup(backend, snapshot.vertex_count, self.template.history_length())?;

        let uniforms = TrailUniforms::new(
            delta_time,
            self.settings.speed_limit,
            self.settings.drag,
            self.settings.random_seed,
        );
        self.kernels.set_uniforms(&uniforms);
        self.kernels
            .bind_input(trail_inputs::SOURCE_PREVIOUS, snapshot.previous_position)?;
        self.kernels
            .bind_input(trail_inputs::SOURCE_CURRENT, snapshot.current_position)?;

        let initialized = self.state == TrailState::Idle;
        if initialized {
            self.initialize(backend)?;
            self.state = TrailState::Running;
            self.frame_count = 0;
        } else {
            self.update(backend)?;
        }

        self.kernels.swap_buffers();
        self.frame_count += 1;
        self.output(snapshot.vertex_count, initialized).map(Some)
    }

    fn initialize(&mut self, backend: &mut dyn Backend) -> Result<(), SimulationError> {
        log::info!(
            "Initializing trail: {} columns, history {}",
            self.kernels.dimensions().map_or(0, |(w, _)| w),
            self.template.history_length()
        );
        self.kernels
            .invoke(backend, TrailKernel::InitializePosition, TrailBuffer::Position)?;
        self.kernels
            .invoke(backend, TrailKernel::InitializeVelocity, TrailBuffer::Velocity)?;
        self.kernels
            .invoke(backend, TrailKernel::InitializeOrthnorm, TrailBuffer::Orthnorm)?;
        Ok(())
    }

    fn update(&mut self, backend: &mut dyn Backend) -> Result<(), SimulationError> {
        use trail_inputs::{ORTHNORM, POSITION, VELOCITY};

        let position_last = self.kernels.last_buffer(TrailBuffer::Position)?;
        let velocity_last = self.kernels.last_buffer(TrailBuffer::Velocity)?;
        let orthnorm_last = self.kernels.last_buffer(TrailBuffer::Orthnorm)?;
        let velocity_working = self.kernels.working_buffer(TrailBuffer::Velocity)?;
        let position_working = self.kernels.working_buffer(TrailBuffer::Position)?;

        self.kernels.bind_input(POSITION, position_last)?;
        self.kernels.bind_input(VELOCITY, velocity_last)?;
        self.kernels.bind_input(ORTHNORM, orthnorm_last)?;
        self.kernels
            .invoke(backend, TrailKernel::UpdateVelocity, TrailBuffer::Velocity)?;

        self.kernels.bind_input(VELOCITY, velocity_working)?;
        self.kernels
            .invoke(backend, TrailKernel::UpdatePosition, TrailBuffer::Position)?;

        self.kernels.bind_input(POSITION, position_working)?;
        self.kernels
            .invoke(backend, TrailKernel::UpdateOrthnorm, TrailBuffer::Orthnorm)?;
        Ok(())
    }

    fn pair(&self, buffer: TrailBuffer) -> Result<SlotPair, SimulationError> {
        Ok(SlotPair {
            working: self.kernels.working_buffer(buffer)?,
            last: self.kernels.last_buffer(buffer)?,
        })
    }

    fn output(&self, width: u32, initialized: bool) -> Result<FrameOutput, SimulationError> {
        Ok(FrameOutput {
            position: self.pair(TrailBuffer::Position)?,
            velocity: self.pair(TrailBuffer::Velocity)?,
            orthnorm: self.pair(TrailBuffer::Orthnorm)?,
            line_width: self.settings.line_width().to_vector(),
            random_seed: self.settings.random_seed,
            line_count: self.template.line_count(),
            history_length: self.template.history_length(),
            width,
            frame: self.frame_count,
            initialized,
        })
    }

    /// Release every simulation buffer. The next ready tick starts over.
    pub fn dispose(&mut self, backend: &mut dyn Backend) {
        self.kernels.release(backend);
        self.state = TrailState::Idle;
        self.frame_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baking::{DeformingMesh, VertexBakingPipeline};
    use crate::cpu::CpuBackend;
    use crate::error::ConfigurationError;
    use glam::{Vec3, Vec4};
    use trail_physics::MeshVertex;

    struct Line(Vec<MeshVertex>);

    impl Line {
        fn new(count: usize) -> Self {
            Self(
                (0..count)
                    .map(|i| MeshVertex::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::Y, Vec4::X))
                    .collect(),
            )
        }
    }

    impl DeformingMesh for Line {
        fn vertex_count(&self) -> u32 {
            self.0.len() as u32
        }

        fn vertices(&self) -> Option<&[MeshVertex]> {
            Some(&self.0)
        }
    }

    fn ready_source(backend: &mut CpuBackend) -> Rc<RefCell<VertexBakingPipeline<Line>>> {
        let mut pipeline = VertexBakingPipeline::new("line", Line::new(3));
        pipeline.activate(backend).unwrap();
        pipeline.tick(backend).unwrap();
        pipeline.tick(backend).unwrap();
        Rc::new(RefCell::new(pipeline))
    }

    fn controller() -> TrailSimulationController {
        TrailSimulationController::new(TrailTemplate::new(4).unwrap(), TrailSettings::default()).unwrap()
    }

    #[test]
    fn test_tick_without_source_is_skipped() {
        let mut backend = CpuBackend::new();
        let mut trail = controller();
        assert_eq!(trail.tick(&mut backend, 0.016).unwrap(), None);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(trail.state(), TrailState::Idle);
    }

    #[test]
    fn test_warming_source_is_skipped() {
        let mut backend = CpuBackend::new();
        let mut pipeline = VertexBakingPipeline::new("line", Line::new(3));
        pipeline.activate(&mut backend).unwrap();
        pipeline.tick(&mut backend).unwrap();
        let source = Rc::new(RefCell::new(pipeline));

        let mut trail = controller();
        trail.set_source(&source);
        assert_eq!(trail.tick(&mut backend, 0.016).unwrap(), None);
        assert!(!trail.kernels().is_allocated());
    }

    #[test]
    fn test_borrowed_source_is_skipped() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);

        let guard = source.borrow_mut();
        assert_eq!(trail.tick(&mut backend, 0.016).unwrap(), None);
        assert!(!trail.kernels().is_allocated());
        drop(guard);

        assert!(trail.tick(&mut backend, 0.016).unwrap().unwrap().initialized);
    }

    #[test]
    fn test_dropped_source_is_stale() {
        let mut backend = CpuBackend::new();
        let mut trail = controller();
        {
            let source = ready_source(&mut backend);
            trail.set_source(&source);
        }
        let err = trail.tick(&mut backend, 0.016).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stale reference: vertex baking pipeline was dropped while still bound to `line`"
        );
        assert_eq!(trail.state(), TrailState::Idle);
    }

    #[test]
    fn test_first_tick_initializes_then_updates() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);

        let first = trail.tick(&mut backend, 0.016).unwrap().unwrap();
        assert!(first.initialized);
        assert_eq!(trail.state(), TrailState::Running);
        assert_eq!(first.frame, 1);
        assert_eq!(first.width, 3);
        assert_eq!(first.history_length, 4);

        let second = trail.tick(&mut backend, 0.016).unwrap().unwrap();
        assert!(!second.initialized);
        assert_eq!(second.frame, 2);
        assert_eq!(second.position.last, first.position.working);
        assert_eq!(second.position.working, first.position.last);
    }

    #[test]
    fn test_settings_apply_in_place() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        trail.tick(&mut backend, 0.016).unwrap();

        trail.set_drag(0.0);
        trail.set_speed_limit(1.0);
        trail.set_max_width(-3.0);
        trail.set_cutoff_speed(-1.0);
        trail.set_speed_to_width(-1.0);
        assert_eq!(trail.state(), TrailState::Running);
        assert_eq!(trail.settings().max_width, 0.0);
        assert_eq!(trail.settings().cutoff_speed, 0.0);
        assert_eq!(trail.settings().speed_to_width, 0.0);

        let output = trail.tick(&mut backend, 0.016).unwrap().unwrap();
        assert!(!output.initialized);
        assert_eq!(output.line_width, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_seed_change_forces_reset() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        trail.tick(&mut backend, 0.016).unwrap();
        trail.tick(&mut backend, 0.016).unwrap();

        trail.set_random_seed(9);
        assert_eq!(trail.state(), TrailState::PendingReset);
        let output = trail.tick(&mut backend, 0.016).unwrap().unwrap();
        assert!(output.initialized);
        assert_eq!(output.random_seed, 9);
        assert_eq!(output.frame, 1);
        assert_eq!(backend.live_buffers(), 4 + 6);
    }

    #[test]
    fn test_apply_settings_resets_only_on_seed_change() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        trail.tick(&mut backend, 0.016).unwrap();

        let mut settings = *trail.settings();
        settings.drag = 1.0;
        trail.apply_settings(settings);
        assert_eq!(trail.state(), TrailState::Running);

        settings.random_seed = 3;
        trail.apply_settings(settings);
        assert_eq!(trail.state(), TrailState::PendingReset);
    }

    #[test]
    fn test_template_change_reallocates() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        trail.tick(&mut backend, 0.016).unwrap();
        assert_eq!(trail.kernels().dimensions(), Some((3, 4)));

        trail.set_template(TrailTemplate::new(8).unwrap());
        let output = trail.tick(&mut backend, 0.016).unwrap().unwrap();
        assert!(output.initialized);
        assert_eq!(trail.kernels().dimensions(), Some((3, 8)));
        assert_eq!(output.line_count, 4095);
    }

    #[test]
    fn test_disposed_source_is_an_error() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        source.borrow_mut().dispose(&mut backend);
        let err = trail.tick(&mut backend, 0.016).unwrap_err();
        assert!(matches!(err, SimulationError::NotReady(NotReadyError::Disposed)));
    }

    #[test]
    fn test_dispose_releases_everything() {
        let mut backend = CpuBackend::new();
        let source = ready_source(&mut backend);
        let mut trail = controller();
        trail.set_source(&source);
        trail.tick(&mut backend, 0.016).unwrap();
        trail.dispose(&mut backend);
        trail.dispose(&mut backend);
        assert_eq!(trail.state(), TrailState::Idle);
        // only the baking buffers remain
        assert_eq!(backend.live_buffers(), 4);
        assert_eq!(backend.live_programs(), 1);
    }

    #[test]
    fn test_program_mismatch_is_reported() {
        let err = KernelBufferManager::<TrailBuffer, TrailKernel>::new(crate::kernels::bake_program()).unwrap_err();
        assert!(matches!(err, ConfigurationError::ProgramMismatch { expected: 6, found: 1, .. }));
    }
}
