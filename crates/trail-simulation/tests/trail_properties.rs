//! End-to-end behaviour of baking + trail simulation on the host backend

use approx::assert_relative_eq;
use glam::{Vec3, Vec4};
use std::cell::RefCell;
use std::rc::Rc;
use trail_physics::{texel_xyz, Frame, MeshVertex, TrailTemplate};
use trail_simulation::{
    Backend, CpuBackend, DeformingMesh, FrameOutput, KernelBufferManager, SimulationError, SnapshotSource,
    TrailBuffer, TrailKernel, TrailSettings, TrailSimulationController, TrailState, VertexBakingPipeline,
    trail_program,
};

/// Vertices on a line, translated by `offset`
struct Ribbon {
    base: Vec<Vec3>,
    offset: Vec3,
    vertices: Vec<MeshVertex>,
}

impl Ribbon {
    fn new(count: usize) -> Self {
        let base = (0..count).map(|i| Vec3::new(i as f32 * 0.1, 0.0, 0.0)).collect();
        let mut ribbon = Self {
            base,
            offset: Vec3::ZERO,
            vertices: Vec::new(),
        };
        ribbon.rebuild();
        ribbon
    }

    fn translate(&mut self, delta: Vec3) {
        self.offset += delta;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.vertices = self
            .base
            .iter()
            .map(|p| MeshVertex::new(*p + self.offset, Vec3::Y, Vec4::new(1.0, 0.0, 0.0, 1.0)))
            .collect();
    }
}

impl DeformingMesh for Ribbon {
    fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    fn vertices(&self) -> Option<&[MeshVertex]> {
        Some(&self.vertices)
    }
}

struct Scene {
    backend: CpuBackend,
    source: Rc<RefCell<VertexBakingPipeline<Ribbon>>>,
    trail: TrailSimulationController,
}

impl Scene {
    fn new(vertices: usize, history_length: u32, settings: TrailSettings) -> Self {
        let mut backend = CpuBackend::new();
        let mut pipeline = VertexBakingPipeline::new("ribbon", Ribbon::new(vertices));
        pipeline.activate(&mut backend).unwrap();
        let source = Rc::new(RefCell::new(pipeline));

        let template = TrailTemplate::new(history_length).unwrap();
        let mut trail = TrailSimulationController::new(template, settings).unwrap();
        trail.set_source(&source);
        Self { backend, source, trail }
    }

    /// One frame: bake first, then simulate
    fn frame(&mut self, delta_time: f32) -> Result<Option<FrameOutput>, SimulationError> {
        self.source.borrow_mut().tick(&mut self.backend)?;
        self.trail.tick(&mut self.backend, delta_time)
    }

    fn translate(&mut self, delta: Vec3) {
        self.source.borrow_mut().mesh_mut().translate(delta);
    }
}

#[test]
fn setup_then_release_leaves_no_buffers() {
    let mut backend = CpuBackend::new();
    for (vertices, history) in [(1, 4), (17, 32), (300, 512)] {
        let mut kernels = KernelBufferManager::<TrailBuffer, TrailKernel>::new(trail_program()).unwrap();
        kernels.setup(&mut backend, vertices, history).unwrap();
        assert_eq!(backend.live_buffers(), 6);
        kernels.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_programs(), 0);
    }
}

#[test]
fn trail_waits_for_two_baked_frames() {
    let mut scene = Scene::new(4, 8, TrailSettings::default());
    assert_eq!(scene.frame(1.0 / 60.0).unwrap(), None);
    assert!(!scene.source.borrow().is_ready());
    let output = scene.frame(1.0 / 60.0).unwrap().unwrap();
    assert!(scene.source.borrow().is_ready());
    assert!(output.initialized);
}

#[test]
fn initialization_seeds_from_current_snapshot() {
    let mut scene = Scene::new(5, 8, TrailSettings::default());
    scene.frame(0.1).unwrap();
    scene.translate(Vec3::new(0.0, 2.0, 0.0));
    let output = scene.frame(0.1).unwrap().unwrap();
    assert!(output.initialized);

    let snapshot = scene.source.borrow().snapshot().unwrap();
    let current = scene.backend.read_buffer(snapshot.current_position).unwrap();
    let position = scene.backend.read_buffer(output.position.last).unwrap();
    for y in 0..8 {
        for x in 0..5 {
            assert_eq!(position.get(x, y), current.get(x, 0));
        }
    }

    let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
    assert!(velocity.texels().iter().all(|t| *t == [0.0; 4]));

    let orthnorm = scene.backend.read_buffer(output.orthnorm.last).unwrap();
    assert!(orthnorm.texels().iter().all(|t| *t == Frame::IDENTITY.pack()));
}

#[test]
fn each_tick_swaps_exactly_once() {
    let mut scene = Scene::new(2, 4, TrailSettings::default());
    scene.frame(0.1).unwrap();
    let mut previous = scene.frame(0.1).unwrap().unwrap();
    for _ in 0..5 {
        let output = scene.frame(0.1).unwrap().unwrap();
        assert_eq!(output.position.last, previous.position.working);
        assert_eq!(output.velocity.last, previous.velocity.working);
        assert_eq!(output.orthnorm.last, previous.orthnorm.working);
        previous = output;
    }
}

#[test]
fn head_row_tracks_source_and_history_shifts() {
    let settings = TrailSettings {
        speed_limit: 100.0,
        drag: 0.0,
        ..TrailSettings::default()
    };
    let mut scene = Scene::new(3, 4, settings);
    scene.frame(0.5).unwrap();
    scene.frame(0.5).unwrap();

    scene.translate(Vec3::X);
    let output = scene.frame(0.5).unwrap().unwrap();
    assert!(!output.initialized);

    let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
    // moved 1 unit in 0.5 s
    assert_relative_eq!(texel_xyz(velocity.get(0, 0)).x, 2.0, epsilon = 1e-5);
    assert_eq!(velocity.get(0, 1), [0.0; 4]);

    let position = scene.backend.read_buffer(output.position.last).unwrap();
    assert_relative_eq!(position.get(1, 0)[0], 1.1, epsilon = 1e-5);
    // history row 1 is last frame's head, not yet moved
    assert_relative_eq!(position.get(1, 1)[0], 0.1, epsilon = 1e-5);

    // Next frame the first history row carries the velocity along.
    let output = scene.frame(0.5).unwrap().unwrap();
    let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
    assert_eq!(velocity.get(0, 0), [0.0; 4]);
    assert_relative_eq!(velocity.get(0, 1)[0], 2.0, epsilon = 1e-5);
    let position = scene.backend.read_buffer(output.position.last).unwrap();
    // 1.1 + 2.0 * 1.0 * 0.5
    assert_relative_eq!(position.get(1, 1)[0], 2.1, epsilon = 1e-5);
}

#[test]
fn drag_attenuates_carried_motion() {
    /// Row 2 position and row 2 velocity two frames after a 1 unit move
    fn advected(drag: f32) -> (f32, f32) {
        let settings = TrailSettings {
            speed_limit: 100.0,
            drag,
            ..TrailSettings::default()
        };
        let mut scene = Scene::new(1, 4, settings);
        scene.frame(0.5).unwrap();
        scene.frame(0.5).unwrap();
        scene.translate(Vec3::X);
        scene.frame(0.5).unwrap();
        scene.frame(0.5).unwrap();
        let output = scene.frame(0.5).unwrap().unwrap();
        let position = scene.backend.read_buffer(output.position.last).unwrap();
        let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
        (position.get(0, 2)[0], velocity.get(0, 2)[0])
    }

    // 2 units/s carried for two half-second steps
    let (p, v) = advected(0.0);
    assert_relative_eq!(p, 3.0, epsilon = 1e-5);
    assert_relative_eq!(v, 2.0, epsilon = 1e-5);

    // exp(-2 * 0.5) compounds once per step
    let e = (-1.0f32).exp();
    let (p, v) = advected(2.0);
    assert_relative_eq!(p, 1.0 + e + e * e, epsilon = 1e-5);
    assert_relative_eq!(v, 2.0 * e * e, epsilon = 1e-5);
}

#[test]
fn drag_decay_is_frame_rate_independent() {
    const DRAG: f32 = 5.0;
    const ELAPSED: f32 = 0.5;

    /// Moves one vertex at unit speed for a single frame, then holds it
    /// still and follows the emitted sample for `ELAPSED` seconds.
    fn follow(fps: u32) -> (f32, f32) {
        let dt = 1.0 / fps as f32;
        let settings = TrailSettings {
            speed_limit: 100.0,
            drag: DRAG,
            ..TrailSettings::default()
        };
        let mut scene = Scene::new(1, 128, settings);
        scene.frame(dt).unwrap();
        scene.frame(dt).unwrap();
        scene.translate(Vec3::X * dt);
        scene.frame(dt).unwrap();

        let steps = (ELAPSED * fps as f32).round() as u32;
        let mut output = None;
        for _ in 0..steps {
            output = scene.frame(dt).unwrap();
        }
        let output = output.unwrap();
        let position = scene.backend.read_buffer(output.position.last).unwrap();
        let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
        let row = steps;
        (position.get(0, row)[0] - dt, velocity.get(0, row)[0])
    }

    let continuous_velocity = (-DRAG * ELAPSED).exp();
    let continuous_displacement = (1.0 - continuous_velocity) / DRAG;

    let samples: Vec<(f32, f32)> = [30, 60, 120].into_iter().map(follow).collect();
    for (displacement, velocity) in &samples {
        assert_relative_eq!(*velocity, continuous_velocity, max_relative = 1e-3);
        assert!(
            (displacement - continuous_displacement).abs() < 0.02,
            "displacement {displacement} vs {continuous_displacement}"
        );
    }
    // converging as the step shrinks
    let spread_coarse = (samples[1].0 - samples[0].0).abs();
    let spread_fine = (samples[2].0 - samples[1].0).abs();
    assert!(spread_fine < spread_coarse);
    assert!((samples[2].0 - samples[0].0).abs() < 0.015);
}

#[test]
fn speed_limit_clamps_head_velocity() {
    let settings = TrailSettings {
        speed_limit: 0.25,
        ..TrailSettings::default()
    };
    let mut scene = Scene::new(1, 4, settings);
    scene.frame(0.5).unwrap();
    scene.frame(0.5).unwrap();
    scene.translate(Vec3::new(0.0, 0.0, 10.0));
    let output = scene.frame(0.5).unwrap().unwrap();
    let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
    assert_relative_eq!(texel_xyz(velocity.get(0, 0)).length(), 0.5, epsilon = 1e-5);
}

#[test]
fn orthnorm_head_follows_motion() {
    let mut scene = Scene::new(1, 4, TrailSettings::default());
    scene.frame(0.1).unwrap();
    scene.frame(0.1).unwrap();
    scene.translate(Vec3::Z);
    let output = scene.frame(0.1).unwrap().unwrap();
    let orthnorm = scene.backend.read_buffer(output.orthnorm.last).unwrap();
    let head = Frame::unpack(orthnorm.get(0, 0));
    assert_relative_eq!(head.tangent().dot(Vec3::Z), 1.0, epsilon = 1e-4);
    assert_relative_eq!(head.normal.dot(head.binormal), 0.0, epsilon = 1e-4);
    assert_eq!(orthnorm.get(0, 1), Frame::IDENTITY.pack());
}

#[test]
fn reconfiguration_reinitializes_next_tick() {
    let mut scene = Scene::new(3, 4, TrailSettings::default());
    scene.frame(0.1).unwrap();
    scene.frame(0.1).unwrap();
    let mut output = None;
    for _ in 0..3 {
        scene.translate(Vec3::Y);
        output = scene.frame(0.1).unwrap();
    }
    let before = output.unwrap();
    let velocity = scene.backend.read_buffer(before.velocity.last).unwrap();
    assert!(velocity.texels().iter().any(|t| texel_xyz(*t).length() > 0.0));

    // Frame N: the seed changes while the mesh keeps moving.
    scene.trail.set_random_seed(1234);
    assert_eq!(scene.trail.state(), TrailState::PendingReset);
    scene.translate(Vec3::Y);

    // Frame N + 1 runs the initialization kernels.
    let output = scene.frame(0.1).unwrap().unwrap();
    assert!(output.initialized);
    assert_eq!(output.random_seed, 1234);
    let velocity = scene.backend.read_buffer(output.velocity.last).unwrap();
    assert!(velocity.texels().iter().all(|t| *t == [0.0; 4]));
    assert_eq!(scene.backend.live_buffers(), 4 + 6);
}

#[test]
fn rebinding_source_reinitializes() {
    let mut scene = Scene::new(3, 4, TrailSettings::default());
    scene.frame(0.1).unwrap();
    scene.frame(0.1).unwrap();

    let mut other = VertexBakingPipeline::new("other", Ribbon::new(6));
    other.activate(&mut scene.backend).unwrap();
    other.tick(&mut scene.backend).unwrap();
    other.tick(&mut scene.backend).unwrap();
    let other = Rc::new(RefCell::new(other));

    scene.trail.set_source(&other);
    let output = scene.trail.tick(&mut scene.backend, 0.1).unwrap().unwrap();
    assert!(output.initialized);
    assert_eq!(output.width, 6);
}

#[test]
fn controllers_share_one_source() {
    let mut scene = Scene::new(4, 4, TrailSettings::default());
    let mut second =
        TrailSimulationController::new(TrailTemplate::new(16).unwrap(), TrailSettings::default()).unwrap();
    second.set_source(&scene.source);

    scene.frame(0.1).unwrap();
    scene.frame(0.1).unwrap();
    let output = second.tick(&mut scene.backend, 0.1).unwrap().unwrap();
    assert_eq!(output.history_length, 16);
    assert_eq!(scene.backend.live_buffers(), 4 + 6 + 6);

    second.dispose(&mut scene.backend);
    scene.trail.dispose(&mut scene.backend);
    scene.source.borrow_mut().dispose(&mut scene.backend);
    assert_eq!(scene.backend.live_buffers(), 0);
    assert_eq!(scene.backend.live_programs(), 0);
}

#[test]
fn history_length_eight_gives_4095_lines() {
    let mut scene = Scene::new(2, 8, TrailSettings::default());
    scene.frame(0.1).unwrap();
    let output = scene.frame(0.1).unwrap().unwrap();
    assert_eq!(output.line_count, 4095);
}
