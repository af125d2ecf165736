//! Skinned-mesh trails
//!
//! Drives a procedurally deforming ribbon through vertex baking, the trail
//! simulation and the trail renderer.

use glam::{Quat, Vec3};
use rand::Rng;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use trail_physics::MeshVertex;
use trail_renderer::{Camera, TrailRenderer};
use trail_simulation::{
    DeformingMesh, SimulationError, SkinnerConfig, TrailSimulationController, VertexBakingPipeline, WgpuBackend,
};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

const CONFIG_PATH: &str = "skinner.toml";
const MESH_COLUMNS: usize = 48;
const MESH_ROWS: usize = 6;
const DRAG_STEP: f32 = 0.5;

/// A flag-like sheet that waves while orbiting the origin
struct WavingSheet {
    time: f32,
    vertices: Vec<MeshVertex>,
}

impl WavingSheet {
    fn new() -> Self {
        let mut sheet = Self {
            time: 0.0,
            vertices: Vec::with_capacity(MESH_COLUMNS * MESH_ROWS),
        };
        sheet.advance(0.0);
        sheet
    }

    fn advance(&mut self, delta_time: f32) {
        self.time += delta_time;
        let t = self.time;
        let orbit = Quat::from_rotation_y(t * 0.8);
        let center = Vec3::new(1.2 * (t * 0.8).cos(), 0.3 * (t * 1.7).sin(), 0.0);

        self.vertices.clear();
        for row in 0..MESH_ROWS {
            for column in 0..MESH_COLUMNS {
                let u = column as f32 / (MESH_COLUMNS - 1) as f32;
                let v = row as f32 / (MESH_ROWS - 1) as f32;
                let phase = u * 6.0 - t * 4.0;
                let local = Vec3::new(u * 1.5 - 0.75, v * 0.4 - 0.2, 0.25 * u * phase.sin());
                let slope = 0.25 * (phase.sin() + 6.0 * u * phase.cos()) / 1.5;
                let normal = Vec3::new(-slope, 0.0, 1.0).normalize();
                self.vertices.push(MeshVertex::new(
                    center + orbit * local,
                    orbit * normal,
                    (orbit * Vec3::X).extend(1.0),
                ));
            }
        }
    }
}

impl DeformingMesh for WavingSheet {
    fn vertex_count(&self) -> u32 {
        (MESH_COLUMNS * MESH_ROWS) as u32
    }

    fn vertices(&self) -> Option<&[MeshVertex]> {
        Some(&self.vertices)
    }
}

fn load_config() -> SkinnerConfig {
    let mut config = if Path::new(CONFIG_PATH).exists() {
        match SkinnerConfig::from_toml_file(CONFIG_PATH) {
            Ok(config) => {
                log::info!("✓ Loaded {CONFIG_PATH}");
                config
            }
            Err(e) => {
                log::warn!("Falling back to defaults: {e}");
                SkinnerConfig::default()
            }
        }
    } else {
        SkinnerConfig::default()
    };
    config.apply_env_overrides();
    config
}

struct GpuState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,

    backend: WgpuBackend,
    baking: Rc<RefCell<VertexBakingPipeline<WavingSheet>>>,
    trail: TrailSimulationController,
    renderer: TrailRenderer,
    camera: Camera,

    started: Instant,
    frame_times: VecDeque<f32>,
    last_frame_time: Instant,
}

impl GpuState {
    async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let surface = instance
            .create_surface(window.clone())
            .expect("failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("no suitable GPU adapter");

        log::info!("✓ Using GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .expect("failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let settings = load_config();
        let renderer = TrailRenderer::new(&device, &config);
        let mut backend = WgpuBackend::new(device, queue);

        let mut baking = VertexBakingPipeline::new("waving sheet", WavingSheet::new());
        baking
            .activate(&mut backend)
            .expect("failed to allocate bake buffers");
        let baking = Rc::new(RefCell::new(baking));
        log::info!("✓ Vertex baking initialized");

        let mut trail =
            TrailSimulationController::new(settings.template, settings.trail).expect("invalid trail program");
        trail.set_source(&baking);
        log::info!(
            "✓ Trail simulation: {} lines x {} frames",
            settings.template.line_count(),
            settings.template.history_length()
        );

        Self {
            surface,
            config,
            backend,
            baking,
            trail,
            renderer,
            camera: Camera::new(size.width, size.height),
            started: Instant::now(),
            frame_times: VecDeque::with_capacity(60),
            last_frame_time: Instant::now(),
        }
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(self.backend.device(), &self.config);
            self.renderer.resize(self.backend.device(), &self.config);
            self.camera.resize(new_size.width, new_size.height);
        }
    }

    fn reseed(&mut self) {
        let seed = rand::rng().random::<u32>();
        log::info!("Random seed -> {seed}");
        self.trail.set_random_seed(seed);
    }

    fn adjust_drag(&mut self, delta: f32) {
        let drag = (self.trail.settings().drag + delta).max(0.0);
        self.trail.set_drag(drag);
        log::info!("Drag -> {drag:.2}");
    }

    /// Bake, simulate, draw. Returns the averaged frame time in milliseconds.
    fn render(&mut self) -> Result<f32, RenderError> {
        let now = Instant::now();
        let delta_time = (now - self.last_frame_time).as_secs_f32().min(0.1);
        self.last_frame_time = now;

        self.frame_times.push_back(delta_time * 1000.0);
        if self.frame_times.len() > 60 {
            self.frame_times.pop_front();
        }
        let avg_frame_time = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;

        {
            let mut baking = self.baking.borrow_mut();
            baking.mesh_mut().advance(delta_time);
            baking.tick(&mut self.backend)?;
        }
        let frame = self.trail.tick(&mut self.backend, delta_time)?;

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.renderer.render(
            &self.backend,
            &view,
            &self.camera,
            frame.as_ref(),
            self.started.elapsed().as_secs_f32(),
        )?;

        output.present();
        Ok(avg_frame_time)
    }

    fn dispose(&mut self) {
        self.trail.dispose(&mut self.backend);
        self.baking.borrow_mut().dispose(&mut self.backend);
    }
}

#[derive(Debug)]
enum RenderError {
    Surface(wgpu::SurfaceError),
    Simulation(SimulationError),
}

impl From<wgpu::SurfaceError> for RenderError {
    fn from(e: wgpu::SurfaceError) -> Self {
        Self::Surface(e)
    }
}

impl From<SimulationError> for RenderError {
    fn from(e: SimulationError) -> Self {
        Self::Simulation(e)
    }
}

struct App {
    window: Option<Arc<Window>>,
    gpu_state: Option<GpuState>,
    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window_attributes = Window::default_attributes()
                .with_title("Skinner")
                .with_inner_size(winit::dpi::LogicalSize::new(1600, 900));

            let window = Arc::new(
                event_loop
                    .create_window(window_attributes)
                    .expect("failed to create window"),
            );
            self.window = Some(window.clone());
            self.gpu_state = Some(pollster::block_on(GpuState::new(window)));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.dispose();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(physical_size) => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.resize(physical_size);
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    match key_code {
                        KeyCode::KeyR => gpu_state.reseed(),
                        KeyCode::ArrowUp => gpu_state.adjust_drag(DRAG_STEP),
                        KeyCode::ArrowDown => gpu_state.adjust_drag(-DRAG_STEP),
                        _ => {}
                    }
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left || button == MouseButton::Right {
                    self.mouse_pressed = state == ElementState::Pressed;
                    if !self.mouse_pressed {
                        self.last_mouse_pos = None;
                    }
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let Some(last_pos) = self.last_mouse_pos {
                        let delta_x = (position.x - last_pos.0) as f32;
                        let delta_y = (position.y - last_pos.1) as f32;

                        if let Some(gpu_state) = &mut self.gpu_state {
                            gpu_state.camera.rotate(-delta_x * 0.005, delta_y * 0.005);
                        }
                    }
                    self.last_mouse_pos = Some((position.x, position.y));
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_x, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.01,
                };

                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.camera.zoom(-scroll * gpu_state.camera.distance * 0.1);
                }
            }

            WindowEvent::RedrawRequested => {
                if let (Some(window), Some(gpu_state)) = (&self.window, &mut self.gpu_state) {
                    match gpu_state.render() {
                        Ok(frame_time) => {
                            window.set_title(&format!(
                                "Skinner - {:.0} FPS ({:.2}ms) - drag {:.1}",
                                1000.0 / frame_time.max(0.001),
                                frame_time,
                                gpu_state.trail.settings().drag
                            ));
                        }
                        Err(RenderError::Surface(wgpu::SurfaceError::Lost)) => {
                            gpu_state.resize(window.inner_size())
                        }
                        Err(RenderError::Surface(wgpu::SurfaceError::OutOfMemory)) => event_loop.exit(),
                        Err(RenderError::Surface(e)) => log::error!("Render error: {e:?}"),
                        Err(RenderError::Simulation(e)) => {
                            log::error!("Simulation error: {e}");
                            event_loop.exit();
                        }
                    }
                }
            }

            _ => {}
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() {
    // RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting skinned-mesh trails...");

    let event_loop = EventLoop::new().expect("failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        window: None,
        gpu_state: None,
        mouse_pressed: false,
        last_mouse_pos: None,
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop error: {e}");
    }
}
