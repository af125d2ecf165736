//! Vertex baking pipeline
//!
//! Captures the deformed attributes of a mesh into texel buffers once per
//! frame. Two position buffers alternate so the previous frame's positions
//! stay readable next to the current ones; normal and tangent are only kept
//! for the current frame.

use crate::backend::{AttributeTargets, Backend, BufferDescriptor, BufferHandle, ProgramHandle};
use crate::error::{ConfigurationError, NotReadyError, SimulationError};
use crate::kernels::bake_program;
use trail_physics::MeshVertex;

/// A mesh whose vertices move every frame
pub trait DeformingMesh {
    /// Fixed for the lifetime of the pipeline
    fn vertex_count(&self) -> u32;

    /// Deformed vertices of the current frame, `None` when the attribute
    /// source is gone. Vertex `i` is baked into column `i`.
    fn vertices(&self) -> Option<&[MeshVertex]>;
}

/// Hook around the capture pass: the mesh is made visible to the capture
/// only, and hidden from regular views afterwards.
pub trait CaptureVisibility {
    fn show_for_capture(&mut self);
    fn hide_from_views(&mut self);
}

/// Visibility hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVisibility;

impl CaptureVisibility for NoVisibility {
    fn show_for_capture(&mut self) {}
    fn hide_from_views(&mut self) {}
}

/// Current and previous attribute snapshots, all `vertex_count × 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPair {
    pub current_position: BufferHandle,
    pub previous_position: BufferHandle,
    pub normal: BufferHandle,
    pub tangent: BufferHandle,
    pub vertex_count: u32,
}

/// Read side of a baking pipeline, as seen by trail controllers
pub trait SnapshotSource {
    fn label(&self) -> &str;
    fn vertex_count(&self) -> u32;
    fn is_ready(&self) -> bool;
    fn snapshot(&self) -> Result<SnapshotPair, NotReadyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeState {
    Uninitialized,
    /// Fewer than two frames baked; the previous snapshot is not valid yet
    WarmingUp,
    Ready,
    Disposed,
}

#[derive(Debug)]
struct BakeResources {
    positions: [BufferHandle; 2],
    normal: BufferHandle,
    tangent: BufferHandle,
    program: ProgramHandle,
}

#[derive(Debug)]
enum Lifecycle {
    Uninitialized,
    Active(BakeResources),
    Disposed,
}

pub struct VertexBakingPipeline<M: DeformingMesh> {
    label: String,
    mesh: M,
    visibility: Box<dyn CaptureVisibility>,
    lifecycle: Lifecycle,
    vertex_count: u32,
    swap: bool,
    frame_count: u64,
}

fn validate<M: DeformingMesh>(mesh: &M, expected: Option<u32>) -> Result<&[MeshVertex], ConfigurationError> {
    let count = mesh.vertex_count();
    if let Some(expected) = expected {
        if count != expected {
            return Err(ConfigurationError::VertexCountChanged { expected, found: count });
        }
    }
    if count == 0 {
        return Err(ConfigurationError::ZeroVertices);
    }
    let vertices = mesh.vertices().ok_or(ConfigurationError::MissingAttributes)?;
    if vertices.len() != count as usize {
        return Err(ConfigurationError::VertexCountChanged {
            expected: count,
            found: vertices.len() as u32,
        });
    }
    Ok(vertices)
}

impl<M: DeformingMesh> VertexBakingPipeline<M> {
    pub fn new(label: impl Into<String>, mesh: M) -> Self {
        Self {
            label: label.into(),
            mesh,
            visibility: Box::new(NoVisibility),
            lifecycle: Lifecycle::Uninitialized,
            vertex_count: 0,
            swap: false,
            frame_count: 0,
        }
    }

    pub fn with_visibility(mut self, visibility: impl CaptureVisibility + 'static) -> Self {
        self.visibility = Box::new(visibility);
        self
    }

    /// Validate the mesh and allocate the snapshot buffers and the
    /// extraction program. No-op when already active.
    pub fn activate(&mut self, backend: &mut dyn Backend) -> Result<(), SimulationError> {
        match self.lifecycle {
            Lifecycle::Active(_) => return Ok(()),
            Lifecycle::Disposed => return Err(NotReadyError::Disposed.into()),
            Lifecycle::Uninitialized => {}
        }
        validate(&self.mesh, None)?;
        let width = self.mesh.vertex_count();

        let labels = ["bake position 0", "bake position 1", "bake normal", "bake tangent"];
        let mut buffers = Vec::with_capacity(labels.len());
        for label in labels {
            match backend.create_buffer(&BufferDescriptor { label, width, height: 1 }) {
                Ok(handle) => buffers.push(handle),
                Err(err) => {
                    buffers.into_iter().for_each(|b| backend.destroy_buffer(b));
                    return Err(err);
                }
            }
        }
        let program = match backend.create_program(&bake_program()) {
            Ok(program) => program,
            Err(err) => {
                buffers.into_iter().for_each(|b| backend.destroy_buffer(b));
                return Err(err);
            }
        };

        log::info!("Activated vertex baking `{}` ({} vertices)", self.label, width);
        self.lifecycle = Lifecycle::Active(BakeResources {
            positions: [buffers[0], buffers[1]],
            normal: buffers[2],
            tangent: buffers[3],
            program,
        });
        self.vertex_count = width;
        self.swap = true;
        self.frame_count = 0;
        Ok(())
    }

    /// Bake this frame's attributes into the slot of the next parity, then
    /// flip parity and count the frame.
    pub fn tick(&mut self, backend: &mut dyn Backend) -> Result<(), SimulationError> {
        let resources = match &self.lifecycle {
            Lifecycle::Active(resources) => resources,
            Lifecycle::Uninitialized => return Err(NotReadyError::Unallocated.into()),
            Lifecycle::Disposed => return Err(NotReadyError::Disposed.into()),
        };
        let vertices = validate(&self.mesh, Some(self.vertex_count))?;

        let next = !self.swap;
        let targets = AttributeTargets {
            position: resources.positions[next as usize],
            normal: resources.normal,
            tangent: resources.tangent,
        };

        self.visibility.show_for_capture();
        let result = backend.extract_attributes(resources.program, vertices, &targets);
        self.visibility.hide_from_views();
        result?;

        self.swap = next;
        self.frame_count += 1;
        log::trace!("Baked frame {} of `{}`", self.frame_count, self.label);
        Ok(())
    }

    /// Free every buffer and the program. Safe to call repeatedly.
    pub fn dispose(&mut self, backend: &mut dyn Backend) {
        if let Lifecycle::Active(resources) = std::mem::replace(&mut self.lifecycle, Lifecycle::Disposed) {
            for buffer in resources.positions {
                backend.destroy_buffer(buffer);
            }
            backend.destroy_buffer(resources.normal);
            backend.destroy_buffer(resources.tangent);
            backend.destroy_program(resources.program);
            log::info!("Disposed vertex baking `{}`", self.label);
        }
    }

    pub fn state(&self) -> BakeState {
        match self.lifecycle {
            Lifecycle::Uninitialized => BakeState::Uninitialized,
            Lifecycle::Disposed => BakeState::Disposed,
            Lifecycle::Active(_) if self.frame_count > 1 => BakeState::Ready,
            Lifecycle::Active(_) => BakeState::WarmingUp,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut M {
        &mut self.mesh
    }

    fn resources(&self) -> Option<&BakeResources> {
        match &self.lifecycle {
            Lifecycle::Active(resources) => Some(resources),
            _ => None,
        }
    }

    /// Position baked by the latest tick
    pub fn current_position(&self) -> Option<BufferHandle> {
        self.resources().map(|r| r.positions[self.swap as usize])
    }

    /// Position baked by the tick before the latest
    pub fn previous_position(&self) -> Option<BufferHandle> {
        self.resources().map(|r| r.positions[!self.swap as usize])
    }

    pub fn current_normal(&self) -> Option<BufferHandle> {
        self.resources().map(|r| r.normal)
    }

    pub fn current_tangent(&self) -> Option<BufferHandle> {
        self.resources().map(|r| r.tangent)
    }
}

impl<M: DeformingMesh> SnapshotSource for VertexBakingPipeline<M> {
    fn label(&self) -> &str {
        &self.label
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn is_ready(&self) -> bool {
        self.state() == BakeState::Ready
    }

    fn snapshot(&self) -> Result<SnapshotPair, NotReadyError> {
        match self.state() {
            BakeState::Uninitialized => Err(NotReadyError::Unallocated),
            BakeState::Disposed => Err(NotReadyError::Disposed),
            BakeState::WarmingUp => Err(NotReadyError::WarmingUp {
                frames: self.frame_count,
            }),
            BakeState::Ready => {
                let resources = self.resources().ok_or(NotReadyError::Unallocated)?;
                Ok(SnapshotPair {
                    current_position: resources.positions[self.swap as usize],
                    previous_position: resources.positions[!self.swap as usize],
                    normal: resources.normal,
                    tangent: resources.tangent,
                    vertex_count: self.vertex_count,
                })
            }
        }
    }
}
