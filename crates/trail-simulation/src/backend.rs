//! Render/compute backend boundary
//!
//! Everything the kernel set and the baking pipeline need from the GPU goes
//! through [`Backend`]. Resources are referred to by small copyable handles;
//! the backend owns the actual buffers and pipelines.

use crate::error::{KernelError, SimulationError};
use std::fmt;
use std::sync::Arc;
use trail_physics::{MeshVertex, TexelGrid};

/// Handle to a 2D texel buffer owned by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u32);

impl BufferHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Handle to a program instance owned by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u32);

impl ProgramHandle {
    pub fn id(self) -> u32 {
        self.0
    }
}

pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
}

/// CPU body of a program.
///
/// `pass` is the entry point index. The target is zero-filled on entry and
/// must be written completely.
pub trait TexelKernel: Send + Sync {
    fn execute(
        &self,
        pass: usize,
        inputs: &KernelInputs<'_>,
        target: &mut TexelGrid,
    ) -> Result<(), KernelError>;
}

/// Description of a program: WGSL module plus an optional CPU body.
///
/// Bind group layout used by every backend:
/// - 0: dispatch info uniform (`width`, `height`)
/// - 1: parameter uniform block
/// - 2 .. 2 + inputs: read-only texel storage
/// - then `outputs` read-write texel storage
#[derive(Clone)]
pub struct ProgramDescriptor {
    pub label: &'static str,
    pub source: &'static str,
    pub entry_points: &'static [&'static str],
    pub input_count: usize,
    pub output_count: usize,
    pub reference: Option<Arc<dyn TexelKernel>>,
}

impl fmt::Debug for ProgramDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramDescriptor")
            .field("label", &self.label)
            .field("entry_points", &self.entry_points)
            .field("input_count", &self.input_count)
            .field("output_count", &self.output_count)
            .field("reference", &self.reference.is_some())
            .finish()
    }
}

/// Current parameters of a program instance: bound inputs and uniform bytes.
/// Persist across dispatches until changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    inputs: Vec<Option<BufferHandle>>,
    uniforms: Vec<u8>,
}

impl Bindings {
    pub fn new(input_count: usize) -> Self {
        Self {
            inputs: vec![None; input_count],
            uniforms: Vec::new(),
        }
    }

    pub fn bind(&mut self, slot: usize, buffer: BufferHandle) -> Result<(), KernelError> {
        let entry = self
            .inputs
            .get_mut(slot)
            .ok_or(KernelError::UnknownInput(slot))?;
        *entry = Some(buffer);
        Ok(())
    }

    pub fn set_uniforms<T: bytemuck::Pod>(&mut self, value: &T) {
        self.uniforms = bytemuck::bytes_of(value).to_vec();
    }

    pub fn input(&self, slot: usize) -> Option<BufferHandle> {
        self.inputs.get(slot).copied().flatten()
    }

    pub fn inputs(&self) -> &[Option<BufferHandle>] {
        &self.inputs
    }

    pub fn uniforms(&self) -> &[u8] {
        &self.uniforms
    }

    /// Unbind everything
    pub fn clear(&mut self) {
        self.inputs.iter_mut().for_each(|slot| *slot = None);
        self.uniforms.clear();
    }
}

/// Inputs handed to a [`TexelKernel`]
pub struct KernelInputs<'a> {
    pub(crate) grids: Vec<Option<&'a TexelGrid>>,
    pub(crate) uniforms: &'a [u8],
}

impl<'a> KernelInputs<'a> {
    pub fn new(grids: Vec<Option<&'a TexelGrid>>, uniforms: &'a [u8]) -> Self {
        Self { grids, uniforms }
    }

    pub fn input(&self, slot: usize) -> Result<&'a TexelGrid, KernelError> {
        self.grids
            .get(slot)
            .copied()
            .flatten()
            .ok_or(KernelError::MissingInput(slot))
    }

    /// Decode the uniform block
    pub fn uniforms<T: bytemuck::Pod>(&self) -> Result<T, KernelError> {
        let expected = std::mem::size_of::<T>();
        if self.uniforms.len() != expected {
            return Err(KernelError::UniformSize {
                expected,
                found: self.uniforms.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(self.uniforms))
    }
}

/// Output buffers of the attribute extraction pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeTargets {
    pub position: BufferHandle,
    pub normal: BufferHandle,
    pub tangent: BufferHandle,
}

/// The render/compute backend the simulation runs on.
///
/// Every call is a synchronous submission: once it returns, its writes are
/// visible to the next call.
pub trait Backend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, SimulationError>;

    /// Free a buffer. Unknown handles are ignored.
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramHandle, SimulationError>;

    /// Free a program. Unknown handles are ignored.
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Run entry point `pass` over every texel of `target`
    fn dispatch(
        &mut self,
        program: ProgramHandle,
        pass: usize,
        bindings: &Bindings,
        target: BufferHandle,
    ) -> Result<(), SimulationError>;

    /// Off-screen capture of mesh attributes: vertex `i` lands in column `i`
    /// of each target.
    fn extract_attributes(
        &mut self,
        program: ProgramHandle,
        vertices: &[MeshVertex],
        targets: &AttributeTargets,
    ) -> Result<(), SimulationError>;

    /// Copy a buffer back to host memory
    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<TexelGrid, SimulationError>;

    /// Number of buffers currently allocated
    fn live_buffers(&self) -> usize;

    /// Number of programs currently allocated
    fn live_programs(&self) -> usize;
}
