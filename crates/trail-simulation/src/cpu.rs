//! Host-memory backend
//!
//! Runs the CPU bodies attached to each [`ProgramDescriptor`]. Used by the
//! test suite and for headless runs without a GPU adapter.

use crate::backend::{
    AttributeTargets, Backend, Bindings, BufferDescriptor, BufferHandle, KernelInputs, ProgramDescriptor,
    ProgramHandle,
};
use crate::error::{KernelError, ResourceError, SimulationError};
use std::collections::HashMap;
use trail_physics::{MeshVertex, TexelGrid};

struct CpuBuffer {
    label: String,
    grid: TexelGrid,
}

/// Reference backend keeping every texel buffer in host memory
#[derive(Default)]
pub struct CpuBackend {
    buffers: HashMap<BufferHandle, CpuBuffer>,
    programs: HashMap<ProgramHandle, ProgramDescriptor>,
    next_id: u32,
    dispatch_count: u64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to a buffer's texels
    pub fn grid(&self, buffer: BufferHandle) -> Option<&TexelGrid> {
        self.buffers.get(&buffer).map(|b| &b.grid)
    }

    /// Total kernel and extraction passes executed so far
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Backend for CpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, SimulationError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(ResourceError::BufferAllocation {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
            }
            .into());
        }
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(
            handle,
            CpuBuffer {
                label: desc.label.to_string(),
                grid: TexelGrid::new(desc.width, desc.height),
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(released) = self.buffers.remove(&buffer) {
            log::trace!("Released host buffer `{}`", released.label);
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramHandle, SimulationError> {
        if desc.reference.is_none() && desc.output_count == 1 {
            return Err(ResourceError::ProgramCreation {
                label: desc.label.to_string(),
                reason: "no CPU body attached".to_string(),
            }
            .into());
        }
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn dispatch(
        &mut self,
        program: ProgramHandle,
        pass: usize,
        bindings: &Bindings,
        target: BufferHandle,
    ) -> Result<(), SimulationError> {
        let desc = self
            .programs
            .get(&program)
            .ok_or(ResourceError::UnknownProgram(program.0))?;
        if pass >= desc.entry_points.len() {
            return Err(KernelError::UnknownPass {
                label: desc.label,
                pass,
            }
            .into());
        }
        let kernel = desc.reference.clone().ok_or_else(|| ResourceError::ProgramCreation {
            label: desc.label.to_string(),
            reason: "no CPU body attached".to_string(),
        })?;

        let (width, height) = {
            let buffer = self
                .buffers
                .get(&target)
                .ok_or(ResourceError::UnknownBuffer(target.0))?;
            (buffer.grid.width(), buffer.grid.height())
        };

        let mut grids = Vec::with_capacity(bindings.inputs().len());
        for slot in bindings.inputs() {
            let grid = match slot {
                Some(handle) => Some(
                    self.buffers
                        .get(handle)
                        .map(|b| &b.grid)
                        .ok_or(ResourceError::UnknownBuffer(handle.0))?,
                ),
                None => None,
            };
            grids.push(grid);
        }
        let inputs = KernelInputs::new(grids, bindings.uniforms());

        // Written into a scratch grid so a failing kernel leaves the target untouched.
        let mut scratch = TexelGrid::new(width, height);
        kernel.execute(pass, &inputs, &mut scratch)?;

        if let Some(buffer) = self.buffers.get_mut(&target) {
            buffer.grid = scratch;
        }
        self.dispatch_count += 1;
        Ok(())
    }

    fn extract_attributes(
        &mut self,
        program: ProgramHandle,
        vertices: &[MeshVertex],
        targets: &AttributeTargets,
    ) -> Result<(), SimulationError> {
        if !self.programs.contains_key(&program) {
            return Err(ResourceError::UnknownProgram(program.0).into());
        }
        let outputs: [(BufferHandle, fn(&MeshVertex) -> [f32; 4]); 3] = [
            (targets.position, MeshVertex::position_texel),
            (targets.normal, MeshVertex::normal_texel),
            (targets.tangent, MeshVertex::tangent_texel),
        ];
        for (handle, _) in &outputs {
            if !self.buffers.contains_key(handle) {
                return Err(ResourceError::UnknownBuffer(handle.0).into());
            }
        }
        for (handle, attribute) in outputs {
            if let Some(buffer) = self.buffers.get_mut(&handle) {
                let width = buffer.grid.width() as usize;
                for (x, vertex) in vertices.iter().take(width).enumerate() {
                    buffer.grid.set(x as u32, 0, attribute(vertex));
                }
            }
        }
        self.dispatch_count += 1;
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<TexelGrid, SimulationError> {
        self.buffers
            .get(&buffer)
            .map(|b| b.grid.clone())
            .ok_or_else(|| ResourceError::UnknownBuffer(buffer.0).into())
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }
}
