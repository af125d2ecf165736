//! Programs run by the simulation: trail kernels and vertex attribute
//! extraction, with their CPU bodies.

use crate::backend::{KernelInputs, ProgramDescriptor, TexelKernel};
use crate::error::KernelError;
use crate::kernel_set::SlotName;
use crate::params::TrailUniforms;
use std::sync::Arc;
use trail_physics::{
    initialize_orthnorm, initialize_position, initialize_velocity, update_orthnorm, update_position,
    update_velocity, TexelGrid,
};

/// Double-buffered simulation buffers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrailBuffer {
    Position,
    Velocity,
    Orthnorm,
}

impl SlotName for TrailBuffer {
    const ALL: &'static [Self] = &[TrailBuffer::Position, TrailBuffer::Velocity, TrailBuffer::Orthnorm];

    fn label(self) -> &'static str {
        match self {
            TrailBuffer::Position => "position",
            TrailBuffer::Velocity => "velocity",
            TrailBuffer::Orthnorm => "orthnorm",
        }
    }
}

/// Trail kernels, in entry point order of `trail_kernels.wgsl`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrailKernel {
    InitializePosition,
    InitializeVelocity,
    InitializeOrthnorm,
    UpdatePosition,
    UpdateVelocity,
    UpdateOrthnorm,
}

impl SlotName for TrailKernel {
    const ALL: &'static [Self] = &[
        TrailKernel::InitializePosition,
        TrailKernel::InitializeVelocity,
        TrailKernel::InitializeOrthnorm,
        TrailKernel::UpdatePosition,
        TrailKernel::UpdateVelocity,
        TrailKernel::UpdateOrthnorm,
    ];

    fn label(self) -> &'static str {
        match self {
            TrailKernel::InitializePosition => "initialize_position",
            TrailKernel::InitializeVelocity => "initialize_velocity",
            TrailKernel::InitializeOrthnorm => "initialize_orthnorm",
            TrailKernel::UpdatePosition => "update_position",
            TrailKernel::UpdateVelocity => "update_velocity",
            TrailKernel::UpdateOrthnorm => "update_orthnorm",
        }
    }
}

/// Input slots of the trail program
pub mod trail_inputs {
    /// Snapshot position of the previous frame
    pub const SOURCE_PREVIOUS: usize = 0;
    /// Snapshot position of the current frame
    pub const SOURCE_CURRENT: usize = 1;
    pub const POSITION: usize = 2;
    pub const VELOCITY: usize = 3;
    pub const ORTHNORM: usize = 4;
    pub const COUNT: usize = 5;
}

const TRAIL_ENTRY_POINTS: &[&str] = &[
    "initialize_position",
    "initialize_velocity",
    "initialize_orthnorm",
    "update_position",
    "update_velocity",
    "update_orthnorm",
];

/// The six trail kernels over Position/Velocity/Orthnorm
pub fn trail_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: "trail kernels",
        source: include_str!("shaders/trail_kernels.wgsl"),
        entry_points: TRAIL_ENTRY_POINTS,
        input_count: trail_inputs::COUNT,
        output_count: 1,
        reference: Some(Arc::new(TrailReferenceKernels)),
    }
}

/// Attribute extraction: input 0 is the vertex array, outputs are
/// position, normal and tangent.
pub fn bake_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: "vertex bake",
        source: include_str!("shaders/bake.wgsl"),
        entry_points: &["extract"],
        input_count: 1,
        output_count: 3,
        reference: None,
    }
}

/// CPU bodies of the trail kernels
pub struct TrailReferenceKernels;

fn source<'a>(inputs: &KernelInputs<'a>, slot: usize, width: u32) -> Result<&'a TexelGrid, KernelError> {
    let grid = inputs.input(slot)?;
    if grid.width() != width {
        return Err(KernelError::InputSize {
            slot,
            expected: width,
            found: (grid.width(), grid.height()),
        });
    }
    Ok(grid)
}

impl TexelKernel for TrailReferenceKernels {
    fn execute(&self, pass: usize, inputs: &KernelInputs<'_>, target: &mut TexelGrid) -> Result<(), KernelError> {
        use trail_inputs::*;

        let kernel = TrailKernel::ALL.get(pass).copied().ok_or(KernelError::UnknownPass {
            label: "trail kernels",
            pass,
        })?;
        let width = target.width();

        match kernel {
            TrailKernel::InitializePosition => {
                initialize_position(source(inputs, SOURCE_CURRENT, width)?, target);
            }
            TrailKernel::InitializeVelocity => initialize_velocity(target),
            TrailKernel::InitializeOrthnorm => initialize_orthnorm(target),
            TrailKernel::UpdateVelocity => {
                let params = inputs.uniforms::<TrailUniforms>()?.step_params();
                update_velocity(
                    source(inputs, POSITION, width)?,
                    source(inputs, VELOCITY, width)?,
                    source(inputs, SOURCE_PREVIOUS, width)?,
                    source(inputs, SOURCE_CURRENT, width)?,
                    &params,
                    target,
                );
            }
            TrailKernel::UpdatePosition => {
                let params = inputs.uniforms::<TrailUniforms>()?.step_params();
                update_position(
                    source(inputs, POSITION, width)?,
                    source(inputs, VELOCITY, width)?,
                    source(inputs, SOURCE_CURRENT, width)?,
                    &params,
                    target,
                );
            }
            TrailKernel::UpdateOrthnorm => {
                update_orthnorm(
                    source(inputs, POSITION, width)?,
                    source(inputs, ORTHNORM, width)?,
                    target,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_follow_kernel_order() {
        assert_eq!(TRAIL_ENTRY_POINTS.len(), TrailKernel::ALL.len());
        for (kernel, entry) in TrailKernel::ALL.iter().zip(TRAIL_ENTRY_POINTS) {
            assert_eq!(kernel.label(), *entry);
        }
    }

    #[test]
    fn test_shader_declares_every_entry_point() {
        let program = trail_program();
        for entry in program.entry_points {
            assert!(program.source.contains(&format!("fn {entry}(")), "missing {entry}");
        }
        assert!(bake_program().source.contains("fn extract("));
    }

    #[test]
    fn test_reference_rejects_mismatched_source() {
        let narrow = TexelGrid::new(2, 1);
        let mut grids = vec![None; trail_inputs::COUNT];
        grids[trail_inputs::SOURCE_CURRENT] = Some(&narrow);
        let inputs = KernelInputs::new(grids, &[]);
        let mut target = TexelGrid::new(4, 8);
        let err = TrailReferenceKernels.execute(0, &inputs, &mut target).unwrap_err();
        assert_eq!(
            err,
            KernelError::InputSize {
                slot: trail_inputs::SOURCE_CURRENT,
                expected: 4,
                found: (2, 1),
            }
        );
    }

    #[test]
    fn test_update_requires_uniforms() {
        let grid = TexelGrid::new(1, 4);
        let inputs = KernelInputs::new(vec![Some(&grid); trail_inputs::COUNT], &[]);
        let mut target = TexelGrid::new(1, 4);
        let pass = TrailKernel::ALL
            .iter()
            .position(|k| *k == TrailKernel::UpdateVelocity)
            .unwrap();
        let err = TrailReferenceKernels.execute(pass, &inputs, &mut target).unwrap_err();
        assert_eq!(err, KernelError::UniformSize { expected: 16, found: 0 });
    }
}
