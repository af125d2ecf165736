//! Uniform blocks shared with the WGSL kernels

use bytemuck::{Pod, Zeroable};
use trail_physics::{damping_factor, StepParams};

/// Per-tick parameters of the trail kernels (binding 1)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TrailUniforms {
    pub delta_time: f32,
    pub speed_limit: f32,
    /// `exp(-drag * delta_time)`, evaluated on the host
    pub damping: f32,
    pub random_seed: u32,
}

impl TrailUniforms {
    pub fn new(delta_time: f32, speed_limit: f32, drag: f32, random_seed: u32) -> Self {
        Self {
            delta_time,
            speed_limit,
            damping: damping_factor(drag, delta_time),
            random_seed,
        }
    }

    pub fn step_params(&self) -> StepParams {
        StepParams {
            delta_time: self.delta_time,
            speed_limit: self.speed_limit,
            damping: self.damping,
        }
    }
}

/// Extent of the dispatched grid (binding 0)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct DispatchInfo {
    pub width: u32,
    pub height: u32,
    _padding: [u32; 2],
}

impl DispatchInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            _padding: [0; 2],
        }
    }
}
