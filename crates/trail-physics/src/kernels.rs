//! Reference bodies of the trail kernels
//!
//! NOTE: These are the CPU counterparts of `trail_kernels.wgsl`. They are used
//! by the host-memory backend and by tests; the GPU path runs the shaders.
//!
//! Row 0 of every simulation buffer is the newest history step. Each update
//! shifts the history down by one row and writes a fresh row 0.

use crate::frame::Frame;
use crate::texel::{texel_from, texel_xyz, TexelGrid};

/// Per-step scalars read by the update kernels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParams {
    pub delta_time: f32,
    /// Maximum distance a vertex may move in one step
    pub speed_limit: f32,
    /// Already-evaluated `exp(-drag * delta_time)`
    pub damping: f32,
}

/// Frame-rate independent damping factor
pub fn damping_factor(drag: f32, delta_time: f32) -> f32 {
    (-drag * delta_time).exp()
}

/// Every row starts at the source's current position
pub fn initialize_position(source_current: &TexelGrid, out: &mut TexelGrid) {
    out.fill_with(|x, _| source_current.get(x, 0));
}

pub fn initialize_velocity(out: &mut TexelGrid) {
    out.fill_with(|_, _| [0.0; 4]);
}

pub fn initialize_orthnorm(out: &mut TexelGrid) {
    let identity = Frame::IDENTITY.pack();
    out.fill_with(|_, _| identity);
}

/// Row 0: vertex velocity from the snapshot pair, with the implied per-step
/// movement clamped to `speed_limit`. Other rows: last velocity shifted down
/// and damped, so carried-over motion decays as `exp(-drag * t)`.
///
/// `_position_last` is bound for parity with the GPU kernel layout.
pub fn update_velocity(
    _position_last: &TexelGrid,
    velocity_last: &TexelGrid,
    source_previous: &TexelGrid,
    source_current: &TexelGrid,
    params: &StepParams,
    out: &mut TexelGrid,
) {
    let inv_dt = if params.delta_time > 0.0 {
        1.0 / params.delta_time
    } else {
        0.0
    };
    out.fill_with(|x, y| {
        if y == 0 {
            let p0 = texel_xyz(source_previous.get(x, 0));
            let p1 = texel_xyz(source_current.get(x, 0));
            let step = (p1 - p0).clamp_length_max(params.speed_limit.max(0.0));
            texel_from(step * inv_dt, 0.0)
        } else {
            let v = velocity_last.get(x, y - 1);
            texel_from(texel_xyz(v) * params.damping, v[3])
        }
    });
}

/// Row 0: the source's current position. Other rows: last position shifted
/// down and advected by the (already shifted and damped) working velocity.
pub fn update_position(
    position_last: &TexelGrid,
    velocity_working: &TexelGrid,
    source_current: &TexelGrid,
    params: &StepParams,
    out: &mut TexelGrid,
) {
    out.fill_with(|x, y| {
        if y == 0 {
            source_current.get(x, 0)
        } else {
            let last = position_last.get(x, y - 1);
            let v = texel_xyz(velocity_working.get(x, y));
            let p = texel_xyz(last) + v * params.delta_time;
            texel_from(p, last[3])
        }
    });
}

/// Row 0: last frame re-orthonormalized along the newest segment direction.
/// Other rows: last frames shifted down.
pub fn update_orthnorm(position_working: &TexelGrid, orthnorm_last: &TexelGrid, out: &mut TexelGrid) {
    let height = out.height();
    out.fill_with(|x, y| {
        if y == 0 {
            let previous = Frame::unpack(orthnorm_last.get(x, 0));
            if height < 2 {
                return previous.pack();
            }
            let head = texel_xyz(position_working.get(x, 0));
            let next = texel_xyz(position_working.get(x, 1));
            previous.reorthonormalize(head - next).pack()
        } else {
            orthnorm_last.get(x, y - 1)
        }
    });
}

/// Line width modulation handed to the trail renderer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineWidth {
    pub max_width: f32,
    pub cutoff_speed: f32,
    pub speed_to_width: f32,
}

impl LineWidth {
    /// `(max_width, cutoff_speed, speed_to_width / max_width)`.
    /// A zero max width yields a zero ratio instead of dividing by zero.
    pub fn to_vector(&self) -> [f32; 3] {
        let ratio = if self.max_width > 0.0 {
            self.speed_to_width / self.max_width
        } else {
            0.0
        };
        [self.max_width, self.cutoff_speed, ratio]
    }
}
