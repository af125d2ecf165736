//! # Trail Simulation
//!
//! Skinned-mesh trails on the GPU: a vertex baking pipeline captures the
//! deformed mesh every frame, and a ping-pong kernel set integrates per-line
//! position, velocity and orientation from the baked snapshots.

pub mod backend;
pub mod baking;
pub mod config;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod kernel_set;
pub mod kernels;
pub mod params;
pub mod trail;

pub use backend::*;
pub use baking::*;
pub use config::*;
pub use cpu::*;
pub use error::*;
pub use gpu::*;
pub use kernel_set::*;
pub use kernels::*;
pub use params::*;
pub use trail::*;
