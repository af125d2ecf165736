//! # Trail Physics
//!
//! GPU-compatible data layouts and reference math for skinned-mesh trails:
//! texel grids, baked mesh vertices, the trail template, orientation frame
//! packing and the CPU reference bodies of the trail kernels.

pub mod constants;
pub mod frame;
pub mod kernels;
pub mod template;
pub mod texel;

pub use constants::*;
pub use frame::*;
pub use kernels::*;
pub use template::*;
pub use texel::*;
