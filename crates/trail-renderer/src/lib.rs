//! # Trail Renderer
//!
//! Draws the simulated trail lines as camera-facing ribbons straight from
//! the simulation's storage buffers.

pub mod camera;
pub mod display;

pub use camera::*;
pub use display::*;
