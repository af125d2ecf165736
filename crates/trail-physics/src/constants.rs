//! Constants shared by the simulation kernels and the trail renderer

/// Index budget of a single trail draw call (16-bit indices).
pub const INDEX_BUDGET: u32 = 0xffff;

/// Shortest history a trail line can keep (in frames).
pub const MIN_HISTORY_LENGTH: u32 = 4;

/// Longest history a trail line can keep (in frames).
pub const MAX_HISTORY_LENGTH: u32 = 512;

/// History length used when nothing else is configured.
pub const DEFAULT_HISTORY_LENGTH: u32 = 32;

/// Tangents shorter than this are treated as "not moving" when the
/// orientation frame is rebuilt.
pub const FRAME_EPSILON: f32 = 1.0e-6;
