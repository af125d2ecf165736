//! Error types for the trail simulation
//!
//! Guards run at the start of a tick; when one fails the tick is skipped and
//! nothing is mutated. `setup`/`release`/`dispose` stay callable afterwards.

use thiserror::Error;
use trail_physics::TemplateError;

/// Umbrella error returned by ticks and backend calls
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("not ready: {0}")]
    NotReady(#[from] NotReadyError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("stale reference: {0}")]
    StaleReference(#[from] StaleReferenceError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Invalid mesh, template or settings
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("mesh has no vertices")]
    ZeroVertices,

    #[error("mesh provides no vertex attributes")]
    MissingAttributes,

    #[error("mesh vertex count changed from {expected} to {found}")]
    VertexCountChanged { expected: u32, found: u32 },

    #[error("invalid trail template: {0}")]
    Template(#[from] TemplateError),

    #[error(
        "buffers are allocated as {allocated:?}, refusing setup with {requested:?} without a release"
    )]
    DimensionMismatch {
        allocated: (u32, u32),
        requested: (u32, u32),
    },

    #[error("program `{label}` has {found} entry points, expected {expected}")]
    ProgramMismatch {
        label: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Something was used before it was allocated or before it had valid data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotReadyError {
    #[error("kernel buffers are not allocated")]
    Unallocated,

    #[error("vertex snapshots are warming up ({frames} frame(s) baked)")]
    WarmingUp { frames: u64 },

    #[error("vertex baking pipeline has been disposed")]
    Disposed,
}

/// Backend allocation or submission failure. Fatal, there is no fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("failed to request device: {0}")]
    DeviceRequest(String),

    #[error("failed to allocate buffer `{label}` ({width}x{height})")]
    BufferAllocation {
        label: String,
        width: u32,
        height: u32,
    },

    #[error("failed to create program `{label}`: {reason}")]
    ProgramCreation { label: String, reason: String },

    #[error("unknown buffer handle {0}")]
    UnknownBuffer(u32),

    #[error("unknown program handle {0}")]
    UnknownProgram(u32),

    #[error("read-back failed: {0}")]
    ReadBack(String),
}

/// The bound source was dropped while the controller still referenced it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("vertex baking pipeline was dropped while still bound to `{0}`")]
pub struct StaleReferenceError(pub String);

/// Programmer errors around kernel invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("`{0}` is not part of this kernel set")]
    UnknownName(&'static str),

    #[error("program `{label}` has no pass {pass}")]
    UnknownPass { label: &'static str, pass: usize },

    #[error("program has no input slot {0}")]
    UnknownInput(usize),

    #[error("input slot {0} is not bound")]
    MissingInput(usize),

    #[error("input slot {slot} aliases the target of `{buffer}`")]
    AliasedTarget { slot: usize, buffer: &'static str },

    #[error("uniform block is {found} bytes, expected {expected}")]
    UniformSize { expected: usize, found: usize },

    #[error("input slot {slot} is {found:?}, expected width {expected}")]
    InputSize {
        slot: usize,
        expected: u32,
        found: (u32, u32),
    },
}
