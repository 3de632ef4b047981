//! Rendering error types.

use thiserror::Error;

/// Errors that can occur while running the post-processing passes.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to create wgpu adapter.
    #[error("failed to create graphics adapter")]
    AdapterCreationFailed,

    /// Failed to create wgpu device.
    #[error("failed to create graphics device: {0}")]
    DeviceCreationFailed(#[from] wgpu::RequestDeviceError),

    /// A technique could not be specialized for the current settings.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// A pass ran before its technique was compiled for this frame.
    #[error("technique not compiled: {0}")]
    TechniqueNotCompiled(String),

    /// The adapter lacks a capability the passes need.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Buffer creation failed.
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(String),

    /// Submitting device work or reading its results back failed.
    #[error("device command failed: {0}")]
    CommandFailed(String),

    /// Surface creation failed.
    #[error("texture creation failed: {0}")]
    TextureCreationFailed(String),

    /// A surface the pass expected has not been allocated.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// The frame inputs are inconsistent with each other.
    #[error("invalid frame input: {0}")]
    InvalidFrameInput(String),

    /// The post-processing configuration is invalid.
    #[error(transparent)]
    Config(#[from] episcatter_core::ScatterError),

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
