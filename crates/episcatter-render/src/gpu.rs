//! wgpu backend.
//!
//! [`GpuDevice`] opens the device and owns the layout of the frame
//! constants. [`GpuMirror`] uploads host surfaces and constants. The
//! techniques compile to WGSL compute pipelines, and
//! [`GpuLightScatteringPipeline`] runs the same passes as
//! [`crate::LightScatteringPipeline`] on the device.

mod buffers;
mod device;
mod kernels;
mod mirror;
mod pipeline;
pub mod programs;

pub use buffers::{
    read_buffer, DownscaledBuffers, EpipolarBuffers, GpuSurfaces, MinMaxBuffers, ScreenBuffers,
};
pub use device::{GpuDevice, FRAME_BINDINGS};
pub use kernels::{bindings, build_program, max_storage_buffers, GpuProgram, Kernel, Slot, OVERLAY_FORMAT};
pub use mirror::{ConstantBuffers, GpuMirror, MirroredTexture};
pub use pipeline::GpuLightScatteringPipeline;
