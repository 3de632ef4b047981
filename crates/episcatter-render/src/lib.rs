//! Rendering backend for episcatter.
//!
//! This crate runs the epipolar light scattering passes:
//! - Surfaces with device formats and the full-screen quad rasterizer
//! - The technique table and its compile cache
//! - Intermediate surfaces grouped by the settings that size them
//! - Every pipeline stage and the [`LightScatteringPipeline`] orchestrator
//! - [`GpuLightScatteringPipeline`], which runs the same passes as WGSL
//!   compute kernels on a wgpu device

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Stage kernels index surfaces with u32 coordinates and mix them with f32 math
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]

pub mod context;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod quad;
pub mod resources;
pub mod stages;
pub mod surface;
pub mod technique;

pub use context::{FrameConstants, PassRecord, RenderContext};
pub use error::{RenderError, RenderResult};
pub use gpu::{
    ConstantBuffers, GpuDevice, GpuLightScatteringPipeline, GpuMirror, GpuProgram, MirroredTexture,
};
pub use pipeline::{required_techniques, FrameAttribs, FrameReport, LightScatteringPipeline};
pub use quad::{draw_quad, draw_quad_tagged, BlendMode, Fragment, Sprite, TagRule, Viewport};
pub use resources::{ResourceGroup, SurfacePool};
pub use stages::{tone_map, FrameView, DEPTH_BREAK_COLOR};
pub use surface::{
    InterpolationSource, MinMaxDepth, PingPong, PixelTag, Radiance16, SampleTag, Surface, Texel,
};
pub use technique::{TechniqueCache, TechniqueId};
