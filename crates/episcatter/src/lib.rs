//! episcatter: epipolar sampling for real-time light scattering.
//!
//! Computes the single scattering of a directional, spot or point light in a
//! participating medium as a post process over a rendered frame. Ray marching
//! runs only at a small set of samples placed along epipolar lines through
//! the light's screen position; the rest of the screen is interpolated from
//! them and pixels at depth breaks are fixed up by direct ray marching.
//!
//! # Quick Start
//!
//! ```no_run
//! use episcatter::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let scene = Scene::colonnade();
//!     let camera = scene.default_camera(640, 360);
//!     let light = scene.light(LightType::Directional);
//!     let frame = scene.render(&camera, &light, LightType::Directional, (640, 360), 1024)?;
//!
//!     let config = PostProcessConfig::for_scene(scene.extent(), LightType::Directional, 1024);
//!     let mut pipeline = LightScatteringPipeline::new();
//!     let (image, _report) = frame.post_process(&mut pipeline, &camera, &light, &config)?;
//!     save_image("sun_shafts.png", &image)?;
//!     Ok(())
//! }
//! ```
//!
//! # Layout
//!
//! - [`episcatter_core`] holds the configuration, camera and light attributes
//!   and media coefficients
//! - [`episcatter_render`] holds the surfaces, techniques and passes, run on
//!   the host or as WGSL compute kernels on a wgpu device
//! - this crate adds logging setup, a test scene, image export and
//!   headless GPU helpers

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

mod error;
mod export;
mod headless;
mod scene;

pub use error::{Error, Result};
pub use export::{encode_png, save_image, save_rgba8, scalar_to_rgba8, to_rgba8};
pub use headless::{headless_mirror, headless_pipeline, mirror_pipeline, MirrorSummary};
pub use scene::{GlassPane, Scene, SceneBox, SceneFrame, SKY_COLOR};

// Re-export core types
pub use episcatter_core::{
    AccelStruct, CameraAttribs, ConfigDiff, ConfigField, InscatteringMethod, LightAttribs,
    LightScatteringTechnique, LightType, MediaParams, PostProcessConfig, ScatterError,
};

// Re-export render types
pub use episcatter_render::{
    required_techniques, FrameAttribs, FrameReport, GpuLightScatteringPipeline, GpuMirror,
    InterpolationSource, LightScatteringPipeline, PixelTag, Radiance16, RenderError, SampleTag, Surface, TechniqueId,
};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};

/// Initializes `env_logger`; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
