//! Core types for episcatter.
//!
//! This crate holds everything the light scattering pipeline needs that does
//! not touch image data:
//! - [`PostProcessConfig`] and the [`ConfigDiff`] used for invalidation
//! - [`CameraAttribs`] and [`LightAttribs`], the per-frame inputs
//! - [`MediaParams`], the derived scattering coefficients
//! - GPU constant buffer layouts

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Options structs legitimately have many boolean flags
#![allow(clippy::struct_excessive_bools)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

pub mod attribs;
pub mod config;
pub mod error;
pub mod media;
pub mod uniforms;

pub use attribs::{proj_to_uv, uv_to_proj, CameraAttribs, LightAttribs};
pub use config::{
    AccelStruct, ConfigDiff, ConfigField, InscatteringMethod, LightScatteringTechnique, LightType,
    PostProcessConfig,
};
pub use error::{Result, ScatterError};
pub use media::{exp3, sun_color, MediaInputs, MediaParams};
pub use uniforms::{
    CameraUniforms, LightUniforms, MediaUniforms, PassUniforms, PostProcessingUniforms,
};

// Re-export glam types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};
