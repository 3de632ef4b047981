//! The passes of the light scattering pipeline.
//!
//! Each submodule holds the kernels of one stage as plain functions, plus a
//! pass entry point that runs them over the pipeline surfaces through the
//! quad rasterizer and records the pass in the [`RenderContext`].
//!
//! [`RenderContext`]: crate::context::RenderContext

pub mod camera_z;
pub mod epipolar;
pub mod fix;
pub mod integral;
pub mod interpolate;
pub mod min_max;
pub mod overlay;
pub mod ray_march;
pub mod refinement;
pub mod unwarp;
pub mod upscale;

use glam::{Vec2, Vec3, Vec4};

use episcatter_core::{
    exp3, CameraAttribs, LightAttribs, LightType, MediaParams, PostProcessConfig,
};

use crate::surface::{Surface, INVALID_COORDINATE};

/// Read-only inputs of one frame, shared by every pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub config: &'a PostProcessConfig,
    pub media: &'a MediaParams,
    pub camera: &'a CameraAttribs,
    pub light: &'a LightAttribs,
    /// Light position in screen NDC, clamped to a finite distance.
    pub light_screen_pos: Vec2,
    pub is_light_on_screen: bool,
    pub width: u32,
    pub height: u32,
    pub src_color: &'a Surface<Vec4>,
    pub src_depth: &'a Surface<f32>,
    pub shadow_map: &'a Surface<f32>,
    stained_glass: Option<&'a Surface<Vec4>>,
}

impl<'a> FrameView<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a PostProcessConfig,
        media: &'a MediaParams,
        camera: &'a CameraAttribs,
        light: &'a LightAttribs,
        src_color: &'a Surface<Vec4>,
        src_depth: &'a Surface<f32>,
        shadow_map: &'a Surface<f32>,
        stained_glass: Option<&'a Surface<Vec4>>,
    ) -> Self {
        let (width, height) = src_color.size();
        let light_screen_pos = light.screen_position(config.light_type, camera);
        Self {
            config,
            media,
            camera,
            light,
            light_screen_pos,
            is_light_on_screen: LightAttribs::is_on_screen(light_screen_pos, width, height),
            width,
            height,
            src_color,
            src_depth,
            shadow_map,
            stained_glass,
        }
    }

    /// Glass transmittance map, when stained glass applies to this frame.
    pub fn stained_glass(&self) -> Option<&'a Surface<Vec4>> {
        if self.config.stained_glass && self.config.light_type == LightType::Directional {
            self.stained_glass
        } else {
            None
        }
    }

    pub fn shadow_map_resolution(&self) -> u32 {
        self.shadow_map.width()
    }

    /// Final color of a pixel given its background and inscattered light.
    pub fn apply_inscattering(&self, background: Vec4, inscattering: Vec3, camera_z: f32, ndc: Vec2) -> Vec4 {
        let attenuated = if self.config.show_lighting_only {
            Vec3::ZERO
        } else {
            let world = self.camera.unproject(ndc, camera_z);
            let distance = (world - self.camera.position)
                .length()
                .min(self.config.max_tracing_distance);
            background.truncate() * self.media.extinction(distance)
        };
        tone_map(attenuated + inscattering, self.config.exposure).extend(1.0)
    }
}

/// `1 - exp(-exposure * x)`.
pub fn tone_map(color: Vec3, exposure: f32) -> Vec3 {
    Vec3::ONE - exp3(-color * exposure)
}

/// Weight of a sample at `sample_z` for a pixel at `pixel_z`:
/// `(threshold / max(|dz|, threshold))^4`.
pub fn depth_weight(sample_z: f32, pixel_z: f32, threshold: f32) -> f32 {
    let t = threshold.max(1e-6);
    (t / (sample_z - pixel_z).abs().max(t)).powi(4)
}

/// False for the invalid-coordinate sentinel.
pub fn is_valid(value: f32) -> bool {
    value > INVALID_COORDINATE * 0.5
}

/// Color painted over pixels fixed at depth breaks when they are shown.
pub const DEPTH_BREAK_COLOR: Vec4 = Vec4::new(0.0, 1.0, 0.0, 1.0);
