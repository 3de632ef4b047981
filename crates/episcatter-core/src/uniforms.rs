//! GPU constant buffer layouts shared by every pass.
//!
//! All structs are `#[repr(C)]`, 16-byte aligned in size, and built from the
//! Rust-side attributes once per frame.

use glam::Vec2;

use crate::attribs::{CameraAttribs, LightAttribs};
use crate::config::{LightType, PostProcessConfig};
use crate::media::MediaParams;

/// GPU representation of [`PostProcessConfig`] plus the screen size.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostProcessingUniforms {
    pub screen_resolution: [f32; 2],
    pub num_epipolar_slices: u32,
    pub max_samples_in_slice: u32,
    pub initial_sample_step: u32,
    pub epipole_sampling_density_factor: u32,
    pub refinement_threshold: f32,
    pub downscale_factor: f32,
    pub min_max_shadow_map_resolution: u32,
    pub max_shadow_map_step: u32,
    pub max_tracing_distance: f32,
    pub exposure: f32,
    pub flags: u32,
    pub light_type: u32,
    pub accel_struct: u32,
    pub inscattering_method: u32,
}

impl PostProcessingUniforms {
    pub const FLAG_OPTIMIZE_SAMPLE_LOCATIONS: u32 = 1;
    pub const FLAG_CORRECT_AT_DEPTH_BREAKS: u32 = 1 << 1;
    pub const FLAG_SHOW_SAMPLING: u32 = 1 << 2;
    pub const FLAG_SHOW_DEPTH_BREAKS: u32 = 1 << 3;
    pub const FLAG_SHOW_LIGHTING_ONLY: u32 = 1 << 4;
    pub const FLAG_STAINED_GLASS: u32 = 1 << 5;
    pub const FLAG_ANISOTROPIC_PHASE: u32 = 1 << 6;

    /// Packs a configuration for a screen of the given size.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(config: &PostProcessConfig, width: u32, height: u32, shadow_map_resolution: u32) -> Self {
        let flag = |on: bool, bit: u32| if on { bit } else { 0 };
        Self {
            screen_resolution: [width as f32, height as f32],
            num_epipolar_slices: config.num_epipolar_slices,
            max_samples_in_slice: config.max_samples_in_slice,
            initial_sample_step: config.initial_sample_step_in_slice,
            epipole_sampling_density_factor: config.epipole_sampling_density_factor,
            refinement_threshold: config.refinement_threshold,
            downscale_factor: config.downscale_factor as f32,
            min_max_shadow_map_resolution: config.effective_min_max_resolution(shadow_map_resolution),
            max_shadow_map_step: config.max_shadow_map_step,
            max_tracing_distance: config.max_tracing_distance,
            exposure: config.exposure,
            flags: flag(config.optimize_sample_locations, Self::FLAG_OPTIMIZE_SAMPLE_LOCATIONS)
                | flag(
                    config.correct_scattering_at_depth_breaks,
                    Self::FLAG_CORRECT_AT_DEPTH_BREAKS,
                )
                | flag(config.show_sampling, Self::FLAG_SHOW_SAMPLING)
                | flag(config.show_depth_breaks, Self::FLAG_SHOW_DEPTH_BREAKS)
                | flag(config.show_lighting_only, Self::FLAG_SHOW_LIGHTING_ONLY)
                | flag(config.stained_glass, Self::FLAG_STAINED_GLASS)
                | flag(config.anisotropic_phase_function, Self::FLAG_ANISOTROPIC_PHASE),
            light_type: config.light_type.macro_value(),
            accel_struct: config.accel_struct.macro_value(),
            inscattering_method: config.inscattering_method.macro_value(),
        }
    }
}

/// GPU representation of [`MediaParams`].
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MediaUniforms {
    pub total_rayleigh_beta: [f32; 4],
    pub angular_rayleigh_beta: [f32; 4],
    pub total_mie_beta: [f32; 4],
    pub angular_mie_beta: [f32; 4],
    pub summ_total_beta: [f32; 4],
    pub hg_g: [f32; 4],
}

impl From<&MediaParams> for MediaUniforms {
    fn from(media: &MediaParams) -> Self {
        Self {
            total_rayleigh_beta: media.total_rayleigh_beta.extend(0.0).to_array(),
            angular_rayleigh_beta: media.angular_rayleigh_beta.extend(0.0).to_array(),
            total_mie_beta: media.total_mie_beta.extend(0.0).to_array(),
            angular_mie_beta: media.angular_mie_beta.extend(0.0).to_array(),
            summ_total_beta: media.summ_total_beta.extend(0.0).to_array(),
            hg_g: media.hg_g.to_array(),
        }
    }
}

/// GPU representation of [`CameraAttribs`].
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub _padding: f32,
}

impl From<&CameraAttribs> for CameraUniforms {
    fn from(camera: &CameraAttribs) -> Self {
        Self {
            view: camera.view.to_cols_array_2d(),
            proj: camera.proj.to_cols_array_2d(),
            view_proj: camera.view_proj.to_cols_array_2d(),
            inv_view_proj: camera.inv_view_proj.to_cols_array_2d(),
            camera_pos: camera.position.to_array(),
            _padding: 0.0,
        }
    }
}

/// GPU representation of [`LightAttribs`] with the per-frame derived values.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniforms {
    pub world_to_light_proj: [[f32; 4]; 4],
    pub dir_on_light: [f32; 4],
    pub world_pos: [f32; 4],
    pub spot_axis_and_cos_angle: [f32; 4],
    pub color_and_intensity: [f32; 4],
    pub screen_pos: [f32; 2],
    pub is_on_screen: u32,
    pub light_type: u32,
    pub camera_uv_and_depth: [f32; 4],
}

impl LightUniforms {
    /// Packs the light together with its projection for this frame.
    pub fn new(
        light: &LightAttribs,
        light_type: LightType,
        camera: &CameraAttribs,
        screen_pos: Vec2,
        is_on_screen: bool,
    ) -> Self {
        Self {
            world_to_light_proj: light.world_to_light_proj.to_cols_array_2d(),
            dir_on_light: light.dir_on_light.extend(0.0).to_array(),
            world_pos: light.world_pos.extend(1.0).to_array(),
            spot_axis_and_cos_angle: light.spot_axis.extend(light.spot_cos_angle).to_array(),
            color_and_intensity: light.color.extend(light.intensity).to_array(),
            screen_pos: screen_pos.to_array(),
            is_on_screen: u32::from(is_on_screen),
            light_type: light_type.macro_value(),
            camera_uv_and_depth: light.camera_uv_and_depth(camera).to_array(),
        }
    }
}

/// Values that change between the passes of one frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(clippy::pub_underscore_fields)]
pub struct PassUniforms {
    /// Size of the grid the pass writes.
    pub target_size: [u32; 2],
    /// Size of the grid the pass reads, when it differs from the target.
    pub source_size: [u32; 2],
    /// Min/max tree level being built.
    pub level: u32,
    /// Shadow map steps a ray may take.
    pub max_steps: u32,
    pub min_max_levels: u32,
    pub shadow_map_resolution: u32,
    pub has_glass: u32,
    pub _padding: [u32; 3],
}

impl PassUniforms {
    pub fn new(target_size: (u32, u32)) -> Self {
        Self {
            target_size: [target_size.0, target_size.1],
            ..Self::default()
        }
    }

    pub fn with_source_size(mut self, size: (u32, u32)) -> Self {
        self.source_size = [size.0, size.1];
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }
}
