//! Headless GPU helpers: the device pipeline and a mirror of host state.

use pollster::FutureExt;

use episcatter_render::{GpuLightScatteringPipeline, GpuMirror, LightScatteringPipeline};

use crate::Result;

/// Textures and buffers uploaded by [`mirror_pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSummary {
    /// Label and format of every uploaded surface.
    pub textures: Vec<(String, wgpu::TextureFormat)>,
    pub constants_uploaded: bool,
}

/// Creates a headless device.
pub fn headless_mirror() -> Result<GpuMirror> {
    Ok(GpuMirror::new_headless().block_on()?)
}

/// Creates the light scattering pipeline on a headless device.
pub fn headless_pipeline() -> Result<GpuLightScatteringPipeline> {
    Ok(GpuLightScatteringPipeline::new_headless().block_on()?)
}

/// Uploads the intermediate surfaces and frame constants of the last frame.
pub fn mirror_pipeline(mirror: &mut GpuMirror, pipeline: &LightScatteringPipeline) -> Result<MirrorSummary> {
    let mut textures = Vec::new();
    let surfaces = &pipeline.context().surfaces;
    if let Some(screen) = &surfaces.screen {
        textures.push(upload(mirror, &screen.camera_z)?);
        textures.push(upload(mirror, &screen.tags)?);
    }
    if let Some(epipolar) = &surfaces.epipolar {
        textures.push(upload(mirror, &epipolar.slice_endpoints)?);
        textures.push(upload(mirror, &epipolar.coordinates)?);
        textures.push(upload(mirror, &epipolar.camera_z)?);
        textures.push(upload(mirror, &epipolar.tags)?);
        textures.push(upload(mirror, &epipolar.interpolation_sources)?);
        textures.push(upload(mirror, &epipolar.initial_scattering)?);
        textures.push(upload(mirror, &epipolar.scattering)?);
    }
    if let Some(min_max) = &surfaces.min_max {
        textures.push(upload(mirror, &min_max.slice_uv_dir)?);
        textures.push(upload(mirror, min_max.pyramid.buffer(0))?);
    }
    if let Some(downscaled) = &surfaces.downscaled {
        textures.push(upload(mirror, &downscaled.scattering)?);
        textures.push(upload(mirror, &downscaled.camera_z)?);
        textures.push(upload(mirror, &downscaled.tags)?);
    }
    let constants = pipeline.context().constants();
    if let Some(constants) = constants {
        mirror.upload_constants(constants);
    }
    log::info!("mirrored {} surfaces to the device", textures.len());
    Ok(MirrorSummary {
        textures,
        constants_uploaded: constants.is_some(),
    })
}

fn upload<T: episcatter_render::Texel>(
    mirror: &mut GpuMirror,
    surface: &episcatter_render::Surface<T>,
) -> Result<(String, wgpu::TextureFormat)> {
    let format = mirror.upload(surface)?.format;
    Ok((surface.label().to_owned(), format))
}
