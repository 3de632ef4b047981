//! Camera-space Z reconstruction from the depth buffer.

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad, Fragment, Viewport};
use crate::resources::missing;
use crate::technique::TechniqueId;

use super::FrameView;

/// Converts the depth buffer to linear camera-space Z at full resolution,
/// and at reduced resolution when scattering is downscaled.
pub fn reconstruct_camera_space_z(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let blend = ctx
        .techniques
        .get(TechniqueId::ReconstructCameraSpaceZ)?
        .blend();
    let screen = ctx.surfaces.screen.as_mut().ok_or_else(|| missing("screen"))?;
    let depth = frame.src_depth;
    let camera = frame.camera;
    let fragments = draw_quad(
        &mut screen.camera_z,
        Viewport::full(frame.width, frame.height),
        blend,
        |inv| Fragment::Output(camera.depth_to_camera_z(depth.get(inv.x, inv.y))),
    );
    ctx.record_pass(TechniqueId::ReconstructCameraSpaceZ, fragments);

    if frame.config.is_downscaled() {
        let screen = ctx.surfaces.screen.as_ref().ok_or_else(|| missing("screen"))?;
        let downscaled = ctx
            .surfaces
            .downscaled
            .as_mut()
            .ok_or_else(|| missing("downscaled"))?;
        let (w, h) = downscaled.camera_z.size();
        let full_z = &screen.camera_z;
        let fragments = draw_quad(&mut downscaled.camera_z, Viewport::full(w, h), blend, |inv| {
            Fragment::Output(full_z.sample_nearest(inv.uv))
        });
        ctx.record_pass(TechniqueId::ReconstructCameraSpaceZ, fragments);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;
    use crate::technique::ScreenSize;
    use episcatter_core::{CameraAttribs, LightAttribs, MediaParams, PostProcessConfig};
    use glam::{Mat4, Vec3, Vec4};

    #[test]
    fn test_reconstructs_linear_depth() {
        let camera = CameraAttribs::look_at(
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            1.0,
            0.5,
            50.0,
        );
        let light = LightAttribs::directional(Vec3::Y, Vec3::ONE, 1.0, Mat4::IDENTITY);
        let config = PostProcessConfig::default().with_downscale(2);
        let media = MediaParams::compute(&config);
        let color = Surface::<Vec4>::new("color", 4, 4).unwrap();
        let d = camera.camera_z_to_depth(7.0);
        let depth = Surface::from_texels("depth", 4, 4, vec![d; 16]).unwrap();
        let shadow = Surface::<f32>::new("shadow", 8, 8).unwrap();
        let frame = FrameView::new(&config, &media, &camera, &light, &color, &depth, &shadow, None);

        let mut ctx = RenderContext::new();
        ctx.surfaces.ensure_screen(4, 4).unwrap();
        ctx.surfaces.ensure_downscaled(2, 2).unwrap();
        ctx.techniques
            .get_or_compile(
                TechniqueId::ReconstructCameraSpaceZ,
                &config,
                ScreenSize { width: 4, height: 4 },
            )
            .unwrap();
        reconstruct_camera_space_z(&mut ctx, &frame).unwrap();

        let z = ctx.surfaces.screen().unwrap().camera_z.get(2, 3);
        assert!((z - 7.0).abs() < 1e-3);
        let dz = ctx.surfaces.downscaled().unwrap().camera_z.get(1, 1);
        assert!((dz - 7.0).abs() < 1e-3);
        assert_eq!(ctx.passes_of(TechniqueId::ReconstructCameraSpaceZ), 2);
    }
}
