//! Direct ray marching for pixels the epipolar samples could not resolve.
//!
//! The same passes run over the whole screen for the brute force technique.

use glam::Vec4;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad_tagged, Fragment, Viewport};
use crate::resources::missing;
use crate::surface::{PixelTag, Radiance16, Surface};
use crate::technique::TechniqueId;

use super::ray_march::RayMarcher;
use super::{FrameView, DEPTH_BREAK_COLOR};

/// Steps of the first depth break pass.
pub fn first_fix_steps(shadow_map_resolution: u32) -> u32 {
    (shadow_map_resolution / 4).clamp(1, 256)
}

/// Steps of the depth break pass after upscaling.
pub fn second_fix_steps(shadow_map_resolution: u32) -> u32 {
    (shadow_map_resolution / 8).clamp(1, 128)
}

/// Ray marches unresolved screen pixels and composites them onto the source.
pub fn fix_and_apply_inscattering(
    ctx: &mut RenderContext,
    frame: &FrameView<'_>,
    dst: &mut Surface<Vec4>,
    max_steps: u32,
) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::FixAndApplyInscattering)?;
    let (rule, blend) = (technique.pixel_rule(), technique.blend());
    let marcher = RayMarcher::new(frame, ctx.surfaces.tables.as_ref());
    let screen = ctx.surfaces.screen.as_mut().ok_or_else(|| missing("screen"))?;
    let camera_z = &screen.camera_z;
    let src = frame.src_color;
    let show = frame.config.show_depth_breaks;
    let fragments = draw_quad_tagged(
        dst,
        &mut screen.tags,
        rule,
        Viewport::full(frame.width, frame.height),
        blend,
        |inv| {
            if show {
                return Fragment::Output(DEPTH_BREAK_COLOR);
            }
            let z = camera_z.get(inv.x, inv.y);
            let insctr = marcher.inscattering(inv.ndc, z, max_steps, None);
            Fragment::Output(frame.apply_inscattering(src.get(inv.x, inv.y), insctr, z, inv.ndc))
        },
    );
    if fragments > 0 {
        log::debug!("ray marched {fragments} unresolved pixels");
    }
    ctx.record_pass(TechniqueId::FixAndApplyInscattering, fragments);
    Ok(())
}

/// Ray marches unresolved pixels of the downscaled scattered light surface.
pub fn fix_inscattering(ctx: &mut RenderContext, frame: &FrameView<'_>, max_steps: u32) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::FixInscattering)?;
    let (rule, blend) = (technique.pixel_rule(), technique.blend());
    let marcher = RayMarcher::new(frame, ctx.surfaces.tables.as_ref());
    let downscaled = ctx
        .surfaces
        .downscaled
        .as_mut()
        .ok_or_else(|| missing("downscaled"))?;
    let (width, height) = downscaled.scattering.size();
    let camera_z = &downscaled.camera_z;
    let show = frame.config.show_depth_breaks;
    let fragments = draw_quad_tagged(
        &mut downscaled.scattering,
        &mut downscaled.tags,
        rule,
        Viewport::full(width, height),
        blend,
        |inv| {
            let insctr = if show {
                DEPTH_BREAK_COLOR.truncate()
            } else {
                marcher.inscattering(inv.ndc, camera_z.get(inv.x, inv.y), max_steps, None)
            };
            Fragment::Output(Radiance16::from_rgb(insctr))
        },
    );
    ctx.record_pass(TechniqueId::FixInscattering, fragments);
    Ok(())
}

/// Brute force technique: ray marches every pixel.
pub fn render_brute_force(ctx: &mut RenderContext, frame: &FrameView<'_>, dst: &mut Surface<Vec4>) -> RenderResult<()> {
    ctx.surfaces
        .screen
        .as_mut()
        .ok_or_else(|| missing("screen"))?
        .tags
        .fill(PixelTag::Unresolved);
    fix_and_apply_inscattering(ctx, frame, dst, frame.shadow_map_resolution())
}
