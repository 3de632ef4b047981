//! Transforms scattered light from epipolar space back to the screen.
//!
//! A pixel lies between the two slices whose exit points bracket its own
//! exit point on the screen boundary. On each of those slices it takes the
//! two samples around its projection, weighting every sample by its
//! bilinear weight and by how well its depth matches the pixel's depth. When
//! no sample is usable the pixel stays unresolved for the depth break fix.

use glam::{Vec2, Vec3, Vec4};

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad_tagged, Fragment, Viewport};
use crate::resources::{missing, EpipolarSurfaces};
use crate::surface::{PixelTag, Radiance16, SampleTag, Surface};
use crate::technique::TechniqueId;

use super::epipolar::ScreenRect;
use super::{depth_weight, is_valid, FrameView};

/// Total weight below which a pixel is left unresolved.
pub const MIN_TOTAL_WEIGHT: f32 = 1e-2;

/// The two slices around a pixel and their weights.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn bracketing_slices(rect: &ScreenRect, epipole: Vec2, pixel: Vec2, num_slices: u32) -> [(u32, f32); 2] {
    let mut dir = pixel - epipole;
    if dir.length_squared() < 1e-12 {
        dir = Vec2::X;
    }
    let (exit, edge) = rect.exit(pixel, dir);
    let s = rect.perimeter_param(exit, edge) * num_slices as f32;
    let i0 = s.floor();
    let w = s - i0;
    let i0 = (i0 as u32) % num_slices;
    [(i0, 1.0 - w), ((i0 + 1) % num_slices, w)]
}

/// Inscattered light at a screen pixel, or `None` when no epipolar sample
/// lies close enough in depth.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn unwarp_pixel(frame: &FrameView<'_>, epipolar: &EpipolarSurfaces, pixel: Vec2, camera_z: f32) -> Option<Vec3> {
    let slices = epipolar.slices();
    let samples = epipolar.samples();
    let rect = ScreenRect::new(frame.width, frame.height);
    let threshold = frame.config.refinement_threshold;
    let mut sum = Vec3::ZERO;
    let mut total = 0.0;
    for (slice, slice_weight) in bracketing_slices(&rect, frame.light_screen_pos, pixel, slices) {
        if slice_weight <= 0.0 {
            continue;
        }
        let endpoints = epipolar.slice_endpoints.get(slice, 0);
        if !is_valid(endpoints.x) {
            continue;
        }
        let entry = Vec2::new(endpoints.x, endpoints.y);
        let exit = Vec2::new(endpoints.z, endpoints.w);
        let seg = exit - entry;
        let len2 = seg.length_squared();
        if len2 < 1e-12 {
            continue;
        }
        let u = ((pixel - entry).dot(seg) / len2).clamp(0.0, 1.0);
        let f = u * (samples - 1) as f32;
        let j0 = (f.floor() as u32).min(samples - 2);
        let w = f - j0 as f32;
        for (j, sample_weight) in [(j0, 1.0 - w), (j0 + 1, w)] {
            if epipolar.tags.get(j, slice) == SampleTag::Discarded {
                continue;
            }
            let weight = slice_weight
                * sample_weight
                * depth_weight(epipolar.camera_z.get(j, slice), camera_z, threshold);
            sum += epipolar.scattering.get(j, slice).rgb() * weight;
            total += weight;
        }
    }
    (total >= MIN_TOTAL_WEIGHT).then(|| sum / total)
}

/// Unwarps at full resolution and composites onto the source color.
pub fn apply_inscattered_radiance(
    ctx: &mut RenderContext,
    frame: &FrameView<'_>,
    dst: &mut Surface<Vec4>,
) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::ApplyInscatteredRadiance)?;
    let (rule, blend) = (technique.pixel_rule(), technique.blend());
    let epipolar = ctx.surfaces.epipolar.as_ref().ok_or_else(|| missing("epipolar"))?;
    let screen = ctx.surfaces.screen.as_mut().ok_or_else(|| missing("screen"))?;
    screen.tags.fill(PixelTag::Unresolved);
    let camera_z = &screen.camera_z;
    let src = frame.src_color;
    let fragments = draw_quad_tagged(
        dst,
        &mut screen.tags,
        rule,
        Viewport::full(frame.width, frame.height),
        blend,
        |inv| {
            let z = camera_z.get(inv.x, inv.y);
            match unwarp_pixel(frame, epipolar, inv.ndc, z) {
                Some(insctr) => Fragment::Output(frame.apply_inscattering(
                    src.get(inv.x, inv.y),
                    insctr,
                    z,
                    inv.ndc,
                )),
                None => Fragment::Discard,
            }
        },
    );
    ctx.record_pass(TechniqueId::ApplyInscatteredRadiance, fragments);
    Ok(())
}

/// Unwarps into the downscaled scattered light surface.
pub fn unwarp_epipolar_scattering(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::UnwarpEpipolarScattering)?;
    let (rule, blend) = (technique.pixel_rule(), technique.blend());
    let epipolar = ctx.surfaces.epipolar.as_ref().ok_or_else(|| missing("epipolar"))?;
    let downscaled = ctx
        .surfaces
        .downscaled
        .as_mut()
        .ok_or_else(|| missing("downscaled"))?;
    downscaled.tags.fill(PixelTag::Unresolved);
    downscaled.scattering.fill(Radiance16::default());
    let (width, height) = downscaled.scattering.size();
    let camera_z = &downscaled.camera_z;
    let fragments = draw_quad_tagged(
        &mut downscaled.scattering,
        &mut downscaled.tags,
        rule,
        Viewport::full(width, height),
        blend,
        |inv| match unwarp_pixel(frame, epipolar, inv.ndc, camera_z.get(inv.x, inv.y)) {
            Some(insctr) => Fragment::Output(Radiance16::from_rgb(insctr)),
            None => Fragment::Discard,
        },
    );
    ctx.record_pass(TechniqueId::UnwarpEpipolarScattering, fragments);
    Ok(())
}
