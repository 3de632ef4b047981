//! Bilateral upsampling of downscaled scattered light.

use glam::{Vec2, Vec3, Vec4};

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad_tagged, Fragment, Viewport};
use crate::resources::{missing, DownscaledSurfaces};
use crate::surface::{PixelTag, Surface};
use crate::technique::TechniqueId;

use super::unwarp::MIN_TOTAL_WEIGHT;
use super::{depth_weight, FrameView};

/// Scattered light at a full resolution pixel from the four nearest resolved
/// downscaled texels.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn upscale_pixel(downscaled: &DownscaledSurfaces, uv: Vec2, camera_z: f32, threshold: f32) -> Option<Vec3> {
    let (w, h) = downscaled.scattering.size();
    let texel = uv * Vec2::new(w as f32, h as f32) - 0.5;
    let base = texel.floor();
    let f = texel - base;
    let (x0, y0) = (base.x as i64, base.y as i64);
    let mut sum = Vec3::ZERO;
    let mut total = 0.0;
    for (dx, dy, bilinear) in [
        (0, 0, (1.0 - f.x) * (1.0 - f.y)),
        (1, 0, f.x * (1.0 - f.y)),
        (0, 1, (1.0 - f.x) * f.y),
        (1, 1, f.x * f.y),
    ] {
        let (x, y) = (x0 + dx, y0 + dy);
        if downscaled.tags.get_clamped(x, y) != PixelTag::Resolved {
            continue;
        }
        let weight = bilinear * depth_weight(downscaled.camera_z.get_clamped(x, y), camera_z, threshold);
        sum += downscaled.scattering.get_clamped(x, y).rgb() * weight;
        total += weight;
    }
    (total >= MIN_TOTAL_WEIGHT).then(|| sum / total)
}

/// Upscales the downscaled scattered light and composites it onto the source.
pub fn upscale_inscattering(ctx: &mut RenderContext, frame: &FrameView<'_>, dst: &mut Surface<Vec4>) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::UpscaleInscattering)?;
    let (rule, blend) = (technique.pixel_rule(), technique.blend());
    let downscaled = ctx
        .surfaces
        .downscaled
        .as_ref()
        .ok_or_else(|| missing("downscaled"))?;
    let screen = ctx.surfaces.screen.as_mut().ok_or_else(|| missing("screen"))?;
    screen.tags.fill(PixelTag::Unresolved);
    let camera_z = &screen.camera_z;
    let src = frame.src_color;
    let threshold = frame.config.refinement_threshold;
    let fragments = draw_quad_tagged(
        dst,
        &mut screen.tags,
        rule,
        Viewport::full(frame.width, frame.height),
        blend,
        |inv| {
            let z = camera_z.get(inv.x, inv.y);
            match upscale_pixel(downscaled, inv.uv, z, threshold) {
                Some(insctr) => {
                    Fragment::Output(frame.apply_inscattering(src.get(inv.x, inv.y), insctr, z, inv.ndc))
                }
                None => Fragment::Discard,
            }
        },
    );
    ctx.record_pass(TechniqueId::UpscaleInscattering, fragments);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Radiance16;

    fn downscaled(z: [f32; 4], tags: [PixelTag; 4]) -> DownscaledSurfaces {
        DownscaledSurfaces {
            scattering: Surface::from_texels(
                "s",
                2,
                2,
                (0..4).map(|i| Radiance16::from_rgb(Vec3::splat(i as f32))).collect(),
            )
            .unwrap(),
            camera_z: Surface::from_texels("z", 2, 2, z.to_vec()).unwrap(),
            tags: Surface::from_texels("t", 2, 2, tags.to_vec()).unwrap(),
        }
    }

    #[test]
    fn test_upscale_center_averages() {
        let d = downscaled([5.0; 4], [PixelTag::Resolved; 4]);
        let v = upscale_pixel(&d, Vec2::splat(0.5), 5.0, 0.1).unwrap();
        assert!((v.x - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_upscale_rejects_depth_mismatch_and_unresolved() {
        let d = downscaled(
            [5.0, 50.0, 5.0, 5.0],
            [
                PixelTag::Resolved,
                PixelTag::Resolved,
                PixelTag::Unresolved,
                PixelTag::Unresolved,
            ],
        );
        let v = upscale_pixel(&d, Vec2::splat(0.5), 5.0, 0.1).unwrap();
        assert!(v.x.abs() < 1e-3, "only texel 0 matches, got {v}");
        assert!(upscale_pixel(&d, Vec2::splat(0.5), 500.0, 0.1).is_none());
    }
}
