//! Interpolation of scattered light between ray-marching samples.

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad, Fragment, Viewport};
use crate::resources::missing;
use crate::surface::{InterpolationSource, Radiance16, SampleTag, Surface};
use crate::technique::TechniqueId;

use super::FrameView;

/// Scattered light of sample `index` from its interpolation sources.
///
/// A sample whose sources are equal copies that source's value unchanged.
#[allow(clippy::cast_precision_loss)]
pub fn interpolate_sample(initial: &[Radiance16], index: u32, source: InterpolationSource) -> Radiance16 {
    let (left, right) = (u32::from(source.left), u32::from(source.right));
    if left == right {
        return initial[left as usize];
    }
    let w = (index.saturating_sub(left)) as f32 / (right - left) as f32;
    let l = initial[left as usize].rgb();
    let r = initial[right as usize].rgb();
    Radiance16::from_rgb(l.lerp(r, w.clamp(0.0, 1.0)))
}

fn interpolate_row(
    initial: &Surface<Radiance16>,
    sources: &Surface<InterpolationSource>,
    x: u32,
    y: u32,
) -> Radiance16 {
    interpolate_sample(initial.row(y), x, sources.get(x, y))
}

/// Fills the interpolated scattering surface; discarded samples stay zero.
pub fn interpolate_irradiance(ctx: &mut RenderContext, _frame: &FrameView<'_>) -> RenderResult<()> {
    let blend = ctx.techniques.get(TechniqueId::InterpolateIrradiance)?.blend();
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    let (samples, slices) = (epipolar.samples(), epipolar.slices());
    epipolar.scattering.fill(Radiance16::default());
    let initial = &epipolar.initial_scattering;
    let sources = &epipolar.interpolation_sources;
    let tags = &epipolar.tags;
    let fragments = draw_quad(
        &mut epipolar.scattering,
        Viewport::full(samples, slices),
        blend,
        |inv| {
            if tags.get(inv.x, inv.y) == SampleTag::Discarded {
                Fragment::Discard
            } else {
                Fragment::Output(interpolate_row(initial, sources, inv.x, inv.y))
            }
        },
    );
    ctx.record_pass(TechniqueId::InterpolateIrradiance, fragments);
    Ok(())
}
