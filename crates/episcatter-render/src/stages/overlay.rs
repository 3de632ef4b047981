//! Visualization of epipolar sample locations.

use glam::Vec4;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_sprites, Sprite};
use crate::resources::missing;
use crate::surface::{SampleTag, Surface};
use crate::technique::TechniqueId;

use super::FrameView;

pub const REFERENCE_SAMPLE_COLOR: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
pub const INTERPOLATED_SAMPLE_COLOR: Vec4 = Vec4::new(0.0, 1.0, 0.0, 0.5);

/// Draws ray-marching samples as 3x3 red squares and interpolated samples as
/// single green pixels over `dst`.
pub fn render_sample_locations(
    ctx: &mut RenderContext,
    _frame: &FrameView<'_>,
    dst: &mut Surface<Vec4>,
) -> RenderResult<()> {
    let blend = ctx.techniques.get(TechniqueId::RenderSampleLocations)?.blend();
    let epipolar = ctx.surfaces.epipolar.as_ref().ok_or_else(|| missing("epipolar"))?;
    let (samples, slices) = (epipolar.samples(), epipolar.slices());
    let sprites = (0..slices)
        .flat_map(|slice| (0..samples).map(move |sample| (sample, slice)))
        .filter_map(|(sample, slice)| {
            let (radius, color) = match epipolar.tags.get(sample, slice) {
                SampleTag::Discarded => return None,
                SampleTag::Interpolated => (0, INTERPOLATED_SAMPLE_COLOR),
                SampleTag::Reference => (1, REFERENCE_SAMPLE_COLOR),
            };
            Some(Sprite {
                center: epipolar.coordinates.get(sample, slice),
                radius,
                color,
            })
        });
    let fragments = draw_sprites(dst, sprites, blend);
    ctx.record_pass(TechniqueId::RenderSampleLocations, fragments);
    Ok(())
}
