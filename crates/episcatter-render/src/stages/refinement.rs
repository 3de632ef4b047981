//! Adaptive selection of the samples that are ray marched.
//!
//! Every slice starts from a regular lattice of ray-marching samples spaced
//! `initial_step` apart (denser near an on-screen epipole). Each lattice
//! interval is bisected while its ends differ in depth by more than the
//! threshold or it contains a depth break between adjacent samples. Every
//! sample then records the two ray-marching samples it interpolates from.

use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::quad::{draw_quad_tagged, Fragment, TagOnly, Viewport};
use crate::resources::missing;
use crate::surface::InterpolationSource;
use crate::technique::TechniqueId;

use super::{is_valid, FrameView};

/// Region near the epipole sampled more densely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpipoleZone {
    /// Samples `0..length` use the denser step.
    pub length: usize,
    pub step: usize,
}

/// Parameters of one refinement dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementParams {
    pub initial_step: usize,
    /// Samples processed together; a multiple of `initial_step`.
    pub group_size: usize,
    pub threshold: f32,
    pub epipole_zone: Option<EpipoleZone>,
}

impl RefinementParams {
    /// Parameters for `samples` samples per slice.
    pub fn new(
        samples: u32,
        initial_step: u32,
        group_size: u32,
        threshold: f32,
        density_factor: u32,
        light_on_screen: bool,
    ) -> Self {
        let initial_step = initial_step.max(1) as usize;
        let density = density_factor.max(1) as usize;
        let epipole_zone = (light_on_screen && density > 1).then(|| EpipoleZone {
            length: (initial_step * density).min(samples as usize),
            step: (initial_step / density).max(1),
        });
        Self {
            initial_step,
            group_size: group_size.max(1) as usize,
            threshold,
            epipole_zone,
        }
    }

    fn next_lattice_point(&self, left: usize) -> usize {
        match self.epipole_zone {
            Some(zone) if left < zone.length => (left + zone.step).min(zone.length),
            _ => left + self.initial_step,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn source(left: usize, right: usize) -> InterpolationSource {
    InterpolationSource::new(left as u16, right as u16)
}

/// Computes interpolation sources for one slice. `depths` holds the
/// camera-space Z of every sample, with the invalid sentinel for discarded
/// samples; `out` must have the same length.
pub fn refine_slice(depths: &[f32], params: &RefinementParams, out: &mut [InterpolationSource]) {
    debug_assert_eq!(depths.len(), out.len());
    let m = depths.len();
    let mut start = 0;
    while start < m {
        let end = (start + params.group_size).min(m);
        refine_group(depths, params, start, end, out);
        start = end;
    }
}

fn refine_group(
    depths: &[f32],
    params: &RefinementParams,
    start: usize,
    end: usize,
    out: &mut [InterpolationSource],
) {
    let m = depths.len();
    let mut left = start;
    while left < end {
        out[left] = source(left, left);
        let next = params.next_lattice_point(left);
        if next >= m {
            close_slice(depths, params.threshold, left, out);
            return;
        }
        let right = next.min(end);
        if is_valid(depths[left]) && is_valid(depths[right]) {
            bisect(depths, params.threshold, left, right, out);
        } else {
            for s in &mut out[left + 1..right] {
                *s = source(left, left);
            }
        }
        left = right;
    }
}

/// Last valid sample after `left`.
fn closing_sample(depths: &[f32], left: usize) -> Option<usize> {
    (left + 1..depths.len()).rev().find(|&i| is_valid(depths[i]))
}

/// Refines the interval from the last lattice point to the last valid
/// sample of the slice, which becomes a ray-marching sample. Samples past it
/// take it as their only source.
fn close_slice(depths: &[f32], threshold: f32, left: usize, out: &mut [InterpolationSource]) {
    let right = match closing_sample(depths, left) {
        Some(right) if is_valid(depths[left]) => right,
        _ => {
            for s in &mut out[left + 1..] {
                *s = source(left, left);
            }
            return;
        }
    };
    out[right] = source(right, right);
    bisect(depths, threshold, left, right, out);
    for s in &mut out[right + 1..] {
        *s = source(right, right);
    }
}

fn has_depth_break(depths: &[f32], threshold: f32, left: usize, right: usize) -> bool {
    depths[left..=right]
        .windows(2)
        .any(|pair| (pair[1] - pair[0]).abs() > threshold)
}

fn bisect(depths: &[f32], threshold: f32, left: usize, right: usize, out: &mut [InterpolationSource]) {
    if right - left <= 1 {
        return;
    }
    let refine = (depths[right] - depths[left]).abs() > threshold
        || has_depth_break(depths, threshold, left, right);
    if refine {
        let mid = (left + right) / 2;
        out[mid] = source(mid, mid);
        bisect(depths, threshold, left, mid, out);
        bisect(depths, threshold, mid, right, out);
    } else {
        for s in &mut out[left + 1..right] {
            *s = source(left, right);
        }
    }
}

/// Runs the refinement compute pass over every slice.
pub fn refine_sample_locations(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::RefineSampleLocations)?;
    let macro_value = |name: &str| {
        technique.macros.get(name).ok_or_else(|| {
            RenderError::ShaderCompilationFailed(format!("refinement macro {name} missing"))
        })
    };
    let samples = macro_value("MAX_SAMPLES_IN_SLICE")?;
    let params = RefinementParams::new(
        samples,
        macro_value("INITIAL_SAMPLE_STEP")?,
        macro_value("THREAD_GROUP_SIZE")?,
        frame.config.refinement_threshold,
        frame.config.epipole_sampling_density_factor,
        frame.is_light_on_screen,
    );
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    if epipolar.samples() != samples {
        return Err(RenderError::InvalidFrameInput(format!(
            "refinement compiled for {samples} samples, surfaces hold {}",
            epipolar.samples()
        )));
    }
    let slices = epipolar.slices();
    let mut row = vec![InterpolationSource::default(); samples as usize];
    for slice in 0..slices {
        refine_slice(epipolar.camera_z.row(slice), &params, &mut row);
        for (x, s) in (0..samples).zip(&row) {
            epipolar.interpolation_sources.set(x, slice, *s);
        }
    }
    ctx.record_pass(
        TechniqueId::RefineSampleLocations,
        samples as usize * slices as usize,
    );
    Ok(())
}

/// Promotes every interpolated sample that references itself to a
/// ray-marching sample.
pub fn mark_ray_marching_samples(ctx: &mut RenderContext, _frame: &FrameView<'_>) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::MarkRayMarchingSamples)?;
    let (rule, blend) = (technique.sample_rule(), technique.blend());
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    let (samples, slices) = (epipolar.samples(), epipolar.slices());
    let sources = &epipolar.interpolation_sources;
    #[allow(clippy::cast_possible_truncation)]
    let fragments = draw_quad_tagged(
        &mut TagOnly {
            width: samples,
            height: slices,
        },
        &mut epipolar.tags,
        rule,
        Viewport::full(samples, slices),
        blend,
        |inv| {
            if sources.get(inv.x, inv.y).is_self_reference(inv.x as u16) {
                Fragment::Output(())
            } else {
                Fragment::Discard
            }
        },
    );
    ctx.record_pass(TechniqueId::MarkRayMarchingSamples, fragments);
    Ok(())
}
