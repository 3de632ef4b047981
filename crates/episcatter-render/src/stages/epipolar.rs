//! Epipolar slice geometry: slice endpoints and sample coordinates.
//!
//! Slices radiate from the light's screen position (the epipole). Slice `i`
//! exits the screen at perimeter parameter `i / N`, walking the half-pixel
//! inset screen rectangle counter-clockwise from the top-left corner. Samples
//! are spaced uniformly between the slice entry and exit points.

use glam::{Vec2, Vec4};

use episcatter_core::proj_to_uv;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad, draw_quad_tagged, Fragment, Viewport};
use crate::resources::missing;
use crate::surface::{SampleTag, INVALID_COORDINATE};
use crate::technique::TechniqueId;

use super::FrameView;

/// Screen rectangle through the outermost pixel centers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ScreenRect {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(width: u32, height: u32) -> Self {
        let inset = Vec2::new(1.0 / width as f32, 1.0 / height as f32);
        Self {
            min: Vec2::NEG_ONE + inset,
            max: Vec2::ONE - inset,
        }
    }

    /// Point at perimeter parameter `p` in `[0, 1)`.
    pub fn perimeter_point(&self, p: f32) -> Vec2 {
        let scaled = p.rem_euclid(1.0) * 4.0;
        let boundary = scaled.floor().min(3.0);
        let pos = scaled - boundary;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let fraction = match boundary as u32 {
            0 => Vec2::new(0.0, 1.0 - pos),
            1 => Vec2::new(pos, 0.0),
            2 => Vec2::new(1.0, pos),
            _ => Vec2::new(1.0 - pos, 1.0),
        };
        self.min + (self.max - self.min) * fraction
    }

    /// Perimeter parameter of a point on the rectangle boundary; inverse of
    /// [`Self::perimeter_point`].
    pub fn perimeter_param(&self, point: Vec2, edge: Edge) -> f32 {
        let f = ((point - self.min) / (self.max - self.min)).clamp(Vec2::ZERO, Vec2::ONE);
        let (boundary, pos) = match edge {
            Edge::Left => (0.0, 1.0 - f.y),
            Edge::Bottom => (1.0, f.x),
            Edge::Right => (2.0, f.y),
            Edge::Top => (3.0, 1.0 - f.x),
        };
        ((boundary + pos) / 4.0).rem_euclid(1.0)
    }

    /// Where the ray `origin + t * dir`, `t > 0`, leaves the rectangle.
    pub fn exit(&self, origin: Vec2, dir: Vec2) -> (Vec2, Edge) {
        let mut t_exit = f32::INFINITY;
        let mut edge = Edge::Right;
        if dir.x > 0.0 {
            t_exit = (self.max.x - origin.x) / dir.x;
            edge = Edge::Right;
        } else if dir.x < 0.0 {
            t_exit = (self.min.x - origin.x) / dir.x;
            edge = Edge::Left;
        }
        if dir.y > 0.0 {
            let t = (self.max.y - origin.y) / dir.y;
            if t < t_exit {
                t_exit = t;
                edge = Edge::Top;
            }
        } else if dir.y < 0.0 {
            let t = (self.min.y - origin.y) / dir.y;
            if t < t_exit {
                t_exit = t;
                edge = Edge::Bottom;
            }
        }
        if !t_exit.is_finite() {
            return (self.max, Edge::Right);
        }
        ((origin + dir * t_exit).clamp(self.min, self.max), edge)
    }

    /// Liang-Barsky clip of `from + t * (to - from)`, `t` in `[0, 1]`.
    pub fn clip_segment(&self, from: Vec2, to: Vec2) -> Option<(f32, f32)> {
        let d = to - from;
        let mut t0 = 0.0_f32;
        let mut t1 = 1.0_f32;
        for (p, q) in [
            (-d.x, from.x - self.min.x),
            (d.x, self.max.x - from.x),
            (-d.y, from.y - self.min.y),
            (d.y, self.max.y - from.y),
        ] {
            if p.abs() < 1e-12 {
                if q < 0.0 {
                    return None;
                }
            } else {
                let r = q / p;
                if p < 0.0 {
                    t0 = t0.max(r);
                } else {
                    t1 = t1.min(r);
                }
            }
        }
        (t0 <= t1).then_some((t0, t1))
    }
}

/// Side of the screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Bottom,
    Right,
    Top,
}

/// Slice endpoints with both points set to the invalid sentinel.
pub const INVALID_SLICE: Vec4 = Vec4::splat(INVALID_COORDINATE);

/// Entry and exit points `(entry.xy, exit.xy)` of slice `slice` of `num_slices`.
#[allow(clippy::cast_precision_loss, clippy::too_many_arguments)]
pub fn slice_endpoints(
    slice: u32,
    num_slices: u32,
    light_pos: Vec2,
    light_on_screen: bool,
    width: u32,
    height: u32,
    optimize: bool,
    samples: u32,
) -> Vec4 {
    let rect = ScreenRect::new(width, height);
    let exit = rect.perimeter_point(slice as f32 / num_slices as f32);
    let entry = if light_on_screen {
        light_pos
    } else {
        match rect.clip_segment(light_pos, exit) {
            Some((t_enter, _)) if t_enter < 1.0 - 1e-4 => light_pos + (exit - light_pos) * t_enter,
            _ => return INVALID_SLICE,
        }
    };
    let mut exit = exit;
    if optimize {
        let screen_len = ((exit - entry) * Vec2::new(width as f32, height as f32) * 0.5).length();
        if screen_len > 1e-3 {
            let extension = (samples as f32 / screen_len).max(1.0);
            exit = entry + (exit - entry) * extension;
        }
    }
    Vec4::new(entry.x, entry.y, exit.x, exit.y)
}

/// Screen position of sample `index` on a slice, or `None` when the slice is
/// invalid or the sample falls off screen.
#[allow(clippy::cast_precision_loss)]
pub fn sample_coordinate(endpoints: Vec4, index: u32, samples: u32) -> Option<Vec2> {
    if !super::is_valid(endpoints.x) {
        return None;
    }
    let entry = endpoints.truncate().truncate();
    let exit = Vec2::new(endpoints.z, endpoints.w);
    let t = index as f32 / (samples.max(2) - 1) as f32;
    let coord = entry.lerp(exit, t);
    (coord.x.abs() <= 1.0 && coord.y.abs() <= 1.0).then_some(coord)
}

/// Renders the `N x 1` slice endpoint texture.
pub fn render_slice_endpoints(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let blend = ctx.techniques.get(TechniqueId::RenderSliceEndpoints)?.blend();
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    let slices = epipolar.slices();
    let samples = epipolar.samples();
    let config = frame.config;
    let fragments = draw_quad(
        &mut epipolar.slice_endpoints,
        Viewport::full(slices, 1),
        blend,
        |inv| {
            Fragment::Output(slice_endpoints(
                inv.x,
                slices,
                frame.light_screen_pos,
                frame.is_light_on_screen,
                frame.width,
                frame.height,
                config.optimize_sample_locations,
                samples,
            ))
        },
    );
    if fragments > 0
        && epipolar
            .slice_endpoints
            .texels()
            .iter()
            .all(|e| !super::is_valid(e.x))
    {
        log::warn!("no epipolar slice crosses the screen for this light position");
    }
    ctx.record_pass(TechniqueId::RenderSliceEndpoints, fragments);
    Ok(())
}

/// Renders sample coordinates and their camera-space Z, tagging on-screen
/// samples as interpolated and leaving the rest discarded.
pub fn render_coordinate_texture(ctx: &mut RenderContext, _frame: &FrameView<'_>) -> RenderResult<()> {
    let technique = ctx.techniques.get(TechniqueId::RenderCoordinateTexture)?;
    let (rule, blend) = (technique.sample_rule(), technique.blend());
    let screen = ctx.surfaces.screen.as_ref().ok_or_else(|| missing("screen"))?;
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    let (samples, slices) = (epipolar.samples(), epipolar.slices());

    epipolar
        .coordinates
        .fill(Vec2::splat(INVALID_COORDINATE));
    epipolar.camera_z.fill(INVALID_COORDINATE);
    epipolar.tags.fill(SampleTag::Discarded);

    let endpoints = &epipolar.slice_endpoints;
    let screen_z = &screen.camera_z;
    let fragments = draw_quad_tagged(
        &mut (&mut epipolar.coordinates, &mut epipolar.camera_z),
        &mut epipolar.tags,
        rule,
        Viewport::full(samples, slices),
        blend,
        |inv| match sample_coordinate(endpoints.get(inv.y, 0), inv.x, samples) {
            Some(coord) => Fragment::Output((coord, screen_z.sample_linear(proj_to_uv(coord)))),
            None => Fragment::Discard,
        },
    );
    ctx.record_pass(TechniqueId::RenderCoordinateTexture, fragments);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_perimeter_starts_top_left_counter_clockwise() {
        let rect = ScreenRect::new(100, 50);
        let p0 = rect.perimeter_point(0.0);
        assert!((p0 - Vec2::new(-0.99, 0.98)).length() < 1e-5);
        let p1 = rect.perimeter_point(0.25);
        assert!((p1 - Vec2::new(-0.99, -0.98)).length() < 1e-5);
        let p2 = rect.perimeter_point(0.5);
        assert!((p2 - Vec2::new(0.99, -0.98)).length() < 1e-5);
        let p3 = rect.perimeter_point(0.75);
        assert!((p3 - Vec2::new(0.99, 0.98)).length() < 1e-5);
    }

    #[test]
    fn test_perimeter_param_inverts_point() {
        let rect = ScreenRect::new(64, 48);
        for p in [0.05_f32, 0.3, 0.55, 0.8, 0.99] {
            let point = rect.perimeter_point(p);
            let (exit, edge) = rect.exit(Vec2::ZERO, point);
            let back = rect.perimeter_param(exit, edge);
            assert!((back - p).abs() < 1e-4, "{p} -> {back}");
        }
    }

    #[test]
    fn test_on_screen_light_is_entry() {
        let e = slice_endpoints(3, 16, Vec2::new(0.1, 0.2), true, 64, 64, false, 32);
        assert_eq!(e.x, 0.1);
        assert_eq!(e.y, 0.2);
    }

    #[test]
    fn test_off_screen_light_clips_to_screen() {
        let light = Vec2::new(3.0, 0.0);
        let e = slice_endpoints(8, 64, light, false, 64, 64, false, 32);
        assert!(super::super::is_valid(e.x));
        assert!((e.x - (1.0 - 1.0 / 64.0)).abs() < 1e-5);
        assert!(e.z < 0.0);
        // A slice exiting on the edge facing the light never enters the screen.
        let facing = slice_endpoints(40, 64, light, false, 64, 64, false, 32);
        assert_eq!(facing, INVALID_SLICE);
    }

    #[test]
    fn test_optimize_extends_short_slices() {
        let light = Vec2::new(0.9, 0.0);
        let plain = slice_endpoints(40, 64, light, true, 64, 64, false, 256);
        let optimized = slice_endpoints(40, 64, light, true, 64, 64, true, 256);
        let len = |e: Vec4| (Vec2::new(e.z, e.w) - Vec2::new(e.x, e.y)).length();
        assert!(len(optimized) > len(plain));
        assert!((len(optimized) * 32.0 - 256.0).abs() < 1e-2);
    }

    #[test]
    fn test_sample_coordinate_discards_off_screen() {
        let endpoints = Vec4::new(0.0, 0.0, 2.0, 0.0);
        assert_eq!(sample_coordinate(endpoints, 0, 5), Some(Vec2::ZERO));
        assert_eq!(sample_coordinate(endpoints, 2, 5), Some(Vec2::new(1.0, 0.0)));
        assert_eq!(sample_coordinate(endpoints, 3, 5), None);
        assert_eq!(sample_coordinate(INVALID_SLICE, 0, 5), None);
    }

    proptest! {
        #[test]
        fn prop_coordinates_on_screen_or_invalid(
            lx in -150.0_f32..150.0,
            ly in -150.0_f32..150.0,
            slice in 0_u32..128,
            index in 0_u32..64,
            optimize in any::<bool>(),
        ) {
            let light = Vec2::new(lx, ly);
            let on_screen = episcatter_core::LightAttribs::is_on_screen(light, 80, 60);
            let e = slice_endpoints(slice, 128, light, on_screen, 80, 60, optimize, 64);
            match sample_coordinate(e, index, 64) {
                Some(c) => prop_assert!(c.x.abs() <= 1.0 && c.y.abs() <= 1.0),
                None => {}
            }
            if super::super::is_valid(e.x) {
                prop_assert!(e.x.abs() <= 1.0 + 1e-4 && e.y.abs() <= 1.0 + 1e-4);
            }
        }
    }
}
