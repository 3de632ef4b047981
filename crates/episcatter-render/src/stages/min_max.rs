//! 1D min/max trees over the shadow map, one per epipolar slice.
//!
//! Every view ray of a slice projects onto the same line of the shadow map,
//! passing through the camera's shadow map position. The line is stepped one
//! texel at a time from a per-slice origin; level 0 bounds the depths between
//! positions `2i` and `2i + 2`, and each further level merges two children.
//! Levels are stored side by side in one row per slice: level `L` (step
//! `s = 2^(L + 1)`) occupies `R / s` texels starting at `R - 2R / s`.

use glam::{Vec2, Vec4, Vec4Swizzles};

use episcatter_core::proj_to_uv;

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad, Fragment, Viewport};
use crate::resources::missing;
use crate::surface::{MinMaxDepth, Surface};
use crate::technique::TechniqueId;

use super::{is_valid, FrameView};

/// Origin and direction stored for slices without a usable shadow map line.
pub const INVALID_UV_DIR: Vec4 = Vec4::ZERO;

/// Fraction of the tracing distance at which slice exits are unprojected.
const EXIT_UNPROJECT_FRACTION: f32 = 0.1;

/// Placement of one tree level inside the pyramid row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelLayout {
    pub level: u32,
    /// Shadow map texels covered by one node.
    pub step: u32,
    pub offset: u32,
    pub width: u32,
}

impl LevelLayout {
    pub fn new(resolution: u32, level: u32) -> Self {
        Self {
            level,
            step: 2 << level,
            offset: resolution - (resolution >> level),
            width: resolution >> (level + 1),
        }
    }
}

/// Number of levels built for a tree of `resolution` texels whose coarsest
/// step may not exceed `max_step`.
pub fn level_count(resolution: u32, max_step: u32) -> u32 {
    let mut count = 0;
    while count < 31 {
        let layout = LevelLayout::new(resolution, count);
        if layout.step > max_step || layout.width == 0 {
            break;
        }
        count += 1;
    }
    count
}

/// Advances `origin` along `dir` onto the unit square, if the line reaches it.
fn enter_unit_square(origin: Vec2, dir: Vec2) -> Vec2 {
    let mut t_enter = 0.0_f32;
    let mut t_exit = f32::INFINITY;
    for (o, d) in [(origin.x, dir.x), (origin.y, dir.y)] {
        if d.abs() < 1e-12 {
            if !(0.0..=1.0).contains(&o) {
                return origin;
            }
            continue;
        }
        let (t0, t1) = ((0.0 - o) / d, (1.0 - o) / d);
        t_enter = t_enter.max(t0.min(t1));
        t_exit = t_exit.min(t0.max(t1));
    }
    if t_enter <= t_exit {
        origin + dir * t_enter
    } else {
        origin
    }
}

/// Shadow map origin and one-texel direction of a slice, or
/// [`INVALID_UV_DIR`].
#[allow(clippy::cast_precision_loss)]
pub fn slice_uv_direction(frame: &FrameView<'_>, endpoints: Vec4) -> Vec4 {
    if !is_valid(endpoints.x) {
        return INVALID_UV_DIR;
    }
    let camera_light = frame.light.camera_uv_and_depth(frame.camera);
    if camera_light.w <= 0.0 {
        return INVALID_UV_DIR;
    }
    let origin = camera_light.xy();
    let exit_world = frame.camera.unproject(
        endpoints.zw(),
        EXIT_UNPROJECT_FRACTION * frame.config.max_tracing_distance,
    );
    let exit_clip = frame.light.world_to_light_proj * exit_world.extend(1.0);
    if exit_clip.w <= 1e-6 {
        return INVALID_UV_DIR;
    }
    let texel = 1.0 / frame.shadow_map_resolution() as f32;
    let delta = proj_to_uv(exit_clip.xy() / exit_clip.w) - origin;
    let major = delta.x.abs().max(delta.y.abs());
    let dir = if major < 1e-9 {
        Vec2::new(texel, 0.0)
    } else {
        delta * (texel / major)
    };
    let origin = if (0.0..=1.0).contains(&origin.x) && (0.0..=1.0).contains(&origin.y) {
        origin
    } else {
        enter_unit_square(origin, dir)
    };
    Vec4::new(origin.x, origin.y, dir.x, dir.y)
}

/// Depth bounds of the shadow map texels that bilinear lookups between
/// shadow map positions `a` and `b` can touch.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn footprint_bounds(shadow_map: &Surface<f32>, a: Vec2, b: Vec2) -> (f32, f32) {
    let res = shadow_map.width() as f32;
    let ta = a * res - 0.5;
    let tb = b * res - 0.5;
    let lo = ta.min(tb).floor();
    let hi = ta.max(tb).floor() + 1.0;
    let max_index = i64::from(shadow_map.width()) - 1;
    let clamp = |v: f32| (v as i64).clamp(0, max_index);
    let (x0, x1) = (clamp(lo.x), clamp(hi.x));
    let (y0, y1) = (clamp(lo.y), clamp(hi.y));
    let mut bounds = (f32::INFINITY, f32::NEG_INFINITY);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let d = shadow_map.get_clamped(x, y);
            bounds = (bounds.0.min(d), bounds.1.max(d));
        }
    }
    bounds
}

/// Level 0 node `n` of a slice.
#[allow(clippy::cast_precision_loss)]
pub fn level_zero_node(shadow_map: &Surface<f32>, uv_dir: Vec4, n: u32) -> MinMaxDepth {
    let dir = uv_dir.zw();
    if dir == Vec2::ZERO {
        return MinMaxDepth::conservative(0.0, 1.0);
    }
    let origin = uv_dir.xy();
    let start = origin + dir * (2 * n) as f32;
    let end = origin + dir * (2 * n + 2) as f32;
    let (min, max) = footprint_bounds(shadow_map, start, end);
    MinMaxDepth::conservative(min, max)
}

/// Read access to the completed trees.
#[derive(Debug, Clone, Copy)]
pub struct MinMaxTree<'a> {
    nodes: &'a Surface<MinMaxDepth>,
    levels: u32,
}

impl<'a> MinMaxTree<'a> {
    pub fn new(nodes: &'a Surface<MinMaxDepth>, levels: u32) -> Self {
        Self { nodes, levels }
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn resolution(&self) -> u32 {
        self.nodes.width()
    }

    /// Bounds of node `index` of `level` in `slice`; `None` past the row.
    pub fn node(&self, slice: u32, level: u32, index: u32) -> Option<(f32, f32)> {
        let layout = LevelLayout::new(self.resolution(), level);
        (level < self.levels && index < layout.width)
            .then(|| self.nodes.get(layout.offset + index, slice).bounds())
    }
}

/// Computes every slice's shadow map origin and direction.
pub fn render_slice_uv_direction(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let blend = ctx.techniques.get(TechniqueId::RenderSliceUvDirection)?.blend();
    let epipolar = ctx.surfaces.epipolar.as_ref().ok_or_else(|| missing("epipolar"))?;
    let min_max = ctx.surfaces.min_max.as_mut().ok_or_else(|| missing("min/max"))?;
    let endpoints = &epipolar.slice_endpoints;
    let slices = endpoints.width();
    let fragments = draw_quad(
        &mut min_max.slice_uv_dir,
        Viewport::full(slices, 1),
        blend,
        |inv| Fragment::Output(slice_uv_direction(frame, endpoints.get(inv.x, 0))),
    );
    ctx.record_pass(TechniqueId::RenderSliceUvDirection, fragments);
    Ok(())
}

/// Builds level 0 of every slice's tree into the first pyramid buffer.
pub fn initialize_min_max_shadow_map(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let blend = ctx
        .techniques
        .get(TechniqueId::InitializeMinMaxShadowMap)?
        .blend();
    let min_max = ctx.surfaces.min_max.as_mut().ok_or_else(|| missing("min/max"))?;
    let layout = LevelLayout::new(min_max.resolution(), 0);
    let slices = min_max.slice_uv_dir.width();
    let uv_dirs = &min_max.slice_uv_dir;
    let shadow_map = frame.shadow_map;
    min_max.pyramid.set_write_index(0);
    let (_, nodes) = min_max.pyramid.split();
    let fragments = draw_quad(
        nodes,
        Viewport::columns(layout.offset, layout.width, slices),
        blend,
        |inv| Fragment::Output(level_zero_node(shadow_map, uv_dirs.get(inv.y, 0), inv.x)),
    );
    ctx.record_pass(TechniqueId::InitializeMinMaxShadowMap, fragments);
    Ok(())
}

/// Builds the coarser levels, alternating buffers so that no pass reads the
/// surface it writes. Odd levels are copied back so that the first buffer
/// ends up holding the whole tree. Returns the number of levels.
pub fn compute_min_max_shadow_map_levels(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<u32> {
    let blend = ctx
        .techniques
        .get(TechniqueId::ComputeMinMaxShadowMapLevel)?
        .blend();
    let min_max = ctx.surfaces.min_max.as_mut().ok_or_else(|| missing("min/max"))?;
    let resolution = min_max.resolution();
    let slices = min_max.slice_uv_dir.width();
    let levels = level_count(resolution, frame.config.max_shadow_map_step);
    let mut records = Vec::new();
    for level in 1..levels {
        let layout = LevelLayout::new(resolution, level);
        let children = LevelLayout::new(resolution, level - 1);
        min_max.pyramid.set_write_index(level as usize);
        let (read, write) = min_max.pyramid.split();
        let fragments = draw_quad(
            write,
            Viewport::columns(layout.offset, layout.width, slices),
            blend,
            |inv| {
                let j = inv.x - layout.offset;
                let left = read.get(children.offset + 2 * j, inv.y);
                let right = read.get(children.offset + 2 * j + 1, inv.y);
                Fragment::Output(left.merge(right))
            },
        );
        if level % 2 == 1 {
            min_max
                .pyramid
                .consolidate(layout.offset, 0, layout.width, slices)?;
        }
        records.push(fragments);
    }
    for fragments in records {
        ctx.record_pass(TechniqueId::ComputeMinMaxShadowMapLevel, fragments);
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::ScreenSize;
    use episcatter_core::{CameraAttribs, LightAttribs, MediaParams, PostProcessConfig};
    use glam::{Mat4, Vec3};
    use proptest::prelude::*;

    #[test]
    fn test_level_layout() {
        assert_eq!(
            LevelLayout::new(256, 0),
            LevelLayout {
                level: 0,
                step: 2,
                offset: 0,
                width: 128
            }
        );
        let l2 = LevelLayout::new(256, 2);
        assert_eq!((l2.step, l2.offset, l2.width), (8, 192, 32));
        assert_eq!(level_count(256, 16), 4);
        assert_eq!(level_count(256, 2), 1);
        assert_eq!(level_count(8, 64), 3);
    }

    #[test]
    fn test_enter_unit_square() {
        let p = enter_unit_square(Vec2::new(-0.5, 0.5), Vec2::new(0.1, 0.0));
        assert!((p - Vec2::new(0.0, 0.5)).length() < 1e-6);
        let miss = Vec2::new(-0.5, 2.0);
        assert_eq!(enter_unit_square(miss, Vec2::new(0.1, 0.0)), miss);
    }

    #[test]
    fn test_invalid_slice_is_unbounded() {
        let sm = Surface::from_texels("sm", 2, 2, vec![0.5; 4]).unwrap();
        assert_eq!(level_zero_node(&sm, INVALID_UV_DIR, 0).bounds(), (0.0, 1.0));
    }

    fn ramp_shadow_map(res: u32) -> Surface<f32> {
        Surface::from_fn("sm", res, res, |x, y| ((x * 7 + y * 13) % 17) as f32 / 17.0).unwrap()
    }

    #[test]
    fn test_pass_sequence_fills_every_level() {
        let res = 64;
        let shadow_map = ramp_shadow_map(res);
        let config = PostProcessConfig {
            max_shadow_map_step: 16,
            ..PostProcessConfig::default()
        };
        let media = MediaParams::compute(&config);
        let camera = CameraAttribs::look_at(Vec3::new(0.0, 1.0, -5.0), Vec3::ZERO, Vec3::Y, 1.0, 1.0, 0.1, 50.0);
        let light_proj = Mat4::orthographic_lh(-10.0, 10.0, -10.0, 10.0, -20.0, 20.0)
            * Mat4::look_at_lh(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Z);
        let light = LightAttribs::directional(Vec3::Y, Vec3::ONE, 1.0, light_proj);
        let color = Surface::<Vec4>::new("c", 8, 8).unwrap();
        let depth = Surface::<f32>::new("d", 8, 8).unwrap();
        let frame = FrameView::new(&config, &media, &camera, &light, &color, &depth, &shadow_map, None);

        let mut ctx = RenderContext::new();
        ctx.surfaces.ensure_epipolar(16, 4).unwrap();
        ctx.surfaces.ensure_min_max(res, 4).unwrap();
        let endpoints = [
            Vec4::new(-0.9, 0.0, 1.0, 0.0),
            Vec4::new(0.0, -0.9, 0.0, 1.0),
            Vec4::new(0.9, 0.9, -1.0, -1.0),
            Vec4::splat(crate::surface::INVALID_COORDINATE),
        ];
        for (i, e) in endpoints.iter().enumerate() {
            ctx.surfaces
                .epipolar
                .as_mut()
                .unwrap()
                .slice_endpoints
                .set(i as u32, 0, *e);
        }
        for id in [
            TechniqueId::RenderSliceUvDirection,
            TechniqueId::InitializeMinMaxShadowMap,
            TechniqueId::ComputeMinMaxShadowMapLevel,
        ] {
            ctx.techniques
                .get_or_compile(id, &config, ScreenSize { width: 8, height: 8 })
                .unwrap();
        }
        render_slice_uv_direction(&mut ctx, &frame).unwrap();
        initialize_min_max_shadow_map(&mut ctx, &frame).unwrap();
        let levels = compute_min_max_shadow_map_levels(&mut ctx, &frame).unwrap();
        assert_eq!(levels, 4);
        assert_eq!(ctx.passes_of(TechniqueId::ComputeMinMaxShadowMapLevel), 3);

        let mm = ctx.surfaces.min_max().unwrap();
        assert_eq!(mm.slice_uv_dir.get(3, 0), INVALID_UV_DIR);
        let dir = mm.slice_uv_dir.get(0, 0).zw();
        assert!((dir.x.abs().max(dir.y.abs()) - 1.0 / res as f32).abs() < 1e-6);

        let tree = MinMaxTree::new(mm.pyramid.buffer(0), levels);
        for slice in 0..4 {
            for level in 1..levels {
                let width = LevelLayout::new(res, level).width;
                for j in 0..width {
                    let (min, max) = tree.node(slice, level, j).unwrap();
                    let (lmin, lmax) = tree.node(slice, level - 1, 2 * j).unwrap();
                    let (rmin, rmax) = tree.node(slice, level - 1, 2 * j + 1).unwrap();
                    assert_eq!(min, lmin.min(rmin));
                    assert_eq!(max, lmax.max(rmax));
                }
            }
        }
        assert!(tree.node(0, levels, 0).is_none());
    }

    proptest! {
        #[test]
        fn prop_level_zero_bounds_bilinear_footprint(
            depths in prop::collection::vec(0.0_f32..1.0, 16 * 16),
            ox in 0.0_f32..1.0,
            oy in 0.0_f32..1.0,
            angle in 0.0_f32..std::f32::consts::TAU,
            n in 0_u32..6,
            t in 0.0_f32..1.0,
        ) {
            let sm = Surface::from_texels("sm", 16, 16, depths).unwrap();
            let d = Vec2::new(angle.cos(), angle.sin());
            let dir = d / d.x.abs().max(d.y.abs()) / 16.0;
            let uv_dir = Vec4::new(ox, oy, dir.x, dir.y);
            let (min, max) = level_zero_node(&sm, uv_dir, n).bounds();
            let p = Vec2::new(ox, oy) + dir * (2.0 * n as f32 + 2.0 * t);
            let texel = p * 16.0 - 0.5;
            let (x0, y0) = (texel.x.floor() as i64, texel.y.floor() as i64);
            for (x, y) in [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)] {
                let z = sm.get_clamped(x, y);
                prop_assert!(min <= z && z <= max);
            }
        }
    }
}
