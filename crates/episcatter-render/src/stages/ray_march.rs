//! Shadowed single-scattering ray marching.
//!
//! A view ray runs from the camera to the surface (at most the tracing
//! distance) and is clipped against the light frustum. Inside the frustum the
//! light is tested against the shadow map, either step by step or by walking
//! the slice's min/max tree and integrating whole lit runs analytically.
//! Outside it directional and point lights are unshadowed and spot lights
//! contribute nothing.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use episcatter_core::{proj_to_uv, AccelStruct, LightType};

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad_tagged, Fragment, Viewport};
use crate::resources::missing;
use crate::surface::{Radiance16, Surface};
use crate::technique::TechniqueId;

use super::integral::{InscatteringTable, SegmentIntegrator};
use super::min_max::{level_count, MinMaxTree};
use super::{is_valid, FrameView};

/// Shadow map depth test with a 2x2 percentage-closer filter.
#[derive(Debug, Clone, Copy)]
pub struct ShadowMap<'a> {
    depth: &'a Surface<f32>,
}

impl<'a> ShadowMap<'a> {
    pub fn new(depth: &'a Surface<f32>) -> Self {
        Self { depth }
    }

    pub fn resolution(&self) -> u32 {
        self.depth.width()
    }

    /// Fraction of the filter footprint at `uv` that does not occlude depth `z`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn visibility(&self, uv: Vec2, z: f32) -> f32 {
        let texel = uv * Vec2::new(self.depth.width() as f32, self.depth.height() as f32) - 0.5;
        let base = texel.floor();
        let f = texel - base;
        let (x, y) = (base.x as i64, base.y as i64);
        let lit = |dx: i64, dy: i64| {
            if z <= self.depth.get_clamped(x + dx, y + dy) {
                1.0
            } else {
                0.0
            }
        };
        let top = lit(0, 0) * (1.0 - f.x) + lit(1, 0) * f.x;
        let bottom = lit(0, 1) * (1.0 - f.x) + lit(1, 1) * f.x;
        top * (1.0 - f.y) + bottom * f.y
    }
}

/// A parametric ray `P0 + t * P1` in light clip space.
#[derive(Debug, Clone, Copy)]
struct LightRay {
    p0: Vec4,
    p1: Vec4,
}

impl LightRay {
    fn at(&self, t: f32) -> Vec4 {
        self.p0 + self.p1 * t
    }

    /// Shadow map UV and depth at `t`.
    fn uv_depth(&self, t: f32) -> (Vec2, f32) {
        let clip = self.at(t);
        let w = if clip.w.abs() < 1e-7 { 1e-7 } else { clip.w };
        (proj_to_uv(clip.xy() / w), clip.z / w)
    }

    /// Part of `[t0, t1]` inside the light frustum.
    fn clip_to_frustum(&self, t0: f32, t1: f32) -> Option<(f32, f32)> {
        let (p0, p1) = (self.p0, self.p1);
        let planes = [
            (p0.w + p0.x, p1.w + p1.x),
            (p0.w - p0.x, p1.w - p1.x),
            (p0.w + p0.y, p1.w + p1.y),
            (p0.w - p0.y, p1.w - p1.y),
            (p0.z, p1.z),
            (p0.w - p0.z, p1.w - p1.z),
        ];
        clip_interval(&planes, t0, t1)
    }
}

/// Restricts `[t0, t1]` to where every `a + b * t` is non-negative.
fn clip_interval(planes: &[(f32, f32)], mut t0: f32, mut t1: f32) -> Option<(f32, f32)> {
    for &(a, b) in planes {
        if b.abs() < 1e-12 {
            if a < 0.0 {
                return None;
            }
            continue;
        }
        let t = -a / b;
        if b > 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
    }
    (t0 < t1).then_some((t0, t1))
}

/// Maps min/max tree positions on a slice line to ray parameters and back.
///
/// With `u(t)` the shadow map position of the ray point, the position along
/// the slice is `k = (u(t) - origin) . dir / |dir|^2`, which is a ratio of
/// two linear functions of `t`.
#[derive(Debug, Clone, Copy)]
struct SliceMapping {
    c0: f32,
    dd: f32,
    m0: f32,
    m1: f32,
    w0: f32,
    w1: f32,
}

impl SliceMapping {
    fn new(ray: &LightRay, origin: Vec2, dir: Vec2) -> Self {
        Self {
            c0: (0.5 - origin.x) * dir.x + (0.5 - origin.y) * dir.y,
            dd: dir.length_squared(),
            m0: 0.5 * (ray.p0.x * dir.x - ray.p0.y * dir.y),
            m1: 0.5 * (ray.p1.x * dir.x - ray.p1.y * dir.y),
            w0: ray.p0.w,
            w1: ray.p1.w,
        }
    }

    fn position(&self, t: f32) -> f32 {
        let w = self.w0 + self.w1 * t;
        (self.c0 + (self.m0 + self.m1 * t) / w) / self.dd
    }

    fn parameter(&self, k: f32) -> Option<f32> {
        let big_k = k * self.dd - self.c0;
        let denom = big_k * self.w1 - self.m1;
        (denom.abs() > 1e-12).then(|| (self.m0 - big_k * self.w0) / denom)
    }
}

/// Computes the inscattered light along view rays.
#[derive(Debug, Clone, Copy)]
pub struct RayMarcher<'a> {
    frame: FrameView<'a>,
    table: Option<&'a InscatteringTable>,
    shadow_map: ShadowMap<'a>,
    min_max: Option<(MinMaxTree<'a>, &'a Surface<Vec4>)>,
}

impl<'a> RayMarcher<'a> {
    pub fn new(frame: &FrameView<'a>, table: Option<&'a InscatteringTable>) -> Self {
        Self {
            frame: *frame,
            table,
            shadow_map: ShadowMap::new(frame.shadow_map),
            min_max: None,
        }
    }

    /// Enables tree traversal for rays that name their slice.
    #[must_use]
    pub fn with_min_max(mut self, tree: MinMaxTree<'a>, slice_uv_dir: &'a Surface<Vec4>) -> Self {
        self.min_max = Some((tree, slice_uv_dir));
        self
    }

    /// Inscattered light reaching the camera along the ray through
    /// `screen_pos` that ends at `camera_z`, using at most `max_steps`
    /// shadow map steps.
    pub fn inscattering(&self, screen_pos: Vec2, camera_z: f32, max_steps: u32, slice: Option<u32>) -> Vec3 {
        if !is_valid(camera_z) {
            return Vec3::ZERO;
        }
        let camera = self.frame.camera;
        let origin = camera.position;
        let to_end = camera.unproject(screen_pos, camera_z) - origin;
        let length = to_end.length();
        if length < 1e-6 {
            return Vec3::ZERO;
        }
        let dir = to_end / length;
        let t_max = length.min(self.frame.config.max_tracing_distance);
        let integrator = SegmentIntegrator::new(&self.frame, self.table, origin, dir);
        let matrix = self.frame.light.world_to_light_proj;
        let ray = LightRay {
            p0: matrix * origin.extend(1.0),
            p1: matrix * dir.extend(0.0),
        };

        let light_type = self.frame.config.light_type;
        let Some((t0, t1)) = ray.clip_to_frustum(0.0, t_max) else {
            return match light_type {
                LightType::Spot => Vec3::ZERO,
                LightType::Directional | LightType::Point => integrator.segment(0.0, t_max),
            };
        };
        let mut total = Vec3::ZERO;
        let (t0, t1) = match light_type {
            LightType::Spot => match self.clip_to_cone(origin, dir, t0, t1) {
                Some(interval) => interval,
                None => return Vec3::ZERO,
            },
            LightType::Directional | LightType::Point => {
                total += integrator.segment(0.0, t0) + integrator.segment(t1, t_max);
                (t0, t1)
            }
        };

        let traversed = match (slice, self.min_max) {
            (Some(slice), Some((tree, uv_dirs))) if self.frame.stained_glass().is_none() => {
                self.traverse_min_max(&ray, &integrator, tree, uv_dirs.get(slice, 0), slice, t0, t1, max_steps)
            }
            _ => None,
        };
        total + traversed.unwrap_or_else(|| self.march(&ray, &integrator, t0, t1, max_steps))
    }

    /// Part of `[t0, t1]` inside the spot light cone.
    fn clip_to_cone(&self, origin: Vec3, dir: Vec3, t0: f32, t1: f32) -> Option<(f32, f32)> {
        let light = self.frame.light;
        let (axis, c) = (light.spot_axis, light.spot_cos_angle);
        let a = origin - light.world_pos;
        let inside = |t: f32| {
            let v = a + dir * t;
            let len = v.length();
            len > 0.0 && v.dot(axis) >= c * len
        };
        let (fa, fd) = (a.dot(axis), dir.dot(axis));
        let (vd, vv, c2) = (a.dot(dir), a.dot(a), c * c);
        let qa = fd * fd - c2;
        let qb = 2.0 * (fa * fd - c2 * vd);
        let qc = fa * fa - c2 * vv;

        let mut cuts = [t0, t1, t1, t1];
        let mut count = 2;
        let mut push = |t: f32| {
            if t > t0 && t < t1 {
                cuts[count] = t;
                count += 1;
            }
        };
        if qa.abs() < 1e-9 {
            if qb.abs() > 1e-12 {
                push(-qc / qb);
            }
        } else {
            let disc = qb * qb - 4.0 * qa * qc;
            if disc >= 0.0 {
                let r = disc.sqrt();
                push((-qb - r) / (2.0 * qa));
                push((-qb + r) / (2.0 * qa));
            }
        }
        let cuts = &mut cuts[..count];
        cuts.sort_by(f32::total_cmp);
        let mut hull: Option<(f32, f32)> = None;
        for piece in cuts.windows(2) {
            if piece[1] > piece[0] && inside(0.5 * (piece[0] + piece[1])) {
                hull = Some(hull.map_or((piece[0], piece[1]), |(s, _)| (s, piece[1])));
            }
        }
        hull
    }

    fn glass_tint(&self, uv: Vec2, z: f32) -> Vec3 {
        match self.frame.stained_glass() {
            Some(glass) => {
                let g = glass.sample_nearest(uv);
                if z > g.w {
                    g.truncate()
                } else {
                    Vec3::ONE
                }
            }
            None => Vec3::ONE,
        }
    }

    /// Light arriving at ray parameter `t`.
    fn light_at(&self, ray: &LightRay, t: f32) -> Vec3 {
        let (uv, z) = ray.uv_depth(t);
        self.glass_tint(uv, z) * self.shadow_map.visibility(uv, z)
    }

    /// Marches `[t0, t1]` in steps of about one shadow map texel.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    fn march(&self, ray: &LightRay, integrator: &SegmentIntegrator<'_>, t0: f32, t1: f32, max_steps: u32) -> Vec3 {
        if t1 <= t0 {
            return Vec3::ZERO;
        }
        let (uv0, _) = ray.uv_depth(t0);
        let (uv1, _) = ray.uv_depth(t1);
        let span = (uv1 - uv0).length() * self.shadow_map.resolution() as f32;
        let steps = (span.ceil() as u32).clamp(1, max_steps.max(1));
        let dt = (t1 - t0) / steps as f32;
        (0..steps)
            .map(|i| {
                let a = t0 + dt * i as f32;
                let b = a + dt;
                self.light_at(ray, 0.5 * (a + b)) * integrator.segment(a, b)
            })
            .sum()
    }

    /// Walks the slice's min/max tree over `[t0, t1]`. `None` when the ray
    /// cannot use the tree.
    #[allow(
        clippy::too_many_arguments,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn traverse_min_max(
        &self,
        ray: &LightRay,
        integrator: &SegmentIntegrator<'_>,
        tree: MinMaxTree<'_>,
        uv_dir: Vec4,
        slice: u32,
        t0: f32,
        t1: f32,
        max_steps: u32,
    ) -> Option<Vec3> {
        let dir = uv_dir.zw();
        if dir == Vec2::ZERO || tree.levels() == 0 {
            return None;
        }
        let mapping = SliceMapping::new(ray, uv_dir.xy(), dir);
        let k_start = mapping.position(t0).max(0.0);
        let k_stop = mapping.position(t1);
        if !k_start.is_finite() || !k_stop.is_finite() || k_stop <= k_start + 1.0 {
            return None;
        }
        let to_t = |k: f32| mapping.parameter(k).map_or(t1, |t| t.clamp(t0, t1));
        let k_end = k_stop.min(tree.resolution() as f32);
        let depth_at = |t: f32| ray.uv_depth(t).1;

        let mut total = Vec3::ZERO;
        let mut k = k_start;
        let mut level = 0;
        let cap = 4 * max_steps.max(tree.resolution());
        let mut iterations = 0;
        while k < k_end && iterations < cap {
            iterations += 1;
            let step = (2_u32 << level) as f32;
            let index = (k / step).floor();
            let node_end = ((index + 1.0) * step).min(k_end);
            let Some((node_min, node_max)) = tree.node(slice, level, index as u32) else {
                break;
            };
            let (ta, tb) = (to_t(k), to_t(node_end));
            let (za, zb) = (depth_at(ta), depth_at(tb));
            let (z_min, z_max) = (za.min(zb), za.max(zb));
            let lit = z_max <= node_min;
            if !lit && z_min <= node_max {
                if level > 0 {
                    level -= 1;
                    continue;
                }
                let substeps = ((node_end - k).ceil() as u32).max(1);
                let dk = (node_end - k) / substeps as f32;
                for i in 0..substeps {
                    let a = to_t(k + dk * i as f32);
                    let b = to_t(k + dk * (i + 1) as f32);
                    total += self.shadow_map.visibility(ray.uv_depth(0.5 * (a + b)).0, depth_at(0.5 * (a + b)))
                        * integrator.segment(a, b);
                }
            } else if lit {
                total += integrator.segment(ta, tb);
            }
            k = node_end;
            let mut next = index as u32 + 1;
            while level + 1 < tree.levels() && next % 2 == 0 {
                next /= 2;
                level += 1;
            }
        }
        if k < k_stop {
            total += self.march(ray, integrator, to_t(k), t1, max_steps);
        }
        Some(total)
    }
}

/// Ray marches every reference sample, leaving other samples at zero.
pub fn ray_march(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let accelerated = frame.config.accel_struct == AccelStruct::MinMaxTree;
    let id = if accelerated {
        TechniqueId::RayMarchMinMax
    } else {
        TechniqueId::RayMarch
    };
    let technique = ctx.techniques.get(id)?;
    let (rule, blend) = (technique.sample_rule(), technique.blend());
    let max_steps = frame.shadow_map_resolution();

    let mut marcher = RayMarcher::new(frame, ctx.surfaces.tables.as_ref());
    if accelerated {
        let min_max = ctx.surfaces.min_max.as_ref().ok_or_else(|| missing("min/max"))?;
        let levels = level_count(min_max.resolution(), frame.config.max_shadow_map_step);
        marcher = marcher.with_min_max(
            MinMaxTree::new(min_max.pyramid.buffer(0), levels),
            &min_max.slice_uv_dir,
        );
    }
    let epipolar = ctx.surfaces.epipolar.as_mut().ok_or_else(|| missing("epipolar"))?;
    let (samples, slices) = (epipolar.samples(), epipolar.slices());
    epipolar.initial_scattering.fill(Radiance16::default());
    let coordinates = &epipolar.coordinates;
    let camera_z = &epipolar.camera_z;
    let fragments = draw_quad_tagged(
        &mut epipolar.initial_scattering,
        &mut epipolar.tags,
        rule,
        Viewport::full(samples, slices),
        blend,
        |inv| {
            let insctr = marcher.inscattering(
                coordinates.get(inv.x, inv.y),
                camera_z.get(inv.x, inv.y),
                max_steps,
                Some(inv.y),
            );
            Fragment::Output(Radiance16::from_rgb(insctr))
        },
    );
    ctx.record_pass(id, fragments);
    Ok(())
}
