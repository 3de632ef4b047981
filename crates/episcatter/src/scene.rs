//! A ray-cast test scene.
//!
//! The scene is a square ground plane at `y = 0` with axis-aligned boxes
//! standing on it and optional glass panes. It renders everything the post
//! process consumes: lit color, non-linear depth, the light-space shadow map
//! and the stained glass transmittance.

use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use episcatter_core::{
    proj_to_uv, sun_color, uv_to_proj, CameraAttribs, LightAttribs, LightType, PostProcessConfig,
};
use episcatter_render::{
    FrameAttribs, FrameReport, GpuLightScatteringPipeline, LightScatteringPipeline, Surface,
};

use crate::Result;

/// Background color where no geometry is hit.
pub const SKY_COLOR: Vec4 = Vec4::new(0.35, 0.45, 0.6, 1.0);

/// Depth offset of the shadow test.
const SHADOW_BIAS: f32 = 2e-3;

const AMBIENT: f32 = 0.15;

/// An axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneBox {
    pub min: Vec3,
    pub max: Vec3,
    pub color: Vec3,
}

impl SceneBox {
    pub fn new(min: Vec3, max: Vec3, color: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
            color,
        }
    }

    /// A box of `size` standing on the ground centered at `(x, z)`.
    pub fn pillar(x: f32, z: f32, size: Vec3, color: Vec3) -> Self {
        let half = Vec2::new(size.x, size.z) * 0.5;
        Self::new(
            Vec3::new(x - half.x, 0.0, z - half.y),
            Vec3::new(x + half.x, size.y, z + half.y),
            color,
        )
    }

    /// First intersection of `from + t (to - from)` for `t` in `[0, 1]`, with
    /// the outward normal at the hit.
    pub fn intersect(&self, from: Vec3, to: Vec3) -> Option<(f32, Vec3)> {
        slab_intersect(self.min, self.max, from, to - from)
    }
}

/// A transparent box that tints the light passing through it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlassPane {
    pub min: Vec3,
    pub max: Vec3,
    pub tint: Vec3,
}

fn slab_intersect(min: Vec3, max: Vec3, origin: Vec3, dir: Vec3) -> Option<(f32, Vec3)> {
    let mut t_near = 0.0_f32;
    let mut t_far = 1.0_f32;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        let (o, d, lo, hi) = (origin[axis], dir[axis], min[axis], max[axis]);
        if d.abs() < 1e-12 {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
        let mut sign = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            sign = 1.0;
        }
        if t0 > t_near {
            t_near = t0;
            normal = Vec3::ZERO;
            normal[axis] = sign;
        }
        t_far = t_far.min(t1);
        if t_near > t_far {
            return None;
        }
    }
    Some((t_near, normal))
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    t: f32,
    normal: Vec3,
    albedo: Vec3,
}

/// Ground plane, boxes and glass.
#[derive(Debug, Clone)]
pub struct Scene {
    pub ground_half_extent: f32,
    pub ground_color: Vec3,
    pub boxes: Vec<SceneBox>,
    pub glass: Vec<GlassPane>,
}

impl Scene {
    /// A bare ground plane.
    pub fn ground(half_extent: f32) -> Self {
        Self {
            ground_half_extent: half_extent,
            ground_color: Vec3::new(0.55, 0.5, 0.45),
            boxes: Vec::new(),
            glass: Vec::new(),
        }
    }

    pub fn with_box(mut self, b: SceneBox) -> Self {
        self.boxes.push(b);
        self
    }

    pub fn with_glass(mut self, pane: GlassPane) -> Self {
        self.glass.push(pane);
        self
    }

    /// Two rows of pillars under a floating slab, with a red glass pane.
    pub fn colonnade() -> Self {
        let stone = Vec3::new(0.7, 0.68, 0.62);
        let mut scene = Self::ground(12.0);
        for i in 0..5 {
            #[allow(clippy::cast_precision_loss)]
            let z = -6.0 + 3.0 * i as f32;
            scene = scene
                .with_box(SceneBox::pillar(-3.0, z, Vec3::new(0.8, 6.0, 0.8), stone))
                .with_box(SceneBox::pillar(3.0, z, Vec3::new(0.8, 6.0, 0.8), stone));
        }
        scene
            .with_box(SceneBox::new(
                Vec3::new(-4.0, 6.0, -7.0),
                Vec3::new(4.0, 6.6, 7.0),
                stone * 0.8,
            ))
            .with_glass(GlassPane {
                min: Vec3::new(-2.5, 4.0, -1.0),
                max: Vec3::new(2.5, 4.1, 1.0),
                tint: Vec3::new(1.0, 0.25, 0.2),
            })
    }

    /// Diagonal of the scene bounds.
    pub fn extent(&self) -> f32 {
        let top = self
            .boxes
            .iter()
            .map(|b| b.max.y)
            .fold(1.0_f32, f32::max);
        let side = 2.0 * self.ground_half_extent;
        (2.0 * side * side + top * top).sqrt()
    }

    fn center(&self) -> Vec3 {
        let top = self.boxes.iter().map(|b| b.max.y).fold(0.0_f32, f32::max);
        Vec3::new(0.0, top * 0.5, 0.0)
    }

    /// Camera used by the demo and the tests: standing at one end of the
    /// ground, looking along it.
    #[allow(clippy::cast_precision_loss)]
    pub fn default_camera(&self, width: u32, height: u32) -> CameraAttribs {
        let h = self.ground_half_extent;
        CameraAttribs::look_at(
            Vec3::new(0.0, 2.0, -h * 1.1),
            Vec3::new(0.0, 3.0, 0.0),
            Vec3::Y,
            std::f32::consts::FRAC_PI_3,
            width as f32 / height as f32,
            0.1,
            self.extent() * 2.0,
        )
    }

    /// Sun light from `dir_on_light` with an orthographic shadow frustum
    /// covering the scene.
    pub fn directional_light(&self, dir_on_light: Vec3) -> LightAttribs {
        let dir = dir_on_light.normalize();
        let radius = self.extent() * 0.5;
        let center = self.center();
        let eye = center + dir * radius * 2.0;
        let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_lh(eye, center, up);
        let proj = Mat4::orthographic_lh(-radius, radius, -radius, radius, 0.1, radius * 4.0);
        let (color, _) = sun_color(dir, 2.0);
        LightAttribs::directional(dir, color.xyz(), color.w * 2.0, proj * view)
    }

    /// Spot light at `position` aimed at `target` with half angle `angle`.
    pub fn spot_light(&self, position: Vec3, target: Vec3, angle: f32) -> LightAttribs {
        let axis = (target - position).normalize();
        let up = if axis.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_lh(position, target, up);
        let proj = Mat4::perspective_lh(2.0 * angle, 1.0, 0.1, self.extent() * 2.0);
        LightAttribs::spot(position, axis, angle, Vec3::new(1.0, 0.9, 0.75), 40.0, proj * view)
    }

    /// Point light at `position`; its shadow frustum looks straight down.
    pub fn point_light(&self, position: Vec3) -> LightAttribs {
        let view = Mat4::look_at_lh(position, position - Vec3::Y, Vec3::Z);
        let proj = Mat4::perspective_lh(0.6 * std::f32::consts::PI, 1.0, 0.1, self.extent() * 2.0);
        LightAttribs::point(position, Vec3::new(1.0, 0.85, 0.6), 30.0, proj * view)
    }

    /// The light a demo frame uses for `light_type`.
    pub fn light(&self, light_type: LightType) -> LightAttribs {
        match light_type {
            LightType::Directional => self.directional_light(Vec3::new(0.3, 0.35, 1.0)),
            LightType::Spot => self.spot_light(Vec3::new(0.0, 5.5, 4.0), Vec3::new(0.0, 0.0, -2.0), 0.5),
            LightType::Point => self.point_light(Vec3::new(0.0, 5.0, 0.0)),
        }
    }

    fn cast(&self, from: Vec3, to: Vec3) -> Option<Hit> {
        let dir = to - from;
        let mut best: Option<Hit> = None;
        let mut consider = |hit: Hit| {
            if best.map_or(true, |b| hit.t < b.t) {
                best = Some(hit);
            }
        };
        if dir.y.abs() > 1e-12 {
            let t = -from.y / dir.y;
            let p = from + dir * t;
            let h = self.ground_half_extent;
            if (0.0..=1.0).contains(&t) && p.x.abs() <= h && p.z.abs() <= h {
                consider(Hit {
                    t,
                    normal: if dir.y < 0.0 { Vec3::Y } else { Vec3::NEG_Y },
                    albedo: self.ground_color,
                });
            }
        }
        for b in &self.boxes {
            if let Some((t, normal)) = b.intersect(from, to) {
                consider(Hit {
                    t,
                    normal,
                    albedo: b.color,
                });
            }
        }
        best
    }

    /// Light-space depth of the nearest opaque surface per texel.
    pub fn render_shadow_map(&self, light: &LightAttribs, resolution: u32) -> Result<Surface<f32>> {
        let inv = light.world_to_light_proj.inverse();
        Ok(Surface::from_fn("shadow map", resolution, resolution, |x, y| {
            let (from, to) = texel_ray(inv, x, y, resolution, resolution);
            self.cast(from, to).map_or(1.0, |hit| {
                light_space(light, from + (to - from) * hit.t).map_or(1.0, |p| p.z)
            })
        })?)
    }

    /// Light-space glass tint (rgb) and glass depth (w) per texel; texels
    /// without glass hold white at the far plane.
    pub fn render_stained_glass(&self, light: &LightAttribs, resolution: u32) -> Result<Surface<Vec4>> {
        let inv = light.world_to_light_proj.inverse();
        Ok(Surface::from_fn("stained glass", resolution, resolution, |x, y| {
            let (from, to) = texel_ray(inv, x, y, resolution, resolution);
            self.glass
                .iter()
                .filter_map(|pane| {
                    slab_intersect(pane.min, pane.max, from, to - from).map(|(t, _)| (t, pane.tint))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .and_then(|(t, tint)| {
                    light_space(light, from + (to - from) * t).map(|p| tint.extend(p.z))
                })
                .unwrap_or(Vec4::ONE)
        })?)
    }

    /// Lit color and depth as seen from `camera`.
    pub fn render_view(
        &self,
        camera: &CameraAttribs,
        light: &LightAttribs,
        light_type: LightType,
        shadow_map: &Surface<f32>,
        width: u32,
        height: u32,
    ) -> Result<(Surface<Vec4>, Surface<f32>)> {
        let mut color = Surface::new("scene color", width, height)?;
        let mut depth = Surface::new("scene depth", width, height)?;
        for y in 0..height {
            for x in 0..width {
                let (from, to) = texel_ray(camera.inv_view_proj, x, y, width, height);
                match self.cast(from, to) {
                    Some(hit) => {
                        let p = from + (to - from) * hit.t;
                        let lit = shade(light, light_type, shadow_map, p, hit.normal);
                        color.set(x, y, (hit.albedo * (lit + AMBIENT)).extend(1.0));
                        depth.set(x, y, camera.project(p).z.clamp(0.0, 1.0));
                    }
                    None => {
                        color.set(x, y, SKY_COLOR);
                        depth.set(x, y, 1.0);
                    }
                }
            }
        }
        Ok((color, depth))
    }

    /// Renders every input of a post-processing frame.
    pub fn render(
        &self,
        camera: &CameraAttribs,
        light: &LightAttribs,
        light_type: LightType,
        (width, height): (u32, u32),
        shadow_map_resolution: u32,
    ) -> Result<SceneFrame> {
        let shadow_map = self.render_shadow_map(light, shadow_map_resolution)?;
        let stained_glass = self.render_stained_glass(light, shadow_map_resolution)?;
        let (color, depth) = self.render_view(camera, light, light_type, &shadow_map, width, height)?;
        log::debug!(
            "rendered scene {width}x{height}, shadow map {shadow_map_resolution}, {} boxes",
            self.boxes.len()
        );
        Ok(SceneFrame {
            color,
            depth,
            shadow_map,
            stained_glass,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn texel_ray(inv: Mat4, x: u32, y: u32, width: u32, height: u32) -> (Vec3, Vec3) {
    let uv = Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    );
    let ndc = uv_to_proj(uv);
    let unproject = |z: f32| {
        let p = inv * Vec4::new(ndc.x, ndc.y, z, 1.0);
        p.xyz() / p.w
    };
    (unproject(0.0), unproject(1.0))
}

/// Light clip-space position, or `None` behind the light.
fn light_space(light: &LightAttribs, p: Vec3) -> Option<Vec3> {
    let clip = light.world_to_light_proj * p.extend(1.0);
    (clip.w > 1e-6).then(|| clip.xyz() / clip.w)
}

fn shade(light: &LightAttribs, light_type: LightType, shadow_map: &Surface<f32>, p: Vec3, normal: Vec3) -> Vec3 {
    let (to_light, falloff) = match light_type {
        LightType::Directional => (light.dir_on_light, 1.0),
        LightType::Spot | LightType::Point => {
            let d = light.world_pos - p;
            (d.normalize_or_zero(), 1.0 / (1.0 + 0.05 * d.length_squared()))
        }
    };
    if light_type == LightType::Spot && (-to_light).dot(light.spot_axis) < light.spot_cos_angle {
        return Vec3::ZERO;
    }
    let n_dot_l = normal.dot(to_light).max(0.0);
    if n_dot_l == 0.0 {
        return Vec3::ZERO;
    }
    let inside = light_space(light, p).filter(|q| q.x.abs() <= 1.0 && q.y.abs() <= 1.0);
    let visible = match inside {
        Some(q) => q.z <= shadow_map.sample_nearest(proj_to_uv(q.truncate())) + SHADOW_BIAS,
        None => light_type != LightType::Spot,
    };
    if visible {
        light.radiance() * n_dot_l * falloff
    } else {
        Vec3::ZERO
    }
}

/// The inputs of one post-processing frame.
#[derive(Debug, Clone)]
pub struct SceneFrame {
    pub color: Surface<Vec4>,
    pub depth: Surface<f32>,
    pub shadow_map: Surface<f32>,
    pub stained_glass: Surface<Vec4>,
}

impl SceneFrame {
    pub fn attribs<'a>(
        &'a self,
        camera: &'a CameraAttribs,
        light: &'a LightAttribs,
        dst_color: &'a mut Surface<Vec4>,
    ) -> FrameAttribs<'a> {
        FrameAttribs {
            light,
            camera,
            src_color: &self.color,
            src_depth: &self.depth,
            shadow_map: &self.shadow_map,
            stained_glass: Some(&self.stained_glass),
            dst_color,
        }
    }

    /// Runs one frame into a copy of the scene color.
    pub fn post_process(
        &self,
        pipeline: &mut LightScatteringPipeline,
        camera: &CameraAttribs,
        light: &LightAttribs,
        config: &PostProcessConfig,
    ) -> Result<(Surface<Vec4>, FrameReport)> {
        let mut dst = self.color.clone();
        let report = pipeline.perform_post_processing(self.attribs(camera, light, &mut dst), config)?;
        Ok((dst, report))
    }

    /// Runs one frame on the device into a copy of the scene color.
    pub fn post_process_gpu(
        &self,
        pipeline: &mut GpuLightScatteringPipeline,
        camera: &CameraAttribs,
        light: &LightAttribs,
        config: &PostProcessConfig,
    ) -> Result<(Surface<Vec4>, FrameReport)> {
        let mut dst = self.color.clone();
        let report = pipeline.perform_post_processing(self.attribs(camera, light, &mut dst), config)?;
        Ok((dst, report))
    }
}
