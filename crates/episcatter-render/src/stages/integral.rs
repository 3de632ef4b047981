//! Inscattering integrals along straight ray segments.
//!
//! For a directional light the integral of single scattering over a segment
//! has a closed form. For point and spot lights the light-to-point distance
//! varies along the ray; writing the segment in terms of the angle `phi`
//! between the ray point and the point of closest approach to the light
//! (distance `h`), the integral becomes
//!
//! ```text
//! I * exp(-beta * x0) / h * (G(h, phi1) - G(h, phi0))
//! G(h, phi) = integral(-pi/2, phi) of phase(-sin t) * exp(-beta * h * (tan t + sec t)) dt
//! ```
//!
//! where `x0` is the ray parameter of the closest approach. `G` can be read
//! from a precomputed table, reduced to the one-parameter table
//! `F(u, v) = integral(0, v) of exp(-u tan t) dt` for isotropic scattering,
//! or approximated by freezing the integrand at the segment midpoint.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use glam::{Vec3, Vec4};

use episcatter_core::{exp3, InscatteringMethod, LightType, MediaParams};

use crate::context::RenderContext;
use crate::error::RenderResult;
use crate::quad::{draw_quad, BlendMode, Fragment, Viewport};
use crate::surface::{Surface, Texel};
use crate::technique::TechniqueId;

use super::FrameView;

/// Width and height of the point-light tables.
pub const TABLE_RESOLUTION: u32 = 512;

/// Largest optical thickness `u` stored in the `F(u, v)` table.
pub const SRNN05_MAX_U: f32 = 10.0;

/// Integration sub-steps per table column.
const SUBSTEPS: u32 = 4;

/// Precomputed point-light inscattering table.
#[derive(Debug, Clone)]
pub enum InscatteringTable {
    /// `G(h, phi)` per RGB channel; rows are `h`, columns `phi`.
    Lut {
        table: Surface<Vec4>,
        max_height: f32,
    },
    /// `F(u, v)`; rows are `u` in `[0, SRNN05_MAX_U]`, columns `v` in `[0, pi/2]`.
    Srnn05 { table: Surface<f32> },
}

#[allow(clippy::cast_precision_loss)]
fn resolution_f32() -> f32 {
    TABLE_RESOLUTION as f32
}

/// Smallest closest-approach distance the LUT resolves.
pub fn lut_min_height(max_height: f32) -> f32 {
    max_height / resolution_f32()
}

#[allow(clippy::cast_precision_loss)]
fn lut_row_height(row: u32, max_height: f32) -> f32 {
    (row as f32 + 1.0) * lut_min_height(max_height)
}

#[allow(clippy::cast_precision_loss)]
fn lut_column_angle(column: u32) -> f32 {
    -FRAC_PI_2 + PI * column as f32 / (resolution_f32() - 1.0)
}

#[allow(clippy::cast_precision_loss)]
fn srnn_row_u(row: u32) -> f32 {
    SRNN05_MAX_U * row as f32 / (resolution_f32() - 1.0)
}

#[allow(clippy::cast_precision_loss)]
fn srnn_column_v(column: u32) -> f32 {
    FRAC_PI_2 * column as f32 / (resolution_f32() - 1.0)
}

/// Midpoint-rule integral of `f` over `[a, b]`.
#[allow(clippy::cast_precision_loss)]
fn integrate<T>(a: f32, b: f32, f: impl Fn(f32) -> T) -> T
where
    T: std::ops::Add<Output = T> + std::ops::Mul<f32, Output = T> + Default,
{
    let dt = (b - a) / SUBSTEPS as f32;
    (0..SUBSTEPS).fold(T::default(), |acc, i| {
        acc + f(a + (i as f32 + 0.5) * dt) * dt
    })
}

/// Replaces each row of column increments by its running sum.
fn prefix_sum_rows<T: Texel + std::ops::Add<Output = T>>(table: &mut Surface<T>) {
    let (w, h) = table.size();
    for y in 0..h {
        let mut acc = T::default();
        for x in 0..w {
            acc = acc + table.get(x, y);
            table.set(x, y, acc);
        }
    }
}

impl InscatteringTable {
    /// Builds `G(h, phi)` for heights up to `max_height`.
    pub fn build_lut(media: &MediaParams, anisotropic: bool, max_height: f32) -> RenderResult<(Self, usize)> {
        let mut table = Surface::<Vec4>::new("point light inscattering lut", TABLE_RESOLUTION, TABLE_RESOLUTION)?;
        let beta = media.summ_total_beta;
        let fragments = draw_quad(
            &mut table,
            Viewport::full(TABLE_RESOLUTION, TABLE_RESOLUTION),
            BlendMode::Replace,
            |inv| {
                if inv.x == 0 {
                    return Fragment::Output(Vec4::ZERO);
                }
                let h = lut_row_height(inv.y, max_height);
                let increment = integrate(lut_column_angle(inv.x - 1), lut_column_angle(inv.x), |phi| {
                    let phase = media.angular_scattering(-phi.sin(), anisotropic);
                    phase * exp3(-beta * (h * (FRAC_PI_4 + 0.5 * phi).tan()))
                });
                Fragment::Output(increment.extend(0.0))
            },
        );
        prefix_sum_rows(&mut table);
        Ok((Self::Lut { table, max_height }, fragments))
    }

    /// Builds `F(u, v)`.
    pub fn build_srnn05() -> RenderResult<(Self, usize)> {
        let mut table = Surface::<f32>::new("point light inscattering srnn05", TABLE_RESOLUTION, TABLE_RESOLUTION)?;
        let fragments = draw_quad(
            &mut table,
            Viewport::full(TABLE_RESOLUTION, TABLE_RESOLUTION),
            BlendMode::Replace,
            |inv| {
                if inv.x == 0 {
                    return Fragment::Output(0.0);
                }
                let u = srnn_row_u(inv.y);
                Fragment::Output(integrate(srnn_column_v(inv.x - 1), srnn_column_v(inv.x), |v| {
                    (-u * v.tan()).exp()
                }))
            },
        );
        prefix_sum_rows(&mut table);
        Ok((Self::Srnn05 { table }, fragments))
    }

    /// Table lookup of `G(h, phi)`; `None` for an `F` table.
    pub fn lut(&self, h: f32, phi: f32) -> Option<Vec3> {
        match self {
            Self::Lut { table, max_height } => {
                let fr = h / lut_min_height(*max_height) - 1.0;
                let fc = (phi + FRAC_PI_2) / PI * (resolution_f32() - 1.0);
                Some(table.sample_texel_linear(fc, fr).truncate())
            }
            Self::Srnn05 { .. } => None,
        }
    }

    /// Table lookup of `F(u, v)`; `None` for a `G` table.
    pub fn srnn05(&self, u: f32, v: f32) -> Option<f32> {
        match self {
            Self::Srnn05 { table } => {
                if u > SRNN05_MAX_U {
                    // exp(-u tan v) only matters near v = 0 where tan v ~ v.
                    return Some((1.0 - (-u * v).exp()) / u);
                }
                let fr = u / SRNN05_MAX_U * (resolution_f32() - 1.0);
                let fc = v / FRAC_PI_2 * (resolution_f32() - 1.0);
                Some(table.sample_texel_linear(fc, fr))
            }
            Self::Lut { .. } => None,
        }
    }
}

/// Builds the table required by the configured method, if it is missing.
pub fn precompute_point_light_inscattering(ctx: &mut RenderContext, frame: &FrameView<'_>) -> RenderResult<()> {
    let config = frame.config;
    let method = config.inscattering_method;
    if !config.light_type.is_positional() || !method.uses_table() || ctx.surfaces.tables.is_some() {
        return Ok(());
    }
    ctx.techniques.get(TechniqueId::PrecomputePointLightInscattering)?;
    log::info!("precomputing {method:?} point light inscattering table");
    let (table, fragments) = match method {
        InscatteringMethod::Srnn05 => InscatteringTable::build_srnn05()?,
        _ => InscatteringTable::build_lut(
            frame.media,
            config.anisotropic_phase_function,
            config.max_tracing_distance,
        )?,
    };
    ctx.surfaces.store_tables(table);
    ctx.record_pass(TechniqueId::PrecomputePointLightInscattering, fragments);
    Ok(())
}

/// `integral(t0, t1) of exp(-beta t) dt` per channel.
pub fn exp_integral(beta: Vec3, t0: f32, t1: f32) -> Vec3 {
    let channel = |b: f32| {
        if b == 0.0 {
            t1 - t0
        } else {
            -(-b * t0).exp() * (-b * (t1 - t0)).exp_m1() / b
        }
    };
    Vec3::new(channel(beta.x), channel(beta.y), channel(beta.z))
}

#[derive(Debug, Clone, Copy)]
enum Geometry {
    Directional {
        phase: Vec3,
    },
    Positional {
        origin: Vec3,
        dir: Vec3,
        light_pos: Vec3,
        /// Ray parameter of the closest approach to the light.
        x0: f32,
        /// Distance of the closest approach.
        h: f32,
    },
}

/// Evaluates the unshadowed inscattering of segments of one view ray.
#[derive(Debug, Clone, Copy)]
pub struct SegmentIntegrator<'a> {
    media: &'a MediaParams,
    table: Option<&'a InscatteringTable>,
    method: InscatteringMethod,
    anisotropic: bool,
    radiance: Vec3,
    geometry: Geometry,
}

impl<'a> SegmentIntegrator<'a> {
    /// Integrator for the ray `origin + t * dir` with unit `dir`.
    pub fn new(frame: &FrameView<'a>, table: Option<&'a InscatteringTable>, origin: Vec3, dir: Vec3) -> Self {
        let config = frame.config;
        let light = frame.light;
        let geometry = match config.light_type {
            LightType::Directional => Geometry::Directional {
                phase: frame.media.angular_scattering(
                    dir.dot(light.dir_on_light),
                    config.anisotropic_phase_function,
                ),
            },
            LightType::Point | LightType::Spot => {
                let to_light = light.world_pos - origin;
                let x0 = to_light.dot(dir);
                let h = (to_light - dir * x0).length();
                Geometry::Positional {
                    origin,
                    dir,
                    light_pos: light.world_pos,
                    x0,
                    h,
                }
            }
        };
        Self {
            media: frame.media,
            table,
            method: config.inscattering_method,
            anisotropic: config.anisotropic_phase_function,
            radiance: light.radiance(),
            geometry,
        }
    }

    /// Inscattered radiance reaching the ray origin from `[t0, t1]`.
    pub fn segment(&self, t0: f32, t1: f32) -> Vec3 {
        if t1 <= t0 {
            return Vec3::ZERO;
        }
        let beta = self.media.summ_total_beta;
        match self.geometry {
            Geometry::Directional { phase } => self.radiance * phase * exp_integral(beta, t0, t1),
            Geometry::Positional {
                origin,
                dir,
                light_pos,
                x0,
                h,
            } => {
                let tabulated = match (self.method, self.table) {
                    (InscatteringMethod::Lut, Some(table)) => self.lut_segment(table, x0, h, t0, t1),
                    (InscatteringMethod::Srnn05, Some(table)) => self.srnn05_segment(table, x0, h, t0, t1),
                    _ => None,
                };
                tabulated.unwrap_or_else(|| self.analytic_segment(origin, dir, light_pos, t0, t1))
            }
        }
    }

    fn analytic_segment(&self, origin: Vec3, dir: Vec3, light_pos: Vec3, t0: f32, t1: f32) -> Vec3 {
        let mid = origin + dir * (0.5 * (t0 + t1));
        let to_light = light_pos - mid;
        let distance = to_light.length().max(1e-3);
        let cos_theta = dir.dot(to_light) / distance;
        let phase = self.media.angular_scattering(cos_theta, self.anisotropic);
        let attenuation = self.media.extinction(distance) / (distance * distance);
        self.radiance * phase * attenuation * exp_integral(self.media.summ_total_beta, t0, t1)
    }

    fn lut_segment(&self, table: &InscatteringTable, x0: f32, h: f32, t0: f32, t1: f32) -> Option<Vec3> {
        let max_height = match table {
            InscatteringTable::Lut { max_height, .. } => *max_height,
            InscatteringTable::Srnn05 { .. } => return None,
        };
        let h = h.max(lut_min_height(max_height));
        let phi0 = ((t0 - x0) / h).atan();
        let phi1 = ((t1 - x0) / h).atan();
        let g = table.lut(h, phi1)? - table.lut(h, phi0)?;
        let scale = exp3(-self.media.summ_total_beta * x0) / h;
        Some(self.radiance * scale * g)
    }

    fn srnn05_segment(&self, table: &InscatteringTable, x0: f32, h: f32, t0: f32, t1: f32) -> Option<Vec3> {
        let h = h.max(1e-4);
        let xi = |t: f32| FRAC_PI_4 + 0.5 * ((t - x0) / h).atan();
        let (xi0, xi1) = (xi(t0), xi(t1));
        let beta = self.media.summ_total_beta;
        let channel = |b: f32| -> Option<f32> {
            let u = b * h;
            Some(2.0 * (table.srnn05(u, xi1)? - table.srnn05(u, xi0)?))
        };
        let f = Vec3::new(channel(beta.x)?, channel(beta.y)?, channel(beta.z)?);
        let scale = exp3(-beta * x0) / h;
        Some(self.radiance * self.media.isotropic_scattering() * scale * f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;
    use episcatter_core::{CameraAttribs, LightAttribs, PostProcessConfig};
    use glam::Mat4;

    struct Fixture {
        config: PostProcessConfig,
        media: MediaParams,
        camera: CameraAttribs,
        light: LightAttribs,
        color: Surface<Vec4>,
        depth: Surface<f32>,
        shadow: Surface<f32>,
    }

    impl Fixture {
        fn new(config: PostProcessConfig, light: LightAttribs) -> Self {
            let media = MediaParams::compute(&config);
            Self {
                config,
                media,
                camera: CameraAttribs::look_at(Vec3::ZERO, Vec3::Z, Vec3::Y, 1.0, 1.0, 0.1, 100.0),
                light,
                color: Surface::new("c", 2, 2).unwrap(),
                depth: Surface::new("d", 2, 2).unwrap(),
                shadow: Surface::new("s", 2, 2).unwrap(),
            }
        }

        fn frame(&self) -> FrameView<'_> {
            FrameView::new(
                &self.config,
                &self.media,
                &self.camera,
                &self.light,
                &self.color,
                &self.depth,
                &self.shadow,
                None,
            )
        }
    }

    fn point_config(method: InscatteringMethod, anisotropic: bool) -> PostProcessConfig {
        PostProcessConfig {
            light_type: LightType::Point,
            inscattering_method: method,
            anisotropic_phase_function: anisotropic,
            distance_scaler: 2000.0,
            max_tracing_distance: 40.0,
            ..PostProcessConfig::default()
        }
    }

    fn fine_analytic(integrator: &SegmentIntegrator<'_>, t0: f32, t1: f32) -> Vec3 {
        let n = 4000;
        let dt = (t1 - t0) / n as f32;
        (0..n)
            .map(|i| {
                let a = t0 + i as f32 * dt;
                integrator.segment(a, a + dt)
            })
            .sum()
    }

    fn close(a: Vec3, b: Vec3, rel: f32) -> bool {
        (a - b).abs().max_element() <= rel * b.abs().max_element()
    }

    #[test]
    fn test_exp_integral_limits() {
        let beta = Vec3::new(0.0, 0.5, 2.0);
        let v = exp_integral(beta, 0.0, 2.0);
        assert!((v.x - 2.0).abs() < 1e-6);
        assert!((v.y - (1.0 - (-1.0_f32).exp()) / 0.5).abs() < 1e-5);
        assert_eq!(exp_integral(beta, 1.0, 1.0), Vec3::ZERO);
    }

    #[test]
    fn test_directional_segments_add_up() {
        let light = LightAttribs::directional(Vec3::Y, Vec3::ONE, 5.0, Mat4::IDENTITY);
        let fx = Fixture::new(PostProcessConfig::default().with_max_tracing_distance(30.0), light);
        let frame = fx.frame();
        let integ = SegmentIntegrator::new(&frame, None, Vec3::ZERO, Vec3::Z);
        let whole = integ.segment(0.0, 10.0);
        let split = integ.segment(0.0, 4.0) + integ.segment(4.0, 10.0);
        assert!(close(split, whole, 1e-5));
        assert!(whole.z > whole.x, "rayleigh scatters blue more");
    }

    #[test]
    fn test_exp_integral_short_segments_add_up() {
        let beta = Vec3::new(5.8e-6, 1.35e-5, 3.31e-5);
        let whole = exp_integral(beta, 2.0, 2.5);
        let mut split = Vec3::ZERO;
        for i in 0..50 {
            let t = 2.0 + 0.01 * i as f32;
            split += exp_integral(beta, t, t + 0.01);
        }
        assert!(close(split, whole, 1e-5), "{split} vs {whole}");
        assert!(close(whole, Vec3::splat(0.5), 1e-4));
    }

    #[test]
    fn test_lut_matches_fine_analytic() {
        let light = LightAttribs::point(Vec3::new(1.5, 0.5, 6.0), Vec3::ONE, 10.0, Mat4::IDENTITY);
        let analytic = Fixture::new(point_config(InscatteringMethod::Analytic, true), light);
        let tabulated = Fixture::new(point_config(InscatteringMethod::Lut, true), light);
        let (table, fragments) =
            InscatteringTable::build_lut(&tabulated.media, true, tabulated.config.max_tracing_distance).unwrap();
        assert_eq!(fragments, (TABLE_RESOLUTION * TABLE_RESOLUTION) as usize);

        let frame_a = analytic.frame();
        let frame_t = tabulated.frame();
        let reference = fine_analytic(&SegmentIntegrator::new(&frame_a, None, Vec3::ZERO, Vec3::Z), 1.0, 12.0);
        let lut = SegmentIntegrator::new(&frame_t, Some(&table), Vec3::ZERO, Vec3::Z).segment(1.0, 12.0);
        assert!(close(lut, reference, 0.03), "{lut} vs {reference}");
    }

    #[test]
    fn test_srnn05_matches_fine_analytic_isotropic() {
        let light = LightAttribs::point(Vec3::new(-1.0, 1.0, 4.0), Vec3::ONE, 10.0, Mat4::IDENTITY);
        let analytic = Fixture::new(point_config(InscatteringMethod::Analytic, false), light);
        let tabulated = Fixture::new(point_config(InscatteringMethod::Srnn05, false), light);
        let (table, _) = InscatteringTable::build_srnn05().unwrap();

        let frame_a = analytic.frame();
        let frame_t = tabulated.frame();
        let reference = fine_analytic(&SegmentIntegrator::new(&frame_a, None, Vec3::ZERO, Vec3::Z), 0.5, 15.0);
        let srnn = SegmentIntegrator::new(&frame_t, Some(&table), Vec3::ZERO, Vec3::Z).segment(0.5, 15.0);
        assert!(close(srnn, reference, 0.03), "{srnn} vs {reference}");
    }

    #[test]
    fn test_srnn05_table_edges() {
        let (table, _) = InscatteringTable::build_srnn05().unwrap();
        // F(0, v) = v
        let f = table.srnn05(0.0, 1.0).unwrap();
        assert!((f - 1.0).abs() < 1e-2, "{f}");
        assert_eq!(table.srnn05(3.0, 0.0), Some(0.0));
        assert!(table.lut(1.0, 0.0).is_none());
        let far = table.srnn05(50.0, FRAC_PI_2).unwrap();
        assert!((far - 1.0 / 50.0).abs() < 1e-3);
    }
}
