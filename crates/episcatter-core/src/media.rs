//! Participating media coefficients and phase functions.

use std::f32::consts::PI;

use glam::{Vec3, Vec4};

use crate::config::PostProcessConfig;

/// Henyey-Greenstein asymmetry parameter of the aerosol phase function.
pub const HG_ASYMMETRY: f32 = 0.98;

/// Mie coefficients are authored an order of magnitude above their effect.
const MIE_BETA_MULTIPLIER: f32 = 0.005;

/// Scattering coefficients derived from the user-facing media inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaParams {
    /// Total Rayleigh scattering per RGB channel.
    pub total_rayleigh_beta: Vec3,
    /// Rayleigh angular scattering, `total * 3 / (16 pi)`.
    pub angular_rayleigh_beta: Vec3,
    /// Total Mie scattering per RGB channel.
    pub total_mie_beta: Vec3,
    /// Mie angular scattering, `total / (4 pi)`.
    pub angular_mie_beta: Vec3,
    /// Extinction used along view rays.
    pub summ_total_beta: Vec3,
    /// Henyey-Greenstein constants `(1 - g^2, 1 + g^2, -2g, 1)`.
    pub hg_g: Vec4,
}

impl MediaParams {
    /// Computes the coefficients for a configuration.
    pub fn compute(config: &PostProcessConfig) -> Self {
        let total_rayleigh_beta = config.rayleigh_beta * config.distance_scaler;
        let angular_rayleigh_beta = total_rayleigh_beta * (3.0 / (16.0 * PI));
        let total_mie_beta = config.mie_beta * (MIE_BETA_MULTIPLIER * config.distance_scaler);
        let angular_mie_beta = total_mie_beta / (4.0 * PI);
        let g = HG_ASYMMETRY;
        Self {
            total_rayleigh_beta,
            angular_rayleigh_beta,
            total_mie_beta,
            angular_mie_beta,
            summ_total_beta: total_rayleigh_beta + total_mie_beta,
            hg_g: Vec4::new(1.0 - g * g, 1.0 + g * g, -2.0 * g, 1.0),
        }
    }

    /// Henyey-Greenstein lobe (without the `1/(4 pi)` folded into the betas).
    pub fn henyey_greenstein(&self, cos_theta: f32) -> f32 {
        let denom = (self.hg_g.y + self.hg_g.z * cos_theta).max(1e-6);
        self.hg_g.x / (denom * denom.sqrt())
    }

    /// Angular scattering coefficient for the angle between the view ray and
    /// the direction towards the light.
    pub fn angular_scattering(&self, cos_theta: f32, anisotropic: bool) -> Vec3 {
        if anisotropic {
            self.angular_rayleigh_beta * (1.0 + cos_theta * cos_theta)
                + self.angular_mie_beta * self.henyey_greenstein(cos_theta)
        } else {
            self.isotropic_scattering()
        }
    }

    /// Isotropic angular scattering, `(rayleigh + mie) / (4 pi)`.
    pub fn isotropic_scattering(&self) -> Vec3 {
        (self.total_rayleigh_beta + self.total_mie_beta) / (4.0 * PI)
    }

    /// Transmittance over `distance` world units.
    pub fn extinction(&self, distance: f32) -> Vec3 {
        exp3(-self.summ_total_beta * distance)
    }
}

/// Media inputs whose change requires recomputing [`MediaParams`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInputs {
    pub distance_scaler: f32,
    pub rayleigh_beta: Vec3,
    pub mie_beta: Vec3,
}

impl From<&PostProcessConfig> for MediaInputs {
    fn from(config: &PostProcessConfig) -> Self {
        Self {
            distance_scaler: config.distance_scaler,
            rayleigh_beta: config.rayleigh_beta,
            mie_beta: config.mie_beta,
        }
    }
}

/// Component-wise `exp`.
pub fn exp3(v: Vec3) -> Vec3 {
    Vec3::new(v.x.exp(), v.y.exp(), v.z.exp())
}

/// Sun color at ground level and ambient sky light.
///
/// Preetham and Hoffman's analytic daylight model: transmittance through
/// Rayleigh and aerosol extinction for the relative optical mass of the sun
/// direction. Returns `(sun_color, ambient)`; the sun color carries an
/// intensity of 2 in `w`.
pub fn sun_color(direction_on_sun: Vec3, turbidity: f32) -> (Vec4, Vec4) {
    let zenith_factor = direction_on_sun.y.clamp(0.0, 1.0);
    let ambient = Vec4::new(zenith_factor * 0.3, zenith_factor * 0.2, 0.25, 0.0);

    let mut theta = direction_on_sun.y.clamp(-1.0, 1.0).acos();
    if theta >= PI {
        theta = 2.0 * PI - theta;
    }
    let theta = theta.clamp(0.0, PI / 2.0);

    // Angstrom turbidity coefficient
    let beta = 0.046_083_66 * turbidity - 0.045_860_26;
    let relative_optical_mass =
        1.0 / (theta.cos() + 0.15 * (93.885 - theta / PI * 180.0).powf(-1.253));

    let lambda = [0.65_f32, 0.57, 0.475];
    let mut color = [0.0_f32; 3];
    for (c, l) in color.iter_mut().zip(lambda) {
        let tau_rayleigh = (-relative_optical_mass * 0.008_735 * l.powf(-4.08)).exp();
        let tau_aerosol = (-relative_optical_mass * beta * l.powf(-1.3)).exp();
        *c = tau_rayleigh * tau_aerosol;
    }
    (Vec4::new(color[0], color[1], color[2], 2.0), ambient)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() <= eps * b.abs()
    }

    #[test]
    fn test_media_coefficients() {
        let config = PostProcessConfig {
            distance_scaler: 1000.0,
            ..PostProcessConfig::default()
        };
        let media = MediaParams::compute(&config);
        assert!(approx(media.total_rayleigh_beta.x, 5.8e-3, 1e-5));
        assert!(approx(
            media.angular_rayleigh_beta.z,
            3.31e-2 * 3.0 / (16.0 * PI),
            1e-5
        ));
        assert!(approx(media.total_mie_beta.y, 2.0e-5 * 5.0, 1e-5));
        assert!(approx(
            media.summ_total_beta.x,
            media.total_rayleigh_beta.x + media.total_mie_beta.x,
            1e-6
        ));
        assert!(approx(media.hg_g.x, 1.0 - 0.98 * 0.98, 1e-6));
    }

    #[test]
    fn test_phase_function_forward_peak() {
        let media = MediaParams::compute(&PostProcessConfig::default());
        let forward = media.angular_scattering(1.0, true);
        let side = media.angular_scattering(0.0, true);
        assert!(forward.x > side.x * 10.0);
        let iso = media.angular_scattering(1.0, false);
        assert_eq!(iso, media.angular_scattering(-1.0, false));
    }

    #[test]
    fn test_extinction_decreases() {
        let media = MediaParams::compute(&PostProcessConfig::default().with_max_tracing_distance(1.0));
        let near = media.extinction(1.0);
        let far = media.extinction(1000.0);
        assert!(far.x < near.x && far.z < far.x);
        assert_eq!(media.extinction(0.0), Vec3::ONE);
    }

    #[test]
    fn test_sun_color_redder_near_horizon() {
        let (zenith, _) = sun_color(Vec3::Y, 2.0);
        let (horizon, ambient) = sun_color(Vec3::new(1.0, 0.05, 0.0).normalize(), 2.0);
        assert!(zenith.z > horizon.z);
        assert!(horizon.x / horizon.z > zenith.x / zenith.z);
        assert!(ambient.z > 0.0);
        assert_eq!(zenith.w, 2.0);
    }
}
