//! Post-processing configuration and frame-over-frame change detection.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScatterError};

/// Smallest and largest supported slice / sample counts.
pub const MIN_EPIPOLAR_COUNT: u32 = 32;
/// Largest supported slice / sample count.
pub const MAX_EPIPOLAR_COUNT: u32 = 2048;

/// Type of the light source casting the shafts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LightType {
    /// Sun-like light at infinity.
    #[default]
    Directional,
    /// Cone light with a position and axis.
    Spot,
    /// Omnidirectional light with a position.
    Point,
}

impl LightType {
    /// Value of the `LIGHT_TYPE` technique macro.
    pub fn macro_value(self) -> u32 {
        match self {
            Self::Directional => 0,
            Self::Spot => 1,
            Self::Point => 2,
        }
    }

    /// Returns true for lights that have a world position.
    pub fn is_positional(self) -> bool {
        !matches!(self, Self::Directional)
    }
}

/// Acceleration structure used when ray marching through the shadow map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccelStruct {
    /// Per-step shadow map lookups.
    None,
    /// 1D min/max depth tree built per epipolar slice.
    #[default]
    MinMaxTree,
}

impl AccelStruct {
    /// Value of the `ACCEL_STRUCT` technique macro.
    pub fn macro_value(self) -> u32 {
        match self {
            Self::None => 0,
            Self::MinMaxTree => 1,
        }
    }
}

/// How the in-scattering integral is evaluated for point and spot lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InscatteringMethod {
    /// Precomputed RGB table over (closest approach distance, angle).
    #[default]
    Lut,
    /// Precomputed scalar table of the Sun et al. 2005 special function.
    Srnn05,
    /// Per-segment closed form with the light term frozen at the midpoint.
    Analytic,
}

impl InscatteringMethod {
    /// Value of the `INSCTR_INTGL_EVAL_METHOD` technique macro.
    pub fn macro_value(self) -> u32 {
        match self {
            Self::Lut => 0,
            Self::Srnn05 => 1,
            Self::Analytic => 2,
        }
    }

    /// Returns true when the method needs a precomputed table.
    pub fn uses_table(self) -> bool {
        !matches!(self, Self::Analytic)
    }
}

/// Which light scattering pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LightScatteringTechnique {
    /// Epipolar sampling with sparse ray marching.
    #[default]
    Epipolar,
    /// Ray march every screen pixel.
    BruteForce,
}

/// Complete set of tunable post-processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    /// Number of epipolar slices (power of two in [32, 2048]).
    pub num_epipolar_slices: u32,
    /// Samples per slice (power of two in [32, 2048]).
    pub max_samples_in_slice: u32,
    /// Stride between unconditional reference samples.
    pub initial_sample_step_in_slice: u32,
    /// How much denser the initial stride is near the epipole.
    pub epipole_sampling_density_factor: u32,
    /// Camera-space depth difference that triggers refinement.
    pub refinement_threshold: f32,
    /// In-scattering is computed at `1/downscale_factor` resolution.
    pub downscale_factor: u32,
    /// Width of the min/max tree along a slice, 0 means shadow map resolution.
    pub min_max_shadow_map_resolution: u32,
    /// Coarsest min/max tree level, in shadow map texels.
    pub max_shadow_map_step: u32,
    /// Keep short slices at one sample per pixel.
    pub optimize_sample_locations: bool,
    /// Repair pixels that epipolar interpolation cannot resolve.
    pub correct_scattering_at_depth_breaks: bool,
    /// Draw the epipolar sample locations over the result.
    pub show_sampling: bool,
    /// Paint repaired pixels in a debug color.
    pub show_depth_breaks: bool,
    /// Output in-scattering without the attenuated background.
    pub show_lighting_only: bool,
    /// Tint light passing through the stained glass layer (directional only).
    pub stained_glass: bool,
    /// Rayleigh + Henyey-Greenstein phase instead of an isotropic one.
    pub anisotropic_phase_function: bool,
    /// Epipolar pipeline or per-pixel fallback.
    pub technique: LightScatteringTechnique,
    /// Light source type.
    pub light_type: LightType,
    /// Shadow map acceleration structure.
    pub accel_struct: AccelStruct,
    /// Point/spot light integral evaluation.
    pub inscattering_method: InscatteringMethod,
    /// Scales the physical coefficients to scene units.
    pub distance_scaler: f32,
    /// Rayleigh scattering coefficients per RGB channel.
    pub rayleigh_beta: Vec3,
    /// Mie scattering coefficients per RGB channel.
    pub mie_beta: Vec3,
    /// View rays are clipped to this length.
    pub max_tracing_distance: f32,
    /// Tone mapping exposure.
    pub exposure: f32,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            num_epipolar_slices: 512,
            max_samples_in_slice: 256,
            initial_sample_step_in_slice: 16,
            epipole_sampling_density_factor: 2,
            refinement_threshold: 0.03,
            downscale_factor: 1,
            min_max_shadow_map_resolution: 0,
            max_shadow_map_step: 16,
            optimize_sample_locations: true,
            correct_scattering_at_depth_breaks: true,
            show_sampling: false,
            show_depth_breaks: false,
            show_lighting_only: false,
            stained_glass: false,
            anisotropic_phase_function: true,
            technique: LightScatteringTechnique::Epipolar,
            light_type: LightType::Directional,
            accel_struct: AccelStruct::MinMaxTree,
            inscattering_method: InscatteringMethod::Lut,
            distance_scaler: 1.0,
            rayleigh_beta: Vec3::new(5.8e-6, 1.35e-5, 3.31e-5),
            mie_beta: Vec3::new(2.0e-5, 2.0e-5, 2.0e-5),
            max_tracing_distance: 20.0,
            exposure: 1.0,
        }
    }
}

impl PostProcessConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives scene-dependent defaults from the scene extent and light.
    ///
    /// Tracing distance grows with the extent (much further for positional
    /// lights), the distance scaler keeps optical depth independent of scene
    /// units, and the min/max tree spans the whole shadow map.
    pub fn for_scene(scene_extent: f32, light_type: LightType, shadow_map_resolution: u32) -> Self {
        let max_tracing_distance = scene_extent
            * if light_type == LightType::Directional {
                1.5
            } else {
                10.0
            };
        Self {
            light_type,
            max_tracing_distance,
            distance_scaler: 60000.0 / max_tracing_distance,
            refinement_threshold: 0.03 * scene_extent,
            max_shadow_map_step: (shadow_map_resolution / 32).max(2),
            min_max_shadow_map_resolution: shadow_map_resolution,
            stained_glass: false,
            ..Self::default()
        }
    }

    /// Sets the number of epipolar slices.
    pub fn with_slices(mut self, slices: u32) -> Self {
        self.num_epipolar_slices = slices;
        self
    }

    /// Sets the number of samples per slice.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.max_samples_in_slice = samples;
        self
    }

    /// Sets the initial reference sample stride.
    pub fn with_initial_step(mut self, step: u32) -> Self {
        self.initial_sample_step_in_slice = step;
        self
    }

    /// Sets the epipole sampling density factor.
    pub fn with_epipole_density(mut self, factor: u32) -> Self {
        self.epipole_sampling_density_factor = factor;
        self
    }

    /// Sets the refinement depth threshold.
    pub fn with_refinement_threshold(mut self, threshold: f32) -> Self {
        self.refinement_threshold = threshold;
        self
    }

    /// Sets the downscale factor.
    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale_factor = factor;
        self
    }

    /// Sets the light type.
    pub fn with_light_type(mut self, light_type: LightType) -> Self {
        self.light_type = light_type;
        self
    }

    /// Sets the acceleration structure.
    pub fn with_accel_struct(mut self, accel: AccelStruct) -> Self {
        self.accel_struct = accel;
        self
    }

    /// Sets the in-scattering integral evaluation method.
    pub fn with_inscattering_method(mut self, method: InscatteringMethod) -> Self {
        self.inscattering_method = method;
        self
    }

    /// Selects the epipolar or brute-force pipeline.
    pub fn with_technique(mut self, technique: LightScatteringTechnique) -> Self {
        self.technique = technique;
        self
    }

    /// Enables or disables the sample location overlay.
    pub fn with_show_sampling(mut self, show: bool) -> Self {
        self.show_sampling = show;
        self
    }

    /// Enables or disables sample location optimization.
    pub fn with_optimize_sample_locations(mut self, optimize: bool) -> Self {
        self.optimize_sample_locations = optimize;
        self
    }

    /// Enables or disables depth break correction.
    pub fn with_depth_break_correction(mut self, correct: bool) -> Self {
        self.correct_scattering_at_depth_breaks = correct;
        self
    }

    /// Sets the maximum tracing distance.
    pub fn with_max_tracing_distance(mut self, distance: f32) -> Self {
        self.max_tracing_distance = distance;
        self
    }

    /// Sets the tone mapping exposure.
    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    /// Width of the min/max tree for a given shadow map resolution.
    pub fn effective_min_max_resolution(&self, shadow_map_resolution: u32) -> u32 {
        if self.min_max_shadow_map_resolution == 0 {
            shadow_map_resolution
        } else {
            self.min_max_shadow_map_resolution
        }
    }

    /// Returns true when scattering is computed at reduced resolution.
    pub fn is_downscaled(&self) -> bool {
        self.downscale_factor > 1
    }

    /// Checks that every field lies in its documented range.
    ///
    /// The device pipeline calls this before every frame. The host pipeline
    /// treats the ranges as preconditions and reports out-of-range values
    /// when it specializes a technique.
    pub fn validate(&self) -> Result<()> {
        let in_epipolar_range =
            |v: u32| v.is_power_of_two() && (MIN_EPIPOLAR_COUNT..=MAX_EPIPOLAR_COUNT).contains(&v);
        if !in_epipolar_range(self.num_epipolar_slices) {
            return Err(ScatterError::InvalidConfig(format!(
                "slice count {} must be a power of two in [{MIN_EPIPOLAR_COUNT}, {MAX_EPIPOLAR_COUNT}]",
                self.num_epipolar_slices
            )));
        }
        if !in_epipolar_range(self.max_samples_in_slice) {
            return Err(ScatterError::InvalidConfig(format!(
                "sample count {} must be a power of two in [{MIN_EPIPOLAR_COUNT}, {MAX_EPIPOLAR_COUNT}]",
                self.max_samples_in_slice
            )));
        }
        if !self.initial_sample_step_in_slice.is_power_of_two()
            || self.initial_sample_step_in_slice > self.max_samples_in_slice
        {
            return Err(ScatterError::InvalidConfig(format!(
                "initial sample step {} must be a power of two not above {}",
                self.initial_sample_step_in_slice, self.max_samples_in_slice
            )));
        }
        if !self.epipole_sampling_density_factor.is_power_of_two() {
            return Err(ScatterError::InvalidConfig(format!(
                "epipole density factor {} must be a power of two",
                self.epipole_sampling_density_factor
            )));
        }
        if self.downscale_factor == 0 {
            return Err(ScatterError::InvalidConfig(
                "downscale factor must be at least 1".into(),
            ));
        }
        if self.max_shadow_map_step < 2 || !self.max_shadow_map_step.is_power_of_two() {
            return Err(ScatterError::InvalidConfig(format!(
                "max shadow map step {} must be a power of two of at least 2",
                self.max_shadow_map_step
            )));
        }
        if self.min_max_shadow_map_resolution != 0
            && !self.min_max_shadow_map_resolution.is_power_of_two()
        {
            return Err(ScatterError::InvalidConfig(format!(
                "min/max resolution {} must be a power of two",
                self.min_max_shadow_map_resolution
            )));
        }
        if !(self.refinement_threshold > 0.0) || !(self.max_tracing_distance > 0.0) {
            return Err(ScatterError::InvalidConfig(
                "refinement threshold and tracing distance must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Returns the set of fields that differ from `previous`.
    pub fn diff(&self, previous: &Self) -> ConfigDiff {
        let mut diff = ConfigDiff::empty();
        let mut mark = |changed: bool, field: ConfigField| {
            if changed {
                diff.insert(field);
            }
        };
        mark(
            self.num_epipolar_slices != previous.num_epipolar_slices,
            ConfigField::NumEpipolarSlices,
        );
        mark(
            self.max_samples_in_slice != previous.max_samples_in_slice,
            ConfigField::MaxSamplesInSlice,
        );
        mark(
            self.initial_sample_step_in_slice != previous.initial_sample_step_in_slice,
            ConfigField::InitialSampleStep,
        );
        mark(
            self.epipole_sampling_density_factor != previous.epipole_sampling_density_factor,
            ConfigField::EpipoleSamplingDensity,
        );
        mark(
            self.refinement_threshold.to_bits() != previous.refinement_threshold.to_bits(),
            ConfigField::RefinementThreshold,
        );
        mark(
            self.downscale_factor != previous.downscale_factor,
            ConfigField::DownscaleFactor,
        );
        mark(
            self.min_max_shadow_map_resolution != previous.min_max_shadow_map_resolution,
            ConfigField::MinMaxShadowMapResolution,
        );
        mark(
            self.max_shadow_map_step != previous.max_shadow_map_step,
            ConfigField::MaxShadowMapStep,
        );
        mark(
            self.optimize_sample_locations != previous.optimize_sample_locations,
            ConfigField::OptimizeSampleLocations,
        );
        mark(
            self.correct_scattering_at_depth_breaks != previous.correct_scattering_at_depth_breaks,
            ConfigField::CorrectScatteringAtDepthBreaks,
        );
        mark(
            self.show_sampling != previous.show_sampling,
            ConfigField::ShowSampling,
        );
        mark(
            self.show_depth_breaks != previous.show_depth_breaks,
            ConfigField::ShowDepthBreaks,
        );
        mark(
            self.show_lighting_only != previous.show_lighting_only,
            ConfigField::ShowLightingOnly,
        );
        mark(
            self.stained_glass != previous.stained_glass,
            ConfigField::StainedGlass,
        );
        mark(
            self.anisotropic_phase_function != previous.anisotropic_phase_function,
            ConfigField::AnisotropicPhaseFunction,
        );
        mark(self.technique != previous.technique, ConfigField::Technique);
        mark(self.light_type != previous.light_type, ConfigField::LightType);
        mark(
            self.accel_struct != previous.accel_struct,
            ConfigField::AccelStruct,
        );
        mark(
            self.inscattering_method != previous.inscattering_method,
            ConfigField::InscatteringMethod,
        );
        mark(
            self.distance_scaler.to_bits() != previous.distance_scaler.to_bits(),
            ConfigField::DistanceScaler,
        );
        mark(
            self.rayleigh_beta != previous.rayleigh_beta,
            ConfigField::RayleighBeta,
        );
        mark(self.mie_beta != previous.mie_beta, ConfigField::MieBeta);
        mark(
            self.max_tracing_distance.to_bits() != previous.max_tracing_distance.to_bits(),
            ConfigField::MaxTracingDistance,
        );
        mark(
            self.exposure.to_bits() != previous.exposure.to_bits(),
            ConfigField::Exposure,
        );
        diff
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the configuration to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!("loaded post-process config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Saves the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }
}

/// One configuration field, plus the screen resolution pseudo-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConfigField {
    NumEpipolarSlices,
    MaxSamplesInSlice,
    InitialSampleStep,
    EpipoleSamplingDensity,
    RefinementThreshold,
    DownscaleFactor,
    MinMaxShadowMapResolution,
    MaxShadowMapStep,
    OptimizeSampleLocations,
    CorrectScatteringAtDepthBreaks,
    ShowSampling,
    ShowDepthBreaks,
    ShowLightingOnly,
    StainedGlass,
    AnisotropicPhaseFunction,
    Technique,
    LightType,
    AccelStruct,
    InscatteringMethod,
    DistanceScaler,
    RayleighBeta,
    MieBeta,
    MaxTracingDistance,
    Exposure,
    /// Back buffer size changed.
    ScreenResolution,
}

impl ConfigField {
    /// Every field, in declaration order.
    pub const ALL: [ConfigField; 25] = [
        Self::NumEpipolarSlices,
        Self::MaxSamplesInSlice,
        Self::InitialSampleStep,
        Self::EpipoleSamplingDensity,
        Self::RefinementThreshold,
        Self::DownscaleFactor,
        Self::MinMaxShadowMapResolution,
        Self::MaxShadowMapStep,
        Self::OptimizeSampleLocations,
        Self::CorrectScatteringAtDepthBreaks,
        Self::ShowSampling,
        Self::ShowDepthBreaks,
        Self::ShowLightingOnly,
        Self::StainedGlass,
        Self::AnisotropicPhaseFunction,
        Self::Technique,
        Self::LightType,
        Self::AccelStruct,
        Self::InscatteringMethod,
        Self::DistanceScaler,
        Self::RayleighBeta,
        Self::MieBeta,
        Self::MaxTracingDistance,
        Self::Exposure,
        Self::ScreenResolution,
    ];

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Set of changed configuration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDiff(u32);

impl ConfigDiff {
    /// No changes.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every field changed, used for the first frame.
    pub fn all() -> Self {
        ConfigField::ALL
            .iter()
            .fold(Self::empty(), |diff, &field| diff.with(field))
    }

    /// Adds a field to the set.
    pub fn insert(&mut self, field: ConfigField) {
        self.0 |= field.bit();
    }

    /// Returns the set with `field` added.
    #[must_use]
    pub fn with(mut self, field: ConfigField) -> Self {
        self.insert(field);
        self
    }

    /// Returns true if `field` changed.
    pub fn contains(self, field: ConfigField) -> bool {
        self.0 & field.bit() != 0
    }

    /// Returns true if any of `fields` changed.
    pub fn intersects(self, fields: &[ConfigField]) -> bool {
        fields.iter().any(|&f| self.contains(f))
    }

    /// Returns true if nothing changed.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the changed fields.
    pub fn iter(self) -> impl Iterator<Item = ConfigField> {
        ConfigField::ALL
            .into_iter()
            .filter(move |&f| self.contains(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PostProcessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_epipolar_slices, 512);
        assert_eq!(config.max_samples_in_slice, 256);
        assert!(!config.is_downscaled());
    }

    #[test]
    fn test_diff_detects_single_field() {
        let a = PostProcessConfig::default();
        let b = a.clone().with_samples(128);
        let diff = b.diff(&a);
        assert!(diff.contains(ConfigField::MaxSamplesInSlice));
        assert_eq!(diff.iter().count(), 1);
        assert!(a.diff(&a).is_empty());
    }

    #[test]
    fn test_diff_all_covers_every_field() {
        let all = ConfigDiff::all();
        for field in ConfigField::ALL {
            assert!(all.contains(field));
        }
        assert!(all.intersects(&[ConfigField::ScreenResolution]));
    }

    #[test]
    fn test_validate_rejects_bad_counts() {
        assert!(PostProcessConfig::default().with_slices(100).validate().is_err());
        assert!(PostProcessConfig::default().with_samples(4096).validate().is_err());
        assert!(PostProcessConfig::default()
            .with_samples(64)
            .with_initial_step(128)
            .validate()
            .is_err());
        assert!(PostProcessConfig::default().with_downscale(0).validate().is_err());
    }

    #[test]
    fn test_for_scene_scales_with_extent() {
        let dir = PostProcessConfig::for_scene(10.0, LightType::Directional, 1024);
        assert!((dir.max_tracing_distance - 15.0).abs() < 1e-5);
        assert!((dir.distance_scaler - 4000.0).abs() < 1e-2);
        assert_eq!(dir.max_shadow_map_step, 32);
        assert_eq!(dir.effective_min_max_resolution(2048), 1024);

        let point = PostProcessConfig::for_scene(10.0, LightType::Point, 1024);
        assert!((point.max_tracing_distance - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_json_roundtrip_with_missing_fields() {
        let config = PostProcessConfig::from_json_str(r#"{ "num_epipolar_slices": 64 }"#)
            .expect("partial config should parse");
        assert_eq!(config.num_epipolar_slices, 64);
        assert_eq!(config.max_samples_in_slice, 256);

        let json = config.to_json_string().expect("serialize");
        let back = PostProcessConfig::from_json_str(&json).expect("parse");
        assert_eq!(back, config);
    }
}
